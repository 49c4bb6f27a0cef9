use clap::{Args, ValueEnum};
use platen::renderer::TemplateRenderer;

use super::{Command, ConfigOptions};

#[derive(Args)]
pub struct ListOptions {
    #[arg(default_value = "templates")]
    scope: Scope,

    #[command(flatten)]
    config: ConfigOptions,
}

#[derive(ValueEnum, Clone, PartialEq)]
pub enum Scope {
    Templates,
    Functions,
    Extensions,
    Paths,
}

impl Command for ListOptions {
    fn run(self) -> miette::Result<()> {
        let renderer = self.config.renderer()?;
        let engine = renderer.engine();

        match self.scope {
            Scope::Templates => engine.template_names().for_each(|name| println!("{name}")),
            Scope::Functions => engine.function_names().for_each(|name| println!("{name}")),
            Scope::Extensions => engine.extension_names().for_each(|name| println!("{name}")),
            Scope::Paths => {
                for path in renderer.paths() {
                    match path.namespace {
                        Some(namespace) => println!("{namespace}: {}", path.path.display()),
                        None => println!("(default): {}", path.path.display()),
                    }
                }
            }
        }

        Ok(())
    }
}
