use std::path::PathBuf;

use clap::Args;
use clap::ValueHint::FilePath;
use miette::{IntoDiagnostic, WrapErr};
use platen::renderer::TemplateRenderer;
use serde_json::Value;
use tracing::info;

use super::{Command, ConfigOptions};

#[derive(Args)]
pub struct RenderOptions {
    /// Template to render, such as `pages::home`
    template: String,

    #[command(flatten)]
    config: ConfigOptions,

    /// JSON file holding the template parameters
    #[arg(long, short = 'd', value_hint = FilePath)]
    data: Option<PathBuf>,

    /// Treat the template argument as template source instead of a name
    #[arg(long, default_value_t = false)]
    inline: bool,
}

impl Command for RenderOptions {
    fn run(self) -> miette::Result<()> {
        let renderer = self.config.renderer()?;

        let params = match &self.data {
            Some(path) => {
                let contents = std::fs::read_to_string(path)
                    .into_diagnostic()
                    .wrap_err_with(|| format!("reading {}", path.display()))?;
                serde_json::from_str(&contents)
                    .into_diagnostic()
                    .wrap_err_with(|| format!("parsing {}", path.display()))?
            }
            None => Value::Null,
        };

        let output = if self.inline {
            renderer.render_inline(&self.template, &params)?
        } else {
            info!("rendering {}", self.template);
            renderer.render(&self.template, &params)?
        };
        print!("{output}");

        Ok(())
    }
}
