//! Code for implementing the command line interface to platen.

use std::path::PathBuf;

use clap::Args;
use clap::ValueHint::FilePath;
use platen::{extension::ExtensionRegistry, renderer::Renderer};

pub mod list;
pub mod render;

/// Describes a command that can be run from the command line.
///
/// This is normally implemented on the arguments struct.
pub trait Command {
    fn run(self) -> miette::Result<()>;
}

/// Options shared by every command that needs a renderer.
#[derive(Args)]
pub struct ConfigOptions {
    /// Configuration file (TOML, JSON or YAML)
    #[arg(long, short = 'c', value_hint = FilePath, default_value = "platen.toml")]
    pub config: PathBuf,
}

impl ConfigOptions {
    pub fn renderer(&self) -> miette::Result<Renderer> {
        // The command line has no compiled-in extensions, so configured names
        // must resolve to container services.
        Ok(platen::renderer_from_file(
            &self.config,
            ExtensionRegistry::new(),
        )?)
    }
}
