//! Application configuration.
//!
//! Engine options live under the `[plates]` table:
//!
//! ```toml
//! [plates]
//! file_extension = "tpl"
//! directory = "templates"
//! extensions = ["Markdown"]
//!
//! [[plates.directories]]
//! name = "pages"
//! directory = "templates/pages"
//! ```

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use miette::Diagnostic;
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use url::Url;

use crate::extension::ExtensionSpec;

#[derive(Diagnostic, Debug, Error)]
pub enum ConfigError {
    #[error("reading `{}`", .0.display())]
    Read(PathBuf, #[source] std::io::Error),
    #[error("parsing `{}`", .0.display())]
    Parse(PathBuf, #[source] Box<dyn std::error::Error + Send + Sync>),
}

#[derive(Deserialize, Default, Clone, Debug)]
pub struct Config {
    #[serde(default)]
    pub plates: PlatesConfig,
    /// Base for `serverurl`; the URL extension is only set up when this is present.
    pub base_url: Option<Url>,
    /// Route name to path pattern, used by `url`.
    #[serde(default)]
    pub routes: BTreeMap<String, String>,
}

impl Config {
    /// Reads a config file, picking the format from its extension. Anything
    /// other than `.json`, `.yaml` or `.yml` is read as TOML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Read(path.into(), e))?;
        let parse_error =
            |e: Box<dyn std::error::Error + Send + Sync>| ConfigError::Parse(path.into(), e);

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&contents).map_err(|e| parse_error(Box::new(e))),
            Some("yaml" | "yml") => {
                serde_yaml::from_str(&contents).map_err(|e| parse_error(Box::new(e)))
            }
            _ => toml::from_str(&contents).map_err(|e| parse_error(Box::new(e))),
        }
    }

    /// Directory paths are resolved against `root`, typically the directory
    /// holding the config file.
    pub fn resolve_paths(mut self, root: &Path) -> Self {
        if let Some(directory) = &self.plates.directory {
            self.plates.directory = Some(root.join(directory));
        }
        for directory in &mut self.plates.directories {
            directory.directory = root.join(&directory.directory);
        }
        self
    }
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct PlatesConfig {
    #[serde(alias = "fileExtension")]
    pub file_extension: String,
    /// Templates named without a `folder::` prefix are found here.
    pub directory: Option<PathBuf>,
    pub directories: Vec<DirectoryConfig>,
    pub extensions: Vec<ExtensionSpec>,
    /// Template function name to the container service that implements it.
    pub functions: BTreeMap<String, String>,
    pub encoding: String,
    /// Default template parameters by template name, or `"*"` for all.
    pub defaults: BTreeMap<String, Map<String, Value>>,
}

impl Default for PlatesConfig {
    fn default() -> Self {
        Self {
            file_extension: "html".to_string(),
            directory: None,
            directories: vec![],
            extensions: vec![],
            functions: BTreeMap::new(),
            encoding: "utf-8".to_string(),
            defaults: BTreeMap::new(),
        }
    }
}

#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DirectoryConfig {
    pub name: String,
    #[serde(alias = "path")]
    pub directory: PathBuf,
    #[serde(default)]
    pub fallback: bool,
}
