//! Builds a [`tera`] template engine from configuration and a service
//! container, and wraps it in a [`Renderer`](renderer::Renderer) for a web
//! framework's view layer.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use platen::{
//!     config::Config,
//!     container::{ids, Container, Service},
//!     renderer::{RendererFactory, TemplateRenderer},
//! };
//!
//! # fn main() -> miette::Result<()> {
//! let mut container = Container::new();
//! container.set(ids::CONFIG, Service::new(Config::from_file("platen.toml")?));
//! let renderer = RendererFactory::default().create(Arc::new(container))?;
//! let html = renderer.render("pages::home", &serde_json::json!({ "title": "Home" }))?;
//! # Ok(())
//! # }
//! ```

use std::{path::Path, sync::Arc};

use miette::Diagnostic;

use crate::{
    config::{Config, ConfigError},
    container::{ids, Container, Service},
    engine::factory::{BuildError, EngineFactory},
    extension::{
        url::{RouteTable, ServerUrlHelper, UrlHelper},
        ExtensionRegistry,
    },
    renderer::{RenderError, Renderer, RendererFactory},
};

pub mod config;
pub mod container;
pub mod engine;
pub mod extension;
pub mod renderer;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Diagnostic, Debug)]
#[error(transparent)]
#[diagnostic(transparent)]
pub struct Error {
    source: InnerError,
}

#[derive(thiserror::Error, Diagnostic, Debug)]
enum InnerError {
    #[error("loading configuration")]
    Config(
        #[source]
        #[from]
        ConfigError,
    ),
    #[error(transparent)]
    #[diagnostic(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    #[diagnostic(transparent)]
    Render(#[from] RenderError),
}

impl From<ConfigError> for Error {
    fn from(error: ConfigError) -> Self {
        Self {
            source: error.into(),
        }
    }
}

impl From<BuildError> for Error {
    fn from(error: BuildError) -> Self {
        Self {
            source: error.into(),
        }
    }
}

impl From<RenderError> for Error {
    fn from(error: RenderError) -> Self {
        Self {
            source: error.into(),
        }
    }
}

/// Creates a container holding `config`.
///
/// When the config has a `base_url`, the URL helpers are registered too, with
/// the config's `routes` as the route table.
pub fn bootstrap(config: Config) -> Container {
    let mut container = Container::new();
    if let Some(base_url) = &config.base_url {
        let routes: Arc<dyn UrlHelper> = Arc::new(RouteTable::new(config.routes.clone()));
        container.set(ids::URL_HELPER, Service::new(routes));
        container.set(
            ids::SERVER_URL_HELPER,
            Service::new(ServerUrlHelper::new(base_url.clone())),
        );
    }
    container.set(ids::CONFIG, Service::new(config));
    container
}

/// Loads the config file at `path` and builds a renderer for it.
///
/// Relative template directories are resolved against the directory that
/// holds the config file.
pub fn renderer_from_file(path: &Path, registry: ExtensionRegistry) -> Result<Renderer> {
    let root = path.parent().unwrap_or(Path::new("."));
    let config = Config::from_file(path)?.resolve_paths(root);
    let container = bootstrap(config);
    let renderer = RendererFactory::new(EngineFactory::new(registry)).create(Arc::new(container))?;
    Ok(renderer)
}

#[cfg(test)]
mod test {
    use std::fs;

    use serde_json::json;

    use super::renderer_from_file;
    use crate::{extension::ExtensionRegistry, renderer::TemplateRenderer};

    #[cfg(feature = "escaper")]
    #[test]
    fn renders_from_a_config_file() -> miette::Result<()> {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("templates/pages")).unwrap();
        fs::write(
            dir.path().join("templates/pages/post.html"),
            concat!(
                r#"{% set href = url(route="post", params=post) %}"#,
                r#"<a href="{{ serverurl(path=href) }}">{{ escapeHtml(value=title) }}</a>"#,
            ),
        )
        .unwrap();
        fs::write(
            dir.path().join("platen.toml"),
            r#"
            base_url = "https://example.com"

            [routes]
            post = "/blog/{slug}/"

            [[plates.directories]]
            name = "pages"
            directory = "templates/pages"
            "#,
        )
        .unwrap();

        let renderer = renderer_from_file(&dir.path().join("platen.toml"), ExtensionRegistry::new())?;
        let html = renderer.render(
            "pages::post",
            &json!({"title": "Fish & Chips", "post": {"slug": "fish"}}),
        )?;

        assert_eq!(
            html,
            r#"<a href="https://example.com/blog/fish/">Fish &amp; Chips</a>"#
        );
        Ok(())
    }

    #[test]
    fn missing_config_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = renderer_from_file(&dir.path().join("nope.toml"), ExtensionRegistry::new())
            .unwrap_err();
        assert_eq!(err.to_string(), "loading configuration");
    }
}
