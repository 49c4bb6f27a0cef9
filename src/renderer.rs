//! The renderer handed to the view layer.

use std::{collections::BTreeMap, path::PathBuf, sync::Arc};

use miette::Diagnostic;
use serde::Serialize;
use serde_json::{Map, Value};
use tera::Context;
use thiserror::Error;

use crate::{
    container::ServiceLookup,
    engine::{
        factory::{read_config, BuildError, EngineFactory},
        Engine,
    },
};

/// The template name that default parameters apply to for every template.
pub const TEMPLATE_ALL: &str = "*";

#[derive(Diagnostic, Debug, Error)]
pub enum RenderError {
    #[error("template parameters must be an object or null, found {0}")]
    InvalidParams(&'static str),
    #[error("serializing template parameters")]
    Serialize(#[source] serde_json::Error),
    #[error("rendering template `{name}`")]
    Template {
        name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// A template directory as reported by [`TemplateRenderer::paths`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TemplatePath {
    pub path: PathBuf,
    /// `None` for the default directory.
    pub namespace: Option<String>,
}

/// What the view layer needs from a template renderer.
pub trait TemplateRenderer: Send + Sync {
    fn render(&self, name: &str, params: &Value) -> Result<String, RenderError>;

    fn paths(&self) -> Vec<TemplatePath>;
}

/// Renders templates from a fully built [`Engine`].
///
/// The engine is not modified after construction, so a renderer can be
/// shared between threads and used concurrently.
#[derive(Debug)]
pub struct Renderer {
    engine: Engine,
    defaults: BTreeMap<String, Map<String, Value>>,
}

impl Renderer {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            defaults: BTreeMap::new(),
        }
    }

    /// Adds a parameter passed to `template` (or to every template, for
    /// [`TEMPLATE_ALL`]) unless the caller supplies its own value.
    pub fn with_default_param(
        mut self,
        template: impl Into<String>,
        param: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.defaults
            .entry(template.into())
            .or_default()
            .insert(param.into(), value.into());
        self
    }

    pub fn with_defaults(mut self, defaults: &BTreeMap<String, Map<String, Value>>) -> Self {
        for (template, params) in defaults {
            self.defaults
                .entry(template.clone())
                .or_default()
                .extend(params.clone());
        }
        self
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Renders `name` with any serializable parameter struct.
    pub fn render_serialize(
        &self,
        name: &str,
        params: &impl Serialize,
    ) -> Result<String, RenderError> {
        let params = serde_json::to_value(params).map_err(RenderError::Serialize)?;
        self.render(name, &params)
    }

    /// Renders a template given as source text rather than by name.
    pub fn render_inline(&self, source: &str, params: &Value) -> Result<String, RenderError> {
        let context = self.context(None, params)?;
        self.engine
            .render_str(source, &context)
            .map_err(|e| RenderError::Template {
                name: "<inline>".to_string(),
                source: Box::new(e),
            })
    }

    /// Merges the defaults for all templates, the defaults for `name` and the
    /// caller's parameters, in that order.
    fn context(&self, name: Option<&str>, params: &Value) -> Result<Context, RenderError> {
        let mut merged = Map::new();
        let scopes = [Some(TEMPLATE_ALL), name];
        for scope in scopes.into_iter().flatten() {
            if let Some(defaults) = self.defaults.get(scope) {
                merged.extend(defaults.clone());
            }
        }

        match params {
            Value::Null => {}
            Value::Object(params) => merged.extend(params.clone()),
            Value::Bool(_) => return Err(RenderError::InvalidParams("a boolean")),
            Value::Number(_) => return Err(RenderError::InvalidParams("a number")),
            Value::String(_) => return Err(RenderError::InvalidParams("a string")),
            Value::Array(_) => return Err(RenderError::InvalidParams("an array")),
        }

        Context::from_value(Value::Object(merged)).map_err(|e| RenderError::Template {
            name: name.unwrap_or("<inline>").to_string(),
            source: Box::new(e),
        })
    }
}

impl TemplateRenderer for Renderer {
    fn render(&self, name: &str, params: &Value) -> Result<String, RenderError> {
        let context = self.context(Some(name), params)?;
        self.engine
            .render(name, &context)
            .map_err(|e| RenderError::Template {
                name: name.to_string(),
                source: Box::new(e),
            })
    }

    fn paths(&self) -> Vec<TemplatePath> {
        let default = self.engine.directory().map(|path| TemplatePath {
            path: path.to_path_buf(),
            namespace: None,
        });
        default
            .into_iter()
            .chain(self.engine.folders().map(|(name, folder)| TemplatePath {
                path: folder.path.clone(),
                namespace: Some(name.to_string()),
            }))
            .collect()
    }
}

/// Builds a [`Renderer`] from the configuration registered in a container.
#[derive(Clone, Debug, Default)]
pub struct RendererFactory {
    engine_factory: EngineFactory,
}

impl RendererFactory {
    pub fn new(engine_factory: EngineFactory) -> Self {
        Self { engine_factory }
    }

    pub fn create(&self, lookup: Arc<dyn ServiceLookup>) -> Result<Renderer, BuildError> {
        let config = read_config(lookup.as_ref())?;
        let engine = self.engine_factory.build(&config.plates, lookup)?;
        Ok(Renderer::new(engine).with_defaults(&config.plates.defaults))
    }
}

#[cfg(test)]
mod test {
    use std::{fs, sync::Arc, thread};

    use serde::Serialize;
    use serde_json::{json, Value};

    use super::{
        RenderError, Renderer, RendererFactory, TemplatePath, TemplateRenderer, TEMPLATE_ALL,
    };
    use crate::{
        config::{Config, DirectoryConfig},
        container::{ids, Container, Service},
        engine::Engine,
    };

    fn renderer_with(templates: &[(&str, &str)]) -> (tempfile::TempDir, Renderer) {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("pages")).unwrap();
        for (name, contents) in templates {
            let path = dir.path().join("pages").join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, contents).unwrap();
        }
        let mut engine = Engine::new();
        engine.add_folder("pages", dir.path().join("pages"), false);
        engine.load_templates().unwrap();
        (dir, Renderer::new(engine))
    }

    #[test]
    fn defaults_are_merged_in_order() -> miette::Result<()> {
        let (_dir, renderer) =
            renderer_with(&[("home.html", "{{ title }}|{{ lang }}|{{ user }}")]);
        let renderer = renderer
            .with_default_param(TEMPLATE_ALL, "title", "Site")
            .with_default_param(TEMPLATE_ALL, "lang", "en")
            .with_default_param("pages::home", "title", "Home")
            .with_default_param("pages::other", "user", "nobody");

        let output = renderer.render("pages::home", &json!({"user": "ada", "lang": "fr"}))?;
        assert_eq!(output, "Home|fr|ada");
        Ok(())
    }

    #[test]
    fn null_params_are_empty() -> miette::Result<()> {
        let (_dir, renderer) = renderer_with(&[("plain.html", "plain")]);
        assert_eq!(renderer.render("pages::plain", &Value::Null)?, "plain");
        Ok(())
    }

    #[test]
    fn rejects_scalar_params() {
        let (_dir, renderer) = renderer_with(&[("plain.html", "plain")]);
        let err = renderer.render("pages::plain", &json!([1, 2])).unwrap_err();
        assert!(matches!(err, RenderError::InvalidParams("an array")));
    }

    #[test]
    fn renders_serializable_params() -> miette::Result<()> {
        #[derive(Serialize)]
        struct Page<'a> {
            title: &'a str,
        }

        let (_dir, renderer) = renderer_with(&[("page.html", "<h1>{{ title }}</h1>")]);
        assert_eq!(
            renderer.render_serialize("pages::page", &Page { title: "About" })?,
            "<h1>About</h1>"
        );
        Ok(())
    }

    #[test]
    fn unknown_template_names_the_template() {
        let (_dir, renderer) = renderer_with(&[]);
        let err = renderer.render("pages::missing", &Value::Null).unwrap_err();
        assert_eq!(err.to_string(), "rendering template `pages::missing`");
    }

    #[test]
    fn inline_templates_use_defaults_for_all() -> miette::Result<()> {
        let (_dir, renderer) = renderer_with(&[]);
        let renderer = renderer.with_default_param(TEMPLATE_ALL, "name", "world");
        assert_eq!(
            renderer.render_inline("hello {{ name }}", &Value::Null)?,
            "hello world"
        );
        Ok(())
    }

    #[test]
    fn reports_paths() {
        let mut engine = Engine::new();
        engine.set_directory("/srv/templates");
        engine.add_folder("pages", "/srv/pages", false);
        let renderer = Renderer::new(engine);

        assert_eq!(
            renderer.paths(),
            [
                TemplatePath {
                    path: "/srv/templates".into(),
                    namespace: None
                },
                TemplatePath {
                    path: "/srv/pages".into(),
                    namespace: Some("pages".to_string())
                },
            ]
        );
    }

    #[test]
    fn concurrent_renders_share_one_renderer() {
        let (_dir, renderer) = renderer_with(&[("n.html", "n={{ n }}")]);
        let renderer = Arc::new(renderer);

        thread::scope(|scope| {
            let handles = (0..8)
                .map(|n| {
                    let renderer = renderer.clone();
                    scope.spawn(move || renderer.render("pages::n", &json!({ "n": n })).unwrap())
                })
                .collect::<Vec<_>>();
            for (n, handle) in handles.into_iter().enumerate() {
                assert_eq!(handle.join().unwrap(), format!("n={n}"));
            }
        });
    }

    #[test]
    fn factory_applies_configured_defaults() -> miette::Result<()> {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("pages")).unwrap();
        fs::write(dir.path().join("pages/home.html"), "{{ greeting }}").unwrap();

        let mut config: Config = toml::from_str(
            r#"
            [plates.defaults."pages::home"]
            greeting = "hello"
            "#,
        )
        .unwrap();
        config.plates.directories.push(DirectoryConfig {
            name: "pages".to_string(),
            directory: dir.path().join("pages"),
            fallback: false,
        });
        let mut container = Container::new();
        container.set(ids::CONFIG, Service::new(config));

        let renderer = RendererFactory::default().create(Arc::new(container))?;
        assert_eq!(renderer.render("pages::home", &Value::Null)?, "hello");
        Ok(())
    }
}
