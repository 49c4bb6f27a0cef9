//! The template engine: template folders, registered functions and extensions
//! on top of a [`Tera`] instance.
//!
//! Templates are addressed the way folders are registered: `pages::home`
//! names `home.<ext>` inside the folder registered as `pages`, and a name
//! without a `::` prefix refers to the default directory.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use miette::Diagnostic;
use tera::{Context, Tera};
use thiserror::Error;
use tracing::debug;

use crate::extension::Extension;

pub mod factory;

/// Separates a folder alias from the template path, as in `pages::home`.
pub const NAMESPACE_SEPARATOR: &str = "::";

#[derive(Diagnostic, Debug, Error)]
pub enum EngineError {
    #[error("template directory `{}` does not exist", .0.display())]
    MissingDirectory(PathBuf),
    #[error("reading template directory")]
    Walk(#[source] walkdir::Error),
    #[error("loading templates")]
    LoadTemplates(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// A named template directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Folder {
    pub path: PathBuf,
    /// Templates missing here are looked up in the default directory.
    pub fallback: bool,
}

pub struct Engine {
    tera: Tera,
    file_extension: Option<String>,
    directory: Option<PathBuf>,
    folders: BTreeMap<String, Folder>,
    functions: BTreeSet<String>,
    extensions: BTreeMap<String, Arc<dyn Extension>>,
}

impl Engine {
    pub fn new() -> Self {
        let mut tera = Tera::default();
        // Output is escaped explicitly through the escaper functions.
        tera.autoescape_on(vec![]);
        Self {
            tera,
            file_extension: Some("html".to_string()),
            directory: None,
            folders: BTreeMap::new(),
            functions: BTreeSet::new(),
            extensions: BTreeMap::new(),
        }
    }

    /// Sets the suffix template files are expected to have.
    ///
    /// An empty extension means template names include the full file name.
    pub fn set_file_extension(&mut self, extension: &str) {
        let extension = extension.trim_start_matches('.');
        self.file_extension = (!extension.is_empty()).then(|| extension.to_string());
    }

    pub fn file_extension(&self) -> Option<&str> {
        self.file_extension.as_deref()
    }

    pub fn set_directory(&mut self, directory: impl Into<PathBuf>) {
        self.directory = Some(directory.into());
    }

    pub fn directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    /// Registers `path` under `name`, replacing any folder already using that
    /// name. Returns the folder that was replaced.
    pub fn add_folder(
        &mut self,
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        fallback: bool,
    ) -> Option<Folder> {
        let name = name.into();
        let folder = Folder {
            path: path.into(),
            fallback,
        };
        debug!("adding template folder `{name}` at {}", folder.path.display());
        let previous = self.folders.insert(name, folder);
        if let Some(previous) = &previous {
            debug!("replaced template folder at {}", previous.path.display());
        }
        previous
    }

    pub fn folder(&self, name: &str) -> Option<&Folder> {
        self.folders.get(name)
    }

    pub fn folders(&self) -> impl Iterator<Item = (&str, &Folder)> {
        self.folders.iter().map(|(name, folder)| (name.as_str(), folder))
    }

    pub fn register_function<F: tera::Function + 'static>(&mut self, name: &str, function: F) {
        debug!("registering template function `{name}`");
        self.tera.register_function(name, function);
        self.functions.insert(name.to_string());
    }

    pub fn does_function_exist(&self, name: &str) -> bool {
        self.functions.contains(name)
    }

    pub fn function_names(&self) -> impl Iterator<Item = &str> {
        self.functions.iter().map(String::as_str)
    }

    /// Lets `extension` register its functions and records it by name.
    pub fn load_extension(&mut self, extension: Arc<dyn Extension>) {
        debug!("loading extension `{}`", extension.name());
        extension.register(self);
        self.extensions
            .insert(extension.name().to_string(), extension);
    }

    pub fn extension(&self, name: &str) -> Option<&Arc<dyn Extension>> {
        self.extensions.get(name)
    }

    pub fn extension_names(&self) -> impl Iterator<Item = &str> {
        self.extensions.keys().map(String::as_str)
    }

    /// Reads every template from the default directory and the folders.
    pub fn load_templates(&mut self) -> Result<(), EngineError> {
        let defaults = match &self.directory {
            Some(directory) => self.discover(directory, None)?,
            None => vec![],
        };

        let mut files = Vec::new();
        for (name, folder) in &self.folders {
            let templates = self.discover(&folder.path, Some(name.as_str()))?;
            if folder.fallback {
                for (path, template) in &defaults {
                    let qualified = format!("{name}{NAMESPACE_SEPARATOR}{template}");
                    if !templates.iter().any(|(_, existing)| *existing == qualified) {
                        files.push((path.clone(), qualified));
                    }
                }
            }
            files.extend(templates);
        }
        files.extend(defaults);

        self.tera
            .add_template_files(files.iter().map(|(path, name)| (path, Some(name))))
            .map_err(|e| EngineError::LoadTemplates(Box::new(e)))?;

        debug!(
            "found templates:\n{}",
            self.template_names().collect::<Vec<_>>().join("\n")
        );

        Ok(())
    }

    /// Finds the template files under `directory` and names them.
    fn discover(
        &self,
        directory: &Path,
        namespace: Option<&str>,
    ) -> Result<Vec<(PathBuf, String)>, EngineError> {
        if !directory.is_dir() {
            return Err(EngineError::MissingDirectory(directory.to_path_buf()));
        }
        debug!("loading templates from {}", directory.display());

        let mut templates = vec![];
        for entry in walkdir::WalkDir::new(directory).sort_by_file_name() {
            let entry = entry.map_err(EngineError::Walk)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(directory) else {
                continue;
            };
            let Some(name) = self.template_name(relative) else {
                continue;
            };
            let name = match namespace {
                Some(namespace) => format!("{namespace}{NAMESPACE_SEPARATOR}{name}"),
                None => name,
            };
            templates.push((entry.path().to_path_buf(), name));
        }
        Ok(templates)
    }

    /// The template name for a file at `relative`, or `None` if the file does
    /// not carry the template suffix.
    fn template_name(&self, relative: &Path) -> Option<String> {
        let components = relative
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<Vec<_>>>()?;
        let name = components.join("/");
        match &self.file_extension {
            Some(extension) => name
                .strip_suffix(extension.as_str())
                .and_then(|name| name.strip_suffix('.'))
                .filter(|name| !name.is_empty())
                .map(ToString::to_string),
            None => Some(name),
        }
    }

    pub fn template_names(&self) -> impl Iterator<Item = &str> {
        let mut names = self.tera.get_template_names().collect::<Vec<_>>();
        names.sort_unstable();
        names.into_iter()
    }

    pub fn exists(&self, name: &str) -> bool {
        self.tera.get_template_names().any(|template| template == name)
    }

    pub fn render(&self, name: &str, context: &Context) -> tera::Result<String> {
        self.tera.render(name, context)
    }

    /// Renders `source` as a one-off template that can use every registered
    /// function and extend or include loaded templates.
    pub fn render_str(&self, source: &str, context: &Context) -> tera::Result<String> {
        let mut tera = self.tera.clone();
        tera.render_str(source, context)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("file_extension", &self.file_extension)
            .field("directory", &self.directory)
            .field("folders", &self.folders)
            .field("functions", &self.functions)
            .field("extensions", &self.extensions.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod test {
    use std::{fs, path::Path};

    use tera::Context;

    use super::{Engine, EngineError, Folder};

    fn write(path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn later_folder_replaces_earlier() {
        let mut engine = Engine::new();
        assert_eq!(engine.add_folder("a", "/x", false), None);
        let replaced = engine.add_folder("a", "/y", false);

        assert_eq!(replaced.map(|f| f.path), Some("/x".into()));
        assert_eq!(
            engine.folder("a"),
            Some(&Folder {
                path: "/y".into(),
                fallback: false
            })
        );
    }

    #[test]
    fn file_extension_is_normalized() {
        let mut engine = Engine::new();
        assert_eq!(engine.file_extension(), Some("html"));
        engine.set_file_extension(".tpl");
        assert_eq!(engine.file_extension(), Some("tpl"));
        engine.set_file_extension("");
        assert_eq!(engine.file_extension(), None);
    }

    #[test]
    fn loads_namespaced_templates() -> miette::Result<()> {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("pages/home.tpl"), "home {{ name }}");
        write(&dir.path().join("pages/blog/post.tpl"), "post");
        write(&dir.path().join("pages/notes.txt"), "ignored");
        write(&dir.path().join("default/layout.tpl"), "layout");

        let mut engine = Engine::new();
        engine.set_file_extension("tpl");
        engine.set_directory(dir.path().join("default"));
        engine.add_folder("pages", dir.path().join("pages"), false);
        engine.load_templates()?;

        assert_eq!(
            engine.template_names().collect::<Vec<_>>(),
            ["layout", "pages::blog/post", "pages::home"]
        );

        let mut context = Context::new();
        context.insert("name", "world");
        assert_eq!(
            engine.render("pages::home", &context).unwrap(),
            "home world"
        );
        Ok(())
    }

    #[test]
    fn fallback_folder_serves_default_templates() -> miette::Result<()> {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("default/error.html"), "default error");
        write(&dir.path().join("default/footer.html"), "default footer");
        write(&dir.path().join("theme/error.html"), "theme error");

        let mut engine = Engine::new();
        engine.set_directory(dir.path().join("default"));
        engine.add_folder("theme", dir.path().join("theme"), true);
        engine.load_templates()?;

        let context = Context::new();
        assert_eq!(engine.render("theme::error", &context).unwrap(), "theme error");
        assert_eq!(
            engine.render("theme::footer", &context).unwrap(),
            "default footer"
        );
        Ok(())
    }

    #[test]
    fn templates_can_extend_across_folders() -> miette::Result<()> {
        let dir = tempfile::tempdir().unwrap();
        write(
            &dir.path().join("layout/base.html"),
            "<main>{% block body %}{% endblock %}</main>",
        );
        write(
            &dir.path().join("pages/home.html"),
            r#"{% extends "layout::base" %}{% block body %}hi{% endblock %}"#,
        );

        let mut engine = Engine::new();
        engine.add_folder("layout", dir.path().join("layout"), false);
        engine.add_folder("pages", dir.path().join("pages"), false);
        engine.load_templates()?;

        assert_eq!(
            engine.render("pages::home", &Context::new()).unwrap(),
            "<main>hi</main>"
        );
        Ok(())
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = Engine::new();
        engine.add_folder("gone", dir.path().join("gone"), false);

        assert!(matches!(
            engine.load_templates(),
            Err(EngineError::MissingDirectory(path)) if path.ends_with("gone")
        ));
    }

    #[test]
    fn render_str_sees_registered_functions() {
        let mut engine = Engine::new();
        engine.register_function(
            "answer",
            |_: &std::collections::HashMap<String, tera::Value>| -> tera::Result<tera::Value> {
                Ok(42.into())
            },
        );

        assert!(engine.does_function_exist("answer"));
        assert_eq!(
            engine.render_str("{{ answer() }}", &Context::new()).unwrap(),
            "42"
        );
    }
}
