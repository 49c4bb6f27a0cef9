//! Builds a ready-to-render [`Engine`] from configuration and the container.

use std::sync::Arc;

use miette::Diagnostic;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    config::{Config, PlatesConfig},
    container::{ids, LookupError, ServiceLookup},
    extension::{
        escaper::EscaperError,
        resolve_extension,
        url::{ServerUrlHelper, UrlExtension, UrlHelper},
        ExtensionRegistry, ExtensionSpec, InvalidExtension, ResolveError, ServiceFunction,
    },
};

use super::{Engine, EngineError};

#[derive(Diagnostic, Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Extension(#[from] InvalidExtension),
    #[error(transparent)]
    #[diagnostic(transparent)]
    Lookup(#[from] LookupError),
    #[error(transparent)]
    #[diagnostic(transparent)]
    Escaper(#[from] EscaperError),
    #[error("loading templates")]
    Engine(#[from] EngineError),
}

impl From<ResolveError> for BuildError {
    fn from(error: ResolveError) -> Self {
        match error {
            ResolveError::Invalid(e) => Self::Extension(e),
            ResolveError::Lookup(e) => Self::Lookup(e),
        }
    }
}

/// Reads the application config from the container, falling back to the
/// defaults when none is registered.
pub(crate) fn read_config(lookup: &dyn ServiceLookup) -> Result<Config, LookupError> {
    if !lookup.has(ids::CONFIG) {
        debug!("no `{}` service; using default configuration", ids::CONFIG);
        return Ok(Config::default());
    }
    lookup.get(ids::CONFIG)?.cloned::<Config>(ids::CONFIG)
}

#[derive(Clone, Debug, Default)]
pub struct EngineFactory {
    registry: ExtensionRegistry,
}

impl EngineFactory {
    pub fn new(registry: ExtensionRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ExtensionRegistry {
        &self.registry
    }

    /// Builds an engine from the `config` service in `lookup`.
    pub fn create(&self, lookup: Arc<dyn ServiceLookup>) -> Result<Engine, BuildError> {
        let config = read_config(lookup.as_ref())?;
        self.build(&config.plates, lookup)
    }

    /// Builds an engine for `config`.
    ///
    /// Fails on the first extension that cannot be resolved; no engine is
    /// returned in that case.
    pub fn build(
        &self,
        config: &PlatesConfig,
        lookup: Arc<dyn ServiceLookup>,
    ) -> Result<Engine, BuildError> {
        let mut engine = Engine::new();
        engine.set_file_extension(&config.file_extension);
        if let Some(directory) = &config.directory {
            engine.set_directory(directory);
        }
        for directory in &config.directories {
            engine.add_folder(&directory.name, &directory.directory, directory.fallback);
        }

        self.inject_url_extension(&mut engine, lookup.as_ref())?;
        self.inject_escaper_extension(&mut engine, config, lookup.as_ref())?;

        for (name, service) in &config.functions {
            debug!("binding template function `{name}` to service `{service}`");
            engine.register_function(name, ServiceFunction::new(lookup.clone(), service));
        }

        for spec in &config.extensions {
            let extension = resolve_extension(spec, lookup.as_ref(), &self.registry)?;
            engine.load_extension(extension);
        }

        engine.load_templates()?;
        info!(
            "template engine ready with extensions: {}",
            engine.extension_names().collect::<Vec<_>>().join(", ")
        );
        Ok(engine)
    }

    /// Uses an explicitly registered URL extension, or builds one when both
    /// URL helpers are available.
    fn inject_url_extension(
        &self,
        engine: &mut Engine,
        lookup: &dyn ServiceLookup,
    ) -> Result<(), BuildError> {
        if lookup.has(ids::URL_EXTENSION) {
            return self.load_registered(engine, lookup, ids::URL_EXTENSION);
        }
        if !lookup.has(ids::URL_HELPER) || !lookup.has(ids::SERVER_URL_HELPER) {
            debug!("URL helpers not registered; skipping the URL extension");
            return Ok(());
        }

        let url_helper = lookup
            .get(ids::URL_HELPER)?
            .cloned::<Arc<dyn UrlHelper>>(ids::URL_HELPER)?;
        let server_url_helper = lookup
            .get(ids::SERVER_URL_HELPER)?
            .cloned::<ServerUrlHelper>(ids::SERVER_URL_HELPER)?;
        engine.load_extension(Arc::new(UrlExtension::new(url_helper, server_url_helper)));
        Ok(())
    }

    /// Uses an explicitly registered escaper extension, or the built-in one
    /// when the `escaper` feature is enabled.
    fn inject_escaper_extension(
        &self,
        engine: &mut Engine,
        config: &PlatesConfig,
        lookup: &dyn ServiceLookup,
    ) -> Result<(), BuildError> {
        if lookup.has(ids::ESCAPER_EXTENSION) {
            return self.load_registered(engine, lookup, ids::ESCAPER_EXTENSION);
        }

        #[cfg(feature = "escaper")]
        {
            let escaper = crate::extension::escaper::EscaperExtension::new(&config.encoding)?;
            engine.load_extension(Arc::new(escaper));
        }
        #[cfg(not(feature = "escaper"))]
        {
            let _ = config;
            debug!("escaper feature disabled; skipping the escaper extension");
        }
        Ok(())
    }

    fn load_registered(
        &self,
        engine: &mut Engine,
        lookup: &dyn ServiceLookup,
        id: &str,
    ) -> Result<(), BuildError> {
        debug!("using registered `{id}`");
        let extension =
            resolve_extension(&ExtensionSpec::Name(id.to_string()), lookup, &self.registry)?;
        engine.load_extension(extension);
        Ok(())
    }
}
