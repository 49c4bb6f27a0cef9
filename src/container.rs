//! A small service container and the lookup trait the engine builder consumes.
//!
//! The builder only ever talks to [`ServiceLookup`]. [`Container`] is the
//! implementation used by the command line tool and the tests, but any
//! framework container can sit behind the trait.

use std::{
    any::{type_name, Any},
    collections::HashMap,
    fmt,
    sync::Arc,
};

use miette::Diagnostic;
use thiserror::Error;
use tracing::debug;

use crate::extension::Extension;

/// Well-known service identifiers.
pub mod ids {
    /// The application [`Config`](crate::config::Config).
    pub const CONFIG: &str = "config";
    /// An `Arc<dyn UrlHelper>` used by the default URL extension.
    pub const URL_HELPER: &str = "UrlHelper";
    /// A [`ServerUrlHelper`](crate::extension::url::ServerUrlHelper).
    pub const SERVER_URL_HELPER: &str = "ServerUrlHelper";
    /// An explicitly registered URL extension, overriding the default.
    pub const URL_EXTENSION: &str = "UrlExtension";
    /// An explicitly registered escaper extension, overriding the default.
    pub const ESCAPER_EXTENSION: &str = "EscaperExtension";
}

#[derive(Diagnostic, Debug, Error)]
pub enum LookupError {
    #[error("no service registered under `{0}`")]
    NotFound(String),
    #[error("service `{id}` is a `{actual}`, expected `{expected}`")]
    UnexpectedType {
        id: String,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("constructing service `{id}`")]
    Factory {
        id: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Resolves string identifiers to services.
pub trait ServiceLookup: Send + Sync {
    fn has(&self, id: &str) -> bool;
    fn get(&self, id: &str) -> Result<Service, LookupError>;
}

/// A type-erased service together with the name of its concrete type.
#[derive(Clone)]
pub struct Service {
    value: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl Service {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            value: Arc::new(value),
            type_name: type_name::<T>(),
        }
    }

    /// Wraps an extension so that [`Service::as_extension`] can recover it.
    ///
    /// The concrete type name is kept for error messages.
    pub fn extension<E: Extension + 'static>(extension: E) -> Self {
        let extension: Arc<dyn Extension> = Arc::new(extension);
        Self {
            value: Arc::new(extension),
            type_name: type_name::<E>(),
        }
    }

    /// Like [`Service::extension`], for an extension that is already shared.
    pub fn shared_extension(extension: Arc<dyn Extension>) -> Self {
        Self {
            value: Arc::new(extension),
            type_name: type_name::<Arc<dyn Extension>>(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    pub fn as_extension(&self) -> Option<Arc<dyn Extension>> {
        self.downcast_ref::<Arc<dyn Extension>>().cloned()
    }

    /// Clones the service out as a `T`, or reports which type it actually is.
    pub fn cloned<T: Any + Clone>(&self, id: &str) -> Result<T, LookupError> {
        self.downcast_ref::<T>()
            .cloned()
            .ok_or_else(|| LookupError::UnexpectedType {
                id: id.to_string(),
                expected: type_name::<T>(),
                actual: self.type_name,
            })
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

type ServiceFactory =
    Arc<dyn Fn(&Container) -> Result<Service, Box<dyn std::error::Error + Send + Sync>> + Send + Sync>;

#[derive(Clone)]
enum Entry {
    Shared(Service),
    /// Invoked on every `get`, so each lookup may produce a different service.
    Factory(ServiceFactory),
}

#[derive(Clone, Default)]
pub struct Container {
    entries: HashMap<String, Entry>,
}

impl Container {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a shared service, replacing anything already under `id`.
    pub fn set(&mut self, id: impl Into<String>, service: Service) -> &mut Self {
        let id = id.into();
        debug!("registering service `{id}` ({})", service.type_name());
        self.entries.insert(id, Entry::Shared(service));
        self
    }

    /// Registers a factory that is run each time `id` is looked up.
    pub fn set_factory<F>(&mut self, id: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&Container) -> Result<Service, Box<dyn std::error::Error + Send + Sync>>
            + Send
            + Sync
            + 'static,
    {
        let id = id.into();
        debug!("registering service factory `{id}`");
        self.entries.insert(id, Entry::Factory(Arc::new(factory)));
        self
    }

    pub fn remove(&mut self, id: &str) -> bool {
        self.entries.remove(id).is_some()
    }
}

impl ServiceLookup for Container {
    fn has(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    fn get(&self, id: &str) -> Result<Service, LookupError> {
        match self.entries.get(id) {
            Some(Entry::Shared(service)) => Ok(service.clone()),
            Some(Entry::Factory(factory)) => factory(self).map_err(|source| LookupError::Factory {
                id: id.to_string(),
                source,
            }),
            None => Err(LookupError::NotFound(id.to_string())),
        }
    }
}
