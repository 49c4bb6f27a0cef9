//! Template extensions and the rules for turning configuration into them.
//!
//! An extension adds one or more named functions to an [`Engine`]. Extensions
//! arrive either as ready-made objects or as names; names are looked up in the
//! service container first and only then in the [`ExtensionRegistry`] of
//! constructible extensions.

use std::{collections::HashMap, fmt, sync::Arc};

use miette::Diagnostic;
use serde::{
    de::{IgnoredAny, MapAccess, SeqAccess, Visitor},
    Deserialize, Deserializer,
};
use tera::Value;
use thiserror::Error;
use tracing::debug;

use crate::{
    container::{LookupError, ServiceLookup},
    engine::Engine,
};

pub mod escaper;
pub mod function;
pub mod url;

pub use self::function::{function_service, ServiceFunction, TemplateFunction};

/// Something that can be attached to an [`Engine`].
pub trait Extension: Send + Sync {
    /// The name the engine records this extension under.
    fn name(&self) -> &str;

    /// Adds this extension's functions to `engine`.
    fn register(&self, engine: &mut Engine);
}

/// How an extension was specified in configuration.
#[derive(Clone)]
pub enum ExtensionSpec {
    /// An extension object that is used as-is.
    Instance(Arc<dyn Extension>),
    /// A service id, or failing that, the name of a registered constructor.
    Name(String),
    /// A configuration value of some other shape. Kept so that building the
    /// engine reports it rather than parsing the configuration.
    Unsupported { kind: &'static str },
}

impl ExtensionSpec {
    pub fn instance(extension: impl Extension + 'static) -> Self {
        Self::Instance(Arc::new(extension))
    }
}

impl From<Arc<dyn Extension>> for ExtensionSpec {
    fn from(extension: Arc<dyn Extension>) -> Self {
        Self::Instance(extension)
    }
}

impl From<&str> for ExtensionSpec {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for ExtensionSpec {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl fmt::Debug for ExtensionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Instance(extension) => f.debug_tuple("Instance").field(&extension.name()).finish(),
            Self::Name(name) => f.debug_tuple("Name").field(name).finish(),
            Self::Unsupported { kind } => f.debug_struct("Unsupported").field("kind", kind).finish(),
        }
    }
}

impl<'de> Deserialize<'de> for ExtensionSpec {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(SpecVisitor)
    }
}

struct SpecVisitor;

impl<'de> Visitor<'de> for SpecVisitor {
    type Value = ExtensionSpec;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("an extension name")
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E> {
        Ok(ExtensionSpec::Name(v.to_string()))
    }

    fn visit_string<E>(self, v: String) -> Result<Self::Value, E> {
        Ok(ExtensionSpec::Name(v))
    }

    fn visit_bool<E>(self, _: bool) -> Result<Self::Value, E> {
        Ok(ExtensionSpec::Unsupported { kind: "boolean" })
    }

    fn visit_i64<E>(self, _: i64) -> Result<Self::Value, E> {
        Ok(ExtensionSpec::Unsupported { kind: "integer" })
    }

    fn visit_u64<E>(self, _: u64) -> Result<Self::Value, E> {
        Ok(ExtensionSpec::Unsupported { kind: "integer" })
    }

    fn visit_f64<E>(self, _: f64) -> Result<Self::Value, E> {
        Ok(ExtensionSpec::Unsupported { kind: "float" })
    }

    fn visit_unit<E>(self) -> Result<Self::Value, E> {
        Ok(ExtensionSpec::Unsupported { kind: "null" })
    }

    fn visit_none<E>(self) -> Result<Self::Value, E> {
        Ok(ExtensionSpec::Unsupported { kind: "null" })
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        while seq.next_element::<IgnoredAny>()?.is_some() {}
        Ok(ExtensionSpec::Unsupported { kind: "array" })
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        while map.next_entry::<IgnoredAny, IgnoredAny>()?.is_some() {}
        Ok(ExtensionSpec::Unsupported { kind: "table" })
    }
}

type Constructor = Arc<dyn Fn() -> Arc<dyn Extension> + Send + Sync>;

/// Extensions that can be built by name with no arguments.
#[derive(Clone, Default)]
pub struct ExtensionRegistry {
    constructors: HashMap<String, Constructor>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `E::default` as the constructor for `name`.
    pub fn register<E>(&mut self, name: impl Into<String>) -> &mut Self
    where
        E: Extension + Default + 'static,
    {
        self.register_with(name, || Arc::new(E::default()))
    }

    pub fn register_with<F>(&mut self, name: impl Into<String>, constructor: F) -> &mut Self
    where
        F: Fn() -> Arc<dyn Extension> + Send + Sync + 'static,
    {
        self.constructors.insert(name.into(), Arc::new(constructor));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Builds a fresh instance of the extension registered as `name`.
    pub fn construct(&self, name: &str) -> Option<Arc<dyn Extension>> {
        self.constructors.get(name).map(|constructor| constructor())
    }
}

impl fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = self.constructors.keys().collect::<Vec<_>>();
        names.sort();
        f.debug_struct("ExtensionRegistry")
            .field("constructors", &names)
            .finish()
    }
}

/// A configured extension that could not be turned into an [`Extension`].
#[derive(Diagnostic, Debug, Error)]
pub enum InvalidExtension {
    #[error("invalid extension: expected an extension or an extension name, found {kind}")]
    #[diagnostic(help("list extensions by service id or registered name"))]
    UnsupportedValue { kind: &'static str },
    #[error("invalid extension `{name}`: not a registered service or a known extension")]
    #[diagnostic(help("register `{name}` in the container or in the extension registry"))]
    Unresolved { name: String },
    /// The service exists but was not stored as an `Arc<dyn Extension>`. This
    /// includes extension types registered with [`Service::new`], which cannot
    /// be recovered as extensions.
    ///
    /// [`Service::new`]: crate::container::Service::new
    #[error(
        "invalid extension `{name}`: service holds a `{actual}`, not an `{expected}` registered with `Service::extension`"
    )]
    #[diagnostic(help(
        "register extension services with `Service::extension` or `Service::shared_extension`"
    ))]
    NotAnExtension {
        name: String,
        expected: &'static str,
        actual: &'static str,
    },
}

#[derive(Diagnostic, Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Invalid(#[from] InvalidExtension),
    #[error(transparent)]
    #[diagnostic(transparent)]
    Lookup(#[from] LookupError),
}

/// Turns `spec` into an extension.
///
/// Names are checked against `lookup` before `registry`, and nothing is
/// cached: resolving the same name twice asks the container twice.
pub fn resolve_extension(
    spec: &ExtensionSpec,
    lookup: &dyn ServiceLookup,
    registry: &ExtensionRegistry,
) -> Result<Arc<dyn Extension>, ResolveError> {
    let name = match spec {
        ExtensionSpec::Instance(extension) => return Ok(extension.clone()),
        ExtensionSpec::Unsupported { kind } => {
            return Err(InvalidExtension::UnsupportedValue { kind: *kind }.into())
        }
        ExtensionSpec::Name(name) => name,
    };

    if lookup.has(name) {
        debug!("resolving extension `{name}` from the container");
        let service = lookup.get(name)?;
        return service.as_extension().ok_or_else(|| {
            InvalidExtension::NotAnExtension {
                name: name.clone(),
                expected: std::any::type_name::<dyn Extension>(),
                actual: service.type_name(),
            }
            .into()
        });
    }

    match registry.construct(name) {
        Some(extension) => {
            debug!("constructed extension `{name}` from the registry");
            Ok(extension)
        }
        None => Err(InvalidExtension::Unresolved { name: name.clone() }.into()),
    }
}

/// An extension that registers a single function under its own name.
pub struct FunctionExtension {
    name: String,
    function: TemplateFunction,
}

impl FunctionExtension {
    pub fn new(name: impl Into<String>, function: impl tera::Function + 'static) -> Self {
        Self {
            name: name.into(),
            function: Arc::new(function),
        }
    }
}

impl Extension for FunctionExtension {
    fn name(&self) -> &str {
        &self.name
    }

    fn register(&self, engine: &mut Engine) {
        let function = self.function.clone();
        engine.register_function(
            &self.name,
            move |args: &HashMap<String, Value>| -> tera::Result<Value> { function.call(args) },
        );
    }
}
