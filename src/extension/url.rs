//! The `url` and `serverurl` template functions.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use miette::Diagnostic;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde_json::Map;
use tera::Value;
use thiserror::Error;
use url::{form_urlencoded, Url};

use crate::engine::Engine;

use super::Extension;

/// Characters escaped inside a single path segment.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

const FRAGMENT: &AsciiSet = &CONTROLS.add(b' ').add(b'"').add(b'<').add(b'>').add(b'`');

#[derive(Diagnostic, Debug, Error)]
pub enum UrlError {
    #[error("no route name given")]
    MissingRouteName,
    #[error("no route named `{0}`")]
    UnknownRoute(String),
    #[error("route `{route}` needs a value for `{param}`")]
    MissingParameter { route: String, param: String },
    #[error("route `{0}` has an unterminated placeholder")]
    MalformedPattern(String),
}

/// Generates application URLs from route names.
pub trait UrlHelper: Send + Sync {
    fn generate(
        &self,
        route: Option<&str>,
        params: &Map<String, Value>,
        query: &Map<String, Value>,
        fragment: Option<&str>,
    ) -> Result<String, UrlError>;
}

/// Named routes with `{param}` placeholders, e.g. `/blog/{slug}`.
#[derive(Clone, Debug, Default)]
pub struct RouteTable {
    routes: BTreeMap<String, String>,
}

impl RouteTable {
    pub fn new(routes: BTreeMap<String, String>) -> Self {
        Self { routes }
    }

    pub fn add(&mut self, name: impl Into<String>, pattern: impl Into<String>) -> &mut Self {
        self.routes.insert(name.into(), pattern.into());
        self
    }
}

impl UrlHelper for RouteTable {
    fn generate(
        &self,
        route: Option<&str>,
        params: &Map<String, Value>,
        query: &Map<String, Value>,
        fragment: Option<&str>,
    ) -> Result<String, UrlError> {
        let route = route.ok_or(UrlError::MissingRouteName)?;
        let pattern = self
            .routes
            .get(route)
            .ok_or_else(|| UrlError::UnknownRoute(route.to_string()))?;

        let mut url = String::new();
        let mut rest = pattern.as_str();
        while let Some(start) = rest.find('{') {
            url.push_str(&rest[..start]);
            let end = rest[start..]
                .find('}')
                .map(|end| start + end)
                .ok_or_else(|| UrlError::MalformedPattern(route.to_string()))?;
            let param = &rest[start + 1..end];
            let value = params.get(param).ok_or_else(|| UrlError::MissingParameter {
                route: route.to_string(),
                param: param.to_string(),
            })?;
            url.extend(utf8_percent_encode(&display_value(value), PATH_SEGMENT));
            rest = &rest[end + 1..];
        }
        url.push_str(rest);

        if !query.is_empty() {
            url.push('?');
            url.push_str(
                &form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(query.iter().map(|(k, v)| (k.as_str(), display_value(v))))
                    .finish(),
            );
        }
        if let Some(fragment) = fragment {
            url.push('#');
            url.extend(utf8_percent_encode(fragment, FRAGMENT));
        }

        Ok(url)
    }
}

/// Builds absolute URLs on top of the server's base URL.
#[derive(Clone, Debug)]
pub struct ServerUrlHelper {
    base: Url,
}

impl ServerUrlHelper {
    pub fn new(base: Url) -> Self {
        Self { base }
    }

    pub fn generate(&self, path: Option<&str>) -> String {
        let Some(path) = path else {
            return self.base.to_string();
        };
        let (path, fragment) = match path.split_once('#') {
            Some((path, fragment)) => (path, Some(fragment)),
            None => (path, None),
        };
        let (path, query) = match path.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (path, None),
        };

        let mut url = self.base.clone();
        let joined = format!(
            "{}/{}",
            url.path().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        url.set_path(&joined);
        url.set_query(query);
        url.set_fragment(fragment);
        url.to_string()
    }
}

/// Registers `url` and `serverurl`.
pub struct UrlExtension {
    url_helper: Arc<dyn UrlHelper>,
    server_url_helper: ServerUrlHelper,
}

impl UrlExtension {
    pub fn new(url_helper: Arc<dyn UrlHelper>, server_url_helper: ServerUrlHelper) -> Self {
        Self {
            url_helper,
            server_url_helper,
        }
    }
}

impl Extension for UrlExtension {
    fn name(&self) -> &str {
        "url"
    }

    fn register(&self, engine: &mut Engine) {
        let helper = self.url_helper.clone();
        engine.register_function(
            "url",
            move |args: &HashMap<String, Value>| -> tera::Result<Value> {
                let route = optional_str(args, "route")?;
                let params = optional_object(args, "params")?;
                let query = optional_object(args, "query")?;
                let fragment = optional_str(args, "fragment")?;
                helper
                    .generate(route, &params, &query, fragment)
                    .map(Value::String)
                    .map_err(|e| tera::Error::chain("generating url", e))
            },
        );

        let server = self.server_url_helper.clone();
        engine.register_function(
            "serverurl",
            move |args: &HashMap<String, Value>| -> tera::Result<Value> {
                Ok(Value::String(server.generate(optional_str(args, "path")?)))
            },
        );
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn optional_str<'a>(args: &'a HashMap<String, Value>, key: &str) -> tera::Result<Option<&'a str>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(other) => Err(tera::Error::msg(format!(
            "`{key}` must be a string, found `{other}`"
        ))),
    }
}

fn optional_object(args: &HashMap<String, Value>, key: &str) -> tera::Result<Map<String, Value>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(map)) => Ok(map.clone()),
        Some(other) => Err(tera::Error::msg(format!(
            "`{key}` must be an object, found `{other}`"
        ))),
    }
}
