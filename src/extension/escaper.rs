//! Context-specific escaping functions for templates.
//!
//! Templates are rendered with autoescaping off, so output is escaped
//! explicitly: `{{ escapeHtml(value=title) }}`, `{{ escapeJs(value=data) }}`
//! and so on.

use std::{collections::HashMap, fmt::Write};

use miette::Diagnostic;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use tera::Value;
use thiserror::Error;

use crate::engine::Engine;

use super::Extension;

/// Everything except the RFC 3986 unreserved characters.
const URL_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

#[derive(Diagnostic, Debug, Error)]
pub enum EscaperError {
    #[error("unsupported escaper encoding `{0}`")]
    #[diagnostic(help("templates are always UTF-8; set `encoding = \"utf-8\"` or remove it"))]
    UnsupportedEncoding(String),
}

/// Registers `escapeHtml`, `escapeHtmlAttr`, `escapeJs`, `escapeCss` and
/// `escapeUrl`.
#[derive(Clone, Debug)]
pub struct EscaperExtension {
    encoding: String,
}

impl EscaperExtension {
    pub fn new(encoding: &str) -> Result<Self, EscaperError> {
        let normalized = encoding.trim().to_ascii_lowercase();
        if normalized != "utf-8" && normalized != "utf8" {
            return Err(EscaperError::UnsupportedEncoding(encoding.to_string()));
        }
        Ok(Self {
            encoding: normalized,
        })
    }

    pub fn encoding(&self) -> &str {
        &self.encoding
    }
}

impl Default for EscaperExtension {
    fn default() -> Self {
        Self {
            encoding: "utf-8".to_string(),
        }
    }
}

impl Extension for EscaperExtension {
    fn name(&self) -> &str {
        "escaper"
    }

    fn register(&self, engine: &mut Engine) {
        for (name, escape) in [
            ("escapeHtml", tera::escape_html as fn(&str) -> String),
            ("escapeHtmlAttr", escape_html_attr),
            ("escapeJs", escape_js),
            ("escapeCss", escape_css),
            ("escapeUrl", escape_url),
        ] {
            engine.register_function(name, EscapeFunction { name, escape });
        }
    }
}

struct EscapeFunction {
    name: &'static str,
    escape: fn(&str) -> String,
}

impl tera::Function for EscapeFunction {
    fn call(&self, args: &HashMap<String, Value>) -> tera::Result<Value> {
        let value = args
            .get("value")
            .ok_or_else(|| tera::Error::msg(format!("{}: missing `value` argument", self.name)))?;
        let escaped = match value {
            Value::Null => String::new(),
            Value::String(s) => (self.escape)(s),
            other => (self.escape)(&other.to_string()),
        };
        Ok(Value::String(escaped))
    }

    fn is_safe(&self) -> bool {
        true
    }
}

pub fn escape_html_attr(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if c.is_ascii_alphanumeric() || matches!(c, ',' | '.' | '-' | '_') {
            out.push(c);
            continue;
        }
        match c {
            '"' => out.push_str("&quot;"),
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            // Control characters with no printable form.
            c if c.is_control() && !matches!(c, '\t' | '\n' | '\r') => out.push_str("&#xFFFD;"),
            c if (c as u32) < 0x100 => {
                let _ = write!(out, "&#x{:02X};", c as u32);
            }
            c => {
                let _ = write!(out, "&#x{:04X};", c as u32);
            }
        }
    }
    out
}

pub fn escape_js(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut units = [0u16; 2];
    for c in input.chars() {
        if c.is_ascii_alphanumeric() || matches!(c, ',' | '.' | '_') {
            out.push(c);
        } else if c.is_ascii() {
            let _ = write!(out, "\\x{:02X}", c as u32);
        } else {
            for unit in c.encode_utf16(&mut units) {
                let _ = write!(out, "\\u{:04X}", unit);
            }
        }
    }
    out
}

pub fn escape_css(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
        } else {
            let _ = write!(out, "\\{:X} ", c as u32);
        }
    }
    out
}

pub fn escape_url(input: &str) -> String {
    utf8_percent_encode(input, URL_ENCODE).to_string()
}
