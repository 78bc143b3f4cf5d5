//! One-way display formatters.
//!
//! A formatter turns already decoded text into something easier to read.
//! Its output is for display only and is never written back.

use std::fmt;
use std::sync::Arc;

use crate::php::{self, PhpValue};

/// Names of all built-in formatters.
pub const BUILTIN_FORMATTERS: &[&str] = &["php_unserialize", "json"];

/// Formatters enabled when configuration does not name any.
pub const DEFAULT_FORMATTERS: &[&str] = &["php_unserialize", "json"];

type FormatFn = dyn Fn(&str) -> Option<String> + Send + Sync;

/// Named display formatter.
#[derive(Clone)]
pub struct FormatterRule {
    name: Arc<str>,
    format: Arc<FormatFn>,
}

impl fmt::Debug for FormatterRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormatterRule")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl FormatterRule {
    pub fn new<F>(name: impl Into<String>, format: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name.into()),
            format: Arc::new(format),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Format decoded text, or `None` if this formatter does not apply.
    #[must_use]
    pub fn format(&self, decoded: &str) -> Option<String> {
        (self.format)(decoded)
    }

    /// Render serialized PHP arrays as JSON.
    ///
    /// Scalars and top-level objects are left alone. A value holding INF or
    /// NAN renders as the encoder's error message.
    #[must_use]
    pub fn php_unserialize() -> Self {
        Self::new("php_unserialize", |decoded| {
            let value = php::unserialize(decoded)?;
            if !matches!(value, PhpValue::Array(_)) {
                return None;
            }
            Some(match value.to_json() {
                Ok(json) => json.to_string(),
                Err(err) => err.to_string(),
            })
        })
    }

    /// Pretty print JSON objects and arrays.
    #[must_use]
    pub fn json() -> Self {
        Self::new("json", |decoded| {
            let trimmed = decoded.trim_start();
            if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
                return None;
            }
            let value: serde_json::Value = serde_json::from_str(decoded).ok()?;
            serde_json::to_string_pretty(&value).ok()
        })
    }

    /// Look up a built-in formatter by name.
    #[must_use]
    pub fn builtin(name: &str) -> Option<Self> {
        match name {
            "php_unserialize" => Some(Self::php_unserialize()),
            "json" => Some(Self::json()),
            _ => None,
        }
    }
}
