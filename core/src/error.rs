// Copyright 2025 Farcall contributors.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! Shared error types: the codec fault enum and the wire error shape.

use crate::value::Value;
use indexmap::IndexMap;

/// Errors raised while encoding or decoding wire envelopes.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CoreError {
    /// The text was not valid JSON at all.
    #[error("codec error: invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// A `$`-tagged object used a tag this codec does not know.
    #[error("codec error: unknown tag `{0}`")]
    UnknownTag(String),
    /// A tagged payload did not have the expected shape.
    #[error("codec error: malformed `{0}` payload")]
    Malformed(&'static str),
    /// A `$ref` pointed at a shared node that was never defined.
    #[error("codec error: unresolved shared reference {0}")]
    UnresolvedRef(u32),
    /// A byte payload was not valid base64.
    #[error("codec error: invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    /// A `$url` payload could not be parsed.
    #[error("codec error: invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

/// The wire shape of an error: a `name`, a `message`, an optional stack
/// and arbitrary own properties. Prototype identity of user-defined error
/// subclasses does not survive the boundary; the original `name` does.
#[derive(Debug, Clone, Default)]
pub struct ErrorValue {
    /// Error name, eg `TypeError` or a user-defined subclass name.
    pub name: String,
    /// Human readable message.
    pub message: String,
    /// Optional stack trace captured on the origin side.
    pub stack: Option<String>,
    /// Arbitrary own properties carried along with the error.
    pub properties: IndexMap<String, Value>,
}

impl ErrorValue {
    /// Construct an error with the given name and message.
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        ErrorValue {
            name: name.into(),
            message: message.into(),
            stack: None,
            properties: IndexMap::new(),
        }
    }

    /// A generic `Error`.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new("Error", message)
    }

    /// A `TypeError`, used for traversal faults.
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new("TypeError", message)
    }

    /// A `RangeError`, used for validation faults.
    pub fn range_error(message: impl Into<String>) -> Self {
        Self::new("RangeError", message)
    }

    /// Attach an own property, builder style.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

impl std::fmt::Display for ErrorValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl std::error::Error for ErrorValue {}
