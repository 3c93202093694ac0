//! Tether core types: field paths, document shapes and the error taxonomy
//! shared by the apply engine and its callers.

#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

mod error;

pub use error::{ApplyError, Result};

pub mod prelude {
    pub use super::{ApplyError, FieldPath, Result, Shape, Side};
}

/// Diagnostic accumulator for the location of a field inside a document.
///
/// Every object key (and every list-map identity) is appended as `[key]`, so a
/// container port ends up as `[spec][containers][0][ports][80]`-like paths. The
/// root renders as the empty string. Only used in error messages and logs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct FieldPath(String);

impl FieldPath {
    pub fn root() -> Self {
        Self(String::new())
    }

    pub fn child(&self, key: &str) -> Self {
        Self(format!("{}[{}]", self.0, key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Coarse classification of a document node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Shape {
    Object,
    Array,
    String,
    Number,
    Bool,
    Null,
}

impl Shape {
    pub fn of(v: &Json) -> Self {
        match v {
            Json::Object(_) => Shape::Object,
            Json::Array(_) => Shape::Array,
            Json::String(_) => Shape::String,
            Json::Number(_) => Shape::Number,
            Json::Bool(_) => Shape::Bool,
            Json::Null => Shape::Null,
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Shape::Object => "object",
            Shape::Array => "array",
            Shape::String => "string",
            Shape::Number => "number",
            Shape::Bool => "bool",
            Shape::Null => "null",
        };
        f.write_str(s)
    }
}

/// Which of the merge inputs a node came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Side {
    LastApplied,
    Desired,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::LastApplied => f.write_str("lastApplied"),
            Side::Desired => f.write_str("desired"),
        }
    }
}
