//! Loosely-typed values exchanged with the engine.
//!
//! The engine's exchange format is JSON, so values are plain
//! [`serde_json::Value`]s. [`ValueKind`] names the tag of a value so that
//! callback handlers can declare which kinds of argument they accept.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A value in the engine's exchange format.
pub type EngineValue = serde_json::Value;

/// The tag of an [`EngineValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    String,
    Number,
    Boolean,
    Null,
    List,
    Map,
}

impl ValueKind {
    /// Every tag, in declaration order.
    pub const ALL: [ValueKind; 6] = [
        ValueKind::String,
        ValueKind::Number,
        ValueKind::Boolean,
        ValueKind::Null,
        ValueKind::List,
        ValueKind::Map,
    ];

    /// Returns the tag of `value`.
    pub fn of(value: &EngineValue) -> Self {
        match value {
            EngineValue::String(_) => ValueKind::String,
            EngineValue::Number(_) => ValueKind::Number,
            EngineValue::Bool(_) => ValueKind::Boolean,
            EngineValue::Null => ValueKind::Null,
            EngineValue::Array(_) => ValueKind::List,
            EngineValue::Object(_) => ValueKind::Map,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::String => "string",
            ValueKind::Number => "number",
            ValueKind::Boolean => "boolean",
            ValueKind::Null => "null",
            ValueKind::List => "list",
            ValueKind::Map => "map",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
