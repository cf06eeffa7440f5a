// SPDX-License-Identifier: MIT OR Apache-2.0
//! Dynamic value type shared by execution state, template roots, and step
//! args. Agents return an opaque `Value` that the orchestrator stores
//! without inspecting it further than the `_metadata` convention (spec
//! §4.4, §9).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A heterogeneous value: string, number, boolean, null, sequence, or
/// mapping. Mapping keys are always strings and are kept in a `BTreeMap` so
/// that canonical serialization (see [`crate::canonical_json`]) is
/// deterministic without an extra sort pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Absence of a value. Also the result of an unresolved template path.
    Null,
    /// Boolean.
    Bool(bool),
    /// Numeric value. Serialized through `serde_json::Number` so integers
    /// and decimals both round-trip exactly.
    Number(serde_json::Number),
    /// UTF-8 string.
    String(String),
    /// Ordered sequence of values.
    Sequence(Vec<Value>),
    /// String-keyed mapping, sorted for deterministic iteration.
    Mapping(BTreeMap<String, Value>),
}

impl Value {
    /// Returns `true` if this value is [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Borrow as a string, if this is a [`Value::String`].
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Coerce to `bool` the way the orchestrator coerces step conditions
    /// (spec §4.6 step 4): only an actual boolean is truthy/falsy; anything
    /// else (including `null`) is treated as `false`.
    pub fn as_bool_strict(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Look up a mapping entry, if this is a [`Value::Mapping`].
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Mapping(m) => m.get(key),
            _ => None,
        }
    }

    /// Walk a dotted path (`"foo.bar.baz"`) against this value, returning
    /// [`Value::Null`] for any missing segment rather than an error — this
    /// is the Template Resolver's "missing keys produce null" rule (spec
    /// §4.2).
    pub fn walk_path(&self, path: &[&str]) -> Value {
        let mut cur = self;
        for segment in path {
            match cur.get(segment) {
                Some(v) => cur = v,
                None => return Value::Null,
            }
        }
        cur.clone()
    }

    /// Build a mapping from an iterator of key/value pairs.
    pub fn mapping(entries: impl IntoIterator<Item = (String, Value)>) -> Value {
        Value::Mapping(entries.into_iter().collect())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::String(s) => write!(f, "{s}"),
            Value::Sequence(_) | Value::Mapping(_) => {
                // Stringifying a compound value embedded in a larger string
                // template falls back to its canonical JSON form (spec §4.2:
                // "If the template is embedded in a larger string, result is
                // coerced to its string representation").
                let json = crate::canonical_json(self).unwrap_or_default();
                write!(f, "{json}")
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n.into())
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(a) => Value::Sequence(a.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(o) => {
                Value::Mapping(o.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Number(n) => serde_json::Value::Number(n),
            Value::String(s) => serde_json::Value::String(s),
            Value::Sequence(a) => {
                serde_json::Value::Array(a.into_iter().map(serde_json::Value::from).collect())
            }
            Value::Mapping(m) => serde_json::Value::Object(
                m.into_iter()
                    .map(|(k, v)| (k, serde_json::Value::from(v)))
                    .collect(),
            ),
        }
    }
}
