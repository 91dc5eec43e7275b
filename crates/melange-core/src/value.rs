//! Evaluated module values.
//!
//! A `ModuleValue` is what a loader produces. Most of it maps directly onto
//! JSON, but a value may also carry members with no structural encoding
//! (native handles, non-finite floats). Serializing such a value fails, which
//! the responder reports as a serialization error.

use serde::ser::{Error as _, SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Opaque reference to a native resource (file descriptor, socket, process).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeHandle {
    pub kind: String,
    pub id: u64,
}

impl NativeHandle {
    pub fn new(kind: impl Into<String>, id: u64) -> Self {
        Self {
            kind: kind.into(),
            id,
        }
    }
}

impl fmt::Display for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} #{}>", self.kind, self.id)
    }
}

/// Value produced by evaluating a module.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ModuleValue {
    #[default]
    Null,
    Bool(bool),
    Integer(i64),
    /// Integer above `i64::MAX`.
    UInteger(u64),
    Float(f64),
    String(String),
    Array(Vec<ModuleValue>),
    Object(BTreeMap<String, ModuleValue>),
    Handle(NativeHandle),
}

impl ModuleValue {
    /// Build an object from key/value pairs.
    pub fn object<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, ModuleValue)>,
    {
        ModuleValue::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ModuleValue::Null => "null",
            ModuleValue::Bool(_) => "bool",
            ModuleValue::Integer(_) | ModuleValue::UInteger(_) => "integer",
            ModuleValue::Float(_) => "float",
            ModuleValue::String(_) => "string",
            ModuleValue::Array(_) => "array",
            ModuleValue::Object(_) => "object",
            ModuleValue::Handle(_) => "handle",
        }
    }

    /// Encode the value as JSON bytes.
    pub fn to_json_vec(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

impl Serialize for ModuleValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ModuleValue::Null => serializer.serialize_unit(),
            ModuleValue::Bool(b) => serializer.serialize_bool(*b),
            ModuleValue::Integer(i) => serializer.serialize_i64(*i),
            ModuleValue::UInteger(u) => serializer.serialize_u64(*u),
            ModuleValue::Float(f) if f.is_finite() => serializer.serialize_f64(*f),
            ModuleValue::Float(f) => Err(S::Error::custom(format!(
                "non-finite number {} has no encoding",
                f
            ))),
            ModuleValue::String(s) => serializer.serialize_str(s),
            ModuleValue::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            ModuleValue::Object(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in entries {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
            ModuleValue::Handle(handle) => Err(S::Error::custom(format!(
                "native handle {} has no encoding",
                handle
            ))),
        }
    }
}

impl From<serde_json::Value> for ModuleValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => ModuleValue::Null,
            serde_json::Value::Bool(b) => ModuleValue::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    ModuleValue::Integer(i)
                } else if let Some(u) = n.as_u64() {
                    ModuleValue::UInteger(u)
                } else {
                    ModuleValue::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => ModuleValue::String(s),
            serde_json::Value::Array(items) => {
                ModuleValue::Array(items.into_iter().map(ModuleValue::from).collect())
            }
            serde_json::Value::Object(map) => ModuleValue::Object(
                map.into_iter()
                    .map(|(k, v)| (k, ModuleValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<i64> for ModuleValue {
    fn from(value: i64) -> Self {
        ModuleValue::Integer(value)
    }
}

impl From<u64> for ModuleValue {
    fn from(value: u64) -> Self {
        match i64::try_from(value) {
            Ok(i) => ModuleValue::Integer(i),
            Err(_) => ModuleValue::UInteger(value),
        }
    }
}

impl From<f64> for ModuleValue {
    fn from(value: f64) -> Self {
        ModuleValue::Float(value)
    }
}

impl From<bool> for ModuleValue {
    fn from(value: bool) -> Self {
        ModuleValue::Bool(value)
    }
}

impl From<&str> for ModuleValue {
    fn from(value: &str) -> Self {
        ModuleValue::String(value.to_string())
    }
}

impl From<String> for ModuleValue {
    fn from(value: String) -> Self {
        ModuleValue::String(value)
    }
}
