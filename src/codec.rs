//! JSON encoding of command and response payloads
//!
//! Payloads are flat or nested mappings of booleans, integers and strings,
//! e.g. `{"id": 42}` or `{"state": {"on": true}}`. Anything else on the wire
//! (floats, arrays, null, a non-object document) is rejected as a whole.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{ProbeError, Result};

pub type Fields = BTreeMap<String, Field>;

/// A single payload value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Field {
    Bool(bool),
    Int(i64),
    Str(String),
    Map(Fields),
}

impl Field {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Field::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Field::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Fields> {
        match self {
            Field::Map(m) => Some(m),
            _ => None,
        }
    }
}

impl From<bool> for Field {
    fn from(value: bool) -> Self {
        Field::Bool(value)
    }
}

impl From<i64> for Field {
    fn from(value: i64) -> Self {
        Field::Int(value)
    }
}

impl From<u32> for Field {
    fn from(value: u32) -> Self {
        Field::Int(i64::from(value))
    }
}

impl From<&str> for Field {
    fn from(value: &str) -> Self {
        Field::Str(value.to_string())
    }
}

impl From<String> for Field {
    fn from(value: String) -> Self {
        Field::Str(value)
    }
}

impl From<Fields> for Field {
    fn from(value: Fields) -> Self {
        Field::Map(value)
    }
}

/// Builds a mapping from literal entries
pub fn fields<const N: usize>(entries: [(&str, Field); N]) -> Fields {
    entries
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

pub fn encode(fields: &Fields) -> Result<Vec<u8>> {
    serde_json::to_vec(fields).map_err(|e| ProbeError::MalformedPayload(e.to_string()))
}

pub fn decode(bytes: &[u8]) -> Result<Fields> {
    serde_json::from_slice(bytes).map_err(|e| ProbeError::MalformedPayload(e.to_string()))
}
