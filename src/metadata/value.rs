//! Untyped metadata values as produced by the extractors

use std::collections::BTreeMap;

use serde::ser::{Error as _, Serialize, Serializer};

/// Raw extracted metadata, keyed `Group:Tag`
pub type RawMetadata = BTreeMap<String, MetaValue>;

/// A single extracted value
///
/// Values are unbounded: strings of any length, byte payloads, and nested
/// lists or maps. Serialization fails for non-finite floats (an Exif
/// rational with a zero denominator, for example).
#[derive(Debug, Clone, PartialEq)]
pub enum MetaValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Binary(Vec<u8>),
    List(Vec<MetaValue>),
    Map(BTreeMap<String, MetaValue>),
}

impl MetaValue {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    /// Single value, or a list when there is more than one
    pub(crate) fn from_many(mut items: Vec<MetaValue>) -> Option<Self> {
        match items.len() {
            0 => None,
            1 => items.pop(),
            _ => Some(Self::List(items)),
        }
    }
}

impl Serialize for MetaValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Integer(i) => serializer.serialize_i64(*i),
            Self::Float(f) if f.is_finite() => serializer.serialize_f64(*f),
            Self::Float(f) => Err(S::Error::custom(format!("non-finite number {}", f))),
            Self::Text(s) => serializer.serialize_str(s),
            Self::Binary(bytes) => serializer.collect_seq(bytes.iter()),
            Self::List(items) => serializer.collect_seq(items),
            Self::Map(map) => serializer.collect_map(map),
        }
    }
}

impl From<&str> for MetaValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for MetaValue {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<f64> for MetaValue {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}
