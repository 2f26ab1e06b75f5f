//! Manifest Sanitizer
//!
//! Bounds raw extracted metadata before it goes on the wire. One flat pass
//! over the top-level keys:
//!
//! - binary payloads are replaced by `BINARY_REDACTED`
//! - strings whose JSON-escaped length exceeds the ceiling are cut at a char
//!   boundary and suffixed with `TRUNCATION_MARKER`
//! - lists and maps are serialized and measured as a whole; failures become
//!   `SERIALIZATION_ERROR`, oversize values become `OBJECT_TOO_LARGE`
//! - other scalars pass through
//!
//! Nested values are not sanitized individually. A deep structure whose
//! serialized form fits under the ceiling is kept as-is.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::SanitizerConfig;
use crate::metadata::{MetaValue, RawMetadata};

pub const BINARY_REDACTED: &str = "[Binary data redacted]";
pub const TRUNCATION_MARKER: &str = "...[truncated]";
pub const OBJECT_TOO_LARGE: &str = "[Object too large]";
pub const SERIALIZATION_ERROR: &str = "[Serialization error]";

/// Bounded key/value mapping, safe to serialize and transmit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SanitizedMetadata(BTreeMap<String, Value>);

impl SanitizedMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

#[derive(Debug, Clone)]
pub struct ManifestSanitizer {
    max_value_len: usize,
}

impl ManifestSanitizer {
    pub fn new(max_value_len: usize) -> Self {
        Self {
            max_value_len: max_value_len.max(1),
        }
    }

    pub fn from_config(config: &SanitizerConfig) -> Self {
        Self::new(config.max_value_len)
    }

    pub fn max_value_len(&self) -> usize {
        self.max_value_len
    }

    pub fn sanitize(&self, raw: &RawMetadata) -> SanitizedMetadata {
        let mut redacted = 0usize;
        let mut out = BTreeMap::new();

        for (key, value) in raw {
            let bounded = self.bound_str(key).unwrap_or_else(|| key.clone());
            if out.contains_key(&bounded) {
                // first key in sorted order wins the truncated name
                tracing::debug!(
                    key_len = key.len(),
                    "Dropping metadata key that collides after truncation"
                );
                continue;
            }
            let clean = self.sanitize_value(value);
            if matches!(&clean, Value::String(s) if is_marker(s, value)) {
                redacted += 1;
            }
            out.insert(bounded, clean);
        }

        if redacted > 0 {
            tracing::debug!(keys = raw.len(), redacted, "Sanitized metadata");
        }

        SanitizedMetadata(out)
    }

    fn sanitize_value(&self, value: &MetaValue) -> Value {
        match value {
            MetaValue::Binary(_) => Value::String(BINARY_REDACTED.to_string()),
            MetaValue::Text(s) => Value::String(self.bound_str(s).unwrap_or_else(|| s.clone())),
            MetaValue::List(_) | MetaValue::Map(_) => self.measure_composite(value),
            MetaValue::Float(f) if !f.is_finite() => Value::String(SERIALIZATION_ERROR.to_string()),
            MetaValue::Null | MetaValue::Bool(_) | MetaValue::Integer(_) | MetaValue::Float(_) => {
                serde_json::to_value(value)
                    .unwrap_or_else(|_| Value::String(SERIALIZATION_ERROR.to_string()))
            }
        }
    }

    fn measure_composite(&self, value: &MetaValue) -> Value {
        match serde_json::to_value(value) {
            Err(e) => {
                tracing::debug!(error = %e, "Metadata value not serializable");
                Value::String(SERIALIZATION_ERROR.to_string())
            }
            Ok(json) if json.to_string().len() > self.max_value_len => {
                Value::String(OBJECT_TOO_LARGE.to_string())
            }
            Ok(json) => json,
        }
    }

    /// Truncated copy when the escaped form exceeds the ceiling
    fn bound_str(&self, s: &str) -> Option<String> {
        let mut used = 0usize;
        for (idx, ch) in s.char_indices() {
            let width = escaped_width(ch);
            if used + width > self.max_value_len {
                let mut cut = String::with_capacity(idx + TRUNCATION_MARKER.len());
                cut.push_str(&s[..idx]);
                cut.push_str(TRUNCATION_MARKER);
                return Some(cut);
            }
            used += width;
        }
        None
    }
}

impl Default for ManifestSanitizer {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_METADATA_VALUE_LIMIT)
    }
}

/// Bytes a char occupies inside a JSON string literal
fn escaped_width(ch: char) -> usize {
    match ch {
        '"' | '\\' | '\n' | '\r' | '\t' | '\u{08}' | '\u{0C}' => 2,
        c if (c as u32) < 0x20 => 6,
        c => c.len_utf8(),
    }
}

fn is_marker(s: &str, original: &MetaValue) -> bool {
    match original {
        MetaValue::Text(_) => s.ends_with(TRUNCATION_MARKER),
        _ => s == BINARY_REDACTED || s == OBJECT_TOO_LARGE || s == SERIALIZATION_ERROR,
    }
}
