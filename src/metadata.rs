//! Dynamic, user-supplied metadata.
//!
//! Host applications attach arbitrary key→value trees of scalars, arrays
//! and nested objects to traces, steps and blobs. We never try to reify
//! the host's types: metadata is a recursive tagged union that serializes
//! to the same JSON shape the host would have produced directly.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single metadata value: a scalar, a list, or a nested map.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Array(Vec<MetadataValue>),
    Map(Metadata),
}

/// An ordered key→value metadata tree, keyed by string.
pub type Metadata = BTreeMap<String, MetadataValue>;

impl From<serde_json::Value> for MetadataValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => MetadataValue::Null,
            serde_json::Value::Bool(b) => MetadataValue::Bool(b),
            serde_json::Value::Number(n) => MetadataValue::Number(n),
            serde_json::Value::String(s) => MetadataValue::String(s),
            serde_json::Value::Array(a) => {
                MetadataValue::Array(a.into_iter().map(MetadataValue::from).collect())
            }
            serde_json::Value::Object(o) => MetadataValue::Map(
                o.into_iter()
                    .map(|(k, v)| (k, MetadataValue::from(v)))
                    .collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json_value() {
        let value = serde_json::json!({
            "run": 1,
            "tags": ["a", "b"],
            "nested": { "ok": true, "score": null },
        });
        let metadata = MetadataValue::from(value.clone());
        let encoded = serde_json::to_value(&metadata).unwrap();
        assert_eq!(encoded, value);
    }
}
