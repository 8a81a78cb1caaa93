//! Canonical JSON for checkpoint hashing
//!
//! Sorted object keys, no whitespace, floats printed in shortest round-trip
//! form after widening to f64, so equal values always yield equal bytes.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Serialize a value to canonical JSON (sorted keys, no whitespace)
pub fn to_canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let json_value = serde_json::to_value(value)?;
    serde_json::to_string(&canonicalize_value(json_value))
}

fn canonicalize_value(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> = map
                .into_iter()
                .map(|(k, v)| (k, canonicalize_value(v)))
                .collect();
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize_value).collect()),
        other => other,
    }
}

/// BLAKE3 of the canonical JSON, hex encoded
pub fn hash_canonical_hex<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let json = to_canonical_json(value)?;
    Ok(hex::encode(blake3::hash(json.as_bytes()).as_bytes()))
}
