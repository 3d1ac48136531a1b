//! JSON-safe normalization of pipeline results

use crate::Result;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;

/// Drop control characters below U+0020 other than tab, newline and carriage return.
pub fn sanitize_text(text: &str) -> String {
    text.chars()
        .filter(|c| *c >= ' ' || matches!(c, '\t' | '\n' | '\r'))
        .collect()
}

/// Recursively sanitize every string leaf and object key. When two keys clean
/// to the same text the first one keeps its value.
pub fn normalize_value(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(sanitize_text(&s)),
        Value::Array(items) => Value::Array(items.into_iter().map(normalize_value).collect()),
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, value) in map {
                let clean = sanitize_text(&key);
                if out.contains_key(&clean) {
                    warn!("Dropping value of {:?}, its cleaned key '{}' is already taken", key, clean);
                    continue;
                }
                out.insert(clean, normalize_value(value));
            }
            Value::Object(out)
        }
        other => other,
    }
}

/// Serialize any result shape and normalize it. Non-finite floats serialize as null.
pub fn normalize_serializable<T: Serialize + ?Sized>(value: &T) -> Result<Value> {
    Ok(normalize_value(serde_json::to_value(value)?))
}
