//! Deep merge over JSON values, used for descriptor `tags` and `validate`.
//!
//! Objects merge recursively, arrays from the override are appended, and any
//! other override value replaces the base value.

use serde_json::{Map, Value};

/// Merge `overrides` into `base` in place.
pub fn deep_merge(base: &mut Map<String, Value>, overrides: &Map<String, Value>) {
    for (key, incoming) in overrides {
        match base.get_mut(key) {
            Some(existing) => merge_value(existing, incoming),
            None => {
                base.insert(key.clone(), incoming.clone());
            }
        }
    }
}

fn merge_value(existing: &mut Value, incoming: &Value) {
    match (existing, incoming) {
        (Value::Object(left), Value::Object(right)) => deep_merge(left, right),
        (Value::Array(left), Value::Array(right)) => left.extend(right.iter().cloned()),
        (slot, value) => *slot = value.clone(),
    }
}
