// Metadata payload filtering for broadcast economy.
//
// A field's metadata may declare, under `__collaboration`, the sub-keys
// worth broadcasting; everything else is derivable on the receiving side
// and stays local. Receivers rebuild a full object by layering the
// partial payload over the last metadata they remember for the field.

use std::collections::HashMap;

use serde_json::{Map, Value};

/// Metadata key naming the broadcast allow-list for a field.
pub const COLLAB_KEYS: &str = "__collaboration";

/// Reduce one field's metadata to its allow-listed sub-keys.
/// Metadata without an allow-list passes through whole.
pub fn filter_payload(value: &Value) -> Value {
    let Some(allowed) = allow_list(value) else {
        return value.clone();
    };
    let mut picked = Map::new();
    for key in allowed {
        if let Some(sub) = value.get(&key) {
            picked.insert(key, sub.clone());
        }
    }
    Value::Object(picked)
}

/// Apply the per-field filter across a whole document's metadata, for the
/// join rendezvous payload.
pub fn filter_all(meta: &HashMap<String, Value>) -> HashMap<String, Value> {
    meta.iter().map(|(handle, value)| (handle.clone(), filter_payload(value))).collect()
}

/// Rebuild full metadata by layering each field's partial payload over
/// the last remembered metadata for that field.
pub fn restore_all(
    payload: &HashMap<String, Value>,
    last_meta: &HashMap<String, Value>,
) -> HashMap<String, Value> {
    payload
        .iter()
        .map(|(handle, partial)| (handle.clone(), merge_partial(last_meta.get(handle), partial)))
        .collect()
}

/// Layer a partial metadata update over the previous remembered value.
/// When either side is not an object, the partial wins outright.
pub fn merge_partial(last: Option<&Value>, partial: &Value) -> Value {
    match (last.and_then(Value::as_object), partial.as_object()) {
        (Some(base), Some(update)) => {
            let mut merged = base.clone();
            for (key, value) in update {
                merged.insert(key.clone(), value.clone());
            }
            Value::Object(merged)
        }
        _ => partial.clone(),
    }
}

fn allow_list(value: &Value) -> Option<Vec<String>> {
    value.get(COLLAB_KEYS)?.as_array().map(|keys| {
        keys.iter().filter_map(|key| key.as_str().map(str::to_string)).collect()
    })
}
