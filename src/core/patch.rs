//! Deep-merge patches over JSON documents.
//!
//! A patch is a JSON object. A key that is absent from the patch is
//! "undefined" and leaves the target untouched; typed patch structs get this
//! for free by skipping `None` fields when serialized. Explicit `null`
//! overwrites, arrays replace wholesale, nested objects merge recursively.

use serde::Serialize;
use serde_json::{Map, Value};

pub type Patch = Map<String, Value>;

/// Merges `patch` into `target` in place. A non-object target is replaced by an empty object first.
pub fn merge(target: &mut Value, patch: &Patch) {
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    let Some(obj) = target.as_object_mut() else {
        return;
    };
    for (key, incoming) in patch {
        match (obj.get_mut(key), incoming) {
            (Some(existing @ Value::Object(_)), Value::Object(nested)) => merge(existing, nested),
            _ => {
                obj.insert(key.clone(), incoming.clone());
            }
        }
    }
}

/// Returns a merged copy, leaving `target` untouched.
pub fn merged(target: &Value, patch: &Patch) -> Value {
    let mut out = target.clone();
    merge(&mut out, patch);
    out
}

/// Serializes a typed patch into its object form.
pub fn to_patch<T: Serialize>(value: &T) -> serde_json::Result<Patch> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(serde::ser::Error::custom(format!(
            "patch must serialize to an object, got {}",
            other
        ))),
    }
}
