//! Small helpers shared across modules.

use std::borrow::Cow;

use serde_json::{Map, Value};

/// Expand a leading `~` to `$HOME`.
///
/// - `"~"` → `"/home/user"`
/// - `"~/.ssh/id"` → `"/home/user/.ssh/id"`
/// - Anything else passes through unchanged.
pub fn expand_tilde(path: &str) -> Cow<'_, str> {
    if path == "~" || path.starts_with("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return Cow::Owned(format!("{home}{}", &path[1..]));
        }
    }
    Cow::Borrowed(path)
}

/// Rebuild a JSON value with every object's keys in lexicographic order,
/// recursively. Arrays keep their element order.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::with_capacity(map.len());
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}
