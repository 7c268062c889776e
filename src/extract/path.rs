//! Dot-path record building
//!
//! `a.b.c` writes into nested objects. Property paths starting with the
//! array marker `[]` are routed to a separate subtree that the array
//! expander later splits into one record per position.

use serde_json::{Map, Value};

/// Path prefix marking properties that expand into one record per position
pub const ARRAY_MARKER: &str = "[]";

/// Returns true if a property path is under the array marker
pub fn is_array_path(path: &str) -> bool {
    path.starts_with(ARRAY_MARKER)
}

/// Strips the array marker (and a following `.`) from a property path
pub fn strip_array_marker(path: &str) -> &str {
    match path.strip_prefix(ARRAY_MARKER) {
        Some(rest) => rest.strip_prefix('.').unwrap_or(rest),
        None => path,
    }
}

/// Writes `value` at a dot-separated path, creating intermediate objects
///
/// A non-object value in the way of the path is replaced by an object.
pub fn set_path(record: &mut Map<String, Value>, path: &str, value: Value) {
    let mut segments: Vec<&str> = path.split('.').collect();
    let last = match segments.pop() {
        Some(last) => last,
        None => return,
    };

    let mut current = record;
    for segment in segments {
        let slot = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        current = match slot {
            Value::Object(map) => map,
            _ => return,
        };
    }
    current.insert(last.to_string(), value);
}

/// Flattens nested objects back to `(dot.path, leaf)` pairs
///
/// Arrays and scalars are leaves. Empty objects produce nothing.
pub fn flatten(record: &Map<String, Value>) -> Vec<(String, Value)> {
    let mut out = Vec::new();
    flatten_into("", record, &mut out);
    out
}

fn flatten_into(prefix: &str, record: &Map<String, Value>, out: &mut Vec<(String, Value)>) {
    for (key, value) in record {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        match value {
            Value::Object(map) => flatten_into(&path, map, out),
            other => out.push((path, other.clone())),
        }
    }
}
