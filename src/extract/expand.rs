//! Array expansion and value de-duplication

use crate::extract::path::{flatten, set_path};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// Expands a record into one record per array position
///
/// `array_subtree` holds the properties written under the array marker.
/// Its flattened list values are spliced in by index; a non-list value
/// only lands in the record at position 0. Every expanded record carries
/// `position`. With no list values at all the scalar record is returned
/// alone, without `position`.
pub fn expand(scalar: &Map<String, Value>, array_subtree: &Map<String, Value>) -> Vec<Map<String, Value>> {
    let flattened = flatten(array_subtree);
    let max_size = flattened
        .iter()
        .filter_map(|(_, value)| value.as_array().map(Vec::len))
        .max()
        .unwrap_or(0);

    if max_size == 0 {
        return vec![scalar.clone()];
    }

    (0..max_size)
        .map(|i| {
            let mut record = scalar.clone();
            record.insert("position".to_string(), Value::from(i));
            for (path, value) in &flattened {
                match value {
                    Value::Array(items) => {
                        if let Some(item) = items.get(i) {
                            set_path(&mut record, path, item.clone());
                        }
                    }
                    other if i == 0 => set_path(&mut record, path, other.clone()),
                    _ => {}
                }
            }
            record
        })
        .collect()
}

/// Keeps the first occurrence of each value, in order
///
/// With `trim_spaces`, blank values and nulls are dropped as well.
pub fn distinct(values: Vec<Option<String>>, trim_spaces: bool) -> Vec<Option<String>> {
    let mut seen: HashSet<Option<String>> = HashSet::new();
    values
        .into_iter()
        .filter(|value| {
            if trim_spaces && value.as_deref().map_or(true, |s| s.trim().is_empty()) {
                return false;
            }
            seen.insert(value.clone())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_expand_uneven_lengths() {
        let scalar = obj(json!({"title": "T"}));
        let arrays = obj(json!({"a": ["a0", "a1", "a2"], "b": ["b0", "b1", "b2", "b3", "b4"]}));

        let records = expand(&scalar, &arrays);
        assert_eq!(records.len(), 5);
        for (i, record) in records.iter().enumerate() {
            assert_eq!(record["position"], i);
            assert_eq!(record["title"], "T");
            assert_eq!(record.contains_key("a"), i < 3);
            assert_eq!(record["b"], format!("b{}", i));
        }
    }

    #[test]
    fn test_expand_nested_paths() {
        let scalar = obj(json!({"title": "T"}));
        let arrays = obj(json!({"items": {"name": ["x", "y"], "qty": ["1", "2"]}}));

        let records = expand(&scalar, &arrays);
        assert_eq!(records.len(), 2);
        assert_eq!(
            Value::Object(records[1].clone()),
            json!({"title": "T", "position": 1, "items": {"name": "y", "qty": "2"}})
        );
    }

    #[test]
    fn test_expand_non_list_only_at_zero() {
        let scalar = Map::new();
        let arrays = obj(json!({"single": "only", "list": ["a", "b"]}));

        let records = expand(&scalar, &arrays);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["single"], "only");
        assert!(!records[1].contains_key("single"));
    }

    #[test]
    fn test_expand_without_arrays() {
        let scalar = obj(json!({"title": "T"}));
        let records = expand(&scalar, &obj(json!({"x": "scalar"})));
        assert_eq!(records, vec![scalar.clone()]);

        let records = expand(&scalar, &obj(json!({"x": []})));
        assert_eq!(records, vec![scalar]);
    }

    #[test]
    fn test_expand_keeps_null_placeholders() {
        let arrays = obj(json!({"v": ["a", null, "c"]}));
        let records = expand(&Map::new(), &arrays);
        assert_eq!(records.len(), 3);
        assert_eq!(records[1]["v"], Value::Null);
    }

    #[test]
    fn test_distinct_keeps_first_occurrence() {
        let values = vec![
            Some("b".to_string()),
            Some("a".to_string()),
            Some("b".to_string()),
            None,
            None,
        ];
        assert_eq!(
            distinct(values, false),
            vec![Some("b".to_string()), Some("a".to_string()), None]
        );
    }

    #[test]
    fn test_distinct_trim_drops_blank() {
        let values = vec![
            Some(" ".to_string()),
            Some("a".to_string()),
            None,
            Some("a".to_string()),
        ];
        assert_eq!(distinct(values, true), vec![Some("a".to_string())]);
    }

    #[test]
    fn test_distinct_is_idempotent() {
        let values = vec![
            Some("x".to_string()),
            Some("y".to_string()),
            Some("x".to_string()),
            Some("".to_string()),
        ];
        let once = distinct(values, true);
        assert_eq!(distinct(once.clone(), true), once);
    }
}
