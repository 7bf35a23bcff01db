//! Bounded JSON compaction used for evidence items.
//!
//! The same bounds serve two callers: the invoker's evidence fallback
//! (when a handler attaches nothing) and the compactor's evidence pruning.
//! Limits: recursion depth 3, 5 array items, 20 object properties, 512
//! chars per string; a `truncated: true` marker is added where an object
//! or array was cut.

use serde_json::{Map, Value};

/// Compaction limits.
#[derive(Debug, Clone, Copy)]
pub struct EvidenceBounds {
    pub max_depth: usize,
    pub max_array_items: usize,
    pub max_object_props: usize,
    pub max_string_chars: usize,
}

impl Default for EvidenceBounds {
    fn default() -> Self {
        Self {
            max_depth: 3,
            max_array_items: 5,
            max_object_props: 20,
            max_string_chars: 512,
        }
    }
}

/// Compact a JSON value within the given bounds.
pub fn compact_value(value: &Value, bounds: &EvidenceBounds) -> Value {
    compact_at(value, bounds, 0)
}

fn compact_at(value: &Value, bounds: &EvidenceBounds, depth: usize) -> Value {
    match value {
        Value::String(s) => compact_string(s, bounds.max_string_chars),
        Value::Null | Value::Bool(_) | Value::Number(_) => value.clone(),
        Value::Array(items) => {
            if depth >= bounds.max_depth {
                return Value::String(format!("[… {} items]", items.len()));
            }
            let mut out: Vec<Value> = items
                .iter()
                .take(bounds.max_array_items)
                .map(|item| compact_at(item, bounds, depth.saturating_add(1)))
                .collect();
            if items.len() > bounds.max_array_items {
                out.push(Value::String(format!(
                    "… truncated, {} more",
                    items.len().saturating_sub(bounds.max_array_items)
                )));
            }
            Value::Array(out)
        }
        Value::Object(props) => {
            if depth >= bounds.max_depth {
                return Value::String(format!("{{… {} properties}}", props.len()));
            }
            let mut out = Map::new();
            for (key, prop) in props.iter().take(bounds.max_object_props) {
                out.insert(key.clone(), compact_at(prop, bounds, depth.saturating_add(1)));
            }
            if props.len() > bounds.max_object_props {
                out.insert("truncated".to_owned(), Value::Bool(true));
            }
            Value::Object(out)
        }
    }
}

fn compact_string(s: &str, max_chars: usize) -> Value {
    if s.chars().count() <= max_chars {
        return Value::String(s.to_owned());
    }
    let shortened: String = s.chars().take(max_chars).collect();
    Value::String(format!("{shortened}…[truncated]"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalars_pass_through() {
        let bounds = EvidenceBounds::default();
        assert_eq!(compact_value(&json!(42), &bounds), json!(42));
        assert_eq!(compact_value(&json!(null), &bounds), json!(null));
    }

    #[test]
    fn long_arrays_are_cut_with_marker() {
        let bounds = EvidenceBounds::default();
        let value = json!([1, 2, 3, 4, 5, 6, 7]);
        let out = compact_value(&value, &bounds);
        let items = out.as_array().expect("array");
        assert_eq!(items.len(), 6);
        assert!(items[5].as_str().expect("marker").contains("2 more"));
    }

    #[test]
    fn wide_objects_get_truncated_flag() {
        let bounds = EvidenceBounds {
            max_object_props: 2,
            ..EvidenceBounds::default()
        };
        let out = compact_value(&json!({"a": 1, "b": 2, "c": 3}), &bounds);
        assert_eq!(out.get("truncated"), Some(&json!(true)));
    }

    #[test]
    fn depth_cap_summarizes_nested_values() {
        let bounds = EvidenceBounds {
            max_depth: 1,
            ..EvidenceBounds::default()
        };
        let out = compact_value(&json!({"nested": {"x": 1, "y": 2}}), &bounds);
        assert!(out
            .get("nested")
            .and_then(Value::as_str)
            .expect("summary")
            .contains("2 properties"));
    }

    #[test]
    fn long_strings_truncate() {
        let bounds = EvidenceBounds {
            max_string_chars: 4,
            ..EvidenceBounds::default()
        };
        let out = compact_value(&json!("abcdefgh"), &bounds);
        assert_eq!(out, json!("abcd…[truncated]"));
    }
}
