//! Canonical JSON rendering for fingerprint inputs.
//!
//! Object keys are sorted lexicographically and null-valued object fields
//! are dropped entirely, so an absent optional and an explicit null hash
//! identically.

use serde_json::Value;
use std::collections::BTreeMap;

/// Renders a JSON value into its canonical string form.
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => serde_json::to_string(s).unwrap_or_default(),
        Value::Array(items) => {
            let rendered: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", rendered.join(","))
        }
        Value::Object(map) => {
            let mut sorted = BTreeMap::new();
            for (key, val) in map {
                if val.is_null() {
                    continue;
                }
                sorted.insert(key.as_str(), canonical_json(val));
            }
            let rendered: Vec<String> = sorted
                .into_iter()
                .map(|(key, val)| {
                    format!("{}:{val}", serde_json::to_string(key).unwrap_or_default())
                })
                .collect();
            format!("{{{}}}", rendered.join(","))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keys_are_sorted() {
        let value = json!({"zeta": 1, "alpha": 2});
        assert_eq!(canonical_json(&value), r#"{"alpha":2,"zeta":1}"#);
    }

    #[test]
    fn null_fields_are_dropped() {
        let with_null = json!({"a": 1, "b": null});
        let without = json!({"a": 1});
        assert_eq!(canonical_json(&with_null), canonical_json(&without));
    }

    #[test]
    fn nested_structures_are_canonical() {
        let value = json!({"outer": {"b": [1, 2], "a": "x"}});
        assert_eq!(
            canonical_json(&value),
            r#"{"outer":{"a":"x","b":[1,2]}}"#
        );
    }

    #[test]
    fn strings_are_escaped() {
        let value = json!({"key": "line\nbreak"});
        assert_eq!(canonical_json(&value), r#"{"key":"line\nbreak"}"#);
    }
}
