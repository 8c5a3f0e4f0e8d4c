//! Shared table-driven normalization machinery.
//!
//! Everything here operates on `serde_json::Value` and is pure: same input,
//! same output, and running a pass twice is the identity (the contract-audit
//! command relies on that).

use serde_json::{Map, Value};

/// Wrapper keys models like to put around the actual payload.
const WRAPPER_KEYS: &[&str] = &["plan_json", "review_result", "result", "data"];

/// A structural rewrite normalization performed on a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rewrite {
    /// START/END sentinel nodes were dropped with their chain edges.
    ChainRewrite {
        /// How many sentinel nodes were removed.
        dropped_nodes: usize,
    },
    /// Missing root-to-child DECOMPOSE edges were synthesized.
    RootEdgesSynthesized {
        /// How many edges were added.
        added_edges: usize,
    },
}

/// Unwrap `{"result": {...}}`-style envelopes until a value carrying one of
/// the contract's discriminant keys (or a non-object) is reached.
pub(crate) fn peel_wrappers(mut value: Value, discriminants: &[&str]) -> Value {
    loop {
        let Some(obj) = value.as_object() else {
            return value;
        };
        if discriminants.iter().any(|d| obj.contains_key(*d)) {
            return value;
        }
        let inner = WRAPPER_KEYS
            .iter()
            .find_map(|k| obj.get(*k).filter(|v| v.is_object()).cloned());
        match inner {
            Some(inner) => value = inner,
            None => return value,
        }
    }
}

/// Rename `aliases` keys to their canonical names, first match wins, without
/// overwriting a canonical key that is already present.
pub(crate) fn apply_aliases(obj: &mut Map<String, Value>, aliases: &[(&str, &str)]) {
    for (alias, canonical) in aliases {
        if obj.contains_key(*canonical) {
            continue;
        }
        if let Some(v) = obj.remove(*alias) {
            obj.insert((*canonical).to_string(), v);
        }
    }
}

/// Uppercase a string field in place (enum shape fix, not a content change).
pub(crate) fn uppercase_field(obj: &mut Map<String, Value>, key: &str) {
    if let Some(Value::String(s)) = obj.get_mut(key) {
        *s = s.to_uppercase();
    }
}

/// Lowercase a string field in place.
pub(crate) fn lowercase_field(obj: &mut Map<String, Value>, key: &str) {
    if let Some(Value::String(s)) = obj.get_mut(key) {
        *s = s.to_lowercase();
    }
}

/// Drop every non-object item from an array field.
pub(crate) fn filter_objects(obj: &mut Map<String, Value>, key: &str) {
    if let Some(Value::Array(items)) = obj.get_mut(key) {
        items.retain(Value::is_object);
    }
}

/// Ensure an array field exists, defaulting to empty.
pub(crate) fn ensure_array(obj: &mut Map<String, Value>, key: &str) {
    if !matches!(obj.get(key), Some(Value::Array(_))) {
        obj.insert(key.to_string(), Value::Array(Vec::new()));
    }
}

/// Insert the expected `schema_version` when the model omitted it. A present
/// but wrong version is left alone for the validator to reject.
pub(crate) fn ensure_schema_version(obj: &mut Map<String, Value>, version: &str) {
    if !obj.contains_key("schema_version") {
        obj.insert(
            "schema_version".to_string(),
            Value::String(version.to_string()),
        );
    }
}

/// Map well-known spelling variants of an enum value onto the canonical one.
pub(crate) fn alias_value(obj: &mut Map<String, Value>, key: &str, aliases: &[(&str, &str)]) {
    if let Some(Value::String(s)) = obj.get_mut(key) {
        for (variant, canonical) in aliases {
            if s == variant {
                *s = (*canonical).to_string();
                return;
            }
        }
    }
}

/// Turn an integer-valued float into an integer (shape fix); anything else is
/// left for the validator.
pub(crate) fn coerce_integral(obj: &mut Map<String, Value>, key: &str) {
    if let Some(v) = obj.get_mut(key) {
        if let Some(f) = v.as_f64() {
            if v.as_i64().is_none() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                *v = Value::from(f as i64);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_peel_single_wrapper() {
        let v = json!({"result": {"result_type": "NOOP"}});
        let peeled = peel_wrappers(v, &["result_type"]);
        assert_eq!(peeled["result_type"], "NOOP");
    }

    #[test]
    fn test_peel_nested_wrappers() {
        let v = json!({"data": {"plan_json": {"nodes": []}}});
        let peeled = peel_wrappers(v, &["nodes", "plan"]);
        assert!(peeled.get("nodes").is_some());
    }

    #[test]
    fn test_peel_stops_at_discriminant() {
        // `result` is present but so is the discriminant; nothing peels.
        let v = json!({"result_type": "NOOP", "result": {"x": 1}});
        let peeled = peel_wrappers(v.clone(), &["result_type"]);
        assert_eq!(peeled, v);
    }

    #[test]
    fn test_alias_does_not_clobber_canonical() {
        let mut obj = json!({"id": "t9", "task_id": "t1"})
            .as_object()
            .cloned()
            .unwrap();
        apply_aliases(&mut obj, &[("id", "task_id")]);
        assert_eq!(obj["task_id"], "t1");
        assert!(!obj.contains_key("id"));
    }

    #[test]
    fn test_filter_objects_drops_strings() {
        let mut obj = json!({"nodes": [{"a": 1}, "junk", 3, {"b": 2}]})
            .as_object()
            .cloned()
            .unwrap();
        filter_objects(&mut obj, "nodes");
        assert_eq!(obj["nodes"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_coerce_integral_float() {
        let mut obj = json!({"total_score": 95.0, "other": 2.5})
            .as_object()
            .cloned()
            .unwrap();
        coerce_integral(&mut obj, "total_score");
        coerce_integral(&mut obj, "other");
        assert_eq!(obj["total_score"], json!(95));
        assert_eq!(obj["other"], json!(2.5));
    }
}
