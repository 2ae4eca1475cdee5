//! Dotted-path lookups into raw objects.

use serde_json::Value;

/// Walk `obj` along a dotted path ("metadata.labels.app"). Returns the value
/// at the path, or None when any segment is missing or non-object.
pub fn lookup<'a>(obj: &'a Value, path: &str) -> Option<&'a Value> {
    let mut cur = obj;
    for seg in path.split('.') {
        cur = cur.get(seg)?;
    }
    Some(cur)
}

/// Truthiness the way the wire format means it: null, false, 0, "" and empty
/// containers are falsy.
pub fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lookup_walks_nested_maps() {
        let obj = json!({"metadata": {"labels": {"app": "web"}}});
        assert_eq!(lookup(&obj, "metadata.labels.app"), Some(&json!("web")));
        assert_eq!(lookup(&obj, "metadata.labels.tier"), None);
        assert_eq!(lookup(&obj, "spec.replicas"), None);
    }

    #[test]
    fn truthy_matches_wire_semantics() {
        assert!(!truthy(&json!(null)));
        assert!(!truthy(&json!("")));
        assert!(!truthy(&json!(0)));
        assert!(!truthy(&json!([])));
        assert!(truthy(&json!("x")));
        assert!(truthy(&json!(1)));
        assert!(truthy(&json!({"a": 1})));
    }
}
