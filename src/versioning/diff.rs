//! Diff algorithm (§4.1.2).

use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Changed {
    pub old: Value,
    pub new: Value,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Diff {
    pub added: BTreeMap<String, Value>,
    pub removed: BTreeMap<String, Value>,
    pub changed: BTreeMap<String, Changed>,
}

fn as_object(v: &Value) -> BTreeMap<String, Value> {
    match v {
        Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        _ => BTreeMap::new(),
    }
}

/// §4.1.2: `added = keys(C)\keys(P)`, `removed = keys(P)\keys(C)`,
/// `changed = {k | k∈P∩C, serialize(P[k])≠serialize(C[k])}`. Equality
/// uses canonical (sorted-key) JSON serialization, which `serde_json`
/// already produces by default since its `Map` is a `BTreeMap` unless
/// the `preserve_order` feature is enabled (it isn't here).
pub fn diff(previous: &Value, current: &Value) -> Diff {
    let p = as_object(previous);
    let c = as_object(current);

    let mut added = BTreeMap::new();
    let mut removed = BTreeMap::new();
    let mut changed = BTreeMap::new();

    for (k, v) in &c {
        if !p.contains_key(k) {
            added.insert(k.clone(), v.clone());
        }
    }
    for (k, v) in &p {
        if !c.contains_key(k) {
            removed.insert(k.clone(), v.clone());
        }
    }
    for (k, pv) in &p {
        if let Some(cv) = c.get(k) {
            if serde_json::to_string(pv).unwrap_or_default()
                != serde_json::to_string(cv).unwrap_or_default()
            {
                changed.insert(
                    k.clone(),
                    Changed {
                        old: pv.clone(),
                        new: cv.clone(),
                    },
                );
            }
        }
    }

    Diff {
        added,
        removed,
        changed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn detects_added_removed_changed() {
        let p = json!({"a": 1, "b": 2, "c": 3});
        let c = json!({"a": 1, "b": 5, "d": 9});
        let d = diff(&p, &c);
        assert_eq!(d.added.get("d"), Some(&json!(9)));
        assert_eq!(d.removed.get("c"), Some(&json!(3)));
        assert_eq!(
            d.changed.get("b"),
            Some(&Changed {
                old: json!(2),
                new: json!(5)
            })
        );
        assert!(!d.changed.contains_key("a"));
    }

    #[test]
    fn structurally_equal_nested_values_are_not_changed() {
        let p = json!({"tags": ["a", "b"]});
        let c = json!({"tags": ["a", "b"]});
        let d = diff(&p, &c);
        assert!(d.changed.is_empty());
    }
}
