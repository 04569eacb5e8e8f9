//! Reference expression resolution
//!
//! Strings beginning with `$.` are path references into the execution
//! context; everything else is a literal. Resolution is pure and never
//! fails: a missing path segment resolves to `Value::Null`.

use serde_json::{Map, Value};

/// Resolve an expression against the context. `"$.a.b"` walks the context
/// segment by segment; any other value is returned unchanged.
pub fn resolve(expr: &Value, context: &Map<String, Value>) -> Value {
    if let Value::String(s) = expr {
        if let Some(path) = s.strip_prefix("$.") {
            return resolve_path(path, context);
        }
    }
    expr.clone()
}

/// Walk a dotted path through the context. Arrays accept numeric segments.
pub fn resolve_path(path: &str, context: &Map<String, Value>) -> Value {
    let mut segments = path.split('.');

    let first = match segments.next() {
        Some(s) if !s.is_empty() => s,
        _ => return Value::Null,
    };
    let mut current = match context.get(first) {
        Some(v) => v,
        None => return Value::Null,
    };

    for segment in segments {
        current = match current {
            Value::Object(map) => match map.get(segment) {
                Some(v) => v,
                None => return Value::Null,
            },
            Value::Array(items) => match segment.parse::<usize>().ok().and_then(|i| items.get(i)) {
                Some(v) => v,
                None => return Value::Null,
            },
            _ => return Value::Null,
        };
    }

    current.clone()
}

/// Apply `resolve` to every value of an input mapping, producing a new map
/// with the same keys.
pub fn resolve_inputs(
    mapping: &Map<String, Value>,
    context: &Map<String, Value>,
) -> Map<String, Value> {
    mapping
        .iter()
        .map(|(key, expr)| (key.clone(), resolve(expr, context)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn resolves_nested_paths() {
        let context = ctx(json!({"a": {"b": {"c": 3}}}));
        assert_eq!(resolve(&json!("$.a.b.c"), &context), json!(3));
        assert_eq!(resolve(&json!("$.a.b"), &context), json!({"c": 3}));
    }

    #[test]
    fn missing_segments_resolve_to_null() {
        let context = ctx(json!({"a": {"b": 1}}));
        assert_eq!(resolve(&json!("$.a.x"), &context), Value::Null);
        assert_eq!(resolve(&json!("$.nope.deep.path"), &context), Value::Null);
        // walking into a scalar is absent, not an error
        assert_eq!(resolve(&json!("$.a.b.c"), &context), Value::Null);
    }

    #[test]
    fn array_indices_resolve() {
        let context = ctx(json!({"items": [{"id": 1}, {"id": 2}]}));
        assert_eq!(resolve(&json!("$.items.1.id"), &context), json!(2));
        assert_eq!(resolve(&json!("$.items.9"), &context), Value::Null);
    }

    #[test]
    fn literals_pass_through() {
        let context = ctx(json!({}));
        assert_eq!(resolve(&json!(42), &context), json!(42));
        assert_eq!(resolve(&json!("plain"), &context), json!("plain"));
        assert_eq!(resolve(&json!({"k": "$.x"}), &context), json!({"k": "$.x"}));
        assert_eq!(resolve(&json!([1, 2]), &context), json!([1, 2]));
    }

    #[test]
    fn resolve_inputs_maps_every_value() {
        let context = ctx(json!({"player": {"id": 42}}));
        let mapping = ctx(json!({"playerId": "$.player.id", "reason": "cheating"}));
        let resolved = resolve_inputs(&mapping, &context);
        assert_eq!(resolved["playerId"], json!(42));
        assert_eq!(resolved["reason"], json!("cheating"));
    }
}
