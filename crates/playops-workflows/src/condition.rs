//! Guard condition evaluation
//!
//! Guards compare one resolved context value against a (possibly resolved)
//! comparison value. Evaluation is pure and total: unknown operators fall
//! back to loose equality rather than erroring.

use crate::definition::GuardParams;
use crate::expression::{resolve, resolve_path};
use serde_json::{Map, Value};

/// Evaluate a guard against the context. `params.key` is resolved as
/// `$.<key>`; `params.value` goes through the expression resolver so it may
/// itself be a `$.` reference.
pub fn evaluate(params: &GuardParams, context: &Map<String, Value>) -> bool {
    let actual = resolve_path(&params.key, context);
    let expected = resolve(&params.value, context);

    match params.operator.as_deref() {
        Some("==") | None => loose_eq(&actual, &expected),
        Some("!=") => !loose_eq(&actual, &expected),
        Some(">") => compare(&actual, &expected).is_some_and(|o| o == std::cmp::Ordering::Greater),
        Some("<") => compare(&actual, &expected).is_some_and(|o| o == std::cmp::Ordering::Less),
        Some(">=") => compare(&actual, &expected)
            .is_some_and(|o| o != std::cmp::Ordering::Less),
        Some("<=") => compare(&actual, &expected)
            .is_some_and(|o| o != std::cmp::Ordering::Greater),
        Some("contains") => match (&actual, &expected) {
            // string-substring only; non-string actuals never match
            (Value::String(haystack), needle) => haystack.contains(&as_text(needle)),
            _ => false,
        },
        Some("exists") => !actual.is_null(),
        // unknown operators must not throw
        Some(_) => loose_eq(&actual, &expected),
    }
}

/// Pick the first transition whose guard passes; a guardless transition is
/// an unconditional fallback.
pub(crate) fn first_matching_transition<'a>(
    transitions: &'a [crate::definition::GuardedTransition],
    context: &Map<String, Value>,
) -> Option<&'a str> {
    transitions
        .iter()
        .find(|t| t.guard.as_ref().map(|g| evaluate(g, context)).unwrap_or(true))
        .map(|t| t.target.as_str())
}

/// Coercive equality: exact JSON equality first, then numeric coercion of
/// numbers, numeric strings, and booleans.
fn loose_eq(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

fn compare(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    let x = as_number(a)?;
    let y = as_number(b)?;
    x.partial_cmp(&y)
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    fn guard(key: &str, operator: Option<&str>, value: Value) -> GuardParams {
        GuardParams {
            key: key.to_string(),
            operator: operator.map(String::from),
            value,
        }
    }

    #[test]
    fn loose_equality_coerces_numbers() {
        let context = ctx(json!({"count": 5, "label": "5"}));
        assert!(evaluate(&guard("count", Some("=="), json!(5)), &context));
        assert!(evaluate(&guard("count", Some("=="), json!("5")), &context));
        assert!(evaluate(&guard("label", Some("=="), json!(5)), &context));
        assert!(!evaluate(&guard("count", Some("=="), json!(6)), &context));
    }

    #[test]
    fn numeric_comparisons() {
        let context = ctx(json!({"hp": 40}));
        assert!(evaluate(&guard("hp", Some(">"), json!(30)), &context));
        assert!(evaluate(&guard("hp", Some("<="), json!(40)), &context));
        assert!(!evaluate(&guard("hp", Some("<"), json!(40)), &context));
        // non-numeric side: comparison is false, never an error
        assert!(!evaluate(&guard("hp", Some(">"), json!({"x": 1})), &context));
    }

    #[test]
    fn contains_is_string_substring_only() {
        let context = ctx(json!({"tags": "pvp,ranked", "list": [1, 2]}));
        assert!(evaluate(&guard("tags", Some("contains"), json!("ranked")), &context));
        assert!(!evaluate(&guard("list", Some("contains"), json!(1)), &context));
    }

    #[test]
    fn exists_checks_presence() {
        let context = ctx(json!({"a": 0, "b": null}));
        assert!(evaluate(&guard("a", Some("exists"), Value::Null), &context));
        assert!(!evaluate(&guard("b", Some("exists"), Value::Null), &context));
        assert!(!evaluate(&guard("missing", Some("exists"), Value::Null), &context));
    }

    #[test]
    fn unknown_operator_falls_back_to_equality() {
        let context = ctx(json!({"status": "active"}));
        assert!(evaluate(&guard("status", Some("~~"), json!("active")), &context));
        assert!(!evaluate(&guard("status", Some("~~"), json!("banned")), &context));
    }

    #[test]
    fn value_side_may_be_a_reference() {
        let context = ctx(json!({"a": 7, "b": 7}));
        assert!(evaluate(&guard("a", Some("=="), json!("$.b")), &context));
    }

    #[test]
    fn evaluation_is_pure() {
        let context = ctx(json!({"x": 1}));
        let g = guard("x", Some("=="), json!(1));
        assert_eq!(evaluate(&g, &context), evaluate(&g, &context));
    }
}
