//! Context helpers shared across the platform
//!
//! A workflow context is a flat JSON object (`serde_json::Map`) that
//! accumulates action outputs over the lifetime of one execution.

use serde_json::{Map, Value};

/// Merge an action output into the context under the double-write contract:
/// the whole output is stored under `"<state>_output"`, and if the output is
/// an object its keys are additionally merged flat. Later writes of the same
/// key shadow earlier ones (last writer wins).
pub fn merge_output(context: &mut Map<String, Value>, state: &str, output: &Value) {
    context.insert(format!("{}_output", state), output.clone());
    if let Value::Object(fields) = output {
        for (key, value) in fields {
            context.insert(key.clone(), value.clone());
        }
    }
}

/// Render a JSON value as a short single-line preview for log fields.
pub fn json_preview(value: &Value, max_len: usize) -> String {
    let mut text = value.to_string();
    if text.len() > max_len {
        let mut cut = max_len.saturating_sub(1);
        while cut > 0 && !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
        text.push('…');
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_writes_namespaced_and_flat() {
        let mut ctx = Map::new();
        merge_output(&mut ctx, "create", &json!({"id": 7}));

        assert_eq!(ctx["id"], json!(7));
        assert_eq!(ctx["create_output"]["id"], json!(7));
    }

    #[test]
    fn later_states_shadow_earlier_keys() {
        let mut ctx = Map::new();
        merge_output(&mut ctx, "first", &json!({"name": "a"}));
        merge_output(&mut ctx, "second", &json!({"name": "b"}));

        assert_eq!(ctx["name"], json!("b"));
        assert_eq!(ctx["first_output"]["name"], json!("a"));
    }

    #[test]
    fn non_object_output_only_gets_namespaced() {
        let mut ctx = Map::new();
        merge_output(&mut ctx, "count", &json!(42));

        assert_eq!(ctx["count_output"], json!(42));
        assert_eq!(ctx.len(), 1);
    }

    #[test]
    fn preview_truncates_long_values() {
        let value = json!("x".repeat(200));
        let preview = json_preview(&value, 32);
        assert!(preview.len() <= 35); // utf8 ellipsis
    }
}
