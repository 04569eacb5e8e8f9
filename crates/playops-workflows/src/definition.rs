//! Workflow definition model
//!
//! Definitions are authored as JSON in the admin dashboard's visual editor
//! and are immutable once loaded for a run. A definition is a named map of
//! states; each state invokes an action, runs a loop, or declares guarded
//! transitions.

use playops_core::{Error, Result};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;

/// A complete workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    pub id: String,
    pub initial_state: String,
    /// State name -> state definition. JSON objects with duplicate keys keep
    /// only the last entry after parsing; duplicate state names in authored
    /// JSON are silently collapsed, so the editor must prevent them.
    pub states: HashMap<String, StateDefinition>,
    /// Expected trigger payload fields, checked by `validate_payload`
    /// before a run starts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_schema: Option<Vec<PayloadField>>,
}

/// One expected property of the trigger payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub required: bool,
}

/// A single state. A state carries at most one of `invoke`/`loop`; `always`
/// and `on` transition blocks may coexist with an `invoke` (evaluated when
/// the invoke has no `onDone`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateDefinition {
    /// `"final"` marks a terminal state
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub state_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoke: Option<InvokeSpec>,
    #[serde(rename = "loop", default, skip_serializing_if = "Option::is_none")]
    pub loop_spec: Option<LoopSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub always: Option<Vec<GuardedTransition>>,
    /// Event name -> ordered guarded transitions, in declaration order.
    /// When no trigger event matches, the first declared entry is taken.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on: Option<EventTransitions>,
    /// Entry side effects, run before transition evaluation. Diagnostic
    /// logging only; entry actions never alter context.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entry: Vec<EntryAction>,
}

/// What a state fundamentally is, for dispatch and for the node audit row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKind {
    Final,
    Invoke,
    Loop,
    Always,
    On,
}

impl StateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateKind::Final => "final",
            StateKind::Invoke => "invoke",
            StateKind::Loop => "loop",
            StateKind::Always => "always",
            StateKind::On => "on",
        }
    }
}

impl StateDefinition {
    pub fn kind(&self) -> Result<StateKind> {
        if self.state_type.as_deref() == Some("final") {
            return Ok(StateKind::Final);
        }
        if self.invoke.is_some() {
            return Ok(StateKind::Invoke);
        }
        if self.loop_spec.is_some() {
            return Ok(StateKind::Loop);
        }
        if self.always.is_some() {
            return Ok(StateKind::Always);
        }
        if self.on.is_some() {
            return Ok(StateKind::On);
        }
        Err(Error::definition(
            "state has no type, invoke, loop, always, or on block",
        ))
    }
}

/// An action invocation: resolved input mapping plus success/failure routes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeSpec {
    pub action: String,
    #[serde(default)]
    pub input: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_done: Option<TransitionRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_error: Option<TransitionRef>,
}

/// A bounded loop over a resolved collection (`forEach`) or a guard (`while`),
/// with a nested body sub-graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopSpec {
    /// Expression resolving to the array to iterate (forEach mode)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub for_each: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_variable: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_variable: Option<String>,
    /// 0 or absent = strictly sequential
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_batch_size: Option<usize>,
    /// Guard re-evaluated before each iteration (while mode)
    #[serde(rename = "while", default, skip_serializing_if = "Option::is_none")]
    pub while_guard: Option<GuardParams>,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    pub body_initial: String,
    pub body_states: HashMap<String, StateDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_done: Option<TransitionRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_error: Option<TransitionRef>,
}

fn default_max_iterations() -> u32 {
    100
}

fn default_timeout_ms() -> u64 {
    50_000
}

/// A transition target, authored either as a bare string or `{"target": ...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TransitionRef {
    Name(String),
    Object { target: String },
}

impl TransitionRef {
    pub fn target(&self) -> &str {
        match self {
            TransitionRef::Name(name) => name,
            TransitionRef::Object { target } => target,
        }
    }
}

/// An ordered transition with an optional guard. A transition without a
/// guard is an unconditional fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardedTransition {
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<GuardParams>,
}

/// The `on` block of a state: event names mapped to ordered guarded
/// transitions. JSON objects through a plain map lose declaration order,
/// which the event fallback rule depends on, so this keeps the entries as
/// an ordered list behind a map (de)serialization.
#[derive(Debug, Clone, Default)]
pub struct EventTransitions(Vec<(String, Vec<GuardedTransition>)>);

impl EventTransitions {
    pub fn get(&self, event: &str) -> Option<&[GuardedTransition]> {
        self.0
            .iter()
            .find(|(name, _)| name == event)
            .map(|(_, transitions)| transitions.as_slice())
    }

    /// The first declared entry's transitions.
    pub fn first(&self) -> Option<&[GuardedTransition]> {
        self.0.first().map(|(_, transitions)| transitions.as_slice())
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &[GuardedTransition])> {
        self.0
            .iter()
            .map(|(name, transitions)| (name.as_str(), transitions.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for EventTransitions {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (event, transitions) in &self.0 {
            map.serialize_entry(event, transitions)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for EventTransitions {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        struct EventTransitionsVisitor;

        impl<'de> Visitor<'de> for EventTransitionsVisitor {
            type Value = EventTransitions;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of event names to transition lists")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> std::result::Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some(entry) = access.next_entry()? {
                    entries.push(entry);
                }
                Ok(EventTransitions(entries))
            }
        }

        deserializer.deserialize_map(EventTransitionsVisitor)
    }
}

/// A comparison guard evaluated against the execution context.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardParams {
    /// Resolved as `$.<key>` against context
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    #[serde(default)]
    pub value: Value,
}

/// A diagnostic entry side effect.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryAction {
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl WorkflowDefinition {
    /// Validate internal references: the initial state exists, every
    /// transition targets a known state, and loop bodies stay within the
    /// supported subset (invoke/always/final only).
    pub fn validate(&self) -> Result<()> {
        if !self.states.contains_key(&self.initial_state) {
            return Err(Error::definition(format!(
                "initial state '{}' is not defined",
                self.initial_state
            )));
        }

        for (name, state) in &self.states {
            state.kind().map_err(|e| {
                Error::definition(format!("state '{}': {}", name, e))
            })?;
            self.check_targets(name, state, &self.states)?;

            if let Some(loop_spec) = &state.loop_spec {
                if loop_spec.for_each.is_none() && loop_spec.while_guard.is_none() {
                    return Err(Error::definition(format!(
                        "loop state '{}' has neither forEach nor while",
                        name
                    )));
                }
                if !loop_spec.body_states.contains_key(&loop_spec.body_initial) {
                    return Err(Error::definition(format!(
                        "loop state '{}': bodyInitial '{}' is not defined",
                        name, loop_spec.body_initial
                    )));
                }
                for (body_name, body_state) in &loop_spec.body_states {
                    if body_state.loop_spec.is_some() || body_state.on.is_some() {
                        return Err(Error::definition(format!(
                            "loop state '{}': body state '{}' uses a nested loop/on, \
                             which loop bodies do not support",
                            name, body_name
                        )));
                    }
                    self.check_targets(body_name, body_state, &loop_spec.body_states)?;
                }
            }
        }

        Ok(())
    }

    /// Check a trigger payload against the declared payload schema: required
    /// fields must be present and non-null, typed fields must match when
    /// present. Definitions without a schema accept any payload.
    pub fn validate_payload(&self, payload: &Value) -> Result<()> {
        let Some(schema) = &self.payload_schema else {
            return Ok(());
        };

        let empty = Map::new();
        let fields = match payload {
            Value::Object(map) => map,
            _ => &empty,
        };

        for field in schema {
            match fields.get(&field.name) {
                None | Some(Value::Null) => {
                    if field.required {
                        return Err(Error::definition(format!(
                            "trigger payload is missing required field '{}'",
                            field.name
                        )));
                    }
                }
                Some(value) => {
                    if !payload_type_matches(&field.field_type, value) {
                        return Err(Error::definition(format!(
                            "trigger payload field '{}' is not a {}",
                            field.name, field.field_type
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn check_targets(
        &self,
        name: &str,
        state: &StateDefinition,
        scope: &HashMap<String, StateDefinition>,
    ) -> Result<()> {
        let mut targets: Vec<&str> = Vec::new();

        if let Some(invoke) = &state.invoke {
            if let Some(t) = &invoke.on_done {
                targets.push(t.target());
            }
            if let Some(t) = &invoke.on_error {
                targets.push(t.target());
            }
        }
        if let Some(loop_spec) = &state.loop_spec {
            if let Some(t) = &loop_spec.on_done {
                targets.push(t.target());
            }
            if let Some(t) = &loop_spec.on_error {
                targets.push(t.target());
            }
        }
        if let Some(always) = &state.always {
            targets.extend(always.iter().map(|t| t.target.as_str()));
        }
        if let Some(on) = &state.on {
            for (_, transitions) in on.entries() {
                targets.extend(transitions.iter().map(|t| t.target.as_str()));
            }
        }

        for target in targets {
            if !scope.contains_key(target) {
                return Err(Error::definition(format!(
                    "state '{}' transitions to unknown state '{}'",
                    name, target
                )));
            }
        }
        Ok(())
    }
}

fn payload_type_matches(field_type: &str, value: &Value) -> bool {
    match field_type {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: Value) -> WorkflowDefinition {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn parses_invoke_and_final_states() {
        let def = parse(json!({
            "id": "spawn",
            "initialState": "start",
            "states": {
                "start": {
                    "invoke": {
                        "action": "core.setVariable",
                        "input": {"name": "x", "value": 5},
                        "onDone": "done"
                    }
                },
                "done": {"type": "final"}
            }
        }));

        assert_eq!(def.states["start"].kind().unwrap(), StateKind::Invoke);
        assert_eq!(def.states["done"].kind().unwrap(), StateKind::Final);
        let invoke = def.states["start"].invoke.as_ref().unwrap();
        assert_eq!(invoke.on_done.as_ref().unwrap().target(), "done");
        def.validate().unwrap();
    }

    #[test]
    fn transition_ref_accepts_object_form() {
        let t: TransitionRef = serde_json::from_value(json!({"target": "next"})).unwrap();
        assert_eq!(t.target(), "next");
    }

    #[test]
    fn loop_defaults_applied() {
        let def = parse(json!({
            "id": "batch",
            "initialState": "each",
            "states": {
                "each": {
                    "loop": {
                        "forEach": "$.items",
                        "bodyInitial": "step",
                        "bodyStates": {"step": {"type": "final"}},
                        "onDone": "done"
                    }
                },
                "done": {"type": "final"}
            }
        }));

        let spec = def.states["each"].loop_spec.as_ref().unwrap();
        assert_eq!(spec.max_iterations, 100);
        assert_eq!(spec.timeout_ms, 50_000);
        def.validate().unwrap();
    }

    #[test]
    fn validate_rejects_unknown_target() {
        let def = parse(json!({
            "id": "bad",
            "initialState": "start",
            "states": {
                "start": {"always": [{"target": "missing"}]}
            }
        }));
        assert!(def.validate().is_err());
    }

    #[test]
    fn validate_rejects_nested_loop_in_body() {
        let def = parse(json!({
            "id": "bad",
            "initialState": "outer",
            "states": {
                "outer": {
                    "loop": {
                        "while": {"key": "flag", "operator": "==", "value": true},
                        "bodyInitial": "inner",
                        "bodyStates": {
                            "inner": {
                                "loop": {
                                    "forEach": "$.items",
                                    "bodyInitial": "x",
                                    "bodyStates": {"x": {"type": "final"}}
                                }
                            }
                        },
                        "onDone": "done"
                    }
                },
                "done": {"type": "final"}
            }
        }));
        assert!(def.validate().is_err());
    }

    #[test]
    fn on_preserves_declaration_order() {
        let def = parse(json!({
            "id": "eventful",
            "initialState": "wait",
            "states": {
                "wait": {
                    "on": {
                        "z.first": [{"target": "fromZ"}],
                        "a.second": [{"target": "fromA"}]
                    }
                },
                "fromZ": {"type": "final"},
                "fromA": {"type": "final"}
            }
        }));

        let on = def.states["wait"].on.as_ref().unwrap();
        let declared: Vec<&str> = on.entries().map(|(name, _)| name).collect();
        assert_eq!(declared, vec!["z.first", "a.second"]);
        assert_eq!(on.first().unwrap()[0].target, "fromZ");
        assert_eq!(on.get("a.second").unwrap()[0].target, "fromA");
        def.validate().unwrap();
    }

    #[test]
    fn payload_schema_enforces_required_and_typed_fields() {
        let def = parse(json!({
            "id": "guarded",
            "initialState": "done",
            "states": {"done": {"type": "final"}},
            "payloadSchema": [
                {"name": "playerId", "type": "number", "required": true},
                {"name": "note", "type": "string"}
            ]
        }));

        def.validate_payload(&json!({"playerId": 7})).unwrap();
        def.validate_payload(&json!({"playerId": 7, "note": "vip"}))
            .unwrap();

        let missing = def.validate_payload(&json!({})).unwrap_err();
        assert!(missing.to_string().contains("playerId"));

        let wrong_type = def
            .validate_payload(&json!({"playerId": 7, "note": 5}))
            .unwrap_err();
        assert!(wrong_type.to_string().contains("note"));
    }

    #[test]
    fn validate_rejects_missing_initial() {
        let def = parse(json!({
            "id": "bad",
            "initialState": "nope",
            "states": {"done": {"type": "final"}}
        }));
        assert!(def.validate().is_err());
    }
}
