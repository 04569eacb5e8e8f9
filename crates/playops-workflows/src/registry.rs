//! Action registry
//!
//! A catalog mapping action identifiers to their parameter contracts and,
//! for remote actions, the HTTP method and route template used by the
//! execution strategies. Registries are constructed explicitly and passed
//! into the engine; there is no process-wide instance.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A named, typed parameter of an action.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: String,
    #[serde(default)]
    pub required: bool,
}

impl ParamSpec {
    pub fn required(name: &str, param_type: &str) -> Self {
        Self {
            name: name.to_string(),
            param_type: param_type.to_string(),
            required: true,
        }
    }

    pub fn optional(name: &str, param_type: &str) -> Self {
        Self {
            name: name.to_string(),
            param_type: param_type.to_string(),
            required: false,
        }
    }
}

/// Contract of one action. Remote actions carry an HTTP method and a route
/// template with `[paramName]` placeholders; built-in actions carry neither.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionSpec {
    pub id: String,
    pub category: String,
    #[serde(default)]
    pub inputs: Vec<ParamSpec>,
    #[serde(default)]
    pub outputs: Vec<ParamSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
}

impl ActionSpec {
    pub fn builtin(id: &str, category: &str) -> Self {
        Self {
            id: id.to_string(),
            category: category.to_string(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            method: None,
            route: None,
        }
    }

    pub fn remote(id: &str, category: &str, method: &str, route: &str) -> Self {
        Self {
            id: id.to_string(),
            category: category.to_string(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            method: Some(method.to_string()),
            route: Some(route.to_string()),
        }
    }

    pub fn with_inputs(mut self, inputs: Vec<ParamSpec>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_outputs(mut self, outputs: Vec<ParamSpec>) -> Self {
        self.outputs = outputs;
        self
    }
}

/// The action catalog: a static built-in set plus dynamic registrations
/// (module routes discovered at startup are registered by the host).
#[derive(Debug, Clone, Default)]
pub struct ActionRegistry {
    actions: HashMap<String, ActionSpec>,
}

impl ActionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry pre-populated with the built-in action catalog.
    pub fn with_builtin_catalog() -> Self {
        let mut registry = Self::new();
        for spec in builtin_catalog() {
            registry.register(spec);
        }
        registry
    }

    /// Register (or replace) an action spec.
    pub fn register(&mut self, spec: ActionSpec) {
        self.actions.insert(spec.id.clone(), spec);
    }

    /// Look up an action by identifier.
    pub fn get(&self, action_id: &str) -> Option<&ActionSpec> {
        self.actions.get(action_id)
    }

    pub fn contains(&self, action_id: &str) -> bool {
        self.actions.contains_key(action_id)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// The static catalog. Built-in pseudo-actions are dispatched in-process;
/// the remote entries below are the admin routes every deployment exposes.
fn builtin_catalog() -> Vec<ActionSpec> {
    vec![
        ActionSpec::builtin("core.delay", "core")
            .with_inputs(vec![ParamSpec::required("durationMs", "number")]),
        ActionSpec::builtin("core.emitEvent", "core").with_inputs(vec![
            ParamSpec::required("event", "string"),
            ParamSpec::optional("payload", "object"),
        ]),
        ActionSpec::builtin("core.log", "core").with_inputs(vec![
            ParamSpec::required("message", "string"),
            ParamSpec::optional("level", "string"),
        ]),
        ActionSpec::builtin("core.transform", "core"),
        ActionSpec::builtin("core.setVariable", "core").with_inputs(vec![
            ParamSpec::required("name", "string"),
            ParamSpec::required("value", "any"),
        ]),
        ActionSpec::builtin("core.executeSql", "core").with_inputs(vec![
            ParamSpec::required("statement", "string"),
            ParamSpec::optional("params", "array"),
        ]),
        ActionSpec::remote("core.resolveConfig", "core", "POST", "config/resolve")
            .with_inputs(vec![ParamSpec::required("configKey", "string")])
            .with_outputs(vec![ParamSpec::required("value", "any")]),
        ActionSpec::remote("players.get", "players", "GET", "players/[playerId]")
            .with_inputs(vec![ParamSpec::required("playerId", "string")])
            .with_outputs(vec![ParamSpec::required("player", "object")]),
        ActionSpec::remote("players.ban", "players", "POST", "players/[playerId]/ban")
            .with_inputs(vec![
                ParamSpec::required("playerId", "string"),
                ParamSpec::optional("reason", "string"),
            ]),
        ActionSpec::remote("inventory.grantItem", "inventory", "POST", "inventory/[playerId]/grant")
            .with_inputs(vec![
                ParamSpec::required("playerId", "string"),
                ParamSpec::required("itemId", "string"),
                ParamSpec::optional("quantity", "number"),
            ]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_is_registered() {
        let registry = ActionRegistry::with_builtin_catalog();
        assert!(registry.contains("core.setVariable"));
        assert!(registry.contains("core.delay"));

        let players_get = registry.get("players.get").unwrap();
        assert_eq!(players_get.method.as_deref(), Some("GET"));
        assert_eq!(players_get.route.as_deref(), Some("players/[playerId]"));
    }

    #[test]
    fn dynamic_registration_and_replacement() {
        let mut registry = ActionRegistry::new();
        registry.register(ActionSpec::remote("mods.reload", "mods", "POST", "mods/reload"));
        assert!(registry.contains("mods.reload"));

        registry.register(ActionSpec::remote("mods.reload", "mods", "PUT", "mods/reload"));
        assert_eq!(registry.get("mods.reload").unwrap().method.as_deref(), Some("PUT"));
        assert_eq!(registry.len(), 1);
    }
}
