//! Built-in actions and action dispatch
//!
//! Built-in pseudo-actions run in-process and bypass the execution
//! strategies entirely. Everything else is a remote action: the dispatcher
//! looks up its route in the registry and hands it to the configured
//! strategy. Dispatch is a registered-handler map, one handler per action.

use crate::events::EventBus;
use crate::registry::ActionRegistry;
use crate::strategy::{ActionRoute, ExecutionStrategy};
use async_trait::async_trait;
use playops_core::{json_preview, Error, Result};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Upper bound for `core.delay`; definitions cannot stall an interpreter
/// step longer than this.
const MAX_DELAY_MS: u64 = 30_000;

/// One in-process action. Inputs arrive already resolved against context.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    fn action_id(&self) -> &str;
    async fn execute(&self, input: Map<String, Value>) -> Result<Value>;
}

/// External data-access collaborator for `core.executeSql`.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    async fn execute(&self, statement: &str, params: &[Value]) -> Result<Value>;
}

/// Routes an action id to its built-in handler or, failing that, to the
/// registry-described remote route via the execution strategy.
pub struct ActionDispatcher {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
    registry: Arc<ActionRegistry>,
    strategy: Arc<dyn ExecutionStrategy>,
}

impl ActionDispatcher {
    pub fn new(
        registry: Arc<ActionRegistry>,
        strategy: Arc<dyn ExecutionStrategy>,
        bus: EventBus,
        sql: Option<Arc<dyn SqlExecutor>>,
    ) -> Self {
        let builtins: Vec<Arc<dyn ActionHandler>> = vec![
            Arc::new(DelayAction),
            Arc::new(EmitAction { bus }),
            Arc::new(LogAction),
            Arc::new(TransformAction),
            Arc::new(SetVariableAction),
            Arc::new(ExecuteSqlAction { executor: sql }),
            Arc::new(ResolveConfigAction {
                strategy: Arc::clone(&strategy),
            }),
        ];

        let mut handlers = HashMap::new();
        for handler in builtins {
            handlers.insert(handler.action_id().to_string(), handler);
        }

        Self {
            handlers,
            registry,
            strategy,
        }
    }

    /// Register (or replace) a handler, keyed by its action id.
    pub fn register_handler(&mut self, handler: Arc<dyn ActionHandler>) {
        self.handlers.insert(handler.action_id().to_string(), handler);
    }

    /// Invoke an action with resolved inputs.
    pub async fn invoke(&self, action_id: &str, input: Map<String, Value>) -> Result<Value> {
        if let Some(handler) = self.handlers.get(action_id) {
            debug!(action = %action_id, "Invoking built-in action");
            return handler.execute(input).await;
        }

        let spec = self
            .registry
            .get(action_id)
            .ok_or_else(|| Error::definition(format!("Unknown action '{}'", action_id)))?;

        let (method, route) = match (&spec.method, &spec.route) {
            (Some(method), Some(route)) => (method.clone(), route.clone()),
            _ => {
                return Err(Error::definition(format!(
                    "action '{}' has no route and no built-in handler",
                    action_id
                )))
            }
        };

        let action = ActionRoute {
            module: spec.category.clone(),
            method,
            route,
        };
        self.strategy.execute_api_call(&action, &input).await
    }
}

struct DelayAction;

#[async_trait]
impl ActionHandler for DelayAction {
    fn action_id(&self) -> &str {
        "core.delay"
    }

    async fn execute(&self, input: Map<String, Value>) -> Result<Value> {
        let requested = input
            .get("durationMs")
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::action("core.delay requires a numeric durationMs"))?;
        let duration_ms = requested.min(MAX_DELAY_MS);
        if duration_ms < requested {
            warn!(requested, duration_ms, "Delay clamped to upper bound");
        }

        tokio::time::sleep(Duration::from_millis(duration_ms)).await;
        Ok(json!({"delayed": true, "durationMs": duration_ms}))
    }
}

struct EmitAction {
    bus: EventBus,
}

#[async_trait]
impl ActionHandler for EmitAction {
    fn action_id(&self) -> &str {
        "core.emitEvent"
    }

    async fn execute(&self, input: Map<String, Value>) -> Result<Value> {
        let event = input
            .get("event")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::action("core.emitEvent requires an event name"))?;
        let payload = input.get("payload").cloned().unwrap_or(Value::Null);

        self.bus.emit(event, payload);
        Ok(json!({"emitted": true, "event": event}))
    }
}

struct LogAction;

#[async_trait]
impl ActionHandler for LogAction {
    fn action_id(&self) -> &str {
        "core.log"
    }

    async fn execute(&self, input: Map<String, Value>) -> Result<Value> {
        let message = input
            .get("message")
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .unwrap_or_default();

        match input.get("level").and_then(Value::as_str) {
            Some("debug") => debug!(target: "workflow", "{}", message),
            Some("warn") => warn!(target: "workflow", "{}", message),
            Some("error") => tracing::error!(target: "workflow", "{}", message),
            _ => info!(target: "workflow", "{}", message),
        }
        Ok(json!({"logged": true}))
    }
}

/// The resolved input mapping is itself the output: authoring
/// `{newKey: "$.old.path"}` remaps context values under new names.
struct TransformAction;

#[async_trait]
impl ActionHandler for TransformAction {
    fn action_id(&self) -> &str {
        "core.transform"
    }

    async fn execute(&self, input: Map<String, Value>) -> Result<Value> {
        Ok(Value::Object(input))
    }
}

struct SetVariableAction;

#[async_trait]
impl ActionHandler for SetVariableAction {
    fn action_id(&self) -> &str {
        "core.setVariable"
    }

    async fn execute(&self, input: Map<String, Value>) -> Result<Value> {
        let name = input
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::action("core.setVariable requires a string name"))?;
        let value = input.get("value").cloned().unwrap_or(Value::Null);

        let mut output = Map::new();
        output.insert(name.to_string(), value);
        Ok(Value::Object(output))
    }
}

struct ExecuteSqlAction {
    executor: Option<Arc<dyn SqlExecutor>>,
}

#[async_trait]
impl ActionHandler for ExecuteSqlAction {
    fn action_id(&self) -> &str {
        "core.executeSql"
    }

    async fn execute(&self, input: Map<String, Value>) -> Result<Value> {
        let executor = self
            .executor
            .as_ref()
            .ok_or_else(|| Error::action("core.executeSql: no SQL executor configured"))?;
        let statement = input
            .get("statement")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::action("core.executeSql requires a statement"))?;
        let params: Vec<Value> = input
            .get("params")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let params_preview = json_preview(&Value::Array(params.clone()), 120);
        debug!(statement = %statement, params = %params_preview, "Executing SQL action");
        executor.execute(statement, &params).await
    }
}

/// Configuration resolution is just another routed action; it goes through
/// the strategy so direct handlers can serve it with zero network hops.
struct ResolveConfigAction {
    strategy: Arc<dyn ExecutionStrategy>,
}

#[async_trait]
impl ActionHandler for ResolveConfigAction {
    fn action_id(&self) -> &str {
        "core.resolveConfig"
    }

    async fn execute(&self, input: Map<String, Value>) -> Result<Value> {
        let action = ActionRoute {
            module: "core".into(),
            method: "POST".into(),
            route: "config/resolve".into(),
        };
        self.strategy.execute_api_call(&action, &input).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::NetworkStrategy;

    fn input(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    fn dispatcher() -> ActionDispatcher {
        ActionDispatcher::new(
            Arc::new(ActionRegistry::with_builtin_catalog()),
            Arc::new(NetworkStrategy::new("http://127.0.0.1:1")),
            EventBus::new(),
            None,
        )
    }

    #[tokio::test]
    async fn set_variable_binds_under_chosen_name() {
        let output = dispatcher()
            .invoke("core.setVariable", input(json!({"name": "x", "value": 5})))
            .await
            .unwrap();
        assert_eq!(output, json!({"x": 5}));
    }

    #[tokio::test]
    async fn transform_returns_resolved_mapping() {
        let output = dispatcher()
            .invoke("core.transform", input(json!({"renamed": 7})))
            .await
            .unwrap();
        assert_eq!(output, json!({"renamed": 7}));
    }

    #[tokio::test]
    async fn emit_publishes_to_bus() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let dispatcher = ActionDispatcher::new(
            Arc::new(ActionRegistry::with_builtin_catalog()),
            Arc::new(NetworkStrategy::new("http://127.0.0.1:1")),
            bus,
            None,
        );

        dispatcher
            .invoke(
                "core.emitEvent",
                input(json!({"event": "player.banned", "payload": {"playerId": 1}})),
            )
            .await
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name, "player.banned");
    }

    #[tokio::test]
    async fn unknown_action_is_a_definition_error() {
        let err = dispatcher()
            .invoke("nope.missing", Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Definition(_)));
    }

    #[tokio::test]
    async fn execute_sql_without_executor_fails() {
        let err = dispatcher()
            .invoke("core.executeSql", input(json!({"statement": "SELECT 1"})))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Action(_)));
    }
}
