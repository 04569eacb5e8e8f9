//! State machine interpreter
//!
//! Walks a workflow definition's states, invoking actions, running loops,
//! and evaluating guarded transitions while threading the accumulating
//! context. Progress is checkpointed into the execution row after every
//! step so external observers see live state.

use crate::builtin::ActionDispatcher;
use crate::condition::first_matching_transition;
use crate::definition::{StateDefinition, StateKind, WorkflowDefinition};
use crate::events::{lifecycle, EventBus};
use crate::expression::resolve_inputs;
use crate::loops::run_loop;
use chrono::Utc;
use playops_core::{json_preview, merge_output, Error, Result};
use playops_store::{
    ExecutionRecord, ExecutionStatus, NewNodeExecution, NodeExecutionRecord, NodeStatus,
    WorkflowStore,
};
use serde_json::{json, Map, Value};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Hard cap on interpreter steps per run; bounds pathological or cyclic
/// definitions that evade the context-sensitive loop detection.
const MAX_GLOBAL_STEPS: u32 = 100;

pub struct Interpreter {
    store: Arc<dyn WorkflowStore>,
    bus: EventBus,
    dispatcher: Arc<ActionDispatcher>,
}

impl Interpreter {
    pub fn new(store: Arc<dyn WorkflowStore>, bus: EventBus, dispatcher: Arc<ActionDispatcher>) -> Self {
        Self {
            store,
            bus,
            dispatcher,
        }
    }

    /// Drive an execution to a terminal status. Fatal errors are persisted
    /// onto the execution row before they surface to the caller.
    pub async fn run(
        &self,
        definition: &WorkflowDefinition,
        mut execution: ExecutionRecord,
    ) -> Result<ExecutionRecord> {
        let mut context: Map<String, Value> = match &execution.context {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        let mut current = execution
            .current_state
            .clone()
            .unwrap_or_else(|| definition.initial_state.clone());
        let mut steps: u32 = 0;
        let mut seen_signatures: HashSet<u64> = HashSet::new();

        loop {
            steps += 1;
            if steps > MAX_GLOBAL_STEPS {
                return self
                    .fail(
                        execution,
                        context,
                        Error::definition(format!(
                            "execution exceeded maximum iterations ({})",
                            MAX_GLOBAL_STEPS
                        )),
                    )
                    .await;
            }

            // Cooperative cancellation: stop promptly if an external cancel
            // landed since the last step. In-flight calls are not aborted.
            if let Some(fresh) = self.store.get_execution(execution.id).await? {
                if fresh.status == ExecutionStatus::Cancelled {
                    info!(execution_id = execution.id, "Execution cancelled, stopping");
                    self.store.mark_nodes_skipped(execution.id).await?;
                    return Ok(fresh);
                }
            }

            // Checkpoint current state + context for observers.
            execution.current_state = Some(current.clone());
            execution.context = Value::Object(context.clone());
            execution = self.store.update_execution(&execution).await?;

            let Some(state) = definition.states.get(&current) else {
                return self
                    .fail(
                        execution,
                        context,
                        Error::definition(format!("Unknown state '{}'", current)),
                    )
                    .await;
            };

            // Coarse loop detection: a repeated (state, context) pair cannot
            // make progress. Heuristic, not a guarantee: any context change
            // produces a fresh signature.
            let signature = state_signature(&current, &context)?;
            if !seen_signatures.insert(signature) {
                return self
                    .fail(
                        execution,
                        context,
                        Error::definition(format!("infinite loop detected at state '{}'", current)),
                    )
                    .await;
            }

            // Entry side effects: diagnostic logging only, never touch context.
            for entry in &state.entry {
                if entry.action_type == "log" {
                    info!(
                        target: "workflow",
                        state = %current,
                        "{}",
                        entry.message.as_deref().unwrap_or("")
                    );
                }
            }

            let kind = match state.kind() {
                Ok(kind) => kind,
                Err(e) => return self.fail(execution, context, e).await,
            };

            let context_preview = json_preview(&Value::Object(context.clone()), 200);
            debug!(
                execution_id = execution.id,
                state = %current,
                kind = kind.as_str(),
                context = %context_preview,
                "Interpreter step"
            );

            match kind {
                StateKind::Final => {
                    execution.status = ExecutionStatus::Completed;
                    execution.completed_at = Some(Utc::now());
                    execution.current_state = Some(current.clone());
                    execution.context = Value::Object(context);
                    execution = self.store.update_execution(&execution).await?;

                    self.bus.emit(
                        lifecycle::EXECUTION_COMPLETED,
                        json!({
                            "executionId": execution.id,
                            "workflowId": execution.workflow_id,
                            "status": "completed",
                        }),
                    );
                    info!(execution_id = execution.id, state = %current, "Execution completed");
                    return Ok(execution);
                }

                StateKind::Invoke => {
                    let Some(invoke) = state.invoke.clone() else {
                        return self
                            .fail(
                                execution,
                                context,
                                Error::internal(format!("state '{}' missing invoke spec", current)),
                            )
                            .await;
                    };

                    let input = resolve_inputs(&invoke.input, &context);
                    let mut node = self
                        .start_node(execution.id, &current, "invoke", Value::Object(input.clone()))
                        .await?;
                    let started = Instant::now();

                    match self.dispatcher.invoke(&invoke.action, input).await {
                        Ok(output) => {
                            merge_output(&mut context, &current, &output);
                            node.status = NodeStatus::Completed;
                            node.output = Some(output);
                            self.finish_node(node, started).await?;

                            if let Some(done) = &invoke.on_done {
                                current = done.target().to_string();
                            } else {
                                match self.next_transition(state, &execution, &context) {
                                    Some(next) => current = next,
                                    None => {
                                        return self
                                            .fail(
                                                execution,
                                                context,
                                                Error::definition(format!(
                                                    "no transitions from state '{}'",
                                                    current
                                                )),
                                            )
                                            .await;
                                    }
                                }
                            }
                        }
                        Err(e) => {
                            let message = e.to_string();
                            node.status = NodeStatus::Failed;
                            node.error = Some(message.clone());
                            self.finish_node(node, started).await?;

                            // Only action failures are recoverable; a
                            // definition error fails the run even when the
                            // state declares onError.
                            match &invoke.on_error {
                                Some(on_error) if e.is_action_failure() => {
                                    warn!(
                                        execution_id = execution.id,
                                        state = %current,
                                        error = %message,
                                        "Action failed, following onError"
                                    );
                                    context.insert(format!("{}_error", current), json!(message));
                                    current = on_error.target().to_string();
                                }
                                _ => return self.fail(execution, context, e).await,
                            }
                        }
                    }
                }

                StateKind::Loop => {
                    let Some(spec) = state.loop_spec.clone() else {
                        return self
                            .fail(
                                execution,
                                context,
                                Error::internal(format!("state '{}' missing loop spec", current)),
                            )
                            .await;
                    };

                    let descriptor = json!({
                        "mode": if spec.for_each.is_some() { "forEach" } else { "while" },
                        "maxIterations": spec.max_iterations,
                        "timeoutMs": spec.timeout_ms,
                    });
                    let mut node = self
                        .start_node(execution.id, &current, "loop", descriptor)
                        .await?;
                    let started = Instant::now();

                    match run_loop(&self.dispatcher, &current, &spec, &mut context).await {
                        Ok(outcome) => {
                            let output = outcome.to_output();
                            merge_output(&mut context, &current, &output);
                            node.status = NodeStatus::Completed;
                            node.output = Some(output);
                            node.error = outcome.loop_error.clone();
                            self.finish_node(node, started).await?;

                            // A bound stop routes via onError when one exists;
                            // otherwise the partial results take the done path.
                            if let (Some(loop_error), Some(on_error)) =
                                (&outcome.loop_error, &spec.on_error)
                            {
                                context
                                    .insert(format!("{}_error", current), json!(loop_error));
                                current = on_error.target().to_string();
                            } else if let Some(done) = &spec.on_done {
                                current = done.target().to_string();
                            } else {
                                match self.next_transition(state, &execution, &context) {
                                    Some(next) => current = next,
                                    None => {
                                        return self
                                            .fail(
                                                execution,
                                                context,
                                                Error::definition(format!(
                                                    "no transitions from state '{}'",
                                                    current
                                                )),
                                            )
                                            .await;
                                    }
                                }
                            }
                        }
                        Err(e) => {
                            let message = e.to_string();
                            node.status = NodeStatus::Failed;
                            node.error = Some(message.clone());
                            self.finish_node(node, started).await?;

                            // Body action failures may route via onError;
                            // body definition errors (step cap, unknown
                            // body state) always fail the run.
                            match &spec.on_error {
                                Some(on_error) if e.is_action_failure() => {
                                    context.insert(format!("{}_error", current), json!(message));
                                    current = on_error.target().to_string();
                                }
                                _ => return self.fail(execution, context, e).await,
                            }
                        }
                    }
                }

                StateKind::Always => {
                    match self.next_transition(state, &execution, &context) {
                        Some(next) => current = next,
                        None => {
                            return self
                                .fail(
                                    execution,
                                    context,
                                    Error::definition(format!(
                                        "No matching transition from state '{}'",
                                        current
                                    )),
                                )
                                .await;
                        }
                    }
                }

                StateKind::On => match self.pick_event_transition(state, &execution, &context) {
                    Some(next) => current = next,
                    None => {
                        return self
                            .fail(
                                execution,
                                context,
                                Error::definition(format!(
                                    "no matching transition for event in state '{}'",
                                    current
                                )),
                            )
                            .await;
                    }
                },
            }
        }
    }

    /// `always` first, then `on`, mirroring the fall-through order after an
    /// invoke without `onDone`.
    fn next_transition(
        &self,
        state: &StateDefinition,
        execution: &ExecutionRecord,
        context: &Map<String, Value>,
    ) -> Option<String> {
        if let Some(always) = &state.always {
            return first_matching_transition(always, context).map(String::from);
        }
        if state.on.is_some() {
            return self.pick_event_transition(state, execution, context);
        }
        None
    }

    /// Select the event transition list: the trigger event's entry when one
    /// matches, else the first declared entry.
    fn pick_event_transition(
        &self,
        state: &StateDefinition,
        execution: &ExecutionRecord,
        context: &Map<String, Value>,
    ) -> Option<String> {
        let on = state.on.as_ref()?;
        let transitions = execution
            .trigger_event
            .as_deref()
            .and_then(|event| on.get(event))
            .or_else(|| on.first())?;
        first_matching_transition(transitions, context).map(String::from)
    }

    async fn start_node(
        &self,
        execution_id: i64,
        node_id: &str,
        node_type: &str,
        input: Value,
    ) -> Result<NodeExecutionRecord> {
        let node = self
            .store
            .insert_node_execution(NewNodeExecution {
                execution_id,
                node_id: node_id.to_string(),
                node_type: node_type.to_string(),
                status: NodeStatus::Running,
                input,
            })
            .await?;

        self.bus.emit(
            lifecycle::NODE_STARTED,
            json!({"executionId": execution_id, "nodeId": node_id, "nodeType": node_type}),
        );
        Ok(node)
    }

    async fn finish_node(&self, mut node: NodeExecutionRecord, started: Instant) -> Result<()> {
        node.completed_at = Some(Utc::now());
        node.duration_ms = Some(started.elapsed().as_millis() as i64);
        let event = match node.status {
            NodeStatus::Failed => lifecycle::NODE_FAILED,
            _ => lifecycle::NODE_COMPLETED,
        };
        let payload = json!({
            "executionId": node.execution_id,
            "nodeId": node.node_id,
            "status": node.status,
            "durationMs": node.duration_ms,
        });
        self.store.update_node_execution(&node).await?;
        self.bus.emit(event, payload);
        Ok(())
    }

    /// Persist a fatal failure onto the execution row, then surface it.
    async fn fail(
        &self,
        mut execution: ExecutionRecord,
        context: Map<String, Value>,
        error: Error,
    ) -> Result<ExecutionRecord> {
        let message = error.to_string();
        warn!(execution_id = execution.id, error = %message, "Execution failed");

        execution.status = ExecutionStatus::Failed;
        execution.error = Some(message.clone());
        execution.completed_at = Some(Utc::now());
        execution.context = Value::Object(context);
        self.store.update_execution(&execution).await?;

        self.bus.emit(
            lifecycle::EXECUTION_COMPLETED,
            json!({
                "executionId": execution.id,
                "workflowId": execution.workflow_id,
                "status": "failed",
                "error": message,
            }),
        );
        Err(error)
    }
}

fn state_signature(state: &str, context: &Map<String, Value>) -> Result<u64> {
    let mut hasher = DefaultHasher::new();
    state.hash(&mut hasher);
    serde_json::to_string(context)?.hash(&mut hasher);
    Ok(hasher.finish())
}
