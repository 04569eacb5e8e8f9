//! Workflow engine facade
//!
//! The only public surface of the engine: start a run, cancel a run, and
//! report a run's status with its per-node audit trail. Everything else is
//! interpreter internals.

use crate::builtin::ActionDispatcher;
use crate::definition::WorkflowDefinition;
use crate::events::{lifecycle, EventBus};
use crate::interpreter::Interpreter;
use chrono::Utc;
use playops_core::{Error, Result};
use playops_store::{
    ExecutionRecord, ExecutionStatus, NewExecution, NodeExecutionRecord, WorkflowStore,
};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{info, warn};

pub struct WorkflowEngine {
    store: Arc<dyn WorkflowStore>,
    bus: EventBus,
    dispatcher: Arc<ActionDispatcher>,
}

impl WorkflowEngine {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        bus: EventBus,
        dispatcher: Arc<ActionDispatcher>,
    ) -> Self {
        Self {
            store,
            bus,
            dispatcher,
        }
    }

    /// Access the engine's event bus (for subscribing to lifecycle events).
    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    /// Start a run and drive it to a terminal status. Returns the execution
    /// id in all cases; a fatal interpreter error is captured onto the
    /// execution row (`status=failed`) rather than propagated.
    pub async fn execute_workflow(
        &self,
        workflow_id: i64,
        payload: Value,
        trigger_event: Option<String>,
    ) -> Result<i64> {
        let record = self
            .store
            .get_workflow(workflow_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("workflow {}", workflow_id)))?;
        if !record.enabled {
            return Err(Error::definition(format!(
                "workflow {} ('{}') is disabled",
                workflow_id, record.name
            )));
        }

        let definition: WorkflowDefinition = serde_json::from_value(record.definition.clone())?;
        definition.validate()?;
        definition.validate_payload(&payload)?;

        // The context starts seeded with the trigger payload's fields so
        // `$.path` references can read them from the first state on.
        let context: Map<String, Value> = match &payload {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };

        let execution = self
            .store
            .insert_execution(NewExecution {
                workflow_id,
                status: ExecutionStatus::Running,
                trigger_event,
                trigger_payload: payload,
                context: Value::Object(context),
                current_state: Some(definition.initial_state.clone()),
            })
            .await?;
        let execution_id = execution.id;

        info!(
            execution_id,
            workflow_id,
            workflow = %record.name,
            "Starting workflow execution"
        );
        self.bus.emit(
            lifecycle::EXECUTION_STARTED,
            json!({
                "executionId": execution_id,
                "workflowId": workflow_id,
                "workflow": record.name,
            }),
        );

        let interpreter =
            Interpreter::new(Arc::clone(&self.store), self.bus.clone(), Arc::clone(&self.dispatcher));
        match interpreter.run(&definition, execution).await {
            Ok(finished) => {
                info!(
                    execution_id,
                    status = finished.status.as_str(),
                    "Workflow execution finished"
                );
            }
            Err(e) => {
                // Already persisted as failed by the interpreter.
                warn!(execution_id, error = %e, "Workflow execution failed");
            }
        }

        Ok(execution_id)
    }

    /// Cancel a run: mark the execution cancelled and its unfinished node
    /// rows skipped. A running interpreter notices between steps; an
    /// in-flight action call is not aborted.
    pub async fn cancel_workflow(&self, execution_id: i64) -> Result<ExecutionRecord> {
        let mut execution = self
            .store
            .get_execution(execution_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("execution {}", execution_id)))?;

        execution.status = ExecutionStatus::Cancelled;
        execution.completed_at = Some(Utc::now());
        let execution = self.store.update_execution(&execution).await?;
        let skipped = self.store.mark_nodes_skipped(execution_id).await?;

        info!(execution_id, skipped, "Execution cancelled");
        Ok(execution)
    }

    /// An execution plus all of its node execution rows.
    pub async fn get_execution_status(
        &self,
        execution_id: i64,
    ) -> Result<(ExecutionRecord, Vec<NodeExecutionRecord>)> {
        let execution = self
            .store
            .get_execution(execution_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("execution {}", execution_id)))?;
        let nodes = self.store.list_node_executions(execution_id).await?;
        Ok((execution, nodes))
    }
}
