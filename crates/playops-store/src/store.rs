use crate::error::Result;
use crate::records::{
    ExecutionRecord, ExecutionStatus, NewExecution, NewNodeExecution, NewWorkflow,
    NodeExecutionRecord, WorkflowRecord,
};
use async_trait::async_trait;

/// Persistence interface for workflow definitions and the execution ledger.
///
/// All inserts return the stored row (with its assigned id), and updates
/// return the row as re-read after the write.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn insert_workflow(&self, new: NewWorkflow) -> Result<WorkflowRecord>;
    async fn get_workflow(&self, id: i64) -> Result<Option<WorkflowRecord>>;

    async fn insert_execution(&self, new: NewExecution) -> Result<ExecutionRecord>;
    async fn get_execution(&self, id: i64) -> Result<Option<ExecutionRecord>>;
    async fn update_execution(&self, execution: &ExecutionRecord) -> Result<ExecutionRecord>;
    async fn list_executions(
        &self,
        status: Option<ExecutionStatus>,
        limit: i64,
    ) -> Result<Vec<ExecutionRecord>>;

    async fn insert_node_execution(&self, new: NewNodeExecution) -> Result<NodeExecutionRecord>;
    async fn update_node_execution(
        &self,
        node: &NodeExecutionRecord,
    ) -> Result<NodeExecutionRecord>;
    async fn list_node_executions(&self, execution_id: i64) -> Result<Vec<NodeExecutionRecord>>;

    /// Mark all still running/pending node rows of an execution as skipped.
    /// Returns the number of rows affected. Used by cancellation.
    async fn mark_nodes_skipped(&self, execution_id: i64) -> Result<u64>;
}
