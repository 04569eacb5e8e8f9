//! Record types for the workflow ledger
//!
//! One `ExecutionRecord` per workflow run, one `NodeExecutionRecord` per
//! executed state within a run. All records are keyed by SQLite integer
//! row ids.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Status of a workflow execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ExecutionStatus::Pending),
            "running" => Some(ExecutionStatus::Running),
            "completed" => Some(ExecutionStatus::Completed),
            "failed" => Some(ExecutionStatus::Failed),
            "cancelled" => Some(ExecutionStatus::Cancelled),
            _ => None,
        }
    }
}

/// Status of a single executed node within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Pending => "pending",
            NodeStatus::Running => "running",
            NodeStatus::Completed => "completed",
            NodeStatus::Failed => "failed",
            NodeStatus::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(NodeStatus::Pending),
            "running" => Some(NodeStatus::Running),
            "completed" => Some(NodeStatus::Completed),
            "failed" => Some(NodeStatus::Failed),
            "skipped" => Some(NodeStatus::Skipped),
            _ => None,
        }
    }
}

/// A stored workflow definition. The engine treats `definition` as opaque
/// JSON; parsing into the typed model happens in playops-workflows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub id: i64,
    pub name: String,
    pub enabled: bool,
    pub definition: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for inserting a new workflow definition
#[derive(Debug, Clone)]
pub struct NewWorkflow {
    pub name: String,
    pub enabled: bool,
    pub definition: Value,
}

/// One workflow run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: i64,
    pub workflow_id: i64,
    pub status: ExecutionStatus,
    pub trigger_event: Option<String>,
    pub trigger_payload: Value,
    /// Live accumulated context, checkpointed after every state transition
    pub context: Value,
    pub current_state: Option<String>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Fields for inserting a new execution
#[derive(Debug, Clone)]
pub struct NewExecution {
    pub workflow_id: i64,
    pub status: ExecutionStatus,
    pub trigger_event: Option<String>,
    pub trigger_payload: Value,
    pub context: Value,
    pub current_state: Option<String>,
}

/// One executed state (or loop) within a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeExecutionRecord {
    pub id: i64,
    pub execution_id: i64,
    /// State name within the workflow definition
    pub node_id: String,
    pub node_type: String,
    pub status: NodeStatus,
    pub input: Value,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
}

/// Fields for inserting a new node execution
#[derive(Debug, Clone)]
pub struct NewNodeExecution {
    pub execution_id: i64,
    pub node_id: String,
    pub node_type: String,
    pub status: NodeStatus,
    pub input: Value,
}
