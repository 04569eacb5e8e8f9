//! playops-store: workflow definitions and the execution ledger
//!
//! Provides persistent storage for workflow runs with state transitions:
//! PENDING → RUNNING → COMPLETED/FAILED/CANCELLED
//!
//! Features:
//! - SQLite persistent storage (in-memory variant for tests)
//! - One execution row per run, one node row per executed state
//! - Per-row upserts only; no cross-execution locking

pub mod error;
pub mod records;
pub mod sqlite_store;
pub mod store;

pub use error::StoreError;
pub use records::{
    ExecutionRecord, ExecutionStatus, NewExecution, NewNodeExecution, NewWorkflow,
    NodeExecutionRecord, NodeStatus, WorkflowRecord,
};
pub use sqlite_store::SqliteStore;
pub use store::WorkflowStore;
