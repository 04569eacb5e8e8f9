//! SQLite-backed workflow ledger
//!
//! Provides durable storage for workflow definitions, executions, and the
//! per-node audit trail. Uses SQLx for async database operations.

use crate::error::{Result, StoreError};
use crate::records::{
    ExecutionRecord, ExecutionStatus, NewExecution, NewNodeExecution, NewWorkflow, NodeStatus,
    NodeExecutionRecord, WorkflowRecord,
};
use crate::store::WorkflowStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::{debug, info};

/// SQLite-backed store for workflow definitions and execution records
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new SQLite store with the given database URL
    ///
    /// URL format: `sqlite:///path/to/db.sqlite` or `sqlite::memory:`
    pub async fn new(url: &str) -> Result<Self> {
        info!("Initializing SQLite workflow store: {}", url);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await?;

        let store = Self { pool };
        store.initialize_schema().await?;

        info!("SQLite workflow store initialized");
        Ok(store)
    }

    /// Create an in-memory store for testing
    pub async fn in_memory() -> Result<Self> {
        Self::new("sqlite::memory:").await
    }

    /// Initialize database schema
    async fn initialize_schema(&self) -> Result<()> {
        debug!("Initializing database schema");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflows (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                definition TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS executions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                workflow_id INTEGER NOT NULL,
                status TEXT NOT NULL,
                trigger_event TEXT,
                trigger_payload TEXT NOT NULL,
                context TEXT NOT NULL,
                current_state TEXT,
                error TEXT,
                started_at TEXT NOT NULL,
                completed_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS node_executions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                execution_id INTEGER NOT NULL,
                node_id TEXT NOT NULL,
                node_type TEXT NOT NULL,
                status TEXT NOT NULL,
                input TEXT NOT NULL,
                output TEXT,
                error TEXT,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                duration_ms INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Indices for common queries
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_executions_status ON executions(status)")
            .execute(&self.pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_executions_workflow ON executions(workflow_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_node_executions_execution ON node_executions(execution_id)",
        )
        .execute(&self.pool)
        .await?;

        debug!("Database schema initialized");
        Ok(())
    }
}

fn parse_timestamp(raw: String) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("invalid timestamp '{}': {}", raw, e)))
}

fn row_to_workflow(row: &sqlx::sqlite::SqliteRow) -> Result<WorkflowRecord> {
    let definition_json: String = row.get("definition");
    let enabled: i64 = row.get("enabled");
    Ok(WorkflowRecord {
        id: row.get("id"),
        name: row.get("name"),
        enabled: enabled != 0,
        definition: serde_json::from_str(&definition_json)?,
        created_at: parse_timestamp(row.get("created_at"))?,
        updated_at: parse_timestamp(row.get("updated_at"))?,
    })
}

fn row_to_execution(row: &sqlx::sqlite::SqliteRow) -> Result<ExecutionRecord> {
    let status_raw: String = row.get("status");
    let status = ExecutionStatus::parse(&status_raw)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown execution status '{}'", status_raw)))?;
    let payload_json: String = row.get("trigger_payload");
    let context_json: String = row.get("context");
    let completed_at: Option<String> = row.get("completed_at");

    Ok(ExecutionRecord {
        id: row.get("id"),
        workflow_id: row.get("workflow_id"),
        status,
        trigger_event: row.get("trigger_event"),
        trigger_payload: serde_json::from_str(&payload_json)?,
        context: serde_json::from_str(&context_json)?,
        current_state: row.get("current_state"),
        error: row.get("error"),
        started_at: parse_timestamp(row.get("started_at"))?,
        completed_at: completed_at.map(parse_timestamp).transpose()?,
    })
}

fn row_to_node_execution(row: &sqlx::sqlite::SqliteRow) -> Result<NodeExecutionRecord> {
    let status_raw: String = row.get("status");
    let status = NodeStatus::parse(&status_raw)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown node status '{}'", status_raw)))?;
    let input_json: String = row.get("input");
    let output_json: Option<String> = row.get("output");
    let completed_at: Option<String> = row.get("completed_at");

    Ok(NodeExecutionRecord {
        id: row.get("id"),
        execution_id: row.get("execution_id"),
        node_id: row.get("node_id"),
        node_type: row.get("node_type"),
        status,
        input: serde_json::from_str(&input_json)?,
        output: output_json.map(|s| serde_json::from_str(&s)).transpose()?,
        error: row.get("error"),
        started_at: parse_timestamp(row.get("started_at"))?,
        completed_at: completed_at.map(parse_timestamp).transpose()?,
        duration_ms: row.get("duration_ms"),
    })
}

const EXECUTION_COLUMNS: &str = "id, workflow_id, status, trigger_event, trigger_payload, context, current_state, error, started_at, completed_at";
const NODE_COLUMNS: &str = "id, execution_id, node_id, node_type, status, input, output, error, started_at, completed_at, duration_ms";

#[async_trait]
impl WorkflowStore for SqliteStore {
    async fn insert_workflow(&self, new: NewWorkflow) -> Result<WorkflowRecord> {
        let definition_json = serde_json::to_string(&new.definition)?;
        let now = Utc::now().to_rfc3339();

        let result = sqlx::query(
            "INSERT INTO workflows (name, enabled, definition, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&new.name)
        .bind(new.enabled as i64)
        .bind(&definition_json)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        debug!(workflow_id = id, name = %new.name, "Inserted workflow");

        self.get_workflow(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("workflow {}", id)))
    }

    async fn get_workflow(&self, id: i64) -> Result<Option<WorkflowRecord>> {
        let row = sqlx::query(
            "SELECT id, name, enabled, definition, created_at, updated_at FROM workflows WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_workflow).transpose()
    }

    async fn insert_execution(&self, new: NewExecution) -> Result<ExecutionRecord> {
        let payload_json = serde_json::to_string(&new.trigger_payload)?;
        let context_json = serde_json::to_string(&new.context)?;
        let now = Utc::now().to_rfc3339();

        let result = sqlx::query(
            r#"
            INSERT INTO executions (workflow_id, status, trigger_event, trigger_payload, context, current_state, started_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(new.workflow_id)
        .bind(new.status.as_str())
        .bind(&new.trigger_event)
        .bind(&payload_json)
        .bind(&context_json)
        .bind(&new.current_state)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        debug!(execution_id = id, workflow_id = new.workflow_id, "Inserted execution");

        self.get_execution(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("execution {}", id)))
    }

    async fn get_execution(&self, id: i64) -> Result<Option<ExecutionRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM executions WHERE id = ?",
            EXECUTION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_execution).transpose()
    }

    async fn update_execution(&self, execution: &ExecutionRecord) -> Result<ExecutionRecord> {
        let payload_json = serde_json::to_string(&execution.trigger_payload)?;
        let context_json = serde_json::to_string(&execution.context)?;

        sqlx::query(
            r#"
            UPDATE executions
            SET status = ?, trigger_event = ?, trigger_payload = ?, context = ?,
                current_state = ?, error = ?, completed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(execution.status.as_str())
        .bind(&execution.trigger_event)
        .bind(&payload_json)
        .bind(&context_json)
        .bind(&execution.current_state)
        .bind(&execution.error)
        .bind(execution.completed_at.map(|t| t.to_rfc3339()))
        .bind(execution.id)
        .execute(&self.pool)
        .await?;

        self.get_execution(execution.id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("execution {}", execution.id)))
    }

    async fn list_executions(
        &self,
        status: Option<ExecutionStatus>,
        limit: i64,
    ) -> Result<Vec<ExecutionRecord>> {
        let rows = if let Some(status) = status {
            sqlx::query(&format!(
                "SELECT {} FROM executions WHERE status = ? ORDER BY started_at DESC LIMIT ?",
                EXECUTION_COLUMNS
            ))
            .bind(status.as_str())
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(&format!(
                "SELECT {} FROM executions ORDER BY started_at DESC LIMIT ?",
                EXECUTION_COLUMNS
            ))
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
        };

        rows.iter().map(row_to_execution).collect()
    }

    async fn insert_node_execution(&self, new: NewNodeExecution) -> Result<NodeExecutionRecord> {
        let input_json = serde_json::to_string(&new.input)?;
        let now = Utc::now().to_rfc3339();

        let result = sqlx::query(
            r#"
            INSERT INTO node_executions (execution_id, node_id, node_type, status, input, started_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(new.execution_id)
        .bind(&new.node_id)
        .bind(&new.node_type)
        .bind(new.status.as_str())
        .bind(&input_json)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();

        let row = sqlx::query(&format!(
            "SELECT {} FROM node_executions WHERE id = ?",
            NODE_COLUMNS
        ))
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        row_to_node_execution(&row)
    }

    async fn update_node_execution(
        &self,
        node: &NodeExecutionRecord,
    ) -> Result<NodeExecutionRecord> {
        let input_json = serde_json::to_string(&node.input)?;
        let output_json = node.output.as_ref().map(serde_json::to_string).transpose()?;

        sqlx::query(
            r#"
            UPDATE node_executions
            SET status = ?, input = ?, output = ?, error = ?, completed_at = ?, duration_ms = ?
            WHERE id = ?
            "#,
        )
        .bind(node.status.as_str())
        .bind(&input_json)
        .bind(&output_json)
        .bind(&node.error)
        .bind(node.completed_at.map(|t| t.to_rfc3339()))
        .bind(node.duration_ms)
        .bind(node.id)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(&format!(
            "SELECT {} FROM node_executions WHERE id = ?",
            NODE_COLUMNS
        ))
        .bind(node.id)
        .fetch_one(&self.pool)
        .await?;

        row_to_node_execution(&row)
    }

    async fn list_node_executions(&self, execution_id: i64) -> Result<Vec<NodeExecutionRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM node_executions WHERE execution_id = ? ORDER BY id ASC",
            NODE_COLUMNS
        ))
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_node_execution).collect()
    }

    async fn mark_nodes_skipped(&self, execution_id: i64) -> Result<u64> {
        let now = Utc::now().to_rfc3339();

        let result = sqlx::query(
            "UPDATE node_executions SET status = 'skipped', completed_at = ? WHERE execution_id = ? AND status IN ('running', 'pending')",
        )
        .bind(&now)
        .bind(execution_id)
        .execute(&self.pool)
        .await?;

        let affected = result.rows_affected();
        debug!(execution_id, affected, "Marked unfinished nodes skipped");
        Ok(affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn store() -> SqliteStore {
        SqliteStore::in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn insert_and_get_workflow() {
        let store = store().await;
        let record = store
            .insert_workflow(NewWorkflow {
                name: "spawn-npcs".into(),
                enabled: true,
                definition: json!({"initialState": "start", "states": {}}),
            })
            .await
            .unwrap();

        assert!(record.id > 0);
        let fetched = store.get_workflow(record.id).await.unwrap().unwrap();
        assert_eq!(fetched.name, "spawn-npcs");
        assert!(fetched.enabled);
        assert_eq!(fetched.definition["initialState"], json!("start"));
    }

    #[tokio::test]
    async fn execution_round_trip_and_status_filter() {
        let store = store().await;
        let execution = store
            .insert_execution(NewExecution {
                workflow_id: 1,
                status: ExecutionStatus::Running,
                trigger_event: Some("player.joined".into()),
                trigger_payload: json!({"playerId": 42}),
                context: json!({}),
                current_state: Some("start".into()),
            })
            .await
            .unwrap();

        let mut updated = execution.clone();
        updated.status = ExecutionStatus::Completed;
        updated.context = json!({"x": 5});
        updated.completed_at = Some(Utc::now());
        let updated = store.update_execution(&updated).await.unwrap();
        assert_eq!(updated.status, ExecutionStatus::Completed);
        assert_eq!(updated.context["x"], json!(5));

        let completed = store
            .list_executions(Some(ExecutionStatus::Completed), 10)
            .await
            .unwrap();
        assert_eq!(completed.len(), 1);
        let running = store
            .list_executions(Some(ExecutionStatus::Running), 10)
            .await
            .unwrap();
        assert!(running.is_empty());
    }

    #[tokio::test]
    async fn malformed_row_reads_as_corrupt_not_missing() {
        let store = store().await;
        let result = sqlx::query(
            "INSERT INTO executions (workflow_id, status, trigger_payload, context, started_at) \
             VALUES (1, 'running', '{}', '{}', 'not-a-timestamp')",
        )
        .execute(&store.pool)
        .await
        .unwrap();

        let err = store
            .get_execution(result.last_insert_rowid())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));
    }

    #[tokio::test]
    async fn mark_nodes_skipped_only_touches_unfinished() {
        let store = store().await;

        let running = store
            .insert_node_execution(NewNodeExecution {
                execution_id: 7,
                node_id: "fetch".into(),
                node_type: "invoke".into(),
                status: NodeStatus::Running,
                input: json!({}),
            })
            .await
            .unwrap();

        let mut done = store
            .insert_node_execution(NewNodeExecution {
                execution_id: 7,
                node_id: "notify".into(),
                node_type: "invoke".into(),
                status: NodeStatus::Running,
                input: json!({}),
            })
            .await
            .unwrap();
        done.status = NodeStatus::Completed;
        store.update_node_execution(&done).await.unwrap();

        let affected = store.mark_nodes_skipped(7).await.unwrap();
        assert_eq!(affected, 1);

        let nodes = store.list_node_executions(7).await.unwrap();
        let fetch = nodes.iter().find(|n| n.id == running.id).unwrap();
        assert_eq!(fetch.status, NodeStatus::Skipped);
        let notify = nodes.iter().find(|n| n.id == done.id).unwrap();
        assert_eq!(notify.status, NodeStatus::Completed);
    }
}
