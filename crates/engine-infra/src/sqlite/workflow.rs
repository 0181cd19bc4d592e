//! SQLite workflow repository implementation.
//!
//! Implements `WorkflowRepository` from `engine-core` using sqlx with split
//! read/write pools. Workflow definitions are stored as a JSON blob (the
//! `workflows` table also denormalizes `project_id`/`enabled`/
//! `trigger_event_name` for the indexed lookups `find_enabled_by_trigger`
//! needs on every trigger event). Executions and step executions are
//! normalized tables; `step_executions.wait_event_name` is likewise
//! denormalized so `find_waiting_for_event` resolves through an index
//! instead of scanning every WAITING row in a project.

use chrono::{DateTime, Utc};
use engine_core::repository::workflow::WorkflowRepository;
use engine_types::error::RepositoryError;
use engine_types::workflow::{StepExecution, StepExecutionStatus, WorkflowDefinition, WorkflowExecution, WorkflowExecutionStatus};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `WorkflowRepository`.
#[derive(Clone)]
pub struct SqliteWorkflowRepository {
    pool: DatabasePool,
}

impl SqliteWorkflowRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn backend(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Backend(e.to_string())
}

fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    s.parse::<Uuid>().map_err(|e| RepositoryError::Serialization(format!("invalid UUID: {e}")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Serialization(format!("invalid datetime: {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn status_str<T: serde::Serialize>(status: &T) -> Result<String, RepositoryError> {
    serde_json::to_value(status)
        .ok()
        .and_then(|v| v.as_str().map(|s| s.to_string()))
        .ok_or_else(|| RepositoryError::Serialization("failed to serialize status".to_string()))
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

struct WorkflowDefRow {
    definition: String,
}

impl WorkflowDefRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self { definition: row.try_get("definition")? })
    }

    fn into_definition(self) -> Result<WorkflowDefinition, RepositoryError> {
        serde_json::from_str(&self.definition)
            .map_err(|e| RepositoryError::Serialization(format!("invalid workflow definition JSON: {e}")))
    }
}

struct ExecutionRow {
    id: String,
    workflow_id: String,
    contact_id: String,
    status: String,
    current_step_id: Option<String>,
    started_at: String,
    completed_at: Option<String>,
    exit_reason: Option<String>,
    context: String,
}

impl ExecutionRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            workflow_id: row.try_get("workflow_id")?,
            contact_id: row.try_get("contact_id")?,
            status: row.try_get("status")?,
            current_step_id: row.try_get("current_step_id")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            exit_reason: row.try_get("exit_reason")?,
            context: row.try_get("context")?,
        })
    }

    fn into_execution(self) -> Result<WorkflowExecution, RepositoryError> {
        let status: WorkflowExecutionStatus = serde_json::from_value(serde_json::Value::String(self.status.clone()))
            .map_err(|_| RepositoryError::Serialization(format!("invalid execution status: {}", self.status)))?;

        Ok(WorkflowExecution {
            id: parse_uuid(&self.id)?,
            workflow_id: parse_uuid(&self.workflow_id)?,
            contact_id: parse_uuid(&self.contact_id)?,
            status,
            current_step_id: self.current_step_id,
            started_at: parse_datetime(&self.started_at)?,
            completed_at: self.completed_at.as_deref().map(parse_datetime).transpose()?,
            exit_reason: self.exit_reason,
            context: serde_json::from_str(&self.context)
                .map_err(|e| RepositoryError::Serialization(format!("invalid context JSON: {e}")))?,
        })
    }
}

struct StepExecutionRow {
    id: String,
    execution_id: String,
    step_id: String,
    status: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    execute_after: Option<String>,
    output: Option<String>,
    error: Option<String>,
    wait_event_name: Option<String>,
}

impl StepExecutionRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            execution_id: row.try_get("execution_id")?,
            step_id: row.try_get("step_id")?,
            status: row.try_get("status")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            execute_after: row.try_get("execute_after")?,
            output: row.try_get("output")?,
            error: row.try_get("error")?,
            wait_event_name: row.try_get("wait_event_name")?,
        })
    }

    fn into_step_execution(self) -> Result<StepExecution, RepositoryError> {
        let status: StepExecutionStatus = serde_json::from_value(serde_json::Value::String(self.status.clone()))
            .map_err(|_| RepositoryError::Serialization(format!("invalid step execution status: {}", self.status)))?;

        Ok(StepExecution {
            id: parse_uuid(&self.id)?,
            execution_id: parse_uuid(&self.execution_id)?,
            step_id: self.step_id,
            status,
            started_at: self.started_at.as_deref().map(parse_datetime).transpose()?,
            completed_at: self.completed_at.as_deref().map(parse_datetime).transpose()?,
            execute_after: self.execute_after.as_deref().map(parse_datetime).transpose()?,
            output: self
                .output
                .as_deref()
                .map(|s| serde_json::from_str(s).map_err(|e| RepositoryError::Serialization(format!("invalid step output: {e}"))))
                .transpose()?,
            error: self.error,
            wait_event_name: self.wait_event_name,
        })
    }
}

// ---------------------------------------------------------------------------
// WorkflowRepository impl
// ---------------------------------------------------------------------------

impl WorkflowRepository for SqliteWorkflowRepository {
    async fn save_definition(&self, def: &WorkflowDefinition) -> Result<(), RepositoryError> {
        let definition_json = serde_json::to_string(def).map_err(|e| RepositoryError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"INSERT INTO workflows (id, project_id, enabled, trigger_event_name, definition, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                 project_id = excluded.project_id,
                 enabled = excluded.enabled,
                 trigger_event_name = excluded.trigger_event_name,
                 definition = excluded.definition,
                 updated_at = excluded.updated_at"#,
        )
        .bind(def.id.to_string())
        .bind(def.project_id.to_string())
        .bind(def.enabled)
        .bind(&def.trigger_event_name)
        .bind(&definition_json)
        .bind(format_datetime(&def.created_at))
        .bind(format_datetime(&def.updated_at))
        .execute(&self.pool.writer)
        .await
        .map_err(backend)?;

        Ok(())
    }

    async fn get_definition(&self, id: &Uuid) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        let row = sqlx::query("SELECT definition FROM workflows WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(backend)?;

        match row {
            Some(row) => Ok(Some(WorkflowDefRow::from_row(&row).map_err(backend)?.into_definition()?)),
            None => Ok(None),
        }
    }

    async fn list_definitions(&self, project_id: &Uuid) -> Result<Vec<WorkflowDefinition>, RepositoryError> {
        let rows = sqlx::query("SELECT definition FROM workflows WHERE project_id = ? ORDER BY created_at ASC")
            .bind(project_id.to_string())
            .fetch_all(&self.pool.reader)
            .await
            .map_err(backend)?;

        rows.iter()
            .map(|row| WorkflowDefRow::from_row(row).map_err(backend)?.into_definition())
            .collect()
    }

    async fn find_enabled_by_trigger(&self, project_id: &Uuid, event_name: &str) -> Result<Vec<WorkflowDefinition>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT definition FROM workflows WHERE project_id = ? AND enabled = 1 AND trigger_event_name = ?",
        )
        .bind(project_id.to_string())
        .bind(event_name)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(backend)?;

        rows.iter()
            .map(|row| WorkflowDefRow::from_row(row).map_err(backend)?.into_definition())
            .collect()
    }

    async fn delete_definition(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM workflows WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_execution(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError> {
        let context_str = serde_json::to_string(&execution.context).map_err(|e| RepositoryError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"INSERT INTO workflow_executions
               (id, workflow_id, contact_id, status, current_step_id, started_at, completed_at, exit_reason, context)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(execution.id.to_string())
        .bind(execution.workflow_id.to_string())
        .bind(execution.contact_id.to_string())
        .bind(status_str(&execution.status)?)
        .bind(&execution.current_step_id)
        .bind(format_datetime(&execution.started_at))
        .bind(execution.completed_at.as_ref().map(format_datetime))
        .bind(&execution.exit_reason)
        .bind(&context_str)
        .execute(&self.pool.writer)
        .await
        .map_err(backend)?;

        Ok(())
    }

    async fn get_execution(&self, id: &Uuid) -> Result<Option<WorkflowExecution>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM workflow_executions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(backend)?;

        match row {
            Some(row) => Ok(Some(ExecutionRow::from_row(&row).map_err(backend)?.into_execution()?)),
            None => Ok(None),
        }
    }

    async fn update_execution(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError> {
        let context_str = serde_json::to_string(&execution.context).map_err(|e| RepositoryError::Serialization(e.to_string()))?;

        let result = sqlx::query(
            r#"UPDATE workflow_executions SET
               status = ?, current_step_id = ?, completed_at = ?, exit_reason = ?, context = ?
               WHERE id = ?"#,
        )
        .bind(status_str(&execution.status)?)
        .bind(&execution.current_step_id)
        .bind(execution.completed_at.as_ref().map(format_datetime))
        .bind(&execution.exit_reason)
        .bind(&context_str)
        .bind(execution.id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn count_executions_for_contact(&self, workflow_id: &Uuid, contact_id: &Uuid) -> Result<u64, RepositoryError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM workflow_executions WHERE workflow_id = ? AND contact_id = ?",
        )
        .bind(workflow_id.to_string())
        .bind(contact_id.to_string())
        .fetch_one(&self.pool.reader)
        .await
        .map_err(backend)?;
        Ok(count as u64)
    }

    async fn has_active_execution_for_contact(&self, workflow_id: &Uuid, contact_id: &Uuid) -> Result<bool, RepositoryError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM workflow_executions WHERE workflow_id = ? AND contact_id = ? AND status IN ('RUNNING', 'WAITING')",
        )
        .bind(workflow_id.to_string())
        .bind(contact_id.to_string())
        .fetch_one(&self.pool.reader)
        .await
        .map_err(backend)?;
        Ok(count > 0)
    }

    async fn list_executions(&self, workflow_id: &Uuid, limit: u32) -> Result<Vec<WorkflowExecution>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM workflow_executions WHERE workflow_id = ? ORDER BY started_at DESC LIMIT ?")
            .bind(workflow_id.to_string())
            .bind(limit as i64)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(backend)?;

        rows.iter()
            .map(|row| ExecutionRow::from_row(row).map_err(backend)?.into_execution())
            .collect()
    }

    async fn list_recent_executions(
        &self,
        project_id: &Uuid,
        contact_id: Option<&Uuid>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<WorkflowExecution>, RepositoryError> {
        let rows = match contact_id {
            Some(contact_id) => sqlx::query(
                r#"SELECT we.* FROM workflow_executions we
                   JOIN workflows w ON w.id = we.workflow_id
                   WHERE w.project_id = ? AND we.contact_id = ? AND we.started_at >= ? AND we.started_at <= ?
                   ORDER BY we.started_at DESC LIMIT ?"#,
            )
            .bind(project_id.to_string())
            .bind(contact_id.to_string())
            .bind(format_datetime(&start))
            .bind(format_datetime(&end))
            .bind(limit as i64)
            .fetch_all(&self.pool.reader)
            .await,
            None => sqlx::query(
                r#"SELECT we.* FROM workflow_executions we
                   JOIN workflows w ON w.id = we.workflow_id
                   WHERE w.project_id = ? AND we.started_at >= ? AND we.started_at <= ?
                   ORDER BY we.started_at DESC LIMIT ?"#,
            )
            .bind(project_id.to_string())
            .bind(format_datetime(&start))
            .bind(format_datetime(&end))
            .bind(limit as i64)
            .fetch_all(&self.pool.reader)
            .await,
        }
        .map_err(backend)?;

        rows.iter()
            .map(|row| ExecutionRow::from_row(row).map_err(backend)?.into_execution())
            .collect()
    }

    async fn claim_step(&self, execution_id: &Uuid, step_id: &str) -> Result<Option<StepExecution>, RepositoryError> {
        let now = Utc::now();

        let promoted = sqlx::query(
            "UPDATE step_executions SET status = 'RUNNING', started_at = ? WHERE execution_id = ? AND step_id = ? AND status = 'PENDING'",
        )
        .bind(format_datetime(&now))
        .bind(execution_id.to_string())
        .bind(step_id)
        .execute(&self.pool.writer)
        .await
        .map_err(backend)?;

        if promoted.rows_affected() > 0 {
            let row = sqlx::query("SELECT * FROM step_executions WHERE execution_id = ? AND step_id = ? ORDER BY rowid DESC LIMIT 1")
                .bind(execution_id.to_string())
                .bind(step_id)
                .fetch_one(&self.pool.reader)
                .await
                .map_err(backend)?;
            return Ok(Some(StepExecutionRow::from_row(&row).map_err(backend)?.into_step_execution()?));
        }

        let already_active: Option<(String,)> = sqlx::query_as(
            "SELECT id FROM step_executions WHERE execution_id = ? AND status IN ('PENDING', 'RUNNING', 'WAITING') LIMIT 1",
        )
        .bind(execution_id.to_string())
        .fetch_optional(&self.pool.writer)
        .await
        .map_err(backend)?;

        if already_active.is_some() {
            return Ok(None);
        }

        let step_execution = engine_core::repository::workflow::new_running_step_execution(*execution_id, step_id, now);
        self.insert_step_execution(&step_execution).await?;
        Ok(Some(step_execution))
    }

    async fn get_step_execution(&self, id: &Uuid) -> Result<Option<StepExecution>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM step_executions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(backend)?;

        match row {
            Some(row) => Ok(Some(StepExecutionRow::from_row(&row).map_err(backend)?.into_step_execution()?)),
            None => Ok(None),
        }
    }

    async fn claim_waiting_step(&self, step_execution_id: &Uuid) -> Result<Option<StepExecution>, RepositoryError> {
        let result = sqlx::query("UPDATE step_executions SET status = 'RUNNING' WHERE id = ? AND status = 'WAITING'")
            .bind(step_execution_id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_step_execution(step_execution_id).await
    }

    async fn update_step_execution(&self, step_execution: &StepExecution) -> Result<(), RepositoryError> {
        let output_str = step_execution
            .output
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?;

        let result = sqlx::query(
            r#"UPDATE step_executions SET
               status = ?, started_at = ?, completed_at = ?, execute_after = ?, output = ?, error = ?, wait_event_name = ?
               WHERE id = ?"#,
        )
        .bind(status_str(&step_execution.status)?)
        .bind(step_execution.started_at.as_ref().map(format_datetime))
        .bind(step_execution.completed_at.as_ref().map(format_datetime))
        .bind(step_execution.execute_after.as_ref().map(format_datetime))
        .bind(&output_str)
        .bind(&step_execution.error)
        .bind(&step_execution.wait_event_name)
        .bind(step_execution.id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn list_step_executions(&self, execution_id: &Uuid) -> Result<Vec<StepExecution>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM step_executions WHERE execution_id = ? ORDER BY rowid ASC")
            .bind(execution_id.to_string())
            .fetch_all(&self.pool.reader)
            .await
            .map_err(backend)?;

        rows.iter()
            .map(|row| StepExecutionRow::from_row(row).map_err(backend)?.into_step_execution())
            .collect()
    }

    async fn count_step_executions(&self, execution_id: &Uuid) -> Result<u64, RepositoryError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM step_executions WHERE execution_id = ?")
            .bind(execution_id.to_string())
            .fetch_one(&self.pool.reader)
            .await
            .map_err(backend)?;
        Ok(count as u64)
    }

    async fn find_waiting_for_event(
        &self,
        project_id: &Uuid,
        event_name: &str,
        contact_id: Option<&Uuid>,
    ) -> Result<Vec<StepExecution>, RepositoryError> {
        let rows = match contact_id {
            Some(contact_id) => sqlx::query(
                r#"SELECT se.* FROM step_executions se
                   JOIN workflow_executions we ON we.id = se.execution_id
                   JOIN workflows w ON w.id = we.workflow_id
                   WHERE w.project_id = ? AND se.status = 'WAITING' AND se.wait_event_name = ? AND we.contact_id = ?"#,
            )
            .bind(project_id.to_string())
            .bind(event_name)
            .bind(contact_id.to_string())
            .fetch_all(&self.pool.reader)
            .await,
            None => sqlx::query(
                r#"SELECT se.* FROM step_executions se
                   JOIN workflow_executions we ON we.id = se.execution_id
                   JOIN workflows w ON w.id = we.workflow_id
                   WHERE w.project_id = ? AND se.status = 'WAITING' AND se.wait_event_name = ?"#,
            )
            .bind(project_id.to_string())
            .bind(event_name)
            .fetch_all(&self.pool.reader)
            .await,
        }
        .map_err(backend)?;

        rows.iter()
            .map(|row| StepExecutionRow::from_row(row).map_err(backend)?.into_step_execution())
            .collect()
    }

    async fn find_overdue_waiting(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<StepExecution>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM step_executions WHERE status = 'WAITING' AND execute_after IS NOT NULL AND execute_after <= ? ORDER BY execute_after ASC LIMIT ?",
        )
        .bind(format_datetime(&now))
        .bind(limit as i64)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(backend)?;

        rows.iter()
            .map(|row| StepExecutionRow::from_row(row).map_err(backend)?.into_step_execution())
            .collect()
    }
}

impl SqliteWorkflowRepository {
    async fn insert_step_execution(&self, step_execution: &StepExecution) -> Result<(), RepositoryError> {
        let output_str = step_execution
            .output
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"INSERT INTO step_executions
               (id, execution_id, step_id, status, started_at, completed_at, execute_after, output, error, wait_event_name)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(step_execution.id.to_string())
        .bind(step_execution.execution_id.to_string())
        .bind(&step_execution.step_id)
        .bind(status_str(&step_execution.status)?)
        .bind(step_execution.started_at.as_ref().map(format_datetime))
        .bind(step_execution.completed_at.as_ref().map(format_datetime))
        .bind(step_execution.execute_after.as_ref().map(format_datetime))
        .bind(&output_str)
        .bind(&step_execution.error)
        .bind(&step_execution.wait_event_name)
        .execute(&self.pool.writer)
        .await
        .map_err(backend)?;

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
