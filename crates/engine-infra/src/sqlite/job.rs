//! SQLite job queue repository implementation.
//!
//! `claim_due` follows the same UPDATE-then-SELECT idiom as
//! `workflow::claim_step`: a single `UPDATE ... WHERE status = 'PENDING' AND
//! run_at <= ?` flips the claimed rows to RUNNING, relying on the writer
//! pool's single connection to serialize it against any concurrent poller.

use chrono::{DateTime, Utc};
use engine_core::repository::job::JobRepository;
use engine_types::error::RepositoryError;
use engine_types::job::{Job, JobPayload, JobStatus};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;

#[derive(Clone)]
pub struct SqliteJobRepository {
    pool: DatabasePool,
}

impl SqliteJobRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

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

struct JobRow {
    id: String,
    payload: String,
    run_at: String,
    status: String,
    attempts: i64,
    max_attempts: i64,
    dedupe_key: Option<String>,
    last_error: Option<String>,
    created_at: String,
}

impl JobRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            payload: row.try_get("payload")?,
            run_at: row.try_get("run_at")?,
            status: row.try_get("status")?,
            attempts: row.try_get("attempts")?,
            max_attempts: row.try_get("max_attempts")?,
            dedupe_key: row.try_get("dedupe_key")?,
            last_error: row.try_get("last_error")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn into_job(self) -> Result<Job, RepositoryError> {
        let payload: JobPayload = serde_json::from_str(&self.payload)
            .map_err(|e| RepositoryError::Serialization(format!("invalid job payload JSON: {e}")))?;
        let status: JobStatus = serde_json::from_value(serde_json::Value::String(self.status.clone()))
            .map_err(|_| RepositoryError::Serialization(format!("invalid job status: {}", self.status)))?;

        Ok(Job {
            id: parse_uuid(&self.id)?,
            payload,
            run_at: parse_datetime(&self.run_at)?,
            status,
            attempts: self.attempts as u32,
            max_attempts: self.max_attempts as u32,
            dedupe_key: self.dedupe_key,
            last_error: self.last_error,
            created_at: parse_datetime(&self.created_at)?,
        })
    }
}

impl JobRepository for SqliteJobRepository {
    async fn enqueue(&self, job: &Job) -> Result<(), RepositoryError> {
        let payload_str = serde_json::to_string(&job.payload).map_err(|e| RepositoryError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"INSERT INTO jobs (id, payload, run_at, status, attempts, max_attempts, dedupe_key, last_error, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(job.id.to_string())
        .bind(&payload_str)
        .bind(format_datetime(&job.run_at))
        .bind(status_str(&job.status)?)
        .bind(job.attempts as i64)
        .bind(job.max_attempts as i64)
        .bind(&job.dedupe_key)
        .bind(&job.last_error)
        .bind(format_datetime(&job.created_at))
        .execute(&self.pool.writer)
        .await
        .map_err(backend)?;

        Ok(())
    }

    async fn claim_due(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<Job>, RepositoryError> {
        let due: Vec<(String,)> = sqlx::query_as(
            "SELECT id FROM jobs WHERE status = 'PENDING' AND run_at <= ? ORDER BY run_at ASC LIMIT ?",
        )
        .bind(format_datetime(&now))
        .bind(limit as i64)
        .fetch_all(&self.pool.writer)
        .await
        .map_err(backend)?;

        if due.is_empty() {
            return Ok(vec![]);
        }

        let mut claimed = Vec::with_capacity(due.len());
        for (id,) in due {
            let result = sqlx::query("UPDATE jobs SET status = 'RUNNING' WHERE id = ? AND status = 'PENDING'")
                .bind(&id)
                .execute(&self.pool.writer)
                .await
                .map_err(backend)?;
            if result.rows_affected() == 0 {
                continue;
            }
            let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
                .bind(&id)
                .fetch_one(&self.pool.reader)
                .await
                .map_err(backend)?;
            claimed.push(JobRow::from_row(&row).map_err(backend)?.into_job()?);
        }
        Ok(claimed)
    }

    async fn get(&self, id: &Uuid) -> Result<Option<Job>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(backend)?;

        match row {
            Some(row) => Ok(Some(JobRow::from_row(&row).map_err(backend)?.into_job()?)),
            None => Ok(None),
        }
    }

    async fn mark_completed(&self, id: &Uuid) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE jobs SET status = 'COMPLETED' WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn mark_failed_retryable(&self, id: &Uuid, error: &str, retry_at: DateTime<Utc>) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'PENDING', attempts = attempts + 1, last_error = ?, run_at = ? WHERE id = ?",
        )
        .bind(error)
        .bind(format_datetime(&retry_at))
        .bind(id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn mark_dead_lettered(&self, id: &Uuid, error: &str) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE jobs SET status = 'DEAD_LETTER', attempts = attempts + 1, last_error = ? WHERE id = ?")
            .bind(error)
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn cancel_by_key(&self, dedupe_key: &str) -> Result<bool, RepositoryError> {
        let result = sqlx::query("UPDATE jobs SET status = 'CANCELLED' WHERE dedupe_key = ? AND status = 'PENDING'")
            .bind(dedupe_key)
            .execute(&self.pool.writer)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected() > 0)
    }
}
