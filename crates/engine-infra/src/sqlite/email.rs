//! SQLite email repository implementation.

use chrono::{DateTime, Utc};
use engine_core::repository::email::EmailRepository;
use engine_types::email::{Email, EmailSourceType, EmailStatus};
use engine_types::error::RepositoryError;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;

#[derive(Clone)]
pub struct SqliteEmailRepository {
    pool: DatabasePool,
}

impl SqliteEmailRepository {
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

struct EmailRow {
    id: String,
    project_id: String,
    contact_id: String,
    template_ref: Option<String>,
    campaign_id: Option<String>,
    workflow_execution_id: Option<String>,
    workflow_step_execution_id: Option<String>,
    source_type: String,
    subject: String,
    body: String,
    from_address: String,
    reply_to: Option<String>,
    status: String,
    sent_at: Option<String>,
    delivered_at: Option<String>,
    opened_at: Option<String>,
    clicked_at: Option<String>,
    bounced_at: Option<String>,
    complained_at: Option<String>,
    opens: i64,
    clicks: i64,
    message_id: Option<String>,
    error: Option<String>,
}

impl EmailRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            project_id: row.try_get("project_id")?,
            contact_id: row.try_get("contact_id")?,
            template_ref: row.try_get("template_ref")?,
            campaign_id: row.try_get("campaign_id")?,
            workflow_execution_id: row.try_get("workflow_execution_id")?,
            workflow_step_execution_id: row.try_get("workflow_step_execution_id")?,
            source_type: row.try_get("source_type")?,
            subject: row.try_get("subject")?,
            body: row.try_get("body")?,
            from_address: row.try_get("from_address")?,
            reply_to: row.try_get("reply_to")?,
            status: row.try_get("status")?,
            sent_at: row.try_get("sent_at")?,
            delivered_at: row.try_get("delivered_at")?,
            opened_at: row.try_get("opened_at")?,
            clicked_at: row.try_get("clicked_at")?,
            bounced_at: row.try_get("bounced_at")?,
            complained_at: row.try_get("complained_at")?,
            opens: row.try_get("opens")?,
            clicks: row.try_get("clicks")?,
            message_id: row.try_get("message_id")?,
            error: row.try_get("error")?,
        })
    }

    fn into_email(self) -> Result<Email, RepositoryError> {
        let source_type: EmailSourceType = serde_json::from_value(serde_json::Value::String(self.source_type.clone()))
            .map_err(|_| RepositoryError::Serialization(format!("invalid source type: {}", self.source_type)))?;
        let status: EmailStatus = serde_json::from_value(serde_json::Value::String(self.status.clone()))
            .map_err(|_| RepositoryError::Serialization(format!("invalid email status: {}", self.status)))?;

        Ok(Email {
            id: parse_uuid(&self.id)?,
            project_id: parse_uuid(&self.project_id)?,
            contact_id: parse_uuid(&self.contact_id)?,
            template_ref: self.template_ref,
            campaign_id: self.campaign_id.as_deref().map(parse_uuid).transpose()?,
            workflow_execution_id: self.workflow_execution_id.as_deref().map(parse_uuid).transpose()?,
            workflow_step_execution_id: self.workflow_step_execution_id.as_deref().map(parse_uuid).transpose()?,
            source_type,
            subject: self.subject,
            body: self.body,
            from: self.from_address,
            reply_to: self.reply_to,
            status,
            sent_at: self.sent_at.as_deref().map(parse_datetime).transpose()?,
            delivered_at: self.delivered_at.as_deref().map(parse_datetime).transpose()?,
            opened_at: self.opened_at.as_deref().map(parse_datetime).transpose()?,
            clicked_at: self.clicked_at.as_deref().map(parse_datetime).transpose()?,
            bounced_at: self.bounced_at.as_deref().map(parse_datetime).transpose()?,
            complained_at: self.complained_at.as_deref().map(parse_datetime).transpose()?,
            opens: self.opens as u32,
            clicks: self.clicks as u32,
            message_id: self.message_id,
            error: self.error,
        })
    }
}

impl EmailRepository for SqliteEmailRepository {
    async fn create_email(&self, email: &Email) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO emails
               (id, project_id, contact_id, template_ref, campaign_id, workflow_execution_id, workflow_step_execution_id,
                source_type, subject, body, from_address, reply_to, status, sent_at, delivered_at, opened_at, clicked_at,
                bounced_at, complained_at, opens, clicks, message_id, error)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(email.id.to_string())
        .bind(email.project_id.to_string())
        .bind(email.contact_id.to_string())
        .bind(&email.template_ref)
        .bind(email.campaign_id.map(|id| id.to_string()))
        .bind(email.workflow_execution_id.map(|id| id.to_string()))
        .bind(email.workflow_step_execution_id.map(|id| id.to_string()))
        .bind(status_str(&email.source_type)?)
        .bind(&email.subject)
        .bind(&email.body)
        .bind(&email.from)
        .bind(&email.reply_to)
        .bind(status_str(&email.status)?)
        .bind(email.sent_at.as_ref().map(format_datetime))
        .bind(email.delivered_at.as_ref().map(format_datetime))
        .bind(email.opened_at.as_ref().map(format_datetime))
        .bind(email.clicked_at.as_ref().map(format_datetime))
        .bind(email.bounced_at.as_ref().map(format_datetime))
        .bind(email.complained_at.as_ref().map(format_datetime))
        .bind(email.opens as i64)
        .bind(email.clicks as i64)
        .bind(&email.message_id)
        .bind(&email.error)
        .execute(&self.pool.writer)
        .await
        .map_err(backend)?;

        Ok(())
    }

    async fn get_email(&self, id: &Uuid) -> Result<Option<Email>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM emails WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(backend)?;

        match row {
            Some(row) => Ok(Some(EmailRow::from_row(&row).map_err(backend)?.into_email()?)),
            None => Ok(None),
        }
    }

    async fn update_email(&self, email: &Email) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"UPDATE emails SET
               status = ?, sent_at = ?, delivered_at = ?, opened_at = ?, clicked_at = ?, bounced_at = ?, complained_at = ?,
               opens = ?, clicks = ?, message_id = ?, error = ?
               WHERE id = ?"#,
        )
        .bind(status_str(&email.status)?)
        .bind(email.sent_at.as_ref().map(format_datetime))
        .bind(email.delivered_at.as_ref().map(format_datetime))
        .bind(email.opened_at.as_ref().map(format_datetime))
        .bind(email.clicked_at.as_ref().map(format_datetime))
        .bind(email.bounced_at.as_ref().map(format_datetime))
        .bind(email.complained_at.as_ref().map(format_datetime))
        .bind(email.opens as i64)
        .bind(email.clicks as i64)
        .bind(&email.message_id)
        .bind(&email.error)
        .bind(email.id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn list_recent(
        &self,
        project_id: &Uuid,
        contact_id: Option<&Uuid>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Email>, RepositoryError> {
        let start_s = format_datetime(&start);
        let end_s = format_datetime(&end);

        let timestamp_in_range = "(
            (sent_at IS NOT NULL AND sent_at >= ? AND sent_at <= ?) OR
            (delivered_at IS NOT NULL AND delivered_at >= ? AND delivered_at <= ?) OR
            (opened_at IS NOT NULL AND opened_at >= ? AND opened_at <= ?) OR
            (clicked_at IS NOT NULL AND clicked_at >= ? AND clicked_at <= ?) OR
            (bounced_at IS NOT NULL AND bounced_at >= ? AND bounced_at <= ?)
        )";

        let rows = match contact_id {
            Some(contact_id) => {
                let sql = format!(
                    "SELECT * FROM emails WHERE project_id = ? AND contact_id = ? AND {timestamp_in_range} ORDER BY rowid DESC LIMIT ?"
                );
                sqlx::query(&sql)
                    .bind(project_id.to_string())
                    .bind(contact_id.to_string())
                    .bind(&start_s)
                    .bind(&end_s)
                    .bind(&start_s)
                    .bind(&end_s)
                    .bind(&start_s)
                    .bind(&end_s)
                    .bind(&start_s)
                    .bind(&end_s)
                    .bind(&start_s)
                    .bind(&end_s)
                    .bind(limit as i64)
                    .fetch_all(&self.pool.reader)
                    .await
            }
            None => {
                let sql = format!("SELECT * FROM emails WHERE project_id = ? AND {timestamp_in_range} ORDER BY rowid DESC LIMIT ?");
                sqlx::query(&sql)
                    .bind(project_id.to_string())
                    .bind(&start_s)
                    .bind(&end_s)
                    .bind(&start_s)
                    .bind(&end_s)
                    .bind(&start_s)
                    .bind(&end_s)
                    .bind(&start_s)
                    .bind(&end_s)
                    .bind(&start_s)
                    .bind(&end_s)
                    .bind(limit as i64)
                    .fetch_all(&self.pool.reader)
                    .await
            }
        }
        .map_err(backend)?;

        rows.iter()
            .map(|row| EmailRow::from_row(row).map_err(backend)?.into_email())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_pool() -> DatabasePool {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        std::mem::forget(dir);
        DatabasePool::new(&url).await.unwrap()
    }

    fn sample_email(project_id: Uuid, contact_id: Uuid) -> Email {
        Email {
            id: Uuid::now_v7(),
            project_id,
            contact_id,
            template_ref: Some("welcome-tpl".to_string()),
            campaign_id: None,
            workflow_execution_id: None,
            workflow_step_execution_id: None,
            source_type: EmailSourceType::Workflow,
            subject: "Welcome".to_string(),
            body: "Hi there".to_string(),
            from: "hello@example.com".to_string(),
            reply_to: None,
            status: EmailStatus::Pending,
            sent_at: None,
            delivered_at: None,
            opened_at: None,
            clicked_at: None,
            bounced_at: None,
            complained_at: None,
            opens: 0,
            clicks: 0,
            message_id: None,
            error: None,
        }
    }

    #[tokio::test]
    async fn create_and_get_email_roundtrips() {
        let pool = test_pool().await;
        let repo = SqliteEmailRepository::new(pool);
        let email = sample_email(Uuid::now_v7(), Uuid::now_v7());

        repo.create_email(&email).await.unwrap();
        let loaded = repo.get_email(&email.id).await.unwrap().unwrap();
        assert_eq!(loaded.subject, "Welcome");
        assert_eq!(loaded.status, EmailStatus::Pending);
    }

    #[tokio::test]
    async fn update_email_advances_status_and_timestamps() {
        let pool = test_pool().await;
        let repo = SqliteEmailRepository::new(pool);
        let mut email = sample_email(Uuid::now_v7(), Uuid::now_v7());
        repo.create_email(&email).await.unwrap();

        email.status = EmailStatus::Sent;
        email.sent_at = Some(Utc::now());
        repo.update_email(&email).await.unwrap();

        let loaded = repo.get_email(&email.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, EmailStatus::Sent);
        assert!(loaded.sent_at.is_some());
    }

    #[tokio::test]
    async fn list_recent_filters_by_timestamp_window() {
        let pool = test_pool().await;
        let project_id = Uuid::now_v7();
        let contact_id = Uuid::now_v7();
        let repo = SqliteEmailRepository::new(pool);

        let mut old = sample_email(project_id, contact_id);
        old.status = EmailStatus::Sent;
        old.sent_at = Some(Utc::now() - chrono::Duration::days(10));
        repo.create_email(&old).await.unwrap();

        let mut recent = sample_email(project_id, contact_id);
        recent.status = EmailStatus::Sent;
        recent.sent_at = Some(Utc::now());
        repo.create_email(&recent).await.unwrap();

        let window_start = Utc::now() - chrono::Duration::days(1);
        let window_end = Utc::now() + chrono::Duration::days(1);
        let found = repo.list_recent(&project_id, Some(&contact_id), window_start, window_end, 10).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, recent.id);
    }
}
