//! SQLite event repository implementation.

use chrono::{DateTime, Utc};
use engine_core::repository::event::EventRepository;
use engine_types::error::RepositoryError;
use engine_types::event::Event;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;

#[derive(Clone)]
pub struct SqliteEventRepository {
    pool: DatabasePool,
}

impl SqliteEventRepository {
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

struct EventRow {
    id: String,
    project_id: String,
    contact_id: Option<String>,
    email_id: Option<String>,
    name: String,
    data: String,
    created_at: String,
}

impl EventRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            project_id: row.try_get("project_id")?,
            contact_id: row.try_get("contact_id")?,
            email_id: row.try_get("email_id")?,
            name: row.try_get("name")?,
            data: row.try_get("data")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn into_event(self) -> Result<Event, RepositoryError> {
        Ok(Event {
            id: parse_uuid(&self.id)?,
            project_id: parse_uuid(&self.project_id)?,
            contact_id: self.contact_id.as_deref().map(parse_uuid).transpose()?,
            email_id: self.email_id.as_deref().map(parse_uuid).transpose()?,
            name: self.name,
            data: serde_json::from_str(&self.data).map_err(|e| RepositoryError::Serialization(format!("invalid event data JSON: {e}")))?,
            created_at: parse_datetime(&self.created_at)?,
        })
    }
}

impl EventRepository for SqliteEventRepository {
    async fn append_event(&self, event: &Event) -> Result<(), RepositoryError> {
        let data_str = serde_json::to_string(&event.data).map_err(|e| RepositoryError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"INSERT INTO events (id, project_id, contact_id, email_id, name, data, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(event.id.to_string())
        .bind(event.project_id.to_string())
        .bind(event.contact_id.map(|id| id.to_string()))
        .bind(event.email_id.map(|id| id.to_string()))
        .bind(&event.name)
        .bind(&data_str)
        .bind(format_datetime(&event.created_at))
        .execute(&self.pool.writer)
        .await
        .map_err(backend)?;

        Ok(())
    }

    async fn list_recent(
        &self,
        project_id: &Uuid,
        contact_id: Option<&Uuid>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Event>, RepositoryError> {
        let rows = match contact_id {
            Some(contact_id) => sqlx::query(
                "SELECT * FROM events WHERE project_id = ? AND contact_id = ? AND created_at >= ? AND created_at <= ? ORDER BY created_at DESC LIMIT ?",
            )
            .bind(project_id.to_string())
            .bind(contact_id.to_string())
            .bind(format_datetime(&start))
            .bind(format_datetime(&end))
            .bind(limit as i64)
            .fetch_all(&self.pool.reader)
            .await,
            None => sqlx::query(
                "SELECT * FROM events WHERE project_id = ? AND created_at >= ? AND created_at <= ? ORDER BY created_at DESC LIMIT ?",
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
            .map(|row| EventRow::from_row(row).map_err(backend)?.into_event())
            .collect()
    }

    async fn count_since(&self, project_id: &Uuid, since: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM events WHERE project_id = ? AND created_at >= ?")
            .bind(project_id.to_string())
            .bind(format_datetime(&since))
            .fetch_one(&self.pool.reader)
            .await
            .map_err(backend)?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn test_pool() -> DatabasePool {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        std::mem::forget(dir);
        DatabasePool::new(&url).await.unwrap()
    }

    fn sample_event(project_id: Uuid, contact_id: Uuid) -> Event {
        Event {
            id: Uuid::now_v7(),
            project_id,
            contact_id: Some(contact_id),
            email_id: None,
            name: "signup".to_string(),
            data: json!({"plan": "free"}),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn append_and_list_recent_roundtrips() {
        let pool = test_pool().await;
        let project_id = Uuid::now_v7();
        let contact_id = Uuid::now_v7();
        let repo = SqliteEventRepository::new(pool);
        let event = sample_event(project_id, contact_id);

        repo.append_event(&event).await.unwrap();

        let start = Utc::now() - chrono::Duration::hours(1);
        let end = Utc::now() + chrono::Duration::hours(1);
        let found = repo.list_recent(&project_id, Some(&contact_id), start, end, 10).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "signup");
    }

    #[tokio::test]
    async fn count_since_counts_only_events_after_cutoff() {
        let pool = test_pool().await;
        let project_id = Uuid::now_v7();
        let repo = SqliteEventRepository::new(pool);

        let mut old = sample_event(project_id, Uuid::now_v7());
        old.created_at = Utc::now() - chrono::Duration::days(5);
        repo.append_event(&old).await.unwrap();
        repo.append_event(&sample_event(project_id, Uuid::now_v7())).await.unwrap();

        let since = Utc::now() - chrono::Duration::days(1);
        assert_eq!(repo.count_since(&project_id, since).await.unwrap(), 1);
    }
}
