//! SQLite email template repository implementation.

use engine_core::repository::template::TemplateRepository;
use engine_types::error::RepositoryError;
use engine_types::template::EmailTemplate;
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;

#[derive(Clone)]
pub struct SqliteTemplateRepository {
    pool: DatabasePool,
}

impl SqliteTemplateRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

fn backend(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Backend(e.to_string())
}

impl TemplateRepository for SqliteTemplateRepository {
    async fn get_template(&self, id: &str) -> Result<Option<EmailTemplate>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM templates WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(backend)?;

        let Some(row) = row else { return Ok(None) };

        let project_id: String = row.try_get("project_id").map_err(backend)?;
        let project_id: Uuid =
            project_id.parse().map_err(|e| RepositoryError::Serialization(format!("invalid UUID: {e}")))?;

        Ok(Some(EmailTemplate {
            id: row.try_get("id").map_err(backend)?,
            project_id,
            subject: row.try_get("subject").map_err(backend)?,
            body: row.try_get("body").map_err(backend)?,
            from: row.try_get("from_address").map_err(backend)?,
            reply_to: row.try_get("reply_to").map_err(backend)?,
            transactional: {
                let flag: i64 = row.try_get("transactional").map_err(backend)?;
                flag != 0
            },
        }))
    }
}
