//! SQLite contact repository implementation.
//!
//! `count_audience`/`page_audience` translate an `AudienceFilter` list into a
//! dynamic `WHERE` clause over the `contacts.data` JSON column using SQLite's
//! `json_extract`, rather than loading every contact and filtering in Rust --
//! the same reasoning as `workflow::claim_step` pushing the invariant down
//! into SQL instead of a read-then-check round trip.

use engine_core::repository::contact::ContactRepository;
use engine_types::contact::{AudienceFilter, Contact, Segment};
use engine_types::error::RepositoryError;
use engine_types::workflow::ConditionOperator;
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Arguments, Row};
use uuid::Uuid;

use super::pool::DatabasePool;

#[derive(Clone)]
pub struct SqliteContactRepository {
    pool: DatabasePool,
}

impl SqliteContactRepository {
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

fn parse_datetime(s: &str) -> Result<chrono::DateTime<chrono::Utc>, RepositoryError> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| RepositoryError::Serialization(format!("invalid datetime: {e}")))
}

struct ContactRow {
    id: String,
    project_id: String,
    email: String,
    subscribed: i64,
    data: String,
    created_at: String,
    updated_at: String,
}

impl ContactRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            project_id: row.try_get("project_id")?,
            email: row.try_get("email")?,
            subscribed: row.try_get("subscribed")?,
            data: row.try_get("data")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_contact(self) -> Result<Contact, RepositoryError> {
        Ok(Contact {
            id: parse_uuid(&self.id)?,
            project_id: parse_uuid(&self.project_id)?,
            email: self.email,
            subscribed: self.subscribed != 0,
            data: serde_json::from_str(&self.data).map_err(|e| RepositoryError::Serialization(format!("invalid contact data JSON: {e}")))?,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

/// Build the SQL predicate (and bound arguments) for an `AudienceFilter` list
/// applied against `contacts.data`. Each filter becomes one `json_extract`
/// comparison; filters AND together. `Contains`/`NotContains` fall back to a
/// `LIKE` substring match since SQLite has no native array-membership operator
/// over arbitrary JSON arrays.
fn build_filter_predicate(filters: &[AudienceFilter]) -> (String, Vec<(String, Value)>) {
    let mut clauses = Vec::new();
    let mut binds = Vec::new();

    for filter in filters {
        let path = format!("$.{}", filter.field);
        let column = format!("json_extract(data, '{path}')");
        match filter.operator {
            ConditionOperator::Equals => {
                clauses.push(format!("{column} = ?"));
                binds.push((filter.field.clone(), filter.value.clone()));
            }
            ConditionOperator::NotEquals => {
                clauses.push(format!("({column} IS NULL OR {column} != ?)"));
                binds.push((filter.field.clone(), filter.value.clone()));
            }
            ConditionOperator::Exists => {
                clauses.push(format!("{column} IS NOT NULL"));
            }
            ConditionOperator::NotExists => {
                clauses.push(format!("{column} IS NULL"));
            }
            ConditionOperator::Contains => {
                clauses.push(format!("{column} LIKE ?"));
                binds.push((filter.field.clone(), Value::String(format!("%{}%", filter.value.as_str().unwrap_or_default()))));
            }
            ConditionOperator::NotContains => {
                clauses.push(format!("({column} IS NULL OR {column} NOT LIKE ?)"));
                binds.push((filter.field.clone(), Value::String(format!("%{}%", filter.value.as_str().unwrap_or_default()))));
            }
            ConditionOperator::GreaterThan => {
                clauses.push(format!("{column} > ?"));
                binds.push((filter.field.clone(), filter.value.clone()));
            }
            ConditionOperator::LessThan => {
                clauses.push(format!("{column} < ?"));
                binds.push((filter.field.clone(), filter.value.clone()));
            }
        }
    }

    (clauses.join(" AND "), binds)
}

fn bind_value<'q>(mut args: sqlx::sqlite::SqliteArguments<'q>, value: &Value) -> sqlx::sqlite::SqliteArguments<'q> {
    match value {
        Value::String(s) => {
            let _ = args.add(s.clone());
        }
        Value::Number(n) if n.is_i64() => {
            let _ = args.add(n.as_i64().unwrap());
        }
        Value::Number(n) => {
            let _ = args.add(n.as_f64().unwrap_or_default());
        }
        Value::Bool(b) => {
            let _ = args.add(*b as i64);
        }
        other => {
            let _ = args.add(other.to_string());
        }
    }
    args
}

impl ContactRepository for SqliteContactRepository {
    async fn get_contact(&self, id: &Uuid) -> Result<Option<Contact>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM contacts WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(backend)?;

        match row {
            Some(row) => Ok(Some(ContactRow::from_row(&row).map_err(backend)?.into_contact()?)),
            None => Ok(None),
        }
    }

    async fn update_contact_data(&self, id: &Uuid, data: &Value) -> Result<(), RepositoryError> {
        let data_str = serde_json::to_string(data).map_err(|e| RepositoryError::Serialization(e.to_string()))?;
        let result = sqlx::query("UPDATE contacts SET data = ?, updated_at = ? WHERE id = ?")
            .bind(&data_str)
            .bind(chrono::Utc::now().to_rfc3339())
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn get_segment(&self, id: &Uuid) -> Result<Option<Segment>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM segments WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(backend)?;

        let Some(row) = row else { return Ok(None) };
        let id: String = row.try_get("id").map_err(backend)?;
        let project_id: String = row.try_get("project_id").map_err(backend)?;
        let name: String = row.try_get("name").map_err(backend)?;
        let filters: String = row.try_get("filters").map_err(backend)?;

        Ok(Some(Segment {
            id: parse_uuid(&id)?,
            project_id: parse_uuid(&project_id)?,
            name,
            filters: serde_json::from_str(&filters).map_err(|e| RepositoryError::Serialization(format!("invalid segment filters JSON: {e}")))?,
        }))
    }

    async fn count_audience(&self, project_id: &Uuid, filters: &[AudienceFilter]) -> Result<u64, RepositoryError> {
        let (predicate, binds) = build_filter_predicate(filters);
        let sql = if predicate.is_empty() {
            "SELECT COUNT(*) FROM contacts WHERE project_id = ? AND subscribed = 1".to_string()
        } else {
            format!("SELECT COUNT(*) FROM contacts WHERE project_id = ? AND subscribed = 1 AND {predicate}")
        };

        let mut args = sqlx::sqlite::SqliteArguments::default();
        let _ = args.add(project_id.to_string());
        let mut args = args;
        for (_, value) in &binds {
            args = bind_value(args, value);
        }

        let (count,): (i64,) = sqlx::query_as_with(&sql, args).fetch_one(&self.pool.reader).await.map_err(backend)?;
        Ok(count as u64)
    }

    async fn page_audience(
        &self,
        project_id: &Uuid,
        filters: &[AudienceFilter],
        after: Option<&Uuid>,
        limit: u32,
    ) -> Result<Vec<Contact>, RepositoryError> {
        let (predicate, binds) = build_filter_predicate(filters);
        let mut sql = "SELECT * FROM contacts WHERE project_id = ? AND subscribed = 1".to_string();
        if !predicate.is_empty() {
            sql.push_str(" AND ");
            sql.push_str(&predicate);
        }
        if after.is_some() {
            sql.push_str(" AND id > ?");
        }
        sql.push_str(" ORDER BY id ASC LIMIT ?");

        let mut args = sqlx::sqlite::SqliteArguments::default();
        let _ = args.add(project_id.to_string());
        let mut args = args;
        for (_, value) in &binds {
            args = bind_value(args, value);
        }
        if let Some(after) = after {
            let _ = args.add(after.to_string());
        }
        let _ = args.add(limit as i64);

        let rows = sqlx::query_with(&sql, args).fetch_all(&self.pool.reader).await.map_err(backend)?;
        rows.iter()
            .map(|row| ContactRow::from_row(row).map_err(backend)?.into_contact())
            .collect()
    }
}
