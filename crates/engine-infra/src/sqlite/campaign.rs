//! SQLite campaign repository implementation.
//!
//! `increment_counts` is the one method worth calling out: it issues a single
//! `UPDATE ... SET sent_count = sent_count + ?` rather than reading the row,
//! adding in Rust, and writing it back, so concurrent batch jobs incrementing
//! the same campaign never lose an update.

use chrono::{DateTime, Utc};
use engine_core::repository::campaign::CampaignRepository;
use engine_types::campaign::{AudienceType, Campaign, CampaignStatus};
use engine_types::contact::AudienceFilter;
use engine_types::error::RepositoryError;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;

#[derive(Clone)]
pub struct SqliteCampaignRepository {
    pool: DatabasePool,
}

impl SqliteCampaignRepository {
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

struct CampaignRow {
    id: String,
    project_id: String,
    name: String,
    subject: String,
    body: String,
    from_address: String,
    reply_to: Option<String>,
    audience_type: String,
    segment_id: Option<String>,
    audience_filter: String,
    status: String,
    scheduled_for: Option<String>,
    total_recipients: i64,
    sent_count: i64,
    delivered_count: i64,
    opened_count: i64,
    clicked_count: i64,
    bounced_count: i64,
    sent_at: Option<String>,
}

impl CampaignRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            project_id: row.try_get("project_id")?,
            name: row.try_get("name")?,
            subject: row.try_get("subject")?,
            body: row.try_get("body")?,
            from_address: row.try_get("from_address")?,
            reply_to: row.try_get("reply_to")?,
            audience_type: row.try_get("audience_type")?,
            segment_id: row.try_get("segment_id")?,
            audience_filter: row.try_get("audience_filter")?,
            status: row.try_get("status")?,
            scheduled_for: row.try_get("scheduled_for")?,
            total_recipients: row.try_get("total_recipients")?,
            sent_count: row.try_get("sent_count")?,
            delivered_count: row.try_get("delivered_count")?,
            opened_count: row.try_get("opened_count")?,
            clicked_count: row.try_get("clicked_count")?,
            bounced_count: row.try_get("bounced_count")?,
            sent_at: row.try_get("sent_at")?,
        })
    }

    fn into_campaign(self) -> Result<Campaign, RepositoryError> {
        let audience_type: AudienceType = serde_json::from_value(serde_json::Value::String(self.audience_type.clone()))
            .map_err(|_| RepositoryError::Serialization(format!("invalid audience type: {}", self.audience_type)))?;
        let status: CampaignStatus = serde_json::from_value(serde_json::Value::String(self.status.clone()))
            .map_err(|_| RepositoryError::Serialization(format!("invalid campaign status: {}", self.status)))?;
        let audience_filter: Vec<AudienceFilter> = serde_json::from_str(&self.audience_filter)
            .map_err(|e| RepositoryError::Serialization(format!("invalid audience filter JSON: {e}")))?;

        Ok(Campaign {
            id: parse_uuid(&self.id)?,
            project_id: parse_uuid(&self.project_id)?,
            name: self.name,
            subject: self.subject,
            body: self.body,
            from: self.from_address,
            reply_to: self.reply_to,
            audience_type,
            segment_id: self.segment_id.as_deref().map(parse_uuid).transpose()?,
            audience_filter,
            status,
            scheduled_for: self.scheduled_for.as_deref().map(parse_datetime).transpose()?,
            total_recipients: self.total_recipients as u32,
            sent_count: self.sent_count as u32,
            delivered_count: self.delivered_count as u32,
            opened_count: self.opened_count as u32,
            clicked_count: self.clicked_count as u32,
            bounced_count: self.bounced_count as u32,
            sent_at: self.sent_at.as_deref().map(parse_datetime).transpose()?,
        })
    }
}

impl CampaignRepository for SqliteCampaignRepository {
    async fn create_campaign(&self, campaign: &Campaign) -> Result<(), RepositoryError> {
        let audience_filter_json =
            serde_json::to_string(&campaign.audience_filter).map_err(|e| RepositoryError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"INSERT INTO campaigns
               (id, project_id, name, subject, body, from_address, reply_to, audience_type, segment_id, audience_filter,
                status, scheduled_for, total_recipients, sent_count, delivered_count, opened_count, clicked_count, bounced_count, sent_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(campaign.id.to_string())
        .bind(campaign.project_id.to_string())
        .bind(&campaign.name)
        .bind(&campaign.subject)
        .bind(&campaign.body)
        .bind(&campaign.from)
        .bind(&campaign.reply_to)
        .bind(status_str(&campaign.audience_type)?)
        .bind(campaign.segment_id.map(|id| id.to_string()))
        .bind(&audience_filter_json)
        .bind(status_str(&campaign.status)?)
        .bind(campaign.scheduled_for.as_ref().map(format_datetime))
        .bind(campaign.total_recipients as i64)
        .bind(campaign.sent_count as i64)
        .bind(campaign.delivered_count as i64)
        .bind(campaign.opened_count as i64)
        .bind(campaign.clicked_count as i64)
        .bind(campaign.bounced_count as i64)
        .bind(campaign.sent_at.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await
        .map_err(backend)?;

        Ok(())
    }

    async fn get_campaign(&self, id: &Uuid) -> Result<Option<Campaign>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM campaigns WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(backend)?;

        match row {
            Some(row) => Ok(Some(CampaignRow::from_row(&row).map_err(backend)?.into_campaign()?)),
            None => Ok(None),
        }
    }

    async fn update_campaign(&self, campaign: &Campaign) -> Result<(), RepositoryError> {
        let audience_filter_json =
            serde_json::to_string(&campaign.audience_filter).map_err(|e| RepositoryError::Serialization(e.to_string()))?;

        let result = sqlx::query(
            r#"UPDATE campaigns SET
               name = ?, subject = ?, body = ?, from_address = ?, reply_to = ?, audience_type = ?, segment_id = ?,
               audience_filter = ?, status = ?, scheduled_for = ?, total_recipients = ?, sent_count = ?,
               delivered_count = ?, opened_count = ?, clicked_count = ?, bounced_count = ?, sent_at = ?
               WHERE id = ?"#,
        )
        .bind(&campaign.name)
        .bind(&campaign.subject)
        .bind(&campaign.body)
        .bind(&campaign.from)
        .bind(&campaign.reply_to)
        .bind(status_str(&campaign.audience_type)?)
        .bind(campaign.segment_id.map(|id| id.to_string()))
        .bind(&audience_filter_json)
        .bind(status_str(&campaign.status)?)
        .bind(campaign.scheduled_for.as_ref().map(format_datetime))
        .bind(campaign.total_recipients as i64)
        .bind(campaign.sent_count as i64)
        .bind(campaign.delivered_count as i64)
        .bind(campaign.opened_count as i64)
        .bind(campaign.clicked_count as i64)
        .bind(campaign.bounced_count as i64)
        .bind(campaign.sent_at.as_ref().map(format_datetime))
        .bind(campaign.id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn increment_counts(&self, id: &Uuid, sent_delta: u32) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE campaigns SET sent_count = sent_count + ? WHERE id = ?")
            .bind(sent_delta as i64)
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn list_campaigns(&self, project_id: &Uuid) -> Result<Vec<Campaign>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM campaigns WHERE project_id = ? ORDER BY rowid DESC")
            .bind(project_id.to_string())
            .fetch_all(&self.pool.reader)
            .await
            .map_err(backend)?;

        rows.iter()
            .map(|row| CampaignRow::from_row(row).map_err(backend)?.into_campaign())
            .collect()
    }
}
