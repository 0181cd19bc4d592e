//! The append-only domain `Event` entity tracked by the Event Router
//! (spec.md §3, §4.3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// An append-only record of something that happened to a contact (or a
/// project at large). `TrackEvent` both persists one of these and uses its
/// `name` to look up matching workflow triggers and waiting steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub project_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_id: Option<Uuid>,
    pub name: String,
    pub data: Value,
    pub created_at: DateTime<Utc>,
}
