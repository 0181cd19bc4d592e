//! Synthesized activity timeline types (spec.md §4.5).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    EventTriggered,
    EmailSent,
    EmailDelivered,
    EmailOpened,
    EmailClicked,
    EmailBounced,
    WorkflowStarted,
    WorkflowCompleted,
}

impl ActivityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityType::EventTriggered => "event.triggered",
            ActivityType::EmailSent => "email.sent",
            ActivityType::EmailDelivered => "email.delivered",
            ActivityType::EmailOpened => "email.opened",
            ActivityType::EmailClicked => "email.clicked",
            ActivityType::EmailBounced => "email.bounced",
            ActivityType::WorkflowStarted => "workflow.started",
            ActivityType::WorkflowCompleted => "workflow.completed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    /// Source row id (Event/Email/WorkflowExecution id), reused as the
    /// activity's own id -- a given source row yields at most one activity
    /// of each applicable kind, so `(source_id, activity_type)` is unique.
    pub source_id: Uuid,
    pub activity_type: ActivityType,
    pub project_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
}

impl Activity {
    /// Cursor for this activity: `"{unixMillis}_{id}"` (§6).
    pub fn cursor(&self) -> String {
        encode_cursor(self.timestamp, self.source_id)
    }
}

pub fn encode_cursor(timestamp: DateTime<Utc>, id: Uuid) -> String {
    format!("{}_{}", timestamp.timestamp_millis(), id)
}

/// Decode a `"{unixMillis}_{id}"` cursor. Returns `None` if malformed -- the
/// caller treats a malformed cursor the same as "no cursor" (start from the
/// newest activity).
pub fn decode_cursor(cursor: &str) -> Option<(DateTime<Utc>, Uuid)> {
    let (millis_str, id_str) = cursor.split_once('_')?;
    let millis: i64 = millis_str.parse().ok()?;
    let timestamp = DateTime::from_timestamp_millis(millis)?;
    let id = Uuid::parse_str(id_str).ok()?;
    Some((timestamp, id))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityPage {
    pub activities: Vec<Activity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ActivityStats {
    pub events: u64,
    pub emails_sent: u64,
    pub emails_delivered: u64,
    pub emails_opened: u64,
    pub emails_clicked: u64,
    pub emails_bounced: u64,
    pub workflows_started: u64,
    pub workflows_completed: u64,
}

impl ActivityStats {
    /// `deliveryRate = delivered/sent` (spec.md §9, resolved).
    pub fn delivery_rate(&self) -> f64 {
        if self.emails_sent == 0 {
            0.0
        } else {
            self.emails_delivered as f64 / self.emails_sent as f64
        }
    }
}
