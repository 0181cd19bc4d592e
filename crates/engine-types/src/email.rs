//! Email entity (spec.md §3). The core never talks SMTP directly -- sending
//! is delegated to an external provider adapter through the Job Queue
//! Adapter's `email.send` payload; this crate only models the record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EmailSourceType {
    Transactional,
    Campaign,
    Workflow,
}

/// Monotone progression: PENDING -> SENDING -> SENT -> (DELIVERED|BOUNCED|FAILED).
/// OPENED/CLICKED/COMPLAINED are independent timestamps layered on top, not
/// modeled as separate statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EmailStatus {
    Pending,
    Sending,
    Sent,
    Delivered,
    Bounced,
    Failed,
}

impl EmailStatus {
    /// Whether transitioning from `self` to `next` respects the monotone
    /// progression rule (invariant #4, spec.md §8).
    pub fn can_transition_to(&self, next: EmailStatus) -> bool {
        use EmailStatus::*;
        matches!(
            (self, next),
            (Pending, Sending)
                | (Pending, Sent)
                | (Sending, Sent)
                | (Sending, Failed)
                | (Sent, Delivered)
                | (Sent, Bounced)
                | (Sent, Failed)
        ) || *self == next
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Email {
    pub id: Uuid,
    pub project_id: Uuid,
    pub contact_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campaign_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_execution_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_step_execution_id: Option<Uuid>,
    pub source_type: EmailSourceType,
    pub subject: String,
    pub body: String,
    pub from: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    pub status: EmailStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opened_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clicked_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounced_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complained_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub opens: u32,
    #[serde(default)]
    pub clicks: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sent_cannot_regress_to_pending() {
        assert!(!EmailStatus::Sent.can_transition_to(EmailStatus::Pending));
    }

    #[test]
    fn pending_can_advance_to_sending() {
        assert!(EmailStatus::Pending.can_transition_to(EmailStatus::Sending));
    }

    #[test]
    fn sent_can_advance_to_delivered_or_bounced() {
        assert!(EmailStatus::Sent.can_transition_to(EmailStatus::Delivered));
        assert!(EmailStatus::Sent.can_transition_to(EmailStatus::Bounced));
    }

    #[test]
    fn same_status_is_a_no_op_transition() {
        assert!(EmailStatus::Sent.can_transition_to(EmailStatus::Sent));
    }
}
