//! Campaign entity (spec.md §3, §4.4).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::contact::AudienceFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AudienceType {
    All,
    Segment,
    Filtered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Sending,
    Sent,
    Cancelled,
}

impl CampaignStatus {
    /// Mutation (editing subject/body/audience) allowed only in DRAFT or
    /// SCHEDULED (§3 "Mutation allowed only in DRAFT or SCHEDULED").
    pub fn mutable(&self) -> bool {
        matches!(self, CampaignStatus::Draft | CampaignStatus::Scheduled)
    }

    /// `Send` accepts DRAFT or SCHEDULED (§4.4).
    pub fn sendable(&self) -> bool {
        matches!(self, CampaignStatus::Draft | CampaignStatus::Scheduled)
    }

    /// `Cancel` accepted from SCHEDULED or SENDING (§4.4).
    pub fn cancellable(&self) -> bool {
        matches!(self, CampaignStatus::Scheduled | CampaignStatus::Sending)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub subject: String,
    pub body: String,
    pub from: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    pub audience_type: AudienceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub audience_filter: Vec<AudienceFilter>,
    pub status: CampaignStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_for: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_recipients: u32,
    #[serde(default)]
    pub sent_count: u32,
    #[serde(default)]
    pub delivered_count: u32,
    #[serde(default)]
    pub opened_count: u32,
    #[serde(default)]
    pub clicked_count: u32,
    #[serde(default)]
    pub bounced_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
}

impl Campaign {
    /// `deliveryRate = delivered/sent` (spec.md §9 open question, resolved
    /// in SPEC_FULL.md §6). Zero when nothing has been sent yet.
    pub fn delivery_rate(&self) -> f64 {
        if self.sent_count == 0 {
            0.0
        } else {
            self.delivered_count as f64 / self.sent_count as f64
        }
    }

    /// Invariant #3 (spec.md §8): a SENT campaign's sentCount equals
    /// totalRecipients; a campaign cancelled mid-flight may have sent fewer.
    pub fn satisfies_completion_invariant(&self) -> bool {
        match self.status {
            CampaignStatus::Sent => self.sent_count == self.total_recipients,
            CampaignStatus::Cancelled => self.sent_count <= self.total_recipients,
            _ => true,
        }
    }
}

/// `{field, value}` clause used by both SEGMENT resolution (via a saved
/// `Segment`) and inline FILTERED audiences.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudienceFilterSet {
    pub filters: Vec<AudienceFilter>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(status: CampaignStatus, sent: u32, total: u32) -> Campaign {
        Campaign {
            id: Uuid::now_v7(),
            project_id: Uuid::now_v7(),
            name: "launch".to_string(),
            subject: "Hello".to_string(),
            body: "Body".to_string(),
            from: "noreply@example.com".to_string(),
            reply_to: None,
            audience_type: AudienceType::All,
            segment_id: None,
            audience_filter: Vec::new(),
            status,
            scheduled_for: None,
            total_recipients: total,
            sent_count: sent,
            delivered_count: 0,
            opened_count: 0,
            clicked_count: 0,
            bounced_count: 0,
            sent_at: None,
        }
    }

    #[test]
    fn delivery_rate_is_zero_with_no_sends() {
        let c = sample(CampaignStatus::Draft, 0, 0);
        assert_eq!(c.delivery_rate(), 0.0);
    }

    #[test]
    fn sent_campaign_must_match_total_recipients() {
        assert!(sample(CampaignStatus::Sent, 1200, 1200).satisfies_completion_invariant());
        assert!(!sample(CampaignStatus::Sent, 1199, 1200).satisfies_completion_invariant());
    }

    #[test]
    fn cancelled_campaign_may_have_sent_fewer_than_total() {
        assert!(sample(CampaignStatus::Cancelled, 500, 1200).satisfies_completion_invariant());
    }

    #[test]
    fn status_mutability_matches_spec() {
        assert!(CampaignStatus::Draft.mutable());
        assert!(CampaignStatus::Scheduled.mutable());
        assert!(!CampaignStatus::Sending.mutable());
        assert!(!CampaignStatus::Sent.mutable());
    }
}
