//! Job queue payloads and the persisted `Job` row (spec.md §4.2, §6).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The five canonical job payload shapes (§6 "Queue job payloads").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    #[serde(rename = "workflow.step")]
    WorkflowStep { execution_id: Uuid, step_id: String },
    #[serde(rename = "workflow.timeout")]
    WorkflowTimeout { execution_id: Uuid, step_id: String, step_execution_id: Uuid },
    #[serde(rename = "campaign.batch")]
    CampaignBatch {
        campaign_id: Uuid,
        batch_number: u32,
        limit: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cursor: Option<String>,
    },
    #[serde(rename = "campaign.schedule")]
    CampaignSchedule { campaign_id: Uuid },
    #[serde(rename = "email.send")]
    EmailSend { email_id: Uuid },
}

impl JobPayload {
    /// Stable cancellation key for the job types that support cancellation
    /// (§6 "Stable cancellation keys"). Other payload kinds are not
    /// individually cancellable.
    pub fn cancellation_key(&self) -> Option<String> {
        match self {
            JobPayload::WorkflowTimeout { step_execution_id, .. } => {
                Some(format!("timeout:{step_execution_id}"))
            }
            JobPayload::CampaignSchedule { campaign_id } => Some(format!("schedule:{campaign_id}")),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    DeadLetter,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub payload: JobPayload,
    pub run_at: DateTime<Utc>,
    pub status: JobStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    /// The stable cancellation key for this job, if any -- stored alongside
    /// the row so `CancelTimeout`/`CancelScheduledCampaign` can look it up
    /// directly instead of deserializing every pending job's payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedupe_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn new(payload: JobPayload, run_at: DateTime<Utc>, max_attempts: u32) -> Self {
        let dedupe_key = payload.cancellation_key();
        Self {
            id: Uuid::now_v7(),
            payload,
            run_at,
            status: JobStatus::Pending,
            attempts: 0,
            max_attempts,
            dedupe_key,
            last_error: None,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_timeout_cancellation_key_matches_spec_format() {
        let step_execution_id = Uuid::now_v7();
        let payload = JobPayload::WorkflowTimeout {
            execution_id: Uuid::now_v7(),
            step_id: "wait".to_string(),
            step_execution_id,
        };
        assert_eq!(payload.cancellation_key(), Some(format!("timeout:{step_execution_id}")));
    }

    #[test]
    fn campaign_schedule_cancellation_key_matches_spec_format() {
        let campaign_id = Uuid::now_v7();
        let payload = JobPayload::CampaignSchedule { campaign_id };
        assert_eq!(payload.cancellation_key(), Some(format!("schedule:{campaign_id}")));
    }

    #[test]
    fn workflow_step_payload_has_no_cancellation_key() {
        let payload = JobPayload::WorkflowStep { execution_id: Uuid::now_v7(), step_id: "a".to_string() };
        assert_eq!(payload.cancellation_key(), None);
    }

    #[test]
    fn payload_serializes_with_kind_tag() {
        let payload = JobPayload::EmailSend { email_id: Uuid::now_v7() };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "email.send");
    }
}
