//! Contact: referenced by the engine, not owned by it (spec.md §3).
//!
//! A minimal local representation is still needed so the engine can resolve
//! template data and audience queries without an external service in the
//! loop for this workspace's own persistence and tests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: Uuid,
    pub project_id: Uuid,
    pub email: String,
    pub subscribed: bool,
    /// Arbitrary profile attributes, merged into template rendering data.
    pub data: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A saved filter over contacts, used to resolve SEGMENT campaign audiences
/// (§4.4 "Audience resolution").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    /// AND-of-filters, same shape as a campaign's inline `audienceFilter`.
    pub filters: Vec<AudienceFilter>,
}

/// One clause of an audience filter: `data.<field> <op> <value>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudienceFilter {
    pub field: String,
    pub operator: crate::workflow::ConditionOperator,
    pub value: Value,
}
