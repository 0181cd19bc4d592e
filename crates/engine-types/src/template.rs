//! Email template: the content a SEND_EMAIL step's `templateRef` resolves to.
//!
//! Template storage and rendering syntax beyond the core's own `{{var}}`
//! grammar are out of scope (spec.md §1), but the core still needs somewhere
//! to resolve a `templateRef` to subject/body/from text to drive §4.1's
//! SEND_EMAIL step and §4.4's campaign dispatch -- the same rationale as
//! `contact::Contact` (a minimal local representation for this workspace's
//! own persistence and tests, not a stand-in for a product template editor).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailTemplate {
    pub id: String,
    pub project_id: Uuid,
    pub subject: String,
    pub body: String,
    pub from: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    /// TRANSACTIONAL templates suppress the unsubscribe footer and force the
    /// Email's sourceType to TRANSACTIONAL regardless of sending path (§6).
    #[serde(default)]
    pub transactional: bool,
}
