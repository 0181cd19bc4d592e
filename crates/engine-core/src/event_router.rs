//! Event Router (spec.md §4.3): `TrackEvent` persists an `Event`, triggers new
//! executions of enabled workflows whose `triggerEventName` matches, and
//! resumes `WAITING` executions via the runtime's `HandleEvent`.
//!
//! The enabled-workflow-by-trigger lookup is cached with a 300s TTL (§4.3),
//! invalidated by prefix whenever a workflow definition is saved -- callers
//! that mutate a workflow definition must call `invalidate_workflow_cache`.

use std::sync::Arc;
use std::time::Duration;

use engine_types::error::RuntimeError;
use engine_types::workflow::WorkflowDefinition;
use serde_json::Value;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::cache::TtlCache;
use crate::clock::Clock;
use crate::repository::{ContactRepository, EmailRepository, EventRepository, JobRepository, TemplateRepository, WorkflowRepository};
use crate::webhook::WebhookClient;
use crate::workflow::runtime::Runtime;

/// Outcome of a single `TrackEvent` call.
#[derive(Debug, Default)]
pub struct TrackEventOutcome {
    /// Newly started execution ids (one per enabled workflow triggered).
    pub triggered: Vec<Uuid>,
    /// Count of `WAITING` step executions resumed by this event.
    pub resumed: usize,
}

/// Routes incoming events to new workflow triggers and waiting resumes.
///
/// Generic over the same repository ports as the runtime it wraps, plus its
/// own `EventRepository` (`EVR`) for appending the persisted `Event` row.
pub struct EventRouter<WR, EVR, CR, ER, TR, JR, C, WH> {
    workflows: WR,
    events: EVR,
    runtime: Arc<Runtime<WR, CR, ER, TR, JR, C, WH>>,
    cache: TtlCache<String, Vec<WorkflowDefinition>, C>,
}

impl<WR, EVR, CR, ER, TR, JR, C, WH> EventRouter<WR, EVR, CR, ER, TR, JR, C, WH>
where
    WR: WorkflowRepository,
    EVR: EventRepository,
    CR: ContactRepository,
    ER: EmailRepository,
    TR: TemplateRepository,
    JR: JobRepository,
    C: Clock,
    WH: WebhookClient,
{
    pub fn new(
        workflows: WR,
        events: EVR,
        runtime: Arc<Runtime<WR, CR, ER, TR, JR, C, WH>>,
        clock: C,
        cache_ttl_secs: u64,
    ) -> Self {
        Self { workflows, events, runtime, cache: TtlCache::new(Duration::from_secs(cache_ttl_secs), clock) }
    }

    fn cache_key(project_id: Uuid, event_name: &str) -> String {
        format!("trigger:{project_id}:{event_name}")
    }

    /// Invalidate the enabled-workflow-by-trigger cache for a project. Call
    /// this whenever a workflow definition in the project is saved, since an
    /// edit may change `enabled` or `triggerEventName` (§4.3).
    pub fn invalidate_workflow_cache(&self, project_id: Uuid) {
        self.cache.invalidate_prefix(&format!("trigger:{project_id}:"));
    }

    async fn enabled_by_trigger(&self, project_id: Uuid, event_name: &str) -> Result<Vec<WorkflowDefinition>, RuntimeError> {
        let key = Self::cache_key(project_id, event_name);
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit);
        }
        let found = self.workflows.find_enabled_by_trigger(&project_id, event_name).await?;
        self.cache.insert(key, found.clone());
        Ok(found)
    }

    /// `TrackEvent` (§4.3): append the event, start one execution per enabled
    /// workflow triggered by `event_name` (only when a contact is known --
    /// new executions are always contact-scoped), then resume any `WAITING`
    /// executions waiting on this event name.
    #[instrument(skip(self, data), fields(%project_id, %event_name), err)]
    pub async fn track_event(
        &self,
        project_id: Uuid,
        event_name: &str,
        contact_id: Option<Uuid>,
        data: Value,
    ) -> Result<TrackEventOutcome, RuntimeError> {
        let event = engine_types::event::Event {
            id: Uuid::now_v7(),
            project_id,
            contact_id,
            email_id: None,
            name: event_name.to_string(),
            data: data.clone(),
            created_at: chrono::Utc::now(),
        };
        self.events.append_event(&event).await?;

        let mut outcome = TrackEventOutcome::default();

        if let Some(contact_id) = contact_id {
            let workflows = self.enabled_by_trigger(project_id, event_name).await?;
            for workflow in workflows {
                match self.runtime.start_execution(workflow.id, contact_id, data.clone()).await {
                    Ok(execution_id) => outcome.triggered.push(execution_id),
                    Err(RuntimeError::InvalidState(_)) => {
                        // Re-entry guard tripped -- not an error for TrackEvent,
                        // the contact simply already has an active execution.
                    }
                    Err(other) => return Err(other),
                }
            }
        }

        outcome.resumed = self.runtime.handle_event(project_id, event_name, contact_id, data).await?;
        info!(triggered = outcome.triggered.len(), resumed = outcome.resumed, "event tracked");
        Ok(outcome)
    }
}
