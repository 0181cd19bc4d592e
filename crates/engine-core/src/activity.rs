//! Activity Aggregator (spec.md §4.5): `GetActivities`, `GetStats`,
//! `GetRecentActivityCount`. Synthesizes a merged, cursor-paginated timeline
//! from three independently-stored sources -- events, emails, workflow
//! executions -- none of which is itself an "activity" row in storage.

use std::time::Duration;

use chrono::{DateTime, Utc};
use engine_types::activity::{decode_cursor, Activity, ActivityPage, ActivityStats, ActivityType};
use engine_types::email::Email;
use engine_types::error::RuntimeError;
use engine_types::event::Event;
use engine_types::workflow::{WorkflowExecution, WorkflowExecutionStatus};
use serde_json::json;
use uuid::Uuid;

use crate::cache::TtlCache;
use crate::clock::Clock;
use crate::repository::{EmailRepository, EventRepository, WorkflowRepository};

/// `deliveryRate = delivered/sent` (spec.md §9 open question, resolved in
/// SPEC_FULL.md §6). Zero when nothing has been sent yet.
pub fn compute_delivery_rate(delivered: u64, sent: u64) -> f64 {
    if sent == 0 {
        0.0
    } else {
        delivered as f64 / sent as f64
    }
}

/// Whether a source contributing `types` should be queried at all, given an
/// optional `typeFilter` (spec.md §4.5: "skip a source when typeFilter
/// excludes it entirely"). `None` means no filter -- every source runs.
fn source_included(type_filter: Option<&[ActivityType]>, types: &[ActivityType]) -> bool {
    match type_filter {
        None => true,
        Some(filter) => types.iter().any(|t| filter.contains(t)),
    }
}

const EMAIL_ACTIVITY_TYPES: [ActivityType; 5] = [
    ActivityType::EmailSent,
    ActivityType::EmailDelivered,
    ActivityType::EmailOpened,
    ActivityType::EmailClicked,
    ActivityType::EmailBounced,
];

const WORKFLOW_ACTIVITY_TYPES: [ActivityType; 2] =
    [ActivityType::WorkflowStarted, ActivityType::WorkflowCompleted];

fn event_activity(event: Event) -> Activity {
    Activity {
        source_id: event.id,
        activity_type: ActivityType::EventTriggered,
        project_id: event.project_id,
        contact_id: event.contact_id,
        timestamp: event.created_at,
        data: json!({"name": event.name, "data": event.data}),
    }
}

/// An email's lifecycle yields one activity per timestamp it has set, each
/// keyed by the same `source_id` (the email's id) but a distinct
/// `ActivityType` -- `(source_id, activity_type)` stays unique (§3 `Activity`).
fn email_activities(email: &Email) -> Vec<Activity> {
    let mut out = Vec::new();
    let mut push = |activity_type: ActivityType, timestamp: Option<DateTime<Utc>>| {
        if let Some(timestamp) = timestamp {
            out.push(Activity {
                source_id: email.id,
                activity_type,
                project_id: email.project_id,
                contact_id: Some(email.contact_id),
                timestamp,
                data: json!({"subject": email.subject, "campaignId": email.campaign_id}),
            });
        }
    };
    push(ActivityType::EmailSent, email.sent_at);
    push(ActivityType::EmailDelivered, email.delivered_at);
    push(ActivityType::EmailOpened, email.opened_at);
    push(ActivityType::EmailClicked, email.clicked_at);
    push(ActivityType::EmailBounced, email.bounced_at);
    out
}

fn execution_activities(execution: &WorkflowExecution, project_id: Uuid) -> Vec<Activity> {
    let mut out = vec![Activity {
        source_id: execution.id,
        activity_type: ActivityType::WorkflowStarted,
        project_id,
        contact_id: Some(execution.contact_id),
        timestamp: execution.started_at,
        data: json!({"workflowId": execution.workflow_id}),
    }];
    if execution.status == WorkflowExecutionStatus::Completed {
        if let Some(completed_at) = execution.completed_at {
            out.push(Activity {
                source_id: execution.id,
                activity_type: ActivityType::WorkflowCompleted,
                project_id,
                contact_id: Some(execution.contact_id),
                timestamp: completed_at,
                data: json!({"workflowId": execution.workflow_id}),
            });
        }
    }
    out
}

/// The Activity Aggregator, generic over the repository ports it reads from.
pub struct ActivityAggregator<ER, EVR, WR, C> {
    emails: ER,
    events: EVR,
    workflows: WR,
    clock: C,
    stats_cache: TtlCache<String, ActivityStats, C>,
    page_size_cap: u32,
}

impl<ER, EVR, WR, C> ActivityAggregator<ER, EVR, WR, C>
where
    ER: EmailRepository,
    EVR: EventRepository,
    WR: WorkflowRepository,
    C: Clock,
{
    pub fn new(emails: ER, events: EVR, workflows: WR, clock: C, stats_cache_ttl_secs: u64, page_size_cap: u32) -> Self {
        let stats_cache = TtlCache::new(Duration::from_secs(stats_cache_ttl_secs), clock.clone());
        Self { emails, events, workflows, clock, stats_cache, page_size_cap }
    }

    /// `GetActivities` (§4.5): a merged, most-recent-first page over all
    /// three activity sources within `[start, end]`, optionally scoped to a
    /// contact, restricted to `type_filter` when given, and continued from a
    /// prior page's cursor.
    pub async fn get_activities(
        &self,
        project_id: Uuid,
        contact_id: Option<Uuid>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        cursor: Option<&str>,
        limit: u32,
        type_filter: Option<&[ActivityType]>,
    ) -> Result<ActivityPage, RuntimeError> {
        let limit = limit.min(self.page_size_cap).max(1);
        let cursor_cutoff = cursor.and_then(decode_cursor);
        let effective_end = cursor_cutoff.map(|(ts, _)| ts).unwrap_or(end);

        let mut activities: Vec<Activity> = Vec::new();

        if source_included(type_filter, &[ActivityType::EventTriggered]) {
            let events = self.events.list_recent(&project_id, contact_id.as_ref(), start, effective_end, limit).await?;
            activities.extend(events.into_iter().map(event_activity));
        }
        if source_included(type_filter, &EMAIL_ACTIVITY_TYPES) {
            let emails = self.emails.list_recent(&project_id, contact_id.as_ref(), start, effective_end, limit).await?;
            activities.extend(emails.iter().flat_map(email_activities));
        }
        if source_included(type_filter, &WORKFLOW_ACTIVITY_TYPES) {
            let executions = self
                .workflows
                .list_recent_executions(&project_id, contact_id.as_ref(), start, effective_end, limit)
                .await?;
            activities.extend(executions.iter().flat_map(|e| execution_activities(e, project_id)));
        }

        if let Some(filter) = type_filter {
            activities.retain(|a| filter.contains(&a.activity_type));
        }

        if let Some((cursor_ts, cursor_id)) = cursor_cutoff {
            activities.retain(|a| a.timestamp < cursor_ts || (a.timestamp == cursor_ts && a.source_id < cursor_id));
        }

        activities.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.source_id.cmp(&a.source_id)));

        let has_more = activities.len() > limit as usize;
        activities.truncate(limit as usize);
        let next_cursor = if has_more { activities.last().map(|a| a.cursor()) } else { None };

        Ok(ActivityPage { activities, next_cursor, has_more })
    }

    fn stats_cache_key(project_id: Uuid, contact_id: Option<Uuid>, start: DateTime<Utc>, end: DateTime<Utc>) -> String {
        format!(
            "activity:stats:{project_id}:{}:{}:{}",
            contact_id.map(|c| c.to_string()).unwrap_or_else(|| "all".to_string()),
            start.timestamp_millis(),
            end.timestamp_millis(),
        )
    }

    /// `GetStats` (§4.5): aggregate counts over `[start, end]`, cached for
    /// `stats_cache_ttl_secs` and invalidated by project prefix whenever new
    /// activity is recorded (callers should invalidate on write paths that
    /// affect the window, e.g. a fresh `TrackEvent`/email status update).
    pub async fn get_stats(
        &self,
        project_id: Uuid,
        contact_id: Option<Uuid>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<ActivityStats, RuntimeError> {
        let key = Self::stats_cache_key(project_id, contact_id, start, end);
        if let Some(hit) = self.stats_cache.get(&key) {
            return Ok(hit);
        }

        // No per-source count methods beyond `EventRepository::count_since`,
        // so the window is tallied in memory -- acceptable given this path
        // is cache-fronted (§4.5) rather than hit on every read.
        let cap = u32::MAX;
        let events = self.events.list_recent(&project_id, contact_id.as_ref(), start, end, cap).await?;
        let emails = self.emails.list_recent(&project_id, contact_id.as_ref(), start, end, cap).await?;
        let executions = self.workflows.list_recent_executions(&project_id, contact_id.as_ref(), start, end, cap).await?;

        let mut stats = ActivityStats { events: events.len() as u64, ..Default::default() };
        for email in &emails {
            if email.sent_at.is_some() {
                stats.emails_sent += 1;
            }
            if email.delivered_at.is_some() {
                stats.emails_delivered += 1;
            }
            if email.opened_at.is_some() {
                stats.emails_opened += 1;
            }
            if email.clicked_at.is_some() {
                stats.emails_clicked += 1;
            }
            if email.bounced_at.is_some() {
                stats.emails_bounced += 1;
            }
        }
        for execution in &executions {
            stats.workflows_started += 1;
            if execution.status == WorkflowExecutionStatus::Completed {
                stats.workflows_completed += 1;
            }
        }

        self.stats_cache.insert(key, stats);
        Ok(stats)
    }

    /// Invalidate every cached stats entry for a project (call on any write
    /// that could change a window's tally).
    pub fn invalidate_stats(&self, project_id: Uuid) {
        self.stats_cache.invalidate_prefix(&format!("activity:stats:{project_id}:"));
    }

    /// `GetRecentActivityCount` (§4.5): sums event+email+workflow counts in
    /// the trailing window -- a fast path for polling, so it tallies via
    /// `list_recent` rather than paying for a full `GetActivities` merge.
    pub async fn get_recent_activity_count(&self, project_id: Uuid, since_ms_ago: i64) -> Result<u64, RuntimeError> {
        let since = self.clock.now() - chrono::Duration::milliseconds(since_ms_ago);
        let now = self.clock.now();
        let cap = u32::MAX;
        let event_count = self.events.count_since(&project_id, since).await?;
        let email_count = self.emails.list_recent(&project_id, None, since, now, cap).await?.len() as u64;
        let execution_count =
            self.workflows.list_recent_executions(&project_id, None, since, now, cap).await?.len() as u64;
        Ok(event_count + email_count + execution_count)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use engine_types::error::RepositoryError;
    use engine_types::workflow::{StepExecution, WorkflowDefinition};

    use super::*;
    use crate::clock::FakeClock;

    #[test]
    fn delivery_rate_is_zero_with_no_sends() {
        assert_eq!(compute_delivery_rate(0, 0), 0.0);
    }

    #[test]
    fn delivery_rate_computes_ratio() {
        assert!((compute_delivery_rate(95, 100) - 0.95).abs() < f64::EPSILON);
    }

    #[derive(Default)]
    struct MemEvents {
        events: Mutex<Vec<Event>>,
    }

    impl EventRepository for MemEvents {
        async fn append_event(&self, event: &Event) -> Result<(), RepositoryError> {
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }
        async fn list_recent(
            &self,
            project_id: &Uuid,
            _contact_id: Option<&Uuid>,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
            limit: u32,
        ) -> Result<Vec<Event>, RepositoryError> {
            let mut matching: Vec<Event> = self
                .events
                .lock()
                .unwrap()
                .iter()
                .filter(|e| &e.project_id == project_id && e.created_at >= start && e.created_at <= end)
                .cloned()
                .collect();
            matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            matching.truncate(limit as usize);
            Ok(matching)
        }
        async fn count_since(&self, project_id: &Uuid, since: DateTime<Utc>) -> Result<u64, RepositoryError> {
            Ok(self
                .events
                .lock()
                .unwrap()
                .iter()
                .filter(|e| &e.project_id == project_id && e.created_at >= since)
                .count() as u64)
        }
    }

    #[derive(Default)]
    struct MemEmails {
        emails: Mutex<Vec<Email>>,
    }

    impl EmailRepository for MemEmails {
        async fn create_email(&self, email: &Email) -> Result<(), RepositoryError> {
            self.emails.lock().unwrap().push(email.clone());
            Ok(())
        }
        async fn get_email(&self, id: &Uuid) -> Result<Option<Email>, RepositoryError> {
            Ok(self.emails.lock().unwrap().iter().find(|e| &e.id == id).cloned())
        }
        async fn update_email(&self, _email: &Email) -> Result<(), RepositoryError> {
            Ok(())
        }
        async fn list_recent(
            &self,
            project_id: &Uuid,
            _contact_id: Option<&Uuid>,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
            limit: u32,
        ) -> Result<Vec<Email>, RepositoryError> {
            let mut matching: Vec<Email> = self
                .emails
                .lock()
                .unwrap()
                .iter()
                .filter(|e| {
                    &e.project_id == project_id
                        && [e.sent_at, e.delivered_at, e.opened_at, e.clicked_at, e.bounced_at]
                            .iter()
                            .any(|ts| ts.map(|t| t >= start && t <= end).unwrap_or(false))
                })
                .cloned()
                .collect();
            matching.sort_by(|a, b| b.sent_at.cmp(&a.sent_at));
            matching.truncate(limit as usize);
            Ok(matching)
        }
    }

    #[derive(Default)]
    struct MemWorkflows {
        executions: Mutex<Vec<(Uuid, WorkflowExecution)>>,
    }

    impl WorkflowRepository for MemWorkflows {
        async fn save_definition(&self, _def: &WorkflowDefinition) -> Result<(), RepositoryError> {
            Ok(())
        }
        async fn get_definition(&self, _id: &Uuid) -> Result<Option<WorkflowDefinition>, RepositoryError> {
            Ok(None)
        }
        async fn list_definitions(&self, _project_id: &Uuid) -> Result<Vec<WorkflowDefinition>, RepositoryError> {
            Ok(Vec::new())
        }
        async fn find_enabled_by_trigger(
            &self,
            _project_id: &Uuid,
            _event_name: &str,
        ) -> Result<Vec<WorkflowDefinition>, RepositoryError> {
            Ok(Vec::new())
        }
        async fn delete_definition(&self, _id: &Uuid) -> Result<bool, RepositoryError> {
            Ok(false)
        }
        async fn create_execution(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError> {
            self.executions.lock().unwrap().push((Uuid::nil(), execution.clone()));
            Ok(())
        }
        async fn get_execution(&self, id: &Uuid) -> Result<Option<WorkflowExecution>, RepositoryError> {
            Ok(self.executions.lock().unwrap().iter().find(|(_, e)| &e.id == id).map(|(_, e)| e.clone()))
        }
        async fn update_execution(&self, _execution: &WorkflowExecution) -> Result<(), RepositoryError> {
            Ok(())
        }
        async fn count_executions_for_contact(&self, _workflow_id: &Uuid, _contact_id: &Uuid) -> Result<u64, RepositoryError> {
            Ok(0)
        }
        async fn has_active_execution_for_contact(
            &self,
            _workflow_id: &Uuid,
            _contact_id: &Uuid,
        ) -> Result<bool, RepositoryError> {
            Ok(false)
        }
        async fn list_executions(&self, _workflow_id: &Uuid, _limit: u32) -> Result<Vec<WorkflowExecution>, RepositoryError> {
            Ok(Vec::new())
        }
        async fn list_recent_executions(
            &self,
            project_id: &Uuid,
            _contact_id: Option<&Uuid>,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
            limit: u32,
        ) -> Result<Vec<WorkflowExecution>, RepositoryError> {
            let mut matching: Vec<WorkflowExecution> = self
                .executions
                .lock()
                .unwrap()
                .iter()
                .filter(|(p, e)| p == project_id && e.started_at >= start && e.started_at <= end)
                .map(|(_, e)| e.clone())
                .collect();
            matching.sort_by(|a, b| b.started_at.cmp(&a.started_at));
            matching.truncate(limit as usize);
            Ok(matching)
        }
        async fn claim_step(&self, _execution_id: &Uuid, _step_id: &str) -> Result<Option<StepExecution>, RepositoryError> {
            Ok(None)
        }
        async fn get_step_execution(&self, _id: &Uuid) -> Result<Option<StepExecution>, RepositoryError> {
            Ok(None)
        }
        async fn claim_waiting_step(&self, _step_execution_id: &Uuid) -> Result<Option<StepExecution>, RepositoryError> {
            Ok(None)
        }
        async fn update_step_execution(&self, _step_execution: &StepExecution) -> Result<(), RepositoryError> {
            Ok(())
        }
        async fn list_step_executions(&self, _execution_id: &Uuid) -> Result<Vec<StepExecution>, RepositoryError> {
            Ok(Vec::new())
        }
        async fn count_step_executions(&self, _execution_id: &Uuid) -> Result<u64, RepositoryError> {
            Ok(0)
        }
        async fn find_waiting_for_event(
            &self,
            _project_id: &Uuid,
            _event_name: &str,
            _contact_id: Option<&Uuid>,
        ) -> Result<Vec<StepExecution>, RepositoryError> {
            Ok(Vec::new())
        }
        async fn find_overdue_waiting(&self, _now: DateTime<Utc>, _limit: u32) -> Result<Vec<StepExecution>, RepositoryError> {
            Ok(Vec::new())
        }
    }

    fn sample_event(project_id: Uuid, created_at: DateTime<Utc>) -> Event {
        Event {
            id: Uuid::now_v7(),
            project_id,
            contact_id: None,
            email_id: None,
            name: "signup".to_string(),
            data: json!({}),
            created_at,
        }
    }

    fn build_aggregator(
        events: MemEvents,
        emails: MemEmails,
        workflows: MemWorkflows,
        clock: FakeClock,
    ) -> ActivityAggregator<MemEmails, MemEvents, MemWorkflows, FakeClock> {
        ActivityAggregator::new(emails, events, workflows, clock, 300, 100)
    }

    #[tokio::test]
    async fn type_filter_excludes_sources_entirely() {
        let project_id = Uuid::now_v7();
        let clock = FakeClock::default();
        let events = MemEvents::default();
        events.events.lock().unwrap().push(sample_event(project_id, clock.now()));
        let aggregator = build_aggregator(events, MemEmails::default(), MemWorkflows::default(), clock.clone());

        let page = aggregator
            .get_activities(
                project_id,
                None,
                clock.now() - chrono::Duration::days(1),
                clock.now() + chrono::Duration::days(1),
                None,
                50,
                Some(&[ActivityType::EmailSent]),
            )
            .await
            .unwrap();

        assert!(page.activities.is_empty());
    }

    #[tokio::test]
    async fn no_type_filter_returns_all_sources() {
        let project_id = Uuid::now_v7();
        let clock = FakeClock::default();
        let events = MemEvents::default();
        events.events.lock().unwrap().push(sample_event(project_id, clock.now()));
        let aggregator = build_aggregator(events, MemEmails::default(), MemWorkflows::default(), clock.clone());

        let page = aggregator
            .get_activities(
                project_id,
                None,
                clock.now() - chrono::Duration::days(1),
                clock.now() + chrono::Duration::days(1),
                None,
                50,
                None,
            )
            .await
            .unwrap();

        assert_eq!(page.activities.len(), 1);
        assert_eq!(page.activities[0].activity_type, ActivityType::EventTriggered);
    }

    #[tokio::test]
    async fn recent_activity_count_sums_all_three_sources() {
        let project_id = Uuid::now_v7();
        let clock = FakeClock::default();
        let events = MemEvents::default();
        events.events.lock().unwrap().push(sample_event(project_id, clock.now()));
        let emails = MemEmails::default();
        emails.emails.lock().unwrap().push(Email {
            id: Uuid::now_v7(),
            project_id,
            contact_id: Uuid::now_v7(),
            template_ref: None,
            campaign_id: None,
            workflow_execution_id: None,
            workflow_step_execution_id: None,
            source_type: engine_types::email::EmailSourceType::Campaign,
            subject: "hi".to_string(),
            body: "hi".to_string(),
            from: "a@b.com".to_string(),
            reply_to: None,
            status: engine_types::email::EmailStatus::Sent,
            sent_at: Some(clock.now()),
            delivered_at: None,
            opened_at: None,
            clicked_at: None,
            bounced_at: None,
            complained_at: None,
            opens: 0,
            clicks: 0,
            message_id: None,
            error: None,
        });
        let workflows = MemWorkflows::default();
        workflows.executions.lock().unwrap().push((
            project_id,
            WorkflowExecution {
                id: Uuid::now_v7(),
                workflow_id: Uuid::now_v7(),
                contact_id: Uuid::now_v7(),
                status: engine_types::workflow::WorkflowExecutionStatus::Running,
                current_step_id: None,
                started_at: clock.now(),
                completed_at: None,
                exit_reason: None,
                context: json!({}),
            },
        ));
        let aggregator = build_aggregator(events, emails, workflows, clock.clone());

        let count = aggregator.get_recent_activity_count(project_id, 60_000).await.unwrap();
        assert_eq!(count, 3);
    }
}
