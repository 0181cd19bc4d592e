//! Campaign Dispatcher (spec.md §4.4): `Send`, `StartSending`, `ProcessBatch`,
//! audience resolution, and cancellation for one-off campaign emails.
//!
//! Unlike the Workflow Runtime's per-contact fan-out, a campaign's audience
//! is resolved once (at `Send`/`StartSending` time) and walked in
//! cursor-paginated batches by `ProcessBatch`, each batch re-enqueuing the
//! next one until the audience is exhausted (§6 `campaign.batch` payload).

use chrono::{DateTime, Utc};
use engine_types::campaign::{AudienceType, Campaign, CampaignStatus};
use engine_types::contact::AudienceFilter;
use engine_types::email::{Email, EmailSourceType, EmailStatus};
use engine_types::error::{RuntimeError, ValidationError};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::queue::JobQueue;
use crate::repository::{CampaignRepository, ContactRepository, EmailRepository, JobRepository};
use crate::workflow::render::{campaign_template_data, render};

/// The Campaign Dispatcher, generic over the repository ports it depends on.
pub struct CampaignDispatcher<CGR, CTR, ER, JR, C> {
    campaigns: CGR,
    contacts: CTR,
    emails: ER,
    queue: JobQueue<JR, C>,
    clock: C,
    batch_size: u32,
    job_max_attempts: u32,
}

impl<CGR, CTR, ER, JR, C> CampaignDispatcher<CGR, CTR, ER, JR, C>
where
    CGR: CampaignRepository,
    CTR: ContactRepository,
    ER: EmailRepository,
    JR: JobRepository,
    C: Clock,
{
    pub fn new(
        campaigns: CGR,
        contacts: CTR,
        emails: ER,
        queue: JobQueue<JR, C>,
        clock: C,
        batch_size: u32,
        job_max_attempts: u32,
    ) -> Self {
        Self { campaigns, contacts, emails, queue, clock, batch_size, job_max_attempts }
    }

    /// Resolve the AND-of-filters an audience type implies (§4.4 "Audience
    /// resolution"): ALL has none, SEGMENT loads a saved segment's filters,
    /// FILTERED uses the campaign's own inline filters.
    async fn resolve_filters(&self, campaign: &Campaign) -> Result<Vec<AudienceFilter>, RuntimeError> {
        match campaign.audience_type {
            AudienceType::All => Ok(Vec::new()),
            AudienceType::Filtered => Ok(campaign.audience_filter.clone()),
            AudienceType::Segment => {
                let segment_id = campaign
                    .segment_id
                    .ok_or_else(|| RuntimeError::InvalidState("SEGMENT campaign has no segmentId".to_string()))?;
                let segment = self
                    .contacts
                    .get_segment(&segment_id)
                    .await?
                    .ok_or_else(|| RuntimeError::NotFound(format!("segment {segment_id}")))?;
                Ok(segment.filters)
            }
        }
    }

    /// `Send` (§4.4): a DRAFT or SCHEDULED campaign either starts sending
    /// immediately, or -- when `scheduled_for` names a future instant -- is
    /// parked in SCHEDULED with a `campaign.schedule` job queued to fire
    /// `StartSending` at that time.
    #[instrument(skip(self), fields(%campaign_id), err)]
    pub async fn send(
        &self,
        campaign_id: Uuid,
        scheduled_for: Option<DateTime<Utc>>,
    ) -> Result<(), RuntimeError> {
        let mut campaign = self.get_sendable(campaign_id).await?;
        match scheduled_for {
            Some(fire_at) if fire_at > self.clock.now() => {
                let filters = self.resolve_filters(&campaign).await?;
                let total = self.contacts.count_audience(&campaign.project_id, &filters).await?;
                if total == 0 {
                    return Err(RuntimeError::Validation(ValidationError::new(format!(
                        "campaign {campaign_id} has no recipients to send to"
                    ))));
                }
                campaign.status = CampaignStatus::Scheduled;
                campaign.total_recipients = total as u32;
                campaign.scheduled_for = Some(fire_at);
                self.campaigns.update_campaign(&campaign).await?;
                self.queue.schedule_campaign(campaign.id, fire_at, self.job_max_attempts).await?;
                info!(campaign_id = %campaign.id, %fire_at, "campaign send scheduled");
                Ok(())
            }
            _ => self.begin_sending(campaign).await,
        }
    }

    /// `StartSending` (§4.4): invoked by the `campaign.schedule` job when a
    /// SCHEDULED campaign's fire time arrives. Same transition as `Send`,
    /// reached from the scheduler instead of a direct call.
    #[instrument(skip(self), fields(%campaign_id), err)]
    pub async fn start_sending(&self, campaign_id: Uuid) -> Result<(), RuntimeError> {
        let campaign = self.get_sendable(campaign_id).await?;
        self.begin_sending(campaign).await
    }

    async fn get_sendable(&self, campaign_id: Uuid) -> Result<Campaign, RuntimeError> {
        let campaign = self
            .campaigns
            .get_campaign(&campaign_id)
            .await?
            .ok_or_else(|| RuntimeError::NotFound(format!("campaign {campaign_id}")))?;
        if !campaign.status.sendable() {
            return Err(RuntimeError::InvalidState(format!(
                "campaign {campaign_id} is not in a sendable state (status: {:?})",
                campaign.status
            )));
        }
        Ok(campaign)
    }

    async fn begin_sending(&self, mut campaign: Campaign) -> Result<(), RuntimeError> {
        let filters = self.resolve_filters(&campaign).await?;
        let total = self.contacts.count_audience(&campaign.project_id, &filters).await?;
        if total == 0 {
            return Err(RuntimeError::Validation(ValidationError::new(format!(
                "campaign {} has no recipients to send to",
                campaign.id
            ))));
        }

        campaign.status = CampaignStatus::Sending;
        campaign.total_recipients = total as u32;
        self.campaigns.update_campaign(&campaign).await?;

        self.queue
            .enqueue_campaign_batch(campaign.id, 1, self.batch_size, None, self.job_max_attempts)
            .await?;
        info!(campaign_id = %campaign.id, total_recipients = total, "campaign send started");
        Ok(())
    }

    /// `ProcessBatch` (§4.4): walk one page of the resolved audience, create
    /// a PENDING `Email` and enqueue an `email.send` job per recipient, then
    /// either enqueue the next batch or mark the campaign SENT.
    #[instrument(skip(self), fields(%campaign_id, batch_number), err)]
    pub async fn process_batch(
        &self,
        campaign_id: Uuid,
        batch_number: u32,
        limit: u32,
        cursor: Option<String>,
    ) -> Result<(), RuntimeError> {
        let campaign = self
            .campaigns
            .get_campaign(&campaign_id)
            .await?
            .ok_or_else(|| RuntimeError::NotFound(format!("campaign {campaign_id}")))?;

        // A campaign cancelled mid-flight stops processing further batches
        // (§4.4 cancellation semantics); already-enqueued email sends are
        // left to complete, only batch fan-out halts.
        if campaign.status != CampaignStatus::Sending {
            return Ok(());
        }

        let after = cursor.as_deref().and_then(|c| Uuid::parse_str(c).ok());
        let filters = self.resolve_filters(&campaign).await?;
        // Fetch one extra row past `limit` so `hasMore` reflects whether a
        // next page truly exists (§4.4 step 2) instead of guessing from
        // whether this page happened to come back full.
        let mut page = self.contacts.page_audience(&campaign.project_id, &filters, after.as_ref(), limit + 1).await?;
        let has_more = page.len() as u32 > limit;
        page.truncate(limit as usize);

        let mut created = 0u32;
        for contact in &page {
            let template_data = campaign_template_data(&contact.email, &contact.data);
            let email = Email {
                id: Uuid::now_v7(),
                project_id: campaign.project_id,
                contact_id: contact.id,
                template_ref: None,
                campaign_id: Some(campaign.id),
                workflow_execution_id: None,
                workflow_step_execution_id: None,
                source_type: EmailSourceType::Campaign,
                subject: render(&campaign.subject, &template_data),
                body: render(&campaign.body, &template_data),
                from: campaign.from.clone(),
                reply_to: campaign.reply_to.clone(),
                status: EmailStatus::Pending,
                sent_at: None,
                delivered_at: None,
                opened_at: None,
                clicked_at: None,
                bounced_at: None,
                complained_at: None,
                opens: 0,
                clicks: 0,
                message_id: None,
                error: None,
            };
            // A per-contact failure must not abort the batch: the job would
            // be retried from the same cursor, re-creating Emails for every
            // contact already processed in this page (§4.4 step 3).
            if let Err(error) = self.emails.create_email(&email).await {
                warn!(campaign_id = %campaign.id, contact_id = %contact.id, %error, "skipping contact, failed to create email");
                continue;
            }
            if let Err(error) = self.queue.enqueue_email_send(email.id, None, self.job_max_attempts).await {
                warn!(campaign_id = %campaign.id, contact_id = %contact.id, email_id = %email.id, %error, "skipping contact, failed to enqueue send");
                continue;
            }
            created += 1;
        }

        self.campaigns.increment_counts(&campaign.id, created).await?;

        if has_more {
            let next_cursor = page.last().map(|c| c.id.to_string());
            self.queue
                .enqueue_campaign_batch(campaign.id, batch_number + 1, limit, next_cursor, self.job_max_attempts)
                .await?;
            info!(campaign_id = %campaign.id, batch_number, recipients = created, "campaign batch processed, more remain");
        } else {
            let mut campaign = campaign;
            campaign.status = CampaignStatus::Sent;
            campaign.sent_at = Some(self.clock.now());
            self.campaigns.update_campaign(&campaign).await?;
            info!(campaign_id = %campaign.id, "campaign send complete");
        }
        Ok(())
    }

    /// `Cancel` (§4.4): accepted from SCHEDULED or SENDING. Cancels any
    /// pending `campaign.schedule` job; already-enqueued batches/email sends
    /// in flight are not retroactively undone, only further batch fan-out
    /// stops (checked in `process_batch`).
    #[instrument(skip(self), fields(%campaign_id), err)]
    pub async fn cancel(&self, campaign_id: Uuid) -> Result<(), RuntimeError> {
        let mut campaign = self
            .campaigns
            .get_campaign(&campaign_id)
            .await?
            .ok_or_else(|| RuntimeError::NotFound(format!("campaign {campaign_id}")))?;
        if !campaign.status.cancellable() {
            return Err(RuntimeError::InvalidState(format!(
                "campaign {campaign_id} cannot be cancelled (status: {:?})",
                campaign.status
            )));
        }
        self.queue.cancel_scheduled_campaign(&campaign_id).await?;
        campaign.status = CampaignStatus::Cancelled;
        self.campaigns.update_campaign(&campaign).await?;
        info!(campaign_id = %campaign_id, "campaign cancelled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use engine_types::contact::Contact;
    use engine_types::error::RepositoryError;
    use engine_types::job::JobPayload;
    use serde_json::json;

    use super::*;
    use crate::clock::FakeClock;

    #[derive(Clone, Default)]
    struct InMemoryJobRepo {
        jobs: Arc<Mutex<Vec<Job>>>,
    }

    impl JobRepository for InMemoryJobRepo {
        async fn enqueue(&self, job: &Job) -> Result<(), RepositoryError> {
            self.jobs.lock().unwrap().push(job.clone());
            Ok(())
        }
        async fn claim_due(&self, _now: chrono::DateTime<Utc>, _limit: u32) -> Result<Vec<Job>, RepositoryError> {
            Ok(Vec::new())
        }
        async fn get(&self, id: &Uuid) -> Result<Option<Job>, RepositoryError> {
            Ok(self.jobs.lock().unwrap().iter().find(|j| &j.id == id).cloned())
        }
        async fn mark_completed(&self, _id: &Uuid) -> Result<(), RepositoryError> {
            Ok(())
        }
        async fn mark_failed_retryable(
            &self,
            _id: &Uuid,
            _error: &str,
            _retry_at: chrono::DateTime<Utc>,
        ) -> Result<(), RepositoryError> {
            Ok(())
        }
        async fn mark_dead_lettered(&self, _id: &Uuid, _error: &str) -> Result<(), RepositoryError> {
            Ok(())
        }
        async fn cancel_by_key(&self, dedupe_key: &str) -> Result<bool, RepositoryError> {
            let mut jobs = self.jobs.lock().unwrap();
            if let Some(job) = jobs.iter_mut().find(|j| j.dedupe_key.as_deref() == Some(dedupe_key)) {
                job.status = engine_types::job::JobStatus::Cancelled;
                return Ok(true);
            }
            Ok(false)
        }
    }

    #[derive(Clone, Default)]
    struct InMemoryCampaignRepo {
        campaigns: Arc<Mutex<Vec<Campaign>>>,
    }

    impl CampaignRepository for InMemoryCampaignRepo {
        async fn create_campaign(&self, campaign: &Campaign) -> Result<(), RepositoryError> {
            self.campaigns.lock().unwrap().push(campaign.clone());
            Ok(())
        }
        async fn get_campaign(&self, id: &Uuid) -> Result<Option<Campaign>, RepositoryError> {
            Ok(self.campaigns.lock().unwrap().iter().find(|c| &c.id == id).cloned())
        }
        async fn update_campaign(&self, campaign: &Campaign) -> Result<(), RepositoryError> {
            let mut campaigns = self.campaigns.lock().unwrap();
            if let Some(existing) = campaigns.iter_mut().find(|c| c.id == campaign.id) {
                *existing = campaign.clone();
            }
            Ok(())
        }
        async fn increment_counts(&self, id: &Uuid, sent_delta: u32) -> Result<(), RepositoryError> {
            let mut campaigns = self.campaigns.lock().unwrap();
            if let Some(existing) = campaigns.iter_mut().find(|c| &c.id == id) {
                existing.sent_count += sent_delta;
            }
            Ok(())
        }
        async fn list_campaigns(&self, project_id: &Uuid) -> Result<Vec<Campaign>, RepositoryError> {
            Ok(self.campaigns.lock().unwrap().iter().filter(|c| &c.project_id == project_id).cloned().collect())
        }
    }

    #[derive(Clone, Default)]
    struct InMemoryContactRepo {
        contacts: Arc<Mutex<Vec<Contact>>>,
    }

    impl ContactRepository for InMemoryContactRepo {
        async fn get_contact(&self, id: &Uuid) -> Result<Option<Contact>, RepositoryError> {
            Ok(self.contacts.lock().unwrap().iter().find(|c| &c.id == id).cloned())
        }
        async fn update_contact_data(&self, _id: &Uuid, _data: &serde_json::Value) -> Result<(), RepositoryError> {
            Ok(())
        }
        async fn get_segment(&self, _id: &Uuid) -> Result<Option<engine_types::contact::Segment>, RepositoryError> {
            Ok(None)
        }
        async fn count_audience(&self, project_id: &Uuid, _filters: &[AudienceFilter]) -> Result<u64, RepositoryError> {
            Ok(self
                .contacts
                .lock()
                .unwrap()
                .iter()
                .filter(|c| &c.project_id == project_id && c.subscribed)
                .count() as u64)
        }
        async fn page_audience(
            &self,
            project_id: &Uuid,
            _filters: &[AudienceFilter],
            after: Option<&Uuid>,
            limit: u32,
        ) -> Result<Vec<Contact>, RepositoryError> {
            let mut matching: Vec<Contact> = self
                .contacts
                .lock()
                .unwrap()
                .iter()
                .filter(|c| &c.project_id == project_id && c.subscribed)
                .cloned()
                .collect();
            matching.sort_by_key(|c| c.id);
            let start = match after {
                Some(cursor) => matching.iter().position(|c| &c.id == cursor).map(|i| i + 1).unwrap_or(0),
                None => 0,
            };
            Ok(matching.into_iter().skip(start).take(limit as usize).collect())
        }
    }

    #[derive(Clone, Default)]
    struct InMemoryEmailRepo {
        emails: Arc<Mutex<Vec<Email>>>,
    }

    impl EmailRepository for InMemoryEmailRepo {
        async fn create_email(&self, email: &Email) -> Result<(), RepositoryError> {
            self.emails.lock().unwrap().push(email.clone());
            Ok(())
        }
        async fn get_email(&self, id: &Uuid) -> Result<Option<Email>, RepositoryError> {
            Ok(self.emails.lock().unwrap().iter().find(|e| &e.id == id).cloned())
        }
        async fn update_email(&self, email: &Email) -> Result<(), RepositoryError> {
            let mut emails = self.emails.lock().unwrap();
            if let Some(existing) = emails.iter_mut().find(|e| e.id == email.id) {
                *existing = email.clone();
            }
            Ok(())
        }
        async fn list_recent(
            &self,
            _project_id: &Uuid,
            _contact_id: Option<&Uuid>,
            _start: chrono::DateTime<Utc>,
            _end: chrono::DateTime<Utc>,
            _limit: u32,
        ) -> Result<Vec<Email>, RepositoryError> {
            Ok(Vec::new())
        }
    }

    fn sample_campaign(project_id: Uuid) -> Campaign {
        Campaign {
            id: Uuid::now_v7(),
            project_id,
            name: "Spring sale".to_string(),
            subject: "Hi {{name ?? there}}!".to_string(),
            body: "Hello {{name ?? friend}}, enjoy the sale.".to_string(),
            from: "sales@example.com".to_string(),
            reply_to: None,
            audience_type: AudienceType::All,
            segment_id: None,
            audience_filter: Vec::new(),
            status: CampaignStatus::Draft,
            scheduled_for: None,
            total_recipients: 0,
            sent_count: 0,
            delivered_count: 0,
            opened_count: 0,
            clicked_count: 0,
            bounced_count: 0,
            sent_at: None,
        }
    }

    fn sample_contact(project_id: Uuid, name: &str) -> Contact {
        Contact {
            id: Uuid::now_v7(),
            project_id,
            email: format!("{name}@example.com"),
            subscribed: true,
            data: json!({"name": name}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn build_dispatcher(
        campaigns: InMemoryCampaignRepo,
        contacts: InMemoryContactRepo,
        emails: InMemoryEmailRepo,
        jobs: InMemoryJobRepo,
        clock: FakeClock,
    ) -> CampaignDispatcher<InMemoryCampaignRepo, InMemoryContactRepo, InMemoryEmailRepo, InMemoryJobRepo, FakeClock> {
        let queue = JobQueue::new(jobs, clock.clone());
        CampaignDispatcher::new(campaigns, contacts, emails, queue, clock, 500, 5)
    }

    #[tokio::test]
    async fn send_with_zero_recipients_is_rejected() {
        let project_id = Uuid::now_v7();
        let campaigns = InMemoryCampaignRepo::default();
        let campaign = sample_campaign(project_id);
        campaigns.create_campaign(&campaign).await.unwrap();
        let dispatcher =
            build_dispatcher(campaigns, InMemoryContactRepo::default(), InMemoryEmailRepo::default(), InMemoryJobRepo::default(), FakeClock::default());

        let err = dispatcher.send(campaign.id, None).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Validation(_)));
    }

    #[tokio::test]
    async fn send_in_the_future_schedules_instead_of_sending() {
        let project_id = Uuid::now_v7();
        let campaigns = InMemoryCampaignRepo::default();
        let contacts = InMemoryContactRepo::default();
        let campaign = sample_campaign(project_id);
        campaigns.create_campaign(&campaign).await.unwrap();
        contacts.contacts.lock().unwrap().push(sample_contact(project_id, "Alice"));
        let jobs = InMemoryJobRepo::default();
        let jobs_handle = jobs.jobs.clone();
        let clock = FakeClock::default();
        let fire_at = clock.now() + chrono::Duration::hours(1);
        let dispatcher = build_dispatcher(campaigns.clone(), contacts, InMemoryEmailRepo::default(), jobs, clock);

        dispatcher.send(campaign.id, Some(fire_at)).await.unwrap();

        let stored = campaigns.get_campaign(&campaign.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CampaignStatus::Scheduled);
        assert_eq!(stored.total_recipients, 1);
        let jobs = jobs_handle.lock().unwrap();
        assert!(matches!(&jobs[0].payload, JobPayload::CampaignSchedule { campaign_id } if *campaign_id == campaign.id));
    }

    #[tokio::test]
    async fn send_in_the_past_starts_sending_immediately() {
        let project_id = Uuid::now_v7();
        let campaigns = InMemoryCampaignRepo::default();
        let contacts = InMemoryContactRepo::default();
        let campaign = sample_campaign(project_id);
        campaigns.create_campaign(&campaign).await.unwrap();
        contacts.contacts.lock().unwrap().push(sample_contact(project_id, "Alice"));
        let clock = FakeClock::default();
        let past = clock.now() - chrono::Duration::hours(1);
        let dispatcher = build_dispatcher(campaigns.clone(), contacts, InMemoryEmailRepo::default(), InMemoryJobRepo::default(), clock);

        dispatcher.send(campaign.id, Some(past)).await.unwrap();

        let stored = campaigns.get_campaign(&campaign.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CampaignStatus::Sending);
    }

    #[tokio::test]
    async fn process_batch_renders_per_contact_template_data() {
        let project_id = Uuid::now_v7();
        let campaigns = InMemoryCampaignRepo::default();
        let contacts = InMemoryContactRepo::default();
        let emails = InMemoryEmailRepo::default();
        let mut campaign = sample_campaign(project_id);
        campaign.status = CampaignStatus::Sending;
        campaign.total_recipients = 1;
        campaigns.create_campaign(&campaign).await.unwrap();
        contacts.contacts.lock().unwrap().push(sample_contact(project_id, "Alice"));
        let dispatcher =
            build_dispatcher(campaigns, contacts, emails.clone(), InMemoryJobRepo::default(), FakeClock::default());

        dispatcher.process_batch(campaign.id, 0, 500, None).await.unwrap();

        let stored = emails.emails.lock().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].subject, "Hi Alice!");
        assert_eq!(stored[0].body, "Hello Alice, enjoy the sale.");
    }

    #[tokio::test]
    async fn process_batch_marks_campaign_sent_when_audience_exhausted() {
        let project_id = Uuid::now_v7();
        let campaigns = InMemoryCampaignRepo::default();
        let contacts = InMemoryContactRepo::default();
        let mut campaign = sample_campaign(project_id);
        campaign.status = CampaignStatus::Sending;
        campaign.total_recipients = 1;
        campaigns.create_campaign(&campaign).await.unwrap();
        contacts.contacts.lock().unwrap().push(sample_contact(project_id, "Alice"));
        let dispatcher = build_dispatcher(
            campaigns.clone(),
            contacts,
            InMemoryEmailRepo::default(),
            InMemoryJobRepo::default(),
            FakeClock::default(),
        );

        dispatcher.process_batch(campaign.id, 0, 500, None).await.unwrap();

        let stored = campaigns.get_campaign(&campaign.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CampaignStatus::Sent);
    }

    #[tokio::test]
    async fn process_batch_on_cancelled_campaign_is_a_no_op() {
        let project_id = Uuid::now_v7();
        let campaigns = InMemoryCampaignRepo::default();
        let emails = InMemoryEmailRepo::default();
        let mut campaign = sample_campaign(project_id);
        campaign.status = CampaignStatus::Cancelled;
        campaigns.create_campaign(&campaign).await.unwrap();
        let dispatcher = build_dispatcher(
            campaigns,
            InMemoryContactRepo::default(),
            emails.clone(),
            InMemoryJobRepo::default(),
            FakeClock::default(),
        );

        dispatcher.process_batch(campaign.id, 0, 500, None).await.unwrap();

        assert!(emails.emails.lock().unwrap().is_empty());
    }
}
