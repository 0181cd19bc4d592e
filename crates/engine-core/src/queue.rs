//! Job Queue Adapter (spec.md §4.2): durable at-least-once delivery of
//! delayed work, plus the worker loop that polls and dispatches due jobs.

use std::time::Duration;

use chrono::Utc;
use engine_types::error::{QueueError, RepositoryError};
use engine_types::job::{Job, JobPayload};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::repository::JobRepository;

/// Thin enqueue-side wrapper over a `JobRepository`, building the canonical
/// `JobPayload` shapes from spec.md §6.
#[derive(Clone)]
pub struct JobQueue<JR, C> {
    repo: JR,
    clock: C,
}

impl<JR: JobRepository, C: Clock> JobQueue<JR, C> {
    pub fn new(repo: JR, clock: C) -> Self {
        Self { repo, clock }
    }

    fn run_at(&self, delay_ms: i64) -> chrono::DateTime<Utc> {
        self.clock.now() + chrono::Duration::milliseconds(delay_ms.max(0))
    }

    pub async fn enqueue_step(
        &self,
        execution_id: Uuid,
        step_id: String,
        delay_ms: i64,
        max_attempts: u32,
    ) -> Result<Uuid, RepositoryError> {
        let job = Job::new(JobPayload::WorkflowStep { execution_id, step_id }, self.run_at(delay_ms), max_attempts);
        let id = job.id;
        self.repo.enqueue(&job).await?;
        Ok(id)
    }

    pub async fn enqueue_timeout(
        &self,
        execution_id: Uuid,
        step_id: String,
        step_execution_id: Uuid,
        delay_ms: i64,
        max_attempts: u32,
    ) -> Result<Uuid, RepositoryError> {
        let job = Job::new(
            JobPayload::WorkflowTimeout { execution_id, step_id, step_execution_id },
            self.run_at(delay_ms),
            max_attempts,
        );
        let id = job.id;
        self.repo.enqueue(&job).await?;
        Ok(id)
    }

    pub async fn enqueue_email_send(
        &self,
        email_id: Uuid,
        delay_ms: Option<i64>,
        max_attempts: u32,
    ) -> Result<Uuid, RepositoryError> {
        let job = Job::new(JobPayload::EmailSend { email_id }, self.run_at(delay_ms.unwrap_or(0)), max_attempts);
        let id = job.id;
        self.repo.enqueue(&job).await?;
        Ok(id)
    }

    pub async fn enqueue_campaign_batch(
        &self,
        campaign_id: Uuid,
        batch_number: u32,
        limit: u32,
        cursor: Option<String>,
        max_attempts: u32,
    ) -> Result<Uuid, RepositoryError> {
        let job = Job::new(
            JobPayload::CampaignBatch { campaign_id, batch_number, limit, cursor },
            self.run_at(0),
            max_attempts,
        );
        let id = job.id;
        self.repo.enqueue(&job).await?;
        Ok(id)
    }

    pub async fn schedule_campaign(
        &self,
        campaign_id: Uuid,
        fire_at: chrono::DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<Uuid, RepositoryError> {
        let job = Job::new(JobPayload::CampaignSchedule { campaign_id }, fire_at, max_attempts);
        let id = job.id;
        self.repo.enqueue(&job).await?;
        Ok(id)
    }

    /// Best-effort cancel by the stable `timeout:{stepExecutionId}` key.
    pub async fn cancel_timeout(&self, step_execution_id: &Uuid) -> Result<bool, RepositoryError> {
        self.repo.cancel_by_key(&format!("timeout:{step_execution_id}")).await
    }

    /// Best-effort cancel by the stable `schedule:{campaignId}` key.
    pub async fn cancel_scheduled_campaign(&self, campaign_id: &Uuid) -> Result<bool, RepositoryError> {
        self.repo.cancel_by_key(&format!("schedule:{campaign_id}")).await
    }
}

/// Dispatches one claimed job to its handler. Implemented once per process
/// (wiring together the workflow runtime, campaign dispatcher, and email
/// sender), with each payload kind handled or skipped.
pub trait JobHandler: Send + Sync {
    /// Handle one job payload. A transient failure should return `Err`; the
    /// worker applies backoff/dead-lettering. `NotFound`/already-settled
    /// conditions should be absorbed by the handler and return `Ok(())`
    /// (spec.md §7 "concurrency no-op").
    fn handle(&self, payload: &JobPayload) -> impl std::future::Future<Output = Result<(), String>> + Send;
}

/// Polls `JobRepository::claim_due` on an interval and dispatches claimed
/// jobs to a `JobHandler`, applying exponential backoff on failure and
/// dead-lettering once `max_attempts` is exhausted (spec.md §4.2).
pub struct JobWorker<JR, C, H> {
    repo: JR,
    clock: C,
    handler: H,
    poll_interval: Duration,
    retry_backoff_base_ms: i64,
    claim_batch_size: u32,
}

impl<JR: JobRepository, C: Clock, H: JobHandler> JobWorker<JR, C, H> {
    pub fn new(
        repo: JR,
        clock: C,
        handler: H,
        poll_interval: Duration,
        retry_backoff_base_ms: i64,
        claim_batch_size: u32,
    ) -> Self {
        Self { repo, clock, handler, poll_interval, retry_backoff_base_ms, claim_batch_size }
    }

    /// Run forever, polling for due jobs. Exits only if `claim_due` itself
    /// returns a persistent repository error.
    pub async fn run(&self) -> Result<(), QueueError> {
        loop {
            self.poll_once().await?;
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Claim and process one round of due jobs. Exposed separately so tests
    /// can drive the worker deterministically without a sleep loop.
    pub async fn poll_once(&self) -> Result<usize, QueueError> {
        let now = self.clock.now();
        let jobs = self.repo.claim_due(now, self.claim_batch_size).await?;
        let count = jobs.len();
        for job in jobs {
            self.process_job(job).await?;
        }
        Ok(count)
    }

    async fn process_job(&self, job: Job) -> Result<(), QueueError> {
        debug!(job_id = %job.id, attempts = job.attempts, "processing job");
        match self.handler.handle(&job.payload).await {
            Ok(()) => {
                self.repo.mark_completed(&job.id).await?;
            }
            Err(error) => {
                let attempts = job.attempts + 1;
                if attempts >= job.max_attempts {
                    warn!(job_id = %job.id, attempts, %error, "job dead-lettered");
                    self.repo.mark_dead_lettered(&job.id, &error).await?;
                } else {
                    let backoff_ms = self.retry_backoff_base_ms * 2i64.pow(attempts.min(16));
                    let retry_at = self.clock.now() + chrono::Duration::milliseconds(backoff_ms);
                    info!(job_id = %job.id, attempts, backoff_ms, "job retry scheduled");
                    self.repo.mark_failed_retryable(&job.id, &error, retry_at).await?;
                }
            }
        }
        Ok(())
    }
}
