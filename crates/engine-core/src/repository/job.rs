//! Job queue repository trait definition.
//!
//! The durable store the job queue worker loop polls against. `engine-core`
//! never talks SQL directly -- `engine-infra` implements this over SQLite.

use chrono::{DateTime, Utc};
use engine_types::error::RepositoryError;
use engine_types::job::Job;
use uuid::Uuid;

pub trait JobRepository: Send + Sync {
    fn enqueue(&self, job: &Job) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Atomically claim up to `limit` due (`run_at <= now`, status `PENDING`)
    /// jobs, marking them `RUNNING`. Returns the claimed jobs.
    fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<Job>, RepositoryError>> + Send;

    fn get(&self, id: &Uuid) -> impl std::future::Future<Output = Result<Option<Job>, RepositoryError>> + Send;

    /// Mark a job completed, removing it from the pending set.
    fn mark_completed(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Mark a job failed with a retry scheduled at `retry_at`, incrementing
    /// its attempt counter.
    fn mark_failed_retryable(
        &self,
        id: &Uuid,
        error: &str,
        retry_at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Dead-letter a job after its retries are exhausted.
    fn mark_dead_lettered(
        &self,
        id: &Uuid,
        error: &str,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Best-effort cancel of a pending job by its stable `dedupe_key`
    /// (`timeout:{stepExecutionId}` / `schedule:{campaignId}`, §4.2/§6).
    /// Returns `true` if a pending job was found and cancelled.
    fn cancel_by_key(
        &self,
        dedupe_key: &str,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;
}
