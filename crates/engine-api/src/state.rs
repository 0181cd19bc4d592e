//! Application state wiring all services together.
//!
//! AppState holds the concrete service instances used by both the CLI and
//! the REST API: repositories are pinned to their SQLite implementations,
//! services are generic over repository/clock/webhook-client traits in
//! `engine-core` but concretized here.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use engine_core::activity::ActivityAggregator;
use engine_core::campaign::CampaignDispatcher;
use engine_core::clock::SystemClock;
use engine_core::event_router::EventRouter;
use engine_core::queue::{JobHandler, JobQueue, JobWorker};
use engine_core::workflow::runtime::Runtime;
use engine_infra::config::load_engine_config;
use engine_infra::sqlite::campaign::SqliteCampaignRepository;
use engine_infra::sqlite::contact::SqliteContactRepository;
use engine_infra::sqlite::email::SqliteEmailRepository;
use engine_infra::sqlite::event::SqliteEventRepository;
use engine_infra::sqlite::job::SqliteJobRepository;
use engine_infra::sqlite::pool::{default_database_url, DatabasePool};
use engine_infra::sqlite::template::SqliteTemplateRepository;
use engine_infra::sqlite::workflow::SqliteWorkflowRepository;
use engine_infra::webhook::ReqwestWebhookClient;
use engine_types::job::JobPayload;

/// The Workflow Runtime, pinned to the SQLite repositories and the reqwest
/// WEBHOOK client.
pub type ConcreteRuntime = Runtime<
    SqliteWorkflowRepository,
    SqliteContactRepository,
    SqliteEmailRepository,
    SqliteTemplateRepository,
    SqliteJobRepository,
    SystemClock,
    ReqwestWebhookClient,
>;

pub type ConcreteEventRouter = EventRouter<
    SqliteWorkflowRepository,
    SqliteEventRepository,
    SqliteContactRepository,
    SqliteEmailRepository,
    SqliteTemplateRepository,
    SqliteJobRepository,
    SystemClock,
    ReqwestWebhookClient,
>;

pub type ConcreteCampaignDispatcher = CampaignDispatcher<
    SqliteCampaignRepository,
    SqliteContactRepository,
    SqliteEmailRepository,
    SqliteJobRepository,
    SystemClock,
>;

pub type ConcreteActivityAggregator =
    ActivityAggregator<SqliteEmailRepository, SqliteEventRepository, SqliteWorkflowRepository, SystemClock>;

/// Dispatches claimed jobs to the runtime or the campaign dispatcher,
/// keyed on [`JobPayload`] variant (spec.md §6).
///
/// `JobPayload::EmailSend` has no handler here: actual message delivery is
/// an out-of-scope external collaborator (spec.md §1, "the SMTP/email-
/// provider adapter"). The engine's own responsibility ends at creating the
/// PENDING `Email` row and enqueuing this job; a separate, non-Rust-
/// workspace consumer process claims `email.send` jobs against the real
/// provider. This worker acknowledges them as a no-op so they don't pile up
/// dead-lettered in a deployment that never runs that consumer.
pub struct EngineJobHandler {
    pub runtime: Arc<ConcreteRuntime>,
    pub campaigns: Arc<ConcreteCampaignDispatcher>,
}

impl JobHandler for EngineJobHandler {
    async fn handle(&self, payload: &JobPayload) -> Result<(), String> {
        match payload {
            JobPayload::WorkflowStep { execution_id, step_id } => self
                .runtime
                .process_step(*execution_id, step_id.clone())
                .await
                .map_err(|e| e.to_string()),
            JobPayload::WorkflowTimeout { execution_id, step_id, step_execution_id } => self
                .runtime
                .process_timeout(*execution_id, step_id.clone(), *step_execution_id)
                .await
                .map_err(|e| e.to_string()),
            JobPayload::CampaignBatch { campaign_id, batch_number, limit, cursor } => self
                .campaigns
                .process_batch(*campaign_id, *batch_number, *limit, cursor.clone())
                .await
                .map_err(|e| e.to_string()),
            JobPayload::CampaignSchedule { campaign_id } => {
                self.campaigns.start_sending(*campaign_id).await.map_err(|e| e.to_string())
            }
            JobPayload::EmailSend { email_id } => {
                tracing::debug!(%email_id, "email.send job claimed; delivery is handled by an external provider consumer");
                Ok(())
            }
        }
    }
}

/// Shared application state. Used by both the `serve` CLI command's HTTP
/// surface and the background job worker.
#[derive(Clone)]
pub struct AppState {
    pub data_dir: PathBuf,
    pub db_pool: DatabasePool,
    pub workflows: SqliteWorkflowRepository,
    pub campaigns_repo: SqliteCampaignRepository,
    pub contacts: SqliteContactRepository,
    pub events: SqliteEventRepository,
    pub runtime: Arc<ConcreteRuntime>,
    pub event_router: Arc<ConcreteEventRouter>,
    pub campaigns: Arc<ConcreteCampaignDispatcher>,
    pub activity: Arc<ConcreteActivityAggregator>,
    pub job_max_attempts: u32,
}

impl AppState {
    /// Initialize application state: connect to the database, load
    /// `engine.toml`, and wire every service.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();
        tokio::fs::create_dir_all(&data_dir).await?;

        let db_url = std::env::var("ENGINE_DATABASE_URL").unwrap_or_else(|_| default_database_url());
        let db_pool = DatabasePool::new(&db_url).await?;

        let config = load_engine_config(&data_dir).await;
        let clock = SystemClock;

        let workflows = SqliteWorkflowRepository::new(db_pool.clone());
        let campaigns_repo = SqliteCampaignRepository::new(db_pool.clone());
        let contacts = SqliteContactRepository::new(db_pool.clone());
        let emails = SqliteEmailRepository::new(db_pool.clone());
        let events = SqliteEventRepository::new(db_pool.clone());
        let templates = SqliteTemplateRepository::new(db_pool.clone());
        let jobs = SqliteJobRepository::new(db_pool.clone());

        let webhook = ReqwestWebhookClient::new(Duration::from_secs(config.webhook_timeout_secs));
        let runtime_queue = JobQueue::new(jobs.clone(), clock.clone());

        let runtime = Arc::new(Runtime::new(
            workflows.clone(),
            contacts.clone(),
            emails.clone(),
            templates.clone(),
            runtime_queue,
            clock.clone(),
            webhook,
            config.job_max_attempts,
            config.max_step_executions_per_run,
        ));

        let event_router = Arc::new(EventRouter::new(
            workflows.clone(),
            events.clone(),
            runtime.clone(),
            clock.clone(),
            config.workflow_cache_ttl_secs,
        ));

        let campaign_queue = JobQueue::new(jobs.clone(), clock.clone());
        let campaigns = Arc::new(CampaignDispatcher::new(
            campaigns_repo.clone(),
            contacts.clone(),
            emails.clone(),
            campaign_queue,
            clock.clone(),
            config.campaign_batch_size,
            config.job_max_attempts,
        ));

        let activity = Arc::new(ActivityAggregator::new(
            emails.clone(),
            events.clone(),
            workflows.clone(),
            clock.clone(),
            config.stats_cache_ttl_secs,
            config.activity_page_size_cap,
        ));

        Ok(Self {
            data_dir,
            db_pool,
            workflows,
            campaigns_repo,
            contacts,
            events,
            runtime,
            event_router,
            campaigns,
            activity,
            job_max_attempts: config.job_max_attempts,
        })
    }

    /// Build the background job worker loop. Kept separate from `init` so
    /// the `serve` command can spawn it alongside the HTTP listener.
    pub async fn build_job_worker(&self) -> anyhow::Result<JobWorker<SqliteJobRepository, SystemClock, EngineJobHandler>> {
        let config = load_engine_config(&self.data_dir).await;
        let jobs = SqliteJobRepository::new(self.db_pool.clone());
        let handler = EngineJobHandler { runtime: self.runtime.clone(), campaigns: self.campaigns.clone() };
        Ok(JobWorker::new(
            jobs,
            SystemClock,
            handler,
            Duration::from_millis(config.queue_poll_interval_ms),
            config.job_retry_backoff_base_ms,
            50,
        ))
    }
}

/// Resolve the engine's data directory: `$ENGINE_DATA_DIR`, falling back to
/// `$HOME/.engine` (matching `engine-infra::sqlite::pool::default_database_url`'s
/// own fallback).
fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("ENGINE_DATA_DIR") {
        return PathBuf::from(dir);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".engine")
}
