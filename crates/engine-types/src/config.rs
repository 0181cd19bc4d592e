//! Engine-wide configuration.
//!
//! `EngineConfig` is the top-level `engine.toml` loaded by
//! `engine-infra::config::load_engine_config`. All fields have defaults
//! grounded in spec.md's numeric recommendations (§4.2, §4.4, §9).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// How often the job worker polls for due jobs.
    #[serde(default = "default_queue_poll_interval_ms")]
    pub queue_poll_interval_ms: u64,

    /// Bounded retry cap before a job is dead-lettered (§4.2: "cap at ~5 attempts").
    #[serde(default = "default_job_max_attempts")]
    pub job_max_attempts: u32,

    /// Base delay for exponential backoff between job retries.
    #[serde(default = "default_job_retry_backoff_base_ms")]
    pub job_retry_backoff_base_ms: u64,

    /// TTL for the enabled-workflow-by-trigger-name cache (§4.3).
    #[serde(default = "default_workflow_cache_ttl_secs")]
    pub workflow_cache_ttl_secs: u64,

    /// TTL for the activity stats cache (§4.5).
    #[serde(default = "default_stats_cache_ttl_secs")]
    pub stats_cache_ttl_secs: u64,

    /// Runaway guard: maximum StepExecutions per WorkflowExecution (§9).
    #[serde(default = "default_max_step_executions_per_run")]
    pub max_step_executions_per_run: u32,

    /// Default campaign batch size (§4.4).
    #[serde(default = "default_campaign_batch_size")]
    pub campaign_batch_size: u32,

    /// Outbound WEBHOOK step request timeout (§5: "recommended 30s").
    #[serde(default = "default_webhook_timeout_secs")]
    pub webhook_timeout_secs: u64,

    /// Hard cap on activities returned per page (§4.5).
    #[serde(default = "default_activity_page_size_cap")]
    pub activity_page_size_cap: u32,
}

fn default_queue_poll_interval_ms() -> u64 {
    500
}
fn default_job_max_attempts() -> u32 {
    5
}
fn default_job_retry_backoff_base_ms() -> u64 {
    1_000
}
fn default_workflow_cache_ttl_secs() -> u64 {
    300
}
fn default_stats_cache_ttl_secs() -> u64 {
    300
}
fn default_max_step_executions_per_run() -> u32 {
    10_000
}
fn default_campaign_batch_size() -> u32 {
    500
}
fn default_webhook_timeout_secs() -> u64 {
    30
}
fn default_activity_page_size_cap() -> u32 {
    100
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queue_poll_interval_ms: default_queue_poll_interval_ms(),
            job_max_attempts: default_job_max_attempts(),
            job_retry_backoff_base_ms: default_job_retry_backoff_base_ms(),
            workflow_cache_ttl_secs: default_workflow_cache_ttl_secs(),
            stats_cache_ttl_secs: default_stats_cache_ttl_secs(),
            max_step_executions_per_run: default_max_step_executions_per_run(),
            campaign_batch_size: default_campaign_batch_size(),
            webhook_timeout_secs: default_webhook_timeout_secs(),
            activity_page_size_cap: default_activity_page_size_cap(),
        }
    }
}
