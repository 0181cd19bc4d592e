//! Workflow repository trait definition.
//!
//! Covers workflow definitions, executions, and step executions -- the three
//! entity families the runtime reads and writes on every operation. Uses
//! native async fn in traits (Rust 2024 edition, no `async_trait` macro).

use chrono::{DateTime, Utc};
use engine_types::error::RepositoryError;
use engine_types::workflow::{StepExecution, StepExecutionStatus, WorkflowDefinition, WorkflowExecution};
use uuid::Uuid;

/// Repository trait for workflow persistence.
pub trait WorkflowRepository: Send + Sync {
    // -----------------------------------------------------------------------
    // Definitions
    // -----------------------------------------------------------------------

    /// Upsert a workflow definition (insert or replace by ID).
    fn save_definition(
        &self,
        def: &WorkflowDefinition,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get a workflow definition by its UUID.
    fn get_definition(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowDefinition>, RepositoryError>> + Send;

    /// List workflow definitions for a project, optionally enabled-only.
    fn list_definitions(
        &self,
        project_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowDefinition>, RepositoryError>> + Send;

    /// Enabled workflow definitions in a project whose `triggerEventName`
    /// matches `event_name` (§4.3 "Trigger new executions").
    fn find_enabled_by_trigger(
        &self,
        project_id: &Uuid,
        event_name: &str,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowDefinition>, RepositoryError>> + Send;

    /// Delete a workflow definition by ID. Returns `true` if it existed.
    fn delete_definition(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Executions
    // -----------------------------------------------------------------------

    /// Create a new workflow execution record.
    fn create_execution(
        &self,
        execution: &WorkflowExecution,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get an execution by its UUID.
    fn get_execution(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowExecution>, RepositoryError>> + Send;

    /// Persist a full execution update (status/currentStepId/context/timestamps).
    fn update_execution(
        &self,
        execution: &WorkflowExecution,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Count executions for `(workflowId, contactId)` -- used by the
    /// `allowReentry=false` re-entry guard.
    fn count_executions_for_contact(
        &self,
        workflow_id: &Uuid,
        contact_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;

    /// Whether a RUNNING or WAITING execution exists for `(workflowId,
    /// contactId)` -- used by the `allowReentry=true` guard (only a RUNNING
    /// execution blocks re-entry per spec.md §4.1, but WAITING executions are
    /// also non-terminal and share the same exclusivity).
    fn has_active_execution_for_contact(
        &self,
        workflow_id: &Uuid,
        contact_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    fn list_executions(
        &self,
        workflow_id: &Uuid,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowExecution>, RepositoryError>> + Send;

    /// Executions in a project within `[start, end]`, most recent first --
    /// feeds the activity aggregator's `workflow.started`/`workflow.completed`
    /// activities (§4.5). Project scoping joins through the owning workflow.
    fn list_recent_executions(
        &self,
        project_id: &Uuid,
        contact_id: Option<&Uuid>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowExecution>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Step executions
    // -----------------------------------------------------------------------

    /// Atomically claim a step for processing: insert a new `StepExecution`
    /// row in `RUNNING`, or transition an existing non-terminal row from
    /// `PENDING` to `RUNNING`. Returns `None` if no claimable row exists
    /// (already `RUNNING`/`WAITING`/terminal) -- the caller treats this as a
    /// concurrency no-op (spec.md §5).
    fn claim_step(
        &self,
        execution_id: &Uuid,
        step_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<StepExecution>, RepositoryError>> + Send;

    fn get_step_execution(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<StepExecution>, RepositoryError>> + Send;

    /// Atomically transition a `WAITING` step execution to `RUNNING` so
    /// `HandleEvent`/`ProcessTimeout` resume it at most once. Returns `None`
    /// if the row is no longer `WAITING` (already resumed by the other path
    /// -- the timeout-cancel race of spec.md §8 scenario 6).
    fn claim_waiting_step(
        &self,
        step_execution_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<StepExecution>, RepositoryError>> + Send;

    /// Persist a step execution's terminal or waiting state.
    fn update_step_execution(
        &self,
        step_execution: &StepExecution,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// All `StepExecution`s in an execution, ordered by `startedAt` ascending.
    fn list_step_executions(
        &self,
        execution_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<StepExecution>, RepositoryError>> + Send;

    /// Count of `StepExecution`s ever created for an execution (runaway guard).
    fn count_step_executions(
        &self,
        execution_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;

    /// `WAITING` step executions whose step is `WAIT_FOR_EVENT` with a
    /// matching `wait_event_name`, scoped to project (and contact, if
    /// supplied). Resolves the indexed lookup from SPEC_FULL's open-question
    /// decision instead of a full table scan.
    fn find_waiting_for_event(
        &self,
        project_id: &Uuid,
        event_name: &str,
        contact_id: Option<&Uuid>,
    ) -> impl std::future::Future<Output = Result<Vec<StepExecution>, RepositoryError>> + Send;

    /// `WAITING` step executions whose `executeAfter` has elapsed -- not
    /// normally needed (the queue drives timeouts), but useful for recovery
    /// sweeps after a restart.
    fn find_overdue_waiting(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<StepExecution>, RepositoryError>> + Send;
}

/// Build the row a freshly-claimed step execution should be persisted as.
pub fn new_running_step_execution(execution_id: Uuid, step_id: &str, now: DateTime<Utc>) -> StepExecution {
    StepExecution {
        id: Uuid::now_v7(),
        execution_id,
        step_id: step_id.to_string(),
        status: StepExecutionStatus::Running,
        started_at: Some(now),
        completed_at: None,
        execute_after: None,
        output: None,
        error: None,
        wait_event_name: None,
    }
}
