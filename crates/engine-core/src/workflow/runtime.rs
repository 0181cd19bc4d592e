//! The Workflow Runtime (spec.md §4.1): `StartExecution`, `ProcessStep`,
//! `HandleEvent`, `ProcessTimeout`, and the step dispatch table.
//!
//! Business-level step failures (a WEBHOOK network error, a CONDITION type
//! mismatch) are absorbed here: the StepExecution and WorkflowExecution are
//! persisted as `FAILED` and `process_step` returns `Ok(())` -- the runtime
//! does not retry a step automatically (§4.1 "Failure model"). Repository
//! I/O errors instead propagate as `Err`, so the *job delivering this call*
//! gets the queue's bounded retry/dead-letter treatment (§4.2), not the step
//! itself.

use chrono::{DateTime, Utc};
use engine_types::contact::Contact;
use engine_types::email::{Email, EmailSourceType, EmailStatus};
use engine_types::error::RuntimeError;
use engine_types::workflow::{
    StepConfig, StepDefinition, StepExecution, StepExecutionStatus, StepOutput, Transition,
    WorkflowDefinition, WorkflowExecution, WorkflowExecutionStatus,
};
use serde_json::{Map, Value};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::queue::JobQueue;
use crate::repository::{ContactRepository, EmailRepository, JobRepository, TemplateRepository, WorkflowRepository};
use crate::webhook::{WebhookClient, WebhookRequest};
use crate::workflow::condition;
use crate::workflow::render;

/// Outcome of dispatching one step, before it is persisted and the
/// transition is selected.
enum Dispatch {
    /// The step finished; `suspend_for_ms` is `Some` only for DELAY, whose
    /// post-condition keeps the *execution* WAITING even though the step
    /// itself is COMPLETED (§4.1's step dispatch table).
    Completed { output: StepOutput, suspend_for_ms: Option<i64> },
    /// WAIT_FOR_EVENT: the step (and execution) go WAITING; `timeout_ms` is
    /// `Some` when a timeout job should be enqueued (`config.timeout > 0`).
    Waiting { wait_event_name: String, execute_after: Option<DateTime<Utc>>, timeout_ms: Option<i64> },
    /// EXIT.
    Exited { reason: Option<String> },
}

/// The Workflow Runtime, generic over the repository ports it depends on.
pub struct Runtime<WR, CR, ER, TR, JR, C, WH> {
    workflows: WR,
    contacts: CR,
    emails: ER,
    templates: TR,
    queue: JobQueue<JR, C>,
    clock: C,
    webhook: WH,
    job_max_attempts: u32,
    max_step_executions: u32,
}

impl<WR, CR, ER, TR, JR, C, WH> Runtime<WR, CR, ER, TR, JR, C, WH>
where
    WR: WorkflowRepository,
    CR: ContactRepository,
    ER: EmailRepository,
    TR: TemplateRepository,
    JR: JobRepository,
    C: Clock,
    WH: WebhookClient,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        workflows: WR,
        contacts: CR,
        emails: ER,
        templates: TR,
        queue: JobQueue<JR, C>,
        clock: C,
        webhook: WH,
        job_max_attempts: u32,
        max_step_executions: u32,
    ) -> Self {
        Self { workflows, contacts, emails, templates, queue, clock, webhook, job_max_attempts, max_step_executions }
    }

    // -------------------------------------------------------------------
    // StartExecution
    // -------------------------------------------------------------------

    /// `StartExecution` (§4.1). Applies the re-entry policy, creates the
    /// execution pinned at the TRIGGER step, and enqueues its first
    /// `ProcessStep` job.
    #[instrument(skip(self, context), fields(%workflow_id, %contact_id), err)]
    pub async fn start_execution(
        &self,
        workflow_id: Uuid,
        contact_id: Uuid,
        context: Value,
    ) -> Result<Uuid, RuntimeError> {
        let workflow = self
            .workflows
            .get_definition(&workflow_id)
            .await?
            .ok_or_else(|| RuntimeError::NotFound(format!("workflow {workflow_id}")))?;

        if workflow.allow_reentry {
            if self.workflows.has_active_execution_for_contact(&workflow_id, &contact_id).await? {
                return Err(RuntimeError::InvalidState(
                    "a RUNNING execution already exists for this contact".to_string(),
                ));
            }
        } else {
            let count = self.workflows.count_executions_for_contact(&workflow_id, &contact_id).await?;
            if count > 0 {
                return Err(RuntimeError::InvalidState(
                    "workflow does not allow re-entry and an execution already exists".to_string(),
                ));
            }
        }

        let trigger = workflow
            .trigger_step()
            .ok_or_else(|| RuntimeError::InvalidState("workflow has no TRIGGER step".to_string()))?;

        let now = self.clock.now();
        let execution = WorkflowExecution {
            id: Uuid::now_v7(),
            workflow_id,
            contact_id,
            status: WorkflowExecutionStatus::Running,
            current_step_id: Some(trigger.id.clone()),
            started_at: now,
            completed_at: None,
            exit_reason: None,
            context,
        };
        self.workflows.create_execution(&execution).await?;
        self.queue.enqueue_step(execution.id, trigger.id.clone(), 0, self.job_max_attempts).await?;
        info!(execution_id = %execution.id, "execution started");
        Ok(execution.id)
    }

    // -------------------------------------------------------------------
    // ProcessStep
    // -------------------------------------------------------------------

    /// `ProcessStep` (§4.1). Idempotent against duplicate job delivery: a
    /// step already claimed (RUNNING/WAITING/terminal) is a silent no-op.
    #[instrument(skip(self), fields(%execution_id, %step_id), err)]
    pub async fn process_step(&self, execution_id: Uuid, step_id: String) -> Result<(), RuntimeError> {
        let execution = self
            .workflows
            .get_execution(&execution_id)
            .await?
            .ok_or_else(|| RuntimeError::NotFound(format!("execution {execution_id}")))?;

        if execution.status != WorkflowExecutionStatus::Running {
            return Ok(());
        }

        let Some(step_exec) = self.workflows.claim_step(&execution_id, &step_id).await? else {
            return Ok(());
        };

        let total = self.workflows.count_step_executions(&execution_id).await?;
        if total > self.max_step_executions as u64 {
            warn!(execution_id = %execution_id, total, "runaway guard tripped");
            self.fail(&execution, step_exec, "execution exceeded the maximum step execution count").await?;
            return Err(RuntimeError::RunawayGuard { max: self.max_step_executions });
        }

        let workflow = self
            .workflows
            .get_definition(&execution.workflow_id)
            .await?
            .ok_or_else(|| RuntimeError::NotFound(format!("workflow {}", execution.workflow_id)))?;
        let step = workflow
            .step(&step_id)
            .ok_or_else(|| RuntimeError::NotFound(format!("step {step_id}")))?
            .clone();

        match self.dispatch(&workflow, &step, &execution, &step_exec).await {
            Ok(Dispatch::Completed { output, suspend_for_ms }) => {
                let outgoing = workflow.outgoing(&step.id);
                let next = select_transition(&outgoing, output.branch.as_deref());
                self.complete_step(&execution, step_exec, output, next, suspend_for_ms).await
            }
            Ok(Dispatch::Waiting { wait_event_name, execute_after, timeout_ms }) => {
                self.suspend(&execution, step_exec, wait_event_name, execute_after, timeout_ms).await
            }
            Ok(Dispatch::Exited { reason }) => self.exit(&execution, step_exec, reason).await,
            Err(error) => self.fail(&execution, step_exec, &error).await,
        }
    }

    /// Dispatch one step per the table in spec.md §4.1. Returns `Err` only
    /// for a business-level step failure (absorbed by the caller); a
    /// repository/backend failure propagates via `?` as `RuntimeError`
    /// directly from `process_step`, bypassing this `Result<_, String>`.
    async fn dispatch(
        &self,
        workflow: &WorkflowDefinition,
        step: &StepDefinition,
        execution: &WorkflowExecution,
        step_exec: &StepExecution,
    ) -> Result<Dispatch, String> {
        match &step.config {
            StepConfig::Trigger { .. } => Ok(Dispatch::Completed { output: StepOutput::empty(), suspend_for_ms: None }),

            StepConfig::SendEmail { template_ref } => {
                let contact = self.require_contact(execution.contact_id).await?;
                let template = self
                    .templates
                    .get_template(template_ref)
                    .await
                    .map_err(|e| e.to_string())?
                    .ok_or_else(|| format!("template '{template_ref}' not found"))?;

                let data = render::email_template_data(&contact.email, &contact.data, &execution.context);
                let subject = render::render(&template.subject, &data);
                let body = render::render(&template.body, &data);
                let source_type =
                    if template.transactional { EmailSourceType::Transactional } else { EmailSourceType::Workflow };

                let email = Email {
                    id: Uuid::now_v7(),
                    project_id: workflow.project_id,
                    contact_id: execution.contact_id,
                    template_ref: Some(template_ref.clone()),
                    campaign_id: None,
                    workflow_execution_id: Some(execution.id),
                    workflow_step_execution_id: Some(step_exec.id),
                    source_type,
                    subject,
                    body,
                    from: template.from.clone(),
                    reply_to: template.reply_to.clone(),
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
                self.emails.create_email(&email).await.map_err(|e| e.to_string())?;
                self.queue
                    .enqueue_email_send(email.id, None, self.job_max_attempts)
                    .await
                    .map_err(|e| e.to_string())?;
                Ok(Dispatch::Completed { output: StepOutput::empty(), suspend_for_ms: None })
            }

            StepConfig::Delay { amount, unit } => {
                let delay_ms = amount * unit.as_seconds() * 1000;
                Ok(Dispatch::Completed { output: StepOutput::empty(), suspend_for_ms: Some(delay_ms) })
            }

            StepConfig::WaitForEvent { event_name, timeout } => {
                let execute_after = (*timeout > 0).then(|| self.clock.now() + chrono::Duration::seconds(*timeout));
                let timeout_ms = (*timeout > 0).then_some(*timeout * 1000);
                Ok(Dispatch::Waiting { wait_event_name: event_name.clone(), execute_after, timeout_ms })
            }

            StepConfig::Condition { field, operator, value } => {
                let contact = self.require_contact(execution.contact_id).await?;
                let root = condition_root(&contact, &execution.context);
                let resolved = condition::resolve_field(&root, field);
                let matched = condition::evaluate(*operator, &resolved, value).map_err(|e| e.to_string())?;
                let branch = if matched { "yes" } else { "no" };
                Ok(Dispatch::Completed { output: StepOutput::branch(branch), suspend_for_ms: None })
            }

            StepConfig::Exit { reason } => Ok(Dispatch::Exited { reason: reason.clone() }),

            StepConfig::Webhook { url, method, headers, body } => {
                let contact = self.require_contact(execution.contact_id).await?;
                let request_body = body.clone().unwrap_or_else(|| {
                    serde_json::json!({
                        "contact": { "id": contact.id, "email": contact.email, "data": contact.data },
                        "workflow": { "id": workflow.id, "name": workflow.name },
                        "execution": { "id": execution.id, "contactId": execution.contact_id },
                    })
                });
                let request = WebhookRequest {
                    url: url.clone(),
                    method: method.clone().unwrap_or_else(|| "POST".to_string()),
                    headers: headers.clone().unwrap_or_default(),
                    body: request_body,
                };
                let response = self.webhook.call(request).await.map_err(|e| e.to_string())?;
                let mut extra = Map::new();
                extra.insert("status".to_string(), Value::from(response.status));
                extra.insert("ok".to_string(), Value::from(response.ok));
                extra.insert("response".to_string(), response.body);
                Ok(Dispatch::Completed { output: StepOutput { branch: None, extra }, suspend_for_ms: None })
            }

            StepConfig::UpdateContact { updates } => {
                let contact = self.require_contact(execution.contact_id).await?;
                let merged = shallow_merge(&contact.data, updates);
                self.contacts.update_contact_data(&execution.contact_id, &merged).await.map_err(|e| e.to_string())?;
                Ok(Dispatch::Completed { output: StepOutput::empty(), suspend_for_ms: None })
            }
        }
    }

    async fn require_contact(&self, contact_id: Uuid) -> Result<Contact, String> {
        self.contacts
            .get_contact(&contact_id)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("contact {contact_id} not found"))
    }

    /// Persist a COMPLETED step and apply the selected transition (or
    /// complete the execution when none is selected).
    async fn complete_step(
        &self,
        execution: &WorkflowExecution,
        mut step_exec: StepExecution,
        output: StepOutput,
        next: Option<Transition>,
        suspend_for_ms: Option<i64>,
    ) -> Result<(), RuntimeError> {
        let now = self.clock.now();
        step_exec.status = StepExecutionStatus::Completed;
        step_exec.completed_at = Some(now);
        step_exec.output = Some(output.to_value());
        self.workflows.update_step_execution(&step_exec).await?;

        let mut execution = execution.clone();
        match next {
            Some(transition) => {
                execution.current_step_id = Some(transition.to_step_id.clone());
                execution.status =
                    if suspend_for_ms.is_some() { WorkflowExecutionStatus::Waiting } else { WorkflowExecutionStatus::Running };
                self.workflows.update_execution(&execution).await?;
                self.queue
                    .enqueue_step(execution.id, transition.to_step_id, suspend_for_ms.unwrap_or(0), self.job_max_attempts)
                    .await?;
            }
            None => {
                execution.status = WorkflowExecutionStatus::Completed;
                execution.completed_at = Some(now);
                self.workflows.update_execution(&execution).await?;
            }
        }
        Ok(())
    }

    async fn suspend(
        &self,
        execution: &WorkflowExecution,
        mut step_exec: StepExecution,
        wait_event_name: String,
        execute_after: Option<DateTime<Utc>>,
        timeout_ms: Option<i64>,
    ) -> Result<(), RuntimeError> {
        step_exec.status = StepExecutionStatus::Waiting;
        step_exec.execute_after = execute_after;
        step_exec.wait_event_name = Some(wait_event_name);
        self.workflows.update_step_execution(&step_exec).await?;

        let mut execution = execution.clone();
        execution.status = WorkflowExecutionStatus::Waiting;
        self.workflows.update_execution(&execution).await?;

        if let Some(ms) = timeout_ms {
            self.queue
                .enqueue_timeout(execution.id, step_exec.step_id.clone(), step_exec.id, ms, self.job_max_attempts)
                .await?;
        }
        Ok(())
    }

    async fn exit(
        &self,
        execution: &WorkflowExecution,
        mut step_exec: StepExecution,
        reason: Option<String>,
    ) -> Result<(), RuntimeError> {
        let now = self.clock.now();
        step_exec.status = StepExecutionStatus::Completed;
        step_exec.completed_at = Some(now);
        step_exec.output = Some(StepOutput::empty().to_value());
        self.workflows.update_step_execution(&step_exec).await?;

        let mut execution = execution.clone();
        execution.status = WorkflowExecutionStatus::Exited;
        execution.completed_at = Some(now);
        execution.exit_reason = reason;
        self.workflows.update_execution(&execution).await?;
        Ok(())
    }

    async fn fail(
        &self,
        execution: &WorkflowExecution,
        mut step_exec: StepExecution,
        error: &str,
    ) -> Result<(), RuntimeError> {
        let now = self.clock.now();
        step_exec.status = StepExecutionStatus::Failed;
        step_exec.completed_at = Some(now);
        step_exec.error = Some(error.to_string());
        self.workflows.update_step_execution(&step_exec).await?;

        let mut execution = execution.clone();
        execution.status = WorkflowExecutionStatus::Failed;
        execution.completed_at = Some(now);
        self.workflows.update_execution(&execution).await?;
        warn!(execution_id = %execution.id, %error, "execution failed");
        Ok(())
    }

    // -------------------------------------------------------------------
    // HandleEvent / ProcessTimeout
    // -------------------------------------------------------------------

    /// `HandleEvent` (§4.1, §4.3): resume every `WAITING` StepExecution
    /// whose step is WAIT_FOR_EVENT and whose configured event name
    /// matches, scoped to project and (optionally) contact. Returns the
    /// number of executions resumed.
    #[instrument(skip(self, data), fields(%project_id, %event_name), err)]
    pub async fn handle_event(
        &self,
        project_id: Uuid,
        event_name: &str,
        contact_id: Option<Uuid>,
        data: Value,
    ) -> Result<usize, RuntimeError> {
        let waiters = self.workflows.find_waiting_for_event(&project_id, event_name, contact_id.as_ref()).await?;
        let mut resumed = 0usize;
        for waiter in waiters {
            let Some(claimed) = self.workflows.claim_waiting_step(&waiter.id).await? else { continue };
            let Some(execution) = self.workflows.get_execution(&claimed.execution_id).await? else { continue };
            if execution.status != WorkflowExecutionStatus::Waiting {
                continue;
            }
            let Some(workflow) = self.workflows.get_definition(&execution.workflow_id).await? else { continue };
            if workflow.step(&claimed.step_id).is_none() {
                continue;
            }
            self.queue.cancel_timeout(&claimed.id).await?;

            let mut extra = Map::new();
            extra.insert("eventData".to_string(), data.clone());
            let output = StepOutput { branch: None, extra };
            let outgoing = workflow.outgoing(&claimed.step_id);
            let next = select_transition(&outgoing, None);
            self.complete_step(&execution, claimed, output, next, None).await?;
            resumed += 1;
        }
        Ok(resumed)
    }

    /// `ProcessTimeout` (§4.1): fire the timeout branch of a WAIT_FOR_EVENT
    /// step if it is still WAITING. A no-op if the matching event already
    /// resumed it (the timeout-cancel race of spec.md §8 scenario 6).
    #[instrument(skip(self), fields(%execution_id, %step_id, %step_execution_id), err)]
    pub async fn process_timeout(
        &self,
        execution_id: Uuid,
        step_id: String,
        step_execution_id: Uuid,
    ) -> Result<(), RuntimeError> {
        let Some(claimed) = self.workflows.claim_waiting_step(&step_execution_id).await? else { return Ok(()) };
        let Some(execution) = self.workflows.get_execution(&execution_id).await? else { return Ok(()) };
        if execution.status != WorkflowExecutionStatus::Waiting {
            return Ok(());
        }
        let Some(workflow) = self.workflows.get_definition(&execution.workflow_id).await? else { return Ok(()) };
        let outgoing = workflow.outgoing(&step_id);
        let next = select_timeout_transition(&outgoing);
        self.complete_step(&execution, claimed, StepOutput::branch("timeout"), next, None).await
    }
}

/// The `{contact, data, workflow}` namespace a CONDITION step resolves its
/// dot-notation `field` against (§4.1). `data` aliases the contact's own
/// attributes -- spec.md §8 scenario 3 resolves `field: "data.plan"` against
/// a contact whose `data.plan` was set, not against the triggering event's
/// payload, so the shorthand is grounded in that worked example. `workflow`
/// is the execution's own `context`, which carries forward branch outputs
/// and (when the execution was started from an event) that event's payload.
fn condition_root(contact: &Contact, execution_context: &Value) -> Value {
    serde_json::json!({
        "contact": { "id": contact.id, "email": contact.email, "subscribed": contact.subscribed, "data": contact.data },
        "data": contact.data,
        "workflow": execution_context,
    })
}

/// Transition selection after a step completes (§4.1, numbered list):
/// first transition whose `condition.branch` matches the step's output
/// branch, else the first unconditional transition, else the first
/// transition of any kind. `None` if there are no outgoing transitions at
/// all, which completes the execution.
fn select_transition(outgoing: &[&Transition], branch: Option<&str>) -> Option<Transition> {
    if let Some(branch) = branch {
        if let Some(t) = outgoing.iter().find(|t| t.condition.as_ref().is_some_and(|c| c.matches_branch(branch))) {
            return Some((*t).clone());
        }
    }
    if let Some(t) = outgoing.iter().find(|t| t.condition.is_none()) {
        return Some((*t).clone());
    }
    outgoing.first().map(|t| (*t).clone())
}

/// Timeout-branch transition selection (§4.1 "Timeout branch"): first
/// transition with `condition.branch == "timeout"` or `condition.fallback ==
/// true`, else the first transition, else none (completes the execution).
fn select_timeout_transition(outgoing: &[&Transition]) -> Option<Transition> {
    outgoing
        .iter()
        .find(|t| t.condition.as_ref().is_some_and(|c| c.matches_branch("timeout") || c.is_fallback()))
        .or_else(|| outgoing.first())
        .map(|t| (*t).clone())
}

/// Shallow merge of `updates` into `base` (UPDATE_CONTACT, §4.1).
fn shallow_merge(base: &Value, updates: &Map<String, Value>) -> Value {
    let mut merged = match base {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    for (k, v) in updates {
        merged.insert(k.clone(), v.clone());
    }
    Value::Object(merged)
}
