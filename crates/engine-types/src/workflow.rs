//! Workflow domain types: the graph (Workflow/Step/Transition) and the
//! runtime record of traversing it (WorkflowExecution/StepExecution).

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::ValidationError;

// ---------------------------------------------------------------------------
// Step config -- discriminated union keyed on `type`
// ---------------------------------------------------------------------------

/// The eight step types a workflow graph may contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepType {
    Trigger,
    SendEmail,
    Delay,
    WaitForEvent,
    Condition,
    Exit,
    Webhook,
    UpdateContact,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::Trigger => "TRIGGER",
            StepType::SendEmail => "SEND_EMAIL",
            StepType::Delay => "DELAY",
            StepType::WaitForEvent => "WAIT_FOR_EVENT",
            StepType::Condition => "CONDITION",
            StepType::Exit => "EXIT",
            StepType::Webhook => "WEBHOOK",
            StepType::UpdateContact => "UPDATE_CONTACT",
        }
    }
}

/// Units accepted by the DELAY step's `amount`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DelayUnit {
    Minutes,
    Hours,
    Days,
}

impl DelayUnit {
    /// Convert one unit of this kind into seconds.
    pub fn as_seconds(&self) -> i64 {
        match self {
            DelayUnit::Minutes => 60,
            DelayUnit::Hours => 3_600,
            DelayUnit::Days => 86_400,
        }
    }
}

/// The operators a CONDITION step may evaluate (§4.1 "Operator semantics").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    GreaterThan,
    LessThan,
    Exists,
    NotExists,
}

/// Per-type step configuration, stored as a JSON blob and validated at
/// mutation time (§9 "Dynamic `config` blobs").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepConfig {
    Trigger {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event_name: Option<String>,
    },
    SendEmail {
        template_ref: String,
    },
    Delay {
        amount: i64,
        unit: DelayUnit,
    },
    WaitForEvent {
        event_name: String,
        /// Seconds; `0` means wait indefinitely (no timeout job enqueued).
        #[serde(default)]
        timeout: i64,
    },
    Condition {
        field: String,
        operator: ConditionOperator,
        value: Value,
    },
    Exit {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Webhook {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        method: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        headers: Option<std::collections::HashMap<String, String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<Value>,
    },
    UpdateContact {
        updates: serde_json::Map<String, Value>,
    },
}

impl StepConfig {
    /// The step type this config corresponds to.
    pub fn step_type(&self) -> StepType {
        match self {
            StepConfig::Trigger { .. } => StepType::Trigger,
            StepConfig::SendEmail { .. } => StepType::SendEmail,
            StepConfig::Delay { .. } => StepType::Delay,
            StepConfig::WaitForEvent { .. } => StepType::WaitForEvent,
            StepConfig::Condition { .. } => StepType::Condition,
            StepConfig::Exit { .. } => StepType::Exit,
            StepConfig::Webhook { .. } => StepType::Webhook,
            StepConfig::UpdateContact { .. } => StepType::UpdateContact,
        }
    }

    /// Validate the config's own field constraints (§6). Referential
    /// integrity against the rest of the graph is checked by
    /// `WorkflowDefinition::validate`.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            StepConfig::Delay { amount, .. } if *amount <= 0 => {
                Err(ValidationError::new("DELAY step requires amount > 0"))
            }
            StepConfig::WaitForEvent { event_name, timeout } => {
                if event_name.trim().is_empty() {
                    Err(ValidationError::new("WAIT_FOR_EVENT requires eventName"))
                } else if *timeout < 0 {
                    Err(ValidationError::new("WAIT_FOR_EVENT timeout must be >= 0"))
                } else {
                    Ok(())
                }
            }
            StepConfig::Condition { field, .. } if field.trim().is_empty() => {
                Err(ValidationError::new("CONDITION requires a non-empty field"))
            }
            StepConfig::Webhook { url, .. } if url.trim().is_empty() => {
                Err(ValidationError::new("WEBHOOK requires a non-empty url"))
            }
            StepConfig::SendEmail { template_ref } if template_ref.trim().is_empty() => {
                Err(ValidationError::new("SEND_EMAIL requires templateRef"))
            }
            _ => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    pub id: String,
    pub workflow_id: Uuid,
    pub name: String,
    pub config: StepConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_ref: Option<String>,
}

impl StepDefinition {
    pub fn step_type(&self) -> StepType {
        self.config.step_type()
    }
}

// ---------------------------------------------------------------------------
// Transition
// ---------------------------------------------------------------------------

/// Matches the three shapes described in §6: absent, `{branch}`, or
/// `{fallback: true}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TransitionCondition {
    Branch { branch: String },
    Fallback { fallback: bool },
}

impl TransitionCondition {
    pub fn branch(label: impl Into<String>) -> Self {
        TransitionCondition::Branch { branch: label.into() }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, TransitionCondition::Fallback { fallback: true })
    }

    pub fn matches_branch(&self, label: &str) -> bool {
        matches!(self, TransitionCondition::Branch { branch } if branch == label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transition {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub from_step_id: String,
    pub to_step_id: String,
    pub priority: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<TransitionCondition>,
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub enabled: bool,
    pub allow_reentry: bool,
    pub trigger_event_name: String,
    pub steps: Vec<StepDefinition>,
    pub transitions: Vec<Transition>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowDefinition {
    /// Validate the graph shape: exactly one TRIGGER step, unique step ids,
    /// and every transition referencing steps that exist.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut seen_ids = HashSet::new();
        let mut trigger_count = 0;
        for step in &self.steps {
            if !seen_ids.insert(step.id.clone()) {
                return Err(ValidationError::new(format!("duplicate step id '{}'", step.id)));
            }
            if step.step_type() == StepType::Trigger {
                trigger_count += 1;
            }
            step.config.validate()?;
        }
        if trigger_count != 1 {
            return Err(ValidationError::new(format!(
                "workflow must have exactly one TRIGGER step, found {trigger_count}"
            )));
        }
        for transition in &self.transitions {
            if !seen_ids.contains(&transition.from_step_id) {
                return Err(ValidationError::new(format!(
                    "transition references unknown fromStepId '{}'",
                    transition.from_step_id
                )));
            }
            if !seen_ids.contains(&transition.to_step_id) {
                return Err(ValidationError::new(format!(
                    "transition references unknown toStepId '{}'",
                    transition.to_step_id
                )));
            }
        }
        Ok(())
    }

    pub fn trigger_step(&self) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.step_type() == StepType::Trigger)
    }

    pub fn step(&self, id: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Outgoing transitions from a step, ordered by priority ascending, ties
    /// broken by id (§3).
    pub fn outgoing(&self, step_id: &str) -> Vec<&Transition> {
        let mut out: Vec<&Transition> =
            self.transitions.iter().filter(|t| t.from_step_id == step_id).collect();
        out.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.id.cmp(&b.id)));
        out
    }
}

// ---------------------------------------------------------------------------
// WorkflowExecution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowExecutionStatus {
    Running,
    Waiting,
    Completed,
    Failed,
    Exited,
    Cancelled,
}

impl WorkflowExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowExecutionStatus::Completed
                | WorkflowExecutionStatus::Failed
                | WorkflowExecutionStatus::Exited
                | WorkflowExecutionStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub contact_id: Uuid,
    pub status: WorkflowExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step_id: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_reason: Option<String>,
    /// Free-form execution context, merged into template rendering data
    /// alongside `contact.data` (§4.1 SEND_EMAIL).
    pub context: Value,
}

// ---------------------------------------------------------------------------
// StepExecution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepExecutionStatus {
    Pending,
    Running,
    Waiting,
    Completed,
    Failed,
}

impl StepExecutionStatus {
    pub fn is_non_terminal(&self) -> bool {
        matches!(
            self,
            StepExecutionStatus::Pending | StepExecutionStatus::Running | StepExecutionStatus::Waiting
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecution {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub step_id: String,
    pub status: StepExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execute_after: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Denormalized copy of `config.eventName` for WAIT_FOR_EVENT steps,
    /// populated only while WAITING. Lets `HandleEvent` resolve matching
    /// waiters through an indexed predicate instead of a full scan
    /// (spec.md §9 open question, resolved in SPEC_FULL.md §6).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_event_name: Option<String>,
}

/// Output of a completed step that influences transition selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl StepOutput {
    pub fn branch(label: impl Into<String>) -> Self {
        Self { branch: Some(label.into()), extra: Default::default() }
    }

    pub fn empty() -> Self {
        Self { branch: None, extra: Default::default() }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_workflow() -> WorkflowDefinition {
        let now = Utc::now();
        let wf_id = Uuid::now_v7();
        WorkflowDefinition {
            id: wf_id,
            project_id: Uuid::now_v7(),
            name: "welcome".to_string(),
            enabled: true,
            allow_reentry: false,
            trigger_event_name: "signup".to_string(),
            steps: vec![
                StepDefinition {
                    id: "trigger".to_string(),
                    workflow_id: wf_id,
                    name: "Trigger".to_string(),
                    config: StepConfig::Trigger { event_name: None },
                    template_ref: None,
                },
                StepDefinition {
                    id: "send".to_string(),
                    workflow_id: wf_id,
                    name: "Send".to_string(),
                    config: StepConfig::SendEmail { template_ref: "welcome-tpl".to_string() },
                    template_ref: None,
                },
            ],
            transitions: vec![Transition {
                id: Uuid::now_v7(),
                workflow_id: wf_id,
                from_step_id: "trigger".to_string(),
                to_step_id: "send".to_string(),
                priority: 0,
                condition: None,
            }],
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn validate_accepts_single_trigger() {
        sample_workflow().validate().unwrap();
    }

    #[test]
    fn validate_rejects_missing_trigger() {
        let mut wf = sample_workflow();
        wf.steps.retain(|s| s.id != "trigger");
        wf.transitions.clear();
        let err = wf.validate().unwrap_err();
        assert!(err.to_string().contains("exactly one TRIGGER"));
    }

    #[test]
    fn validate_rejects_duplicate_step_ids() {
        let mut wf = sample_workflow();
        let dup = wf.steps[1].clone();
        wf.steps.push(dup);
        let err = wf.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate step id"));
    }

    #[test]
    fn validate_rejects_dangling_transition() {
        let mut wf = sample_workflow();
        wf.transitions[0].to_step_id = "nonexistent".to_string();
        let err = wf.validate().unwrap_err();
        assert!(err.to_string().contains("unknown toStepId"));
    }

    #[test]
    fn outgoing_is_sorted_by_priority_then_id() {
        let mut wf = sample_workflow();
        let low_priority_id = Uuid::nil();
        let high_priority_id = Uuid::max();
        wf.transitions.push(Transition {
            id: high_priority_id,
            workflow_id: wf.id,
            from_step_id: "trigger".to_string(),
            to_step_id: "send".to_string(),
            priority: 0,
            condition: None,
        });
        wf.transitions[0].id = low_priority_id;
        let outgoing = wf.outgoing("trigger");
        assert_eq!(outgoing[0].id, low_priority_id);
        assert_eq!(outgoing[1].id, high_priority_id);
    }

    #[test]
    fn transition_condition_roundtrips_branch_shape() {
        let cond = TransitionCondition::branch("yes");
        let json = serde_json::to_value(&cond).unwrap();
        assert_eq!(json, serde_json::json!({"branch": "yes"}));
        let back: TransitionCondition = serde_json::from_value(json).unwrap();
        assert_eq!(back, cond);
    }

    #[test]
    fn transition_condition_roundtrips_fallback_shape() {
        let cond = TransitionCondition::Fallback { fallback: true };
        let json = serde_json::to_value(&cond).unwrap();
        assert_eq!(json, serde_json::json!({"fallback": true}));
    }

    #[test]
    fn step_config_serializes_with_tag() {
        let cfg = StepConfig::Delay { amount: 60, unit: DelayUnit::Minutes };
        let json = serde_json::to_value(&cfg).unwrap();
        assert_eq!(json["type"], "DELAY");
        assert_eq!(json["amount"], 60);
    }

    #[test]
    fn delay_step_rejects_nonpositive_amount() {
        let cfg = StepConfig::Delay { amount: 0, unit: DelayUnit::Minutes };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn wait_for_event_rejects_empty_event_name() {
        let cfg = StepConfig::WaitForEvent { event_name: String::new(), timeout: 0 };
        assert!(cfg.validate().is_err());
    }
}
