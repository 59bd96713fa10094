#![allow(clippy::result_large_err)]

use crate::core::entities::{Document, DocumentEvent, UnitMembership, UserProfile, WorkflowRef};
use crate::core::error::AppError;
use crate::core::types::TaskOperation;
use serde_json::{json, Value};

/// Read-only inputs shared by every descriptor in one resolution pass.
#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub user: UserProfile,
    pub units: UnitMembership,
    pub workflow: Option<WorkflowRef>,
    pub task_id: Option<String>,
    pub operation: Option<TaskOperation>,
    pub current_task_performer_unit_ids: Vec<i64>,
    pub task_activity_log: Vec<Value>,
}

impl ResolutionContext {
    pub fn new(user: UserProfile, units: UnitMembership) -> Self {
        ResolutionContext {
            user,
            units,
            workflow: None,
            task_id: None,
            operation: None,
            current_task_performer_unit_ids: Vec::new(),
            task_activity_log: Vec::new(),
        }
    }

    pub fn with_workflow(mut self, workflow: WorkflowRef) -> Self {
        self.workflow = Some(workflow);
        self
    }

    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_operation(mut self, operation: TaskOperation) -> Self {
        self.operation = Some(operation);
        self
    }

    pub fn with_performer_unit_ids(mut self, unit_ids: Vec<i64>) -> Self {
        self.current_task_performer_unit_ids = unit_ids;
        self
    }

    pub fn with_activity_log(mut self, log: Vec<Value>) -> Self {
        self.task_activity_log = log;
        self
    }
}

/// Snapshot inputs converted to JSON values once per resolution pass.
///
/// Expressions receive copies of these values, so evaluated code can
/// never mutate state shared with the caller.
#[derive(Debug, Clone)]
pub struct EvalInputs {
    pub documents: Value,
    pub events: Value,
    pub user: Value,
    pub units: Value,
}

impl EvalInputs {
    pub fn prepare(
        documents: &[Document],
        events: &[DocumentEvent],
        user: &UserProfile,
        units: &UnitMembership,
    ) -> Result<Self, AppError> {
        Ok(EvalInputs {
            documents: serde_json::to_value(documents)?,
            events: serde_json::to_value(events)?,
            user: serde_json::to_value(user)?,
            units: serde_json::to_value(units)?,
        })
    }

    /// Argument list for calculator and prediction expressions.
    pub fn calc_args(&self) -> Vec<Value> {
        vec![
            self.documents.clone(),
            self.user.clone(),
            self.units.clone(),
            self.events.clone(),
        ]
    }

    /// Argument list for condition and only-for-heads expressions.
    pub fn condition_args(&self) -> Vec<Value> {
        vec![self.documents.clone()]
    }

    /// The single context object handed to reassign-trigger calculators.
    ///
    /// Keys use the template wire spelling so expressions read
    /// `ctx.currentTaskPerformerUnitIds` exactly as authored.
    pub fn reassign_ctx(&self, resolution: &ResolutionContext) -> Value {
        json!({
            "documents": self.documents,
            "events": self.events,
            "user": self.user,
            "units": self.units,
            "currentTaskPerformerUnitIds": resolution.current_task_performer_unit_ids,
            "taskActivityLog": resolution.task_activity_log,
            "workflow": resolution.workflow,
        })
    }
}
