//! Values returned by the execution service.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::Serialize;
use stepwise_core::{
    CompletionStatus, FormId, FormRecord, JsonMap, ProcessId, ProcessStep, ProcessType, Progress,
    ProgressId, ProgressStatus, StepId, Visibility,
};
use time::OffsetDateTime;

/// A step as listed in a process structure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepSummary {
    pub id: StepId,
    pub title: String,
    pub description: Option<String>,
    pub order_index: u32,
    pub is_required: bool,
    pub form_slug: String,
    pub form_title: String,
}

impl StepSummary {
    pub(crate) fn new(step: &ProcessStep, form: &FormRecord) -> Self {
        Self {
            id: step.id,
            title: step.title.clone(),
            description: step.description.clone(),
            order_index: step.order_index,
            is_required: step.is_required,
            form_slug: form.slug.clone(),
            form_title: form.title.clone(),
        }
    }
}

/// Public structure of a process.
///
/// `visibility` and `total_steps` are only present once the visitor is
/// allowed in; a locked private process reports `requires_password`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessStructure {
    pub id: ProcessId,
    pub title: String,
    pub description: Option<String>,
    pub slug: String,
    pub process_type: ProcessType,
    pub requires_password: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visibility: Option<Visibility>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_steps: Option<usize>,
    pub steps: Vec<StepSummary>,
    pub settings: JsonMap,
}

/// The step the cursor points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CurrentStep {
    pub id: StepId,
    pub title: String,
    pub order_index: u32,
    pub form_slug: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionEntry {
    pub status: CompletionStatus,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
}

/// Full snapshot of one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressView {
    pub id: ProgressId,
    pub process_id: ProcessId,
    pub session_id: String,
    pub status: ProgressStatus,
    pub current_step_index: u32,
    /// `None` when the cursor is past the end of the step list.
    pub current_step: Option<CurrentStep>,
    pub total_steps: usize,
    pub completion_percentage: Decimal,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_activity_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    pub step_completions: BTreeMap<StepId, CompletionEntry>,
}

/// Result of `start`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StartOutcome {
    pub progress: Progress,
    /// `false` when an existing run was returned.
    pub created: bool,
}

/// What a step renders: the step and the form it points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepForm {
    pub step_id: StepId,
    pub step_title: String,
    pub step_description: Option<String>,
    pub form_id: FormId,
    pub form_slug: String,
    pub form_title: String,
    pub form_description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepCompletionOutcome {
    pub step_id: StepId,
    pub step_title: String,
    pub status: CompletionStatus,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    pub completion_percentage: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessCompletionOutcome {
    pub status: ProgressStatus,
    /// The run was already completed before this call.
    pub already_completed: bool,
    pub message: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    pub completion_percentage: Decimal,
}
