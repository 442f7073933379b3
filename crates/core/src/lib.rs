//! stepwise-core: domain model for multi-step process execution.
//!
//! A [`Process`] is an ordered sequence of [`ProcessStep`]s, each bound to a
//! form owned by an external collaborator ([`FormRecord`]). A visitor's run
//! through a process is a [`Progress`] with one [`StepCompletion`] per step.
//!
//! This crate holds only data and pure rules (ordering, percentage
//! arithmetic, definition invariants, slugs). Persistence lives in
//! `stepwise-storage`; the state machine lives in `stepwise-engine`.

pub mod activity;
pub mod definition;
pub mod ids;
pub mod ordering;
pub mod progress;
pub mod slug;

pub use activity::{ProcessViewRecord, SubmissionRecord};
pub use definition::{
    DefinitionError, FormRecord, Process, ProcessStep, ProcessType, Visibility,
};
pub use ids::{
    CompletionId, FormId, OwnerId, ProcessId, ProgressId, StepId, SubmissionId, ViewId,
};
pub use ordering::{sort_steps, step_at};
pub use progress::{
    completion_percentage, full_percentage, CompletionStatus, Progress, ProgressStatus,
    StepCompletion,
};
pub use slug::{is_valid_slug, slugify, with_suffix, MAX_SLUG_LEN};

/// Opaque pass-through JSON object (process settings, step conditions,
/// view metadata). The engine never interprets its contents.
pub type JsonMap = serde_json::Map<String, serde_json::Value>;
