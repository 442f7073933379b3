//! A visitor's run through a process and its per-step completion records.

use std::fmt;
use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::definition::DefinitionError;
use crate::ids::{CompletionId, OwnerId, ProcessId, ProgressId, StepId, SubmissionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    InProgress,
    Completed,
    Abandoned,
}

impl ProgressStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStatus::InProgress => "in_progress",
            ProgressStatus::Completed => "completed",
            ProgressStatus::Abandoned => "abandoned",
        }
    }

    /// Completed and abandoned runs never transition again.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProgressStatus::InProgress)
    }
}

impl fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProgressStatus {
    type Err = DefinitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(ProgressStatus::InProgress),
            "completed" => Ok(ProgressStatus::Completed),
            "abandoned" => Ok(ProgressStatus::Abandoned),
            other => Err(DefinitionError::UnknownVariant {
                kind: "progress status",
                value: other.to_string(),
            }),
        }
    }
}

/// One visitor's run through a process. Unique per (process, session).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub id: ProgressId,
    pub process_id: ProcessId,
    /// `None` for anonymous visitors.
    pub user_id: Option<OwnerId>,
    pub session_id: String,
    pub status: ProgressStatus,
    /// 0-based cursor into the ordered step list. Not clamped: a concurrent
    /// reorder or delete may leave it past the end.
    pub current_step_index: u32,
    pub completion_percentage: Decimal,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    #[serde(default)]
    pub completed_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub last_activity_at: OffsetDateTime,
    /// Optimistic concurrency counter, bumped by every storage update.
    pub version: i64,
}

impl Progress {
    /// A fresh run at step 0 with nothing completed.
    pub fn begin(
        process_id: ProcessId,
        session_id: impl Into<String>,
        user_id: Option<OwnerId>,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            id: ProgressId::new(),
            process_id,
            user_id,
            session_id: session_id.into(),
            status: ProgressStatus::InProgress,
            current_step_index: 0,
            completion_percentage: completion_percentage(0, 0),
            started_at: now,
            completed_at: None,
            last_activity_at: now,
            version: 0,
        }
    }

    pub fn touch(&mut self, now: OffsetDateTime) {
        self.last_activity_at = now;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    Pending,
    Completed,
    Skipped,
}

impl CompletionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompletionStatus::Pending => "pending",
            CompletionStatus::Completed => "completed",
            CompletionStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for CompletionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompletionStatus {
    type Err = DefinitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(CompletionStatus::Pending),
            "completed" => Ok(CompletionStatus::Completed),
            "skipped" => Ok(CompletionStatus::Skipped),
            other => Err(DefinitionError::UnknownVariant {
                kind: "completion status",
                value: other.to_string(),
            }),
        }
    }
}

/// Per-step record within a [`Progress`]. Unique per (progress, step).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepCompletion {
    pub id: CompletionId,
    pub progress_id: ProgressId,
    pub step_id: StepId,
    pub submission_id: Option<SubmissionId>,
    pub status: CompletionStatus,
    #[serde(with = "time::serde::rfc3339::option")]
    #[serde(default)]
    pub completed_at: Option<OffsetDateTime>,
}

impl StepCompletion {
    pub fn pending(progress_id: ProgressId, step_id: StepId) -> Self {
        Self {
            id: CompletionId::new(),
            progress_id,
            step_id,
            submission_id: None,
            status: CompletionStatus::Pending,
            completed_at: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == CompletionStatus::Completed
    }
}

/// `completed / total * 100`, rounded half-to-even at two decimals.
///
/// Always carries scale 2, so zero renders as `0.00` and a full run as
/// `100.00`.
pub fn completion_percentage(completed: usize, total: usize) -> Decimal {
    if total == 0 {
        return Decimal::new(0, 2);
    }
    let ratio = Decimal::from(completed as u64) * Decimal::ONE_HUNDRED / Decimal::from(total as u64);
    let mut rounded = ratio.round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven);
    rounded.rescale(2);
    rounded
}

/// The fixed value a completed run reports.
pub fn full_percentage() -> Decimal {
    Decimal::new(10000, 2)
}
