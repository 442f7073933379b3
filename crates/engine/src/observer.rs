//! Hooks fired after a progress transition has committed.
//!
//! Observers stand in for notification and analytics collaborators. They
//! run after the commit, so a failing observer can neither fail nor roll
//! back the transition; its error, or its panic, is logged and dropped.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use stepwise_core::{ProcessId, ProgressId, StepId};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    Started {
        process_id: ProcessId,
        progress_id: ProgressId,
        session_id: String,
    },
    StepCompleted {
        process_id: ProcessId,
        progress_id: ProgressId,
        step_id: StepId,
        completion_percentage: Decimal,
    },
    ProcessCompleted {
        process_id: ProcessId,
        progress_id: ProgressId,
    },
    Abandoned {
        process_id: ProcessId,
        progress_id: ProgressId,
    },
}

impl ProgressEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ProgressEvent::Started { .. } => "started",
            ProgressEvent::StepCompleted { .. } => "step_completed",
            ProgressEvent::ProcessCompleted { .. } => "process_completed",
            ProgressEvent::Abandoned { .. } => "abandoned",
        }
    }

    pub fn progress_id(&self) -> ProgressId {
        match self {
            ProgressEvent::Started { progress_id, .. }
            | ProgressEvent::StepCompleted { progress_id, .. }
            | ProgressEvent::ProcessCompleted { progress_id, .. }
            | ProgressEvent::Abandoned { progress_id, .. } => *progress_id,
        }
    }
}

pub type ObserverError = Box<dyn std::error::Error + Send + Sync>;

pub trait ProgressObserver: Send + Sync {
    fn name(&self) -> &str;

    fn on_event(&self, event: &ProgressEvent) -> Result<(), ObserverError>;
}

/// Logs every event at `info`.
#[derive(Debug, Default)]
pub struct TracingObserver;

impl ProgressObserver for TracingObserver {
    fn name(&self) -> &str {
        "tracing"
    }

    fn on_event(&self, event: &ProgressEvent) -> Result<(), ObserverError> {
        tracing::info!(event = event.name(), progress = %event.progress_id(), "progress event");
        Ok(())
    }
}

pub(crate) fn notify(observers: &[Arc<dyn ProgressObserver>], event: &ProgressEvent) {
    for observer in observers {
        match catch_unwind(AssertUnwindSafe(|| observer.on_event(event))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(
                observer = observer.name(),
                event = event.name(),
                error = %e,
                "observer failed"
            ),
            Err(panic) => tracing::warn!(
                observer = observer.name(),
                event = event.name(),
                panic = panic_message(panic.as_ref()),
                "observer panicked"
            ),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
