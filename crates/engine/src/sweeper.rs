//! Idle run sweeper.
//!
//! The engine never abandons runs on its own. A sweeper, driven by a
//! scheduler or the `stepwise sweep` command, marks in-progress runs that
//! have been idle since before a cutoff as abandoned. Each run is handled
//! in its own snapshot; a run that was touched after it was listed is
//! skipped.

use std::sync::Arc;

use serde::Serialize;
use stepwise_core::{ProgressId, ProgressStatus};
use stepwise_storage::ProcessStorage;
use time::{Duration, OffsetDateTime};

use crate::error::EngineError;
use crate::service::ExecutionService;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub abandoned: Vec<ProgressId>,
    /// Runs that changed between listing and abandoning.
    pub conflicts: usize,
    pub failures: usize,
}

pub struct IdleSweeper<S: ProcessStorage> {
    service: Arc<ExecutionService<S>>,
}

impl<S: ProcessStorage> IdleSweeper<S> {
    pub fn new(service: Arc<ExecutionService<S>>) -> Self {
        Self { service }
    }

    /// Abandon runs idle for at least `idle`.
    pub async fn abandon_idle_for(&self, idle: Duration) -> Result<SweepReport, EngineError> {
        let cutoff = self.service.clock().now() - idle;
        self.abandon_idle(cutoff).await
    }

    /// Abandon every in-progress run whose last activity is before `cutoff`.
    pub async fn abandon_idle(&self, cutoff: OffsetDateTime) -> Result<SweepReport, EngineError> {
        let candidates = self
            .service
            .storage()
            .list_progress(None, Some(ProgressStatus::InProgress), 0)
            .await?;

        let mut report = SweepReport::default();
        for progress in candidates {
            if progress.last_activity_at >= cutoff {
                continue;
            }
            report.scanned += 1;
            match self.service.abandon_if_idle(&progress, cutoff).await {
                Ok(true) => report.abandoned.push(progress.id),
                Ok(false) => {}
                Err(EngineError::Conflict(reason)) => {
                    tracing::warn!(progress = %progress.id, %reason, "skipped busy run");
                    report.conflicts += 1;
                }
                Err(e) => {
                    tracing::warn!(progress = %progress.id, error = %e, "could not abandon run");
                    report.failures += 1;
                }
            }
        }
        tracing::info!(
            scanned = report.scanned,
            abandoned = report.abandoned.len(),
            conflicts = report.conflicts,
            "idle sweep finished"
        );
        Ok(report)
    }
}
