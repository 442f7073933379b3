//! Progress Repository.
//!
//! Every write goes through [`ProgressRepository::save`], which carries the
//! record's version into an optimistic check. Callers hold one snapshot for
//! the whole read-modify-write, so in the shipped backends the check never
//! fires; it is there for backends with weaker isolation.

use std::collections::HashSet;

use rust_decimal::Decimal;
use stepwise_core::{
    completion_percentage, full_percentage, OwnerId, ProcessId, ProcessStep, Progress, ProgressId,
    ProgressStatus, StepCompletion, StepId,
};
use stepwise_storage::{ProcessStorage, StorageError};
use time::OffsetDateTime;

use crate::error::EngineError;

pub struct ProgressRepository<'a, S: ProcessStorage> {
    storage: &'a S,
}

impl<'a, S: ProcessStorage> ProgressRepository<'a, S> {
    pub fn new(storage: &'a S) -> Self {
        Self { storage }
    }

    pub async fn get(
        &self,
        snapshot: &mut S::Snapshot,
        progress_id: ProgressId,
    ) -> Result<Progress, EngineError> {
        Ok(self.storage.get_progress(snapshot, progress_id).await?)
    }

    /// The run for (process, session), or `None` when there is none.
    pub async fn find(
        &self,
        snapshot: &mut S::Snapshot,
        process_id: ProcessId,
        session_id: &str,
    ) -> Result<Option<Progress>, EngineError> {
        match self
            .storage
            .get_progress_for_update(snapshot, process_id, session_id)
            .await
        {
            Ok(progress) => Ok(Some(progress)),
            Err(StorageError::ProgressNotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn for_session(
        &self,
        snapshot: &mut S::Snapshot,
        process_id: ProcessId,
        session_id: &str,
    ) -> Result<Progress, EngineError> {
        Ok(self
            .storage
            .get_progress_for_update(snapshot, process_id, session_id)
            .await?)
    }

    /// A fresh run at step 0 with one pending completion per step.
    ///
    /// Both the run and its completions are written into `snapshot`, so
    /// they commit together or not at all.
    pub async fn create(
        &self,
        snapshot: &mut S::Snapshot,
        process_id: ProcessId,
        steps: &[ProcessStep],
        session_id: &str,
        user_id: Option<OwnerId>,
        now: OffsetDateTime,
    ) -> Result<Progress, EngineError> {
        let progress = Progress::begin(process_id, session_id, user_id, now);
        self.storage
            .insert_progress(snapshot, progress.clone())
            .await?;
        for step in steps {
            self.storage
                .insert_step_completion(snapshot, StepCompletion::pending(progress.id, step.id))
                .await?;
        }
        Ok(progress)
    }

    /// Persist `progress` and bump its in-memory version to match.
    pub async fn save(
        &self,
        snapshot: &mut S::Snapshot,
        progress: &mut Progress,
    ) -> Result<(), EngineError> {
        let version = self
            .storage
            .update_progress(snapshot, progress, progress.version)
            .await?;
        progress.version = version;
        Ok(())
    }

    pub async fn touch(
        &self,
        snapshot: &mut S::Snapshot,
        progress: &mut Progress,
        now: OffsetDateTime,
    ) -> Result<(), EngineError> {
        progress.touch(now);
        self.save(snapshot, progress).await
    }

    pub async fn set_cursor(
        &self,
        snapshot: &mut S::Snapshot,
        progress: &mut Progress,
        index: u32,
        now: OffsetDateTime,
    ) -> Result<(), EngineError> {
        progress.current_step_index = index;
        progress.touch(now);
        self.save(snapshot, progress).await
    }

    /// Recount completed steps against the current step list and store the
    /// new percentage. Completions for steps no longer in `steps` do not
    /// count.
    pub async fn recompute_percentage(
        &self,
        snapshot: &mut S::Snapshot,
        progress: &mut Progress,
        steps: &[ProcessStep],
        now: OffsetDateTime,
    ) -> Result<Decimal, EngineError> {
        let live: HashSet<StepId> = steps.iter().map(|s| s.id).collect();
        let completed = self
            .completions(snapshot, progress.id)
            .await?
            .iter()
            .filter(|c| c.is_completed() && live.contains(&c.step_id))
            .count();
        progress.completion_percentage = completion_percentage(completed, steps.len());
        progress.touch(now);
        self.save(snapshot, progress).await?;
        Ok(progress.completion_percentage)
    }

    pub async fn mark_completed(
        &self,
        snapshot: &mut S::Snapshot,
        progress: &mut Progress,
        now: OffsetDateTime,
    ) -> Result<(), EngineError> {
        progress.status = ProgressStatus::Completed;
        progress.completed_at = Some(now);
        progress.completion_percentage = full_percentage();
        progress.touch(now);
        self.save(snapshot, progress).await
    }

    pub async fn mark_abandoned(
        &self,
        snapshot: &mut S::Snapshot,
        progress: &mut Progress,
        now: OffsetDateTime,
    ) -> Result<(), EngineError> {
        progress.status = ProgressStatus::Abandoned;
        progress.touch(now);
        self.save(snapshot, progress).await
    }

    pub async fn delete(
        &self,
        snapshot: &mut S::Snapshot,
        progress_id: ProgressId,
    ) -> Result<(), EngineError> {
        Ok(self.storage.delete_progress(snapshot, progress_id).await?)
    }

    pub async fn completions(
        &self,
        snapshot: &mut S::Snapshot,
        progress_id: ProgressId,
    ) -> Result<Vec<StepCompletion>, EngineError> {
        Ok(self
            .storage
            .list_step_completions(snapshot, progress_id)
            .await?)
    }

    /// The completion row for (progress, step), created pending if it is
    /// missing (a step added after the run started).
    pub async fn completion_for(
        &self,
        snapshot: &mut S::Snapshot,
        progress_id: ProgressId,
        step_id: StepId,
    ) -> Result<StepCompletion, EngineError> {
        match self
            .storage
            .get_step_completion(snapshot, progress_id, step_id)
            .await
        {
            Ok(completion) => Ok(completion),
            Err(StorageError::CompletionNotFound { .. }) => {
                let completion = StepCompletion::pending(progress_id, step_id);
                self.storage
                    .insert_step_completion(snapshot, completion.clone())
                    .await?;
                tracing::debug!(progress = %progress_id, step = %step_id, "created missing completion");
                Ok(completion)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn save_completion(
        &self,
        snapshot: &mut S::Snapshot,
        completion: &StepCompletion,
    ) -> Result<(), EngineError> {
        Ok(self
            .storage
            .update_step_completion(snapshot, completion)
            .await?)
    }
}
