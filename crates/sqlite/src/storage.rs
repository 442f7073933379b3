use async_trait::async_trait;
use stepwise_core::{
    FormId, FormRecord, OwnerId, Process, ProcessId, ProcessStep, ProcessViewRecord, Progress,
    ProgressId, ProgressStatus, StepCompletion, StepId, SubmissionId, SubmissionRecord,
};
use stepwise_storage::{ProcessStorage, StorageError};

use crate::connection::{SqliteSnapshot, SqliteStorage};
use crate::stores::{CompletionStore, FormStore, ProcessStore, ProgressStore, StepStore, ViewStore};

#[async_trait]
impl ProcessStorage for SqliteStorage {
    type Snapshot = SqliteSnapshot;

    async fn begin_snapshot(&self) -> Result<SqliteSnapshot, StorageError> {
        Ok(self.begin().await?)
    }

    async fn commit_snapshot(&self, snapshot: SqliteSnapshot) -> Result<(), StorageError> {
        Ok(snapshot.commit()?)
    }

    async fn abort_snapshot(&self, snapshot: SqliteSnapshot) -> Result<(), StorageError> {
        Ok(snapshot.rollback()?)
    }

    async fn insert_form(
        &self,
        snapshot: &mut SqliteSnapshot,
        form: FormRecord,
    ) -> Result<(), StorageError> {
        Ok(FormStore::new(snapshot.conn()).insert(&form)?)
    }

    async fn get_form(
        &self,
        snapshot: &mut SqliteSnapshot,
        form_id: FormId,
    ) -> Result<FormRecord, StorageError> {
        Ok(FormStore::new(snapshot.conn()).get(form_id)?)
    }

    async fn insert_submission(
        &self,
        snapshot: &mut SqliteSnapshot,
        submission: SubmissionRecord,
    ) -> Result<(), StorageError> {
        Ok(FormStore::new(snapshot.conn()).insert_submission(&submission)?)
    }

    async fn get_submission(
        &self,
        snapshot: &mut SqliteSnapshot,
        submission_id: SubmissionId,
    ) -> Result<SubmissionRecord, StorageError> {
        Ok(FormStore::new(snapshot.conn()).get_submission(submission_id)?)
    }

    async fn insert_process(
        &self,
        snapshot: &mut SqliteSnapshot,
        process: Process,
    ) -> Result<(), StorageError> {
        Ok(ProcessStore::new(snapshot.conn()).insert(&process)?)
    }

    async fn update_process(
        &self,
        snapshot: &mut SqliteSnapshot,
        process: &Process,
    ) -> Result<(), StorageError> {
        Ok(ProcessStore::new(snapshot.conn()).update(process)?)
    }

    async fn delete_process(
        &self,
        snapshot: &mut SqliteSnapshot,
        process_id: ProcessId,
    ) -> Result<(), StorageError> {
        Ok(ProcessStore::new(snapshot.conn()).delete(process_id)?)
    }

    async fn get_process(
        &self,
        snapshot: &mut SqliteSnapshot,
        process_id: ProcessId,
    ) -> Result<Process, StorageError> {
        Ok(ProcessStore::new(snapshot.conn()).get(process_id)?)
    }

    async fn get_owned_process_by_slug(
        &self,
        snapshot: &mut SqliteSnapshot,
        owner_id: &OwnerId,
        slug: &str,
    ) -> Result<Process, StorageError> {
        Ok(ProcessStore::new(snapshot.conn()).get_owned(owner_id, slug)?)
    }

    async fn get_public_process_by_slug(
        &self,
        snapshot: &mut SqliteSnapshot,
        slug: &str,
    ) -> Result<Process, StorageError> {
        Ok(ProcessStore::new(snapshot.conn()).get_public(slug)?)
    }

    async fn slug_exists(
        &self,
        snapshot: &mut SqliteSnapshot,
        slug: &str,
    ) -> Result<bool, StorageError> {
        Ok(ProcessStore::new(snapshot.conn()).slug_exists(slug)?)
    }

    async fn insert_step(
        &self,
        snapshot: &mut SqliteSnapshot,
        step: ProcessStep,
    ) -> Result<(), StorageError> {
        Ok(StepStore::new(snapshot.conn()).insert(&step)?)
    }

    async fn update_step(
        &self,
        snapshot: &mut SqliteSnapshot,
        step: &ProcessStep,
    ) -> Result<(), StorageError> {
        Ok(StepStore::new(snapshot.conn()).update(step)?)
    }

    async fn delete_step(
        &self,
        snapshot: &mut SqliteSnapshot,
        process_id: ProcessId,
        step_id: StepId,
    ) -> Result<(), StorageError> {
        Ok(StepStore::new(snapshot.conn()).delete(process_id, step_id)?)
    }

    async fn list_steps(
        &self,
        snapshot: &mut SqliteSnapshot,
        process_id: ProcessId,
    ) -> Result<Vec<ProcessStep>, StorageError> {
        Ok(StepStore::new(snapshot.conn()).list(process_id)?)
    }

    async fn get_step(
        &self,
        snapshot: &mut SqliteSnapshot,
        process_id: ProcessId,
        step_id: StepId,
    ) -> Result<ProcessStep, StorageError> {
        Ok(StepStore::new(snapshot.conn()).get(process_id, step_id)?)
    }

    async fn max_order_index(
        &self,
        snapshot: &mut SqliteSnapshot,
        process_id: ProcessId,
    ) -> Result<Option<u32>, StorageError> {
        Ok(StepStore::new(snapshot.conn()).max_order_index(process_id)?)
    }

    async fn set_step_order_index(
        &self,
        snapshot: &mut SqliteSnapshot,
        process_id: ProcessId,
        step_id: StepId,
        order_index: u32,
    ) -> Result<(), StorageError> {
        Ok(StepStore::new(snapshot.conn()).set_order_index(process_id, step_id, order_index)?)
    }

    async fn shift_order_indices(
        &self,
        snapshot: &mut SqliteSnapshot,
        process_id: ProcessId,
        start: u32,
        delta: i32,
    ) -> Result<usize, StorageError> {
        Ok(StepStore::new(snapshot.conn()).shift(process_id, start, delta)?)
    }

    async fn insert_progress(
        &self,
        snapshot: &mut SqliteSnapshot,
        progress: Progress,
    ) -> Result<(), StorageError> {
        Ok(ProgressStore::new(snapshot.conn()).insert(&progress)?)
    }

    async fn get_progress(
        &self,
        snapshot: &mut SqliteSnapshot,
        progress_id: ProgressId,
    ) -> Result<Progress, StorageError> {
        Ok(ProgressStore::new(snapshot.conn()).get(progress_id)?)
    }

    async fn get_progress_for_update(
        &self,
        snapshot: &mut SqliteSnapshot,
        process_id: ProcessId,
        session_id: &str,
    ) -> Result<Progress, StorageError> {
        // BEGIN IMMEDIATE already holds the write lock.
        Ok(ProgressStore::new(snapshot.conn()).get_by_session(process_id, session_id)?)
    }

    async fn update_progress(
        &self,
        snapshot: &mut SqliteSnapshot,
        progress: &Progress,
        expected_version: i64,
    ) -> Result<i64, StorageError> {
        Ok(ProgressStore::new(snapshot.conn()).update(progress, expected_version)?)
    }

    async fn delete_progress(
        &self,
        snapshot: &mut SqliteSnapshot,
        progress_id: ProgressId,
    ) -> Result<(), StorageError> {
        Ok(ProgressStore::new(snapshot.conn()).delete(progress_id)?)
    }

    async fn insert_step_completion(
        &self,
        snapshot: &mut SqliteSnapshot,
        completion: StepCompletion,
    ) -> Result<(), StorageError> {
        Ok(CompletionStore::new(snapshot.conn()).insert(&completion)?)
    }

    async fn list_step_completions(
        &self,
        snapshot: &mut SqliteSnapshot,
        progress_id: ProgressId,
    ) -> Result<Vec<StepCompletion>, StorageError> {
        Ok(CompletionStore::new(snapshot.conn()).list(progress_id)?)
    }

    async fn get_step_completion(
        &self,
        snapshot: &mut SqliteSnapshot,
        progress_id: ProgressId,
        step_id: StepId,
    ) -> Result<StepCompletion, StorageError> {
        Ok(CompletionStore::new(snapshot.conn()).get(progress_id, step_id)?)
    }

    async fn update_step_completion(
        &self,
        snapshot: &mut SqliteSnapshot,
        completion: &StepCompletion,
    ) -> Result<(), StorageError> {
        Ok(CompletionStore::new(snapshot.conn()).update(completion)?)
    }

    async fn insert_process_view(
        &self,
        snapshot: &mut SqliteSnapshot,
        view: ProcessViewRecord,
    ) -> Result<(), StorageError> {
        Ok(ViewStore::new(snapshot.conn()).insert(&view)?)
    }

    async fn list_progress(
        &self,
        process_id: Option<ProcessId>,
        status: Option<ProgressStatus>,
        limit: usize,
    ) -> Result<Vec<Progress>, StorageError> {
        let conn = self.conn.lock().await;
        Ok(ProgressStore::new(&conn).list(process_id, status, limit)?)
    }

    async fn list_process_views(
        &self,
        process_id: ProcessId,
    ) -> Result<Vec<ProcessViewRecord>, StorageError> {
        let conn = self.conn.lock().await;
        Ok(ViewStore::new(&conn).list(process_id)?)
    }
}
