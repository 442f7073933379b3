use async_trait::async_trait;
use stepwise_core::{
    FormId, FormRecord, OwnerId, Process, ProcessId, ProcessStep, ProcessViewRecord, Progress,
    ProgressId, ProgressStatus, StepCompletion, StepId, SubmissionId, SubmissionRecord,
};

use crate::error::StorageError;

/// The storage trait for stepwise backends.
///
/// A `ProcessStorage` implementation provides durable, transactional storage
/// for process definitions, the progress of visitors running them, and the
/// submission and view records collaborators hand to the engine.
///
/// ## Snapshot Semantics
///
/// All mutating operations, and every read the engine makes while deciding
/// a state change, take `&mut Self::Snapshot`, a type representing an
/// in-progress transaction. The lifecycle is:
///
/// 1. `begin_snapshot()`: start a transaction, returns a `Snapshot`
/// 2. Call methods with `&mut snapshot`
/// 3. `commit_snapshot(snapshot)`: commit and consume the transaction
///    OR `abort_snapshot(snapshot)`: roll back and consume the transaction
///
/// If a `Snapshot` is dropped without committing, the underlying transaction
/// MUST be rolled back.
///
/// The shipped backends hold their write lock for the whole life of a
/// snapshot, so a read-modify-write inside one snapshot never loses an
/// update. Do not call the non-snapshot queries while the same task holds
/// a snapshot.
///
/// ## OCC Conflict Detection
///
/// `update_progress` performs an optimistic concurrency check:
/// `UPDATE WHERE version = expected_version`. If zero rows are affected,
/// the method returns `Err(StorageError::ConcurrentConflict { ... })`.
///
/// ## Constraints
///
/// Every backend enforces, as `StorageError::ConstraintViolation`:
///
/// - `processes(slug)` unique
/// - `process_steps(process_id, order_index)` unique, checked on every
///   single-row write
/// - `progress(process_id, session_id)` unique
/// - `step_completions(progress_id, step_id)` unique
///
/// Deleting a process cascades to its steps, progress, completions and
/// views. Deleting a step cascades to its completions. Deleting a progress
/// cascades to its completions.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync + 'static` to be used in axum
/// application state and across async task boundaries.
#[async_trait]
pub trait ProcessStorage: Send + Sync + 'static {
    /// The snapshot (transaction) type used by this storage backend.
    ///
    /// Must be `Send` to allow passing across async task boundaries.
    type Snapshot: Send;

    // ── Snapshot lifecycle ────────────────────────────────────────────────────

    /// Begin a new snapshot (transaction).
    async fn begin_snapshot(&self) -> Result<Self::Snapshot, StorageError>;

    /// Commit a snapshot, making all mutations durable.
    async fn commit_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StorageError>;

    /// Abort (roll back) a snapshot, discarding all mutations.
    async fn abort_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StorageError>;

    // ── Forms and submissions (collaborator records) ─────────────────────────

    async fn insert_form(
        &self,
        snapshot: &mut Self::Snapshot,
        form: FormRecord,
    ) -> Result<(), StorageError>;

    /// Returns `Err(StorageError::FormNotFound)` if the form does not exist.
    async fn get_form(
        &self,
        snapshot: &mut Self::Snapshot,
        form_id: FormId,
    ) -> Result<FormRecord, StorageError>;

    /// FK: `form_id` must reference an existing form.
    async fn insert_submission(
        &self,
        snapshot: &mut Self::Snapshot,
        submission: SubmissionRecord,
    ) -> Result<(), StorageError>;

    /// Returns `Err(StorageError::SubmissionNotFound)` if absent.
    async fn get_submission(
        &self,
        snapshot: &mut Self::Snapshot,
        submission_id: SubmissionId,
    ) -> Result<SubmissionRecord, StorageError>;

    // ── Processes ─────────────────────────────────────────────────────────────

    /// Insert a process. The slug must be globally unique.
    async fn insert_process(
        &self,
        snapshot: &mut Self::Snapshot,
        process: Process,
    ) -> Result<(), StorageError>;

    /// Overwrite every mutable column of an existing process.
    async fn update_process(
        &self,
        snapshot: &mut Self::Snapshot,
        process: &Process,
    ) -> Result<(), StorageError>;

    /// Delete a process and everything it owns.
    async fn delete_process(
        &self,
        snapshot: &mut Self::Snapshot,
        process_id: ProcessId,
    ) -> Result<(), StorageError>;

    async fn get_process(
        &self,
        snapshot: &mut Self::Snapshot,
        process_id: ProcessId,
    ) -> Result<Process, StorageError>;

    /// Owner-scoped lookup. A process owned by someone else is reported
    /// exactly like a missing one.
    async fn get_owned_process_by_slug(
        &self,
        snapshot: &mut Self::Snapshot,
        owner_id: &OwnerId,
        slug: &str,
    ) -> Result<Process, StorageError>;

    /// Public lookup: only active processes resolve.
    async fn get_public_process_by_slug(
        &self,
        snapshot: &mut Self::Snapshot,
        slug: &str,
    ) -> Result<Process, StorageError>;

    /// Whether any process, in any scope, holds this slug.
    async fn slug_exists(
        &self,
        snapshot: &mut Self::Snapshot,
        slug: &str,
    ) -> Result<bool, StorageError>;

    // ── Steps ─────────────────────────────────────────────────────────────────

    /// FK: the process and the form must exist.
    async fn insert_step(
        &self,
        snapshot: &mut Self::Snapshot,
        step: ProcessStep,
    ) -> Result<(), StorageError>;

    async fn update_step(
        &self,
        snapshot: &mut Self::Snapshot,
        step: &ProcessStep,
    ) -> Result<(), StorageError>;

    /// Delete a step and its completions.
    async fn delete_step(
        &self,
        snapshot: &mut Self::Snapshot,
        process_id: ProcessId,
        step_id: StepId,
    ) -> Result<(), StorageError>;

    /// Steps of a process in execution order (see `stepwise_core::sort_steps`).
    async fn list_steps(
        &self,
        snapshot: &mut Self::Snapshot,
        process_id: ProcessId,
    ) -> Result<Vec<ProcessStep>, StorageError>;

    /// A step scoped to its process. A step of another process is reported
    /// as `StepNotFound`.
    async fn get_step(
        &self,
        snapshot: &mut Self::Snapshot,
        process_id: ProcessId,
        step_id: StepId,
    ) -> Result<ProcessStep, StorageError>;

    /// Highest `order_index` in the process, `None` when it has no steps.
    async fn max_order_index(
        &self,
        snapshot: &mut Self::Snapshot,
        process_id: ProcessId,
    ) -> Result<Option<u32>, StorageError>;

    /// Single-row position write. Fails with `ConstraintViolation` when
    /// another step of the process already sits at `order_index`.
    async fn set_step_order_index(
        &self,
        snapshot: &mut Self::Snapshot,
        process_id: ProcessId,
        step_id: StepId,
        order_index: u32,
    ) -> Result<(), StorageError>;

    /// Add `delta` to the `order_index` of every step at or after `start`,
    /// as one relative update. Returns the number of steps moved.
    ///
    /// Never fails on its own intermediate states; only the final positions
    /// are checked.
    async fn shift_order_indices(
        &self,
        snapshot: &mut Self::Snapshot,
        process_id: ProcessId,
        start: u32,
        delta: i32,
    ) -> Result<usize, StorageError>;

    // ── Progress ──────────────────────────────────────────────────────────────

    /// Insert a progress record. `(process_id, session_id)` must be unique.
    async fn insert_progress(
        &self,
        snapshot: &mut Self::Snapshot,
        progress: Progress,
    ) -> Result<(), StorageError>;

    async fn get_progress(
        &self,
        snapshot: &mut Self::Snapshot,
        progress_id: ProgressId,
    ) -> Result<Progress, StorageError>;

    /// Read the progress of a session, locking it for update.
    ///
    /// Returns `Err(StorageError::ProgressNotFound)` if the session has not
    /// started the process.
    async fn get_progress_for_update(
        &self,
        snapshot: &mut Self::Snapshot,
        process_id: ProcessId,
        session_id: &str,
    ) -> Result<Progress, StorageError>;

    /// Apply a version-validated UPDATE to a progress record (OCC).
    ///
    /// Writes every mutable column of `progress`. The UPDATE is conditional
    /// on `version = expected_version`. If zero rows are affected, returns
    /// `Err(StorageError::ConcurrentConflict)`.
    ///
    /// Returns the new version number on success.
    async fn update_progress(
        &self,
        snapshot: &mut Self::Snapshot,
        progress: &Progress,
        expected_version: i64,
    ) -> Result<i64, StorageError>;

    /// Delete a progress record and its completions.
    async fn delete_progress(
        &self,
        snapshot: &mut Self::Snapshot,
        progress_id: ProgressId,
    ) -> Result<(), StorageError>;

    // ── Step completions ──────────────────────────────────────────────────────

    /// `(progress_id, step_id)` must be unique.
    async fn insert_step_completion(
        &self,
        snapshot: &mut Self::Snapshot,
        completion: StepCompletion,
    ) -> Result<(), StorageError>;

    async fn list_step_completions(
        &self,
        snapshot: &mut Self::Snapshot,
        progress_id: ProgressId,
    ) -> Result<Vec<StepCompletion>, StorageError>;

    /// Returns `Err(StorageError::CompletionNotFound)` if absent.
    async fn get_step_completion(
        &self,
        snapshot: &mut Self::Snapshot,
        progress_id: ProgressId,
        step_id: StepId,
    ) -> Result<StepCompletion, StorageError>;

    async fn update_step_completion(
        &self,
        snapshot: &mut Self::Snapshot,
        completion: &StepCompletion,
    ) -> Result<(), StorageError>;

    // ── Views ─────────────────────────────────────────────────────────────────

    async fn insert_process_view(
        &self,
        snapshot: &mut Self::Snapshot,
        view: ProcessViewRecord,
    ) -> Result<(), StorageError>;

    // ── Query operations (outside snapshot) ───────────────────────────────────

    /// List progress records, newest activity first.
    ///
    /// - `process_id`: filter to one process
    /// - `status`: filter to one status
    /// - `limit`: maximum number of results (0 = no limit)
    async fn list_progress(
        &self,
        process_id: Option<ProcessId>,
        status: Option<ProgressStatus>,
        limit: usize,
    ) -> Result<Vec<Progress>, StorageError>;

    /// Views of one process, oldest first.
    async fn list_process_views(
        &self,
        process_id: ProcessId,
    ) -> Result<Vec<ProcessViewRecord>, StorageError>;
}
