//! Execution Service: the progress state machine.
//!
//! ```text
//! NotStarted --start--> InProgress --complete_process--> Completed
//!                           |  ^
//!                           |  +-- start / advance / retreat / complete_step
//!                           +------abandon-----------> Abandoned
//! ```
//!
//! Each public operation runs in one storage snapshot: the process lookup,
//! the progress read, every write and the response are computed against
//! the same snapshot, then committed or aborted as a unit. Observers and
//! password hashing run outside the snapshot.

use std::collections::BTreeMap;
use std::sync::Arc;

use stepwise_core::{
    step_at, CompletionStatus, JsonMap, OwnerId, Process, ProcessId, ProcessType,
    ProcessViewRecord, Progress, ProgressId, ProgressStatus, StepId, SubmissionId, ViewId,
    Visibility,
};
use stepwise_storage::ProcessStorage;
use time::OffsetDateTime;

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::definitions::DefinitionStore;
use crate::error::EngineError;
use crate::observer::{notify, ProgressEvent, ProgressObserver};
use crate::password::SecretHasher;
use crate::progress::ProgressRepository;
use crate::txn::settle;
use crate::view::{
    CompletionEntry, CurrentStep, ProcessCompletionOutcome, ProcessStructure, ProgressView,
    StartOutcome, StepCompletionOutcome, StepForm, StepSummary,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Back,
}

pub struct ExecutionService<S: ProcessStorage> {
    storage: Arc<S>,
    config: EngineConfig,
    hasher: SecretHasher,
    clock: Arc<dyn Clock>,
    observers: Vec<Arc<dyn ProgressObserver>>,
}

impl<S: ProcessStorage> ExecutionService<S> {
    pub fn new(storage: Arc<S>, config: EngineConfig) -> Result<Self, EngineError> {
        let hasher = SecretHasher::new(config.hashing)?;
        Ok(Self {
            storage,
            config,
            hasher,
            clock: Arc::new(SystemClock::new()),
            observers: Vec::new(),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    fn definitions(&self) -> DefinitionStore<'_, S> {
        DefinitionStore::new(&self.storage)
    }

    fn progress_repo(&self) -> ProgressRepository<'_, S> {
        ProgressRepository::new(&self.storage)
    }

    // ── Structure and access ─────────────────────────────────────────────

    /// Process metadata and ordered steps.
    ///
    /// A password-protected process that the caller has not unlocked is
    /// returned with `requires_password` set and without `visibility` or
    /// `total_steps`; the caller decides whether to block.
    pub async fn get_structure(
        &self,
        slug: &str,
        password_verified: bool,
    ) -> Result<ProcessStructure, EngineError> {
        let mut snapshot = self.storage.begin_snapshot().await?;
        let result = self
            .structure_in(&mut snapshot, slug, password_verified)
            .await;
        settle(&*self.storage, snapshot, result).await
    }

    async fn structure_in(
        &self,
        snapshot: &mut S::Snapshot,
        slug: &str,
        password_verified: bool,
    ) -> Result<ProcessStructure, EngineError> {
        let process = self.definitions().public_process(snapshot, slug).await?;
        let definitions = self.definitions();
        let steps = definitions.steps(snapshot, process.id).await?;
        let forms = definitions.forms_for(snapshot, &steps).await?;

        let mut summaries = Vec::with_capacity(steps.len());
        for step in &steps {
            let form = forms
                .get(&step.form_id)
                .ok_or_else(|| EngineError::not_found("form"))?;
            summaries.push(StepSummary::new(step, form));
        }

        let requires_password = process.is_password_protected() && !password_verified;
        Ok(ProcessStructure {
            id: process.id,
            title: process.title,
            description: process.description,
            slug: process.slug,
            process_type: process.process_type,
            requires_password,
            visibility: (!requires_password).then_some(process.visibility),
            total_steps: (!requires_password).then_some(summaries.len()),
            steps: summaries,
            settings: process.settings,
        })
    }

    /// Check `candidate` against the process secret.
    ///
    /// Asking about a process that has no password is a caller mistake and
    /// reported as a validation error, not as a wrong password.
    pub async fn verify_password(&self, slug: &str, candidate: &str) -> Result<bool, EngineError> {
        let mut snapshot = self.storage.begin_snapshot().await?;
        let result = self.definitions().public_process(&mut snapshot, slug).await;
        let process = settle(&*self.storage, snapshot, result).await?;

        if process.visibility != Visibility::Private {
            return Err(EngineError::validation(
                "This process is not password protected",
            ));
        }
        let secret = match process.access_secret.filter(|s| !s.is_empty()) {
            Some(secret) => secret,
            None => return Err(EngineError::validation("This process has no password set")),
        };
        // Hashing is slow; the snapshot is already released.
        let ok = self
            .hasher
            .verify_blocking(candidate.to_string(), secret)
            .await?;
        tracing::debug!(slug, ok, "password check");
        Ok(ok)
    }

    /// Record a view for the analytics consumer.
    ///
    /// Only an unknown process is an error. Failing to store the view is
    /// logged and reported as `Ok(None)`.
    pub async fn track_view(
        &self,
        slug: &str,
        session_id: &str,
        ip_address: Option<String>,
        metadata: JsonMap,
    ) -> Result<Option<ViewId>, EngineError> {
        let mut snapshot = self.storage.begin_snapshot().await?;
        let process = match self.definitions().public_process(&mut snapshot, slug).await {
            Ok(process) => process,
            Err(e) => return settle(&*self.storage, snapshot, Err(e)).await,
        };

        let view = ProcessViewRecord {
            id: ViewId::new(),
            process_id: process.id,
            session_id: session_id.to_string(),
            ip_address,
            metadata,
            viewed_at: self.clock.now(),
        };
        let view_id = view.id;
        if let Err(e) = self.storage.insert_process_view(&mut snapshot, view).await {
            tracing::warn!(slug, error = %e, "view not recorded");
            if let Err(abort) = self.storage.abort_snapshot(snapshot).await {
                tracing::warn!(error = %abort, "abort after failed view insert also failed");
            }
            return Ok(None);
        }
        match self.storage.commit_snapshot(snapshot).await {
            Ok(()) => Ok(Some(view_id)),
            Err(e) => {
                tracing::warn!(slug, error = %e, "view not recorded");
                Ok(None)
            }
        }
    }

    // ── Run lifecycle ────────────────────────────────────────────────────

    /// Create-or-resume the run for (process, session).
    ///
    /// An in-progress run only has its activity refreshed. A completed or
    /// abandoned run is returned untouched. Otherwise a new run is created
    /// at step 0 with a pending completion for every step.
    pub async fn start(
        &self,
        slug: &str,
        session_id: &str,
        user_id: Option<OwnerId>,
    ) -> Result<StartOutcome, EngineError> {
        require_session(session_id)?;
        let mut snapshot = self.storage.begin_snapshot().await?;
        let result = self
            .start_in(&mut snapshot, slug, session_id, user_id)
            .await;
        let outcome = settle(&*self.storage, snapshot, result).await?;

        if outcome.created {
            tracing::info!(slug, progress = %outcome.progress.id, "progress started");
            self.emit(ProgressEvent::Started {
                process_id: outcome.progress.process_id,
                progress_id: outcome.progress.id,
                session_id: session_id.to_string(),
            });
        }
        Ok(outcome)
    }

    async fn start_in(
        &self,
        snapshot: &mut S::Snapshot,
        slug: &str,
        session_id: &str,
        user_id: Option<OwnerId>,
    ) -> Result<StartOutcome, EngineError> {
        let process = self.definitions().public_process(snapshot, slug).await?;
        let repo = self.progress_repo();
        let now = self.clock.now();

        if let Some(mut existing) = repo.find(snapshot, process.id, session_id).await? {
            if existing.status == ProgressStatus::InProgress {
                repo.touch(snapshot, &mut existing, now).await?;
            }
            return Ok(StartOutcome {
                progress: existing,
                created: false,
            });
        }

        let steps = self.definitions().steps(snapshot, process.id).await?;
        let progress = repo
            .create(snapshot, process.id, &steps, session_id, user_id, now)
            .await?;
        Ok(StartOutcome {
            progress,
            created: true,
        })
    }

    pub async fn get_progress(&self, slug: &str, session_id: &str) -> Result<ProgressView, EngineError> {
        let mut snapshot = self.storage.begin_snapshot().await?;
        let result = self.progress_view_in(&mut snapshot, slug, session_id).await;
        settle(&*self.storage, snapshot, result).await
    }

    async fn progress_view_in(
        &self,
        snapshot: &mut S::Snapshot,
        slug: &str,
        session_id: &str,
    ) -> Result<ProgressView, EngineError> {
        let process = self.definitions().public_process(snapshot, slug).await?;
        let progress = self
            .progress_repo()
            .for_session(snapshot, process.id, session_id)
            .await?;
        self.render(snapshot, &process, progress).await
    }

    async fn render(
        &self,
        snapshot: &mut S::Snapshot,
        process: &Process,
        progress: Progress,
    ) -> Result<ProgressView, EngineError> {
        let definitions = self.definitions();
        let steps = definitions.steps(snapshot, process.id).await?;

        let current_step = match step_at(&steps, progress.current_step_index) {
            Some(step) => {
                let form = definitions.form(snapshot, step.form_id).await?;
                Some(CurrentStep {
                    id: step.id,
                    title: step.title.clone(),
                    order_index: step.order_index,
                    form_slug: form.slug,
                })
            }
            None => None,
        };

        let step_completions = self
            .progress_repo()
            .completions(snapshot, progress.id)
            .await?
            .into_iter()
            .map(|c| {
                (
                    c.step_id,
                    CompletionEntry {
                        status: c.status,
                        completed_at: c.completed_at,
                    },
                )
            })
            .collect::<BTreeMap<_, _>>();

        Ok(ProgressView {
            id: progress.id,
            process_id: progress.process_id,
            session_id: progress.session_id,
            status: progress.status,
            current_step_index: progress.current_step_index,
            current_step,
            total_steps: steps.len(),
            completion_percentage: progress.completion_percentage,
            started_at: progress.started_at,
            last_activity_at: progress.last_activity_at,
            completed_at: progress.completed_at,
            step_completions,
        })
    }

    /// The step under the cursor. NotFound when the cursor is out of range.
    pub async fn get_current_step(
        &self,
        slug: &str,
        session_id: &str,
    ) -> Result<CurrentStep, EngineError> {
        self.get_progress(slug, session_id)
            .await?
            .current_step
            .ok_or_else(|| EngineError::not_found("current step"))
    }

    /// Move the cursor one step forward. Linear processes only.
    pub async fn advance(&self, slug: &str, session_id: &str) -> Result<ProgressView, EngineError> {
        self.move_cursor(slug, session_id, Direction::Forward).await
    }

    /// Move the cursor one step back. Linear processes only.
    pub async fn retreat(&self, slug: &str, session_id: &str) -> Result<ProgressView, EngineError> {
        self.move_cursor(slug, session_id, Direction::Back).await
    }

    async fn move_cursor(
        &self,
        slug: &str,
        session_id: &str,
        direction: Direction,
    ) -> Result<ProgressView, EngineError> {
        let mut snapshot = self.storage.begin_snapshot().await?;
        let result = self
            .move_cursor_in(&mut snapshot, slug, session_id, direction)
            .await;
        settle(&*self.storage, snapshot, result).await
    }

    async fn move_cursor_in(
        &self,
        snapshot: &mut S::Snapshot,
        slug: &str,
        session_id: &str,
        direction: Direction,
    ) -> Result<ProgressView, EngineError> {
        let process = self.definitions().public_process(snapshot, slug).await?;
        if process.process_type != ProcessType::Linear {
            return Err(EngineError::validation(
                "This operation is only available for linear processes",
            ));
        }
        let repo = self.progress_repo();
        let mut progress = repo.for_session(snapshot, process.id, session_id).await?;
        require_in_progress(&progress)?;

        let total = self.definitions().steps(snapshot, process.id).await?.len();
        let index = progress.current_step_index;
        let next = match direction {
            Direction::Forward => {
                let at_last = usize::try_from(index)
                    .map(|i| i.saturating_add(1) >= total)
                    .unwrap_or(true);
                if at_last {
                    return Err(EngineError::validation("Already at the last step"));
                }
                index + 1
            }
            Direction::Back => {
                if index == 0 {
                    return Err(EngineError::validation("Already at the first step"));
                }
                index - 1
            }
        };

        repo.set_cursor(snapshot, &mut progress, next, self.clock.now())
            .await?;
        tracing::debug!(slug, progress = %progress.id, from = index, to = next, "cursor moved");
        self.render(snapshot, &process, progress).await
    }

    /// Step and form metadata for rendering. Never touches progress.
    pub async fn get_step_form(&self, slug: &str, step_id: StepId) -> Result<StepForm, EngineError> {
        let mut snapshot = self.storage.begin_snapshot().await?;
        let result = self.step_form_in(&mut snapshot, slug, step_id).await;
        settle(&*self.storage, snapshot, result).await
    }

    async fn step_form_in(
        &self,
        snapshot: &mut S::Snapshot,
        slug: &str,
        step_id: StepId,
    ) -> Result<StepForm, EngineError> {
        let definitions = self.definitions();
        let process = definitions.public_process(snapshot, slug).await?;
        let step = definitions.step(snapshot, process.id, step_id).await?;
        let form = definitions.form(snapshot, step.form_id).await?;
        Ok(StepForm {
            step_id: step.id,
            step_title: step.title,
            step_description: step.description,
            form_id: form.id,
            form_slug: form.slug,
            form_title: form.title,
            form_description: form.description,
        })
    }

    /// Mark a step completed, optionally attaching the submission that
    /// satisfied it, and recompute the run's percentage.
    ///
    /// Idempotent: a step that is already completed keeps its original
    /// `completed_at`. A submission from another session is rejected before
    /// anything is written.
    pub async fn complete_step(
        &self,
        slug: &str,
        step_id: StepId,
        session_id: &str,
        submission_id: Option<SubmissionId>,
    ) -> Result<StepCompletionOutcome, EngineError> {
        let mut snapshot = self.storage.begin_snapshot().await?;
        let result = self
            .complete_step_in(&mut snapshot, slug, step_id, session_id, submission_id)
            .await;
        let (process_id, progress_id, outcome) = settle(&*self.storage, snapshot, result).await?;

        self.emit(ProgressEvent::StepCompleted {
            process_id,
            progress_id,
            step_id: outcome.step_id,
            completion_percentage: outcome.completion_percentage,
        });
        Ok(outcome)
    }

    async fn complete_step_in(
        &self,
        snapshot: &mut S::Snapshot,
        slug: &str,
        step_id: StepId,
        session_id: &str,
        submission_id: Option<SubmissionId>,
    ) -> Result<(ProcessId, ProgressId, StepCompletionOutcome), EngineError> {
        let definitions = self.definitions();
        let process = definitions.public_process(snapshot, slug).await?;
        let step = definitions.step(snapshot, process.id, step_id).await?;
        let repo = self.progress_repo();
        let mut progress = repo.for_session(snapshot, process.id, session_id).await?;
        require_in_progress(&progress)?;

        if let Some(submission_id) = submission_id {
            let submission = self.storage.get_submission(snapshot, submission_id).await?;
            if submission.session_id != session_id {
                return Err(EngineError::validation(
                    "Submission does not belong to this session",
                ));
            }
        }

        let now = self.clock.now();
        let mut completion = repo.completion_for(snapshot, progress.id, step.id).await?;
        if !completion.is_completed() {
            completion.status = CompletionStatus::Completed;
            completion.completed_at = Some(now);
        }
        if submission_id.is_some() {
            completion.submission_id = submission_id;
        }
        repo.save_completion(snapshot, &completion).await?;

        let steps = definitions.steps(snapshot, process.id).await?;
        let percentage = repo
            .recompute_percentage(snapshot, &mut progress, &steps, now)
            .await?;
        tracing::debug!(slug, progress = %progress.id, step = %step.id, %percentage, "step completed");

        Ok((
            process.id,
            progress.id,
            StepCompletionOutcome {
                step_id: step.id,
                step_title: step.title,
                status: completion.status,
                completed_at: completion.completed_at,
                completion_percentage: percentage,
            },
        ))
    }

    /// Finish the run once every required step is completed.
    pub async fn complete_process(
        &self,
        slug: &str,
        session_id: &str,
    ) -> Result<ProcessCompletionOutcome, EngineError> {
        let mut snapshot = self.storage.begin_snapshot().await?;
        let result = self
            .complete_process_in(&mut snapshot, slug, session_id)
            .await;
        let (progress, outcome) = settle(&*self.storage, snapshot, result).await?;

        if !outcome.already_completed {
            tracing::info!(slug, progress = %progress.id, "progress completed");
            self.emit(ProgressEvent::ProcessCompleted {
                process_id: progress.process_id,
                progress_id: progress.id,
            });
        }
        Ok(outcome)
    }

    async fn complete_process_in(
        &self,
        snapshot: &mut S::Snapshot,
        slug: &str,
        session_id: &str,
    ) -> Result<(Progress, ProcessCompletionOutcome), EngineError> {
        let process = self.definitions().public_process(snapshot, slug).await?;
        let repo = self.progress_repo();
        let mut progress = repo.for_session(snapshot, process.id, session_id).await?;

        match progress.status {
            ProgressStatus::Completed => {
                let outcome = ProcessCompletionOutcome {
                    status: progress.status,
                    already_completed: true,
                    message: "Process already completed".to_string(),
                    completed_at: progress.completed_at,
                    completion_percentage: progress.completion_percentage,
                };
                return Ok((progress, outcome));
            }
            ProgressStatus::Abandoned => {
                return Err(EngineError::validation("This run was abandoned"));
            }
            ProgressStatus::InProgress => {}
        }

        let steps = self.definitions().steps(snapshot, process.id).await?;
        let completions = repo.completions(snapshot, progress.id).await?;
        let required: Vec<StepId> = steps
            .iter()
            .filter(|s| s.is_required)
            .map(|s| s.id)
            .collect();
        let done = required
            .iter()
            .filter(|id| {
                completions
                    .iter()
                    .any(|c| c.step_id == **id && c.is_completed())
            })
            .count();
        if done < required.len() {
            return Err(EngineError::validation(format!(
                "Not all required steps are completed. Completed: {done}/{}",
                required.len()
            )));
        }

        repo.mark_completed(snapshot, &mut progress, self.clock.now())
            .await?;
        let outcome = ProcessCompletionOutcome {
            status: progress.status,
            already_completed: false,
            message: "Process completed successfully".to_string(),
            completed_at: progress.completed_at,
            completion_percentage: progress.completion_percentage,
        };
        Ok((progress, outcome))
    }

    /// Mark the run abandoned. Abandoning an abandoned run is a no-op; a
    /// completed run cannot be abandoned.
    pub async fn abandon(&self, slug: &str, session_id: &str) -> Result<Progress, EngineError> {
        let mut snapshot = self.storage.begin_snapshot().await?;
        let result = self.abandon_in(&mut snapshot, slug, session_id).await;
        let (progress, changed) = settle(&*self.storage, snapshot, result).await?;
        if changed {
            self.announce_abandoned(&progress);
        }
        Ok(progress)
    }

    async fn abandon_in(
        &self,
        snapshot: &mut S::Snapshot,
        slug: &str,
        session_id: &str,
    ) -> Result<(Progress, bool), EngineError> {
        let process = self.definitions().public_process(snapshot, slug).await?;
        let repo = self.progress_repo();
        let mut progress = repo.for_session(snapshot, process.id, session_id).await?;
        match progress.status {
            ProgressStatus::Abandoned => Ok((progress, false)),
            ProgressStatus::Completed => Err(EngineError::validation(
                "A completed run cannot be abandoned",
            )),
            ProgressStatus::InProgress => {
                repo.mark_abandoned(snapshot, &mut progress, self.clock.now())
                    .await?;
                Ok((progress, true))
            }
        }
    }

    /// Abandon `listed` if it is still in progress, untouched since it was
    /// listed, and idle since before `cutoff`. Returns whether it was
    /// abandoned; a concurrent change is a `Conflict`.
    pub(crate) async fn abandon_if_idle(
        &self,
        listed: &Progress,
        cutoff: OffsetDateTime,
    ) -> Result<bool, EngineError> {
        let mut snapshot = self.storage.begin_snapshot().await?;
        let result = self.abandon_if_idle_in(&mut snapshot, listed, cutoff).await;
        let abandoned = settle(&*self.storage, snapshot, result).await?;
        if let Some(progress) = &abandoned {
            self.announce_abandoned(progress);
        }
        Ok(abandoned.is_some())
    }

    async fn abandon_if_idle_in(
        &self,
        snapshot: &mut S::Snapshot,
        listed: &Progress,
        cutoff: OffsetDateTime,
    ) -> Result<Option<Progress>, EngineError> {
        let repo = self.progress_repo();
        let mut current = repo.get(snapshot, listed.id).await?;
        if current.status != ProgressStatus::InProgress || current.last_activity_at >= cutoff {
            return Ok(None);
        }
        // Save against the listed version so a touch in between conflicts.
        current.version = listed.version;
        repo.mark_abandoned(snapshot, &mut current, self.clock.now())
            .await?;
        Ok(Some(current))
    }

    fn announce_abandoned(&self, progress: &Progress) {
        tracing::info!(progress = %progress.id, "progress abandoned");
        self.emit(ProgressEvent::Abandoned {
            process_id: progress.process_id,
            progress_id: progress.id,
        });
    }

    fn emit(&self, event: ProgressEvent) {
        notify(&self.observers, &event);
    }
}

fn require_session(session_id: &str) -> Result<(), EngineError> {
    if session_id.trim().is_empty() {
        return Err(EngineError::validation("session id is required"));
    }
    Ok(())
}

fn require_in_progress(progress: &Progress) -> Result<(), EngineError> {
    if progress.status.is_terminal() {
        return Err(EngineError::validation(format!(
            "This run is already {}",
            progress.status
        )));
    }
    Ok(())
}
