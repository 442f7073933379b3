//! In-memory `ProcessStorage` backend.
//!
//! All tables live behind one async mutex. A snapshot takes the lock for
//! its whole life and works on a private copy of the tables; commit writes
//! the copy back, abort or drop throws it away. Snapshots are therefore
//! serializable, and a second snapshot (or a query) from another task waits
//! until the first one finishes.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use stepwise_core::{
    sort_steps, CompletionId, FormId, FormRecord, OwnerId, Process, ProcessId, ProcessStep,
    ProcessViewRecord, Progress, ProgressId, ProgressStatus, StepCompletion, StepId, SubmissionId,
    SubmissionRecord,
};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::StorageError;
use crate::traits::ProcessStorage;

#[derive(Debug, Clone, Default)]
struct Tables {
    forms: HashMap<FormId, FormRecord>,
    submissions: HashMap<SubmissionId, SubmissionRecord>,
    processes: HashMap<ProcessId, Process>,
    steps: HashMap<StepId, ProcessStep>,
    progress: HashMap<ProgressId, Progress>,
    completions: BTreeMap<CompletionId, StepCompletion>,
    views: Vec<ProcessViewRecord>,
}

impl Tables {
    fn process_steps(&self, process_id: ProcessId) -> impl Iterator<Item = &ProcessStep> {
        self.steps.values().filter(move |s| s.process_id == process_id)
    }

    fn index_taken(&self, process_id: ProcessId, order_index: u32, except: StepId) -> bool {
        self.process_steps(process_id)
            .any(|s| s.order_index == order_index && s.id != except)
    }

    fn remove_completions_where(&mut self, pred: impl Fn(&StepCompletion) -> bool) {
        self.completions.retain(|_, c| !pred(c));
    }
}

fn order_conflict(process_id: ProcessId, order_index: u32) -> StorageError {
    StorageError::ConstraintViolation {
        detail: format!("process_steps({process_id}, order_index={order_index}) already exists"),
    }
}

/// Volatile storage for tests, demos and single-process deployments.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

/// An open transaction against [`MemoryStorage`].
pub struct MemorySnapshot {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
}

#[async_trait]
impl ProcessStorage for MemoryStorage {
    type Snapshot = MemorySnapshot;

    async fn begin_snapshot(&self) -> Result<MemorySnapshot, StorageError> {
        let guard = match self.tables.clone().try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::debug!("waiting for the memory storage lock");
                self.tables.clone().lock_owned().await
            }
        };
        let working = guard.clone();
        Ok(MemorySnapshot { guard, working })
    }

    async fn commit_snapshot(&self, snapshot: MemorySnapshot) -> Result<(), StorageError> {
        let MemorySnapshot { mut guard, working } = snapshot;
        *guard = working;
        Ok(())
    }

    async fn abort_snapshot(&self, snapshot: MemorySnapshot) -> Result<(), StorageError> {
        drop(snapshot);
        tracing::debug!("memory snapshot aborted");
        Ok(())
    }

    async fn insert_form(
        &self,
        snapshot: &mut MemorySnapshot,
        form: FormRecord,
    ) -> Result<(), StorageError> {
        let t = &mut snapshot.working;
        if t.forms.contains_key(&form.id) {
            return Err(StorageError::ConstraintViolation {
                detail: format!("form {} already exists", form.id),
            });
        }
        t.forms.insert(form.id, form);
        Ok(())
    }

    async fn get_form(
        &self,
        snapshot: &mut MemorySnapshot,
        form_id: FormId,
    ) -> Result<FormRecord, StorageError> {
        snapshot
            .working
            .forms
            .get(&form_id)
            .cloned()
            .ok_or(StorageError::FormNotFound {
                form_id: form_id.to_string(),
            })
    }

    async fn insert_submission(
        &self,
        snapshot: &mut MemorySnapshot,
        submission: SubmissionRecord,
    ) -> Result<(), StorageError> {
        let t = &mut snapshot.working;
        if !t.forms.contains_key(&submission.form_id) {
            return Err(StorageError::FormNotFound {
                form_id: submission.form_id.to_string(),
            });
        }
        if t.submissions.contains_key(&submission.id) {
            return Err(StorageError::ConstraintViolation {
                detail: format!("submission {} already exists", submission.id),
            });
        }
        t.submissions.insert(submission.id, submission);
        Ok(())
    }

    async fn get_submission(
        &self,
        snapshot: &mut MemorySnapshot,
        submission_id: SubmissionId,
    ) -> Result<SubmissionRecord, StorageError> {
        snapshot
            .working
            .submissions
            .get(&submission_id)
            .cloned()
            .ok_or(StorageError::SubmissionNotFound {
                submission_id: submission_id.to_string(),
            })
    }

    async fn insert_process(
        &self,
        snapshot: &mut MemorySnapshot,
        process: Process,
    ) -> Result<(), StorageError> {
        let t = &mut snapshot.working;
        if t.processes.contains_key(&process.id) {
            return Err(StorageError::ConstraintViolation {
                detail: format!("process {} already exists", process.id),
            });
        }
        if t.processes.values().any(|p| p.slug == process.slug) {
            return Err(StorageError::ConstraintViolation {
                detail: format!("processes(slug={}) already exists", process.slug),
            });
        }
        t.processes.insert(process.id, process);
        Ok(())
    }

    async fn update_process(
        &self,
        snapshot: &mut MemorySnapshot,
        process: &Process,
    ) -> Result<(), StorageError> {
        let t = &mut snapshot.working;
        if t
            .processes
            .values()
            .any(|p| p.slug == process.slug && p.id != process.id)
        {
            return Err(StorageError::ConstraintViolation {
                detail: format!("processes(slug={}) already exists", process.slug),
            });
        }
        let slot = t
            .processes
            .get_mut(&process.id)
            .ok_or(StorageError::ProcessNotFound {
                key: process.id.to_string(),
            })?;
        *slot = process.clone();
        Ok(())
    }

    async fn delete_process(
        &self,
        snapshot: &mut MemorySnapshot,
        process_id: ProcessId,
    ) -> Result<(), StorageError> {
        let t = &mut snapshot.working;
        if t.processes.remove(&process_id).is_none() {
            return Err(StorageError::ProcessNotFound {
                key: process_id.to_string(),
            });
        }
        t.steps.retain(|_, s| s.process_id != process_id);
        let runs: Vec<ProgressId> = t
            .progress
            .values()
            .filter(|p| p.process_id == process_id)
            .map(|p| p.id)
            .collect();
        t.progress.retain(|_, p| p.process_id != process_id);
        t.remove_completions_where(|c| runs.contains(&c.progress_id));
        t.views.retain(|v| v.process_id != process_id);
        Ok(())
    }

    async fn get_process(
        &self,
        snapshot: &mut MemorySnapshot,
        process_id: ProcessId,
    ) -> Result<Process, StorageError> {
        snapshot
            .working
            .processes
            .get(&process_id)
            .cloned()
            .ok_or(StorageError::ProcessNotFound {
                key: process_id.to_string(),
            })
    }

    async fn get_owned_process_by_slug(
        &self,
        snapshot: &mut MemorySnapshot,
        owner_id: &OwnerId,
        slug: &str,
    ) -> Result<Process, StorageError> {
        snapshot
            .working
            .processes
            .values()
            .find(|p| p.slug == slug && &p.owner_id == owner_id)
            .cloned()
            .ok_or(StorageError::ProcessNotFound {
                key: slug.to_string(),
            })
    }

    async fn get_public_process_by_slug(
        &self,
        snapshot: &mut MemorySnapshot,
        slug: &str,
    ) -> Result<Process, StorageError> {
        snapshot
            .working
            .processes
            .values()
            .find(|p| p.slug == slug && p.is_active)
            .cloned()
            .ok_or(StorageError::ProcessNotFound {
                key: slug.to_string(),
            })
    }

    async fn slug_exists(
        &self,
        snapshot: &mut MemorySnapshot,
        slug: &str,
    ) -> Result<bool, StorageError> {
        Ok(snapshot.working.processes.values().any(|p| p.slug == slug))
    }

    async fn insert_step(
        &self,
        snapshot: &mut MemorySnapshot,
        step: ProcessStep,
    ) -> Result<(), StorageError> {
        let t = &mut snapshot.working;
        if !t.processes.contains_key(&step.process_id) {
            return Err(StorageError::ProcessNotFound {
                key: step.process_id.to_string(),
            });
        }
        if !t.forms.contains_key(&step.form_id) {
            return Err(StorageError::FormNotFound {
                form_id: step.form_id.to_string(),
            });
        }
        if t.steps.contains_key(&step.id) {
            return Err(StorageError::ConstraintViolation {
                detail: format!("step {} already exists", step.id),
            });
        }
        if t.index_taken(step.process_id, step.order_index, step.id) {
            return Err(order_conflict(step.process_id, step.order_index));
        }
        t.steps.insert(step.id, step);
        Ok(())
    }

    async fn update_step(
        &self,
        snapshot: &mut MemorySnapshot,
        step: &ProcessStep,
    ) -> Result<(), StorageError> {
        let t = &mut snapshot.working;
        match t.steps.get(&step.id) {
            Some(existing) if existing.process_id == step.process_id => {}
            _ => {
                return Err(StorageError::StepNotFound {
                    step_id: step.id.to_string(),
                })
            }
        }
        if !t.forms.contains_key(&step.form_id) {
            return Err(StorageError::FormNotFound {
                form_id: step.form_id.to_string(),
            });
        }
        if t.index_taken(step.process_id, step.order_index, step.id) {
            return Err(order_conflict(step.process_id, step.order_index));
        }
        t.steps.insert(step.id, step.clone());
        Ok(())
    }

    async fn delete_step(
        &self,
        snapshot: &mut MemorySnapshot,
        process_id: ProcessId,
        step_id: StepId,
    ) -> Result<(), StorageError> {
        let t = &mut snapshot.working;
        match t.steps.get(&step_id) {
            Some(s) if s.process_id == process_id => {}
            _ => {
                return Err(StorageError::StepNotFound {
                    step_id: step_id.to_string(),
                })
            }
        }
        t.steps.remove(&step_id);
        t.remove_completions_where(|c| c.step_id == step_id);
        Ok(())
    }

    async fn list_steps(
        &self,
        snapshot: &mut MemorySnapshot,
        process_id: ProcessId,
    ) -> Result<Vec<ProcessStep>, StorageError> {
        let mut steps: Vec<ProcessStep> =
            snapshot.working.process_steps(process_id).cloned().collect();
        sort_steps(&mut steps);
        Ok(steps)
    }

    async fn get_step(
        &self,
        snapshot: &mut MemorySnapshot,
        process_id: ProcessId,
        step_id: StepId,
    ) -> Result<ProcessStep, StorageError> {
        snapshot
            .working
            .steps
            .get(&step_id)
            .filter(|s| s.process_id == process_id)
            .cloned()
            .ok_or(StorageError::StepNotFound {
                step_id: step_id.to_string(),
            })
    }

    async fn max_order_index(
        &self,
        snapshot: &mut MemorySnapshot,
        process_id: ProcessId,
    ) -> Result<Option<u32>, StorageError> {
        Ok(snapshot
            .working
            .process_steps(process_id)
            .map(|s| s.order_index)
            .max())
    }

    async fn set_step_order_index(
        &self,
        snapshot: &mut MemorySnapshot,
        process_id: ProcessId,
        step_id: StepId,
        order_index: u32,
    ) -> Result<(), StorageError> {
        let t = &mut snapshot.working;
        match t.steps.get(&step_id) {
            Some(s) if s.process_id == process_id => {}
            _ => {
                return Err(StorageError::StepNotFound {
                    step_id: step_id.to_string(),
                })
            }
        }
        if t.index_taken(process_id, order_index, step_id) {
            return Err(order_conflict(process_id, order_index));
        }
        if let Some(step) = t.steps.get_mut(&step_id) {
            step.order_index = order_index;
        }
        Ok(())
    }

    async fn shift_order_indices(
        &self,
        snapshot: &mut MemorySnapshot,
        process_id: ProcessId,
        start: u32,
        delta: i32,
    ) -> Result<usize, StorageError> {
        let t = &mut snapshot.working;
        let mut moved: Vec<(StepId, u32)> = Vec::new();
        for step in t.process_steps(process_id) {
            if step.order_index < start {
                continue;
            }
            let shifted = i64::from(step.order_index) + i64::from(delta);
            let shifted = u32::try_from(shifted).map_err(|_| StorageError::ConstraintViolation {
                detail: format!("order_index {shifted} out of range for step {}", step.id),
            })?;
            moved.push((step.id, shifted));
        }

        // Statement-level check: only the final positions must be unique.
        let mut seen = std::collections::HashSet::new();
        for step in t.process_steps(process_id) {
            let final_index = moved
                .iter()
                .find(|(id, _)| *id == step.id)
                .map(|(_, idx)| *idx)
                .unwrap_or(step.order_index);
            if !seen.insert(final_index) {
                return Err(order_conflict(process_id, final_index));
            }
        }

        for (id, idx) in &moved {
            if let Some(step) = t.steps.get_mut(id) {
                step.order_index = *idx;
            }
        }
        Ok(moved.len())
    }

    async fn insert_progress(
        &self,
        snapshot: &mut MemorySnapshot,
        progress: Progress,
    ) -> Result<(), StorageError> {
        let t = &mut snapshot.working;
        if !t.processes.contains_key(&progress.process_id) {
            return Err(StorageError::ProcessNotFound {
                key: progress.process_id.to_string(),
            });
        }
        if t.progress.values().any(|p| {
            p.id == progress.id
                || (p.process_id == progress.process_id && p.session_id == progress.session_id)
        }) {
            return Err(StorageError::ConstraintViolation {
                detail: format!(
                    "progress({}, session={}) already exists",
                    progress.process_id, progress.session_id
                ),
            });
        }
        t.progress.insert(progress.id, progress);
        Ok(())
    }

    async fn get_progress(
        &self,
        snapshot: &mut MemorySnapshot,
        progress_id: ProgressId,
    ) -> Result<Progress, StorageError> {
        snapshot
            .working
            .progress
            .get(&progress_id)
            .cloned()
            .ok_or(StorageError::ProgressNotFound {
                key: progress_id.to_string(),
            })
    }

    async fn get_progress_for_update(
        &self,
        snapshot: &mut MemorySnapshot,
        process_id: ProcessId,
        session_id: &str,
    ) -> Result<Progress, StorageError> {
        snapshot
            .working
            .progress
            .values()
            .find(|p| p.process_id == process_id && p.session_id == session_id)
            .cloned()
            .ok_or(StorageError::ProgressNotFound {
                key: format!("{process_id}/{session_id}"),
            })
    }

    async fn update_progress(
        &self,
        snapshot: &mut MemorySnapshot,
        progress: &Progress,
        expected_version: i64,
    ) -> Result<i64, StorageError> {
        let row = snapshot
            .working
            .progress
            .get_mut(&progress.id)
            .ok_or(StorageError::ProgressNotFound {
                key: progress.id.to_string(),
            })?;
        if row.version != expected_version {
            return Err(StorageError::ConcurrentConflict {
                progress_id: progress.id.to_string(),
                expected_version,
            });
        }
        let version = expected_version + 1;
        *row = Progress {
            version,
            ..progress.clone()
        };
        Ok(version)
    }

    async fn delete_progress(
        &self,
        snapshot: &mut MemorySnapshot,
        progress_id: ProgressId,
    ) -> Result<(), StorageError> {
        let t = &mut snapshot.working;
        if t.progress.remove(&progress_id).is_none() {
            return Err(StorageError::ProgressNotFound {
                key: progress_id.to_string(),
            });
        }
        t.remove_completions_where(|c| c.progress_id == progress_id);
        Ok(())
    }

    async fn insert_step_completion(
        &self,
        snapshot: &mut MemorySnapshot,
        completion: StepCompletion,
    ) -> Result<(), StorageError> {
        let t = &mut snapshot.working;
        if !t.progress.contains_key(&completion.progress_id) {
            return Err(StorageError::ProgressNotFound {
                key: completion.progress_id.to_string(),
            });
        }
        if !t.steps.contains_key(&completion.step_id) {
            return Err(StorageError::StepNotFound {
                step_id: completion.step_id.to_string(),
            });
        }
        if t.completions.values().any(|c| {
            c.id == completion.id
                || (c.progress_id == completion.progress_id && c.step_id == completion.step_id)
        }) {
            return Err(StorageError::ConstraintViolation {
                detail: format!(
                    "step_completions({}, {}) already exists",
                    completion.progress_id, completion.step_id
                ),
            });
        }
        t.completions.insert(completion.id, completion);
        Ok(())
    }

    async fn list_step_completions(
        &self,
        snapshot: &mut MemorySnapshot,
        progress_id: ProgressId,
    ) -> Result<Vec<StepCompletion>, StorageError> {
        Ok(snapshot
            .working
            .completions
            .values()
            .filter(|c| c.progress_id == progress_id)
            .cloned()
            .collect())
    }

    async fn get_step_completion(
        &self,
        snapshot: &mut MemorySnapshot,
        progress_id: ProgressId,
        step_id: StepId,
    ) -> Result<StepCompletion, StorageError> {
        snapshot
            .working
            .completions
            .values()
            .find(|c| c.progress_id == progress_id && c.step_id == step_id)
            .cloned()
            .ok_or(StorageError::CompletionNotFound {
                key: format!("{progress_id}/{step_id}"),
            })
    }

    async fn update_step_completion(
        &self,
        snapshot: &mut MemorySnapshot,
        completion: &StepCompletion,
    ) -> Result<(), StorageError> {
        let row = snapshot
            .working
            .completions
            .get_mut(&completion.id)
            .ok_or(StorageError::CompletionNotFound {
                key: completion.id.to_string(),
            })?;
        *row = completion.clone();
        Ok(())
    }

    async fn insert_process_view(
        &self,
        snapshot: &mut MemorySnapshot,
        view: ProcessViewRecord,
    ) -> Result<(), StorageError> {
        let t = &mut snapshot.working;
        if !t.processes.contains_key(&view.process_id) {
            return Err(StorageError::ProcessNotFound {
                key: view.process_id.to_string(),
            });
        }
        t.views.push(view);
        Ok(())
    }

    async fn list_progress(
        &self,
        process_id: Option<ProcessId>,
        status: Option<ProgressStatus>,
        limit: usize,
    ) -> Result<Vec<Progress>, StorageError> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<Progress> = tables
            .progress
            .values()
            .filter(|p| process_id.map_or(true, |id| p.process_id == id))
            .filter(|p| status.map_or(true, |s| p.status == s))
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            b.last_activity_at
                .cmp(&a.last_activity_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        if limit > 0 {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn list_process_views(
        &self,
        process_id: ProcessId,
    ) -> Result<Vec<ProcessViewRecord>, StorageError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .views
            .iter()
            .filter(|v| v.process_id == process_id)
            .cloned()
            .collect())
    }
}
