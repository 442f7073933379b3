//! Owner-side process management.
//!
//! Every lookup here is owner-scoped: a slug that belongs to someone else
//! is reported exactly like one that does not exist. Step positions are
//! only ever changed through [`Reorderer`].

use std::sync::Arc;

use rand::Rng;
use serde::Deserialize;
use stepwise_core::{
    is_valid_slug, slugify, with_suffix, DefinitionError, FormId, FormRecord, JsonMap, OwnerId,
    Process, ProcessId, ProcessStep, ProcessType, Progress, ProgressStatus, StepId, SubmissionId,
    SubmissionRecord, Visibility,
};
use stepwise_storage::ProcessStorage;

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::definitions::DefinitionStore;
use crate::error::EngineError;
use crate::password::SecretHasher;
use crate::reorder::Reorderer;
use crate::txn::settle;

fn default_visibility() -> Visibility {
    Visibility::Public
}

fn default_process_type() -> ProcessType {
    ProcessType::Linear
}

fn yes() -> bool {
    true
}

/// Input for [`ProcessManager::create_process`].
#[derive(Debug, Clone, Deserialize)]
pub struct NewProcess {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Generated from the title when absent.
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default = "default_visibility")]
    pub visibility: Visibility,
    /// Plaintext; hashed before it is stored. Required for private
    /// processes, ignored for public ones.
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_process_type")]
    pub process_type: ProcessType,
    #[serde(default = "yes")]
    pub is_active: bool,
    #[serde(default)]
    pub settings: JsonMap,
}

impl NewProcess {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            slug: None,
            visibility: Visibility::Public,
            password: None,
            process_type: ProcessType::Linear,
            is_active: true,
            settings: JsonMap::new(),
        }
    }
}

/// Input for [`ProcessManager::create_step`].
#[derive(Debug, Clone, Deserialize)]
pub struct NewStep {
    pub form_id: FormId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Appends when absent; an index past the end is clamped.
    #[serde(default)]
    pub order_index: Option<u32>,
    #[serde(default = "yes")]
    pub is_required: bool,
    #[serde(default)]
    pub conditions: JsonMap,
}

impl NewStep {
    pub fn new(form_id: FormId, title: impl Into<String>) -> Self {
        Self {
            form_id,
            title: title.into(),
            description: None,
            order_index: None,
            is_required: true,
            conditions: JsonMap::new(),
        }
    }
}

pub struct ProcessManager<S: ProcessStorage> {
    storage: Arc<S>,
    hasher: SecretHasher,
    clock: Arc<dyn Clock>,
    reorder_offset: u32,
}

impl<S: ProcessStorage> ProcessManager<S> {
    pub fn new(storage: Arc<S>, config: &EngineConfig) -> Result<Self, EngineError> {
        Ok(Self {
            storage,
            hasher: SecretHasher::new(config.hashing)?,
            clock: Arc::new(SystemClock::new()),
            reorder_offset: config.reorder_offset,
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn definitions(&self) -> DefinitionStore<'_, S> {
        DefinitionStore::new(&self.storage)
    }

    fn reorderer(&self) -> Reorderer<'_, S> {
        Reorderer::new(&self.storage, self.reorder_offset)
    }

    // ── Collaborator records ─────────────────────────────────────────────

    /// Mirror a form owned by the form collaborator.
    pub async fn register_form(&self, form: FormRecord) -> Result<(), EngineError> {
        let mut snapshot = self.storage.begin_snapshot().await?;
        let result = self
            .storage
            .insert_form(&mut snapshot, form)
            .await
            .map_err(EngineError::from);
        settle(&*self.storage, snapshot, result).await
    }

    /// Record a submission handed over by the form collaborator.
    pub async fn record_submission(
        &self,
        form_id: FormId,
        session_id: &str,
    ) -> Result<SubmissionRecord, EngineError> {
        let submission = SubmissionRecord {
            id: SubmissionId::new(),
            form_id,
            session_id: session_id.to_string(),
            submitted_at: self.clock.now(),
        };
        let mut snapshot = self.storage.begin_snapshot().await?;
        let result = self
            .storage
            .insert_submission(&mut snapshot, submission.clone())
            .await
            .map(|()| submission)
            .map_err(EngineError::from);
        settle(&*self.storage, snapshot, result).await
    }

    // ── Processes ────────────────────────────────────────────────────────

    pub async fn create_process(
        &self,
        owner: &OwnerId,
        new: NewProcess,
    ) -> Result<Process, EngineError> {
        let NewProcess {
            title,
            description,
            slug,
            visibility,
            password,
            process_type,
            is_active,
            settings,
        } = new;
        if title.trim().is_empty() {
            return Err(DefinitionError::EmptyTitle.into());
        }
        let secret = match visibility {
            Visibility::Public => None,
            Visibility::Private => {
                let password = password
                    .filter(|p| !p.is_empty())
                    .ok_or(DefinitionError::MissingSecret)?;
                Some(self.hasher.hash_blocking(password).await?)
            }
        };

        let mut snapshot = self.storage.begin_snapshot().await?;
        let result = async {
            let slug = match slug {
                Some(slug) => {
                    if !is_valid_slug(&slug) {
                        return Err(EngineError::from(DefinitionError::InvalidSlug(slug)));
                    }
                    if self.storage.slug_exists(&mut snapshot, &slug).await? {
                        return Err(EngineError::validation(format!(
                            "A process with slug '{slug}' already exists"
                        )));
                    }
                    slug
                }
                None => self.unique_slug(&mut snapshot, &slugify(&title)).await?,
            };

            let now = self.clock.now();
            let mut process = Process {
                id: ProcessId::new(),
                owner_id: owner.clone(),
                title: title.trim().to_string(),
                description,
                slug,
                visibility,
                access_secret: None,
                process_type,
                is_active,
                settings,
                created_at: now,
                updated_at: now,
                published_at: None,
            };
            process.set_access(visibility, secret);
            process.validate()?;
            self.storage
                .insert_process(&mut snapshot, process.clone())
                .await?;
            Ok::<_, EngineError>(process)
        }
        .await;
        let process = settle(&*self.storage, snapshot, result).await?;
        tracing::info!(slug = %process.slug, owner = %owner, "process created");
        Ok(process)
    }

    async fn unique_slug(
        &self,
        snapshot: &mut S::Snapshot,
        base: &str,
    ) -> Result<String, EngineError> {
        let mut candidate = base.to_string();
        let mut counter = 1u32;
        while self.storage.slug_exists(snapshot, &candidate).await? {
            candidate = with_suffix(base, &counter.to_string());
            counter += 1;
        }
        Ok(candidate)
    }

    pub async fn get_process(&self, owner: &OwnerId, slug: &str) -> Result<Process, EngineError> {
        let mut snapshot = self.storage.begin_snapshot().await?;
        let result = self
            .definitions()
            .owned_process(&mut snapshot, owner, slug)
            .await;
        settle(&*self.storage, snapshot, result).await
    }

    pub async fn list_steps(
        &self,
        owner: &OwnerId,
        slug: &str,
    ) -> Result<Vec<ProcessStep>, EngineError> {
        let mut snapshot = self.storage.begin_snapshot().await?;
        let result = async {
            let process = self
                .definitions()
                .owned_process(&mut snapshot, owner, slug)
                .await?;
            self.definitions().steps(&mut snapshot, process.id).await
        }
        .await;
        settle(&*self.storage, snapshot, result).await
    }

    /// Apply `change` to an owned process and store it.
    async fn modify<F>(&self, owner: &OwnerId, slug: &str, change: F) -> Result<Process, EngineError>
    where
        F: FnOnce(&mut Process) + Send,
    {
        let mut snapshot = self.storage.begin_snapshot().await?;
        let result = async {
            let mut process = self
                .definitions()
                .owned_process(&mut snapshot, owner, slug)
                .await?;
            change(&mut process);
            process.updated_at = self.clock.now();
            self.storage.update_process(&mut snapshot, &process).await?;
            Ok::<_, EngineError>(process)
        }
        .await;
        settle(&*self.storage, snapshot, result).await
    }

    pub async fn set_active(
        &self,
        owner: &OwnerId,
        slug: &str,
        is_active: bool,
    ) -> Result<Process, EngineError> {
        self.modify(owner, slug, |p| p.is_active = is_active).await
    }

    /// Set `published_at` unless it is already set.
    pub async fn publish(&self, owner: &OwnerId, slug: &str) -> Result<Process, EngineError> {
        let now = self.clock.now();
        self.modify(owner, slug, |p| {
            p.published_at.get_or_insert(now);
        })
        .await
    }

    pub async fn unpublish(&self, owner: &OwnerId, slug: &str) -> Result<Process, EngineError> {
        self.modify(owner, slug, |p| p.published_at = None).await
    }

    /// Copy a process and its steps under `<slug>-copy-<6 hex digits>`.
    /// The copy is unpublished.
    pub async fn duplicate_process(
        &self,
        owner: &OwnerId,
        slug: &str,
    ) -> Result<Process, EngineError> {
        let mut snapshot = self.storage.begin_snapshot().await?;
        let result = async {
            let definitions = self.definitions();
            let original = definitions.owned_process(&mut snapshot, owner, slug).await?;
            let steps = definitions.steps(&mut snapshot, original.id).await?;

            let mut new_slug = copy_slug(&original.slug);
            while self.storage.slug_exists(&mut snapshot, &new_slug).await? {
                new_slug = copy_slug(&original.slug);
            }

            let now = self.clock.now();
            let copy = Process {
                id: ProcessId::new(),
                title: format!("{} (Copy)", original.title),
                slug: new_slug,
                created_at: now,
                updated_at: now,
                published_at: None,
                ..original
            };
            self.storage.insert_process(&mut snapshot, copy.clone()).await?;
            for step in steps {
                let step = ProcessStep {
                    id: StepId::new(),
                    process_id: copy.id,
                    created_at: now,
                    updated_at: now,
                    ..step
                };
                self.storage.insert_step(&mut snapshot, step).await?;
            }
            Ok::<_, EngineError>(copy)
        }
        .await;
        let copy = settle(&*self.storage, snapshot, result).await?;
        tracing::info!(from = slug, to = %copy.slug, "process duplicated");
        Ok(copy)
    }

    /// Delete a process with its steps, runs and views.
    pub async fn delete_process(&self, owner: &OwnerId, slug: &str) -> Result<(), EngineError> {
        let mut snapshot = self.storage.begin_snapshot().await?;
        let result = async {
            let process = self
                .definitions()
                .owned_process(&mut snapshot, owner, slug)
                .await?;
            self.storage
                .delete_process(&mut snapshot, process.id)
                .await?;
            Ok::<_, EngineError>(())
        }
        .await;
        settle(&*self.storage, snapshot, result).await?;
        tracing::info!(slug, "process deleted");
        Ok(())
    }

    // ── Steps ────────────────────────────────────────────────────────────

    /// Add a step. An occupied index pushes the existing step and the ones
    /// after it down by one.
    pub async fn create_step(
        &self,
        owner: &OwnerId,
        slug: &str,
        new: NewStep,
    ) -> Result<ProcessStep, EngineError> {
        let mut snapshot = self.storage.begin_snapshot().await?;
        let result = async {
            let definitions = self.definitions();
            let process = definitions.owned_process(&mut snapshot, owner, slug).await?;
            definitions.form(&mut snapshot, new.form_id).await?;

            let now = self.clock.now();
            let mut step = ProcessStep {
                id: StepId::new(),
                process_id: process.id,
                form_id: new.form_id,
                title: new.title.trim().to_string(),
                description: new.description,
                order_index: 0,
                is_required: new.is_required,
                conditions: new.conditions,
                created_at: now,
                updated_at: now,
            };
            step.validate()?;
            step.order_index = self
                .reorderer()
                .open_slot(&mut snapshot, process.id, new.order_index)
                .await?;
            self.storage.insert_step(&mut snapshot, step.clone()).await?;
            Ok::<_, EngineError>(step)
        }
        .await;
        settle(&*self.storage, snapshot, result).await
    }

    /// Move one step to `target` (clamped to the end) and renumber.
    pub async fn move_step(
        &self,
        owner: &OwnerId,
        slug: &str,
        step_id: StepId,
        target: u32,
    ) -> Result<Vec<ProcessStep>, EngineError> {
        let mut snapshot = self.storage.begin_snapshot().await?;
        let result = async {
            let process = self
                .definitions()
                .owned_process(&mut snapshot, owner, slug)
                .await?;
            self.reorderer()
                .move_step(&mut snapshot, process.id, step_id, target)
                .await
        }
        .await;
        let steps = settle(&*self.storage, snapshot, result).await?;
        tracing::info!(slug, step = %step_id, target, "step moved");
        Ok(steps)
    }

    /// Replace the whole order. `order` must list every step exactly once.
    pub async fn reorder_steps(
        &self,
        owner: &OwnerId,
        slug: &str,
        order: &[StepId],
    ) -> Result<Vec<ProcessStep>, EngineError> {
        let mut snapshot = self.storage.begin_snapshot().await?;
        let result = async {
            let process = self
                .definitions()
                .owned_process(&mut snapshot, owner, slug)
                .await?;
            self.reorderer()
                .reorder(&mut snapshot, process.id, order)
                .await
        }
        .await;
        let steps = settle(&*self.storage, snapshot, result).await?;
        tracing::info!(slug, steps = steps.len(), "steps reordered");
        Ok(steps)
    }

    /// Delete a step and close the gap it leaves.
    pub async fn delete_step(
        &self,
        owner: &OwnerId,
        slug: &str,
        step_id: StepId,
    ) -> Result<(), EngineError> {
        let mut snapshot = self.storage.begin_snapshot().await?;
        let result = async {
            let definitions = self.definitions();
            let process = definitions.owned_process(&mut snapshot, owner, slug).await?;
            let step = definitions.step(&mut snapshot, process.id, step_id).await?;
            self.storage
                .delete_step(&mut snapshot, process.id, step.id)
                .await?;
            self.reorderer()
                .close_gap(&mut snapshot, process.id, step.order_index)
                .await?;
            Ok::<_, EngineError>(())
        }
        .await;
        settle(&*self.storage, snapshot, result).await
    }

    // ── Analytics feed ───────────────────────────────────────────────────

    /// Runs of an owned process, most recently active first. `limit` 0 is
    /// unlimited.
    pub async fn list_progress(
        &self,
        owner: &OwnerId,
        slug: &str,
        status: Option<ProgressStatus>,
        limit: usize,
    ) -> Result<Vec<Progress>, EngineError> {
        let process = self.get_process(owner, slug).await?;
        Ok(self
            .storage
            .list_progress(Some(process.id), status, limit)
            .await?)
    }
}

fn copy_slug(slug: &str) -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..0x100_0000);
    with_suffix(slug, &format!("copy-{suffix:06x}"))
}
