//! Process Definition Store.
//!
//! Read access to processes, their ordered steps and the forms behind them.
//! Two lookups by slug exist and are never mixed: the owner-scoped one used
//! by management, and the public one that only resolves active processes.
//! Both report a miss as the same scope-neutral "process not found".

use std::collections::HashMap;

use stepwise_core::{sort_steps, FormId, FormRecord, OwnerId, Process, ProcessId, ProcessStep, StepId};
use stepwise_storage::ProcessStorage;

use crate::error::EngineError;

pub struct DefinitionStore<'a, S: ProcessStorage> {
    storage: &'a S,
}

impl<'a, S: ProcessStorage> DefinitionStore<'a, S> {
    pub fn new(storage: &'a S) -> Self {
        Self { storage }
    }

    /// Active process by slug, regardless of owner.
    pub async fn public_process(
        &self,
        snapshot: &mut S::Snapshot,
        slug: &str,
    ) -> Result<Process, EngineError> {
        tracing::debug!(slug, "public process lookup");
        Ok(self.storage.get_public_process_by_slug(snapshot, slug).await?)
    }

    /// Process by slug, only if `owner` owns it.
    pub async fn owned_process(
        &self,
        snapshot: &mut S::Snapshot,
        owner: &OwnerId,
        slug: &str,
    ) -> Result<Process, EngineError> {
        tracing::debug!(slug, owner = %owner, "owned process lookup");
        Ok(self
            .storage
            .get_owned_process_by_slug(snapshot, owner, slug)
            .await?)
    }

    /// Steps in execution order.
    pub async fn steps(
        &self,
        snapshot: &mut S::Snapshot,
        process_id: ProcessId,
    ) -> Result<Vec<ProcessStep>, EngineError> {
        let mut steps = self.storage.list_steps(snapshot, process_id).await?;
        sort_steps(&mut steps);
        Ok(steps)
    }

    pub async fn step(
        &self,
        snapshot: &mut S::Snapshot,
        process_id: ProcessId,
        step_id: StepId,
    ) -> Result<ProcessStep, EngineError> {
        Ok(self.storage.get_step(snapshot, process_id, step_id).await?)
    }

    pub async fn form(
        &self,
        snapshot: &mut S::Snapshot,
        form_id: FormId,
    ) -> Result<FormRecord, EngineError> {
        Ok(self.storage.get_form(snapshot, form_id).await?)
    }

    /// The forms behind `steps`, each fetched once.
    pub async fn forms_for(
        &self,
        snapshot: &mut S::Snapshot,
        steps: &[ProcessStep],
    ) -> Result<HashMap<FormId, FormRecord>, EngineError> {
        let mut forms = HashMap::new();
        for step in steps {
            if !forms.contains_key(&step.form_id) {
                let form = self.form(snapshot, step.form_id).await?;
                forms.insert(step.form_id, form);
            }
        }
        Ok(forms)
    }
}
