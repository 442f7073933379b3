//! Step Reordering Algorithm.
//!
//! `(process, order_index)` is unique and checked on every single-row
//! write, so a permutation cannot be written row by row in place: swapping
//! two neighbours collides on the first write. A reorder instead runs in
//! two phases inside the caller's snapshot:
//!
//! 1. park every step at `max + offset + position`, above every live value;
//! 2. write every step to its final `position`.
//!
//! Phase 1 targets are distinct and above the live range, and phase 2
//! targets are distinct and below the parked range, so no write collides.
//! The result is always the contiguous sequence `0..k`.
//!
//! Inserting or removing a single step only needs the tail of the sequence
//! moved by one, which the storage does as a single relative update.

use std::collections::HashSet;

use stepwise_core::{ProcessId, ProcessStep, StepId};
use stepwise_storage::ProcessStorage;

use crate::definitions::DefinitionStore;
use crate::error::EngineError;

/// Check a full reorder request against the steps currently in the process.
///
/// Every step must appear exactly once and nothing else may appear. Nothing
/// is written when this fails.
pub fn validate_full_order(current: &[ProcessStep], requested: &[StepId]) -> Result<(), EngineError> {
    let known: HashSet<StepId> = current.iter().map(|s| s.id).collect();
    let mut seen = HashSet::with_capacity(requested.len());
    for id in requested {
        if !known.contains(id) {
            return Err(EngineError::validation(format!(
                "step {id} does not belong to this process"
            )));
        }
        if !seen.insert(*id) {
            return Err(EngineError::validation(format!(
                "step {id} appears more than once"
            )));
        }
    }
    if seen.len() != known.len() {
        return Err(EngineError::validation(format!(
            "reorder must list every step of the process: expected {}, got {}",
            known.len(),
            seen.len()
        )));
    }
    Ok(())
}

/// The full order after moving `step_id` to `target`, clamped to the end.
pub fn order_after_move(
    current: &[ProcessStep],
    step_id: StepId,
    target: u32,
) -> Result<Vec<StepId>, EngineError> {
    let mut order: Vec<StepId> = current.iter().map(|s| s.id).collect();
    let from = order
        .iter()
        .position(|id| *id == step_id)
        .ok_or_else(|| EngineError::not_found("step"))?;
    let moving = order.remove(from);
    let to = usize::try_from(target).unwrap_or(usize::MAX).min(order.len());
    order.insert(to, moving);
    Ok(order)
}

pub struct Reorderer<'a, S: ProcessStorage> {
    storage: &'a S,
    offset: u32,
}

impl<'a, S: ProcessStorage> Reorderer<'a, S> {
    pub fn new(storage: &'a S, offset: u32) -> Self {
        Self {
            storage,
            offset: offset.max(1),
        }
    }

    /// Two-phase renumber of `order` to positions `0..order.len()`.
    pub async fn apply(
        &self,
        snapshot: &mut S::Snapshot,
        process_id: ProcessId,
        order: &[StepId],
    ) -> Result<(), EngineError> {
        let max = self
            .storage
            .max_order_index(snapshot, process_id)
            .await?
            .unwrap_or(0);
        let park = max
            .checked_add(self.offset)
            .ok_or_else(|| EngineError::validation("step positions exhausted"))?;

        for (position, step_id) in order.iter().enumerate() {
            let parked = position_u32(position)
                .and_then(|p| park.checked_add(p))
                .ok_or_else(|| EngineError::validation("step positions exhausted"))?;
            self.storage
                .set_step_order_index(snapshot, process_id, *step_id, parked)
                .await?;
        }
        for (position, step_id) in order.iter().enumerate() {
            let target = position_u32(position)
                .ok_or_else(|| EngineError::validation("step positions exhausted"))?;
            self.storage
                .set_step_order_index(snapshot, process_id, *step_id, target)
                .await?;
        }
        Ok(())
    }

    /// Full reorder: `requested` must name every step exactly once.
    pub async fn reorder(
        &self,
        snapshot: &mut S::Snapshot,
        process_id: ProcessId,
        requested: &[StepId],
    ) -> Result<Vec<ProcessStep>, EngineError> {
        let definitions = DefinitionStore::new(self.storage);
        let current = definitions.steps(snapshot, process_id).await?;
        validate_full_order(&current, requested)?;
        self.apply(snapshot, process_id, requested).await?;
        definitions.steps(snapshot, process_id).await
    }

    /// Move one step to `target` (clamped) and renumber the rest around it.
    pub async fn move_step(
        &self,
        snapshot: &mut S::Snapshot,
        process_id: ProcessId,
        step_id: StepId,
        target: u32,
    ) -> Result<Vec<ProcessStep>, EngineError> {
        let definitions = DefinitionStore::new(self.storage);
        let current = definitions.steps(snapshot, process_id).await?;
        let order = order_after_move(&current, step_id, target)?;
        self.apply(snapshot, process_id, &order).await?;
        definitions.steps(snapshot, process_id).await
    }

    /// Make room for a new step and return the index it should take.
    ///
    /// `None` or an index past the end appends. An occupied index moves
    /// that step and everything after it up by one.
    pub async fn open_slot(
        &self,
        snapshot: &mut S::Snapshot,
        process_id: ProcessId,
        index: Option<u32>,
    ) -> Result<u32, EngineError> {
        let steps = self.storage.list_steps(snapshot, process_id).await?;
        let next = steps
            .iter()
            .map(|s| s.order_index.saturating_add(1))
            .max()
            .unwrap_or(0);
        let index = match index {
            Some(i) if i < next => i,
            _ => return Ok(next),
        };
        if steps.iter().any(|s| s.order_index == index) {
            let moved = self
                .storage
                .shift_order_indices(snapshot, process_id, index, 1)
                .await?;
            tracing::debug!(process = %process_id, index, moved, "opened slot");
        }
        Ok(index)
    }

    /// Close the hole left by a removed step at `removed_index`.
    pub async fn close_gap(
        &self,
        snapshot: &mut S::Snapshot,
        process_id: ProcessId,
        removed_index: u32,
    ) -> Result<usize, EngineError> {
        let start = match removed_index.checked_add(1) {
            Some(start) => start,
            None => return Ok(0),
        };
        Ok(self
            .storage
            .shift_order_indices(snapshot, process_id, start, -1)
            .await?)
    }
}

fn position_u32(position: usize) -> Option<u32> {
    u32::try_from(position).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepwise_core::{FormId, JsonMap};
    use time::OffsetDateTime;

    fn steps(n: u32) -> Vec<ProcessStep> {
        let process_id = ProcessId::new();
        let form_id = FormId::new();
        (0..n)
            .map(|i| ProcessStep {
                id: StepId::new(),
                process_id,
                form_id,
                title: format!("Step {i}"),
                description: None,
                order_index: i,
                is_required: true,
                conditions: JsonMap::new(),
                created_at: OffsetDateTime::UNIX_EPOCH,
                updated_at: OffsetDateTime::UNIX_EPOCH,
            })
            .collect()
    }

    fn ids(steps: &[ProcessStep]) -> Vec<StepId> {
        steps.iter().map(|s| s.id).collect()
    }

    #[test]
    fn full_order_accepts_any_permutation() {
        let current = steps(4);
        let mut reversed = ids(&current);
        reversed.reverse();
        assert!(validate_full_order(&current, &reversed).is_ok());
        assert!(validate_full_order(&current, &ids(&current)).is_ok());
    }

    #[test]
    fn full_order_rejects_foreign_ids() {
        let current = steps(2);
        let mut requested = ids(&current);
        requested[1] = StepId::new();
        let err = validate_full_order(&current, &requested).unwrap_err();
        assert!(err.to_string().contains("does not belong"), "{err}");
    }

    #[test]
    fn full_order_rejects_duplicates() {
        let current = steps(3);
        let requested = vec![current[0].id, current[0].id, current[1].id];
        let err = validate_full_order(&current, &requested).unwrap_err();
        assert!(err.to_string().contains("more than once"), "{err}");
    }

    #[test]
    fn full_order_requires_every_step() {
        let current = steps(3);
        let err = validate_full_order(&current, &ids(&current)[..2]).unwrap_err();
        assert!(err.to_string().contains("expected 3, got 2"), "{err}");
    }

    #[test]
    fn move_to_front_and_back() {
        let current = steps(4);
        let all = ids(&current);

        let front = order_after_move(&current, all[2], 0).unwrap();
        assert_eq!(front, vec![all[2], all[0], all[1], all[3]]);

        let back = order_after_move(&current, all[0], 3).unwrap();
        assert_eq!(back, vec![all[1], all[2], all[3], all[0]]);
    }

    #[test]
    fn move_past_end_is_clamped() {
        let current = steps(3);
        let all = ids(&current);
        let order = order_after_move(&current, all[0], 99).unwrap();
        assert_eq!(order, vec![all[1], all[2], all[0]]);
    }

    #[test]
    fn move_of_unknown_step_is_not_found() {
        let current = steps(2);
        let err = order_after_move(&current, StepId::new(), 0).unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }
}
