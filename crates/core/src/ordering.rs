//! Step ordering.
//!
//! Steps are ordered by `order_index`. The uniqueness constraint on
//! (process, order_index) should make ties impossible, but rows written
//! around the engine can still collide, so ties fall back to creation time
//! and then to id. The result is a total order.

use crate::definition::ProcessStep;

/// Sort steps into execution order in place.
pub fn sort_steps(steps: &mut [ProcessStep]) {
    steps.sort_by(|a, b| {
        a.order_index
            .cmp(&b.order_index)
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// The step a cursor points at. `None` when the cursor is past the end;
/// cursors are never clamped.
pub fn step_at(steps: &[ProcessStep], index: u32) -> Option<&ProcessStep> {
    steps.get(usize::try_from(index).ok()?)
}
