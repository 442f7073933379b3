//! Step ordering conformance tests.
//!
//! Verifies the (process, order_index) uniqueness constraint on single-row
//! writes and the behaviour of relative bulk shifts.

use std::future::Future;

use super::{indices, make_step, seed, TestResult};
use crate::{ProcessStorage, StorageError};

pub(super) async fn run_ordering_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: ProcessStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "ordering",
        "list_steps_sorted_by_order_index",
        list_steps_sorted_by_order_index(factory).await,
    ));
    results.push(TestResult::from_result(
        "ordering",
        "duplicate_order_index_rejected_on_insert",
        duplicate_order_index_rejected_on_insert(factory).await,
    ));
    results.push(TestResult::from_result(
        "ordering",
        "single_row_swap_collides",
        single_row_swap_collides(factory).await,
    ));
    results.push(TestResult::from_result(
        "ordering",
        "swap_through_free_slot_succeeds",
        swap_through_free_slot_succeeds(factory).await,
    ));
    results.push(TestResult::from_result(
        "ordering",
        "shift_up_opens_a_slot",
        shift_up_opens_a_slot(factory).await,
    ));
    results.push(TestResult::from_result(
        "ordering",
        "shift_down_closes_a_gap",
        shift_down_closes_a_gap(factory).await,
    ));
    results.push(TestResult::from_result(
        "ordering",
        "shift_onto_occupied_slot_rejected",
        shift_onto_occupied_slot_rejected(factory).await,
    ));
    results.push(TestResult::from_result(
        "ordering",
        "max_order_index_tracks_steps",
        max_order_index_tracks_steps(factory).await,
    ));

    results
}

async fn list_steps_sorted_by_order_index<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ProcessStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let seeded = seed(&storage, "sorted", 0).await?;

    // Inserted out of order, with gaps.
    let mut snap = storage.begin_snapshot().await.map_err(|e| e.to_string())?;
    for idx in [7, 0, 3] {
        storage
            .insert_step(&mut snap, make_step(seeded.process.id, seeded.form.id, idx))
            .await
            .map_err(|e| format!("insert {idx}: {e}"))?;
    }
    storage.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let got = indices(&storage, seeded.process.id).await?;
    if got != vec![0, 3, 7] {
        return Err(format!("expected [0, 3, 7], got {got:?}"));
    }
    Ok(())
}

async fn duplicate_order_index_rejected_on_insert<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ProcessStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let seeded = seed(&storage, "dup-index", 2).await?;

    let mut snap = storage.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = storage
        .insert_step(&mut snap, make_step(seeded.process.id, seeded.form.id, 1))
        .await;
    storage.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    match result {
        Err(StorageError::ConstraintViolation { .. }) => Ok(()),
        Err(e) => Err(format!("expected ConstraintViolation, got {e}")),
        Ok(()) => Err("two steps accepted at order_index 1".to_string()),
    }
}

/// Moving step 0 onto slot 1 while step 1 still sits there must fail: this
/// is the collision the two-phase renumber exists to avoid.
async fn single_row_swap_collides<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ProcessStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let seeded = seed(&storage, "swap-naive", 2).await?;

    let mut snap = storage.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = storage
        .set_step_order_index(&mut snap, seeded.process.id, seeded.steps[0].id, 1)
        .await;
    storage.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    match result {
        Err(StorageError::ConstraintViolation { .. }) => Ok(()),
        Err(e) => Err(format!("expected ConstraintViolation, got {e}")),
        Ok(()) => Err("colliding single-row write was accepted".to_string()),
    }
}

async fn swap_through_free_slot_succeeds<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ProcessStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let seeded = seed(&storage, "swap-offset", 2).await?;
    let pid = seeded.process.id;
    let (a, b) = (seeded.steps[0].id, seeded.steps[1].id);

    let mut snap = storage.begin_snapshot().await.map_err(|e| e.to_string())?;
    for (id, idx) in [(b, 1000), (a, 1001), (b, 0), (a, 1)] {
        storage
            .set_step_order_index(&mut snap, pid, id, idx)
            .await
            .map_err(|e| format!("set {idx}: {e}"))?;
    }
    let steps = storage
        .list_steps(&mut snap, pid)
        .await
        .map_err(|e| e.to_string())?;
    storage.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let order: Vec<_> = steps.iter().map(|s| s.id).collect();
    if order != vec![b, a] {
        return Err("steps not swapped".to_string());
    }
    Ok(())
}

async fn shift_up_opens_a_slot<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ProcessStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let seeded = seed(&storage, "shift-up", 4).await?;

    let mut snap = storage.begin_snapshot().await.map_err(|e| e.to_string())?;
    let moved = storage
        .shift_order_indices(&mut snap, seeded.process.id, 1, 1)
        .await
        .map_err(|e| format!("shift: {e}"))?;
    storage.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    if moved != 3 {
        return Err(format!("expected 3 steps moved, got {moved}"));
    }
    let got = indices(&storage, seeded.process.id).await?;
    if got != vec![0, 2, 3, 4] {
        return Err(format!("expected [0, 2, 3, 4], got {got:?}"));
    }
    Ok(())
}

async fn shift_down_closes_a_gap<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ProcessStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let seeded = seed(&storage, "shift-down", 4).await?;

    let mut snap = storage.begin_snapshot().await.map_err(|e| e.to_string())?;
    storage
        .delete_step(&mut snap, seeded.process.id, seeded.steps[1].id)
        .await
        .map_err(|e| format!("delete: {e}"))?;
    let moved = storage
        .shift_order_indices(&mut snap, seeded.process.id, 2, -1)
        .await
        .map_err(|e| format!("shift: {e}"))?;
    storage.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    if moved != 2 {
        return Err(format!("expected 2 steps moved, got {moved}"));
    }
    let got = indices(&storage, seeded.process.id).await?;
    if got != vec![0, 1, 2] {
        return Err(format!("expected [0, 1, 2], got {got:?}"));
    }
    Ok(())
}

async fn shift_onto_occupied_slot_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ProcessStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let seeded = seed(&storage, "shift-collide", 3).await?;

    let mut snap = storage.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = storage
        .shift_order_indices(&mut snap, seeded.process.id, 2, -1)
        .await;
    storage.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    if !matches!(result, Err(StorageError::ConstraintViolation { .. })) {
        return Err(format!("expected ConstraintViolation, got {result:?}"));
    }
    let got = indices(&storage, seeded.process.id).await?;
    if got != vec![0, 1, 2] {
        return Err(format!("aborted shift left {got:?}"));
    }
    Ok(())
}

async fn max_order_index_tracks_steps<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ProcessStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let empty = seed(&storage, "empty", 0).await?;
    let full = seed(&storage, "full", 5).await?;

    let mut snap = storage.begin_snapshot().await.map_err(|e| e.to_string())?;
    let none = storage
        .max_order_index(&mut snap, empty.process.id)
        .await
        .map_err(|e| e.to_string())?;
    let four = storage
        .max_order_index(&mut snap, full.process.id)
        .await
        .map_err(|e| e.to_string())?;
    storage.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    if none.is_some() || four != Some(4) {
        return Err(format!("expected (None, Some(4)), got ({none:?}, {four:?})"));
    }
    Ok(())
}
