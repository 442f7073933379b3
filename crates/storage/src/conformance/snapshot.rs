//! Snapshot conformance tests.
//!
//! Verifies that committed writes are visible, and that aborted or dropped
//! snapshots leave no trace, including multi-record writes that failed
//! halfway.

use std::future::Future;

use stepwise_core::StepCompletion;

use super::{indices, make_form, make_process, make_progress, seed, TestResult};
use crate::ProcessStorage;

pub(super) async fn run_snapshot_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: ProcessStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "snapshot",
        "begin_and_abort_empty_snapshot",
        begin_and_abort_empty_snapshot(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "committed_process_visible",
        committed_process_visible(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "aborted_process_invisible",
        aborted_process_invisible(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "dropped_snapshot_rolls_back",
        dropped_snapshot_rolls_back(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "partial_progress_rolled_back",
        partial_progress_rolled_back(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "failed_renumber_rolled_back",
        failed_renumber_rolled_back(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "writes_visible_within_snapshot",
        writes_visible_within_snapshot(factory).await,
    ));

    results
}

async fn begin_and_abort_empty_snapshot<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ProcessStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let snap = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    storage
        .abort_snapshot(snap)
        .await
        .map_err(|e| format!("abort: {e}"))?;
    let snap = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin after abort: {e}"))?;
    storage
        .commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))
}

async fn committed_process_visible<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ProcessStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    seed(&storage, "visible", 1).await?;

    let mut snap = storage.begin_snapshot().await.map_err(|e| e.to_string())?;
    let found = storage.get_public_process_by_slug(&mut snap, "visible").await;
    storage.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    found.map(|_| ()).map_err(|e| format!("committed process missing: {e}"))
}

async fn aborted_process_invisible<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ProcessStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;

    let mut snap = storage.begin_snapshot().await.map_err(|e| e.to_string())?;
    storage
        .insert_process(&mut snap, make_process("owner-1", "ghost", true))
        .await
        .map_err(|e| format!("insert: {e}"))?;
    storage.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    let mut snap = storage.begin_snapshot().await.map_err(|e| e.to_string())?;
    let exists = storage
        .slug_exists(&mut snap, "ghost")
        .await
        .map_err(|e| e.to_string())?;
    storage.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    if exists {
        return Err("aborted insert is visible".to_string());
    }
    Ok(())
}

async fn dropped_snapshot_rolls_back<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ProcessStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;

    {
        let mut snap = storage.begin_snapshot().await.map_err(|e| e.to_string())?;
        storage
            .insert_process(&mut snap, make_process("owner-1", "dropped", true))
            .await
            .map_err(|e| format!("insert: {e}"))?;
        // Dropped here without commit.
    }

    let mut snap = storage.begin_snapshot().await.map_err(|e| e.to_string())?;
    let exists = storage
        .slug_exists(&mut snap, "dropped")
        .await
        .map_err(|e| e.to_string())?;
    storage.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    if exists {
        return Err("dropped snapshot was committed".to_string());
    }
    Ok(())
}

/// A progress insert followed by a failing completion insert must leave
/// neither row behind once the snapshot is aborted.
async fn partial_progress_rolled_back<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ProcessStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let seeded = seed(&storage, "atomic", 2).await?;
    let progress = make_progress(seeded.process.id, "sess-1");

    let mut snap = storage.begin_snapshot().await.map_err(|e| e.to_string())?;
    storage
        .insert_progress(&mut snap, progress.clone())
        .await
        .map_err(|e| format!("insert progress: {e}"))?;
    storage
        .insert_step_completion(
            &mut snap,
            StepCompletion::pending(progress.id, seeded.steps[0].id),
        )
        .await
        .map_err(|e| format!("insert completion: {e}"))?;
    let duplicate = storage
        .insert_step_completion(
            &mut snap,
            StepCompletion::pending(progress.id, seeded.steps[0].id),
        )
        .await;
    if duplicate.is_ok() {
        return Err("duplicate completion accepted".to_string());
    }
    storage.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    let mut snap = storage.begin_snapshot().await.map_err(|e| e.to_string())?;
    let lookup = storage
        .get_progress_for_update(&mut snap, seeded.process.id, "sess-1")
        .await;
    let completions = storage
        .list_step_completions(&mut snap, progress.id)
        .await
        .map_err(|e| e.to_string())?;
    storage.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    if lookup.is_ok() {
        return Err("progress survived an aborted snapshot".to_string());
    }
    if !completions.is_empty() {
        return Err(format!("{} completions survived", completions.len()));
    }
    Ok(())
}

async fn failed_renumber_rolled_back<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ProcessStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let seeded = seed(&storage, "renumber", 3).await?;
    let pid = seeded.process.id;

    let mut snap = storage.begin_snapshot().await.map_err(|e| e.to_string())?;
    storage
        .set_step_order_index(&mut snap, pid, seeded.steps[0].id, 1000)
        .await
        .map_err(|e| format!("phase A write: {e}"))?;
    let collision = storage
        .set_step_order_index(&mut snap, pid, seeded.steps[2].id, 1)
        .await;
    if collision.is_ok() {
        return Err("colliding write accepted".to_string());
    }
    storage.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    let got = indices(&storage, pid).await?;
    if got != vec![0, 1, 2] {
        return Err(format!("expected original order [0, 1, 2], got {got:?}"));
    }
    Ok(())
}

async fn writes_visible_within_snapshot<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ProcessStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let form = make_form("inline");
    let process = make_process("owner-1", "inline", true);

    let mut snap = storage.begin_snapshot().await.map_err(|e| e.to_string())?;
    storage
        .insert_form(&mut snap, form.clone())
        .await
        .map_err(|e| e.to_string())?;
    storage
        .insert_process(&mut snap, process.clone())
        .await
        .map_err(|e| e.to_string())?;
    let read_form = storage.get_form(&mut snap, form.id).await;
    let read_process = storage.get_process(&mut snap, process.id).await;
    storage.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    if read_form.map_err(|e| e.to_string())? != form {
        return Err("form not readable inside its snapshot".to_string());
    }
    if read_process.map_err(|e| e.to_string())? != process {
        return Err("process not readable inside its snapshot".to_string());
    }
    Ok(())
}
