//! Version validation (OCC) conformance tests.
//!
//! Verifies that `update_progress` bumps the version on success and rejects
//! stale expected versions with `ConcurrentConflict`.

use std::future::Future;

use stepwise_core::{ProgressId, ProgressStatus};

use super::{make_progress, seed, seed_progress, TestResult};
use crate::{ProcessStorage, StorageError};

pub(super) async fn run_version_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: ProcessStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "occ",
        "update_increments_version",
        update_increments_version(factory).await,
    ));
    results.push(TestResult::from_result(
        "occ",
        "sequential_updates_chain_versions",
        sequential_updates_chain_versions(factory).await,
    ));
    results.push(TestResult::from_result(
        "occ",
        "stale_version_conflicts",
        stale_version_conflicts(factory).await,
    ));
    results.push(TestResult::from_result(
        "occ",
        "conflict_leaves_row_untouched",
        conflict_leaves_row_untouched(factory).await,
    ));
    results.push(TestResult::from_result(
        "occ",
        "update_missing_progress_not_found",
        update_missing_progress_not_found(factory).await,
    ));

    results
}

async fn update_increments_version<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ProcessStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let seeded = seed(&storage, "occ-bump", 3).await?;
    let progress = seed_progress(&storage, &seeded, "sess-1").await?;

    let mut moved = progress.clone();
    moved.current_step_index = 2;

    let mut snap = storage.begin_snapshot().await.map_err(|e| e.to_string())?;
    let version = storage
        .update_progress(&mut snap, &moved, 0)
        .await
        .map_err(|e| format!("update: {e}"))?;
    let stored = storage
        .get_progress(&mut snap, progress.id)
        .await
        .map_err(|e| e.to_string())?;
    storage.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    if version != 1 || stored.version != 1 {
        return Err(format!(
            "expected version 1, got returned={version} stored={}",
            stored.version
        ));
    }
    if stored.current_step_index != 2 {
        return Err(format!(
            "expected cursor 2, got {}",
            stored.current_step_index
        ));
    }
    Ok(())
}

async fn sequential_updates_chain_versions<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ProcessStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let seeded = seed(&storage, "occ-chain", 5).await?;
    let mut progress = seed_progress(&storage, &seeded, "sess-1").await?;

    for expected in 0..4 {
        let mut snap = storage.begin_snapshot().await.map_err(|e| e.to_string())?;
        progress.current_step_index += 1;
        let version = storage
            .update_progress(&mut snap, &progress, expected)
            .await
            .map_err(|e| format!("update at {expected}: {e}"))?;
        storage.commit_snapshot(snap).await.map_err(|e| e.to_string())?;
        if version != expected + 1 {
            return Err(format!("expected version {}, got {version}", expected + 1));
        }
        progress.version = version;
    }
    Ok(())
}

async fn stale_version_conflicts<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ProcessStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let seeded = seed(&storage, "occ-stale", 2).await?;
    let progress = seed_progress(&storage, &seeded, "sess-1").await?;

    let mut snap = storage.begin_snapshot().await.map_err(|e| e.to_string())?;
    storage
        .update_progress(&mut snap, &progress, 0)
        .await
        .map_err(|e| format!("first update: {e}"))?;
    storage.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    // A writer that read version 0 before the first commit.
    let mut snap = storage.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = storage.update_progress(&mut snap, &progress, 0).await;
    storage.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    match result {
        Err(StorageError::ConcurrentConflict {
            expected_version: 0,
            ..
        }) => Ok(()),
        Err(e) => Err(format!("expected ConcurrentConflict at 0, got {e}")),
        Ok(v) => Err(format!("stale update accepted, new version {v}")),
    }
}

async fn conflict_leaves_row_untouched<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ProcessStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let seeded = seed(&storage, "occ-untouched", 2).await?;
    let progress = seed_progress(&storage, &seeded, "sess-1").await?;

    let mut abandoned = progress.clone();
    abandoned.status = ProgressStatus::Abandoned;

    let mut snap = storage.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = storage.update_progress(&mut snap, &abandoned, 7).await;
    let stored = storage
        .get_progress(&mut snap, progress.id)
        .await
        .map_err(|e| e.to_string())?;
    storage.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    if result.is_ok() {
        return Err("update with wrong version accepted".to_string());
    }
    if stored.status != ProgressStatus::InProgress || stored.version != 0 {
        return Err(format!("conflicting update leaked: {stored:?}"));
    }
    Ok(())
}

async fn update_missing_progress_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ProcessStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let seeded = seed(&storage, "occ-missing", 0).await?;
    let mut ghost = make_progress(seeded.process.id, "ghost");
    ghost.id = ProgressId::new();

    let mut snap = storage.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = storage.update_progress(&mut snap, &ghost, 0).await;
    storage.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    match result {
        Err(StorageError::ProgressNotFound { .. }) => Ok(()),
        Err(e) => Err(format!("expected ProgressNotFound, got {e}")),
        Ok(_) => Err("update of a missing progress succeeded".to_string()),
    }
}
