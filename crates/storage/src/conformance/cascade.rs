//! Cascade conformance tests: deleting an owner removes its dependents.

use std::future::Future;

use stepwise_core::{JsonMap, ProcessViewRecord, ViewId};

use super::{at, seed, seed_progress, TestResult};
use crate::{ProcessStorage, StorageError};

pub(super) async fn run_cascade_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: ProcessStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "cascade",
        "delete_process_removes_dependents",
        delete_process_removes_dependents(factory).await,
    ));
    results.push(TestResult::from_result(
        "cascade",
        "delete_step_removes_its_completions",
        delete_step_removes_its_completions(factory).await,
    ));
    results.push(TestResult::from_result(
        "cascade",
        "delete_progress_removes_completions",
        delete_progress_removes_completions(factory).await,
    ));

    results
}

async fn delete_process_removes_dependents<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ProcessStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let seeded = seed(&storage, "doomed", 2).await?;
    let survivor = seed(&storage, "survivor", 1).await?;
    let progress = seed_progress(&storage, &seeded, "sess-1").await?;
    seed_progress(&storage, &survivor, "sess-1").await?;

    let mut snap = storage.begin_snapshot().await.map_err(|e| e.to_string())?;
    storage
        .insert_process_view(
            &mut snap,
            ProcessViewRecord {
                id: ViewId::new(),
                process_id: seeded.process.id,
                session_id: "sess-1".to_string(),
                ip_address: Some("127.0.0.1".to_string()),
                metadata: JsonMap::new(),
                viewed_at: at(1),
            },
        )
        .await
        .map_err(|e| format!("insert view: {e}"))?;
    storage
        .delete_process(&mut snap, seeded.process.id)
        .await
        .map_err(|e| format!("delete: {e}"))?;
    storage.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let mut snap = storage.begin_snapshot().await.map_err(|e| e.to_string())?;
    let step = storage
        .get_step(&mut snap, seeded.process.id, seeded.steps[0].id)
        .await;
    let run = storage.get_progress(&mut snap, progress.id).await;
    let completions = storage
        .list_step_completions(&mut snap, progress.id)
        .await
        .map_err(|e| e.to_string())?;
    storage.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    if !matches!(step, Err(StorageError::StepNotFound { .. })) {
        return Err("step survived its process".to_string());
    }
    if !matches!(run, Err(StorageError::ProgressNotFound { .. })) {
        return Err("progress survived its process".to_string());
    }
    if !completions.is_empty() {
        return Err("completions survived their process".to_string());
    }
    let views = storage
        .list_process_views(seeded.process.id)
        .await
        .map_err(|e| e.to_string())?;
    if !views.is_empty() {
        return Err("views survived their process".to_string());
    }
    let others = storage
        .list_progress(Some(survivor.process.id), None, 0)
        .await
        .map_err(|e| e.to_string())?;
    if others.len() != 1 {
        return Err("delete reached into another process".to_string());
    }
    Ok(())
}

async fn delete_step_removes_its_completions<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ProcessStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let seeded = seed(&storage, "trim-step", 3).await?;
    let progress = seed_progress(&storage, &seeded, "sess-1").await?;

    let mut snap = storage.begin_snapshot().await.map_err(|e| e.to_string())?;
    storage
        .delete_step(&mut snap, seeded.process.id, seeded.steps[1].id)
        .await
        .map_err(|e| format!("delete: {e}"))?;
    let completions = storage
        .list_step_completions(&mut snap, progress.id)
        .await
        .map_err(|e| e.to_string())?;
    storage.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    if completions.len() != 2 {
        return Err(format!("expected 2 completions, got {}", completions.len()));
    }
    if completions.iter().any(|c| c.step_id == seeded.steps[1].id) {
        return Err("completion of deleted step survived".to_string());
    }
    Ok(())
}

async fn delete_progress_removes_completions<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ProcessStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let seeded = seed(&storage, "reset", 2).await?;
    let progress = seed_progress(&storage, &seeded, "sess-1").await?;

    let mut snap = storage.begin_snapshot().await.map_err(|e| e.to_string())?;
    storage
        .delete_progress(&mut snap, progress.id)
        .await
        .map_err(|e| format!("delete: {e}"))?;
    let completions = storage
        .list_step_completions(&mut snap, progress.id)
        .await
        .map_err(|e| e.to_string())?;
    let again = storage.delete_progress(&mut snap, progress.id).await;
    storage.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    if !completions.is_empty() {
        return Err("completions survived their progress".to_string());
    }
    match again {
        Err(StorageError::ProgressNotFound { .. }) => Ok(()),
        other => Err(format!("expected ProgressNotFound on second delete, got {other:?}")),
    }
}
