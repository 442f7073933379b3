//! Progress and step completion conformance tests.

use std::future::Future;

use stepwise_core::{
    CompletionStatus, FormId, ProgressStatus, StepCompletion, SubmissionId, SubmissionRecord,
};

use super::{at, make_progress, seed, seed_progress, TestResult};
use crate::{ProcessStorage, StorageError};

pub(super) async fn run_progress_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: ProcessStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "progress",
        "insert_and_lookup_by_session",
        insert_and_lookup_by_session(factory).await,
    ));
    results.push(TestResult::from_result(
        "progress",
        "duplicate_session_rejected",
        duplicate_session_rejected(factory).await,
    ));
    results.push(TestResult::from_result(
        "progress",
        "unknown_session_not_found",
        unknown_session_not_found(factory).await,
    ));
    results.push(TestResult::from_result(
        "progress",
        "completions_listed_per_progress",
        completions_listed_per_progress(factory).await,
    ));
    results.push(TestResult::from_result(
        "progress",
        "duplicate_completion_rejected",
        duplicate_completion_rejected(factory).await,
    ));
    results.push(TestResult::from_result(
        "progress",
        "completion_update_persists",
        completion_update_persists(factory).await,
    ));
    results.push(TestResult::from_result(
        "progress",
        "submission_round_trip",
        submission_round_trip(factory).await,
    ));
    results.push(TestResult::from_result(
        "progress",
        "list_progress_filters",
        list_progress_filters(factory).await,
    ));

    results
}

async fn insert_and_lookup_by_session<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ProcessStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let seeded = seed(&storage, "lookup", 2).await?;
    let progress = seed_progress(&storage, &seeded, "sess-1").await?;

    let mut snap = storage.begin_snapshot().await.map_err(|e| e.to_string())?;
    let by_session = storage
        .get_progress_for_update(&mut snap, seeded.process.id, "sess-1")
        .await
        .map_err(|e| format!("by session: {e}"))?;
    let by_id = storage
        .get_progress(&mut snap, progress.id)
        .await
        .map_err(|e| format!("by id: {e}"))?;
    storage.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    if by_session != progress || by_id != progress {
        return Err(format!("expected {progress:?}, got {by_session:?} / {by_id:?}"));
    }
    if by_id.completion_percentage.to_string() != "0.00" {
        return Err(format!(
            "percentage lost its scale: {}",
            by_id.completion_percentage
        ));
    }
    Ok(())
}

async fn duplicate_session_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ProcessStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let seeded = seed(&storage, "dup-session", 1).await?;
    seed_progress(&storage, &seeded, "sess-1").await?;

    let mut snap = storage.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = storage
        .insert_progress(&mut snap, make_progress(seeded.process.id, "sess-1"))
        .await;
    storage.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    match result {
        Err(StorageError::ConstraintViolation { .. }) => Ok(()),
        Err(e) => Err(format!("expected ConstraintViolation, got {e}")),
        Ok(()) => Err("second progress for one session was accepted".to_string()),
    }
}

async fn unknown_session_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ProcessStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let seeded = seed(&storage, "nobody", 1).await?;

    let mut snap = storage.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = storage
        .get_progress_for_update(&mut snap, seeded.process.id, "ghost")
        .await;
    storage.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    match result {
        Err(StorageError::ProgressNotFound { .. }) => Ok(()),
        Err(e) => Err(format!("expected ProgressNotFound, got {e}")),
        Ok(_) => Err("progress for unknown session resolved".to_string()),
    }
}

async fn completions_listed_per_progress<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ProcessStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let seeded = seed(&storage, "completions", 3).await?;
    let one = seed_progress(&storage, &seeded, "sess-1").await?;
    seed_progress(&storage, &seeded, "sess-2").await?;

    let mut snap = storage.begin_snapshot().await.map_err(|e| e.to_string())?;
    let rows = storage
        .list_step_completions(&mut snap, one.id)
        .await
        .map_err(|e| e.to_string())?;
    storage.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    if rows.len() != 3 {
        return Err(format!("expected 3 completions, got {}", rows.len()));
    }
    if rows
        .iter()
        .any(|c| c.progress_id != one.id || c.status != CompletionStatus::Pending)
    {
        return Err("completion list mixed progress records or statuses".to_string());
    }
    Ok(())
}

async fn duplicate_completion_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ProcessStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let seeded = seed(&storage, "dup-completion", 1).await?;
    let progress = seed_progress(&storage, &seeded, "sess-1").await?;

    let mut snap = storage.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = storage
        .insert_step_completion(
            &mut snap,
            StepCompletion::pending(progress.id, seeded.steps[0].id),
        )
        .await;
    storage.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    match result {
        Err(StorageError::ConstraintViolation { .. }) => Ok(()),
        Err(e) => Err(format!("expected ConstraintViolation, got {e}")),
        Ok(()) => Err("second completion for one step was accepted".to_string()),
    }
}

async fn completion_update_persists<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ProcessStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let seeded = seed(&storage, "complete-one", 2).await?;
    let progress = seed_progress(&storage, &seeded, "sess-1").await?;
    let step_id = seeded.steps[1].id;

    let mut snap = storage.begin_snapshot().await.map_err(|e| e.to_string())?;
    let mut row = storage
        .get_step_completion(&mut snap, progress.id, step_id)
        .await
        .map_err(|e| format!("get: {e}"))?;
    row.status = CompletionStatus::Completed;
    row.completed_at = Some(at(30));
    storage
        .update_step_completion(&mut snap, &row)
        .await
        .map_err(|e| format!("update: {e}"))?;
    storage.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let mut snap = storage.begin_snapshot().await.map_err(|e| e.to_string())?;
    let stored = storage
        .get_step_completion(&mut snap, progress.id, step_id)
        .await
        .map_err(|e| e.to_string())?;
    storage.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    if stored != row {
        return Err(format!("expected {row:?}, got {stored:?}"));
    }
    Ok(())
}

async fn submission_round_trip<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ProcessStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let seeded = seed(&storage, "submissions", 1).await?;
    let record = SubmissionRecord {
        id: SubmissionId::new(),
        form_id: seeded.form.id,
        session_id: "sess-1".to_string(),
        submitted_at: at(5),
    };

    let mut snap = storage.begin_snapshot().await.map_err(|e| e.to_string())?;
    storage
        .insert_submission(&mut snap, record.clone())
        .await
        .map_err(|e| format!("insert: {e}"))?;
    let orphan = storage
        .insert_submission(
            &mut snap,
            SubmissionRecord {
                id: SubmissionId::new(),
                form_id: FormId::new(),
                ..record.clone()
            },
        )
        .await;
    let stored = storage
        .get_submission(&mut snap, record.id)
        .await
        .map_err(|e| format!("get: {e}"))?;
    let missing = storage.get_submission(&mut snap, SubmissionId::new()).await;
    storage.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    if stored != record {
        return Err(format!("expected {record:?}, got {stored:?}"));
    }
    if orphan.is_ok() {
        return Err("submission for unknown form was accepted".to_string());
    }
    match missing {
        Err(StorageError::SubmissionNotFound { .. }) => Ok(()),
        other => Err(format!("expected SubmissionNotFound, got {other:?}")),
    }
}

async fn list_progress_filters<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ProcessStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let seeded = seed(&storage, "listing", 1).await?;
    let other = seed(&storage, "listing-other", 1).await?;
    seed_progress(&storage, &seeded, "a").await?;
    let b = seed_progress(&storage, &seeded, "b").await?;
    seed_progress(&storage, &other, "c").await?;

    let mut snap = storage.begin_snapshot().await.map_err(|e| e.to_string())?;
    let mut abandoned = b.clone();
    abandoned.status = ProgressStatus::Abandoned;
    abandoned.last_activity_at = at(100);
    storage
        .update_progress(&mut snap, &abandoned, b.version)
        .await
        .map_err(|e| format!("update: {e}"))?;
    storage.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let all = storage
        .list_progress(None, None, 0)
        .await
        .map_err(|e| e.to_string())?;
    let scoped = storage
        .list_progress(Some(seeded.process.id), None, 0)
        .await
        .map_err(|e| e.to_string())?;
    let only_abandoned = storage
        .list_progress(Some(seeded.process.id), Some(ProgressStatus::Abandoned), 0)
        .await
        .map_err(|e| e.to_string())?;
    let limited = storage
        .list_progress(None, None, 1)
        .await
        .map_err(|e| e.to_string())?;

    if all.len() != 3 || scoped.len() != 2 {
        return Err(format!(
            "expected 3 total and 2 scoped, got {} and {}",
            all.len(),
            scoped.len()
        ));
    }
    if only_abandoned.len() != 1 || only_abandoned[0].id != b.id {
        return Err("status filter did not isolate the abandoned run".to_string());
    }
    // Most recent activity first.
    if limited.len() != 1 || limited[0].id != b.id {
        return Err("limit did not keep the most recently active run".to_string());
    }
    Ok(())
}
