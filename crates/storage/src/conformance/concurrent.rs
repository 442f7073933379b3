use std::future::Future;
use std::sync::Arc;

use super::{make_progress, seed, seed_progress, TestResult};
use crate::{ProcessStorage, StorageError};

/// Number of concurrent tasks to spawn in each test.
const N: usize = 10;

pub(super) async fn run_concurrent_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: ProcessStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_updates_exactly_one_wins",
        concurrent_updates_exactly_one_wins(factory).await,
    ));
    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_start_exactly_one_wins",
        concurrent_start_exactly_one_wins(factory).await,
    ));
    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_increments_never_lost",
        concurrent_increments_never_lost(factory).await,
    ));
    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_sessions_all_succeed",
        concurrent_sessions_all_succeed(factory).await,
    ));

    results
}

// ── Concurrent update: exactly one wins ─────────────────────────────────────

/// N tasks each open a snapshot and attempt to update the same progress from
/// version 0. Exactly one commit succeeds; the rest must get
/// ConcurrentConflict.
async fn concurrent_updates_exactly_one_wins<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ProcessStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    let seeded = seed(storage.as_ref(), "race-occ", 3).await?;
    let progress = seed_progress(storage.as_ref(), &seeded, "sess-1").await?;

    let mut handles = Vec::new();
    for i in 0..N {
        let s = storage.clone();
        let mut mine = progress.clone();
        mine.current_step_index = (i % 3) as u32;
        handles.push(tokio::spawn(async move {
            let mut snap = s.begin_snapshot().await?;
            match s.update_progress(&mut snap, &mine, 0).await {
                Ok(_new_version) => {
                    s.commit_snapshot(snap).await?;
                    Ok(true) // won the race
                }
                Err(StorageError::ConcurrentConflict { .. }) => {
                    s.abort_snapshot(snap).await?;
                    Ok(false) // lost the race
                }
                Err(e) => {
                    let _ = s.abort_snapshot(snap).await;
                    Err(e)
                }
            }
        }));
    }

    let (winners, losers) = tally(handles).await?;
    if winners != 1 {
        return Err(format!("expected exactly 1 winner, got {winners}"));
    }
    if losers != N - 1 {
        return Err(format!("expected {} losers, got {losers}", N - 1));
    }
    Ok(())
}

// ── Concurrent start: exactly one wins ──────────────────────────────────────

/// N tasks each attempt to create the progress of one session. Exactly one
/// succeeds; the rest must hit the (process, session) constraint.
async fn concurrent_start_exactly_one_wins<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ProcessStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    let seeded = seed(storage.as_ref(), "race-start", 1).await?;
    let process_id = seeded.process.id;

    let mut handles = Vec::new();
    for _ in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let mut snap = s.begin_snapshot().await?;
            match s
                .insert_progress(&mut snap, make_progress(process_id, "double-tab"))
                .await
            {
                Ok(()) => {
                    s.commit_snapshot(snap).await?;
                    Ok(true)
                }
                Err(StorageError::ConstraintViolation { .. }) => {
                    s.abort_snapshot(snap).await?;
                    Ok(false)
                }
                Err(e) => {
                    let _ = s.abort_snapshot(snap).await;
                    Err(e)
                }
            }
        }));
    }

    let (winners, _) = tally(handles).await?;
    if winners != 1 {
        return Err(format!("expected exactly 1 winner, got {winners}"));
    }
    let rows = storage
        .list_progress(Some(process_id), None, 0)
        .await
        .map_err(|e| e.to_string())?;
    if rows.len() != 1 {
        return Err(format!("expected 1 progress row, got {}", rows.len()));
    }
    Ok(())
}

// ── Read-modify-write: no lost updates ──────────────────────────────────────

/// N tasks each read the cursor, add one and write it back with an OCC
/// check. Every committed increment must be reflected in the final value:
/// a backend may reject some with ConcurrentConflict but never lose one.
async fn concurrent_increments_never_lost<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ProcessStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    let seeded = seed(storage.as_ref(), "race-rmw", 1).await?;
    let process_id = seeded.process.id;
    let progress = seed_progress(storage.as_ref(), &seeded, "sess-1").await?;

    let mut handles = Vec::new();
    for _ in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let mut snap = s.begin_snapshot().await?;
            let mut row = match s.get_progress_for_update(&mut snap, process_id, "sess-1").await {
                Ok(row) => row,
                Err(e) => {
                    let _ = s.abort_snapshot(snap).await;
                    return Err(e);
                }
            };
            let expected = row.version;
            row.current_step_index += 1;
            match s.update_progress(&mut snap, &row, expected).await {
                Ok(_) => {
                    s.commit_snapshot(snap).await?;
                    Ok(true)
                }
                Err(StorageError::ConcurrentConflict { .. }) => {
                    s.abort_snapshot(snap).await?;
                    Ok(false)
                }
                Err(e) => {
                    let _ = s.abort_snapshot(snap).await;
                    Err(e)
                }
            }
        }));
    }

    let (committed, _) = tally(handles).await?;
    let mut snap = storage.begin_snapshot().await.map_err(|e| e.to_string())?;
    let stored = storage
        .get_progress(&mut snap, progress.id)
        .await
        .map_err(|e| e.to_string())?;
    storage.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    if committed == 0 {
        return Err("no increment committed".to_string());
    }
    if stored.current_step_index as usize != committed {
        return Err(format!(
            "lost update: {committed} increments committed, cursor is {}",
            stored.current_step_index
        ));
    }
    if stored.version as usize != committed {
        return Err(format!(
            "version {} does not match {committed} commits",
            stored.version
        ));
    }
    Ok(())
}

// ── Independent sessions ────────────────────────────────────────────────────

async fn concurrent_sessions_all_succeed<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ProcessStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    let seeded = seed(storage.as_ref(), "race-many", 2).await?;
    let process_id = seeded.process.id;

    let mut handles = Vec::new();
    for i in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let mut snap = s.begin_snapshot().await?;
            match s
                .insert_progress(&mut snap, make_progress(process_id, &format!("sess-{i}")))
                .await
            {
                Ok(()) => {
                    s.commit_snapshot(snap).await?;
                    Ok(true)
                }
                Err(e) => {
                    let _ = s.abort_snapshot(snap).await;
                    Err(e)
                }
            }
        }));
    }

    let (winners, _) = tally(handles).await?;
    if winners != N {
        return Err(format!("expected {N} sessions created, got {winners}"));
    }
    Ok(())
}

async fn tally(
    handles: Vec<tokio::task::JoinHandle<Result<bool, StorageError>>>,
) -> Result<(usize, usize), String> {
    let mut won = 0usize;
    let mut lost = 0usize;
    for handle in handles {
        let outcome = handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e: StorageError| format!("storage error: {e}"))?;
        if outcome {
            won += 1;
        } else {
            lost += 1;
        }
    }
    Ok((won, lost))
}
