//! Definition store conformance tests: slug uniqueness, scoped lookups and
//! foreign keys.

use std::future::Future;

use stepwise_core::{OwnerId, ProcessId, StepId};

use super::{make_form, make_process, make_step, seed, TestResult};
use crate::{ProcessStorage, StorageError};

pub(super) async fn run_definition_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: ProcessStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "definitions",
        "insert_and_get_process",
        insert_and_get_process(factory).await,
    ));
    results.push(TestResult::from_result(
        "definitions",
        "duplicate_slug_rejected",
        duplicate_slug_rejected(factory).await,
    ));
    results.push(TestResult::from_result(
        "definitions",
        "owner_scope_hides_other_owners",
        owner_scope_hides_other_owners(factory).await,
    ));
    results.push(TestResult::from_result(
        "definitions",
        "public_scope_hides_inactive",
        public_scope_hides_inactive(factory).await,
    ));
    results.push(TestResult::from_result(
        "definitions",
        "update_process_persists",
        update_process_persists(factory).await,
    ));
    results.push(TestResult::from_result(
        "definitions",
        "step_requires_existing_form",
        step_requires_existing_form(factory).await,
    ));
    results.push(TestResult::from_result(
        "definitions",
        "get_step_scoped_to_process",
        get_step_scoped_to_process(factory).await,
    ));
    results.push(TestResult::from_result(
        "definitions",
        "missing_records_report_not_found",
        missing_records_report_not_found(factory).await,
    ));

    results
}

async fn insert_and_get_process<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ProcessStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let seeded = seed(&storage, "onboarding", 2).await?;

    let mut snap = storage.begin_snapshot().await.map_err(|e| e.to_string())?;
    let by_id = storage
        .get_process(&mut snap, seeded.process.id)
        .await
        .map_err(|e| format!("get_process: {e}"))?;
    let public = storage
        .get_public_process_by_slug(&mut snap, "onboarding")
        .await
        .map_err(|e| format!("get_public_process_by_slug: {e}"))?;
    let owned = storage
        .get_owned_process_by_slug(&mut snap, &OwnerId::new("owner-1"), "onboarding")
        .await
        .map_err(|e| format!("get_owned_process_by_slug: {e}"))?;
    let exists = storage
        .slug_exists(&mut snap, "onboarding")
        .await
        .map_err(|e| e.to_string())?;
    storage.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    if by_id != seeded.process || public != seeded.process || owned != seeded.process {
        return Err("stored process does not round-trip".to_string());
    }
    if !exists {
        return Err("slug_exists returned false for a stored slug".to_string());
    }
    Ok(())
}

async fn duplicate_slug_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ProcessStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    seed(&storage, "dup", 0).await?;

    let mut snap = storage.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = storage
        .insert_process(&mut snap, make_process("owner-2", "dup", true))
        .await;
    storage.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    match result {
        Err(StorageError::ConstraintViolation { .. }) => Ok(()),
        Err(e) => Err(format!("expected ConstraintViolation, got {e}")),
        Ok(()) => Err("second process with the same slug was accepted".to_string()),
    }
}

async fn owner_scope_hides_other_owners<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ProcessStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    seed(&storage, "mine", 0).await?;

    let mut snap = storage.begin_snapshot().await.map_err(|e| e.to_string())?;
    let theirs = storage
        .get_owned_process_by_slug(&mut snap, &OwnerId::new("intruder"), "mine")
        .await;
    let missing = storage
        .get_owned_process_by_slug(&mut snap, &OwnerId::new("intruder"), "nothing-here")
        .await;
    storage.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    match (theirs, missing) {
        (
            Err(StorageError::ProcessNotFound { .. }),
            Err(StorageError::ProcessNotFound { .. }),
        ) => Ok(()),
        (a, b) => Err(format!(
            "expected ProcessNotFound for both, got {:?} and {:?}",
            a.map(|p| p.slug),
            b.map(|p| p.slug)
        )),
    }
}

async fn public_scope_hides_inactive<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ProcessStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let mut snap = storage.begin_snapshot().await.map_err(|e| e.to_string())?;
    storage
        .insert_process(&mut snap, make_process("owner-1", "dormant", false))
        .await
        .map_err(|e| format!("insert: {e}"))?;
    storage.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let mut snap = storage.begin_snapshot().await.map_err(|e| e.to_string())?;
    let public = storage.get_public_process_by_slug(&mut snap, "dormant").await;
    let owned = storage
        .get_owned_process_by_slug(&mut snap, &OwnerId::new("owner-1"), "dormant")
        .await;
    storage.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    if !matches!(public, Err(StorageError::ProcessNotFound { .. })) {
        return Err("inactive process resolved through the public scope".to_string());
    }
    if owned.is_err() {
        return Err("inactive process hidden from its owner".to_string());
    }
    Ok(())
}

async fn update_process_persists<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ProcessStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let seeded = seed(&storage, "editable", 0).await?;

    let mut changed = seeded.process.clone();
    changed.title = "Renamed".to_string();
    changed.is_active = false;
    changed
        .settings
        .insert("theme".to_string(), serde_json::json!({"color": "teal"}));
    changed.published_at = Some(super::at(60));

    let mut snap = storage.begin_snapshot().await.map_err(|e| e.to_string())?;
    storage
        .update_process(&mut snap, &changed)
        .await
        .map_err(|e| format!("update: {e}"))?;
    storage.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let mut snap = storage.begin_snapshot().await.map_err(|e| e.to_string())?;
    let stored = storage
        .get_process(&mut snap, changed.id)
        .await
        .map_err(|e| e.to_string())?;
    storage.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    if stored != changed {
        return Err(format!("expected {changed:?}, got {stored:?}"));
    }
    Ok(())
}

async fn step_requires_existing_form<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ProcessStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let seeded = seed(&storage, "fk", 0).await?;
    let stray_form = make_form("never-inserted");

    let mut snap = storage.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = storage
        .insert_step(&mut snap, make_step(seeded.process.id, stray_form.id, 0))
        .await;
    storage.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    match result {
        Err(StorageError::FormNotFound { .. }) | Err(StorageError::ConstraintViolation { .. }) => {
            Ok(())
        }
        Err(e) => Err(format!("expected FormNotFound, got {e}")),
        Ok(()) => Err("step with unknown form was accepted".to_string()),
    }
}

async fn get_step_scoped_to_process<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ProcessStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let a = seed(&storage, "alpha", 1).await?;
    let b = seed(&storage, "beta", 1).await?;

    let mut snap = storage.begin_snapshot().await.map_err(|e| e.to_string())?;
    let own = storage.get_step(&mut snap, a.process.id, a.steps[0].id).await;
    let foreign = storage.get_step(&mut snap, a.process.id, b.steps[0].id).await;
    storage.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    if own.map_err(|e| e.to_string())? != a.steps[0] {
        return Err("get_step returned a different step".to_string());
    }
    match foreign {
        Err(StorageError::StepNotFound { .. }) => Ok(()),
        Err(e) => Err(format!("expected StepNotFound, got {e}")),
        Ok(_) => Err("step of another process resolved".to_string()),
    }
}

async fn missing_records_report_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ProcessStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let mut snap = storage.begin_snapshot().await.map_err(|e| e.to_string())?;
    let process = storage.get_process(&mut snap, ProcessId::new()).await;
    let step = storage
        .get_step(&mut snap, ProcessId::new(), StepId::new())
        .await;
    let max = storage.max_order_index(&mut snap, ProcessId::new()).await;
    storage.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    if !matches!(process, Err(StorageError::ProcessNotFound { .. })) {
        return Err("expected ProcessNotFound".to_string());
    }
    if !matches!(step, Err(StorageError::StepNotFound { .. })) {
        return Err("expected StepNotFound".to_string());
    }
    match max {
        Ok(None) => Ok(()),
        other => Err(format!("expected Ok(None) for max_order_index, got {other:?}")),
    }
}
