//! Conformance test suite for `ProcessStorage` implementations.
//!
//! This module provides a backend-agnostic test suite that any
//! `ProcessStorage` implementation can run to verify correctness. The suite
//! covers:
//!
//! - **Definitions**: slug uniqueness, owner and public scoping, FK checks
//! - **Ordering**: the (process, order_index) constraint, relative shifts
//! - **Progress**: (process, session) uniqueness, completions, lookups
//! - **Version validation / OCC**: optimistic concurrency conflict detection
//! - **Snapshot isolation**: abort and drop roll back, commit is visible
//! - **Cascades**: process, step and progress deletes remove dependents
//! - **Concurrency**: racing snapshots from spawned tasks
//!
//! # Usage
//!
//! Backend crates call [`run_conformance_suite`] with a factory function that
//! creates a fresh, empty storage instance for each test:
//!
//! ```ignore
//! use stepwise_storage::conformance::run_conformance_suite;
//!
//! #[tokio::test]
//! async fn sqlite_conformance() {
//!     let report = run_conformance_suite(|| async {
//!         SqliteStorage::open_in_memory().unwrap()
//!     }).await;
//!     assert_eq!(report.failed, 0, "{report}");
//! }
//! ```

mod cascade;
mod concurrent;
mod definitions;
mod ordering;
mod progress;
mod snapshot;
mod version;

use std::fmt;
use std::future::Future;

use stepwise_core::{
    FormId, FormRecord, JsonMap, OwnerId, Process, ProcessId, ProcessStep, ProcessType, Progress,
    StepCompletion, StepId, Visibility,
};
use time::macros::datetime;
use time::{Duration, OffsetDateTime};

use crate::ProcessStorage;

/// Result of a single conformance test.
#[derive(Debug, Clone)]
pub struct TestResult {
    /// Test category (e.g. "definitions", "snapshot", "occ").
    pub category: String,
    /// Test name (e.g. "duplicate_slug_rejected").
    pub name: String,
    /// Whether the test passed.
    pub passed: bool,
    /// Error message if the test failed.
    pub message: Option<String>,
}

impl TestResult {
    fn pass(category: &str, name: &str) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: true,
            message: None,
        }
    }

    fn fail(category: &str, name: &str, msg: String) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: false,
            message: Some(msg),
        }
    }

    fn from_result(category: &str, name: &str, result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self::pass(category, name),
            Err(msg) => Self::fail(category, name, msg),
        }
    }
}

/// Aggregated report from a full conformance suite run.
#[derive(Debug, Clone)]
pub struct ConformanceReport {
    pub results: Vec<TestResult>,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Conformance: {}/{} passed ({} failed)",
            self.passed, self.total, self.failed
        )?;
        for r in &self.results {
            if !r.passed {
                writeln!(
                    f,
                    "  FAIL [{}/{}]: {}",
                    r.category,
                    r.name,
                    r.message.as_deref().unwrap_or("(no message)")
                )?;
            }
        }
        Ok(())
    }
}

/// Run the full conformance suite against a storage backend.
///
/// The `factory` function is called once per test to create a fresh, empty
/// storage instance, ensuring test isolation.
pub async fn run_conformance_suite<S, F, Fut>(factory: F) -> ConformanceReport
where
    S: ProcessStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.extend(definitions::run_definition_tests(&factory).await);
    results.extend(ordering::run_ordering_tests(&factory).await);
    results.extend(progress::run_progress_tests(&factory).await);
    results.extend(version::run_version_tests(&factory).await);
    results.extend(snapshot::run_snapshot_tests(&factory).await);
    results.extend(cascade::run_cascade_tests(&factory).await);
    results.extend(concurrent::run_concurrent_tests(&factory).await);

    let passed = results.iter().filter(|r| r.passed).count();
    let total = results.len();

    ConformanceReport {
        results,
        passed,
        failed: total - passed,
        total,
    }
}

// ── Helpers: record constructors with sensible defaults ──────────────────────

const EPOCH: OffsetDateTime = datetime!(2025-01-01 0:00 UTC);

fn at(seconds: i64) -> OffsetDateTime {
    EPOCH + Duration::seconds(seconds)
}

fn make_form(slug: &str) -> FormRecord {
    FormRecord {
        id: FormId::new(),
        slug: slug.to_string(),
        title: format!("Form {slug}"),
        description: None,
    }
}

fn make_process(owner: &str, slug: &str, is_active: bool) -> Process {
    Process {
        id: ProcessId::new(),
        owner_id: OwnerId::new(owner),
        title: format!("Process {slug}"),
        description: None,
        slug: slug.to_string(),
        visibility: Visibility::Public,
        access_secret: None,
        process_type: ProcessType::Linear,
        is_active,
        settings: JsonMap::new(),
        created_at: EPOCH,
        updated_at: EPOCH,
        published_at: None,
    }
}

fn make_step(process_id: ProcessId, form_id: FormId, order_index: u32) -> ProcessStep {
    ProcessStep {
        id: StepId::new(),
        process_id,
        form_id,
        title: format!("Step {order_index}"),
        description: None,
        order_index,
        is_required: true,
        conditions: JsonMap::new(),
        created_at: at(i64::from(order_index)),
        updated_at: at(i64::from(order_index)),
    }
}

fn make_progress(process_id: ProcessId, session_id: &str) -> Progress {
    Progress::begin(process_id, session_id, None, EPOCH)
}

/// A committed process with `steps` steps at indices `0..steps`.
struct Seeded {
    form: FormRecord,
    process: Process,
    steps: Vec<ProcessStep>,
}

async fn seed<S: ProcessStorage>(storage: &S, slug: &str, steps: u32) -> Result<Seeded, String> {
    let form = make_form(&format!("{slug}-form"));
    let process = make_process("owner-1", slug, true);
    let steps: Vec<ProcessStep> = (0..steps)
        .map(|i| make_step(process.id, form.id, i))
        .collect();

    let mut snap = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    storage
        .insert_form(&mut snap, form.clone())
        .await
        .map_err(|e| format!("insert form: {e}"))?;
    storage
        .insert_process(&mut snap, process.clone())
        .await
        .map_err(|e| format!("insert process: {e}"))?;
    for step in &steps {
        storage
            .insert_step(&mut snap, step.clone())
            .await
            .map_err(|e| format!("insert step: {e}"))?;
    }
    storage
        .commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit seed: {e}"))?;

    Ok(Seeded {
        form,
        process,
        steps,
    })
}

/// A committed progress for `session` with one pending completion per step.
async fn seed_progress<S: ProcessStorage>(
    storage: &S,
    seeded: &Seeded,
    session: &str,
) -> Result<Progress, String> {
    let progress = make_progress(seeded.process.id, session);
    let mut snap = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    storage
        .insert_progress(&mut snap, progress.clone())
        .await
        .map_err(|e| format!("insert progress: {e}"))?;
    for step in &seeded.steps {
        storage
            .insert_step_completion(&mut snap, StepCompletion::pending(progress.id, step.id))
            .await
            .map_err(|e| format!("insert completion: {e}"))?;
    }
    storage
        .commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit progress: {e}"))?;
    Ok(progress)
}

/// Order indices of a process's steps, in listed order.
async fn indices<S: ProcessStorage>(storage: &S, process_id: ProcessId) -> Result<Vec<u32>, String> {
    let mut snap = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    let steps = storage
        .list_steps(&mut snap, process_id)
        .await
        .map_err(|e| format!("list steps: {e}"))?;
    storage
        .abort_snapshot(snap)
        .await
        .map_err(|e| format!("abort: {e}"))?;
    Ok(steps.iter().map(|s| s.order_index).collect())
}
