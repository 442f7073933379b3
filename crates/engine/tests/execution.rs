mod common;

use std::str::FromStr;
use std::sync::Arc;

use rand::Rng;
use rust_decimal::Decimal;
use stepwise_core::{
    completion_percentage, CompletionStatus, FormId, FormRecord, JsonMap, OwnerId, ProgressStatus,
    StepId, SubmissionId,
};
use stepwise_engine::{
    EngineError, ExecutionService, NewProcess, NewStep, ObserverError, ProcessManager,
    ProgressEvent, ProgressObserver,
};
use stepwise_storage::{MemoryStorage, ProcessStorage};
use time::Duration;

use common::Harness;

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn assert_validation(err: EngineError, needle: &str) {
    match &err {
        EngineError::Validation(msg) => assert!(msg.contains(needle), "{msg:?} lacks {needle:?}"),
        other => panic!("expected validation error containing {needle:?}, got {other:?}"),
    }
}

// ── Start ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn start_is_idempotent_per_session() {
    let h = Harness::memory().await;
    h.three_step("p").await;

    let first = h.service.start("p", "sess-1", None).await.unwrap();
    assert!(first.created);
    assert_eq!(first.progress.current_step_index, 0);
    assert_eq!(first.progress.completion_percentage.to_string(), "0.00");

    h.service.advance("p", "sess-1").await.unwrap();
    h.clock.advance(Duration::minutes(3));

    let second = h.service.start("p", "sess-1", None).await.unwrap();
    assert!(!second.created);
    assert_eq!(second.progress.id, first.progress.id);
    assert_eq!(second.progress.current_step_index, 1);
    assert_eq!(second.progress.last_activity_at, h.clock_now());
}

#[tokio::test]
async fn start_creates_one_pending_completion_per_step() {
    let h = Harness::memory().await;
    let (_, steps) = h.three_step("p").await;

    h.service.start("p", "sess-1", None).await.unwrap();
    let view = h.service.get_progress("p", "sess-1").await.unwrap();

    assert_eq!(view.step_completions.len(), steps.len());
    for step in &steps {
        let entry = &view.step_completions[&step.id];
        assert_eq!(entry.status, CompletionStatus::Pending);
        assert_eq!(entry.completed_at, None);
    }
}

#[tokio::test]
async fn sessions_get_separate_runs() {
    let h = Harness::memory().await;
    h.three_step("p").await;

    let a = h.service.start("p", "sess-a", None).await.unwrap();
    let b = h
        .service
        .start("p", "sess-b", Some(OwnerId::new("user-9")))
        .await
        .unwrap();
    assert_ne!(a.progress.id, b.progress.id);
    assert_eq!(b.progress.user_id, Some(OwnerId::new("user-9")));
}

#[tokio::test]
async fn start_rejects_blank_session() {
    let h = Harness::memory().await;
    h.three_step("p").await;
    let err = h.service.start("p", "  ", None).await.unwrap_err();
    assert_validation(err, "session id");
}

#[tokio::test]
async fn inactive_process_is_not_found_publicly() {
    let h = Harness::memory().await;
    h.three_step("p").await;
    h.manager.set_active(&h.owner, "p", false).await.unwrap();

    let err = h.service.start("p", "sess-1", None).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound { .. }), "{err:?}");
    let err = h.service.get_structure("p", false).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound { .. }), "{err:?}");
}

#[tokio::test]
async fn unknown_slug_is_not_found() {
    let h = Harness::memory().await;
    let err = h.service.start("nope", "sess-1", None).await.unwrap_err();
    assert_eq!(err.to_string(), "process not found");
}

#[tokio::test]
async fn empty_process_starts_at_zero_and_completes() {
    let h = Harness::memory().await;
    h.linear("empty", &[]).await;

    let started = h.service.start("empty", "s", None).await.unwrap();
    assert_eq!(started.progress.completion_percentage.to_string(), "0.00");

    let view = h.service.get_progress("empty", "s").await.unwrap();
    assert!(view.current_step.is_none());
    assert!(view.step_completions.is_empty());

    let err = h.service.advance("empty", "s").await.unwrap_err();
    assert_validation(err, "Already at the last step");

    let done = h.service.complete_process("empty", "s").await.unwrap();
    assert_eq!(done.status, ProgressStatus::Completed);
    assert_eq!(done.completion_percentage.to_string(), "100.00");
}

// ── Progress snapshot ────────────────────────────────────────────────────────

#[tokio::test]
async fn progress_of_unknown_session_is_not_found() {
    let h = Harness::memory().await;
    h.three_step("p").await;
    let err = h.service.get_progress("p", "ghost").await.unwrap_err();
    match err {
        EngineError::NotFound { resource } => assert!(resource.contains("progress")),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn progress_resolves_current_step_with_form() {
    let h = Harness::memory().await;
    let (_, steps) = h.three_step("p").await;
    h.service.start("p", "s", None).await.unwrap();

    let view = h.service.get_progress("p", "s").await.unwrap();
    let current = view.current_step.unwrap();
    assert_eq!(current.id, steps[0].id);
    assert_eq!(current.title, "S1");
    assert_eq!(current.form_slug, h.form.slug);
    assert_eq!(view.total_steps, 3);

    let step = h.service.get_current_step("p", "s").await.unwrap();
    assert_eq!(step.id, steps[0].id);
}

#[tokio::test]
async fn cursor_past_end_after_delete_has_no_current_step() {
    let h = Harness::memory().await;
    let (_, steps) = h.three_step("p").await;
    h.service.start("p", "s", None).await.unwrap();
    h.service.advance("p", "s").await.unwrap();
    h.service.advance("p", "s").await.unwrap();

    h.manager.delete_step(&h.owner, "p", steps[2].id).await.unwrap();

    let view = h.service.get_progress("p", "s").await.unwrap();
    assert_eq!(view.current_step_index, 2);
    assert!(view.current_step.is_none());
    let err = h.service.get_current_step("p", "s").await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound { .. }));
}

// ── Cursor movement ──────────────────────────────────────────────────────────

#[tokio::test]
async fn retreat_at_first_and_advance_at_last_fail() {
    let h = Harness::memory().await;
    h.three_step("p").await;
    h.service.start("p", "s", None).await.unwrap();

    let err = h.service.retreat("p", "s").await.unwrap_err();
    assert_validation(err, "Already at the first step");

    h.service.advance("p", "s").await.unwrap();
    let view = h.service.advance("p", "s").await.unwrap();
    assert_eq!(view.current_step_index, 2);

    let err = h.service.advance("p", "s").await.unwrap_err();
    assert_validation(err, "Already at the last step");
    let view = h.service.get_progress("p", "s").await.unwrap();
    assert_eq!(view.current_step_index, 2);
}

#[tokio::test]
async fn random_walk_stays_in_bounds() {
    let h = Harness::memory().await;
    let n = 5u32;
    let titles: Vec<String> = (0..n).map(|i| format!("Step {i}")).collect();
    let layout: Vec<(&str, bool)> = titles.iter().map(|t| (t.as_str(), true)).collect();
    h.linear("walk", &layout).await;
    h.service.start("walk", "s", None).await.unwrap();

    let mut rng = rand::thread_rng();
    let mut expected = 0u32;
    for _ in 0..60 {
        if rng.gen_bool(0.5) {
            match h.service.advance("walk", "s").await {
                Ok(view) => {
                    expected += 1;
                    assert_eq!(view.current_step_index, expected);
                }
                Err(e) => {
                    assert_eq!(expected, n - 1);
                    assert_validation(e, "last step");
                }
            }
        } else {
            match h.service.retreat("walk", "s").await {
                Ok(view) => {
                    expected -= 1;
                    assert_eq!(view.current_step_index, expected);
                }
                Err(e) => {
                    assert_eq!(expected, 0);
                    assert_validation(e, "first step");
                }
            }
        }
        assert!(expected < n);
    }
}

#[tokio::test]
async fn free_process_rejects_cursor_movement() {
    let h = Harness::memory().await;
    h.free("f", &[("A", true), ("B", true)]).await;
    h.service.start("f", "s", None).await.unwrap();

    let err = h.service.advance("f", "s").await.unwrap_err();
    assert_validation(err, "only available for linear processes");
    let err = h.service.retreat("f", "s").await.unwrap_err();
    assert_validation(err, "only available for linear processes");
}

#[tokio::test]
async fn free_process_completes_steps_in_any_order() {
    let h = Harness::memory().await;
    let (_, steps) = h.free("f", &[("A", true), ("B", true)]).await;
    h.service.start("f", "s", None).await.unwrap();

    h.service
        .complete_step("f", steps[1].id, "s", None)
        .await
        .unwrap();
    h.service
        .complete_step("f", steps[0].id, "s", None)
        .await
        .unwrap();
    let done = h.service.complete_process("f", "s").await.unwrap();
    assert_eq!(done.status, ProgressStatus::Completed);
}

#[tokio::test]
async fn movement_refreshes_activity() {
    let h = Harness::memory().await;
    h.three_step("p").await;
    h.service.start("p", "s", None).await.unwrap();
    h.clock.advance(Duration::seconds(30));
    let view = h.service.advance("p", "s").await.unwrap();
    assert_eq!(view.last_activity_at, h.clock_now());
}

// ── Step completion ──────────────────────────────────────────────────────────

#[tokio::test]
async fn percentage_tracks_completed_over_total() {
    let h = Harness::memory().await;
    let titles: Vec<String> = (0..7).map(|i| format!("Step {i}")).collect();
    let layout: Vec<(&str, bool)> = titles.iter().map(|t| (t.as_str(), false)).collect();
    let (_, steps) = h.free("seven", &layout).await;
    h.service.start("seven", "s", None).await.unwrap();

    let mut last = Decimal::ZERO;
    for (done, step) in steps.iter().enumerate() {
        let outcome = h
            .service
            .complete_step("seven", step.id, "s", None)
            .await
            .unwrap();
        assert_eq!(
            outcome.completion_percentage,
            completion_percentage(done + 1, steps.len())
        );
        assert!(outcome.completion_percentage >= last);
        last = outcome.completion_percentage;
    }
    assert_eq!(last.to_string(), "100.00");
}

#[tokio::test]
async fn completing_a_step_twice_is_idempotent() {
    let h = Harness::memory().await;
    let (_, steps) = h.three_step("p").await;
    h.service.start("p", "s", None).await.unwrap();

    let first = h
        .service
        .complete_step("p", steps[0].id, "s", None)
        .await
        .unwrap();
    h.clock.advance(Duration::minutes(1));
    let second = h
        .service
        .complete_step("p", steps[0].id, "s", None)
        .await
        .unwrap();

    assert_eq!(second.completed_at, first.completed_at);
    assert_eq!(second.completion_percentage, dec("33.33"));
}

#[tokio::test]
async fn step_from_another_process_is_not_found() {
    let h = Harness::memory().await;
    h.three_step("p").await;
    let (_, other_steps) = h.three_step("q").await;
    h.service.start("p", "s", None).await.unwrap();

    let err = h
        .service
        .complete_step("p", other_steps[0].id, "s", None)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "step not found");
}

#[tokio::test]
async fn completing_without_a_run_is_not_found() {
    let h = Harness::memory().await;
    let (_, steps) = h.three_step("p").await;
    let err = h
        .service
        .complete_step("p", steps[0].id, "nobody", None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound { .. }));
}

#[tokio::test]
async fn submission_is_attached_when_it_belongs_to_the_session() {
    let h = Harness::memory().await;
    let (_, steps) = h.three_step("p").await;
    h.service.start("p", "sess-1", None).await.unwrap();
    let submission = h
        .manager
        .record_submission(h.form.id, "sess-1")
        .await
        .unwrap();

    let outcome = h
        .service
        .complete_step("p", steps[0].id, "sess-1", Some(submission.id))
        .await
        .unwrap();
    assert_eq!(outcome.status, CompletionStatus::Completed);
}

#[tokio::test]
async fn cross_session_submission_is_rejected_without_writes() {
    let h = Harness::memory().await;
    let (_, steps) = h.three_step("p").await;
    h.service.start("p", "sess-1", None).await.unwrap();
    let foreign = h
        .manager
        .record_submission(h.form.id, "sess-2")
        .await
        .unwrap();

    let err = h
        .service
        .complete_step("p", steps[0].id, "sess-1", Some(foreign.id))
        .await
        .unwrap_err();
    assert_validation(err, "Submission does not belong to this session");

    let view = h.service.get_progress("p", "sess-1").await.unwrap();
    assert_eq!(
        view.step_completions[&steps[0].id].status,
        CompletionStatus::Pending
    );
    assert_eq!(view.completion_percentage.to_string(), "0.00");
}

#[tokio::test]
async fn unknown_submission_is_not_found() {
    let h = Harness::memory().await;
    let (_, steps) = h.three_step("p").await;
    h.service.start("p", "s", None).await.unwrap();

    let err = h
        .service
        .complete_step("p", steps[0].id, "s", Some(SubmissionId::new()))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "submission not found");
}

#[tokio::test]
async fn step_added_after_start_gets_a_completion_on_demand() {
    let h = Harness::memory().await;
    h.linear("p", &[("A", true)]).await;
    h.service.start("p", "s", None).await.unwrap();

    let late = h
        .manager
        .create_step(&h.owner, "p", NewStep::new(h.form.id, "Late"))
        .await
        .unwrap();

    let outcome = h
        .service
        .complete_step("p", late.id, "s", None)
        .await
        .unwrap();
    assert_eq!(outcome.completion_percentage, dec("50.00"));
    let view = h.service.get_progress("p", "s").await.unwrap();
    assert_eq!(view.step_completions.len(), 2);
}

#[tokio::test]
async fn get_step_form_does_not_need_a_run() {
    let h = Harness::memory().await;
    let (_, steps) = h.three_step("p").await;

    let form = h.service.get_step_form("p", steps[1].id).await.unwrap();
    assert_eq!(form.step_title, "S2");
    assert_eq!(form.form_id, h.form.id);
    assert_eq!(form.form_description.as_deref(), Some("Name, email, phone"));

    let err = h.service.get_step_form("p", StepId::new()).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound { .. }));
}

// ── Completion ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn happy_path() {
    let h = Harness::memory().await;
    let (_, steps) = h.three_step("P").await;

    let started = h.service.start("P", "sess-1", None).await.unwrap();
    assert_eq!(started.progress.current_step_index, 0);
    assert_eq!(started.progress.completion_percentage, dec("0.00"));

    let s1 = h
        .service
        .complete_step("P", steps[0].id, "sess-1", None)
        .await
        .unwrap();
    assert_eq!(s1.completion_percentage, dec("33.33"));

    let moved = h.service.advance("P", "sess-1").await.unwrap();
    assert_eq!(moved.current_step_index, 1);

    let s2 = h
        .service
        .complete_step("P", steps[1].id, "sess-1", None)
        .await
        .unwrap();
    assert_eq!(s2.completion_percentage, dec("66.67"));

    let done = h.service.complete_process("P", "sess-1").await.unwrap();
    assert!(!done.already_completed);
    assert_eq!(done.status, ProgressStatus::Completed);
    assert_eq!(done.completion_percentage.to_string(), "100.00");
    assert_eq!(done.completed_at, Some(h.clock_now()));

    let view = h.service.get_progress("P", "sess-1").await.unwrap();
    assert_eq!(view.status, ProgressStatus::Completed);
    assert_eq!(view.completion_percentage.to_string(), "100.00");
}

#[tokio::test]
async fn blocked_completion_names_the_shortfall() {
    let h = Harness::memory().await;
    let (_, steps) = h.three_step("P").await;
    h.service.start("P", "sess-1", None).await.unwrap();
    h.service
        .complete_step("P", steps[0].id, "sess-1", None)
        .await
        .unwrap();

    let err = h.service.complete_process("P", "sess-1").await.unwrap_err();
    assert_validation(err, "Completed: 1/2");

    let view = h.service.get_progress("P", "sess-1").await.unwrap();
    assert_eq!(view.status, ProgressStatus::InProgress);
}

#[tokio::test]
async fn optional_steps_do_not_satisfy_required_ones() {
    let h = Harness::memory().await;
    let (_, steps) = h.three_step("P").await;
    h.service.start("P", "s", None).await.unwrap();
    h.service
        .complete_step("P", steps[2].id, "s", None)
        .await
        .unwrap();
    h.service
        .complete_step("P", steps[0].id, "s", None)
        .await
        .unwrap();

    let err = h.service.complete_process("P", "s").await.unwrap_err();
    assert_validation(err, "Completed: 1/2");

    h.service
        .complete_step("P", steps[1].id, "s", None)
        .await
        .unwrap();
    h.service.complete_process("P", "s").await.unwrap();
}

#[tokio::test]
async fn completing_twice_reports_already_completed() {
    let h = Harness::memory().await;
    h.linear("one", &[]).await;
    h.service.start("one", "s", None).await.unwrap();
    let first = h.service.complete_process("one", "s").await.unwrap();
    h.clock.advance(Duration::hours(1));
    let second = h.service.complete_process("one", "s").await.unwrap();

    assert!(second.already_completed);
    assert_eq!(second.message, "Process already completed");
    assert_eq!(second.completed_at, first.completed_at);
}

#[tokio::test]
async fn completed_run_is_frozen() {
    let h = Harness::memory().await;
    let (_, steps) = h.linear("p", &[("A", false), ("B", false)]).await;
    let started = h.service.start("p", "s", None).await.unwrap();
    h.service.complete_process("p", "s").await.unwrap();

    let err = h.service.advance("p", "s").await.unwrap_err();
    assert_validation(err, "already completed");
    let err = h
        .service
        .complete_step("p", steps[0].id, "s", None)
        .await
        .unwrap_err();
    assert_validation(err, "already completed");

    let again = h.service.start("p", "s", None).await.unwrap();
    assert!(!again.created);
    assert_eq!(again.progress.id, started.progress.id);
    assert_eq!(again.progress.status, ProgressStatus::Completed);
}

// ── Abandonment ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn abandoned_run_is_reported_and_frozen() {
    let h = Harness::memory().await;
    h.three_step("p").await;
    h.service.start("p", "s", None).await.unwrap();

    let abandoned = h.service.abandon("p", "s").await.unwrap();
    assert_eq!(abandoned.status, ProgressStatus::Abandoned);
    let again = h.service.abandon("p", "s").await.unwrap();
    assert_eq!(again.status, ProgressStatus::Abandoned);

    let view = h.service.get_progress("p", "s").await.unwrap();
    assert_eq!(view.status, ProgressStatus::Abandoned);

    let err = h.service.complete_process("p", "s").await.unwrap_err();
    assert_validation(err, "abandoned");
    let err = h.service.retreat("p", "s").await.unwrap_err();
    assert_validation(err, "already abandoned");
}

#[tokio::test]
async fn completed_run_cannot_be_abandoned() {
    let h = Harness::memory().await;
    h.linear("p", &[]).await;
    h.service.start("p", "s", None).await.unwrap();
    h.service.complete_process("p", "s").await.unwrap();
    let err = h.service.abandon("p", "s").await.unwrap_err();
    assert_validation(err, "completed run");
}

// ── Views and observers ──────────────────────────────────────────────────────

#[tokio::test]
async fn track_view_records_and_unknown_slug_fails() {
    let h = Harness::memory().await;
    let (process, _) = h.three_step("p").await;

    let mut metadata = JsonMap::new();
    metadata.insert("referrer".into(), "newsletter".into());
    let id = h
        .service
        .track_view("p", "s", Some("203.0.113.7".into()), metadata.clone())
        .await
        .unwrap();
    assert!(id.is_some());

    let views = h.storage.list_process_views(process.id).await.unwrap();
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].metadata, metadata);
    assert_eq!(views[0].ip_address.as_deref(), Some("203.0.113.7"));

    let err = h
        .service
        .track_view("nope", "s", None, JsonMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound { .. }));
}

#[tokio::test]
async fn observers_see_committed_transitions_and_failures_are_isolated() {
    let h = Harness::memory().await;
    let (_, steps) = h.linear("p", &[("A", true)]).await;

    h.service.start("p", "s", None).await.unwrap();
    h.service.start("p", "s", None).await.unwrap();
    h.service
        .complete_step("p", steps[0].id, "s", None)
        .await
        .unwrap();
    h.service.complete_process("p", "s").await.unwrap();
    h.service.complete_process("p", "s").await.unwrap();

    assert_eq!(
        h.events.names(),
        vec!["started", "step_completed", "process_completed"]
    );
}

struct PanickingObserver;

impl ProgressObserver for PanickingObserver {
    fn name(&self) -> &str {
        "panicking"
    }

    fn on_event(&self, _event: &ProgressEvent) -> Result<(), ObserverError> {
        panic!("observer bug");
    }
}

#[tokio::test]
async fn a_panicking_observer_does_not_fail_committed_transitions() {
    let storage = Arc::new(MemoryStorage::new());
    let config = common::test_config();
    let recording = Arc::new(common::RecordingObserver::default());
    let service = ExecutionService::new(storage.clone(), config.clone())
        .unwrap()
        .with_observer(Arc::new(PanickingObserver))
        .with_observer(recording.clone());
    let manager = ProcessManager::new(storage, &config).unwrap();

    let owner = OwnerId::new("owner-1");
    let form = FormRecord {
        id: FormId::new(),
        slug: "contact".to_string(),
        title: "Contact".to_string(),
        description: None,
    };
    manager.register_form(form.clone()).await.unwrap();
    manager.create_process(&owner, NewProcess::new("P")).await.unwrap();
    let step = manager
        .create_step(&owner, "p", NewStep::new(form.id, "Only"))
        .await
        .unwrap();

    service.start("p", "s", None).await.unwrap();
    let done = service.complete_step("p", step.id, "s", None).await.unwrap();
    assert_eq!(done.completion_percentage, dec("100.00"));
    let finished = service.complete_process("p", "s").await.unwrap();
    assert_eq!(finished.status, ProgressStatus::Completed);
    assert_eq!(
        recording.names(),
        vec!["started", "step_completed", "process_completed"]
    );
}

#[tokio::test]
async fn failed_operations_emit_nothing() {
    let h = Harness::memory().await;
    let (_, steps) = h.three_step("p").await;
    h.service.start("p", "s", None).await.unwrap();
    let foreign = h.manager.record_submission(h.form.id, "other").await.unwrap();
    let _ = h
        .service
        .complete_step("p", steps[0].id, "s", Some(foreign.id))
        .await;
    let _ = h.service.complete_process("p", "s").await;
    assert_eq!(h.events.names(), vec!["started"]);
}

// ── Concurrency ──────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_advances_never_lose_an_increment() {
    let h = Harness::memory().await;
    let titles: Vec<String> = (0..10).map(|i| format!("Step {i}")).collect();
    let layout: Vec<(&str, bool)> = titles.iter().map(|t| (t.as_str(), true)).collect();
    h.linear("race", &layout).await;
    h.service.start("race", "tab", None).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..6 {
        let service = Arc::clone(&h.service);
        handles.push(tokio::spawn(async move {
            service.advance("race", "tab").await
        }));
    }
    let mut ok = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            ok += 1;
        }
    }
    let view = h.service.get_progress("race", "tab").await.unwrap();
    assert_eq!(view.current_step_index, ok);
    assert_eq!(ok, 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_completions_count_each_step_once() {
    let h = Harness::memory().await;
    let titles: Vec<String> = (0..4).map(|i| format!("Step {i}")).collect();
    let layout: Vec<(&str, bool)> = titles.iter().map(|t| (t.as_str(), true)).collect();
    let (_, steps) = h.free("race", &layout).await;
    h.service.start("race", "tab", None).await.unwrap();

    let mut handles = Vec::new();
    for step in steps.iter().chain(steps.iter()) {
        let service = Arc::clone(&h.service);
        let step_id = step.id;
        handles.push(tokio::spawn(async move {
            service.complete_step("race", step_id, "tab", None).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    let view = h.service.get_progress("race", "tab").await.unwrap();
    assert_eq!(view.completion_percentage.to_string(), "100.00");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_starts_create_one_run() {
    let h = Harness::memory().await;
    h.three_step("p").await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let service = Arc::clone(&h.service);
        handles.push(tokio::spawn(async move {
            service.start("p", "double-tab", None).await
        }));
    }
    let mut ids = Vec::new();
    let mut created = 0;
    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        ids.push(outcome.progress.id);
        created += usize::from(outcome.created);
    }
    ids.dedup();
    assert_eq!(ids.len(), 1);
    assert_eq!(created, 1);
}

#[tokio::test]
async fn steps_of_unrelated_forms_render_their_own_form() {
    let h = Harness::memory().await;
    let other = stepwise_core::FormRecord {
        id: FormId::new(),
        slug: "payment".into(),
        title: "Payment".into(),
        description: None,
    };
    h.manager.register_form(other.clone()).await.unwrap();
    h.linear("p", &[("Contact", true)]).await;
    h.manager
        .create_step(&h.owner, "p", NewStep::new(other.id, "Pay"))
        .await
        .unwrap();

    let structure = h.service.get_structure("p", false).await.unwrap();
    let slugs: Vec<&str> = structure.steps.iter().map(|s| s.form_slug.as_str()).collect();
    assert_eq!(slugs, vec!["contact-details", "payment"]);
}
