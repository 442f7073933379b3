mod common;

use stepwise_core::{OwnerId, ProcessStep, ProgressStatus, StepId};
use stepwise_engine::{EngineError, IdleSweeper, NewProcess, NewStep};
use stepwise_storage::ProcessStorage;
use time::Duration;

use common::Harness;

fn titles(steps: &[ProcessStep]) -> Vec<&str> {
    steps.iter().map(|s| s.title.as_str()).collect()
}

fn indices(steps: &[ProcessStep]) -> Vec<u32> {
    steps.iter().map(|s| s.order_index).collect()
}

fn ids(steps: &[ProcessStep]) -> Vec<StepId> {
    steps.iter().map(|s| s.id).collect()
}

// ── Reordering ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn reorder_reversal_rotation_and_identity_stay_contiguous() {
    let h = Harness::memory().await;
    let (_, steps) = h
        .linear("p", &[("A", true), ("B", true), ("C", true), ("D", true)])
        .await;
    let original = ids(&steps);

    let mut reversed = original.clone();
    reversed.reverse();
    let after = h.manager.reorder_steps(&h.owner, "p", &reversed).await.unwrap();
    assert_eq!(titles(&after), vec!["D", "C", "B", "A"]);
    assert_eq!(indices(&after), vec![0, 1, 2, 3]);

    let mut rotated = original.clone();
    rotated.rotate_left(1);
    let after = h.manager.reorder_steps(&h.owner, "p", &rotated).await.unwrap();
    assert_eq!(titles(&after), vec!["B", "C", "D", "A"]);
    assert_eq!(indices(&after), vec![0, 1, 2, 3]);

    let after = h.manager.reorder_steps(&h.owner, "p", &rotated).await.unwrap();
    assert_eq!(titles(&after), vec!["B", "C", "D", "A"]);

    let listed = h.manager.list_steps(&h.owner, "p").await.unwrap();
    assert_eq!(ids(&listed), rotated);
}

#[tokio::test]
async fn invalid_reorder_changes_nothing() {
    let h = Harness::memory().await;
    let (_, steps) = h.linear("p", &[("A", true), ("B", true), ("C", true)]).await;
    let (_, foreign) = h.linear("q", &[("X", true)]).await;

    let missing = vec![steps[0].id, steps[1].id];
    let err = h.manager.reorder_steps(&h.owner, "p", &missing).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)), "{err:?}");

    let repeated = vec![steps[0].id, steps[0].id, steps[1].id];
    let err = h.manager.reorder_steps(&h.owner, "p", &repeated).await.unwrap_err();
    assert!(err.to_string().contains("more than once"), "{err}");

    let stranger = vec![steps[2].id, steps[1].id, foreign[0].id];
    let err = h.manager.reorder_steps(&h.owner, "p", &stranger).await.unwrap_err();
    assert!(err.to_string().contains("does not belong"), "{err}");

    let listed = h.manager.list_steps(&h.owner, "p").await.unwrap();
    assert_eq!(titles(&listed), vec!["A", "B", "C"]);
    assert_eq!(indices(&listed), vec![0, 1, 2]);
}

#[tokio::test]
async fn move_step_shifts_the_others() {
    let h = Harness::memory().await;
    let (_, steps) = h
        .linear("p", &[("A", true), ("B", true), ("C", true), ("D", true)])
        .await;

    let after = h.manager.move_step(&h.owner, "p", steps[0].id, 2).await.unwrap();
    assert_eq!(titles(&after), vec!["B", "C", "A", "D"]);

    let after = h.manager.move_step(&h.owner, "p", steps[3].id, 99).await.unwrap();
    assert_eq!(titles(&after), vec!["B", "C", "A", "D"]);

    let after = h.manager.move_step(&h.owner, "p", steps[3].id, 0).await.unwrap();
    assert_eq!(titles(&after), vec!["D", "B", "C", "A"]);
    assert_eq!(indices(&after), vec![0, 1, 2, 3]);

    let err = h
        .manager
        .move_step(&h.owner, "p", StepId::new(), 0)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound { .. }));
}

#[tokio::test]
async fn create_step_at_occupied_index_pushes_down() {
    let h = Harness::memory().await;
    h.linear("p", &[("A", true), ("B", true), ("C", true)]).await;

    let mut insert = NewStep::new(h.form.id, "Inserted");
    insert.order_index = Some(1);
    let step = h.manager.create_step(&h.owner, "p", insert).await.unwrap();
    assert_eq!(step.order_index, 1);

    let mut far = NewStep::new(h.form.id, "Far");
    far.order_index = Some(40);
    let step = h.manager.create_step(&h.owner, "p", far).await.unwrap();
    assert_eq!(step.order_index, 4);

    let listed = h.manager.list_steps(&h.owner, "p").await.unwrap();
    assert_eq!(titles(&listed), vec!["A", "Inserted", "B", "C", "Far"]);
    assert_eq!(indices(&listed), vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn create_step_needs_a_known_form_and_title() {
    let h = Harness::memory().await;
    h.linear("p", &[]).await;

    let err = h
        .manager
        .create_step(
            &h.owner,
            "p",
            NewStep::new(stepwise_core::FormId::new(), "Orphan"),
        )
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "form not found");

    let err = h
        .manager
        .create_step(&h.owner, "p", NewStep::new(h.form.id, "   "))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
    assert!(h.manager.list_steps(&h.owner, "p").await.unwrap().is_empty());
}

#[tokio::test]
async fn delete_step_closes_the_gap() {
    let h = Harness::memory().await;
    let (_, steps) = h
        .linear("p", &[("A", true), ("B", true), ("C", true), ("D", true)])
        .await;

    h.manager.delete_step(&h.owner, "p", steps[1].id).await.unwrap();
    let listed = h.manager.list_steps(&h.owner, "p").await.unwrap();
    assert_eq!(titles(&listed), vec!["A", "C", "D"]);
    assert_eq!(indices(&listed), vec![0, 1, 2]);

    let err = h
        .manager
        .delete_step(&h.owner, "p", steps[1].id)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound { .. }));
}

#[tokio::test]
async fn deleted_step_stops_counting_towards_percentage() {
    let h = Harness::memory().await;
    let (_, steps) = h.free("p", &[("A", true), ("B", true)]).await;
    h.service.start("p", "s", None).await.unwrap();
    h.service
        .complete_step("p", steps[0].id, "s", None)
        .await
        .unwrap();

    h.manager.delete_step(&h.owner, "p", steps[0].id).await.unwrap();
    let outcome = h
        .service
        .complete_step("p", steps[1].id, "s", None)
        .await
        .unwrap();
    assert_eq!(outcome.completion_percentage.to_string(), "100.00");
}

// ── Processes ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn generated_slugs_get_numeric_suffixes() {
    let h = Harness::memory().await;
    let a = h
        .manager
        .create_process(&h.owner, NewProcess::new("Employee Onboarding!"))
        .await
        .unwrap();
    let b = h
        .manager
        .create_process(&h.owner, NewProcess::new("Employee onboarding"))
        .await
        .unwrap();
    let c = h
        .manager
        .create_process(&OwnerId::new("owner-2"), NewProcess::new("Employee Onboarding"))
        .await
        .unwrap();
    assert_eq!(a.slug, "employee-onboarding");
    assert_eq!(b.slug, "employee-onboarding-1");
    assert_eq!(c.slug, "employee-onboarding-2");
}

#[tokio::test]
async fn explicit_slug_must_be_valid_and_free() {
    let h = Harness::memory().await;
    h.linear("taken", &[]).await;

    let mut new = NewProcess::new("Other");
    new.slug = Some("taken".into());
    let err = h.manager.create_process(&h.owner, new).await.unwrap_err();
    assert_eq!(err.to_string(), "A process with slug 'taken' already exists");

    let mut new = NewProcess::new("Other");
    new.slug = Some("Not A Slug".into());
    let err = h.manager.create_process(&h.owner, new).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    let err = h
        .manager
        .create_process(&h.owner, NewProcess::new("  "))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[tokio::test]
async fn explicit_slugs_may_use_case_underscores_and_repeated_hyphens() {
    let h = Harness::memory().await;
    for slug in ["P", "My_Process", "a--b"] {
        let mut new = NewProcess::new("Any");
        new.slug = Some(slug.into());
        let process = h.manager.create_process(&h.owner, new).await.unwrap();
        assert_eq!(process.slug, slug);
    }

    let mut new = NewProcess::new("Any");
    new.slug = Some("x".repeat(101));
    let err = h.manager.create_process(&h.owner, new).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    let long = h
        .manager
        .create_process(&h.owner, NewProcess::new(&"Quarterly review ".repeat(10)))
        .await
        .unwrap();
    assert!(long.slug.len() <= 100);
    let copy = h.manager.duplicate_process(&h.owner, &long.slug).await.unwrap();
    assert!(copy.slug.len() <= 100);
    assert!(copy.slug.contains("-copy-"));
}

#[tokio::test]
async fn duplicate_copies_steps_under_a_new_slug() {
    let h = Harness::memory().await;
    h.three_step("intake").await;
    h.manager.publish(&h.owner, "intake").await.unwrap();

    let copy = h.manager.duplicate_process(&h.owner, "intake").await.unwrap();
    assert_eq!(copy.title, "Process intake (Copy)");
    assert!(copy.slug.starts_with("intake-copy-"));
    assert_eq!(copy.slug.len(), "intake-copy-".len() + 6);
    assert!(copy.published_at.is_none());

    let original = h.manager.list_steps(&h.owner, "intake").await.unwrap();
    let copied = h.manager.list_steps(&h.owner, &copy.slug).await.unwrap();
    assert_eq!(titles(&copied), titles(&original));
    assert_eq!(indices(&copied), indices(&original));
    assert!(copied.iter().all(|s| s.process_id == copy.id));
    assert!(copied.iter().zip(&original).all(|(c, o)| c.id != o.id));
}

#[tokio::test]
async fn publish_keeps_the_first_timestamp() {
    let h = Harness::memory().await;
    h.linear("p", &[]).await;

    let first = h.manager.publish(&h.owner, "p").await.unwrap();
    let stamped = first.published_at.unwrap();
    assert_eq!(stamped, h.clock_now());

    h.clock.advance(Duration::days(1));
    let again = h.manager.publish(&h.owner, "p").await.unwrap();
    assert_eq!(again.published_at, Some(stamped));
    assert_eq!(again.updated_at, h.clock_now());

    let cleared = h.manager.unpublish(&h.owner, "p").await.unwrap();
    assert!(cleared.published_at.is_none());
}

#[tokio::test]
async fn other_owners_cannot_see_or_change_a_process() {
    let h = Harness::memory().await;
    let (_, steps) = h.three_step("mine").await;
    let stranger = OwnerId::new("owner-2");

    let err = h.manager.get_process(&stranger, "mine").await.unwrap_err();
    assert_eq!(err.to_string(), "process not found");
    let missing = h.manager.get_process(&stranger, "nothing").await.unwrap_err();
    assert_eq!(err.to_string(), missing.to_string());

    assert!(h.manager.publish(&stranger, "mine").await.is_err());
    assert!(h.manager.delete_process(&stranger, "mine").await.is_err());
    assert!(h
        .manager
        .reorder_steps(&stranger, "mine", &ids(&steps))
        .await
        .is_err());
    assert!(h.manager.get_process(&h.owner, "mine").await.unwrap().published_at.is_none());
}

#[tokio::test]
async fn deactivating_hides_but_keeps_the_process() {
    let h = Harness::memory().await;
    h.three_step("p").await;
    h.manager.set_active(&h.owner, "p", false).await.unwrap();
    assert!(h.service.get_structure("p", false).await.is_err());
    assert!(!h.manager.get_process(&h.owner, "p").await.unwrap().is_active);

    h.manager.set_active(&h.owner, "p", true).await.unwrap();
    assert!(h.service.get_structure("p", false).await.is_ok());
}

#[tokio::test]
async fn delete_process_removes_its_runs() {
    let h = Harness::memory().await;
    let (process, _) = h.three_step("p").await;
    h.service.start("p", "s", None).await.unwrap();

    h.manager.delete_process(&h.owner, "p").await.unwrap();
    assert!(h.manager.get_process(&h.owner, "p").await.is_err());
    let left = h
        .storage
        .list_progress(Some(process.id), None, 0)
        .await
        .unwrap();
    assert!(left.is_empty());
}

#[tokio::test]
async fn list_progress_filters_by_status() {
    let h = Harness::memory().await;
    h.linear("p", &[]).await;
    for session in ["a", "b", "c"] {
        h.service.start("p", session, None).await.unwrap();
        h.clock.advance(Duration::minutes(1));
    }
    h.service.complete_process("p", "b").await.unwrap();

    let all = h.manager.list_progress(&h.owner, "p", None, 0).await.unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(all[0].session_id, "b");

    let open = h
        .manager
        .list_progress(&h.owner, "p", Some(ProgressStatus::InProgress), 0)
        .await
        .unwrap();
    let sessions: Vec<&str> = open.iter().map(|p| p.session_id.as_str()).collect();
    assert_eq!(sessions, vec!["c", "a"]);

    let one = h.manager.list_progress(&h.owner, "p", None, 1).await.unwrap();
    assert_eq!(one.len(), 1);
}

// ── Idle sweep ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn sweeper_abandons_only_idle_runs() {
    let h = Harness::memory().await;
    h.three_step("p").await;
    h.linear("done", &[]).await;

    h.service.start("p", "stale", None).await.unwrap();
    h.service.start("done", "stale", None).await.unwrap();
    h.service.complete_process("done", "stale").await.unwrap();
    h.clock.advance(Duration::hours(3));
    h.service.start("p", "fresh", None).await.unwrap();

    let sweeper = IdleSweeper::new(h.service.clone());
    let report = sweeper.abandon_idle_for(Duration::hours(1)).await.unwrap();
    assert_eq!(report.scanned, 1);
    assert_eq!(report.abandoned.len(), 1);
    assert_eq!(report.conflicts, 0);

    let stale = h.service.get_progress("p", "stale").await.unwrap();
    assert_eq!(stale.status, ProgressStatus::Abandoned);
    let fresh = h.service.get_progress("p", "fresh").await.unwrap();
    assert_eq!(fresh.status, ProgressStatus::InProgress);
    let done = h.service.get_progress("done", "stale").await.unwrap();
    assert_eq!(done.status, ProgressStatus::Completed);

    assert!(h.events.names().contains(&"abandoned"));

    let again = sweeper.abandon_idle_for(Duration::hours(1)).await.unwrap();
    assert_eq!(again.scanned, 0);
}
