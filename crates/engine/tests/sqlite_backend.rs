//! The execution scenarios again, against the SQLite backend.

mod common;

use stepwise_core::ProgressStatus;
use stepwise_engine::EngineError;
use stepwise_sqlite::SqliteStorage;

use common::Harness;

async fn sqlite() -> Harness<SqliteStorage> {
    Harness::new(SqliteStorage::open_in_memory().unwrap()).await
}

#[tokio::test]
async fn happy_path_on_sqlite() {
    let h = sqlite().await;
    let (_, steps) = h.three_step("P").await;

    h.service.start("P", "sess-1", None).await.unwrap();
    let s1 = h
        .service
        .complete_step("P", steps[0].id, "sess-1", None)
        .await
        .unwrap();
    assert_eq!(s1.completion_percentage.to_string(), "33.33");
    h.service.advance("P", "sess-1").await.unwrap();

    let err = h.service.complete_process("P", "sess-1").await.unwrap_err();
    assert!(err.to_string().contains("Completed: 1/2"), "{err}");

    let s2 = h
        .service
        .complete_step("P", steps[1].id, "sess-1", None)
        .await
        .unwrap();
    assert_eq!(s2.completion_percentage.to_string(), "66.67");

    let done = h.service.complete_process("P", "sess-1").await.unwrap();
    assert_eq!(done.status, ProgressStatus::Completed);
    assert_eq!(done.completion_percentage.to_string(), "100.00");

    let view = h.service.get_progress("P", "sess-1").await.unwrap();
    assert_eq!(view.current_step_index, 1);
    assert_eq!(view.completion_percentage.to_string(), "100.00");
}

#[tokio::test]
async fn cross_session_submission_rolls_back_on_sqlite() {
    let h = sqlite().await;
    let (_, steps) = h.three_step("P").await;
    h.service.start("P", "sess-1", None).await.unwrap();
    let foreign = h.manager.record_submission(h.form.id, "sess-2").await.unwrap();

    let err = h
        .service
        .complete_step("P", steps[0].id, "sess-1", Some(foreign.id))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    let view = h.service.get_progress("P", "sess-1").await.unwrap();
    assert_eq!(view.completion_percentage.to_string(), "0.00");
}

#[tokio::test]
async fn reorder_on_sqlite_respects_the_unique_index() {
    let h = sqlite().await;
    let (_, steps) = h
        .linear("p", &[("A", true), ("B", true), ("C", true)])
        .await;

    let order = vec![steps[2].id, steps[0].id, steps[1].id];
    let after = h.manager.reorder_steps(&h.owner, "p", &order).await.unwrap();
    let titles: Vec<&str> = after.iter().map(|s| s.title.as_str()).collect();
    assert_eq!(titles, vec!["C", "A", "B"]);

    h.manager.delete_step(&h.owner, "p", steps[2].id).await.unwrap();
    let listed = h.manager.list_steps(&h.owner, "p").await.unwrap();
    let indices: Vec<u32> = listed.iter().map(|s| s.order_index).collect();
    assert_eq!(indices, vec![0, 1]);

    let bad = vec![steps[0].id, steps[0].id];
    assert!(h.manager.reorder_steps(&h.owner, "p", &bad).await.is_err());
    let listed = h.manager.list_steps(&h.owner, "p").await.unwrap();
    let titles: Vec<&str> = listed.iter().map(|s| s.title.as_str()).collect();
    assert_eq!(titles, vec!["A", "B"]);
}

#[tokio::test]
async fn private_process_on_sqlite() {
    let h = sqlite().await;
    h.private("vip", "hunter2").await;
    assert!(h.service.verify_password("vip", "hunter2").await.unwrap());
    assert!(!h.service.verify_password("vip", "nope").await.unwrap());
    assert!(h.service.get_structure("vip", false).await.unwrap().requires_password);
}
