//! End-to-end scenarios (S1-S6) and the testable-property invariants.
//!
//! Timeouts here are scaled down from real-world seconds into milliseconds
//! so the suite runs fast; the shape of each trace (who replies when, in
//! what order) matches each scenario exactly.

use chrono::Utc;
use serde_json::json;
use sitekeeper_core::config::CoordinatorTimeouts;
use sitekeeper_core::coordinator::{NodeActionCoordinator, ProgressReporter};
use sitekeeper_core::journal::{InMemoryJournal, JournalRecordKind};
use sitekeeper_core::model::{NodeAction, NodeActionStatus, NodeTask, NodeTaskStatus};
use sitekeeper_core::registry::AgentRegistry;
use sitekeeper_core::testing::FakeTransport;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

fn quick_timeouts() -> CoordinatorTimeouts {
    CoordinatorTimeouts {
        readiness_timeout_seconds: 5,
        cancellation_grace_seconds: 1,
        flush_timeout_seconds: 1,
    }
}

fn two_task_action(action_id: Uuid) -> NodeAction {
    let mut tasks = HashMap::new();
    tasks.insert("t1".to_string(), NodeTask::new("t1", "N1", json!({})));
    tasks.insert("t2".to_string(), NodeTask::new("t2", "N2", json!({})));
    NodeAction::new(action_id, "VerifyConfiguration", tasks)
}

fn recording_reporter() -> (ProgressReporter, Arc<Mutex<Vec<u8>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&seen);
    let reporter: ProgressReporter = Box::new(move |percent, _message| recorded.lock().unwrap().push(percent));
    (reporter, seen)
}

#[tokio::test]
async fn s1_happy_path_both_nodes_succeed_and_flush_before_resolution() {
    let transport = Arc::new(FakeTransport::new());
    let registry = AgentRegistry::new(Duration::from_secs(60));
    let log_router = sitekeeper_core::log_router::LogRouter::new(100);
    let journal = InMemoryJournal::new();
    let coordinator = NodeActionCoordinator::new(
        transport,
        registry,
        Arc::clone(&log_router),
        journal.clone(),
        quick_timeouts(),
    );

    let action_id = Uuid::now_v7();
    let action = two_task_action(action_id);
    let (reporter, progress_seen) = recording_reporter();

    let coordinator2 = Arc::clone(&coordinator);
    let join = tokio::spawn(async move { coordinator2.submit(action, reporter).await });
    tokio::time::sleep(Duration::from_millis(20)).await;

    coordinator.report_readiness(action_id, "t1".to_string(), true, None).unwrap();
    coordinator.report_readiness(action_id, "t2".to_string(), true, None).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    for task_id in ["t1", "t2"] {
        for percent in [25u8, 50, 75] {
            coordinator
                .report_progress(
                    action_id,
                    task_id.to_string(),
                    "InProgress".to_string(),
                    Some(percent),
                    "working".to_string(),
                    Utc::now(),
                    None,
                )
                .unwrap();
        }
    }

    // Give the flush barrier a moment to register both waiters before the
    // confirms land, then confirm out of band (mirrors agents racing in).
    let log_router2 = Arc::clone(&log_router);
    let confirm_action_id = action_id;
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        log_router2.confirm_flush(confirm_action_id, "N1");
        tokio::time::sleep(Duration::from_millis(10)).await;
        log_router2.confirm_flush(confirm_action_id, "N2");
    });

    for task_id in ["t1", "t2"] {
        coordinator
            .report_progress(
                action_id,
                task_id.to_string(),
                "Succeeded".to_string(),
                Some(100),
                "done".to_string(),
                Utc::now(),
                Some(json!({"filesChecked": 1250, "deviationsFound": 0})),
            )
            .unwrap();
    }

    let result = join.await.unwrap().unwrap();
    assert!(result.success);
    assert_eq!(result.final_state.status, NodeActionStatus::Succeeded);
    assert_eq!(result.final_state.aggregate_progress_percent(), 100);

    let records = journal.records_for(action_id).await.unwrap();
    assert!(records.iter().any(|r| r.kind == JournalRecordKind::NodeActionFinished));
    assert!(progress_seen.lock().unwrap().iter().any(|&p| p == 100));
}

#[tokio::test]
async fn s2_readiness_timeout_on_one_node_fails_the_action() {
    let transport = Arc::new(FakeTransport::new());
    let registry = AgentRegistry::new(Duration::from_secs(60));
    let log_router = sitekeeper_core::log_router::LogRouter::new(100);
    let journal = InMemoryJournal::new();
    let mut timeouts = quick_timeouts();
    timeouts.readiness_timeout_seconds = 0; // fires almost immediately for t2
    let coordinator = NodeActionCoordinator::new(transport, registry, log_router, journal, timeouts);

    let action_id = Uuid::now_v7();
    let action = two_task_action(action_id);
    let (reporter, _) = recording_reporter();

    let coordinator2 = Arc::clone(&coordinator);
    let join = tokio::spawn(async move { coordinator2.submit(action, reporter).await });
    tokio::time::sleep(Duration::from_millis(5)).await;

    // N1 replies ready and succeeds; N2 never replies and times out.
    coordinator.report_readiness(action_id, "t1".to_string(), true, None).unwrap();
    coordinator
        .report_progress(
            action_id,
            "t1".to_string(),
            "Succeeded".to_string(),
            Some(100),
            "done".to_string(),
            Utc::now(),
            None,
        )
        .unwrap();

    let result = join.await.unwrap().unwrap();
    assert!(!result.success);
    assert_eq!(result.final_state.status, NodeActionStatus::Failed);
    assert_eq!(result.final_state.tasks["t1"].status, NodeTaskStatus::Succeeded);
    assert_eq!(result.final_state.tasks["t2"].status, NodeTaskStatus::ReadinessCheckTimedOut);
}

#[tokio::test]
async fn s3_node_disconnect_mid_execution_marks_task_offline_and_fails_action() {
    let transport = Arc::new(FakeTransport::new());
    let registry = AgentRegistry::new(Duration::from_millis(30));
    registry.register("N1", "1.0.0");
    let _sweeper = registry.spawn_sweeper(Duration::from_millis(10));

    let log_router = sitekeeper_core::log_router::LogRouter::new(100);
    let journal = InMemoryJournal::new();
    let coordinator = NodeActionCoordinator::new(
        transport,
        Arc::clone(&registry),
        log_router,
        journal,
        quick_timeouts(),
    );

    let action_id = Uuid::now_v7();
    let mut tasks = HashMap::new();
    tasks.insert("t1".to_string(), NodeTask::new("t1", "N1", json!({})));
    let action = NodeAction::new(action_id, "TestOrchestration", tasks);
    let (reporter, _) = recording_reporter();

    let coordinator2 = Arc::clone(&coordinator);
    let join = tokio::spawn(async move { coordinator2.submit(action, reporter).await });
    tokio::time::sleep(Duration::from_millis(10)).await;

    coordinator.report_readiness(action_id, "t1".to_string(), true, None).unwrap();
    coordinator
        .report_progress(
            action_id,
            "t1".to_string(),
            "InProgress".to_string(),
            Some(10),
            "working".to_string(),
            Utc::now(),
            None,
        )
        .unwrap();

    // N1's heartbeat lapses past the offline threshold; no further
    // heartbeats are sent, so the sweeper marks it Offline.
    tokio::time::sleep(Duration::from_millis(80)).await;

    let result = join.await.unwrap().unwrap();
    assert!(!result.success);
    assert_eq!(result.final_state.status, NodeActionStatus::Failed);
    assert_eq!(result.final_state.tasks["t1"].status, NodeTaskStatus::NodeOfflineDuringTask);
}

#[tokio::test]
async fn s4_cancellation_under_load_resolves_cancelled_after_grace() {
    let transport = Arc::new(FakeTransport::new());
    let registry = AgentRegistry::new(Duration::from_secs(60));
    let log_router = sitekeeper_core::log_router::LogRouter::new(100);
    let journal = InMemoryJournal::new();
    let mut timeouts = quick_timeouts();
    timeouts.cancellation_grace_seconds = 0;
    let coordinator = NodeActionCoordinator::new(transport, registry, log_router, journal, timeouts);

    let action_id = Uuid::now_v7();
    let mut tasks = HashMap::new();
    for (id, node) in [("t1", "N1"), ("t2", "N2"), ("t3", "N3")] {
        tasks.insert(id.to_string(), NodeTask::new(id, node, json!({})));
    }
    let action = NodeAction::new(action_id, "VerifyConfiguration", tasks);
    let (reporter, _) = recording_reporter();

    let coordinator2 = Arc::clone(&coordinator);
    let join = tokio::spawn(async move { coordinator2.submit(action, reporter).await });
    tokio::time::sleep(Duration::from_millis(10)).await;

    for task_id in ["t1", "t2", "t3"] {
        coordinator.report_readiness(action_id, task_id.to_string(), true, None).unwrap();
    }
    tokio::time::sleep(Duration::from_millis(10)).await;

    // All three now InProgress; cancel the whole action. N1/N2 acknowledge
    // terminal Cancelled; N3 stays silent and is forced Cancelled by grace.
    coordinator.cancel_action(action_id, "operator requested").unwrap();
    coordinator
        .report_progress(action_id, "t1".to_string(), "Cancelled".to_string(), None, "ack".to_string(), Utc::now(), None)
        .unwrap();
    coordinator
        .report_progress(action_id, "t2".to_string(), "Cancelled".to_string(), None, "ack".to_string(), Utc::now(), None)
        .unwrap();

    let result = join.await.unwrap().unwrap();
    assert!(!result.success);
    assert_eq!(result.final_state.status, NodeActionStatus::Cancelled);
    assert!(result.final_state.tasks.values().all(|t| t.status != NodeTaskStatus::Succeeded));
    assert_eq!(result.final_state.tasks["t3"].status, NodeTaskStatus::Cancelled);
}

#[tokio::test]
async fn s5_mixed_outcomes_resolve_failed_with_two_succeeded_one_failed() {
    let transport = Arc::new(FakeTransport::new());
    let registry = AgentRegistry::new(Duration::from_secs(60));
    let log_router = sitekeeper_core::log_router::LogRouter::new(100);
    let journal = InMemoryJournal::new();
    let coordinator = NodeActionCoordinator::new(transport, registry, log_router, journal, quick_timeouts());

    let action_id = Uuid::now_v7();
    let mut tasks = HashMap::new();
    for (id, node) in [("t1", "N1"), ("t2", "N2"), ("t3", "N3")] {
        tasks.insert(id.to_string(), NodeTask::new(id, node, json!({})));
    }
    let action = NodeAction::new(action_id, "VerifyConfiguration", tasks);
    let (reporter, _) = recording_reporter();

    let coordinator2 = Arc::clone(&coordinator);
    let join = tokio::spawn(async move { coordinator2.submit(action, reporter).await });
    tokio::time::sleep(Duration::from_millis(10)).await;

    for task_id in ["t1", "t2", "t3"] {
        coordinator.report_readiness(action_id, task_id.to_string(), true, None).unwrap();
    }
    tokio::time::sleep(Duration::from_millis(10)).await;

    coordinator
        .report_progress(action_id, "t1".to_string(), "Succeeded".to_string(), Some(100), "ok".to_string(), Utc::now(), None)
        .unwrap();
    coordinator
        .report_progress(action_id, "t2".to_string(), "Failed".to_string(), Some(100), "disk error".to_string(), Utc::now(), None)
        .unwrap();
    coordinator
        .report_progress(action_id, "t3".to_string(), "Succeeded".to_string(), Some(100), "ok".to_string(), Utc::now(), None)
        .unwrap();

    let result = join.await.unwrap().unwrap();
    assert!(!result.success);
    assert_eq!(result.final_state.status, NodeActionStatus::Failed);
    assert_eq!(result.final_state.aggregate_progress_percent(), 100);
}

#[tokio::test]
async fn s6_log_flush_timeout_still_resolves_succeeded() {
    let transport = Arc::new(FakeTransport::new());
    let registry = AgentRegistry::new(Duration::from_secs(60));
    let log_router = sitekeeper_core::log_router::LogRouter::new(100);
    let journal = InMemoryJournal::new();
    let mut timeouts = quick_timeouts();
    timeouts.flush_timeout_seconds = 0;
    let coordinator = NodeActionCoordinator::new(
        transport,
        registry,
        Arc::clone(&log_router),
        journal.clone(),
        timeouts,
    );

    let action_id = Uuid::now_v7();
    let mut tasks = HashMap::new();
    for (id, node) in [("t1", "N1"), ("t2", "N2")] {
        tasks.insert(id.to_string(), NodeTask::new(id, node, json!({})));
    }
    let action = NodeAction::new(action_id, "VerifyConfiguration", tasks);
    let (reporter, _) = recording_reporter();

    let coordinator2 = Arc::clone(&coordinator);
    let join = tokio::spawn(async move { coordinator2.submit(action, reporter).await });
    tokio::time::sleep(Duration::from_millis(10)).await;

    for task_id in ["t1", "t2"] {
        coordinator.report_readiness(action_id, task_id.to_string(), true, None).unwrap();
    }
    tokio::time::sleep(Duration::from_millis(10)).await;

    for task_id in ["t1", "t2"] {
        coordinator
            .report_progress(action_id, task_id.to_string(), "Succeeded".to_string(), Some(100), "done".to_string(), Utc::now(), None)
            .unwrap();
    }
    // N2 never confirms flush; with a zero flush timeout the barrier gives
    // up immediately instead of hanging the whole test suite.

    let result = join.await.unwrap().unwrap();
    assert!(result.success);
    assert_eq!(result.final_state.status, NodeActionStatus::Succeeded);
    let records = journal.records_for(action_id).await.unwrap();
    assert!(records.iter().any(|r| r.kind == JournalRecordKind::NodeActionFinished));
}

#[tokio::test]
async fn sticky_terminality_drops_late_non_terminal_updates() {
    let transport = Arc::new(FakeTransport::new());
    let registry = AgentRegistry::new(Duration::from_secs(60));
    let log_router = sitekeeper_core::log_router::LogRouter::new(100);
    let journal = InMemoryJournal::new();
    let coordinator = NodeActionCoordinator::new(transport, registry, log_router, journal, quick_timeouts());

    let action_id = Uuid::now_v7();
    let mut tasks = HashMap::new();
    tasks.insert("t1".to_string(), NodeTask::new("t1", "N1", json!({})));
    let action = NodeAction::new(action_id, "VerifyConfiguration", tasks);
    let (reporter, _) = recording_reporter();

    let coordinator2 = Arc::clone(&coordinator);
    let join = tokio::spawn(async move { coordinator2.submit(action, reporter).await });
    tokio::time::sleep(Duration::from_millis(10)).await;

    coordinator.report_readiness(action_id, "t1".to_string(), true, None).unwrap();
    coordinator
        .report_progress(action_id, "t1".to_string(), "Succeeded".to_string(), Some(100), "done".to_string(), Utc::now(), Some(json!({"a": 1})))
        .unwrap();
    // Late, non-terminal update after the task already resolved: dropped.
    coordinator
        .report_progress(action_id, "t1".to_string(), "InProgress".to_string(), Some(42), "stale".to_string(), Utc::now(), None)
        .unwrap();

    let result = join.await.unwrap().unwrap();
    assert_eq!(result.final_state.tasks["t1"].status, NodeTaskStatus::Succeeded);
    assert_eq!(result.final_state.tasks["t1"].progress_percent, 100);
    assert_eq!(result.final_state.tasks["t1"].result, Some(json!({"a": 1})));
}

#[tokio::test]
async fn no_lost_tasks_every_task_reaches_terminal_on_resolution() {
    let transport = Arc::new(FakeTransport::new());
    let registry = AgentRegistry::new(Duration::from_secs(60));
    let log_router = sitekeeper_core::log_router::LogRouter::new(100);
    let journal = InMemoryJournal::new();
    let coordinator = NodeActionCoordinator::new(transport, registry, log_router, journal, quick_timeouts());

    let action_id = Uuid::now_v7();
    let action = two_task_action(action_id);
    let (reporter, _) = recording_reporter();
    let original_task_count = action.tasks.len();

    let coordinator2 = Arc::clone(&coordinator);
    let join = tokio::spawn(async move { coordinator2.submit(action, reporter).await });
    tokio::time::sleep(Duration::from_millis(10)).await;

    for task_id in ["t1", "t2"] {
        coordinator.report_readiness(action_id, task_id.to_string(), true, None).unwrap();
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
    for task_id in ["t1", "t2"] {
        coordinator
            .report_progress(action_id, task_id.to_string(), "Succeeded".to_string(), Some(100), "done".to_string(), Utc::now(), None)
            .unwrap();
    }

    let result = join.await.unwrap().unwrap();
    assert_eq!(result.final_state.tasks.len(), original_task_count);
    assert!(result.final_state.tasks.values().all(|t| t.status.is_terminal()));
}

#[tokio::test]
async fn duplicate_readiness_report_is_idempotent() {
    let transport = Arc::new(FakeTransport::new());
    let registry = AgentRegistry::new(Duration::from_secs(60));
    let log_router = sitekeeper_core::log_router::LogRouter::new(100);
    let journal = InMemoryJournal::new();
    let coordinator = NodeActionCoordinator::new(transport, registry, log_router, journal, quick_timeouts());

    let action_id = Uuid::now_v7();
    let mut tasks = HashMap::new();
    tasks.insert("t1".to_string(), NodeTask::new("t1", "N1", json!({})));
    let action = NodeAction::new(action_id, "VerifyConfiguration", tasks);
    let (reporter, _) = recording_reporter();

    let coordinator2 = Arc::clone(&coordinator);
    let join = tokio::spawn(async move { coordinator2.submit(action, reporter).await });
    tokio::time::sleep(Duration::from_millis(10)).await;

    coordinator.report_readiness(action_id, "t1".to_string(), true, None).unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    // Duplicate: arrives after the dispatch already moved past the
    // readiness phase, so it is ignored rather than re-dispatching.
    coordinator.report_readiness(action_id, "t1".to_string(), true, None).unwrap();
    coordinator
        .report_progress(action_id, "t1".to_string(), "Succeeded".to_string(), Some(100), "done".to_string(), Utc::now(), None)
        .unwrap();

    let result = join.await.unwrap().unwrap();
    assert_eq!(result.final_state.tasks["t1"].status, NodeTaskStatus::Succeeded);
}

#[tokio::test]
async fn duplicate_progress_update_with_equal_fields_is_idempotent() {
    let transport = Arc::new(FakeTransport::new());
    let registry = AgentRegistry::new(Duration::from_secs(60));
    let log_router = sitekeeper_core::log_router::LogRouter::new(100);
    let journal = InMemoryJournal::new();
    let coordinator = NodeActionCoordinator::new(transport, registry, log_router, journal, quick_timeouts());

    let action_id = Uuid::now_v7();
    let mut tasks = HashMap::new();
    tasks.insert("t1".to_string(), NodeTask::new("t1", "N1", json!({})));
    let action = NodeAction::new(action_id, "VerifyConfiguration", tasks);
    let (reporter, _) = recording_reporter();

    let coordinator2 = Arc::clone(&coordinator);
    let join = tokio::spawn(async move { coordinator2.submit(action, reporter).await });
    tokio::time::sleep(Duration::from_millis(10)).await;

    coordinator.report_readiness(action_id, "t1".to_string(), true, None).unwrap();
    let ts = Utc::now();
    for _ in 0..2 {
        coordinator
            .report_progress(action_id, "t1".to_string(), "Succeeded".to_string(), Some(100), "done".to_string(), ts, Some(json!({"n": 1})))
            .unwrap();
    }

    let result = join.await.unwrap().unwrap();
    assert_eq!(result.final_state.tasks["t1"].status, NodeTaskStatus::Succeeded);
    assert_eq!(result.final_state.tasks["t1"].updated_at, ts);
    assert_eq!(result.final_state.tasks["t1"].result, Some(json!({"n": 1})));
}

#[tokio::test]
async fn unknown_action_id_on_ingress_is_a_protocol_error_not_a_panic() {
    let transport = Arc::new(FakeTransport::new());
    let registry = AgentRegistry::new(Duration::from_secs(60));
    let log_router = sitekeeper_core::log_router::LogRouter::new(100);
    let journal = InMemoryJournal::new();
    let coordinator = NodeActionCoordinator::new(transport, registry, log_router, journal, quick_timeouts());

    let err = coordinator.report_readiness(Uuid::now_v7(), "ghost".to_string(), true, None).unwrap_err();
    assert!(matches!(err, sitekeeper_core::error::CoordinatorError::UnknownAction(_)));
}
