//! Peer management and node selection through the coordinator.

use std::sync::Arc;
use std::time::Duration;

use taskmesh::{CoordinatorConfig, NodeId, Task, TaskState};

use crate::fixtures::{assert_invariants, id, FixedLoadExecutor, TestCoordinator, LOCAL};

/// Test: Least-loaded picks the idlest node
/// Given a busy local executor and two peers with different loads
/// When a task is scheduled
/// Then it goes to the least-loaded peer
#[tokio::test]
async fn test_least_loaded_prefers_idle_peer() {
    let tc = TestCoordinator::new().await;
    tc.coordinator
        .add_executor(
            "download",
            Arc::new(FixedLoadExecutor {
                task_type: "download",
                load: 0.8,
            }),
        )
        .await;
    tc.coordinator.register_peer("peer-busy").await;
    tc.coordinator.register_peer("peer-idle").await;
    tc.utilization.set("peer-busy", 0.9);
    tc.utilization.set("peer-idle", 0.1);

    tc.coordinator.submit_task(Task::with_id("a", "download")).await;
    tc.coordinator.run_scheduling_tick().await;

    assert_eq!(
        tc.task("a").await.assigned_node,
        Some(NodeId::from("peer-idle"))
    );
}

/// Test: Ties go to the lexically smallest node
#[tokio::test]
async fn test_least_loaded_tie_break() {
    let tc = TestCoordinator::new().await;
    tc.coordinator.register_peer("aaa").await;
    tc.utilization.set("aaa", 0.0);

    tc.coordinator.submit_task(Task::with_id("a", "download")).await;
    tc.coordinator.run_scheduling_tick().await;

    // "aaa" < "local", both idle
    assert_eq!(tc.task("a").await.assigned_node, Some(NodeId::from("aaa")));
}

/// Test: Unreachable peers are never selected
#[tokio::test]
async fn test_unreachable_peer_skipped() {
    let tc = TestCoordinator::new().await;
    tc.coordinator.register_peer("aaa").await;
    tc.utilization.mark_unreachable("aaa");

    tc.coordinator.submit_task(Task::with_id("a", "download")).await;
    tc.coordinator.run_scheduling_tick().await;

    assert_eq!(tc.task("a").await.assigned_node, Some(NodeId::from(LOCAL)));
}

/// Test: Tasks no node can run stay queued
/// Given a local executor for "download" only and no peers
/// When an "upload" task is scheduled
/// Then it stays QUEUED until a peer appears
#[tokio::test]
async fn test_no_candidate_keeps_task_queued() {
    let tc = TestCoordinator::new().await;
    assert!(
        tc.coordinator
            .add_executor(
                "download",
                Arc::new(FixedLoadExecutor {
                    task_type: "download",
                    load: 0.0,
                }),
            )
            .await
    );
    tc.coordinator.submit_task(Task::with_id("up", "upload")).await;

    assert!(tc.coordinator.run_scheduling_tick().await.is_empty());
    assert_eq!(tc.state("up").await, TaskState::Queued);

    tc.coordinator.register_peer("uploader").await;
    tc.coordinator.run_scheduling_tick().await;
    assert_eq!(
        tc.task("up").await.assigned_node,
        Some(NodeId::from("uploader"))
    );
}

/// Test: Executor registration is checked
#[tokio::test]
async fn test_add_executor_requires_support() {
    let tc = TestCoordinator::new().await;
    let executor = Arc::new(FixedLoadExecutor {
        task_type: "download",
        load: 0.3,
    });
    assert!(!tc.coordinator.add_executor("upload", executor.clone()).await);
    assert!(tc.coordinator.add_executor("download", executor).await);

    let found = tc.coordinator.executor_for("download").await.unwrap();
    assert!((found.get_utilization() - 0.3).abs() < f64::EPSILON);
    assert!(tc.coordinator.executor_for("upload").await.is_none());
}

/// Test: Silent peers go stale and come back on heartbeat
/// Given a liveness window of 30s and a registered peer
/// When the peer is silent past the window and the monitor runs
/// Then it is skipped until it heartbeats again
#[tokio::test]
async fn test_peer_liveness() {
    let tc = TestCoordinator::with_config(CoordinatorConfig {
        peer_liveness_secs: Some(30),
        ..Default::default()
    })
    .await;
    tc.coordinator.register_peer("aaa").await;

    tc.clock.advance(Duration::from_secs(31));
    tc.coordinator.run_monitor_tick().await;
    assert!(!tc.coordinator.peers().await[0].live);

    tc.coordinator.submit_task(Task::with_id("a", "download")).await;
    tc.coordinator.run_scheduling_tick().await;
    assert_eq!(tc.task("a").await.assigned_node, Some(NodeId::from(LOCAL)));

    assert!(tc.coordinator.peer_heartbeat("aaa").await);
    tc.coordinator.submit_task(Task::with_id("b", "download")).await;
    tc.coordinator.run_scheduling_tick().await;
    assert_eq!(tc.task("b").await.assigned_node, Some(NodeId::from("aaa")));
}

/// Test: Assigned tasks that never start are reclaimed
/// Given an assignment timeout of 10s
/// When an assigned task gets no start signal within it
/// Then the monitor fails it with reason "AssignmentTimeout" and it is requeued
#[tokio::test]
async fn test_assignment_timeout_reclaims_task() {
    let tc = TestCoordinator::with_config(CoordinatorConfig {
        assignment_timeout_secs: Some(10),
        ..Default::default()
    })
    .await;
    tc.coordinator.register_peer("flaky").await;
    tc.coordinator.submit_task(Task::with_id("a", "download")).await;
    tc.coordinator.run_scheduling_tick().await;
    assert_eq!(tc.task("a").await.assigned_node, Some(NodeId::from("flaky")));

    tc.clock.advance(Duration::from_secs(11));
    assert_eq!(tc.coordinator.run_monitor_tick().await, vec![id("a")]);

    let task = tc.task("a").await;
    assert_eq!(task.state, TaskState::Queued);
    assert_eq!(task.last_error.as_deref(), Some("AssignmentTimeout"));

    // Drop the peer; the retry lands locally
    assert!(tc.coordinator.remove_peer("flaky").await);
    tc.coordinator.run_scheduling_tick().await;
    assert_eq!(tc.task("a").await.assigned_node, Some(NodeId::from(LOCAL)));
    assert_eq!(tc.coordinator.assignment_history(&id("a")).await.len(), 2);
    assert_invariants(&tc.coordinator).await;
}

/// Test: The local node cannot be its own peer
#[tokio::test]
async fn test_register_local_as_peer_rejected() {
    let tc = TestCoordinator::new().await;
    assert!(!tc.coordinator.register_peer(LOCAL).await);
    assert!(!tc.coordinator.register_peer("").await);
    assert!(tc.coordinator.peers().await.is_empty());
}
