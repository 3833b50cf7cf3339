//! End-to-end coordinator scenarios.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use taskmesh::{CoordinatorConfig, NodeId, Priority, SelectionStrategy, Task, TaskResult, TaskState};

use crate::fixtures::{assert_invariants, id, RecordingListener, TestCoordinator, LOCAL};

/// Test: Critical task lands on the local node
/// Given a CRITICAL task with no dependencies and no peers
/// When one scheduling tick runs
/// Then the task is ASSIGNED to the local node
#[tokio::test]
async fn test_critical_task_assigned_locally() {
    let tc = TestCoordinator::new().await;
    assert!(
        tc.coordinator
            .submit_task(Task::with_id("A", "download").with_priority(Priority::Critical))
            .await
    );

    let assignments = tc.coordinator.run_scheduling_tick().await;

    assert_eq!(assignments.len(), 1);
    let task = tc.task("A").await;
    assert_eq!(task.state, TaskState::Assigned);
    assert_eq!(task.assigned_node, Some(NodeId::from(LOCAL)));
    assert_invariants(&tc.coordinator).await;
}

/// Test: Blocking dependency holds a task back
/// Given B depends on unfinished A with must_complete_before
/// When a tick runs before and after A completes
/// Then B stays QUEUED until A is COMPLETED, then becomes ASSIGNED
#[tokio::test]
async fn test_dependency_gates_assignment() {
    let tc = TestCoordinator::new().await;
    tc.coordinator.submit_task(Task::with_id("A", "download")).await;
    tc.coordinator
        .submit_task(Task::with_id("B", "upload").depends_on("A"))
        .await;

    tc.coordinator.run_scheduling_tick().await;
    assert_eq!(tc.state("A").await, TaskState::Assigned);
    assert_eq!(tc.state("B").await, TaskState::Queued);
    assert_invariants(&tc.coordinator).await;

    assert!(tc.coordinator.start_task(&id("A")).await);
    assert!(
        tc.coordinator
            .complete_task(&id("A"), TaskResult::success("A", serde_json::json!("done")))
            .await
    );

    tc.coordinator.run_scheduling_tick().await;
    assert_eq!(tc.state("B").await, TaskState::Assigned);
    assert_invariants(&tc.coordinator).await;
}

/// Test: Retry budget is honored
/// Given C with max_retries = 2
/// When fail_task is called three times
/// Then C is re-queued twice and then FAILED, with on_task_failed fired once
#[tokio::test]
async fn test_retry_budget_then_terminal_failure() {
    let tc = TestCoordinator::new().await;
    let listener = Arc::new(RecordingListener::default());
    tc.coordinator.add_listener(listener.clone()).await;
    tc.coordinator
        .submit_task(Task::with_id("C", "download").with_max_retries(2))
        .await;

    assert!(tc.coordinator.fail_task(&id("C"), "boom").await);
    let task = tc.task("C").await;
    assert_eq!(task.state, TaskState::Queued);
    assert_eq!(task.retry_count, 1);

    assert!(tc.coordinator.fail_task(&id("C"), "boom").await);
    assert_eq!(tc.task("C").await.retry_count, 2);
    assert_eq!(tc.state("C").await, TaskState::Queued);
    assert_eq!(listener.failed_count("C"), 0);

    assert!(tc.coordinator.fail_task(&id("C"), "boom").await);
    let task = tc.task("C").await;
    assert_eq!(task.state, TaskState::Failed);
    assert_eq!(task.retry_count, 2);
    assert_eq!(listener.failed_count("C"), 1);
    // Submission plus two retries
    assert_eq!(listener.queued_count("C"), 3);

    // A failed task stays failed
    assert!(!tc.coordinator.fail_task(&id("C"), "boom").await);
    assert_eq!(listener.failed_count("C"), 1);

    let metrics = tc.coordinator.get_metrics().await;
    assert_eq!(metrics.failed_tasks, 1);
    assert_eq!(metrics.retries, 2);
    assert!(tc.coordinator.get_result(&id("C")).await.is_none());
    assert_invariants(&tc.coordinator).await;
}

/// Test: Round-robin spreads work evenly
/// Given two peers and a round-robin coordinator
/// When ten dependency-free tasks are scheduled
/// Then per-node assignment counts differ by at most one
#[tokio::test]
async fn test_round_robin_balances_nodes() {
    let tc = TestCoordinator::with_config(CoordinatorConfig {
        strategy: SelectionStrategy::RoundRobin,
        ..Default::default()
    })
    .await;
    assert!(tc.coordinator.register_peer("peer-a").await);
    assert!(tc.coordinator.register_peer("peer-b").await);

    for i in 0..10 {
        tc.coordinator
            .submit_task(Task::with_id(format!("t{}", i), "download"))
            .await;
    }
    let assignments = tc.coordinator.run_scheduling_tick().await;
    assert_eq!(assignments.len(), 10);

    let mut counts: HashMap<NodeId, usize> = HashMap::new();
    for assignment in &assignments {
        *counts.entry(assignment.node_id.clone()).or_default() += 1;
    }
    assert_eq!(counts.len(), 3);
    let max = *counts.values().max().unwrap();
    let min = *counts.values().min().unwrap();
    assert!(max - min <= 1, "unbalanced: {:?}", counts);
    assert_invariants(&tc.coordinator).await;
}

/// Test: Running task times out
/// Given D with timeout_seconds = 1 that is RUNNING
/// When the clock moves past the timeout and one monitor tick runs
/// Then D goes through failure handling with reason "Timeout"
#[tokio::test]
async fn test_monitor_times_out_running_task() {
    let tc = TestCoordinator::new().await;
    let listener = Arc::new(RecordingListener::default());
    tc.coordinator.add_listener(listener.clone()).await;
    tc.run_to_running(Task::with_id("D", "download").with_timeout_secs(1))
        .await;

    assert!(tc.coordinator.run_monitor_tick().await.is_empty());

    tc.clock.advance(Duration::from_millis(1500));
    let failed = tc.coordinator.run_monitor_tick().await;

    assert_eq!(failed, vec![id("D")]);
    let task = tc.task("D").await;
    assert_eq!(task.last_error.as_deref(), Some("Timeout"));
    assert_eq!(task.state, TaskState::Queued);
    assert_eq!(task.retry_count, 1);
    assert!(task.assigned_node.is_none());
    assert_eq!(listener.queued_count("D"), 2);
    assert_invariants(&tc.coordinator).await;
}

/// Test: Timeout is measured from the start signal
/// Given a task that waited in the queue longer than its timeout
/// When it finally starts and a monitor tick runs right away
/// Then it is not timed out
#[tokio::test]
async fn test_queue_wait_does_not_count_toward_timeout() {
    let tc = TestCoordinator::new().await;
    tc.coordinator
        .submit_task(Task::with_id("slow-queue", "download").with_timeout_secs(1))
        .await;
    tc.clock.advance(Duration::from_secs(10));
    tc.coordinator.run_scheduling_tick().await;
    tc.coordinator.start_task(&id("slow-queue")).await;

    assert!(tc.coordinator.run_monitor_tick().await.is_empty());
    assert_eq!(tc.state("slow-queue").await, TaskState::Running);
}

/// Test: Exhausted timeouts end in FAILED
/// Given a task with max_retries = 1 that times out on every attempt
/// When it is rescheduled and times out again
/// Then it ends FAILED with on_task_failed reporting "Timeout"
#[tokio::test]
async fn test_repeated_timeouts_exhaust_budget() {
    let tc = TestCoordinator::new().await;
    let listener = Arc::new(RecordingListener::default());
    tc.coordinator.add_listener(listener.clone()).await;
    tc.run_to_running(
        Task::with_id("E", "download")
            .with_timeout_secs(1)
            .with_max_retries(1),
    )
    .await;

    tc.clock.advance(Duration::from_secs(2));
    tc.coordinator.run_monitor_tick().await;
    tc.coordinator.run_scheduling_tick().await;
    assert!(tc.coordinator.start_task(&id("E")).await);
    tc.clock.advance(Duration::from_secs(2));
    tc.coordinator.run_monitor_tick().await;

    assert_eq!(tc.state("E").await, TaskState::Failed);
    assert_eq!(
        listener.seen().last(),
        Some(&crate::fixtures::Seen::Failed("E".to_string(), "Timeout".to_string()))
    );
    assert_eq!(tc.coordinator.assignment_history(&id("E")).await.len(), 2);
    assert_invariants(&tc.coordinator).await;
}

/// Test: Out-of-range timeouts never fire
/// Given running tasks whose timeout_seconds do not fit a duration
/// When the clock moves and a monitor tick runs
/// Then neither task is failed and the tick still fails a normal overrun task
#[tokio::test]
async fn test_out_of_range_timeout_never_fires() {
    let tc = TestCoordinator::new().await;
    tc.run_to_running(Task::with_id("forever", "download").with_timeout_secs(u64::MAX))
        .await;
    tc.run_to_running(
        Task::with_id("huge", "download").with_timeout_secs(10_000_000_000_000_000),
    )
    .await;
    tc.run_to_running(Task::with_id("short", "download").with_timeout_secs(1))
        .await;

    tc.clock.advance(Duration::from_millis(1));
    assert!(tc.coordinator.run_monitor_tick().await.is_empty());

    tc.clock.advance(Duration::from_secs(2));
    assert_eq!(tc.coordinator.run_monitor_tick().await, vec![id("short")]);
    assert_eq!(tc.state("forever").await, TaskState::Running);
    assert_eq!(tc.state("huge").await, TaskState::Running);
    assert_invariants(&tc.coordinator).await;
}
