//! Task lifecycle tests: cancellation, completion, listener isolation.

use std::sync::Arc;

use taskmesh::{ChannelListener, CoordinatorEvent, Task, TaskResult, TaskState};

use crate::fixtures::{
    assert_invariants, id, BrokenListener, PanickingListener, RecordingListener, Seen,
    TestCoordinator,
};

/// Test: Duplicate submissions are rejected
/// Given a task already in the registry
/// When a task with the same ID is submitted
/// Then submission fails and the original task is untouched
#[tokio::test]
async fn test_duplicate_submission_rejected() {
    let tc = TestCoordinator::new().await;
    assert!(tc.coordinator.submit_task(Task::with_id("a", "download")).await);
    assert!(!tc.coordinator.submit_task(Task::with_id("a", "upload")).await);

    assert_eq!(tc.task("a").await.task_type, "download");
    assert_eq!(tc.coordinator.get_metrics().await.total_tasks, 1);
}

/// Test: Cyclic dependencies are rejected at submission
/// Given a -> b already submitted
/// When b is submitted depending on a
/// Then the submission fails and nothing is stuck in the queue
#[tokio::test]
async fn test_cycle_rejected_at_submission() {
    let tc = TestCoordinator::new().await;
    assert!(
        tc.coordinator
            .submit_task(Task::with_id("a", "download").depends_on("b"))
            .await
    );
    assert!(
        !tc.coordinator
            .submit_task(Task::with_id("b", "download").depends_on("a"))
            .await
    );
    assert!(
        !tc.coordinator
            .submit_task(Task::with_id("self", "download").depends_on("self"))
            .await
    );

    assert!(tc.coordinator.get_task(&id("b")).await.is_none());
    assert_eq!(tc.coordinator.get_metrics().await.total_tasks, 1);
}

/// Test: Batch submission is not atomic
/// Given a batch containing one duplicate
/// When the batch is submitted
/// Then the call reports failure but the valid tasks are accepted
#[tokio::test]
async fn test_batch_partial_application() {
    let tc = TestCoordinator::new().await;
    let accepted = tc
        .coordinator
        .submit_batch(vec![
            Task::with_id("a", "download"),
            Task::with_id("a", "download"),
            Task::with_id("b", "download"),
        ])
        .await;

    assert!(!accepted);
    assert_eq!(tc.coordinator.get_metrics().await.total_tasks, 2);
    assert!(
        tc.coordinator
            .submit_batch(vec![Task::with_id("c", "x"), Task::with_id("d", "x")])
            .await
    );
}

/// Test: Cancellation rules
/// Given tasks in QUEUED, ASSIGNED and RUNNING
/// When each is cancelled
/// Then only the QUEUED and ASSIGNED ones are cancelled
#[tokio::test]
async fn test_cancel_only_before_running() {
    let tc = TestCoordinator::new().await;
    tc.run_to_running(Task::with_id("running", "x")).await;
    tc.coordinator.submit_task(Task::with_id("assigned", "x")).await;
    tc.coordinator.run_scheduling_tick().await;
    tc.coordinator.submit_task(Task::with_id("queued", "x")).await;

    assert!(tc.coordinator.cancel_task(&id("queued")).await);
    assert!(tc.coordinator.cancel_task(&id("assigned")).await);
    assert!(!tc.coordinator.cancel_task(&id("running")).await);
    assert!(!tc.coordinator.cancel_task(&id("ghost")).await);
    assert!(!tc.coordinator.cancel_task(&id("queued")).await);

    assert_eq!(tc.state("queued").await, TaskState::Cancelled);
    assert_eq!(tc.state("assigned").await, TaskState::Cancelled);
    assert_eq!(tc.state("running").await, TaskState::Running);
    assert!(tc.coordinator.get_assignment(&id("assigned")).await.is_none());

    // Cancelled tasks are never scheduled
    assert!(tc.coordinator.run_scheduling_tick().await.is_empty());
    assert_invariants(&tc.coordinator).await;
}

/// Test: Completion is idempotent
/// Given a completed task
/// When complete_task is called again
/// Then it returns false and metrics do not double count
#[tokio::test]
async fn test_second_completion_is_noop() {
    let tc = TestCoordinator::new().await;
    let listener = Arc::new(RecordingListener::default());
    tc.coordinator.add_listener(listener.clone()).await;
    tc.run_to_running(Task::with_id("a", "download")).await;

    let result = TaskResult::success("a", serde_json::json!({ "bytes": 42 }));
    assert!(tc.coordinator.complete_task(&id("a"), result.clone()).await);
    assert!(!tc.coordinator.complete_task(&id("a"), result).await);

    let metrics = tc.coordinator.get_metrics().await;
    assert_eq!(metrics.completed_tasks, 1);
    assert_eq!(
        listener
            .seen()
            .iter()
            .filter(|s| matches!(s, Seen::Completed(_)))
            .count(),
        1
    );

    let stored = tc.coordinator.get_result(&id("a")).await.unwrap();
    assert_eq!(stored.output, Some(serde_json::json!({ "bytes": 42 })));
    assert!(stored.completed_at.is_some());
    assert_invariants(&tc.coordinator).await;
}

/// Test: Executors may skip the start signal
/// Given an ASSIGNED task
/// When complete_task is called without start_task
/// Then the task completes
#[tokio::test]
async fn test_complete_from_assigned() {
    let tc = TestCoordinator::new().await;
    tc.coordinator.submit_task(Task::with_id("a", "download")).await;
    tc.coordinator.run_scheduling_tick().await;

    assert!(
        tc.coordinator
            .complete_task(&id("a"), TaskResult::success("a", serde_json::json!(null)))
            .await
    );
    assert_eq!(tc.state("a").await, TaskState::Completed);
}

/// Test: Start signal only applies to assigned tasks
#[tokio::test]
async fn test_start_task_requires_assignment() {
    let tc = TestCoordinator::new().await;
    tc.coordinator.submit_task(Task::with_id("a", "download")).await;

    assert!(!tc.coordinator.start_task(&id("a")).await);
    tc.coordinator.run_scheduling_tick().await;
    assert!(tc.coordinator.start_task(&id("a")).await);
    assert!(!tc.coordinator.start_task(&id("a")).await);
    assert!(tc.task("a").await.started_at.is_some());
}

/// Test: Failing listeners are isolated
/// Given an erroring and a panicking listener registered before a recorder
/// When tasks move through their lifecycle
/// Then every operation succeeds and the recorder sees every event
#[tokio::test]
async fn test_listener_failures_are_isolated() {
    let tc = TestCoordinator::new().await;
    let recorder = Arc::new(RecordingListener::default());
    tc.coordinator.add_listener(Arc::new(BrokenListener)).await;
    tc.coordinator.add_listener(Arc::new(PanickingListener)).await;
    tc.coordinator.add_listener(recorder.clone()).await;

    assert!(
        tc.coordinator
            .submit_task(Task::with_id("a", "download").with_max_retries(0))
            .await
    );
    tc.run_to_running(Task::with_id("b", "download")).await;
    assert!(tc.coordinator.fail_task(&id("a"), "boom").await);
    assert!(
        tc.coordinator
            .complete_task(&id("b"), TaskResult::success("b", serde_json::json!(1)))
            .await
    );

    assert_eq!(
        recorder.seen(),
        vec![
            Seen::Queued("a".to_string()),
            Seen::Queued("b".to_string()),
            Seen::Started("b".to_string()),
            Seen::Failed("a".to_string(), "boom".to_string()),
            Seen::Completed("b".to_string()),
        ]
    );
    assert!(tc.coordinator.is_running().await);
    assert_invariants(&tc.coordinator).await;
}

/// Test: Channel listener receives snapshots
#[tokio::test]
async fn test_channel_listener_snapshots() {
    let tc = TestCoordinator::new().await;
    let (listener, mut rx) = ChannelListener::channel();
    tc.coordinator.add_listener(Arc::new(listener)).await;

    tc.run_to_running(Task::with_id("a", "download")).await;

    match rx.recv().await.unwrap() {
        CoordinatorEvent::TaskQueued(task) => assert_eq!(task.state, TaskState::Queued),
        other => panic!("unexpected event {:?}", other),
    }
    match rx.recv().await.unwrap() {
        CoordinatorEvent::TaskStarted(task) => {
            assert_eq!(task.state, TaskState::Running);
            assert!(task.assigned_node.is_some());
        }
        other => panic!("unexpected event {:?}", other),
    }
}

/// Test: Stopped coordinator rejects work but keeps state
/// Given a coordinator with queued work
/// When it is stopped
/// Then mutations fail, queries still answer, and restart resumes scheduling
#[tokio::test]
async fn test_stop_and_restart() {
    let tc = TestCoordinator::new().await;
    tc.coordinator.submit_task(Task::with_id("a", "download")).await;

    assert!(tc.coordinator.stop().await);
    assert!(!tc.coordinator.submit_task(Task::with_id("b", "download")).await);
    assert!(!tc.coordinator.cancel_task(&id("a")).await);
    assert!(tc.coordinator.run_scheduling_tick().await.is_empty());
    assert_eq!(tc.state("a").await, TaskState::Queued);

    assert!(tc.coordinator.start(Some("local")).await);
    assert_eq!(tc.coordinator.run_scheduling_tick().await.len(), 1);
}
