//! Task lifecycle listeners.
//!
//! Listeners observe transitions; they never mutate coordinator state.
//! A listener that returns an error or panics is logged and skipped, and
//! the remaining listeners still run.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::core::{Task, TaskResult};

/// Observer of task lifecycle transitions.
///
/// All methods default to no-ops so implementors only override what they
/// care about. Escalation on terminal failure (paging, chat alerts) belongs
/// in `on_task_failed`.
pub trait TaskListener: Send + Sync {
    fn on_task_queued(&self, _task: &Task) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_task_started(&self, _task: &Task) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_task_completed(&self, _task: &Task, _result: &TaskResult) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_task_failed(&self, _task: &Task, _error: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A lifecycle transition, carrying a snapshot of the task taken when it
/// happened.
#[derive(Debug, Clone, PartialEq)]
pub enum CoordinatorEvent {
    /// Submitted, or re-enqueued after a retryable failure.
    TaskQueued(Task),
    /// The executor signalled that work began.
    TaskStarted(Task),
    TaskCompleted(Task, TaskResult),
    /// Retry budget exhausted.
    TaskFailed(Task, String),
}

impl CoordinatorEvent {
    pub fn task(&self) -> &Task {
        match self {
            CoordinatorEvent::TaskQueued(task)
            | CoordinatorEvent::TaskStarted(task)
            | CoordinatorEvent::TaskCompleted(task, _)
            | CoordinatorEvent::TaskFailed(task, _) => task,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            CoordinatorEvent::TaskQueued(_) => "on_task_queued",
            CoordinatorEvent::TaskStarted(_) => "on_task_started",
            CoordinatorEvent::TaskCompleted(..) => "on_task_completed",
            CoordinatorEvent::TaskFailed(..) => "on_task_failed",
        }
    }
}

/// Deliver `event` to every listener. Returns how many listeners failed.
pub fn notify_all(listeners: &[Arc<dyn TaskListener>], event: &CoordinatorEvent) -> usize {
    let mut failures = 0;
    for (idx, listener) in listeners.iter().enumerate() {
        let outcome = catch_unwind(AssertUnwindSafe(|| deliver(listener.as_ref(), event)));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                failures += 1;
                tracing::warn!(
                    listener = idx,
                    callback = event.name(),
                    task_id = %event.task().task_id,
                    error = %e,
                    "listener failed"
                );
            }
            Err(_) => {
                failures += 1;
                tracing::warn!(
                    listener = idx,
                    callback = event.name(),
                    task_id = %event.task().task_id,
                    "listener panicked"
                );
            }
        }
    }
    failures
}

fn deliver(listener: &dyn TaskListener, event: &CoordinatorEvent) -> anyhow::Result<()> {
    match event {
        CoordinatorEvent::TaskQueued(task) => listener.on_task_queued(task),
        CoordinatorEvent::TaskStarted(task) => listener.on_task_started(task),
        CoordinatorEvent::TaskCompleted(task, result) => listener.on_task_completed(task, result),
        CoordinatorEvent::TaskFailed(task, error) => listener.on_task_failed(task, error),
    }
}

/// Forwards every event onto a channel.
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<CoordinatorEvent>,
}

impl ChannelListener {
    pub fn new(tx: mpsc::UnboundedSender<CoordinatorEvent>) -> Self {
        Self { tx }
    }

    /// Create a listener together with the receiving end of its channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<CoordinatorEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    fn forward(&self, event: CoordinatorEvent) -> anyhow::Result<()> {
        self.tx
            .send(event)
            .map_err(|_| anyhow::anyhow!("event receiver dropped"))
    }
}

impl TaskListener for ChannelListener {
    fn on_task_queued(&self, task: &Task) -> anyhow::Result<()> {
        self.forward(CoordinatorEvent::TaskQueued(task.clone()))
    }

    fn on_task_started(&self, task: &Task) -> anyhow::Result<()> {
        self.forward(CoordinatorEvent::TaskStarted(task.clone()))
    }

    fn on_task_completed(&self, task: &Task, result: &TaskResult) -> anyhow::Result<()> {
        self.forward(CoordinatorEvent::TaskCompleted(task.clone(), result.clone()))
    }

    fn on_task_failed(&self, task: &Task, error: &str) -> anyhow::Result<()> {
        self.forward(CoordinatorEvent::TaskFailed(task.clone(), error.to_string()))
    }
}
