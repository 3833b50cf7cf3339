//! Task data model for the coordinator.
//!
//! Tasks are the units of work handed to nodes. Each task tracks its
//! lifecycle state, scheduling metadata (priority, dependencies, retry
//! budget, timeout) and, once it completes, its result.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::node::NodeId;
use crate::error::{Error, Result};

/// Default number of retries before a task is terminally failed.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default execution timeout, measured from the start signal.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Opaque identifier for a task.
///
/// Callers may supply their own identifiers (e.g. `"mirror-42"`) or
/// generate one with [`TaskId::new`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Create a new unique task identifier (UUID v4).
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 8 characters, for log lines.
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(8) {
            Some((idx, _)) => &self.0[..idx],
            None => &self.0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Lifecycle state of a task.
///
/// `Completed`, `Failed` and `Cancelled` are terminal. `Pending` and
/// `Retrying` are transient: submission immediately moves a task to
/// `Queued`, and a retry immediately re-enqueues it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Queued,
    Assigned,
    Running,
    Retrying,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub const ALL: [TaskState; 8] = [
        TaskState::Pending,
        TaskState::Queued,
        TaskState::Assigned,
        TaskState::Running,
        TaskState::Retrying,
        TaskState::Completed,
        TaskState::Failed,
        TaskState::Cancelled,
    ];

    /// Terminal states never change again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }

    /// States that hold a node assignment.
    pub fn is_active(self) -> bool {
        matches!(self, TaskState::Assigned | TaskState::Running)
    }

    /// Check whether `self -> next` is an edge of the task state machine.
    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Pending, Queued)
                | (Queued, Assigned)
                | (Assigned, Running)
                | (Assigned | Running, Completed)
                | (Pending | Queued | Assigned | Running, Retrying)
                | (Retrying, Queued)
                | (Pending | Queued | Assigned | Running | Retrying, Failed)
                | (Pending | Queued | Assigned, Cancelled)
        )
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskState::Pending => "pending",
            TaskState::Queued => "queued",
            TaskState::Assigned => "assigned",
            TaskState::Running => "running",
            TaskState::Retrying => "retrying",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Scheduling priority. `Critical` is the highest, `Deferred` the lowest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    High,
    #[default]
    Normal,
    Low,
    Deferred,
}

impl Priority {
    /// Queue rank: 0 is scheduled first.
    pub fn rank(self) -> u8 {
        match self {
            Priority::Critical => 0,
            Priority::High => 1,
            Priority::Normal => 2,
            Priority::Low => 3,
            Priority::Deferred => 4,
        }
    }
}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Priority {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other.rank().cmp(&self.rank())
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
            Priority::Deferred => "deferred",
        };
        write!(f, "{}", s)
    }
}

/// A reference from one task to another.
///
/// With `must_complete_before` set, the referenced task has to reach
/// `Completed` before the dependent task may be assigned. Without it, the
/// referenced task only has to exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub task_id: TaskId,
    #[serde(default = "default_true")]
    pub must_complete_before: bool,
}

fn default_true() -> bool {
    true
}

impl Dependency {
    pub fn blocking(task_id: impl Into<TaskId>) -> Self {
        Self {
            task_id: task_id.into(),
            must_complete_before: true,
        }
    }

    pub fn reference(task_id: impl Into<TaskId>) -> Self {
        Self {
            task_id: task_id.into(),
            must_complete_before: false,
        }
    }
}

/// Outcome reported by an executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskResult {
    pub fn success(task_id: impl Into<TaskId>, output: serde_json::Value) -> Self {
        Self {
            task_id: task_id.into(),
            success: true,
            output: Some(output),
            error: None,
            completed_at: None,
        }
    }

    pub fn failure(task_id: impl Into<TaskId>, error: &str) -> Self {
        Self {
            task_id: task_id.into(),
            success: false,
            output: None,
            error: Some(error.to_string()),
            completed_at: None,
        }
    }
}

/// A schedulable unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    #[serde(default)]
    pub task_id: TaskId,
    /// Capability tag matched against executors.
    pub task_type: String,
    #[serde(default = "default_state")]
    pub state: TaskState,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    /// Executor-interpreted payload.
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub assigned_node: Option<NodeId>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub assigned_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub result: Option<TaskResult>,
}

fn default_state() -> TaskState {
    TaskState::Pending
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl Task {
    /// Create a pending task of the given type with a generated ID.
    pub fn new(task_type: &str) -> Self {
        Self::with_id(TaskId::new(), task_type)
    }

    /// Create a pending task with a caller-chosen ID.
    pub fn with_id(task_id: impl Into<TaskId>, task_type: &str) -> Self {
        Self {
            task_id: task_id.into(),
            task_type: task_type.to_string(),
            state: TaskState::Pending,
            priority: Priority::Normal,
            dependencies: Vec::new(),
            payload: serde_json::Value::Null,
            assigned_node: None,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            timeout_seconds: DEFAULT_TIMEOUT_SECS,
            created_at: Utc::now(),
            assigned_at: None,
            started_at: None,
            finished_at: None,
            last_error: None,
            result: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_timeout_secs(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }

    /// Require `task_id` to complete before this task is assigned.
    pub fn depends_on(mut self, task_id: impl Into<TaskId>) -> Self {
        self.dependencies.push(Dependency::blocking(task_id));
        self
    }

    /// Reference `task_id` without waiting for it to complete.
    pub fn after(mut self, task_id: impl Into<TaskId>) -> Self {
        self.dependencies.push(Dependency::reference(task_id));
        self
    }

    /// Reset runtime fields for a fresh submission at `now`.
    pub(crate) fn prepare_for_submit(&mut self, now: DateTime<Utc>) {
        self.state = TaskState::Pending;
        self.assigned_node = None;
        self.retry_count = 0;
        self.created_at = now;
        self.assigned_at = None;
        self.started_at = None;
        self.finished_at = None;
        self.last_error = None;
        self.result = None;
    }

    fn transition(&mut self, next: TaskState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    fn release_node(&mut self) {
        self.assigned_node = None;
        self.assigned_at = None;
        self.started_at = None;
    }

    pub(crate) fn enqueue(&mut self) -> Result<()> {
        self.transition(TaskState::Queued)
    }

    pub(crate) fn assign(&mut self, node: NodeId, now: DateTime<Utc>) -> Result<()> {
        self.transition(TaskState::Assigned)?;
        self.assigned_node = Some(node);
        self.assigned_at = Some(now);
        Ok(())
    }

    pub(crate) fn start(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(TaskState::Running)?;
        self.started_at = Some(now);
        Ok(())
    }

    pub(crate) fn complete(&mut self, mut result: TaskResult, now: DateTime<Utc>) -> Result<()> {
        self.transition(TaskState::Completed)?;
        self.release_node();
        result.completed_at = Some(now);
        self.result = Some(result);
        self.finished_at = Some(now);
        Ok(())
    }

    /// Spend one unit of retry budget and put the task back in the queue.
    pub(crate) fn retry(&mut self, error: &str) -> Result<()> {
        if !self.has_retry_budget() {
            return Err(Error::Validation(format!(
                "Task {} has no retries left ({}/{})",
                self.task_id, self.retry_count, self.max_retries
            )));
        }
        self.transition(TaskState::Retrying)?;
        self.retry_count += 1;
        self.last_error = Some(error.to_string());
        self.release_node();
        self.transition(TaskState::Queued)
    }

    pub(crate) fn fail(&mut self, error: &str, now: DateTime<Utc>) -> Result<()> {
        self.transition(TaskState::Failed)?;
        self.release_node();
        self.last_error = Some(error.to_string());
        self.finished_at = Some(now);
        Ok(())
    }

    pub(crate) fn cancel(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(TaskState::Cancelled)?;
        self.release_node();
        self.finished_at = Some(now);
        Ok(())
    }

    pub fn has_retry_budget(&self) -> bool {
        self.retry_count < self.max_retries
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_terminal()
    }

    /// True when the task is running and has been for longer than its timeout.
    ///
    /// A timeout too large to represent as a duration never expires.
    pub fn is_timed_out(&self, now: DateTime<Utc>) -> bool {
        if self.state != TaskState::Running {
            return false;
        }
        let (Some(started), Some(window)) = (self.started_at, self.timeout_window()) else {
            return false;
        };
        now - started > window
    }

    fn timeout_window(&self) -> Option<ChronoDuration> {
        i64::try_from(self.timeout_seconds)
            .ok()
            .and_then(ChronoDuration::try_seconds)
    }
}
