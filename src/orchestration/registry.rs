//! Task registry.
//!
//! The registry is the single owner of task records, the priority queue,
//! assignment records, the dependency graph and stored results. Every
//! state change goes through one of its methods, and each method either
//! applies the whole change or leaves the registry untouched.
//!
//! The registry itself is not synchronized; the coordinator keeps it behind
//! its one lock.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use crate::core::{DependencyGraph, NodeId, Task, TaskAssignment, TaskId, TaskResult, TaskState};
use crate::error::{Error, Result};

/// Queue ordering: priority rank first, then submission order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct QueueKey {
    rank: u8,
    sequence: u64,
    task_id: TaskId,
}

/// What failure handling did with a task.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureOutcome {
    /// Retry budget remained; the task is back in the queue.
    Requeued(Task),
    /// Retry budget exhausted; the task is terminally failed.
    Failed(Task),
}

impl FailureOutcome {
    pub fn task(&self) -> &Task {
        match self {
            FailureOutcome::Requeued(task) | FailureOutcome::Failed(task) => task,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, FailureOutcome::Failed(_))
    }
}

/// Canonical store of tasks and everything derived from them.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: HashMap<TaskId, Task>,
    /// Submission sequence number; kept across retries.
    sequence: HashMap<TaskId, u64>,
    next_sequence: u64,
    /// Exactly the tasks in `Queued`.
    queue: BTreeSet<QueueKey>,
    graph: DependencyGraph,
    /// At most one per task, present iff the task is `Assigned` or `Running`.
    current: HashMap<TaskId, TaskAssignment>,
    /// Released assignments, oldest first.
    history: HashMap<TaskId, Vec<TaskAssignment>>,
    assignment_counts: BTreeMap<NodeId, u64>,
    results: HashMap<TaskId, TaskResult>,
    retries: u64,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a new task and put it in the queue.
    ///
    /// Runtime fields on `task` are reset, so callers may resubmit a task
    /// snapshot under a fresh ID.
    ///
    /// # Errors
    /// - `Error::Validation` for an empty task ID or task type
    /// - `Error::DuplicateTask` if the ID is already registered
    /// - `Error::CyclicDependency` if the dependencies would close a cycle
    pub fn insert(&mut self, mut task: Task, now: DateTime<Utc>) -> Result<Task> {
        if task.task_id.is_empty() {
            return Err(Error::Validation("empty task id".to_string()));
        }
        if task.task_type.trim().is_empty() {
            return Err(Error::Validation(format!(
                "task {} has an empty task type",
                task.task_id
            )));
        }
        if self.tasks.contains_key(&task.task_id) {
            return Err(Error::DuplicateTask(task.task_id.clone()));
        }

        task.prepare_for_submit(now);
        task.enqueue()?;
        self.graph.insert(&task.task_id, &task.dependencies)?;

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.sequence.insert(task.task_id.clone(), sequence);
        self.queue.insert(QueueKey {
            rank: task.priority.rank(),
            sequence,
            task_id: task.task_id.clone(),
        });
        self.tasks.insert(task.task_id.clone(), task.clone());
        Ok(task)
    }

    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.tasks.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Snapshot of all tasks in `state`, in submission order.
    pub fn by_state(&self, state: TaskState) -> Vec<Task> {
        let mut tasks: Vec<&Task> = self.tasks.values().filter(|t| t.state == state).collect();
        tasks.sort_by_key(|t| self.sequence_of(&t.task_id));
        tasks.into_iter().cloned().collect()
    }

    /// Queued task IDs in dispatch order.
    pub fn queued_in_order(&self) -> Vec<TaskId> {
        self.queue.iter().map(|k| k.task_id.clone()).collect()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    fn sequence_of(&self, id: &TaskId) -> u64 {
        self.sequence.get(id).copied().unwrap_or(u64::MAX)
    }

    fn queue_key(&self, id: &TaskId) -> Result<QueueKey> {
        let task = self
            .tasks
            .get(id)
            .ok_or_else(|| Error::TaskNotFound(id.clone()))?;
        Ok(QueueKey {
            rank: task.priority.rank(),
            sequence: self.sequence_of(id),
            task_id: id.clone(),
        })
    }

    /// Move a queued task to `Assigned` on `node` and record the assignment.
    pub fn assign(&mut self, id: &TaskId, node: NodeId, now: DateTime<Utc>) -> Result<TaskAssignment> {
        let key = self.queue_key(id)?;
        if self.current.contains_key(id) {
            return Err(Error::Validation(format!(
                "task {} already has a current assignment",
                id
            )));
        }
        let task = self
            .tasks
            .get_mut(id)
            .ok_or_else(|| Error::TaskNotFound(id.clone()))?;
        task.assign(node.clone(), now)?;

        self.queue.remove(&key);
        let assignment = TaskAssignment::new(id.clone(), node.clone(), now);
        self.current.insert(id.clone(), assignment.clone());
        *self.assignment_counts.entry(node).or_default() += 1;
        Ok(assignment)
    }

    /// Record the executor's start signal.
    pub fn start(&mut self, id: &TaskId, now: DateTime<Utc>) -> Result<Task> {
        let task = self
            .tasks
            .get_mut(id)
            .ok_or_else(|| Error::TaskNotFound(id.clone()))?;
        task.start(now)?;
        Ok(task.clone())
    }

    /// Store a successful result and move the task to `Completed`.
    ///
    /// # Errors
    /// Rejects results for another task, unsuccessful results, and tasks
    /// that are not `Assigned` or `Running`.
    pub fn complete(&mut self, id: &TaskId, result: TaskResult, now: DateTime<Utc>) -> Result<Task> {
        if &result.task_id != id {
            return Err(Error::Validation(format!(
                "result for {} reported against {}",
                result.task_id, id
            )));
        }
        if !result.success {
            return Err(Error::Validation(format!(
                "result for {} is not a success",
                id
            )));
        }
        let task = self
            .tasks
            .get_mut(id)
            .ok_or_else(|| Error::TaskNotFound(id.clone()))?;
        task.complete(result, now)?;

        if let Some(stored) = &task.result {
            self.results.insert(id.clone(), stored.clone());
        }
        let snapshot = task.clone();
        self.release(id, TaskState::Completed, now);
        Ok(snapshot)
    }

    /// Apply failure handling to a non-terminal task.
    ///
    /// With retry budget left the task goes through `Retrying` back to
    /// `Queued`, keeping its submission sequence number. Otherwise it
    /// becomes `Failed`.
    pub fn fail(&mut self, id: &TaskId, error: &str, now: DateTime<Utc>) -> Result<FailureOutcome> {
        let key = self.queue_key(id)?;
        let task = self
            .tasks
            .get_mut(id)
            .ok_or_else(|| Error::TaskNotFound(id.clone()))?;
        if task.state.is_terminal() {
            return Err(Error::InvalidTransition {
                from: task.state,
                to: TaskState::Failed,
            });
        }

        if task.has_retry_budget() {
            task.retry(error)?;
            let snapshot = task.clone();
            self.queue.insert(key);
            self.retries += 1;
            self.release(id, TaskState::Retrying, now);
            Ok(FailureOutcome::Requeued(snapshot))
        } else {
            task.fail(error, now)?;
            let snapshot = task.clone();
            self.queue.remove(&key);
            self.release(id, TaskState::Failed, now);
            Ok(FailureOutcome::Failed(snapshot))
        }
    }

    /// Cancel a task that has not started running.
    pub fn cancel(&mut self, id: &TaskId, now: DateTime<Utc>) -> Result<Task> {
        let key = self.queue_key(id)?;
        let task = self
            .tasks
            .get_mut(id)
            .ok_or_else(|| Error::TaskNotFound(id.clone()))?;
        task.cancel(now)?;
        let snapshot = task.clone();
        self.queue.remove(&key);
        self.release(id, TaskState::Cancelled, now);
        Ok(snapshot)
    }

    fn release(&mut self, id: &TaskId, outcome: TaskState, now: DateTime<Utc>) {
        if let Some(mut assignment) = self.current.remove(id) {
            assignment.release(outcome, now);
            self.history.entry(id.clone()).or_default().push(assignment);
        }
    }

    /// Running tasks past their timeout, in submission order.
    pub fn timed_out(&self, now: DateTime<Utc>) -> Vec<TaskId> {
        let mut ids: Vec<&TaskId> = self
            .tasks
            .values()
            .filter(|t| t.is_timed_out(now))
            .map(|t| &t.task_id)
            .collect();
        ids.sort_by_key(|id| self.sequence_of(id));
        ids.into_iter().cloned().collect()
    }

    /// Assigned tasks that have waited longer than `window` for a start signal.
    pub fn stale_assignments(&self, now: DateTime<Utc>, window: std::time::Duration) -> Vec<TaskId> {
        let window = ChronoDuration::from_std(window).unwrap_or(ChronoDuration::MAX);
        let mut ids: Vec<&TaskId> = self
            .tasks
            .values()
            .filter(|t| t.state == TaskState::Assigned)
            .filter(|t| t.assigned_at.is_some_and(|at| now - at > window))
            .map(|t| &t.task_id)
            .collect();
        ids.sort_by_key(|id| self.sequence_of(id));
        ids.into_iter().cloned().collect()
    }

    /// Tasks holding a node (`Assigned` or `Running`).
    pub fn active_count(&self) -> usize {
        self.current.len()
    }

    pub fn count_by_state(&self, state: TaskState) -> usize {
        self.tasks.values().filter(|t| t.state == state).count()
    }

    /// Retries performed over the registry's lifetime.
    pub fn retries(&self) -> u64 {
        self.retries
    }

    /// Assignments made to each node over the registry's lifetime.
    pub fn assignments_per_node(&self) -> BTreeMap<NodeId, u64> {
        self.assignment_counts.clone()
    }

    pub fn current_assignment(&self, id: &TaskId) -> Option<&TaskAssignment> {
        self.current.get(id)
    }

    /// Every assignment of `id`, oldest first, including the current one.
    pub fn history_for(&self, id: &TaskId) -> Vec<TaskAssignment> {
        let mut all = self.history.get(id).cloned().unwrap_or_default();
        if let Some(current) = self.current.get(id) {
            all.push(current.clone());
        }
        all
    }

    pub fn get_result(&self, id: &TaskId) -> Option<&TaskResult> {
        self.results.get(id)
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }
}
