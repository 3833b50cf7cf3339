//! The task coordinator.
//!
//! `Coordinator` is a cheaply cloneable handle. All shared state (registry,
//! queue, peers, executors, listeners) sits behind one async mutex, and every
//! mutating operation applies its change in a single synchronous critical
//! section. Listeners are called after the lock is released, with task
//! snapshots taken inside the critical section.
//!
//! Public operations report failure through `bool`/`Option` and log the
//! reason; one bad call never disturbs unrelated tasks. Task operations are
//! rejected until [`Coordinator::start`] has been called and again after
//! [`Coordinator::stop`], while executors, listeners and peers may be
//! configured at any time.
//!
//! # Example
//!
//! ```ignore
//! let coordinator = Coordinator::new(CoordinatorConfig::default())?;
//! coordinator.start(Some("mirror-1")).await;
//! coordinator.submit_task(Task::new("download")).await;
//! // ... an executor loop calls start_task / complete_task / fail_task ...
//! coordinator.stop().await;
//! ```

use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::actors::{ActorHandle, MonitorActor, SchedulingActor};
use crate::clock::{Clock, SystemClock};
use crate::config::CoordinatorConfig;
use crate::core::{NodeId, Task, TaskAssignment, TaskId, TaskResult, TaskState};
use crate::error::{Error, Result};
use crate::orchestration::executor::{Executor, ExecutorRegistry};
use crate::orchestration::listener::{notify_all, CoordinatorEvent, TaskListener};
use crate::orchestration::metrics::CoordinatorMetrics;
use crate::orchestration::monitor::{ExecutionMonitor, MonitorConfig};
use crate::orchestration::registry::{FailureOutcome, TaskRegistry};
use crate::orchestration::scheduler::{DispatchContext, Scheduler};
use crate::orchestration::selector::{NodeSelector, PeerInfo, StaticUtilization, UtilizationProvider};

/// Error text used when an executor reports failure without a message.
const UNSPECIFIED_FAILURE: &str = "executor reported failure";

/// Builder for [`Coordinator`].
pub struct CoordinatorBuilder {
    config: CoordinatorConfig,
    clock: Arc<dyn Clock>,
    utilization: Arc<dyn UtilizationProvider>,
    background_loops: bool,
}

impl CoordinatorBuilder {
    pub fn new(config: CoordinatorConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
            utilization: Arc::new(StaticUtilization::new()),
            background_loops: true,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Source of peer utilization for least-loaded selection.
    pub fn with_utilization_provider(mut self, provider: Arc<dyn UtilizationProvider>) -> Self {
        self.utilization = provider;
        self
    }

    /// Whether `start` spawns the scheduling and monitor loops. Without them
    /// the caller drives ticks through `run_scheduling_tick` and
    /// `run_monitor_tick`.
    pub fn with_background_loops(mut self, enabled: bool) -> Self {
        self.background_loops = enabled;
        self
    }

    pub fn build(self) -> Result<Coordinator> {
        self.config.validate()?;
        let state = CoordinatorState {
            running: false,
            node_id: None,
            registry: TaskRegistry::new(),
            selector: NodeSelector::new(self.config.strategy),
            executors: ExecutorRegistry::new(),
            listeners: Vec::new(),
            actors: Vec::new(),
        };
        Ok(Coordinator {
            inner: Arc::new(Inner {
                scheduler: Scheduler::new(self.config.max_concurrent_tasks),
                monitor: ExecutionMonitor::new(MonitorConfig::from_coordinator(&self.config)),
                config: self.config,
                clock: self.clock,
                utilization: self.utilization,
                background_loops: self.background_loops,
                state: Mutex::new(state),
            }),
        })
    }
}

struct Inner {
    config: CoordinatorConfig,
    clock: Arc<dyn Clock>,
    utilization: Arc<dyn UtilizationProvider>,
    scheduler: Scheduler,
    monitor: ExecutionMonitor,
    background_loops: bool,
    state: Mutex<CoordinatorState>,
}

struct CoordinatorState {
    running: bool,
    node_id: Option<NodeId>,
    registry: TaskRegistry,
    selector: NodeSelector,
    executors: ExecutorRegistry,
    listeners: Vec<Arc<dyn TaskListener>>,
    actors: Vec<ActorHandle>,
}

impl CoordinatorState {
    fn local_node(&self) -> Result<&NodeId> {
        match (&self.node_id, self.running) {
            (Some(node), true) => Ok(node),
            _ => Err(Error::NotRunning),
        }
    }
}

/// Handle to a coordinator instance.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

/// Non-owning handle held by background loops.
#[derive(Clone)]
pub struct WeakCoordinator {
    inner: Weak<Inner>,
}

impl WeakCoordinator {
    /// `None` once every strong handle has been dropped.
    pub fn upgrade(&self) -> Option<Coordinator> {
        self.inner.upgrade().map(|inner| Coordinator { inner })
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("strategy", &self.inner.config.strategy)
            .field("max_concurrent_tasks", &self.inner.config.max_concurrent_tasks)
            .finish_non_exhaustive()
    }
}

impl Coordinator {
    /// Build a coordinator with the system clock and background loops.
    pub fn new(config: CoordinatorConfig) -> Result<Self> {
        CoordinatorBuilder::new(config).build()
    }

    pub fn builder(config: CoordinatorConfig) -> CoordinatorBuilder {
        CoordinatorBuilder::new(config)
    }

    pub fn downgrade(&self) -> WeakCoordinator {
        WeakCoordinator {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    /// Run `op` under the lock, then deliver the events it produced.
    async fn mutate<R>(
        &self,
        op: &'static str,
        f: impl FnOnce(&mut CoordinatorState, DateTime<Utc>) -> Result<(R, Vec<CoordinatorEvent>)>,
    ) -> Result<R> {
        let (value, events, listeners) = {
            let mut state = self.inner.state.lock().await;
            if !state.running {
                return Err(Error::NotRunning);
            }
            let now = self.inner.clock.now();
            let (value, events) = f(&mut *state, now)?;
            let listeners = if events.is_empty() {
                Vec::new()
            } else {
                state.listeners.clone()
            };
            (value, events, listeners)
        };

        for event in &events {
            let failures = notify_all(&listeners, event);
            if failures > 0 {
                tracing::debug!(op, failures, "listeners failed");
            }
        }
        Ok(value)
    }

    fn rejected(op: &'static str, error: &Error) {
        tracing::warn!(op, error = %error, "operation rejected");
    }

    // Lifecycle

    /// Start the coordinator as `node_id`, or as the configured or a
    /// generated node ID.
    ///
    /// Returns false if already running, if the node ID is empty, or if it
    /// collides with a registered peer.
    pub async fn start(&self, node_id: Option<&str>) -> bool {
        let mut state = self.inner.state.lock().await;
        if state.running {
            tracing::warn!("coordinator already running");
            return false;
        }

        let node = node_id
            .map(NodeId::from)
            .or_else(|| self.inner.config.node_id.clone().map(NodeId::from))
            .unwrap_or_else(NodeId::generate);
        if node.is_empty() {
            Self::rejected("start", &Error::InvalidNode("empty node id".to_string()));
            return false;
        }
        if state.selector.has_peer(&node) {
            Self::rejected(
                "start",
                &Error::InvalidNode(format!("{} is registered as a peer", node)),
            );
            return false;
        }

        let now = self.inner.clock.now();
        for peer in &self.inner.config.peers {
            let peer = NodeId::from(peer.as_str());
            if peer == node || state.selector.has_peer(&peer) {
                continue;
            }
            if let Err(e) = state.selector.register_peer(peer, now) {
                Self::rejected("start", &e);
            }
        }

        state.running = true;
        state.node_id = Some(node.clone());

        if self.inner.background_loops {
            let scheduling = SchedulingActor::new(self.downgrade())
                .with_interval(self.inner.config.schedule_interval())
                .spawn();
            let monitor = MonitorActor::new(self.downgrade())
                .with_interval(self.inner.config.monitor_interval())
                .spawn();
            state.actors = vec![scheduling, monitor];
        }

        tracing::info!(
            node = %node,
            strategy = %self.inner.config.strategy,
            peers = state.selector.peers().len(),
            "coordinator started"
        );
        true
    }

    /// Stop accepting work and shut down the background loops.
    ///
    /// Task state is kept; a later `start` resumes with it.
    pub async fn stop(&self) -> bool {
        let actors = {
            let mut state = self.inner.state.lock().await;
            if !state.running {
                return false;
            }
            state.running = false;
            std::mem::take(&mut state.actors)
        };

        for actor in actors {
            actor.shutdown().await;
        }
        tracing::info!("coordinator stopped");
        true
    }

    pub async fn is_running(&self) -> bool {
        self.inner.state.lock().await.running
    }

    /// The local node ID, once started.
    pub async fn node_id(&self) -> Option<NodeId> {
        self.inner.state.lock().await.node_id.clone()
    }

    // Tasks

    /// Admit a task into the queue.
    pub async fn submit_task(&self, task: Task) -> bool {
        let result = self
            .mutate("submit_task", |state, now| {
                let task = state.registry.insert(task, now)?;
                tracing::info!(
                    task_id = %task.task_id,
                    task_type = %task.task_type,
                    priority = %task.priority,
                    "task submitted"
                );
                Ok(((), vec![CoordinatorEvent::TaskQueued(task)]))
            })
            .await;
        match result {
            Ok(()) => true,
            Err(e) => {
                Self::rejected("submit_task", &e);
                false
            }
        }
    }

    /// Submit each task in turn. Not atomic: accepted tasks stay accepted
    /// when a later one is rejected. True only if every task was accepted.
    pub async fn submit_batch(&self, tasks: Vec<Task>) -> bool {
        let mut all_accepted = true;
        for task in tasks {
            all_accepted &= self.submit_task(task).await;
        }
        all_accepted
    }

    /// Cancel a task that is pending, queued or assigned.
    pub async fn cancel_task(&self, task_id: &TaskId) -> bool {
        let result = self
            .mutate("cancel_task", |state, now| {
                let task = state.registry.cancel(task_id, now)?;
                tracing::info!(task_id = %task.task_id, "task cancelled");
                Ok(((), Vec::new()))
            })
            .await;
        result
            .inspect_err(|e| Self::rejected("cancel_task", e))
            .is_ok()
    }

    /// Executor signal that an assigned task began running.
    pub async fn start_task(&self, task_id: &TaskId) -> bool {
        let result = self
            .mutate("start_task", |state, now| {
                let task = state.registry.start(task_id, now)?;
                tracing::debug!(task_id = %task.task_id, "task started");
                Ok(((), vec![CoordinatorEvent::TaskStarted(task)]))
            })
            .await;
        result
            .inspect_err(|e| Self::rejected("start_task", e))
            .is_ok()
    }

    /// Report the outcome of an assigned or running task.
    ///
    /// A successful result completes the task. An unsuccessful one is
    /// handled like [`Coordinator::fail_task`] with the result's error.
    pub async fn complete_task(&self, task_id: &TaskId, result: TaskResult) -> bool {
        let outcome = self
            .mutate("complete_task", |state, now| {
                if &result.task_id != task_id {
                    return Err(Error::Validation(format!(
                        "result for {} reported against {}",
                        result.task_id, task_id
                    )));
                }
                let current = state
                    .registry
                    .get(task_id)
                    .ok_or_else(|| Error::TaskNotFound(task_id.clone()))?
                    .state;
                if !current.is_active() {
                    return Err(Error::InvalidTransition {
                        from: current,
                        to: TaskState::Completed,
                    });
                }

                if !result.success {
                    let error = result
                        .error
                        .unwrap_or_else(|| UNSPECIFIED_FAILURE.to_string());
                    let outcome = state.registry.fail(task_id, &error, now)?;
                    return Ok(((), failure_events(outcome, &error)));
                }

                let task = state.registry.complete(task_id, result, now)?;
                tracing::info!(task_id = %task.task_id, "task completed");
                let events = match task.result.clone() {
                    Some(stored) => vec![CoordinatorEvent::TaskCompleted(task, stored)],
                    None => Vec::new(),
                };
                Ok(((), events))
            })
            .await;
        outcome
            .inspect_err(|e| Self::rejected("complete_task", e))
            .is_ok()
    }

    /// Report that a task failed. Retries while budget remains, then fails
    /// the task terminally.
    pub async fn fail_task(&self, task_id: &TaskId, error: &str) -> bool {
        let result = self
            .mutate("fail_task", |state, now| {
                let outcome = state.registry.fail(task_id, error, now)?;
                Ok(((), failure_events(outcome, error)))
            })
            .await;
        result
            .inspect_err(|e| Self::rejected("fail_task", e))
            .is_ok()
    }

    pub async fn get_task(&self, task_id: &TaskId) -> Option<Task> {
        self.inner.state.lock().await.registry.get(task_id).cloned()
    }

    /// Tasks in `state`, in submission order.
    pub async fn get_tasks_by_state(&self, state: TaskState) -> Vec<Task> {
        self.inner.state.lock().await.registry.by_state(state)
    }

    /// The task's current assignment, if it holds one.
    pub async fn get_assignment(&self, task_id: &TaskId) -> Option<TaskAssignment> {
        self.inner
            .state
            .lock()
            .await
            .registry
            .current_assignment(task_id)
            .cloned()
    }

    /// Every assignment the task has had, oldest first.
    pub async fn assignment_history(&self, task_id: &TaskId) -> Vec<TaskAssignment> {
        self.inner.state.lock().await.registry.history_for(task_id)
    }

    pub async fn get_result(&self, task_id: &TaskId) -> Option<TaskResult> {
        self.inner
            .state
            .lock()
            .await
            .registry
            .get_result(task_id)
            .cloned()
    }

    /// Topological order of every task ID known to the dependency graph,
    /// including referenced IDs that were never submitted.
    pub async fn dependency_order(&self) -> Result<Vec<TaskId>> {
        self.inner.state.lock().await.registry.graph().topological_order()
    }

    // Executors, peers, listeners

    /// Register a local executor for `task_type`. False if the executor does
    /// not support that type.
    pub async fn add_executor(&self, task_type: &str, executor: Arc<dyn Executor>) -> bool {
        let mut state = self.inner.state.lock().await;
        match state.executors.register(task_type, executor) {
            Ok(()) => {
                tracing::debug!(task_type, "executor registered");
                true
            }
            Err(e) => {
                Self::rejected("add_executor", &e);
                false
            }
        }
    }

    /// The least-utilized local executor for `task_type`.
    pub async fn executor_for(&self, task_type: &str) -> Option<Arc<dyn Executor>> {
        self.inner.state.lock().await.executors.executor_for(task_type)
    }

    /// Add a peer to the candidate set. False for empty IDs, the local node
    /// ID, or a peer that is already registered.
    pub async fn register_peer(&self, peer_id: &str) -> bool {
        let mut state = self.inner.state.lock().await;
        let peer = NodeId::from(peer_id);
        if state.node_id.as_ref() == Some(&peer) {
            Self::rejected(
                "register_peer",
                &Error::InvalidNode(format!("{} is the local node", peer)),
            );
            return false;
        }
        let now = self.inner.clock.now();
        match state.selector.register_peer(peer.clone(), now) {
            Ok(()) => {
                tracing::info!(peer = %peer, "peer registered");
                true
            }
            Err(e) => {
                Self::rejected("register_peer", &e);
                false
            }
        }
    }

    /// Record that a peer is alive, making it selectable again if it had
    /// gone stale.
    pub async fn peer_heartbeat(&self, peer_id: &str) -> bool {
        let mut state = self.inner.state.lock().await;
        let now = self.inner.clock.now();
        state
            .selector
            .heartbeat(&NodeId::from(peer_id), now)
            .inspect_err(|e| Self::rejected("peer_heartbeat", e))
            .is_ok()
    }

    /// Deregister a peer. Tasks already assigned to it keep their
    /// assignment until they complete, fail or time out.
    pub async fn remove_peer(&self, peer_id: &str) -> bool {
        let removed = self
            .inner
            .state
            .lock()
            .await
            .selector
            .remove_peer(&NodeId::from(peer_id));
        if removed {
            tracing::info!(peer = peer_id, "peer removed");
        }
        removed
    }

    pub async fn peers(&self) -> Vec<PeerInfo> {
        self.inner.state.lock().await.selector.peers()
    }

    pub async fn add_listener(&self, listener: Arc<dyn TaskListener>) -> bool {
        self.inner.state.lock().await.listeners.push(listener);
        true
    }

    pub async fn get_metrics(&self) -> CoordinatorMetrics {
        let state = self.inner.state.lock().await;
        CoordinatorMetrics::from_registry(&state.registry, self.inner.clock.now())
    }

    // Ticks

    /// Run one scheduling pass. Returns the assignments made; empty when
    /// the coordinator is stopped.
    pub async fn run_scheduling_tick(&self) -> Vec<TaskAssignment> {
        let inner = &self.inner;
        let result = self
            .mutate("scheduling_tick", |state, now| {
                let node = state.local_node()?.clone();
                let ctx = DispatchContext {
                    local: &node,
                    executors: &state.executors,
                    provider: inner.utilization.as_ref(),
                };
                let assignments =
                    inner
                        .scheduler
                        .dispatch(&mut state.registry, &mut state.selector, &ctx, now);
                Ok((assignments, Vec::new()))
            })
            .await;
        match result {
            Ok(assignments) => {
                if !assignments.is_empty() {
                    tracing::debug!(assigned = assignments.len(), "scheduling tick");
                }
                assignments
            }
            Err(e) => {
                tracing::debug!(error = %e, "scheduling tick skipped");
                Vec::new()
            }
        }
    }

    /// Run one monitor pass. Returns the tasks it failed; empty when the
    /// coordinator is stopped.
    pub async fn run_monitor_tick(&self) -> Vec<TaskId> {
        let inner = &self.inner;
        let result = self
            .mutate("monitor_tick", |state, now| {
                let report = inner
                    .monitor
                    .sweep(&mut state.registry, &mut state.selector, now);
                let failed = report.failed_ids();
                let events = report
                    .failures
                    .into_iter()
                    .flat_map(|outcome| {
                        let reason = outcome.task().last_error.clone().unwrap_or_default();
                        failure_events(outcome, &reason)
                    })
                    .collect();
                Ok((failed, events))
            })
            .await;
        result.unwrap_or_else(|e| {
            tracing::debug!(error = %e, "monitor tick skipped");
            Vec::new()
        })
    }
}

/// Listener events for a failure-handling outcome.
fn failure_events(outcome: FailureOutcome, error: &str) -> Vec<CoordinatorEvent> {
    match outcome {
        FailureOutcome::Requeued(task) => {
            tracing::info!(
                task_id = %task.task_id,
                retry_count = task.retry_count,
                max_retries = task.max_retries,
                error,
                "task requeued for retry"
            );
            vec![CoordinatorEvent::TaskQueued(task)]
        }
        FailureOutcome::Failed(task) => {
            tracing::warn!(
                task_id = %task.task_id,
                retry_count = task.retry_count,
                error,
                "task failed"
            );
            vec![CoordinatorEvent::TaskFailed(task, error.to_string())]
        }
    }
}
