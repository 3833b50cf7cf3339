//! Scheduler for queued tasks.
//!
//! One scheduling pass walks the queue in priority order, skips tasks whose
//! dependencies are not yet satisfied, and assigns the rest to nodes until
//! the coordinator's concurrency limit is reached. A skipped task stays
//! queued and is looked at again on the next pass, so a blocked task never
//! holds back the tasks behind it.

use chrono::{DateTime, Utc};

use crate::core::{NodeId, TaskAssignment};
use crate::orchestration::executor::ExecutorRegistry;
use crate::orchestration::registry::TaskRegistry;
use crate::orchestration::resolver::DependencyResolver;
use crate::orchestration::selector::{NodeSelector, UtilizationProvider};

/// Collaborators a scheduling pass reads from.
pub struct DispatchContext<'a> {
    /// The local node's ID.
    pub local: &'a NodeId,
    /// Local executors, consulted for capability and load.
    pub executors: &'a ExecutorRegistry,
    /// Peer load source.
    pub provider: &'a dyn UtilizationProvider,
}

/// Assigns queued tasks to nodes.
///
/// # Example
///
/// ```ignore
/// let scheduler = Scheduler::new(10);
/// let ctx = DispatchContext { local: &node_id, executors: &executors, provider: &provider };
/// let assignments = scheduler.dispatch(&mut registry, &mut selector, &ctx, clock.now());
/// ```
#[derive(Debug, Clone)]
pub struct Scheduler {
    /// Upper bound on tasks in `Assigned` or `Running`.
    max_concurrent: usize,
    resolver: DependencyResolver,
}

impl Scheduler {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent,
            resolver: DependencyResolver::new(),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Free slots given the tasks already holding a node.
    pub fn capacity(&self, registry: &TaskRegistry) -> usize {
        self.max_concurrent.saturating_sub(registry.active_count())
    }

    /// Run one scheduling pass.
    ///
    /// Returns the assignments made, in dispatch order. Tasks with
    /// unsatisfied dependencies or no eligible node stay queued.
    pub fn dispatch(
        &self,
        registry: &mut TaskRegistry,
        selector: &mut NodeSelector,
        ctx: &DispatchContext<'_>,
        now: DateTime<Utc>,
    ) -> Vec<TaskAssignment> {
        let mut capacity = self.capacity(registry);
        let mut assignments = Vec::new();
        if capacity == 0 {
            tracing::debug!(max_concurrent = self.max_concurrent, "no free capacity");
            return assignments;
        }

        for task_id in registry.queued_in_order() {
            if capacity == 0 {
                break;
            }
            let Some(task) = registry.get(&task_id) else {
                continue;
            };

            if !self.resolver.is_schedulable(task, registry) {
                tracing::debug!(
                    task_id = %task_id,
                    waiting_on = ?self.resolver.unsatisfied(task, registry),
                    "dependencies not satisfied"
                );
                continue;
            }

            let local = ctx
                .executors
                .local_utilization(&task.task_type)
                .map(|load| (ctx.local, load));
            let Some(node) = selector.select(local, ctx.provider) else {
                tracing::debug!(
                    task_id = %task_id,
                    task_type = %task.task_type,
                    "no eligible node"
                );
                continue;
            };

            match registry.assign(&task_id, node, now) {
                Ok(assignment) => {
                    tracing::debug!(
                        task_id = %task_id,
                        node = %assignment.node_id,
                        "task assigned"
                    );
                    assignments.push(assignment);
                    capacity -= 1;
                }
                Err(e) => {
                    tracing::warn!(task_id = %task_id, error = %e, "assignment rejected");
                }
            }
        }

        assignments
    }
}
