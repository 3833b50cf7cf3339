//! Dependency resolution.
//!
//! Decides whether a queued task's prerequisites allow it to be assigned.
//! Unknown prerequisites fail closed: a task that references an ID the
//! registry has never seen stays queued until that ID is submitted.

use crate::core::{Dependency, Task, TaskId, TaskState};
use crate::orchestration::registry::TaskRegistry;

/// Stateless predicate over the registry.
#[derive(Debug, Clone, Copy, Default)]
pub struct DependencyResolver;

impl DependencyResolver {
    pub fn new() -> Self {
        Self
    }

    /// True when every dependency of `task` is satisfied.
    pub fn is_schedulable(&self, task: &Task, registry: &TaskRegistry) -> bool {
        task.dependencies
            .iter()
            .all(|dep| Self::is_satisfied(dep, registry))
    }

    /// The prerequisites still holding `task` back, in declaration order.
    pub fn unsatisfied(&self, task: &Task, registry: &TaskRegistry) -> Vec<TaskId> {
        task.dependencies
            .iter()
            .filter(|dep| !Self::is_satisfied(dep, registry))
            .map(|dep| dep.task_id.clone())
            .collect()
    }

    fn is_satisfied(dep: &Dependency, registry: &TaskRegistry) -> bool {
        match registry.get(&dep.task_id) {
            None => false,
            Some(prereq) if dep.must_complete_before => prereq.state == TaskState::Completed,
            Some(_) => true,
        }
    }
}
