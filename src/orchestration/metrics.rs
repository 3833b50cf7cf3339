//! Coordinator metrics, projected from the registry.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{NodeId, TaskState};
use crate::orchestration::registry::TaskRegistry;

/// Read-side snapshot of registry counters. Always recomputed, never
/// updated incrementally, so it cannot drift from the task records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorMetrics {
    pub total_tasks: usize,
    /// Tasks in `Assigned` or `Running`.
    pub active_tasks: usize,
    pub tasks_in_queue: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub cancelled_tasks: usize,
    pub retries: u64,
    pub assignments_per_node: BTreeMap<NodeId, u64>,
    pub last_updated: DateTime<Utc>,
}

impl CoordinatorMetrics {
    pub fn from_registry(registry: &TaskRegistry, now: DateTime<Utc>) -> Self {
        Self {
            total_tasks: registry.len(),
            active_tasks: registry.active_count(),
            tasks_in_queue: registry.queue_len(),
            completed_tasks: registry.count_by_state(TaskState::Completed),
            failed_tasks: registry.count_by_state(TaskState::Failed),
            cancelled_tasks: registry.count_by_state(TaskState::Cancelled),
            retries: registry.retries(),
            assignments_per_node: registry.assignments_per_node(),
            last_updated: now,
        }
    }

    /// Queued, active and terminal tasks together never exceed the total.
    pub fn is_consistent(&self) -> bool {
        self.completed_tasks + self.failed_tasks + self.cancelled_tasks + self.active_tasks
            + self.tasks_in_queue
            <= self.total_tasks
    }
}
