//! Assignment records binding a task to a node.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::node::NodeId;
use crate::core::task::{TaskId, TaskState};

/// One placement of a task on a node.
///
/// A task has at most one current assignment. When the task leaves
/// `Assigned`/`Running` the assignment is released and `outcome` records
/// the state the task moved to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAssignment {
    pub assignment_id: Uuid,
    pub task_id: TaskId,
    pub node_id: NodeId,
    pub assigned_at: DateTime<Utc>,
    pub released_at: Option<DateTime<Utc>>,
    pub outcome: Option<TaskState>,
}

impl TaskAssignment {
    pub fn new(task_id: TaskId, node_id: NodeId, assigned_at: DateTime<Utc>) -> Self {
        Self {
            assignment_id: Uuid::new_v4(),
            task_id,
            node_id,
            assigned_at,
            released_at: None,
            outcome: None,
        }
    }

    pub(crate) fn release(&mut self, outcome: TaskState, at: DateTime<Utc>) {
        self.released_at = Some(at);
        self.outcome = Some(outcome);
    }

    pub fn is_current(&self) -> bool {
        self.released_at.is_none()
    }
}
