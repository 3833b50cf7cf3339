//! Core domain models for the coordinator.
//!
//! Tasks, node identities, assignment records and the dependency graph.

pub mod assignment;
pub mod dag;
pub mod node;
pub mod task;

pub use assignment::TaskAssignment;
pub use dag::{DependencyGraph, DependencyKind};
pub use node::NodeId;
pub use task::{Dependency, Priority, Task, TaskId, TaskResult, TaskState};
