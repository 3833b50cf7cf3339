//! taskmesh: a distributed task coordinator.
//!
//! Accepts units of work, orders them by priority, holds them back until
//! their dependencies complete, assigns them to the least-loaded of a set of
//! cooperating nodes, and supervises them for timeouts with a bounded retry
//! budget. The coordinator decides what runs where; executing a task and
//! reporting the outcome is the caller's job.

pub mod actors;
pub mod clock;
pub mod config;
pub mod core;
pub mod error;
pub mod log;
pub mod orchestration;

pub use crate::clock::{Clock, ManualClock, SystemClock};
pub use crate::config::CoordinatorConfig;
pub use crate::core::{Dependency, NodeId, Priority, Task, TaskAssignment, TaskId, TaskResult, TaskState};
pub use crate::error::{Error, Result};
pub use crate::orchestration::{
    ChannelListener, Coordinator, CoordinatorEvent, CoordinatorMetrics, Executor, SelectionStrategy,
    StaticUtilization, TaskListener, UtilizationProvider,
};
