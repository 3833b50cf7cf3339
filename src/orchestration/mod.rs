//! Orchestration layer for the task coordinator.
//!
//! Leaves first: the registry owns task state, the resolver and selector
//! answer "may it run" and "where", the scheduler and monitor drive state
//! forward on each tick, and the coordinator wraps all of it behind one lock.

pub mod coordinator;
pub mod executor;
pub mod listener;
pub mod metrics;
pub mod monitor;
pub mod registry;
pub mod resolver;
pub mod scheduler;
pub mod selector;

pub use coordinator::{Coordinator, CoordinatorBuilder, WeakCoordinator};
pub use executor::{Executor, ExecutorRegistry};
pub use listener::{ChannelListener, CoordinatorEvent, TaskListener};
pub use metrics::CoordinatorMetrics;
pub use monitor::{ExecutionMonitor, MonitorConfig, MonitorReport, ASSIGNMENT_TIMEOUT_REASON, TIMEOUT_REASON};
pub use registry::{FailureOutcome, TaskRegistry};
pub use resolver::DependencyResolver;
pub use scheduler::{DispatchContext, Scheduler};
pub use selector::{NodeSelector, PeerInfo, SelectionStrategy, StaticUtilization, UtilizationProvider};
