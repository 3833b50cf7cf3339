//! Background loops driving the coordinator.
//!
//! Each actor is an independent tokio task that wakes on a fixed period and
//! runs one tick against the coordinator:
//! - Scheduling (SchedulingActor): assigns queued tasks to nodes
//! - Monitoring (MonitorActor): fails overrun tasks, marks stale peers
//!
//! Actors hold a weak coordinator handle and exit on their own once every
//! strong handle is gone. A tick always runs to completion; cancellation is
//! only observed between ticks.

pub mod monitor;
pub mod scheduling;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use monitor::MonitorActor;
pub use scheduling::SchedulingActor;

/// Handle to a running actor, used for graceful shutdown.
pub struct ActorHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl ActorHandle {
    pub fn new(cancel: CancellationToken, join: JoinHandle<()>) -> Self {
        Self { cancel, join }
    }

    /// Signal the actor to stop and wait for its current tick to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.join.await {
            tracing::warn!(error = %e, "actor terminated abnormally");
        }
    }

    /// Check if shutdown has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

/// Interval whose first tick is one full period after creation.
pub(crate) fn tick_interval(period: std::time::Duration) -> tokio::time::Interval {
    let start = tokio::time::Instant::now() + period;
    let mut interval = tokio::time::interval_at(start, period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval
}
