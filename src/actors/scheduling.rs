//! Scheduling actor.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::DEFAULT_SCHEDULE_INTERVAL_MS;
use crate::orchestration::WeakCoordinator;

use super::{tick_interval, ActorHandle};

/// Actor that periodically runs a scheduling pass.
pub struct SchedulingActor {
    coordinator: WeakCoordinator,
    interval: Duration,
}

impl SchedulingActor {
    pub fn new(coordinator: WeakCoordinator) -> Self {
        Self {
            coordinator,
            interval: Duration::from_millis(DEFAULT_SCHEDULE_INTERVAL_MS),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn spawn(self) -> ActorHandle {
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();

        tracing::debug!(interval_ms = self.interval.as_millis() as u64, "SchedulingActor::spawn");

        let join = tokio::spawn(async move {
            let mut interval = tick_interval(self.interval);

            loop {
                tokio::select! {
                    _ = cancel_clone.cancelled() => {
                        tracing::debug!("SchedulingActor cancelled");
                        break;
                    }
                    _ = interval.tick() => {
                        let Some(coordinator) = self.coordinator.upgrade() else {
                            tracing::debug!("SchedulingActor: coordinator dropped");
                            break;
                        };
                        let assigned = coordinator.run_scheduling_tick().await;
                        tracing::trace!(assigned = assigned.len(), "SchedulingActor tick");
                    }
                }
            }
        });

        ActorHandle::new(cancel, join)
    }
}
