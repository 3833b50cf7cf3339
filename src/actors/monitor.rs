//! Monitor actor.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::DEFAULT_MONITOR_INTERVAL_MS;
use crate::orchestration::WeakCoordinator;

use super::{tick_interval, ActorHandle};

/// Actor that periodically sweeps for timed-out tasks and stale peers.
pub struct MonitorActor {
    coordinator: WeakCoordinator,
    interval: Duration,
}

impl MonitorActor {
    pub fn new(coordinator: WeakCoordinator) -> Self {
        Self {
            coordinator,
            interval: Duration::from_millis(DEFAULT_MONITOR_INTERVAL_MS),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn spawn(self) -> ActorHandle {
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();

        tracing::debug!(interval_ms = self.interval.as_millis() as u64, "MonitorActor::spawn");

        let join = tokio::spawn(async move {
            let mut interval = tick_interval(self.interval);

            loop {
                tokio::select! {
                    _ = cancel_clone.cancelled() => {
                        tracing::debug!("MonitorActor cancelled");
                        break;
                    }
                    _ = interval.tick() => {
                        let Some(coordinator) = self.coordinator.upgrade() else {
                            tracing::debug!("MonitorActor: coordinator dropped");
                            break;
                        };
                        let failed = coordinator.run_monitor_tick().await;
                        if !failed.is_empty() {
                            tracing::debug!(failed = failed.len(), "MonitorActor tick");
                        }
                    }
                }
            }
        });

        ActorHandle::new(cancel, join)
    }
}
