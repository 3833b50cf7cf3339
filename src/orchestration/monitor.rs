//! Execution monitor.
//!
//! Polls the registry for work that has overrun its time budget and pushes
//! it through failure handling. Timeouts are declared, not enforced: the
//! monitor never touches the executor doing the work.
//!
//! Each sweep checks:
//! - running tasks against their own `timeout_seconds`, measured from the
//!   start signal
//! - assigned tasks that never got a start signal, when an assignment
//!   timeout is configured
//! - peers that stopped heart-beating, when a liveness window is configured

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::CoordinatorConfig;
use crate::core::{NodeId, TaskId};
use crate::orchestration::registry::{FailureOutcome, TaskRegistry};
use crate::orchestration::selector::NodeSelector;

/// Failure reason for running tasks past their timeout.
pub const TIMEOUT_REASON: &str = "Timeout";

/// Failure reason for assigned tasks that never started.
pub const ASSIGNMENT_TIMEOUT_REASON: &str = "AssignmentTimeout";

/// Thresholds for the monitor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MonitorConfig {
    /// How long an `Assigned` task may wait for its start signal.
    pub assignment_timeout: Option<Duration>,
    /// How long a peer may go without a heartbeat before it is skipped.
    pub peer_liveness: Option<Duration>,
}

impl MonitorConfig {
    pub fn from_coordinator(config: &CoordinatorConfig) -> Self {
        Self {
            assignment_timeout: config.assignment_timeout_secs.map(Duration::from_secs),
            peer_liveness: config.peer_liveness_secs.map(Duration::from_secs),
        }
    }
}

/// What one sweep did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MonitorReport {
    /// Failure-handling outcome for every task the sweep failed.
    pub failures: Vec<FailureOutcome>,
    /// Peers that went stale during this sweep.
    pub stale_peers: Vec<NodeId>,
}

impl MonitorReport {
    pub fn failed_ids(&self) -> Vec<TaskId> {
        self.failures
            .iter()
            .map(|outcome| outcome.task().task_id.clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty() && self.stale_peers.is_empty()
    }
}

/// Detects overrun work and stale peers.
#[derive(Debug, Clone, Default)]
pub struct ExecutionMonitor {
    config: MonitorConfig,
}

impl ExecutionMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Run one monitoring pass.
    pub fn sweep(
        &self,
        registry: &mut TaskRegistry,
        selector: &mut NodeSelector,
        now: DateTime<Utc>,
    ) -> MonitorReport {
        let mut report = MonitorReport::default();

        for task_id in registry.timed_out(now) {
            self.fail(registry, &task_id, TIMEOUT_REASON, now, &mut report);
        }

        if let Some(window) = self.config.assignment_timeout {
            for task_id in registry.stale_assignments(now, window) {
                self.fail(registry, &task_id, ASSIGNMENT_TIMEOUT_REASON, now, &mut report);
            }
        }

        if let Some(window) = self.config.peer_liveness {
            report.stale_peers = selector.sweep_stale(now, window);
            for peer in &report.stale_peers {
                tracing::warn!(peer = %peer, window_secs = window.as_secs(), "peer is stale");
            }
        }

        report
    }

    fn fail(
        &self,
        registry: &mut TaskRegistry,
        task_id: &TaskId,
        reason: &str,
        now: DateTime<Utc>,
        report: &mut MonitorReport,
    ) {
        match registry.fail(task_id, reason, now) {
            Ok(outcome) => {
                let task = outcome.task();
                tracing::warn!(
                    task_id = %task_id,
                    reason,
                    retry_count = task.retry_count,
                    max_retries = task.max_retries,
                    terminal = outcome.is_terminal(),
                    "task failed by monitor"
                );
                report.failures.push(outcome);
            }
            Err(e) => {
                tracing::warn!(task_id = %task_id, error = %e, "monitor could not fail task");
            }
        }
    }
}
