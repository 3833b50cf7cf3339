//! Executor capability and the local executor registry.
//!
//! Executors perform the actual work (downloads, uploads, ...). The
//! coordinator never runs them; it only consults their capabilities and
//! utilization when deciding whether the local node can take a task.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::core::{Task, TaskResult};
use crate::error::{Error, Result};

/// Something that can execute tasks of one or more types.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Whether this executor can run tasks tagged `task_type`.
    fn supports(&self, task_type: &str) -> bool;

    /// Run the task to completion. Called by the caller's executor loop,
    /// never by the coordinator.
    async fn execute(&self, task: &Task) -> TaskResult;

    /// Current load in `[0, 1]`.
    fn get_utilization(&self) -> f64;
}

/// Executors registered on the local node, keyed by task type.
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: BTreeMap<String, Vec<Arc<dyn Executor>>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `executor` for `task_type`.
    ///
    /// # Errors
    /// Rejects empty task types and executors that do not support the type
    /// they are registered under.
    pub fn register(&mut self, task_type: &str, executor: Arc<dyn Executor>) -> Result<()> {
        if task_type.trim().is_empty() {
            return Err(Error::Validation("empty task type".to_string()));
        }
        if !executor.supports(task_type) {
            return Err(Error::Validation(format!(
                "executor does not support task type {:?}",
                task_type
            )));
        }
        self.executors
            .entry(task_type.to_string())
            .or_default()
            .push(executor);
        Ok(())
    }

    /// The least-utilized executor for `task_type`, if any.
    pub fn executor_for(&self, task_type: &str) -> Option<Arc<dyn Executor>> {
        self.executors
            .get(task_type)?
            .iter()
            .min_by(|a, b| {
                clamp_utilization(a.get_utilization())
                    .total_cmp(&clamp_utilization(b.get_utilization()))
            })
            .cloned()
    }

    /// Local node load for a task of `task_type`.
    ///
    /// With no executors registered at all, the local node accepts every
    /// task type at zero load. Otherwise it is a candidate only for types it
    /// has executors for, at their mean utilization.
    pub fn local_utilization(&self, task_type: &str) -> Option<f64> {
        if self.executors.is_empty() {
            return Some(0.0);
        }
        let executors = self.executors.get(task_type)?;
        if executors.is_empty() {
            return None;
        }
        let total: f64 = executors
            .iter()
            .map(|e| clamp_utilization(e.get_utilization()))
            .sum();
        Some(total / executors.len() as f64)
    }

    pub fn task_types(&self) -> Vec<String> {
        self.executors.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.executors.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("task_types", &self.task_types())
            .field("executors", &self.len())
            .finish()
    }
}

/// Clamp a reported utilization into `[0, 1]`; NaN counts as fully loaded.
pub fn clamp_utilization(value: f64) -> f64 {
    if value.is_nan() {
        1.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
