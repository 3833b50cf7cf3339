use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::orchestration::SelectionStrategy;
use crate::{Error, Result};

pub const DEFAULT_MAX_CONCURRENT_TASKS: usize = 10;
pub const DEFAULT_SCHEDULE_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_MONITOR_INTERVAL_MS: u64 = 5_000;

/// Coordinator settings, loaded from `~/.taskmesh/taskmesh.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Local node name. Generated at start when unset.
    pub node_id: Option<String>,
    pub strategy: SelectionStrategy,
    /// Upper bound on tasks in `Assigned` or `Running` at once.
    pub max_concurrent_tasks: usize,
    pub schedule_interval_ms: u64,
    pub monitor_interval_ms: u64,
    /// Peers not heard from for this long are skipped by the selector.
    pub peer_liveness_secs: Option<u64>,
    /// Assigned tasks that never receive a start signal fail after this long.
    pub assignment_timeout_secs: Option<u64>,
    /// Peers registered at start.
    pub peers: Vec<String>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            strategy: SelectionStrategy::default(),
            max_concurrent_tasks: DEFAULT_MAX_CONCURRENT_TASKS,
            schedule_interval_ms: DEFAULT_SCHEDULE_INTERVAL_MS,
            monitor_interval_ms: DEFAULT_MONITOR_INTERVAL_MS,
            peer_liveness_secs: None,
            assignment_timeout_secs: None,
            peers: Vec::new(),
        }
    }
}

impl CoordinatorConfig {
    pub fn taskmesh_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".taskmesh"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::taskmesh_dir()?.join("taskmesh.toml"))
    }

    pub fn schedule_interval(&self) -> Duration {
        Duration::from_millis(self.schedule_interval_ms)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    /// Load from the default location, falling back to defaults.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        tracing::debug!(path = %path.display(), "loading coordinator config");
        if !path.exists() {
            tracing::debug!("config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        config.validate()?;
        tracing::debug!(
            strategy = %config.strategy,
            max_concurrent = config.max_concurrent_tasks,
            peers = config.peers.len(),
            "config loaded"
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_tasks == 0 {
            return Err(Error::Validation(
                "max_concurrent_tasks must be at least 1".to_string(),
            ));
        }
        if self.schedule_interval_ms == 0 || self.monitor_interval_ms == 0 {
            return Err(Error::Validation(
                "tick intervals must be greater than zero".to_string(),
            ));
        }
        if let Some(node_id) = &self.node_id {
            if node_id.trim().is_empty() {
                return Err(Error::InvalidNode("empty node_id".to_string()));
            }
        }
        if let Some(peer) = self.peers.iter().find(|p| p.trim().is_empty()) {
            return Err(Error::InvalidNode(format!("empty peer id {:?}", peer)));
        }
        Ok(())
    }
}
