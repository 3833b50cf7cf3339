//! Node selection.
//!
//! Picks an execution target from the local node and the registered peers.
//! Candidates are always considered in lexical node-ID order so that every
//! strategy except `Random` is deterministic.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::core::NodeId;
use crate::error::{Error, Result};
use crate::orchestration::executor::clamp_utilization;

/// How the selector chooses among candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    /// Lowest utilization wins; ties go to the lexically smallest node ID.
    #[default]
    LeastLoaded,
    /// Cycle through candidates in node-ID order.
    RoundRobin,
    /// Uniform choice.
    Random,
}

impl std::fmt::Display for SelectionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SelectionStrategy::LeastLoaded => write!(f, "least_loaded"),
            SelectionStrategy::RoundRobin => write!(f, "round_robin"),
            SelectionStrategy::Random => write!(f, "random"),
        }
    }
}

impl std::str::FromStr for SelectionStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "least_loaded" => Ok(SelectionStrategy::LeastLoaded),
            "round_robin" => Ok(SelectionStrategy::RoundRobin),
            "random" => Ok(SelectionStrategy::Random),
            _ => Err(Error::UnknownStrategy(s.to_string())),
        }
    }
}

/// Source of peer load figures (a health/metrics collaborator).
///
/// Called while the coordinator holds its lock, so implementations should
/// answer from cached data. `None` means the peer is unreachable and must
/// not be selected.
pub trait UtilizationProvider: Send + Sync {
    fn utilization(&self, peer: &NodeId) -> Option<f64>;
}

/// In-memory provider. Unknown peers report zero load.
#[derive(Debug, Default)]
pub struct StaticUtilization {
    values: RwLock<HashMap<NodeId, Option<f64>>>,
}

impl StaticUtilization {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, peer: impl Into<NodeId>, utilization: f64) {
        self.values
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(peer.into(), Some(utilization));
    }

    pub fn mark_unreachable(&self, peer: impl Into<NodeId>) {
        self.values
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(peer.into(), None);
    }
}

impl UtilizationProvider for StaticUtilization {
    fn utilization(&self, peer: &NodeId) -> Option<f64> {
        self.values
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(peer)
            .copied()
            .unwrap_or(Some(0.0))
    }
}

/// A registered peer and its liveness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub node_id: NodeId,
    pub registered_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// False once the peer missed its liveness window; restored by a heartbeat.
    pub live: bool,
}

/// Chooses a node for each task.
#[derive(Debug)]
pub struct NodeSelector {
    strategy: SelectionStrategy,
    peers: BTreeMap<NodeId, PeerInfo>,
    cursor: usize,
}

impl NodeSelector {
    pub fn new(strategy: SelectionStrategy) -> Self {
        Self {
            strategy,
            peers: BTreeMap::new(),
            cursor: 0,
        }
    }

    pub fn strategy(&self) -> SelectionStrategy {
        self.strategy
    }

    /// Add a peer.
    ///
    /// # Errors
    /// `Error::InvalidNode` for empty IDs or a peer that is already registered.
    pub fn register_peer(&mut self, peer: NodeId, now: DateTime<Utc>) -> Result<()> {
        if peer.is_empty() {
            return Err(Error::InvalidNode("empty peer id".to_string()));
        }
        if self.peers.contains_key(&peer) {
            return Err(Error::InvalidNode(format!("peer {} already registered", peer)));
        }
        self.peers.insert(
            peer.clone(),
            PeerInfo {
                node_id: peer,
                registered_at: now,
                last_seen: now,
                live: true,
            },
        );
        Ok(())
    }

    /// Record that `peer` is alive.
    pub fn heartbeat(&mut self, peer: &NodeId, now: DateTime<Utc>) -> Result<()> {
        let info = self
            .peers
            .get_mut(peer)
            .ok_or_else(|| Error::InvalidNode(format!("unknown peer {}", peer)))?;
        info.last_seen = now;
        if !info.live {
            tracing::info!(peer = %peer, "peer is live again");
        }
        info.live = true;
        Ok(())
    }

    pub fn remove_peer(&mut self, peer: &NodeId) -> bool {
        self.peers.remove(peer).is_some()
    }

    pub fn has_peer(&self, peer: &NodeId) -> bool {
        self.peers.contains_key(peer)
    }

    pub fn peers(&self) -> Vec<PeerInfo> {
        self.peers.values().cloned().collect()
    }

    /// Mark peers not seen within `window` as stale. Returns the peers that
    /// became stale in this sweep.
    pub fn sweep_stale(&mut self, now: DateTime<Utc>, window: std::time::Duration) -> Vec<NodeId> {
        let window = ChronoDuration::from_std(window).unwrap_or(ChronoDuration::MAX);
        let mut newly_stale = Vec::new();
        for info in self.peers.values_mut() {
            if info.live && now - info.last_seen > window {
                info.live = false;
                newly_stale.push(info.node_id.clone());
            }
        }
        newly_stale
    }

    /// Pick a node.
    ///
    /// `local` is the local node with its load for this task, or `None` when
    /// the local node cannot run it. Peers that are stale or that the
    /// provider reports as unreachable are skipped.
    pub fn select(
        &mut self,
        local: Option<(&NodeId, f64)>,
        provider: &dyn UtilizationProvider,
    ) -> Option<NodeId> {
        let mut candidates: Vec<(NodeId, f64)> = Vec::with_capacity(self.peers.len() + 1);
        if let Some((node, load)) = local {
            candidates.push((node.clone(), clamp_utilization(load)));
        }
        for info in self.peers.values().filter(|p| p.live) {
            if let Some(load) = provider.utilization(&info.node_id) {
                candidates.push((info.node_id.clone(), clamp_utilization(load)));
            }
        }
        if candidates.is_empty() {
            return None;
        }
        candidates.sort_by(|a, b| a.0.cmp(&b.0));

        match self.strategy {
            SelectionStrategy::LeastLoaded => candidates
                .into_iter()
                .min_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)))
                .map(|(node, _)| node),
            SelectionStrategy::RoundRobin => {
                let idx = self.cursor % candidates.len();
                self.cursor = self.cursor.wrapping_add(1);
                candidates.into_iter().nth(idx).map(|(node, _)| node)
            }
            SelectionStrategy::Random => candidates
                .choose(&mut rand::thread_rng())
                .map(|(node, _)| node.clone()),
        }
    }
}
