//! Dependency graph between tasks.
//!
//! Edges run from a prerequisite to the task that depends on it. Tasks may
//! reference prerequisites that have not been submitted yet; those appear as
//! placeholder nodes until (and unless) they are submitted.

use crate::core::task::{Dependency, TaskId};
use crate::error::{Error, Result};
use petgraph::algo::{has_path_connecting, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Kind of edge between two tasks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    /// The prerequisite must complete before the dependent is assigned.
    Blocking,
    /// The prerequisite only has to exist.
    Reference,
}

impl From<&Dependency> for DependencyKind {
    fn from(dep: &Dependency) -> Self {
        if dep.must_complete_before {
            DependencyKind::Blocking
        } else {
            DependencyKind::Reference
        }
    }
}

impl std::fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DependencyKind::Blocking => write!(f, "blocking"),
            DependencyKind::Reference => write!(f, "reference"),
        }
    }
}

/// Directed graph of task dependencies, kept acyclic on insert.
pub struct DependencyGraph {
    graph: DiGraph<TaskId, DependencyKind>,
    index: HashMap<TaskId, NodeIndex>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            index: HashMap::new(),
        }
    }

    fn node(&mut self, id: &TaskId) -> NodeIndex {
        if let Some(&idx) = self.index.get(id) {
            return idx;
        }
        let idx = self.graph.add_node(id.clone());
        self.index.insert(id.clone(), idx);
        idx
    }

    /// Check that giving `task_id` the prerequisites `deps` keeps the graph
    /// acyclic. Does not modify the graph.
    ///
    /// A cycle exists when the task depends on itself, or when one of its
    /// prerequisites is already reachable from it (i.e. already depends on
    /// it, directly or transitively).
    pub fn check_acyclic(&self, task_id: &TaskId, deps: &[Dependency]) -> Result<()> {
        if let Some(dep) = deps.iter().find(|d| &d.task_id == task_id) {
            return Err(Error::CyclicDependency {
                task_id: task_id.clone(),
                via: dep.task_id.clone(),
            });
        }

        let Some(&task_idx) = self.index.get(task_id) else {
            // Nothing references this task yet, so nothing can depend on it.
            return Ok(());
        };

        for dep in deps {
            if let Some(&dep_idx) = self.index.get(&dep.task_id) {
                if has_path_connecting(&self.graph, task_idx, dep_idx, None) {
                    return Err(Error::CyclicDependency {
                        task_id: task_id.clone(),
                        via: dep.task_id.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Add a task and its prerequisite edges.
    ///
    /// # Errors
    /// Returns `Error::CyclicDependency` and leaves the graph unchanged if the
    /// edges would close a cycle.
    pub fn insert(&mut self, task_id: &TaskId, deps: &[Dependency]) -> Result<()> {
        self.check_acyclic(task_id, deps)?;

        let task_idx = self.node(task_id);
        for dep in deps {
            let dep_idx = self.node(&dep.task_id);
            self.graph
                .update_edge(dep_idx, task_idx, DependencyKind::from(dep));
        }
        Ok(())
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.index.contains_key(id)
    }

    /// Tasks `id` depends on.
    pub fn prerequisites(&self, id: &TaskId) -> Vec<TaskId> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Tasks that depend on `id`.
    pub fn dependents(&self, id: &TaskId) -> Vec<TaskId> {
        self.neighbors(id, Direction::Outgoing)
    }

    fn neighbors(&self, id: &TaskId, direction: Direction) -> Vec<TaskId> {
        let Some(&idx) = self.index.get(id) else {
            return Vec::new();
        };
        let mut out: Vec<TaskId> = self
            .graph
            .neighbors_directed(idx, direction)
            .filter_map(|n| self.graph.node_weight(n).cloned())
            .collect();
        out.sort();
        out
    }

    pub fn dependency_kind(&self, from: &TaskId, to: &TaskId) -> Option<DependencyKind> {
        let from_idx = self.index.get(from)?;
        let to_idx = self.index.get(to)?;
        let edge = self.graph.find_edge(*from_idx, *to_idx)?;
        self.graph.edge_weight(edge).copied()
    }

    /// Tasks ordered so that every prerequisite precedes its dependents.
    pub fn topological_order(&self) -> Result<Vec<TaskId>> {
        let sorted = toposort(&self.graph, None).map_err(|cycle| {
            let at = self
                .graph
                .node_weight(cycle.node_id())
                .map(|t| t.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            Error::Validation(format!("Cycle detected at task: {}", at))
        })?;

        Ok(sorted
            .into_iter()
            .filter_map(|idx| self.graph.node_weight(idx).cloned())
            .collect())
    }

    pub fn task_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn dependency_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DependencyGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyGraph")
            .field("tasks", &self.task_count())
            .field("dependencies", &self.dependency_count())
            .finish()
    }
}
