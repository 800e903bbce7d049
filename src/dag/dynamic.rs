// src/dag/dynamic.rs

//! Consumable ready-queue view over a validated [`TopoGraph`].
//!
//! The scheduler drives this: [`DynamicTopoGraph::top`] surfaces nodes whose
//! dependencies have all been removed, and [`DynamicTopoGraph::remove`] pops
//! a finished node, clearing it from its successors' dependency sets (which
//! may unblock them on the next `top` call).

use std::collections::BTreeSet;

use crate::dag::graph::TopoGraph;
use crate::errors::{Result, TaskDagError};

#[derive(Debug, Clone)]
pub struct DynamicTopoGraph {
    graph: TopoGraph,
    removed: BTreeSet<String>,
    ready: Vec<String>,
    latest: bool,
}

impl DynamicTopoGraph {
    /// Wrap a graph; fails if the graph is not a valid DAG.
    pub fn new(mut graph: TopoGraph) -> Result<Self> {
        graph.validate()?;
        Ok(Self {
            graph,
            removed: BTreeSet::new(),
            ready: Vec::new(),
            latest: false,
        })
    }

    pub fn graph(&self) -> &TopoGraph {
        &self.graph
    }

    /// Number of nodes not yet removed.
    pub fn remaining(&self) -> usize {
        self.graph.len() - self.removed.len()
    }

    /// True once every node has been removed.
    pub fn is_drained(&self) -> bool {
        self.remaining() == 0
    }

    pub fn is_removed(&self, name: &str) -> bool {
        self.removed.contains(name)
    }

    /// Up to `max_nodes` ready nodes (dependencies all removed), ordered by
    /// `order_id`. Nodes stay in the queue until [`DynamicTopoGraph::remove`]
    /// pops them.
    pub fn top(&mut self, max_nodes: Option<usize>) -> Vec<String> {
        self.update_queue();
        let limit = max_nodes.unwrap_or(self.ready.len());
        self.ready.iter().take(limit).cloned().collect()
    }

    /// Pop a node whose dependencies are all satisfied.
    ///
    /// Clearing the node from its successors' dependency sets may make them
    /// ready.
    pub fn remove(&mut self, name: &str) -> Result<()> {
        if !self.graph.contains(name) {
            return Err(TaskDagError::TaskNotFound(name.to_string()));
        }
        if self.removed.contains(name) {
            return Err(TaskDagError::Runner(format!(
                "node '{name}' was removed already"
            )));
        }
        let depends = self.graph.depends(name)?;
        if !depends.is_empty() {
            return Err(TaskDagError::Runner(format!(
                "node '{name}' still depends on: {}",
                depends.into_iter().collect::<Vec<_>>().join(", ")
            )));
        }

        self.removed.insert(name.to_string());
        self.ready.retain(|n| n != name);
        self.graph.clear_dependency(name);
        self.latest = false;
        Ok(())
    }

    fn update_queue(&mut self) {
        if self.latest {
            return;
        }

        let queued: BTreeSet<&str> = self.ready.iter().map(String::as_str).collect();
        let mut fresh: Vec<String> = self
            .graph
            .names()
            .filter(|name| {
                !self.removed.contains(*name)
                    && !queued.contains(*name)
                    && self
                        .graph
                        .depends(name)
                        .map(|deps| deps.is_empty())
                        .unwrap_or(false)
            })
            .map(str::to_string)
            .collect();
        fresh.sort_by_key(|name| self.graph.order_id(name));
        self.ready.extend(fresh);
        self.latest = true;
    }
}
