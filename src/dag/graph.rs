// src/dag/graph.rs

use std::collections::{BTreeSet, HashMap};

use crate::dag::selector::Selector;
use crate::errors::{Result, TaskDagError};

/// Internal node bookkeeping.
///
/// `initial_id` is the declaration order and is `None` while the node is
/// known only as somebody's dependency (forward declaration). `order_id` is
/// the topological rank, assigned by a successful [`TopoGraph::is_valid`]
/// pass.
#[derive(Debug, Clone, Default)]
struct NodeInfo {
    initial_id: Option<usize>,
    order_id: Option<usize>,
    depends: BTreeSet<String>,
    reverse_depends: BTreeSet<String>,
}

/// Directed acyclic graph keyed by task name.
///
/// Validity is cached: adding nodes or edges resets the cache, and
/// [`TopoGraph::is_valid`] recomputes it lazily via Kahn elimination with
/// ties broken by ascending `initial_id`, which makes `order_id` assignment
/// deterministic for a given declaration order.
#[derive(Debug, Clone, Default)]
pub struct TopoGraph {
    nodes: HashMap<String, NodeInfo>,
    next_initial_id: usize,
    valid: Option<bool>,
}

impl TopoGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from `(name, depends)` pairs.
    pub fn from_nodes<I, D, S>(nodes: I) -> Self
    where
        I: IntoIterator<Item = (S, D)>,
        D: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut graph = Self::new();
        for (name, depends) in nodes {
            let depends: Vec<String> = depends.into_iter().map(Into::into).collect();
            graph.add(&name.into(), depends);
        }
        graph
    }

    /// Register a node and its incoming edges.
    ///
    /// Dependencies may name nodes that have not been added yet; the graph
    /// becomes valid once every referenced node is defined. Re-adding a
    /// node unions the dependency sets.
    pub fn add<I, S>(&mut self, name: &str, depends: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let depends: BTreeSet<String> = depends.into_iter().map(Into::into).collect();

        self.valid = None;

        let node = self.nodes.entry(name.to_string()).or_default();
        if node.initial_id.is_none() {
            node.initial_id = Some(self.next_initial_id);
            self.next_initial_id += 1;
        }
        node.depends.extend(depends.iter().cloned());

        for dep in &depends {
            self.nodes
                .entry(dep.clone())
                .or_default()
                .reverse_depends
                .insert(name.to_string());
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// All node names, in no particular order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    /// Current dependency set of a node.
    pub fn depends(&self, name: &str) -> Result<BTreeSet<String>> {
        self.nodes
            .get(name)
            .map(|n| n.depends.clone())
            .ok_or_else(|| TaskDagError::TaskNotFound(name.to_string()))
    }

    /// Direct dependents of a node, or the full transitive closure when
    /// `recursive` is set.
    pub fn reverse_depends(&self, name: &str, recursive: bool) -> Result<BTreeSet<String>> {
        let node = self
            .nodes
            .get(name)
            .ok_or_else(|| TaskDagError::TaskNotFound(name.to_string()))?;

        let mut result = node.reverse_depends.clone();
        if recursive {
            let mut stack: Vec<String> = result.iter().cloned().collect();
            while let Some(current) = stack.pop() {
                if let Some(info) = self.nodes.get(&current) {
                    for child in &info.reverse_depends {
                        if result.insert(child.clone()) {
                            stack.push(child.clone());
                        }
                    }
                }
            }
        }
        Ok(result)
    }

    /// Topological rank of a node, available after a successful validation.
    pub fn order_id(&self, name: &str) -> Option<usize> {
        self.nodes.get(name).and_then(|n| n.order_id)
    }

    /// Declaration rank of a node.
    pub fn initial_id(&self, name: &str) -> Option<usize> {
        self.nodes.get(name).and_then(|n| n.initial_id)
    }

    /// Whether every referenced node is defined and the graph is acyclic.
    ///
    /// A successful check assigns `order_id`s. The result is cached until
    /// the next [`TopoGraph::add`].
    pub fn is_valid(&mut self) -> bool {
        if let Some(valid) = self.valid {
            return valid;
        }

        // A node referenced only as a dependency never got an initial_id.
        if self.next_initial_id != self.nodes.len() {
            self.valid = Some(false);
            return false;
        }

        let mut pending: HashMap<&str, BTreeSet<&str>> = self
            .nodes
            .iter()
            .map(|(name, info)| {
                (
                    name.as_str(),
                    info.depends.iter().map(String::as_str).collect(),
                )
            })
            .collect();

        let mut order: Vec<String> = Vec::with_capacity(self.nodes.len());
        while !pending.is_empty() {
            let mut ready: Vec<&str> = pending
                .iter()
                .filter(|(_, deps)| deps.is_empty())
                .map(|(name, _)| *name)
                .collect();
            if ready.is_empty() {
                self.valid = Some(false);
                return false;
            }

            ready.sort_by_key(|name| self.nodes[*name].initial_id);
            for name in ready {
                order.push(name.to_string());
                pending.remove(name);
                for deps in pending.values_mut() {
                    deps.remove(name);
                }
            }
        }

        for (rank, name) in order.iter().enumerate() {
            if let Some(info) = self.nodes.get_mut(name) {
                info.order_id = Some(rank);
            }
        }
        self.valid = Some(true);
        true
    }

    /// Like [`TopoGraph::is_valid`] but reports *why* the graph is broken.
    pub fn validate(&mut self) -> Result<()> {
        if self.is_valid() {
            return Ok(());
        }

        let undefined: Vec<&str> = self
            .nodes
            .iter()
            .filter(|(_, info)| info.initial_id.is_none())
            .map(|(name, _)| name.as_str())
            .collect();
        if !undefined.is_empty() {
            let mut names = undefined;
            names.sort_unstable();
            return Err(TaskDagError::GraphInvalid(format!(
                "undefined dependencies: {}",
                names.join(", ")
            )));
        }
        Err(TaskDagError::GraphInvalid(
            "cycle detected in task dependencies".to_string(),
        ))
    }

    /// Node names sorted by `order_id` (topological) or `initial_id`
    /// (declaration order).
    pub fn nodes(&mut self, topological: bool) -> Result<Vec<String>> {
        if topological {
            self.validate()?;
        }

        let mut names: Vec<&String> = self.nodes.keys().collect();
        if topological {
            names.sort_by_key(|name| self.nodes[*name].order_id);
        } else {
            names.sort_by_key(|name| self.nodes[*name].initial_id);
        }
        Ok(names.into_iter().cloned().collect())
    }

    /// Remove `name` from the dependency sets of its dependents, keeping
    /// validity state and assigned order ids intact. Used by the dynamic
    /// ready-queue view after a node finishes.
    pub(crate) fn clear_dependency(&mut self, name: &str) {
        let dependents: Vec<String> = self
            .nodes
            .get(name)
            .map(|n| n.reverse_depends.iter().cloned().collect())
            .unwrap_or_default();
        for dependent in dependents {
            if let Some(info) = self.nodes.get_mut(&dependent) {
                info.depends.remove(name);
            }
        }
    }

    /// Induced subgraph for a selector (`None` selects everything).
    ///
    /// Edges pointing at unselected nodes are dropped: for the selected
    /// nodes those dependencies count as satisfied, matching the semantics
    /// of disabling the unselected tasks.
    pub fn subset(&mut self, selector: Option<&Selector>) -> Result<TopoGraph> {
        self.validate()?;

        let selector = match selector {
            Some(s) => s,
            None => return Ok(self.clone()),
        };

        let ids = selector.resolve(self)?;
        let mut selected: Vec<&String> = self
            .nodes
            .iter()
            .filter(|(_, info)| info.order_id.is_some_and(|id| ids.contains(&id)))
            .map(|(name, _)| name)
            .collect();
        selected.sort_by_key(|name| self.nodes[*name].initial_id);

        let selected_set: BTreeSet<&str> = selected.iter().map(|s| s.as_str()).collect();
        let mut subset = TopoGraph::new();
        for name in &selected {
            let depends: Vec<String> = self.nodes[*name]
                .depends
                .iter()
                .filter(|dep| selected_set.contains(dep.as_str()))
                .cloned()
                .collect();
            subset.add(name, depends);
        }
        Ok(subset)
    }
}
