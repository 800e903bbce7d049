// src/dag/selector.rs

//! Subset selector grammar.
//!
//! A selector is a comma-separated list of items, each of which is:
//!
//! - a regular expression matched against task names (a bare task name is
//!   the degenerate case),
//! - a topological id (`"4"`),
//! - a range `LO-HI` or `LO-HI-STEP` over topological ids, where a missing
//!   `LO` means `0` and a missing `HI` means the last id.
//!
//! Unknown names and out-of-range ids log a warning and are skipped;
//! malformed range syntax is a fatal error.

use std::collections::BTreeSet;

use regex::Regex;
use tracing::warn;

use crate::dag::graph::TopoGraph;
use crate::errors::{Result, TaskDagError};

/// Parsed selector items, resolved against a graph on demand.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    items: Vec<String>,
}

impl Selector {
    /// Split a selector string into items; empty segments are ignored.
    pub fn parse(selector: &str) -> Self {
        let items = selector
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        Self { items }
    }

    /// A selector from pre-split items (e.g. repeated CLI arguments).
    pub fn from_items<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut merged = Vec::new();
        for item in items {
            merged.extend(Self::parse(item.as_ref()).items);
        }
        Self { items: merged }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Resolve the selector into a set of topological ids.
    ///
    /// The graph must already be validated so that every node carries an
    /// `order_id`.
    pub fn resolve(&self, graph: &TopoGraph) -> Result<BTreeSet<usize>> {
        let mut ids = BTreeSet::new();
        for item in &self.items {
            ids.extend(resolve_item(item, graph)?);
        }
        Ok(ids)
    }
}

fn resolve_item(item: &str, graph: &TopoGraph) -> Result<BTreeSet<usize>> {
    // A pattern item wins over everything else, matching the name from its
    // beginning (a plain task name is just a literal pattern).
    if let Ok(re) = Regex::new(&format!("^(?:{item})")) {
        let matched = match_names(&re, graph);
        if !matched.is_empty() {
            return Ok(matched);
        }
    }

    if item.chars().all(|c| c.is_ascii_digit()) && !item.is_empty() {
        let id: usize = item
            .parse()
            .map_err(|_| TaskDagError::Selector(format!("invalid id '{item}'")))?;
        if id < graph.len() {
            return Ok(BTreeSet::from([id]));
        }
        warn!(
            item,
            size = graph.len(),
            "selector id is out of range; skipping"
        );
        return Ok(BTreeSet::new());
    }

    if item.contains('-') {
        return resolve_range(item, graph.len());
    }

    warn!(item, "selector item matches no task; skipping");
    Ok(BTreeSet::new())
}

fn match_names(re: &Regex, graph: &TopoGraph) -> BTreeSet<usize> {
    graph
        .names()
        .filter(|name| re.is_match(name))
        .filter_map(|name| graph.order_id(name))
        .collect()
}

fn resolve_range(item: &str, size: usize) -> Result<BTreeSet<usize>> {
    let parts: Vec<&str> = item.split('-').collect();
    if !(2..=3).contains(&parts.len()) {
        return Err(TaskDagError::Selector(format!(
            "range '{item}' must have 2 or 3 parts"
        )));
    }
    for part in &parts {
        if !part.is_empty() && !part.chars().all(|c| c.is_ascii_digit()) {
            return Err(TaskDagError::Selector(format!(
                "range '{item}' contains a non-numeric part '{part}'"
            )));
        }
    }

    if size == 0 {
        warn!(item, "selector range over an empty graph; skipping");
        return Ok(BTreeSet::new());
    }

    let lo: usize = if parts[0].is_empty() {
        0
    } else {
        parts[0]
            .parse()
            .map_err(|_| TaskDagError::Selector(format!("invalid range bound in '{item}'")))?
    };
    let hi: usize = if parts[1].is_empty() {
        size - 1
    } else {
        parts[1]
            .parse()
            .map_err(|_| TaskDagError::Selector(format!("invalid range bound in '{item}'")))?
    };
    let step: usize = if parts.len() == 3 && !parts[2].is_empty() {
        parts[2]
            .parse()
            .map_err(|_| TaskDagError::Selector(format!("invalid range step in '{item}'")))?
    } else {
        1
    };

    if step == 0 {
        return Err(TaskDagError::Selector(format!(
            "range '{item}' has step 0"
        )));
    }
    if lo > hi {
        return Err(TaskDagError::Selector(format!(
            "range '{item}' is reversed ({lo} > {hi})"
        )));
    }

    let clamped_hi = if hi >= size {
        warn!(item, size, "range upper bound exceeds graph size; clamping");
        size - 1
    } else {
        hi
    };

    Ok((lo..=clamped_hi).step_by(step).collect())
}
