// src/dag/mod.rs

//! Dependency graph over task names.
//!
//! - [`graph`] holds the topological graph: node registration, validation
//!   (cycle / dangling-reference detection with deterministic `order_id`
//!   assignment), and subset selection.
//! - [`selector`] implements the human-facing subset grammar (names,
//!   regular expressions, topological ids, ranges).
//! - [`dynamic`] adds a consumable ready-queue view used by the scheduler.

pub mod dynamic;
pub mod graph;
pub mod selector;

pub use dynamic::DynamicTopoGraph;
pub use graph::TopoGraph;
pub use selector::Selector;
