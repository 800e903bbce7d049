// src/engine/mod.rs

//! Orchestration engine.
//!
//! [`inventory`] holds the task declarations and the live runner entries;
//! [`scheduler`] owns the graph plus inventory and steps the per-task state
//! machine with bounded parallelism, failure containment and cooperative
//! cancellation.

/// Canonical task name type used throughout the engine.
pub type TaskName = String;

pub mod inventory;
pub mod scheduler;

pub use inventory::{TaskDeclaration, TaskTarget};
pub use scheduler::{RunOptions, Scheduler, SchedulerOptions};
