// src/config/mod.rs

//! Task configuration.
//!
//! - [`template`] recognises `<%= … %>` markers and parses their
//!   expressions (free identifiers vs `$.task.section.key` paths).
//! - [`params`] implements [`params::ParameterConfig`], the expandable
//!   parameter document shared by all tasks.
//! - [`model`] is the serde model of the on-disk task file.
//! - [`loader`] reads and validates a task file and turns it into task
//!   declarations plus a parameter document.

pub mod loader;
pub mod model;
pub mod params;
pub mod template;

pub use loader::{load_and_validate, load_from_path};
pub use model::{CommandLine, TaskFile, TaskFileEntry};
pub use params::ParameterConfig;
