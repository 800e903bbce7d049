// src/context/mod.rs

//! Inter-task dataflow.
//!
//! A [`RunnerContext`] is the keyed store through which upstream outputs
//! become downstream inputs. Two implementations share the interface:
//!
//! - [`RecordContext`] — pure storage; whatever a runner writes is what the
//!   next reader sees.
//! - [`DependentContext`] — derives inputs from a
//!   [`crate::config::ParameterConfig`]; every output write re-expands the
//!   parameter document so dependents observe the new values.
//!
//! Both persist through the [`checkpoint`] helpers and are backed by a
//! [`SharedMap`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::JsonMap;
use crate::errors::Result;

pub mod checkpoint;
pub mod dependent;
pub mod record;
pub mod shared;

pub use dependent::DependentContext;
pub use record::RecordContext;
pub use shared::SharedMap;

/// Keyed store conveying inputs and outputs between tasks.
///
/// All methods take `&self`; implementations are internally synchronised so
/// that runner workers on different threads can share one context.
pub trait RunnerContext: Send + Sync {
    /// Current values of the external parameters.
    fn get_params(&self) -> BTreeMap<String, Value>;

    /// Set the external parameters. Unknown or missing keys fail.
    fn set_params(&self, params: &BTreeMap<String, Value>) -> Result<()>;

    /// Input mapping of a task; `{}` if the task was never seen.
    fn get_input(&self, name: &str) -> JsonMap;

    /// Replace the input mapping of a task.
    fn set_input(&self, name: &str, value: JsonMap) -> Result<()>;

    /// Output mapping of a task; `{}` if the task was never seen.
    fn get_output(&self, name: &str) -> JsonMap;

    /// Record the output mapping of a task.
    fn set_output(&self, name: &str, value: JsonMap) -> Result<()>;

    /// Tasks whose outputs have been produced or restored. A best-effort
    /// resumption hint: the scheduler treats these as already done after a
    /// checkpoint restore.
    fn completed_tasks(&self) -> Vec<String>;

    /// Write a timestamped checkpoint under `dir`, pruning old files beyond
    /// `max_keep`. Returns the path written.
    fn save(&self, dir: &Path, max_keep: usize) -> Result<PathBuf>;

    /// Replay a checkpoint file into the context.
    fn restore(&self, path: &Path) -> Result<()>;
}
