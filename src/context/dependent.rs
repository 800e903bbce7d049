// src/context/dependent.rs

//! Context whose inputs are derived from a parameter document.
//!
//! Inputs cannot be written directly: they are the expansion of the
//! [`ParameterConfig`]. Every accepted output write re-expands the document
//! and republishes the per-task `{input, output}` trees into the backing
//! [`SharedMap`], so a dependent task that starts afterwards reads the new
//! values.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde_json::Value;

use crate::JsonMap;
use crate::config::ParameterConfig;
use crate::context::checkpoint;
use crate::context::shared::SharedMap;
use crate::context::RunnerContext;
use crate::errors::{Result, TaskDagError};

const CHECKPOINT_PREFIX: &str = "dependent_context";

#[derive(Debug)]
pub struct DependentContext {
    data: SharedMap,
    config: Mutex<ParameterConfig>,
}

impl DependentContext {
    pub fn new(config: ParameterConfig) -> Self {
        Self {
            data: SharedMap::new(),
            config: Mutex::new(config),
        }
    }

    /// Load the parameter document from a file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Ok(Self::new(ParameterConfig::parse(&text)?))
    }

    /// Names of the external parameters the caller must provide.
    pub fn required_params(&self) -> std::collections::BTreeSet<String> {
        self.lock_config().get_params()
    }

    fn lock_config(&self) -> MutexGuard<'_, ParameterConfig> {
        self.config
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn republish(&self, config: &mut ParameterConfig) -> Result<()> {
        let tree = config.get_config()?;
        self.data
            .extend(tree.into_iter().collect::<Vec<(String, Value)>>());
        Ok(())
    }

    fn section(&self, name: &str, section: &str) -> JsonMap {
        self.data
            .get(name)
            .and_then(|entry| entry.get(section).and_then(Value::as_object).cloned())
            .unwrap_or_default()
    }
}

impl RunnerContext for DependentContext {
    fn get_params(&self) -> BTreeMap<String, Value> {
        self.lock_config().param_values()
    }

    fn set_params(&self, params: &BTreeMap<String, Value>) -> Result<()> {
        let mut config = self.lock_config();
        config.set_params(params)?;
        self.republish(&mut config)
    }

    fn get_input(&self, name: &str) -> JsonMap {
        self.section(name, "input")
    }

    fn set_input(&self, name: &str, _value: JsonMap) -> Result<()> {
        Err(TaskDagError::Context(format!(
            "the input of task '{name}' is derived from the configuration and cannot be set"
        )))
    }

    fn get_output(&self, name: &str) -> JsonMap {
        self.section(name, "output")
    }

    fn set_output(&self, name: &str, value: JsonMap) -> Result<()> {
        let mut config = self.lock_config();
        config.update_output(name, &value)?;
        self.republish(&mut config)
    }

    fn completed_tasks(&self) -> Vec<String> {
        self.lock_config().updated_tasks()
    }

    fn save(&self, dir: &Path, max_keep: usize) -> Result<PathBuf> {
        let tree = self.lock_config().get_config()?;
        checkpoint::write_checkpoint(dir, CHECKPOINT_PREFIX, &Value::Object(tree), max_keep)
    }

    /// Replays recorded *outputs* only; inputs are re-derived from the
    /// configuration.
    ///
    /// A recorded value equal to the declared one is skipped: replaying it
    /// would be a no-op, and the difference is what marks a task as having
    /// actually produced its outputs.
    fn restore(&self, path: &Path) -> Result<()> {
        let tree = checkpoint::read_checkpoint(path)?;
        let Value::Object(tree) = tree else {
            return Err(TaskDagError::Context(format!(
                "checkpoint '{}' is not an object",
                path.display()
            )));
        };

        let mut config = self.lock_config();
        for (task, entry) in tree {
            if !config.contains_task(&task) {
                return Err(TaskDagError::TaskNotFound(task));
            }
            let Some(output) = entry.get("output").and_then(Value::as_object) else {
                continue;
            };
            let declared = config.declared_outputs(&task)?;
            let changed: JsonMap = output
                .iter()
                .filter(|(key, value)| declared.get(*key) != Some(value))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();
            if !changed.is_empty() {
                config.update_output(&task, &changed)?;
            }
        }
        self.republish(&mut config)
    }
}
