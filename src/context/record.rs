// src/context/record.rs

//! Pure-storage context: reads return what was written, nothing is derived.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::JsonMap;
use crate::context::checkpoint;
use crate::context::shared::SharedMap;
use crate::context::RunnerContext;
use crate::errors::{Result, TaskDagError};

const CHECKPOINT_PREFIX: &str = "record_context";

#[derive(Debug, Default)]
pub struct RecordContext {
    data: SharedMap,
}

impl RecordContext {
    pub fn new() -> Self {
        Self::default()
    }

    fn section(&self, name: &str, section: &str) -> JsonMap {
        self.data
            .get(name)
            .and_then(|entry| entry.get(section).and_then(Value::as_object).cloned())
            .unwrap_or_default()
    }

    fn set_section(&self, name: &str, section: &str, value: JsonMap) {
        let mut entry = self
            .data
            .get(name)
            .and_then(|v| v.as_object().cloned())
            .unwrap_or_default();
        entry.insert(section.to_string(), Value::Object(value));
        self.data.insert(name, Value::Object(entry));
    }
}

impl RunnerContext for RecordContext {
    fn get_params(&self) -> BTreeMap<String, Value> {
        BTreeMap::new()
    }

    fn set_params(&self, params: &BTreeMap<String, Value>) -> Result<()> {
        if params.is_empty() {
            return Ok(());
        }
        Err(TaskDagError::Params(format!(
            "unknown parameters: {}",
            params.keys().cloned().collect::<Vec<_>>().join(", ")
        )))
    }

    fn get_input(&self, name: &str) -> JsonMap {
        self.section(name, "input")
    }

    fn set_input(&self, name: &str, value: JsonMap) -> Result<()> {
        self.set_section(name, "input", value);
        Ok(())
    }

    fn get_output(&self, name: &str) -> JsonMap {
        self.section(name, "output")
    }

    fn set_output(&self, name: &str, value: JsonMap) -> Result<()> {
        self.set_section(name, "output", value);
        Ok(())
    }

    fn completed_tasks(&self) -> Vec<String> {
        self.data
            .snapshot()
            .into_iter()
            .filter(|(_, entry)| {
                entry
                    .get("output")
                    .and_then(Value::as_object)
                    .is_some_and(|output| !output.is_empty())
            })
            .map(|(task, _)| task)
            .collect()
    }

    fn save(&self, dir: &Path, max_keep: usize) -> Result<PathBuf> {
        let snapshot: JsonMap = self.data.snapshot().into_iter().collect();
        checkpoint::write_checkpoint(dir, CHECKPOINT_PREFIX, &Value::Object(snapshot), max_keep)
    }

    fn restore(&self, path: &Path) -> Result<()> {
        let tree = checkpoint::read_checkpoint(path)?;
        let Value::Object(tree) = tree else {
            return Err(TaskDagError::Context(format!(
                "checkpoint '{}' is not an object",
                path.display()
            )));
        };

        for (task, entry) in tree {
            if let Some(input) = entry.get("input").and_then(Value::as_object) {
                self.set_input(&task, input.clone())?;
            }
            if let Some(output) = entry.get("output").and_then(Value::as_object) {
                self.set_output(&task, output.clone())?;
            }
        }
        Ok(())
    }
}
