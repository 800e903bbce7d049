// src/config/model.rs

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;
use serde_json::Value;

use crate::JsonMap;
use crate::config::template::{self, TemplateExpr};
use crate::errors::{Result, TaskDagError};

/// The command of a task as written in the task file.
///
/// ```json
/// "cmd": ["python", "train.py", "--epochs", "3"]
/// "cmd": "grep -c error logs/*.txt"
/// ```
///
/// An argv array is executed directly; a single string goes through the
/// shell.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CommandLine {
    Shell(String),
    Argv(Vec<String>),
}

/// One `"<name>": { … }` entry of the task file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskFileEntry {
    pub cmd: CommandLine,

    /// Tasks that must finish before this one starts, in addition to any
    /// implied by `$.task.…` references in `input`.
    #[serde(default)]
    pub depends: Vec<String>,

    /// Number of attempts before the task counts as failed.
    #[serde(default = "default_retry")]
    pub retry: u32,

    /// Seconds to wait between attempts.
    #[serde(default = "default_interval")]
    pub interval: f64,

    #[serde(default = "default_daemon")]
    pub daemon: bool,

    /// Append to existing log files instead of truncating them.
    #[serde(default)]
    pub append_log: bool,

    /// Encoding label for the child's stdout (default UTF-8).
    #[serde(default)]
    pub encoding: Option<String>,

    #[serde(default)]
    pub input: JsonMap,

    #[serde(default)]
    pub output: JsonMap,
}

fn default_retry() -> u32 {
    1
}

fn default_interval() -> f64 {
    5.0
}

fn default_daemon() -> bool {
    true
}

/// A parsed task file: the top level is keyed by task name.
#[derive(Debug, Clone)]
pub struct TaskFile {
    pub tasks: BTreeMap<String, TaskFileEntry>,
}

impl TaskFile {
    /// The `{task: {input, output}}` projection that seeds the
    /// [`crate::config::ParameterConfig`].
    pub fn params_value(&self) -> Value {
        let mut tree = JsonMap::new();
        for (name, entry) in &self.tasks {
            let mut item = JsonMap::new();
            item.insert("input".to_string(), Value::Object(entry.input.clone()));
            item.insert("output".to_string(), Value::Object(entry.output.clone()));
            tree.insert(name.clone(), Value::Object(item));
        }
        Value::Object(tree)
    }

    /// Dependencies of a task: the explicit `depends` list united with the
    /// tasks referenced by templates in its `input`.
    pub fn dependencies_of(&self, name: &str) -> Result<BTreeSet<String>> {
        let entry = self
            .tasks
            .get(name)
            .ok_or_else(|| TaskDagError::TaskNotFound(name.to_string()))?;

        let mut deps: BTreeSet<String> = entry.depends.iter().cloned().collect();
        for expr in template::markers_in_value(&Value::Object(entry.input.clone()))? {
            if let TemplateExpr::Path(path) = expr {
                if path.task != name {
                    deps.insert(path.task);
                }
            }
        }
        Ok(deps)
    }

    /// Restrict the file to `names` plus their transitive dependencies.
    pub fn restrict(&self, names: &[String]) -> Result<TaskFile> {
        let mut keep: BTreeSet<String> = BTreeSet::new();
        let mut stack: Vec<String> = Vec::new();
        for name in names {
            if !self.tasks.contains_key(name) {
                return Err(TaskDagError::TaskNotFound(name.clone()));
            }
            stack.push(name.clone());
        }
        while let Some(name) = stack.pop() {
            if !keep.insert(name.clone()) {
                continue;
            }
            stack.extend(self.dependencies_of(&name)?);
        }

        let tasks = self
            .tasks
            .iter()
            .filter(|(name, _)| keep.contains(*name))
            .map(|(name, entry)| (name.clone(), entry.clone()))
            .collect();
        Ok(TaskFile { tasks })
    }
}
