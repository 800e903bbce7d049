// src/config/params.rs

//! The shared parameter document.
//!
//! A [`ParameterConfig`] is built from a JSON tree keyed by task name where
//! every entry carries exactly an `input` and an `output` object. String
//! leaves may contain `<%= … %>` markers; bare identifiers become required
//! external parameters, `$.task.section.key` paths resolve against the tree
//! itself.
//!
//! Two shapes are rejected outright: a template anywhere under a task's
//! `output` subtree, and a path reference into *another* task's `input`
//! subtree.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;
use tracing::warn;

use crate::JsonMap;
use crate::config::template::{self, ParamPath, Section, TemplateExpr};
use crate::errors::{Result, TaskDagError};

#[derive(Debug, Clone)]
pub struct ParameterConfig {
    /// Pristine tree, markers intact.
    raw: JsonMap,
    /// Names of required external parameters.
    free: BTreeSet<String>,
    /// Current values of the external parameters.
    free_values: BTreeMap<String, Value>,
    /// Output values pushed in through [`ParameterConfig::update_output`].
    overlay: BTreeMap<String, JsonMap>,
    expanded: Option<JsonMap>,
    dirty: bool,
}

impl ParameterConfig {
    pub fn parse(text: &str) -> Result<Self> {
        Self::from_value(serde_json::from_str(text)?)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(raw) = value else {
            return Err(TaskDagError::Config(
                "parameter document must be an object keyed by task name".to_string(),
            ));
        };

        let mut free = BTreeSet::new();
        let mut paths: Vec<(String, ParamPath)> = Vec::new();

        for (task, entry) in &raw {
            let Value::Object(entry) = entry else {
                return Err(TaskDagError::Config(format!(
                    "task '{task}' must be an object"
                )));
            };
            let keys: BTreeSet<&str> = entry.keys().map(String::as_str).collect();
            if keys != BTreeSet::from(["input", "output"]) {
                return Err(TaskDagError::Config(format!(
                    "task '{task}' must contain exactly the keys 'input' and 'output'"
                )));
            }
            for section in ["input", "output"] {
                if !entry[section].is_object() {
                    return Err(TaskDagError::Config(format!(
                        "'{section}' of task '{task}' must be an object"
                    )));
                }
            }

            if !template::markers_in_value(&entry["output"])?.is_empty() {
                return Err(TaskDagError::ConfigForbidden(format!(
                    "output of task '{task}' contains a template"
                )));
            }

            for expr in template::markers_in_value(&entry["input"])? {
                match expr {
                    TemplateExpr::Free(name) => {
                        free.insert(name);
                    }
                    TemplateExpr::Path(path) => paths.push((task.clone(), path)),
                }
            }
        }

        for (task, path) in &paths {
            if path.section == Section::Input && path.task != *task {
                return Err(TaskDagError::ConfigForbidden(format!(
                    "template '{path}' in task '{task}' refers to another task's input"
                )));
            }
            let target = raw.get(&path.task).ok_or_else(|| {
                TaskDagError::Config(format!(
                    "template '{path}' references unknown task '{}'",
                    path.task
                ))
            })?;
            let section = target
                .get(path.section.as_str())
                .and_then(Value::as_object)
                .ok_or_else(|| {
                    TaskDagError::Config(format!("template '{path}' references a missing section"))
                })?;
            if !section.contains_key(&path.key) {
                return Err(TaskDagError::Config(format!(
                    "template '{path}' references unknown key '{}'",
                    path.key
                )));
            }
        }

        Ok(Self {
            raw,
            free,
            free_values: BTreeMap::new(),
            overlay: BTreeMap::new(),
            expanded: None,
            dirty: true,
        })
    }

    /// Names of the required external parameters.
    pub fn get_params(&self) -> BTreeSet<String> {
        self.free.clone()
    }

    /// Current values of the external parameters.
    pub fn param_values(&self) -> BTreeMap<String, Value> {
        self.free_values.clone()
    }

    /// Task names of the document, in key order.
    pub fn tasks(&self) -> impl Iterator<Item = &str> {
        self.raw.keys().map(String::as_str)
    }

    pub fn contains_task(&self, task: &str) -> bool {
        self.raw.contains_key(task)
    }

    /// Tasks whose outputs have been updated since construction.
    pub fn updated_tasks(&self) -> Vec<String> {
        self.overlay.keys().cloned().collect()
    }

    /// Declared output values of a task, before any updates.
    pub fn declared_outputs(&self, task: &str) -> Result<JsonMap> {
        let entry = self
            .raw
            .get(task)
            .ok_or_else(|| TaskDagError::TaskNotFound(task.to_string()))?;
        Ok(entry
            .get("output")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default())
    }

    /// Declared output keys of a task.
    pub fn output_keys(&self, task: &str) -> Result<BTreeSet<String>> {
        let entry = self
            .raw
            .get(task)
            .ok_or_else(|| TaskDagError::TaskNotFound(task.to_string()))?;
        Ok(entry
            .get("output")
            .and_then(Value::as_object)
            .map(|o| o.keys().cloned().collect())
            .unwrap_or_default())
    }

    /// Set all external parameters at once; extras and missing keys fail.
    pub fn set_params(&mut self, params: &BTreeMap<String, Value>) -> Result<()> {
        let unknown: Vec<&str> = params
            .keys()
            .filter(|k| !self.free.contains(*k))
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            return Err(TaskDagError::Params(format!(
                "unknown parameters: {}",
                unknown.join(", ")
            )));
        }
        let missing: Vec<&str> = self
            .free
            .iter()
            .filter(|k| !params.contains_key(*k))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(TaskDagError::Params(format!(
                "these parameters must be set: {}",
                missing.join(", ")
            )));
        }

        if *params != self.free_values {
            self.free_values = params.clone();
            self.dirty = true;
        }
        Ok(())
    }

    /// Update a subset of the external parameters; extras fail.
    pub fn update_params(&mut self, params: &BTreeMap<String, Value>) -> Result<()> {
        let unknown: Vec<&str> = params
            .keys()
            .filter(|k| !self.free.contains(*k))
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            return Err(TaskDagError::Params(format!(
                "unknown parameters: {}",
                unknown.join(", ")
            )));
        }
        for (key, value) in params {
            self.free_values.insert(key.clone(), value.clone());
        }
        self.dirty = true;
        Ok(())
    }

    /// Merge new output values of a task and mark the document for
    /// re-expansion. Keys outside the declared output schema fail; declared
    /// keys the task did not produce only warn.
    pub fn update_output(&mut self, task: &str, values: &JsonMap) -> Result<()> {
        let declared = self.output_keys(task)?;

        let invalid: Vec<&str> = values
            .keys()
            .filter(|k| !declared.contains(*k))
            .map(String::as_str)
            .collect();
        if !invalid.is_empty() {
            return Err(TaskDagError::Params(format!(
                "in the output of task '{task}', found invalid keys: {}",
                invalid.join(", ")
            )));
        }

        let missing: Vec<&str> = declared
            .iter()
            .filter(|k| !values.contains_key(*k))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            warn!(
                task,
                keys = missing.join(", "),
                "task did not output values for all declared keys"
            );
        }

        self.overlay
            .entry(task.to_string())
            .or_default()
            .extend(values.clone());
        self.dirty = true;
        Ok(())
    }

    /// The latest expanded tree. Requires a full assignment of the external
    /// parameters; the result is cached until the next mutation.
    pub fn get_config(&mut self) -> Result<JsonMap> {
        if !self.dirty {
            if let Some(expanded) = &self.expanded {
                return Ok(expanded.clone());
            }
        }

        let missing: Vec<&str> = self
            .free
            .iter()
            .filter(|k| !self.free_values.contains_key(*k))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(TaskDagError::Params(format!(
                "these parameters must be set first: {}",
                missing.join(", ")
            )));
        }

        let mut effective = self.raw.clone();
        for (task, updates) in &self.overlay {
            if let Some(outputs) = effective
                .get_mut(task)
                .and_then(|e| e.get_mut("output"))
                .and_then(Value::as_object_mut)
            {
                outputs.extend(updates.clone());
            }
        }

        let snapshot = effective.clone();
        let mut expanded = JsonMap::new();
        for (task, entry) in &effective {
            let mut visiting = BTreeSet::new();
            expanded.insert(
                task.clone(),
                render_value(entry, &snapshot, &self.free_values, &mut visiting)?,
            );
        }

        self.expanded = Some(expanded.clone());
        self.dirty = false;
        Ok(expanded)
    }
}

fn render_value(
    value: &Value,
    snapshot: &JsonMap,
    free_values: &BTreeMap<String, Value>,
    visiting: &mut BTreeSet<ParamPath>,
) -> Result<Value> {
    match value {
        Value::String(s) if template::has_marker(s) => template::render_str(s, &mut |expr| {
            resolve_expr(expr, snapshot, free_values, visiting)
        }),
        Value::Array(items) => {
            let rendered: Result<Vec<Value>> = items
                .iter()
                .map(|item| render_value(item, snapshot, free_values, visiting))
                .collect();
            Ok(Value::Array(rendered?))
        }
        Value::Object(map) => {
            let mut rendered = JsonMap::new();
            for (key, item) in map {
                rendered.insert(
                    key.clone(),
                    render_value(item, snapshot, free_values, visiting)?,
                );
            }
            Ok(Value::Object(rendered))
        }
        other => Ok(other.clone()),
    }
}

fn resolve_expr(
    expr: &TemplateExpr,
    snapshot: &JsonMap,
    free_values: &BTreeMap<String, Value>,
    visiting: &mut BTreeSet<ParamPath>,
) -> Result<Value> {
    match expr {
        TemplateExpr::Free(name) => free_values.get(name).cloned().ok_or_else(|| {
            TaskDagError::Params(format!("parameter '{name}' has no value yet"))
        }),
        TemplateExpr::Path(path) => {
            if !visiting.insert(path.clone()) {
                return Err(TaskDagError::ConfigForbidden(format!(
                    "circular template reference through '{path}'"
                )));
            }
            let node = snapshot
                .get(&path.task)
                .and_then(|entry| entry.get(path.section.as_str()))
                .and_then(|section| section.get(&path.key))
                .cloned()
                .ok_or_else(|| {
                    TaskDagError::Config(format!("unresolved template path '{path}'"))
                })?;
            let value = render_value(&node, snapshot, free_values, visiting)?;
            visiting.remove(path);
            Ok(value)
        }
    }
}
