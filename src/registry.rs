// src/registry.rs

//! Registration facade.
//!
//! Tasks are collected into an explicit [`TaskRegistry`] together with
//! their input/output schemas. [`TaskRegistry::spawn`] then infers the
//! dependency graph by matching input names against producer outputs,
//! synthesizes the parameter document, and constructs a ready-to-run
//! [`Scheduler`] over a [`DependentContext`].
//!
//! Schema entries are either *global* (shared names, matchable across
//! tasks) or *local* (task-only). An optional [`SignatureMap`] renames
//! global names at the task boundary; locals can never be renamed.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::Value;

use crate::JsonMap;
use crate::config::ParameterConfig;
use crate::context::{DependentContext, RunnerContext};
use crate::engine::{Scheduler, SchedulerOptions, TaskDeclaration};
use crate::errors::{Result, TaskDagError};

/// Input or output schema of one task: names with optional defaults.
#[derive(Debug, Clone, Default)]
pub struct TaskSchema {
    globals: BTreeMap<String, Option<Value>>,
    locals: BTreeMap<String, Option<Value>>,
}

impl TaskSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// A shared name, matchable against other tasks' outputs.
    pub fn global(mut self, name: impl Into<String>) -> Self {
        self.globals.insert(name.into(), None);
        self
    }

    /// A shared name with a default value (not required from the caller).
    pub fn global_with_default(mut self, name: impl Into<String>, default: Value) -> Self {
        self.globals.insert(name.into(), Some(default));
        self
    }

    /// A task-only name; never matched and never renamed.
    pub fn local(mut self, name: impl Into<String>, default: Option<Value>) -> Self {
        self.locals.insert(name.into(), default);
        self
    }

    fn is_local(&self, name: &str) -> bool {
        self.locals.contains_key(name)
    }

    fn is_global(&self, name: &str) -> bool {
        self.globals.contains_key(name)
    }
}

/// Renames of global schema entries at the task boundary.
#[derive(Debug, Clone, Default)]
pub struct SignatureMap {
    inputs: BTreeMap<String, BTreeMap<String, String>>,
    outputs: BTreeMap<String, BTreeMap<String, String>>,
}

impl SignatureMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rename_input(
        mut self,
        task: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        self.inputs
            .entry(task.into())
            .or_default()
            .insert(from.into(), to.into());
        self
    }

    pub fn rename_output(
        mut self,
        task: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        self.outputs
            .entry(task.into())
            .or_default()
            .insert(from.into(), to.into());
        self
    }

    fn map_input<'a>(&'a self, task: &str, name: &'a str) -> &'a str {
        self.inputs
            .get(task)
            .and_then(|renames| renames.get(name))
            .map(String::as_str)
            .unwrap_or(name)
    }

    fn map_output<'a>(&'a self, task: &str, name: &'a str) -> &'a str {
        self.outputs
            .get(task)
            .and_then(|renames| renames.get(name))
            .map(String::as_str)
            .unwrap_or(name)
    }

    fn tasks(&self) -> BTreeSet<&str> {
        self.inputs
            .keys()
            .chain(self.outputs.keys())
            .map(String::as_str)
            .collect()
    }

    fn renamed_names(&self, task: &str) -> Vec<(&'static str, &str)> {
        let mut names = Vec::new();
        if let Some(renames) = self.inputs.get(task) {
            names.extend(renames.keys().map(|n| ("input", n.as_str())));
        }
        if let Some(renames) = self.outputs.get(task) {
            names.extend(renames.keys().map(|n| ("output", n.as_str())));
        }
        names
    }
}

/// A declaration plus its schemas, as held by the registry.
#[derive(Debug, Clone)]
pub struct RegisteredTask {
    pub decl: TaskDeclaration,
    pub inputs: TaskSchema,
    pub outputs: TaskSchema,
}

impl RegisteredTask {
    pub fn new(decl: TaskDeclaration) -> Self {
        Self {
            decl,
            inputs: TaskSchema::new(),
            outputs: TaskSchema::new(),
        }
    }

    pub fn inputs(mut self, inputs: TaskSchema) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn outputs(mut self, outputs: TaskSchema) -> Self {
        self.outputs = outputs;
        self
    }
}

/// Explicit registry of task declarations.
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    tasks: Vec<RegisteredTask>,
    names: BTreeSet<String>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Collect a task declaration. Name uniqueness is enforced here.
    pub fn register(&mut self, task: RegisteredTask) -> Result<&mut Self> {
        if !self.names.insert(task.decl.name.clone()) {
            return Err(TaskDagError::Config(format!(
                "task '{}' already exists",
                task.decl.name
            )));
        }
        self.tasks.push(task);
        Ok(self)
    }

    /// Names of the parameters the caller must feed: global inputs without
    /// a default that no task produces.
    pub fn required_params(&self, signatures: Option<&SignatureMap>) -> Result<BTreeSet<String>> {
        let analysis = self.analyse(signatures)?;
        Ok(analysis.required)
    }

    /// Build a scheduler with inferred dependencies over a dependent
    /// context seeded from `feed`.
    pub fn spawn(
        &self,
        feed: BTreeMap<String, Value>,
        signatures: Option<&SignatureMap>,
        options: SchedulerOptions,
    ) -> Result<Scheduler> {
        let analysis = self.analyse(signatures)?;

        let missing: Vec<&str> = analysis
            .required
            .iter()
            .filter(|name| !feed.contains_key(*name))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(TaskDagError::Params(format!(
                "required parameters are missing: {}",
                missing.join(", ")
            )));
        }
        let extras: Vec<&str> = feed
            .keys()
            .filter(|name| !analysis.free.contains_key(*name))
            .map(String::as_str)
            .collect();
        if !extras.is_empty() {
            return Err(TaskDagError::Params(format!(
                "extra parameters received: {}",
                extras.join(", ")
            )));
        }

        let mut params: BTreeMap<String, Value> = BTreeMap::new();
        for (name, default) in &analysis.free {
            match feed.get(name) {
                Some(value) => {
                    params.insert(name.clone(), value.clone());
                }
                None => {
                    if let Some(default) = default {
                        params.insert(name.clone(), default.clone());
                    }
                }
            }
        }

        let config = ParameterConfig::from_value(Value::Object(analysis.tree))?;
        let context = DependentContext::new(config);
        context.set_params(&params)?;

        let mut scheduler = Scheduler::new(Arc::new(context), options);
        for task in &self.tasks {
            let depends = analysis
                .relations
                .get(&task.decl.name)
                .cloned()
                .unwrap_or_default();
            scheduler.add_task(task.decl.clone().depends_on(depends))?;
        }
        Ok(scheduler)
    }

    fn analyse(&self, signatures: Option<&SignatureMap>) -> Result<Analysis> {
        if let Some(signatures) = signatures {
            self.check_signatures(signatures)?;
        }
        let map_input = |task: &str, name: &str| -> String {
            signatures
                .map(|s| s.map_input(task, name).to_string())
                .unwrap_or_else(|| name.to_string())
        };
        let map_output = |task: &str, name: &str| -> String {
            signatures
                .map(|s| s.map_output(task, name).to_string())
                .unwrap_or_else(|| name.to_string())
        };

        let mut tree = JsonMap::new();
        let mut relations: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut free: BTreeMap<String, Option<Value>> = BTreeMap::new();
        let mut required: BTreeSet<String> = BTreeSet::new();

        for task in &self.tasks {
            let name = &task.decl.name;
            let mut deps: BTreeSet<String> = BTreeSet::new();
            let mut input_obj = JsonMap::new();

            for (key, default) in &task.inputs.locals {
                input_obj.insert(
                    key.clone(),
                    default.clone().unwrap_or(Value::Null),
                );
            }

            for (key, default) in &task.inputs.globals {
                let shared = map_input(name, key);
                let producers = self.producers_of(&shared, name, &map_output);
                match producers.len() {
                    0 => {
                        // Nobody produces it: a free parameter under the
                        // shared name.
                        input_obj
                            .insert(key.clone(), Value::String(format!("<%= {shared} %>")));
                        let slot = free.entry(shared.clone()).or_insert(None);
                        if slot.is_none() {
                            *slot = default.clone();
                        }
                        if default.is_none() {
                            required.insert(shared);
                        }
                    }
                    1 => {
                        let (producer, out_key) = &producers[0];
                        deps.insert(producer.clone());
                        input_obj.insert(
                            key.clone(),
                            Value::String(format!("<%= $.{producer}.output.{out_key} %>")),
                        );
                    }
                    _ => {
                        let sources: Vec<String> = producers
                            .iter()
                            .map(|(task, key)| format!("{task}.{key}"))
                            .collect();
                        return Err(TaskDagError::Params(format!(
                            "input '{key}' of task '{name}' is ambiguous; produced by: {}",
                            sources.join(", ")
                        )));
                    }
                }
            }

            let mut output_obj = JsonMap::new();
            for (key, default) in task.outputs.globals.iter().chain(&task.outputs.locals) {
                output_obj.insert(key.clone(), default.clone().unwrap_or(Value::Null));
            }

            let mut entry = JsonMap::new();
            entry.insert("input".to_string(), Value::Object(input_obj));
            entry.insert("output".to_string(), Value::Object(output_obj));
            tree.insert(name.clone(), Value::Object(entry));
            relations.insert(name.clone(), deps);
        }

        Ok(Analysis {
            tree,
            relations,
            free,
            required,
        })
    }

    /// Tasks (other than `consumer`) producing an output whose shared name
    /// is `shared`.
    fn producers_of(
        &self,
        shared: &str,
        consumer: &str,
        map_output: &impl Fn(&str, &str) -> String,
    ) -> Vec<(String, String)> {
        let mut producers = Vec::new();
        for task in &self.tasks {
            if task.decl.name == consumer {
                continue;
            }
            for out_key in task.outputs.globals.keys() {
                if map_output(&task.decl.name, out_key) == shared {
                    producers.push((task.decl.name.clone(), out_key.clone()));
                }
            }
        }
        producers
    }

    fn check_signatures(&self, signatures: &SignatureMap) -> Result<()> {
        let mut unknown: BTreeSet<&str> = signatures.tasks();
        for task in &self.tasks {
            let name = task.decl.name.as_str();
            if !unknown.remove(name) {
                continue;
            }
            for (io, renamed) in signatures.renamed_names(name) {
                let schema = if io == "input" {
                    &task.inputs
                } else {
                    &task.outputs
                };
                if schema.is_local(renamed) {
                    return Err(TaskDagError::Params(format!(
                        "local {io} parameter '{renamed}' of task '{name}' cannot be renamed"
                    )));
                }
                if !schema.is_global(renamed) {
                    return Err(TaskDagError::Params(format!(
                        "signature map renames unknown {io} parameter '{renamed}' of task '{name}'"
                    )));
                }
            }
        }
        if !unknown.is_empty() {
            return Err(TaskDagError::Params(format!(
                "signature map names nonexistent tasks: {}",
                unknown.into_iter().collect::<Vec<_>>().join(", ")
            )));
        }
        Ok(())
    }
}

struct Analysis {
    tree: JsonMap,
    relations: BTreeMap<String, BTreeSet<String>>,
    free: BTreeMap<String, Option<Value>>,
    required: BTreeSet<String>,
}
