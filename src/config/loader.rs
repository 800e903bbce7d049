// src/config/loader.rs

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{CommandLine, TaskFile, TaskFileEntry};
use crate::errors::{Result, TaskDagError};

/// Load a task file from a given path without semantic validation.
///
/// Use [`load_and_validate`] for the full check (dependency references,
/// acyclicity, sane retry settings).
pub fn load_from_path(path: impl AsRef<Path>) -> Result<TaskFile> {
    let contents = fs::read_to_string(path.as_ref())?;
    let tasks: BTreeMap<String, TaskFileEntry> = serde_json::from_str(&contents)?;
    Ok(TaskFile { tasks })
}

/// Load a task file and run basic validation.
///
/// This is the recommended entry point for the rest of the application:
///
/// - Parses JSON, applying the serde defaults.
/// - Checks for:
///   - empty files and empty argv vectors,
///   - `retry` of zero and negative intervals,
///   - unknown or self-referential `depends` entries,
///   - dependency cycles (including edges implied by input templates).
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<TaskFile> {
    let file = load_from_path(path)?;
    validate(&file)?;
    Ok(file)
}

/// Resolve the task file path from the CLI arguments.
///
/// An explicit `--config` wins; otherwise `taskdag.json` inside the start
/// directory is used.
pub fn resolve_config_path(start_dir: &str, explicit: Option<&str>) -> PathBuf {
    match explicit {
        Some(path) => PathBuf::from(path),
        None => Path::new(start_dir).join("taskdag.json"),
    }
}

fn validate(file: &TaskFile) -> Result<()> {
    if file.tasks.is_empty() {
        return Err(TaskDagError::Config(
            "task file must contain at least one task".to_string(),
        ));
    }

    for (name, entry) in &file.tasks {
        if let CommandLine::Argv(argv) = &entry.cmd {
            if argv.is_empty() {
                return Err(TaskDagError::Config(format!(
                    "task '{name}' has an empty argv command"
                )));
            }
        }
        if entry.retry == 0 {
            return Err(TaskDagError::Config(format!(
                "task '{name}' has retry 0; at least one attempt is required"
            )));
        }
        if entry.interval < 0.0 || !entry.interval.is_finite() {
            return Err(TaskDagError::Config(format!(
                "task '{name}' has an invalid retry interval {}",
                entry.interval
            )));
        }
        for dep in &entry.depends {
            if !file.tasks.contains_key(dep) {
                return Err(TaskDagError::Config(format!(
                    "task '{name}' has unknown dependency '{dep}' in `depends`"
                )));
            }
            if dep == name {
                return Err(TaskDagError::Config(format!(
                    "task '{name}' cannot depend on itself in `depends`"
                )));
            }
        }
    }

    validate_dag(file)
}

fn validate_dag(file: &TaskFile) -> Result<()> {
    // Edge direction: dep -> task, over both the explicit `depends` lists
    // and the edges implied by input templates.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
    let mut implied: Vec<(String, Vec<String>)> = Vec::new();

    for name in file.tasks.keys() {
        graph.add_node(name.as_str());
        implied.push((
            name.clone(),
            file.dependencies_of(name)?.into_iter().collect(),
        ));
    }

    for (name, deps) in &implied {
        for dep in deps {
            if !file.tasks.contains_key(dep) {
                return Err(TaskDagError::Config(format!(
                    "task '{name}' references unknown task '{dep}' from its input"
                )));
            }
            graph.add_edge(dep.as_str(), name.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => {
            let node = cycle.node_id();
            Err(TaskDagError::GraphInvalid(format!(
                "cycle detected in task dependencies involving task '{node}'"
            )))
        }
    }
}
