// src/context/checkpoint.rs

//! Timestamped checkpoint files.
//!
//! A checkpoint is `<prefix>-YYYYMMDD.HHMMSS.json` inside a checkpoint
//! directory. After every write the directory is pruned so that only the
//! newest `max_keep` files for that prefix survive.

use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, TaskDagError};

pub fn write_checkpoint(
    dir: &Path,
    prefix: &str,
    tree: &Value,
    max_keep: usize,
) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    if !dir.is_dir() {
        return Err(TaskDagError::Context(format!(
            "checkpoint path '{}' is not a directory",
            dir.display()
        )));
    }

    let stamp = chrono::Local::now().format("%Y%m%d.%H%M%S");
    let path = dir.join(format!("{prefix}-{stamp}.json"));
    fs::write(&path, serde_json::to_string_pretty(tree)?)?;
    debug!(path = %path.display(), "checkpoint written");

    prune_checkpoints(dir, prefix, max_keep)?;
    Ok(path)
}

/// Delete checkpoint files for `prefix` beyond the newest `max_keep`, in
/// timestamp-descending order.
pub fn prune_checkpoints(dir: &Path, prefix: &str, max_keep: usize) -> Result<()> {
    let pattern = Regex::new(&format!(
        r"^{}-\d{{8}}\.\d{{6}}\.json$",
        regex::escape(prefix)
    ))
    .map_err(|e| TaskDagError::Context(format!("invalid checkpoint prefix: {e}")))?;

    let mut matching: Vec<String> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if pattern.is_match(&name) {
            matching.push(name);
        }
    }

    // Timestamps in the file name sort lexicographically; newest first.
    matching.sort_unstable_by(|a, b| b.cmp(a));
    for stale in matching.iter().skip(max_keep) {
        debug!(file = %stale, "pruning old checkpoint");
        fs::remove_file(dir.join(stale))?;
    }
    Ok(())
}

pub fn read_checkpoint(path: &Path) -> Result<Value> {
    let contents = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}
