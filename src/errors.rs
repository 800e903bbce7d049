// src/errors.rs

//! Crate-wide error type and helpers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TaskDagError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Forbidden configuration: {0}")]
    ConfigForbidden(String),

    #[error("Dependency graph is not topological: {0}")]
    GraphInvalid(String),

    #[error("Invalid selector: {0}")]
    Selector(String),

    #[error("Parameter error: {0}")]
    Params(String),

    #[error("Context error: {0}")]
    Context(String),

    #[error("Runner error: {0}")]
    Runner(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, TaskDagError>;
