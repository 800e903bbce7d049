// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `taskdag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "taskdag",
    version,
    about = "Run a DAG of tasks with bounded parallelism, retries and shared parameters.",
    long_about = None
)]
pub struct CliArgs {
    /// Directory to look up the task file in.
    ///
    /// `taskdag.json` is expected inside this directory unless `--config`
    /// points at an explicit file.
    #[arg(short = 'd', long, value_name = "DIR", default_value = ".")]
    pub start_dir: String,

    /// Path to the task file (JSON). Overrides `--start-dir`.
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// List all registered tasks in topological order and exit.
    #[arg(short = 'l', long)]
    pub list: bool,

    /// Run a subset of tasks described by selector items.
    ///
    /// Items are task names, regular expressions, topological ids or
    /// `LO-HI[-STEP]` ranges. With no items the whole graph runs.
    #[arg(short = 'r', long, value_name = "SELECTOR", num_args = 0..)]
    pub run: Option<Vec<String>>,

    /// Restrict the loaded task set to these tasks (plus their dependencies)
    /// before scheduling.
    #[arg(long, value_name = "NAME", num_args = 1..)]
    pub tasks: Option<Vec<String>>,

    /// Values of the free parameters, as a JSON object.
    #[arg(long, value_name = "JSON")]
    pub feed_values: Option<String>,

    /// Print the parameters before (and, after a run, again after) execution.
    #[arg(long)]
    pub print_params: bool,

    /// Maximum number of tasks running at the same time (<= 0 means
    /// unlimited).
    #[arg(
        short = 'p',
        long,
        value_name = "N",
        default_value_t = -1,
        allow_negative_numbers = true
    )]
    pub parallel: i64,

    /// Keep executing unrelated tasks after a failure instead of aborting
    /// the whole run.
    #[arg(long)]
    pub try_best: bool,

    /// Render the live progress table while running.
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Directory for per-task logs and checkpoints.
    #[arg(long, value_name = "DIR")]
    pub log_path: Option<String>,

    /// Restore a checkpoint file before running; tasks with recorded outputs
    /// are treated as already done.
    #[arg(long, value_name = "FILE")]
    pub restore: Option<String>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `TASKDAG_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
