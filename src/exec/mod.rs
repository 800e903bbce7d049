// src/exec/mod.rs

//! Task runners.
//!
//! A [`Runner`] is the live execution object for one task. Two concrete
//! kinds exist behind the trait:
//!
//! - [`CommandRunner`] — spawns a child process per attempt, feeds the
//!   task's input map through the `TASK_RUNNER_PARAMETERS` environment
//!   variable and harvests a trailing JSON document from stdout.
//! - [`FunctionRunner`] — invokes a callable on a blocking worker thread
//!   with the input map as parameters.
//!
//! The scheduler only relies on the capability set
//! `{start, is_alive, stop, exitcode, output}`.

pub mod command;
pub mod function;

pub use command::CommandRunner;
pub use function::{FunctionRunner, TaskFailure, TaskFn, TaskInput};

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant, SystemTime};

use serde_json::Value;
use tracing::warn;

use crate::JsonMap;
use crate::context::RunnerContext;
use crate::errors::{Result, TaskDagError};

/// Environment variable through which a command child receives its input
/// map as a JSON string.
pub const TASK_ENV_PARAMS: &str = "TASK_RUNNER_PARAMETERS";

/// Status of a task as driven by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunnerStatus {
    Disabled,
    Waiting,
    Ready,
    Running,
    Done,
    Failed,
    Killed,
    Canceled,
}

impl RunnerStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunnerStatus::Disabled
                | RunnerStatus::Done
                | RunnerStatus::Failed
                | RunnerStatus::Killed
                | RunnerStatus::Canceled
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            RunnerStatus::Disabled => "Disabled",
            RunnerStatus::Waiting => "Waiting",
            RunnerStatus::Ready => "Ready",
            RunnerStatus::Running => "Running",
            RunnerStatus::Done => "Done",
            RunnerStatus::Failed => "Failed",
            RunnerStatus::Killed => "Killed",
            RunnerStatus::Canceled => "Canceled",
        }
    }
}

impl fmt::Display for RunnerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Where a command runner writes the child's stdout/stderr.
#[derive(Debug, Clone)]
pub struct TaskLogSpec {
    /// Directory for `<name>.stdout` / `<name>.stderr`.
    pub dir: std::path::PathBuf,
    /// Append instead of truncating on the first attempt.
    pub append: bool,
}

/// The command of a command runner.
#[derive(Debug, Clone)]
pub enum CommandTarget {
    /// Executed directly, first element is the program.
    Argv(Vec<String>),
    /// Interpreted by the shell (`sh -c`, `cmd /C` on Windows).
    Shell(String),
}

impl fmt::Display for CommandTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandTarget::Argv(argv) => write!(f, "{}", argv.join(" ")),
            CommandTarget::Shell(line) => f.write_str(line),
        }
    }
}

/// Snapshot of a runner's runtime record.
#[derive(Debug, Clone, Default)]
pub struct RunnerReport {
    pub attempts: u32,
    pub retry_limit: u32,
    pub start_time: Option<SystemTime>,
    pub elapsed: Option<Duration>,
    pub exitcode: Option<i32>,
    pub output: Option<Value>,
}

/// Hook invoked around a runner's execution.
///
/// `begin` runs once before the first attempt; a failure there fails the
/// task without consuming an attempt. `end` runs once after a successful
/// attempt with the harvested output; a failure converts the success into
/// exit code 1.
pub trait RunnerHook: Send + Sync {
    fn begin(&self, task: &str, input: &JsonMap) -> anyhow::Result<()>;
    fn end(&self, task: &str, input: &JsonMap, output: &Value) -> anyhow::Result<()>;
}

/// Live execution object for one task.
pub trait Runner: Send {
    fn name(&self) -> &str;

    /// Spawn the worker. May be called at most once.
    fn start(&mut self) -> Result<()>;

    /// Whether the worker is still running.
    fn is_alive(&self) -> bool;

    /// Request cancellation: no further attempts, and the current child
    /// process group (if any) receives SIGTERM. Idempotent.
    fn stop(&self);

    /// Whether [`Runner::stop`] has been called.
    fn stopped(&self) -> bool;

    /// Exit code of the finished worker, if any. Zero means success.
    fn exitcode(&self) -> Option<i32>;

    /// Harvested output value of a successful worker.
    fn output(&self) -> Option<Value>;

    /// Snapshot of the runtime record.
    fn report(&self) -> RunnerReport;
}

/// Mutable record shared between a runner handle and its worker.
#[derive(Debug, Default)]
pub(crate) struct Vitals {
    pub attempts: u32,
    pub start_time: Option<SystemTime>,
    pub started: Option<Instant>,
    pub elapsed: Option<Duration>,
    pub exitcode: Option<i32>,
    pub output: Option<Value>,
}

pub(crate) type SharedVitals = Arc<Mutex<Vitals>>;

pub(crate) fn lock_vitals(vitals: &SharedVitals) -> MutexGuard<'_, Vitals> {
    vitals
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Mark the start timestamps, failing if the runner already ran.
pub(crate) fn mark_started(vitals: &SharedVitals, name: &str) -> Result<()> {
    let mut v = lock_vitals(vitals);
    if v.start_time.is_some() {
        return Err(TaskDagError::Runner(format!(
            "runner '{name}' can only be started once"
        )));
    }
    v.start_time = Some(SystemTime::now());
    v.started = Some(Instant::now());
    Ok(())
}

/// Record the final exit code and elapsed time.
pub(crate) fn mark_finished(vitals: &SharedVitals, code: i32, output: Option<Value>) {
    let mut v = lock_vitals(vitals);
    v.exitcode = Some(code);
    v.elapsed = v.started.map(|t| t.elapsed());
    if let Some(output) = output {
        v.output = Some(output);
    }
}

pub(crate) fn make_report(vitals: &SharedVitals, retry_limit: u32, alive: bool) -> RunnerReport {
    let v = lock_vitals(vitals);
    let elapsed = if alive {
        v.started.map(|t| t.elapsed())
    } else {
        v.elapsed
    };
    RunnerReport {
        attempts: v.attempts,
        retry_limit,
        start_time: v.start_time,
        elapsed,
        exitcode: v.exitcode,
        output: v.output.clone(),
    }
}

/// Find the trailing JSON document in a child's stdout: the entire text,
/// else the last line.
pub(crate) fn parse_trailing_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }
    serde_json::from_str(trimmed.lines().next_back()?.trim()).ok()
}

/// Store a runner's return value as the task output.
///
/// Objects publish as-is, `null` publishes as an empty map, anything else
/// is rejected (contexts only accept mappings).
pub(crate) fn publish_output(
    context: &dyn RunnerContext,
    name: &str,
    value: &Value,
) -> Result<()> {
    let map = match value {
        Value::Object(map) => map.clone(),
        Value::Null => JsonMap::new(),
        other => {
            return Err(TaskDagError::Context(format!(
                "output of task '{name}' is not a JSON object: {other}"
            )));
        }
    };
    context.set_output(name, map)
}

pub(crate) fn run_hooks_begin(
    hooks: &[Arc<dyn RunnerHook>],
    name: &str,
    input: &JsonMap,
) -> bool {
    for hook in hooks {
        if let Err(err) = hook.begin(name, input) {
            warn!(task = %name, error = %err, "begin hook failed");
            return false;
        }
    }
    true
}

pub(crate) fn run_hooks_end(
    hooks: &[Arc<dyn RunnerHook>],
    name: &str,
    input: &JsonMap,
    output: &Value,
) -> bool {
    for hook in hooks {
        if let Err(err) = hook.end(name, input, output) {
            warn!(task = %name, error = %err, "end hook failed");
            return false;
        }
    }
    true
}
