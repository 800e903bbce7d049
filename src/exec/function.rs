// src/exec/function.rs

//! Function runner: invokes a callable on a blocking worker thread.
//!
//! Cancellation is cooperative: the retry loop polls the stop flag between
//! attempts, an attempt already in flight runs to completion. Process-level
//! isolation belongs to [`crate::exec::CommandRunner`].

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::Value;
use tracing::{info, warn};

use crate::JsonMap;
use crate::context::RunnerContext;
use crate::errors::Result;
use crate::exec::{self, Runner, RunnerHook, RunnerReport, SharedVitals};

/// Arguments handed to a task callable.
///
/// `params` is the context input map overlaid with the declaration's
/// keyword arguments; `args` carries the positional arguments verbatim.
#[derive(Debug, Clone, Default)]
pub struct TaskInput {
    pub args: Vec<Value>,
    pub params: JsonMap,
}

/// A failed (or explicitly exiting) task callable.
///
/// `code` 0 counts as success with an empty output, mirroring a process
/// exiting cleanly without printing a result.
#[derive(Debug, Clone)]
pub struct TaskFailure {
    pub code: i32,
    pub message: String,
}

impl TaskFailure {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self::new(1, message)
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task failed with code {}: {}", self.code, self.message)
    }
}

impl std::error::Error for TaskFailure {}

/// A task callable.
pub type TaskFn = Arc<dyn Fn(TaskInput) -> std::result::Result<Value, TaskFailure> + Send + Sync>;

pub struct FunctionRunner {
    name: String,
    func: TaskFn,
    args: Vec<Value>,
    kwargs: JsonMap,
    retry_limit: u32,
    retry_interval: Duration,
    context: Option<Arc<dyn RunnerContext>>,
    hooks: Vec<Arc<dyn RunnerHook>>,
    vitals: SharedVitals,
    stop_flag: Arc<AtomicBool>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl FunctionRunner {
    pub fn new(name: impl Into<String>, func: TaskFn) -> Self {
        Self {
            name: name.into(),
            func,
            args: Vec::new(),
            kwargs: JsonMap::new(),
            retry_limit: 1,
            retry_interval: Duration::from_secs(5),
            context: None,
            hooks: Vec::new(),
            vitals: SharedVitals::default(),
            stop_flag: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    pub fn args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn kwargs(mut self, kwargs: JsonMap) -> Self {
        self.kwargs = kwargs;
        self
    }

    pub fn retry(mut self, retry_limit: u32, retry_interval: Duration) -> Self {
        self.retry_limit = retry_limit.max(1);
        self.retry_interval = retry_interval;
        self
    }

    pub fn context(mut self, context: Arc<dyn RunnerContext>) -> Self {
        self.context = Some(context);
        self
    }

    pub fn hooks(mut self, hooks: Vec<Arc<dyn RunnerHook>>) -> Self {
        self.hooks = hooks;
        self
    }
}

impl Runner for FunctionRunner {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self) -> Result<()> {
        exec::mark_started(&self.vitals, &self.name)?;

        let worker = Worker {
            name: self.name.clone(),
            func: Arc::clone(&self.func),
            args: self.args.clone(),
            kwargs: self.kwargs.clone(),
            retry_limit: self.retry_limit,
            retry_interval: self.retry_interval,
            context: self.context.clone(),
            hooks: self.hooks.clone(),
            vitals: Arc::clone(&self.vitals),
            stop_flag: Arc::clone(&self.stop_flag),
        };
        self.handle = Some(tokio::task::spawn_blocking(move || worker.run()));
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn stop(&self) {
        // Worker threads must poll: the flag stops further attempts, the
        // attempt currently in flight cannot be interrupted.
        self.stop_flag.store(true, Ordering::SeqCst);
    }

    fn stopped(&self) -> bool {
        self.stop_flag.load(Ordering::SeqCst)
    }

    fn exitcode(&self) -> Option<i32> {
        exec::lock_vitals(&self.vitals).exitcode
    }

    fn output(&self) -> Option<Value> {
        exec::lock_vitals(&self.vitals).output.clone()
    }

    fn report(&self) -> RunnerReport {
        exec::make_report(&self.vitals, self.retry_limit, self.is_alive())
    }
}

struct Worker {
    name: String,
    func: TaskFn,
    args: Vec<Value>,
    kwargs: JsonMap,
    retry_limit: u32,
    retry_interval: Duration,
    context: Option<Arc<dyn RunnerContext>>,
    hooks: Vec<Arc<dyn RunnerHook>>,
    vitals: SharedVitals,
    stop_flag: Arc<AtomicBool>,
}

impl Worker {
    fn run(self) {
        // Keyword arguments override context inputs of the same name.
        let mut params = self
            .context
            .as_ref()
            .map(|ctx| ctx.get_input(&self.name))
            .unwrap_or_default();
        params.extend(self.kwargs.clone());

        if !exec::run_hooks_begin(&self.hooks, &self.name, &params) {
            exec::mark_finished(&self.vitals, 1, None);
            return;
        }

        let mut code = 1i32;
        let mut result = Value::Null;
        let mut attempt = 0u32;
        while !self.stop_flag.load(Ordering::SeqCst) && attempt < self.retry_limit {
            if attempt > 0 {
                info!(
                    task = %self.name,
                    "waiting {:.2}s before retry",
                    self.retry_interval.as_secs_f64()
                );
                std::thread::sleep(self.retry_interval);
                if self.stop_flag.load(Ordering::SeqCst) {
                    break;
                }
            }
            attempt += 1;
            exec::lock_vitals(&self.vitals).attempts = attempt;

            let input = TaskInput {
                args: self.args.clone(),
                params: params.clone(),
            };
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| (self.func)(input)));
            match outcome {
                Ok(Ok(value)) => {
                    code = 0;
                    result = value;
                }
                Ok(Err(failure)) if failure.code == 0 => {
                    code = 0;
                    result = Value::Null;
                }
                Ok(Err(failure)) => {
                    code = failure.code;
                    warn!(
                        task = %self.name,
                        exit_code = failure.code,
                        attempt,
                        retry_limit = self.retry_limit,
                        "callable failed: {}",
                        failure.message
                    );
                }
                Err(_panic) => {
                    code = 1;
                    warn!(
                        task = %self.name,
                        attempt,
                        retry_limit = self.retry_limit,
                        "callable panicked"
                    );
                }
            }
            if code == 0 {
                break;
            }
        }

        let mut output = None;
        if code == 0 {
            if !exec::run_hooks_end(&self.hooks, &self.name, &params, &result) {
                code = 1;
            } else if let Some(context) = &self.context {
                if let Err(err) = exec::publish_output(context.as_ref(), &self.name, &result) {
                    warn!(task = %self.name, error = %err, "recording output failed");
                    code = 1;
                }
            }
            if code == 0 {
                output = Some(result);
            }
        }
        exec::mark_finished(&self.vitals, code, output);
    }
}
