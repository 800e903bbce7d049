// src/engine/inventory.rs

//! Task declarations and the live runner inventory.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use encoding_rs::Encoding;
use serde_json::Value;

use crate::JsonMap;
use crate::config::model::{CommandLine, TaskFileEntry};
use crate::context::RunnerContext;
use crate::errors::{Result, TaskDagError};
use crate::exec::{
    CommandRunner, CommandTarget, FunctionRunner, Runner, RunnerHook, RunnerStatus, TaskFailure,
    TaskFn, TaskInput, TaskLogSpec,
};

/// What a task executes.
#[derive(Clone)]
pub enum TaskTarget {
    Command(CommandTarget),
    Function(TaskFn),
}

impl fmt::Debug for TaskTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskTarget::Command(target) => f.debug_tuple("Command").field(target).finish(),
            TaskTarget::Function(_) => f.write_str("Function(..)"),
        }
    }
}

/// Declaration of one task, as collected before the scheduler starts.
#[derive(Clone)]
pub struct TaskDeclaration {
    pub name: String,
    pub target: TaskTarget,
    pub args: Vec<Value>,
    pub kwargs: JsonMap,
    pub depends: BTreeSet<String>,
    pub retry: u32,
    pub interval: Duration,
    pub daemon: bool,
    pub append_log: bool,
    pub encoding: &'static Encoding,
    pub hooks: Vec<Arc<dyn RunnerHook>>,
}

impl fmt::Debug for TaskDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDeclaration")
            .field("name", &self.name)
            .field("target", &self.target)
            .field("depends", &self.depends)
            .field("retry", &self.retry)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl TaskDeclaration {
    fn with_target(name: impl Into<String>, target: TaskTarget) -> Self {
        Self {
            name: name.into(),
            target,
            args: Vec::new(),
            kwargs: JsonMap::new(),
            depends: BTreeSet::new(),
            retry: 1,
            interval: Duration::from_secs(5),
            daemon: true,
            append_log: false,
            encoding: encoding_rs::UTF_8,
            hooks: Vec::new(),
        }
    }

    /// A task executing an argv vector.
    pub fn command(name: impl Into<String>, argv: Vec<String>) -> Self {
        Self::with_target(name, TaskTarget::Command(CommandTarget::Argv(argv)))
    }

    /// A task executing a shell line.
    pub fn shell(name: impl Into<String>, line: impl Into<String>) -> Self {
        Self::with_target(name, TaskTarget::Command(CommandTarget::Shell(line.into())))
    }

    /// A task invoking a callable on a worker thread.
    pub fn function<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(TaskInput) -> std::result::Result<Value, TaskFailure> + Send + Sync + 'static,
    {
        Self::with_target(name, TaskTarget::Function(Arc::new(func)))
    }

    /// Build a declaration from a task-file entry. The caller supplies the
    /// dependency set (explicit `depends` plus template-implied edges).
    pub fn from_file_entry(name: &str, entry: &TaskFileEntry) -> Result<Self> {
        let target = match &entry.cmd {
            CommandLine::Shell(line) => TaskTarget::Command(CommandTarget::Shell(line.clone())),
            CommandLine::Argv(argv) => TaskTarget::Command(CommandTarget::Argv(argv.clone())),
        };

        let mut decl = Self::with_target(name, target)
            .retry(entry.retry)
            .interval_secs(entry.interval)
            .daemon(entry.daemon)
            .append_log(entry.append_log);
        if let Some(label) = &entry.encoding {
            decl = decl.encoding_label(label)?;
        }
        Ok(decl)
    }

    pub fn depends_on<I, S>(mut self, depends: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends.extend(depends.into_iter().map(Into::into));
        self
    }

    pub fn args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn kwargs(mut self, kwargs: JsonMap) -> Self {
        self.kwargs = kwargs;
        self
    }

    /// Number of attempts; clamped to at least one.
    pub fn retry(mut self, retry: u32) -> Self {
        self.retry = retry.max(1);
        self
    }

    pub fn interval_secs(mut self, seconds: f64) -> Self {
        self.interval = Duration::from_secs_f64(seconds.max(0.0));
        self
    }

    pub fn daemon(mut self, daemon: bool) -> Self {
        self.daemon = daemon;
        self
    }

    pub fn append_log(mut self, append_log: bool) -> Self {
        self.append_log = append_log;
        self
    }

    pub fn encoding(mut self, encoding: &'static Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Look up a stdout encoding by label (e.g. `"gbk"`, `"utf-8"`).
    pub fn encoding_label(mut self, label: &str) -> Result<Self> {
        let encoding = Encoding::for_label(label.as_bytes()).ok_or_else(|| {
            TaskDagError::Config(format!(
                "task '{}' has unknown encoding label '{label}'",
                self.name
            ))
        })?;
        self.encoding = encoding;
        Ok(self)
    }

    pub fn hook(mut self, hook: Arc<dyn RunnerHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub(crate) fn build_runner(
        &self,
        context: Option<Arc<dyn RunnerContext>>,
        log: Option<TaskLogSpec>,
    ) -> Box<dyn Runner> {
        match &self.target {
            TaskTarget::Command(target) => {
                let mut runner = CommandRunner::new(&self.name, target.clone())
                    .retry(self.retry, self.interval)
                    .encoding(self.encoding)
                    .hooks(self.hooks.clone())
                    .log(log);
                if let Some(context) = context {
                    runner = runner.context(context);
                }
                Box::new(runner)
            }
            TaskTarget::Function(func) => {
                let mut runner = FunctionRunner::new(&self.name, Arc::clone(func))
                    .args(self.args.clone())
                    .kwargs(self.kwargs.clone())
                    .retry(self.retry, self.interval)
                    .hooks(self.hooks.clone());
                if let Some(context) = context {
                    runner = runner.context(context);
                }
                Box::new(runner)
            }
        }
    }
}

/// One inventory slot: the declaration, its live runner and the status the
/// scheduler drives through the state machine.
pub(crate) struct TaskEntry {
    pub decl: TaskDeclaration,
    pub runner: Box<dyn Runner>,
    pub status: RunnerStatus,
}
