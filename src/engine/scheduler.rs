// src/engine/scheduler.rs

//! The scheduler drives the per-task state machine:
//!
//! ```text
//!             ┌──── subset excludes it ───▶ DISABLED
//! WAITING ────┼──── all depends done ─────▶ READY ─── capacity ─▶ RUNNING
//!             │                                                     ├─ exit 0 ─▶ DONE
//!             │                                                     ├─ retries spent ─▶ FAILED
//!             │                                                     └─ cancellation ─▶ KILLED
//!             └──── blocked by a failure (try-best) ─▶ CANCELED
//! ```
//!
//! The loop is cooperative: it never blocks on a runner, only polls
//! `is_alive` and exit codes on a ~100 ms tick. At every iteration boundary
//! the running set respects `parallel_degree` and every running task's
//! dependencies are done.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::context::RunnerContext;
use crate::dag::{DynamicTopoGraph, Selector, TopoGraph};
use crate::engine::TaskName;
use crate::engine::inventory::{TaskDeclaration, TaskEntry};
use crate::errors::{Result, TaskDagError};
use crate::exec::{Runner, RunnerReport, RunnerStatus, TaskLogSpec};
use crate::progress::{TableProgressView, TaskRow};

/// Pause between scheduler iterations.
const POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Exit code reported when a run is cancelled by a signal.
const CANCEL_EXIT_CODE: i32 = 130;

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Maximum number of tasks running at the same time; `<= 0` means
    /// unlimited.
    pub parallel_degree: i64,
    /// Directory for per-task logs (`logs/`) and checkpoints
    /// (`checkpoint/`).
    pub log_path: Option<PathBuf>,
    /// Number of checkpoint files kept per context kind.
    pub checkpoint_keep: usize,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            parallel_degree: -1,
            log_path: None,
            checkpoint_keep: 5,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Restrict the run to a subset of the graph; excluded tasks are
    /// disabled.
    pub selector: Option<Selector>,
    /// Render the progress table while running.
    pub verbose: bool,
    /// Keep executing unrelated tasks after a failure instead of aborting.
    pub try_best: bool,
}

pub struct Scheduler {
    graph: TopoGraph,
    entries: HashMap<TaskName, TaskEntry>,
    context: Arc<dyn RunnerContext>,
    options: SchedulerOptions,
    restored_done: BTreeSet<TaskName>,
    started: bool,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("entries", &self.entries.keys().collect::<Vec<_>>())
            .field("options", &self.options)
            .field("restored_done", &self.restored_done)
            .field("started", &self.started)
            .finish()
    }
}

impl Scheduler {
    pub fn new(context: Arc<dyn RunnerContext>, options: SchedulerOptions) -> Self {
        Self {
            graph: TopoGraph::new(),
            entries: HashMap::new(),
            context,
            options,
            restored_done: BTreeSet::new(),
            started: false,
        }
    }

    /// Register a task. Duplicate names are rejected; dependencies may name
    /// tasks that are added later.
    pub fn add_task(&mut self, decl: TaskDeclaration) -> Result<&mut Self> {
        if self.entries.contains_key(&decl.name) {
            return Err(TaskDagError::Config(format!(
                "task '{}' already exists",
                decl.name
            )));
        }

        let log = self.options.log_path.as_ref().map(|dir| TaskLogSpec {
            dir: dir.join("logs"),
            append: decl.append_log,
        });
        let runner = decl.build_runner(Some(Arc::clone(&self.context)), log);

        self.graph.add(&decl.name, decl.depends.iter().cloned());
        self.entries.insert(
            decl.name.clone(),
            TaskEntry {
                decl,
                runner,
                status: RunnerStatus::Waiting,
            },
        );
        Ok(self)
    }

    pub fn context(&self) -> &Arc<dyn RunnerContext> {
        &self.context
    }

    /// Task names in topological order; fails on an invalid graph.
    pub fn list(&mut self) -> Result<Vec<TaskName>> {
        self.graph.nodes(true)
    }

    pub fn status_of(&self, name: &str) -> Option<RunnerStatus> {
        self.entries.get(name).map(|entry| entry.status)
    }

    pub fn report_of(&self, name: &str) -> Option<RunnerReport> {
        self.entries.get(name).map(|entry| entry.runner.report())
    }

    /// Read access to a task's live runner, for inspection and tests.
    pub fn runner(&self, name: &str) -> Option<&dyn Runner> {
        self.entries.get(name).map(|entry| entry.runner.as_ref())
    }

    /// Replay a checkpoint into the context and mark tasks with restored
    /// outputs as already done. Best-effort: a task the checkpoint cannot
    /// vouch for simply runs again.
    pub fn restore(&mut self, path: &std::path::Path) -> Result<()> {
        self.context.restore(path)?;
        for name in self.context.completed_tasks() {
            if self.entries.contains_key(&name) {
                self.restored_done.insert(name);
            }
        }
        info!(
            restored = self.restored_done.len(),
            "checkpoint restored; recorded tasks will be skipped"
        );
        Ok(())
    }

    /// Stop every running task and mark it killed. Also used from the
    /// cancellation path of the run loop.
    pub fn terminate_all(&mut self) {
        for entry in self.entries.values_mut() {
            if entry.status == RunnerStatus::Running {
                entry.runner.stop();
                entry.status = RunnerStatus::Killed;
                warn!(task = %entry.decl.name, "task killed");
            }
        }
    }

    /// Execute the graph. Returns the exit code of the run: 0 on success,
    /// the failing task's code or 1 otherwise. May be called once.
    pub async fn run(&mut self, opts: RunOptions) -> Result<i32> {
        if self.started {
            return Err(TaskDagError::Runner(
                "scheduler can only run once".to_string(),
            ));
        }
        self.started = true;

        self.graph.validate()?;
        let subset = self.graph.subset(opts.selector.as_ref())?;
        for name in self.entries.keys().cloned().collect::<Vec<_>>() {
            if !subset.contains(&name) {
                if let Some(entry) = self.entries.get_mut(&name) {
                    entry.status = RunnerStatus::Disabled;
                    debug!(task = %name, "task disabled by subset selection");
                }
            }
        }

        let mut active = DynamicTopoGraph::new(subset)?;
        self.apply_restored(&mut active);

        let cancel = Arc::new(AtomicBool::new(false));
        let watcher = spawn_signal_watcher(Arc::clone(&cancel));

        let name_width = self
            .entries
            .keys()
            .map(String::len)
            .max()
            .unwrap_or(4);
        let mut view = TableProgressView::new(self.entries.len(), name_width);
        if opts.verbose {
            view.render(&self.rows(), false);
        }

        let mut ready: Vec<TaskName> = Vec::new();
        let mut running: BTreeSet<TaskName> = BTreeSet::new();
        let mut failed = 0usize;

        let code = loop {
            if cancel.load(Ordering::SeqCst) {
                info!("cancellation requested; stopping running tasks");
                self.terminate_all();
                running.clear();
                break CANCEL_EXIT_CODE;
            }

            // 1. Promote tasks whose dependencies are all done.
            for name in active.top(None) {
                if let Some(entry) = self.entries.get_mut(&name) {
                    if entry.status == RunnerStatus::Waiting {
                        entry.status = RunnerStatus::Ready;
                        ready.push(name);
                    }
                }
            }
            ready.sort_by_key(|name| active.graph().order_id(name));

            // 2. Dispatch within the parallel degree.
            let capacity = self.options.parallel_degree;
            while !ready.is_empty() && (capacity <= 0 || (running.len() as i64) < capacity) {
                let name = ready.remove(0);
                if let Some(entry) = self.entries.get_mut(&name) {
                    entry.status = RunnerStatus::Running;
                    entry.runner.start()?;
                    debug!(task = %name, "task started");
                    running.insert(name);
                }
            }

            // 3. Classify every finished runner before deciding on an
            // abort, so tasks that completed in the same tick as a failure
            // still transition to Done.
            let mut progressed = 0usize;
            let mut abort: Option<i32> = None;
            for name in running.clone() {
                let Some(entry) = self.entries.get_mut(&name) else {
                    continue;
                };
                if entry.runner.is_alive() {
                    continue;
                }
                running.remove(&name);

                let exitcode = entry.runner.exitcode().unwrap_or(1);
                if exitcode == 0 {
                    entry.status = RunnerStatus::Done;
                    active.remove(&name)?;
                    progressed += 1;
                    info!(task = %name, "task done");
                } else {
                    entry.status = RunnerStatus::Failed;
                    failed += 1;
                    error!(task = %name, exit_code = exitcode, "task failed");
                    if !opts.try_best && abort.is_none() {
                        abort = Some(exitcode);
                    }
                }
            }
            if let Some(exitcode) = abort {
                self.terminate_all();
                running.clear();
                break exitcode;
            }

            if opts.verbose {
                view.render(&self.rows(), false);
            }

            // 4. Everything ran to completion.
            if active.is_drained() && running.is_empty() && ready.is_empty() {
                break 0;
            }

            // 5. Try-best stall: nothing running, nothing ready, no progress
            // this iteration, at least one failure — everything still
            // waiting is blocked behind a failed task.
            if opts.try_best
                && running.is_empty()
                && ready.is_empty()
                && progressed == 0
                && failed > 0
            {
                self.cancel_blocked();
                break 1;
            }

            tokio::time::sleep(POLL_INTERVAL).await;
        };

        watcher.abort();
        view.render(&self.rows(), true);
        self.save_checkpoint();

        if code == 0 {
            info!("all tasks finished successfully");
        } else {
            error!(exit_code = code, "run finished with failures");
        }
        Ok(code)
    }

    /// Mark restored tasks done and pop them from the runnable graph, in
    /// topological order so that chains unblock progressively.
    fn apply_restored(&mut self, active: &mut DynamicTopoGraph) {
        let mut restored: Vec<TaskName> = self
            .restored_done
            .iter()
            .filter(|name| active.graph().contains(name))
            .cloned()
            .collect();
        restored.sort_by_key(|name| active.graph().order_id(name));

        for name in restored {
            match active.remove(&name) {
                Ok(()) => {
                    if let Some(entry) = self.entries.get_mut(&name) {
                        entry.status = RunnerStatus::Done;
                        info!(task = %name, "restored from checkpoint");
                    }
                }
                Err(err) => {
                    warn!(
                        task = %name,
                        error = %err,
                        "restored task is still blocked; it will run again"
                    );
                }
            }
        }
    }

    fn cancel_blocked(&mut self) {
        for entry in self.entries.values_mut() {
            if entry.status == RunnerStatus::Waiting {
                entry.status = RunnerStatus::Canceled;
                warn!(task = %entry.decl.name, "task cancelled: blocked by a failed dependency");
            }
        }
    }

    fn save_checkpoint(&self) {
        let Some(log_path) = &self.options.log_path else {
            return;
        };
        let dir = log_path.join("checkpoint");
        match self.context.save(&dir, self.options.checkpoint_keep) {
            Ok(path) => info!(path = %path.display(), "context checkpoint saved"),
            Err(err) => warn!(error = %err, "saving checkpoint failed"),
        }
    }

    /// Row snapshots for the progress table, ordered by topological id.
    fn rows(&self) -> Vec<TaskRow> {
        let mut names: Vec<&TaskName> = self.entries.keys().collect();
        names.sort_by_key(|name| self.graph.order_id(name));

        let mut rows = Vec::with_capacity(names.len());
        for name in names {
            let Some(entry) = self.entries.get(name) else {
                continue;
            };
            let report = entry.runner.report();
            let blocking = self
                .graph
                .depends(name)
                .unwrap_or_default()
                .into_iter()
                .filter(|dep| {
                    self.entries.get(dep).is_some_and(|dep_entry| {
                        !matches!(
                            dep_entry.status,
                            RunnerStatus::Done | RunnerStatus::Disabled
                        )
                    })
                })
                .collect();

            rows.push(TaskRow {
                index: self.graph.order_id(name).unwrap_or(0),
                name: name.clone(),
                status: entry.status,
                start_time: report.start_time,
                elapsed: report.elapsed,
                attempts: report.attempts,
                retry_limit: entry.decl.retry,
                blocking,
            });
        }
        rows
    }
}

/// First interrupt cancels the run cooperatively, the second one exits the
/// process.
fn spawn_signal_watcher(cancel: Arc<AtomicBool>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interrupts = 0u32;

        #[cfg(unix)]
        let mut terminate =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(stream) => Some(stream),
                Err(err) => {
                    warn!(error = %err, "cannot install SIGTERM handler");
                    None
                }
            };

        loop {
            #[cfg(unix)]
            {
                tokio::select! {
                    result = tokio::signal::ctrl_c() => {
                        if result.is_err() {
                            return;
                        }
                    }
                    _ = recv_terminate(&mut terminate) => {}
                }
            }
            #[cfg(not(unix))]
            {
                if tokio::signal::ctrl_c().await.is_err() {
                    return;
                }
            }

            interrupts += 1;
            if interrupts == 1 {
                warn!("received interrupt; cancelling running tasks");
                cancel.store(true, Ordering::SeqCst);
            } else {
                error!("received a second interrupt; exiting immediately");
                std::process::exit(1);
            }
        }
    })
}

#[cfg(unix)]
async fn recv_terminate(stream: &mut Option<tokio::signal::unix::Signal>) {
    match stream {
        Some(stream) => {
            stream.recv().await;
        }
        None => std::future::pending().await,
    }
}
