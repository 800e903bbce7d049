// src/exec/command.rs

//! Command runner: one child process per attempt.

use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Context as _;
use encoding_rs::Encoding;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, error, info, warn};

use crate::JsonMap;
use crate::context::RunnerContext;
use crate::errors::Result;
use crate::exec::{
    self, CommandTarget, Runner, RunnerHook, RunnerReport, SharedVitals, TASK_ENV_PARAMS,
    TaskLogSpec,
};

/// Handle to the process group of the attempt currently in flight.
type PgidSlot = Arc<std::sync::Mutex<Option<u32>>>;

pub struct CommandRunner {
    name: String,
    target: CommandTarget,
    retry_limit: u32,
    retry_interval: Duration,
    encoding: &'static Encoding,
    context: Option<Arc<dyn RunnerContext>>,
    hooks: Vec<Arc<dyn RunnerHook>>,
    log: Option<TaskLogSpec>,
    vitals: SharedVitals,
    stop_flag: Arc<AtomicBool>,
    pgid: PgidSlot,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl CommandRunner {
    pub fn new(name: impl Into<String>, target: CommandTarget) -> Self {
        Self {
            name: name.into(),
            target,
            retry_limit: 1,
            retry_interval: Duration::from_secs(5),
            encoding: encoding_rs::UTF_8,
            context: None,
            hooks: Vec::new(),
            log: None,
            vitals: SharedVitals::default(),
            stop_flag: Arc::new(AtomicBool::new(false)),
            pgid: PgidSlot::default(),
            handle: None,
        }
    }

    pub fn retry(mut self, retry_limit: u32, retry_interval: Duration) -> Self {
        self.retry_limit = retry_limit.max(1);
        self.retry_interval = retry_interval;
        self
    }

    pub fn encoding(mut self, encoding: &'static Encoding) -> Self {
        self.encoding = encoding;
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

    pub fn log(mut self, log: Option<TaskLogSpec>) -> Self {
        self.log = log;
        self
    }
}

impl Runner for CommandRunner {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self) -> Result<()> {
        exec::mark_started(&self.vitals, &self.name)?;

        let worker = Worker {
            name: self.name.clone(),
            target: self.target.clone(),
            retry_limit: self.retry_limit,
            retry_interval: self.retry_interval,
            encoding: self.encoding,
            context: self.context.clone(),
            hooks: self.hooks.clone(),
            log: self.log.clone(),
            vitals: Arc::clone(&self.vitals),
            stop_flag: Arc::clone(&self.stop_flag),
            pgid: Arc::clone(&self.pgid),
        };
        self.handle = Some(tokio::spawn(worker.run()));
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        signal_process_group(&self.pgid, &self.name);
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

#[cfg(unix)]
fn signal_process_group(pgid: &PgidSlot, name: &str) {
    let pid = pgid
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .take();
    if let Some(pid) = pid {
        debug!(task = %name, pid, "sending SIGTERM to process group");
        // The child was started in its own session, so the group id equals
        // the child pid and the signal reaches the whole subtree.
        unsafe {
            libc::killpg(pid as libc::pid_t, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn signal_process_group(_pgid: &PgidSlot, name: &str) {
    // Without process groups the in-flight attempt is reaped when the
    // worker future drops the child (`kill_on_drop`).
    debug!(task = %name, "stop requested; child will be killed on drop");
}

struct Worker {
    name: String,
    target: CommandTarget,
    retry_limit: u32,
    retry_interval: Duration,
    encoding: &'static Encoding,
    context: Option<Arc<dyn RunnerContext>>,
    hooks: Vec<Arc<dyn RunnerHook>>,
    log: Option<TaskLogSpec>,
    vitals: SharedVitals,
    stop_flag: Arc<AtomicBool>,
    pgid: PgidSlot,
}

impl Worker {
    async fn run(self) {
        let input = self
            .context
            .as_ref()
            .map(|ctx| ctx.get_input(&self.name))
            .unwrap_or_default();

        if !exec::run_hooks_begin(&self.hooks, &self.name, &input) {
            exec::mark_finished(&self.vitals, 1, None);
            return;
        }

        let payload = match serde_json::to_string(&input) {
            Ok(payload) => payload,
            Err(err) => {
                error!(task = %self.name, error = %err, "cannot serialize input parameters");
                exec::mark_finished(&self.vitals, 1, None);
                return;
            }
        };

        let mut logs = match open_logs(&self.name, self.log.as_ref()).await {
            Ok(logs) => logs,
            Err(err) => {
                error!(task = %self.name, error = %err, "cannot open task log files");
                exec::mark_finished(&self.vitals, 1, None);
                return;
            }
        };

        let mut code = 1i32;
        let mut stdout_bytes: Vec<u8> = Vec::new();
        let mut attempt = 0u32;
        while !self.stop_flag.load(Ordering::SeqCst) && attempt < self.retry_limit {
            if attempt > 0 {
                info!(
                    task = %self.name,
                    "waiting {:.2}s before retry",
                    self.retry_interval.as_secs_f64()
                );
                tokio::time::sleep(self.retry_interval).await;
                if self.stop_flag.load(Ordering::SeqCst) {
                    break;
                }
            }
            attempt += 1;
            exec::lock_vitals(&self.vitals).attempts = attempt;

            match self.run_attempt(&payload, &mut logs).await {
                Ok((attempt_code, bytes)) => {
                    code = attempt_code;
                    stdout_bytes = bytes;
                }
                Err(err) => {
                    error!(task = %self.name, error = %err, "attempt failed to execute");
                    code = 1;
                    stdout_bytes.clear();
                }
            }

            if code == 0 {
                break;
            }
            warn!(
                task = %self.name,
                exit_code = code,
                attempt,
                retry_limit = self.retry_limit,
                "command exited with non-zero status"
            );
        }

        let mut output = None;
        if code == 0 {
            let (decoded, _, _) = self.encoding.decode(&stdout_bytes);
            let value = exec::parse_trailing_json(&decoded)
                .unwrap_or_else(|| Value::Object(JsonMap::new()));

            if !exec::run_hooks_end(&self.hooks, &self.name, &input, &value) {
                code = 1;
            } else if let Some(context) = &self.context {
                if let Err(err) = exec::publish_output(context.as_ref(), &self.name, &value) {
                    warn!(task = %self.name, error = %err, "recording output failed");
                    code = 1;
                }
            }
            if code == 0 {
                output = Some(value);
            }
        }
        exec::mark_finished(&self.vitals, code, output);
    }

    async fn run_attempt(
        &self,
        payload: &str,
        logs: &mut Option<TaskLogs>,
    ) -> Result<(i32, Vec<u8>)> {
        let mut cmd = build_command(&self.target)?;
        cmd.env(TASK_ENV_PARAMS, payload)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning process for task '{}'", self.name))?;
        *self
            .pgid
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = child.id();

        let stderr_task = self.drain_stderr(&mut child, logs).await;
        let stdout_bytes = self.drain_stdout(&mut child, logs).await?;
        if let Some(task) = stderr_task {
            let _ = task.await;
        }

        let status = child
            .wait()
            .await
            .with_context(|| format!("waiting for process of task '{}'", self.name))?;
        *self
            .pgid
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;

        let code = status.code().unwrap_or(-1);
        debug!(
            task = %self.name,
            exit_code = code,
            success = status.success(),
            "task process exited"
        );
        Ok((code, stdout_bytes))
    }

    /// Read the child's stdout to EOF, teeing to the log file when one is
    /// configured.
    async fn drain_stdout(
        &self,
        child: &mut Child,
        logs: &mut Option<TaskLogs>,
    ) -> Result<Vec<u8>> {
        let Some(mut stdout) = child.stdout.take() else {
            return Ok(Vec::new());
        };

        let mut collected = Vec::new();
        let mut chunk = [0u8; 8192];
        loop {
            let read = stdout
                .read(&mut chunk)
                .await
                .with_context(|| format!("reading stdout of task '{}'", self.name))?;
            if read == 0 {
                break;
            }
            collected.extend_from_slice(&chunk[..read]);
            if let Some(logs) = logs {
                if let Err(err) = logs.stdout.write_all(&chunk[..read]).await {
                    warn!(task = %self.name, error = %err, "writing stdout log failed");
                }
            }
        }
        if let Some(logs) = logs {
            let _ = logs.stdout.flush().await;
        }
        Ok(collected)
    }

    /// Consume stderr so pipe buffers never fill: into the log file when
    /// configured, otherwise line-by-line to the debug log.
    async fn drain_stderr(
        &self,
        child: &mut Child,
        logs: &mut Option<TaskLogs>,
    ) -> Option<tokio::task::JoinHandle<()>> {
        let stderr = child.stderr.take()?;
        let name = self.name.clone();

        if let Some(logs) = logs {
            let mut sink = match logs.stderr.try_clone().await {
                Ok(sink) => sink,
                Err(err) => {
                    warn!(task = %name, error = %err, "cannot clone stderr log handle");
                    return Some(tokio::spawn(log_stderr_lines(name, stderr)));
                }
            };
            return Some(tokio::spawn(async move {
                let mut reader = BufReader::new(stderr);
                if let Err(err) = tokio::io::copy_buf(&mut reader, &mut sink).await {
                    warn!(task = %name, error = %err, "writing stderr log failed");
                }
                let _ = sink.flush().await;
            }));
        }
        Some(tokio::spawn(log_stderr_lines(name, stderr)))
    }
}

async fn log_stderr_lines(name: String, stderr: tokio::process::ChildStderr) {
    let reader = BufReader::new(stderr);
    let mut lines = reader.lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(task = %name, "stderr: {}", line);
    }
}

fn build_command(target: &CommandTarget) -> Result<Command> {
    match target {
        CommandTarget::Argv(argv) => {
            let (program, args) = argv.split_first().ok_or_else(|| {
                crate::errors::TaskDagError::Config("empty argv command".to_string())
            })?;
            let mut cmd = Command::new(program);
            cmd.args(args);
            Ok(cmd)
        }
        CommandTarget::Shell(line) => {
            if cfg!(windows) {
                let mut cmd = Command::new("cmd");
                cmd.arg("/C").arg(line);
                Ok(cmd)
            } else {
                let mut cmd = Command::new("sh");
                cmd.arg("-c").arg(line);
                Ok(cmd)
            }
        }
    }
}

struct TaskLogs {
    stdout: tokio::fs::File,
    stderr: tokio::fs::File,
}

async fn open_logs(name: &str, spec: Option<&TaskLogSpec>) -> Result<Option<TaskLogs>> {
    let Some(spec) = spec else {
        return Ok(None);
    };
    tokio::fs::create_dir_all(&spec.dir).await?;

    let mut options = tokio::fs::OpenOptions::new();
    options.create(true).write(true);
    if spec.append {
        options.append(true);
    } else {
        options.truncate(true);
    }

    let stdout = options.open(spec.dir.join(format!("{name}.stdout"))).await?;
    let stderr = options.open(spec.dir.join(format!("{name}.stderr"))).await?;
    Ok(Some(TaskLogs { stdout, stderr }))
}
