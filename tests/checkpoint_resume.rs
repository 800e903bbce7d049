use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::json;
use taskdag::context::{RecordContext, RunnerContext};
use taskdag::dag::Selector;
use taskdag::engine::{RunOptions, Scheduler, SchedulerOptions};
use taskdag::exec::RunnerStatus;
use taskdag_test_utils::builders::{ExecutionLog, fn_task};
use taskdag_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

/// Six tasks in a chain, each recording its execution and producing an
/// output.
fn chain_scheduler(log: &ExecutionLog, log_path: PathBuf) -> Result<Scheduler, Box<dyn Error>> {
    let mut sched = Scheduler::new(
        Arc::new(RecordContext::new()),
        SchedulerOptions {
            parallel_degree: 2,
            log_path: Some(log_path),
            checkpoint_keep: 3,
        },
    );
    let mut previous: Option<String> = None;
    for index in 1..=6 {
        let name = format!("t{index}");
        let mut decl = fn_task(&name, log, json!({"step": index}));
        if let Some(prev) = &previous {
            decl = decl.depends_on([prev.clone()]);
        }
        sched.add_task(decl)?;
        previous = Some(name);
    }
    Ok(sched)
}

fn latest_checkpoint(dir: &std::path::Path) -> PathBuf {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir.join("checkpoint"))
        .expect("checkpoint directory exists")
        .map(|entry| entry.expect("dir entry").path())
        .collect();
    files.sort();
    files.pop().expect("at least one checkpoint written")
}

#[tokio::test]
async fn restored_tasks_are_skipped_on_the_next_run() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;

    // First run executes only the first four tasks of the chain.
    let first_log = ExecutionLog::new();
    let mut first = chain_scheduler(&first_log, dir.path().to_path_buf())?;
    let code = with_timeout(first.run(RunOptions {
        selector: Some(Selector::parse("0-3")),
        ..RunOptions::default()
    }))
    .await?;
    assert_eq!(code, 0);
    assert_eq!(first_log.len(), 4);
    assert_eq!(first.status_of("t5"), Some(RunnerStatus::Disabled));

    // A fresh scheduler restores the checkpoint and only runs the rest.
    let second_log = ExecutionLog::new();
    let mut second = chain_scheduler(&second_log, dir.path().to_path_buf())?;
    second.restore(&latest_checkpoint(dir.path()))?;

    let code = with_timeout(second.run(RunOptions::default())).await?;
    assert_eq!(code, 0);

    assert_eq!(
        second_log.names(),
        vec!["t5".to_string(), "t6".to_string()],
        "only the unfinished suffix executes"
    );
    for name in ["t1", "t2", "t3", "t4"] {
        assert_eq!(second.status_of(name), Some(RunnerStatus::Done));
    }

    // The restored outputs are visible through the fresh context.
    let output = second.context().get_output("t4");
    assert_eq!(output.get("step"), Some(&json!(4)));
    Ok(())
}

#[tokio::test]
async fn second_run_checkpoints_are_pruned_to_max_keep() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;

    for _ in 0..2 {
        let log = ExecutionLog::new();
        let mut sched = chain_scheduler(&log, dir.path().to_path_buf())?;
        let code = with_timeout(sched.run(RunOptions::default())).await?;
        assert_eq!(code, 0);
    }

    let files = std::fs::read_dir(dir.path().join("checkpoint"))?.count();
    assert!(files <= 3, "no more than checkpoint_keep files remain");
    Ok(())
}
