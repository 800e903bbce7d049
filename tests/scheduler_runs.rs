use std::error::Error;
use std::sync::Arc;

use serde_json::json;
use taskdag::context::RecordContext;
use taskdag::dag::Selector;
use taskdag::engine::{RunOptions, Scheduler, SchedulerOptions, TaskDeclaration};
use taskdag::exec::{Runner, RunnerStatus};
use taskdag_test_utils::builders::{ExecutionLog, failing_fn_task, fn_task, slow_fn_task};
use taskdag_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

fn scheduler(parallel_degree: i64) -> Scheduler {
    Scheduler::new(
        Arc::new(RecordContext::new()),
        SchedulerOptions {
            parallel_degree,
            ..SchedulerOptions::default()
        },
    )
}

#[tokio::test]
async fn empty_graph_returns_zero_immediately() -> TestResult {
    init_tracing();
    let mut sched = scheduler(4);
    let code = with_timeout(sched.run(RunOptions::default())).await?;
    assert_eq!(code, 0);
    Ok(())
}

#[tokio::test]
async fn diamond_dag_runs_in_dependency_order() -> TestResult {
    init_tracing();
    let log = ExecutionLog::new();

    let mut sched = scheduler(4);
    sched.add_task(fn_task("a", &log, json!({})))?;
    sched.add_task(slow_fn_task("b", &log, 50, json!({})).depends_on(["a"]))?;
    sched.add_task(slow_fn_task("c", &log, 50, json!({})).depends_on(["a"]))?;
    sched.add_task(fn_task("d", &log, json!({})).depends_on(["b", "c"]))?;

    let code = with_timeout(sched.run(RunOptions::default())).await?;
    assert_eq!(code, 0);

    assert_eq!(log.position("a"), Some(0), "a completes first");
    assert_eq!(log.position("d"), Some(3), "d completes last");
    assert!(log.finished_before("b", "d"));
    assert!(log.finished_before("c", "d"));

    for name in ["a", "b", "c", "d"] {
        assert_eq!(sched.status_of(name), Some(RunnerStatus::Done));
    }

    let runner = sched.runner("a").expect("runner is inspectable");
    assert_eq!(runner.exitcode(), Some(0));
    assert!(!runner.is_alive());
    Ok(())
}

#[tokio::test]
async fn serial_chain_with_parallel_degree_one_completes_in_order() -> TestResult {
    init_tracing();
    let log = ExecutionLog::new();

    let mut sched = scheduler(1);
    sched.add_task(fn_task("first", &log, json!({})))?;
    sched.add_task(fn_task("second", &log, json!({})).depends_on(["first"]))?;
    sched.add_task(fn_task("third", &log, json!({})).depends_on(["second"]))?;

    let code = with_timeout(sched.run(RunOptions::default())).await?;
    assert_eq!(code, 0);
    assert_eq!(
        log.names(),
        vec!["first".to_string(), "second".to_string(), "third".to_string()]
    );
    Ok(())
}

#[tokio::test]
async fn retries_are_exhausted_before_a_task_fails() -> TestResult {
    init_tracing();
    let log = ExecutionLog::new();

    let mut sched = scheduler(1);
    sched.add_task(failing_fn_task("flaky", &log, 3).retry(3).interval_secs(0.01))?;

    let code = with_timeout(sched.run(RunOptions::default())).await?;
    assert_eq!(code, 3);
    assert_eq!(sched.status_of("flaky"), Some(RunnerStatus::Failed));

    let report = sched.report_of("flaky").unwrap();
    assert_eq!(report.attempts, 3);
    assert_eq!(report.retry_limit, 3);
    assert_eq!(log.len(), 3, "the callable ran once per attempt");
    Ok(())
}

#[tokio::test]
async fn failure_aborts_the_run_when_try_best_is_off() -> TestResult {
    init_tracing();
    let log = ExecutionLog::new();

    let mut sched = scheduler(4);
    sched.add_task(fn_task("a", &log, json!({})))?;
    sched.add_task(slow_fn_task("b", &log, 100, json!({})).depends_on(["a"]))?;
    sched.add_task(failing_fn_task("c", &log, 1).depends_on(["a"]))?;
    sched.add_task(fn_task("d", &log, json!({})).depends_on(["b", "c"]))?;

    let code = with_timeout(sched.run(RunOptions::default())).await?;
    assert_ne!(code, 0);
    assert_eq!(sched.status_of("c"), Some(RunnerStatus::Failed));
    // d was blocked behind the failure and never started.
    assert!(matches!(
        sched.status_of("d"),
        Some(RunnerStatus::Waiting) | Some(RunnerStatus::Canceled)
    ));
    assert!(log.position("d").is_none());
    Ok(())
}

#[tokio::test]
async fn same_tick_successes_are_classified_before_an_abort() -> TestResult {
    init_tracing();
    let log = ExecutionLog::new();

    let mut sched = scheduler(4);
    // Both finish within one poll tick and the failing task sorts first;
    // the success must still be classified Done rather than Killed.
    sched.add_task(failing_fn_task("a_fails", &log, 2))?;
    sched.add_task(fn_task("b_succeeds", &log, json!({})))?;

    let code = with_timeout(sched.run(RunOptions::default())).await?;
    assert_eq!(code, 2);
    assert_eq!(sched.status_of("a_fails"), Some(RunnerStatus::Failed));
    assert_eq!(sched.status_of("b_succeeds"), Some(RunnerStatus::Done));
    Ok(())
}

#[tokio::test]
async fn try_best_runs_unrelated_tasks_and_cancels_blocked_ones() -> TestResult {
    init_tracing();
    let log = ExecutionLog::new();

    let mut sched = scheduler(4);
    sched.add_task(fn_task("a", &log, json!({})))?;
    sched.add_task(fn_task("b", &log, json!({})).depends_on(["a"]))?;
    sched.add_task(failing_fn_task("c", &log, 1).depends_on(["a"]))?;
    sched.add_task(fn_task("d", &log, json!({})).depends_on(["b", "c"]))?;

    let code = with_timeout(sched.run(RunOptions {
        try_best: true,
        ..RunOptions::default()
    }))
    .await?;

    assert_ne!(code, 0);
    assert_eq!(sched.status_of("b"), Some(RunnerStatus::Done));
    assert_eq!(sched.status_of("c"), Some(RunnerStatus::Failed));
    assert_eq!(sched.status_of("d"), Some(RunnerStatus::Canceled));
    assert!(log.position("b").is_some());
    assert!(log.position("d").is_none());
    Ok(())
}

#[tokio::test]
async fn subset_selection_disables_excluded_tasks() -> TestResult {
    init_tracing();
    let log = ExecutionLog::new();

    let mut sched = scheduler(4);
    sched.add_task(fn_task("a", &log, json!({})))?;
    sched.add_task(fn_task("b", &log, json!({})).depends_on(["a"]))?;
    sched.add_task(fn_task("c", &log, json!({})).depends_on(["b"]))?;

    let code = with_timeout(sched.run(RunOptions {
        selector: Some(Selector::parse("1-2")),
        ..RunOptions::default()
    }))
    .await?;

    assert_eq!(code, 0);
    assert_eq!(sched.status_of("a"), Some(RunnerStatus::Disabled));
    assert_eq!(sched.status_of("b"), Some(RunnerStatus::Done));
    assert_eq!(sched.status_of("c"), Some(RunnerStatus::Done));
    assert!(log.position("a").is_none());
    // b runs despite its dependency on the disabled a.
    assert!(log.finished_before("b", "c"));
    Ok(())
}

#[tokio::test]
async fn duplicate_task_names_are_rejected() -> TestResult {
    init_tracing();
    let log = ExecutionLog::new();

    let mut sched = scheduler(1);
    sched.add_task(fn_task("same", &log, json!({})))?;
    assert!(sched.add_task(fn_task("same", &log, json!({}))).is_err());
    Ok(())
}

#[tokio::test]
async fn invalid_graphs_fail_fast() -> TestResult {
    init_tracing();
    let log = ExecutionLog::new();

    let mut sched = scheduler(1);
    sched.add_task(fn_task("a", &log, json!({})).depends_on(["ghost"]))?;
    assert!(with_timeout(sched.run(RunOptions::default())).await.is_err());
    assert!(log.is_empty(), "no runner starts on an invalid graph");
    Ok(())
}

#[tokio::test]
async fn run_can_only_be_called_once() -> TestResult {
    init_tracing();
    let log = ExecutionLog::new();

    let mut sched = scheduler(1);
    sched.add_task(fn_task("only", &log, json!({})))?;
    let code = with_timeout(sched.run(RunOptions::default())).await?;
    assert_eq!(code, 0);
    assert!(with_timeout(sched.run(RunOptions::default())).await.is_err());
    Ok(())
}

#[tokio::test]
async fn function_panics_count_as_failed_attempts() -> TestResult {
    init_tracing();

    let mut sched = scheduler(1);
    sched.add_task(
        TaskDeclaration::function("panics", |_input| panic!("boom"))
            .retry(2)
            .interval_secs(0.01),
    )?;

    let code = with_timeout(sched.run(RunOptions::default())).await?;
    assert_eq!(code, 1);
    let report = sched.report_of("panics").unwrap();
    assert_eq!(report.attempts, 2);
    Ok(())
}
