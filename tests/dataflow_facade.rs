use std::collections::BTreeMap;
use std::error::Error;
use std::sync::{Arc, Mutex};

use serde_json::{Value, json};
use taskdag::engine::{RunOptions, SchedulerOptions, TaskDeclaration};
use taskdag::exec::RunnerStatus;
use taskdag::registry::{RegisteredTask, SignatureMap, TaskRegistry, TaskSchema};
use taskdag_test_utils::builders::capturing_fn_task;
use taskdag_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

/// Producer/consumer pair: `u` declares an output `value`, `v` consumes an
/// input of the same name.
fn producer_consumer(seen: Arc<Mutex<Vec<Value>>>) -> TaskRegistry {
    let mut registry = TaskRegistry::new();
    registry
        .register(
            RegisteredTask::new(TaskDeclaration::function("u", |_input| {
                Ok(json!({"value": 42}))
            }))
            .outputs(TaskSchema::new().global("value")),
        )
        .unwrap();
    registry
        .register(
            RegisteredTask::new(capturing_fn_task("v", seen, json!({})))
                .inputs(TaskSchema::new().global("value")),
        )
        .unwrap();
    registry
}

#[tokio::test]
async fn facade_infers_the_dependency_and_flows_the_value() -> TestResult {
    init_tracing();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let registry = producer_consumer(Arc::clone(&seen));

    assert!(registry.required_params(None)?.is_empty());

    let mut sched = registry.spawn(BTreeMap::new(), None, SchedulerOptions::default())?;
    let code = with_timeout(sched.run(RunOptions::default())).await?;
    assert_eq!(code, 0);
    assert_eq!(sched.status_of("u"), Some(RunnerStatus::Done));
    assert_eq!(sched.status_of("v"), Some(RunnerStatus::Done));

    let captured = seen.lock().unwrap();
    assert_eq!(captured.as_slice(), [json!({"value": 42})]);
    Ok(())
}

#[tokio::test]
async fn unmatched_inputs_become_required_parameters() -> TestResult {
    init_tracing();

    let mut registry = TaskRegistry::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    registry.register(
        RegisteredTask::new(capturing_fn_task("lonely", Arc::clone(&seen), json!({})))
            .inputs(TaskSchema::new().global("threshold")),
    )?;

    let required = registry.required_params(None)?;
    assert_eq!(
        required.into_iter().collect::<Vec<_>>(),
        vec!["threshold".to_string()]
    );

    // Missing feed values are fatal before anything runs.
    assert!(
        registry
            .spawn(BTreeMap::new(), None, SchedulerOptions::default())
            .is_err()
    );

    let mut feed = BTreeMap::new();
    feed.insert("threshold".to_string(), json!(0.5));
    let mut sched = registry.spawn(feed, None, SchedulerOptions::default())?;
    let code = with_timeout(sched.run(RunOptions::default())).await?;
    assert_eq!(code, 0);

    let captured = seen.lock().unwrap();
    assert_eq!(captured.as_slice(), [json!({"threshold": 0.5})]);
    Ok(())
}

#[tokio::test]
async fn extra_feed_values_are_rejected() -> TestResult {
    init_tracing();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let registry = producer_consumer(seen);

    let mut feed = BTreeMap::new();
    feed.insert("unused".to_string(), json!(1));
    assert!(
        registry
            .spawn(feed, None, SchedulerOptions::default())
            .is_err()
    );
    Ok(())
}

#[tokio::test]
async fn ambiguous_producers_are_an_error() -> TestResult {
    init_tracing();

    let mut registry = TaskRegistry::new();
    for name in ["p1", "p2"] {
        registry.register(
            RegisteredTask::new(TaskDeclaration::function(name, |_input| Ok(json!({}))))
                .outputs(TaskSchema::new().global("value")),
        )?;
    }
    let seen = Arc::new(Mutex::new(Vec::new()));
    registry.register(
        RegisteredTask::new(capturing_fn_task("consumer", seen, json!({})))
            .inputs(TaskSchema::new().global("value")),
    )?;

    let err = registry
        .spawn(BTreeMap::new(), None, SchedulerOptions::default())
        .unwrap_err();
    assert!(err.to_string().contains("ambiguous"));
    Ok(())
}

#[tokio::test]
async fn signature_map_renames_resolve_the_match() -> TestResult {
    init_tracing();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut registry = TaskRegistry::new();
    registry.register(
        RegisteredTask::new(TaskDeclaration::function("producer", |_input| {
            Ok(json!({"raw": 7}))
        }))
        .outputs(TaskSchema::new().global("raw")),
    )?;
    registry.register(
        RegisteredTask::new(capturing_fn_task("consumer", Arc::clone(&seen), json!({})))
            .inputs(TaskSchema::new().global("cooked")),
    )?;

    // Rename the producer's output to the consumer's input name.
    let signatures = SignatureMap::new().rename_output("producer", "raw", "cooked");
    let mut sched = registry.spawn(BTreeMap::new(), Some(&signatures), SchedulerOptions::default())?;
    let code = with_timeout(sched.run(RunOptions::default())).await?;
    assert_eq!(code, 0);

    let captured = seen.lock().unwrap();
    assert_eq!(captured.as_slice(), [json!({"cooked": 7})]);
    Ok(())
}

#[tokio::test]
async fn local_schema_entries_cannot_be_renamed() -> TestResult {
    init_tracing();

    let mut registry = TaskRegistry::new();
    registry.register(
        RegisteredTask::new(TaskDeclaration::function("t", |_input| Ok(json!({}))))
            .inputs(TaskSchema::new().local("scratch", Some(json!("/tmp")))),
    )?;

    let signatures = SignatureMap::new().rename_input("t", "scratch", "elsewhere");
    let err = registry
        .spawn(BTreeMap::new(), Some(&signatures), SchedulerOptions::default())
        .unwrap_err();
    assert!(err.to_string().contains("cannot be renamed"));
    Ok(())
}
