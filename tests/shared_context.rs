use std::collections::BTreeMap;

use serde_json::json;
use taskdag::JsonMap;
use taskdag::config::ParameterConfig;
use taskdag::context::checkpoint;
use taskdag::context::{DependentContext, RecordContext, RunnerContext, SharedMap};
use taskdag::errors::TaskDagError;

fn object(pairs: &[(&str, serde_json::Value)]) -> JsonMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

#[test]
fn shared_map_mutations_are_visible_and_digest_tracks_content() {
    let map = SharedMap::new();
    assert!(map.is_empty());

    let empty_digest = map.digest();
    map.insert("a", json!({"x": 1}));
    assert_eq!(map.get("a"), Some(json!({"x": 1})));
    assert_eq!(map.len(), 1);
    assert_ne!(map.digest(), empty_digest);

    // Two maps with equal content agree on the digest.
    let other = SharedMap::new();
    other.insert("a", json!({"x": 1}));
    assert_eq!(map.digest(), other.digest());

    map.remove("a");
    assert_eq!(map.digest(), empty_digest);
    assert_eq!(map.get("a"), None);
}

#[test]
fn shared_map_reads_return_values_not_aliases() {
    let map = SharedMap::new();
    map.insert("a", json!({"x": 1}));

    let mut copy = map.get("a").unwrap();
    copy["x"] = json!(2);
    assert_eq!(map.get("a"), Some(json!({"x": 1})));
}

#[test]
fn record_context_returns_empty_maps_for_unseen_tasks() {
    let context = RecordContext::new();
    assert!(context.get_input("ghost").is_empty());
    assert!(context.get_output("ghost").is_empty());
}

#[test]
fn record_context_accepts_only_empty_params() {
    let context = RecordContext::new();
    context.set_params(&BTreeMap::new()).unwrap();

    let mut params = BTreeMap::new();
    params.insert("x".to_string(), json!(1));
    assert!(matches!(
        context.set_params(&params).unwrap_err(),
        TaskDagError::Params(_)
    ));
}

#[test]
fn record_context_checkpoint_roundtrip() {
    let context = RecordContext::new();
    context
        .set_input("fetch", object(&[("date", json!("0701"))]))
        .unwrap();
    context
        .set_output("fetch", object(&[("path", json!("raw.json"))]))
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = context.save(dir.path(), 5).unwrap();

    let restored = RecordContext::new();
    restored.restore(&path).unwrap();
    assert_eq!(restored.get_input("fetch"), context.get_input("fetch"));
    assert_eq!(restored.get_output("fetch"), context.get_output("fetch"));
    assert_eq!(restored.completed_tasks(), vec!["fetch".to_string()]);
}

#[test]
fn checkpoints_beyond_max_keep_are_pruned_newest_first() {
    let dir = tempfile::tempdir().unwrap();
    for stamp in [
        "20250101.000001",
        "20250101.000002",
        "20250101.000003",
        "20250101.000004",
    ] {
        std::fs::write(dir.path().join(format!("record_context-{stamp}.json")), "{}").unwrap();
    }
    // A file with another prefix is untouched.
    std::fs::write(dir.path().join("unrelated-20250101.000001.json"), "{}").unwrap();

    checkpoint::prune_checkpoints(dir.path(), "record_context", 2).unwrap();

    let mut names: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(
        names,
        vec![
            "record_context-20250101.000003.json".to_string(),
            "record_context-20250101.000004.json".to_string(),
            "unrelated-20250101.000001.json".to_string(),
        ]
    );
}

fn dependent_context() -> DependentContext {
    let config = ParameterConfig::from_value(json!({
        "fetch": {
            "input": {"date": "<%= run_date %>"},
            "output": {"path": null}
        },
        "train": {
            "input": {"corpus": "<%= $.fetch.output.path %>"},
            "output": {"model": null}
        }
    }))
    .unwrap();
    let context = DependentContext::new(config);
    let mut params = BTreeMap::new();
    params.insert("run_date".to_string(), json!("0701"));
    context.set_params(&params).unwrap();
    context
}

#[test]
fn dependent_context_derives_inputs_and_forbids_setting_them() {
    let context = dependent_context();
    assert_eq!(context.get_input("fetch"), object(&[("date", json!("0701"))]));

    assert!(matches!(
        context.set_input("fetch", JsonMap::new()).unwrap_err(),
        TaskDagError::Context(_)
    ));
}

#[test]
fn dependent_output_writes_flow_into_dependent_inputs() {
    let context = dependent_context();
    context
        .set_output("fetch", object(&[("path", json!("raw.json"))]))
        .unwrap();

    assert_eq!(
        context.get_input("train"),
        object(&[("corpus", json!("raw.json"))])
    );
    assert_eq!(context.completed_tasks(), vec!["fetch".to_string()]);
}

#[test]
fn dependent_output_rejects_undeclared_keys() {
    let context = dependent_context();
    assert!(
        context
            .set_output("fetch", object(&[("surprise", json!(1))]))
            .is_err()
    );
    // Missing declared keys only warn.
    context.set_output("fetch", JsonMap::new()).unwrap();
}

#[test]
fn dependent_checkpoint_replays_outputs_only() {
    let context = dependent_context();
    context
        .set_output("fetch", object(&[("path", json!("raw.json"))]))
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = context.save(dir.path(), 5).unwrap();

    let fresh = dependent_context();
    fresh.restore(&path).unwrap();
    // The restored output re-expands into the dependent input.
    assert_eq!(
        fresh.get_input("train"),
        object(&[("corpus", json!("raw.json"))])
    );
    // Only fetch produced a value different from its declaration.
    assert_eq!(fresh.completed_tasks(), vec!["fetch".to_string()]);
}

#[test]
fn dependent_restore_rejects_unknown_tasks() {
    let context = dependent_context();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dependent_context-20250101.000001.json");
    std::fs::write(
        &path,
        serde_json::to_string(&json!({
            "ghost": {"input": {}, "output": {"x": 1}}
        }))
        .unwrap(),
    )
    .unwrap();

    assert!(matches!(
        context.restore(&path).unwrap_err(),
        TaskDagError::TaskNotFound(_)
    ));
}
