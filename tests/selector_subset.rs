use taskdag::dag::{Selector, TopoGraph};
use taskdag::errors::TaskDagError;

/// Ten tasks in a chain; `preprocess` sits at topological id 7.
fn ten_node_graph() -> TopoGraph {
    let mut graph = TopoGraph::new();
    let names = [
        "fetch", "vocab", "split", "clean", "merge", "stats", "shuffle", "preprocess", "train",
        "evaluate",
    ];
    let mut previous: Option<&str> = None;
    for name in names {
        match previous {
            Some(prev) => graph.add(name, [prev]),
            None => graph.add(name, Vec::<String>::new()),
        }
        previous = Some(name);
    }
    assert!(graph.is_valid());
    assert_eq!(graph.order_id("preprocess"), Some(7));
    graph
}

#[test]
fn mixed_selector_of_ids_ranges_and_names() {
    let graph = ten_node_graph();
    let ids = Selector::parse("1,3-5,preprocess").resolve(&graph).unwrap();
    assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec![1, 3, 4, 5, 7]);
}

#[test]
fn open_ended_ranges_default_to_the_graph_bounds() {
    let graph = ten_node_graph();

    let ids = Selector::parse("-3").resolve(&graph).unwrap();
    assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec![0, 1, 2, 3]);

    let ids = Selector::parse("8-").resolve(&graph).unwrap();
    assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec![8, 9]);
}

#[test]
fn stepped_range_selects_every_other_node() {
    let graph = ten_node_graph();
    let ids = Selector::parse("1-6-2").resolve(&graph).unwrap();
    assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec![1, 3, 5]);
}

#[test]
fn regex_items_match_multiple_names() {
    let graph = ten_node_graph();
    // Both "shuffle" and "split"/"stats" start with 's'.
    let ids = Selector::parse("s.*").resolve(&graph).unwrap();
    let expected = [
        graph.order_id("split").unwrap(),
        graph.order_id("stats").unwrap(),
        graph.order_id("shuffle").unwrap(),
    ];
    assert_eq!(
        ids,
        expected.into_iter().collect()
    );
}

#[test]
fn unknown_names_and_out_of_range_ids_are_skipped() {
    let graph = ten_node_graph();
    let ids = Selector::parse("nonexistent,42,1").resolve(&graph).unwrap();
    assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec![1]);
}

#[test]
fn malformed_ranges_are_fatal() {
    let graph = ten_node_graph();
    for selector in ["1-2-3-4", "1-x", "3-1", "1-5-0"] {
        let err = Selector::parse(selector).resolve(&graph).unwrap_err();
        assert!(
            matches!(err, TaskDagError::Selector(_)),
            "'{selector}' should be a fatal selector error"
        );
    }
}

#[test]
fn empty_segments_are_ignored() {
    let graph = ten_node_graph();
    let ids = Selector::parse(" ,1, ,2,").resolve(&graph).unwrap();
    assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec![1, 2]);
}
