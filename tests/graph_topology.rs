use proptest::prelude::*;
use taskdag::dag::{DynamicTopoGraph, Selector, TopoGraph};
use taskdag::errors::TaskDagError;

#[test]
fn valid_graph_assigns_order_ids_with_declaration_tie_break() {
    let mut graph = TopoGraph::new();
    graph.add("b", Vec::<String>::new());
    graph.add("a", Vec::<String>::new());
    graph.add("c", ["b", "a"]);

    assert!(graph.is_valid());
    // b and a are both ready in the first round; declaration order wins.
    assert_eq!(graph.order_id("b"), Some(0));
    assert_eq!(graph.order_id("a"), Some(1));
    assert_eq!(graph.order_id("c"), Some(2));

    assert_eq!(
        graph.nodes(true).unwrap(),
        vec!["b".to_string(), "a".to_string(), "c".to_string()]
    );
}

#[test]
fn forward_declared_dependency_becomes_valid_once_defined() {
    let mut graph = TopoGraph::new();
    graph.add("train", ["preprocess"]);
    assert!(!graph.is_valid());

    graph.add("preprocess", Vec::<String>::new());
    assert!(graph.is_valid());
    assert_eq!(graph.order_id("preprocess"), Some(0));
    assert_eq!(graph.order_id("train"), Some(1));
}

#[test]
fn dangling_reference_is_reported() {
    let mut graph = TopoGraph::new();
    graph.add("train", ["missing"]);

    let err = graph.validate().unwrap_err();
    assert!(matches!(err, TaskDagError::GraphInvalid(_)));
    assert!(err.to_string().contains("missing"));
}

#[test]
fn cycle_is_rejected() {
    let mut graph = TopoGraph::new();
    graph.add("a", ["b"]);
    graph.add("b", ["c"]);
    graph.add("c", ["a"]);

    assert!(!graph.is_valid());
    assert!(graph.validate().is_err());
}

#[test]
fn is_valid_is_idempotent_and_reset_by_add() {
    let mut graph = TopoGraph::new();
    graph.add("a", Vec::<String>::new());
    assert!(graph.is_valid());
    assert!(graph.is_valid());

    graph.add("b", ["a"]);
    assert!(graph.is_valid());
    assert_eq!(graph.order_id("b"), Some(1));
}

#[test]
fn reverse_depends_optionally_returns_the_transitive_closure() {
    let mut graph = TopoGraph::new();
    graph.add("a", Vec::<String>::new());
    graph.add("b", ["a"]);
    graph.add("c", ["b"]);
    graph.add("d", ["a"]);

    let direct = graph.reverse_depends("a", false).unwrap();
    assert_eq!(
        direct.into_iter().collect::<Vec<_>>(),
        vec!["b".to_string(), "d".to_string()]
    );

    let all = graph.reverse_depends("a", true).unwrap();
    assert_eq!(
        all.into_iter().collect::<Vec<_>>(),
        vec!["b".to_string(), "c".to_string(), "d".to_string()]
    );
}

#[test]
fn dynamic_graph_unblocks_successors_on_remove() {
    let mut graph = TopoGraph::new();
    graph.add("a", Vec::<String>::new());
    graph.add("b", ["a"]);
    graph.add("c", ["a", "b"]);

    let mut dynamic = DynamicTopoGraph::new(graph).unwrap();
    assert_eq!(dynamic.top(None), vec!["a".to_string()]);

    // Removing a node with unfinished dependencies is rejected.
    assert!(dynamic.remove("c").is_err());

    dynamic.remove("a").unwrap();
    assert_eq!(dynamic.top(None), vec!["b".to_string()]);
    dynamic.remove("b").unwrap();
    assert_eq!(dynamic.top(None), vec!["c".to_string()]);

    assert!(dynamic.remove("a").is_err(), "double remove is rejected");
    dynamic.remove("c").unwrap();
    assert!(dynamic.is_drained());
    assert!(dynamic.top(None).is_empty());
}

#[test]
fn dynamic_top_caps_the_number_of_returned_nodes() {
    let mut graph = TopoGraph::new();
    for name in ["a", "b", "c"] {
        graph.add(name, Vec::<String>::new());
    }
    let mut dynamic = DynamicTopoGraph::new(graph).unwrap();
    assert_eq!(dynamic.top(Some(2)).len(), 2);
    assert_eq!(dynamic.top(None).len(), 3);
}

#[test]
fn subset_induces_edges_and_drops_links_to_unselected_nodes() {
    let mut graph = TopoGraph::new();
    graph.add("a", Vec::<String>::new());
    graph.add("b", ["a"]);
    graph.add("c", ["b"]);

    // Select b and c only: b loses its edge to a and becomes a root.
    let mut subset = graph.subset(Some(&Selector::parse("1-2"))).unwrap();
    assert!(subset.is_valid());
    assert_eq!(subset.len(), 2);
    assert!(subset.depends("b").unwrap().is_empty());
    assert_eq!(
        subset.depends("c").unwrap().into_iter().collect::<Vec<_>>(),
        vec!["b".to_string()]
    );
}

proptest! {
    /// `subset` over the full range is isomorphic to the original graph.
    #[test]
    fn subset_of_full_range_is_isomorphic(edges in prop::collection::vec(
        prop::collection::vec(any::<bool>(), 0..10),
        1..10,
    )) {
        let mut graph = TopoGraph::new();
        for (index, row) in edges.iter().enumerate() {
            let name = format!("t{index}");
            let depends: Vec<String> = row
                .iter()
                .take(index)
                .enumerate()
                .filter(|(_, flag)| **flag)
                .map(|(dep, _)| format!("t{dep}"))
                .collect();
            graph.add(&name, depends);
        }
        prop_assert!(graph.is_valid());

        let mut full = graph.subset(Some(&Selector::parse("-"))).unwrap();
        prop_assert!(full.is_valid());
        prop_assert_eq!(graph.nodes(true).unwrap(), full.nodes(true).unwrap());
        for index in 0..edges.len() {
            let name = format!("t{index}");
            prop_assert_eq!(
                graph.depends(&name).unwrap(),
                full.depends(&name).unwrap()
            );
        }
    }
}
