//! Unit tests for the layered read paths.

use std::collections::BTreeSet;

use rstest::rstest;
use rusqlite::Connection;

use osmstrata_core::test_support::{deleted, meta, node, relation, way};
use osmstrata_core::{ObjectKind, OsmData};

use super::*;
use crate::fixtures::{layered, store};
use crate::layer::Layers;

fn ctx<'a>(conn: &'a Connection, layers: &'a Layers, batch_size: usize) -> QueryContext<'a> {
    QueryContext {
        connection: conn,
        layers,
        batch_size,
    }
}

fn ids(values: &[i64]) -> BTreeSet<i64> {
    values.iter().copied().collect()
}

fn node_versions(data: &OsmData) -> Vec<(i64, i64)> {
    data.nodes
        .iter()
        .map(|node| (node.id, node.meta.version))
        .collect()
}

#[rstest]
fn active_copy_shadows_static_copy(layered: (Connection, Layers)) {
    let (conn, layers) = layered;
    store(
        &conn,
        layers.static_layer(),
        OsmData {
            nodes: vec![node(7, 1, 1.0, 1.0), node(8, 1, 2.0, 2.0)],
            ..OsmData::default()
        },
    )
    .expect("seed static layer");
    store(
        &conn,
        layers.active_layer(),
        OsmData {
            nodes: vec![node(7, 2, 1.5, 1.5)],
            ..OsmData::default()
        },
    )
    .expect("seed active layer");

    let mut sink = OsmData::default();
    let emitted = get_objects_by_id(&ctx(&conn, &layers, 100), ObjectKind::Node, &ids(&[7, 8]), &mut sink)
        .expect("read nodes");
    assert_eq!(emitted, 2);
    assert_eq!(node_versions(&sink), vec![(8, 1), (7, 2)]);
}

#[rstest]
fn active_deletion_hides_static_copy(layered: (Connection, Layers)) {
    let (conn, layers) = layered;
    store(
        &conn,
        layers.static_layer(),
        OsmData {
            nodes: vec![node(8, 1, 2.0, 2.0)],
            ..OsmData::default()
        },
    )
    .expect("seed static layer");
    store(
        &conn,
        layers.active_layer(),
        OsmData {
            nodes: vec![deleted(node(8, 2, 2.0, 2.0))],
            ..OsmData::default()
        },
    )
    .expect("delete in active layer");

    let mut sink = OsmData::default();
    get_objects_by_id(&ctx(&conn, &layers, 100), ObjectKind::Node, &ids(&[8]), &mut sink)
        .expect("read nodes");
    assert!(sink.is_empty());
}

#[rstest]
fn id_lists_longer_than_one_statement_are_chunked(layered: (Connection, Layers)) {
    let (conn, layers) = layered;
    let batch: Vec<_> = (1..=1500).map(|id| node(id, 1, 0.0, 0.0)).collect();
    store(
        &conn,
        layers.static_layer(),
        OsmData {
            nodes: batch,
            ..OsmData::default()
        },
    )
    .expect("seed nodes");

    let wanted: BTreeSet<i64> = (1..=1600).collect();
    let mut sink = OsmData::default();
    let emitted = get_objects_by_id(&ctx(&conn, &layers, 64), ObjectKind::Node, &wanted, &mut sink)
        .expect("read nodes");
    assert_eq!(emitted, 1500);
    let seen: BTreeSet<i64> = sink.nodes.iter().map(|node| node.id).collect();
    assert_eq!(seen.len(), 1500);
}

#[rstest]
fn ways_for_nodes_matches_current_membership_only(layered: (Connection, Layers)) {
    let (conn, layers) = layered;
    store(
        &conn,
        layers.static_layer(),
        OsmData {
            ways: vec![way(100, 1, &[1, 2, 3]), way(101, 1, &[4, 5])],
            ..OsmData::default()
        },
    )
    .expect("seed ways");
    store(
        &conn,
        layers.active_layer(),
        OsmData {
            ways: vec![way(101, 2, &[4])],
            ..OsmData::default()
        },
    )
    .expect("edit way");

    let query = ctx(&conn, &layers, 100);
    let mut sink = OsmData::default();
    ways_for_nodes(&query, &ids(&[2, 5, 9]), &mut sink).expect("ways for nodes 2, 5 and 9");
    assert_eq!(sink.ids(ObjectKind::Way), vec![100]);

    let mut sink = OsmData::default();
    ways_for_nodes(&query, &ids(&[6, 7]), &mut sink).expect("ways for nodes 6 and 7");
    assert!(sink.is_empty());

    let mut sink = OsmData::default();
    ways_for_nodes(&query, &ids(&[1, 3]), &mut sink).expect("ways for nodes 1 and 3");
    assert_eq!(sink.ids(ObjectKind::Way), vec![100]);
}

#[rstest]
fn relations_for_objects_honours_skip_list(layered: (Connection, Layers)) {
    let (conn, layers) = layered;
    store(
        &conn,
        layers.active_layer(),
        OsmData {
            relations: vec![
                relation(1, 1, &[(ObjectKind::Way, 10)]),
                relation(2, 1, &[(ObjectKind::Way, 10), (ObjectKind::Node, 3)]),
                relation(3, 1, &[(ObjectKind::Relation, 1)]),
            ],
            ..OsmData::default()
        },
    )
    .expect("seed relations");

    let query = ctx(&conn, &layers, 100);
    let mut sink = OsmData::default();
    relations_for_objects(&query, ObjectKind::Way, &ids(&[10]), &ids(&[2]), &mut sink)
        .expect("relations for way");
    assert_eq!(sink.ids(ObjectKind::Relation), vec![1]);

    let mut sink = OsmData::default();
    relations_for_objects(&query, ObjectKind::Relation, &ids(&[1]), &BTreeSet::new(), &mut sink)
        .expect("parents of relation");
    assert_eq!(sink.ids(ObjectKind::Relation), vec![3]);
}

#[rstest]
fn dump_streams_one_layer_in_kind_order(layered: (Connection, Layers)) {
    let (conn, layers) = layered;
    store(
        &conn,
        layers.active_layer(),
        OsmData {
            nodes: vec![node(1, 1, 0.0, 0.0)],
            ways: vec![way(1, 1, &[1])],
            relations: vec![relation(1, 1, &[(ObjectKind::Way, 1)])],
            ..OsmData::default()
        },
    )
    .expect("seed active layer");
    store(
        &conn,
        layers.static_layer(),
        OsmData {
            nodes: vec![node(2, 1, 0.0, 0.0)],
            ..OsmData::default()
        },
    )
    .expect("seed static layer");

    let query = ctx(&conn, &layers, 1);
    let mut sink = OsmData::default();
    let emitted = dump(&query, LayerRole::Active, &mut sink).expect("dump active");
    assert_eq!(emitted, 3);
    assert_eq!(sink.ids(ObjectKind::Node), vec![1]);
    assert_eq!(sink.ids(ObjectKind::Way), vec![1]);
    assert_eq!(sink.ids(ObjectKind::Relation), vec![1]);

    let mut sink = OsmData::default();
    dump(&query, LayerRole::Static, &mut sink).expect("dump static");
    assert_eq!(sink.ids(ObjectKind::Node), vec![2]);
}

#[rstest]
fn decoded_rows_keep_metadata(layered: (Connection, Layers)) {
    let (conn, layers) = layered;
    let mut incoming = node(4, 3, 10.0, 20.0);
    incoming.meta = meta(3, 1_700_000_000);
    incoming.meta.username = "surveyor".to_owned();
    store(
        &conn,
        layers.active_layer(),
        OsmData {
            nodes: vec![incoming.clone()],
            ..OsmData::default()
        },
    )
    .expect("store node");

    let mut sink = OsmData::default();
    get_objects_by_id(&ctx(&conn, &layers, 10), ObjectKind::Node, &ids(&[4]), &mut sink)
        .expect("read node");
    assert_eq!(sink.nodes, vec![incoming]);
}
