//! Behavioural tests for the versioned write path and merged reads using
//! rstest-bdd.

mod support;

use std::cell::RefCell;

use osmstrata_core::test_support::{deleted, node, tags, way};
use osmstrata_core::{ObjectKind, OsmData};
use osmstrata_store::{
    ConstraintViolation, CreatedIds, LayerRole, MapConfig, ShareMode, SqliteMap, StoreError,
};
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use tempfile::TempDir;

use support::{open_map, read, seed_static, write};

/// Shared state for store scenarios.
struct StoreWorld {
    temp_dir: TempDir,
    map: RefCell<Option<SqliteMap>>,
    created: RefCell<Option<CreatedIds>>,
    error: RefCell<Option<StoreError>>,
}

impl StoreWorld {
    fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("create temp dir"),
            map: RefCell::new(None),
            created: RefCell::new(None),
            error: RefCell::new(None),
        }
    }

    fn open(&self) {
        let map = open_map(&self.temp_dir, MapConfig::default());
        self.map.replace(Some(map));
    }

    fn store(&self, data: OsmData) {
        let mut borrowed = self.map.borrow_mut();
        let map = borrowed.as_mut().expect("map should be open");
        match write(map, data) {
            Ok(created) => {
                self.created.replace(Some(created));
                self.error.replace(None);
            }
            Err(err) => {
                self.created.replace(None);
                self.error.replace(Some(err));
            }
        }
    }

    fn read(&self, kind: ObjectKind, ids: &[i64]) -> OsmData {
        let mut borrowed = self.map.borrow_mut();
        let map = borrowed.as_mut().expect("map should be open");
        read(map, kind, ids)
    }

    fn assert_no_error(&self) {
        if let Some(err) = self.error.borrow().as_ref() {
            panic!("unexpected store error: {err}");
        }
    }
}

#[fixture]
fn world() -> StoreWorld {
    StoreWorld::new()
}

fn nodes(batch: Vec<osmstrata_core::Node>) -> OsmData {
    OsmData {
        nodes: batch,
        ..OsmData::default()
    }
}

#[given("an empty map database")]
fn given_empty_map(world: &StoreWorld) {
    world.open();
}

#[given("node 5 stored at versions 1 and 2")]
fn given_two_versions(world: &StoreWorld) {
    world.store(nodes(vec![node(5, 1, 1.0, 1.0)]));
    world.store(nodes(vec![node(5, 2, 1.5, 1.5)]));
    world.assert_no_error();
}

#[given("a map whose static layer holds nodes 7 and 8")]
fn given_static_nodes(world: &StoreWorld) {
    seed_static(
        &world.temp_dir,
        nodes(vec![node(7, 1, 7.0, 7.0), node(8, 1, 8.0, 8.0)]),
    );
    world.open();
}

#[when("I store a new node named Test at 51.5, -0.1")]
fn store_named_node(world: &StoreWorld) {
    let mut incoming = node(-1, 1, 51.5, -0.1);
    incoming.tags = tags(&[("name", "Test")]);
    world.store(nodes(vec![incoming]));
}

#[when("I store a deletion of node 5 at version 3")]
fn store_deletion(world: &StoreWorld) {
    world.store(nodes(vec![deleted(node(5, 3, 1.5, 1.5))]));
}

#[when("I store version 2 of node 7 in the active layer")]
fn store_active_edit(world: &StoreWorld) {
    world.store(nodes(vec![node(7, 2, 7.5, 7.5)]));
}

#[when("I store a batch whose way references an undefined node")]
fn store_dangling_way(world: &StoreWorld) {
    world.store(OsmData {
        nodes: vec![node(-1, 1, 0.0, 0.0)],
        ways: vec![way(-1, 1, &[-1, -2])],
        ..OsmData::default()
    });
}

#[then("the node is assigned id 1")]
fn then_assigned_one(world: &StoreWorld) {
    world.assert_no_error();
    let created = world.created.borrow();
    let created = created.as_ref().expect("ids should be recorded");
    assert_eq!(created.nodes.get(&-1), Some(&1));
}

#[then("reading node 1 returns the stored position and tags")]
fn then_round_trip(world: &StoreWorld) {
    let data = world.read(ObjectKind::Node, &[1]);
    let [stored] = data.nodes.as_slice() else {
        panic!("expected one node, got {:?}", data.nodes);
    };
    assert!((stored.lat - 51.5).abs() < 1.0e-9);
    assert!((stored.lon + 0.1).abs() < 1.0e-9);
    assert_eq!(stored.tags, tags(&[("name", "Test")]));
    assert_eq!(stored.meta.version, 1);
}

#[then("node 5 is not returned by the merged view")]
fn then_node_hidden(world: &StoreWorld) {
    world.assert_no_error();
    assert!(world.read(ObjectKind::Node, &[5]).is_empty());
}

#[then("the history of node 5 holds versions 1, 2 and 3")]
fn then_history(world: &StoreWorld) {
    let mut borrowed = world.map.borrow_mut();
    let map = borrowed.as_mut().expect("map should be open");
    let transaction = map.transaction(ShareMode::Read).expect("begin read");
    let mut history = OsmData::default();
    transaction
        .get_diff(LayerRole::Active, true, -1, i64::MAX, &mut history)
        .expect("read history");
    let versions: Vec<(i64, bool)> = history
        .nodes
        .iter()
        .filter(|stored| stored.id == 5)
        .map(|stored| (stored.meta.version, stored.meta.visible))
        .collect();
    assert_eq!(versions, vec![(1, true), (2, true), (3, false)]);
}

#[then("reading nodes 7 and 8 returns static node 8 and active node 7")]
fn then_shadowed(world: &StoreWorld) {
    world.assert_no_error();
    let data = world.read(ObjectKind::Node, &[7, 8]);
    let versions: Vec<(i64, i64)> = data
        .nodes
        .iter()
        .map(|stored| (stored.id, stored.meta.version))
        .collect();
    assert_eq!(versions, vec![(8, 1), (7, 2)]);
}

#[then("the write fails with an unresolved reference")]
fn then_unresolved(world: &StoreWorld) {
    let error = world.error.borrow();
    let error = error.as_ref().expect("an error should be recorded");
    assert!(matches!(
        error.constraint(),
        Some(ConstraintViolation::UnresolvedReference { reference: -2, .. })
    ));
}

#[then("the map holds no nodes")]
fn then_no_nodes(world: &StoreWorld) {
    let mut borrowed = world.map.borrow_mut();
    let map = borrowed.as_mut().expect("map should be open");
    let transaction = map.transaction(ShareMode::Read).expect("begin read");
    let mut dumped = OsmData::default();
    transaction
        .dump(LayerRole::Active, &mut dumped)
        .expect("dump active layer");
    assert!(dumped.is_empty());
    assert!(
        transaction
            .next_ids(LayerRole::Active)
            .expect("read counters")
            .is_empty()
    );
}

#[scenario(path = "tests/features/versioned_store.feature", index = 0)]
fn new_node_round_trips(world: StoreWorld) {
    let _ = world;
}

#[scenario(path = "tests/features/versioned_store.feature", index = 1)]
fn deletion_keeps_history(world: StoreWorld) {
    let _ = world;
}

#[scenario(path = "tests/features/versioned_store.feature", index = 2)]
fn active_edits_shadow_static(world: StoreWorld) {
    let _ = world;
}

#[scenario(path = "tests/features/versioned_store.feature", index = 3)]
fn dangling_reference_rejected(world: StoreWorld) {
    let _ = world;
}
