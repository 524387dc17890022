//! Shared fixtures for unit tests.

use std::sync::Mutex;

use rstest::fixture;
use rusqlite::Connection;

use osmstrata_core::{ObjectKind, OsmData};

use crate::error::StoreError;
use crate::layer::{Layers, TablePrefix};
use crate::map_query::MapQueryPhase;
use crate::observe::{Placement, StoreEvent, StoreObserver};
use crate::schema::initialise_layer;
use crate::write::{CreatedIds, WriteContext, store_objects};

/// Discards every event.
pub(crate) struct SilentObserver;

impl StoreObserver for SilentObserver {
    fn on_event(&self, _event: &StoreEvent<'_>) {}
}

/// Keeps the events tests assert on.
#[derive(Default)]
pub(crate) struct RecordingObserver {
    pub(crate) phases: Mutex<Vec<MapQueryPhase>>,
    pub(crate) placements: Mutex<Vec<(ObjectKind, i64, i64, Placement)>>,
    pub(crate) skipped: Mutex<Vec<usize>>,
}

impl RecordingObserver {
    pub(crate) fn phases(&self) -> Vec<MapQueryPhase> {
        self.phases.lock().expect("phases lock").clone()
    }

    pub(crate) fn placements(&self) -> Vec<(ObjectKind, i64, i64, Placement)> {
        self.placements.lock().expect("placements lock").clone()
    }
}

impl StoreObserver for RecordingObserver {
    fn on_event(&self, event: &StoreEvent<'_>) {
        match event {
            StoreEvent::MapQueryPhase { phase } => {
                self.phases.lock().expect("phases lock").push(*phase);
            }
            StoreEvent::ObjectPlaced {
                kind,
                id,
                version,
                placement,
                ..
            } => self
                .placements
                .lock()
                .expect("placements lock")
                .push((*kind, *id, *version, *placement)),
            StoreEvent::DiffBlockSkipped { index, .. } => {
                self.skipped.lock().expect("skipped lock").push(*index);
            }
            _ => {}
        }
    }
}

/// In-memory connection with one initialised layer.
pub(crate) fn layer_connection(prefix: &str) -> (Connection, TablePrefix) {
    let mut conn = Connection::open_in_memory().expect("open in-memory database");
    let prefix = TablePrefix::new(prefix).expect("valid prefix");
    initialise_layer(&mut conn, &prefix).expect("initialise layer");
    (conn, prefix)
}

/// In-memory connection with a `planet_`/`active_` layer pair.
#[fixture]
pub(crate) fn layered() -> (Connection, Layers) {
    let mut conn = Connection::open_in_memory().expect("open in-memory database");
    let layers = Layers::new(
        TablePrefix::new("planet_").expect("static prefix"),
        TablePrefix::new("active_").expect("active prefix"),
    )
    .expect("distinct layers");
    initialise_layer(&mut conn, layers.static_layer()).expect("initialise static layer");
    initialise_layer(&mut conn, layers.active_layer()).expect("initialise active layer");
    (conn, layers)
}

/// Stores `data` in `prefix` without a surrounding transaction.
pub(crate) fn store(
    conn: &Connection,
    prefix: &TablePrefix,
    data: OsmData,
) -> Result<CreatedIds, StoreError> {
    let ctx = WriteContext {
        connection: conn,
        prefix,
        baseline: None,
        observer: &SilentObserver,
    };
    store_objects(&ctx, data)
}

/// Counts rows of `table` matching `condition`.
pub(crate) fn count(conn: &Connection, table: &str, condition: &str) -> i64 {
    conn.query_row(
        &format!("SELECT COUNT(*) FROM {table} WHERE {condition}"),
        [],
        |row| row.get(0),
    )
    .expect("count rows")
}
