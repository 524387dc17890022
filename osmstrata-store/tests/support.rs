//! Helpers shared by the store's integration tests.

use std::collections::BTreeSet;

use camino::Utf8PathBuf;
use osmstrata_core::{ObjectKind, OsmData};
use osmstrata_store::{CreatedIds, MapConfig, ShareMode, SqliteMap, StoreError};
use tempfile::TempDir;

/// Path of the map database inside `dir`.
pub fn database_path(dir: &TempDir) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(dir.path().join("map.db"))
        .unwrap_or_else(|path| panic!("temporary path {path:?} is not UTF-8"))
}

/// Opens the map in `dir` with both layers initialised.
pub fn open_map(dir: &TempDir, config: MapConfig) -> SqliteMap {
    let mut map = SqliteMap::open(&database_path(dir), config)
        .unwrap_or_else(|err| panic!("failed to open map: {err}"));
    map.initialise_layers()
        .unwrap_or_else(|err| panic!("failed to initialise layers: {err}"));
    map
}

/// Stores `data` in its own committed write transaction.
pub fn write(map: &mut SqliteMap, data: OsmData) -> Result<CreatedIds, StoreError> {
    let mut transaction = map.transaction(ShareMode::Write)?;
    let created = transaction.store_objects(data)?;
    transaction.commit()?;
    Ok(created)
}

/// Reads the merged live state of `ids`.
pub fn read(map: &mut SqliteMap, kind: ObjectKind, ids: &[i64]) -> OsmData {
    let transaction = map
        .transaction(ShareMode::Read)
        .unwrap_or_else(|err| panic!("failed to begin read: {err}"));
    let wanted: BTreeSet<i64> = ids.iter().copied().collect();
    let mut sink = OsmData::default();
    transaction
        .get_objects_by_id(kind, &wanted, &mut sink)
        .unwrap_or_else(|err| panic!("failed to read objects: {err}"));
    sink
}

/// Writes `data` into the static layer of the map in `dir` by opening it
/// with the layer roles swapped.
pub fn seed_static(dir: &TempDir, data: OsmData) {
    let defaults = MapConfig::default();
    let swapped = MapConfig {
        static_prefix: defaults.active_prefix.clone(),
        active_prefix: defaults.static_prefix.clone(),
        ..defaults
    };
    let mut map = open_map(dir, swapped);
    write(&mut map, data).unwrap_or_else(|err| panic!("failed to seed static layer: {err}"));
}
