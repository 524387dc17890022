//! Database handle and transaction scope.
//!
//! Every operation runs inside a [`MapTransaction`]. Writers open it with
//! [`ShareMode::Write`], which issues `BEGIN IMMEDIATE`: SQLite grants the
//! reserved lock before the first read, so the read-check-then-write steps
//! of the write path and the id allocator cannot interleave with another
//! writer. A competing writer waits for the configured busy timeout and
//! then fails with `SQLITE_BUSY`.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use thiserror::Error;

use osmstrata_core::{ObjectKind, ObjectSink, OsmChange, OsmData};

use crate::config::{ConfigError, MapConfig};
use crate::error::{StoreError, sqlite};
use crate::ids::{IdAllocator, refresh_counters};
use crate::layer::{LayerRole, Layers};
use crate::map_query::MapQuery;
use crate::observe::{LogObserver, StoreEvent, StoreObserver};
use crate::query::{self, QueryContext};
use crate::replicate::{self, DiffReport};
use crate::schema::{SchemaError, initialise_layer};
use crate::write::{CreatedIds, store_in_savepoint};

/// Errors raised while opening a [`SqliteMap`].
#[derive(Debug, Error)]
pub enum OpenMapError {
    /// The configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The parent directory could not be created.
    #[error("failed to create directory {path}")]
    CreateDirectory {
        /// Directory being created.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// SQLite refused to open the file.
    #[error("failed to open SQLite database at {path}")]
    Open {
        /// Database path.
        path: Utf8PathBuf,
        /// Underlying SQLite error.
        #[source]
        source: rusqlite::Error,
    },
    /// The connection could not be configured.
    #[error("failed to configure SQLite connection")]
    Configure {
        /// Underlying SQLite error.
        #[source]
        source: rusqlite::Error,
    },
}

/// How a transaction intends to use the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareMode {
    /// Reads only; mutating calls fail with
    /// [`StoreError::ReadOnlyTransaction`].
    Read,
    /// Reads and writes, holding SQLite's reserved lock from the start.
    Write,
}

/// A versioned object store backed by one SQLite database holding a static
/// and an active layer.
///
/// # Examples
///
/// ```
/// use osmstrata_core::{MetaData, Node, OsmData, Tags};
/// use osmstrata_store::{MapConfig, ShareMode, SqliteMap};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut map = SqliteMap::open_in_memory(MapConfig::default())?;
/// map.initialise_layers()?;
///
/// let mut transaction = map.transaction(ShareMode::Write)?;
/// let batch = OsmData {
///     nodes: vec![Node { id: -1, meta: MetaData::default(), tags: Tags::new(), lat: 51.5, lon: -0.1 }],
///     ..OsmData::default()
/// };
/// let created = transaction.store_objects(batch)?;
/// transaction.commit()?;
/// assert_eq!(created.nodes.get(&-1), Some(&1));
/// # Ok(())
/// # }
/// ```
pub struct SqliteMap {
    connection: Connection,
    layers: Layers,
    config: MapConfig,
    observer: Arc<dyn StoreObserver>,
}

impl SqliteMap {
    /// Opens (creating if needed) the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`OpenMapError`] when the configuration is invalid, the
    /// parent directory cannot be created or SQLite fails to open.
    pub fn open(path: &Utf8Path, config: MapConfig) -> Result<Self, OpenMapError> {
        config.validate()?;
        ensure_parent_dir(path)?;
        let connection = Connection::open(path.as_std_path()).map_err(|source| {
            OpenMapError::Open {
                path: path.to_path_buf(),
                source,
            }
        })?;
        Self::from_connection(connection, config)
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`OpenMapError`] when the configuration is invalid.
    pub fn open_in_memory(config: MapConfig) -> Result<Self, OpenMapError> {
        let connection =
            Connection::open_in_memory().map_err(|source| OpenMapError::Open {
                path: Utf8PathBuf::from(":memory:"),
                source,
            })?;
        Self::from_connection(connection, config)
    }

    /// Wraps an existing connection.
    ///
    /// # Errors
    ///
    /// Returns [`OpenMapError`] when the configuration is invalid or the
    /// busy timeout cannot be applied.
    pub fn from_connection(connection: Connection, config: MapConfig) -> Result<Self, OpenMapError> {
        let layers = config.validate()?;
        connection
            .busy_timeout(config.busy_timeout())
            .map_err(|source| OpenMapError::Configure { source })?;
        Ok(Self {
            connection,
            layers,
            config,
            observer: Arc::new(LogObserver),
        })
    }

    /// Replaces the default [`LogObserver`].
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn StoreObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Creates the tables of both layers if they are missing.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] if a step fails.
    pub fn initialise_layers(&mut self) -> Result<(), SchemaError> {
        initialise_layer(&mut self.connection, self.layers.static_layer())?;
        initialise_layer(&mut self.connection, self.layers.active_layer())
    }

    /// The configured layer pair.
    #[must_use]
    pub const fn layers(&self) -> &Layers {
        &self.layers
    }

    /// The settings the map was opened with.
    #[must_use]
    pub const fn config(&self) -> &MapConfig {
        &self.config
    }

    /// The underlying connection, for inspection.
    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Begins a transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlite`] when SQLite cannot begin it, notably
    /// `SQLITE_BUSY` when another writer holds the database.
    pub fn transaction(&mut self, mode: ShareMode) -> Result<MapTransaction<'_>, StoreError> {
        let behavior = match mode {
            ShareMode::Read => TransactionBehavior::Deferred,
            ShareMode::Write => TransactionBehavior::Immediate,
        };
        let transaction = self
            .connection
            .transaction_with_behavior(behavior)
            .map_err(sqlite("begin transaction"))?;
        Ok(MapTransaction {
            transaction,
            layers: &self.layers,
            batch_size: self.config.batch_size,
            observer: self.observer.as_ref(),
            mode,
        })
    }
}

/// An open transaction over both layers. Reads use the merged view; writes
/// always target the active layer. Dropping it without
/// [`commit`](Self::commit) rolls back.
pub struct MapTransaction<'m> {
    transaction: Transaction<'m>,
    layers: &'m Layers,
    batch_size: usize,
    observer: &'m dyn StoreObserver,
    mode: ShareMode,
}

impl MapTransaction<'_> {
    /// The mode the transaction was opened with.
    #[must_use]
    pub const fn mode(&self) -> ShareMode {
        self.mode
    }

    fn query_context(&self) -> QueryContext<'_> {
        QueryContext {
            connection: &self.transaction,
            layers: self.layers,
            batch_size: self.batch_size,
        }
    }

    fn ensure_writable(&self) -> Result<(), StoreError> {
        match self.mode {
            ShareMode::Write => Ok(()),
            ShareMode::Read => Err(StoreError::ReadOnlyTransaction),
        }
    }

    /// Streams the merged live state of `ids` and returns how many objects
    /// were emitted.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if a page cannot be read or decoded.
    pub fn get_objects_by_id<S: ObjectSink + ?Sized>(
        &self,
        kind: ObjectKind,
        ids: &BTreeSet<i64>,
        sink: &mut S,
    ) -> Result<usize, StoreError> {
        query::get_objects_by_id(&self.query_context(), kind, ids, sink)
    }

    /// Streams every merged live way whose current version references one
    /// of `node_ids`, each way once.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if a page cannot be read or decoded.
    pub fn ways_for_nodes<S: ObjectSink + ?Sized>(
        &self,
        node_ids: &BTreeSet<i64>,
        sink: &mut S,
    ) -> Result<usize, StoreError> {
        query::ways_for_nodes(&self.query_context(), node_ids, sink)
    }

    /// Streams every merged live relation with a `member_kind` member in
    /// `ids`, except those in `skip`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if a page cannot be read or decoded.
    pub fn relations_for_objects<S: ObjectSink + ?Sized>(
        &self,
        member_kind: ObjectKind,
        ids: &BTreeSet<i64>,
        skip: &BTreeSet<i64>,
        sink: &mut S,
    ) -> Result<usize, StoreError> {
        query::relations_for_objects(&self.query_context(), member_kind, ids, skip, sink)
    }

    /// A fresh, idle map extract over this transaction.
    #[must_use]
    pub fn map_query<S: ObjectSink>(&self) -> MapQuery<'_, S> {
        MapQuery::new(&self.transaction, self.layers, self.batch_size, self.observer)
    }

    /// Streams every live object of one layer.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if a page cannot be read or decoded.
    pub fn dump<S: ObjectSink + ?Sized>(
        &self,
        role: LayerRole,
        sink: &mut S,
    ) -> Result<usize, StoreError> {
        query::dump(&self.query_context(), role, sink)
    }

    /// Streams every version of one layer with `start < timestamp <= end`,
    /// from the history tables when `use_history` is set and from the live
    /// tables otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if a page cannot be read or decoded.
    pub fn get_diff<S: ObjectSink + ?Sized>(
        &self,
        role: LayerRole,
        use_history: bool,
        start: i64,
        end: i64,
        sink: &mut S,
    ) -> Result<usize, StoreError> {
        replicate::get_diff(
            &self.transaction,
            self.layers.prefix(role),
            use_history,
            (start, end),
            self.batch_size,
            sink,
        )
    }

    /// Allocator counters of one layer.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlite`] if the table cannot be read.
    pub fn next_ids(&self, role: LayerRole) -> Result<BTreeMap<ObjectKind, i64>, StoreError> {
        IdAllocator::load(&self.transaction, self.layers.prefix(role))
            .map(|allocator| allocator.counters().clone())
    }

    /// Stores a batch in the active layer. The batch is all-or-nothing: on
    /// error nothing it wrote remains and the transaction stays usable.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Constraint`] for caller errors,
    /// [`StoreError::ReadOnlyTransaction`] on a read transaction and
    /// [`StoreError::Sqlite`] for backing store failures.
    pub fn store_objects(&mut self, data: OsmData) -> Result<CreatedIds, StoreError> {
        self.ensure_writable()?;
        store_in_savepoint(
            &mut self.transaction,
            self.layers.active_layer(),
            Some(self.layers.static_layer()),
            self.observer,
            data,
        )
    }

    /// Applies a decoded change document to the active layer block by
    /// block. Failing blocks are rolled back, logged and reported; the rest
    /// are kept.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ReadOnlyTransaction`] on a read transaction.
    pub fn apply_diff(&mut self, change: OsmChange) -> Result<DiffReport, StoreError> {
        self.ensure_writable()?;
        Ok(replicate::apply_diff(
            &mut self.transaction,
            self.layers.active_layer(),
            Some(self.layers.static_layer()),
            self.observer,
            change,
        ))
    }

    /// Empties every active-layer table and restarts its allocator from the
    /// static layer's counters.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if a statement fails or the transaction is
    /// read-only.
    pub fn reset_active_layer(&mut self) -> Result<(), StoreError> {
        self.ensure_writable()?;
        let active = self.layers.active_layer();
        let savepoint = self
            .transaction
            .savepoint()
            .map_err(sqlite("open reset savepoint"))?;
        for table in active.data_tables() {
            savepoint
                .execute(&format!("DELETE FROM {table}"), [])
                .map_err(sqlite("clear active table"))?;
        }
        let baseline = IdAllocator::load(&savepoint, self.layers.static_layer())?;
        IdAllocator::seeded(baseline.counters().clone()).commit(
            &savepoint,
            active,
            self.observer,
        )?;
        savepoint
            .commit()
            .map_err(sqlite("release reset savepoint"))?;
        self.observer.on_event(&StoreEvent::ActiveLayerReset {
            layer: active.as_str(),
        });
        Ok(())
    }

    /// Raises the active layer's counters above every id stored in either
    /// layer, never below the static layer's counters. Returns the new
    /// counters.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if a statement fails or the transaction is
    /// read-only.
    pub fn refresh_next_ids(&mut self) -> Result<BTreeMap<ObjectKind, i64>, StoreError> {
        self.ensure_writable()?;
        let floor = self.next_ids(LayerRole::Static)?;
        refresh_counters(
            &self.transaction,
            self.layers.active_layer(),
            &[self.layers.static_layer(), self.layers.active_layer()],
            &floor,
            self.observer,
        )
    }

    /// Commits the transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlite`] if SQLite rejects the commit.
    pub fn commit(self) -> Result<(), StoreError> {
        self.transaction.commit().map_err(sqlite("commit transaction"))
    }

    /// Rolls the transaction back.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlite`] if SQLite rejects the rollback.
    pub fn abort(self) -> Result<(), StoreError> {
        self.transaction
            .rollback()
            .map_err(sqlite("roll back transaction"))
    }
}

fn ensure_parent_dir(path: &Utf8Path) -> Result<(), OpenMapError> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_str().is_empty() || parent == Utf8Path::new("/") {
        return Ok(());
    }
    let (base, relative) = if parent.is_absolute() {
        ("/", parent.strip_prefix("/").unwrap_or(parent))
    } else {
        (".", parent)
    };
    let create_directory = |source| OpenMapError::CreateDirectory {
        path: parent.to_path_buf(),
        source,
    };
    fs_utf8::Dir::open_ambient_dir(base, ambient_authority())
        .and_then(|dir| dir.create_dir_all(relative))
        .map_err(create_directory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use osmstrata_core::test_support::{node, way};
    use rstest::{fixture, rstest};

    #[fixture]
    fn map() -> SqliteMap {
        let mut map = SqliteMap::open_in_memory(MapConfig::default()).expect("open map");
        map.initialise_layers().expect("initialise layers");
        map
    }

    fn nodes(batch: Vec<osmstrata_core::Node>) -> OsmData {
        OsmData {
            nodes: batch,
            ..OsmData::default()
        }
    }

    #[rstest]
    fn read_transaction_rejects_writes(mut map: SqliteMap) {
        let mut transaction = map.transaction(ShareMode::Read).expect("begin read");
        let error = transaction
            .store_objects(nodes(vec![node(1, 1, 0.0, 0.0)]))
            .expect_err("read-only");
        assert!(matches!(error, StoreError::ReadOnlyTransaction));
        assert!(matches!(
            transaction.reset_active_layer(),
            Err(StoreError::ReadOnlyTransaction)
        ));
    }

    #[rstest]
    fn aborted_transaction_leaves_no_trace(mut map: SqliteMap) {
        let mut transaction = map.transaction(ShareMode::Write).expect("begin");
        transaction
            .store_objects(nodes(vec![node(1, 1, 0.0, 0.0)]))
            .expect("store");
        transaction.abort().expect("abort");

        let transaction = map.transaction(ShareMode::Read).expect("begin read");
        let mut sink = OsmData::default();
        transaction
            .get_objects_by_id(ObjectKind::Node, &BTreeSet::from([1]), &mut sink)
            .expect("read");
        assert!(sink.is_empty());
    }

    #[rstest]
    fn reset_restores_static_counters(mut map: SqliteMap) {
        map.connection()
            .execute("INSERT INTO planet_nextids (id, maxid) VALUES ('node', 100)", [])
            .expect("seed static counter");
        let mut transaction = map.transaction(ShareMode::Write).expect("begin");
        transaction.reset_active_layer().expect("first reset");
        let created = transaction
            .store_objects(OsmData {
                nodes: vec![node(-1, 1, 0.0, 0.0)],
                ways: vec![way(-1, 1, &[-1])],
                ..OsmData::default()
            })
            .expect("store");
        assert_eq!(created.nodes.get(&-1), Some(&100));

        transaction.reset_active_layer().expect("second reset");
        let mut sink = OsmData::default();
        let dumped = transaction
            .dump(LayerRole::Active, &mut sink)
            .expect("dump");
        assert_eq!(dumped, 0);
        assert_eq!(
            transaction.next_ids(LayerRole::Active).expect("counters"),
            BTreeMap::from([(ObjectKind::Node, 100)])
        );
        transaction.commit().expect("commit");
    }

    #[rstest]
    fn refresh_moves_counters_past_stored_ids(mut map: SqliteMap) {
        map.connection()
            .execute("INSERT INTO planet_nextids (id, maxid) VALUES ('way', 500)", [])
            .expect("seed static counter");
        map.connection()
            .execute(
                "INSERT INTO planet_livenodes (id, changeset, username, uid, timestamp, version, tags, lat, lon) \
                 VALUES (50, 1, '', 0, 0, 1, '{}', 0.0, 0.0)",
                [],
            )
            .expect("seed static node");
        let mut transaction = map.transaction(ShareMode::Write).expect("begin");
        transaction
            .store_objects(nodes(vec![node(60, 1, 0.0, 0.0)]))
            .expect("store");
        let counters = transaction.refresh_next_ids().expect("refresh");
        assert_eq!(counters.get(&ObjectKind::Node), Some(&61));
        assert_eq!(counters.get(&ObjectKind::Way), Some(&500));
        assert_eq!(counters.get(&ObjectKind::Relation), Some(&1));
        transaction.commit().expect("commit");
    }

    #[rstest]
    fn new_active_object_never_shadows_a_static_one(mut map: SqliteMap) {
        map.connection()
            .execute(
                "INSERT INTO planet_livenodes (id, changeset, username, uid, timestamp, version, tags, lat, lon) \
                 VALUES (1, 1, '', 0, 0, 1, '{\"name\":\"Static\"}', 10.0, 10.0)",
                [],
            )
            .expect("seed static node");
        let mut transaction = map.transaction(ShareMode::Write).expect("begin");
        let created = transaction
            .store_objects(nodes(vec![node(-1, 1, 51.5, -0.1)]))
            .expect("store");
        assert_eq!(created.nodes.get(&-1), Some(&2));

        let mut sink = OsmData::default();
        transaction
            .get_objects_by_id(ObjectKind::Node, &BTreeSet::from([1, 2]), &mut sink)
            .expect("read");
        let placed: Vec<(i64, Option<&str>)> = sink
            .nodes
            .iter()
            .map(|stored| (stored.id, stored.tags.get("name").map(String::as_str)))
            .collect();
        assert_eq!(placed, vec![(1, Some("Static")), (2, None)]);
        transaction.commit().expect("commit");
    }

    #[rstest]
    fn open_creates_missing_parent_directories() {
        let dir = tempfile::tempdir().expect("temp dir");
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 path");
        let path = root.join("nested").join("maps").join("map.db");
        let mut map = SqliteMap::open(&path, MapConfig::default()).expect("open map");
        map.initialise_layers().expect("initialise layers");
        assert!(path.exists());
    }

    #[rstest]
    fn invalid_config_is_rejected() {
        let config = MapConfig {
            active_prefix: "planet_".to_owned(),
            ..MapConfig::default()
        };
        assert!(matches!(
            SqliteMap::open_in_memory(config),
            Err(OpenMapError::Config(_))
        ));
    }
}
