//! Table bootstrap for one layer.
//!
//! Schema management proper (migrations, tuning) belongs to the embedding
//! application. This module creates the tables the store expects so tests
//! and fresh databases have somewhere to write.

use rusqlite::{Connection, Error as SqliteError, OptionalExtension, Transaction};
use thiserror::Error;

use osmstrata_core::ObjectKind;

use crate::layer::TablePrefix;

/// Layout version recorded in `{prefix}schema_version`.
pub const SCHEMA_VERSION: i64 = 1;

/// Errors raised while creating a layer's tables.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// A DDL statement failed.
    #[error("failed to execute migration step '{step}' for layer '{layer}'")]
    Migration {
        /// Layer prefix.
        layer: String,
        /// Step being executed.
        step: &'static str,
        /// Underlying SQLite error.
        #[source]
        source: SqliteError,
    },
    /// The layer was created by a different layout version.
    #[error(
        "layer '{layer}' has schema version {found} but {expected} is required; migrate it before opening"
    )]
    VersionMismatch {
        /// Layer prefix.
        layer: String,
        /// Supported version.
        expected: i64,
        /// Recorded version.
        found: i64,
    },
}

/// Creates every table, index, R*Tree and trigger of one layer.
///
/// Re-running is harmless: statements use `IF NOT EXISTS` and the recorded
/// version must match [`SCHEMA_VERSION`].
///
/// # Errors
///
/// Returns [`SchemaError::Migration`] naming the failing step, or
/// [`SchemaError::VersionMismatch`] for a layer of another layout version.
///
/// # Examples
///
/// ```
/// use rusqlite::Connection;
/// use osmstrata_store::{TablePrefix, initialise_layer};
///
/// let mut conn = Connection::open_in_memory().expect("open database");
/// let prefix = TablePrefix::new("planet_").expect("prefix");
/// initialise_layer(&mut conn, &prefix).expect("create tables");
/// let count: i64 = conn
///     .query_row("SELECT COUNT(*) FROM planet_livenodes", [], |row| row.get(0))
///     .expect("count nodes");
/// assert_eq!(count, 0);
/// ```
pub fn initialise_layer(
    connection: &mut Connection,
    prefix: &TablePrefix,
) -> Result<(), SchemaError> {
    let layer = prefix.as_str();
    let transaction = connection
        .transaction()
        .map_err(|source| migration(layer, "begin schema transaction", source))?;

    create_object_tables(&transaction, prefix)?;
    create_membership_tables(&transaction, prefix)?;
    create_node_geometry(&transaction, prefix)?;
    run_migration_step(
        &transaction,
        layer,
        "create nextids",
        &format!(
            "CREATE TABLE IF NOT EXISTS {} (id TEXT PRIMARY KEY, maxid INTEGER NOT NULL)",
            prefix.next_ids()
        ),
    )?;
    ensure_schema_version(&transaction, prefix)?;

    transaction
        .commit()
        .map_err(|source| migration(layer, "commit schema transaction", source))
}

fn payload_ddl(kind: ObjectKind) -> &'static str {
    match kind {
        ObjectKind::Node => "lat REAL NOT NULL, lon REAL NOT NULL",
        ObjectKind::Way => "members TEXT NOT NULL",
        ObjectKind::Relation => "members TEXT NOT NULL, memberroles TEXT NOT NULL",
    }
}

const META_DDL: &str = "changeset INTEGER NOT NULL,
    username TEXT,
    uid INTEGER,
    timestamp INTEGER NOT NULL,
    version INTEGER NOT NULL CHECK (version > 0),
    tags TEXT NOT NULL";

fn create_object_tables(
    transaction: &Transaction<'_>,
    prefix: &TablePrefix,
) -> Result<(), SchemaError> {
    let layer = prefix.as_str();
    for kind in ObjectKind::ALL {
        let live = prefix.live(kind);
        let history = prefix.history(kind);
        run_migration_step(
            transaction,
            layer,
            "create live table",
            &format!(
                "CREATE TABLE IF NOT EXISTS {live} (
                    id INTEGER PRIMARY KEY,
                    {META_DDL},
                    {payload}
                )",
                payload = payload_ddl(kind)
            ),
        )?;
        run_migration_step(
            transaction,
            layer,
            "create history table",
            &format!(
                "CREATE TABLE IF NOT EXISTS {history} (
                    id INTEGER NOT NULL,
                    {META_DDL},
                    visible INTEGER NOT NULL,
                    {payload},
                    PRIMARY KEY (id, version)
                ) WITHOUT ROWID",
                payload = payload_ddl(kind)
            ),
        )?;
        run_migration_step(
            transaction,
            layer,
            "create existence index",
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (id INTEGER PRIMARY KEY)",
                prefix.existence(kind)
            ),
        )?;
        run_migration_step(
            transaction,
            layer,
            "index live timestamps",
            &format!("CREATE INDEX IF NOT EXISTS idx_{live}_timestamp ON {live}(timestamp)"),
        )?;
        run_migration_step(
            transaction,
            layer,
            "index history timestamps",
            &format!(
                "CREATE INDEX IF NOT EXISTS idx_{history}_timestamp ON {history}(timestamp)"
            ),
        )?;
    }
    Ok(())
}

fn create_membership_tables(
    transaction: &Transaction<'_>,
    prefix: &TablePrefix,
) -> Result<(), SchemaError> {
    let layer = prefix.as_str();
    let tables = std::iter::once((ObjectKind::Way, ObjectKind::Node))
        .chain(ObjectKind::ALL.map(|member| (ObjectKind::Relation, member)))
        .filter_map(|(owner, member)| prefix.membership(owner, member));
    for table in tables {
        run_migration_step(
            transaction,
            layer,
            "create membership table",
            &format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    id INTEGER NOT NULL,
                    version INTEGER NOT NULL,
                    position INTEGER NOT NULL,
                    member INTEGER NOT NULL,
                    PRIMARY KEY (id, version, position)
                ) WITHOUT ROWID"
            ),
        )?;
        run_migration_step(
            transaction,
            layer,
            "index membership members",
            &format!("CREATE INDEX IF NOT EXISTS idx_{table}_member ON {table}(member)"),
        )?;
    }
    Ok(())
}

fn create_node_geometry(
    transaction: &Transaction<'_>,
    prefix: &TablePrefix,
) -> Result<(), SchemaError> {
    let layer = prefix.as_str();
    let nodes = prefix.live(ObjectKind::Node);
    let geometry = prefix.node_geometry();
    run_migration_step(
        transaction,
        layer,
        "create node geometry index",
        &format!(
            "CREATE VIRTUAL TABLE IF NOT EXISTS {geometry}
                USING rtree(id, min_lon, max_lon, min_lat, max_lat)"
        ),
    )?;
    run_migration_step(
        transaction,
        layer,
        "create geometry insert trigger",
        &format!(
            "CREATE TRIGGER IF NOT EXISTS {geometry}_insert AFTER INSERT ON {nodes}
            BEGIN
                INSERT INTO {geometry} (id, min_lon, max_lon, min_lat, max_lat)
                VALUES (NEW.id, NEW.lon, NEW.lon, NEW.lat, NEW.lat);
            END"
        ),
    )?;
    run_migration_step(
        transaction,
        layer,
        "create geometry update trigger",
        &format!(
            "CREATE TRIGGER IF NOT EXISTS {geometry}_update AFTER UPDATE OF lat, lon ON {nodes}
            BEGIN
                UPDATE {geometry}
                SET min_lon = NEW.lon, max_lon = NEW.lon, min_lat = NEW.lat, max_lat = NEW.lat
                WHERE id = NEW.id;
            END"
        ),
    )?;
    run_migration_step(
        transaction,
        layer,
        "create geometry delete trigger",
        &format!(
            "CREATE TRIGGER IF NOT EXISTS {geometry}_delete AFTER DELETE ON {nodes}
            BEGIN
                DELETE FROM {geometry} WHERE id = OLD.id;
            END"
        ),
    )
}

fn ensure_schema_version(
    transaction: &Transaction<'_>,
    prefix: &TablePrefix,
) -> Result<(), SchemaError> {
    let layer = prefix.as_str();
    let table = prefix.schema_version();
    run_migration_step(
        transaction,
        layer,
        "create schema version table",
        &format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                version INTEGER PRIMARY KEY CHECK (version > 0),
                applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
            ) WITHOUT ROWID"
        ),
    )?;

    let existing: Option<i64> = transaction
        .query_row(&format!("SELECT version FROM {table} LIMIT 1"), [], |row| {
            row.get(0)
        })
        .optional()
        .map_err(|source| migration(layer, "read schema version", source))?;

    match existing {
        Some(version) if version == SCHEMA_VERSION => Ok(()),
        Some(found) => Err(SchemaError::VersionMismatch {
            layer: layer.to_owned(),
            expected: SCHEMA_VERSION,
            found,
        }),
        None => transaction
            .execute(
                &format!("INSERT INTO {table} (version) VALUES (?1)"),
                [SCHEMA_VERSION],
            )
            .map(|_| ())
            .map_err(|source| migration(layer, "record schema version", source)),
    }
}

fn run_migration_step(
    transaction: &Transaction<'_>,
    layer: &str,
    step: &'static str,
    sql: &str,
) -> Result<(), SchemaError> {
    transaction
        .execute_batch(sql)
        .map_err(|source| migration(layer, step, source))
}

fn migration(layer: &str, step: &'static str, source: SqliteError) -> SchemaError {
    SchemaError::Migration {
        layer: layer.to_owned(),
        step,
        source,
    }
}
