//! SQLite-backed versioned store for OpenStreetMap objects.
//!
//! A database holds two layers of identically shaped tables distinguished
//! by a name prefix: a read-only static baseline and a mutable active
//! overlay. Reads see the merged view, in which an id the active layer has
//! ever stored shadows the static copy. Writes go to the active layer and
//! keep both the current version of each object and its full history.
//!
//! Open a [`SqliteMap`], begin a [`MapTransaction`] and push results into
//! any [`ObjectSink`](osmstrata_core::ObjectSink).
#![forbid(unsafe_code)]

mod config;
mod error;
mod ids;
mod layer;
mod map;
mod map_query;
mod observe;
mod query;
mod replicate;
mod schema;
mod write;

#[cfg(test)]
mod fixtures;

pub use config::{ConfigError, DEFAULT_BATCH_SIZE, MapConfig};
pub use error::{ConstraintViolation, StoreError};
pub use ids::IdAllocator;
pub use layer::{LayerError, LayerRole, Layers, TablePrefix};
pub use map::{MapTransaction, OpenMapError, ShareMode, SqliteMap};
pub use map_query::{MapQuery, MapQueryError, MapQueryPhase};
pub use observe::{LogObserver, Placement, StoreEvent, StoreObserver};
pub use query::cursor::SQLITE_MAX_VARIABLE_NUMBER;
pub use replicate::{AppliedBlock, DiffReport, SkippedBlock};
pub use schema::{SCHEMA_VERSION, SchemaError, initialise_layer};
pub use write::CreatedIds;
