//! Facade crate for the osmstrata versioned OpenStreetMap object store.
//!
//! This crate re-exports the data model and, behind the `store-sqlite`
//! feature, the SQLite-backed store.

#![forbid(unsafe_code)]

pub use osmstrata_core::{
    ChangeAction, ChangeBlock, CodecError, IdSets, Member, MetaData, Node, ObjectError,
    ObjectKind, ObjectSink, OsmChange, OsmData, OsmObject, Relation, RetainIds, RetainMemberIds,
    Tags, Way, is_placeholder,
};

#[cfg(feature = "store-sqlite")]
pub use osmstrata_store::{
    ConstraintViolation, CreatedIds, DiffReport, LayerRole, LogObserver, MapConfig, MapQuery,
    MapQueryError, MapQueryPhase, MapTransaction, OpenMapError, ShareMode, SqliteMap, StoreError,
    StoreEvent, StoreObserver,
};
