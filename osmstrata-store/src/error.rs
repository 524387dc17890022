//! Error types shared by the write, query and replication paths.

use osmstrata_core::{CodecError, ObjectError, ObjectKind};
use rusqlite::Error as SqliteError;
use thiserror::Error;

/// Caller errors that abort the whole batch.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConstraintViolation {
    /// A placeholder id arrived with a version other than 1.
    #[error(
        "cannot assign a new {kind} to any version but 1: placeholder {placeholder} at batch position {position} has version {version}"
    )]
    WrongVersionForNewObject {
        /// Kind of the offending object.
        kind: ObjectKind,
        /// Placeholder id supplied by the caller.
        placeholder: i64,
        /// Version supplied by the caller.
        version: i64,
        /// Index of the object within its kind's batch.
        position: usize,
    },
    /// The same placeholder was used twice for one kind in one batch.
    #[error("placeholder {kind} {placeholder} at batch position {position} was already assigned")]
    DuplicatePlaceholder {
        /// Kind of the offending object.
        kind: ObjectKind,
        /// Reused placeholder id.
        placeholder: i64,
        /// Index of the second use within its kind's batch.
        position: usize,
    },
    /// A member reference names a placeholder that no object in the batch
    /// defined.
    #[error("{owner_kind} {owner_id} depends on undefined {member_kind} {reference}")]
    UnresolvedReference {
        /// Kind of the referencing object.
        owner_kind: ObjectKind,
        /// Id of the referencing object as submitted.
        owner_id: i64,
        /// Kind of the referenced object.
        member_kind: ObjectKind,
        /// The unresolved placeholder.
        reference: i64,
    },
    /// The allocator produced an id an object of the layer pair already
    /// holds, so the layer's counters lag behind its contents.
    #[error("allocated {kind} id {id} at batch position {position} is already in use")]
    AllocatedIdInUse {
        /// Kind of the new object.
        kind: ObjectKind,
        /// The allocated id.
        id: i64,
        /// Index of the new object within its kind's batch.
        position: usize,
    },
    /// A relation's member arrays were inconsistent.
    #[error(transparent)]
    Object(#[from] ObjectError),
}

/// Failures surfaced by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The batch broke a versioning or reference rule.
    #[error(transparent)]
    Constraint(#[from] ConstraintViolation),
    /// The backing store rejected a statement.
    #[error("failed to {operation}")]
    Sqlite {
        /// Operation being attempted.
        operation: &'static str,
        /// Underlying SQLite error.
        #[source]
        source: SqliteError,
    },
    /// A stored row could not be decoded.
    #[error("failed to decode stored {kind} {id}")]
    Decode {
        /// Kind of the row.
        kind: ObjectKind,
        /// Id of the row.
        id: i64,
        /// Codec failure.
        #[source]
        source: CodecError,
    },
    /// An object could not be encoded for storage.
    #[error("failed to encode {kind} {id}")]
    Encode {
        /// Kind of the object.
        kind: ObjectKind,
        /// Id of the object.
        id: i64,
        /// Codec failure.
        #[source]
        source: CodecError,
    },
    /// A write was attempted through a read-only transaction.
    #[error("transaction was opened read-only")]
    ReadOnlyTransaction,
}

impl StoreError {
    /// The constraint violation behind this error, if any.
    #[must_use]
    pub const fn constraint(&self) -> Option<&ConstraintViolation> {
        match self {
            Self::Constraint(violation) => Some(violation),
            _ => None,
        }
    }
}

/// Adapts a `rusqlite` error into [`StoreError::Sqlite`] for `operation`.
pub(crate) fn sqlite(operation: &'static str) -> impl FnOnce(SqliteError) -> StoreError {
    move |source| StoreError::Sqlite { operation, source }
}
