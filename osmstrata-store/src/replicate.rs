//! Replication feed: timestamp-windowed extraction and best-effort diff
//! application.

use rusqlite::{Connection, Transaction};

use osmstrata_core::{ChangeAction, ChangeBlock, ObjectKind, ObjectSink, OsmChange};

use crate::error::StoreError;
use crate::layer::TablePrefix;
use crate::observe::{StoreEvent, StoreObserver};
use crate::query::cursor::DiffCursor;
use crate::query::decode::TableKind;
use crate::write::{CreatedIds, store_in_savepoint};

/// A diff block that was stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedBlock {
    /// Block index in file order.
    pub index: usize,
    /// Action of the block.
    pub action: ChangeAction,
    /// Ids assigned to placeholders in the block.
    pub created: CreatedIds,
}

/// A diff block that failed and was rolled back.
#[derive(Debug)]
pub struct SkippedBlock {
    /// Block index in file order.
    pub index: usize,
    /// Action of the block.
    pub action: ChangeAction,
    /// Why the block failed.
    pub error: StoreError,
}

/// Outcome of [`MapTransaction::apply_diff`](crate::MapTransaction::apply_diff).
#[derive(Debug, Default)]
pub struct DiffReport {
    /// Blocks stored, in file order.
    pub applied: Vec<AppliedBlock>,
    /// Blocks skipped, in file order.
    pub skipped: Vec<SkippedBlock>,
}

impl DiffReport {
    /// `true` when every block was stored.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }
}

/// Streams every version with `start < timestamp <= end` from the live or
/// history tables of `prefix`: nodes, then ways, then relations, each
/// ordered by timestamp.
pub(crate) fn get_diff<S: ObjectSink + ?Sized>(
    connection: &Connection,
    prefix: &TablePrefix,
    use_history: bool,
    (start, end): (i64, i64),
    batch_size: usize,
    sink: &mut S,
) -> Result<usize, StoreError> {
    let table = if use_history {
        TableKind::History
    } else {
        TableKind::Live
    };
    sink.store_is_diff(true);
    let mut count = 0;
    for kind in ObjectKind::ALL {
        let mut cursor = DiffCursor::new(kind, prefix, table, start, end);
        while !cursor.is_exhausted() {
            for object in cursor.next_page(connection, batch_size)? {
                sink.store_object(&object);
                count += 1;
            }
        }
    }
    Ok(count)
}

/// Applies each block of `change` to `prefix`, which shadows `baseline`,
/// inside its own savepoint.
/// Every object of a block takes the block's visibility. A failing block
/// is rolled back, reported to `observer` and recorded in the report; the
/// remaining blocks are still applied.
pub(crate) fn apply_diff(
    transaction: &mut Transaction<'_>,
    prefix: &TablePrefix,
    baseline: Option<&TablePrefix>,
    observer: &dyn StoreObserver,
    change: OsmChange,
) -> DiffReport {
    let mut report = DiffReport::default();
    for (index, ChangeBlock { action, mut data }) in change.blocks.into_iter().enumerate() {
        data.set_visible(action.visible());
        match store_in_savepoint(transaction, prefix, baseline, observer, data) {
            Ok(created) => report.applied.push(AppliedBlock {
                index,
                action,
                created,
            }),
            Err(error) => {
                observer.on_event(&StoreEvent::DiffBlockSkipped {
                    index,
                    action,
                    error: &error,
                });
                report.skipped.push(SkippedBlock {
                    index,
                    action,
                    error,
                });
            }
        }
    }
    report
}
