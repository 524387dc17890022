//! Per-kind id counters persisted in `{prefix}nextids`.

use std::collections::BTreeMap;

use log::warn;
use rusqlite::{Connection, OptionalExtension, params};

use osmstrata_core::ObjectKind;

use crate::error::{StoreError, sqlite};
use crate::layer::TablePrefix;
use crate::observe::{StoreEvent, StoreObserver};

/// Next-available id per kind, as loaded from one layer plus the values
/// advanced in memory since.
///
/// The allocator is threaded through a write batch by value and committed
/// at the end of the batch inside the same transaction, so counters never
/// move unless the objects that consumed them are stored too.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdAllocator {
    original: BTreeMap<ObjectKind, i64>,
    next: BTreeMap<ObjectKind, i64>,
}

impl IdAllocator {
    /// Reads the counters of `prefix`. Unknown rows are skipped with a
    /// warning.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlite`] if the table cannot be read.
    pub fn load(connection: &Connection, prefix: &TablePrefix) -> Result<Self, StoreError> {
        let mut statement = connection
            .prepare_cached(&format!("SELECT id, maxid FROM {}", prefix.next_ids()))
            .map_err(sqlite("prepare next id query"))?;
        let rows = statement
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
            .map_err(sqlite("query next ids"))?;
        let mut original = BTreeMap::new();
        for row in rows {
            let (name, next) = row.map_err(sqlite("read next id row"))?;
            match name.parse::<ObjectKind>() {
                Ok(kind) => {
                    original.insert(kind, next);
                }
                Err(_) => warn!(
                    "Skipped next id row with unknown kind layer={}, kind={name}",
                    prefix.as_str()
                ),
            }
        }
        Ok(Self::from_counters(original))
    }

    /// Builds an allocator whose counters are all unpersisted.
    #[must_use]
    pub fn seeded(next: BTreeMap<ObjectKind, i64>) -> Self {
        Self {
            original: BTreeMap::new(),
            next,
        }
    }

    fn from_counters(original: BTreeMap<ObjectKind, i64>) -> Self {
        Self {
            next: original.clone(),
            original,
        }
    }

    /// Next id of `kind` without consuming it. A kind with no counter
    /// starts at 1; the write path seeds it first with [`first_free_id`].
    #[must_use]
    pub fn peek(&self, kind: ObjectKind) -> i64 {
        self.next.get(&kind).copied().unwrap_or(1)
    }

    /// Returns the next id of `kind` and advances the counter.
    ///
    /// # Examples
    ///
    /// ```
    /// use osmstrata_core::ObjectKind;
    /// use osmstrata_store::IdAllocator;
    ///
    /// let mut ids = IdAllocator::default();
    /// assert_eq!(ids.advance(ObjectKind::Way), 1);
    /// assert_eq!(ids.advance(ObjectKind::Way), 2);
    /// assert_eq!(ids.peek(ObjectKind::Node), 1);
    /// ```
    pub fn advance(&mut self, kind: ObjectKind) -> i64 {
        let counter = self.next.entry(kind).or_insert(1);
        let id = *counter;
        *counter += 1;
        id
    }

    /// Starts `kind` at `next` unless it already has a counter.
    pub(crate) fn seed(&mut self, kind: ObjectKind, next: i64) {
        self.next.entry(kind).or_insert(next);
    }

    /// `true` when `kind` has a loaded or advanced counter.
    #[must_use]
    pub(crate) fn has_counter(&self, kind: ObjectKind) -> bool {
        self.next.contains_key(&kind)
    }

    /// Current counters, including unpersisted advances.
    #[must_use]
    pub const fn counters(&self) -> &BTreeMap<ObjectKind, i64> {
        &self.next
    }

    /// `true` when some counter differs from what was loaded.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.next
            .iter()
            .any(|(kind, next)| self.original.get(kind) != Some(next))
    }

    /// Persists changed counters to `prefix`: rows that existed when the
    /// allocator was loaded are updated, others are inserted.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlite`] if a statement fails.
    pub fn commit(
        &mut self,
        connection: &Connection,
        prefix: &TablePrefix,
        observer: &dyn StoreObserver,
    ) -> Result<(), StoreError> {
        let table = prefix.next_ids();
        for (kind, next) in &self.next {
            match self.original.get(kind) {
                Some(loaded) if loaded == next => continue,
                Some(_) => {
                    connection
                        .prepare_cached(&format!("UPDATE {table} SET maxid = ?2 WHERE id = ?1"))
                        .and_then(|mut statement| statement.execute(params![kind.as_str(), next]))
                        .map_err(sqlite("update next id"))?;
                }
                None => {
                    connection
                        .prepare_cached(&format!(
                            "INSERT INTO {table} (id, maxid) VALUES (?1, ?2)"
                        ))
                        .and_then(|mut statement| statement.execute(params![kind.as_str(), next]))
                        .map_err(sqlite("insert next id"))?;
                }
            }
            observer.on_event(&StoreEvent::NextIdsCommitted {
                layer: prefix.as_str(),
                kind: *kind,
                next: *next,
            });
        }
        self.original = self.next.clone();
        Ok(())
    }
}

/// Largest id of `kind` in the live and history tables of `prefix`.
pub(crate) fn max_stored_id(
    connection: &Connection,
    prefix: &TablePrefix,
    kind: ObjectKind,
) -> Result<Option<i64>, StoreError> {
    connection
        .query_row(
            &format!(
                "SELECT MAX(id) FROM (SELECT MAX(id) AS id FROM {} UNION ALL SELECT MAX(id) FROM {})",
                prefix.live(kind),
                prefix.history(kind)
            ),
            [],
            |row| row.get::<_, Option<i64>>(0),
        )
        .optional()
        .map(Option::flatten)
        .map_err(sqlite("read maximum stored id"))
}

/// First id of `kind` that `target` may hand out when it has no counter
/// row: above every id stored in `target` and `baseline`, and never below
/// the counter `baseline` holds for `kind`.
pub(crate) fn first_free_id(
    connection: &Connection,
    target: &TablePrefix,
    baseline: Option<&TablePrefix>,
    kind: ObjectKind,
) -> Result<i64, StoreError> {
    let floor = baseline
        .map(|prefix| IdAllocator::load(connection, prefix))
        .transpose()?
        .and_then(|loaded| loaded.counters().get(&kind).copied());
    let scan: Vec<&TablePrefix> = std::iter::once(target).chain(baseline).collect();
    next_above_stored(connection, &scan, floor, kind)
}

fn next_above_stored(
    connection: &Connection,
    scan: &[&TablePrefix],
    floor: Option<i64>,
    kind: ObjectKind,
) -> Result<i64, StoreError> {
    let mut next = floor.unwrap_or(1).max(1);
    for prefix in scan {
        if let Some(max) = max_stored_id(connection, prefix, kind)? {
            next = next.max(max + 1);
        }
    }
    Ok(next)
}

/// Raises every counter of `target` above the largest id stored in any of
/// `scan`, never lowering it below `floor` or 1.
pub(crate) fn refresh_counters(
    connection: &Connection,
    target: &TablePrefix,
    scan: &[&TablePrefix],
    floor: &BTreeMap<ObjectKind, i64>,
    observer: &dyn StoreObserver,
) -> Result<BTreeMap<ObjectKind, i64>, StoreError> {
    let mut allocator = IdAllocator::load(connection, target)?;
    for kind in ObjectKind::ALL {
        let next = next_above_stored(connection, scan, floor.get(&kind).copied(), kind)?;
        allocator.next.insert(kind, next);
    }
    allocator.commit(connection, target, observer)?;
    Ok(allocator.next)
}
