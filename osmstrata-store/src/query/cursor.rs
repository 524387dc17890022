//! Keyset-paginated cursors.
//!
//! A cursor holds the query shape and the key of the last row it returned.
//! Each page is a fresh bounded statement, so no SQLite statement stays
//! open between calls and a cursor can be dropped at any point.

use geo::Rect;
use rusqlite::types::Value;
use rusqlite::{Connection, params_from_iter};

use osmstrata_core::{ObjectKind, OsmObject};

use super::decode::{TableKind, decode_row, select_list};
use crate::error::{StoreError, sqlite};
use crate::layer::TablePrefix;

/// Most host parameters placed in one `IN (...)` list.
pub const SQLITE_MAX_VARIABLE_NUMBER: usize = 999;

/// Row selection of a [`LiveCursor`].
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum LiveFilter {
    /// Every live row.
    All,
    /// Rows whose id is in the list.
    Ids(Vec<i64>),
    /// Nodes inside the box (`x` is longitude, `y` latitude).
    Bbox(Rect<f64>),
    /// Owners whose current version references one of `ids`.
    Members {
        member_kind: ObjectKind,
        ids: Vec<i64>,
    },
}

/// Cursor over the live table of one layer, optionally excluding ids that
/// another layer's existence index knows about.
#[derive(Debug, Clone)]
pub(crate) struct LiveCursor {
    kind: ObjectKind,
    source: TablePrefix,
    exclude: Option<TablePrefix>,
    filter: LiveFilter,
    after: i64,
    exhausted: bool,
}

impl LiveCursor {
    pub(crate) fn new(
        kind: ObjectKind,
        source: &TablePrefix,
        exclude: Option<&TablePrefix>,
        filter: LiveFilter,
    ) -> Self {
        Self {
            kind,
            source: source.clone(),
            exclude: exclude.cloned(),
            filter,
            after: i64::MIN,
            exhausted: false,
        }
    }

    pub(crate) const fn kind(&self) -> ObjectKind {
        self.kind
    }

    pub(crate) const fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Fetches up to `limit` rows after the last one returned.
    pub(crate) fn next_page(
        &mut self,
        connection: &Connection,
        limit: usize,
    ) -> Result<Vec<OsmObject>, StoreError> {
        if self.exhausted {
            return Ok(Vec::new());
        }
        let Some((sql, mut values)) = self.statement() else {
            self.exhausted = true;
            return Ok(Vec::new());
        };
        values.push(Value::Integer(self.after));
        values.push(Value::Integer(as_limit(limit)));

        let objects = fetch(connection, &sql, &values, self.kind)?;
        if let Some(last) = objects.last() {
            self.after = last.id();
        }
        self.exhausted = objects.len() < limit;
        Ok(objects)
    }

    fn statement(&self) -> Option<(String, Vec<Value>)> {
        let live = self.source.live(self.kind);
        let (from, condition, values, distinct) = match &self.filter {
            LiveFilter::All => (format!("{live} AS t"), "1 = 1".to_owned(), Vec::new(), ""),
            LiveFilter::Ids(ids) => (
                format!("{live} AS t"),
                format!("t.id IN ({})", in_list(ids.len())),
                id_values(ids),
                "",
            ),
            LiveFilter::Bbox(bbox) => {
                if self.kind != ObjectKind::Node {
                    return None;
                }
                let (min, max) = (bbox.min(), bbox.max());
                let bounds = [min.x, max.x, min.y, max.y];
                (
                    format!(
                        "{live} AS t JOIN {geometry} AS g ON g.id = t.id",
                        geometry = self.source.node_geometry()
                    ),
                    "g.max_lon >= ? AND g.min_lon <= ? AND g.max_lat >= ? AND g.min_lat <= ? \
                     AND t.lon BETWEEN ? AND ? AND t.lat BETWEEN ? AND ?"
                        .to_owned(),
                    bounds
                        .iter()
                        .chain(bounds.iter())
                        .map(|value| Value::Real(*value))
                        .collect(),
                    "",
                )
            }
            LiveFilter::Members { member_kind, ids } => {
                let members = self.source.membership(self.kind, *member_kind)?;
                (
                    format!("{members} AS m JOIN {live} AS t ON t.id = m.id AND t.version = m.version"),
                    format!("m.member IN ({})", in_list(ids.len())),
                    id_values(ids),
                    "DISTINCT ",
                )
            }
        };
        let (anti_join, anti_condition) = match &self.exclude {
            Some(exclude) => (
                format!(
                    " LEFT JOIN {} AS x ON x.id = t.id",
                    exclude.existence(self.kind)
                ),
                " AND x.id IS NULL",
            ),
            None => (String::new(), ""),
        };
        let sql = format!(
            "SELECT {distinct}{columns} FROM {from}{anti_join} \
             WHERE {condition}{anti_condition} AND t.id > ? ORDER BY t.id LIMIT ?",
            columns = select_list(self.kind, TableKind::Live, "t"),
        );
        Some((sql, values))
    }
}

/// Cursor over `(start, end]` of a live or history table, ordered by
/// timestamp.
#[derive(Debug, Clone)]
pub(crate) struct DiffCursor {
    kind: ObjectKind,
    source: TablePrefix,
    table: TableKind,
    start: i64,
    end: i64,
    after: (i64, i64, i64),
    exhausted: bool,
}

impl DiffCursor {
    pub(crate) fn new(
        kind: ObjectKind,
        source: &TablePrefix,
        table: TableKind,
        start: i64,
        end: i64,
    ) -> Self {
        Self {
            kind,
            source: source.clone(),
            table,
            start,
            end,
            after: (start, i64::MIN, i64::MIN),
            exhausted: start >= end,
        }
    }

    pub(crate) const fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Fetches up to `limit` rows after the last `(timestamp, id, version)`
    /// returned.
    pub(crate) fn next_page(
        &mut self,
        connection: &Connection,
        limit: usize,
    ) -> Result<Vec<OsmObject>, StoreError> {
        if self.exhausted {
            return Ok(Vec::new());
        }
        let table = match self.table {
            TableKind::Live => self.source.live(self.kind),
            TableKind::History => self.source.history(self.kind),
        };
        let sql = format!(
            "SELECT {columns} FROM {table} AS t \
             WHERE t.timestamp > ? AND t.timestamp <= ? AND (t.timestamp, t.id, t.version) > (?, ?, ?) \
             ORDER BY t.timestamp, t.id, t.version LIMIT ?",
            columns = select_list(self.kind, self.table, "t"),
        );
        let (timestamp, id, version) = self.after;
        let values = [
            Value::Integer(self.start),
            Value::Integer(self.end),
            Value::Integer(timestamp),
            Value::Integer(id),
            Value::Integer(version),
            Value::Integer(as_limit(limit)),
        ];
        let objects = fetch(connection, &sql, &values, self.kind)?;
        if let Some(last) = objects.last() {
            let meta = last.meta();
            self.after = (meta.timestamp, last.id(), meta.version);
        }
        self.exhausted = objects.len() < limit;
        Ok(objects)
    }
}

fn fetch(
    connection: &Connection,
    sql: &str,
    values: &[Value],
    kind: ObjectKind,
) -> Result<Vec<OsmObject>, StoreError> {
    let mut statement = connection
        .prepare_cached(sql)
        .map_err(sqlite("prepare cursor page"))?;
    let mut rows = statement
        .query(params_from_iter(values))
        .map_err(sqlite("open cursor page"))?;
    let mut objects = Vec::new();
    while let Some(row) = rows.next().map_err(sqlite("advance cursor"))? {
        objects.push(decode_row(kind, row)?);
    }
    Ok(objects)
}

fn in_list(len: usize) -> String {
    vec!["?"; len].join(", ")
}

fn id_values(ids: &[i64]) -> Vec<Value> {
    ids.iter().copied().map(Value::Integer).collect()
}

fn as_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}
