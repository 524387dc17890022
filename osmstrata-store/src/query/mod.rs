//! Layered read paths.
//!
//! The merged view of a [`Layers`] pair is the active layer plus every
//! static object whose id the active layer's existence index does not
//! know. Static rows are streamed first through an anti-join, then the
//! active rows, so each object is emitted once.

pub(crate) mod cursor;
pub(crate) mod decode;
#[cfg(test)]
mod tests;

use std::collections::BTreeSet;

use rusqlite::Connection;

use osmstrata_core::{IdSets, ObjectKind, ObjectSink};

use crate::error::StoreError;
use crate::layer::{LayerRole, Layers};
use cursor::{LiveCursor, LiveFilter, SQLITE_MAX_VARIABLE_NUMBER};

/// Connection, layer pair and page size for one read.
#[derive(Clone, Copy)]
pub(crate) struct QueryContext<'a> {
    pub(crate) connection: &'a Connection,
    pub(crate) layers: &'a Layers,
    pub(crate) batch_size: usize,
}

/// Builds one cursor per id chunk and layer, static layer first within each
/// chunk.
pub(crate) fn merged_cursors(
    layers: &Layers,
    kind: ObjectKind,
    ids: &BTreeSet<i64>,
    filter: impl Fn(Vec<i64>) -> LiveFilter,
) -> Vec<LiveCursor> {
    let ids: Vec<i64> = ids.iter().copied().collect();
    ids.chunks(SQLITE_MAX_VARIABLE_NUMBER)
        .flat_map(|chunk| {
            let chunk_filter = filter(chunk.to_vec());
            layers.merged().map(|(source, exclude)| {
                LiveCursor::new(kind, source, exclude, chunk_filter.clone())
            })
        })
        .collect()
}

/// Drains `cursor` into `sink`, skipping ids in `skip` and recording
/// emitted ids in `emitted`. Returns the number emitted.
pub(crate) fn drain<S: ObjectSink + ?Sized>(
    ctx: &QueryContext<'_>,
    cursor: &mut LiveCursor,
    skip: Option<&BTreeSet<i64>>,
    emitted: &mut BTreeSet<i64>,
    sink: &mut S,
) -> Result<usize, StoreError> {
    let mut count = 0;
    while !cursor.is_exhausted() {
        for object in cursor.next_page(ctx.connection, ctx.batch_size)? {
            let id = object.id();
            if skip.is_some_and(|skip| skip.contains(&id)) || !emitted.insert(id) {
                continue;
            }
            sink.store_object(&object);
            count += 1;
        }
    }
    Ok(count)
}

fn drain_all<S: ObjectSink + ?Sized>(
    ctx: &QueryContext<'_>,
    cursors: Vec<LiveCursor>,
    skip: Option<&BTreeSet<i64>>,
    sink: &mut S,
) -> Result<usize, StoreError> {
    let mut emitted = IdSets::default();
    let mut count = 0;
    for mut cursor in cursors {
        let seen = emitted.get_mut(cursor.kind());
        count += drain(ctx, &mut cursor, skip, seen, sink)?;
    }
    Ok(count)
}

/// Streams the merged live state of `ids`.
pub(crate) fn get_objects_by_id<S: ObjectSink + ?Sized>(
    ctx: &QueryContext<'_>,
    kind: ObjectKind,
    ids: &BTreeSet<i64>,
    sink: &mut S,
) -> Result<usize, StoreError> {
    let cursors = merged_cursors(ctx.layers, kind, ids, LiveFilter::Ids);
    drain_all(ctx, cursors, None, sink)
}

/// Streams every live way whose current version references a node in
/// `node_ids`.
pub(crate) fn ways_for_nodes<S: ObjectSink + ?Sized>(
    ctx: &QueryContext<'_>,
    node_ids: &BTreeSet<i64>,
    sink: &mut S,
) -> Result<usize, StoreError> {
    let cursors = merged_cursors(ctx.layers, ObjectKind::Way, node_ids, |ids| {
        LiveFilter::Members {
            member_kind: ObjectKind::Node,
            ids,
        }
    });
    drain_all(ctx, cursors, None, sink)
}

/// Streams every live relation whose current version has a member of
/// `member_kind` in `ids`, except relations listed in `skip`.
pub(crate) fn relations_for_objects<S: ObjectSink + ?Sized>(
    ctx: &QueryContext<'_>,
    member_kind: ObjectKind,
    ids: &BTreeSet<i64>,
    skip: &BTreeSet<i64>,
    sink: &mut S,
) -> Result<usize, StoreError> {
    let cursors = merged_cursors(ctx.layers, ObjectKind::Relation, ids, |ids| {
        LiveFilter::Members { member_kind, ids }
    });
    drain_all(ctx, cursors, Some(skip), sink)
}

/// Streams every live object of one layer: nodes, ways, then relations.
pub(crate) fn dump<S: ObjectSink + ?Sized>(
    ctx: &QueryContext<'_>,
    role: LayerRole,
    sink: &mut S,
) -> Result<usize, StoreError> {
    let prefix = ctx.layers.prefix(role);
    let cursors = ObjectKind::ALL
        .into_iter()
        .map(|kind| LiveCursor::new(kind, prefix, None, LiveFilter::All))
        .collect();
    drain_all(ctx, cursors, None, sink)
}
