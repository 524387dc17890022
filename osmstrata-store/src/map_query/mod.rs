//! Resumable bounding-box map extract.
//!
//! The extract runs as a sequence of phases. Each phase is a queue of
//! cursors built from the ids earlier phases emitted, so later phases only
//! start once earlier ones are drained:
//!
//! 1. nodes inside the box;
//! 2. ways referencing those nodes;
//! 3. member nodes of those ways that lay outside the box;
//! 4. relations referencing any emitted node, then way, then relation.
//!
//! Relation closure stops after one level. Every phase reads the static
//! layer through the active layer's anti-join, then the active layer.


use std::collections::{BTreeSet, VecDeque};

use geo::{Coord, Rect};
use rusqlite::Connection;
use thiserror::Error;

use osmstrata_core::{IdSets, ObjectKind, ObjectSink, OsmObject, RetainIds, RetainMemberIds};

use crate::error::StoreError;
use crate::layer::Layers;
use crate::observe::{StoreEvent, StoreObserver};
use crate::query::cursor::{LiveCursor, LiveFilter};
use crate::query::merged_cursors;

/// Phases of a [`MapQuery`], in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapQueryPhase {
    /// Not started, or reset.
    Idle,
    /// Streaming nodes inside the box.
    NodesInBbox,
    /// Streaming ways that reference emitted nodes.
    WaysContainingNodes,
    /// Streaming way members that lay outside the box.
    ExtraNodesForWays,
    /// Streaming relations with emitted node members.
    RelationsForNodes,
    /// Streaming relations with emitted way members.
    RelationsForWays,
    /// Streaming parents of emitted relations.
    RelationsForRelations,
    /// Finished.
    Done,
}

/// Errors raised by a [`MapQuery`].
#[derive(Debug, Error)]
pub enum MapQueryError {
    /// The bounding box does not have four values.
    #[error("bounding box needs 4 values (min_lon, min_lat, max_lon, max_lat) but got {len}")]
    InvalidBbox {
        /// Number of values supplied.
        len: usize,
    },
    /// A bounding box value is NaN or infinite.
    #[error("bounding box values must be finite")]
    NonFiniteBbox,
    /// `start` was called on a running query.
    #[error("map query already started and is in phase {phase:?}; reset it first")]
    AlreadyStarted {
        /// Phase the query is in.
        phase: MapQueryPhase,
    },
    /// `continue_query` was called before `start`.
    #[error("map query has not been started")]
    NotStarted,
    /// A page could not be read.
    #[error(transparent)]
    Store(#[from] StoreError),
}

type Recorder<S> = RetainMemberIds<RetainIds<S>>;

/// Pull-based map extract over a transaction.
///
/// Obtain one from [`MapTransaction::map_query`](crate::MapTransaction::map_query),
/// call [`start`](Self::start) and then [`continue_query`](Self::continue_query)
/// until [`is_done`](Self::is_done), or call [`run`](Self::run).
pub struct MapQuery<'c, S> {
    connection: &'c Connection,
    layers: &'c Layers,
    batch_size: usize,
    observer: &'c dyn StoreObserver,
    phase: MapQueryPhase,
    cursors: VecDeque<LiveCursor>,
    sink: Option<Recorder<S>>,
}

impl<'c, S: ObjectSink> MapQuery<'c, S> {
    pub(crate) fn new(
        connection: &'c Connection,
        layers: &'c Layers,
        batch_size: usize,
        observer: &'c dyn StoreObserver,
    ) -> Self {
        Self {
            connection,
            layers,
            batch_size,
            observer,
            phase: MapQueryPhase::Idle,
            cursors: VecDeque::new(),
            sink: None,
        }
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> MapQueryPhase {
        self.phase
    }

    /// `true` once every phase is drained.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.phase == MapQueryPhase::Done
    }

    /// Ids emitted so far, or `None` when idle.
    #[must_use]
    pub fn emitted(&self) -> Option<&IdSets> {
        self.sink.as_ref().map(|sink| sink.inner().ids())
    }

    /// Validates `bbox` (`min_lon, min_lat, max_lon, max_lat`), announces it
    /// to `sink` and opens the node cursor.
    ///
    /// # Errors
    ///
    /// Returns [`MapQueryError::AlreadyStarted`] unless idle, and
    /// [`MapQueryError::InvalidBbox`] or [`MapQueryError::NonFiniteBbox`]
    /// for a malformed box.
    pub fn start(&mut self, bbox: &[f64], sink: S) -> Result<(), MapQueryError> {
        if self.phase != MapQueryPhase::Idle {
            return Err(MapQueryError::AlreadyStarted { phase: self.phase });
        }
        let rect = parse_bbox(bbox)?;
        let mut sink = RetainMemberIds::new(RetainIds::new(sink));
        sink.store_is_diff(false);
        sink.store_bounds(&rect);
        self.sink = Some(sink);
        self.cursors = self
            .layers
            .merged()
            .map(|(source, exclude)| {
                LiveCursor::new(ObjectKind::Node, source, exclude, LiveFilter::Bbox(rect))
            })
            .into();
        self.enter(MapQueryPhase::NodesInBbox);
        Ok(())
    }

    /// Pulls pages until at least one object is emitted or the current
    /// phase completes. Returns the number emitted; 0 means a phase
    /// boundary was crossed.
    ///
    /// # Errors
    ///
    /// Returns [`MapQueryError::NotStarted`] when idle, or
    /// [`MapQueryError::Store`] if a page cannot be read.
    pub fn continue_query(&mut self) -> Result<usize, MapQueryError> {
        match self.phase {
            MapQueryPhase::Idle => return Err(MapQueryError::NotStarted),
            MapQueryPhase::Done => return Ok(0),
            _ => {}
        }
        loop {
            let Some(cursor) = self.cursors.front_mut() else {
                self.advance();
                return Ok(0);
            };
            let page = cursor.next_page(self.connection, self.batch_size)?;
            if cursor.is_exhausted() {
                self.cursors.pop_front();
            }
            let emitted = self.emit(page);
            if emitted > 0 {
                return Ok(emitted);
            }
        }
    }

    /// Drives the query to completion and returns the number of objects
    /// emitted by this call.
    ///
    /// # Errors
    ///
    /// As for [`continue_query`](Self::continue_query).
    pub fn run(&mut self) -> Result<usize, MapQueryError> {
        let mut total = 0;
        while !self.is_done() {
            total += self.continue_query()?;
        }
        Ok(total)
    }

    /// Drops open cursors and recorded ids, returns to
    /// [`MapQueryPhase::Idle`] and hands back the sink.
    pub fn reset(&mut self) -> Option<S> {
        self.cursors.clear();
        self.enter(MapQueryPhase::Idle);
        self.sink
            .take()
            .map(|sink| sink.into_inner().into_inner())
    }

    /// Consumes the query and returns the sink, if started.
    pub fn into_sink(self) -> Option<S> {
        self.sink.map(|sink| sink.into_inner().into_inner())
    }

    fn emit(&mut self, page: Vec<OsmObject>) -> usize {
        let Some(sink) = self.sink.as_mut() else {
            return 0;
        };
        let mut emitted = 0;
        for object in page {
            if sink.inner().ids().contains(object.kind(), object.id()) {
                continue;
            }
            sink.store_object(&object);
            emitted += 1;
        }
        emitted
    }

    fn advance(&mut self) {
        let Some(sink) = self.sink.as_ref() else {
            return;
        };
        let emitted = sink.inner().ids();
        let layers = self.layers;
        let owners_of = |owner: ObjectKind, member_kind: ObjectKind, ids: &BTreeSet<i64>| {
            merged_cursors(layers, owner, ids, |ids| LiveFilter::Members { member_kind, ids })
        };
        let (next, cursors) = match self.phase {
            MapQueryPhase::Idle => return,
            MapQueryPhase::NodesInBbox => (
                MapQueryPhase::WaysContainingNodes,
                owners_of(ObjectKind::Way, ObjectKind::Node, &emitted.nodes),
            ),
            MapQueryPhase::WaysContainingNodes => {
                let extra: BTreeSet<i64> = sink
                    .member_ids()
                    .nodes
                    .difference(&emitted.nodes)
                    .copied()
                    .collect();
                (
                    MapQueryPhase::ExtraNodesForWays,
                    merged_cursors(layers, ObjectKind::Node, &extra, LiveFilter::Ids),
                )
            }
            MapQueryPhase::ExtraNodesForWays => (
                MapQueryPhase::RelationsForNodes,
                owners_of(ObjectKind::Relation, ObjectKind::Node, &emitted.nodes),
            ),
            MapQueryPhase::RelationsForNodes => (
                MapQueryPhase::RelationsForWays,
                owners_of(ObjectKind::Relation, ObjectKind::Way, &emitted.ways),
            ),
            MapQueryPhase::RelationsForWays => (
                MapQueryPhase::RelationsForRelations,
                owners_of(ObjectKind::Relation, ObjectKind::Relation, &emitted.relations),
            ),
            MapQueryPhase::RelationsForRelations | MapQueryPhase::Done => {
                (MapQueryPhase::Done, Vec::new())
            }
        };
        self.cursors = cursors.into();
        self.enter(next);
    }

    fn enter(&mut self, phase: MapQueryPhase) {
        self.phase = phase;
        self.observer
            .on_event(&StoreEvent::MapQueryPhase { phase });
    }
}

fn parse_bbox(bbox: &[f64]) -> Result<Rect<f64>, MapQueryError> {
    let &[min_lon, min_lat, max_lon, max_lat] = bbox else {
        return Err(MapQueryError::InvalidBbox { len: bbox.len() });
    };
    if !bbox.iter().all(|value| value.is_finite()) {
        return Err(MapQueryError::NonFiniteBbox);
    }
    Ok(Rect::new(
        Coord {
            x: min_lon,
            y: min_lat,
        },
        Coord {
            x: max_lon,
            y: max_lat,
        },
    ))
}
