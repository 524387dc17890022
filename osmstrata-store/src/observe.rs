//! Observability hook passed down into every store operation.

use log::{debug, warn};
use osmstrata_core::{ChangeAction, ObjectKind};

use crate::error::StoreError;
use crate::map_query::MapQueryPhase;

/// Where the write path placed an incoming version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// The version became the live row.
    Live,
    /// The version was recorded in history only.
    History,
}

/// Events emitted by the store.
#[derive(Debug)]
pub enum StoreEvent<'a> {
    /// An object version was written.
    ObjectPlaced {
        /// Layer prefix written to.
        layer: &'a str,
        /// Object kind.
        kind: ObjectKind,
        /// Resolved id.
        id: i64,
        /// Version written.
        version: i64,
        /// Live or history placement.
        placement: Placement,
        /// Whether a previous live row was removed by this version.
        removed_live: bool,
    },
    /// A placeholder received a real id.
    IdAssigned {
        /// Object kind.
        kind: ObjectKind,
        /// Placeholder supplied by the caller.
        placeholder: i64,
        /// Id assigned.
        id: i64,
    },
    /// An allocator counter was persisted.
    NextIdsCommitted {
        /// Layer prefix.
        layer: &'a str,
        /// Object kind.
        kind: ObjectKind,
        /// Next id that will be handed out.
        next: i64,
    },
    /// A map extract moved to a new phase.
    MapQueryPhase {
        /// Phase entered.
        phase: MapQueryPhase,
    },
    /// A diff block failed and was skipped.
    DiffBlockSkipped {
        /// Block index in file order.
        index: usize,
        /// Action of the block.
        action: ChangeAction,
        /// Why the block failed.
        error: &'a StoreError,
    },
    /// Every table of the active layer was emptied.
    ActiveLayerReset {
        /// Layer prefix.
        layer: &'a str,
    },
}

/// Receives [`StoreEvent`]s.
pub trait StoreObserver: Send + Sync {
    /// Handles one event.
    fn on_event(&self, event: &StoreEvent<'_>);
}

/// Forwards events to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl StoreObserver for LogObserver {
    fn on_event(&self, event: &StoreEvent<'_>) {
        match event {
            StoreEvent::ObjectPlaced {
                layer,
                kind,
                id,
                version,
                placement,
                removed_live,
            } => debug!(
                "stored object layer={layer} kind={kind} id={id} version={version} placement={placement:?} removed_live={removed_live}"
            ),
            StoreEvent::IdAssigned {
                kind,
                placeholder,
                id,
            } => debug!("assigned id kind={kind} placeholder={placeholder} id={id}"),
            StoreEvent::NextIdsCommitted { layer, kind, next } => {
                debug!("committed next id layer={layer} kind={kind} next={next}");
            }
            StoreEvent::MapQueryPhase { phase } => debug!("map query phase={phase:?}"),
            StoreEvent::DiffBlockSkipped {
                index,
                action,
                error,
            } => warn!("skipped diff block index={index} action={action}: {error}"),
            StoreEvent::ActiveLayerReset { layer } => debug!("reset active layer={layer}"),
        }
    }
}
