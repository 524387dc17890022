//! Decoded object batches and the change blocks a diff decoder produces.

use std::fmt;
use std::str::FromStr;

use geo::Rect;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::object::{Node, ObjectKind, OsmObject, Relation, Way};

/// A batch of decoded objects grouped by kind.
///
/// `OsmData` doubles as a collecting [`ObjectSink`](crate::ObjectSink): every
/// object pushed into it is cloned into the matching vector, which makes it
/// the natural target for tests and for buffering a query result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OsmData {
    /// Nodes in input order.
    pub nodes: Vec<Node>,
    /// Ways in input order.
    pub ways: Vec<Way>,
    /// Relations in input order.
    pub relations: Vec<Relation>,
    /// Bounding boxes announced by the producer.
    pub bounds: Vec<Rect<f64>>,
    /// Whether the producer declared the stream a diff.
    pub is_diff: bool,
}

impl OsmData {
    /// Total number of objects across all kinds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len() + self.ways.len() + self.relations.len()
    }

    /// `true` when the batch holds no objects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Overwrites the visibility flag of every object.
    pub fn set_visible(&mut self, visible: bool) {
        for node in &mut self.nodes {
            node.meta.visible = visible;
        }
        for way in &mut self.ways {
            way.meta.visible = visible;
        }
        for relation in &mut self.relations {
            relation.meta.visible = visible;
        }
    }

    /// Ids of the collected objects of one kind, in arrival order.
    #[must_use]
    pub fn ids(&self, kind: ObjectKind) -> Vec<i64> {
        match kind {
            ObjectKind::Node => self.nodes.iter().map(|n| n.id).collect(),
            ObjectKind::Way => self.ways.iter().map(|w| w.id).collect(),
            ObjectKind::Relation => self.relations.iter().map(|r| r.id).collect(),
        }
    }

    /// Appends one object to the matching vector.
    pub fn push(&mut self, object: OsmObject) {
        match object {
            OsmObject::Node(node) => self.nodes.push(node),
            OsmObject::Way(way) => self.ways.push(way),
            OsmObject::Relation(relation) => self.relations.push(relation),
        }
    }
}

impl FromIterator<OsmObject> for OsmData {
    fn from_iter<I: IntoIterator<Item = OsmObject>>(iter: I) -> Self {
        let mut data = Self::default();
        for object in iter {
            data.push(object);
        }
        data
    }
}

/// Action tag attached to each block of an `osmChange` document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    /// Objects created by the change.
    Create,
    /// New versions of existing objects.
    Modify,
    /// Deletion markers.
    Delete,
}

impl ChangeAction {
    /// Lower-case action name as it appears in change files.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Modify => "modify",
            Self::Delete => "delete",
        }
    }

    /// Visibility applied to every object of a block with this action.
    #[must_use]
    pub const fn visible(self) -> bool {
        !matches!(self, Self::Delete)
    }
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raised when parsing an unknown change action.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown change action '{0}'")]
pub struct UnknownChangeAction(pub String);

impl FromStr for ChangeAction {
    type Err = UnknownChangeAction;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "create" => Ok(Self::Create),
            "modify" => Ok(Self::Modify),
            "delete" => Ok(Self::Delete),
            other => Err(UnknownChangeAction(other.to_owned())),
        }
    }
}

/// One decoded block of a change document.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeBlock {
    /// Action shared by every object in the block.
    pub action: ChangeAction,
    /// Objects of the block.
    pub data: OsmData,
}

/// A decoded change document: blocks in file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OsmChange {
    /// Blocks in file order.
    pub blocks: Vec<ChangeBlock>,
}

impl OsmChange {
    /// Appends a block.
    #[must_use]
    pub fn with_block(mut self, action: ChangeAction, data: OsmData) -> Self {
        self.blocks.push(ChangeBlock { action, data });
        self
    }
}
