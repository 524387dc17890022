//! OpenStreetMap object model: nodes, ways and relations with their
//! version metadata.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tag mapping attached to every object. Keys are unique; order carries no
/// meaning, but a sorted map keeps the serialised column stable.
pub type Tags = BTreeMap<String, String>;

/// Returns `true` when `id` is a placeholder awaiting a real identifier.
///
/// # Examples
///
/// ```
/// use osmstrata_core::is_placeholder;
///
/// assert!(is_placeholder(-3));
/// assert!(is_placeholder(0));
/// assert!(!is_placeholder(42));
/// ```
#[must_use]
pub const fn is_placeholder(id: i64) -> bool {
    id <= 0
}

/// The three entity kinds of the data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    /// A point with coordinates.
    Node,
    /// An ordered list of node references.
    Way,
    /// An ordered list of typed members with roles.
    Relation,
}

impl ObjectKind {
    /// Every kind, in the order batches are written and streamed.
    pub const ALL: [Self; 3] = [Self::Node, Self::Way, Self::Relation];

    /// The canonical lower-case name used in serialised member lists and
    /// the `nextids` table.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Node => "node",
            Self::Way => "way",
            Self::Relation => "relation",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectKind {
    type Err = ObjectError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "node" => Ok(Self::Node),
            "way" => Ok(Self::Way),
            "relation" => Ok(Self::Relation),
            other => Err(ObjectError::UnknownMemberKind {
                value: other.to_owned(),
            }),
        }
    }
}

/// Errors raised while assembling domain objects.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ObjectError {
    /// A relation's member arrays disagree in length.
    #[error(
        "relation {relation_id} has {types} member types, {ids} member ids and {roles} roles"
    )]
    MemberListMismatch {
        /// Relation being assembled.
        relation_id: i64,
        /// Length of the type array.
        types: usize,
        /// Length of the id array.
        ids: usize,
        /// Length of the role array.
        roles: usize,
    },
    /// A member type string is not `node`, `way` or `relation`.
    #[error("unknown member type '{value}'")]
    UnknownMemberKind {
        /// The rejected type string.
        value: String,
    },
}

/// Version metadata carried by every object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaData {
    /// Positive, increasing per object id.
    pub version: i64,
    /// Seconds since the Unix epoch.
    pub timestamp: i64,
    /// Changeset that produced this version.
    pub changeset: i64,
    /// Author id, `0` when unknown.
    pub uid: i64,
    /// Author name, empty when unknown.
    pub username: String,
    /// `false` marks this version as a deletion.
    pub visible: bool,
}

impl MetaData {
    /// Metadata for a visible version with no author information.
    #[must_use]
    pub const fn new(version: i64, timestamp: i64, changeset: i64) -> Self {
        Self {
            version,
            timestamp,
            changeset,
            uid: 0,
            username: String::new(),
            visible: true,
        }
    }
}

impl Default for MetaData {
    fn default() -> Self {
        Self::new(1, 0, 0)
    }
}

/// A located point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Object id; non-positive values are placeholders.
    pub id: i64,
    /// Version metadata.
    pub meta: MetaData,
    /// Free-form tags.
    pub tags: Tags,
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lon: f64,
}

/// An ordered chain of nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Way {
    /// Object id; non-positive values are placeholders.
    pub id: i64,
    /// Version metadata.
    pub meta: MetaData,
    /// Free-form tags.
    pub tags: Tags,
    /// Node ids in order, possibly placeholders.
    pub refs: Vec<i64>,
}

/// One entry in a relation's member list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    /// Kind of the referenced object.
    pub kind: ObjectKind,
    /// Referenced id, possibly a placeholder.
    pub id: i64,
    /// Role of the member within the relation.
    pub role: String,
}

impl Member {
    /// Convenience constructor.
    pub fn new(kind: ObjectKind, id: i64, role: impl Into<String>) -> Self {
        Self {
            kind,
            id,
            role: role.into(),
        }
    }
}

/// A typed, ordered grouping of other objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    /// Object id; non-positive values are placeholders.
    pub id: i64,
    /// Version metadata.
    pub meta: MetaData,
    /// Free-form tags.
    pub tags: Tags,
    /// Members in order.
    pub members: Vec<Member>,
}

impl Relation {
    /// Builds a relation from the parallel type, id and role arrays used on
    /// the wire.
    ///
    /// # Errors
    ///
    /// Returns [`ObjectError::MemberListMismatch`] when the arrays differ in
    /// length and [`ObjectError::UnknownMemberKind`] for an unrecognised
    /// type string.
    ///
    /// # Examples
    ///
    /// ```
    /// use osmstrata_core::{MetaData, ObjectKind, Relation, Tags};
    ///
    /// # fn main() -> Result<(), osmstrata_core::ObjectError> {
    /// let relation = Relation::from_parallel(
    ///     9,
    ///     MetaData::default(),
    ///     Tags::new(),
    ///     &["way", "node"],
    ///     &[4, 5],
    ///     &["outer", "label"],
    /// )?;
    /// assert_eq!(relation.members[1].kind, ObjectKind::Node);
    /// assert_eq!(relation.ref_roles(), vec!["outer", "label"]);
    /// # Ok(())
    /// # }
    /// ```
    pub fn from_parallel<T, R>(
        id: i64,
        meta: MetaData,
        tags: Tags,
        types: &[T],
        ids: &[i64],
        roles: &[R],
    ) -> Result<Self, ObjectError>
    where
        T: AsRef<str>,
        R: AsRef<str>,
    {
        if types.len() != ids.len() || ids.len() != roles.len() {
            return Err(ObjectError::MemberListMismatch {
                relation_id: id,
                types: types.len(),
                ids: ids.len(),
                roles: roles.len(),
            });
        }
        let members = types
            .iter()
            .zip(ids)
            .zip(roles)
            .map(|((kind, member_id), role)| {
                Ok(Member::new(kind.as_ref().parse()?, *member_id, role.as_ref()))
            })
            .collect::<Result<Vec<_>, ObjectError>>()?;
        Ok(Self {
            id,
            meta,
            tags,
            members,
        })
    }

    /// Member type strings in order.
    #[must_use]
    pub fn ref_type_strs(&self) -> Vec<&'static str> {
        self.members.iter().map(|m| m.kind.as_str()).collect()
    }

    /// Member ids in order.
    #[must_use]
    pub fn ref_ids(&self) -> Vec<i64> {
        self.members.iter().map(|m| m.id).collect()
    }

    /// Member roles in order.
    #[must_use]
    pub fn ref_roles(&self) -> Vec<&str> {
        self.members.iter().map(|m| m.role.as_str()).collect()
    }
}

/// Closed sum over the three object variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OsmObject {
    /// A node.
    Node(Node),
    /// A way.
    Way(Way),
    /// A relation.
    Relation(Relation),
}

impl OsmObject {
    /// Kind tag of the variant.
    #[must_use]
    pub const fn kind(&self) -> ObjectKind {
        match self {
            Self::Node(_) => ObjectKind::Node,
            Self::Way(_) => ObjectKind::Way,
            Self::Relation(_) => ObjectKind::Relation,
        }
    }

    /// Object id.
    #[must_use]
    pub const fn id(&self) -> i64 {
        match self {
            Self::Node(node) => node.id,
            Self::Way(way) => way.id,
            Self::Relation(relation) => relation.id,
        }
    }

    /// Version metadata.
    #[must_use]
    pub const fn meta(&self) -> &MetaData {
        match self {
            Self::Node(node) => &node.meta,
            Self::Way(way) => &way.meta,
            Self::Relation(relation) => &relation.meta,
        }
    }

    /// Tags of the object.
    #[must_use]
    pub const fn tags(&self) -> &Tags {
        match self {
            Self::Node(node) => &node.tags,
            Self::Way(way) => &way.tags,
            Self::Relation(relation) => &relation.tags,
        }
    }
}

impl From<Node> for OsmObject {
    fn from(node: Node) -> Self {
        Self::Node(node)
    }
}

impl From<Way> for OsmObject {
    fn from(way: Way) -> Self {
        Self::Way(way)
    }
}

impl From<Relation> for OsmObject {
    fn from(relation: Relation) -> Self {
        Self::Relation(relation)
    }
}
