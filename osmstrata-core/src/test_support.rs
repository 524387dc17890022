//! Object builders shared by unit and behaviour tests.

use crate::object::{Member, MetaData, Node, ObjectKind, Relation, Tags, Way};

/// Builds a tag map from literal pairs.
pub fn tags(pairs: &[(&str, &str)]) -> Tags {
    pairs
        .iter()
        .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
        .collect()
}

/// Visible metadata at `version` and `timestamp`.
pub fn meta(version: i64, timestamp: i64) -> MetaData {
    MetaData::new(version, timestamp, 1)
}

/// A visible node.
pub fn node(id: i64, version: i64, lat: f64, lon: f64) -> Node {
    Node {
        id,
        meta: meta(version, 0),
        tags: Tags::new(),
        lat,
        lon,
    }
}

/// A visible way over `refs`.
pub fn way(id: i64, version: i64, refs: &[i64]) -> Way {
    Way {
        id,
        meta: meta(version, 0),
        tags: Tags::new(),
        refs: refs.to_vec(),
    }
}

/// A visible relation with role-less members.
pub fn relation(id: i64, version: i64, members: &[(ObjectKind, i64)]) -> Relation {
    Relation {
        id,
        meta: meta(version, 0),
        tags: Tags::new(),
        members: members
            .iter()
            .map(|(kind, member)| Member::new(*kind, *member, ""))
            .collect(),
    }
}

/// Returns `node` marked as a deletion.
pub fn deleted(mut node: Node) -> Node {
    node.meta.visible = false;
    node
}
