//! Push-style consumer interface used by every read path, plus decorators
//! that record what flows through them.

use std::collections::BTreeSet;

use geo::Rect;

use crate::data::OsmData;
use crate::object::{Node, ObjectKind, OsmObject, Relation, Way};

/// Receives decoded objects in document order.
///
/// Implementations may filter, record, buffer or serialise. Producers never
/// depend on a concrete sink.
pub trait ObjectSink {
    /// Announces whether the following stream is a diff.
    fn store_is_diff(&mut self, is_diff: bool) {
        let _ = is_diff;
    }

    /// Announces the bounding box of an extract.
    fn store_bounds(&mut self, bounds: &Rect<f64>) {
        let _ = bounds;
    }

    /// Receives a node.
    fn store_node(&mut self, node: &Node);

    /// Receives a way.
    fn store_way(&mut self, way: &Way);

    /// Receives a relation.
    fn store_relation(&mut self, relation: &Relation);

    /// Dispatches on the object's kind.
    fn store_object(&mut self, object: &OsmObject) {
        match object {
            OsmObject::Node(node) => self.store_node(node),
            OsmObject::Way(way) => self.store_way(way),
            OsmObject::Relation(relation) => self.store_relation(relation),
        }
    }
}

impl<S: ObjectSink + ?Sized> ObjectSink for &mut S {
    fn store_is_diff(&mut self, is_diff: bool) {
        (**self).store_is_diff(is_diff);
    }

    fn store_bounds(&mut self, bounds: &Rect<f64>) {
        (**self).store_bounds(bounds);
    }

    fn store_node(&mut self, node: &Node) {
        (**self).store_node(node);
    }

    fn store_way(&mut self, way: &Way) {
        (**self).store_way(way);
    }

    fn store_relation(&mut self, relation: &Relation) {
        (**self).store_relation(relation);
    }
}

impl ObjectSink for OsmData {
    fn store_is_diff(&mut self, is_diff: bool) {
        self.is_diff = is_diff;
    }

    fn store_bounds(&mut self, bounds: &Rect<f64>) {
        self.bounds.push(*bounds);
    }

    fn store_node(&mut self, node: &Node) {
        self.nodes.push(node.clone());
    }

    fn store_way(&mut self, way: &Way) {
        self.ways.push(way.clone());
    }

    fn store_relation(&mut self, relation: &Relation) {
        self.relations.push(relation.clone());
    }
}

/// Id sets partitioned by object kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdSets {
    /// Node ids.
    pub nodes: BTreeSet<i64>,
    /// Way ids.
    pub ways: BTreeSet<i64>,
    /// Relation ids.
    pub relations: BTreeSet<i64>,
}

impl IdSets {
    /// The set for one kind.
    #[must_use]
    pub const fn get(&self, kind: ObjectKind) -> &BTreeSet<i64> {
        match kind {
            ObjectKind::Node => &self.nodes,
            ObjectKind::Way => &self.ways,
            ObjectKind::Relation => &self.relations,
        }
    }

    /// Mutable set for one kind.
    pub const fn get_mut(&mut self, kind: ObjectKind) -> &mut BTreeSet<i64> {
        match kind {
            ObjectKind::Node => &mut self.nodes,
            ObjectKind::Way => &mut self.ways,
            ObjectKind::Relation => &mut self.relations,
        }
    }

    /// Records one id.
    pub fn insert(&mut self, kind: ObjectKind, id: i64) -> bool {
        self.get_mut(kind).insert(id)
    }

    /// `true` when `id` of `kind` was recorded.
    #[must_use]
    pub fn contains(&self, kind: ObjectKind, id: i64) -> bool {
        self.get(kind).contains(&id)
    }
}

/// Forwards to an inner sink and records the id of every emitted object.
///
/// # Examples
///
/// ```
/// use osmstrata_core::{MetaData, Node, ObjectSink, OsmData, RetainIds, Tags};
///
/// let mut sink = RetainIds::new(OsmData::default());
/// sink.store_node(&Node { id: 7, meta: MetaData::default(), tags: Tags::new(), lat: 0.0, lon: 0.0 });
/// assert!(sink.ids().nodes.contains(&7));
/// assert_eq!(sink.into_inner().nodes.len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct RetainIds<S> {
    inner: S,
    ids: IdSets,
}

impl<S> RetainIds<S> {
    /// Wraps `inner`.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            ids: IdSets::default(),
        }
    }

    /// Ids emitted so far.
    #[must_use]
    pub const fn ids(&self) -> &IdSets {
        &self.ids
    }

    /// The wrapped sink.
    #[must_use]
    pub const fn inner(&self) -> &S {
        &self.inner
    }

    /// Unwraps the inner sink.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: ObjectSink> ObjectSink for RetainIds<S> {
    fn store_is_diff(&mut self, is_diff: bool) {
        self.inner.store_is_diff(is_diff);
    }

    fn store_bounds(&mut self, bounds: &Rect<f64>) {
        self.inner.store_bounds(bounds);
    }

    fn store_node(&mut self, node: &Node) {
        self.ids.nodes.insert(node.id);
        self.inner.store_node(node);
    }

    fn store_way(&mut self, way: &Way) {
        self.ids.ways.insert(way.id);
        self.inner.store_way(way);
    }

    fn store_relation(&mut self, relation: &Relation) {
        self.ids.relations.insert(relation.id);
        self.inner.store_relation(relation);
    }
}

/// Forwards to an inner sink and records the ids that emitted ways and
/// relations reference.
#[derive(Debug, Default)]
pub struct RetainMemberIds<S> {
    inner: S,
    members: IdSets,
}

impl<S> RetainMemberIds<S> {
    /// Wraps `inner`.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            members: IdSets::default(),
        }
    }

    /// Member ids referenced so far.
    #[must_use]
    pub const fn member_ids(&self) -> &IdSets {
        &self.members
    }

    /// The wrapped sink.
    #[must_use]
    pub const fn inner(&self) -> &S {
        &self.inner
    }

    /// Unwraps the inner sink.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: ObjectSink> ObjectSink for RetainMemberIds<S> {
    fn store_is_diff(&mut self, is_diff: bool) {
        self.inner.store_is_diff(is_diff);
    }

    fn store_bounds(&mut self, bounds: &Rect<f64>) {
        self.inner.store_bounds(bounds);
    }

    fn store_node(&mut self, node: &Node) {
        self.inner.store_node(node);
    }

    fn store_way(&mut self, way: &Way) {
        self.members.nodes.extend(way.refs.iter().copied());
        self.inner.store_way(way);
    }

    fn store_relation(&mut self, relation: &Relation) {
        for member in &relation.members {
            self.members.insert(member.kind, member.id);
        }
        self.inner.store_relation(relation);
    }
}
