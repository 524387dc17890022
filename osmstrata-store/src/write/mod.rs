//! Versioned write path.
//!
//! Every incoming version is placed either in the live table, where it
//! replaces the current state, or in the history table, where it is kept
//! forever. Superseded live rows are archived before they are overwritten
//! and deletion markers remove the live row while landing in history.
//! Placeholder ids are swapped for allocated ids before anything is
//! written, and references to them from later objects in the batch are
//! rewritten in dependency order.

mod membership;

use std::collections::BTreeMap;

use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Transaction, params_from_iter};

use osmstrata_core::{
    CodecError, MetaData, Node, ObjectKind, OsmData, Relation, Tags, Way, codec, is_placeholder,
};

use crate::error::{ConstraintViolation, StoreError, sqlite};
use crate::ids::{IdAllocator, first_free_id};
use crate::layer::TablePrefix;
use crate::observe::{Placement, StoreEvent, StoreObserver};

/// Real ids handed out for placeholders, per kind, keyed by placeholder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreatedIds {
    /// Node placeholders.
    pub nodes: BTreeMap<i64, i64>,
    /// Way placeholders.
    pub ways: BTreeMap<i64, i64>,
    /// Relation placeholders.
    pub relations: BTreeMap<i64, i64>,
}

impl CreatedIds {
    /// Assignments for one kind.
    #[must_use]
    pub const fn get(&self, kind: ObjectKind) -> &BTreeMap<i64, i64> {
        match kind {
            ObjectKind::Node => &self.nodes,
            ObjectKind::Way => &self.ways,
            ObjectKind::Relation => &self.relations,
        }
    }

    /// Total number of assignments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len() + self.ways.len() + self.relations.len()
    }

    /// `true` when no placeholder was assigned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Connection, target layer and observer for one write.
#[derive(Clone, Copy)]
pub(crate) struct WriteContext<'a> {
    pub(crate) connection: &'a Connection,
    pub(crate) prefix: &'a TablePrefix,
    /// Layer shadowed by `prefix`; its ids are never handed out again.
    pub(crate) baseline: Option<&'a TablePrefix>,
    pub(crate) observer: &'a dyn StoreObserver,
}

/// Storage shape of one object kind.
pub(crate) trait Versioned {
    const KIND: ObjectKind;

    fn object_id(&self) -> i64;

    fn meta(&self) -> &MetaData;

    fn tags(&self) -> &Tags;

    /// Values for [`payload_columns`] of this kind, in order.
    fn payload(&self) -> Result<Vec<Value>, CodecError>;

    /// `(member kind, member id)` in list order.
    fn member_refs(&self) -> Vec<(ObjectKind, i64)> {
        Vec::new()
    }
}

impl Versioned for Node {
    const KIND: ObjectKind = ObjectKind::Node;

    fn object_id(&self) -> i64 {
        self.id
    }

    fn meta(&self) -> &MetaData {
        &self.meta
    }

    fn tags(&self) -> &Tags {
        &self.tags
    }

    fn payload(&self) -> Result<Vec<Value>, CodecError> {
        Ok(vec![Value::Real(self.lat), Value::Real(self.lon)])
    }
}

impl Versioned for Way {
    const KIND: ObjectKind = ObjectKind::Way;

    fn object_id(&self) -> i64 {
        self.id
    }

    fn meta(&self) -> &MetaData {
        &self.meta
    }

    fn tags(&self) -> &Tags {
        &self.tags
    }

    fn payload(&self) -> Result<Vec<Value>, CodecError> {
        Ok(vec![Value::Text(codec::encode_way_members(&self.refs)?)])
    }

    fn member_refs(&self) -> Vec<(ObjectKind, i64)> {
        self.refs.iter().map(|id| (ObjectKind::Node, *id)).collect()
    }
}

impl Versioned for Relation {
    const KIND: ObjectKind = ObjectKind::Relation;

    fn object_id(&self) -> i64 {
        self.id
    }

    fn meta(&self) -> &MetaData {
        &self.meta
    }

    fn tags(&self) -> &Tags {
        &self.tags
    }

    fn payload(&self) -> Result<Vec<Value>, CodecError> {
        let columns = codec::encode_relation_members(&self.members)?;
        Ok(vec![Value::Text(columns.members), Value::Text(columns.roles)])
    }

    fn member_refs(&self) -> Vec<(ObjectKind, i64)> {
        self.members.iter().map(|m| (m.kind, m.id)).collect()
    }
}

/// Kind-specific columns following the shared metadata columns.
pub(crate) const fn payload_columns(kind: ObjectKind) -> &'static [&'static str] {
    match kind {
        ObjectKind::Node => &["lat", "lon"],
        ObjectKind::Way => &["members"],
        ObjectKind::Relation => &["members", "memberroles"],
    }
}

/// Metadata columns shared by every object table.
pub(crate) const META_COLUMNS: [&str; 7] = [
    "id",
    "changeset",
    "username",
    "uid",
    "timestamp",
    "version",
    "tags",
];

fn object_columns(kind: ObjectKind) -> Vec<&'static str> {
    META_COLUMNS
        .iter()
        .chain(payload_columns(kind))
        .copied()
        .collect()
}

fn row_values<T: Versioned>(object: &T, id: i64) -> Result<Vec<Value>, StoreError> {
    let meta = object.meta();
    let encode = |source| StoreError::Encode {
        kind: T::KIND,
        id,
        source,
    };
    let mut values = vec![
        Value::Integer(id),
        Value::Integer(meta.changeset),
        Value::Text(meta.username.clone()),
        Value::Integer(meta.uid),
        Value::Integer(meta.timestamp),
        Value::Integer(meta.version),
        Value::Text(codec::encode_tags(object.tags()).map_err(encode)?),
    ];
    values.extend(object.payload().map_err(encode)?);
    Ok(values)
}

/// Writes a batch of one kind to the layer in `ctx`, in input order.
///
/// Placeholders are replaced by ids drawn from `allocator` and recorded in
/// `created`. The allocator is not committed here.
pub(crate) fn objects_to_database<T: Versioned>(
    ctx: &WriteContext<'_>,
    objects: &[T],
    allocator: &mut IdAllocator,
    created: &mut BTreeMap<i64, i64>,
) -> Result<(), StoreError> {
    for (position, object) in objects.iter().enumerate() {
        store_one(ctx, object, position, allocator, created)?;
    }
    Ok(())
}

fn store_one<T: Versioned>(
    ctx: &WriteContext<'_>,
    object: &T,
    position: usize,
    allocator: &mut IdAllocator,
    created: &mut BTreeMap<i64, i64>,
) -> Result<(), StoreError> {
    let id = resolve_object_id(ctx, object, position, allocator, created)?;
    place_version(ctx, object, id)?;
    ctx.connection
        .prepare_cached(&format!(
            "INSERT OR IGNORE INTO {} (id) VALUES (?1)",
            ctx.prefix.existence(T::KIND)
        ))
        .and_then(|mut statement| statement.execute([id]))
        .map_err(sqlite("record object existence"))?;
    membership::replace_members(
        ctx,
        T::KIND,
        id,
        object.meta().version,
        &object.member_refs(),
    )
}

fn resolve_object_id<T: Versioned>(
    ctx: &WriteContext<'_>,
    object: &T,
    position: usize,
    allocator: &mut IdAllocator,
    created: &mut BTreeMap<i64, i64>,
) -> Result<i64, StoreError> {
    let placeholder = object.object_id();
    if !is_placeholder(placeholder) {
        return Ok(placeholder);
    }
    let version = object.meta().version;
    if version != 1 {
        return Err(ConstraintViolation::WrongVersionForNewObject {
            kind: T::KIND,
            placeholder,
            version,
            position,
        }
        .into());
    }
    if created.contains_key(&placeholder) {
        return Err(ConstraintViolation::DuplicatePlaceholder {
            kind: T::KIND,
            placeholder,
            position,
        }
        .into());
    }
    if !allocator.has_counter(T::KIND) {
        let next = first_free_id(ctx.connection, ctx.prefix, ctx.baseline, T::KIND)?;
        allocator.seed(T::KIND, next);
    }
    let id = allocator.advance(T::KIND);
    ensure_unused(ctx, T::KIND, id, position)?;
    created.insert(placeholder, id);
    ctx.observer.on_event(&StoreEvent::IdAssigned {
        kind: T::KIND,
        placeholder,
        id,
    });
    Ok(id)
}

/// Rejects `id` when a live row or existence row of either layer holds it.
fn ensure_unused(
    ctx: &WriteContext<'_>,
    kind: ObjectKind,
    id: i64,
    position: usize,
) -> Result<(), StoreError> {
    for prefix in std::iter::once(ctx.prefix).chain(ctx.baseline) {
        for table in [prefix.live(kind), prefix.existence(kind)] {
            let taken = ctx
                .connection
                .prepare_cached(&format!("SELECT 1 FROM {table} WHERE id = ?1"))
                .and_then(|mut statement| statement.query_row([id], |_| Ok(())).optional())
                .map_err(sqlite("check allocated id"))?
                .is_some();
            if taken {
                return Err(ConstraintViolation::AllocatedIdInUse { kind, id, position }.into());
            }
        }
    }
    Ok(())
}

fn place_version<T: Versioned>(
    ctx: &WriteContext<'_>,
    object: &T,
    id: i64,
) -> Result<(), StoreError> {
    let kind = T::KIND;
    let meta = object.meta();
    let live_version = live_version(ctx, kind, id)?;
    let history_version = max_history_version(ctx, kind, id)?;

    let mut removed_live = false;
    if let Some(live) = live_version {
        if meta.version > live {
            archive_live_row(ctx, kind, id)?;
        }
        if meta.version >= live && !meta.visible {
            ctx.connection
                .prepare_cached(&format!("DELETE FROM {} WHERE id = ?1", ctx.prefix.live(kind)))
                .and_then(|mut statement| statement.execute([id]))
                .map_err(sqlite("delete live row"))?;
            removed_live = true;
        }
    }

    let winner = meta.visible
        && live_version.is_none_or(|live| meta.version >= live)
        && history_version.is_none_or(|max| meta.version >= max);

    let values = row_values(object, id)?;
    let placement = if winner {
        if live_version.is_some() {
            update_live_row(ctx, kind, &values)?;
        } else {
            insert_live_row(ctx, kind, &values)?;
        }
        Placement::Live
    } else {
        insert_history_row(ctx, kind, values, meta.visible)?;
        Placement::History
    };

    ctx.observer.on_event(&StoreEvent::ObjectPlaced {
        layer: ctx.prefix.as_str(),
        kind,
        id,
        version: meta.version,
        placement,
        removed_live,
    });
    Ok(())
}

fn live_version(
    ctx: &WriteContext<'_>,
    kind: ObjectKind,
    id: i64,
) -> Result<Option<i64>, StoreError> {
    ctx.connection
        .prepare_cached(&format!(
            "SELECT version FROM {} WHERE id = ?1",
            ctx.prefix.live(kind)
        ))
        .and_then(|mut statement| statement.query_row([id], |row| row.get(0)).optional())
        .map_err(sqlite("read live version"))
}

fn max_history_version(
    ctx: &WriteContext<'_>,
    kind: ObjectKind,
    id: i64,
) -> Result<Option<i64>, StoreError> {
    ctx.connection
        .prepare_cached(&format!(
            "SELECT MAX(version) FROM {} WHERE id = ?1",
            ctx.prefix.history(kind)
        ))
        .and_then(|mut statement| statement.query_row([id], |row| row.get(0)))
        .map_err(sqlite("read maximum history version"))
}

fn archive_live_row(ctx: &WriteContext<'_>, kind: ObjectKind, id: i64) -> Result<(), StoreError> {
    let columns = object_columns(kind).join(", ");
    ctx.connection
        .prepare_cached(&format!(
            "INSERT OR IGNORE INTO {history} ({columns}, visible)
             SELECT {columns}, 1 FROM {live} WHERE id = ?1",
            history = ctx.prefix.history(kind),
            live = ctx.prefix.live(kind),
        ))
        .and_then(|mut statement| statement.execute([id]))
        .map(|_| ())
        .map_err(sqlite("archive live row"))
}

fn insert_live_row(
    ctx: &WriteContext<'_>,
    kind: ObjectKind,
    values: &[Value],
) -> Result<(), StoreError> {
    let columns = object_columns(kind);
    ctx.connection
        .prepare_cached(&format!(
            "INSERT INTO {} ({}) VALUES ({})",
            ctx.prefix.live(kind),
            columns.join(", "),
            placeholders(columns.len())
        ))
        .and_then(|mut statement| statement.execute(params_from_iter(values)))
        .map(|_| ())
        .map_err(sqlite("insert live row"))
}

fn update_live_row(
    ctx: &WriteContext<'_>,
    kind: ObjectKind,
    values: &[Value],
) -> Result<(), StoreError> {
    let assignments = object_columns(kind)
        .iter()
        .enumerate()
        .skip(1)
        .map(|(index, column)| format!("{column} = ?{}", index + 1))
        .collect::<Vec<_>>()
        .join(", ");
    ctx.connection
        .prepare_cached(&format!(
            "UPDATE {} SET {assignments} WHERE id = ?1",
            ctx.prefix.live(kind)
        ))
        .and_then(|mut statement| statement.execute(params_from_iter(values)))
        .map(|_| ())
        .map_err(sqlite("update live row"))
}

fn insert_history_row(
    ctx: &WriteContext<'_>,
    kind: ObjectKind,
    mut values: Vec<Value>,
    visible: bool,
) -> Result<(), StoreError> {
    let columns = object_columns(kind);
    values.push(Value::Integer(i64::from(visible)));
    ctx.connection
        .prepare_cached(&format!(
            "INSERT OR IGNORE INTO {} ({}, visible) VALUES ({})",
            ctx.prefix.history(kind),
            columns.join(", "),
            placeholders(columns.len() + 1)
        ))
        .and_then(|mut statement| statement.execute(params_from_iter(&values)))
        .map(|_| ())
        .map_err(sqlite("insert history row"))
}

fn placeholders(count: usize) -> String {
    (1..=count)
        .map(|index| format!("?{index}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Stores a mixed batch in dependency order: nodes, then ways with their
/// node references resolved, then relations one at a time so a relation
/// may reference a relation created earlier in the same batch.
///
/// The allocator is loaded from and committed to the same layer. Callers
/// wrap this in a savepoint so an error leaves no partial batch behind.
pub(crate) fn store_objects(
    ctx: &WriteContext<'_>,
    data: OsmData,
) -> Result<CreatedIds, StoreError> {
    let OsmData {
        nodes,
        mut ways,
        mut relations,
        ..
    } = data;
    let mut allocator = IdAllocator::load(ctx.connection, ctx.prefix)?;
    let mut created = CreatedIds::default();

    objects_to_database(ctx, &nodes, &mut allocator, &mut created.nodes)?;
    for way in &mut ways {
        let owner_id = way.id;
        for node_ref in &mut way.refs {
            *node_ref = resolve_reference(
                *node_ref,
                &created.nodes,
                (ObjectKind::Way, owner_id),
                ObjectKind::Node,
            )?;
        }
    }
    rewrite_relation_members(&mut relations, ObjectKind::Node, &created.nodes)?;

    objects_to_database(ctx, &ways, &mut allocator, &mut created.ways)?;
    rewrite_relation_members(&mut relations, ObjectKind::Way, &created.ways)?;

    for (position, relation) in relations.iter_mut().enumerate() {
        rewrite_members(relation, ObjectKind::Relation, &created.relations)?;
        store_one(
            ctx,
            &*relation,
            position,
            &mut allocator,
            &mut created.relations,
        )?;
    }

    allocator.commit(ctx.connection, ctx.prefix, ctx.observer)?;
    Ok(created)
}

/// Runs [`store_objects`] inside a savepoint of `transaction`, releasing
/// it on success and rolling it back on any error.
pub(crate) fn store_in_savepoint(
    transaction: &mut Transaction<'_>,
    prefix: &TablePrefix,
    baseline: Option<&TablePrefix>,
    observer: &dyn StoreObserver,
    data: OsmData,
) -> Result<CreatedIds, StoreError> {
    let savepoint = transaction
        .savepoint()
        .map_err(sqlite("open write savepoint"))?;
    let ctx = WriteContext {
        connection: &savepoint,
        prefix,
        baseline,
        observer,
    };
    let created = store_objects(&ctx, data)?;
    savepoint
        .commit()
        .map_err(sqlite("release write savepoint"))?;
    Ok(created)
}

fn rewrite_relation_members(
    relations: &mut [Relation],
    member_kind: ObjectKind,
    created: &BTreeMap<i64, i64>,
) -> Result<(), ConstraintViolation> {
    relations
        .iter_mut()
        .try_for_each(|relation| rewrite_members(relation, member_kind, created))
}

fn rewrite_members(
    relation: &mut Relation,
    member_kind: ObjectKind,
    created: &BTreeMap<i64, i64>,
) -> Result<(), ConstraintViolation> {
    let owner_id = relation.id;
    for member in relation
        .members
        .iter_mut()
        .filter(|member| member.kind == member_kind)
    {
        member.id = resolve_reference(
            member.id,
            created,
            (ObjectKind::Relation, owner_id),
            member_kind,
        )?;
    }
    Ok(())
}

fn resolve_reference(
    reference: i64,
    created: &BTreeMap<i64, i64>,
    (owner_kind, owner_id): (ObjectKind, i64),
    member_kind: ObjectKind,
) -> Result<i64, ConstraintViolation> {
    if !is_placeholder(reference) {
        return Ok(reference);
    }
    created
        .get(&reference)
        .copied()
        .ok_or(ConstraintViolation::UnresolvedReference {
            owner_kind,
            owner_id,
            member_kind,
            reference,
        })
}
