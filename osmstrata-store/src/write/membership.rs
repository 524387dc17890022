//! Membership index maintenance.
//!
//! Each row is `(owner id, owner version, position, member id)`. Relation
//! members are split across one table per member kind; `position` is the
//! index within the full member list so the original order can be
//! reassembled across tables.

use osmstrata_core::ObjectKind;

use super::WriteContext;
use crate::error::{StoreError, sqlite};

/// Replaces the membership rows of one `(id, version)` with `members`.
///
/// Existing rows for that version are removed first, so rewriting the same
/// version leaves exactly one set of rows.
pub(super) fn replace_members(
    ctx: &WriteContext<'_>,
    owner: ObjectKind,
    id: i64,
    version: i64,
    members: &[(ObjectKind, i64)],
) -> Result<(), StoreError> {
    for member_kind in ObjectKind::ALL {
        let Some(table) = ctx.prefix.membership(owner, member_kind) else {
            continue;
        };
        ctx.connection
            .prepare_cached(&format!(
                "DELETE FROM {table} WHERE id = ?1 AND version = ?2"
            ))
            .and_then(|mut statement| statement.execute([id, version]))
            .map_err(sqlite("clear membership rows"))?;

        let mut insert = ctx
            .connection
            .prepare_cached(&format!(
                "INSERT INTO {table} (id, version, position, member) VALUES (?1, ?2, ?3, ?4)"
            ))
            .map_err(sqlite("prepare membership insert"))?;
        for (position, (_, member)) in members
            .iter()
            .enumerate()
            .filter(|(_, (kind, _))| *kind == member_kind)
        {
            let position = i64::try_from(position).unwrap_or(i64::MAX);
            insert
                .execute([id, version, position, *member])
                .map_err(sqlite("insert membership row"))?;
        }
    }
    Ok(())
}
