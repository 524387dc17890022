//! Row decoding shared by every read path.

use rusqlite::Row;

use osmstrata_core::{MetaData, Node, ObjectKind, OsmObject, Relation, Way, codec};

use crate::error::{StoreError, sqlite};
use crate::write::{META_COLUMNS, payload_columns};

/// Which table a select list reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TableKind {
    Live,
    History,
}

/// Select list for `kind` with every column qualified by `alias`. Live rows
/// report `visible` as a constant so both tables decode alike.
pub(crate) fn select_list(kind: ObjectKind, table: TableKind, alias: &str) -> String {
    let visible = match table {
        TableKind::Live => "1".to_owned(),
        TableKind::History => format!("{alias}.visible"),
    };
    META_COLUMNS
        .iter()
        .map(|column| format!("{alias}.{column}"))
        .chain(std::iter::once(visible))
        .chain(
            payload_columns(kind)
                .iter()
                .map(|column| format!("{alias}.{column}")),
        )
        .collect::<Vec<_>>()
        .join(", ")
}

const PAYLOAD_START: usize = META_COLUMNS.len() + 1;

/// Decodes a row produced by [`select_list`].
pub(crate) fn decode_row(kind: ObjectKind, row: &Row<'_>) -> Result<OsmObject, StoreError> {
    let read = sqlite("read object row");
    let id: i64 = row.get(0).map_err(read)?;
    let meta = decode_meta(row)?;
    let tags_column: String = row.get(6).map_err(sqlite("read tag column"))?;
    let tags = codec::decode_tags(&tags_column)
        .map_err(|source| StoreError::Decode { kind, id, source })?;

    let object = match kind {
        ObjectKind::Node => OsmObject::Node(Node {
            id,
            meta,
            tags,
            lat: row.get(PAYLOAD_START).map_err(sqlite("read latitude"))?,
            lon: row
                .get(PAYLOAD_START + 1)
                .map_err(sqlite("read longitude"))?,
        }),
        ObjectKind::Way => {
            let members: String = row
                .get(PAYLOAD_START)
                .map_err(sqlite("read way members"))?;
            OsmObject::Way(Way {
                id,
                meta,
                tags,
                refs: codec::decode_way_members(&members)
                    .map_err(|source| StoreError::Decode { kind, id, source })?,
            })
        }
        ObjectKind::Relation => {
            let members: String = row
                .get(PAYLOAD_START)
                .map_err(sqlite("read relation members"))?;
            let roles: String = row
                .get(PAYLOAD_START + 1)
                .map_err(sqlite("read relation roles"))?;
            OsmObject::Relation(Relation {
                id,
                meta,
                tags,
                members: codec::decode_relation_members(&members, &roles)
                    .map_err(|source| StoreError::Decode { kind, id, source })?,
            })
        }
    };
    Ok(object)
}

fn decode_meta(row: &Row<'_>) -> Result<MetaData, StoreError> {
    let read = || sqlite("read object metadata");
    Ok(MetaData {
        changeset: row.get(1).map_err(read())?,
        username: row
            .get::<_, Option<String>>(2)
            .map_err(read())?
            .unwrap_or_default(),
        uid: row
            .get::<_, Option<i64>>(3)
            .map_err(read())?
            .unwrap_or_default(),
        timestamp: row.get(4).map_err(read())?,
        version: row.get(5).map_err(read())?,
        visible: row.get::<_, i64>(7).map_err(read())? != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn live_select_list_reports_visible_constant() {
        assert_eq!(
            select_list(ObjectKind::Way, TableKind::Live, "t"),
            "t.id, t.changeset, t.username, t.uid, t.timestamp, t.version, t.tags, 1, t.members"
        );
    }

    #[rstest]
    fn history_select_list_reads_visible_column() {
        let list = select_list(ObjectKind::Node, TableKind::History, "h");
        assert!(list.ends_with("h.tags, h.visible, h.lat, h.lon"));
    }
}
