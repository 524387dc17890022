//! Table-prefix scopes and the static/active layer pair.

use osmstrata_core::ObjectKind;
use thiserror::Error;

/// Errors raised when validating a layer prefix.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LayerError {
    /// The prefix contains characters that are unsafe in an SQL identifier.
    #[error("table prefix '{prefix}' may only contain ASCII letters, digits and underscores")]
    InvalidPrefix {
        /// Rejected prefix.
        prefix: String,
    },
    /// Both layers resolve to the same tables.
    #[error("static and active layers share the prefix '{prefix}'")]
    SharedPrefix {
        /// Prefix used twice.
        prefix: String,
    },
}

/// A validated table-name prefix. Every table of a layer is named
/// `{prefix}{table}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TablePrefix(String);

impl TablePrefix {
    /// Validates `prefix`.
    ///
    /// # Errors
    ///
    /// Returns [`LayerError::InvalidPrefix`] for characters outside
    /// `[A-Za-z0-9_]`.
    ///
    /// # Examples
    ///
    /// ```
    /// use osmstrata_core::ObjectKind;
    /// use osmstrata_store::TablePrefix;
    ///
    /// let prefix = TablePrefix::new("active_").expect("valid prefix");
    /// assert_eq!(prefix.live(ObjectKind::Way), "active_liveways");
    /// assert!(TablePrefix::new("x; DROP").is_err());
    /// ```
    pub fn new(prefix: impl Into<String>) -> Result<Self, LayerError> {
        let prefix = prefix.into();
        if prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            Ok(Self(prefix))
        } else {
            Err(LayerError::InvalidPrefix { prefix })
        }
    }

    /// The raw prefix.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Live table of `kind`.
    #[must_use]
    pub fn live(&self, kind: ObjectKind) -> String {
        format!("{}live{}", self.0, plural(kind))
    }

    /// History table of `kind`.
    #[must_use]
    pub fn history(&self, kind: ObjectKind) -> String {
        format!("{}old{}", self.0, plural(kind))
    }

    /// Existence index of `kind`.
    #[must_use]
    pub fn existence(&self, kind: ObjectKind) -> String {
        format!("{}{}ids", self.0, kind.as_str())
    }

    /// Membership table holding references from `owner` to `member`
    /// objects, or `None` when `owner` cannot reference `member`.
    #[must_use]
    pub fn membership(&self, owner: ObjectKind, member: ObjectKind) -> Option<String> {
        match (owner, member) {
            (ObjectKind::Way, ObjectKind::Node) => Some(format!("{}way_mems", self.0)),
            (ObjectKind::Relation, _) => Some(format!(
                "{}relation_mems_{}",
                self.0,
                member_suffix(member)
            )),
            _ => None,
        }
    }

    /// Allocator table.
    #[must_use]
    pub fn next_ids(&self) -> String {
        format!("{}nextids", self.0)
    }

    /// R*Tree over live node positions.
    #[must_use]
    pub fn node_geometry(&self) -> String {
        format!("{}livenodes_geom", self.0)
    }

    /// Schema version marker table.
    #[must_use]
    pub fn schema_version(&self) -> String {
        format!("{}schema_version", self.0)
    }

    /// Every data table of the layer, excluding the schema marker.
    #[must_use]
    pub fn data_tables(&self) -> Vec<String> {
        let mut tables = Vec::new();
        for kind in ObjectKind::ALL {
            tables.push(self.live(kind));
            tables.push(self.history(kind));
            tables.push(self.existence(kind));
        }
        tables.push(format!("{}way_mems", self.0));
        for member in ObjectKind::ALL {
            tables.push(format!("{}relation_mems_{}", self.0, member_suffix(member)));
        }
        tables.push(self.next_ids());
        tables
    }
}

const fn plural(kind: ObjectKind) -> &'static str {
    match kind {
        ObjectKind::Node => "nodes",
        ObjectKind::Way => "ways",
        ObjectKind::Relation => "relations",
    }
}

const fn member_suffix(kind: ObjectKind) -> &'static str {
    match kind {
        ObjectKind::Node => "n",
        ObjectKind::Way => "w",
        ObjectKind::Relation => "r",
    }
}

/// Selects one layer of a [`Layers`] pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerRole {
    /// The read-only baseline.
    Static,
    /// The mutable overlay.
    Active,
}

/// The static baseline and the active overlay that shadows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layers {
    static_layer: TablePrefix,
    active_layer: TablePrefix,
}

impl Layers {
    /// Pairs two prefixes.
    ///
    /// # Errors
    ///
    /// Returns [`LayerError::SharedPrefix`] when both prefixes are equal.
    pub fn new(static_layer: TablePrefix, active_layer: TablePrefix) -> Result<Self, LayerError> {
        if static_layer == active_layer {
            return Err(LayerError::SharedPrefix {
                prefix: active_layer.0,
            });
        }
        Ok(Self {
            static_layer,
            active_layer,
        })
    }

    /// Prefix of the selected layer.
    #[must_use]
    pub const fn prefix(&self, role: LayerRole) -> &TablePrefix {
        match role {
            LayerRole::Static => &self.static_layer,
            LayerRole::Active => &self.active_layer,
        }
    }

    /// The read-only baseline.
    #[must_use]
    pub const fn static_layer(&self) -> &TablePrefix {
        &self.static_layer
    }

    /// The mutable overlay.
    #[must_use]
    pub const fn active_layer(&self) -> &TablePrefix {
        &self.active_layer
    }

    /// Sources of the merged view in emission order: the static layer with
    /// ids redefined in the active layer excluded, then the active layer.
    #[must_use]
    pub fn merged(&self) -> [(&TablePrefix, Option<&TablePrefix>); 2] {
        [
            (&self.static_layer, Some(&self.active_layer)),
            (&self.active_layer, None),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("")]
    #[case("planet_")]
    #[case("Mod2")]
    fn accepts_identifier_prefixes(#[case] prefix: &str) {
        assert!(TablePrefix::new(prefix).is_ok());
    }

    #[rstest]
    #[case("a-b")]
    #[case("x\"")]
    #[case("main.")]
    fn rejects_unsafe_prefixes(#[case] prefix: &str) {
        assert!(matches!(
            TablePrefix::new(prefix),
            Err(LayerError::InvalidPrefix { .. })
        ));
    }

    #[rstest]
    fn membership_tables_follow_member_kind() {
        let prefix = TablePrefix::new("m_").expect("prefix");
        assert_eq!(
            prefix.membership(ObjectKind::Way, ObjectKind::Node).as_deref(),
            Some("m_way_mems")
        );
        assert_eq!(
            prefix
                .membership(ObjectKind::Relation, ObjectKind::Way)
                .as_deref(),
            Some("m_relation_mems_w")
        );
        assert_eq!(prefix.membership(ObjectKind::Way, ObjectKind::Way), None);
        assert_eq!(prefix.membership(ObjectKind::Node, ObjectKind::Node), None);
    }

    #[rstest]
    fn layers_must_differ() {
        let prefix = TablePrefix::new("same_").expect("prefix");
        assert!(matches!(
            Layers::new(prefix.clone(), prefix),
            Err(LayerError::SharedPrefix { .. })
        ));
    }

    #[rstest]
    fn data_tables_cover_every_kind() {
        let prefix = TablePrefix::new("p_").expect("prefix");
        let tables = prefix.data_tables();
        assert_eq!(tables.len(), 14);
        assert!(tables.contains(&"p_oldrelations".to_owned()));
        assert!(tables.contains(&"p_relation_mems_r".to_owned()));
    }
}
