//! Column encoding for tags and member lists.
//!
//! Tags are stored as a JSON object (`{}` when empty). Way members are a
//! JSON array of node ids. Relation members are a JSON array of
//! `[type, id]` pairs with roles held in a second, parallel array of
//! strings.

use serde_json::Error as JsonError;
use thiserror::Error;

use crate::object::{Member, ObjectKind, Tags};

/// Errors raised while encoding or decoding stored columns.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The tag column is not a JSON object of strings.
    #[error("invalid tag column")]
    Tags {
        /// Underlying JSON error.
        #[source]
        source: JsonError,
    },
    /// A member column is not valid JSON of the expected shape.
    #[error("invalid {column} column")]
    Members {
        /// Column that failed to parse.
        column: &'static str,
        /// Underlying JSON error.
        #[source]
        source: JsonError,
    },
    /// The member and role arrays differ in length.
    #[error("relation stores {members} members but {roles} roles")]
    RoleCountMismatch {
        /// Number of members.
        members: usize,
        /// Number of roles.
        roles: usize,
    },
    /// A stored member type is not a known kind.
    #[error("unknown stored member type '{value}'")]
    UnknownMemberKind {
        /// Rejected type string.
        value: String,
    },
}

/// Serialises tags to their column form.
///
/// # Errors
///
/// Fails only if `serde_json` cannot serialise the map.
///
/// # Examples
///
/// ```
/// use osmstrata_core::{codec, Tags};
///
/// # fn main() -> Result<(), osmstrata_core::CodecError> {
/// assert_eq!(codec::encode_tags(&Tags::new())?, "{}");
/// let mut tags = Tags::new();
/// tags.insert("name".into(), "Test".into());
/// assert_eq!(codec::encode_tags(&tags)?, r#"{"name":"Test"}"#);
/// # Ok(())
/// # }
/// ```
pub fn encode_tags(tags: &Tags) -> Result<String, CodecError> {
    serde_json::to_string(tags).map_err(|source| CodecError::Tags { source })
}

/// Parses a tag column.
///
/// # Errors
///
/// Returns [`CodecError::Tags`] when the text is not an object whose values
/// are all strings.
pub fn decode_tags(column: &str) -> Result<Tags, CodecError> {
    serde_json::from_str(column).map_err(|source| CodecError::Tags { source })
}

/// Serialises way node references.
///
/// # Errors
///
/// Fails only if `serde_json` cannot serialise the list.
pub fn encode_way_members(refs: &[i64]) -> Result<String, CodecError> {
    serde_json::to_string(refs).map_err(|source| CodecError::Members {
        column: "members",
        source,
    })
}

/// Parses way node references.
///
/// # Errors
///
/// Returns [`CodecError::Members`] when the text is not an integer array.
pub fn decode_way_members(column: &str) -> Result<Vec<i64>, CodecError> {
    serde_json::from_str(column).map_err(|source| CodecError::Members {
        column: "members",
        source,
    })
}

/// Encoded relation member columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationColumns {
    /// `[["node",1],["way",2]]`
    pub members: String,
    /// `["outer","inner"]`
    pub roles: String,
}

/// Serialises relation members into the member and role columns.
///
/// # Errors
///
/// Fails only if `serde_json` cannot serialise the arrays.
pub fn encode_relation_members(members: &[Member]) -> Result<RelationColumns, CodecError> {
    let pairs: Vec<(&str, i64)> = members.iter().map(|m| (m.kind.as_str(), m.id)).collect();
    let roles: Vec<&str> = members.iter().map(|m| m.role.as_str()).collect();
    Ok(RelationColumns {
        members: serde_json::to_string(&pairs).map_err(|source| CodecError::Members {
            column: "members",
            source,
        })?,
        roles: serde_json::to_string(&roles).map_err(|source| CodecError::Members {
            column: "memberroles",
            source,
        })?,
    })
}

/// Parses the member and role columns back into ordered members.
///
/// # Errors
///
/// Returns [`CodecError::Members`] on malformed JSON,
/// [`CodecError::RoleCountMismatch`] when the arrays differ in length and
/// [`CodecError::UnknownMemberKind`] for an unknown type string.
pub fn decode_relation_members(members: &str, roles: &str) -> Result<Vec<Member>, CodecError> {
    let pairs: Vec<(String, i64)> =
        serde_json::from_str(members).map_err(|source| CodecError::Members {
            column: "members",
            source,
        })?;
    let roles: Vec<String> = serde_json::from_str(roles).map_err(|source| CodecError::Members {
        column: "memberroles",
        source,
    })?;
    if pairs.len() != roles.len() {
        return Err(CodecError::RoleCountMismatch {
            members: pairs.len(),
            roles: roles.len(),
        });
    }
    pairs
        .into_iter()
        .zip(roles)
        .map(|((kind, id), role)| {
            let kind = kind
                .parse::<ObjectKind>()
                .map_err(|_| CodecError::UnknownMemberKind { value: kind.clone() })?;
            Ok(Member { kind, id, role })
        })
        .collect()
}
