//! Core data model for the osmstrata versioned object store.
//!
//! Nodes, ways and relations carry version metadata and free-form tags.
//! Objects whose id is zero or negative are placeholders that the store
//! replaces with real ids when the batch is written. Read paths push
//! decoded objects into an [`ObjectSink`]; the decorators in [`sink`]
//! record what flowed through so later query phases can build on it.
#![forbid(unsafe_code)]

pub mod codec;
mod data;
mod object;
pub mod sink;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use codec::CodecError;
pub use data::{ChangeAction, ChangeBlock, OsmChange, OsmData, UnknownChangeAction};
pub use object::{
    Member, MetaData, Node, ObjectError, ObjectKind, OsmObject, Relation, Tags, Way,
    is_placeholder,
};
pub use sink::{IdSets, ObjectSink, RetainIds, RetainMemberIds};
