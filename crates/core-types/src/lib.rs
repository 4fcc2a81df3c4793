//! Shared primitives for the flexquery crates.
//!
//! Everything here is plain data: the caller identity handed in by the host,
//! the operation vocabulary, dotted field paths, the read-only schema
//! descriptor and the error taxonomy every other crate reports through.

pub mod caller;
pub mod errors;
pub mod operation;
pub mod path;
pub mod schema;

pub use caller::Caller;
pub use errors::{DenialKind, ErrorKind, FlexError, FlexResult};
pub use operation::OperationKind;
pub use path::{FieldPath, MAX_PATH_SEGMENTS};
pub use schema::{EntitySchema, MemberKind, SchemaDescriptor, SchemaRegistry};
