//! Pure, synchronous compilation stages shared by the permission engine and stores.
//!
//! Nothing in this crate performs I/O or holds state between calls.

pub mod filters;
pub mod operators;
pub mod ordering;
pub mod pagination;
pub mod paths;
pub mod projection;
pub mod shape;
pub mod spec;

pub use filters::{split_filter_key, Condition, FilterCompiler, FilterKey, Predicate, MAX_FILTER_NESTING};
pub use operators::Operator;
pub use ordering::{compile_ordering, OrderTerm};
pub use pagination::{decode_continuation, encode_continuation, PageInfo, PagePlan, PaginationPlanner};
pub use paths::{
    ExclusionSource, ExpandedField, FieldOrigin, FieldPattern, PathResolver, PathTarget,
    ResolvedPath, LOOKUP_SEPARATOR,
};
pub use projection::{project, GrantedFields, Projection};
pub use shape::{extract, lookup_document, shape_row, walk_document};
pub use spec::{QueryRequest, QuerySpec};

#[cfg(test)]
mod test_support;
