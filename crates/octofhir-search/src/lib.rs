//! Search parameter registry, query parsing and predicate evaluation.
//!
//! The crate is storage-agnostic: the caller hands documents (and a
//! [`ResourceResolver`] for chained and reverse lookups) to a
//! [`SearchTester`], which decides per document whether it matches a
//! [`ParsedQuery`]. Ordering, include expansion and projection are
//! separate passes over the match set.

pub mod compartment;
pub mod error;
pub mod include;
pub mod parameters;
pub mod parser;
pub mod path;
pub mod projection;
pub mod registry;
pub mod sort;
pub mod tester;
pub mod types;

pub use compartment::{CompartmentDefinition, CompartmentEngine};
pub use error::{Result, SearchError};
pub use parameters::{
    CompositeComponent, SearchModifier, SearchParameter, SearchParameterType, SearchPrefix,
};
pub use parser::{
    ChainSegment, HasInner, HasParam, IncludeDirective, ParsedParam, ParsedQuery, ParsedValue,
    SortKey, SummaryMode,
};
pub use registry::SearchParameterRegistry;
pub use sort::sort_documents;
pub use tester::{NullResolver, ResourceResolver, SearchOptions, SearchTester};
