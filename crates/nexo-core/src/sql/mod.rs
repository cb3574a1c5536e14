//! SQL construction: parameters, predicates, the domain compiler and order
//! validation.

pub mod dialect;
pub mod domain;
pub mod order;
pub mod params;
pub mod predicate;

pub use dialect::{Dialect, Flavor};
pub use domain::{compile_domain, normalize_domain, DomainCompiler};
pub use order::{parse_order, render_order, OrderDirection, OrderTerm};
pub use params::{qualified, quote, validate_identifier, ParamBuilder};
pub use predicate::{escape_like, normalize_query, CompareOp, LikeCase, Predicate};

/// Largest `IN (...)` list issued by a single statement.
pub const IN_CHUNK_SIZE: usize = 1000;

/// Upper bound on bound parameters per statement.
pub const MAX_PARAMS: usize = 30_000;
