//! The record-set surface: units of work, CRUD, relational commands and
//! introspection.
//!
//! A [`Runtime`] hands out [`Environment`]s. Each one is a transaction with
//! its own record cache; every storage-touching operation checks the model
//! ACL and the row rules of the acting user before any SQL runs.

mod convert;
mod create;
mod environment;
mod fields_get;
mod read;
mod recordset;
mod relational;
mod runtime;
mod search;
mod write;

pub use convert::{coerce_input, from_column};
pub use environment::Environment;
pub use recordset::{Record, RecordSet};
pub use runtime::{Runtime, RuntimeBuilder};
pub use search::SearchOptions;
