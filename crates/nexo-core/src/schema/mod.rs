//! Schema synchronization.
//!
//! Tables, columns, indexes and pivot tables are derived from the registry
//! at bootstrap. The pass is additive: missing structure is created, nothing
//! is dropped or retyped.

pub mod ddl;
mod sync;

pub use sync::{sync_metadata, SchemaReport, SchemaSync, MAIN_COMPANY_ID};
