//! Nexo wire-level types.
//!
//! This crate defines the values, filters and write payloads exchanged
//! between the Nexo runtime and the layers that call it (transport,
//! importers, scheduled jobs, the CLI). Everything here is plain data with a
//! JSON form; no storage or authorization logic lives in this crate.
//!
//! # Modules
//!
//! - [`value`] - Runtime values and their JSON encoding
//! - [`domain`] - Prefix-notation boolean filters
//! - [`command`] - Write payloads and relational commands
//! - [`fields`] - Field introspection records
//! - [`error`] - Decoding errors

pub mod command;
pub mod domain;
pub mod error;
pub mod fields;
pub mod value;

pub use command::{Command, FieldValue, Values};
pub use domain::{Domain, DomainTerm, Leaf, LogicOp, Operator};
pub use error::{ProtoError, ProtoResult};
pub use fields::FieldInfo;
pub use value::{parse_date, parse_datetime, Value, DATETIME_FORMAT, DATE_FORMAT};
