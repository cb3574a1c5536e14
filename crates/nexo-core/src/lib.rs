//! Nexo Core - business-data runtime.
//!
//! This crate turns declarative model definitions into tables and runs every
//! create, read, write, delete and search through one transactional unit of
//! work per request:
//!
//! - [`catalog`] - field descriptors, model normalization and the registry
//! - [`sql`] - parameter builder, domain compiler and order validation
//! - [`storage`] - bounded connection pool, cursor and savepoints
//! - [`cache`] - per-transaction record cache and the shared key/value cache
//! - [`security`] - model ACL, row rules and audit events
//! - [`compute`] - dependency graph and the recompute engine
//! - [`orm`] - environments, record sets and CRUD
//! - [`schema`] - additive table synchronization and bootstrap metadata
//!
//! # Example
//!
//! ```ignore
//! use nexo_core::{Registry, Runtime, RuntimeConfig, SearchOptions, SUPERUSER_ID};
//! use nexo_proto::{Domain, Operator, Values};
//!
//! let registry = Registry::builder().module(sale::module()).build()?;
//! let runtime = Runtime::builder(RuntimeConfig::from_env()?, registry).bootstrap()?;
//!
//! runtime.run(SUPERUSER_ID, |env| {
//!     env.create("sale.order", Values::new().set("name", "SO001"))?;
//!     let found = env.search(
//!         "sale.order",
//!         &Domain::new().leaf("name", Operator::ILike, "so"),
//!         &SearchOptions::new().with_limit(10),
//!     )?;
//!     env.read(&found, Some(&["name", "amount_total"]))
//! })?;
//! ```

pub mod base;
pub mod cache;
pub mod catalog;
pub mod compute;
pub mod config;
pub mod error;
pub mod orm;
pub mod schema;
pub mod security;
pub mod sql;
pub mod storage;

pub use catalog::{FieldDef, FieldKind, ModelDecl, ModelDef, Module, OnDelete, Registry, RegistryBuilder};
pub use config::{DatabaseConfig, RuntimeConfig};
pub use error::{Error, ErrorKind, Result};
pub use orm::{Environment, Record, RecordSet, Runtime, RuntimeBuilder, SearchOptions};
pub use schema::{SchemaReport, SchemaSync};
pub use security::{AccessOperation, Actor, AuditEvent, AuditLogger, MemoryAuditLogger, SUPERUSER_ID};

/// Re-export protocol types.
pub use nexo_proto as proto;
