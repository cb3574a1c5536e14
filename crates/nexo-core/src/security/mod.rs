//! Access control: actors, model ACLs, row rules and the audit trail.
//!
//! Every storage-touching operation of an [`Environment`](crate::orm::Environment)
//! first checks the model ACL, then restricts or verifies its records with
//! the row rules. The superuser bypasses both; its mutations are still
//! audited.

pub mod acl;
pub mod actor;
pub mod audit;
pub mod permission_cache;
pub mod rules;

pub use acl::{query_model_access, AccessOperation};
pub use actor::{security_generation, Actor, GROUPS_CACHE_PREFIX, SECURITY_GENERATION_KEY, SUPERUSER_ID};
pub use audit::{
    AuditEvent, AuditEventType, AuditLogger, MemoryAuditLogger, NullAuditLogger, TracingAuditLogger,
};
pub use permission_cache::{AclKey, PermissionCache, PermissionCacheStats};
pub use rules::RuleRow;

/// Models whose mutation invalidates cached ACL decisions, rule predicates
/// and group sets.
pub const SECURITY_MODELS: [&str; 4] = ["ir.model.access", "ir.rule", "res.groups", "res.users"];
