//! Model-level access control.
//!
//! An operation on a model is allowed when at least one active
//! `ir.model.access` row for the model grants the operation bit and is
//! either groupless or bound to one of the actor's transitive groups.
//! Decisions are cached per unit of work, then in the runtime's
//! [`PermissionCache`](super::PermissionCache).

use std::fmt;

use nexo_proto::Value;

use super::audit::AuditEvent;
use super::permission_cache::AclKey;
use crate::error::{Error, Result};
use crate::orm::Environment;
use crate::sql::ParamBuilder;
use crate::storage::Cursor;

/// The four access bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AccessOperation {
    Read,
    Write,
    Create,
    Unlink,
}

impl AccessOperation {
    pub const ALL: [AccessOperation; 4] = [
        AccessOperation::Read,
        AccessOperation::Write,
        AccessOperation::Create,
        AccessOperation::Unlink,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AccessOperation::Read => "read",
            AccessOperation::Write => "write",
            AccessOperation::Create => "create",
            AccessOperation::Unlink => "unlink",
        }
    }

    /// Flag column on `ir_model_access` and `ir_rule`.
    pub fn column(self) -> &'static str {
        match self {
            AccessOperation::Read => "perm_read",
            AccessOperation::Write => "perm_write",
            AccessOperation::Create => "perm_create",
            AccessOperation::Unlink => "perm_unlink",
        }
    }
}

impl fmt::Display for AccessOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether any access row grants `operation` on `model` to `groups`.
pub fn query_model_access(
    cursor: &mut Cursor,
    groups: &[i64],
    model: &str,
    operation: AccessOperation,
) -> Result<bool> {
    let mut params = ParamBuilder::new();
    let model_ph = params.push(model);
    let group_filter = if groups.is_empty() {
        "a.\"group_id\" IS NULL".to_string()
    } else {
        let list = params.push_all(groups.iter().copied().map(Value::Int));
        format!("(a.\"group_id\" IS NULL OR a.\"group_id\" IN ({list}))")
    };
    let sql = format!(
        "SELECT COUNT(*) FROM \"ir_model_access\" a \
         JOIN \"ir_model\" m ON m.\"id\" = a.\"model_id\" \
         WHERE m.\"model\" = {model_ph} AND a.\"active\" = 1 AND a.\"{}\" = 1 AND {group_filter}",
        operation.column()
    );
    Ok(cursor.query_scalar_i64(&sql, params.params())? > 0)
}

impl Environment {
    /// Check the model ACL for `operation`, raising
    /// [`Error::AccessDenied`] when no access row grants it.
    pub fn check_access(&mut self, model: &str, operation: AccessOperation) -> Result<()> {
        if operation != AccessOperation::Read && self.cursor.is_read_only() {
            return Err(Error::Validation(format!(
                "cannot {operation} '{model}' in a read-only unit of work"
            )));
        }
        if self.actor.is_superuser() {
            return Ok(());
        }

        let local_key = (model.to_string(), operation);
        let allowed = match self.acl_local.get(&local_key) {
            Some(allowed) => *allowed,
            None => {
                let permissions = self.runtime.permissions();
                let key = AclKey::new(&self.actor.group_ids, model, operation);
                let allowed = match permissions.get(&key) {
                    Some(allowed) => allowed,
                    None => {
                        let allowed =
                            query_model_access(&mut self.cursor, &self.actor.group_ids, model, operation)?;
                        permissions.insert(key, allowed, self.acl_generation);
                        allowed
                    }
                };
                self.acl_local.insert(local_key, allowed);
                allowed
            }
        };

        if allowed {
            return Ok(());
        }

        tracing::warn!(uid = self.actor.uid, model, operation = %operation, "access denied");
        self.runtime
            .audit()
            .log(AuditEvent::access_denied(self.actor.uid, model, operation));
        Err(Error::AccessDenied {
            model: model.to_string(),
            operation,
        })
    }
}
