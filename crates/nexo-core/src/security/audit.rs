//! Audit logging infrastructure.
//!
//! Every create, write and unlink and every authorization denial produces an
//! [`AuditEvent`]. Superuser activity is flagged rather than skipped.

use std::sync::Arc;

use chrono::{NaiveDateTime, Utc};
use parking_lot::Mutex;

use super::acl::AccessOperation;

/// Types of audit events.
#[derive(Debug, Clone, PartialEq)]
pub enum AuditEventType {
    /// Records were created, written or deleted.
    Mutation {
        model: String,
        operation: AccessOperation,
        ids: Vec<i64>,
    },
    /// The model ACL refused the operation.
    AccessDenied {
        model: String,
        operation: AccessOperation,
    },
    /// Targeted records fall outside the row rules.
    RuleViolation {
        model: String,
        operation: AccessOperation,
        /// Number of targeted ids that failed the check.
        rejected: usize,
    },
    /// A row rule could not be evaluated and was replaced by a denial.
    RuleSkipped {
        model: String,
        rule_id: i64,
        error: String,
    },
}

/// An audit event with metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEvent {
    /// UTC time the event occurred.
    pub timestamp: NaiveDateTime,
    /// Acting user.
    pub uid: i64,
    /// Whether the actor bypassed access checks.
    pub superuser: bool,
    pub event_type: AuditEventType,
}

impl AuditEvent {
    pub fn new(uid: i64, superuser: bool, event_type: AuditEventType) -> Self {
        Self {
            timestamp: Utc::now().naive_utc(),
            uid,
            superuser,
            event_type,
        }
    }

    /// Create a mutation event.
    pub fn mutation(
        uid: i64,
        superuser: bool,
        model: impl Into<String>,
        operation: AccessOperation,
        ids: Vec<i64>,
    ) -> Self {
        Self::new(
            uid,
            superuser,
            AuditEventType::Mutation {
                model: model.into(),
                operation,
                ids,
            },
        )
    }

    /// Create an ACL denial event.
    pub fn access_denied(uid: i64, model: impl Into<String>, operation: AccessOperation) -> Self {
        Self::new(
            uid,
            false,
            AuditEventType::AccessDenied {
                model: model.into(),
                operation,
            },
        )
    }

    /// Create a row-rule denial event.
    pub fn rule_violation(
        uid: i64,
        model: impl Into<String>,
        operation: AccessOperation,
        rejected: usize,
    ) -> Self {
        Self::new(
            uid,
            false,
            AuditEventType::RuleViolation {
                model: model.into(),
                operation,
                rejected,
            },
        )
    }

    /// Create a skipped-rule event.
    pub fn rule_skipped(uid: i64, model: impl Into<String>, rule_id: i64, error: impl Into<String>) -> Self {
        Self::new(
            uid,
            false,
            AuditEventType::RuleSkipped {
                model: model.into(),
                rule_id,
                error: error.into(),
            },
        )
    }

    /// Model the event concerns.
    pub fn model(&self) -> &str {
        match &self.event_type {
            AuditEventType::Mutation { model, .. }
            | AuditEventType::AccessDenied { model, .. }
            | AuditEventType::RuleViolation { model, .. }
            | AuditEventType::RuleSkipped { model, .. } => model,
        }
    }

    /// Format the event as a log line.
    pub fn to_log_line(&self) -> String {
        let desc = match &self.event_type {
            AuditEventType::Mutation {
                model,
                operation,
                ids,
            } => format!("MUTATION model={model} op={operation} count={}", ids.len()),
            AuditEventType::AccessDenied { model, operation } => {
                format!("ACCESS_DENIED model={model} op={operation}")
            }
            AuditEventType::RuleViolation {
                model,
                operation,
                rejected,
            } => format!("RULE_VIOLATION model={model} op={operation} rejected={rejected}"),
            AuditEventType::RuleSkipped {
                model,
                rule_id,
                error,
            } => format!("RULE_SKIPPED model={model} rule={rule_id} error={error:?}"),
        };
        format!(
            "{} uid={} superuser={} {desc}",
            self.timestamp.format("%Y-%m-%dT%H:%M:%S%.3f"),
            self.uid,
            self.superuser
        )
    }
}

/// Trait for audit log backends.
pub trait AuditLogger: Send + Sync {
    /// Log an audit event.
    fn log(&self, event: AuditEvent);
}

/// Emits events through `tracing` under the `nexo::audit` target.
#[derive(Debug, Default)]
pub struct TracingAuditLogger;

impl AuditLogger for TracingAuditLogger {
    fn log(&self, event: AuditEvent) {
        match &event.event_type {
            AuditEventType::Mutation { .. } => {
                tracing::info!(target: "nexo::audit", uid = event.uid, superuser = event.superuser, "{}", event.to_log_line())
            }
            _ => tracing::warn!(target: "nexo::audit", uid = event.uid, "{}", event.to_log_line()),
        }
    }
}

/// In-memory audit logger for testing.
#[derive(Debug, Default, Clone)]
pub struct MemoryAuditLogger {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl MemoryAuditLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all logged events.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl AuditLogger for MemoryAuditLogger {
    fn log(&self, event: AuditEvent) {
        self.events.lock().push(event);
    }
}

/// Discards all events.
#[derive(Debug, Default)]
pub struct NullAuditLogger;

impl AuditLogger for NullAuditLogger {
    fn log(&self, _event: AuditEvent) {}
}
