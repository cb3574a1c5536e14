//! Error types for the Nexo runtime.

use nexo_lang::SandboxError;
use nexo_proto::ProtoError;
use rusqlite::ErrorCode;
use thiserror::Error;

use crate::security::AccessOperation;

/// Errors raised by the runtime.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed input, rejected before any SQL executes.
    #[error("validation error: {0}")]
    Validation(String),

    /// The model name is not registered.
    #[error("unknown model '{0}'")]
    UnknownModel(String),

    /// The field does not exist on the model.
    #[error("unknown field '{field}' on model '{model}'")]
    UnknownField { model: String, field: String },

    /// A wire domain or command payload could not be decoded.
    #[error("malformed payload: {0}")]
    Domain(#[from] ProtoError),

    /// Some of the targeted records do not exist.
    #[error("records {ids:?} of model '{model}' do not exist")]
    MissingRecords { model: String, ids: Vec<i64> },

    /// Model-level access was refused.
    #[error("access denied: {operation} on '{model}'")]
    AccessDenied {
        model: String,
        operation: AccessOperation,
    },

    /// At least one targeted record is excluded by the row rules.
    #[error("row rules forbid {operation} on some '{model}' records")]
    RuleViolation {
        model: String,
        operation: AccessOperation,
    },

    /// Storage-level constraint violation.
    #[error("integrity error: {0}")]
    Integrity(String),

    /// The recompute queue did not reach a fixpoint.
    #[error("recompute did not converge after {iterations} iterations (pending: {pending:?})")]
    RecomputeDivergence {
        iterations: usize,
        pending: Vec<String>,
    },

    /// A rule expression failed in the sandbox.
    #[error("sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    /// Underlying SQLite failure.
    #[error("storage error: {0}")]
    Storage(rusqlite::Error),

    /// No pooled connection could be obtained.
    #[error("connection pool error: {0}")]
    Pool(String),

    /// Invalid runtime configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The acting user does not exist.
    #[error("unknown user {0}")]
    UnknownUser(i64),

    /// Broken internal invariant.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(ErrorCode::ConstraintViolation) => Error::Integrity(err.to_string()),
            _ => Error::Storage(err),
        }
    }
}

/// Coarse fault category of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Authorization,
    Integrity,
    RecomputeDivergence,
    Sandbox,
    Storage,
    Internal,
}

impl Error {
    /// Fault category, used by callers to pick a response.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_)
            | Error::UnknownModel(_)
            | Error::UnknownField { .. }
            | Error::Domain(_)
            | Error::MissingRecords { .. } => ErrorKind::Validation,
            Error::AccessDenied { .. } | Error::RuleViolation { .. } | Error::UnknownUser(_) => {
                ErrorKind::Authorization
            }
            Error::Integrity(_) => ErrorKind::Integrity,
            Error::RecomputeDivergence { .. } => ErrorKind::RecomputeDivergence,
            Error::Sandbox(_) => ErrorKind::Sandbox,
            Error::Storage(_) | Error::Pool(_) => ErrorKind::Storage,
            Error::Config(_) | Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether this is an ACL or row-rule denial.
    pub fn is_authorization(&self) -> bool {
        self.kind() == ErrorKind::Authorization
    }

    pub(crate) fn unknown_field(model: &str, field: &str) -> Self {
        Error::UnknownField {
            model: model.to_string(),
            field: field.to_string(),
        }
    }
}

/// Result type for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(Error::Validation("x".into()).kind(), ErrorKind::Validation);
        assert_eq!(Error::unknown_field("a", "b").kind(), ErrorKind::Validation);
        assert!(Error::AccessDenied {
            model: "res.partner".into(),
            operation: AccessOperation::Write,
        }
        .is_authorization());
        assert_eq!(
            Error::RecomputeDivergence {
                iterations: 3,
                pending: vec![],
            }
            .kind(),
            ErrorKind::RecomputeDivergence
        );
    }

    #[test]
    fn test_display_names_model_and_operation() {
        let err = Error::RuleViolation {
            model: "sale.order".into(),
            operation: AccessOperation::Unlink,
        };
        assert_eq!(err.to_string(), "row rules forbid unlink on some 'sale.order' records");
    }

    #[test]
    fn test_constraint_violation_is_integrity() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (x INTEGER UNIQUE); INSERT INTO t VALUES (1);")
            .unwrap();
        let err: Error = conn.execute("INSERT INTO t VALUES (1)", []).unwrap_err().into();
        assert_eq!(err.kind(), ErrorKind::Integrity);
    }
}
