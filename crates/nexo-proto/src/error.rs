//! Protocol error types.

use thiserror::Error;

/// Errors raised while decoding wire-level structures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtoError {
    /// A domain token was neither an operator nor a leaf triple.
    #[error("malformed domain: {0}")]
    MalformedDomain(String),

    /// Unknown comparison operator in a domain leaf.
    #[error("unknown domain operator '{0}'")]
    UnknownOperator(String),

    /// A relational command did not match any known shape.
    #[error("malformed relational command: {0}")]
    MalformedCommand(String),

    /// A JSON value has no runtime value counterpart.
    #[error("unsupported value: {0}")]
    UnsupportedValue(String),
}

/// Result type for protocol decoding.
pub type ProtoResult<T> = Result<T, ProtoError>;
