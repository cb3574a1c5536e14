//! Error types for parsing and sandboxed evaluation.

use std::time::Duration;

use crate::span::{offset_to_line_col, Span};
use thiserror::Error;

/// Error during lexing/parsing.
#[derive(Debug, Clone, PartialEq, Error)]
pub struct ParseError {
    /// The error message.
    pub message: String,
    /// Source span where the error occurred.
    pub span: Span,
    /// Optional hint for fixing the error.
    pub hint: Option<String>,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl ParseError {
    /// Create a new parse error.
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
            hint: None,
        }
    }

    /// Add a hint to the error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Format the error with source context.
    pub fn format_with_source(&self, source: &str) -> String {
        let (line, col) = offset_to_line_col(source, self.span.start);
        let mut result = format!("error: {}\n", self.message);
        result.push_str(&format!("  --> line {}:{}\n", line, col));

        if let Some(source_line) = source.lines().nth(line - 1) {
            result.push_str(&format!("   |\n{:3}| {}\n   |", line, source_line));
            for _ in 0..col {
                result.push(' ');
            }
            result.push('^');
            result.push('\n');
        }

        if let Some(hint) = &self.hint {
            result.push_str(&format!("   = hint: {}\n", hint));
        }

        result
    }
}

/// Errors raised while evaluating an expression in the sandbox.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SandboxError {
    /// The source did not parse.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// The source exceeds the configured length.
    #[error("expression is {len} bytes, limit is {limit}")]
    SourceTooLong { len: usize, limit: usize },

    /// Access to a name or attribute beginning with an underscore.
    #[error("access to private name '{0}' is not allowed")]
    PrivateName(String),

    /// Reference to a name absent from the scope.
    #[error("name '{0}' is not defined")]
    UnknownName(String),

    /// Attribute missing on a scope object.
    #[error("object has no attribute '{0}'")]
    UnknownAttribute(String),

    /// Call to a function outside the whitelist.
    #[error("call to '{0}' is not allowed")]
    ForbiddenCall(String),

    /// Operand types do not support the operation.
    #[error("type error: {0}")]
    Type(String),

    /// Overflow, division by zero or out-of-range index.
    #[error("arithmetic error: {0}")]
    Arithmetic(String),

    /// The evaluation step budget was exhausted.
    #[error("evaluation exceeded {0} steps")]
    StepLimit(u64),

    /// The wall-clock budget was exhausted.
    #[error("evaluation exceeded {0:?}")]
    Timeout(Duration),

    /// The result is not a valid domain.
    #[error("not a domain: {0}")]
    NotADomain(String),
}

/// Result type for sandbox evaluation.
pub type SandboxResult<T> = Result<T, SandboxError>;
