//! Positional parameter builder and identifier helpers.

use nexo_proto::Value;

use crate::error::{Error, Result};

/// Collects the literal values of one statement and hands out their
/// placeholders (`$1`, `$2`, ...). Literals never enter the SQL text.
#[derive(Debug, Clone, Default)]
pub struct ParamBuilder {
    params: Vec<Value>,
}

impl ParamBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a value and return its placeholder.
    pub fn push(&mut self, value: impl Into<Value>) -> String {
        self.params.push(value.into());
        format!("${}", self.params.len())
    }

    /// Placeholders for several values, comma separated.
    pub fn push_all(&mut self, values: impl IntoIterator<Item = Value>) -> String {
        values
            .into_iter()
            .map(|v| self.push(v))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    pub fn into_params(self) -> Vec<Value> {
        self.params
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

/// Accept `[a-z_][a-z0-9_]*` only.
pub fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_lowercase() || first == '_')
                && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(Error::Validation(format!("invalid identifier '{name}'")))
    }
}

/// Double-quote a validated identifier.
pub fn quote(name: &str) -> String {
    format!("\"{name}\"")
}

/// `"table"."column"`.
pub fn qualified(table: &str, column: &str) -> String {
    format!("\"{table}\".\"{column}\"")
}
