//! `ORDER BY` validation.
//!
//! Order specifications arrive as text (`"name desc, id"`). Each term must
//! name a stored column of the model and an optional direction; anything
//! else is rejected so no caller text reaches the statement.

use std::fmt;

use super::params::quote;
use crate::catalog::ModelDef;
use crate::error::{Error, Result};

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderDirection {
    #[default]
    Asc,
    Desc,
}

impl fmt::Display for OrderDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderDirection::Asc => write!(f, "ASC"),
            OrderDirection::Desc => write!(f, "DESC"),
        }
    }
}

/// One validated sort key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderTerm {
    pub field: String,
    pub direction: OrderDirection,
}

impl OrderTerm {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: OrderDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: OrderDirection::Desc,
        }
    }
}

/// Parse and validate an order specification against `model`.
pub fn parse_order(model: &ModelDef, spec: &str) -> Result<Vec<OrderTerm>> {
    let mut terms = Vec::new();
    for raw in spec.split(',') {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        let mut parts = raw.split_whitespace();
        let field = parts.next().unwrap_or_default();
        let direction = match parts.next().map(str::to_ascii_lowercase).as_deref() {
            None | Some("asc") => OrderDirection::Asc,
            Some("desc") => OrderDirection::Desc,
            Some(other) => {
                return Err(Error::Validation(format!(
                    "invalid sort direction '{other}' in order '{spec}'"
                )))
            }
        };
        if parts.next().is_some() {
            return Err(Error::Validation(format!("invalid order term '{raw}'")));
        }

        let is_column = model.field(field).is_some_and(|f| f.is_column());
        if !is_column {
            return Err(Error::Validation(format!(
                "cannot order '{}' by '{field}'",
                model.name
            )));
        }
        terms.push(OrderTerm {
            field: field.to_string(),
            direction,
        });
    }

    if terms.is_empty() {
        return Err(Error::Validation(format!("empty order '{spec}'")));
    }
    Ok(terms)
}

/// Render validated terms as an `ORDER BY` list.
pub fn render_order(terms: &[OrderTerm]) -> String {
    terms
        .iter()
        .map(|t| format!("{} {}", quote(&t.field), t.direction))
        .collect::<Vec<_>>()
        .join(", ")
}
