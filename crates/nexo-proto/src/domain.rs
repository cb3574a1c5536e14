//! Prefix-notation boolean filters ("domains").
//!
//! A domain is an ordered list mixing leaf triples `[field, operator, value]`
//! with the operator tokens `"&"`, `"|"` and `"!"` in prefix position.
//! Adjacent leaves without an explicit operator are implicitly AND-ed.
//!
//! ```
//! use nexo_proto::{Domain, Operator};
//! use serde_json::json;
//!
//! let domain = Domain::from_json(&json!(["|", ["a", "=", 1], ["b", "=", 2]])).unwrap();
//! assert_eq!(domain.len(), 3);
//!
//! let built = Domain::new()
//!     .or()
//!     .leaf("a", Operator::Eq, 1)
//!     .leaf("b", Operator::Eq, 2);
//! assert_eq!(built, domain);
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{ProtoError, ProtoResult};
use crate::value::Value;

/// Boolean operator token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicOp {
    /// `&`
    And,
    /// `|`
    Or,
    /// `!`
    Not,
}

impl LogicOp {
    /// Number of operands the operator consumes.
    pub fn arity(self) -> usize {
        match self {
            LogicOp::And | LogicOp::Or => 2,
            LogicOp::Not => 1,
        }
    }

    /// Wire token.
    pub fn as_str(self) -> &'static str {
        match self {
            LogicOp::And => "&",
            LogicOp::Or => "|",
            LogicOp::Not => "!",
        }
    }

    /// Parse a wire token.
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "&" => Some(LogicOp::And),
            "|" => Some(LogicOp::Or),
            "!" => Some(LogicOp::Not),
            _ => None,
        }
    }
}

/// Comparison operator of a leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// Substring match, case-sensitive.
    Like,
    NotLike,
    /// Substring match, case-insensitive.
    ILike,
    NotILike,
    /// Raw pattern match, case-sensitive.
    EqLike,
    /// Raw pattern match, case-insensitive.
    EqILike,
    In,
    NotIn,
    /// Normalized full-text search.
    TextSearch,
}

impl Operator {
    /// Wire spelling of the operator.
    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Like => "like",
            Operator::NotLike => "not like",
            Operator::ILike => "ilike",
            Operator::NotILike => "not ilike",
            Operator::EqLike => "=like",
            Operator::EqILike => "=ilike",
            Operator::In => "in",
            Operator::NotIn => "not in",
            Operator::TextSearch => "@@",
        }
    }

    /// Whether the operator expects a collection on the right-hand side.
    pub fn is_membership(self) -> bool {
        matches!(self, Operator::In | Operator::NotIn)
    }

    /// Whether the operator is a negative form.
    pub fn is_negative(self) -> bool {
        matches!(
            self,
            Operator::Ne | Operator::NotLike | Operator::NotILike | Operator::NotIn
        )
    }
}

impl FromStr for Operator {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Ok(match normalized.as_str() {
            "=" | "==" => Operator::Eq,
            "!=" | "<>" => Operator::Ne,
            "<" => Operator::Lt,
            "<=" => Operator::Le,
            ">" => Operator::Gt,
            ">=" => Operator::Ge,
            "like" => Operator::Like,
            "not like" => Operator::NotLike,
            "ilike" => Operator::ILike,
            "not ilike" => Operator::NotILike,
            "=like" => Operator::EqLike,
            "=ilike" => Operator::EqILike,
            "in" => Operator::In,
            "not in" => Operator::NotIn,
            "@@" | "search" => Operator::TextSearch,
            _ => return Err(ProtoError::UnknownOperator(s.to_string())),
        })
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `(field, operator, value)` triple.
#[derive(Debug, Clone, PartialEq)]
pub struct Leaf {
    /// Field name, possibly a dotted path through relations.
    pub field: String,
    pub operator: Operator,
    pub value: Value,
}

impl Leaf {
    /// Create a new leaf.
    pub fn new(field: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }
}

/// One token of a domain.
#[derive(Debug, Clone, PartialEq)]
pub enum DomainTerm {
    Op(LogicOp),
    Leaf(Leaf),
}

/// An ordered prefix-notation filter.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Domain {
    terms: Vec<DomainTerm>,
}

impl Domain {
    /// The empty domain, matching every record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a domain from raw terms.
    pub fn from_terms(terms: Vec<DomainTerm>) -> Self {
        Self { terms }
    }

    /// Append a leaf.
    pub fn leaf(mut self, field: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        self.terms.push(DomainTerm::Leaf(Leaf::new(field, operator, value)));
        self
    }

    /// Append an explicit `&`.
    pub fn and(mut self) -> Self {
        self.terms.push(DomainTerm::Op(LogicOp::And));
        self
    }

    /// Append an explicit `|`.
    pub fn or(mut self) -> Self {
        self.terms.push(DomainTerm::Op(LogicOp::Or));
        self
    }

    /// Append an explicit `!`.
    pub fn not(mut self) -> Self {
        self.terms.push(DomainTerm::Op(LogicOp::Not));
        self
    }

    /// The raw token sequence.
    pub fn terms(&self) -> &[DomainTerm] {
        &self.terms
    }

    /// Number of tokens.
    pub fn len(&self) -> usize {
        self.terms.len()
    }

    /// Whether the domain has no tokens.
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Iterate over the leaves in textual order.
    pub fn leaves(&self) -> impl Iterator<Item = &Leaf> {
        self.terms.iter().filter_map(|t| match t {
            DomainTerm::Leaf(leaf) => Some(leaf),
            DomainTerm::Op(_) => None,
        })
    }

    /// Decode the JSON wire form.
    pub fn from_json(json: &serde_json::Value) -> ProtoResult<Self> {
        let items = json
            .as_array()
            .ok_or_else(|| ProtoError::MalformedDomain(format!("expected a list, got {json}")))?;

        let mut terms = Vec::with_capacity(items.len());
        for item in items {
            terms.push(parse_term(item)?);
        }
        Ok(Self { terms })
    }

    /// Encode to the JSON wire form.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Array(
            self.terms
                .iter()
                .map(|term| match term {
                    DomainTerm::Op(op) => serde_json::Value::String(op.as_str().to_string()),
                    DomainTerm::Leaf(leaf) => serde_json::json!([
                        leaf.field,
                        leaf.operator.as_str(),
                        leaf.value.to_json()
                    ]),
                })
                .collect(),
        )
    }
}

fn parse_term(item: &serde_json::Value) -> ProtoResult<DomainTerm> {
    if let Some(token) = item.as_str() {
        return LogicOp::parse(token)
            .map(DomainTerm::Op)
            .ok_or_else(|| ProtoError::MalformedDomain(format!("unknown token '{token}'")));
    }

    let triple = match item.as_array() {
        Some(parts) if parts.len() == 3 => parts,
        _ => {
            return Err(ProtoError::MalformedDomain(format!(
                "expected an operator or a [field, operator, value] triple, got {item}"
            )))
        }
    };

    let field = triple[0]
        .as_str()
        .ok_or_else(|| ProtoError::MalformedDomain(format!("leaf field must be a string: {item}")))?;
    let operator = triple[1]
        .as_str()
        .ok_or_else(|| ProtoError::MalformedDomain(format!("leaf operator must be a string: {item}")))?
        .parse::<Operator>()?;
    let value = Value::from_json(&triple[2])?;

    Ok(DomainTerm::Leaf(Leaf::new(field, operator, value)))
}

impl Serialize for Domain {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Domain {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = serde_json::Value::deserialize(deserializer)?;
        Domain::from_json(&json).map_err(serde::de::Error::custom)
    }
}
