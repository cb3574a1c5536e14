//! Predicate trees and their rendering.
//!
//! The domain compiler produces a [`Predicate`] without touching any
//! parameter list. Placeholders are assigned during [`Predicate::render`],
//! left to right in the output text, so the parameter order always matches
//! the textual order of the leaves.

use nexo_proto::Value;

use super::dialect::{Dialect, Flavor};
use super::params::ParamBuilder;

/// Scalar comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn as_sql(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }
}

/// How a `LIKE` pattern compares case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LikeCase {
    Sensitive,
    Insensitive,
}

/// A boolean SQL condition over quoted column names.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Always satisfied.
    True,
    /// Never satisfied.
    False,
    Compare {
        column: String,
        op: CompareOp,
        value: Value,
    },
    IsNull {
        column: String,
        negated: bool,
    },
    /// Non-empty membership list.
    InList {
        column: String,
        values: Vec<Value>,
        negated: bool,
    },
    Like {
        column: String,
        pattern: String,
        case: LikeCase,
        negated: bool,
        /// The pattern escapes `%`, `_` and `\` with a backslash.
        escaped: bool,
    },
    /// Normalized full-text match.
    TextSearch { column: String, query: String },
    /// `column [NOT] IN (SELECT select FROM table WHERE filter)`.
    InSelect {
        column: String,
        negated: bool,
        select: String,
        table: String,
        filter: Box<Predicate>,
    },
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    /// Conjunction, folding constant operands.
    pub fn and(self, other: Predicate) -> Predicate {
        match (self, other) {
            (Predicate::True, p) | (p, Predicate::True) => p,
            (Predicate::False, _) | (_, Predicate::False) => Predicate::False,
            (a, b) => Predicate::And(Box::new(a), Box::new(b)),
        }
    }

    /// Disjunction, folding constant operands.
    pub fn or(self, other: Predicate) -> Predicate {
        match (self, other) {
            (Predicate::False, p) | (p, Predicate::False) => p,
            (Predicate::True, _) | (_, Predicate::True) => Predicate::True,
            (a, b) => Predicate::Or(Box::new(a), Box::new(b)),
        }
    }

    /// Negation, folding constants.
    pub fn negate(self) -> Predicate {
        match self {
            Predicate::True => Predicate::False,
            Predicate::False => Predicate::True,
            Predicate::Not(inner) => *inner,
            p => Predicate::Not(Box::new(p)),
        }
    }

    /// AND of every predicate; `True` when empty.
    pub fn all(predicates: impl IntoIterator<Item = Predicate>) -> Predicate {
        predicates
            .into_iter()
            .fold(Predicate::True, Predicate::and)
    }

    pub fn is_true(&self) -> bool {
        matches!(self, Predicate::True)
    }

    pub fn is_false(&self) -> bool {
        matches!(self, Predicate::False)
    }

    /// Render to SQL, pushing literals into `params` in textual order.
    pub fn render(&self, dialect: &Dialect, params: &mut ParamBuilder) -> String {
        match self {
            Predicate::True => "1=1".to_string(),
            Predicate::False => "0=1".to_string(),
            Predicate::Compare { column, op, value } => {
                let ph = params.push(value.clone());
                format!("{column} {} {ph}", op.as_sql())
            }
            Predicate::IsNull { column, negated } => {
                if *negated {
                    format!("{column} IS NOT NULL")
                } else {
                    format!("{column} IS NULL")
                }
            }
            Predicate::InList {
                column,
                values,
                negated,
            } => {
                let list = params.push_all(values.iter().cloned());
                let not = if *negated { "NOT " } else { "" };
                format!("{column} {not}IN ({list})")
            }
            Predicate::Like {
                column,
                pattern,
                case,
                negated,
                escaped,
            } => {
                let ph = params.push(pattern.clone());
                let escape = if *escaped { dialect.like_escape() } else { "" };
                match case {
                    LikeCase::Insensitive => format!("{}{escape}", dialect.ilike(column, &ph, *negated)),
                    LikeCase::Sensitive => {
                        let not = if *negated { "NOT " } else { "" };
                        format!("{column} {not}LIKE {ph}{escape}")
                    }
                }
            }
            Predicate::TextSearch { column, query } => match dialect.flavor {
                Flavor::Sqlite => {
                    let ph = params.push(format!("%{}%", escape_like(&query.to_lowercase())));
                    format!("lower({column}) LIKE {ph}{}", dialect.like_escape())
                }
                Flavor::Postgres => {
                    let doc_lang = params.push(dialect.text_search_language());
                    let query_lang = params.push(dialect.text_search_language());
                    let q = params.push(query.clone());
                    format!(
                        "to_tsvector(CAST({doc_lang} AS regconfig), {column}) @@ plainto_tsquery(CAST({query_lang} AS regconfig), {q})"
                    )
                }
            },
            Predicate::InSelect {
                column,
                negated,
                select,
                table,
                filter,
            } => {
                let not = if *negated { "NOT " } else { "" };
                let inner = filter.render(dialect, params);
                format!("{column} {not}IN (SELECT {select} FROM {table} WHERE {inner})")
            }
            Predicate::And(a, b) => {
                let a = a.render(dialect, params);
                let b = b.render(dialect, params);
                format!("({a} AND {b})")
            }
            Predicate::Or(a, b) => {
                let a = a.render(dialect, params);
                let b = b.render(dialect, params);
                format!("({a} OR {b})")
            }
            Predicate::Not(inner) => format!("(NOT {})", inner.render(dialect, params)),
        }
    }
}

/// Escape `LIKE` metacharacters with a backslash.
pub fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Collapse whitespace in a text search query.
pub fn normalize_query(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ")
}
