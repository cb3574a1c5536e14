//! Nexo rule-expression sandbox.
//!
//! Row rules carry their domain as source text evaluated against the acting
//! user. This crate parses and evaluates that text under strict limits:
//!
//! - only literals, lists, tuples, arithmetic, comparisons and boolean logic;
//! - attribute access on the objects placed in the [`Scope`];
//! - a fixed set of functions (`len`, `str`, `int`, `float`, `bool`, `abs`,
//!   `min`, `max`, `now`, `today`, `context_today`, `time.strftime`);
//! - no name or attribute beginning with `_`;
//! - a step budget and a wall-clock budget ([`Limits`]).
//!
//! # Usage
//!
//! ```rust
//! use nexo_lang::{eval_domain, Limits, SandboxValue, Scope};
//!
//! let scope = Scope::new().with("user", SandboxValue::record([("id", SandboxValue::Int(2))]));
//! let domain = eval_domain("[('user_id', '=', user.id)]", &scope, &Limits::default()).unwrap();
//! assert_eq!(domain.len(), 1);
//! ```

pub mod ast;
pub mod domain;
pub mod error;
pub mod eval;
pub mod lexer;
pub mod parser;
pub mod span;

pub use ast::{BinaryOp, Expr, ExprKind, UnaryOp};
pub use domain::{eval_domain, to_domain, to_value};
pub use error::{ParseError, SandboxError, SandboxResult};
pub use eval::{eval, Evaluator, Limits, SandboxValue, Scope};
pub use span::Span;

/// Parse a source string into an expression tree.
///
/// # Example
///
/// ```rust
/// use nexo_lang::parse;
///
/// let expr = parse("[('state', '=', 'done')]").unwrap();
/// ```
pub fn parse(source: &str) -> Result<Expr, ParseError> {
    parser::parse(source)
}
