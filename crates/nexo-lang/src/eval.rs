//! Bounded evaluation of rule expressions.
//!
//! The evaluator walks the syntax tree directly. Every node visit costs one
//! step; the step budget and the wall-clock deadline in [`Limits`] are
//! checked as it goes, so a hostile expression cannot run unbounded.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

use chrono::format::{Item, StrftimeItems};
use chrono::{NaiveDateTime, Utc};

use crate::ast::{BinaryOp, Expr, ExprKind, UnaryOp};
use crate::error::{SandboxError, SandboxResult};
use crate::parser;

/// Default step budget.
pub const DEFAULT_MAX_STEPS: u64 = 10_000;

/// Default wall-clock budget.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(50);

/// Default maximum source length in bytes.
pub const DEFAULT_MAX_SOURCE_LEN: usize = 16 * 1024;

/// Execution budget for one evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct Limits {
    pub max_steps: u64,
    pub timeout: Duration,
    pub max_source_len: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            timeout: DEFAULT_TIMEOUT,
            max_source_len: DEFAULT_MAX_SOURCE_LEN,
        }
    }
}

impl Limits {
    /// Set the step budget.
    pub fn with_max_steps(mut self, steps: u64) -> Self {
        self.max_steps = steps;
        self
    }

    /// Set the wall-clock budget.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A value produced or consumed by the sandbox.
#[derive(Debug, Clone, PartialEq)]
pub enum SandboxValue {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<SandboxValue>),
    Tuple(Vec<SandboxValue>),
    /// Read-only object exposing named attributes (`user`, `company`).
    Record(BTreeMap<String, SandboxValue>),
}

impl SandboxValue {
    /// Build a record from `(name, value)` pairs.
    pub fn record<K: Into<String>>(fields: impl IntoIterator<Item = (K, SandboxValue)>) -> Self {
        SandboxValue::Record(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Python truthiness.
    pub fn truthy(&self) -> bool {
        match self {
            SandboxValue::None => false,
            SandboxValue::Bool(b) => *b,
            SandboxValue::Int(i) => *i != 0,
            SandboxValue::Float(f) => *f != 0.0,
            SandboxValue::Str(s) => !s.is_empty(),
            SandboxValue::List(items) | SandboxValue::Tuple(items) => !items.is_empty(),
            SandboxValue::Record(_) => true,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            SandboxValue::None => "None",
            SandboxValue::Bool(_) => "bool",
            SandboxValue::Int(_) => "int",
            SandboxValue::Float(_) => "float",
            SandboxValue::Str(_) => "str",
            SandboxValue::List(_) => "list",
            SandboxValue::Tuple(_) => "tuple",
            SandboxValue::Record(_) => "record",
        }
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            SandboxValue::Int(i) => Some(*i as f64),
            SandboxValue::Float(f) => Some(*f),
            SandboxValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }
}

impl From<i64> for SandboxValue {
    fn from(v: i64) -> Self {
        SandboxValue::Int(v)
    }
}

impl From<&str> for SandboxValue {
    fn from(v: &str) -> Self {
        SandboxValue::Str(v.to_string())
    }
}

impl From<Vec<i64>> for SandboxValue {
    fn from(v: Vec<i64>) -> Self {
        SandboxValue::List(v.into_iter().map(SandboxValue::Int).collect())
    }
}

impl fmt::Display for SandboxValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SandboxValue::None => write!(f, "None"),
            SandboxValue::Bool(true) => write!(f, "True"),
            SandboxValue::Bool(false) => write!(f, "False"),
            SandboxValue::Int(i) => write!(f, "{i}"),
            SandboxValue::Float(x) => write!(f, "{x}"),
            SandboxValue::Str(s) => write!(f, "{s}"),
            SandboxValue::List(items) => {
                let parts: Vec<String> = items.iter().map(|i| i.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            SandboxValue::Tuple(items) => {
                let parts: Vec<String> = items.iter().map(|i| i.to_string()).collect();
                write!(f, "({})", parts.join(", "))
            }
            SandboxValue::Record(_) => write!(f, "<record>"),
        }
    }
}

/// Names visible to an expression, plus the evaluation clock.
#[derive(Debug, Clone)]
pub struct Scope {
    names: BTreeMap<String, SandboxValue>,
    now: NaiveDateTime,
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl Scope {
    /// An empty scope at the current UTC time.
    pub fn new() -> Self {
        Self {
            names: BTreeMap::new(),
            now: Utc::now().naive_utc(),
        }
    }

    /// Bind a name.
    pub fn with(mut self, name: impl Into<String>, value: SandboxValue) -> Self {
        self.names.insert(name.into(), value);
        self
    }

    /// Fix the clock used by `time.strftime`, `now()` and `today()`.
    pub fn with_now(mut self, now: NaiveDateTime) -> Self {
        self.now = now;
        self
    }

    fn lookup(&self, name: &str) -> SandboxResult<&SandboxValue> {
        self.names
            .get(name)
            .ok_or_else(|| SandboxError::UnknownName(name.to_string()))
    }
}

/// Tree-walking evaluator with a step and time budget.
pub struct Evaluator<'a> {
    scope: &'a Scope,
    limits: &'a Limits,
    steps: u64,
    started: Instant,
}

impl<'a> Evaluator<'a> {
    /// Create an evaluator; the clock starts now.
    pub fn new(scope: &'a Scope, limits: &'a Limits) -> Self {
        Self {
            scope,
            limits,
            steps: 0,
            started: Instant::now(),
        }
    }

    /// Steps consumed so far.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    fn charge(&mut self, cost: u64) -> SandboxResult<()> {
        self.steps = self.steps.saturating_add(cost);
        if self.steps > self.limits.max_steps {
            return Err(SandboxError::StepLimit(self.limits.max_steps));
        }
        if self.started.elapsed() >= self.limits.timeout {
            return Err(SandboxError::Timeout(self.limits.timeout));
        }
        Ok(())
    }

    /// Evaluate one expression.
    pub fn eval(&mut self, expr: &Expr) -> SandboxResult<SandboxValue> {
        self.charge(1)?;
        match &expr.kind {
            ExprKind::None => Ok(SandboxValue::None),
            ExprKind::Bool(b) => Ok(SandboxValue::Bool(*b)),
            ExprKind::Int(i) => Ok(SandboxValue::Int(*i)),
            ExprKind::Float(f) => Ok(SandboxValue::Float(*f)),
            ExprKind::Str(s) => Ok(SandboxValue::Str(s.clone())),
            ExprKind::List(items) => Ok(SandboxValue::List(self.eval_all(items)?)),
            ExprKind::Tuple(items) => Ok(SandboxValue::Tuple(self.eval_all(items)?)),
            ExprKind::Name(name) => {
                check_public(name)?;
                self.scope.lookup(name).cloned()
            }
            ExprKind::Attr(base, attr) => {
                check_public(attr)?;
                match self.eval(base)? {
                    SandboxValue::Record(fields) => fields
                        .get(attr)
                        .cloned()
                        .ok_or_else(|| SandboxError::UnknownAttribute(attr.clone())),
                    other => Err(SandboxError::Type(format!(
                        "'{}' has no attribute '{attr}'",
                        other.type_name()
                    ))),
                }
            }
            ExprKind::Index(base, index) => {
                let base = self.eval(base)?;
                let index = self.eval(index)?;
                eval_index(base, index)
            }
            ExprKind::Call(callee, args) => self.eval_call(callee, args),
            ExprKind::Unary(op, operand) => {
                let value = self.eval(operand)?;
                eval_unary(*op, value)
            }
            ExprKind::Binary(BinaryOp::And, left, right) => {
                let left = self.eval(left)?;
                if left.truthy() {
                    self.eval(right)
                } else {
                    Ok(left)
                }
            }
            ExprKind::Binary(BinaryOp::Or, left, right) => {
                let left = self.eval(left)?;
                if left.truthy() {
                    Ok(left)
                } else {
                    self.eval(right)
                }
            }
            ExprKind::Binary(op, left, right) => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                self.eval_binary(*op, left, right)
            }
        }
    }

    fn eval_all(&mut self, items: &[Expr]) -> SandboxResult<Vec<SandboxValue>> {
        items.iter().map(|item| self.eval(item)).collect()
    }

    fn eval_call(&mut self, callee: &Expr, args: &[Expr]) -> SandboxResult<SandboxValue> {
        let path = callee
            .kind
            .callee_path()
            .ok_or_else(|| SandboxError::ForbiddenCall("<expression>".into()))?;
        for part in path.split('.') {
            check_public(part)?;
        }
        let args = self.eval_all(args)?;

        match (path.as_str(), args.as_slice()) {
            ("len", [SandboxValue::Str(s)]) => Ok(SandboxValue::Int(s.chars().count() as i64)),
            ("len", [SandboxValue::List(items)]) | ("len", [SandboxValue::Tuple(items)]) => {
                Ok(SandboxValue::Int(items.len() as i64))
            }
            ("str", [value]) => Ok(SandboxValue::Str(value.to_string())),
            ("bool", [value]) => Ok(SandboxValue::Bool(value.truthy())),
            ("int", [SandboxValue::Int(i)]) => Ok(SandboxValue::Int(*i)),
            ("int", [SandboxValue::Float(f)]) => Ok(SandboxValue::Int(f.trunc() as i64)),
            ("int", [SandboxValue::Str(s)]) => s
                .trim()
                .parse::<i64>()
                .map(SandboxValue::Int)
                .map_err(|_| SandboxError::Type(format!("invalid literal for int(): '{s}'"))),
            ("float", [value]) => value
                .as_number()
                .map(SandboxValue::Float)
                .ok_or_else(|| SandboxError::Type(format!("float() of {}", value.type_name()))),
            ("abs", [SandboxValue::Int(i)]) => i
                .checked_abs()
                .map(SandboxValue::Int)
                .ok_or_else(|| SandboxError::Arithmetic("integer overflow".into())),
            ("abs", [SandboxValue::Float(f)]) => Ok(SandboxValue::Float(f.abs())),
            ("min", [SandboxValue::List(items)]) | ("min", [SandboxValue::Tuple(items)]) => {
                self.extremum(items, std::cmp::Ordering::Less)
            }
            ("max", [SandboxValue::List(items)]) | ("max", [SandboxValue::Tuple(items)]) => {
                self.extremum(items, std::cmp::Ordering::Greater)
            }
            ("now", []) => Ok(SandboxValue::Str(
                self.scope.now.format("%Y-%m-%d %H:%M:%S").to_string(),
            )),
            ("today", []) | ("context_today", []) => {
                Ok(SandboxValue::Str(self.scope.now.format("%Y-%m-%d").to_string()))
            }
            ("time.strftime", [SandboxValue::Str(fmt)]) => {
                let items: Vec<Item<'_>> = StrftimeItems::new(fmt).collect();
                if items.iter().any(|item| matches!(item, Item::Error)) {
                    return Err(SandboxError::Type(format!("invalid time format '{fmt}'")));
                }
                Ok(SandboxValue::Str(
                    self.scope.now.format_with_items(items.iter()).to_string(),
                ))
            }
            _ => Err(SandboxError::ForbiddenCall(path)),
        }
    }

    fn extremum(
        &mut self,
        items: &[SandboxValue],
        wanted: std::cmp::Ordering,
    ) -> SandboxResult<SandboxValue> {
        self.charge(items.len() as u64)?;
        let mut iter = items.iter();
        let mut best = iter
            .next()
            .ok_or_else(|| SandboxError::Type("min()/max() of an empty sequence".into()))?;
        for item in iter {
            if compare(item, best)? == wanted {
                best = item;
            }
        }
        Ok(best.clone())
    }

    fn eval_binary(
        &mut self,
        op: BinaryOp,
        left: SandboxValue,
        right: SandboxValue,
    ) -> SandboxResult<SandboxValue> {
        use SandboxValue as V;
        match op {
            BinaryOp::Eq => Ok(V::Bool(values_equal(&left, &right))),
            BinaryOp::Ne => Ok(V::Bool(!values_equal(&left, &right))),
            BinaryOp::Lt => Ok(V::Bool(compare(&left, &right)?.is_lt())),
            BinaryOp::Le => Ok(V::Bool(compare(&left, &right)?.is_le())),
            BinaryOp::Gt => Ok(V::Bool(compare(&left, &right)?.is_gt())),
            BinaryOp::Ge => Ok(V::Bool(compare(&left, &right)?.is_ge())),
            BinaryOp::In | BinaryOp::NotIn => {
                let found = match &right {
                    V::List(items) | V::Tuple(items) => {
                        self.charge(items.len() as u64)?;
                        items.iter().any(|item| values_equal(item, &left))
                    }
                    V::Str(haystack) => match &left {
                        V::Str(needle) => haystack.contains(needle.as_str()),
                        other => {
                            return Err(SandboxError::Type(format!(
                                "'in <str>' requires str, not {}",
                                other.type_name()
                            )))
                        }
                    },
                    other => {
                        return Err(SandboxError::Type(format!(
                            "argument of type '{}' is not iterable",
                            other.type_name()
                        )))
                    }
                };
                Ok(V::Bool(if op == BinaryOp::In { found } else { !found }))
            }
            BinaryOp::Add => match (left, right) {
                (V::Int(a), V::Int(b)) => a
                    .checked_add(b)
                    .map(V::Int)
                    .ok_or_else(|| SandboxError::Arithmetic("integer overflow".into())),
                (V::Str(a), V::Str(b)) => {
                    self.charge((a.len() + b.len()) as u64 / 64)?;
                    Ok(V::Str(a + &b))
                }
                (V::List(mut a), V::List(b)) => {
                    self.charge(b.len() as u64)?;
                    a.extend(b);
                    Ok(V::List(a))
                }
                (V::Tuple(mut a), V::Tuple(b)) => {
                    self.charge(b.len() as u64)?;
                    a.extend(b);
                    Ok(V::Tuple(a))
                }
                (l, r) => float_op(&l, &r, "+", |a, b| a + b),
            },
            BinaryOp::Sub => match (left, right) {
                (V::Int(a), V::Int(b)) => a
                    .checked_sub(b)
                    .map(V::Int)
                    .ok_or_else(|| SandboxError::Arithmetic("integer overflow".into())),
                (l, r) => float_op(&l, &r, "-", |a, b| a - b),
            },
            BinaryOp::Mul => match (left, right) {
                (V::Int(a), V::Int(b)) => a
                    .checked_mul(b)
                    .map(V::Int)
                    .ok_or_else(|| SandboxError::Arithmetic("integer overflow".into())),
                (l, r) => float_op(&l, &r, "*", |a, b| a * b),
            },
            BinaryOp::Div => {
                let divisor = right.as_number();
                if divisor == Some(0.0) {
                    return Err(SandboxError::Arithmetic("division by zero".into()));
                }
                float_op(&left, &right, "/", |a, b| a / b)
            }
            BinaryOp::Mod => match (left, right) {
                (V::Int(_), V::Int(0)) => Err(SandboxError::Arithmetic("modulo by zero".into())),
                (V::Int(a), V::Int(b)) => a
                    .checked_rem_euclid(b)
                    .map(V::Int)
                    .ok_or_else(|| SandboxError::Arithmetic("integer overflow".into())),
                (l, r) => Err(SandboxError::Type(format!(
                    "unsupported operand types for %: '{}' and '{}'",
                    l.type_name(),
                    r.type_name()
                ))),
            },
            BinaryOp::And | BinaryOp::Or => Err(SandboxError::Type(format!("{op:?} is not an arithmetic operator"))),
        }
    }
}

fn check_public(name: &str) -> SandboxResult<()> {
    if name.starts_with('_') {
        return Err(SandboxError::PrivateName(name.to_string()));
    }
    Ok(())
}

fn eval_unary(op: UnaryOp, value: SandboxValue) -> SandboxResult<SandboxValue> {
    match (op, value) {
        (UnaryOp::Not, v) => Ok(SandboxValue::Bool(!v.truthy())),
        (UnaryOp::Neg, SandboxValue::Int(i)) => i
            .checked_neg()
            .map(SandboxValue::Int)
            .ok_or_else(|| SandboxError::Arithmetic("integer overflow".into())),
        (UnaryOp::Neg, SandboxValue::Float(f)) => Ok(SandboxValue::Float(-f)),
        (UnaryOp::Pos, v @ (SandboxValue::Int(_) | SandboxValue::Float(_))) => Ok(v),
        (_, v) => Err(SandboxError::Type(format!(
            "bad operand type for unary operator: '{}'",
            v.type_name()
        ))),
    }
}

fn eval_index(base: SandboxValue, index: SandboxValue) -> SandboxResult<SandboxValue> {
    let (items, i) = match (base, index) {
        (SandboxValue::List(items) | SandboxValue::Tuple(items), SandboxValue::Int(i)) => (items, i),
        (base, index) => {
            return Err(SandboxError::Type(format!(
                "'{}' indices must be integers on a list or tuple, got '{}'",
                base.type_name(),
                index.type_name()
            )))
        }
    };
    let len = items.len() as i64;
    let position = if i < 0 { len + i } else { i };
    if position < 0 || position >= len {
        return Err(SandboxError::Arithmetic(format!("index {i} out of range")));
    }
    Ok(items[position as usize].clone())
}

fn float_op(
    left: &SandboxValue,
    right: &SandboxValue,
    symbol: &str,
    f: impl Fn(f64, f64) -> f64,
) -> SandboxResult<SandboxValue> {
    match (left.as_number(), right.as_number()) {
        (Some(a), Some(b)) => Ok(SandboxValue::Float(f(a, b))),
        _ => Err(SandboxError::Type(format!(
            "unsupported operand types for {symbol}: '{}' and '{}'",
            left.type_name(),
            right.type_name()
        ))),
    }
}

fn values_equal(left: &SandboxValue, right: &SandboxValue) -> bool {
    match (left, right) {
        (SandboxValue::List(a), SandboxValue::List(b))
        | (SandboxValue::Tuple(a), SandboxValue::Tuple(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        _ => match (left.as_number(), right.as_number()) {
            (Some(a), Some(b)) => a == b,
            _ => left == right,
        },
    }
}

fn compare(left: &SandboxValue, right: &SandboxValue) -> SandboxResult<std::cmp::Ordering> {
    if let (SandboxValue::Str(a), SandboxValue::Str(b)) = (left, right) {
        return Ok(a.cmp(b));
    }
    match (left.as_number(), right.as_number()) {
        (Some(a), Some(b)) => a
            .partial_cmp(&b)
            .ok_or_else(|| SandboxError::Arithmetic("comparison with NaN".into())),
        _ => Err(SandboxError::Type(format!(
            "'<' not supported between '{}' and '{}'",
            left.type_name(),
            right.type_name()
        ))),
    }
}

/// Parse and evaluate `source` within `limits`.
pub fn eval(source: &str, scope: &Scope, limits: &Limits) -> SandboxResult<SandboxValue> {
    if source.len() > limits.max_source_len {
        return Err(SandboxError::SourceTooLong {
            len: source.len(),
            limit: limits.max_source_len,
        });
    }
    let expr = parser::parse(source)?;
    Evaluator::new(scope, limits).eval(&expr)
}
