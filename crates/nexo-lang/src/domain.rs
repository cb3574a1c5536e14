//! Conversion of evaluated expressions into domains.

use nexo_proto::{Domain, DomainTerm, Leaf, LogicOp, Operator, Value};

use crate::error::{SandboxError, SandboxResult};
use crate::eval::{self, Limits, Scope, SandboxValue};

/// Evaluate `source` and interpret the result as a domain.
///
/// The constant leaves `(1, '=', 1)` and `(0, '=', 1)` are accepted and
/// rewritten to always-true / always-false conditions on `id`.
pub fn eval_domain(source: &str, scope: &Scope, limits: &Limits) -> SandboxResult<Domain> {
    let value = eval::eval(source, scope, limits)?;
    to_domain(value)
}

/// Interpret an evaluated value as a domain.
pub fn to_domain(value: SandboxValue) -> SandboxResult<Domain> {
    let items = match value {
        SandboxValue::List(items) | SandboxValue::Tuple(items) => items,
        other => {
            return Err(SandboxError::NotADomain(format!(
                "expected a list of terms, got {other}"
            )))
        }
    };

    let mut terms = Vec::with_capacity(items.len());
    for item in items {
        terms.push(to_term(item)?);
    }
    Ok(Domain::from_terms(terms))
}

fn to_term(item: SandboxValue) -> SandboxResult<DomainTerm> {
    let parts = match item {
        SandboxValue::Str(token) => {
            return LogicOp::parse(&token)
                .map(DomainTerm::Op)
                .ok_or_else(|| SandboxError::NotADomain(format!("unknown operator token '{token}'")))
        }
        SandboxValue::List(parts) | SandboxValue::Tuple(parts) if parts.len() == 3 => parts,
        other => {
            return Err(SandboxError::NotADomain(format!(
                "expected an operator or a 3-item leaf, got {other}"
            )))
        }
    };

    let mut parts = parts.into_iter();
    let (field, operator, value) = match (parts.next(), parts.next(), parts.next()) {
        (Some(f), Some(o), Some(v)) => (f, o, v),
        _ => return Err(SandboxError::NotADomain("incomplete leaf".into())),
    };

    let operator = match operator {
        SandboxValue::Str(op) => op
            .parse::<Operator>()
            .map_err(|e| SandboxError::NotADomain(e.to_string()))?,
        other => {
            return Err(SandboxError::NotADomain(format!(
                "leaf operator must be a string, got {other}"
            )))
        }
    };

    let leaf = match (field, value) {
        (SandboxValue::Str(field), value) => Leaf::new(field, operator, to_value(value)?),
        (SandboxValue::Int(lhs), SandboxValue::Int(rhs)) if operator == Operator::Eq => {
            let always = if lhs == rhs { Operator::Ne } else { Operator::Eq };
            Leaf::new("id", always, Value::Null)
        }
        (other, _) => {
            return Err(SandboxError::NotADomain(format!(
                "leaf field must be a string, got {other}"
            )))
        }
    };
    Ok(DomainTerm::Leaf(leaf))
}

/// Convert a sandbox value into a runtime value.
pub fn to_value(value: SandboxValue) -> SandboxResult<Value> {
    Ok(match value {
        SandboxValue::None => Value::Null,
        SandboxValue::Bool(b) => Value::Bool(b),
        SandboxValue::Int(i) => Value::Int(i),
        SandboxValue::Float(f) => Value::Float(f),
        SandboxValue::Str(s) => Value::Text(s),
        SandboxValue::List(items) | SandboxValue::Tuple(items) => Value::List(
            items
                .into_iter()
                .map(to_value)
                .collect::<SandboxResult<Vec<_>>>()?,
        ),
        SandboxValue::Record(_) => {
            return Err(SandboxError::NotADomain(
                "records cannot be used as domain values".into(),
            ))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn scope() -> Scope {
        Scope::new()
            .with("user", SandboxValue::record([("id", SandboxValue::Int(5))]))
            .with("company_ids", SandboxValue::from(vec![1, 3]))
    }

    #[test]
    fn test_rule_domain() {
        let domain = eval_domain(
            "['|', ('user_id', '=', user.id), ('company_id', 'in', company_ids)]",
            &scope(),
            &Limits::default(),
        )
        .unwrap();

        let expected = Domain::new()
            .or()
            .leaf("user_id", Operator::Eq, 5i64)
            .leaf("company_id", Operator::In, vec![1i64, 3]);
        assert_eq!(domain, expected);
    }

    #[test]
    fn test_constant_leaves() {
        let domain = eval_domain("[(1, '=', 1)]", &scope(), &Limits::default()).unwrap();
        assert_eq!(domain, Domain::new().leaf("id", Operator::Ne, Value::Null));

        let domain = eval_domain("[(0, '=', 1)]", &scope(), &Limits::default()).unwrap();
        assert_eq!(domain, Domain::new().leaf("id", Operator::Eq, Value::Null));
    }

    #[test]
    fn test_rejects_non_domains() {
        let limits = Limits::default();
        assert!(matches!(eval_domain("42", &scope(), &limits), Err(SandboxError::NotADomain(_))));
        assert!(matches!(eval_domain("['x']", &scope(), &limits), Err(SandboxError::NotADomain(_))));
        assert!(matches!(
            eval_domain("[('a', '~', 1)]", &scope(), &limits),
            Err(SandboxError::NotADomain(_))
        ));
        assert!(matches!(
            eval_domain("[('a', '=', user)]", &scope(), &limits),
            Err(SandboxError::NotADomain(_))
        ));
    }
}
