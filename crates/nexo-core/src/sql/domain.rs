//! Domain compiler.
//!
//! A domain is normalized first (implicit `&` inserted between adjacent
//! operands), then evaluated right to left with an operand stack: leaves
//! push a compiled predicate, `!` pops one operand, `&` and `|` pop two.
//! Popping restores the textual order of the operands, so
//! `["|", a, b]` becomes `(a OR b)`.

use nexo_proto::{Domain, DomainTerm, Leaf, LogicOp, Operator, Value};

use super::params::quote;
use super::predicate::{escape_like, normalize_query, CompareOp, LikeCase, Predicate};
use crate::catalog::{FieldDef, FieldKind, ModelDef, Registry, Storage, ID_FIELD};
use crate::error::{Error, Result};

/// Insert the implicit `&` operators of a domain.
pub fn normalize_domain(domain: &Domain) -> Result<Vec<DomainTerm>> {
    let mut result: Vec<DomainTerm> = Vec::with_capacity(domain.len() * 2);
    let mut expected: usize = 1;

    for term in domain.terms() {
        if expected == 0 {
            result.insert(0, DomainTerm::Op(LogicOp::And));
            expected = 1;
        }
        match term {
            DomainTerm::Leaf(_) => expected -= 1,
            DomainTerm::Op(op) => expected += op.arity() - 1,
        }
        result.push(term.clone());
    }

    if !domain.is_empty() && expected != 0 {
        return Err(Error::Validation(format!(
            "malformed domain: {expected} operand(s) missing"
        )));
    }
    Ok(result)
}

/// Compile `domain` against `model`.
pub fn compile_domain(registry: &Registry, model: &ModelDef, domain: &Domain) -> Result<Predicate> {
    DomainCompiler::new(registry).compile(model, domain)
}

/// Compiles domains into predicate trees, resolving relational paths
/// through the registry.
#[derive(Debug, Clone, Copy)]
pub struct DomainCompiler<'a> {
    registry: &'a Registry,
}

impl<'a> DomainCompiler<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self { registry }
    }

    /// Compile a whole domain. The empty domain matches everything.
    pub fn compile(&self, model: &ModelDef, domain: &Domain) -> Result<Predicate> {
        let terms = normalize_domain(domain)?;
        let mut stack: Vec<Predicate> = Vec::with_capacity(terms.len());

        for term in terms.iter().rev() {
            match term {
                DomainTerm::Leaf(leaf) => stack.push(self.compile_leaf(model, leaf)?),
                DomainTerm::Op(LogicOp::Not) => {
                    let operand = pop(&mut stack)?;
                    stack.push(operand.negate());
                }
                DomainTerm::Op(op) => {
                    let left = pop(&mut stack)?;
                    let right = pop(&mut stack)?;
                    stack.push(match op {
                        LogicOp::And => left.and(right),
                        _ => left.or(right),
                    });
                }
            }
        }

        match (stack.pop(), stack.is_empty()) {
            (None, _) => Ok(Predicate::True),
            (Some(predicate), true) => Ok(predicate),
            (Some(_), false) => Err(Error::Validation("malformed domain: dangling operands".into())),
        }
    }

    /// Compile one `(field, operator, value)` leaf.
    pub fn compile_leaf(&self, model: &ModelDef, leaf: &Leaf) -> Result<Predicate> {
        let (head, rest) = match leaf.field.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (leaf.field.as_str(), None),
        };
        let field = model.require_field(head)?;

        if let Some(rest) = rest {
            let sub = Leaf::new(rest, leaf.operator, leaf.value.clone());
            return self.compile_path(model, field, &sub);
        }

        match &field.storage {
            Storage::Inverse | Storage::Pivot(_) => self.compile_x2many(model, field, leaf),
            Storage::Column => {
                if matches!(field.kind, FieldKind::Many2one { .. }) && names_a_record(leaf) {
                    return self.compile_by_name(model, field, leaf);
                }
                compile_column(field, leaf.operator, &leaf.value)
            }
            Storage::Computed | Storage::Attachment => Err(Error::Validation(format!(
                "field {}.{} is not stored and cannot be searched",
                model.name, field.name
            ))),
        }
    }

    /// `head.rest op value` through a relational field.
    fn compile_path(&self, model: &ModelDef, field: &FieldDef, sub: &Leaf) -> Result<Predicate> {
        let comodel = self.comodel(model, field)?;
        let filter = self.compile_leaf(comodel, sub)?;
        self.related_ids(model, field, comodel, filter, false)
    }

    /// Records of `model` related through `field` to comodel rows matching
    /// `filter`.
    fn related_ids(
        &self,
        model: &ModelDef,
        field: &FieldDef,
        comodel: &ModelDef,
        filter: Predicate,
        negated: bool,
    ) -> Result<Predicate> {
        Ok(match (&field.kind, &field.storage) {
            (FieldKind::Many2one { .. }, _) => Predicate::InSelect {
                column: quote(&field.name),
                negated,
                select: quote(ID_FIELD),
                table: quote(&comodel.table),
                filter: Box::new(filter),
            },
            (FieldKind::One2many { inverse, .. }, _) => Predicate::InSelect {
                column: quote(ID_FIELD),
                negated,
                select: quote(inverse),
                table: quote(&comodel.table),
                filter: Box::new(filter.and(Predicate::IsNull {
                    column: quote(inverse),
                    negated: true,
                })),
            },
            (FieldKind::Many2many { .. }, Storage::Pivot(pivot)) => Predicate::InSelect {
                column: quote(ID_FIELD),
                negated,
                select: quote(&pivot.column1),
                table: quote(&pivot.table),
                filter: Box::new(match filter {
                    Predicate::True => Predicate::True,
                    filter => Predicate::InSelect {
                        column: quote(&pivot.column2),
                        negated: false,
                        select: quote(ID_FIELD),
                        table: quote(&comodel.table),
                        filter: Box::new(filter),
                    },
                }),
            },
            _ => {
                return Err(Error::Validation(format!(
                    "cannot traverse {}.{}",
                    model.name, field.name
                )))
            }
        })
    }

    fn compile_x2many(&self, model: &ModelDef, field: &FieldDef, leaf: &Leaf) -> Result<Predicate> {
        let comodel = self.comodel(model, field)?;
        let op = leaf.operator;

        match op {
            Operator::Eq | Operator::Ne if leaf.value.is_falsy() => {
                // "has no related rows" / "has some"
                self.related_ids(model, field, comodel, Predicate::True, op == Operator::Eq)
            }
            Operator::Eq | Operator::Ne | Operator::In | Operator::NotIn => {
                let ids = record_ids(&leaf.value).ok_or_else(|| {
                    Error::Validation(format!(
                        "{}.{}: '{op}' expects record ids",
                        model.name, field.name
                    ))
                })?;
                let negated = op.is_negative();
                if ids.is_empty() {
                    return Ok(if negated { Predicate::True } else { Predicate::False });
                }
                let values: Vec<Value> = ids.into_iter().map(Value::Int).collect();
                if let Storage::Pivot(pivot) = &field.storage {
                    return Ok(Predicate::InSelect {
                        column: quote(ID_FIELD),
                        negated,
                        select: quote(&pivot.column1),
                        table: quote(&pivot.table),
                        filter: Box::new(Predicate::InList {
                            column: quote(&pivot.column2),
                            values,
                            negated: false,
                        }),
                    });
                }
                let filter = Predicate::InList {
                    column: quote(ID_FIELD),
                    values,
                    negated: false,
                };
                self.related_ids(model, field, comodel, filter, negated)
            }
            _ => self.compile_by_name(model, field, leaf),
        }
    }

    /// Match related records on their label field.
    fn compile_by_name(&self, model: &ModelDef, field: &FieldDef, leaf: &Leaf) -> Result<Predicate> {
        let comodel = self.comodel(model, field)?;
        let rec_name = comodel.rec_name.as_deref().ok_or_else(|| {
            Error::Validation(format!(
                "{}.{}: '{}' has no label field to match on",
                model.name, field.name, comodel.name
            ))
        })?;

        let negated = leaf.operator.is_negative();
        let positive = match leaf.operator {
            Operator::Ne => Operator::Eq,
            Operator::NotLike => Operator::Like,
            Operator::NotILike => Operator::ILike,
            Operator::NotIn => Operator::In,
            op => op,
        };
        let filter = self.compile_leaf(comodel, &Leaf::new(rec_name, positive, leaf.value.clone()))?;
        let related = self.related_ids(model, field, comodel, filter, negated)?;

        if negated && field.is_column() {
            Ok(related.or(Predicate::IsNull {
                column: quote(&field.name),
                negated: false,
            }))
        } else {
            Ok(related)
        }
    }

    fn comodel(&self, model: &ModelDef, field: &FieldDef) -> Result<&'a ModelDef> {
        let name = field.comodel().ok_or_else(|| {
            Error::Validation(format!(
                "{}.{} is not relational",
                model.name, field.name
            ))
        })?;
        Ok(self.registry.model(name)?.as_ref())
    }
}

fn pop(stack: &mut Vec<Predicate>) -> Result<Predicate> {
    stack
        .pop()
        .ok_or_else(|| Error::Validation("malformed domain: operator without operands".into()))
}

/// Whether a many-to-one leaf compares against record labels instead of ids.
fn names_a_record(leaf: &Leaf) -> bool {
    match leaf.operator {
        Operator::Like
        | Operator::NotLike
        | Operator::ILike
        | Operator::NotILike
        | Operator::EqLike
        | Operator::EqILike => true,
        Operator::Eq | Operator::Ne => matches!(leaf.value, Value::Text(_)),
        Operator::In | Operator::NotIn => match &leaf.value {
            Value::List(items) => !items.is_empty() && items.iter().all(|v| matches!(v, Value::Text(_))),
            _ => false,
        },
        _ => false,
    }
}

fn record_ids(value: &Value) -> Option<Vec<i64>> {
    match value {
        Value::Int(id) | Value::Ref(id, _) => Some(vec![*id]),
        other => other.as_ids(),
    }
}

/// Database representation of a domain literal.
fn column_value(value: &Value) -> Value {
    match value {
        Value::Ref(id, _) => Value::Int(*id),
        other => other.clone(),
    }
}

fn like_text(field: &FieldDef, value: &Value) -> Result<String> {
    match value {
        Value::Text(s) => Ok(s.clone()),
        Value::Int(_) | Value::Float(_) | Value::Date(_) | Value::DateTime(_) => Ok(value.to_string()),
        other => Err(Error::Validation(format!(
            "field '{}': pattern must be text, got {}",
            field.name,
            other.type_name()
        ))),
    }
}

fn compile_column(field: &FieldDef, op: Operator, value: &Value) -> Result<Predicate> {
    let column = quote(&field.name);
    let is_boolean = field.kind == FieldKind::Boolean;
    let is_null = |negated| Predicate::IsNull {
        column: column.clone(),
        negated,
    };

    let scalar = |value: &Value| -> Result<Value> {
        match value {
            Value::List(_) | Value::Ids(_) => Err(Error::Validation(format!(
                "field '{}': '{op}' does not accept a collection",
                field.name
            ))),
            v => Ok(column_value(v)),
        }
    };

    match op {
        Operator::Eq | Operator::Ne => {
            let negated = op == Operator::Ne;
            if value.is_null() || (!is_boolean && *value == Value::Bool(false)) {
                return Ok(is_null(negated));
            }
            if is_boolean {
                let wanted = value.as_bool().ok_or_else(|| {
                    Error::Validation(format!("field '{}' expects a boolean", field.name))
                })? != negated;
                let compare = Predicate::Compare {
                    column: column.clone(),
                    op: CompareOp::Eq,
                    value: Value::Bool(wanted),
                };
                return Ok(if wanted { compare } else { compare.or(is_null(false)) });
            }
            let compare = Predicate::Compare {
                column: column.clone(),
                op: if negated { CompareOp::Ne } else { CompareOp::Eq },
                value: scalar(value)?,
            };
            Ok(if negated { compare.or(is_null(false)) } else { compare })
        }
        Operator::Lt | Operator::Le | Operator::Gt | Operator::Ge => {
            if value.is_null() {
                return Err(Error::Validation(format!(
                    "field '{}': '{op}' needs a value",
                    field.name
                )));
            }
            let cmp = match op {
                Operator::Lt => CompareOp::Lt,
                Operator::Le => CompareOp::Le,
                Operator::Gt => CompareOp::Gt,
                _ => CompareOp::Ge,
            };
            Ok(Predicate::Compare {
                column,
                op: cmp,
                value: scalar(value)?,
            })
        }
        Operator::Like | Operator::NotLike | Operator::ILike | Operator::NotILike => {
            let negated = op.is_negative();
            let case = match op {
                Operator::Like | Operator::NotLike => LikeCase::Sensitive,
                _ => LikeCase::Insensitive,
            };
            let like = Predicate::Like {
                column: column.clone(),
                pattern: format!("%{}%", escape_like(&like_text(field, value)?)),
                case,
                negated,
                escaped: true,
            };
            Ok(if negated { like.or(is_null(false)) } else { like })
        }
        Operator::EqLike | Operator::EqILike => Ok(Predicate::Like {
            column,
            pattern: like_text(field, value)?,
            case: if op == Operator::EqLike {
                LikeCase::Sensitive
            } else {
                LikeCase::Insensitive
            },
            negated: false,
            escaped: false,
        }),
        Operator::In | Operator::NotIn => {
            let items = value.as_list().unwrap_or_else(|| vec![value.clone()]);
            let mut has_null = false;
            let mut values = Vec::with_capacity(items.len());
            for item in &items {
                if item.is_null() || (!is_boolean && *item == Value::Bool(false)) {
                    has_null = true;
                } else {
                    values.push(scalar(item)?);
                }
            }

            let list = (!values.is_empty()).then(|| Predicate::InList {
                column: column.clone(),
                values,
                negated: op == Operator::NotIn,
            });

            Ok(match (op, list, has_null) {
                (Operator::In, None, false) => Predicate::False,
                (Operator::In, None, true) => is_null(false),
                (Operator::In, Some(list), false) => list,
                (Operator::In, Some(list), true) => list.or(is_null(false)),
                (_, None, false) => Predicate::True,
                (_, None, true) => is_null(true),
                (_, Some(list), false) => list.or(is_null(false)),
                (_, Some(list), true) => list.and(is_null(true)),
            })
        }
        Operator::TextSearch => {
            if !field.kind.is_textual() {
                return Err(Error::Validation(format!(
                    "field '{}' is not textual; '@@' needs text",
                    field.name
                )));
            }
            let Some(text) = value.as_str() else {
                return Err(Error::Validation(format!(
                    "'@@' on '{}' needs a text query, got {value}",
                    field.name
                )));
            };
            let query = normalize_query(text);
            if query.is_empty() {
                return Ok(Predicate::True);
            }
            Ok(Predicate::TextSearch { column, query })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{FieldDef, ModelDecl};
    use crate::sql::{Dialect, ParamBuilder};
    use pretty_assertions::assert_eq;

    fn registry() -> Registry {
        Registry::builder()
            .model(
                ModelDecl::new("test.order")
                    .with_field(FieldDef::integer("a"))
                    .with_field(FieldDef::integer("b"))
                    .with_field(FieldDef::char("name"))
                    .with_field(FieldDef::boolean("done"))
                    .with_field(FieldDef::many2one("partner_id", "test.partner"))
                    .with_field(FieldDef::one2many("line_ids", "test.line", "order_id"))
                    .with_field(FieldDef::many2many("tag_ids", "test.tag"))
                    .with_field(FieldDef::integer("virtual").computed("_v", ["a"], |_, _| Ok(()))),
            )
            .model(
                ModelDecl::new("test.line")
                    .with_field(FieldDef::many2one("order_id", "test.order"))
                    .with_field(FieldDef::float("amount")),
            )
            .model(ModelDecl::new("test.partner").with_field(FieldDef::char("name")))
            .model(ModelDecl::new("test.tag").with_field(FieldDef::char("name")))
            .build()
            .unwrap()
    }

    fn render(domain: serde_json::Value) -> (String, Vec<Value>) {
        let registry = registry();
        let model = registry.model("test.order").unwrap();
        let domain = Domain::from_json(&domain).unwrap();
        let predicate = compile_domain(&registry, model, &domain).unwrap();
        let mut params = ParamBuilder::new();
        let sql = predicate.render(&Dialect::sqlite(), &mut params);
        (sql, params.into_params())
    }

    fn compile_err(domain: serde_json::Value) -> Error {
        let registry = registry();
        let model = registry.model("test.order").unwrap();
        let domain = Domain::from_json(&domain).unwrap();
        compile_domain(&registry, model, &domain).unwrap_err()
    }

    #[test]
    fn test_or_of_two_leaves() {
        let (sql, params) = render(serde_json::json!(["|", ["a", "=", 1], ["b", "=", 2]]));
        assert_eq!(sql, "(\"a\" = $1 OR \"b\" = $2)");
        assert_eq!(params, vec![Value::Int(1), Value::Int(2)]);
    }

    #[test]
    fn test_implicit_and() {
        let (sql, params) = render(serde_json::json!([["a", "=", 1], "|", ["b", "=", 2], ["a", ">", 5]]));
        assert_eq!(sql, "(\"a\" = $1 AND (\"b\" = $2 OR \"a\" > $3))");
        assert_eq!(params, vec![Value::Int(1), Value::Int(2), Value::Int(5)]);
    }

    #[test]
    fn test_normalize() {
        let domain = Domain::new()
            .leaf("a", Operator::Eq, 1)
            .leaf("b", Operator::Eq, 2)
            .leaf("a", Operator::Eq, 3);
        let terms = normalize_domain(&domain).unwrap();
        assert_eq!(terms.len(), 5);
        assert_eq!(terms[0], DomainTerm::Op(LogicOp::And));
        assert_eq!(terms[1], DomainTerm::Op(LogicOp::And));

        let broken = Domain::new().or().leaf("a", Operator::Eq, 1);
        assert!(matches!(normalize_domain(&broken), Err(Error::Validation(_))));
    }

    #[test]
    fn test_metacharacters_stay_in_params() {
        let hostile = "x'); DROP TABLE test_order; --";
        let (sql, params) = render(serde_json::json!([["name", "=", hostile], ["name", "ilike", hostile]]));
        assert!(!sql.contains("DROP"));
        assert!(!sql.replace("ESCAPE '\\'", "").contains('\''));
        assert_eq!(params[0], Value::Text(hostile.into()));
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_empty_membership() {
        let (sql, params) = render(serde_json::json!([["a", "in", []]]));
        assert_eq!(sql, "0=1");
        assert!(params.is_empty());

        let (sql, _) = render(serde_json::json!([["a", "not in", []]]));
        assert_eq!(sql, "1=1");
    }

    #[test]
    fn test_null_comparisons() {
        assert_eq!(render(serde_json::json!([["a", "=", null]])).0, "\"a\" IS NULL");
        assert_eq!(render(serde_json::json!([["name", "!=", false]])).0, "\"name\" IS NOT NULL");
        assert_eq!(
            render(serde_json::json!([["done", "=", false]])).0,
            "(\"done\" = $1 OR \"done\" IS NULL)"
        );
        assert_eq!(
            render(serde_json::json!([["a", "!=", 3]])).0,
            "(\"a\" != $1 OR \"a\" IS NULL)"
        );
        assert_eq!(
            render(serde_json::json!([["a", "in", [1, false]]])).0,
            "(\"a\" IN ($1) OR \"a\" IS NULL)"
        );
    }

    #[test]
    fn test_not() {
        let (sql, _) = render(serde_json::json!(["!", ["a", "=", 1]]));
        assert_eq!(sql, "(NOT \"a\" = $1)");
    }

    #[test]
    fn test_like_wraps_and_escapes() {
        let (sql, params) = render(serde_json::json!([["name", "ilike", "50%"]]));
        assert_eq!(sql, "lower(\"name\") LIKE lower($1) ESCAPE '\\'");
        assert_eq!(params, vec![Value::Text("%50\\%%".into())]);

        let (sql, params) = render(serde_json::json!([["name", "=like", "A%"]]));
        assert_eq!(sql, "\"name\" LIKE $1");
        assert_eq!(params, vec![Value::Text("A%".into())]);
    }

    #[test]
    fn test_relational_paths() {
        let (sql, params) = render(serde_json::json!([["partner_id.name", "=", "Acme"]]));
        assert_eq!(
            sql,
            "\"partner_id\" IN (SELECT \"id\" FROM \"test_partner\" WHERE \"name\" = $1)"
        );
        assert_eq!(params, vec![Value::Text("Acme".into())]);

        let (sql, _) = render(serde_json::json!([["line_ids.amount", ">", 10]]));
        assert_eq!(
            sql,
            "\"id\" IN (SELECT \"order_id\" FROM \"test_line\" WHERE (\"amount\" > $1 AND \"order_id\" IS NOT NULL))"
        );

        let (sql, params) = render(serde_json::json!([["tag_ids", "in", [4, 5]]]));
        assert_eq!(
            sql,
            "\"id\" IN (SELECT \"test_order_id\" FROM \"test_order_test_tag_rel\" WHERE \"test_tag_id\" IN ($1, $2))"
        );
        assert_eq!(params, vec![Value::Int(4), Value::Int(5)]);

        let (sql, _) = render(serde_json::json!([["tag_ids.name", "=", "vip"]]));
        assert_eq!(
            sql,
            "\"id\" IN (SELECT \"test_order_id\" FROM \"test_order_test_tag_rel\" WHERE \"test_tag_id\" IN (SELECT \"id\" FROM \"test_tag\" WHERE \"name\" = $1))"
        );
    }

    #[test]
    fn test_x2many_emptiness() {
        let (sql, params) = render(serde_json::json!([["tag_ids", "=", false]]));
        assert_eq!(
            sql,
            "\"id\" NOT IN (SELECT \"test_order_id\" FROM \"test_order_test_tag_rel\" WHERE 1=1)"
        );
        assert!(params.is_empty());
    }

    #[test]
    fn test_many2one_by_name() {
        let (sql, params) = render(serde_json::json!([["partner_id", "ilike", "acme"]]));
        assert_eq!(
            sql,
            "\"partner_id\" IN (SELECT \"id\" FROM \"test_partner\" WHERE lower(\"name\") LIKE lower($1) ESCAPE '\\')"
        );
        assert_eq!(params, vec![Value::Text("%acme%".into())]);
    }

    #[test]
    fn test_validation_errors() {
        assert!(matches!(
            compile_err(serde_json::json!([["nope", "=", 1]])),
            Error::UnknownField { .. }
        ));
        assert!(matches!(
            compile_err(serde_json::json!([["virtual", "=", 1]])),
            Error::Validation(_)
        ));
        assert!(matches!(
            compile_err(serde_json::json!([["a", "@@", "x"]])),
            Error::Validation(_)
        ));
        assert!(matches!(
            compile_err(serde_json::json!(["|", ["a", "=", 1]])),
            Error::Validation(_)
        ));
    }

    #[test]
    fn test_text_search_needs_a_text_query() {
        for value in [serde_json::json!(42), serde_json::json!(true), serde_json::json!(["a"])] {
            let err = compile_err(serde_json::json!([["name", "@@", value]]));
            assert!(matches!(&err, Error::Validation(msg) if msg.contains("text query")), "{err}");
        }
        assert_eq!(render(serde_json::json!([["name", "@@", "  "]])).0, "1=1");

        let (sql, params) = render(serde_json::json!([["name", "@@", " Blue  chair "]]));
        assert_eq!(sql, "lower(\"name\") LIKE $1 ESCAPE '\\'");
        assert_eq!(params, vec![Value::Text("%blue chair%".into())]);
    }

    #[test]
    fn test_empty_domain_is_true() {
        assert_eq!(render(serde_json::json!([])).0, "1=1");
    }
}
