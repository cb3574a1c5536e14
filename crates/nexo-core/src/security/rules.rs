//! Row-level rules.
//!
//! Each active `ir.rule` bound to a model and operation carries a domain as
//! source text. The text is evaluated in the sandbox against the actor,
//! compiled like any other domain, and every applicable rule is AND-ed into
//! one predicate. A rule that cannot be evaluated contributes `False`.

use nexo_proto::Value;

use super::acl::AccessOperation;
use super::audit::AuditEvent;
use crate::catalog::ModelDef;
use crate::error::{Error, Result};
use crate::orm::Environment;
use crate::sql::{compile_domain, quote, ParamBuilder, Predicate};

/// One applicable rule row.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleRow {
    pub id: i64,
    /// Domain source, `None` or empty for "all records".
    pub domain: Option<String>,
}

impl Environment {
    /// Active rules of `model` for `operation` that apply to the actor:
    /// groupless rules and rules sharing a group with the actor.
    pub fn applicable_rules(&mut self, model: &str, operation: AccessOperation) -> Result<Vec<RuleRow>> {
        let mut params = ParamBuilder::new();
        let model_ph = params.push(model);
        let group_clause = if self.actor.group_ids.is_empty() {
            String::new()
        } else {
            let list = params.push_all(self.actor.group_ids.iter().copied().map(Value::Int));
            format!(
                " OR EXISTS (SELECT 1 FROM \"rule_group_rel\" g \
                 WHERE g.\"rule_group_id\" = r.\"id\" AND g.\"group_id\" IN ({list}))"
            )
        };
        let sql = format!(
            "SELECT r.\"id\", r.\"domain_force\" FROM \"ir_rule\" r \
             JOIN \"ir_model\" m ON m.\"id\" = r.\"model_id\" \
             WHERE m.\"model\" = {model_ph} AND r.\"active\" = 1 AND r.\"{}\" = 1 \
             AND (NOT EXISTS (SELECT 1 FROM \"rule_group_rel\" g WHERE g.\"rule_group_id\" = r.\"id\"){group_clause}) \
             ORDER BY r.\"id\"",
            operation.column()
        );

        let rows = self.cursor.query(&sql, params.params())?;
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let id = row.first().and_then(Value::as_i64)?;
                let domain = row.get(1).and_then(Value::as_str).map(str::to_string);
                Some(RuleRow { id, domain })
            })
            .collect())
    }

    /// Combined rule predicate of `model` for `operation`. `True` for the
    /// superuser and for models without applicable rules.
    pub fn rule_predicate(&mut self, model: &str, operation: AccessOperation) -> Result<Predicate> {
        if self.actor.is_superuser() {
            return Ok(Predicate::True);
        }
        let key = (model.to_string(), operation);
        if let Some(predicate) = self.rule_local.get(&key) {
            return Ok(predicate.clone());
        }

        let registry = self.registry.clone();
        let model_def = registry.model(model)?;
        let rules = self.applicable_rules(model, operation)?;
        let scope = self.actor.sandbox_scope();
        let limits = self.runtime.config().sandbox.clone();

        let mut combined = Predicate::True;
        for rule in rules {
            let source = rule.domain.as_deref().map(str::trim).unwrap_or_default();
            if source.is_empty() {
                continue;
            }
            let compiled = nexo_lang::eval_domain(source, &scope, &limits)
                .map_err(Error::from)
                .and_then(|domain| compile_domain(&registry, model_def, &domain));
            match compiled {
                Ok(predicate) => combined = combined.and(predicate),
                Err(err) => {
                    tracing::warn!(
                        uid = self.actor.uid,
                        model,
                        rule = rule.id,
                        error = %err,
                        "row rule skipped, denying its records"
                    );
                    self.runtime.audit().log(AuditEvent::rule_skipped(
                        self.actor.uid,
                        model,
                        rule.id,
                        err.to_string(),
                    ));
                    combined = Predicate::False;
                }
            }
        }

        self.rule_local.insert(key, combined.clone());
        Ok(combined)
    }

    /// Verify every id exists and satisfies the rules for `operation`.
    ///
    /// Runs one `COUNT(*)` per chunk of ids. A shortfall is reported as
    /// [`Error::MissingRecords`] when some ids do not exist and as
    /// [`Error::RuleViolation`] otherwise.
    pub fn check_record_rules(&mut self, model: &ModelDef, operation: AccessOperation, ids: &[i64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let predicate = self.rule_predicate(&model.name, operation)?;
        let chunk_size = self.runtime.config().rule_chunk_size;
        let dialect = self.runtime.config().dialect.clone();

        let mut unique: Vec<i64> = ids.to_vec();
        unique.sort_unstable();
        unique.dedup();

        for chunk in unique.chunks(chunk_size) {
            let visible = self.count_matching(model, chunk, &predicate, &dialect)?;
            if visible == chunk.len() {
                continue;
            }

            let existing = if predicate.is_true() {
                visible
            } else {
                self.count_matching(model, chunk, &Predicate::True, &dialect)?
            };
            if existing < chunk.len() {
                let found = self.existing_ids(model, chunk)?;
                let missing = chunk.iter().copied().filter(|id| !found.contains(id)).collect();
                return Err(Error::MissingRecords {
                    model: model.name.clone(),
                    ids: missing,
                });
            }

            let rejected = chunk.len() - visible;
            tracing::warn!(
                uid = self.actor.uid,
                model = %model.name,
                operation = %operation,
                rejected,
                "row rules reject records"
            );
            self.runtime.audit().log(AuditEvent::rule_violation(
                self.actor.uid,
                model.name.clone(),
                operation,
                rejected,
            ));
            return Err(Error::RuleViolation {
                model: model.name.clone(),
                operation,
            });
        }
        Ok(())
    }

    /// Number of `ids` that satisfy `predicate`, counted in one statement.
    fn count_matching(
        &mut self,
        model: &ModelDef,
        ids: &[i64],
        predicate: &Predicate,
        dialect: &crate::sql::Dialect,
    ) -> Result<usize> {
        let mut params = ParamBuilder::new();
        let list = params.push_all(ids.iter().copied().map(Value::Int));
        let filter = predicate.render(dialect, &mut params);
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE \"id\" IN ({list}) AND {filter}",
            quote(&model.table)
        );
        let count = self.cursor.query_scalar_i64(&sql, params.params())?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    pub(crate) fn existing_ids(&mut self, model: &ModelDef, ids: &[i64]) -> Result<Vec<i64>> {
        let mut params = ParamBuilder::new();
        let list = params.push_all(ids.iter().copied().map(Value::Int));
        let sql = format!(
            "SELECT \"id\" FROM {} WHERE \"id\" IN ({list})",
            quote(&model.table)
        );
        self.cursor.query_ids(&sql, params.params())
    }
}

