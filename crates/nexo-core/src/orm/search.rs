//! `search`, `search_count` and `search_read`.

use nexo_proto::{Domain, Value};

use super::environment::Environment;
use super::recordset::{Record, RecordSet};
use crate::catalog::ID_FIELD;
use crate::error::{Error, Result};
use crate::security::AccessOperation;
use crate::sql::{compile_domain, parse_order, quote, render_order, CompareOp, ParamBuilder, Predicate};

/// Paging and ordering of a search.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchOptions {
    pub offset: usize,
    pub limit: Option<usize>,
    /// Order specification such as `"name desc, id"`; the model's default
    /// order when `None`.
    pub order: Option<String>,
    /// Return only ids strictly greater than this one. Requires ordering by
    /// `id` ascending.
    pub cursor: Option<i64>,
}

impl SearchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_order(mut self, order: impl Into<String>) -> Self {
        self.order = Some(order.into());
        self
    }

    pub fn with_cursor(mut self, after_id: i64) -> Self {
        self.cursor = Some(after_id);
        self
    }
}

impl Environment {
    /// Records of `model` matching `domain` and the actor's read rules.
    pub fn search(&mut self, model: &str, domain: &Domain, options: &SearchOptions) -> Result<RecordSet> {
        let Some(filter) = self.search_filter(model, domain, options.cursor)? else {
            return Ok(RecordSet::empty(model));
        };
        let model_def = self.model(model)?;

        let order_spec = options.order.as_deref().unwrap_or(&model_def.order);
        let terms = parse_order(&model_def, order_spec)?;
        if options.cursor.is_some() {
            let by_id = matches!(terms.as_slice(), [term] if term.field == ID_FIELD
                && term.direction == crate::sql::OrderDirection::Asc);
            if !by_id {
                return Err(Error::Validation(format!(
                    "cursor pagination on '{model}' requires order 'id asc', got '{order_spec}'"
                )));
            }
        }

        let dialect = self.runtime.config().dialect.clone();
        let mut params = ParamBuilder::new();
        let where_clause = filter.render(&dialect, &mut params);
        let mut sql = format!(
            "SELECT \"id\" FROM {} WHERE {where_clause} ORDER BY {}",
            quote(&model_def.table),
            render_order(&terms)
        );
        match (options.limit, options.offset) {
            (Some(limit), offset) => {
                let limit_ph = params.push(to_sql_int(limit));
                let offset_ph = params.push(to_sql_int(offset));
                sql.push_str(&format!(" LIMIT {limit_ph} OFFSET {offset_ph}"));
            }
            (None, 0) => {}
            (None, offset) => {
                let offset_ph = params.push(to_sql_int(offset));
                sql.push_str(&format!(" LIMIT -1 OFFSET {offset_ph}"));
            }
        }

        let ids = self.cursor.query_ids(&sql, params.params())?;
        tracing::debug!(model, found = ids.len(), "search");
        self.add_prefetch(model, &ids);
        Ok(RecordSet::new(model, ids))
    }

    /// Number of records matching `domain` and the actor's read rules.
    pub fn search_count(&mut self, model: &str, domain: &Domain) -> Result<usize> {
        let Some(filter) = self.search_filter(model, domain, None)? else {
            return Ok(0);
        };
        let model_def = self.model(model)?;
        let dialect = self.runtime.config().dialect.clone();
        let mut params = ParamBuilder::new();
        let where_clause = filter.render(&dialect, &mut params);
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {where_clause}",
            quote(&model_def.table)
        );
        let count = self.cursor.query_scalar_i64(&sql, params.params())?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// [`search`](Self::search) followed by [`read`](Self::read).
    pub fn search_read(
        &mut self,
        model: &str,
        domain: &Domain,
        fields: Option<&[&str]>,
        options: &SearchOptions,
    ) -> Result<Vec<Record>> {
        let records = self.search(model, domain, options)?;
        self.read(&records, fields)
    }

    /// Full `WHERE` predicate of a search, or `None` when it cannot match.
    fn search_filter(&mut self, model: &str, domain: &Domain, cursor: Option<i64>) -> Result<Option<Predicate>> {
        self.check_access(model, AccessOperation::Read)?;
        let model_def = self.model(model)?;
        let registry = self.registry.clone();
        let compiled = compile_domain(&registry, &model_def, domain)?;

        if !self.recompute.is_draining() {
            self.recompute()?;
            self.flush()?;
        }

        let mut filter = compiled.and(self.rule_predicate(model, AccessOperation::Read)?);
        if let Some(after) = cursor {
            filter = filter.and(Predicate::Compare {
                column: quote(ID_FIELD),
                op: CompareOp::Gt,
                value: Value::Int(after),
            });
        }
        Ok((!filter.is_false()).then_some(filter))
    }
}

fn to_sql_int(n: usize) -> Value {
    Value::Int(i64::try_from(n).unwrap_or(i64::MAX))
}
