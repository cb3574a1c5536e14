//! Field access and `read`.
//!
//! Values are served from the record cache. A miss fetches the field for
//! every record of the same model known to the unit of work that lacks it,
//! so iterating a record set costs one query per field rather than one per
//! record.

use std::collections::{BTreeMap, HashMap};

use nexo_proto::Value;

use super::convert::from_column;
use super::environment::Environment;
use super::recordset::{Record, RecordSet};
use crate::catalog::{FieldDef, FieldKind, ModelDef, PivotTable, Storage};
use crate::error::{Error, Result};
use crate::security::AccessOperation;
use crate::sql::{parse_order, quote, render_order, ParamBuilder, IN_CHUNK_SIZE};

impl Environment {
    /// Value of `(model, id, field)` in its cached form: many-to-one as the
    /// bare id, x2many as `Ids`. No access check.
    pub fn get(&mut self, model: &str, id: i64, field: &str) -> Result<Value> {
        let model_def = self.model(model)?;
        let def = model_def.require_field(field)?;

        if self.recompute.contains(model, field, id) {
            if let Some(ids) = self.recompute.take(model, field) {
                self.compute_field(&model_def, def, &ids)?;
            }
        }
        if let Ok(value) = self.cache.get(model, id, field) {
            return Ok(value.clone());
        }

        let batch = self.prefetch_batch(model, id, field);
        self.populate(&model_def, def, &batch)?;
        match self.cache.get(model, id, field) {
            Ok(value) => Ok(value.clone()),
            Err(_) => Err(Error::MissingRecords {
                model: model.to_string(),
                ids: vec![id],
            }),
        }
    }

    /// Read `fields` (every field when `None`) of `records`, in record order.
    ///
    /// Many-to-one values are returned as `Ref(id, label)` or `false`,
    /// x2many values as `Ids`.
    pub fn read(&mut self, records: &RecordSet, fields: Option<&[&str]>) -> Result<Vec<Record>> {
        let model = records.model();
        self.check_access(model, AccessOperation::Read)?;
        let model_def = self.model(model)?;
        let names: Vec<String> = match fields {
            Some(fields) => {
                for name in fields {
                    model_def.require_field(name)?;
                }
                fields.iter().map(|f| f.to_string()).collect()
            }
            None => model_def.field_names().map(str::to_string).collect(),
        };
        if records.is_empty() {
            return Ok(Vec::new());
        }

        if !self.rule_predicate(model, AccessOperation::Read)?.is_true() {
            self.check_record_rules(&model_def, AccessOperation::Read, records.ids())?;
        }
        if !self.recompute.is_empty() && !self.recompute.is_draining() {
            self.recompute()?;
        }

        let ids = records.ids();
        self.add_prefetch(model, ids);
        let unknown = self.cache.missing_ids(model, "id", ids);
        if !unknown.is_empty() {
            self.populate(&model_def, model_def.require_field("id")?, &unknown)?;
        }
        let missing = self.cache.missing_ids(model, "id", ids);
        if !missing.is_empty() {
            return Err(Error::MissingRecords {
                model: model.to_string(),
                ids: missing,
            });
        }

        for name in &names {
            let def = model_def.require_field(name)?;
            if let Some(queued) = self.queued_ids(model, name, ids) {
                self.compute_field(&model_def, def, &queued)?;
            }
            let missing = self.cache.missing_ids(model, name, ids);
            if !missing.is_empty() {
                self.populate(&model_def, def, &missing)?;
            }
        }

        let labels = self.reference_labels(&model_def, &names, ids)?;
        let mut rows = Vec::with_capacity(ids.len());
        for id in ids {
            let mut row = Record::new();
            for name in &names {
                let def = model_def.require_field(name)?;
                let cached = self.cached(model, *id, name)?;
                let value = match (&def.kind, cached) {
                    (FieldKind::Many2one { comodel, .. }, Value::Int(target)) => {
                        let label = labels
                            .get(comodel.as_str())
                            .and_then(|l| l.get(&target))
                            .cloned()
                            .unwrap_or_default();
                        Value::Ref(target, label)
                    }
                    (FieldKind::Many2one { .. }, _) => Value::Bool(false),
                    (_, value) => value,
                };
                row.insert(name.clone(), value);
            }
            rows.push(row);
        }
        tracing::debug!(model, records = rows.len(), fields = names.len(), "read");
        Ok(rows)
    }

    /// `(id, label)` of every record, using the model's `rec_name`.
    pub fn name_get(&mut self, records: &RecordSet) -> Result<Vec<(i64, String)>> {
        self.check_access(records.model(), AccessOperation::Read)?;
        let model_def = self.model(records.model())?;
        let labels = self.labels(&model_def, records.ids())?;
        Ok(records
            .ids()
            .iter()
            .map(|id| (*id, labels.get(id).cloned().unwrap_or_default()))
            .collect())
    }

    /// Labels of `ids`, read without an access check on `model`.
    pub(crate) fn labels(&mut self, model: &ModelDef, ids: &[i64]) -> Result<HashMap<i64, String>> {
        let mut labels = HashMap::with_capacity(ids.len());
        let Some(rec_name) = model.rec_name.clone() else {
            for id in ids {
                labels.insert(*id, format!("{},{id}", model.name));
            }
            return Ok(labels);
        };
        self.add_prefetch(&model.name, ids);
        for id in ids {
            let label = match self.get(&model.name, *id, &rec_name)? {
                Value::Null => String::new(),
                Value::Text(text) => text,
                other => other.to_string(),
            };
            labels.insert(*id, label);
        }
        Ok(labels)
    }

    /// Labels of every many-to-one target among `names`, one batch per
    /// comodel.
    fn reference_labels(
        &mut self,
        model: &ModelDef,
        names: &[String],
        ids: &[i64],
    ) -> Result<HashMap<String, HashMap<i64, String>>> {
        let mut targets: BTreeMap<String, Vec<i64>> = BTreeMap::new();
        for name in names {
            let Some(FieldKind::Many2one { comodel, .. }) = model.field(name).map(|f| &f.kind) else {
                continue;
            };
            let entry = targets.entry(comodel.clone()).or_default();
            for id in ids {
                if let Ok(Value::Int(target)) = self.cache.get(&model.name, *id, name) {
                    entry.push(*target);
                }
            }
        }

        let mut labels = HashMap::new();
        for (comodel, mut target_ids) in targets {
            target_ids.sort_unstable();
            target_ids.dedup();
            let comodel_def = self.model(&comodel)?;
            let resolved = self.labels(&comodel_def, &target_ids)?;
            labels.insert(comodel, resolved);
        }
        Ok(labels)
    }

    /// Queued recompute ids among `ids`, taking the whole group when any is
    /// queued.
    fn queued_ids(&mut self, model: &str, field: &str, ids: &[i64]) -> Option<Vec<i64>> {
        if ids.iter().any(|id| self.recompute.contains(model, field, *id)) {
            self.recompute.take(model, field)
        } else {
            None
        }
    }

    /// `id` plus up to a chunk of other known records of `model` missing
    /// `field`.
    fn prefetch_batch(&self, model: &str, id: i64, field: &str) -> Vec<i64> {
        let mut batch = vec![id];
        if let Some(known) = self.prefetch.get(model) {
            batch.extend(
                known
                    .iter()
                    .copied()
                    .filter(|other| *other != id && !self.cache.contains(model, *other, field))
                    .take(IN_CHUNK_SIZE - 1),
            );
        }
        batch
    }

    /// Load `field` of `ids` into the cache.
    pub(crate) fn populate(&mut self, model: &ModelDef, field: &FieldDef, ids: &[i64]) -> Result<()> {
        match &field.storage {
            Storage::Column => {
                for chunk in ids.chunks(IN_CHUNK_SIZE) {
                    self.fetch_columns(model, chunk)?;
                }
                Ok(())
            }
            Storage::Computed => self.compute_field(model, field, ids),
            Storage::Inverse => self.fetch_inverse(model, field, ids),
            Storage::Pivot(pivot) => self.fetch_pivot(model, field, pivot, ids),
            Storage::Attachment => self.fetch_attachments(model, field, ids),
        }
    }

    /// Fetch every column of `ids` in one statement. Values already cached
    /// are kept. Returns the ids found.
    pub(crate) fn fetch_columns(&mut self, model: &ModelDef, ids: &[i64]) -> Result<Vec<i64>> {
        let columns: Vec<&FieldDef> = model.column_fields().collect();
        let mut params = ParamBuilder::new();
        let list = params.push_all(ids.iter().copied().map(Value::Int));
        let select = columns
            .iter()
            .map(|f| quote(&f.name))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {select} FROM {} WHERE \"id\" IN ({list})",
            quote(&model.table)
        );

        let rows = self.cursor.query(&sql, params.params())?;
        let mut found = Vec::with_capacity(rows.len());
        for row in rows {
            let Some(id) = row.first().and_then(Value::as_i64) else {
                continue;
            };
            for (field, raw) in columns.iter().zip(row) {
                self.cache
                    .set_if_absent(&model.name, id, &field.name, from_column(raw, &field.kind));
            }
            found.push(id);
        }
        Ok(found)
    }

    fn fetch_inverse(&mut self, model: &ModelDef, field: &FieldDef, ids: &[i64]) -> Result<()> {
        let FieldKind::One2many { comodel, inverse } = &field.kind else {
            return Err(Error::Internal(format!("{}.{} is not a one2many", model.name, field.name)));
        };
        let comodel_def = self.model(comodel)?;
        let order = render_order(&parse_order(&comodel_def, &comodel_def.order)?);

        for chunk in ids.chunks(IN_CHUNK_SIZE) {
            let mut params = ParamBuilder::new();
            let list = params.push_all(chunk.iter().copied().map(Value::Int));
            let sql = format!(
                "SELECT \"id\", {inv} FROM {table} WHERE {inv} IN ({list}) ORDER BY {order}",
                inv = quote(inverse),
                table = quote(&comodel_def.table),
            );
            let mut children: HashMap<i64, Vec<i64>> = HashMap::new();
            for row in self.cursor.query(&sql, params.params())? {
                if let (Some(child), Some(parent)) = (
                    row.first().and_then(Value::as_i64),
                    row.get(1).and_then(Value::as_i64),
                ) {
                    children.entry(parent).or_default().push(child);
                }
            }
            for id in chunk {
                let value = Value::Ids(children.remove(id).unwrap_or_default());
                self.cache.set(&model.name, *id, &field.name, value);
            }
        }
        Ok(())
    }

    fn fetch_pivot(&mut self, model: &ModelDef, field: &FieldDef, pivot: &PivotTable, ids: &[i64]) -> Result<()> {
        for chunk in ids.chunks(IN_CHUNK_SIZE) {
            let mut params = ParamBuilder::new();
            let list = params.push_all(chunk.iter().copied().map(Value::Int));
            let sql = format!(
                "SELECT {c1}, {c2} FROM {table} WHERE {c1} IN ({list}) ORDER BY {c2}",
                c1 = quote(&pivot.column1),
                c2 = quote(&pivot.column2),
                table = quote(&pivot.table),
            );
            let mut links: HashMap<i64, Vec<i64>> = HashMap::new();
            for row in self.cursor.query(&sql, params.params())? {
                if let (Some(owner), Some(target)) = (
                    row.first().and_then(Value::as_i64),
                    row.get(1).and_then(Value::as_i64),
                ) {
                    links.entry(owner).or_default().push(target);
                }
            }
            for id in chunk {
                let value = Value::Ids(links.remove(id).unwrap_or_default());
                self.cache.set(&model.name, *id, &field.name, value);
            }
        }
        Ok(())
    }

    fn fetch_attachments(&mut self, model: &ModelDef, field: &FieldDef, ids: &[i64]) -> Result<()> {
        for chunk in ids.chunks(IN_CHUNK_SIZE) {
            let mut params = ParamBuilder::new();
            let model_ph = params.push(model.name.as_str());
            let field_ph = params.push(field.name.as_str());
            let list = params.push_all(chunk.iter().copied().map(Value::Int));
            let sql = format!(
                "SELECT \"res_id\", \"datas\" FROM \"ir_attachment\" \
                 WHERE \"res_model\" = {model_ph} AND \"res_field\" = {field_ph} AND \"res_id\" IN ({list})"
            );
            let mut payloads: HashMap<i64, Value> = HashMap::new();
            for mut row in self.cursor.query(&sql, params.params())? {
                let data = if row.len() > 1 { row.swap_remove(1) } else { Value::Null };
                if let Some(id) = row.first().and_then(Value::as_i64) {
                    payloads.insert(id, data);
                }
            }
            for id in chunk {
                let value = payloads.remove(id).unwrap_or(Value::Null);
                self.cache.set(&model.name, *id, &field.name, value);
            }
        }
        Ok(())
    }
}
