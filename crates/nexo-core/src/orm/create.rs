//! `create`: one multi-row `INSERT` for the column values of every new
//! record, then relational commands and attachments batched per field.

use std::collections::BTreeMap;

use nexo_proto::{Command, FieldValue, Value, Values};

use super::convert::coerce_input;
use super::environment::Environment;
use super::recordset::RecordSet;
use crate::catalog::{DefaultValue, FieldDef, FieldKind, ModelDef, Storage, CREATE_DATE_FIELD, MAGIC_FIELDS, WRITE_DATE_FIELD};
use crate::error::{Error, Result};
use crate::security::{AccessOperation, AuditEvent};
use crate::sql::{quote, ParamBuilder, MAX_PARAMS};

/// A write payload sorted by where each value goes.
#[derive(Debug, Default)]
pub(crate) struct SplitValues {
    /// Coerced column values.
    pub columns: BTreeMap<String, Value>,
    /// Relational commands per x2many field.
    pub relations: Vec<(String, Vec<Command>)>,
    /// Attachment-backed binary values.
    pub binaries: Vec<(String, Value)>,
}

impl SplitValues {
    /// Names of every assigned field.
    pub fn field_names(&self) -> Vec<&str> {
        self.columns
            .keys()
            .map(String::as_str)
            .chain(self.relations.iter().map(|(f, _)| f.as_str()))
            .chain(self.binaries.iter().map(|(f, _)| f.as_str()))
            .collect()
    }
}

/// Validate and route every value of a create or write payload.
pub(crate) fn split_values(model: &ModelDef, values: Values) -> Result<SplitValues> {
    let mut split = SplitValues::default();
    for (name, value) in values {
        let field = model.require_field(&name)?;
        if MAGIC_FIELDS.contains(&name.as_str()) {
            return Err(Error::Validation(format!(
                "{}.{name} is maintained by the runtime",
                model.name
            )));
        }
        if field.is_computed() {
            return Err(Error::Validation(format!(
                "{}.{name} is computed and cannot be assigned",
                model.name
            )));
        }

        match &field.storage {
            Storage::Column => match value {
                FieldValue::Value(value) => {
                    let coerced = coerce_input(&model.name, field, value)?;
                    split.columns.insert(name, coerced);
                }
                FieldValue::Commands(_) => {
                    return Err(Error::Validation(format!(
                        "{}.{name} does not accept relational commands",
                        model.name
                    )))
                }
            },
            Storage::Inverse | Storage::Pivot(_) => {
                let commands = relation_commands(model, field, value)?;
                split.relations.push((name, commands));
            }
            Storage::Attachment => match value {
                FieldValue::Value(value) => {
                    let coerced = coerce_input(&model.name, field, value)?;
                    split.binaries.push((name, coerced));
                }
                FieldValue::Commands(_) => {
                    return Err(Error::Validation(format!(
                        "{}.{name} does not accept relational commands",
                        model.name
                    )))
                }
            },
            Storage::Computed => {
                return Err(Error::Internal(format!("{}.{name} has no storage", model.name)))
            }
        }
    }
    Ok(split)
}

/// Commands for an x2many field. A plain id list means replace-all, an
/// empty value clear-all.
fn relation_commands(model: &ModelDef, field: &FieldDef, value: FieldValue) -> Result<Vec<Command>> {
    match value {
        FieldValue::Commands(commands) => Ok(commands),
        FieldValue::Value(value) if value.is_falsy() => Ok(vec![Command::Clear]),
        FieldValue::Value(value) => match value.as_ids() {
            Some(ids) if matches!(field.kind, FieldKind::Many2many { .. }) => Ok(vec![Command::Set(ids)]),
            _ => Err(Error::Validation(format!(
                "{}.{} expects relational commands, got {}",
                model.name,
                field.name,
                value.type_name()
            ))),
        },
    }
}

impl Environment {
    /// Create one record.
    pub fn create(&mut self, model: &str, values: Values) -> Result<RecordSet> {
        self.create_many(model, vec![values])
    }

    /// Create records, returned in input order.
    ///
    /// Column values go into one `INSERT ... RETURNING` statement per
    /// `MAX_PARAMS / columns` rows, so a batch whose values exceed
    /// [`MAX_PARAMS`] bound parameters takes several statements. All of
    /// them run in the current transaction and ids keep input order.
    pub fn create_many(&mut self, model: &str, rows: Vec<Values>) -> Result<RecordSet> {
        self.check_access(model, AccessOperation::Create)?;
        let model_def = self.model(model)?;
        if rows.is_empty() {
            return Ok(RecordSet::empty(model));
        }

        let now = Value::now();
        let columns: Vec<&FieldDef> = model_def
            .column_fields()
            .filter(|f| f.name != "id" && !f.is_computed())
            .collect();

        let mut prepared = Vec::with_capacity(rows.len());
        for values in rows {
            let mut split = split_values(&model_def, values)?;
            self.apply_defaults(&model_def, &columns, &mut split, &now)?;
            prepared.push(split);
        }

        let ids = self.insert_rows(&model_def, &columns, &prepared)?;
        self.add_prefetch(model, &ids);

        let mut relations: BTreeMap<String, Vec<(i64, Vec<Command>)>> = BTreeMap::new();
        let mut binaries: BTreeMap<String, Vec<(i64, Value)>> = BTreeMap::new();
        for (id, split) in ids.iter().zip(prepared) {
            for field in model_def.fields() {
                match &field.storage {
                    Storage::Inverse | Storage::Pivot(_) => {
                        self.cache.set(model, *id, &field.name, Value::Ids(Vec::new()))
                    }
                    Storage::Attachment => self.cache.set(model, *id, &field.name, Value::Null),
                    _ => {}
                }
            }
            self.cache.set(model, *id, "id", Value::Int(*id));
            for (name, value) in split.columns {
                self.cache.set(model, *id, &name, value);
            }
            for (name, commands) in split.relations {
                relations.entry(name).or_default().push((*id, commands));
            }
            for (name, value) in split.binaries {
                binaries.entry(name).or_default().push((*id, value));
            }
        }

        for field in columns.iter().filter(|f| matches!(f.kind, FieldKind::Many2one { .. })) {
            let targets: Vec<i64> = ids
                .iter()
                .filter_map(|id| self.cache.get(model, *id, &field.name).ok().and_then(Value::as_i64))
                .collect();
            self.invalidate_mirrors(model, &field.name, &targets);
        }
        for (name, per_record) in relations {
            self.apply_commands(&model_def, &name, per_record)?;
        }
        for (name, per_record) in binaries {
            self.store_attachments(&model_def, &name, &per_record)?;
        }

        for field in model_def.stored_computed_fields() {
            self.recompute.enqueue(model, &field.name, ids.iter().copied());
        }
        let names: Vec<&str> = model_def.field_names().collect();
        self.mark_modified(model, &names, &ids)?;
        self.recompute()?;
        self.flush()?;

        self.check_record_rules(&model_def, AccessOperation::Create, &ids)?;

        self.touch_security_model(model);
        self.audit_mutation(model, AccessOperation::Create, &ids);
        tracing::info!(uid = self.actor.uid, model, records = ids.len(), "created");
        Ok(RecordSet::new(model, ids))
    }

    fn apply_defaults(
        &self,
        model: &ModelDef,
        columns: &[&FieldDef],
        split: &mut SplitValues,
        now: &Value,
    ) -> Result<()> {
        for field in columns {
            if split.columns.contains_key(&field.name) {
                continue;
            }
            let value = match &field.default {
                Some(DefaultValue::Value(value)) => coerce_input(&model.name, field, value.clone())?,
                Some(DefaultValue::CurrentTimestamp) => coerce_input(&model.name, field, now.clone())?,
                Some(DefaultValue::CurrentUser) => coerce_input(&model.name, field, Value::Int(self.actor.uid))?,
                None if field.kind == FieldKind::Boolean => Value::Bool(false),
                None => Value::Null,
            };
            split.columns.insert(field.name.clone(), value);
        }
        split.columns.insert(CREATE_DATE_FIELD.to_string(), now.clone());
        split.columns.insert(WRITE_DATE_FIELD.to_string(), now.clone());

        for field in model.fields().filter(|f| f.required && !f.is_computed()) {
            let missing = match &field.storage {
                Storage::Column => split.columns.get(&field.name).map_or(true, Value::is_null),
                Storage::Attachment => !split
                    .binaries
                    .iter()
                    .any(|(name, value)| *name == field.name && !value.is_null()),
                _ => false,
            };
            if missing {
                return Err(Error::Validation(format!(
                    "{}.{} is required",
                    model.name, field.name
                )));
            }
        }
        Ok(())
    }

    /// Insert the column values of `rows`, returning ids in row order.
    fn insert_rows(&mut self, model: &ModelDef, columns: &[&FieldDef], rows: &[SplitValues]) -> Result<Vec<i64>> {
        let names = columns
            .iter()
            .map(|f| quote(&f.name))
            .collect::<Vec<_>>()
            .join(", ");
        let rows_per_statement = (MAX_PARAMS / columns.len().max(1)).max(1);

        let mut ids = Vec::with_capacity(rows.len());
        for chunk in rows.chunks(rows_per_statement) {
            let mut params = ParamBuilder::new();
            let tuples = chunk
                .iter()
                .map(|row| {
                    let placeholders = columns
                        .iter()
                        .map(|f| params.push(row.columns.get(&f.name).cloned().unwrap_or(Value::Null)))
                        .collect::<Vec<_>>()
                        .join(", ");
                    format!("({placeholders})")
                })
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                "INSERT INTO {} ({names}) VALUES {tuples} RETURNING \"id\"",
                quote(&model.table)
            );
            let mut inserted = self.cursor.query_ids(&sql, params.params())?;
            if inserted.len() != chunk.len() {
                return Err(Error::Internal(format!(
                    "insert into {} returned {} ids for {} rows",
                    model.table,
                    inserted.len(),
                    chunk.len()
                )));
            }
            // Ids are allocated in VALUES order.
            inserted.sort_unstable();
            ids.extend(inserted);
        }
        Ok(ids)
    }

    pub(crate) fn audit_mutation(&self, model: &str, operation: AccessOperation, ids: &[i64]) {
        self.runtime.audit().log(AuditEvent::mutation(
            self.actor.uid,
            self.actor.is_superuser(),
            model,
            operation,
            ids.to_vec(),
        ));
    }
}
