//! `write` and `unlink`.

use nexo_proto::{Value, Values};

use super::create::split_values;
use super::environment::Environment;
use super::recordset::RecordSet;
use crate::catalog::{FieldKind, OnDelete, Storage, WRITE_DATE_FIELD};
use crate::error::{Error, Result};
use crate::security::AccessOperation;
use crate::sql::{quote, ParamBuilder, IN_CHUNK_SIZE};

impl Environment {
    /// Write the same values to every record of `records`.
    pub fn write(&mut self, records: &RecordSet, values: Values) -> Result<bool> {
        let model = records.model();
        self.check_access(model, AccessOperation::Write)?;
        let model_def = self.model(model)?;
        let mut split = split_values(&model_def, values)?;

        let mut ids = records.ids().to_vec();
        ids.sort_unstable();
        ids.dedup();
        if ids.is_empty() {
            return Ok(true);
        }

        for (name, value) in &split.columns {
            let required = model_def.field(name).is_some_and(|f| f.required);
            if required && value.is_null() {
                return Err(Error::Validation(format!("{model}.{name} is required")));
            }
        }
        for (name, value) in &split.binaries {
            let required = model_def.field(name).is_some_and(|f| f.required);
            if required && value.is_null() {
                return Err(Error::Validation(format!("{model}.{name} is required")));
            }
        }

        self.flush()?;
        self.check_record_rules(&model_def, AccessOperation::Write, &ids)?;
        self.add_prefetch(model, &ids);

        let names: Vec<String> = split.field_names().into_iter().map(str::to_string).collect();
        let name_refs: Vec<&str> = names.iter().map(String::as_str).collect();
        // Dependents reached through the old values (previous parent of a
        // re-parented child, for instance).
        self.mark_modified(model, &name_refs, &ids)?;

        let mut old_targets: Vec<(String, Vec<i64>)> = Vec::new();
        for (name, _) in &split.columns {
            let Some(field) = model_def.field(name) else {
                continue;
            };
            if matches!(field.kind, FieldKind::Many2one { .. }) {
                let mut targets = Vec::new();
                for id in &ids {
                    targets.extend(self.get(model, *id, name)?.as_i64());
                }
                old_targets.push((name.clone(), targets));
            }
        }

        split
            .columns
            .insert(WRITE_DATE_FIELD.to_string(), Value::now());
        for chunk in ids.chunks(IN_CHUNK_SIZE) {
            let mut params = ParamBuilder::new();
            let assignments = split
                .columns
                .iter()
                .map(|(name, value)| format!("{} = {}", quote(name), params.push(value.clone())))
                .collect::<Vec<_>>()
                .join(", ");
            let list = params.push_all(chunk.iter().copied().map(Value::Int));
            let sql = format!(
                "UPDATE {} SET {assignments} WHERE \"id\" IN ({list})",
                quote(&model_def.table)
            );
            self.cursor.execute(&sql, params.params())?;
        }
        for (name, value) in &split.columns {
            self.cache.set_many(model, &ids, name, value);
        }

        for (name, mut targets) in old_targets {
            targets.extend(split.columns.get(&name).and_then(Value::as_i64));
            self.invalidate_mirrors(model, &name, &targets);
        }
        for (name, commands) in std::mem::take(&mut split.relations) {
            let per_record = ids.iter().map(|id| (*id, commands.clone())).collect();
            self.apply_commands(&model_def, &name, per_record)?;
        }
        for (name, value) in std::mem::take(&mut split.binaries) {
            let per_record: Vec<(i64, Value)> = ids.iter().map(|id| (*id, value.clone())).collect();
            self.store_attachments(&model_def, &name, &per_record)?;
        }

        self.mark_modified(model, &name_refs, &ids)?;
        self.recompute()?;
        self.flush()?;

        self.touch_security_model(model);
        self.audit_mutation(model, AccessOperation::Write, &ids);
        tracing::info!(uid = self.actor.uid, model, records = ids.len(), fields = names.len(), "written");
        Ok(true)
    }

    /// Delete every record of `records`.
    pub fn unlink(&mut self, records: &RecordSet) -> Result<bool> {
        let model = records.model();
        self.check_access(model, AccessOperation::Unlink)?;
        let model_def = self.model(model)?;

        let mut ids = records.ids().to_vec();
        ids.sort_unstable();
        ids.dedup();
        if ids.is_empty() {
            return Ok(true);
        }

        self.flush()?;
        self.check_record_rules(&model_def, AccessOperation::Unlink, &ids)?;
        self.add_prefetch(model, &ids);

        // Parents of deleted children must recompute; resolve them while
        // the rows still exist.
        let watched: Vec<&str> = model_def
            .field_names()
            .filter(|name| self.registry.graph().has_dependents(model, name))
            .collect();
        self.mark_modified(model, &watched, &ids)?;

        let mut old_targets: Vec<(String, Vec<i64>)> = Vec::new();
        for field in model_def.column_fields() {
            if matches!(field.kind, FieldKind::Many2one { .. }) {
                let mut targets = Vec::new();
                for id in &ids {
                    targets.extend(self.get(model, *id, &field.name)?.as_i64());
                }
                old_targets.push((field.name.clone(), targets));
            }
        }

        self.recompute.remove_ids(model, &ids);
        self.pending.remove_ids(model, &ids);

        if model_def.has_attachments() {
            for chunk in ids.chunks(IN_CHUNK_SIZE) {
                let mut params = ParamBuilder::new();
                let model_ph = params.push(model);
                let list = params.push_all(chunk.iter().copied().map(Value::Int));
                let sql = format!(
                    "DELETE FROM \"ir_attachment\" WHERE \"res_model\" = {model_ph} AND \"res_id\" IN ({list})"
                );
                self.cursor.execute(&sql, params.params())?;
            }
        }
        for chunk in ids.chunks(IN_CHUNK_SIZE) {
            let mut params = ParamBuilder::new();
            let list = params.push_all(chunk.iter().copied().map(Value::Int));
            let sql = format!(
                "DELETE FROM {} WHERE \"id\" IN ({list})",
                quote(&model_def.table)
            );
            self.cursor.execute(&sql, params.params())?;
        }

        self.cache.invalidate_records(model, &ids);
        self.forget_prefetch(model, &ids);
        for (name, targets) in old_targets {
            self.invalidate_mirrors(model, &name, &targets);
        }
        self.invalidate_referrers(model);

        self.recompute()?;
        self.flush()?;

        self.touch_security_model(model);
        self.audit_mutation(model, AccessOperation::Unlink, &ids);
        tracing::info!(uid = self.actor.uid, model, records = ids.len(), "deleted");
        Ok(true)
    }

    /// Drop cached values that may still name deleted records of `model`.
    fn invalidate_referrers(&mut self, model: &str) {
        let registry = self.registry.clone();
        for (referrer, field) in registry.fields_targeting(model) {
            match (&field.kind, &field.storage) {
                (FieldKind::Many2one { ondelete: OnDelete::Cascade, .. }, _) => {
                    self.cache.invalidate_model(&referrer.name);
                }
                (FieldKind::Many2one { .. }, _) | (_, Storage::Inverse | Storage::Pivot(_)) => {
                    self.cache.invalidate_field(&referrer.name, &field.name);
                }
                _ => {}
            }
        }
    }
}
