//! Relational commands and attachment storage.
//!
//! Commands of one field are applied for every record of a create or write
//! at once: nested creates go through a single `create_many`, many-to-many
//! links are diffed against the current pivot rows so only changed pairs
//! are deleted or inserted.

use std::collections::BTreeSet;

use nexo_proto::{Command, Value, Values};

use super::environment::Environment;
use super::recordset::RecordSet;
use crate::catalog::{FieldDef, FieldKind, ModelDef, OnDelete, PivotTable, Storage};
use crate::error::{Error, Result};
use crate::sql::{quote, ParamBuilder, IN_CHUNK_SIZE, MAX_PARAMS};

impl Environment {
    /// Apply the commands of x2many `field` to each record.
    pub(crate) fn apply_commands(
        &mut self,
        model: &ModelDef,
        field: &str,
        per_record: Vec<(i64, Vec<Command>)>,
    ) -> Result<()> {
        let def = model.require_field(field)?;
        let owners: Vec<i64> = per_record.iter().map(|(id, _)| *id).collect();
        let missing = self.cache.missing_ids(&model.name, field, &owners);
        if !missing.is_empty() {
            self.populate(model, def, &missing)?;
        }

        match (&def.kind, &def.storage) {
            (FieldKind::Many2many { comodel, .. }, Storage::Pivot(pivot)) => {
                self.apply_many2many(model, def, pivot, comodel, per_record)
            }
            (FieldKind::One2many { comodel, inverse }, _) => {
                self.apply_one2many(model, def, comodel, inverse, per_record)
            }
            _ => Err(Error::Internal(format!(
                "{}.{field} does not take relational commands",
                model.name
            ))),
        }
    }

    fn apply_many2many(
        &mut self,
        model: &ModelDef,
        field: &FieldDef,
        pivot: &PivotTable,
        comodel: &str,
        per_record: Vec<(i64, Vec<Command>)>,
    ) -> Result<()> {
        let creates: Vec<Values> = per_record
            .iter()
            .flat_map(|(_, commands)| commands)
            .filter_map(|command| match command {
                Command::Create(values) => Some(values.clone()),
                _ => None,
            })
            .collect();
        let created = if creates.is_empty() {
            Vec::new()
        } else {
            self.create_many(comodel, creates)?.ids().to_vec()
        };
        let mut created = created.into_iter();

        let mut removed: Vec<(i64, Vec<i64>)> = Vec::new();
        let mut added: Vec<(i64, i64)> = Vec::new();
        let mut touched: BTreeSet<i64> = BTreeSet::new();

        for (owner, commands) in per_record {
            let before = self.get(&model.name, owner, &field.name)?.as_ids().unwrap_or_default();
            let mut links = before.clone();
            for command in commands {
                match command {
                    Command::Create(_) => {
                        let id = created
                            .next()
                            .ok_or_else(|| Error::Internal("nested create returned too few ids".into()))?;
                        push_unique(&mut links, id);
                    }
                    Command::Update(id, values) => {
                        self.write(&RecordSet::new(comodel, vec![id]), values)?;
                    }
                    Command::Delete(id) => {
                        self.unlink(&RecordSet::new(comodel, vec![id]))?;
                        links.retain(|linked| *linked != id);
                    }
                    Command::Unlink(id) => links.retain(|linked| *linked != id),
                    Command::Link(id) => push_unique(&mut links, id),
                    Command::Clear => links.clear(),
                    Command::Set(ids) => {
                        links.clear();
                        for id in ids {
                            push_unique(&mut links, id);
                        }
                    }
                }
            }

            let gone: Vec<i64> = before.iter().copied().filter(|id| !links.contains(id)).collect();
            let new: Vec<i64> = links.iter().copied().filter(|id| !before.contains(id)).collect();
            touched.extend(gone.iter().copied());
            touched.extend(new.iter().copied());
            if !gone.is_empty() {
                removed.push((owner, gone));
            }
            added.extend(new.into_iter().map(|id| (owner, id)));

            links.sort_unstable();
            self.cache.set(&model.name, owner, &field.name, Value::Ids(links));
        }

        self.delete_links(pivot, &removed)?;
        self.insert_links(pivot, &added)?;
        let touched: Vec<i64> = touched.into_iter().collect();
        self.invalidate_mirrors(&model.name, &field.name, &touched);
        tracing::debug!(
            model = %model.name,
            field = %field.name,
            unlinked = removed.iter().map(|(_, ids)| ids.len()).sum::<usize>(),
            linked = added.len(),
            "many2many updated"
        );
        Ok(())
    }

    /// `DELETE ... WHERE (c1 = $ AND c2 IN (...)) OR ...`, chunked by the
    /// parameter limit.
    fn delete_links(&mut self, pivot: &PivotTable, removed: &[(i64, Vec<i64>)]) -> Result<()> {
        let mut params = ParamBuilder::new();
        let mut clauses: Vec<String> = Vec::new();
        for (owner, targets) in removed {
            for chunk in targets.chunks(IN_CHUNK_SIZE) {
                if params.len() + chunk.len() + 1 > MAX_PARAMS {
                    self.execute_link_delete(pivot, std::mem::take(&mut clauses), std::mem::take(&mut params))?;
                }
                let owner_ph = params.push(*owner);
                let list = params.push_all(chunk.iter().copied().map(Value::Int));
                clauses.push(format!(
                    "({} = {owner_ph} AND {} IN ({list}))",
                    quote(&pivot.column1),
                    quote(&pivot.column2)
                ));
            }
        }
        self.execute_link_delete(pivot, clauses, params)
    }

    fn execute_link_delete(&mut self, pivot: &PivotTable, clauses: Vec<String>, params: ParamBuilder) -> Result<()> {
        if clauses.is_empty() {
            return Ok(());
        }
        let sql = format!(
            "DELETE FROM {} WHERE {}",
            quote(&pivot.table),
            clauses.join(" OR ")
        );
        self.cursor.execute(&sql, params.params())?;
        Ok(())
    }

    /// One multi-row `INSERT` per chunk; existing pairs are kept.
    fn insert_links(&mut self, pivot: &PivotTable, pairs: &[(i64, i64)]) -> Result<()> {
        for chunk in pairs.chunks(MAX_PARAMS / 2) {
            let mut params = ParamBuilder::new();
            let tuples = chunk
                .iter()
                .map(|(owner, target)| format!("({}, {})", params.push(*owner), params.push(*target)))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                "INSERT INTO {} ({}, {}) VALUES {tuples} ON CONFLICT DO NOTHING",
                quote(&pivot.table),
                quote(&pivot.column1),
                quote(&pivot.column2)
            );
            self.cursor.execute(&sql, params.params())?;
        }
        Ok(())
    }

    fn apply_one2many(
        &mut self,
        model: &ModelDef,
        field: &FieldDef,
        comodel: &str,
        inverse: &str,
        per_record: Vec<(i64, Vec<Command>)>,
    ) -> Result<()> {
        let comodel_def = self.model(comodel)?;
        let inverse_def = comodel_def.require_field(inverse)?;
        let delete_orphans = inverse_def.required
            || matches!(
                inverse_def.kind,
                FieldKind::Many2one {
                    ondelete: OnDelete::Cascade,
                    ..
                }
            );

        let mut creates: Vec<Values> = Vec::new();
        let mut owners = Vec::with_capacity(per_record.len());
        for (owner, commands) in per_record {
            owners.push(owner);
            for command in commands {
                match command {
                    Command::Create(mut values) => {
                        values.insert(inverse, Value::Int(owner));
                        creates.push(values);
                    }
                    Command::Update(id, values) => {
                        self.write(&RecordSet::new(comodel, vec![id]), values)?;
                    }
                    Command::Delete(id) => {
                        self.unlink(&RecordSet::new(comodel, vec![id]))?;
                    }
                    Command::Unlink(id) => {
                        self.detach_children(comodel, inverse, delete_orphans, vec![id])?;
                    }
                    Command::Link(id) => {
                        let values = Values::new().set(inverse, owner);
                        self.write(&RecordSet::new(comodel, vec![id]), values)?;
                    }
                    Command::Clear => {
                        let children = self.children(model, field, owner)?;
                        self.detach_children(comodel, inverse, delete_orphans, children)?;
                    }
                    Command::Set(ids) => {
                        let children = self.children(model, field, owner)?;
                        let dropped: Vec<i64> = children.iter().copied().filter(|c| !ids.contains(c)).collect();
                        self.detach_children(comodel, inverse, delete_orphans, dropped)?;
                        let linked: Vec<i64> = ids.into_iter().filter(|id| !children.contains(id)).collect();
                        if !linked.is_empty() {
                            let values = Values::new().set(inverse, owner);
                            self.write(&RecordSet::new(comodel, linked), values)?;
                        }
                    }
                }
            }
        }

        if !creates.is_empty() {
            self.create_many(comodel, creates)?;
        }
        self.cache.invalidate_entries(&model.name, &field.name, &owners);
        Ok(())
    }

    fn children(&mut self, model: &ModelDef, field: &FieldDef, owner: i64) -> Result<Vec<i64>> {
        Ok(self.get(&model.name, owner, &field.name)?.as_ids().unwrap_or_default())
    }

    /// Remove children from their parent: delete them when the inverse
    /// cannot be empty, clear the inverse otherwise.
    fn detach_children(&mut self, comodel: &str, inverse: &str, delete: bool, children: Vec<i64>) -> Result<()> {
        if children.is_empty() {
            return Ok(());
        }
        let records = RecordSet::new(comodel, children);
        if delete {
            self.unlink(&records)?;
        } else {
            self.write(&records, Values::new().set(inverse, Value::Null))?;
        }
        Ok(())
    }

    /// Replace the attachment of `field` on each record.
    pub(crate) fn store_attachments(&mut self, model: &ModelDef, field: &str, per_record: &[(i64, Value)]) -> Result<()> {
        let ids: Vec<i64> = per_record.iter().map(|(id, _)| *id).collect();
        for chunk in ids.chunks(IN_CHUNK_SIZE) {
            let mut params = ParamBuilder::new();
            let model_ph = params.push(model.name.as_str());
            let field_ph = params.push(field);
            let list = params.push_all(chunk.iter().copied().map(Value::Int));
            let sql = format!(
                "DELETE FROM \"ir_attachment\" \
                 WHERE \"res_model\" = {model_ph} AND \"res_field\" = {field_ph} AND \"res_id\" IN ({list})"
            );
            self.cursor.execute(&sql, params.params())?;
        }

        let now = Value::now();
        let payloads: Vec<&(i64, Value)> = per_record.iter().filter(|(_, v)| !v.is_null()).collect();
        for chunk in payloads.chunks(MAX_PARAMS / 7) {
            let mut params = ParamBuilder::new();
            let tuples = chunk
                .iter()
                .map(|(id, data)| {
                    let values = [
                        params.push(format!("{}.{field}", model.name)),
                        params.push(model.name.as_str()),
                        params.push(field),
                        params.push(*id),
                        params.push(data.clone()),
                        params.push(now.clone()),
                        params.push(now.clone()),
                    ];
                    format!("({})", values.join(", "))
                })
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                "INSERT INTO \"ir_attachment\" \
                 (\"name\", \"res_model\", \"res_field\", \"res_id\", \"datas\", \"create_date\", \"write_date\") \
                 VALUES {tuples}"
            );
            self.cursor.execute(&sql, params.params())?;
        }

        for (id, data) in per_record {
            self.cache.set(&model.name, *id, field, data.clone());
        }
        Ok(())
    }

    /// Evict cached fields mirroring `(model, field)` on `targets`.
    pub(crate) fn invalidate_mirrors(&mut self, model: &str, field: &str, targets: &[i64]) {
        if targets.is_empty() {
            return;
        }
        let registry = self.registry.clone();
        for (mirror_model, mirror_field) in registry.related_fields(model, field) {
            self.cache.invalidate_entries(mirror_model, mirror_field, targets);
        }
    }
}

fn push_unique(ids: &mut Vec<i64>, id: i64) {
    if !ids.contains(&id) {
        ids.push(id);
    }
}
