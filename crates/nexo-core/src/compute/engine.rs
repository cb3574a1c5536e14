//! Dependency propagation, recompute drain and flush.
//!
//! A modification of `(model, field)` on some ids walks the dependency
//! graph: stored computed dependents are queued, unstored ones are evicted
//! from the cache so the next read recomputes them. Draining runs compute
//! methods group by group until the queue is empty or the iteration bound
//! is hit, then buffered values are written with one `UPDATE` per group of
//! identical assignments.

use std::collections::{BTreeSet, HashMap};

use nexo_proto::Value;

use super::graph::{Trigger, TriggerPath};
use crate::catalog::{FieldDef, ModelDef};
use crate::error::{Error, Result};
use crate::orm::{coerce_input, Environment, RecordSet};
use crate::sql::{quote, ParamBuilder, IN_CHUNK_SIZE};

impl Environment {
    /// Assign a computed field on every record of `records`.
    ///
    /// Called from compute methods. Stored values are buffered until the
    /// next flush; dependents of changed values are marked.
    pub fn assign(&mut self, records: &RecordSet, field: &str, value: impl Into<Value>) -> Result<()> {
        let model = self.model(records.model())?;
        let def = model.require_field(field)?;
        if !def.is_computed() {
            return Err(Error::Validation(format!(
                "{}.{field} is not computed; use write",
                model.name
            )));
        }
        let value = coerce_input(&model.name, def, value.into())?;

        let mut changed = Vec::new();
        for id in records.ids() {
            let previous = self.cache.get(&model.name, *id, field).ok();
            let differs = previous != Some(&value);
            let notify = match previous {
                Some(_) => differs,
                None => def.is_stored(),
            };
            if differs {
                self.cache.set(&model.name, *id, field, value.clone());
                if def.is_stored() {
                    self.pending.record(&model.name, *id, field, value.clone());
                }
            }
            if notify {
                changed.push(*id);
            }
        }
        self.mark_modified(&model.name, &[field], &changed)
    }

    /// Propagate a modification of `fields` on `ids` through the
    /// dependency graph.
    pub(crate) fn mark_modified(&mut self, model: &str, fields: &[&str], ids: &[i64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let registry = self.registry.clone();
        let mut visited: HashMap<(String, String), BTreeSet<i64>> = HashMap::new();
        let mut work: Vec<(String, String, Vec<i64>)> = fields
            .iter()
            .map(|f| (model.to_string(), f.to_string(), ids.to_vec()))
            .collect();

        while let Some((source_model, source_field, source_ids)) = work.pop() {
            for trigger in registry.graph().dependents(&source_model, &source_field) {
                let targets = self.resolve_trigger(&source_model, trigger, &source_ids)?;
                let seen = visited
                    .entry((trigger.model.clone(), trigger.field.clone()))
                    .or_default();
                let fresh: Vec<i64> = targets.into_iter().filter(|id| seen.insert(*id)).collect();
                if fresh.is_empty() {
                    continue;
                }

                let dependent = registry.model(&trigger.model)?.require_field(&trigger.field)?;
                if dependent.is_stored() {
                    self.recompute.enqueue(&trigger.model, &trigger.field, fresh.iter().copied());
                } else {
                    self.cache.invalidate_entries(&trigger.model, &trigger.field, &fresh);
                }
                work.push((trigger.model.clone(), trigger.field.clone(), fresh));
            }
        }
        Ok(())
    }

    /// Ids of `trigger.model` affected by a change on `ids` of `source_model`.
    fn resolve_trigger(&mut self, source_model: &str, trigger: &Trigger, ids: &[i64]) -> Result<Vec<i64>> {
        let targets = match &trigger.path {
            TriggerPath::Same => ids.to_vec(),
            TriggerPath::Forward { field } => {
                self.add_prefetch(source_model, ids);
                let mut parents = Vec::new();
                for id in ids {
                    match self.get(source_model, *id, field) {
                        Ok(value) => parents.extend(value.as_i64()),
                        Err(Error::MissingRecords { .. }) => {}
                        Err(err) => return Err(err),
                    }
                }
                parents
            }
            TriggerPath::Reverse { field } => {
                self.flush()?;
                let dependent = self.model(&trigger.model)?;
                self.select_ids_in(&dependent.table, "id", field, ids)?
            }
            TriggerPath::Pivot {
                table,
                dependent_column,
                source_column,
            } => self.select_ids_in(table, dependent_column, source_column, ids)?,
        };
        let mut targets = targets;
        targets.sort_unstable();
        targets.dedup();
        Ok(targets)
    }

    fn select_ids_in(&mut self, table: &str, select: &str, column: &str, ids: &[i64]) -> Result<Vec<i64>> {
        let mut found = Vec::new();
        for chunk in ids.chunks(IN_CHUNK_SIZE) {
            let mut params = ParamBuilder::new();
            let list = params.push_all(chunk.iter().copied().map(Value::Int));
            let sql = format!(
                "SELECT {} FROM {} WHERE {} IN ({list})",
                quote(select),
                quote(table),
                quote(column)
            );
            found.extend(self.cursor.query_ids(&sql, params.params())?);
        }
        Ok(found)
    }

    /// Drain the recompute queue to a fixpoint.
    ///
    /// Fails with [`Error::RecomputeDivergence`] when the queue is still
    /// non-empty after the configured number of passes; the queue and the
    /// pending writes are then discarded.
    pub fn recompute(&mut self) -> Result<()> {
        if self.recompute.is_draining() || self.recompute.is_empty() {
            return Ok(());
        }
        self.recompute.set_draining(true);
        let result = self.drain();
        self.recompute.set_draining(false);
        if let Err(err) = &result {
            tracing::error!(uid = self.actor.uid, error = %err, "recompute failed");
            self.recompute.clear();
            self.pending.clear();
        }
        result
    }

    fn drain(&mut self) -> Result<()> {
        let max_iterations = self.runtime.config().recompute_max_iterations;
        let mut iterations = 0;

        while !self.recompute.is_empty() {
            if iterations >= max_iterations {
                return Err(Error::RecomputeDivergence {
                    iterations,
                    pending: self.recompute.describe(),
                });
            }
            iterations += 1;

            // Groups queued during this pass wait for the next one, unless a
            // compute method reads them first.
            for (model, field) in self.recompute.groups() {
                let Some(ids) = self.recompute.take(&model, &field) else {
                    continue;
                };
                let model_def = self.model(&model)?;
                let def = model_def.require_field(&field)?;
                self.compute_field(&model_def, def, &ids)?;
            }
        }

        tracing::debug!(iterations, pending = !self.pending.is_empty(), "recompute reached fixpoint");
        Ok(())
    }

    /// Run the compute method of `field` on `ids`. Records the method left
    /// unassigned get the empty value.
    pub(crate) fn compute_field(&mut self, model: &ModelDef, field: &FieldDef, ids: &[i64]) -> Result<()> {
        let Some(compute) = field.compute.clone() else {
            return Err(Error::Internal(format!(
                "{}.{} has no compute method",
                model.name, field.name
            )));
        };
        if ids.is_empty() {
            return Ok(());
        }

        self.add_prefetch(&model.name, ids);
        let records = RecordSet::new(model.name.clone(), ids.to_vec());
        tracing::trace!(
            model = %model.name,
            field = %field.name,
            method = %compute.method,
            records = ids.len(),
            "compute"
        );
        (compute.func)(self, &records)?;

        let unassigned = self.cache.missing_ids(&model.name, &field.name, ids);
        if !unassigned.is_empty() {
            self.assign(&RecordSet::new(model.name.clone(), unassigned), &field.name, Value::Null)?;
        }
        Ok(())
    }

    /// Write buffered computed values, one `UPDATE` per group of records
    /// sharing the same assignments.
    pub fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let groups = self.pending.take_groups();
        let mut statements = 0;

        for group in &groups {
            let model = self.model(&group.model)?;
            for chunk in group.ids.chunks(IN_CHUNK_SIZE) {
                let mut params = ParamBuilder::new();
                let assignments = group
                    .values
                    .iter()
                    .map(|(field, value)| format!("{} = {}", quote(field), params.push(value.clone())))
                    .collect::<Vec<_>>()
                    .join(", ");
                let list = params.push_all(chunk.iter().copied().map(Value::Int));
                let sql = format!(
                    "UPDATE {} SET {assignments} WHERE \"id\" IN ({list})",
                    quote(&model.table)
                );
                self.cursor.execute(&sql, params.params())?;
                statements += 1;
            }
        }
        tracing::debug!(groups = groups.len(), statements, "flushed computed values");
        Ok(())
    }
}
