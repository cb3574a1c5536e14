//! Recompute work queue and pending-write buffer.

use std::collections::{BTreeMap, BTreeSet};

use nexo_proto::Value;

/// Lifecycle of the recompute queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecomputeState {
    Idle,
    /// Work is queued.
    Dirty,
    /// A drain loop is running.
    Draining,
}

/// Stored computed fields waiting for recomputation, grouped by
/// `(model, field)`.
#[derive(Debug, Default)]
pub struct RecomputeQueue {
    items: BTreeMap<(String, String), BTreeSet<i64>>,
    draining: bool,
}

impl RecomputeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> RecomputeState {
        if self.draining {
            RecomputeState::Draining
        } else if self.items.is_empty() {
            RecomputeState::Idle
        } else {
            RecomputeState::Dirty
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_draining(&self) -> bool {
        self.draining
    }

    pub(crate) fn set_draining(&mut self, draining: bool) {
        self.draining = draining;
    }

    /// Queue `ids` for `(model, field)`.
    pub fn enqueue(&mut self, model: &str, field: &str, ids: impl IntoIterator<Item = i64>) {
        let entry = self
            .items
            .entry((model.to_string(), field.to_string()))
            .or_default();
        entry.extend(ids);
        if entry.is_empty() {
            self.items.remove(&(model.to_string(), field.to_string()));
        }
    }

    /// Whether `(model, id, field)` is queued.
    pub fn contains(&self, model: &str, field: &str, id: i64) -> bool {
        self.items
            .get(&(model.to_string(), field.to_string()))
            .is_some_and(|ids| ids.contains(&id))
    }

    /// Queued `(model, field)` groups, in order.
    pub fn groups(&self) -> Vec<(String, String)> {
        self.items.keys().cloned().collect()
    }

    /// Remove and return the ids queued for one group.
    pub fn take(&mut self, model: &str, field: &str) -> Option<Vec<i64>> {
        self.items
            .remove(&(model.to_string(), field.to_string()))
            .map(|ids| ids.into_iter().collect())
    }

    /// Remove and return every group.
    pub fn take_all(&mut self) -> Vec<((String, String), Vec<i64>)> {
        std::mem::take(&mut self.items)
            .into_iter()
            .map(|(key, ids)| (key, ids.into_iter().collect()))
            .collect()
    }

    /// Forget deleted records.
    pub fn remove_ids(&mut self, model: &str, ids: &[i64]) {
        self.items.retain(|(m, _), queued| {
            if m == model {
                for id in ids {
                    queued.remove(id);
                }
            }
            !queued.is_empty()
        });
    }

    /// `model.field(n ids)` per group, for divergence reports.
    pub fn describe(&self) -> Vec<String> {
        self.items
            .iter()
            .map(|((model, field), ids)| format!("{model}.{field}({} ids)", ids.len()))
            .collect()
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.draining = false;
    }
}

/// One batched update produced by [`PendingWrites::take_groups`].
#[derive(Debug, Clone, PartialEq)]
pub struct WriteGroup {
    pub model: String,
    /// Column assignments shared by every id.
    pub values: Vec<(String, Value)>,
    pub ids: Vec<i64>,
}

/// Computed values assigned in cache but not yet written.
#[derive(Debug, Default)]
pub struct PendingWrites {
    records: BTreeMap<String, BTreeMap<i64, BTreeMap<String, Value>>>,
}

impl PendingWrites {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Record a value for one column of one record.
    pub fn record(&mut self, model: &str, id: i64, field: &str, value: Value) {
        self.records
            .entry(model.to_string())
            .or_default()
            .entry(id)
            .or_default()
            .insert(field.to_string(), value);
    }

    /// Drop buffered values of deleted records.
    pub fn remove_ids(&mut self, model: &str, ids: &[i64]) {
        if let Some(records) = self.records.get_mut(model) {
            for id in ids {
                records.remove(id);
            }
            if records.is_empty() {
                self.records.remove(model);
            }
        }
    }

    /// Drain the buffer, merging records with identical value maps into one
    /// group each.
    pub fn take_groups(&mut self) -> Vec<WriteGroup> {
        let mut groups = Vec::new();
        for (model, records) in std::mem::take(&mut self.records) {
            let mut merged: Vec<(BTreeMap<String, Value>, Vec<i64>)> = Vec::new();
            for (id, values) in records {
                match merged.iter_mut().find(|(v, _)| *v == values) {
                    Some((_, ids)) => ids.push(id),
                    None => merged.push((values, vec![id])),
                }
            }
            groups.extend(merged.into_iter().map(|(values, ids)| WriteGroup {
                model: model.clone(),
                values: values.into_iter().collect(),
                ids,
            }));
        }
        groups
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}
