//! Per-transaction record cache.
//!
//! Within one unit of work the cache is the only source of field values:
//! reads go through it and writes update it before any statement runs.

use std::collections::HashMap;

use nexo_proto::Value;
use thiserror::Error;

/// A field value is not cached.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{model}({id}).{field} is not cached")]
pub struct CacheMiss {
    pub model: String,
    pub id: i64,
    pub field: String,
}

type FieldValues = HashMap<i64, Value>;

/// `(model, record id, field) -> value`.
#[derive(Debug, Default)]
pub struct RecordCache {
    models: HashMap<String, HashMap<String, FieldValues>>,
}

impl RecordCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached value of one field of one record.
    pub fn get(&self, model: &str, id: i64, field: &str) -> Result<&Value, CacheMiss> {
        self.models
            .get(model)
            .and_then(|fields| fields.get(field))
            .and_then(|values| values.get(&id))
            .ok_or_else(|| CacheMiss {
                model: model.to_string(),
                id,
                field: field.to_string(),
            })
    }

    pub fn contains(&self, model: &str, id: i64, field: &str) -> bool {
        self.get(model, id, field).is_ok()
    }

    pub fn set(&mut self, model: &str, id: i64, field: &str, value: Value) {
        self.field_mut(model, field).insert(id, value);
    }

    /// Store a fetched value unless one is already cached. Values assigned
    /// in this unit of work but not yet flushed win over storage.
    pub fn set_if_absent(&mut self, model: &str, id: i64, field: &str, value: Value) {
        self.field_mut(model, field).entry(id).or_insert(value);
    }

    /// Assign the same value to many records.
    pub fn set_many(&mut self, model: &str, ids: &[i64], field: &str, value: &Value) {
        let values = self.field_mut(model, field);
        for id in ids {
            values.insert(*id, value.clone());
        }
    }

    /// Ids among `ids` whose `field` is not cached, in input order.
    pub fn missing_ids(&self, model: &str, field: &str, ids: &[i64]) -> Vec<i64> {
        let cached = self.models.get(model).and_then(|fields| fields.get(field));
        ids.iter()
            .copied()
            .filter(|id| cached.map_or(true, |values| !values.contains_key(id)))
            .collect()
    }

    /// Forget one field for every record of a model.
    pub fn invalidate_field(&mut self, model: &str, field: &str) {
        if let Some(fields) = self.models.get_mut(model) {
            fields.remove(field);
        }
    }

    /// Forget one field for some records.
    pub fn invalidate_entries(&mut self, model: &str, field: &str, ids: &[i64]) {
        if let Some(values) = self.models.get_mut(model).and_then(|f| f.get_mut(field)) {
            for id in ids {
                values.remove(id);
            }
        }
    }

    /// Forget every field of some records.
    pub fn invalidate_records(&mut self, model: &str, ids: &[i64]) {
        if let Some(fields) = self.models.get_mut(model) {
            for values in fields.values_mut() {
                for id in ids {
                    values.remove(id);
                }
            }
        }
    }

    pub fn invalidate_model(&mut self, model: &str) {
        self.models.remove(model);
    }

    pub fn clear(&mut self) {
        self.models.clear();
    }

    /// Number of cached values.
    pub fn len(&self) -> usize {
        self.models
            .values()
            .flat_map(|fields| fields.values())
            .map(HashMap::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn field_mut(&mut self, model: &str, field: &str) -> &mut FieldValues {
        self.models
            .entry(model.to_string())
            .or_default()
            .entry(field.to_string())
            .or_default()
    }
}
