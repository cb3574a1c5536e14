//! Record sets.

use std::collections::BTreeMap;

use nexo_proto::{Value, Values};

use super::environment::Environment;
use crate::error::{Error, Result};

/// One row of a [`read`](RecordSet::read): field name to read value.
pub type Record = BTreeMap<String, Value>;

/// Ordered ids of one model.
///
/// A record set is plain data; every operation takes the [`Environment`]
/// it runs in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordSet {
    model: String,
    ids: Vec<i64>,
}

impl RecordSet {
    pub fn new(model: impl Into<String>, ids: impl Into<Vec<i64>>) -> Self {
        Self {
            model: model.into(),
            ids: ids.into(),
        }
    }

    /// Empty record set of `model`.
    pub fn empty(model: impl Into<String>) -> Self {
        Self::new(model, Vec::new())
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn ids(&self) -> &[i64] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: i64) -> bool {
        self.ids.contains(&id)
    }

    /// The single id of a singleton.
    pub fn ensure_one(&self) -> Result<i64> {
        match self.ids.as_slice() {
            [id] => Ok(*id),
            ids => Err(Error::Validation(format!(
                "expected a single {} record, got {}",
                self.model,
                ids.len()
            ))),
        }
    }

    /// Singletons, in order.
    pub fn iter(&self) -> impl Iterator<Item = RecordSet> + '_ {
        self.ids.iter().map(|id| RecordSet::new(self.model.clone(), vec![*id]))
    }

    /// Union keeping first occurrences in order.
    pub fn union(&self, other: &RecordSet) -> Result<RecordSet> {
        if self.model != other.model {
            return Err(Error::Validation(format!(
                "cannot combine {} and {} records",
                self.model, other.model
            )));
        }
        let mut ids = self.ids.clone();
        for id in &other.ids {
            if !ids.contains(id) {
                ids.push(*id);
            }
        }
        Ok(RecordSet::new(self.model.clone(), ids))
    }

    /// Read `fields` (all when `None`) of every record.
    pub fn read(&self, env: &mut Environment, fields: Option<&[&str]>) -> Result<Vec<Record>> {
        env.read(self, fields)
    }

    /// Write the same values to every record.
    pub fn write(&self, env: &mut Environment, values: Values) -> Result<bool> {
        env.write(self, values)
    }

    /// Delete every record.
    pub fn unlink(&self, env: &mut Environment) -> Result<bool> {
        env.unlink(self)
    }

    /// `(id, label)` of every record.
    pub fn name_get(&self, env: &mut Environment) -> Result<Vec<(i64, String)>> {
        env.name_get(self)
    }

    /// Cached value of `field` on a singleton, fetched on a miss.
    pub fn get(&self, env: &mut Environment, field: &str) -> Result<Value> {
        let id = self.ensure_one()?;
        env.get(&self.model, id, field)
    }

    /// Follow a relational field, collecting the related records.
    pub fn mapped(&self, env: &mut Environment, field: &str) -> Result<RecordSet> {
        let model = env.model(&self.model)?;
        let def = model.require_field(field)?;
        let comodel = def.comodel().ok_or_else(|| {
            Error::Validation(format!("{}.{field} is not a relational field", self.model))
        })?;

        let mut ids: Vec<i64> = Vec::new();
        for id in &self.ids {
            let value = env.get(&self.model, *id, field)?;
            let related = match value {
                Value::Int(id) => vec![id],
                Value::Ids(ids) => ids,
                _ => Vec::new(),
            };
            for id in related {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
        env.browse(comodel, ids)
    }
}
