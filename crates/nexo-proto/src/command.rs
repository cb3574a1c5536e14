//! Write payloads: field values and relational commands.
//!
//! Relational fields are never assigned directly by callers. They receive a
//! list of commands using the numeric wire codes:
//!
//! | code | command |
//! |------|---------|
//! | `[0, 0, {vals}]` | create a nested record and link it |
//! | `[1, id, {vals}]` | write to a linked record |
//! | `[2, id]` | delete a linked record |
//! | `[3, id]` | unlink one record (keep it) |
//! | `[4, id]` | link one existing record |
//! | `[5]` | unlink everything |
//! | `[6, 0, [ids]]` | replace the links with exactly `ids` |

use std::collections::BTreeMap;

use crate::error::{ProtoError, ProtoResult};
use crate::value::Value;

/// A relational write command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Create(Values),
    Update(i64, Values),
    Delete(i64),
    Unlink(i64),
    Link(i64),
    Clear,
    Set(Vec<i64>),
}

impl Command {
    /// Numeric wire code of the command.
    pub fn code(&self) -> u8 {
        match self {
            Command::Create(_) => 0,
            Command::Update(..) => 1,
            Command::Delete(_) => 2,
            Command::Unlink(_) => 3,
            Command::Link(_) => 4,
            Command::Clear => 5,
            Command::Set(_) => 6,
        }
    }

    /// Decode a `[code, id, payload]` array.
    pub fn from_json(json: &serde_json::Value) -> ProtoResult<Self> {
        let parts = json
            .as_array()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ProtoError::MalformedCommand(json.to_string()))?;
        let code = parts[0]
            .as_u64()
            .ok_or_else(|| ProtoError::MalformedCommand(json.to_string()))?;

        let id = || {
            parts
                .get(1)
                .and_then(serde_json::Value::as_i64)
                .ok_or_else(|| ProtoError::MalformedCommand(format!("missing record id in {json}")))
        };
        let payload = || {
            parts
                .get(2)
                .ok_or_else(|| ProtoError::MalformedCommand(format!("missing payload in {json}")))
        };

        Ok(match code {
            0 => Command::Create(Values::from_json(payload()?)?),
            1 => Command::Update(id()?, Values::from_json(payload()?)?),
            2 => Command::Delete(id()?),
            3 => Command::Unlink(id()?),
            4 => Command::Link(id()?),
            5 => Command::Clear,
            6 => {
                let ids = payload()?
                    .as_array()
                    .ok_or_else(|| ProtoError::MalformedCommand(json.to_string()))?
                    .iter()
                    .map(|v| {
                        v.as_i64()
                            .ok_or_else(|| ProtoError::MalformedCommand(format!("non-integer id in {json}")))
                    })
                    .collect::<ProtoResult<Vec<_>>>()?;
                Command::Set(ids)
            }
            other => {
                return Err(ProtoError::MalformedCommand(format!(
                    "unknown command code {other}"
                )))
            }
        })
    }
}

/// Value assigned to one field in a write payload.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Value(Value),
    Commands(Vec<Command>),
}

impl FieldValue {
    /// Decode a JSON field value. A non-empty list whose items all look like
    /// commands is decoded as commands; anything else is a plain value.
    pub fn from_json(json: &serde_json::Value) -> ProtoResult<Self> {
        if let Some(items) = json.as_array() {
            let looks_like_commands = !items.is_empty()
                && items.iter().all(|item| {
                    item.as_array()
                        .and_then(|p| p.first())
                        .and_then(serde_json::Value::as_u64)
                        .is_some_and(|code| code <= 6)
                });
            if looks_like_commands {
                return items
                    .iter()
                    .map(Command::from_json)
                    .collect::<ProtoResult<Vec<_>>>()
                    .map(FieldValue::Commands);
            }
        }
        Value::from_json(json).map(FieldValue::Value)
    }
}

impl<T: Into<Value>> From<T> for FieldValue {
    fn from(v: T) -> Self {
        FieldValue::Value(v.into())
    }
}

impl From<Vec<Command>> for FieldValue {
    fn from(v: Vec<Command>) -> Self {
        FieldValue::Commands(v)
    }
}

/// Field-name to value map for create and write.
///
/// Keys are kept sorted so two payloads with the same fields and values
/// compare and hash identically.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Values(BTreeMap<String, FieldValue>);

impl Values {
    /// Create an empty payload.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: assign a scalar value.
    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), FieldValue::Value(value.into()));
        self
    }

    /// Builder: assign relational commands.
    pub fn with_commands(mut self, field: impl Into<String>, commands: Vec<Command>) -> Self {
        self.0.insert(field.into(), FieldValue::Commands(commands));
        self
    }

    /// Insert a field value.
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<FieldValue>) {
        self.0.insert(field.into(), value.into());
    }

    /// Remove a field.
    pub fn remove(&mut self, field: &str) -> Option<FieldValue> {
        self.0.remove(field)
    }

    /// Get a field value.
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.0.get(field)
    }

    /// Whether a field is present.
    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    /// Iterate over `(field, value)` pairs in field-name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.0.iter()
    }

    /// Field names in order.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Decode a JSON object payload.
    pub fn from_json(json: &serde_json::Value) -> ProtoResult<Self> {
        let object = json
            .as_object()
            .ok_or_else(|| ProtoError::UnsupportedValue(format!("expected an object, got {json}")))?;
        let mut values = Values::new();
        for (field, value) in object {
            values.insert(field.clone(), FieldValue::from_json(value)?);
        }
        Ok(values)
    }
}

impl IntoIterator for Values {
    type Item = (String, FieldValue);
    type IntoIter = std::collections::btree_map::IntoIter<String, FieldValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<K: Into<String>, V: Into<FieldValue>> FromIterator<(K, V)> for Values {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Values(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_command_codes() {
        assert_eq!(Command::from_json(&json!([4, 7])).unwrap(), Command::Link(7));
        assert_eq!(Command::from_json(&json!([3, 7, 0])).unwrap(), Command::Unlink(7));
        assert_eq!(Command::from_json(&json!([5])).unwrap(), Command::Clear);
        assert_eq!(
            Command::from_json(&json!([6, 0, [2, 3]])).unwrap(),
            Command::Set(vec![2, 3])
        );
        assert_eq!(
            Command::from_json(&json!([0, 0, {"name": "x"}])).unwrap(),
            Command::Create(Values::new().set("name", "x"))
        );
        assert_eq!(Command::Set(vec![]).code(), 6);
    }

    #[test]
    fn test_malformed_commands() {
        assert!(Command::from_json(&json!([])).is_err());
        assert!(Command::from_json(&json!([9, 1])).is_err());
        assert!(Command::from_json(&json!([4])).is_err());
        assert!(Command::from_json(&json!([6, 0, ["a"]])).is_err());
    }

    #[test]
    fn test_values_from_json() {
        let values = Values::from_json(&json!({
            "name": "Order",
            "tag_ids": [[6, 0, [1, 2]]],
            "scores": [1, 2],
        }))
        .unwrap();

        assert_eq!(values.get("name"), Some(&FieldValue::Value(Value::Text("Order".into()))));
        assert_eq!(
            values.get("tag_ids"),
            Some(&FieldValue::Commands(vec![Command::Set(vec![1, 2])]))
        );
        assert!(matches!(values.get("scores"), Some(FieldValue::Value(Value::List(_)))));
    }

    #[test]
    fn test_values_are_ordered() {
        let a = Values::new().set("b", 1).set("a", 2);
        let b = Values::new().set("a", 2).set("b", 1);
        assert_eq!(a, b);
        assert_eq!(a.keys().cloned().collect::<Vec<_>>(), vec!["a", "b"]);
    }
}
