//! Runtime value types for field data, domain literals and read results.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{ProtoError, ProtoResult};

/// Text format used for persisted and serialized datetimes.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Text format used for persisted and serialized dates.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// A runtime field value.
///
/// Scalars map to columns; `Ref` and `Ids` are the read representations of
/// many-to-one and x-to-many fields; `List` carries domain collections such
/// as the right-hand side of `in`.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// Absent value.
    #[default]
    Null,
    /// Boolean value.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit floating point.
    Float(f64),
    /// UTF-8 text.
    Text(String),
    /// Binary payload.
    Bytes(Vec<u8>),
    /// Calendar date.
    Date(NaiveDate),
    /// Naive UTC timestamp.
    DateTime(NaiveDateTime),
    /// Many-to-one read representation: `(id, label)`.
    Ref(i64, String),
    /// One-to-many / many-to-many read representation.
    Ids(Vec<i64>),
    /// A literal collection.
    List(Vec<Value>),
}

impl Value {
    /// Current UTC time truncated to whole seconds.
    pub fn now() -> Self {
        let now = Utc::now().naive_utc();
        Value::DateTime(now.with_nanosecond(0).unwrap_or(now))
    }

    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Null or `false`: the two spellings of "no value" on the wire.
    pub fn is_falsy(&self) -> bool {
        matches!(self, Value::Null | Value::Bool(false))
    }

    /// Try to get as bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(i) => Some(*i != 0),
            _ => None,
        }
    }

    /// Try to get as i64. A many-to-one reference yields its id.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Ref(id, _) => Some(*id),
            _ => None,
        }
    }

    /// Try to get as f64, widening integers.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Try to get as string reference.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as bytes reference.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Try to get as datetime.
    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Value::DateTime(dt) => Some(*dt),
            Value::Text(s) => parse_datetime(s),
            _ => None,
        }
    }

    /// Try to get as a list of record ids.
    pub fn as_ids(&self) -> Option<Vec<i64>> {
        match self {
            Value::Ids(ids) => Some(ids.clone()),
            Value::List(items) => items.iter().map(Value::as_i64).collect(),
            _ => None,
        }
    }

    /// Try to get as a literal collection.
    pub fn as_list(&self) -> Option<Vec<Value>> {
        match self {
            Value::List(items) => Some(items.clone()),
            Value::Ids(ids) => Some(ids.iter().copied().map(Value::Int).collect()),
            _ => None,
        }
    }

    /// Short name of the variant, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::Date(_) => "date",
            Value::DateTime(_) => "datetime",
            Value::Ref(..) => "reference",
            Value::Ids(_) => "ids",
            Value::List(_) => "list",
        }
    }

    /// Convert to the JSON wire form.
    ///
    /// Bytes become lowercase hex, dates and datetimes their text formats,
    /// references a `[id, label]` pair.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => Json::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::Text(s) => Json::String(s.clone()),
            Value::Bytes(b) => Json::String(hex::encode(b)),
            Value::Date(d) => Json::String(d.format(DATE_FORMAT).to_string()),
            Value::DateTime(dt) => Json::String(dt.format(DATETIME_FORMAT).to_string()),
            Value::Ref(id, label) => Json::Array(vec![Json::from(*id), Json::String(label.clone())]),
            Value::Ids(ids) => Json::Array(ids.iter().map(|id| Json::from(*id)).collect()),
            Value::List(items) => Json::Array(items.iter().map(Value::to_json).collect()),
        }
    }

    /// Decode a JSON wire value. Strings stay text; callers coerce them
    /// against the declared field type.
    pub fn from_json(json: &serde_json::Value) -> ProtoResult<Self> {
        use serde_json::Value as Json;
        Ok(match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(
                    n.as_f64()
                        .ok_or_else(|| ProtoError::UnsupportedValue(n.to_string()))?,
                ),
            },
            Json::String(s) => Value::Text(s.clone()),
            Json::Array(items) => Value::List(
                items
                    .iter()
                    .map(Value::from_json)
                    .collect::<ProtoResult<Vec<_>>>()?,
            ),
            Json::Object(_) => return Err(ProtoError::UnsupportedValue(json.to_string())),
        })
    }
}

/// Parse a datetime in the persisted text format (fractional seconds allowed).
pub fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
}

/// Parse a date in the persisted text format.
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text, DATE_FORMAT).ok()
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, ""),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => write!(f, "{s}"),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::Date(d) => write!(f, "{}", d.format(DATE_FORMAT)),
            Value::DateTime(dt) => write!(f, "{}", dt.format(DATETIME_FORMAT)),
            Value::Ref(_, label) => write!(f, "{label}"),
            Value::Ids(ids) => {
                let parts: Vec<String> = ids.iter().map(i64::to_string).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            Value::List(items) => {
                let parts: Vec<String> = items.iter().map(Value::to_string).collect();
                write!(f, "[{}]", parts.join(", "))
            }
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = serde_json::Value::deserialize(deserializer)?;
        Value::from_json(&json).map_err(serde::de::Error::custom)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::DateTime(v)
    }
}

impl From<Vec<i64>> for Value {
    fn from(v: Vec<i64>) -> Self {
        Value::List(v.into_iter().map(Value::Int).collect())
    }
}

impl From<Vec<&str>> for Value {
    fn from(v: Vec<&str>) -> Self {
        Value::List(v.into_iter().map(Value::from).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_accessors() {
        assert!(Value::Null.is_null());
        assert!(Value::Bool(false).is_falsy());
        assert!(!Value::Int(0).is_falsy());

        assert_eq!(Value::Int(42).as_i64(), Some(42));
        assert_eq!(Value::Ref(7, "Acme".into()).as_i64(), Some(7));
        assert_eq!(Value::Int(2).as_f64(), Some(2.0));
        assert_eq!(Value::Text("hello".into()).as_str(), Some("hello"));
        assert_eq!(Value::from(vec![1i64, 2]).as_ids(), Some(vec![1, 2]));
        assert_eq!(Value::Ids(vec![3]).as_ids(), Some(vec![3]));
        assert_eq!(Value::List(vec![Value::Text("x".into())]).as_ids(), None);
    }

    #[test]
    fn test_json_forms() {
        assert_eq!(Value::Ref(3, "Bob".into()).to_json(), json!([3, "Bob"]));
        assert_eq!(Value::Bytes(vec![0xde, 0xad]).to_json(), json!("dead"));
        assert_eq!(Value::Ids(vec![1, 2]).to_json(), json!([1, 2]));

        let dt = parse_datetime("2024-03-01 10:20:30").unwrap();
        assert_eq!(Value::DateTime(dt).to_json(), json!("2024-03-01 10:20:30"));
    }

    #[test]
    fn test_from_json() {
        assert_eq!(Value::from_json(&json!(null)).unwrap(), Value::Null);
        assert_eq!(Value::from_json(&json!(1.5)).unwrap(), Value::Float(1.5));
        assert_eq!(
            Value::from_json(&json!([1, "a"])).unwrap(),
            Value::List(vec![Value::Int(1), Value::Text("a".into())])
        );
        assert!(Value::from_json(&json!({"a": 1})).is_err());
    }

    #[test]
    fn test_now_is_truncated() {
        let now = Value::now().as_datetime().unwrap();
        assert_eq!(now.nanosecond(), 0);
    }

    #[test]
    fn test_serde_through_json() {
        let v: Value = serde_json::from_str("[1, 2]").unwrap();
        assert_eq!(v, Value::from(vec![1i64, 2]));
        assert_eq!(serde_json::to_string(&Value::Bool(true)).unwrap(), "true");
    }
}
