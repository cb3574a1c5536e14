//! Conversions between caller values, cached values and column values.
//!
//! The cache holds column representations: many-to-one fields as bare ids,
//! booleans as `Bool`, dates as `Date`/`DateTime`. The read representation
//! (`Ref` labels, `false` for empty references) is built by `read`.

use nexo_proto::{parse_date, parse_datetime, Value};

use crate::catalog::{FieldDef, FieldKind};
use crate::error::{Error, Result};

/// Validate and normalize a value assigned to a column-stored field.
pub fn coerce_input(model: &str, field: &FieldDef, value: Value) -> Result<Value> {
    let invalid = |value: &Value| {
        Error::Validation(format!(
            "invalid value {value:?} for {} field {model}.{}",
            field.kind.name(),
            field.name
        ))
    };

    if let FieldKind::Boolean = field.kind {
        return match value {
            Value::Null => Ok(Value::Bool(false)),
            Value::Bool(b) => Ok(Value::Bool(b)),
            Value::Int(i) => Ok(Value::Bool(i != 0)),
            other => Err(invalid(&other)),
        };
    }
    if value.is_falsy() {
        return Ok(Value::Null);
    }

    let coerced = match (&field.kind, value) {
        (FieldKind::Char | FieldKind::Text, Value::Text(s)) => Value::Text(s),
        (FieldKind::Selection(options), Value::Text(key)) => {
            if !options.iter().any(|(k, _)| *k == key) {
                return Err(Error::Validation(format!(
                    "'{key}' is not a valid option of {model}.{}",
                    field.name
                )));
            }
            Value::Text(key)
        }
        (FieldKind::Integer, Value::Int(i)) => Value::Int(i),
        (FieldKind::Float, Value::Float(f)) => Value::Float(f),
        (FieldKind::Float, Value::Int(i)) => Value::Float(i as f64),
        (FieldKind::Date, Value::Date(d)) => Value::Date(d),
        (FieldKind::Date, Value::DateTime(dt)) => Value::Date(dt.date()),
        (FieldKind::Date, Value::Text(s)) => match parse_date(&s) {
            Some(d) => Value::Date(d),
            None => return Err(invalid(&Value::Text(s))),
        },
        (FieldKind::Datetime, Value::DateTime(dt)) => Value::DateTime(dt),
        (FieldKind::Datetime, Value::Date(d)) => match d.and_hms_opt(0, 0, 0) {
            Some(dt) => Value::DateTime(dt),
            None => return Err(invalid(&Value::Date(d))),
        },
        (FieldKind::Datetime, Value::Text(s)) => match parse_datetime(&s) {
            Some(dt) => Value::DateTime(dt),
            None => return Err(invalid(&Value::Text(s))),
        },
        (FieldKind::Many2one { .. }, Value::Int(id)) | (FieldKind::Many2one { .. }, Value::Ref(id, _)) => {
            Value::Int(id)
        }
        (FieldKind::Binary { .. }, Value::Bytes(b)) => Value::Bytes(b),
        (FieldKind::Binary { .. }, Value::Text(s)) => match hex::decode(&s) {
            Ok(bytes) => Value::Bytes(bytes),
            Err(_) => return Err(invalid(&Value::Text(s))),
        },
        (_, other) => return Err(invalid(&other)),
    };
    Ok(coerced)
}

/// Convert a raw column value to its cached representation.
pub fn from_column(raw: Value, kind: &FieldKind) -> Value {
    match (kind, raw) {
        (FieldKind::Boolean, Value::Null) => Value::Bool(false),
        (FieldKind::Boolean, Value::Int(i)) => Value::Bool(i != 0),
        (FieldKind::Float, Value::Int(i)) => Value::Float(i as f64),
        (FieldKind::Date, Value::Text(s)) => parse_date(&s).map(Value::Date).unwrap_or(Value::Text(s)),
        (FieldKind::Datetime, Value::Text(s)) => parse_datetime(&s)
            .map(Value::DateTime)
            .unwrap_or(Value::Text(s)),
        (_, raw) => raw,
    }
}
