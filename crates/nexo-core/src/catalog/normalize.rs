//! Declaration normalizer.
//!
//! Turns a [`ModelDecl`] into a complete [`ModelDef`]: identity and audit
//! fields are injected, table and pivot names derived, storage policies
//! assigned. The function is pure; cross-model checks happen in the
//! registry builder.

use std::collections::HashSet;

use super::field::FieldDef;
use super::model::{ModelDecl, ModelDef, CREATE_DATE_FIELD, ID_FIELD, MAGIC_FIELDS, WRITE_DATE_FIELD};
use super::types::{FieldKind, PivotTable, Storage};
use crate::error::{Error, Result};
use crate::sql::validate_identifier;

/// Default table name of a model: dots become underscores.
pub fn table_name(model: &str) -> String {
    model.replace('.', "_")
}

/// Pivot table for a many-to-many between `table1` and `table2` when none is
/// declared: both table names in sorted order, suffixed with `_rel`.
pub fn pivot_table(table1: &str, table2: &str) -> PivotTable {
    let (low, high) = if table1 <= table2 {
        (table1, table2)
    } else {
        (table2, table1)
    };
    let (column1, column2) = if table1 == table2 {
        (format!("{table1}_src_id"), format!("{table2}_dst_id"))
    } else {
        (format!("{table1}_id"), format!("{table2}_id"))
    };
    PivotTable {
        table: format!("{low}_{high}_rel"),
        column1,
        column2,
    }
}

/// Normalize one model declaration.
pub fn normalize(decl: ModelDecl) -> Result<ModelDef> {
    if decl.extends {
        return Err(Error::Validation(format!(
            "extension of '{}' has no base declaration",
            decl.name
        )));
    }
    validate_model_name(&decl.name)?;

    let table = decl.table.clone().unwrap_or_else(|| table_name(&decl.name));
    validate_identifier(&table)?;

    let mut seen = HashSet::new();
    let mut fields = Vec::with_capacity(decl.fields.len() + MAGIC_FIELDS.len());
    fields.push(FieldDef::integer(ID_FIELD).with_label("ID").readonly());

    for mut field in decl.fields {
        validate_identifier(&field.name)?;
        if MAGIC_FIELDS.contains(&field.name.as_str()) {
            return Err(Error::Validation(format!(
                "{}.{} is reserved",
                decl.name, field.name
            )));
        }
        if !seen.insert(field.name.clone()) {
            return Err(Error::Validation(format!(
                "duplicate field {}.{}",
                decl.name, field.name
            )));
        }
        field.storage = storage_for(&decl.name, &table, &field)?;
        fields.push(field);
    }

    fields.push(FieldDef::datetime(CREATE_DATE_FIELD).with_label("Created on").readonly());
    fields.push(FieldDef::datetime(WRITE_DATE_FIELD).with_label("Last Updated on").readonly());

    let rec_name = match decl.rec_name {
        Some(name) => {
            if !seen.contains(&name) {
                return Err(Error::Validation(format!(
                    "rec_name '{name}' is not a field of '{}'",
                    decl.name
                )));
            }
            Some(name)
        }
        None if seen.contains("name") => Some("name".to_string()),
        None => None,
    };

    let description = decl.description.unwrap_or_else(|| decl.name.clone());
    let order = decl.order.unwrap_or_else(|| ID_FIELD.to_string());

    Ok(ModelDef::from_parts(decl.name, description, table, rec_name, order, fields))
}

fn storage_for(model: &str, table: &str, field: &FieldDef) -> Result<Storage> {
    if field.is_computed() {
        if field.kind.is_x2many() || matches!(field.kind, FieldKind::Binary { attachment: true }) {
            return Err(Error::Validation(format!(
                "{model}.{}: computed {} fields are not supported",
                field.name,
                field.kind.name()
            )));
        }
        if !field.store {
            return Ok(Storage::Computed);
        }
    }

    Ok(match &field.kind {
        FieldKind::One2many { .. } => Storage::Inverse,
        FieldKind::Many2many {
            comodel,
            relation,
            column1,
            column2,
        } => {
            let derived = pivot_table(table, &table_name(comodel));
            let pivot = PivotTable {
                table: relation.clone().unwrap_or(derived.table),
                column1: column1.clone().unwrap_or(derived.column1),
                column2: column2.clone().unwrap_or(derived.column2),
            };
            validate_identifier(&pivot.table)?;
            validate_identifier(&pivot.column1)?;
            validate_identifier(&pivot.column2)?;
            if pivot.column1 == pivot.column2 {
                return Err(Error::Validation(format!(
                    "{model}.{}: pivot columns must differ",
                    field.name
                )));
            }
            Storage::Pivot(pivot)
        }
        FieldKind::Binary { attachment: true } => Storage::Attachment,
        _ => Storage::Column,
    })
}

fn validate_model_name(name: &str) -> Result<()> {
    let valid = name
        .split('.')
        .all(|part| validate_identifier(part).is_ok());
    if valid {
        Ok(())
    } else {
        Err(Error::Validation(format!("invalid model name '{name}'")))
    }
}
