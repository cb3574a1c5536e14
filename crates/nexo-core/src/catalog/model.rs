//! Model declarations and normalized model definitions.

use std::collections::HashMap;

use super::field::FieldDef;
use super::types::Storage;
use crate::error::{Error, Result};

/// Identity field injected into every model.
pub const ID_FIELD: &str = "id";

/// Audit timestamp set on insert.
pub const CREATE_DATE_FIELD: &str = "create_date";

/// Audit timestamp set on every write.
pub const WRITE_DATE_FIELD: &str = "write_date";

/// Fields maintained by the runtime itself.
pub const MAGIC_FIELDS: [&str; 3] = [ID_FIELD, CREATE_DATE_FIELD, WRITE_DATE_FIELD];

/// A raw model declaration, as written by a module.
#[derive(Debug, Clone)]
pub struct ModelDecl {
    pub name: String,
    pub description: Option<String>,
    /// Explicit table name; derived from `name` when absent.
    pub table: Option<String>,
    /// Field used as the record label.
    pub rec_name: Option<String>,
    /// Default search order.
    pub order: Option<String>,
    pub fields: Vec<FieldDef>,
    /// Adds fields to an already declared model instead of declaring one.
    pub extends: bool,
}

impl ModelDecl {
    /// Declare a new model.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            table: None,
            rec_name: None,
            order: None,
            fields: Vec::new(),
            extends: false,
        }
    }

    /// Extend a model declared by another module.
    pub fn extend(name: impl Into<String>) -> Self {
        Self {
            extends: true,
            ..Self::new(name)
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn with_rec_name(mut self, field: impl Into<String>) -> Self {
        self.rec_name = Some(field.into());
        self
    }

    pub fn with_order(mut self, order: impl Into<String>) -> Self {
        self.order = Some(order.into());
        self
    }

    /// Add a field.
    pub fn with_field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Add several fields.
    pub fn with_fields(mut self, fields: impl IntoIterator<Item = FieldDef>) -> Self {
        self.fields.extend(fields);
        self
    }

    /// Fold an extension into this declaration. Fields with the same name
    /// are replaced in place; new fields are appended.
    pub fn merge(&mut self, extension: ModelDecl) {
        if extension.description.is_some() {
            self.description = extension.description;
        }
        if extension.rec_name.is_some() {
            self.rec_name = extension.rec_name;
        }
        if extension.order.is_some() {
            self.order = extension.order;
        }
        for field in extension.fields {
            match self.fields.iter_mut().find(|f| f.name == field.name) {
                Some(existing) => *existing = field,
                None => self.fields.push(field),
            }
        }
    }
}

/// A complete, normalized model.
#[derive(Debug, Clone)]
pub struct ModelDef {
    pub name: String,
    pub description: String,
    pub table: String,
    pub rec_name: Option<String>,
    pub order: String,
    fields: Vec<FieldDef>,
    index: HashMap<String, usize>,
}

impl ModelDef {
    pub(crate) fn from_parts(
        name: String,
        description: String,
        table: String,
        rec_name: Option<String>,
        order: String,
        fields: Vec<FieldDef>,
    ) -> Self {
        let index = fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.clone(), i))
            .collect();
        Self {
            name,
            description,
            table,
            rec_name,
            order,
            fields,
            index,
        }
    }

    /// Get a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.index.get(name).map(|&i| &self.fields[i])
    }

    /// Get a field by name or fail with [`Error::UnknownField`].
    pub fn require_field(&self, name: &str) -> Result<&FieldDef> {
        self.field(name)
            .ok_or_else(|| Error::unknown_field(&self.name, name))
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// All fields in declaration order, identity first.
    pub fn fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter()
    }

    /// Field names in declaration order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Fields backed by a column of this model's table, including `id`.
    pub fn column_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| f.storage == Storage::Column)
    }

    /// Computed fields that are persisted.
    pub fn stored_computed_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields
            .iter()
            .filter(|f| f.is_computed() && f.is_stored())
    }

    /// Whether any field is kept in `ir.attachment`.
    pub fn has_attachments(&self) -> bool {
        self.fields.iter().any(|f| f.storage == Storage::Attachment)
    }
}
