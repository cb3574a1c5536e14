//! Field descriptors.

use std::fmt;
use std::sync::Arc;

use nexo_proto::{FieldInfo, Value};

use super::types::{FieldKind, OnDelete, Storage};
use crate::error::Result;
use crate::orm::{Environment, RecordSet};

/// Compute method: assigns the field on every record of the set through
/// [`Environment::assign`].
pub type ComputeFn = Arc<dyn Fn(&mut Environment, &RecordSet) -> Result<()> + Send + Sync>;

/// Compute declaration of a derived field.
#[derive(Clone)]
pub struct ComputeSpec {
    /// Method name, for logs and metadata.
    pub method: String,
    /// Source fields, possibly one relational hop deep (`partner_id.name`).
    pub depends: Vec<String>,
    pub func: ComputeFn,
}

impl fmt::Debug for ComputeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputeSpec")
            .field("method", &self.method)
            .field("depends", &self.depends)
            .finish_non_exhaustive()
    }
}

/// Default value for a field.
#[derive(Debug, Clone, PartialEq)]
pub enum DefaultValue {
    /// A literal.
    Value(Value),
    /// Current timestamp (evaluated at insert time).
    CurrentTimestamp,
    /// Id of the acting user.
    CurrentUser,
}

/// A field of a model.
#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: String,
    pub kind: FieldKind,
    /// Human-readable label.
    pub label: String,
    pub required: bool,
    pub readonly: bool,
    /// Enforced with a `UNIQUE` column constraint.
    pub unique: bool,
    pub help: Option<String>,
    pub default: Option<DefaultValue>,
    pub compute: Option<ComputeSpec>,
    /// Persist a computed value. Plain fields are always stored.
    pub store: bool,
    pub indexed: bool,
    /// Set by the normalizer.
    pub storage: Storage,
}

impl FieldDef {
    /// Create a field of the given kind.
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        let name = name.into();
        Self {
            label: default_label(&name),
            name,
            kind,
            required: false,
            readonly: false,
            unique: false,
            help: None,
            default: None,
            compute: None,
            store: true,
            indexed: false,
            storage: Storage::Column,
        }
    }

    pub fn char(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Char)
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Text)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Integer)
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Float)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Boolean)
    }

    pub fn date(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Date)
    }

    pub fn datetime(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Datetime)
    }

    /// Selection over `(key, label)` pairs.
    pub fn selection<K, L>(name: impl Into<String>, options: impl IntoIterator<Item = (K, L)>) -> Self
    where
        K: Into<String>,
        L: Into<String>,
    {
        let options = options
            .into_iter()
            .map(|(k, l)| (k.into(), l.into()))
            .collect();
        Self::new(name, FieldKind::Selection(options))
    }

    /// Many-to-one with `SET NULL` on delete.
    pub fn many2one(name: impl Into<String>, comodel: impl Into<String>) -> Self {
        Self::new(
            name,
            FieldKind::Many2one {
                comodel: comodel.into(),
                ondelete: OnDelete::SetNull,
            },
        )
    }

    pub fn one2many(name: impl Into<String>, comodel: impl Into<String>, inverse: impl Into<String>) -> Self {
        Self::new(
            name,
            FieldKind::One2many {
                comodel: comodel.into(),
                inverse: inverse.into(),
            },
        )
    }

    /// Many-to-many with a derived pivot table.
    pub fn many2many(name: impl Into<String>, comodel: impl Into<String>) -> Self {
        Self::new(
            name,
            FieldKind::Many2many {
                comodel: comodel.into(),
                relation: None,
                column1: None,
                column2: None,
            },
        )
    }

    /// Binary payload stored as an attachment.
    pub fn binary(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Binary { attachment: true })
    }

    /// Set the label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Set the help text.
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// Mark as required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Mark as readonly for user interfaces.
    pub fn readonly(mut self) -> Self {
        self.readonly = true;
        self
    }

    /// Add a `UNIQUE` constraint.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Mark as indexed.
    pub fn with_index(mut self) -> Self {
        self.indexed = true;
        self
    }

    /// Set a literal default value.
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(DefaultValue::Value(value.into()));
        self
    }

    /// Default to the insert timestamp.
    pub fn default_now(mut self) -> Self {
        self.default = Some(DefaultValue::CurrentTimestamp);
        self
    }

    /// Default to the acting user.
    pub fn default_user(mut self) -> Self {
        self.default = Some(DefaultValue::CurrentUser);
        self
    }

    /// Set the many-to-one delete behavior.
    pub fn with_ondelete(mut self, behavior: OnDelete) -> Self {
        if let FieldKind::Many2one { ondelete, .. } = &mut self.kind {
            *ondelete = behavior;
        }
        self
    }

    /// Name the pivot table and its columns of a many-to-many field.
    pub fn with_relation(
        mut self,
        table: impl Into<String>,
        col1: impl Into<String>,
        col2: impl Into<String>,
    ) -> Self {
        if let FieldKind::Many2many {
            relation,
            column1,
            column2,
            ..
        } = &mut self.kind
        {
            *relation = Some(table.into());
            *column1 = Some(col1.into());
            *column2 = Some(col2.into());
        }
        self
    }

    /// Keep binary content in a `BLOB` column of the model's own table.
    pub fn in_column(mut self) -> Self {
        if let FieldKind::Binary { attachment } = &mut self.kind {
            *attachment = false;
        }
        self
    }

    /// Make the field computed. Computed fields are not stored unless
    /// [`stored`](Self::stored) is called.
    pub fn computed<I, S, F>(mut self, method: impl Into<String>, depends: I, func: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(&mut Environment, &RecordSet) -> Result<()> + Send + Sync + 'static,
    {
        self.compute = Some(ComputeSpec {
            method: method.into(),
            depends: depends.into_iter().map(Into::into).collect(),
            func: Arc::new(func),
        });
        self.store = false;
        self.readonly = true;
        self
    }

    /// Persist a computed field.
    pub fn stored(mut self) -> Self {
        self.store = true;
        self
    }

    pub fn is_computed(&self) -> bool {
        self.compute.is_some()
    }

    /// Whether the value lives in a column of the model's table.
    pub fn is_column(&self) -> bool {
        self.storage == Storage::Column
    }

    /// Whether the value is persisted in any form.
    pub fn is_stored(&self) -> bool {
        self.storage != Storage::Computed
    }

    /// Related model, for relational fields.
    pub fn comodel(&self) -> Option<&str> {
        self.kind.comodel()
    }

    /// Introspection record.
    pub fn info(&self) -> FieldInfo {
        let mut info = FieldInfo::new(self.kind.name(), self.label.clone());
        info.required = self.required;
        info.readonly = self.readonly;
        info.store = self.is_stored();
        info.relation = self.comodel().map(str::to_string);
        info.help = self.help.clone();
        if let FieldKind::One2many { inverse, .. } = &self.kind {
            info.relation_field = Some(inverse.clone());
        }
        if let FieldKind::Selection(options) = &self.kind {
            info.selection = Some(options.clone());
        }
        if let Some(compute) = &self.compute {
            info.depends = compute.depends.clone();
        }
        info
    }
}

/// `partner_id` -> `Partner`, `amount_total` -> `Amount Total`.
fn default_label(name: &str) -> String {
    let trimmed = name
        .strip_suffix("_ids")
        .or_else(|| name.strip_suffix("_id"))
        .unwrap_or(name);
    trimmed
        .split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_builder() {
        let field = FieldDef::char("name").required().with_default("New").with_index();
        assert!(field.required);
        assert!(field.indexed);
        assert_eq!(field.default, Some(DefaultValue::Value(Value::Text("New".into()))));
        assert_eq!(field.label, "Name");
    }

    #[test]
    fn test_computed_is_unstored_by_default() {
        let field = FieldDef::float("total").computed("_compute_total", ["line_ids.amount"], |_, _| Ok(()));
        assert!(field.is_computed());
        assert!(!field.store);
        assert!(field.readonly);
        assert!(field.stored().store);
    }

    #[test]
    fn test_relation_builders() {
        let field = FieldDef::many2one("partner_id", "res.partner").with_ondelete(OnDelete::Cascade);
        assert_eq!(
            field.kind,
            FieldKind::Many2one {
                comodel: "res.partner".into(),
                ondelete: OnDelete::Cascade,
            }
        );
        assert_eq!(field.label, "Partner");

        let tags = FieldDef::many2many("tag_ids", "res.tag").with_relation("order_tag_rel", "order_id", "tag_id");
        assert!(matches!(
            tags.kind,
            FieldKind::Many2many { relation: Some(ref t), .. } if t == "order_tag_rel"
        ));
    }

    #[test]
    fn test_info() {
        let field = FieldDef::selection("state", [("draft", "Draft"), ("done", "Done")]).required();
        let info = field.info();
        assert_eq!(info.field_type, "selection");
        assert!(info.required);
        assert_eq!(info.selection.unwrap().len(), 2);

        let lines = FieldDef::one2many("line_ids", "sale.line", "order_id");
        assert_eq!(lines.info().relation_field.as_deref(), Some("order_id"));
    }

    #[test]
    fn test_default_label() {
        assert_eq!(default_label("amount_total"), "Amount Total");
        assert_eq!(default_label("tag_ids"), "Tag");
    }
}
