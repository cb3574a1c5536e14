//! Field kinds and storage policies.

/// What happens to referencing rows when a many-to-one target is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnDelete {
    /// Clear the reference.
    #[default]
    SetNull,
    /// Delete the referencing row too.
    Cascade,
    /// Refuse the delete.
    Restrict,
}

impl OnDelete {
    /// SQL `ON DELETE` action.
    pub fn as_sql(self) -> &'static str {
        match self {
            OnDelete::SetNull => "SET NULL",
            OnDelete::Cascade => "CASCADE",
            OnDelete::Restrict => "RESTRICT",
        }
    }
}

/// Declared type of a field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Char,
    Text,
    Integer,
    Float,
    Boolean,
    Date,
    Datetime,
    /// One key out of a fixed `(key, label)` list.
    Selection(Vec<(String, String)>),
    Many2one {
        comodel: String,
        ondelete: OnDelete,
    },
    /// Records of `comodel` whose many-to-one `inverse` points here.
    One2many {
        comodel: String,
        inverse: String,
    },
    /// Links through a pivot table. Unset names are derived by the normalizer.
    Many2many {
        comodel: String,
        relation: Option<String>,
        column1: Option<String>,
        column2: Option<String>,
    },
    /// Raw bytes; kept in `ir.attachment` unless `attachment` is false.
    Binary { attachment: bool },
}

impl FieldKind {
    /// Type tag used in introspection and metadata rows.
    pub fn name(&self) -> &'static str {
        match self {
            FieldKind::Char => "char",
            FieldKind::Text => "text",
            FieldKind::Integer => "integer",
            FieldKind::Float => "float",
            FieldKind::Boolean => "boolean",
            FieldKind::Date => "date",
            FieldKind::Datetime => "datetime",
            FieldKind::Selection(_) => "selection",
            FieldKind::Many2one { .. } => "many2one",
            FieldKind::One2many { .. } => "one2many",
            FieldKind::Many2many { .. } => "many2many",
            FieldKind::Binary { .. } => "binary",
        }
    }

    /// Related model of a relational field.
    pub fn comodel(&self) -> Option<&str> {
        match self {
            FieldKind::Many2one { comodel, .. }
            | FieldKind::One2many { comodel, .. }
            | FieldKind::Many2many { comodel, .. } => Some(comodel),
            _ => None,
        }
    }

    pub fn is_relational(&self) -> bool {
        self.comodel().is_some()
    }

    /// One-to-many or many-to-many.
    pub fn is_x2many(&self) -> bool {
        matches!(self, FieldKind::One2many { .. } | FieldKind::Many2many { .. })
    }

    /// Whether values are text.
    pub fn is_textual(&self) -> bool {
        matches!(self, FieldKind::Char | FieldKind::Text | FieldKind::Selection(_))
    }

    /// SQLite column type for kinds that live in a column.
    pub fn column_type(&self) -> Option<&'static str> {
        match self {
            FieldKind::Char | FieldKind::Text | FieldKind::Selection(_) => Some("TEXT"),
            FieldKind::Integer | FieldKind::Boolean | FieldKind::Many2one { .. } => Some("INTEGER"),
            FieldKind::Float => Some("REAL"),
            FieldKind::Date | FieldKind::Datetime => Some("TEXT"),
            FieldKind::Binary { attachment: false } => Some("BLOB"),
            FieldKind::Binary { attachment: true }
            | FieldKind::One2many { .. }
            | FieldKind::Many2many { .. } => None,
        }
    }
}

/// Resolved pivot table of a many-to-many field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PivotTable {
    pub table: String,
    /// Column referencing the owning model.
    pub column1: String,
    /// Column referencing the comodel.
    pub column2: String,
}

/// Where a field's value lives, decided by the normalizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Storage {
    /// A column of the model's table.
    Column,
    /// Rows of a pivot table.
    Pivot(PivotTable),
    /// The inverse many-to-one column on the comodel.
    Inverse,
    /// `ir.attachment` rows keyed by model, id and field name.
    Attachment,
    /// Not persisted; computed on read.
    Computed,
}
