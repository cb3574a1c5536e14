//! DDL statements derived from normalized models.
//!
//! Every statement is idempotent (`IF NOT EXISTS`) so bootstrap can be
//! repeated against a live database.

use crate::catalog::{FieldDef, FieldKind, ModelDef, PivotTable, ID_FIELD};
use crate::sql::quote;

/// `CREATE TABLE` for a model's own columns.
pub fn create_table(model: &ModelDef, comodel_table: impl Fn(&str) -> Option<String>) -> String {
    let mut columns = vec![format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", quote(ID_FIELD))];
    for field in model.column_fields().filter(|f| f.name != ID_FIELD) {
        if let Some(definition) = column_definition(field, &comodel_table, true) {
            columns.push(definition);
        }
    }
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
        quote(&model.table),
        columns.join(",\n    ")
    )
}

/// `ALTER TABLE ... ADD COLUMN` for a field missing from a live table.
///
/// SQLite cannot add `NOT NULL` or `UNIQUE` columns to a populated table;
/// uniqueness is carried by an index from [`indexes`] instead.
pub fn add_column(model: &ModelDef, field: &FieldDef, comodel_table: impl Fn(&str) -> Option<String>) -> Option<String> {
    let definition = column_definition(field, &comodel_table, false)?;
    Some(format!("ALTER TABLE {} ADD COLUMN {definition}", quote(&model.table)))
}

/// Column definition, or `None` for fields without a column.
fn column_definition(
    field: &FieldDef,
    comodel_table: &impl Fn(&str) -> Option<String>,
    with_constraints: bool,
) -> Option<String> {
    let sql_type = field.kind.column_type()?;
    let mut definition = format!("{} {sql_type}", quote(&field.name));
    if with_constraints {
        // Computed values are written after the row exists.
        if field.required && !field.is_computed() {
            definition.push_str(" NOT NULL");
        }
        if field.unique {
            definition.push_str(" UNIQUE");
        }
    }
    if let FieldKind::Many2one { comodel, ondelete } = &field.kind {
        if let Some(table) = comodel_table(comodel) {
            definition.push_str(&format!(
                " REFERENCES {} (\"id\") ON DELETE {}",
                quote(&table),
                ondelete.as_sql()
            ));
        }
    }
    Some(definition)
}

/// `CREATE INDEX` statements: declared indexes, every many-to-one, and a
/// unique index per unique field.
pub fn indexes(model: &ModelDef) -> Vec<String> {
    let mut statements = Vec::new();
    for field in model.column_fields().filter(|f| f.name != ID_FIELD) {
        if field.unique {
            statements.push(format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} ({})",
                quote(&format!("{}_{}_uniq", model.table, field.name)),
                quote(&model.table),
                quote(&field.name)
            ));
        } else if field.indexed || matches!(field.kind, FieldKind::Many2one { .. }) {
            statements.push(format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                quote(&format!("{}_{}_index", model.table, field.name)),
                quote(&model.table),
                quote(&field.name)
            ));
        }
    }
    statements
}

/// `CREATE TABLE` for a pivot: two non-null references with cascading
/// deletes and a composite uniqueness constraint, plus a reverse index.
pub fn create_pivot(pivot: &PivotTable, table1: &str, table2: &str) -> Vec<String> {
    vec![
        format!(
            "CREATE TABLE IF NOT EXISTS {table} (\n    \
             {c1} INTEGER NOT NULL REFERENCES {t1} (\"id\") ON DELETE CASCADE,\n    \
             {c2} INTEGER NOT NULL REFERENCES {t2} (\"id\") ON DELETE CASCADE,\n    \
             UNIQUE ({c1}, {c2})\n)",
            table = quote(&pivot.table),
            c1 = quote(&pivot.column1),
            c2 = quote(&pivot.column2),
            t1 = quote(table1),
            t2 = quote(table2),
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
            quote(&format!("{}_{}_index", pivot.table, pivot.column2)),
            quote(&pivot.table),
            quote(&pivot.column2)
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{normalize, ModelDecl, OnDelete};

    fn order() -> ModelDef {
        normalize(
            ModelDecl::new("sale.order")
                .with_field(FieldDef::char("name").required().unique())
                .with_field(FieldDef::many2one("partner_id", "res.partner").with_ondelete(OnDelete::Cascade))
                .with_field(FieldDef::float("amount").with_index())
                .with_field(FieldDef::many2many("tag_ids", "sale.tag"))
                .with_field(FieldDef::binary("document")),
        )
        .unwrap()
    }

    fn tables(model: &str) -> Option<String> {
        Some(model.replace('.', "_"))
    }

    #[test]
    fn test_create_table() {
        let sql = create_table(&order(), tables);
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"sale_order\""));
        assert!(sql.contains("\"id\" INTEGER PRIMARY KEY AUTOINCREMENT"));
        assert!(sql.contains("\"name\" TEXT NOT NULL UNIQUE"));
        assert!(sql.contains("\"partner_id\" INTEGER REFERENCES \"res_partner\" (\"id\") ON DELETE CASCADE"));
        assert!(sql.contains("\"amount\" REAL"));
        assert!(sql.contains("\"create_date\" TEXT"));
        assert!(!sql.contains("tag_ids"));
        assert!(!sql.contains("document"));
    }

    #[test]
    fn test_add_column_has_no_constraints() {
        let model = order();
        let name = model.field("name").unwrap();
        assert_eq!(
            add_column(&model, name, tables).unwrap(),
            "ALTER TABLE \"sale_order\" ADD COLUMN \"name\" TEXT"
        );
        let partner = model.field("partner_id").unwrap();
        assert!(add_column(&model, partner, tables).unwrap().contains("REFERENCES \"res_partner\""));
        assert!(add_column(&model, model.field("tag_ids").unwrap(), tables).is_none());
    }

    #[test]
    fn test_indexes() {
        let statements = indexes(&order());
        assert_eq!(statements.len(), 3);
        assert!(statements[0].starts_with("CREATE UNIQUE INDEX IF NOT EXISTS \"sale_order_name_uniq\""));
        assert!(statements[1].contains("\"sale_order_partner_id_index\""));
        assert!(statements[2].contains("\"sale_order_amount_index\""));
    }

    #[test]
    fn test_create_pivot() {
        let pivot = PivotTable {
            table: "sale_order_sale_tag_rel".into(),
            column1: "sale_order_id".into(),
            column2: "sale_tag_id".into(),
        };
        let statements = create_pivot(&pivot, "sale_order", "sale_tag");
        assert!(statements[0].contains("\"sale_order_id\" INTEGER NOT NULL REFERENCES \"sale_order\" (\"id\") ON DELETE CASCADE"));
        assert!(statements[0].contains("UNIQUE (\"sale_order_id\", \"sale_tag_id\")"));
        assert!(statements[1].contains("ON \"sale_order_sale_tag_rel\" (\"sale_tag_id\")"));
    }
}
