//! Additive schema synchronization and bootstrap metadata.

use std::collections::{BTreeMap, BTreeSet};

use nexo_proto::{Domain, Value, Values};
use serde::Serialize;

use super::ddl;
use crate::catalog::{FieldKind, Registry, Storage};
use crate::error::Result;
use crate::orm::{Environment, SearchOptions};
use crate::security::SUPERUSER_ID;
use crate::storage::Cursor;

/// Id of the company seeded at bootstrap.
pub const MAIN_COMPANY_ID: i64 = 1;

/// What a synchronization changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchemaReport {
    /// Model and pivot tables that did not exist.
    pub created_tables: Vec<String>,
    /// `table.column` pairs appended to existing tables.
    pub added_columns: Vec<String>,
    /// Models newly registered in `ir.model`.
    pub synced_models: usize,
}

impl SchemaReport {
    /// Whether the database already matched the registry.
    pub fn is_noop(&self) -> bool {
        self.created_tables.is_empty() && self.added_columns.is_empty() && self.synced_models == 0
    }
}

/// Brings the database structure up to a registry. Never drops or retypes.
#[derive(Debug)]
pub struct SchemaSync<'a> {
    registry: &'a Registry,
}

impl<'a> SchemaSync<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self { registry }
    }

    /// Create missing tables, then append missing columns and indexes.
    pub fn apply(&self, cursor: &mut Cursor) -> Result<SchemaReport> {
        let mut report = SchemaReport::default();
        let mut existing = live_tables(cursor)?;
        let comodel_table = |name: &str| self.registry.model(name).ok().map(|m| m.table.clone());

        for model in self.registry.models() {
            if existing.insert(model.table.clone()) {
                cursor.execute_ddl(&ddl::create_table(model, comodel_table))?;
                report.created_tables.push(model.table.clone());
                continue;
            }
            let columns = live_columns(cursor, &model.table)?;
            for field in model.column_fields() {
                if columns.contains(&field.name) {
                    continue;
                }
                if let Some(sql) = ddl::add_column(model, field, comodel_table) {
                    cursor.execute_ddl(&sql)?;
                    report.added_columns.push(format!("{}.{}", model.table, field.name));
                }
            }
        }

        for model in self.registry.models() {
            for sql in ddl::indexes(model) {
                cursor.execute_ddl(&sql)?;
            }
            for field in model.fields() {
                let (FieldKind::Many2many { comodel, .. }, Storage::Pivot(pivot)) = (&field.kind, &field.storage) else {
                    continue;
                };
                if !existing.insert(pivot.table.clone()) {
                    continue;
                }
                let target = self.registry.model(comodel)?;
                for sql in ddl::create_pivot(pivot, &model.table, &target.table) {
                    cursor.execute_ddl(&sql)?;
                }
                report.created_tables.push(pivot.table.clone());
            }
        }

        tracing::debug!(
            created = report.created_tables.len(),
            added = report.added_columns.len(),
            "schema structure applied"
        );
        Ok(report)
    }
}

fn live_tables(cursor: &mut Cursor) -> Result<BTreeSet<String>> {
    let rows = cursor.query("SELECT \"name\" FROM \"sqlite_master\" WHERE \"type\" = 'table'", &[])?;
    Ok(rows
        .into_iter()
        .filter_map(|row| row.into_iter().next()?.as_str().map(str::to_string))
        .collect())
}

fn live_columns(cursor: &mut Cursor, table: &str) -> Result<BTreeSet<String>> {
    let rows = cursor.query(
        "SELECT \"name\" FROM pragma_table_info($1)",
        &[Value::Text(table.to_string())],
    )?;
    Ok(rows
        .into_iter()
        .filter_map(|row| row.into_iter().next()?.as_str().map(str::to_string))
        .collect())
}

/// Seed the main company and the superuser, then register every model and
/// field of the registry in `ir.model` / `ir.model.fields`.
///
/// Returns the number of newly registered models.
pub fn sync_metadata(env: &mut Environment) -> Result<usize> {
    seed(env)?;

    let registry = env.registry().clone();
    let all = SearchOptions::new();
    let known = env.search_read("ir.model", &Domain::new(), Some(&["model"]), &all)?;
    let mut model_ids: BTreeMap<String, i64> = known
        .iter()
        .filter_map(|row| Some((row.get("model")?.as_str()?.to_string(), row.get("id")?.as_i64()?)))
        .collect();

    let missing: Vec<&str> = registry
        .models()
        .map(|m| m.name.as_str())
        .filter(|name| !model_ids.contains_key(*name))
        .collect();
    if !missing.is_empty() {
        let rows = missing
            .iter()
            .map(|name| -> Result<Values> {
                let model = registry.model(name)?;
                Ok(Values::new()
                    .set("model", model.name.as_str())
                    .set("name", model.description.as_str())
                    .set("modules", registry.modules().join(", ")))
            })
            .collect::<Result<Vec<_>>>()?;
        let created = env.create_many("ir.model", rows)?;
        model_ids.extend(missing.iter().map(|n| n.to_string()).zip(created.ids().iter().copied()));
    }

    let known_fields: BTreeSet<(String, String)> = env
        .search_read("ir.model.fields", &Domain::new(), Some(&["model", "name"]), &all)?
        .iter()
        .filter_map(|row| {
            Some((
                row.get("model")?.as_str()?.to_string(),
                row.get("name")?.as_str()?.to_string(),
            ))
        })
        .collect();

    let mut field_rows = Vec::new();
    for model in registry.models() {
        let Some(model_id) = model_ids.get(&model.name).copied() else {
            continue;
        };
        for field in model.fields() {
            if known_fields.contains(&(model.name.clone(), field.name.clone())) {
                continue;
            }
            let mut row = Values::new()
                .set("name", field.name.as_str())
                .set("model", model.name.as_str())
                .set("model_id", model_id)
                .set("field_description", field.label.as_str())
                .set("ttype", field.kind.name())
                .set("required", field.required)
                .set("readonly", field.readonly)
                .set("store", field.is_stored());
            if let Some(comodel) = field.comodel() {
                row = row.set("relation", comodel);
            }
            if let FieldKind::One2many { inverse, .. } = &field.kind {
                row = row.set("relation_field", inverse.as_str());
            }
            field_rows.push(row);
        }
    }
    let new_fields = field_rows.len();
    if !field_rows.is_empty() {
        env.create_many("ir.model.fields", field_rows)?;
    }

    tracing::info!(models = missing.len(), fields = new_fields, "metadata synchronized");
    Ok(missing.len())
}

/// Main company and superuser rows with fixed ids.
fn seed(env: &mut Environment) -> Result<()> {
    let now = Value::now();
    let cursor = env.cursor();
    cursor.execute(
        "INSERT INTO \"res_company\" (\"id\", \"name\", \"create_date\", \"write_date\") \
         VALUES ($1, $2, $3, $3) ON CONFLICT DO NOTHING",
        &[Value::Int(MAIN_COMPANY_ID), Value::from("My Company"), now.clone()],
    )?;
    cursor.execute(
        "INSERT INTO \"res_users\" \
         (\"id\", \"name\", \"login\", \"active\", \"company_id\", \"create_date\", \"write_date\") \
         VALUES ($1, $2, $3, 1, $4, $5, $5) ON CONFLICT DO NOTHING",
        &[
            Value::Int(SUPERUSER_ID),
            Value::from("Administrator"),
            Value::from("admin"),
            Value::Int(MAIN_COMPANY_ID),
            now,
        ],
    )?;
    cursor.execute(
        "INSERT INTO \"res_company_users_rel\" (\"user_id\", \"cid\") VALUES ($1, $2) ON CONFLICT DO NOTHING",
        &[Value::Int(SUPERUSER_ID), Value::Int(MAIN_COMPANY_ID)],
    )?;
    Ok(())
}
