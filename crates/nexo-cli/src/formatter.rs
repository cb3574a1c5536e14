//! Output formatters for command results.

use std::collections::BTreeMap;

use clap::ValueEnum;
use comfy_table::{Cell, Table};
use nexo_core::{Record, SchemaReport};
use nexo_proto::{FieldInfo, Value};

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// ASCII table format
    Table,
    /// JSON format
    Json,
    /// CSV format
    Csv,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Csv => write!(f, "csv"),
        }
    }
}

/// Renders command results.
pub trait Formatter {
    /// Format rows returned by `read`, with columns in `fields` order.
    fn format_records(&self, fields: &[String], records: &[Record]) -> String;

    /// Format a `fields_get` result.
    fn format_fields(&self, fields: &BTreeMap<String, FieldInfo>) -> String;

    /// Format the outcome of a schema synchronization.
    fn format_report(&self, report: &SchemaReport) -> String;

    /// Format the ids touched by a mutation.
    fn format_ids(&self, action: &str, model: &str, ids: &[i64]) -> String;
}

/// Create a formatter for the given output format.
pub fn create_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Table => Box::new(TableFormatter),
        OutputFormat::Json => Box::new(JsonFormatter),
        OutputFormat::Csv => Box::new(CsvFormatter),
    }
}

/// Column names of `records`: `fields` when given, else every key with
/// `id` first.
pub fn columns(fields: &[String], records: &[Record]) -> Vec<String> {
    if !fields.is_empty() {
        let mut columns = vec!["id".to_string()];
        columns.extend(fields.iter().filter(|f| *f != "id").cloned());
        return columns;
    }
    let mut columns = vec!["id".to_string()];
    if let Some(first) = records.first() {
        columns.extend(first.keys().filter(|k| *k != "id").cloned());
    }
    columns
}

/// Table formatter using comfy-table.
pub struct TableFormatter;

impl Formatter for TableFormatter {
    fn format_records(&self, fields: &[String], records: &[Record]) -> String {
        if records.is_empty() {
            return "No results".to_string();
        }
        let columns = columns(fields, records);
        let mut table = Table::new();
        table.set_header(columns.iter().map(Cell::new));
        for record in records {
            table.add_row(
                columns
                    .iter()
                    .map(|c| Cell::new(record.get(c).map(Value::to_string).unwrap_or_default())),
            );
        }
        format!("{table}\n({} record{})", records.len(), plural(records.len()))
    }

    fn format_fields(&self, fields: &BTreeMap<String, FieldInfo>) -> String {
        let mut table = Table::new();
        table.set_header(vec!["Field", "Type", "Label", "Relation", "Flags"]);
        for (name, info) in fields {
            let mut flags = Vec::new();
            if info.required {
                flags.push("required");
            }
            if info.readonly {
                flags.push("readonly");
            }
            if !info.store {
                flags.push("unstored");
            }
            let relation = match (&info.relation, &info.relation_field) {
                (Some(model), Some(inverse)) => format!("{model}.{inverse}"),
                (Some(model), None) => model.clone(),
                _ => String::new(),
            };
            table.add_row(vec![
                name.clone(),
                info.field_type.clone(),
                info.string.clone(),
                relation,
                flags.join(", "),
            ]);
        }
        table.to_string()
    }

    fn format_report(&self, report: &SchemaReport) -> String {
        if report.is_noop() {
            return "Schema is up to date".to_string();
        }
        let mut lines = Vec::new();
        for table in &report.created_tables {
            lines.push(format!("created table {table}"));
        }
        for column in &report.added_columns {
            lines.push(format!("added column {column}"));
        }
        if report.synced_models > 0 {
            lines.push(format!("registered {} model(s)", report.synced_models));
        }
        lines.join("\n")
    }

    fn format_ids(&self, action: &str, model: &str, ids: &[i64]) -> String {
        let list: Vec<String> = ids.iter().map(i64::to_string).collect();
        format!("{action} {model} [{}]", list.join(", "))
    }
}

/// JSON formatter.
pub struct JsonFormatter;

impl Formatter for JsonFormatter {
    fn format_records(&self, _fields: &[String], records: &[Record]) -> String {
        let rows: Vec<serde_json::Value> = records
            .iter()
            .map(|record| {
                serde_json::Value::Object(
                    record
                        .iter()
                        .map(|(name, value)| (name.clone(), value.to_json()))
                        .collect(),
                )
            })
            .collect();
        serde_json::to_string_pretty(&rows).unwrap_or_else(|_| "[]".to_string())
    }

    fn format_fields(&self, fields: &BTreeMap<String, FieldInfo>) -> String {
        serde_json::to_string_pretty(fields).unwrap_or_else(|_| "{}".to_string())
    }

    fn format_report(&self, report: &SchemaReport) -> String {
        serde_json::to_string_pretty(report).unwrap_or_else(|_| "{}".to_string())
    }

    fn format_ids(&self, action: &str, model: &str, ids: &[i64]) -> String {
        serde_json::json!({
            "action": action,
            "model": model,
            "ids": ids,
        })
        .to_string()
    }
}

/// CSV formatter.
pub struct CsvFormatter;

impl Formatter for CsvFormatter {
    fn format_records(&self, fields: &[String], records: &[Record]) -> String {
        let columns = columns(fields, records);
        let mut output = columns.iter().map(|c| escape_csv(c)).collect::<Vec<_>>().join(",");
        for record in records {
            output.push('\n');
            output.push_str(
                &columns
                    .iter()
                    .map(|c| escape_csv(&record.get(c).map(Value::to_string).unwrap_or_default()))
                    .collect::<Vec<_>>()
                    .join(","),
            );
        }
        output
    }

    fn format_fields(&self, fields: &BTreeMap<String, FieldInfo>) -> String {
        let mut output = "field,type,label,relation,required,readonly,store".to_string();
        for (name, info) in fields {
            output.push('\n');
            output.push_str(
                &[
                    escape_csv(name),
                    escape_csv(&info.field_type),
                    escape_csv(&info.string),
                    escape_csv(info.relation.as_deref().unwrap_or_default()),
                    info.required.to_string(),
                    info.readonly.to_string(),
                    info.store.to_string(),
                ]
                .join(","),
            );
        }
        output
    }

    fn format_report(&self, report: &SchemaReport) -> String {
        let mut output = "kind,name".to_string();
        for table in &report.created_tables {
            output.push_str(&format!("\ntable,{}", escape_csv(table)));
        }
        for column in &report.added_columns {
            output.push_str(&format!("\ncolumn,{}", escape_csv(column)));
        }
        output
    }

    fn format_ids(&self, _action: &str, _model: &str, ids: &[i64]) -> String {
        let mut output = "id".to_string();
        for id in ids {
            output.push_str(&format!("\n{id}"));
        }
        output
    }
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

/// Escape a string for CSV output.
fn escape_csv(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}
