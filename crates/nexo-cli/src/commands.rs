//! Subcommands and their execution against a runtime.

use clap::Subcommand;
use nexo_core::{Environment, ErrorKind, RecordSet, Runtime, SearchOptions};
use nexo_proto::{Domain, ProtoError, Values};
use thiserror::Error;

use crate::formatter::Formatter;

/// Errors surfaced to the command line.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Runtime(#[from] nexo_core::Error),

    #[error("invalid argument: {0}")]
    Proto(#[from] ProtoError),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Process exit code: 2 for bad input, 3 for authorization failures,
    /// 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Runtime(err) => match err.kind() {
                ErrorKind::Validation => 2,
                ErrorKind::Authorization => 3,
                _ => 1,
            },
            CliError::Proto(_) | CliError::Json(_) => 2,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the schema and seed the superuser
    Init,

    /// Add tables and columns declared since the last synchronization
    Migrate,

    /// List registered models
    Models,

    /// Describe the fields of a model
    Fields {
        model: String,
        /// Only these fields (comma separated)
        #[arg(long, value_delimiter = ',')]
        only: Vec<String>,
    },

    /// Search records and read their fields
    Search {
        model: String,
        /// Domain as JSON, e.g. '[["name", "ilike", "acme"]]'
        #[arg(short, long, default_value = "[]")]
        domain: String,
        /// Fields to read (comma separated); the model's display field when empty
        #[arg(short, long, value_delimiter = ',')]
        fields: Vec<String>,
        #[arg(short, long)]
        limit: Option<usize>,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        /// Order specification, e.g. "name desc, id"
        #[arg(short, long)]
        order: Option<String>,
        /// Only ids greater than this one (requires id order)
        #[arg(long)]
        cursor: Option<i64>,
    },

    /// Count records matching a domain
    Count {
        model: String,
        #[arg(short, long, default_value = "[]")]
        domain: String,
    },

    /// Create a record from a JSON object of field values
    Create { model: String, values: String },

    /// Write a JSON object of field values to records
    Write {
        model: String,
        #[arg(value_delimiter = ',')]
        ids: Vec<i64>,
        #[arg(long)]
        values: String,
    },

    /// Delete records
    Unlink {
        model: String,
        #[arg(value_delimiter = ',')]
        ids: Vec<i64>,
    },
}

/// Run `command` as `uid`, committing mutations.
pub fn execute(runtime: &Runtime, uid: i64, command: Command, formatter: &dyn Formatter) -> Result<String, CliError> {
    match command {
        Command::Init | Command::Migrate => {
            let report = runtime.sync_schema()?;
            Ok(formatter.format_report(&report))
        }
        Command::Models => {
            let fields = vec!["model".to_string(), "name".to_string()];
            let rows = runtime.begin_read_only(uid)?.search_read(
                "ir.model",
                &Domain::new(),
                Some(&["id", "model", "name"]),
                &SearchOptions::new().with_order("model"),
            )?;
            Ok(formatter.format_records(&fields, &rows))
        }
        Command::Fields { model, only } => {
            let env = runtime.begin_read_only(uid)?;
            let names: Vec<&str> = only.iter().map(String::as_str).collect();
            let fields = env.fields_get(&model, (!names.is_empty()).then_some(names.as_slice()))?;
            Ok(formatter.format_fields(&fields))
        }
        Command::Search {
            model,
            domain,
            fields,
            limit,
            offset,
            order,
            cursor,
        } => {
            let domain = parse_domain(&domain)?;
            let mut options = SearchOptions::new().with_offset(offset);
            if let Some(limit) = limit {
                options = options.with_limit(limit);
            }
            if let Some(order) = order {
                options = options.with_order(order);
            }
            if let Some(cursor) = cursor {
                options = options.with_cursor(cursor);
            }

            let mut env = runtime.begin_read_only(uid)?;
            let fields = if fields.is_empty() {
                display_fields(&env, &model)?
            } else {
                fields
            };
            let mut names = vec!["id"];
            names.extend(fields.iter().map(String::as_str).filter(|f| *f != "id"));
            let rows = env.search_read(&model, &domain, Some(&names), &options)?;
            Ok(formatter.format_records(&fields, &rows))
        }
        Command::Count { model, domain } => {
            let domain = parse_domain(&domain)?;
            let count = runtime.begin_read_only(uid)?.search_count(&model, &domain)?;
            Ok(count.to_string())
        }
        Command::Create { model, values } => {
            let values = parse_values(&values)?;
            let created = runtime.run(uid, |env| env.create(&model, values))?;
            tracing::info!(model = %model, ids = ?created.ids(), "record created");
            Ok(formatter.format_ids("created", &model, created.ids()))
        }
        Command::Write { model, ids, values } => {
            let values = parse_values(&values)?;
            let records = RecordSet::new(model.clone(), ids);
            runtime.run(uid, |env| env.write(&records, values))?;
            Ok(formatter.format_ids("written", &model, records.ids()))
        }
        Command::Unlink { model, ids } => {
            let records = RecordSet::new(model.clone(), ids);
            runtime.run(uid, |env| env.unlink(&records))?;
            Ok(formatter.format_ids("deleted", &model, records.ids()))
        }
    }
}

fn parse_domain(text: &str) -> Result<Domain, CliError> {
    let json: serde_json::Value = serde_json::from_str(text)?;
    Ok(Domain::from_json(&json)?)
}

fn parse_values(text: &str) -> Result<Values, CliError> {
    let json: serde_json::Value = serde_json::from_str(text)?;
    Ok(Values::from_json(&json)?)
}

/// The model's display field, or nothing but ids.
fn display_fields(env: &Environment, model: &str) -> Result<Vec<String>, CliError> {
    Ok(env.model(model)?.rec_name.iter().cloned().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_domain() {
        let domain = parse_domain(r#"["|", ["name", "=", "a"], ["name", "=", "b"]]"#).unwrap();
        assert_eq!(domain.len(), 3);
        assert!(matches!(parse_domain("[1, 2"), Err(CliError::Json(_))));
        assert!(matches!(
            parse_domain(r#"[["name", "near", "a"]]"#),
            Err(CliError::Proto(_))
        ));
    }

    #[test]
    fn test_exit_codes() {
        let denied = CliError::Runtime(nexo_core::Error::UnknownUser(9));
        assert_eq!(denied.exit_code(), 3);
        let invalid = CliError::Runtime(nexo_core::Error::Validation("x".into()));
        assert_eq!(invalid.exit_code(), 2);
        let broken = CliError::Runtime(nexo_core::Error::Internal("x".into()));
        assert_eq!(broken.exit_code(), 1);
    }
}
