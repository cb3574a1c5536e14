//! Nexo command-line client.
//!
//! Opens a database file directly, synchronizes the schema of the `base`
//! module and runs one command as the given user.

mod commands;
mod formatter;

use std::path::PathBuf;

use clap::Parser;
use commands::{CliError, Command};
use formatter::OutputFormat;
use nexo_core::{Registry, Runtime, RuntimeConfig, SUPERUSER_ID};

/// Nexo command-line client
#[derive(Parser, Debug)]
#[command(name = "nexo")]
#[command(version, about = "Nexo command-line client")]
pub struct Args {
    /// Database file (defaults to NEXO_DB_PATH, then ./nexo.db)
    #[arg(long)]
    pub db: Option<PathBuf>,

    /// Acting user id
    #[arg(short, long, global = true, default_value_t = SUPERUSER_ID)]
    pub uid: i64,

    /// Output format
    #[arg(long, global = true, default_value = "table", value_enum)]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Command,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("nexo=info,nexo_core=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match run(args) {
        Ok(output) => {
            if !output.is_empty() {
                println!("{output}");
            }
        }
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(e.exit_code());
        }
    }
}

fn run(args: Args) -> Result<String, CliError> {
    let mut config = RuntimeConfig::from_env()?;
    if let Some(db) = args.db {
        config = config.with_db_path(db);
    }

    let registry = Registry::builder().build()?;
    let builder = Runtime::builder(config, registry);
    // `init` and `migrate` report what the synchronization changed.
    let runtime = match args.command {
        Command::Init | Command::Migrate => builder.open()?,
        _ => builder.bootstrap()?,
    };
    tracing::debug!(uid = args.uid, format = %args.format, "running command");

    let formatter = formatter::create_formatter(args.format);
    commands::execute(&runtime, args.uid, args.command, &*formatter)
}
