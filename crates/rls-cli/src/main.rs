//! `rls` - row-level-security policy tool
//!
//! Compiles entity schema `rls` blocks, answers access questions against
//! them, and hot-reloads a schema directory.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use rls_ir::Operation;

mod commands;
mod config;
mod logging;

use config::Config;

#[derive(Parser)]
#[command(name = "rls")]
#[command(author, version, long_about = None)]
#[command(about = "Row-level-security policy compiler and evaluator")]
struct Cli {
    /// Path to config.yaml (defaults apply when absent)
    #[arg(long, global = true, default_value = "config.yaml")]
    config: PathBuf,

    /// Entity schema directory (overrides config)
    #[arg(long, global = true)]
    schemas: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile every entity schema and report errors
    Validate,

    /// Decide one access request
    Decide {
        #[arg(long)]
        entity: String,

        /// read or write
        #[arg(long, default_value = "read")]
        operation: Operation,

        /// Principal attributes as a JSON object, or @file.json
        #[arg(long, default_value = "{}")]
        principal: String,

        /// Target record as a JSON object, or @file.json
        #[arg(long)]
        record: Option<String>,

        /// Include the evaluation trace
        #[arg(long)]
        trace: bool,
    },

    /// Print compiled policies as JSON
    Show {
        /// Only this entity (all entities when omitted)
        #[arg(long)]
        entity: Option<String>,
    },

    /// Print the records a principal may access
    Filter {
        #[arg(long)]
        entity: String,

        #[arg(long, default_value = "read")]
        operation: Operation,

        /// Principal attributes as a JSON object, or @file.json
        #[arg(long, default_value = "{}")]
        principal: String,

        /// JSON array of records, or @file.json
        #[arg(long)]
        records: String,
    },

    /// Poll the schema directory and hot-reload on change
    Watch {
        /// Seconds between polls (overrides config)
        #[arg(long)]
        interval_secs: Option<u64>,
    },
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let mut config = Config::load_or_default(&cli.config)?;
    if let Some(dir) = cli.schemas {
        config.schemas.directory = dir;
    }

    config.apply_logging_env();
    logging::init();

    match cli.command {
        Commands::Validate => commands::validate(&config),
        Commands::Decide {
            entity,
            operation,
            principal,
            record,
            trace,
        } => commands::decide(
            &config,
            &entity,
            operation,
            &principal,
            record.as_deref(),
            trace,
        ),
        Commands::Show { entity } => commands::show(&config, entity.as_deref()),
        Commands::Filter {
            entity,
            operation,
            principal,
            records,
        } => commands::filter(&config, &entity, operation, &principal, &records),
        Commands::Watch { interval_secs } => {
            let secs = interval_secs.unwrap_or(config.schemas.poll_interval_secs);
            commands::watch(&config, std::time::Duration::from_secs(secs.max(1)))
        }
    }
}
