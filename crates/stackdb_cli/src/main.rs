//! stackdb CLI
//!
//! Command-line tools for stackdb store files.
//!
//! # Commands
//!
//! - `inspect` - Display store statistics and metadata
//! - `dump` - Print the records of an entity as JSON lines
//! - `meta` - Read and write store metadata
//! - `compact` - Rewrite the log as a single snapshot
//! - `reset` - Erase every record and all metadata

mod commands;

use clap::{Parser, Subcommand};
use commands::{CliError, OpenOptions};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// stackdb command-line store tools.
#[derive(Parser)]
#[command(name = "stackdb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store file
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Schema files the store was built from, in load order
    #[arg(global = true, short, long = "schema")]
    schema: Vec<PathBuf>,

    /// Allow opening a store written with a different schema
    #[arg(global = true, long)]
    migrate: bool,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display store statistics and metadata
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print the records of an entity as JSON lines
    Dump {
        /// Entity to dump
        entity: String,

        /// Maximum number of records to print
        #[arg(short, long)]
        limit: Option<usize>,

        /// Sort by this attribute
        #[arg(long)]
        sort: Option<String>,
    },

    /// Read and write store metadata
    Meta {
        #[command(subcommand)]
        action: MetaAction,
    },

    /// Rewrite the log as a header plus one snapshot commit
    Compact,

    /// Erase every record and all metadata
    Reset {
        /// Required confirmation
        #[arg(long)]
        yes: bool,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum MetaAction {
    /// Print one value
    Get {
        /// Metadata key
        key: String,
    },
    /// Set a value; JSON booleans, integers and strings are accepted,
    /// anything else is stored as text
    Set {
        /// Metadata key
        key: String,
        /// New value
        value: String,
    },
    /// Remove a key
    Remove {
        /// Metadata key
        key: String,
    },
    /// Print every entry
    List,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    if let Commands::Version = cli.command {
        println!("stackdb CLI v{}", env!("CARGO_PKG_VERSION"));
        println!("stackdb Core v{}", stackdb_core::VERSION);
        return Ok(());
    }

    let open = OpenOptions {
        path: cli.path.ok_or_else(|| CliError::usage("store path required (--path)"))?,
        schema: cli.schema,
        migrate: cli.migrate,
    };
    match cli.command {
        Commands::Inspect { format } => commands::inspect::run(&open, &format)?,
        Commands::Dump { entity, limit, sort } => commands::dump::run(&open, &entity, limit, sort.as_deref())?,
        Commands::Meta { action } => match action {
            MetaAction::Get { key } => commands::meta::get(&open, &key)?,
            MetaAction::Set { key, value } => commands::meta::set(&open, &key, &value)?,
            MetaAction::Remove { key } => commands::meta::remove(&open, &key)?,
            MetaAction::List => commands::meta::list(&open)?,
        },
        Commands::Compact => commands::maintenance::compact(&open)?,
        Commands::Reset { yes } => {
            if !yes {
                return Err(CliError::usage("reset erases the store; pass --yes to confirm").into());
            }
            commands::maintenance::reset(&open)?;
        }
        Commands::Version => {}
    }

    Ok(())
}
