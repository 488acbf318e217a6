use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "targetdb-ingest")]
#[command(version, about = "Ingest mapped spreadsheet submissions into the target database")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate and commit one (template, data) submission
    Ingest {
        /// Mapping template CSV
        template: PathBuf,

        /// Data table CSV, columns named per MY_COLNAME
        data: PathBuf,

        /// Target SQLite database path
        db: PathBuf,

        /// Write the ingestion report as JSON
        #[arg(long)]
        report_json: Option<PathBuf>,

        /// Run the full pipeline but commit nothing
        #[arg(long)]
        dry_run: bool,
    },

    /// Check a mapping template without touching any data
    Validate {
        /// Mapping template CSV
        template: PathBuf,

        /// Resolve against this database instead of an empty registry
        #[arg(short, long)]
        db: Option<PathBuf>,
    },

    /// List all tables in the database
    ListTables {
        /// SQLite database path
        db: PathBuf,
    },

    /// Show a table's columns, units and constraints
    Describe {
        /// SQLite database path
        db: PathBuf,

        /// Table name
        table: String,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
