pub mod cli;
pub mod ingest;
pub mod mapping;
pub mod schema;
pub mod table;
pub mod units;
pub mod writer;

pub use cli::{Cli, Commands};
pub use ingest::{IngestError, IngestionReport, SubmissionState};
pub use table::DataTable;
pub use writer::SqliteStore;
