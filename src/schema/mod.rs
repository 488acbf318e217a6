//! Schema registry: the authoritative model of tables, columns, units,
//! indexes and foreign keys.

pub mod registry;
pub mod types;

pub use registry::{NewColumnDelta, SchemaDelta, SchemaRegistry};
pub use types::{ColumnDescriptor, ForeignKey, SqlType, TableDescriptor};

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("table '{table}' does not exist (column '{column}' is not marked NEW_KEY)")]
    UnknownTable { table: String, column: String },

    #[error("column '{column}' does not exist in table '{table}'")]
    UnknownColumn { table: String, column: String },

    #[error("column '{column}' already exists in table '{table}'")]
    Conflict { table: String, column: String },

    #[error("table '{table}' already exists")]
    TableExists { table: String },

    #[error(
        "foreign key on {table}({column}) references {target_table}({target_column}), \
         which is not an indexed column"
    )]
    UnresolvedForeignKey {
        table: String,
        column: String,
        target_table: String,
        target_column: String,
    },

    #[error("schema registry moved from version {expected} to {found} during this submission")]
    VersionConflict { expected: u64, found: u64 },
}
