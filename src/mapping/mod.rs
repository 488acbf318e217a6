//! Mapping template parsing and validation.
//!
//! A template is the 9-column sheet translating a contributor's source
//! columns into database table/column targets. `template` enforces the
//! structural rules; `validate` produces typed [`ColumnMapping`]s.

pub mod template;
pub mod validate;

pub use template::{parse_template, template_rows_from_path, TemplateRow, TEMPLATE_COLUMNS};
pub use validate::{validate, ColumnMapping, ExistingColumn, ForeignKeyRef, NewColumn};

use std::fmt;

use thiserror::Error;

use crate::units::UnitError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MappingError {
    #[error("unrecognized template column '{name}'")]
    UnexpectedColumn { name: String },

    #[error("template is missing required column '{name}'")]
    MissingColumn { name: String },

    #[error("row {row}: a blank row must not precede a comment row")]
    StrayBlank { row: usize },

    #[error("row {row}: found {found} cells, expected {expected}")]
    RowArity {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("template contains no data rows")]
    Empty,

    #[error("row {row}: {field} must not be blank")]
    MissingField { row: usize, field: &'static str },

    #[error("row {row} ('{column}'): {field} is required when NEW_KEY is true")]
    MissingNewField {
        row: usize,
        column: String,
        field: &'static str,
    },

    #[error("row {row} ('{column}'): {field} must be blank unless NEW_KEY is true")]
    UnexpectedField {
        row: usize,
        column: String,
        field: &'static str,
    },

    #[error("row {row}: '{value}' is not a valid {field} identifier")]
    BadIdentifier {
        row: usize,
        field: &'static str,
        value: String,
    },

    #[error("row {row} ('{column}'): cannot read '{value}' as a boolean")]
    BadBool {
        row: usize,
        column: String,
        value: String,
    },

    #[error("row {row} ('{column}'): unknown SQL datatype '{value}'")]
    BadType {
        row: usize,
        column: String,
        value: String,
    },

    #[error("row {row} ('{column}'): {source}")]
    Unit {
        row: usize,
        column: String,
        source: UnitError,
    },

    #[error("duplicate MY_COLNAME '{column}' (rows {first} and {second})")]
    DuplicateColumn {
        column: String,
        first: usize,
        second: usize,
    },

    #[error("row {row} ('{column}'): foreign key '{value}' is malformed, expected Table(column)")]
    BadForeignKey {
        row: usize,
        column: String,
        value: String,
    },

    #[error(
        "row {row} ('{column}'): foreign key target {table}({target}) is not an \
         indexed column in the registry or earlier in this template"
    )]
    UnresolvedForeignKey {
        row: usize,
        column: String,
        table: String,
        target: String,
    },
}

/// Everything wrong with one template, accumulated so the contributor
/// can fix the whole sheet in one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingErrors(pub Vec<MappingError>);

impl fmt::Display for MappingErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "template validation failed ({} error(s)):", self.0.len())?;
        for e in &self.0 {
            write!(f, "\n  - {}", e)?;
        }
        Ok(())
    }
}

impl std::error::Error for MappingErrors {}

impl From<Vec<MappingError>> for MappingErrors {
    fn from(errors: Vec<MappingError>) -> Self {
        Self(errors)
    }
}
