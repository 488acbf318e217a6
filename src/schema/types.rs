use std::collections::HashSet;
use std::fmt;

use serde::Serialize;

/// Column data type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SqlType {
    Integer,
    Real,
    Text,
    Boolean,
}

impl SqlType {
    /// Parse a SQL_DATATYPE cell. Spreadsheets arrive with a range of
    /// spellings; STRING maps to TEXT.
    pub fn parse(spec: &str) -> Option<Self> {
        let t = match spec.trim().to_ascii_uppercase().as_str() {
            "INT" | "INTEGER" | "BIGINT" | "SMALLINT" => SqlType::Integer,
            "REAL" | "FLOAT" | "DOUBLE" => SqlType::Real,
            "TEXT" | "STRING" | "VARCHAR" => SqlType::Text,
            "BOOL" | "BOOLEAN" => SqlType::Boolean,
            _ => return None,
        };
        Some(t)
    }

    /// SQLite column type keyword. Booleans are stored as INTEGER 0/1.
    pub fn sql(&self) -> &'static str {
        match self {
            SqlType::Integer => "INTEGER",
            SqlType::Real => "REAL",
            SqlType::Text => "TEXT",
            SqlType::Boolean => "INTEGER",
        }
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SqlType::Integer => "INTEGER",
            SqlType::Real => "REAL",
            SqlType::Text => "TEXT",
            SqlType::Boolean => "BOOLEAN",
        };
        write!(f, "{}", name)
    }
}

/// Foreign key reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    pub column: String,
    pub references_table: String,
    pub references_column: String,
}

/// Column definition
#[derive(Debug, Clone)]
pub struct ColumnDescriptor {
    pub name: String,
    pub sql_type: SqlType,
    /// Unit of record for this column; incoming values are converted to it.
    pub canonical_unit: Option<String>,
    pub description: Option<String>,
    pub is_index: bool,
}

/// Table schema definition
#[derive(Debug, Clone)]
pub struct TableDescriptor {
    pub name: String,
    pub columns: Vec<ColumnDescriptor>,
    pub foreign_keys: Vec<ForeignKey>,
}

impl TableDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Names of all indexed columns.
    pub fn indexes(&self) -> HashSet<&str> {
        self.columns
            .iter()
            .filter(|c| c.is_index)
            .map(|c| c.name.as_str())
            .collect()
    }
}
