//! In-memory tabular values: an ordered set of named columns plus rows.
//!
//! This is the shape both the mapping template's data sheet and the
//! transformed rows travel in. Cells stay textual until the ingestion
//! engine coerces them into the target column's SQL datatype.

use std::collections::HashSet;
use std::io::Read;
use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TableError {
    #[error("duplicate column '{name}' in data table")]
    DuplicateColumn { name: String },

    #[error("row {row} has {found} cells, expected {expected}")]
    RowArity {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("data table has no header row")]
    MissingHeader,

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

/// A single cell value, directly bindable to a SQLite statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn bind_to(&self, idx: usize, stmt: &mut rusqlite::Statement) -> rusqlite::Result<()> {
        match self {
            Value::Null => stmt.raw_bind_parameter(idx, rusqlite::types::Null)?,
            Value::Integer(i) => stmt.raw_bind_parameter(idx, i)?,
            Value::Real(f) => stmt.raw_bind_parameter(idx, f)?,
            Value::Text(s) => stmt.raw_bind_parameter(idx, s.as_str())?,
        }
        Ok(())
    }
}

/// Ordered named columns with uniformly sized rows.
#[derive(Debug, Clone)]
pub struct DataTable {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl DataTable {
    pub fn new(columns: Vec<String>) -> Result<Self, TableError> {
        let mut seen = HashSet::new();
        for name in &columns {
            if !seen.insert(name.as_str()) {
                return Err(TableError::DuplicateColumn { name: name.clone() });
            }
        }
        Ok(Self {
            columns,
            rows: Vec::new(),
        })
    }

    /// Append a row; its arity must match the header.
    pub fn push_row(&mut self, row: Vec<Value>) -> Result<(), TableError> {
        if row.len() != self.columns.len() {
            return Err(TableError::RowArity {
                row: self.rows.len() + 1,
                expected: self.columns.len(),
                found: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    /// Read a CSV file: first record is the header, every cell is kept
    /// as text (empty cells become NULL).
    pub fn from_csv_path(path: &Path) -> Result<Self, TableError> {
        let reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(false)
            .from_path(path)?;
        Self::from_csv(reader)
    }

    pub fn from_csv<R: Read>(mut reader: csv::Reader<R>) -> Result<Self, TableError> {
        let mut records = reader.records();

        let header = match records.next() {
            Some(rec) => rec?,
            None => return Err(TableError::MissingHeader),
        };
        let columns: Vec<String> = header.iter().map(|c| c.trim().to_string()).collect();
        let mut table = Self::new(columns)?;

        for rec in records {
            let rec = rec?;
            let row: Vec<Value> = rec
                .iter()
                .map(|cell| {
                    let cell = cell.trim();
                    if cell.is_empty() {
                        Value::Null
                    } else {
                        Value::Text(cell.to_string())
                    }
                })
                .collect();
            table.push_row(row)?;
        }

        Ok(table)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn csv_reader(text: &str) -> csv::Reader<&[u8]> {
        csv::ReaderBuilder::new()
            .has_headers(false)
            .from_reader(text.as_bytes())
    }

    #[test]
    fn test_from_csv() {
        let table = DataTable::from_csv(csv_reader("a,b\n1,x\n2,\n")).unwrap();
        assert_eq!(table.columns(), &["a", "b"]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows()[0][0], Value::Text("1".into()));
        assert_eq!(table.rows()[1][1], Value::Null);
    }

    #[test]
    fn test_duplicate_header_rejected() {
        let err = DataTable::from_csv(csv_reader("a,a\n1,2\n")).unwrap_err();
        assert!(matches!(err, TableError::DuplicateColumn { .. }));
    }

    #[test]
    fn test_row_arity_enforced() {
        let mut table = DataTable::new(vec!["a".into(), "b".into()]).unwrap();
        let err = table.push_row(vec![Value::Null]).unwrap_err();
        assert!(matches!(err, TableError::RowArity { .. }));
    }

    #[test]
    fn test_column_index() {
        let table = DataTable::new(vec!["x".into(), "y".into()]).unwrap();
        assert_eq!(table.column_index("y"), Some(1));
        assert_eq!(table.column_index("z"), None);
    }
}
