//! Structural parsing of the raw mapping template.
//!
//! The template arrives as loosely formatted CSV: comment rows start
//! with `#`, blank rows are tolerated at the end of a block but must
//! never sit between data and a comment row.

use std::path::Path;

use super::MappingError;

/// The fixed set of recognized template columns.
pub const TEMPLATE_COLUMNS: [&str; 9] = [
    "MY_COLNAME",
    "DB_COLNAME",
    "TABLE",
    "UNITS",
    "NEW_KEY",
    "DESCRIPTION",
    "SQL_DATATYPE",
    "INDEX",
    "FOREIGNKEY",
];

const COMMENT_MARKER: char = '#';

/// One data row of the template, cells trimmed, keyed by position in
/// the raw input for error messages.
#[derive(Debug, Clone, Default)]
pub struct TemplateRow {
    pub row: usize,
    pub my_colname: String,
    pub db_colname: String,
    pub table: String,
    pub units: String,
    pub new_key: String,
    pub description: String,
    pub sql_datatype: String,
    pub index: String,
    pub foreignkey: String,
}

/// Read raw template rows from a CSV file. Comment rows may be ragged,
/// so the reader is put in flexible mode; all structure checks happen
/// in [`parse_template`].
pub fn template_rows_from_path(path: &Path) -> Result<Vec<Vec<String>>, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;

    let mut rows = Vec::new();
    for rec in reader.records() {
        let rec = rec?;
        rows.push(rec.iter().map(|c| c.to_string()).collect());
    }
    Ok(rows)
}

/// Apply the structural rules and split the raw rows into header-mapped
/// [`TemplateRow`]s. All structural defects are accumulated.
pub fn parse_template(raw: &[Vec<String>]) -> Result<Vec<TemplateRow>, Vec<MappingError>> {
    let mut errors = Vec::new();

    let mut header: Option<Vec<String>> = None;
    let mut data: Vec<(usize, &Vec<String>)> = Vec::new();
    let mut pending_blank = false;

    for (i, cells) in raw.iter().enumerate() {
        let row = i + 1;
        let is_blank = cells.iter().all(|c| c.trim().is_empty());
        let is_comment = cells
            .first()
            .map(|c| c.trim_start().starts_with(COMMENT_MARKER))
            .unwrap_or(false);

        if is_comment {
            if pending_blank {
                errors.push(MappingError::StrayBlank { row });
            }
            continue;
        }
        if is_blank {
            pending_blank = true;
            continue;
        }
        pending_blank = false;

        if header.is_none() {
            header = Some(cells.iter().map(|c| c.trim().to_string()).collect());
        } else {
            data.push((row, cells));
        }
    }

    let header = match header {
        Some(h) => h,
        None => {
            errors.push(MappingError::Empty);
            return Err(errors);
        }
    };

    // Exactly the recognized column set, order-insensitive.
    let mut seen: Vec<&str> = Vec::new();
    for name in &header {
        if !TEMPLATE_COLUMNS.contains(&name.as_str()) || seen.contains(&name.as_str()) {
            errors.push(MappingError::UnexpectedColumn { name: name.clone() });
        }
        seen.push(name.as_str());
    }
    for required in TEMPLATE_COLUMNS {
        if !seen.contains(&required) {
            errors.push(MappingError::MissingColumn {
                name: required.to_string(),
            });
        }
    }
    if !errors.is_empty() {
        return Err(errors);
    }

    let pos = |name: &str| -> usize {
        header
            .iter()
            .position(|h| h == name)
            .expect("header verified to contain every recognized column")
    };
    let positions: [usize; 9] = [
        pos("MY_COLNAME"),
        pos("DB_COLNAME"),
        pos("TABLE"),
        pos("UNITS"),
        pos("NEW_KEY"),
        pos("DESCRIPTION"),
        pos("SQL_DATATYPE"),
        pos("INDEX"),
        pos("FOREIGNKEY"),
    ];

    let mut parsed = Vec::with_capacity(data.len());
    for (row, cells) in data {
        if cells.len() > header.len() {
            errors.push(MappingError::RowArity {
                row,
                expected: header.len(),
                found: cells.len(),
            });
            continue;
        }
        // Short rows are padded: trailing blank cells are commonly
        // dropped by spreadsheet exports.
        let cell = |idx: usize| -> String {
            cells.get(idx).map(|c| c.trim().to_string()).unwrap_or_default()
        };
        parsed.push(TemplateRow {
            row,
            my_colname: cell(positions[0]),
            db_colname: cell(positions[1]),
            table: cell(positions[2]),
            units: cell(positions[3]),
            new_key: cell(positions[4]),
            description: cell(positions[5]),
            sql_datatype: cell(positions[6]),
            index: cell(positions[7]),
            foreignkey: cell(positions[8]),
        });
    }

    if parsed.is_empty() && errors.is_empty() {
        errors.push(MappingError::Empty);
    }
    if errors.is_empty() {
        Ok(parsed)
    } else {
        Err(errors)
    }
}
