//! Per-row validation of parsed template rows into typed column mappings.

use std::collections::{HashMap, HashSet};

use super::{MappingError, TemplateRow};
use crate::schema::{SchemaRegistry, SqlType};
use crate::units::{parse_unit, Unit};

/// A validated mapping for one source column, tagged by whether the
/// target column already exists or is being created by this submission.
#[derive(Debug, Clone)]
pub enum ColumnMapping {
    Existing(ExistingColumn),
    New(NewColumn),
}

/// Maps a source column onto a column already present in the registry.
#[derive(Debug, Clone)]
pub struct ExistingColumn {
    pub source_name: String,
    pub target_name: String,
    pub table: String,
    pub unit: Option<Unit>,
    pub unit_spec: Option<String>,
}

/// Declares a column (and possibly its table) to be created.
#[derive(Debug, Clone)]
pub struct NewColumn {
    pub source_name: String,
    pub target_name: String,
    pub table: String,
    pub unit: Option<Unit>,
    pub unit_spec: Option<String>,
    pub description: String,
    pub sql_type: SqlType,
    pub is_index: bool,
    pub foreign_key: Option<ForeignKeyRef>,
}

/// A `Table(column)` reference from the FOREIGNKEY cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyRef {
    pub table: String,
    pub column: String,
}

impl ColumnMapping {
    pub fn source_name(&self) -> &str {
        match self {
            ColumnMapping::Existing(m) => &m.source_name,
            ColumnMapping::New(m) => &m.source_name,
        }
    }

    pub fn target_name(&self) -> &str {
        match self {
            ColumnMapping::Existing(m) => &m.target_name,
            ColumnMapping::New(m) => &m.target_name,
        }
    }

    pub fn table(&self) -> &str {
        match self {
            ColumnMapping::Existing(m) => &m.table,
            ColumnMapping::New(m) => &m.table,
        }
    }

    pub fn unit(&self) -> Option<&Unit> {
        match self {
            ColumnMapping::Existing(m) => m.unit.as_ref(),
            ColumnMapping::New(m) => m.unit.as_ref(),
        }
    }

    pub fn unit_spec(&self) -> Option<&str> {
        match self {
            ColumnMapping::Existing(m) => m.unit_spec.as_deref(),
            ColumnMapping::New(m) => m.unit_spec.as_deref(),
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, ColumnMapping::New(_))
    }
}

/// Names that end up in SQL statements: a letter followed by letters,
/// digits or underscores. Keeps metadata tables (underscore-prefixed)
/// out of reach.
fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Truthy cells the way spreadsheets actually write them.
pub(crate) fn parse_truthy(cell: &str) -> Option<bool> {
    match cell.trim().to_ascii_uppercase().as_str() {
        "TRUE" | "T" | "YES" | "Y" | "1" => Some(true),
        "FALSE" | "F" | "NO" | "N" | "0" => Some(false),
        _ => None,
    }
}

/// Parse a FOREIGNKEY cell of the form `Table(column)`.
fn parse_foreign_key(cell: &str) -> Option<ForeignKeyRef> {
    let rest = cell.strip_suffix(')')?;
    let open = rest.find('(')?;
    let (table, column) = rest.split_at(open);
    let column = &column[1..];
    if table.is_empty() || column.is_empty() || column.contains('(') {
        return None;
    }
    Some(ForeignKeyRef {
        table: table.trim().to_string(),
        column: column.trim().to_string(),
    })
}

/// Validate every template row against the registry snapshot, producing
/// one [`ColumnMapping`] per row. All defects are accumulated; a single
/// bad row never hides the others.
pub fn validate(
    rows: &[TemplateRow],
    registry: &SchemaRegistry,
) -> Result<Vec<ColumnMapping>, Vec<MappingError>> {
    let mut errors = Vec::new();
    let mut mappings = Vec::with_capacity(rows.len());

    // Source-column names seen so far, for duplicate detection.
    let mut seen: HashMap<&str, usize> = HashMap::new();
    // (table, column) pairs declared earlier in this template with
    // NEW_KEY and INDEX both set; valid forward targets for FKs.
    let mut declared_keys: HashSet<(String, String)> = HashSet::new();

    for r in rows {
        let before = errors.len();

        if r.my_colname.is_empty() {
            errors.push(MappingError::MissingField {
                row: r.row,
                field: "MY_COLNAME",
            });
        }
        if r.table.is_empty() {
            errors.push(MappingError::MissingField {
                row: r.row,
                field: "TABLE",
            });
        } else if !is_identifier(&r.table) {
            errors.push(MappingError::BadIdentifier {
                row: r.row,
                field: "TABLE",
                value: r.table.clone(),
            });
        }

        if let Some(&first) = seen.get(r.my_colname.as_str()) {
            errors.push(MappingError::DuplicateColumn {
                column: r.my_colname.clone(),
                first,
                second: r.row,
            });
        } else if !r.my_colname.is_empty() {
            seen.insert(r.my_colname.as_str(), r.row);
        }

        // DB_COLNAME defaults to MY_COLNAME.
        let target_name = if r.db_colname.is_empty() {
            r.my_colname.clone()
        } else {
            r.db_colname.clone()
        };
        if !target_name.is_empty() && !is_identifier(&target_name) {
            errors.push(MappingError::BadIdentifier {
                row: r.row,
                field: "DB_COLNAME",
                value: target_name.clone(),
            });
        }

        let is_new = if r.new_key.is_empty() {
            false
        } else {
            match parse_truthy(&r.new_key) {
                Some(v) => v,
                None => {
                    errors.push(MappingError::BadBool {
                        row: r.row,
                        column: r.my_colname.clone(),
                        value: r.new_key.clone(),
                    });
                    false
                }
            }
        };

        let unit = if r.units.is_empty() {
            None
        } else {
            match parse_unit(&r.units) {
                Ok(u) => Some(u),
                Err(source) => {
                    errors.push(MappingError::Unit {
                        row: r.row,
                        column: r.my_colname.clone(),
                        source,
                    });
                    None
                }
            }
        };
        let unit_spec = if r.units.is_empty() {
            None
        } else {
            Some(r.units.clone())
        };

        let mapping = if is_new {
            if r.description.is_empty() {
                errors.push(MappingError::MissingNewField {
                    row: r.row,
                    column: r.my_colname.clone(),
                    field: "DESCRIPTION",
                });
            }
            let sql_type = if r.sql_datatype.is_empty() {
                errors.push(MappingError::MissingNewField {
                    row: r.row,
                    column: r.my_colname.clone(),
                    field: "SQL_DATATYPE",
                });
                None
            } else {
                match SqlType::parse(&r.sql_datatype) {
                    Some(t) => Some(t),
                    None => {
                        errors.push(MappingError::BadType {
                            row: r.row,
                            column: r.my_colname.clone(),
                            value: r.sql_datatype.clone(),
                        });
                        None
                    }
                }
            };

            let is_index = if r.index.is_empty() {
                false
            } else {
                match parse_truthy(&r.index) {
                    Some(v) => v,
                    None => {
                        errors.push(MappingError::BadBool {
                            row: r.row,
                            column: r.my_colname.clone(),
                            value: r.index.clone(),
                        });
                        false
                    }
                }
            };

            let foreign_key = if r.foreignkey.is_empty() {
                None
            } else {
                match parse_foreign_key(&r.foreignkey) {
                    Some(fk) => {
                        let resolvable = registry
                            .has_indexed_column(&fk.table, &fk.column)
                            || declared_keys.contains(&(fk.table.clone(), fk.column.clone()));
                        if resolvable {
                            Some(fk)
                        } else {
                            errors.push(MappingError::UnresolvedForeignKey {
                                row: r.row,
                                column: r.my_colname.clone(),
                                table: fk.table,
                                target: fk.column,
                            });
                            None
                        }
                    }
                    None => {
                        errors.push(MappingError::BadForeignKey {
                            row: r.row,
                            column: r.my_colname.clone(),
                            value: r.foreignkey.clone(),
                        });
                        None
                    }
                }
            };

            if is_index {
                declared_keys.insert((r.table.clone(), target_name.clone()));
            }

            sql_type.map(|sql_type| {
                ColumnMapping::New(NewColumn {
                    source_name: r.my_colname.clone(),
                    target_name: target_name.clone(),
                    table: r.table.clone(),
                    unit,
                    unit_spec,
                    description: r.description.clone(),
                    sql_type,
                    is_index,
                    foreign_key,
                })
            })
        } else {
            // Schema-shaping fields are reserved for new columns; their
            // presence on an existing mapping is an error, not noise.
            for (field, cell) in [
                ("DESCRIPTION", &r.description),
                ("SQL_DATATYPE", &r.sql_datatype),
                ("INDEX", &r.index),
                ("FOREIGNKEY", &r.foreignkey),
            ] {
                if !cell.is_empty() {
                    errors.push(MappingError::UnexpectedField {
                        row: r.row,
                        column: r.my_colname.clone(),
                        field,
                    });
                }
            }

            Some(ColumnMapping::Existing(ExistingColumn {
                source_name: r.my_colname.clone(),
                target_name,
                table: r.table.clone(),
                unit,
                unit_spec,
            }))
        };

        if errors.len() == before {
            if let Some(m) = mapping {
                mappings.push(m);
            }
        }
    }

    if errors.is_empty() {
        Ok(mappings)
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnDescriptor, TableDescriptor};

    fn row(cells: [&str; 9]) -> TemplateRow {
        TemplateRow {
            row: 2,
            my_colname: cells[0].into(),
            db_colname: cells[1].into(),
            table: cells[2].into(),
            units: cells[3].into(),
            new_key: cells[4].into(),
            description: cells[5].into(),
            sql_datatype: cells[6].into(),
            index: cells[7].into(),
            foreignkey: cells[8].into(),
        }
    }

    fn row_at(n: usize, cells: [&str; 9]) -> TemplateRow {
        TemplateRow { row: n, ..row(cells) }
    }

    fn registry_with_indexed(table: &str, column: &str) -> SchemaRegistry {
        let mut t = TableDescriptor::new(table);
        t.columns.push(ColumnDescriptor {
            name: column.into(),
            sql_type: SqlType::Integer,
            canonical_unit: None,
            description: None,
            is_index: true,
        });
        let mut reg = SchemaRegistry::new();
        reg.insert_table(t);
        reg
    }

    #[test]
    fn test_db_colname_defaults_to_my_colname() {
        let rows = [row(["mass_kg", "", "Planets", "kg", "", "", "", "", ""])];
        let mappings = validate(&rows, &SchemaRegistry::new()).unwrap();
        assert_eq!(mappings[0].target_name(), "mass_kg");
        assert!(!mappings[0].is_new());
    }

    #[test]
    fn test_new_key_requires_description_and_type() {
        let rows = [row(["radius", "", "Planets", "km", "TRUE", "", "", "", ""])];
        let errors = validate(&rows, &SchemaRegistry::new()).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, MappingError::MissingNewField { field: "DESCRIPTION", .. })));
        assert!(errors
            .iter()
            .any(|e| matches!(e, MappingError::MissingNewField { field: "SQL_DATATYPE", .. })));
    }

    #[test]
    fn test_schema_fields_forbidden_without_new_key() {
        let rows = [row([
            "mass", "", "Planets", "", "", "a mass", "FLOAT", "", "",
        ])];
        let errors = validate(&rows, &SchemaRegistry::new()).unwrap_err();
        assert_eq!(
            errors
                .iter()
                .filter(|e| matches!(e, MappingError::UnexpectedField { .. }))
                .count(),
            2
        );
    }

    #[test]
    fn test_truthy_cell_spellings() {
        for cell in ["TRUE", "true", "T", "yes", "1"] {
            let rows = [row([
                "c", "", "Planets", "", cell, "desc", "INT", "", "",
            ])];
            let mappings = validate(&rows, &SchemaRegistry::new()).unwrap();
            assert!(mappings[0].is_new(), "'{}' should read as true", cell);
        }
        let rows = [row(["c", "", "Planets", "", "maybe", "", "", "", ""])];
        let errors = validate(&rows, &SchemaRegistry::new()).unwrap_err();
        assert!(errors.iter().any(|e| matches!(e, MappingError::BadBool { .. })));
    }

    #[test]
    fn test_bad_unit_rejects_template() {
        let rows = [row(["m", "", "Planets", "furlongs", "", "", "", "", ""])];
        let errors = validate(&rows, &SchemaRegistry::new()).unwrap_err();
        assert!(errors.iter().any(|e| matches!(e, MappingError::Unit { .. })));
    }

    #[test]
    fn test_duplicate_my_colname() {
        let rows = [
            row_at(2, ["m", "", "Planets", "", "", "", "", "", ""]),
            row_at(3, ["m", "other", "Planets", "", "", "", "", "", ""]),
        ];
        let errors = validate(&rows, &SchemaRegistry::new()).unwrap_err();
        assert!(errors.iter().any(
            |e| matches!(e, MappingError::DuplicateColumn { first: 2, second: 3, .. })
        ));
    }

    #[test]
    fn test_foreign_key_against_registry() {
        let reg = registry_with_indexed("Stars", "star_id");
        let rows = [row([
            "host", "star_id", "Planets", "", "TRUE", "host star", "INT", "", "Stars(star_id)",
        ])];
        let mappings = validate(&rows, &reg).unwrap();
        match &mappings[0] {
            ColumnMapping::New(n) => {
                assert_eq!(
                    n.foreign_key,
                    Some(ForeignKeyRef {
                        table: "Stars".into(),
                        column: "star_id".into()
                    })
                );
            }
            _ => panic!("expected new column"),
        }
    }

    #[test]
    fn test_foreign_key_to_nowhere() {
        let rows = [row([
            "host", "", "Planets", "", "TRUE", "host star", "INT", "", "Stars(star_id)",
        ])];
        let errors = validate(&rows, &SchemaRegistry::new()).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, MappingError::UnresolvedForeignKey { .. })));
    }

    #[test]
    fn test_foreign_key_to_earlier_indexed_row() {
        let rows = [
            row_at(2, [
                "moon_id", "", "Moons", "", "TRUE", "moon identifier", "INT", "TRUE", "",
            ]),
            row_at(3, [
                "parent", "moon_ref", "Craters", "", "TRUE", "parent moon", "INT", "",
                "Moons(moon_id)",
            ]),
        ];
        let mappings = validate(&rows, &SchemaRegistry::new()).unwrap();
        assert_eq!(mappings.len(), 2);
    }

    #[test]
    fn test_foreign_key_to_earlier_unindexed_row_fails() {
        let rows = [
            row_at(2, [
                "moon_id", "", "Moons", "", "TRUE", "moon identifier", "INT", "", "",
            ]),
            row_at(3, [
                "parent", "", "Craters", "", "TRUE", "parent moon", "INT", "",
                "Moons(moon_id)",
            ]),
        ];
        let errors = validate(&rows, &SchemaRegistry::new()).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, MappingError::UnresolvedForeignKey { .. })));
    }

    #[test]
    fn test_malformed_foreign_key_cell() {
        for bad in ["Stars.star_id", "Stars(", "(star_id)", "Stars()"] {
            let rows = [row([
                "host", "", "Planets", "", "TRUE", "host star", "INT", "", bad,
            ])];
            let errors = validate(&rows, &SchemaRegistry::new()).unwrap_err();
            assert!(
                errors
                    .iter()
                    .any(|e| matches!(e, MappingError::BadForeignKey { .. })),
                "'{}' should be malformed",
                bad
            );
        }
    }

    #[test]
    fn test_identifier_rule() {
        let rows = [row(["a", "bad name", "Planets", "", "", "", "", "", ""])];
        let errors = validate(&rows, &SchemaRegistry::new()).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, MappingError::BadIdentifier { field: "DB_COLNAME", .. })));

        // Underscore-prefixed table names are reserved for metadata.
        let rows = [row(["a", "", "_targetdb_meta", "", "", "", "", "", ""])];
        let errors = validate(&rows, &SchemaRegistry::new()).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, MappingError::BadIdentifier { field: "TABLE", .. })));
    }

    #[test]
    fn test_errors_accumulate_across_rows() {
        let rows = [
            row_at(2, ["", "", "Planets", "", "", "", "", "", ""]),
            row_at(3, ["b", "", "", "bogus", "", "", "", "", ""]),
        ];
        let errors = validate(&rows, &SchemaRegistry::new()).unwrap_err();
        assert!(errors.len() >= 3);
    }
}
