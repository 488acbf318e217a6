//! Versioned in-memory registry plus the atomic schema delta computed
//! from one submission.
//!
//! The registry is read as a snapshot; a delta records the snapshot
//! version it was computed against, and [`SchemaRegistry::apply`]
//! refuses to apply a delta whose base version no longer matches.

use std::collections::HashMap;

use super::types::{ColumnDescriptor, ForeignKey, TableDescriptor};
use super::SchemaError;
use crate::mapping::ColumnMapping;

/// A column appended to an existing table by a submission.
#[derive(Debug, Clone)]
pub struct NewColumnDelta {
    pub table: String,
    pub column: ColumnDescriptor,
    pub foreign_key: Option<ForeignKey>,
}

/// Every schema extension implied by one submission, applied
/// all-or-nothing.
#[derive(Debug, Clone, Default)]
pub struct SchemaDelta {
    /// Registry version this delta was computed against.
    pub base_version: u64,
    pub new_tables: Vec<TableDescriptor>,
    pub new_columns: Vec<NewColumnDelta>,
}

impl SchemaDelta {
    pub fn is_empty(&self) -> bool {
        self.new_tables.is_empty() && self.new_columns.is_empty()
    }

    fn has_indexed_column(&self, table: &str, column: &str) -> bool {
        let in_new_table = self
            .new_tables
            .iter()
            .any(|t| t.name == table && t.column(column).map(|c| c.is_index).unwrap_or(false));
        let in_new_column = self
            .new_columns
            .iter()
            .any(|c| c.table == table && c.column.name == column && c.column.is_index);
        in_new_table || in_new_column
    }
}

/// Mapping from table name to descriptor, with an optimistic-concurrency
/// version bumped on every applied delta.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    tables: HashMap<String, TableDescriptor>,
    version: u64,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_version(version: u64) -> Self {
        Self {
            tables: HashMap::new(),
            version,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn table(&self, name: &str) -> Option<&TableDescriptor> {
        self.tables.get(name)
    }

    /// Table names in sorted order.
    pub fn table_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tables.keys().map(|n| n.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn has_indexed_column(&self, table: &str, column: &str) -> bool {
        self.tables
            .get(table)
            .and_then(|t| t.column(column))
            .map(|c| c.is_index)
            .unwrap_or(false)
    }

    /// Register a loaded table descriptor. Used when rebuilding the
    /// registry from persisted metadata.
    pub fn insert_table(&mut self, table: TableDescriptor) {
        self.tables.insert(table.name.clone(), table);
    }

    /// Reconcile validated mappings against this snapshot and compute
    /// the schema delta the submission implies. Pure: the registry is
    /// not touched.
    pub fn resolve_or_extend(
        &self,
        mappings: &[ColumnMapping],
    ) -> Result<SchemaDelta, SchemaError> {
        let mut delta = SchemaDelta {
            base_version: self.version,
            ..Default::default()
        };

        for mapping in mappings {
            match mapping {
                ColumnMapping::Existing(m) => {
                    let table = self.tables.get(&m.table).ok_or_else(|| {
                        SchemaError::UnknownTable {
                            table: m.table.clone(),
                            column: m.source_name.clone(),
                        }
                    })?;
                    if table.column(&m.target_name).is_none() {
                        return Err(SchemaError::UnknownColumn {
                            table: m.table.clone(),
                            column: m.target_name.clone(),
                        });
                    }
                }
                ColumnMapping::New(n) => {
                    let column = ColumnDescriptor {
                        name: n.target_name.clone(),
                        sql_type: n.sql_type,
                        canonical_unit: n.unit_spec.clone(),
                        description: Some(n.description.clone()),
                        is_index: n.is_index,
                    };
                    let foreign_key = n.foreign_key.as_ref().map(|fk| ForeignKey {
                        column: n.target_name.clone(),
                        references_table: fk.table.clone(),
                        references_column: fk.column.clone(),
                    });

                    let conflict = || SchemaError::Conflict {
                        table: n.table.clone(),
                        column: n.target_name.clone(),
                    };

                    if let Some(existing) = self.tables.get(&n.table) {
                        if existing.column(&n.target_name).is_some() {
                            return Err(conflict());
                        }
                        let pending = delta
                            .new_columns
                            .iter()
                            .any(|c| c.table == n.table && c.column.name == n.target_name);
                        if pending {
                            return Err(conflict());
                        }
                        delta.new_columns.push(NewColumnDelta {
                            table: n.table.clone(),
                            column,
                            foreign_key,
                        });
                    } else if let Some(t) =
                        delta.new_tables.iter_mut().find(|t| t.name == n.table)
                    {
                        if t.column(&n.target_name).is_some() {
                            return Err(conflict());
                        }
                        t.columns.push(column);
                        if let Some(fk) = foreign_key {
                            t.foreign_keys.push(fk);
                        }
                    } else {
                        let mut t = TableDescriptor::new(n.table.clone());
                        t.columns.push(column);
                        if let Some(fk) = foreign_key {
                            t.foreign_keys.push(fk);
                        }
                        delta.new_tables.push(t);
                    }
                }
            }
        }

        Ok(delta)
    }

    /// Apply a delta computed against this registry's current version.
    /// Every foreign key must resolve to an indexed column at this
    /// point; the whole delta applies or none of it does.
    pub fn apply(&mut self, delta: &SchemaDelta) -> Result<(), SchemaError> {
        if delta.base_version != self.version {
            return Err(SchemaError::VersionConflict {
                expected: delta.base_version,
                found: self.version,
            });
        }

        for t in &delta.new_tables {
            if self.tables.contains_key(&t.name) {
                return Err(SchemaError::TableExists {
                    table: t.name.clone(),
                });
            }
            for fk in &t.foreign_keys {
                self.check_foreign_key(delta, &t.name, fk)?;
            }
        }
        for c in &delta.new_columns {
            let table = self
                .tables
                .get(&c.table)
                .ok_or_else(|| SchemaError::UnknownTable {
                    table: c.table.clone(),
                    column: c.column.name.clone(),
                })?;
            if table.column(&c.column.name).is_some() {
                return Err(SchemaError::Conflict {
                    table: c.table.clone(),
                    column: c.column.name.clone(),
                });
            }
            if let Some(fk) = &c.foreign_key {
                self.check_foreign_key(delta, &c.table, fk)?;
            }
        }

        for t in &delta.new_tables {
            self.tables.insert(t.name.clone(), t.clone());
        }
        for c in &delta.new_columns {
            let table = self.tables.get_mut(&c.table).expect("checked above");
            table.columns.push(c.column.clone());
            if let Some(fk) = &c.foreign_key {
                table.foreign_keys.push(fk.clone());
            }
        }
        self.version += 1;
        Ok(())
    }

    fn check_foreign_key(
        &self,
        delta: &SchemaDelta,
        table: &str,
        fk: &ForeignKey,
    ) -> Result<(), SchemaError> {
        let ok = self.has_indexed_column(&fk.references_table, &fk.references_column)
            || delta.has_indexed_column(&fk.references_table, &fk.references_column);
        if ok {
            Ok(())
        } else {
            Err(SchemaError::UnresolvedForeignKey {
                table: table.to_string(),
                column: fk.column.clone(),
                target_table: fk.references_table.clone(),
                target_column: fk.references_column.clone(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{ExistingColumn, ForeignKeyRef, NewColumn};
    use crate::schema::SqlType;

    fn existing(source: &str, target: &str, table: &str) -> ColumnMapping {
        ColumnMapping::Existing(ExistingColumn {
            source_name: source.into(),
            target_name: target.into(),
            table: table.into(),
            unit: None,
            unit_spec: None,
        })
    }

    fn new_col(target: &str, table: &str, is_index: bool, fk: Option<(&str, &str)>) -> ColumnMapping {
        ColumnMapping::New(NewColumn {
            source_name: target.into(),
            target_name: target.into(),
            table: table.into(),
            unit: None,
            unit_spec: None,
            description: format!("{} column", target),
            sql_type: SqlType::Integer,
            is_index,
            foreign_key: fk.map(|(t, c)| ForeignKeyRef {
                table: t.into(),
                column: c.into(),
            }),
        })
    }

    fn registry_with_planets() -> SchemaRegistry {
        let mut t = TableDescriptor::new("Planets");
        t.columns.push(ColumnDescriptor {
            name: "mass".into(),
            sql_type: SqlType::Real,
            canonical_unit: Some("g".into()),
            description: None,
            is_index: false,
        });
        let mut reg = SchemaRegistry::new();
        reg.insert_table(t);
        reg
    }

    #[test]
    fn test_existing_mapping_resolves() {
        let reg = registry_with_planets();
        let delta = reg
            .resolve_or_extend(&[existing("mass_kg", "mass", "Planets")])
            .unwrap();
        assert!(delta.is_empty());
    }

    #[test]
    fn test_unknown_table_and_column() {
        let reg = registry_with_planets();
        let err = reg
            .resolve_or_extend(&[existing("x", "x", "Asteroids")])
            .unwrap_err();
        assert!(matches!(err, SchemaError::UnknownTable { .. }));

        let err = reg
            .resolve_or_extend(&[existing("x", "radius", "Planets")])
            .unwrap_err();
        assert!(matches!(err, SchemaError::UnknownColumn { .. }));
    }

    #[test]
    fn test_new_column_collision() {
        let reg = registry_with_planets();
        let err = reg
            .resolve_or_extend(&[new_col("mass", "Planets", false, None)])
            .unwrap_err();
        assert!(matches!(err, SchemaError::Conflict { .. }));
    }

    #[test]
    fn test_duplicate_new_column_in_batch() {
        let reg = registry_with_planets();
        let err = reg
            .resolve_or_extend(&[
                new_col("radius", "Planets", false, None),
                new_col("radius", "Planets", false, None),
            ])
            .unwrap_err();
        assert!(matches!(err, SchemaError::Conflict { .. }));
    }

    #[test]
    fn test_new_table_groups_columns() {
        let reg = SchemaRegistry::new();
        let delta = reg
            .resolve_or_extend(&[
                new_col("moon_id", "Moons", true, None),
                new_col("radius", "Moons", false, None),
            ])
            .unwrap();
        assert_eq!(delta.new_tables.len(), 1);
        assert_eq!(delta.new_tables[0].columns.len(), 2);
        assert!(delta.new_columns.is_empty());
    }

    #[test]
    fn test_apply_bumps_version() {
        let mut reg = SchemaRegistry::new();
        let delta = reg
            .resolve_or_extend(&[new_col("moon_id", "Moons", true, None)])
            .unwrap();
        reg.apply(&delta).unwrap();
        assert_eq!(reg.version(), 1);
        assert!(reg.has_indexed_column("Moons", "moon_id"));
    }

    #[test]
    fn test_apply_rejects_stale_delta() {
        let mut reg = SchemaRegistry::new();
        let stale = reg
            .resolve_or_extend(&[new_col("moon_id", "Moons", true, None)])
            .unwrap();

        let other = reg
            .resolve_or_extend(&[new_col("star_id", "Stars", true, None)])
            .unwrap();
        reg.apply(&other).unwrap();

        let err = reg.apply(&stale).unwrap_err();
        assert!(matches!(err, SchemaError::VersionConflict { .. }));
    }

    #[test]
    fn test_apply_validates_foreign_keys() {
        let mut reg = SchemaRegistry::new();
        let delta = reg
            .resolve_or_extend(&[
                new_col("moon_id", "Moons", true, None),
                new_col("moon_ref", "Craters", false, Some(("Moons", "moon_id"))),
            ])
            .unwrap();
        reg.apply(&delta).unwrap();

        let moons = reg.table("Craters").unwrap();
        assert_eq!(moons.foreign_keys.len(), 1);
        assert_eq!(moons.foreign_keys[0].references_table, "Moons");

        // A delta whose FK target is not indexed must not apply.
        let mut reg = SchemaRegistry::new();
        let mut bad = reg
            .resolve_or_extend(&[new_col("a", "T", false, None)])
            .unwrap();
        bad.new_tables[0].foreign_keys.push(ForeignKey {
            column: "a".into(),
            references_table: "Nowhere".into(),
            references_column: "b".into(),
        });
        let err = reg.apply(&bad).unwrap_err();
        assert!(matches!(err, SchemaError::UnresolvedForeignKey { .. }));
        assert_eq!(reg.version(), 0);
        assert!(reg.table("T").is_none());
    }
}
