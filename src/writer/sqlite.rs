//! SQLite persistence: the registry's metadata tables and the
//! one-transaction commit that applies a schema delta together with the
//! transformed rows.

use std::path::Path;

use rusqlite::{Connection, OptionalExtension, Transaction};
use thiserror::Error;

use super::schema_gen::{generate_add_column, generate_create_table, generate_index, generate_indexes};
use crate::schema::{
    ColumnDescriptor, ForeignKey, SchemaDelta, SchemaError, SchemaRegistry, SqlType,
    TableDescriptor,
};
use crate::table::Value;

/// Side tables carrying what SQLite itself cannot: per-column units,
/// descriptions, index flags, and the registry version.
const META_DDL: &str = "
CREATE TABLE IF NOT EXISTS _targetdb_columns (
    table_name TEXT NOT NULL,
    column_name TEXT NOT NULL,
    sql_type TEXT NOT NULL,
    canonical_unit TEXT,
    description TEXT,
    is_index INTEGER NOT NULL DEFAULT 0,
    fk_table TEXT,
    fk_column TEXT,
    PRIMARY KEY (table_name, column_name)
);
CREATE TABLE IF NOT EXISTS _targetdb_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
INSERT OR IGNORE INTO _targetdb_meta (key, value) VALUES ('schema_version', '0');
";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("corrupt registry metadata: {message}")]
    Corrupt { message: String },
}

/// Transformed rows destined for one table.
#[derive(Debug, Clone)]
pub struct InsertSet {
    pub table: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        // Enable foreign keys and optimize for bulk insert
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -64000;",
        )?;
        conn.execute_batch(META_DDL)?;
        Ok(Self { conn })
    }

    /// Rebuild the registry snapshot from the metadata tables.
    pub fn load_registry(&self) -> Result<SchemaRegistry, StoreError> {
        let version = self.stored_version()?;
        let mut registry = SchemaRegistry::with_version(version);

        let mut stmt = self.conn.prepare(
            "SELECT table_name, column_name, sql_type, canonical_unit, description,
                    is_index, fk_table, fk_column
             FROM _targetdb_columns ORDER BY rowid",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, bool>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, Option<String>>(7)?,
            ))
        })?;

        let mut tables: Vec<TableDescriptor> = Vec::new();
        for row in rows {
            let (table_name, column_name, type_name, unit, description, is_index, fk_table, fk_column) =
                row?;
            let sql_type = SqlType::parse(&type_name).ok_or_else(|| StoreError::Corrupt {
                message: format!(
                    "column {}.{} has unknown type '{}'",
                    table_name, column_name, type_name
                ),
            })?;

            let table = match tables.iter_mut().find(|t| t.name == table_name) {
                Some(t) => t,
                None => {
                    tables.push(TableDescriptor::new(table_name.clone()));
                    tables.last_mut().unwrap()
                }
            };
            if let (Some(ft), Some(fc)) = (fk_table, fk_column) {
                table.foreign_keys.push(ForeignKey {
                    column: column_name.clone(),
                    references_table: ft,
                    references_column: fc,
                });
            }
            table.columns.push(ColumnDescriptor {
                name: column_name,
                sql_type,
                canonical_unit: unit,
                description,
                is_index,
            });
        }

        for table in tables {
            registry.insert_table(table);
        }
        Ok(registry)
    }

    /// Apply a schema delta and write every transformed row in ONE
    /// transaction. The stored registry version is re-checked inside
    /// the transaction; a mismatch rolls everything back so the caller
    /// can re-validate against the fresh snapshot.
    pub fn commit(&mut self, delta: &SchemaDelta, inserts: &[InsertSet]) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;

        // Rows for a child table may land before the parent rows they
        // reference; check FKs at commit instead of per statement.
        tx.execute_batch("PRAGMA defer_foreign_keys = ON;")?;

        let stored = version_in_tx(&tx)?;
        if stored != delta.base_version {
            return Err(StoreError::Schema(SchemaError::VersionConflict {
                expected: delta.base_version,
                found: stored,
            }));
        }

        for table in &delta.new_tables {
            tx.execute(&generate_create_table(table), [])?;
            for index_sql in generate_indexes(table) {
                tx.execute(&index_sql, [])?;
            }
            for column in &table.columns {
                let fk = table.foreign_keys.iter().find(|f| f.column == column.name);
                record_column(&tx, &table.name, column, fk)?;
            }
        }

        for added in &delta.new_columns {
            tx.execute(
                &generate_add_column(&added.table, &added.column, added.foreign_key.as_ref()),
                [],
            )?;
            if added.column.is_index {
                tx.execute(&generate_index(&added.table, &added.column.name), [])?;
            }
            record_column(&tx, &added.table, &added.column, added.foreign_key.as_ref())?;
        }

        if !delta.is_empty() {
            tx.execute(
                "UPDATE _targetdb_meta SET value = ? WHERE key = 'schema_version'",
                [(delta.base_version + 1).to_string()],
            )?;
        }

        for set in inserts {
            insert_rows(&tx, set)?;
        }

        tx.commit()?;
        Ok(())
    }

    pub fn count_rows(&self, table: &str) -> Result<i64, StoreError> {
        let sql = format!("SELECT COUNT(*) FROM {}", table);
        Ok(self.conn.query_row(&sql, [], |row| row.get(0))?)
    }

    fn stored_version(&self) -> Result<u64, StoreError> {
        let value: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM _targetdb_meta WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        parse_version(value)
    }
}

fn version_in_tx(tx: &Transaction) -> Result<u64, StoreError> {
    let value: Option<String> = tx
        .query_row(
            "SELECT value FROM _targetdb_meta WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    parse_version(value)
}

fn parse_version(value: Option<String>) -> Result<u64, StoreError> {
    let value = value.ok_or_else(|| StoreError::Corrupt {
        message: "schema_version row is missing".to_string(),
    })?;
    value.parse().map_err(|_| StoreError::Corrupt {
        message: format!("schema_version '{}' is not a number", value),
    })
}

fn record_column(
    tx: &Transaction,
    table: &str,
    column: &ColumnDescriptor,
    fk: Option<&ForeignKey>,
) -> Result<(), StoreError> {
    tx.execute(
        "INSERT INTO _targetdb_columns
             (table_name, column_name, sql_type, canonical_unit, description,
              is_index, fk_table, fk_column)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            table,
            column.name,
            column.sql_type.to_string(),
            column.canonical_unit,
            column.description,
            column.is_index,
            fk.map(|f| f.references_table.as_str()),
            fk.map(|f| f.references_column.as_str()),
        ],
    )?;
    Ok(())
}

/// Insert a batch of rows into the database
fn insert_rows(tx: &Transaction, set: &InsertSet) -> Result<(), StoreError> {
    if set.rows.is_empty() || set.columns.is_empty() {
        return Ok(());
    }

    let placeholders: Vec<&str> = set.columns.iter().map(|_| "?").collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        set.table,
        set.columns.join(", "),
        placeholders.join(", ")
    );

    let mut stmt = tx.prepare_cached(&sql)?;
    for row in &set.rows {
        for (idx, value) in row.iter().enumerate() {
            value.bind_to(idx + 1, &mut stmt)?;
        }
        stmt.raw_execute()?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{ColumnMapping, NewColumn};

    fn new_col(target: &str, table: &str, sql_type: SqlType, is_index: bool) -> ColumnMapping {
        ColumnMapping::New(NewColumn {
            source_name: target.into(),
            target_name: target.into(),
            table: table.into(),
            unit: None,
            unit_spec: None,
            description: format!("{} column", target),
            sql_type,
            is_index,
            foreign_key: None,
        })
    }

    #[test]
    fn test_registry_round_trip() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let registry = store.load_registry().unwrap();
        assert_eq!(registry.version(), 0);

        let delta = registry
            .resolve_or_extend(&[
                new_col("moon_id", "Moons", SqlType::Integer, true),
                new_col("radius", "Moons", SqlType::Real, false),
            ])
            .unwrap();
        store.commit(&delta, &[]).unwrap();

        let reloaded = store.load_registry().unwrap();
        assert_eq!(reloaded.version(), 1);
        let moons = reloaded.table("Moons").unwrap();
        assert_eq!(moons.columns.len(), 2);
        assert!(reloaded.has_indexed_column("Moons", "moon_id"));
    }

    #[test]
    fn test_commit_rejects_stale_delta() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let registry = store.load_registry().unwrap();

        let stale = registry
            .resolve_or_extend(&[new_col("a", "First", SqlType::Integer, false)])
            .unwrap();
        let other = registry
            .resolve_or_extend(&[new_col("b", "Second", SqlType::Integer, false)])
            .unwrap();

        store.commit(&other, &[]).unwrap();
        let err = store.commit(&stale, &[]).unwrap_err();
        assert!(matches!(
            err,
            StoreError::Schema(SchemaError::VersionConflict { .. })
        ));

        // The losing submission left nothing behind.
        let reloaded = store.load_registry().unwrap();
        assert!(reloaded.table("First").is_none());
        assert_eq!(reloaded.version(), 1);
    }

    #[test]
    fn test_rows_and_schema_commit_together() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let registry = store.load_registry().unwrap();
        let delta = registry
            .resolve_or_extend(&[new_col("mass", "Planets", SqlType::Real, false)])
            .unwrap();

        let inserts = vec![InsertSet {
            table: "Planets".into(),
            columns: vec!["mass".into()],
            rows: vec![vec![Value::Real(2000.0)], vec![Value::Null]],
        }];
        store.commit(&delta, &inserts).unwrap();
        assert_eq!(store.count_rows("Planets").unwrap(), 2);
    }

    #[test]
    fn test_data_only_commit_keeps_version() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let registry = store.load_registry().unwrap();
        let delta = registry
            .resolve_or_extend(&[new_col("mass", "Planets", SqlType::Real, false)])
            .unwrap();
        store.commit(&delta, &[]).unwrap();

        let registry = store.load_registry().unwrap();
        let empty = registry.resolve_or_extend(&[]).unwrap();
        store
            .commit(
                &empty,
                &[InsertSet {
                    table: "Planets".into(),
                    columns: vec!["mass".into()],
                    rows: vec![vec![Value::Real(1.0)]],
                }],
            )
            .unwrap();
        assert_eq!(store.load_registry().unwrap().version(), 1);
    }
}
