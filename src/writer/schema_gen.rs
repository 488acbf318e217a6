use crate::schema::{ColumnDescriptor, ForeignKey, TableDescriptor};

/// Generate CREATE TABLE SQL for a table descriptor
pub fn generate_create_table(table: &TableDescriptor) -> String {
    let mut sql = format!("CREATE TABLE {} (\n", table.name);
    let mut columns = Vec::new();

    for col in &table.columns {
        columns.push(format!("    {} {}", col.name, col.sql_type.sql()));
    }

    // Add foreign key constraints
    for fk in &table.foreign_keys {
        columns.push(format!(
            "    FOREIGN KEY ({}) REFERENCES {}({})",
            fk.column, fk.references_table, fk.references_column
        ));
    }

    sql.push_str(&columns.join(",\n"));
    sql.push_str("\n)");

    sql
}

/// Generate ALTER TABLE SQL appending one column to an existing table.
/// The FK, when present, rides along as a column-level REFERENCES
/// clause (the only FK form SQLite allows after table creation).
pub fn generate_add_column(
    table: &str,
    column: &ColumnDescriptor,
    foreign_key: Option<&ForeignKey>,
) -> String {
    let mut sql = format!(
        "ALTER TABLE {} ADD COLUMN {} {}",
        table,
        column.name,
        column.sql_type.sql()
    );
    if let Some(fk) = foreign_key {
        sql.push_str(&format!(
            " REFERENCES {}({})",
            fk.references_table, fk.references_column
        ));
    }
    sql
}

/// Generate CREATE INDEX statements for a table's indexed columns.
/// Indexes are unique: indexed columns are key columns, and SQLite
/// requires FK targets to be uniquely indexed.
pub fn generate_indexes(table: &TableDescriptor) -> Vec<String> {
    table
        .columns
        .iter()
        .filter(|c| c.is_index)
        .map(|c| generate_index(&table.name, &c.name))
        .collect()
}

pub fn generate_index(table: &str, column: &str) -> String {
    format!(
        "CREATE UNIQUE INDEX idx_{}_{} ON {}({})",
        table, column, table, column
    )
}
