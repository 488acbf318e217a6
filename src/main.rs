use anyhow::{bail, Context, Result};
use std::time::Instant;
use targetdb_ingest::{
    cli::{Cli, Commands},
    ingest,
    mapping::{parse_template, template_rows_from_path, validate},
    schema::SchemaRegistry,
    table::DataTable,
    writer::SqliteStore,
};

fn main() -> Result<()> {
    let cli = Cli::parse_args();

    match cli.command {
        Commands::Ingest {
            template,
            data,
            db,
            report_json,
            dry_run,
        } => {
            let start = Instant::now();

            let template_rows = template_rows_from_path(&template)
                .with_context(|| format!("Failed to read template: {:?}", template))?;
            let table = DataTable::from_csv_path(&data)
                .with_context(|| format!("Failed to read data table: {:?}", data))?;
            let mut store = SqliteStore::open(&db)
                .with_context(|| format!("Failed to open database: {:?}", db))?;

            let result = if dry_run {
                ingest::check(&store, &template_rows, &table)
            } else {
                ingest::ingest(&mut store, &template_rows, &table)
            };
            let report = match result {
                Ok(report) => report,
                Err(e) => {
                    println!("Submission {}; the database is unchanged", e.terminal_state());
                    return Err(e.into());
                }
            };

            for warning in &report.warnings {
                println!("warning: {}", warning);
            }
            if !report.tables_created.is_empty() {
                println!("Created tables: {}", report.tables_created.join(", "));
            }
            if !report.columns_created.is_empty() {
                println!("Added columns: {}", report.columns_created.join(", "));
            }

            if let Some(path) = report_json {
                let json = serde_json::to_string_pretty(&report)?;
                std::fs::write(&path, json)
                    .with_context(|| format!("Failed to write report: {:?}", path))?;
            }

            let elapsed = start.elapsed();
            let verb = if dry_run { "Would ingest" } else { "Ingested" };
            println!(
                "\n{} {} rows into {:?} in {:.1}s",
                verb,
                report.rows_ingested,
                db,
                elapsed.as_secs_f64()
            );
        }

        Commands::Validate { template, db } => {
            let template_rows = template_rows_from_path(&template)
                .with_context(|| format!("Failed to read template: {:?}", template))?;

            let registry = match db {
                Some(path) => SqliteStore::open(&path)
                    .with_context(|| format!("Failed to open database: {:?}", path))?
                    .load_registry()?,
                None => {
                    println!("No database given; resolving against an empty registry");
                    SchemaRegistry::new()
                }
            };

            let errors = match parse_template(&template_rows) {
                Ok(rows) => match validate(&rows, &registry) {
                    Ok(mappings) => {
                        let new = mappings.iter().filter(|m| m.is_new()).count();
                        println!(
                            "Template OK: {} column mappings ({} new)",
                            mappings.len(),
                            new
                        );
                        return Ok(());
                    }
                    Err(errors) => errors,
                },
                Err(errors) => errors,
            };

            for e in &errors {
                println!("  - {}", e);
            }
            bail!("template rejected with {} error(s)", errors.len());
        }

        Commands::ListTables { db } => {
            let store = SqliteStore::open(&db)
                .with_context(|| format!("Failed to open database: {:?}", db))?;
            let registry = store.load_registry()?;

            println!("Tables:\n");
            for name in registry.table_names() {
                let table = registry.table(name).expect("listed name");
                println!("  {} ({} columns)", name, table.columns.len());
            }
        }

        Commands::Describe { db, table } => {
            let store = SqliteStore::open(&db)
                .with_context(|| format!("Failed to open database: {:?}", db))?;
            let registry = store.load_registry()?;

            let descriptor = match registry.table(&table) {
                Some(t) => t,
                None => bail!("Unknown table: {}", table),
            };

            println!("{}", descriptor.name);
            for col in &descriptor.columns {
                let mut line = format!("  {} {}", col.name, col.sql_type);
                if let Some(unit) = &col.canonical_unit {
                    line.push_str(&format!(" [{}]", unit));
                }
                if col.is_index {
                    line.push_str(" (indexed)");
                }
                if let Some(desc) = &col.description {
                    line.push_str(&format!(" -- {}", desc));
                }
                println!("{}", line);
            }
            let mut indexes: Vec<&str> = descriptor.indexes().into_iter().collect();
            indexes.sort_unstable();
            if !indexes.is_empty() {
                println!("  UNIQUE INDEX on {}", indexes.join(", "));
            }
            for fk in &descriptor.foreign_keys {
                println!(
                    "  FOREIGN KEY ({}) REFERENCES {}({})",
                    fk.column, fk.references_table, fk.references_column
                );
            }
        }
    }

    Ok(())
}
