//! The ingestion engine: orchestrates validation, schema resolution,
//! per-row unit conversion and type coercion, and the single-transaction
//! commit.
//!
//! A submission moves through a fixed set of states; nothing it implies
//! is observable in the store unless it reaches COMMITTED.

use serde::Serialize;
use thiserror::Error;

use crate::mapping::{parse_template, validate, ColumnMapping, MappingErrors};
use crate::mapping::validate::parse_truthy;
use crate::schema::{SchemaDelta, SchemaError, SchemaRegistry, SqlType};
use crate::table::{DataTable, TableError, Value};
use crate::units::{parse_unit, UnitError};
use crate::writer::{InsertSet, SqliteStore, StoreError};

/// Commit retries after losing an optimistic-concurrency race.
const MAX_COMMIT_RETRIES: usize = 3;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Mapping(#[from] MappingErrors),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("column '{column}': {source}")]
    Unit { column: String, source: UnitError },

    #[error("mapped column '{column}' is missing from the data table")]
    MissingDataColumn { column: String },

    #[error("data row {row}, column '{column}': cannot coerce '{value}' to {target}")]
    Coercion {
        row: usize,
        column: String,
        value: String,
        target: SqlType,
    },

    #[error("data row {row}: null value in indexed column '{column}'")]
    NullKey { row: usize, column: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Table(#[from] TableError),

    #[error("registry version changed {retries} times in a row; giving up")]
    RetriesExhausted { retries: usize },
}

/// Lifecycle of one submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmissionState {
    Received,
    Validating,
    Rejected,
    SchemaResolved,
    Committing,
    Committed,
    RolledBack,
}

impl std::fmt::Display for SubmissionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SubmissionState::Received => "RECEIVED",
            SubmissionState::Validating => "VALIDATING",
            SubmissionState::Rejected => "REJECTED",
            SubmissionState::SchemaResolved => "SCHEMA_RESOLVED",
            SubmissionState::Committing => "COMMITTING",
            SubmissionState::Committed => "COMMITTED",
            SubmissionState::RolledBack => "ROLLED_BACK",
        };
        write!(f, "{}", name)
    }
}

impl IngestError {
    /// Terminal state of a failed submission: anything caught before
    /// the commit rejects it outright; a commit that failed partway
    /// was rolled back by the store.
    pub fn terminal_state(&self) -> SubmissionState {
        match self {
            IngestError::Store(_) | IngestError::RetriesExhausted { .. } => {
                SubmissionState::RolledBack
            }
            _ => SubmissionState::Rejected,
        }
    }
}

/// One validated (mapping, data) pair, consumed by a single commit.
pub struct IngestionBatch<'a> {
    pub mappings: Vec<ColumnMapping>,
    pub data: &'a DataTable,
}

/// What one submission did, for the contributor's records.
#[derive(Debug, Clone, Serialize)]
pub struct IngestionReport {
    pub state: SubmissionState,
    pub rows_ingested: u64,
    pub tables_created: Vec<String>,
    /// Columns appended to tables that already existed, as `Table.column`.
    pub columns_created: Vec<String>,
    pub warnings: Vec<String>,
}

/// Run a full submission: validate, resolve the schema delta, transform
/// every row, and commit all of it in one transaction. Retries the
/// whole pipeline when another submission bumps the registry version
/// between snapshot and commit.
pub fn ingest(
    store: &mut SqliteStore,
    template: &[Vec<String>],
    data: &DataTable,
) -> Result<IngestionReport, IngestError> {
    let rows = parse_template(template).map_err(MappingErrors::from)?;

    let mut attempts = 0;
    loop {
        let registry = store.load_registry()?;
        let mappings = validate(&rows, &registry).map_err(MappingErrors::from)?;
        let batch = IngestionBatch { mappings, data };
        let (delta, inserts, mut report) = prepare(&registry, &batch)?;

        report.state = SubmissionState::Committing;
        match store.commit(&delta, &inserts) {
            Ok(()) => {
                report.state = SubmissionState::Committed;
                return Ok(report);
            }
            Err(StoreError::Schema(SchemaError::VersionConflict { .. })) => {
                attempts += 1;
                if attempts >= MAX_COMMIT_RETRIES {
                    return Err(IngestError::RetriesExhausted { retries: attempts });
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Dry run: everything [`ingest`] does short of the commit. The store
/// is never written; the report comes back in SCHEMA_RESOLVED state.
pub fn check(
    store: &SqliteStore,
    template: &[Vec<String>],
    data: &DataTable,
) -> Result<IngestionReport, IngestError> {
    let rows = parse_template(template).map_err(MappingErrors::from)?;
    let registry = store.load_registry()?;
    let mappings = validate(&rows, &registry).map_err(MappingErrors::from)?;
    let batch = IngestionBatch { mappings, data };
    let (_, _, report) = prepare(&registry, &batch)?;
    Ok(report)
}

/// How one mapped column transforms a data cell.
struct ColumnPlan<'a> {
    mapping: &'a ColumnMapping,
    /// Index into the data table; None only for a rowless submission.
    data_index: Option<usize>,
    /// Multiplier from declared unit to the column's canonical unit.
    factor: Option<f64>,
    sql_type: SqlType,
    is_index: bool,
}

fn prepare(
    registry: &SchemaRegistry,
    batch: &IngestionBatch,
) -> Result<(SchemaDelta, Vec<InsertSet>, IngestionReport), IngestError> {
    let delta = registry.resolve_or_extend(&batch.mappings)?;

    let mut warnings = Vec::new();
    let plans = plan_columns(registry, batch, &mut warnings)?;

    // Data columns the template never mentions are skipped, loudly.
    for name in batch.data.columns() {
        if !batch.mappings.iter().any(|m| m.source_name() == name) {
            warnings.push(format!("data column '{}' has no mapping; ignored", name));
        }
    }

    let inserts = transform_rows(batch.data, &plans, &mut warnings)?;
    let rows_ingested = inserts.iter().map(|s| s.rows.len() as u64).sum();

    let report = IngestionReport {
        state: SubmissionState::SchemaResolved,
        rows_ingested,
        tables_created: delta.new_tables.iter().map(|t| t.name.clone()).collect(),
        columns_created: delta
            .new_columns
            .iter()
            .map(|c| format!("{}.{}", c.table, c.column.name))
            .collect(),
        warnings,
    };
    Ok((delta, inserts, report))
}

fn plan_columns<'a>(
    registry: &SchemaRegistry,
    batch: &'a IngestionBatch,
    warnings: &mut Vec<String>,
) -> Result<Vec<ColumnPlan<'a>>, IngestError> {
    let mut plans = Vec::with_capacity(batch.mappings.len());

    for mapping in &batch.mappings {
        let data_index = batch.data.column_index(mapping.source_name());
        if data_index.is_none() && !batch.data.is_empty() {
            return Err(IngestError::MissingDataColumn {
                column: mapping.source_name().to_string(),
            });
        }

        let (sql_type, is_index, canonical_spec) = match mapping {
            ColumnMapping::New(n) => (n.sql_type, n.is_index, n.unit_spec.clone()),
            ColumnMapping::Existing(m) => {
                // Both checked during schema resolution.
                let column = registry
                    .table(&m.table)
                    .and_then(|t| t.column(&m.target_name))
                    .expect("existing mapping resolved against this snapshot");
                (column.sql_type, column.is_index, column.canonical_unit.clone())
            }
        };

        // A declared unit converts into the canonical unit; for a new
        // column the declared unit IS canonical, so no factor applies.
        let factor = match mapping {
            ColumnMapping::New(_) => None,
            ColumnMapping::Existing(_) => match (mapping.unit(), canonical_spec.as_deref()) {
                (None, _) => None,
                (Some(_), None) => {
                    warnings.push(format!(
                        "column '{}': declared unit '{}' ignored, target column has no \
                         canonical unit",
                        mapping.source_name(),
                        mapping.unit_spec().unwrap_or_default(),
                    ));
                    None
                }
                (Some(unit), Some(spec)) => {
                    let canonical =
                        parse_unit(spec).map_err(|source| IngestError::Unit {
                            column: mapping.target_name().to_string(),
                            source,
                        })?;
                    let factor =
                        unit.factor_to(&canonical)
                            .map_err(|source| IngestError::Unit {
                                column: mapping.source_name().to_string(),
                                source,
                            })?;
                    Some(factor)
                }
            },
        };

        // Conversion only means something for numeric storage.
        let factor = match (factor, sql_type) {
            (Some(f), SqlType::Integer | SqlType::Real) => Some(f),
            (Some(_), _) => {
                warnings.push(format!(
                    "column '{}': unit conversion ignored for {} column",
                    mapping.source_name(),
                    sql_type
                ));
                None
            }
            (None, _) => None,
        };

        plans.push(ColumnPlan {
            mapping,
            data_index,
            factor,
            sql_type,
            is_index,
        });
    }

    Ok(plans)
}

fn transform_rows(
    data: &DataTable,
    plans: &[ColumnPlan],
    warnings: &mut Vec<String>,
) -> Result<Vec<InsertSet>, IngestError> {
    // One insert set per target table, in template order; remember
    // which set each plan feeds.
    let mut sets: Vec<InsertSet> = Vec::new();
    let mut set_of_plan: Vec<usize> = Vec::with_capacity(plans.len());
    for plan in plans {
        let table = plan.mapping.table();
        let idx = match sets.iter().position(|s| s.table == table) {
            Some(i) => i,
            None => {
                sets.push(InsertSet {
                    table: table.to_string(),
                    columns: Vec::new(),
                    rows: Vec::new(),
                });
                sets.len() - 1
            }
        };
        sets[idx].columns.push(plan.mapping.target_name().to_string());
        set_of_plan.push(idx);
    }

    for (i, row) in data.rows().iter().enumerate() {
        let row_no = i + 1;
        let mut per_table: Vec<Vec<Value>> = vec![Vec::new(); sets.len()];

        for (plan, &set_idx) in plans.iter().zip(&set_of_plan) {
            let value = match plan.data_index.map(|idx| &row[idx]) {
                Some(cell) if !cell.is_null() => coerce(cell, plan, row_no)?,
                _ => {
                    if plan.is_index {
                        return Err(IngestError::NullKey {
                            row: row_no,
                            column: plan.mapping.source_name().to_string(),
                        });
                    }
                    warnings.push(format!(
                        "data row {}: null value in column '{}'",
                        row_no,
                        plan.mapping.source_name()
                    ));
                    Value::Null
                }
            };
            per_table[set_idx].push(value);
        }

        for (set, values) in sets.iter_mut().zip(per_table) {
            set.rows.push(values);
        }
    }

    Ok(sets)
}

/// Convert a cell into the target column's storage type, applying the
/// unit conversion factor first. The first irrecoverable coercion
/// aborts the whole batch.
fn coerce(cell: &Value, plan: &ColumnPlan, row_no: usize) -> Result<Value, IngestError> {
    let err = || IngestError::Coercion {
        row: row_no,
        column: plan.mapping.source_name().to_string(),
        value: render(cell),
        target: plan.sql_type,
    };

    match plan.sql_type {
        SqlType::Real => {
            let x = as_f64(cell).ok_or_else(err)?;
            Ok(Value::Real(x * plan.factor.unwrap_or(1.0)))
        }
        SqlType::Integer => {
            let x = as_f64(cell).ok_or_else(err)? * plan.factor.unwrap_or(1.0);
            // Unit conversion may scale an integer column; the result
            // still has to be integral.
            let rounded = x.round();
            if (x - rounded).abs() > 1e-9 * x.abs().max(1.0) {
                return Err(err());
            }
            Ok(Value::Integer(rounded as i64))
        }
        SqlType::Text => Ok(Value::Text(render(cell))),
        SqlType::Boolean => {
            let b = match cell {
                Value::Integer(0) => false,
                Value::Integer(1) => true,
                Value::Text(s) => parse_truthy(s).ok_or_else(err)?,
                _ => return Err(err()),
            };
            Ok(Value::Integer(b as i64))
        }
    }
}

fn as_f64(cell: &Value) -> Option<f64> {
    match cell {
        Value::Integer(i) => Some(*i as f64),
        Value::Real(f) => Some(*f),
        Value::Text(s) => s.trim().parse().ok(),
        Value::Null => None,
    }
}

fn render(cell: &Value) -> String {
    match cell {
        Value::Null => String::new(),
        Value::Integer(i) => i.to_string(),
        Value::Real(f) => f.to_string(),
        Value::Text(s) => s.clone(),
    }
}
