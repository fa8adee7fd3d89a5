use std::time::Instant;

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::source::TableSource;
use crate::validate::ValidatedStatement;
use crate::value::{normalize_rows, Value};

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("execution failed: {0}")]
    Engine(String),
    #[error("execution timed out after {0} ms")]
    Timeout(u64),
}

/// One execution's output. Transient: recomputed on every run or replay,
/// never persisted.
///
/// Rows are ordered cell lists keyed by the column sequence, already in the
/// portable value model.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub row_count: usize,
    pub execution_time_ms: f64,
}

/// Runs a validated statement against the loaded table and measures wall-clock
/// time around execution only.
///
/// Engine errors (wrong reference, type mismatch in a comparison, anything
/// else DuckDB raises at runtime) surface with the underlying message; they
/// are never swallowed here.
pub fn execute(
    source: &TableSource,
    statement: &ValidatedStatement,
) -> Result<ExecutionResult, ExecError> {
    let conn = source.connection();

    let started = Instant::now();

    let mut stmt = conn
        .prepare(statement.as_str())
        .map_err(|e| ExecError::Engine(e.to_string()))?;

    let mut rows = stmt
        .query([])
        .map_err(|e| ExecError::Engine(e.to_string()))?;

    let mut collected: Vec<Vec<Value>> = Vec::new();
    let mut columns: Vec<String> = Vec::new();
    while let Some(row) = rows.next().map_err(|e| ExecError::Engine(e.to_string()))? {
        if columns.is_empty() {
            columns = row.as_ref().column_names();
        }
        let width = row.as_ref().column_count();
        let cells = (0..width).map(|i| Value::from_duckdb_cell(row, i)).collect();
        collected.push(cells);
    }

    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

    if columns.is_empty() {
        // Zero result rows: the statement metadata still names the columns.
        drop(rows);
        columns = stmt.column_names();
    }

    let rows = normalize_rows(collected);
    let row_count = rows.len();
    debug!(row_count, elapsed_ms, "executed statement");

    Ok(ExecutionResult {
        columns,
        rows,
        row_count,
        execution_time_ms: elapsed_ms,
    })
}
