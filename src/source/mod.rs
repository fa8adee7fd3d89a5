pub mod schema;

use std::path::Path;

use duckdb::Connection;
use thiserror::Error;
use tracing::debug;

use crate::value::Value;
use schema::{ColumnSchema, ColumnType, TableSchema};

/// Every loaded table is bound to this name; generated statements must
/// reference it and nothing else.
pub const TABLE_NAME: &str = "data";

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source unavailable: {0}")]
    Unavailable(String),
    #[error("source contains no rows")]
    Empty,
}

/// A tabular dataset loaded into an in-memory DuckDB table for the duration
/// of one request. Holds no write-back path; dropping it discards the table.
#[derive(Debug)]
pub struct TableSource {
    conn: Connection,
    schema: TableSchema,
    locator: String,
}

impl TableSource {
    /// Loads the CSV at `locator` into an in-memory table named `data` and
    /// introspects its schema.
    pub fn load(locator: &str) -> Result<Self, SourceError> {
        if !Path::new(locator).exists() {
            return Err(SourceError::Unavailable(format!(
                "no such file: {}",
                locator
            )));
        }

        let conn = Connection::open_in_memory()
            .map_err(|e| SourceError::Unavailable(e.to_string()))?;

        // read_csv_auto does type inference across the whole file
        let escaped = locator.replace('\'', "''");
        conn.execute(
            &format!(
                "CREATE TABLE {} AS SELECT * FROM read_csv_auto('{}')",
                TABLE_NAME, escaped
            ),
            [],
        )
        .map_err(|e| SourceError::Unavailable(e.to_string()))?;

        let row_count: i64 = conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", TABLE_NAME), [], |row| {
                row.get(0)
            })
            .map_err(|e| SourceError::Unavailable(e.to_string()))?;

        if row_count == 0 {
            return Err(SourceError::Empty);
        }

        let columns = introspect_columns(&conn)?;
        debug!(
            locator,
            rows = row_count,
            columns = columns.len(),
            "loaded table source"
        );

        Ok(Self {
            conn,
            schema: TableSchema {
                columns,
                row_count: row_count as u64,
            },
            locator: locator.to_string(),
        })
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn row_count(&self) -> u64 {
        self.schema.row_count
    }

    pub fn locator(&self) -> &str {
        &self.locator
    }

    /// First `n` rows in on-disk order, as portable values. Used only for
    /// prompting.
    pub fn sample(&self, n: usize) -> Result<Vec<Vec<Value>>, SourceError> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT * FROM {} LIMIT {}", TABLE_NAME, n))
            .map_err(|e| SourceError::Unavailable(e.to_string()))?;

        let width = self.schema.columns.len();
        let mut rows = stmt
            .query([])
            .map_err(|e| SourceError::Unavailable(e.to_string()))?;

        let mut sample = Vec::new();
        while let Some(row) = rows
            .next()
            .map_err(|e| SourceError::Unavailable(e.to_string()))?
        {
            let cells = (0..width)
                .map(|i| Value::from_duckdb_cell(row, i))
                .collect();
            sample.push(cells);
        }
        Ok(sample)
    }

    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }
}

fn introspect_columns(conn: &Connection) -> Result<Vec<ColumnSchema>, SourceError> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info(\"{}\")", TABLE_NAME))
        .map_err(|e| SourceError::Unavailable(e.to_string()))?;

    let column_iter = stmt
        .query_map([], |row| {
            let name: String = row.get(1)?;
            let declared: String = row.get(2)?;
            Ok(ColumnSchema {
                name,
                column_type: ColumnType::from_declared(&declared),
            })
        })
        .map_err(|e| SourceError::Unavailable(e.to_string()))?;

    let columns: Result<Vec<ColumnSchema>, _> = column_iter.collect();
    columns.map_err(|e| SourceError::Unavailable(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".csv")
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn loads_schema_and_row_count() {
        let csv = write_csv("region,sales,active\neast,10.5,true\nwest,20.0,false\n");
        let source = TableSource::load(csv.path().to_str().unwrap()).unwrap();

        assert_eq!(source.row_count(), 2);
        let schema = source.schema();
        assert_eq!(schema.column_names(), vec!["region", "sales", "active"]);
        assert_eq!(schema.columns[0].column_type, ColumnType::String);
        assert_eq!(schema.columns[1].column_type, ColumnType::Float);
        assert_eq!(schema.columns[2].column_type, ColumnType::Boolean);
    }

    #[test]
    fn sample_is_bounded_and_deterministic() {
        let csv = write_csv("x\n1\n2\n3\n4\n5\n");
        let source = TableSource::load(csv.path().to_str().unwrap()).unwrap();

        let sample = source.sample(3).unwrap();
        assert_eq!(sample.len(), 3);
        assert_eq!(sample[0], vec![Value::Int(1)]);
        assert_eq!(sample[2], vec![Value::Int(3)]);

        let oversized = source.sample(50).unwrap();
        assert_eq!(oversized.len(), 5);
    }

    #[test]
    fn missing_file_is_unavailable() {
        let err = TableSource::load("/nonexistent/file.csv").unwrap_err();
        assert!(matches!(err, SourceError::Unavailable(_)));
    }

    #[test]
    fn header_only_file_is_empty() {
        let csv = write_csv("region,sales\n");
        let err = TableSource::load(csv.path().to_str().unwrap()).unwrap_err();
        assert!(matches!(err, SourceError::Empty));
    }
}
