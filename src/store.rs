use chrono::{DateTime, Utc};
use duckdb::{params, Connection};
use r2d2::{ManageConnection, Pool};
use thiserror::Error;
use tracing::debug;

use crate::record::{QueryRecord, QueryStatus};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store error: {0}")]
    Database(String),
    #[error("record {0} not found")]
    NotFound(i64),
    #[error("record {id}: illegal transition {from} -> {to}")]
    IllegalTransition {
        id: i64,
        from: QueryStatus,
        to: QueryStatus,
    },
}

impl From<duckdb::Error> for StoreError {
    fn from(err: duckdb::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

impl From<r2d2::Error> for StoreError {
    fn from(err: r2d2::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

pub struct DuckDbConnectionManager {
    connection_string: String,
}

impl DuckDbConnectionManager {
    pub fn new(connection_string: String) -> Self {
        Self { connection_string }
    }
}

impl ManageConnection for DuckDbConnectionManager {
    type Connection = Connection;
    type Error = duckdb::Error;

    fn connect(&self) -> Result<Self::Connection, Self::Error> {
        Connection::open(&self.connection_string)
    }

    fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        conn.execute("SELECT 1", [])?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

const RECORD_COLUMNS: &str = "id, user_id, source, question, statement, explanation, status, \
                              error_message, row_count, execution_time_ms, created_at";

/// Persisted history of natural-language queries, backed by a DuckDB file.
///
/// The store owns the lifecycle rules: every status change goes through a
/// transition check against the current row, so a terminal record can never
/// be resurrected.
#[derive(Clone)]
pub struct RecordStore {
    pool: Pool<DuckDbConnectionManager>,
}

impl RecordStore {
    pub fn new(pool: Pool<DuckDbConnectionManager>) -> Self {
        Self { pool }
    }

    /// Creates the backing table and id sequence if missing.
    pub fn init(&self) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        conn.execute_batch(
            "CREATE SEQUENCE IF NOT EXISTS query_records_seq;
             CREATE TABLE IF NOT EXISTS query_records (
                 id BIGINT PRIMARY KEY DEFAULT nextval('query_records_seq'),
                 user_id VARCHAR NOT NULL,
                 source VARCHAR NOT NULL,
                 question VARCHAR NOT NULL,
                 statement VARCHAR,
                 explanation VARCHAR,
                 status VARCHAR NOT NULL,
                 error_message VARCHAR,
                 row_count BIGINT,
                 execution_time_ms DOUBLE,
                 created_at VARCHAR NOT NULL
             );",
        )?;
        Ok(())
    }

    /// Inserts a new record in `pending`.
    pub fn create(
        &self,
        user: &str,
        source: &str,
        question: &str,
        statement: Option<&str>,
        explanation: Option<&str>,
    ) -> Result<QueryRecord, StoreError> {
        let conn = self.pool.get()?;
        let created_at = Utc::now();
        let id: i64 = conn.query_row(
            "INSERT INTO query_records \
             (user_id, source, question, statement, explanation, status, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?) RETURNING id",
            params![
                user,
                source,
                question,
                statement,
                explanation,
                QueryStatus::Pending.as_str(),
                created_at.to_rfc3339(),
            ],
            |row| row.get(0),
        )?;
        debug!(id, user, "created query record");

        Ok(QueryRecord {
            id,
            user: user.to_string(),
            source: source.to_string(),
            question: question.to_string(),
            statement: statement.map(str::to_string),
            explanation: explanation.map(str::to_string),
            status: QueryStatus::Pending,
            error_message: None,
            row_count: None,
            execution_time_ms: None,
            created_at,
        })
    }

    /// Fetches one record, scoped to its owner.
    pub fn get(&self, id: i64, user: &str) -> Result<Option<QueryRecord>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM query_records WHERE id = ? AND user_id = ?",
            RECORD_COLUMNS
        ))?;
        let mut rows = stmt.query_map(params![id, user], row_to_record)?;
        match rows.next() {
            Some(record) => Ok(Some(record?)),
            None => Ok(None),
        }
    }

    pub fn mark_running(&self, id: i64) -> Result<(), StoreError> {
        self.transition(id, QueryStatus::Running, |conn, from| {
            conn.execute(
                "UPDATE query_records SET status = ? WHERE id = ? AND status = ?",
                params![QueryStatus::Running.as_str(), id, from.as_str()],
            )
        })
    }

    /// Terminal success: row count and elapsed time are recorded together.
    pub fn mark_success(
        &self,
        id: i64,
        row_count: i64,
        execution_time_ms: f64,
    ) -> Result<(), StoreError> {
        self.transition(id, QueryStatus::Success, |conn, from| {
            conn.execute(
                "UPDATE query_records SET status = ?, row_count = ?, execution_time_ms = ? \
                 WHERE id = ? AND status = ?",
                params![
                    QueryStatus::Success.as_str(),
                    row_count,
                    execution_time_ms,
                    id,
                    from.as_str()
                ],
            )
        })
    }

    /// Terminal failure: the cause is stored, row count and time stay null.
    pub fn mark_error(&self, id: i64, message: &str) -> Result<(), StoreError> {
        self.transition(id, QueryStatus::Error, |conn, from| {
            conn.execute(
                "UPDATE query_records SET status = ?, error_message = ? \
                 WHERE id = ? AND status = ?",
                params![QueryStatus::Error.as_str(), message, id, from.as_str()],
            )
        })
    }

    /// Runs a status change through the lifecycle rules. The update statement
    /// itself is guarded on the status that was read, so a writer working
    /// from a stale read affects zero rows and fails instead of overwriting.
    fn transition<F>(&self, id: i64, to: QueryStatus, update: F) -> Result<(), StoreError>
    where
        F: FnOnce(&Connection, QueryStatus) -> Result<usize, duckdb::Error>,
    {
        let conn = self.pool.get()?;
        let current: Option<String> = conn
            .query_row(
                "SELECT status FROM query_records WHERE id = ?",
                params![id],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|err| match err {
                duckdb::Error::QueryReturnedNoRows => Ok(None),
                other => Err(StoreError::from(other)),
            })?;

        let current = current.ok_or(StoreError::NotFound(id))?;
        let from = QueryStatus::parse(&current)
            .ok_or_else(|| StoreError::Database(format!("corrupt status value: {}", current)))?;

        if !from.can_transition_to(to) {
            return Err(StoreError::IllegalTransition { id, from, to });
        }

        let affected = update(&conn, from)?;
        if affected == 0 {
            return Err(StoreError::IllegalTransition { id, from, to });
        }
        debug!(id, from = %from, to = %to, "query record transition");
        Ok(())
    }

    /// Lists a user's records, newest first, with an optional source filter.
    pub fn list(
        &self,
        user: &str,
        source: Option<&str>,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<QueryRecord>, StoreError> {
        let conn = self.pool.get()?;
        let mut records = Vec::new();
        match source {
            Some(source) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM query_records WHERE user_id = ? AND source = ? \
                     ORDER BY created_at DESC, id DESC LIMIT {} OFFSET {}",
                    RECORD_COLUMNS, limit, skip
                ))?;
                let rows = stmt.query_map(params![user, source], row_to_record)?;
                for row in rows {
                    records.push(row?);
                }
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM query_records WHERE user_id = ? \
                     ORDER BY created_at DESC, id DESC LIMIT {} OFFSET {}",
                    RECORD_COLUMNS, limit, skip
                ))?;
                let rows = stmt.query_map(params![user], row_to_record)?;
                for row in rows {
                    records.push(row?);
                }
            }
        }
        Ok(records)
    }

    pub fn count(&self, user: &str, source: Option<&str>) -> Result<i64, StoreError> {
        let conn = self.pool.get()?;
        let count = match source {
            Some(source) => conn.query_row(
                "SELECT COUNT(*) FROM query_records WHERE user_id = ? AND source = ?",
                params![user, source],
                |row| row.get(0),
            )?,
            None => conn.query_row(
                "SELECT COUNT(*) FROM query_records WHERE user_id = ?",
                params![user],
                |row| row.get(0),
            )?,
        };
        Ok(count)
    }

    pub fn count_all(&self) -> Result<i64, StoreError> {
        let conn = self.pool.get()?;
        let count = conn.query_row("SELECT COUNT(*) FROM query_records", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Deletes one record, scoped to its owner. Returns false when nothing
    /// matched. Deletion is the only way out of a terminal state.
    pub fn delete(&self, id: i64, user: &str) -> Result<bool, StoreError> {
        let conn = self.pool.get()?;
        let affected = conn.execute(
            "DELETE FROM query_records WHERE id = ? AND user_id = ?",
            params![id, user],
        )?;
        Ok(affected > 0)
    }
}

fn row_to_record(row: &duckdb::Row<'_>) -> Result<QueryRecord, duckdb::Error> {
    let status_raw: String = row.get(6)?;
    let status = QueryStatus::parse(&status_raw).ok_or_else(|| {
        duckdb::Error::InvalidColumnType(6, "status".to_string(), duckdb::types::Type::Text)
    })?;
    let created_raw: String = row.get(10)?;
    let created_at = DateTime::parse_from_rfc3339(&created_raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default();

    Ok(QueryRecord {
        id: row.get(0)?,
        user: row.get(1)?,
        source: row.get(2)?,
        question: row.get(3)?,
        statement: row.get(4)?,
        explanation: row.get(5)?,
        status,
        error_message: row.get(7)?,
        row_count: row.get(8)?,
        execution_time_ms: row.get(9)?,
        created_at,
    })
}
