//! SQL execution seam over `may_postgres`.
//!
//! Every statement the PostgreSQL store issues goes through [`DbExecutor`], which
//! [`Transaction`](crate::transaction::Transaction) implements. Statements are
//! timed and counted in one place, [`instrumented`].

use may_postgres::types::ToSql;
use may_postgres::{Error as PostgresError, Row};
use std::fmt;
use std::time::Instant;

#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;
#[cfg(feature = "metrics")]
use crate::metrics::METRICS;

#[derive(Debug)]
pub enum DbError {
    /// Raised by the driver or the server.
    PostgresError(PostgresError),
    /// A statement returned something other than the expected shape.
    QueryError(String),
    /// A column could not be read into its Rust type.
    ParseError(String),
    PoolError(String),
    Other(String),
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbError::PostgresError(e) => write!(f, "postgres: {e}"),
            DbError::QueryError(s) => write!(f, "unexpected query result: {s}"),
            DbError::ParseError(s) => write!(f, "cannot decode row: {s}"),
            DbError::PoolError(s) => write!(f, "connection pool: {s}"),
            DbError::Other(s) => f.write_str(s),
        }
    }
}

impl std::error::Error for DbError {}

impl From<PostgresError> for DbError {
    fn from(err: PostgresError) -> Self {
        DbError::PostgresError(err)
    }
}

/// Something SQL can be run against.
///
/// ```no_run
/// use mealguard::{DatabaseConfig, DbError, DbExecutor, DbPool, IsolationLevel};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = DbPool::new(&DatabaseConfig::default())?;
/// let conn = pool.acquire()?;
/// let tx = conn.begin(IsolationLevel::ReadCommitted)?;
/// let row = tx.query_one("SELECT COUNT(*) AS total FROM users", &[])?;
/// let users: i64 = row.get("total");
/// tx.commit()?;
/// # Ok(())
/// # }
/// ```
pub trait DbExecutor {
    /// Rows affected.
    fn execute(&self, query: &str, params: &[&dyn ToSql]) -> Result<u64, DbError>;

    fn query_one(&self, query: &str, params: &[&dyn ToSql]) -> Result<Row, DbError>;

    fn query_all(&self, query: &str, params: &[&dyn ToSql]) -> Result<Vec<Row>, DbError>;

    /// # Errors
    ///
    /// `DbError::QueryError` if more than one row comes back.
    fn query_opt(&self, query: &str, params: &[&dyn ToSql]) -> Result<Option<Row>, DbError> {
        let mut rows = self.query_all(query, params)?;
        if rows.len() > 1 {
            return Err(DbError::QueryError(format!(
                "expected at most one row, got {}",
                rows.len()
            )));
        }
        Ok(rows.pop())
    }
}

/// Run one driver call under a query span, recording its duration and failure.
pub(crate) fn instrumented<T>(
    query: &str,
    run: impl FnOnce() -> Result<T, PostgresError>,
) -> Result<T, DbError> {
    #[cfg(feature = "tracing")]
    let _span = tracing_helpers::execute_query_span(query).entered();
    #[cfg(not(feature = "tracing"))]
    let _ = query;

    let start = Instant::now();
    let result = run();
    #[cfg(feature = "metrics")]
    {
        METRICS.record_query_duration(start.elapsed());
        if result.is_err() {
            METRICS.record_query_error();
        }
    }
    #[cfg(not(feature = "metrics"))]
    let _ = start;

    result.map_err(DbError::PostgresError)
}
