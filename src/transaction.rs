//! Transactions over a pooled `may_postgres` client.
//!
//! A [`Transaction`] implements [`DbExecutor`], so every statement of one
//! engine operation runs inside the same `BEGIN … COMMIT` block. A transaction
//! dropped without `commit()` or `rollback()` is rolled back, which is what makes
//! an early `?` return inside an operation leave no partial writes behind.

use crate::executor::{instrumented, DbError, DbExecutor};
use may_postgres::types::ToSql;
use may_postgres::{Client, Error as PostgresError, Row};
use std::fmt;

#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

/// Isolation level named in the opening `BEGIN`.
///
/// The engine relies on row locks, so `ReadCommitted` is enough for it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IsolationLevel {
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub fn as_sql(self) -> &'static str {
        match self {
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

#[derive(Debug)]
pub enum TransactionError {
    /// `BEGIN`, `COMMIT` or `ROLLBACK` failed on the server.
    Postgres(PostgresError),
    /// The transaction was already finished.
    Finished(TxState),
}

impl fmt::Display for TransactionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionError::Postgres(e) => write!(f, "transaction control failed: {e}"),
            TransactionError::Finished(state) => write!(f, "transaction already {state}"),
        }
    }
}

impl std::error::Error for TransactionError {}

impl From<PostgresError> for TransactionError {
    fn from(err: PostgresError) -> Self {
        TransactionError::Postgres(err)
    }
}

impl From<TransactionError> for DbError {
    fn from(err: TransactionError) -> Self {
        match err {
            TransactionError::Postgres(e) => DbError::PostgresError(e),
            finished @ TransactionError::Finished(_) => DbError::Other(finished.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Open,
    Committed,
    RolledBack,
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TxState::Open => "open",
            TxState::Committed => "committed",
            TxState::RolledBack => "rolled back",
        })
    }
}

/// One `BEGIN … COMMIT` block on a client.
///
/// ```no_run
/// use mealguard::{DatabaseConfig, DbExecutor, DbPool, IsolationLevel};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = DbPool::new(&DatabaseConfig::default())?;
/// let conn = pool.acquire()?;
/// let tx = conn.begin(IsolationLevel::ReadCommitted)?;
/// tx.execute("UPDATE users SET active = $1 WHERE cin = $2", &[&false, &"09876543"])?;
/// tx.commit()?;
/// # Ok(())
/// # }
/// ```
pub struct Transaction {
    client: Client,
    state: TxState,
}

impl Transaction {
    pub(crate) fn new_with_isolation(
        client: Client,
        isolation_level: IsolationLevel,
    ) -> Result<Self, TransactionError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::begin_transaction_span().entered();

        client.execute(format!("BEGIN ISOLATION LEVEL {isolation_level}").as_str(), &[])?;
        Ok(Self {
            client,
            state: TxState::Open,
        })
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    /// # Errors
    ///
    /// `Finished` if the transaction is no longer open, `Postgres` if `COMMIT` fails.
    pub fn commit(mut self) -> Result<(), TransactionError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::commit_transaction_span().entered();
        self.finish(TxState::Committed)
    }

    /// # Errors
    ///
    /// `Finished` if the transaction is no longer open, `Postgres` if `ROLLBACK` fails.
    pub fn rollback(mut self) -> Result<(), TransactionError> {
        self.finish(TxState::RolledBack)
    }

    /// The state moves before the statement runs: after a failed `COMMIT` the
    /// server-side block is gone and `Drop` must leave it alone.
    fn finish(&mut self, next: TxState) -> Result<(), TransactionError> {
        if self.state != TxState::Open {
            return Err(TransactionError::Finished(self.state));
        }
        self.state = next;
        let statement = match next {
            TxState::Committed => "COMMIT",
            _ => {
                #[cfg(feature = "tracing")]
                let _span = tracing_helpers::rollback_transaction_span().entered();
                "ROLLBACK"
            }
        };
        self.client.execute(statement, &[])?;
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), DbError> {
        match self.state {
            TxState::Open => Ok(()),
            state => Err(DbError::Other(format!("statement on a {state} transaction"))),
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state == TxState::Open {
            if let Err(e) = self.finish(TxState::RolledBack) {
                log::warn!("rollback on drop failed: {e}");
            }
        }
    }
}

impl DbExecutor for Transaction {
    fn execute(&self, query: &str, params: &[&dyn ToSql]) -> Result<u64, DbError> {
        self.ensure_open()?;
        instrumented(query, || self.client.execute(query, params))
    }

    fn query_one(&self, query: &str, params: &[&dyn ToSql]) -> Result<Row, DbError> {
        self.ensure_open()?;
        instrumented(query, || self.client.query_one(query, params))
    }

    fn query_all(&self, query: &str, params: &[&dyn ToSql]) -> Result<Vec<Row>, DbError> {
        self.ensure_open()?;
        instrumented(query, || self.client.query(query, params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_statement_names_the_level() {
        assert_eq!(
            format!("BEGIN ISOLATION LEVEL {}", IsolationLevel::default()),
            "BEGIN ISOLATION LEVEL READ COMMITTED"
        );
        assert_eq!(IsolationLevel::Serializable.as_sql(), "SERIALIZABLE");
        assert_eq!(IsolationLevel::RepeatableRead.as_sql(), "REPEATABLE READ");
    }

    #[test]
    fn test_finished_transaction_errors_say_how_it_ended() {
        let err = TransactionError::Finished(TxState::Committed);
        assert_eq!(err.to_string(), "transaction already committed");

        let db_err: DbError = TransactionError::Finished(TxState::RolledBack).into();
        assert!(db_err.to_string().contains("rolled back"));
    }
}
