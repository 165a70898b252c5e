//! Opening `may_postgres` connections.
//!
//! Connection strings are checked before dialling so that a typo in
//! configuration fails with a readable message instead of a driver error.

use may_postgres::{Client, Error as PostgresError};
use std::fmt;
use std::time::Instant;

#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

#[derive(Debug)]
pub enum ConnectionError {
    /// Rejected before dialling.
    Malformed(&'static str),
    /// Network, TLS or authentication failure.
    Postgres(PostgresError),
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionError::Malformed(reason) => write!(f, "malformed connection string: {reason}"),
            ConnectionError::Postgres(e) => write!(f, "cannot connect: {e}"),
        }
    }
}

impl std::error::Error for ConnectionError {}

impl From<PostgresError> for ConnectionError {
    fn from(err: PostgresError) -> Self {
        ConnectionError::Postgres(err)
    }
}

/// Dial PostgreSQL.
///
/// Takes a `postgres[ql]://user:pass@host:port/db` URI or the key-value form
/// `host=localhost user=postgres dbname=canteen`, and blocks the calling
/// coroutine until the handshake completes.
///
/// # Errors
///
/// `Malformed` before any network traffic, `Postgres` when the server refuses.
pub fn connect(connection_string: &str) -> Result<Client, ConnectionError> {
    #[cfg(feature = "tracing")]
    let _span = tracing_helpers::acquire_connection_span().entered();

    check_connection_string(connection_string)?;
    let start = Instant::now();
    let client = may_postgres::connect(connection_string)?;

    #[cfg(feature = "metrics")]
    crate::metrics::METRICS.record_connection_wait(start.elapsed());
    #[cfg(not(feature = "metrics"))]
    let _ = start;

    Ok(client)
}

/// Whether `client` still answers `SELECT 1`.
pub fn is_alive(client: &Client) -> bool {
    match client.query_one("SELECT 1", &[]) {
        Ok(row) => row.try_get::<_, i32>(0).map_or(false, |one| one == 1),
        Err(e) => {
            log::debug!("connection probe failed: {e}");
            false
        }
    }
}

/// # Errors
///
/// `Malformed` for an empty string, an unknown scheme, or a URI without a
/// `user@` part.
pub fn check_connection_string(connection_string: &str) -> Result<(), ConnectionError> {
    let s = connection_string.trim();
    if s.is_empty() {
        return Err(ConnectionError::Malformed("empty"));
    }
    let uri = ["postgres://", "postgresql://"]
        .iter()
        .find_map(|scheme| s.strip_prefix(scheme));
    match uri {
        Some(rest) if !rest.contains('@') => Err(ConnectionError::Malformed(
            "URI needs user@host",
        )),
        Some(_) => Ok(()),
        None if s.contains('=') && !s.contains("://") => Ok(()),
        None => Err(ConnectionError::Malformed(
            "expected postgres://user@host/db or host=... key-value pairs",
        )),
    }
}
