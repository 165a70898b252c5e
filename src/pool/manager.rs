//! Pool manager
//!
//! Connections are opened once at start-up and circulate through a bounded
//! `crossbeam_channel`: `acquire()` receives a client (waiting up to the pool
//! timeout), the returned [`PooledConnection`] sends it back on drop. A client
//! that fails its health probe is replaced before being handed out.

use crate::connection::{connect, is_alive};
use crate::executor::DbError;
use crate::pool::config::DatabaseConfig;
use crate::transaction::{IsolationLevel, Transaction, TransactionError};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use may_postgres::Client;
use std::ops::Deref;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct PoolInner {
    url: String,
    size: usize,
    timeout: Duration,
    test_on_acquire: bool,
    sender: Sender<Client>,
    receiver: Receiver<Client>,
}

/// Cloneable handle to the shared pool.
#[derive(Clone)]
pub struct DbPool {
    inner: Arc<PoolInner>,
}

impl DbPool {
    /// Open `max_connections` connections to `config.url`.
    ///
    /// # Errors
    ///
    /// Returns `DbError::PoolError` if the pool is sized zero or any connection fails.
    pub fn new(config: &DatabaseConfig) -> Result<Self, DbError> {
        if config.max_connections == 0 {
            return Err(DbError::PoolError(
                "max_connections must be at least 1".to_string(),
            ));
        }

        let (sender, receiver) = bounded(config.max_connections);
        for slot in 0..config.max_connections {
            let client = connect(&config.url)
                .map_err(|e| DbError::PoolError(format!("slot {slot}: {e}")))?;
            sender
                .send(client)
                .map_err(|_| DbError::PoolError("pool channel closed".to_string()))?;
        }

        log::info!(
            "database pool ready with {} connection(s)",
            config.max_connections
        );

        Ok(Self {
            inner: Arc::new(PoolInner {
                url: config.url.clone(),
                size: config.max_connections,
                timeout: Duration::from_secs(config.pool_timeout_seconds),
                test_on_acquire: config.test_on_acquire,
                sender,
                receiver,
            }),
        })
    }

    /// Check a connection out of the pool.
    ///
    /// # Errors
    ///
    /// Returns `DbError::PoolError` on timeout or when a dead slot cannot be reconnected.
    pub fn acquire(&self) -> Result<PooledConnection, DbError> {
        let start = Instant::now();
        let client = match self.inner.receiver.recv_timeout(self.inner.timeout) {
            Ok(client) => client,
            Err(RecvTimeoutError::Timeout) => {
                return Err(DbError::PoolError(format!(
                    "no connection available within {}s",
                    self.inner.timeout.as_secs()
                )))
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(DbError::PoolError("pool channel closed".to_string()))
            }
        };

        #[cfg(feature = "metrics")]
        crate::metrics::METRICS.record_pool_wait(start.elapsed());
        #[cfg(not(feature = "metrics"))]
        let _ = start;

        let client = if self.inner.test_on_acquire {
            self.revive(client)?
        } else {
            client
        };

        Ok(PooledConnection {
            client: Some(client),
            sender: self.inner.sender.clone(),
        })
    }

    fn revive(&self, client: Client) -> Result<Client, DbError> {
        if is_alive(&client) {
            return Ok(client);
        }

        log::warn!("pooled connection failed health probe, reconnecting");
        match connect(&self.inner.url) {
            Ok(fresh) => Ok(fresh),
            Err(e) => {
                // Keep the slot so the next acquire retries the reconnect.
                let _ = self.inner.sender.send(client);
                Err(DbError::PoolError(format!("reconnect failed: {e}")))
            }
        }
    }

    pub fn size(&self) -> usize {
        self.inner.size
    }

    /// Connections currently sitting idle in the pool.
    pub fn idle(&self) -> usize {
        self.inner.receiver.len()
    }
}

/// A client checked out of a [`DbPool`]; returned on drop.
pub struct PooledConnection {
    client: Option<Client>,
    sender: Sender<Client>,
}

impl PooledConnection {
    /// Begin a transaction on this connection.
    ///
    /// # Errors
    ///
    /// Returns `TransactionError` if `BEGIN` fails.
    pub fn begin(&self, isolation_level: IsolationLevel) -> Result<Transaction, TransactionError> {
        Transaction::new_with_isolation(self.deref().clone(), isolation_level)
    }
}

impl Deref for PooledConnection {
    type Target = Client;

    fn deref(&self) -> &Client {
        match &self.client {
            Some(client) => client,
            None => unreachable!("client is only taken in drop"),
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            let _ = self.sender.send(client);
        }
    }
}
