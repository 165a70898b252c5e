//! Fixed-size pool of persistent `may_postgres` connections.

pub mod config;
pub mod manager;

pub use manager::{DbPool, PooledConnection};
