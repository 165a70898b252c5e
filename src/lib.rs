//! # Mealguard
//!
//! Prepaid balance ledger and meal scheduling engine for a campus canteen,
//! on PostgreSQL through the `may` coroutine runtime.
//!
//! Every balance change is a ledger entry written in the same transaction as
//! the balance itself and the meal row that caused it, so a user's balance
//! always equals the sum of their entries.
//!
//! ```no_run
//! use mealguard::{Engine, EngineConfig, MealTime, Role};
//!
//! let config = EngineConfig::load()?;
//! let engine = Engine::connect(&config)?;
//! let student = engine.register_user("12345678", Role::Student)?;
//! engine.deposit(student.id, 1_000, student.id)?;
//! let tomorrow = chrono::Utc::now().date_naive().succ_opt().unwrap();
//! engine.schedule_meal(student.id, MealTime::Lunch, tomorrow)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod clock;
pub mod config;
pub mod connection;
pub mod domain;
pub mod error;
pub mod executor;
pub mod lifecycle;
pub mod metrics;
pub mod policy;
pub mod pool;
pub mod store;
pub mod transaction;

mod accounts;
mod engine;
mod ledger;
mod redemption;
mod scheduling;
mod sweep;

#[cfg(test)]
mod test_helpers;

pub use accounts::{LedgerAudit, Page, TransactionPage};
pub use clock::{Clock, SystemClock};
pub use config::{DatabaseConfig, EngineConfig, PricingConfig, RolePricing};
pub use connection::{connect, ConnectionError};
pub use domain::{
    Id, LedgerEntry, MealSchedule, MealSlot, MealStatus, MealTime, Role, SlotStatus, StatusEntry,
    StatusHistory, TransactionType, User,
};
pub use engine::Engine;
pub use error::{EngineError, ErrorKind};
pub use executor::{DbError, DbExecutor};
pub use ledger::LedgerOutcome;
pub use lifecycle::Lifecycle;
pub use pool::{DbPool, PooledConnection};
pub use redemption::{StudentInfo, Verification};
pub use scheduling::{MealFilter, SlotView};
pub use store::{LedgerStore, PgStore, StoreTx};
pub use sweep::{SweepReport, Sweeper};
pub use transaction::{IsolationLevel, Transaction, TransactionError, TxState};

#[cfg(any(test, feature = "mock"))]
pub use clock::ManualClock;
#[cfg(any(test, feature = "mock"))]
pub use store::MemoryStore;
