//! Entities owned by the engine.

mod ledger;
mod meal;
mod role;
mod user;

pub use ledger::{LedgerEntry, NewLedgerEntry, TransactionType};
pub use meal::{
    MealSchedule, MealSlot, MealStatus, MealTime, NewMealSchedule, SlotStatus, StatusEntry,
    StatusHistory,
};
pub use role::Role;
pub use user::{NewUser, User};

/// Identifier of a user, schedule or ledger entry.
pub type Id = uuid::Uuid;
