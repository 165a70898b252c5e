//! Storage seam.
//!
//! Orchestrators never issue SQL themselves. They open one [`StoreTx`] per
//! operation, take row locks through it (user row first, then schedule rows),
//! write, and `commit`. A unit of work that is dropped uncommitted leaves no
//! trace: the PostgreSQL backend rolls back, the memory backend discards its copy.

use crate::domain::{
    Id, LedgerEntry, MealSchedule, MealSlot, MealTime, NewLedgerEntry, NewMealSchedule, NewUser,
    User,
};
use crate::error::EngineError;
use chrono::{DateTime, NaiveDate, Utc};

#[cfg(any(test, feature = "mock"))]
pub mod memory;
pub mod postgres;
pub mod schema;

#[cfg(any(test, feature = "mock"))]
pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Stored-column filters for schedule listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleQuery {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub meal_time: Option<MealTime>,
}

impl ScheduleQuery {
    pub fn matches(&self, schedule: &MealSchedule) -> bool {
        self.from.map_or(true, |from| schedule.scheduled_date >= from)
            && self.to.map_or(true, |to| schedule.scheduled_date <= to)
            && self.meal_time.map_or(true, |m| schedule.meal_time == m)
    }
}

/// Source of units of work.
pub trait LedgerStore: Send + Sync {
    /// Open a unit of work.
    ///
    /// # Errors
    ///
    /// `EngineError::Internal` if no connection or transaction can be obtained.
    fn begin(&self) -> Result<Box<dyn StoreTx + '_>, EngineError>;
}

/// One atomic unit of work against users, ledger entries and schedules.
///
/// `lock_*` methods hold the returned row until commit or rollback.
pub trait StoreTx {
    /// # Errors
    ///
    /// `Conflict` when the CIN is already registered.
    fn insert_user(&mut self, user: &NewUser, now: DateTime<Utc>) -> Result<User, EngineError>;
    fn find_user(&mut self, id: Id) -> Result<Option<User>, EngineError>;
    fn find_user_by_cin(&mut self, cin: &str) -> Result<Option<User>, EngineError>;
    fn lock_user(&mut self, id: Id) -> Result<Option<User>, EngineError>;
    fn lock_user_by_cin(&mut self, cin: &str) -> Result<Option<User>, EngineError>;
    fn set_active(&mut self, id: Id, active: bool) -> Result<(), EngineError>;
    fn set_balance(&mut self, id: Id, balance: i64) -> Result<(), EngineError>;

    fn insert_entry(&mut self, entry: &NewLedgerEntry) -> Result<LedgerEntry, EngineError>;
    /// Newest first.
    fn list_entries(&mut self, user_id: Id, limit: i64, offset: i64) -> Result<Vec<LedgerEntry>, EngineError>;
    fn count_entries(&mut self, user_id: Id) -> Result<i64, EngineError>;
    fn ledger_sum(&mut self, user_id: Id) -> Result<i64, EngineError>;

    fn lock_schedule(&mut self, id: Id) -> Result<Option<MealSchedule>, EngineError>;
    fn lock_slot(&mut self, user_id: Id, slot: MealSlot) -> Result<Option<MealSchedule>, EngineError>;
    /// # Errors
    ///
    /// `Conflict` when a row already exists for the slot.
    fn insert_schedule(&mut self, schedule: &NewMealSchedule) -> Result<MealSchedule, EngineError>;
    fn update_schedule(&mut self, schedule: &MealSchedule) -> Result<(), EngineError>;
    /// Ordered by date then meal time.
    fn list_schedules(&mut self, user_id: Id, query: &ScheduleQuery) -> Result<Vec<MealSchedule>, EngineError>;
    /// Latest `scheduled` row served within `[from, to]`, locked.
    fn find_redeemable(
        &mut self,
        user_id: Id,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Option<MealSchedule>, EngineError>;
    /// `scheduled` rows of `meal_time` served at or before `cutoff`.
    fn overdue_schedule_ids(
        &mut self,
        meal_time: MealTime,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Id>, EngineError>;

    /// # Errors
    ///
    /// `Internal` if the commit fails; nothing from this unit persists then.
    fn commit(self: Box<Self>) -> Result<(), EngineError>;
}
