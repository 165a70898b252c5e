//! In-process backend for tests.
//!
//! One unit of work at a time: `begin` takes the store mutex and hands out a
//! working copy of the state. `commit` writes the copy back; dropping the unit
//! discards it. This gives the same observable guarantees as row locks, only
//! coarser.

use super::{LedgerStore, ScheduleQuery, StoreTx};
use crate::domain::{
    Id, LedgerEntry, MealSchedule, MealSlot, MealStatus, MealTime, NewLedgerEntry,
    NewMealSchedule, NewUser, StatusHistory, User,
};
use crate::error::EngineError;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    users: BTreeMap<Id, User>,
    entries: Vec<LedgerEntry>,
    schedules: BTreeMap<Id, MealSchedule>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    fail_next_entry: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Make the next ledger insert fail with `Internal`.
    pub fn fail_next_entry_insert(&self) {
        self.fail_next_entry.store(true, Ordering::SeqCst);
    }

    pub fn user(&self, id: Id) -> Option<User> {
        self.lock().users.get(&id).cloned()
    }

    pub fn users(&self) -> Vec<User> {
        self.lock().users.values().cloned().collect()
    }

    /// Committed entries in insertion order.
    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.lock().entries.clone()
    }

    pub fn schedules(&self) -> Vec<MealSchedule> {
        self.lock().schedules.values().cloned().collect()
    }

    /// Whether every user's balance equals the sum of their entries.
    pub fn ledger_consistent(&self) -> bool {
        let state = self.lock();
        state.users.values().all(|user| {
            let sum: i64 = state
                .entries
                .iter()
                .filter(|e| e.user_id == user.id)
                .map(|e| e.amount)
                .sum();
            sum == user.balance
        })
    }
}

impl LedgerStore for MemoryStore {
    fn begin(&self) -> Result<Box<dyn StoreTx + '_>, EngineError> {
        let guard = self.lock();
        let work = guard.clone();
        Ok(Box::new(MemoryTx {
            guard,
            work,
            fail_next_entry: &self.fail_next_entry,
        }))
    }
}

struct MemoryTx<'a> {
    guard: MutexGuard<'a, MemoryState>,
    work: MemoryState,
    fail_next_entry: &'a AtomicBool,
}

impl MemoryTx<'_> {
    fn user_mut(&mut self, id: Id) -> Result<&mut User, EngineError> {
        self.work
            .users
            .get_mut(&id)
            .ok_or_else(|| EngineError::NotFound(format!("user {id}")))
    }
}

impl StoreTx for MemoryTx<'_> {
    fn insert_user(&mut self, user: &NewUser, now: DateTime<Utc>) -> Result<User, EngineError> {
        if self.work.users.values().any(|u| u.cin == user.cin) {
            return Err(EngineError::Conflict(format!(
                "CIN {} is already registered",
                user.cin
            )));
        }
        let created = User {
            id: Id::new_v4(),
            cin: user.cin.clone(),
            role: user.role,
            balance: 0,
            active: true,
            created_at: now,
        };
        self.work.users.insert(created.id, created.clone());
        Ok(created)
    }

    fn find_user(&mut self, id: Id) -> Result<Option<User>, EngineError> {
        Ok(self.work.users.get(&id).cloned())
    }

    fn find_user_by_cin(&mut self, cin: &str) -> Result<Option<User>, EngineError> {
        Ok(self.work.users.values().find(|u| u.cin == cin).cloned())
    }

    fn lock_user(&mut self, id: Id) -> Result<Option<User>, EngineError> {
        self.find_user(id)
    }

    fn lock_user_by_cin(&mut self, cin: &str) -> Result<Option<User>, EngineError> {
        self.find_user_by_cin(cin)
    }

    fn set_active(&mut self, id: Id, active: bool) -> Result<(), EngineError> {
        self.user_mut(id)?.active = active;
        Ok(())
    }

    fn set_balance(&mut self, id: Id, balance: i64) -> Result<(), EngineError> {
        self.user_mut(id)?.balance = balance;
        Ok(())
    }

    fn insert_entry(&mut self, entry: &NewLedgerEntry) -> Result<LedgerEntry, EngineError> {
        if self.fail_next_entry.swap(false, Ordering::SeqCst) {
            return Err(EngineError::Internal("injected ledger write failure".to_string()));
        }
        if !self.work.users.contains_key(&entry.user_id) {
            return Err(EngineError::NotFound(format!("user {}", entry.user_id)));
        }
        let stored = LedgerEntry {
            id: Id::new_v4(),
            user_id: entry.user_id,
            transaction_type: entry.transaction_type,
            amount: entry.amount,
            processed_by: entry.processed_by,
            created_at: entry.created_at,
        };
        self.work.entries.push(stored.clone());
        Ok(stored)
    }

    fn list_entries(&mut self, user_id: Id, limit: i64, offset: i64) -> Result<Vec<LedgerEntry>, EngineError> {
        let skip = usize::try_from(offset.max(0)).unwrap_or(usize::MAX);
        let take = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);
        // Later inserts win ties on `created_at`.
        let mut mine: Vec<(usize, &LedgerEntry)> = self
            .work
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.user_id == user_id)
            .collect();
        mine.sort_by(|(ia, a), (ib, b)| b.created_at.cmp(&a.created_at).then(ib.cmp(ia)));
        Ok(mine
            .into_iter()
            .skip(skip)
            .take(take)
            .map(|(_, e)| e.clone())
            .collect())
    }

    fn count_entries(&mut self, user_id: Id) -> Result<i64, EngineError> {
        let count = self.work.entries.iter().filter(|e| e.user_id == user_id).count();
        Ok(i64::try_from(count).unwrap_or(i64::MAX))
    }

    fn ledger_sum(&mut self, user_id: Id) -> Result<i64, EngineError> {
        Ok(self
            .work
            .entries
            .iter()
            .filter(|e| e.user_id == user_id)
            .map(|e| e.amount)
            .sum())
    }

    fn lock_schedule(&mut self, id: Id) -> Result<Option<MealSchedule>, EngineError> {
        Ok(self.work.schedules.get(&id).cloned())
    }

    fn lock_slot(&mut self, user_id: Id, slot: MealSlot) -> Result<Option<MealSchedule>, EngineError> {
        Ok(self
            .work
            .schedules
            .values()
            .find(|s| s.user_id == user_id && s.slot() == slot)
            .cloned())
    }

    fn insert_schedule(&mut self, schedule: &NewMealSchedule) -> Result<MealSchedule, EngineError> {
        let slot = MealSlot::new(schedule.scheduled_date, schedule.meal_time);
        if self.lock_slot(schedule.user_id, slot)?.is_some() {
            return Err(EngineError::Conflict(format!("{slot} is already booked")));
        }
        let stored = MealSchedule {
            id: Id::new_v4(),
            user_id: schedule.user_id,
            meal_time: schedule.meal_time,
            scheduled_date: schedule.scheduled_date,
            scheduled_at: schedule.scheduled_at,
            status: MealStatus::Scheduled,
            status_history: StatusHistory::starting(MealStatus::Scheduled, schedule.created_at),
            amount_paid: schedule.amount_paid,
            created_at: schedule.created_at,
            updated_at: schedule.created_at,
        };
        self.work.schedules.insert(stored.id, stored.clone());
        Ok(stored)
    }

    fn update_schedule(&mut self, schedule: &MealSchedule) -> Result<(), EngineError> {
        match self.work.schedules.get_mut(&schedule.id) {
            Some(row) => {
                *row = schedule.clone();
                Ok(())
            }
            None => Err(EngineError::NotFound(format!("meal {}", schedule.id))),
        }
    }

    fn list_schedules(&mut self, user_id: Id, query: &ScheduleQuery) -> Result<Vec<MealSchedule>, EngineError> {
        let mut rows: Vec<MealSchedule> = self
            .work
            .schedules
            .values()
            .filter(|s| s.user_id == user_id && query.matches(s))
            .cloned()
            .collect();
        rows.sort_by_key(|s| (s.scheduled_date, s.scheduled_at));
        Ok(rows)
    }

    fn find_redeemable(
        &mut self,
        user_id: Id,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Option<MealSchedule>, EngineError> {
        Ok(self
            .work
            .schedules
            .values()
            .filter(|s| {
                s.user_id == user_id
                    && s.status == MealStatus::Scheduled
                    && s.scheduled_at >= from
                    && s.scheduled_at <= to
            })
            .max_by_key(|s| s.scheduled_at)
            .cloned())
    }

    fn overdue_schedule_ids(
        &mut self,
        meal_time: MealTime,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Id>, EngineError> {
        let mut rows: Vec<&MealSchedule> = self
            .work
            .schedules
            .values()
            .filter(|s| {
                s.status == MealStatus::Scheduled && s.meal_time == meal_time && s.scheduled_at <= cutoff
            })
            .collect();
        rows.sort_by_key(|s| s.scheduled_at);
        let take = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);
        Ok(rows.into_iter().take(take).map(|s| s.id).collect())
    }

    fn commit(self: Box<Self>) -> Result<(), EngineError> {
        let MemoryTx { mut guard, work, .. } = *self;
        *guard = work;
        Ok(())
    }
}
