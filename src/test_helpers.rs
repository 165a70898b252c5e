//! Fixtures for engine tests: an in-memory store, a manual clock and the
//! default configuration (canteen at UTC+1).

use crate::clock::ManualClock;
use crate::config::EngineConfig;
use crate::domain::{Role, User};
use crate::engine::Engine;
use crate::store::MemoryStore;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use std::sync::Arc;

pub struct Harness {
    pub engine: Arc<Engine>,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    /// Staff account used as processor for deposits and verifications.
    pub staff: User,
}

/// 2026-03-02, a Monday.
pub fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
}

pub fn tomorrow() -> NaiveDate {
    today().succ_opt().unwrap()
}

/// Canteen local time `hh:mm` on `date`.
pub fn local(date: NaiveDate, h: u32, m: u32) -> DateTime<Utc> {
    let offset = chrono::FixedOffset::east_opt(3600).unwrap();
    offset
        .from_local_datetime(&date.and_hms_opt(h, m, 0).unwrap())
        .single()
        .unwrap()
        .with_timezone(&Utc)
}

pub fn harness() -> Harness {
    harness_with(EngineConfig::default())
}

/// Clock starts at 08:00 local on [`today`].
pub fn harness_with(config: EngineConfig) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(local(today(), 8, 0)));
    let engine = Arc::new(Engine::new(store.clone(), &config, clock.clone()).unwrap());
    let staff = engine.register_user("STAFF-001", Role::PaymentStaff).unwrap();
    Harness {
        engine,
        store,
        clock,
        staff,
    }
}

impl Harness {
    /// Register a user and, for a non-zero `balance`, deposit it.
    pub fn user_with(&self, cin: &str, role: Role, balance: i64) -> User {
        let user = self.engine.register_user(cin, role).unwrap();
        if balance > 0 {
            self.engine.deposit(user.id, balance, self.staff.id).unwrap();
        } else if balance < 0 {
            self.engine.adjust_balance(user.id, balance, self.staff.id).unwrap();
        }
        self.engine.find_user(user.id).unwrap()
    }

    pub fn student(&self, balance: i64) -> User {
        self.user_with("12345678", Role::Student, balance)
    }

    pub fn balance(&self, user: &User) -> i64 {
        self.store.user(user.id).unwrap().balance
    }

    pub fn set_local(&self, date: NaiveDate, h: u32, m: u32) {
        self.clock.set(local(date, h, m));
    }

    pub fn assert_consistent(&self) {
        assert!(self.store.ledger_consistent(), "ledger out of step with balances");
    }
}
