//! PostgreSQL backend.
//!
//! Each unit of work checks a connection out of the pool and runs inside one
//! `BEGIN … COMMIT`. Row locks are `SELECT … FOR UPDATE`; slot creation uses
//! `INSERT … ON CONFLICT DO NOTHING RETURNING`, so losing a race for the same
//! slot yields no row and is reported as `Conflict`.

use super::{LedgerStore, ScheduleQuery, StoreTx};
use crate::domain::{
    Id, LedgerEntry, MealSchedule, MealSlot, MealStatus, MealTime, NewLedgerEntry,
    NewMealSchedule, NewUser, Role, StatusHistory, TransactionType, User,
};
use crate::error::EngineError;
use crate::executor::{DbError, DbExecutor};
use crate::pool::config::DatabaseConfig;
use crate::pool::{DbPool, PooledConnection};
use crate::transaction::{IsolationLevel, Transaction};
use chrono::{DateTime, NaiveDate, Utc};
use may_postgres::types::{FromSql, ToSql};
use may_postgres::Row;
use postgres_types::Json;

const USER_COLUMNS: &str = "id, cin, role, balance, active, created_at";
const ENTRY_COLUMNS: &str = "id, user_id, type, amount, processed_by, created_at";
const SCHEDULE_COLUMNS: &str = "id, user_id, meal_time, scheduled_date, scheduled_at, status, \
                                status_history, amount_paid, created_at, updated_at";

/// [`LedgerStore`] over a [`DbPool`].
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
    isolation: IsolationLevel,
}

impl PgStore {
    /// `READ COMMITTED` plus explicit row locks is enough for every operation.
    pub fn new(pool: DbPool) -> Self {
        Self::with_isolation(pool, IsolationLevel::ReadCommitted)
    }

    /// Open a pool from `config` and wrap it.
    ///
    /// # Errors
    ///
    /// Returns `DbError` if any pooled connection fails to open.
    pub fn connect(config: &DatabaseConfig) -> Result<Self, DbError> {
        Ok(Self::new(DbPool::new(config)?))
    }

    pub fn with_isolation(pool: DbPool, isolation: IsolationLevel) -> Self {
        Self { pool, isolation }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Install the schema over a pooled connection.
    ///
    /// # Errors
    ///
    /// Returns `DbError` if a connection cannot be acquired or DDL fails.
    pub fn install_schema(&self) -> Result<(), DbError> {
        let conn = self.pool.acquire()?;
        let tx = conn.begin(IsolationLevel::ReadCommitted)?;
        super::schema::install_schema(&tx)?;
        tx.commit()?;
        Ok(())
    }
}

impl LedgerStore for PgStore {
    fn begin(&self) -> Result<Box<dyn StoreTx + '_>, EngineError> {
        let conn = self.pool.acquire()?;
        let tx = conn.begin(self.isolation)?;
        Ok(Box::new(PgTx { tx, _conn: conn }))
    }
}

/// Open transaction plus the pooled connection it runs on.
///
/// Field order matters: `tx` drops (and rolls back if still open) before the
/// connection goes back to the pool.
struct PgTx {
    tx: Transaction,
    _conn: PooledConnection,
}

fn col<'a, T: FromSql<'a>>(row: &'a Row, name: &str) -> Result<T, DbError> {
    row.try_get(name)
        .map_err(|e| DbError::ParseError(format!("column {name}: {e}")))
}

fn parse_named<T>(row: &Row, name: &str, parse: fn(&str) -> Option<T>) -> Result<T, DbError> {
    let raw: String = col(row, name)?;
    parse(&raw).ok_or_else(|| DbError::ParseError(format!("column {name}: unexpected value '{raw}'")))
}

fn user_from_row(row: &Row) -> Result<User, DbError> {
    Ok(User {
        id: col(row, "id")?,
        cin: col(row, "cin")?,
        role: parse_named(row, "role", Role::from_name)?,
        balance: col(row, "balance")?,
        active: col(row, "active")?,
        created_at: col(row, "created_at")?,
    })
}

fn entry_from_row(row: &Row) -> Result<LedgerEntry, DbError> {
    Ok(LedgerEntry {
        id: col(row, "id")?,
        user_id: col(row, "user_id")?,
        transaction_type: parse_named(row, "type", TransactionType::from_name)?,
        amount: col(row, "amount")?,
        processed_by: col(row, "processed_by")?,
        created_at: col(row, "created_at")?,
    })
}

fn schedule_from_row(row: &Row) -> Result<MealSchedule, DbError> {
    let Json(history): Json<StatusHistory> = col(row, "status_history")?;
    Ok(MealSchedule {
        id: col(row, "id")?,
        user_id: col(row, "user_id")?,
        meal_time: parse_named(row, "meal_time", MealTime::from_name)?,
        scheduled_date: col(row, "scheduled_date")?,
        scheduled_at: col(row, "scheduled_at")?,
        status: parse_named(row, "status", MealStatus::from_name)?,
        status_history: history,
        amount_paid: col(row, "amount_paid")?,
        created_at: col(row, "created_at")?,
        updated_at: col(row, "updated_at")?,
    })
}

fn rows_to<T>(rows: &[Row], map: fn(&Row) -> Result<T, DbError>) -> Result<Vec<T>, EngineError> {
    rows.iter()
        .map(|row| map(row).map_err(EngineError::from))
        .collect()
}

fn opt_to<T>(row: Option<Row>, map: fn(&Row) -> Result<T, DbError>) -> Result<Option<T>, EngineError> {
    row.as_ref().map(map).transpose().map_err(EngineError::from)
}

impl PgTx {
    fn select_user(&self, filter: &str, param: &dyn ToSql, lock: bool) -> Result<Option<User>, EngineError> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE {filter} = $1{}",
            if lock { " FOR UPDATE" } else { "" }
        );
        opt_to(self.tx.query_opt(&sql, &[param])?, user_from_row)
    }
}

impl StoreTx for PgTx {
    fn insert_user(&mut self, user: &NewUser, now: DateTime<Utc>) -> Result<User, EngineError> {
        let sql = format!(
            "INSERT INTO users (id, cin, role, balance, active, created_at) \
             VALUES ($1, $2, $3, 0, TRUE, $4) \
             ON CONFLICT (cin) DO NOTHING RETURNING {USER_COLUMNS}"
        );
        let id = Id::new_v4();
        let role = user.role.as_str();
        let row = self.tx.query_opt(&sql, &[&id, &user.cin, &role, &now])?;
        opt_to(row, user_from_row)?.ok_or_else(|| {
            EngineError::Conflict(format!("CIN {} is already registered", user.cin))
        })
    }

    fn find_user(&mut self, id: Id) -> Result<Option<User>, EngineError> {
        self.select_user("id", &id, false)
    }

    fn find_user_by_cin(&mut self, cin: &str) -> Result<Option<User>, EngineError> {
        self.select_user("cin", &cin, false)
    }

    fn lock_user(&mut self, id: Id) -> Result<Option<User>, EngineError> {
        self.select_user("id", &id, true)
    }

    fn lock_user_by_cin(&mut self, cin: &str) -> Result<Option<User>, EngineError> {
        self.select_user("cin", &cin, true)
    }

    fn set_active(&mut self, id: Id, active: bool) -> Result<(), EngineError> {
        let updated = self
            .tx
            .execute("UPDATE users SET active = $2 WHERE id = $1", &[&id, &active])?;
        if updated == 0 {
            return Err(EngineError::NotFound(format!("user {id}")));
        }
        Ok(())
    }

    fn set_balance(&mut self, id: Id, balance: i64) -> Result<(), EngineError> {
        let updated = self
            .tx
            .execute("UPDATE users SET balance = $2 WHERE id = $1", &[&id, &balance])?;
        if updated == 0 {
            return Err(EngineError::NotFound(format!("user {id}")));
        }
        Ok(())
    }

    fn insert_entry(&mut self, entry: &NewLedgerEntry) -> Result<LedgerEntry, EngineError> {
        let sql = format!(
            "INSERT INTO transactions (id, user_id, type, amount, processed_by, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {ENTRY_COLUMNS}"
        );
        let id = Id::new_v4();
        let kind = entry.transaction_type.as_str();
        let row = self.tx.query_one(
            &sql,
            &[
                &id,
                &entry.user_id,
                &kind,
                &entry.amount,
                &entry.processed_by,
                &entry.created_at,
            ],
        )?;
        Ok(entry_from_row(&row)?)
    }

    fn list_entries(&mut self, user_id: Id, limit: i64, offset: i64) -> Result<Vec<LedgerEntry>, EngineError> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM transactions WHERE user_id = $1 \
             ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3"
        );
        let rows = self.tx.query_all(&sql, &[&user_id, &limit, &offset])?;
        rows_to(&rows, entry_from_row)
    }

    fn count_entries(&mut self, user_id: Id) -> Result<i64, EngineError> {
        let row = self.tx.query_one(
            "SELECT COUNT(*) AS total FROM transactions WHERE user_id = $1",
            &[&user_id],
        )?;
        Ok(col::<i64>(&row, "total")?)
    }

    fn ledger_sum(&mut self, user_id: Id) -> Result<i64, EngineError> {
        let row = self.tx.query_one(
            "SELECT COALESCE(SUM(amount), 0)::BIGINT AS total FROM transactions WHERE user_id = $1",
            &[&user_id],
        )?;
        Ok(col::<i64>(&row, "total")?)
    }

    fn lock_schedule(&mut self, id: Id) -> Result<Option<MealSchedule>, EngineError> {
        let sql = format!("SELECT {SCHEDULE_COLUMNS} FROM meal_schedules WHERE id = $1 FOR UPDATE");
        opt_to(self.tx.query_opt(&sql, &[&id])?, schedule_from_row)
    }

    fn lock_slot(&mut self, user_id: Id, slot: MealSlot) -> Result<Option<MealSchedule>, EngineError> {
        let sql = format!(
            "SELECT {SCHEDULE_COLUMNS} FROM meal_schedules \
             WHERE user_id = $1 AND scheduled_date = $2 AND meal_time = $3 FOR UPDATE"
        );
        let meal_time = slot.meal_time.as_str();
        opt_to(
            self.tx.query_opt(&sql, &[&user_id, &slot.date, &meal_time])?,
            schedule_from_row,
        )
    }

    fn insert_schedule(&mut self, schedule: &NewMealSchedule) -> Result<MealSchedule, EngineError> {
        let sql = format!(
            "INSERT INTO meal_schedules \
             (id, user_id, meal_time, scheduled_date, scheduled_at, status, status_history, amount_paid, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9) \
             ON CONFLICT (user_id, scheduled_date, meal_time) DO NOTHING \
             RETURNING {SCHEDULE_COLUMNS}"
        );
        let id = Id::new_v4();
        let meal_time = schedule.meal_time.as_str();
        let status = MealStatus::Scheduled.as_str();
        let history = Json(StatusHistory::starting(MealStatus::Scheduled, schedule.created_at));
        let row = self.tx.query_opt(
            &sql,
            &[
                &id,
                &schedule.user_id,
                &meal_time,
                &schedule.scheduled_date,
                &schedule.scheduled_at,
                &status,
                &history,
                &schedule.amount_paid,
                &schedule.created_at,
            ],
        )?;
        opt_to(row, schedule_from_row)?.ok_or_else(|| {
            EngineError::Conflict(format!(
                "{} is already booked",
                MealSlot::new(schedule.scheduled_date, schedule.meal_time)
            ))
        })
    }

    fn update_schedule(&mut self, schedule: &MealSchedule) -> Result<(), EngineError> {
        let status = schedule.status.as_str();
        let history = Json(&schedule.status_history);
        let updated = self.tx.execute(
            "UPDATE meal_schedules SET status = $2, status_history = $3, amount_paid = $4, updated_at = $5 \
             WHERE id = $1",
            &[
                &schedule.id,
                &status,
                &history,
                &schedule.amount_paid,
                &schedule.updated_at,
            ],
        )?;
        if updated == 0 {
            return Err(EngineError::NotFound(format!("meal {}", schedule.id)));
        }
        Ok(())
    }

    fn list_schedules(&mut self, user_id: Id, query: &ScheduleQuery) -> Result<Vec<MealSchedule>, EngineError> {
        let sql = format!(
            "SELECT {SCHEDULE_COLUMNS} FROM meal_schedules \
             WHERE user_id = $1 \
               AND ($2::date IS NULL OR scheduled_date >= $2) \
               AND ($3::date IS NULL OR scheduled_date <= $3) \
               AND ($4::text IS NULL OR meal_time = $4) \
             ORDER BY scheduled_date, scheduled_at"
        );
        let from: Option<NaiveDate> = query.from;
        let to: Option<NaiveDate> = query.to;
        let meal_time: Option<&str> = query.meal_time.map(MealTime::as_str);
        let rows = self.tx.query_all(&sql, &[&user_id, &from, &to, &meal_time])?;
        rows_to(&rows, schedule_from_row)
    }

    fn find_redeemable(
        &mut self,
        user_id: Id,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Option<MealSchedule>, EngineError> {
        let sql = format!(
            "SELECT {SCHEDULE_COLUMNS} FROM meal_schedules \
             WHERE user_id = $1 AND status = 'scheduled' AND scheduled_at BETWEEN $2 AND $3 \
             ORDER BY scheduled_at DESC LIMIT 1 FOR UPDATE"
        );
        opt_to(
            self.tx.query_opt(&sql, &[&user_id, &from, &to])?,
            schedule_from_row,
        )
    }

    fn overdue_schedule_ids(
        &mut self,
        meal_time: MealTime,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Id>, EngineError> {
        let meal_time = meal_time.as_str();
        let rows = self.tx.query_all(
            "SELECT id FROM meal_schedules \
             WHERE status = 'scheduled' AND meal_time = $1 AND scheduled_at <= $2 \
             ORDER BY scheduled_at LIMIT $3",
            &[&meal_time, &cutoff, &limit],
        )?;
        rows.iter()
            .map(|row| col::<Id>(row, "id").map_err(EngineError::from))
            .collect()
    }

    fn commit(self: Box<Self>) -> Result<(), EngineError> {
        let PgTx { tx, _conn } = *self;
        tx.commit()?;
        Ok(())
    }
}
