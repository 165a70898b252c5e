//! Table definitions.
//!
//! Idempotent DDL run by [`install_schema`]; safe to call on every start-up.

use crate::executor::{DbError, DbExecutor};

pub const SCHEMA_STATEMENTS: [&str; 6] = [
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id UUID PRIMARY KEY,
        cin VARCHAR(32) NOT NULL UNIQUE,
        role VARCHAR(32) NOT NULL CHECK (role IN (
            'admin', 'paymentStaff', 'verificationStaff', 'student', 'teacher', 'normalUser'
        )),
        balance BIGINT NOT NULL DEFAULT 0,
        active BOOLEAN NOT NULL DEFAULT TRUE,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS transactions (
        id UUID PRIMARY KEY,
        user_id UUID NOT NULL REFERENCES users(id),
        type VARCHAR(32) NOT NULL CHECK (type IN (
            'balance_recharge', 'meal_schedule', 'refund', 'meal_redemption', 'balance_adjustment'
        )),
        amount BIGINT NOT NULL,
        processed_by UUID NOT NULL REFERENCES users(id),
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_transactions_user_created
    ON transactions(user_id, created_at DESC)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS meal_schedules (
        id UUID PRIMARY KEY,
        user_id UUID NOT NULL REFERENCES users(id),
        meal_time VARCHAR(16) NOT NULL CHECK (meal_time IN ('lunch', 'dinner')),
        scheduled_date DATE NOT NULL,
        scheduled_at TIMESTAMPTZ NOT NULL,
        status VARCHAR(16) NOT NULL CHECK (status IN (
            'scheduled', 'cancelled', 'redeemed', 'refunded', 'expired'
        )),
        status_history JSONB NOT NULL DEFAULT '[]'::jsonb,
        amount_paid BIGINT NOT NULL DEFAULT 0,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL,
        CONSTRAINT uq_meal_schedules_slot UNIQUE (user_id, scheduled_date, meal_time)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_meal_schedules_status_at
    ON meal_schedules(status, scheduled_at)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_meal_schedules_user_at
    ON meal_schedules(user_id, scheduled_at)
    "#,
];

/// Create the `users`, `transactions` and `meal_schedules` tables if missing.
///
/// # Errors
///
/// Returns `DbError` if any statement fails.
pub fn install_schema(executor: &dyn DbExecutor) -> Result<(), DbError> {
    for statement in SCHEMA_STATEMENTS {
        executor.execute(statement, &[])?;
    }
    log::info!("schema installed ({} statements)", SCHEMA_STATEMENTS.len());
    Ok(())
}
