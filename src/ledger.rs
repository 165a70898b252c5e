//! Ledger primitive.
//!
//! Appends one entry and moves the owner's balance by the same signed amount,
//! inside the caller's unit of work. The owner's row must already be locked
//! by that unit, which is what serialises concurrent balance updates.

use crate::domain::{Id, LedgerEntry, NewLedgerEntry, TransactionType, User};
use crate::engine::Engine;
use crate::error::EngineError;
use crate::policy;
use crate::store::StoreTx;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[cfg(feature = "metrics")]
use crate::metrics::METRICS;

/// Result of one ledger application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerOutcome {
    pub entry: LedgerEntry,
    pub previous_balance: i64,
    pub new_balance: i64,
}

/// Apply `amount` of `transaction_type` to `user`, whose row `tx` holds locked.
///
/// `user.balance` is updated in place so callers applying several entries in
/// one unit keep an accurate running balance.
pub(crate) fn apply_in(
    tx: &mut dyn StoreTx,
    user: &mut User,
    transaction_type: TransactionType,
    amount: i64,
    processed_by: Id,
    now: DateTime<Utc>,
) -> Result<LedgerOutcome, EngineError> {
    let signed = policy::signed_amount(transaction_type, amount)?;
    let previous_balance = user.balance;
    let new_balance = policy::apply_signed(previous_balance, signed)?;

    let entry = tx.insert_entry(&NewLedgerEntry {
        user_id: user.id,
        transaction_type,
        amount: signed,
        processed_by,
        created_at: now,
    })?;
    if signed != 0 {
        tx.set_balance(user.id, new_balance)?;
    }
    user.balance = new_balance;

    #[cfg(feature = "metrics")]
    METRICS.record_ledger_entry(transaction_type.as_str());

    Ok(LedgerOutcome {
        entry,
        previous_balance,
        new_balance,
    })
}

/// Lock `user_id`, failing `NotFound` when absent.
pub(crate) fn lock_existing(tx: &mut dyn StoreTx, user_id: Id) -> Result<User, EngineError> {
    tx.lock_user(user_id)?
        .ok_or_else(|| EngineError::NotFound(format!("user {user_id}")))
}

/// Fail `NotFound` unless `actor` is a known user. `owner` is accepted as is.
pub(crate) fn require_actor(tx: &mut dyn StoreTx, owner: Id, actor: Id) -> Result<(), EngineError> {
    if actor == owner || tx.find_user(actor)?.is_some() {
        return Ok(());
    }
    Err(EngineError::NotFound(format!("processing user {actor}")))
}

/// Fail `Forbidden` for deactivated accounts.
pub(crate) fn require_active(user: &User) -> Result<(), EngineError> {
    if user.active {
        Ok(())
    } else {
        Err(EngineError::Forbidden(format!("account {} is inactive", user.cin)))
    }
}

impl Engine {
    /// Record one balance-affecting event for `user_id`.
    ///
    /// Enforces only the per-type amount policy; business limits belong to the
    /// orchestrators.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown user or processor, `BadRequest` for an amount
    /// the type does not accept, `Internal` on storage failure.
    pub fn apply_transaction(
        &self,
        user_id: Id,
        transaction_type: TransactionType,
        amount: i64,
        processed_by: Id,
    ) -> Result<LedgerOutcome, EngineError> {
        let now = self.now();
        let outcome = self.run("apply_transaction", |tx| {
            let mut user = lock_existing(tx, user_id)?;
            require_actor(tx, user_id, processed_by)?;
            apply_in(tx, &mut user, transaction_type, amount, processed_by, now)
        })?;
        log::info!(
            "{} {} for user {}: {} -> {}",
            transaction_type,
            outcome.entry.amount,
            user_id,
            outcome.previous_balance,
            outcome.new_balance
        );
        Ok(outcome)
    }
}
