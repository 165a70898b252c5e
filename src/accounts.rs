//! Account operations: registration, activation, deposits, adjustments,
//! history and ledger audits.

use crate::domain::{Id, LedgerEntry, NewUser, Role, TransactionType, User};
use crate::engine::Engine;
use crate::error::EngineError;
use crate::ledger::{apply_in, lock_existing, require_active, require_actor, LedgerOutcome};
use crate::policy;
use serde::{Deserialize, Serialize};

const MAX_CIN_LEN: usize = 32;
const MAX_PER_PAGE: u32 = 100;

/// One-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub page: u32,
    pub per_page: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 20,
        }
    }
}

impl Page {
    fn limit_offset(self) -> Result<(i64, i64), EngineError> {
        if self.page == 0 {
            return Err(EngineError::BadRequest("page numbers start at 1".to_string()));
        }
        if self.per_page == 0 || self.per_page > MAX_PER_PAGE {
            return Err(EngineError::BadRequest(format!(
                "per_page must be between 1 and {MAX_PER_PAGE}, got {}",
                self.per_page
            )));
        }
        let limit = i64::from(self.per_page);
        Ok((limit, i64::from(self.page - 1) * limit))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionPage {
    /// Newest first.
    pub entries: Vec<LedgerEntry>,
    pub total: i64,
    pub page: u32,
    pub per_page: u32,
}

/// Balance versus the sum of the user's ledger entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LedgerAudit {
    pub user_id: Id,
    pub balance: i64,
    pub ledger_sum: i64,
    pub consistent: bool,
}

impl Engine {
    /// # Errors
    ///
    /// `BadRequest` for an empty or oversized CIN, `Conflict` if it is taken.
    pub fn register_user(&self, cin: &str, role: Role) -> Result<User, EngineError> {
        let cin = cin.trim();
        if cin.is_empty() || cin.len() > MAX_CIN_LEN {
            return Err(EngineError::BadRequest(format!(
                "CIN must be 1 to {MAX_CIN_LEN} characters"
            )));
        }
        let now = self.now();
        let user = self.run("register_user", |tx| {
            tx.insert_user(
                &NewUser {
                    cin: cin.to_string(),
                    role,
                },
                now,
            )
        })?;
        log::info!("registered {} {} as {}", user.role, user.cin, user.id);
        Ok(user)
    }

    pub fn find_user(&self, user_id: Id) -> Result<User, EngineError> {
        self.run("find_user", |tx| {
            tx.find_user(user_id)?
                .ok_or_else(|| EngineError::NotFound(format!("user {user_id}")))
        })
    }

    pub fn find_user_by_cin(&self, cin: &str) -> Result<User, EngineError> {
        let cin = cin.trim();
        self.run("find_user_by_cin", |tx| {
            tx.find_user_by_cin(cin)?
                .ok_or_else(|| EngineError::NotFound(format!("no user with CIN {cin}")))
        })
    }

    /// Soft-delete: the account keeps its balance and history.
    pub fn deactivate_user(&self, user_id: Id) -> Result<User, EngineError> {
        self.set_user_active(user_id, false)
    }

    pub fn activate_user(&self, user_id: Id) -> Result<User, EngineError> {
        self.set_user_active(user_id, true)
    }

    fn set_user_active(&self, user_id: Id, active: bool) -> Result<User, EngineError> {
        let op = if active { "activate_user" } else { "deactivate_user" };
        let user = self.run(op, |tx| {
            let mut user = lock_existing(tx, user_id)?;
            if user.active != active {
                tx.set_active(user_id, active)?;
                user.active = active;
            }
            Ok(user)
        })?;
        log::info!("{op}: {}", user.cin);
        Ok(user)
    }

    /// Credit a recharge to an active account.
    ///
    /// # Errors
    ///
    /// `NotFound`, `Forbidden` for inactive accounts, `BadRequest` for a
    /// non-positive amount.
    pub fn deposit(&self, user_id: Id, amount: i64, processed_by: Id) -> Result<LedgerOutcome, EngineError> {
        let now = self.now();
        let outcome = self.run("deposit", |tx| {
            let mut user = lock_existing(tx, user_id)?;
            require_active(&user)?;
            require_actor(tx, user_id, processed_by)?;
            apply_in(tx, &mut user, TransactionType::BalanceRecharge, amount, processed_by, now)
        })?;
        log::info!(
            "deposit of {amount} for user {user_id}: balance {} -> {}",
            outcome.previous_balance,
            outcome.new_balance
        );
        Ok(outcome)
    }

    /// Move the balance by a signed `delta`.
    pub fn adjust_balance(&self, user_id: Id, delta: i64, processed_by: Id) -> Result<LedgerOutcome, EngineError> {
        let now = self.now();
        let outcome = self.run("adjust_balance", |tx| {
            let mut user = lock_existing(tx, user_id)?;
            require_actor(tx, user_id, processed_by)?;
            apply_in(tx, &mut user, TransactionType::BalanceAdjustment, delta, processed_by, now)
        })?;
        log::info!(
            "adjusted user {user_id} by {delta}: {} -> {}",
            outcome.previous_balance,
            outcome.new_balance
        );
        Ok(outcome)
    }

    /// Bring the balance to `target`, recording the difference as an adjustment.
    ///
    /// # Errors
    ///
    /// `BadRequest` when the balance already equals `target`.
    pub fn set_balance(&self, user_id: Id, target: i64, processed_by: Id) -> Result<LedgerOutcome, EngineError> {
        let now = self.now();
        let outcome = self.run("set_balance", |tx| {
            let mut user = lock_existing(tx, user_id)?;
            require_actor(tx, user_id, processed_by)?;
            let delta = policy::adjustment_to_target(user.balance, target)?;
            if delta == 0 {
                return Err(EngineError::BadRequest(format!(
                    "balance is already {target}"
                )));
            }
            apply_in(tx, &mut user, TransactionType::BalanceAdjustment, delta, processed_by, now)
        })?;
        log::info!(
            "set balance of user {user_id} to {target} (was {})",
            outcome.previous_balance
        );
        Ok(outcome)
    }

    pub fn get_user_transaction_history(&self, user_id: Id, page: Page) -> Result<TransactionPage, EngineError> {
        let (limit, offset) = page.limit_offset()?;
        let history = self.run("get_user_transaction_history", |tx| {
            if tx.find_user(user_id)?.is_none() {
                return Err(EngineError::NotFound(format!("user {user_id}")));
            }
            Ok(TransactionPage {
                entries: tx.list_entries(user_id, limit, offset)?,
                total: tx.count_entries(user_id)?,
                page: page.page,
                per_page: page.per_page,
            })
        })?;
        log::debug!(
            "history page {} for user {user_id}: {} of {}",
            page.page,
            history.entries.len(),
            history.total
        );
        Ok(history)
    }

    /// Compare the stored balance with the sum of the user's entries.
    ///
    /// The user row is locked while summing so the two figures agree on a
    /// single point in time.
    pub fn audit_user(&self, user_id: Id) -> Result<LedgerAudit, EngineError> {
        let audit = self.run("audit_user", |tx| {
            let user = lock_existing(tx, user_id)?;
            let ledger_sum = tx.ledger_sum(user_id)?;
            Ok(LedgerAudit {
                user_id,
                balance: user.balance,
                ledger_sum,
                consistent: user.balance == ledger_sum,
            })
        })?;
        if !audit.consistent {
            log::error!(
                "ledger mismatch for user {user_id}: balance {} vs entries {}",
                audit.balance,
                audit.ledger_sum
            );
        }
        Ok(audit)
    }
}
