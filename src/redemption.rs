//! Redemption orchestrators: staff verification at the counter and
//! self-service redemption.

use crate::domain::{Id, LedgerEntry, MealSchedule, MealSlot, MealStatus, MealTime, Role, TransactionType};
use crate::engine::Engine;
use crate::error::EngineError;
use crate::ledger::{apply_in, lock_existing, require_active};
use chrono::NaiveDate;
use serde::Serialize;

#[cfg(feature = "metrics")]
use crate::metrics::METRICS;

/// What the verifying staff member sees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StudentInfo {
    pub id: Id,
    pub cin: String,
    pub role: Role,
    pub balance: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verification {
    pub schedule: MealSchedule,
    /// Zero-amount audit entry naming the verifier.
    pub transaction: LedgerEntry,
    pub student: StudentInfo,
}

impl Engine {
    /// Serve the meal booked by the holder of `cin` for `meal_time` on `date`.
    ///
    /// The call must fall inside the meal's verification window.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown CIN or verifier, or when nothing is scheduled;
    /// `Forbidden` for inactive accounts; `BadRequest` outside the window or for
    /// a booking that has already expired. `date` does not select a past or
    /// future day: it is only cross-checked against today at the canteen, and
    /// any other value is a `BadRequest`.
    pub fn verify_meal(
        &self,
        cin: &str,
        meal_time: MealTime,
        date: NaiveDate,
        verified_by: Id,
    ) -> Result<Verification, EngineError> {
        let cin = cin.trim();
        let now = self.now();
        let lifecycle = self.lifecycle();
        let verification = self.run("verify_meal", |tx| {
            let mut user = tx
                .lock_user_by_cin(cin)?
                .ok_or_else(|| EngineError::NotFound(format!("no user with CIN {cin}")))?;
            require_active(&user)?;
            if verified_by != user.id && tx.find_user(verified_by)?.is_none() {
                return Err(EngineError::NotFound(format!("verifier {verified_by}")));
            }

            let today = lifecycle.local_date(now);
            if date != today {
                return Err(EngineError::BadRequest(format!(
                    "meals can only be verified on their own day ({date} is not {today})"
                )));
            }
            if !lifecycle.within_verification(meal_time, now) {
                return Err(EngineError::BadRequest(format!(
                    "{meal_time} is not being served at this time"
                )));
            }

            let slot = MealSlot::new(date, meal_time);
            let row = tx
                .lock_slot(user.id, slot)?
                .filter(|row| row.status == MealStatus::Scheduled)
                .ok_or_else(|| EngineError::NotFound(format!("no scheduled meal on {slot} for {cin}")))?;
            if lifecycle.is_overdue(row.meal_time, row.scheduled_at, now) {
                return Err(EngineError::BadRequest(format!("meal on {slot} has expired")));
            }

            let redeemed = row.transitioned(MealStatus::Redeemed, now)?;
            tx.update_schedule(&redeemed)?;
            let outcome = apply_in(tx, &mut user, TransactionType::MealRedemption, 0, verified_by, now)?;
            Ok(Verification {
                schedule: redeemed,
                transaction: outcome.entry,
                student: StudentInfo {
                    id: user.id,
                    cin: user.cin.clone(),
                    role: user.role,
                    balance: user.balance,
                },
            })
        })?;

        #[cfg(feature = "metrics")]
        METRICS.record_redeemed("verification");
        log::info!(
            "verified {} for {} by {verified_by}",
            verification.schedule.slot(),
            verification.student.cin
        );
        Ok(verification)
    }

    /// Redeem the user's latest booking served around now.
    ///
    /// # Errors
    ///
    /// `NotFound` when no scheduled meal falls within the redemption range,
    /// `Forbidden` for inactive accounts.
    pub fn redeem_meal(&self, user_id: Id) -> Result<MealSchedule, EngineError> {
        let now = self.now();
        let lifecycle = self.lifecycle();
        let redeemed = self.run("redeem_meal", |tx| {
            let mut user = lock_existing(tx, user_id)?;
            require_active(&user)?;
            let (from, to) = lifecycle.redeem_range(now);
            let row = tx
                .find_redeemable(user_id, from, to)?
                .ok_or_else(|| EngineError::NotFound(format!("no meal to redeem for user {user_id}")))?;
            if lifecycle.is_overdue(row.meal_time, row.scheduled_at, now) {
                return Err(EngineError::BadRequest(format!("meal on {} has expired", row.slot())));
            }
            let redeemed = row.transitioned(MealStatus::Redeemed, now)?;
            tx.update_schedule(&redeemed)?;
            apply_in(tx, &mut user, TransactionType::MealRedemption, 0, user_id, now)?;
            Ok(redeemed)
        })?;

        #[cfg(feature = "metrics")]
        METRICS.record_redeemed("self_service");
        log::info!("user {user_id} redeemed {}", redeemed.slot());
        Ok(redeemed)
    }
}
