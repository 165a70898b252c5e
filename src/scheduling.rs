//! Scheduling and cancellation orchestrators plus the calendar read paths.

use crate::domain::{
    Id, MealSchedule, MealSlot, MealStatus, MealTime, NewMealSchedule, SlotStatus, TransactionType,
    User,
};
use crate::engine::Engine;
use crate::error::EngineError;
use crate::ledger::{apply_in, lock_existing, require_active};
use crate::store::{ScheduleQuery, StoreTx};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[cfg(feature = "metrics")]
use crate::metrics::METRICS;

/// Longest range the slot board renders in one call.
const MAX_BOARD_DAYS: i64 = 62;

/// Filters for [`Engine::get_user_meals`]. `status` matches the effective status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MealFilter {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub meal_time: Option<MealTime>,
    pub status: Option<MealStatus>,
}

/// One calendar cell, with or without a stored row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotView {
    pub slot: MealSlot,
    pub status: SlotStatus,
    pub schedule: Option<MealSchedule>,
}

fn distinct_slots(slots: &[MealSlot]) -> Result<(), EngineError> {
    if slots.is_empty() {
        return Err(EngineError::BadRequest("no meals requested".to_string()));
    }
    let mut seen = BTreeSet::new();
    for slot in slots {
        if !seen.insert(*slot) {
            return Err(EngineError::BadRequest(format!("{slot} is requested twice")));
        }
    }
    Ok(())
}

impl Engine {
    /// Book one slot for `user_id`, charging the role's meal cost.
    ///
    /// # Errors
    ///
    /// `NotFound`, `Forbidden` for inactive accounts, `InsufficientBalance`,
    /// `Conflict` when the slot is already scheduled, `BadRequest` for served
    /// or past slots.
    pub fn schedule_meal(&self, user_id: Id, meal_time: MealTime, date: NaiveDate) -> Result<MealSchedule, EngineError> {
        let mut booked = self.schedule_many_meals(user_id, &[MealSlot::new(date, meal_time)])?;
        booked
            .pop()
            .ok_or_else(|| EngineError::Internal("booking produced no schedule".to_string()))
    }

    /// Book several slots at once. Either every slot is booked or none is.
    ///
    /// The balance check uses the combined cost of the batch.
    pub fn schedule_many_meals(&self, user_id: Id, slots: &[MealSlot]) -> Result<Vec<MealSchedule>, EngineError> {
        distinct_slots(slots)?;
        let now = self.now();
        let booked = self.run("schedule_meals", |tx| self.book(tx, user_id, slots, now))?;

        #[cfg(feature = "metrics")]
        METRICS.record_scheduled(booked.len() as u64);
        for schedule in &booked {
            log::info!(
                "scheduled {} for user {user_id} (meal {}, paid {})",
                schedule.slot(),
                schedule.id,
                schedule.amount_paid
            );
        }
        Ok(booked)
    }

    fn book(
        &self,
        tx: &mut dyn StoreTx,
        user_id: Id,
        slots: &[MealSlot],
        now: DateTime<Utc>,
    ) -> Result<Vec<MealSchedule>, EngineError> {
        let mut user = lock_existing(tx, user_id)?;
        require_active(&user)?;
        let pricing = self.pricing_for(user.role);
        self.check_affordable(&user, pricing.meal_cost, slots.len(), pricing.overdraft_allowance())?;

        // Validate every slot before the first write.
        let mut plan = Vec::with_capacity(slots.len());
        for &slot in slots {
            let service_at = self.lifecycle().service_at(slot)?;
            let existing = tx.lock_slot(user_id, slot)?;
            let status = self.lifecycle().slot_status(slot, existing.as_ref(), now)?;
            self.lifecycle().check_schedulable(status, slot, service_at, now)?;
            plan.push((slot, service_at, existing));
        }

        let mut booked = Vec::with_capacity(plan.len());
        for (slot, service_at, existing) in plan {
            let schedule = match existing {
                Some(row) => {
                    let mut rebooked = row.transitioned(MealStatus::Scheduled, now)?;
                    rebooked.amount_paid = pricing.meal_cost;
                    tx.update_schedule(&rebooked)?;
                    rebooked
                }
                None => tx.insert_schedule(&NewMealSchedule {
                    user_id,
                    meal_time: slot.meal_time,
                    scheduled_date: slot.date,
                    scheduled_at: service_at,
                    amount_paid: pricing.meal_cost,
                    created_at: now,
                })?,
            };
            apply_in(tx, &mut user, TransactionType::MealSchedule, pricing.meal_cost, user_id, now)?;
            booked.push(schedule);
        }
        Ok(booked)
    }

    /// Reject when `count` meals would push the balance past the allowance.
    fn check_affordable(&self, user: &User, meal_cost: i64, count: usize, allowance: i64) -> Result<(), EngineError> {
        let required = i64::try_from(count)
            .ok()
            .and_then(|n| meal_cost.checked_mul(n))
            .ok_or_else(|| EngineError::BadRequest(format!("{count} meals is too many")))?;
        if user.balance < required.saturating_sub(allowance) {
            return Err(EngineError::InsufficientBalance {
                balance: user.balance,
                required,
                allowance,
            });
        }
        Ok(())
    }

    /// Cancel a scheduled meal, refunding it when far enough ahead of service.
    ///
    /// # Errors
    ///
    /// `NotFound` when the meal is not the user's, `BadRequest` when it is
    /// already cancelled, served or expired.
    pub fn cancel_meal(&self, meal_id: Id, user_id: Id) -> Result<MealSchedule, EngineError> {
        let now = self.now();
        let cancelled = self.run("cancel_meal", |tx| {
            let mut user = lock_existing(tx, user_id)?;
            let row = tx
                .lock_schedule(meal_id)?
                .filter(|row| row.user_id == user_id)
                .ok_or_else(|| EngineError::NotFound(format!("meal {meal_id} for user {user_id}")))?;
            self.cancel_row(tx, &mut user, row, now)
        })?;
        self.log_cancelled(&cancelled);
        Ok(cancelled)
    }

    /// Cancel several of the user's slots. Either all are cancelled or none is.
    pub fn cancel_many_meals(&self, user_id: Id, slots: &[MealSlot]) -> Result<Vec<MealSchedule>, EngineError> {
        distinct_slots(slots)?;
        let now = self.now();
        let cancelled = self.run("cancel_meals", |tx| {
            let mut user = lock_existing(tx, user_id)?;
            let mut rows = Vec::with_capacity(slots.len());
            for &slot in slots {
                let row = tx
                    .lock_slot(user_id, slot)?
                    .ok_or_else(|| EngineError::NotFound(format!("no meal on {slot} for user {user_id}")))?;
                self.lifecycle().check_cancellable(&row, now)?;
                rows.push(row);
            }
            rows.into_iter()
                .map(|row| self.cancel_row(tx, &mut user, row, now))
                .collect::<Result<Vec<_>, _>>()
        })?;
        for schedule in &cancelled {
            self.log_cancelled(schedule);
        }
        Ok(cancelled)
    }

    fn cancel_row(
        &self,
        tx: &mut dyn StoreTx,
        user: &mut User,
        row: MealSchedule,
        now: DateTime<Utc>,
    ) -> Result<MealSchedule, EngineError> {
        self.lifecycle().check_cancellable(&row, now)?;
        let outcome = self.lifecycle().cancel_outcome(row.scheduled_at, now);
        let cancelled = row.transitioned(outcome, now)?;
        tx.update_schedule(&cancelled)?;
        if outcome == MealStatus::Refunded && cancelled.amount_paid > 0 {
            let owner = user.id;
            apply_in(tx, user, TransactionType::Refund, cancelled.amount_paid, owner, now)?;
        }
        Ok(cancelled)
    }

    fn log_cancelled(&self, schedule: &MealSchedule) {
        #[cfg(feature = "metrics")]
        METRICS.record_cancelled(schedule.status.as_str());
        log::info!(
            "meal {} on {} for user {} is now {}",
            schedule.id,
            schedule.slot(),
            schedule.user_id,
            schedule.status
        );
    }

    /// The user's schedule rows, with overdue `scheduled` rows shown as `expired`.
    pub fn get_user_meals(&self, user_id: Id, filter: &MealFilter) -> Result<Vec<MealSchedule>, EngineError> {
        let now = self.now();
        let query = ScheduleQuery {
            from: filter.from,
            to: filter.to,
            meal_time: filter.meal_time,
        };
        let rows = self.run("get_user_meals", |tx| {
            if tx.find_user(user_id)?.is_none() {
                return Err(EngineError::NotFound(format!("user {user_id}")));
            }
            tx.list_schedules(user_id, &query)
        })?;

        let meals: Vec<MealSchedule> = rows
            .into_iter()
            .map(|mut row| {
                if self.lifecycle().effective_status(&row, now) == SlotStatus::Expired {
                    row.status = MealStatus::Expired;
                }
                row
            })
            .filter(|row| filter.status.map_or(true, |s| row.status == s))
            .collect();
        log::debug!("{} meals for user {user_id}", meals.len());
        Ok(meals)
    }

    /// Every lunch and dinner slot in `[from, to]`, including never-booked ones.
    ///
    /// # Errors
    ///
    /// `BadRequest` for a reversed or overly long range.
    pub fn get_slot_board(&self, user_id: Id, from: NaiveDate, to: NaiveDate) -> Result<Vec<SlotView>, EngineError> {
        if to < from {
            return Err(EngineError::BadRequest(format!("{to} is before {from}")));
        }
        if (to - from).num_days() >= MAX_BOARD_DAYS {
            return Err(EngineError::BadRequest(format!(
                "slot board spans at most {MAX_BOARD_DAYS} days"
            )));
        }
        let now = self.now();
        let query = ScheduleQuery {
            from: Some(from),
            to: Some(to),
            meal_time: None,
        };
        let mut rows = self.run("get_slot_board", |tx| {
            if tx.find_user(user_id)?.is_none() {
                return Err(EngineError::NotFound(format!("user {user_id}")));
            }
            tx.list_schedules(user_id, &query)
        })?;

        let mut board = Vec::new();
        for date in from.iter_days().take_while(|d| *d <= to) {
            for meal_time in MealTime::ALL {
                let slot = MealSlot::new(date, meal_time);
                let schedule = rows
                    .iter()
                    .position(|row| row.slot() == slot)
                    .map(|i| rows.swap_remove(i));
                let status = self.lifecycle().slot_status(slot, schedule.as_ref(), now)?;
                board.push(SlotView {
                    slot,
                    status,
                    schedule,
                });
            }
        }
        Ok(board)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Role;
    use crate::test_helpers::{harness, local, today, tomorrow};
    use chrono::Duration;
    use std::sync::Barrier;

    #[test]
    fn test_schedule_cancel_rebook_scenario() {
        let h = harness();
        let student = h.student(1_000);

        let booked = h.engine.schedule_meal(student.id, MealTime::Lunch, tomorrow()).unwrap();
        assert_eq!(booked.status, MealStatus::Scheduled);
        assert_eq!(h.balance(&student), 800);
        let charges: Vec<_> = h
            .store
            .entries()
            .into_iter()
            .filter(|e| e.user_id == student.id && e.transaction_type == TransactionType::MealSchedule)
            .collect();
        assert_eq!(charges.len(), 1);
        assert_eq!(charges[0].amount, -200);

        // Four hours ahead of service.
        h.set_local(tomorrow(), 8, 0);
        let cancelled = h.engine.cancel_meal(booked.id, student.id).unwrap();
        assert_eq!(cancelled.status, MealStatus::Refunded);
        assert_eq!(h.balance(&student), 1_000);
        let refunds: Vec<_> = h
            .store
            .entries()
            .into_iter()
            .filter(|e| e.transaction_type == TransactionType::Refund)
            .collect();
        assert_eq!(refunds.len(), 1);
        assert_eq!(refunds[0].amount, 200);

        let rebooked = h.engine.schedule_meal(student.id, MealTime::Lunch, tomorrow()).unwrap();
        assert_eq!(rebooked.id, booked.id);
        assert_eq!(h.balance(&student), 800);
        let statuses: Vec<_> = rebooked.status_history.entries().iter().map(|e| e.status).collect();
        assert_eq!(
            statuses,
            vec![MealStatus::Scheduled, MealStatus::Refunded, MealStatus::Scheduled]
        );
        assert_eq!(h.store.schedules().len(), 1);
        h.assert_consistent();
    }

    #[test]
    fn test_refund_boundary_around_three_hours() {
        let h = harness();
        let student = h.student(1_000);
        let lunch = h.engine.schedule_meal(student.id, MealTime::Lunch, tomorrow()).unwrap();
        let dinner = h.engine.schedule_meal(student.id, MealTime::Dinner, tomorrow()).unwrap();
        assert_eq!(h.balance(&student), 600);

        h.clock.set(lunch.scheduled_at - Duration::hours(3) + Duration::seconds(1));
        let cancelled = h.engine.cancel_meal(lunch.id, student.id).unwrap();
        assert_eq!(cancelled.status, MealStatus::Cancelled);
        assert_eq!(h.balance(&student), 600);

        h.clock.set(dinner.scheduled_at - Duration::hours(3) - Duration::seconds(1));
        let refunded = h.engine.cancel_meal(dinner.id, student.id).unwrap();
        assert_eq!(refunded.status, MealStatus::Refunded);
        assert_eq!(h.balance(&student), 800);
        h.assert_consistent();
    }

    #[test]
    fn test_overdraft_boundary() {
        let h = harness();
        let to_minus_800 = h.user_with("S-600", Role::Student, -600);
        let booked = h.engine.schedule_meal(to_minus_800.id, MealTime::Lunch, tomorrow());
        assert!(booked.is_ok());
        assert_eq!(h.balance(&to_minus_800), -800);

        let at_limit = h.user_with("S-800", Role::Student, -800);
        h.engine.schedule_meal(at_limit.id, MealTime::Lunch, tomorrow()).unwrap();
        assert_eq!(h.balance(&at_limit), -1_000);
        let err = h
            .engine
            .schedule_meal(at_limit.id, MealTime::Dinner, tomorrow())
            .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientBalance { .. }));

        let past_limit = h.user_with("S-801", Role::Student, -801);
        let err = h
            .engine
            .schedule_meal(past_limit.id, MealTime::Lunch, tomorrow())
            .unwrap_err();
        assert!(err.is_bad_request());
        assert!(matches!(
            err,
            EngineError::InsufficientBalance {
                balance: -801,
                required: 200,
                allowance: 1_000
            }
        ));
        assert_eq!(h.balance(&past_limit), -801);
        h.assert_consistent();
    }

    #[test]
    fn test_concurrent_booking_of_one_slot() {
        let h = harness();
        let student = h.student(1_000);
        let barrier = Barrier::new(2);

        let book = || {
            barrier.wait();
            h.engine.schedule_meal(student.id, MealTime::Dinner, tomorrow())
        };
        let results = std::thread::scope(|s| {
            let first = s.spawn(book);
            let second = s.spawn(book);
            [first.join().unwrap(), second.join().unwrap()]
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(EngineError::Conflict(_))))
                .count(),
            1
        );
        assert_eq!(h.balance(&student), 800);
        assert_eq!(h.store.schedules().len(), 1);
        h.assert_consistent();
    }

    #[test]
    fn test_rebooking_a_cancelled_slot_reuses_the_row() {
        let h = harness();
        let student = h.student(1_000);
        let booked = h.engine.schedule_meal(student.id, MealTime::Lunch, today()).unwrap();
        h.set_local(today(), 10, 0);
        let cancelled = h.engine.cancel_meal(booked.id, student.id).unwrap();
        assert_eq!(cancelled.status, MealStatus::Cancelled);

        let rebooked = h.engine.schedule_meal(student.id, MealTime::Lunch, today()).unwrap();
        assert_eq!(rebooked.id, booked.id);
        assert_eq!(rebooked.status_history.len(), cancelled.status_history.len() + 1);
        assert_eq!(h.balance(&student), 600);
        h.assert_consistent();
    }

    #[test]
    fn test_batch_is_all_or_nothing() {
        let h = harness();
        let student = h.student(1_000);
        h.engine.schedule_meal(student.id, MealTime::Lunch, tomorrow()).unwrap();

        let err = h
            .engine
            .schedule_many_meals(
                student.id,
                &[
                    MealSlot::new(tomorrow(), MealTime::Dinner),
                    MealSlot::new(tomorrow(), MealTime::Lunch),
                ],
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
        assert_eq!(h.store.schedules().len(), 1);
        assert_eq!(h.balance(&student), 800);
        h.assert_consistent();
    }

    #[test]
    fn test_batch_checks_combined_cost() {
        let h = harness();
        let student = h.student(100);
        let week: Vec<MealSlot> = (1..=3)
            .flat_map(|d| {
                let date = today() + Duration::days(d);
                [MealSlot::new(date, MealTime::Lunch), MealSlot::new(date, MealTime::Dinner)]
            })
            .collect();

        let err = h.engine.schedule_many_meals(student.id, &week).unwrap_err();
        assert!(matches!(
            err,
            EngineError::InsufficientBalance { required: 1_200, .. }
        ));
        assert!(h.store.schedules().is_empty());

        let booked = h.engine.schedule_many_meals(student.id, &week[..5]).unwrap();
        assert_eq!(booked.len(), 5);
        assert_eq!(h.balance(&student), -900);
        h.assert_consistent();
    }

    #[test]
    fn test_schedule_rejections() {
        let h = harness();
        let student = h.student(1_000);

        h.set_local(today(), 15, 0);
        let err = h.engine.schedule_meal(student.id, MealTime::Lunch, today()).unwrap_err();
        assert!(matches!(err, EngineError::BadRequest(_)));

        let err = h
            .engine
            .schedule_meal(crate::domain::Id::new_v4(), MealTime::Lunch, tomorrow())
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));

        h.engine.deactivate_user(student.id).unwrap();
        let err = h.engine.schedule_meal(student.id, MealTime::Lunch, tomorrow()).unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));

        let err = h
            .engine
            .schedule_many_meals(
                student.id,
                &[
                    MealSlot::new(tomorrow(), MealTime::Lunch),
                    MealSlot::new(tomorrow(), MealTime::Lunch),
                ],
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::BadRequest(_)));
    }

    #[test]
    fn test_role_pricing_applies() {
        let h = harness();
        let teacher = h.user_with("T-1", Role::Teacher, 5_000);
        let booked = h.engine.schedule_meal(teacher.id, MealTime::Lunch, tomorrow()).unwrap();
        assert_eq!(booked.amount_paid, 2_000);
        assert_eq!(h.balance(&teacher), 3_000);

        // No overdraft for ordinary users.
        let visitor = h.user_with("N-1", Role::NormalUser, 2_999);
        let err = h.engine.schedule_meal(visitor.id, MealTime::Lunch, tomorrow()).unwrap_err();
        assert!(matches!(err, EngineError::InsufficientBalance { .. }));
    }

    #[test]
    fn test_cancel_rejections() {
        let h = harness();
        let student = h.student(1_000);
        let other = h.user_with("87654321", Role::Student, 1_000);
        let booked = h.engine.schedule_meal(student.id, MealTime::Lunch, today()).unwrap();

        let err = h.engine.cancel_meal(booked.id, other.id).unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));

        h.set_local(today(), 10, 0);
        h.engine.cancel_meal(booked.id, student.id).unwrap();
        let err = h.engine.cancel_meal(booked.id, student.id).unwrap_err();
        assert!(err.to_string().contains("already cancelled"));

        let dinner = h.engine.schedule_meal(student.id, MealTime::Dinner, today()).unwrap();
        h.set_local(today(), 20, 0);
        let err = h.engine.cancel_meal(dinner.id, student.id).unwrap_err();
        assert!(matches!(err, EngineError::BadRequest(_)));
        h.assert_consistent();
    }

    #[test]
    fn test_cancel_many_is_all_or_nothing() {
        let h = harness();
        let student = h.student(1_000);
        h.engine
            .schedule_many_meals(
                student.id,
                &[
                    MealSlot::new(tomorrow(), MealTime::Lunch),
                    MealSlot::new(tomorrow(), MealTime::Dinner),
                ],
            )
            .unwrap();
        assert_eq!(h.balance(&student), 600);

        let err = h
            .engine
            .cancel_many_meals(
                student.id,
                &[
                    MealSlot::new(tomorrow(), MealTime::Lunch),
                    MealSlot::new(today(), MealTime::Dinner),
                ],
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
        assert_eq!(h.balance(&student), 600);
        assert!(h.store.schedules().iter().all(|s| s.status == MealStatus::Scheduled));

        let cancelled = h
            .engine
            .cancel_many_meals(
                student.id,
                &[
                    MealSlot::new(tomorrow(), MealTime::Lunch),
                    MealSlot::new(tomorrow(), MealTime::Dinner),
                ],
            )
            .unwrap();
        assert!(cancelled.iter().all(|s| s.status == MealStatus::Refunded));
        assert_eq!(h.balance(&student), 1_000);
        h.assert_consistent();
    }

    #[test]
    fn test_storage_failure_rolls_back_everything() {
        let h = harness();
        let student = h.student(1_000);
        let entries_before = h.store.entries().len();

        h.store.fail_next_entry_insert();
        let err = h.engine.schedule_meal(student.id, MealTime::Lunch, tomorrow()).unwrap_err();
        assert!(matches!(err, EngineError::Internal(_)));
        assert!(h.store.schedules().is_empty());
        assert_eq!(h.store.entries().len(), entries_before);
        assert_eq!(h.balance(&student), 1_000);
        h.assert_consistent();
    }

    #[test]
    fn test_user_meals_show_lazy_expiry() {
        let h = harness();
        let student = h.student(1_000);
        h.engine.schedule_meal(student.id, MealTime::Lunch, today()).unwrap();
        h.engine.schedule_meal(student.id, MealTime::Dinner, today()).unwrap();

        h.set_local(today(), 14, 0);
        let meals = h.engine.get_user_meals(student.id, &MealFilter::default()).unwrap();
        assert_eq!(meals.len(), 2);
        assert_eq!(meals[0].status, MealStatus::Expired);
        assert_eq!(meals[1].status, MealStatus::Scheduled);
        // Stored state is untouched by reads.
        assert!(h.store.schedules().iter().all(|s| s.status == MealStatus::Scheduled));

        let filter = MealFilter {
            status: Some(MealStatus::Scheduled),
            ..MealFilter::default()
        };
        let meals = h.engine.get_user_meals(student.id, &filter).unwrap();
        assert_eq!(meals.len(), 1);
        assert_eq!(meals[0].meal_time, MealTime::Dinner);

        let filter = MealFilter {
            from: Some(tomorrow()),
            ..MealFilter::default()
        };
        assert!(h.engine.get_user_meals(student.id, &filter).unwrap().is_empty());
    }

    #[test]
    fn test_slot_board_fills_missing_slots() {
        let h = harness();
        let student = h.student(1_000);
        h.engine.schedule_meal(student.id, MealTime::Dinner, tomorrow()).unwrap();
        h.set_local(today(), 15, 0);

        let board = h.engine.get_slot_board(student.id, today(), tomorrow()).unwrap();
        let statuses: Vec<_> = board.iter().map(|v| (v.slot, v.status)).collect();
        assert_eq!(
            statuses,
            vec![
                (MealSlot::new(today(), MealTime::Lunch), SlotStatus::Expired),
                (MealSlot::new(today(), MealTime::Dinner), SlotStatus::NotCreated),
                (MealSlot::new(tomorrow(), MealTime::Lunch), SlotStatus::NotCreated),
                (MealSlot::new(tomorrow(), MealTime::Dinner), SlotStatus::Scheduled),
            ]
        );
        assert!(board[3].schedule.is_some());
        assert!(board[0].schedule.is_none());

        assert!(h.engine.get_slot_board(student.id, tomorrow(), today()).is_err());
        assert!(h
            .engine
            .get_slot_board(student.id, today(), today() + Duration::days(90))
            .is_err());
    }

    #[test]
    fn test_slot_board_stops_at_the_last_calendar_day() {
        let h = harness();
        let student = h.student(1_000);

        let board = h
            .engine
            .get_slot_board(student.id, NaiveDate::MAX, NaiveDate::MAX)
            .unwrap();
        assert_eq!(board.len(), 2);
        assert!(board.iter().all(|v| v.slot.date == NaiveDate::MAX));
        assert!(board.iter().all(|v| v.status == SlotStatus::NotCreated));
    }

    #[test]
    fn test_service_timestamp_is_stored() {
        let h = harness();
        let student = h.student(1_000);
        let booked = h.engine.schedule_meal(student.id, MealTime::Dinner, tomorrow()).unwrap();
        assert_eq!(booked.scheduled_at, local(tomorrow(), 19, 0));
    }
}
