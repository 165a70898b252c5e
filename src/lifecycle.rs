//! Meal schedule state machine: time windows and eligibility.
//!
//! Every window is measured against a slot's service timestamp, the slot date
//! at the configured clock time in the canteen's UTC offset. Functions here are
//! pure; orchestrators pass in the row they locked and the current instant.

use crate::config::{offset_from_minutes, parse_clock, window_minutes, MealsConfig};
use crate::domain::{MealSchedule, MealSlot, MealStatus, MealTime, SlotStatus};
use crate::error::EngineError;
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use config::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MealWindow {
    service: NaiveTime,
    grace: Duration,
    verify_from: NaiveTime,
    verify_until: NaiveTime,
}

impl MealWindow {
    fn from_config(meals: &MealsConfig, meal_time: MealTime) -> Result<Self, ConfigError> {
        let meal = meals.for_meal(meal_time);
        Ok(Self {
            service: parse_clock("service_time", &meal.service_time)?,
            grace: window_minutes("grace_minutes", meal.grace_minutes)?,
            verify_from: parse_clock("verify_from", &meal.verify_from)?,
            verify_until: parse_clock("verify_until", &meal.verify_until)?,
        })
    }
}

/// Resolved lifecycle rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lifecycle {
    offset: FixedOffset,
    lunch: MealWindow,
    dinner: MealWindow,
    refund_threshold: Duration,
    redeem_before: Duration,
    redeem_after: Duration,
}

impl Lifecycle {
    /// # Errors
    ///
    /// Returns `ConfigError` for unparseable clock times or an out-of-range offset.
    pub fn from_config(meals: &MealsConfig) -> Result<Self, ConfigError> {
        let offset = offset_from_minutes(meals.utc_offset_minutes).ok_or_else(|| {
            ConfigError::Message(format!(
                "utc_offset_minutes out of range: {}",
                meals.utc_offset_minutes
            ))
        })?;
        Ok(Self {
            offset,
            lunch: MealWindow::from_config(meals, MealTime::Lunch)?,
            dinner: MealWindow::from_config(meals, MealTime::Dinner)?,
            refund_threshold: window_minutes("refund_threshold_minutes", meals.refund_threshold_minutes)?,
            redeem_before: window_minutes("redeem_before_minutes", meals.redeem_before_minutes)?,
            redeem_after: window_minutes("redeem_after_minutes", meals.redeem_after_minutes)?,
        })
    }

    fn window(&self, meal_time: MealTime) -> &MealWindow {
        match meal_time {
            MealTime::Lunch => &self.lunch,
            MealTime::Dinner => &self.dinner,
        }
    }

    /// Service timestamp of `slot`.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::BadRequest` if the local time cannot be represented.
    pub fn service_at(&self, slot: MealSlot) -> Result<DateTime<Utc>, EngineError> {
        let local = slot.date.and_time(self.window(slot.meal_time).service);
        self.offset
            .from_local_datetime(&local)
            .single()
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| EngineError::BadRequest(format!("no service time for {slot}")))
    }

    /// Service timestamp plus the meal's grace period.
    pub fn deadline(&self, meal_time: MealTime, service_at: DateTime<Utc>) -> DateTime<Utc> {
        service_at + self.window(meal_time).grace
    }

    pub fn is_overdue(&self, meal_time: MealTime, service_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now >= self.deadline(meal_time, service_at)
    }

    /// Rows of `meal_time` served at or before this instant are overdue at `now`.
    pub fn overdue_cutoff(&self, meal_time: MealTime, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.window(meal_time).grace
    }

    /// Status a reader should see for a row, expiring overdue `scheduled` rows.
    pub fn effective_status(&self, schedule: &MealSchedule, now: DateTime<Utc>) -> SlotStatus {
        if schedule.status == MealStatus::Scheduled
            && self.is_overdue(schedule.meal_time, schedule.scheduled_at, now)
        {
            return SlotStatus::Expired;
        }
        schedule.status.into()
    }

    /// Status of a slot that may not have a row yet.
    ///
    /// # Errors
    ///
    /// Propagates [`Lifecycle::service_at`] failures for rowless slots.
    pub fn slot_status(
        &self,
        slot: MealSlot,
        row: Option<&MealSchedule>,
        now: DateTime<Utc>,
    ) -> Result<SlotStatus, EngineError> {
        match row {
            Some(schedule) => Ok(self.effective_status(schedule, now)),
            None => {
                let service_at = self.service_at(slot)?;
                if self.is_overdue(slot.meal_time, service_at, now) {
                    Ok(SlotStatus::Expired)
                } else {
                    Ok(SlotStatus::NotCreated)
                }
            }
        }
    }

    pub fn can_schedule(&self, status: SlotStatus, slot: MealSlot, service_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        matches!(
            status,
            SlotStatus::NotCreated | SlotStatus::Cancelled | SlotStatus::Refunded
        ) && !self.is_overdue(slot.meal_time, service_at, now)
    }

    /// Why `slot` cannot be scheduled, if it cannot.
    ///
    /// # Errors
    ///
    /// `Conflict` when already scheduled, `BadRequest` for served or past slots.
    pub fn check_schedulable(
        &self,
        status: SlotStatus,
        slot: MealSlot,
        service_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        if self.can_schedule(status, slot, service_at, now) {
            return Ok(());
        }
        match status {
            SlotStatus::Scheduled if !self.is_overdue(slot.meal_time, service_at, now) => {
                Err(EngineError::Conflict(format!("{slot} is already scheduled")))
            }
            SlotStatus::Redeemed => Err(EngineError::BadRequest(format!(
                "{slot} has already been served"
            ))),
            _ => Err(EngineError::BadRequest(format!(
                "{slot} can no longer be scheduled"
            ))),
        }
    }

    pub fn can_cancel(&self, schedule: &MealSchedule, now: DateTime<Utc>) -> bool {
        schedule.status == MealStatus::Scheduled
            && !self.is_overdue(schedule.meal_time, schedule.scheduled_at, now)
    }

    /// Why `schedule` cannot be cancelled, if it cannot.
    ///
    /// # Errors
    ///
    /// `BadRequest` naming the blocking state.
    pub fn check_cancellable(&self, schedule: &MealSchedule, now: DateTime<Utc>) -> Result<(), EngineError> {
        if self.can_cancel(schedule, now) {
            return Ok(());
        }
        let reason = match self.effective_status(schedule, now) {
            SlotStatus::Cancelled | SlotStatus::Refunded => "is already cancelled",
            SlotStatus::Redeemed | SlotStatus::Expired => "cannot be cancelled: meal already served or expired",
            _ => "cannot be cancelled",
        };
        Err(EngineError::BadRequest(format!(
            "meal {} on {} {reason}",
            schedule.id,
            schedule.slot()
        )))
    }

    /// `Refunded` when cancelled more than the refund threshold ahead of service.
    pub fn cancel_outcome(&self, service_at: DateTime<Utc>, now: DateTime<Utc>) -> MealStatus {
        if service_at - now > self.refund_threshold {
            MealStatus::Refunded
        } else {
            MealStatus::Cancelled
        }
    }

    /// Calendar date at the canteen for `now`.
    pub fn local_date(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.offset).date_naive()
    }

    /// Whether `now` falls in `[verify_from, verify_until)` for `meal_time`.
    pub fn within_verification(&self, meal_time: MealTime, now: DateTime<Utc>) -> bool {
        let window = self.window(meal_time);
        let clock = now.with_timezone(&self.offset).time();
        window.verify_from <= clock && clock < window.verify_until
    }

    /// Service timestamps a self-service redemption at `now` may claim.
    pub fn redeem_range(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        (now - self.redeem_before, now + self.redeem_after)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Id, StatusHistory};

    fn lifecycle() -> Lifecycle {
        Lifecycle::from_config(&MealsConfig::default()).unwrap()
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
    }

    /// `hh:mm` canteen local time (UTC+1) on `day()`.
    fn local(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, h - 1, m, 0).unwrap()
    }

    fn scheduled(meal_time: MealTime, lc: &Lifecycle) -> MealSchedule {
        let slot = MealSlot::new(day(), meal_time);
        let service_at = lc.service_at(slot).unwrap();
        MealSchedule {
            id: Id::new_v4(),
            user_id: Id::new_v4(),
            meal_time,
            scheduled_date: day(),
            scheduled_at: service_at,
            status: MealStatus::Scheduled,
            status_history: StatusHistory::starting(MealStatus::Scheduled, local(8, 0)),
            amount_paid: 200,
            created_at: local(8, 0),
            updated_at: local(8, 0),
        }
    }

    #[test]
    fn test_service_at_uses_configured_offset() {
        let lc = lifecycle();
        let at = lc.service_at(MealSlot::new(day(), MealTime::Lunch)).unwrap();
        assert_eq!(at, Utc.with_ymd_and_hms(2026, 3, 2, 11, 0, 0).unwrap());
        let at = lc.service_at(MealSlot::new(day(), MealTime::Dinner)).unwrap();
        assert_eq!(at, Utc.with_ymd_and_hms(2026, 3, 2, 18, 0, 0).unwrap());
    }

    #[test]
    fn test_grace_differs_per_meal() {
        let lc = lifecycle();
        let lunch = MealSlot::new(day(), MealTime::Lunch);
        let dinner = MealSlot::new(day(), MealTime::Dinner);
        let lunch_at = lc.service_at(lunch).unwrap();
        let dinner_at = lc.service_at(dinner).unwrap();

        // Lunch at 12:00 with two hours of grace.
        assert!(lc.can_schedule(SlotStatus::NotCreated, lunch, lunch_at, local(13, 59)));
        assert!(!lc.can_schedule(SlotStatus::NotCreated, lunch, lunch_at, local(14, 0)));
        // Dinner at 19:00 with one hour.
        assert!(lc.can_schedule(SlotStatus::NotCreated, dinner, dinner_at, local(19, 59)));
        assert!(!lc.can_schedule(SlotStatus::NotCreated, dinner, dinner_at, local(20, 0)));
    }

    #[test]
    fn test_can_schedule_only_from_rebookable_states() {
        let lc = lifecycle();
        let slot = MealSlot::new(day(), MealTime::Dinner);
        let at = lc.service_at(slot).unwrap();
        let now = local(9, 0);
        assert!(lc.can_schedule(SlotStatus::NotCreated, slot, at, now));
        assert!(lc.can_schedule(SlotStatus::Cancelled, slot, at, now));
        assert!(lc.can_schedule(SlotStatus::Refunded, slot, at, now));
        assert!(!lc.can_schedule(SlotStatus::Scheduled, slot, at, now));
        assert!(!lc.can_schedule(SlotStatus::Redeemed, slot, at, now));
        assert!(!lc.can_schedule(SlotStatus::Expired, slot, at, now));
    }

    #[test]
    fn test_check_schedulable_error_kinds() {
        let lc = lifecycle();
        let slot = MealSlot::new(day(), MealTime::Lunch);
        let at = lc.service_at(slot).unwrap();
        let now = local(9, 0);
        assert!(matches!(
            lc.check_schedulable(SlotStatus::Scheduled, slot, at, now),
            Err(EngineError::Conflict(_))
        ));
        assert!(matches!(
            lc.check_schedulable(SlotStatus::Redeemed, slot, at, now),
            Err(EngineError::BadRequest(_))
        ));
        assert!(matches!(
            lc.check_schedulable(SlotStatus::NotCreated, slot, at, local(15, 0)),
            Err(EngineError::BadRequest(_))
        ));
    }

    #[test]
    fn test_cancel_outcome_boundary() {
        let lc = lifecycle();
        let service_at = local(12, 0);
        let three_hours = Duration::hours(3);
        let one_second = Duration::seconds(1);

        assert_eq!(
            lc.cancel_outcome(service_at, service_at - three_hours + one_second),
            MealStatus::Cancelled
        );
        assert_eq!(
            lc.cancel_outcome(service_at, service_at - three_hours),
            MealStatus::Cancelled
        );
        assert_eq!(
            lc.cancel_outcome(service_at, service_at - three_hours - one_second),
            MealStatus::Refunded
        );
    }

    #[test]
    fn test_effective_status_expires_overdue_rows_only_when_scheduled() {
        let lc = lifecycle();
        let row = scheduled(MealTime::Lunch, &lc);
        assert_eq!(lc.effective_status(&row, local(13, 0)), SlotStatus::Scheduled);
        assert_eq!(lc.effective_status(&row, local(14, 0)), SlotStatus::Expired);

        let redeemed = row.transitioned(MealStatus::Redeemed, local(12, 5)).unwrap();
        assert_eq!(lc.effective_status(&redeemed, local(18, 0)), SlotStatus::Redeemed);
    }

    #[test]
    fn test_slot_status_for_missing_rows() {
        let lc = lifecycle();
        let slot = MealSlot::new(day(), MealTime::Lunch);
        assert_eq!(lc.slot_status(slot, None, local(9, 0)).unwrap(), SlotStatus::NotCreated);
        assert_eq!(lc.slot_status(slot, None, local(15, 0)).unwrap(), SlotStatus::Expired);
    }

    #[test]
    fn test_check_cancellable_messages() {
        let lc = lifecycle();
        let row = scheduled(MealTime::Dinner, &lc);
        assert!(lc.check_cancellable(&row, local(10, 0)).is_ok());

        let cancelled = row.transitioned(MealStatus::Cancelled, local(17, 0)).unwrap();
        let err = lc.check_cancellable(&cancelled, local(17, 30)).unwrap_err();
        assert!(err.to_string().contains("already cancelled"));

        let err = lc.check_cancellable(&row, local(20, 0)).unwrap_err();
        assert!(err.to_string().contains("served or expired"));
    }

    #[test]
    fn test_verification_window_is_half_open() {
        let lc = lifecycle();
        assert!(!lc.within_verification(MealTime::Lunch, local(10, 59)));
        assert!(lc.within_verification(MealTime::Lunch, local(11, 0)));
        assert!(lc.within_verification(MealTime::Lunch, local(13, 59)));
        assert!(!lc.within_verification(MealTime::Lunch, local(14, 0)));
        assert!(!lc.within_verification(MealTime::Dinner, local(12, 0)));
        assert!(lc.within_verification(MealTime::Dinner, local(18, 30)));
    }

    #[test]
    fn test_local_date_crosses_midnight_with_offset() {
        let lc = lifecycle();
        let late_utc = Utc.with_ymd_and_hms(2026, 3, 1, 23, 30, 0).unwrap();
        assert_eq!(lc.local_date(late_utc), day());
    }

    #[test]
    fn test_redeem_range() {
        let lc = lifecycle();
        let now = local(12, 0);
        let (from, to) = lc.redeem_range(now);
        assert_eq!(from, now - Duration::minutes(30));
        assert_eq!(to, now + Duration::hours(3));
    }

    #[test]
    fn test_out_of_range_config_is_an_error_not_a_panic() {
        let mut meals = MealsConfig::default();
        meals.dinner.grace_minutes = i64::MAX;
        assert!(Lifecycle::from_config(&meals).is_err());

        let mut meals = MealsConfig::default();
        meals.utc_offset_minutes = i32::MAX;
        assert!(Lifecycle::from_config(&meals).is_err());
    }
}
