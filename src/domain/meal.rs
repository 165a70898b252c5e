use super::Id;
use crate::error::EngineError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MealTime {
    Lunch,
    Dinner,
}

impl MealTime {
    pub const ALL: [MealTime; 2] = [MealTime::Lunch, MealTime::Dinner];

    pub fn as_str(self) -> &'static str {
        match self {
            MealTime::Lunch => "lunch",
            MealTime::Dinner => "dinner",
        }
    }

    pub fn from_name(name: &str) -> Option<MealTime> {
        MealTime::ALL.into_iter().find(|m| m.as_str() == name)
    }
}

impl fmt::Display for MealTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MealTime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MealTime::from_name(s).ok_or_else(|| format!("unknown meal time '{s}'"))
    }
}

/// Status of a persisted schedule row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MealStatus {
    Scheduled,
    Cancelled,
    Redeemed,
    Refunded,
    Expired,
}

impl MealStatus {
    pub const ALL: [MealStatus; 5] = [
        MealStatus::Scheduled,
        MealStatus::Cancelled,
        MealStatus::Redeemed,
        MealStatus::Refunded,
        MealStatus::Expired,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MealStatus::Scheduled => "scheduled",
            MealStatus::Cancelled => "cancelled",
            MealStatus::Redeemed => "redeemed",
            MealStatus::Refunded => "refunded",
            MealStatus::Expired => "expired",
        }
    }

    pub fn from_name(name: &str) -> Option<MealStatus> {
        MealStatus::ALL.into_iter().find(|s| s.as_str() == name)
    }

    /// `redeemed` and `expired` never leave their state.
    pub fn is_terminal(self) -> bool {
        matches!(self, MealStatus::Redeemed | MealStatus::Expired)
    }

    /// Edges of the lifecycle graph between stored states.
    pub fn can_transition_to(self, next: MealStatus) -> bool {
        use MealStatus::*;
        matches!(
            (self, next),
            (Scheduled, Redeemed)
                | (Scheduled, Cancelled)
                | (Scheduled, Refunded)
                | (Scheduled, Expired)
                | (Cancelled, Scheduled)
                | (Refunded, Scheduled)
        )
    }
}

impl fmt::Display for MealStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MealStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MealStatus::from_name(s).ok_or_else(|| format!("unknown meal status '{s}'"))
    }
}

/// Status of a calendar slot as seen by readers.
///
/// `NotCreated` is never stored: the read path produces it for slots without
/// a row. `Expired` may be stored or derived from an overdue `scheduled` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    NotCreated,
    Scheduled,
    Cancelled,
    Redeemed,
    Refunded,
    Expired,
}

impl From<MealStatus> for SlotStatus {
    fn from(status: MealStatus) -> Self {
        match status {
            MealStatus::Scheduled => SlotStatus::Scheduled,
            MealStatus::Cancelled => SlotStatus::Cancelled,
            MealStatus::Redeemed => SlotStatus::Redeemed,
            MealStatus::Refunded => SlotStatus::Refunded,
            MealStatus::Expired => SlotStatus::Expired,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub status: MealStatus,
    pub at: DateTime<Utc>,
}

/// Append-only log of the statuses a schedule row went through.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusHistory(Vec<StatusEntry>);

impl StatusHistory {
    pub fn starting(status: MealStatus, at: DateTime<Utc>) -> Self {
        Self(vec![StatusEntry { status, at }])
    }

    /// A new history with one more entry; `self` is left untouched.
    #[must_use]
    pub fn appended(&self, status: MealStatus, at: DateTime<Utc>) -> Self {
        let mut entries = Vec::with_capacity(self.0.len() + 1);
        entries.extend_from_slice(&self.0);
        entries.push(StatusEntry { status, at });
        Self(entries)
    }

    pub fn entries(&self) -> &[StatusEntry] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn last(&self) -> Option<&StatusEntry> {
        self.0.last()
    }
}

impl From<Vec<StatusEntry>> for StatusHistory {
    fn from(entries: Vec<StatusEntry>) -> Self {
        Self(entries)
    }
}

/// One (date, meal time) cell of a user's calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MealSlot {
    pub date: NaiveDate,
    pub meal_time: MealTime,
}

impl MealSlot {
    pub fn new(date: NaiveDate, meal_time: MealTime) -> Self {
        Self { date, meal_time }
    }
}

impl fmt::Display for MealSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.date, self.meal_time)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MealSchedule {
    pub id: Id,
    pub user_id: Id,
    pub meal_time: MealTime,
    pub scheduled_date: NaiveDate,
    /// Service timestamp: `scheduled_date` at the configured clock time.
    pub scheduled_at: DateTime<Utc>,
    pub status: MealStatus,
    pub status_history: StatusHistory,
    /// What the last scheduling charged; a refund returns exactly this.
    pub amount_paid: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MealSchedule {
    pub fn slot(&self) -> MealSlot {
        MealSlot::new(self.scheduled_date, self.meal_time)
    }

    /// The row after moving to `next`, with one history entry appended.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::BadRequest` when the lifecycle has no such edge.
    pub fn transitioned(&self, next: MealStatus, at: DateTime<Utc>) -> Result<MealSchedule, EngineError> {
        if !self.status.can_transition_to(next) {
            return Err(EngineError::BadRequest(format!(
                "meal {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        Ok(MealSchedule {
            status: next,
            status_history: self.status_history.appended(next, at),
            updated_at: at,
            ..self.clone()
        })
    }
}

/// Row to insert for a slot that has never been booked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMealSchedule {
    pub user_id: Id,
    pub meal_time: MealTime,
    pub scheduled_date: NaiveDate,
    pub scheduled_at: DateTime<Utc>,
    pub amount_paid: i64,
    pub created_at: DateTime<Utc>,
}
