use super::Id;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Business event recorded by a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    BalanceRecharge,
    MealSchedule,
    Refund,
    MealRedemption,
    BalanceAdjustment,
}

impl TransactionType {
    pub const ALL: [TransactionType; 5] = [
        TransactionType::BalanceRecharge,
        TransactionType::MealSchedule,
        TransactionType::Refund,
        TransactionType::MealRedemption,
        TransactionType::BalanceAdjustment,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TransactionType::BalanceRecharge => "balance_recharge",
            TransactionType::MealSchedule => "meal_schedule",
            TransactionType::Refund => "refund",
            TransactionType::MealRedemption => "meal_redemption",
            TransactionType::BalanceAdjustment => "balance_adjustment",
        }
    }

    pub fn from_name(name: &str) -> Option<TransactionType> {
        TransactionType::ALL
            .into_iter()
            .find(|t| t.as_str() == name)
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TransactionType::from_name(s).ok_or_else(|| format!("unknown transaction type '{s}'"))
    }
}

/// Immutable ledger row. `amount` is already signed by the type policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Id,
    pub user_id: Id,
    pub transaction_type: TransactionType,
    pub amount: i64,
    pub processed_by: Id,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLedgerEntry {
    pub user_id: Id,
    pub transaction_type: TransactionType,
    pub amount: i64,
    pub processed_by: Id,
    pub created_at: DateTime<Utc>,
}
