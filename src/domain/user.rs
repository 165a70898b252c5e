use super::{Id, Role};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An account holder and their prepaid balance in millimes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Id,
    /// Citizen/student identity number, unique per user.
    pub cin: String,
    pub role: Role,
    /// Only ever changed together with a ledger entry.
    pub balance: i64,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub cin: String,
    pub role: Role,
}
