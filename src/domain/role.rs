//! Account roles.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Role of an account holder.
///
/// Names are the wire/storage form; numeric codes exist only for importing
/// legacy exports and go through [`Role::from_code`] / [`Role::code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    Admin,
    PaymentStaff,
    VerificationStaff,
    Student,
    Teacher,
    NormalUser,
}

/// Explicit name and code table, one row per role.
const ROLE_TABLE: [(Role, &str, u8); 6] = [
    (Role::Admin, "admin", 0),
    (Role::PaymentStaff, "paymentStaff", 1),
    (Role::VerificationStaff, "verificationStaff", 2),
    (Role::Student, "student", 3),
    (Role::Teacher, "teacher", 4),
    (Role::NormalUser, "normalUser", 5),
];

impl Role {
    pub const ALL: [Role; 6] = [
        Role::Admin,
        Role::PaymentStaff,
        Role::VerificationStaff,
        Role::Student,
        Role::Teacher,
        Role::NormalUser,
    ];

    pub fn as_str(self) -> &'static str {
        ROLE_TABLE
            .iter()
            .find(|(role, _, _)| *role == self)
            .map_or("", |(_, name, _)| name)
    }

    pub fn code(self) -> u8 {
        ROLE_TABLE
            .iter()
            .find(|(role, _, _)| *role == self)
            .map_or(u8::MAX, |(_, _, code)| *code)
    }

    pub fn from_name(name: &str) -> Option<Role> {
        ROLE_TABLE
            .iter()
            .find(|(_, n, _)| *n == name)
            .map(|(role, _, _)| *role)
    }

    pub fn from_code(code: u8) -> Option<Role> {
        ROLE_TABLE
            .iter()
            .find(|(_, _, c)| *c == code)
            .map(|(role, _, _)| *role)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::from_name(s).ok_or_else(|| format!("unknown role '{s}'"))
    }
}
