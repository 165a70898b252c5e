//! Engine error taxonomy.

use crate::executor::DbError;
use crate::transaction::TransactionError;
#[cfg(test)]
use crate::transaction::TxState;
use thiserror::Error;

/// Coarse classification callers map onto their own status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Forbidden,
    Conflict,
    BadRequest,
    Internal,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("insufficient balance: balance {balance} cannot cover {required} with an overdraft allowance of {allowance}")]
    InsufficientBalance {
        balance: i64,
        required: i64,
        allowance: i64,
    },

    #[error("bad request: {0}")]
    BadRequest(String),

    /// Storage failure; the unit of work it happened in was rolled back.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::Forbidden(_) => ErrorKind::Forbidden,
            EngineError::Conflict(_) => ErrorKind::Conflict,
            EngineError::InsufficientBalance { .. } | EngineError::BadRequest(_) => {
                ErrorKind::BadRequest
            }
            EngineError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn is_bad_request(&self) -> bool {
        self.kind() == ErrorKind::BadRequest
    }

    /// Label used for rejection metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            EngineError::NotFound(_) => "not_found",
            EngineError::Forbidden(_) => "forbidden",
            EngineError::Conflict(_) => "conflict",
            EngineError::InsufficientBalance { .. } => "insufficient_balance",
            EngineError::BadRequest(_) => "bad_request",
            EngineError::Internal(_) => "internal",
        }
    }
}

impl From<DbError> for EngineError {
    fn from(err: DbError) -> Self {
        EngineError::Internal(err.to_string())
    }
}

impl From<TransactionError> for EngineError {
    fn from(err: TransactionError) -> Self {
        EngineError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_balance_is_a_bad_request() {
        let err = EngineError::InsufficientBalance {
            balance: -900,
            required: 200,
            allowance: 1000,
        };
        assert_eq!(err.kind(), ErrorKind::BadRequest);
        assert!(err.is_bad_request());
        assert_eq!(err.label(), "insufficient_balance");
        assert!(err.to_string().contains("-900"));
    }

    #[test]
    fn test_storage_errors_become_internal() {
        let err: EngineError = DbError::QueryError("deadlock".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(err.to_string().contains("deadlock"));

        let err: EngineError = TransactionError::Finished(TxState::Committed).into();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_kinds_are_distinguishable() {
        let kinds = [
            EngineError::NotFound("u".into()).kind(),
            EngineError::Forbidden("u".into()).kind(),
            EngineError::Conflict("u".into()).kind(),
            EngineError::BadRequest("u".into()).kind(),
            EngineError::Internal("u".into()).kind(),
        ];
        for (i, a) in kinds.iter().enumerate() {
            for b in &kinds[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
