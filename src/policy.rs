//! Transaction type policy.
//!
//! Turns the amount a caller supplies for a business event into the signed
//! amount stored on the ledger entry. Every type is additive: the new balance
//! is always `previous + signed`. `balance_adjustment` takes a signed delta;
//! callers holding a target balance go through [`adjustment_to_target`].

use crate::domain::TransactionType;
use crate::error::EngineError;

/// Signed ledger amount for `input` under `transaction_type`.
///
/// | type | accepted input | stored |
/// |---|---|---|
/// | `balance_recharge` | > 0 | `+input` |
/// | `refund` | > 0 | `+input` |
/// | `meal_schedule` | > 0 | `-input` |
/// | `meal_redemption` | 0 | `0` |
/// | `balance_adjustment` | ≠ 0 | `input` |
///
/// # Errors
///
/// Returns `EngineError::BadRequest` when `input` is outside the accepted range.
pub fn signed_amount(transaction_type: TransactionType, input: i64) -> Result<i64, EngineError> {
    match transaction_type {
        TransactionType::BalanceRecharge | TransactionType::Refund => {
            require_positive(transaction_type, input)?;
            Ok(input)
        }
        TransactionType::MealSchedule => {
            require_positive(transaction_type, input)?;
            Ok(-input)
        }
        TransactionType::MealRedemption => {
            if input != 0 {
                return Err(EngineError::BadRequest(format!(
                    "meal_redemption carries no amount, got {input}"
                )));
            }
            Ok(0)
        }
        TransactionType::BalanceAdjustment => {
            if input == 0 {
                return Err(EngineError::BadRequest(
                    "balance_adjustment delta cannot be zero".to_string(),
                ));
            }
            Ok(input)
        }
    }
}

fn require_positive(transaction_type: TransactionType, input: i64) -> Result<(), EngineError> {
    if input <= 0 {
        return Err(EngineError::BadRequest(format!(
            "{transaction_type} amount must be positive, got {input}"
        )));
    }
    Ok(())
}

/// Balance after applying an already signed amount.
///
/// # Errors
///
/// Returns `EngineError::BadRequest` if the sum overflows.
pub fn apply_signed(balance: i64, signed: i64) -> Result<i64, EngineError> {
    balance.checked_add(signed).ok_or_else(|| {
        EngineError::BadRequest(format!("balance {balance} cannot absorb {signed}"))
    })
}

/// Delta that moves `current` to `target`.
///
/// # Errors
///
/// Returns `EngineError::BadRequest` if the difference overflows.
pub fn adjustment_to_target(current: i64, target: i64) -> Result<i64, EngineError> {
    target.checked_sub(current).ok_or_else(|| {
        EngineError::BadRequest(format!("cannot adjust balance {current} to {target}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balance_recharge_is_positive() {
        assert_eq!(signed_amount(TransactionType::BalanceRecharge, 500).unwrap(), 500);
        assert!(signed_amount(TransactionType::BalanceRecharge, 0).is_err());
        assert!(signed_amount(TransactionType::BalanceRecharge, -5).is_err());
    }

    #[test]
    fn test_refund_is_positive() {
        assert_eq!(signed_amount(TransactionType::Refund, 200).unwrap(), 200);
        assert!(signed_amount(TransactionType::Refund, 0).is_err());
        assert!(signed_amount(TransactionType::Refund, -200).is_err());
    }

    #[test]
    fn test_meal_schedule_is_negated() {
        assert_eq!(signed_amount(TransactionType::MealSchedule, 200).unwrap(), -200);
        assert!(signed_amount(TransactionType::MealSchedule, 0).is_err());
        assert!(signed_amount(TransactionType::MealSchedule, -200).is_err());
    }

    #[test]
    fn test_meal_redemption_is_zero_only() {
        assert_eq!(signed_amount(TransactionType::MealRedemption, 0).unwrap(), 0);
        assert!(signed_amount(TransactionType::MealRedemption, 200).is_err());
    }

    #[test]
    fn test_balance_adjustment_is_a_signed_delta() {
        assert_eq!(signed_amount(TransactionType::BalanceAdjustment, -350).unwrap(), -350);
        assert_eq!(signed_amount(TransactionType::BalanceAdjustment, 350).unwrap(), 350);
        assert!(signed_amount(TransactionType::BalanceAdjustment, 0).is_err());
    }

    #[test]
    fn test_every_type_is_additive() {
        for t in TransactionType::ALL {
            let input = match t {
                TransactionType::MealRedemption => 0,
                _ => 100,
            };
            let signed = signed_amount(t, input).unwrap();
            assert_eq!(apply_signed(1_000, signed).unwrap(), 1_000 + signed);
        }
    }

    #[test]
    fn test_adjustment_to_target() {
        assert_eq!(adjustment_to_target(800, 1_000).unwrap(), 200);
        assert_eq!(adjustment_to_target(800, -200).unwrap(), -1_000);
        assert!(adjustment_to_target(i64::MIN, i64::MAX).is_err());
    }

    #[test]
    fn test_apply_signed_overflow() {
        assert!(apply_signed(i64::MAX, 1).is_err());
    }
}
