use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use sha2::{Digest, Sha256};

use crate::services::ServiceError;

/// Digits after the point kept by the `NUMERIC(20, 8)` amount columns.
pub const LEDGER_SCALE: u32 = 8;

/// Amounts must stay below `10^12`, the integer range of `NUMERIC(20, 8)`.
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(3_567_587_328, 232, 0, false, 0);

/// Rounds like Postgres does when storing into an amount column.
pub fn round_amount(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(LEDGER_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// `amount * percent / 100`, rounded to the ledger scale.
pub fn percent_of(amount: Decimal, percent: Decimal) -> Decimal {
    round_amount(amount * percent / Decimal::ONE_HUNDRED)
}

/// Parses a user-typed amount. Both `,` and `.` work as the decimal point.
pub fn parse_amount(text: &str) -> Result<Decimal, ServiceError> {
    let normalized = text.trim().replace(',', ".");
    let amount = Decimal::from_str(&normalized)
        .map_err(|_| ServiceError::InvalidAmount(text.to_string()))?;

    validate_amount(amount)
}

/// Every amount that moves money must be positive and fit an amount column
/// exactly, so the store never rounds or overflows it.
pub fn validate_amount(amount: Decimal) -> Result<Decimal, ServiceError> {
    let amount = amount.normalize();

    if amount <= Decimal::ZERO || amount.scale() > LEDGER_SCALE || amount >= MAX_AMOUNT {
        return Err(ServiceError::InvalidAmount(amount.to_string()));
    }

    Ok(amount)
}

pub fn format_balance(balance: Decimal) -> String {
    if balance.is_zero() {
        return "0 $".to_string();
    }

    format!("{} $", balance.normalize())
}

pub fn hash_password(password: &str) -> String {
    format!("{:x}", Sha256::digest(password.as_bytes()))
}

pub fn generate_referral_code() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_uppercase()
}
