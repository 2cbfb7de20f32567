use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::transactions::UnknownVariant;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DepositStatus {
    Active,
    Closed,
}

impl DepositStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepositStatus::Active => "active",
            DepositStatus::Closed => "closed",
        }
    }

    /// The only transition a deposit has. Closed is terminal.
    pub fn close(self) -> Option<DepositStatus> {
        match self {
            DepositStatus::Active => Some(DepositStatus::Closed),
            DepositStatus::Closed => None,
        }
    }
}

impl fmt::Display for DepositStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for DepositStatus {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "active" => Ok(DepositStatus::Active),
            "closed" => Ok(DepositStatus::Closed),
            _ => Err(UnknownVariant::new("deposit status", value)),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, sqlx::FromRow)]
pub struct Deposit {
    pub deposit_id: i64,
    pub user_id: i64,
    pub amount: Decimal,
    pub interest_rate: Decimal,
    pub current_balance: Decimal,
    #[sqlx(try_from = "String")]
    pub status: DepositStatus,
    pub created_at: chrono::NaiveDateTime,
    pub last_accrual_date: Option<chrono::NaiveDate>,
    pub total_earned: Decimal,
}

impl Deposit {
    /// A deposit already accrued on or after `as_of` must not accrue again.
    pub fn is_due(&self, as_of: chrono::NaiveDate) -> bool {
        if self.status != DepositStatus::Active {
            return false;
        }

        match self.last_accrual_date {
            Some(last) => last < as_of,
            None => true,
        }
    }
}

#[derive(Clone, Debug)]
pub struct NewDeposit {
    pub user_id: i64,
    pub amount: Decimal,
    pub interest_rate: Decimal,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct AccrualSummary {
    pub accruals_count: u64,
    pub total_accrued: Decimal,
    pub failed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn deposit(last_accrual_date: Option<NaiveDate>) -> Deposit {
        Deposit {
            deposit_id: 1,
            user_id: 1,
            amount: dec!(50),
            interest_rate: dec!(1),
            current_balance: dec!(50),
            status: DepositStatus::Active,
            created_at: chrono::Utc::now().naive_utc(),
            last_accrual_date,
            total_earned: Decimal::ZERO,
        }
    }

    #[test]
    fn never_accrued_deposit_is_due() {
        let today = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        assert!(deposit(None).is_due(today));
    }

    #[test]
    fn deposit_accrued_today_or_later_is_not_due() {
        let today = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        let tomorrow = today.succ_opt().unwrap();

        assert!(!deposit(Some(today)).is_due(today));
        assert!(!deposit(Some(tomorrow)).is_due(today));
        assert!(deposit(Some(today)).is_due(tomorrow));
    }

    #[test]
    fn closed_deposit_is_never_due() {
        let today = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        let mut closed = deposit(None);
        closed.status = DepositStatus::Closed;

        assert!(!closed.is_due(today));
        assert_eq!(closed.status.close(), None);
        assert_eq!(DepositStatus::Active.close(), Some(DepositStatus::Closed));
    }
}
