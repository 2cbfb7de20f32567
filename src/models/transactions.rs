use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
#[error("Unknown {kind}: {value}")]
pub struct UnknownVariant {
    kind: &'static str,
    value: String,
}

impl UnknownVariant {
    pub fn new(kind: &'static str, value: String) -> Self {
        Self { kind, value }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    DepositCreated,
    DepositClosed,
    Topup,
    Withdraw,
    DailyAccrual,
    AdminTopup,
    ReferralBonus,
}

/// How a transaction moves money between a user's spendable and held balances.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BalanceEffect {
    None,
    Credit,
    // balance -> held
    Reserve,
    // held -> sent out
    Release,
    // held -> balance
    Refund,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Settlement {
    Approve,
    Reject,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::DepositCreated => "deposit_created",
            TransactionKind::DepositClosed => "deposit_closed",
            TransactionKind::Topup => "topup",
            TransactionKind::Withdraw => "withdraw",
            TransactionKind::DailyAccrual => "daily_accrual",
            TransactionKind::AdminTopup => "admin_topup",
            TransactionKind::ReferralBonus => "referral_bonus",
        }
    }

    /// Effect applied when a pending request is created.
    pub fn on_request(&self) -> BalanceEffect {
        match self {
            TransactionKind::Withdraw => BalanceEffect::Reserve,
            _ => BalanceEffect::None,
        }
    }

    /// Effect applied when a pending request is approved or rejected.
    ///
    /// A withdrawal reserves its funds when requested, so approving only
    /// releases the hold and rejecting hands it back. A topup credits nothing
    /// until approved.
    pub fn on_settle(&self, settlement: Settlement) -> BalanceEffect {
        match (self, settlement) {
            (TransactionKind::Topup, Settlement::Approve) => BalanceEffect::Credit,
            (TransactionKind::Withdraw, Settlement::Approve) => BalanceEffect::Release,
            (TransactionKind::Withdraw, Settlement::Reject) => BalanceEffect::Refund,
            _ => BalanceEffect::None,
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for TransactionKind {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "deposit_created" => Ok(TransactionKind::DepositCreated),
            "deposit_closed" => Ok(TransactionKind::DepositClosed),
            "topup" => Ok(TransactionKind::Topup),
            "withdraw" => Ok(TransactionKind::Withdraw),
            "daily_accrual" => Ok(TransactionKind::DailyAccrual),
            "admin_topup" => Ok(TransactionKind::AdminTopup),
            "referral_bonus" => Ok(TransactionKind::ReferralBonus),
            _ => Err(UnknownVariant::new("transaction type", value)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Rejected,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Rejected => "rejected",
        }
    }

    /// Pending settles exactly once; completed and rejected are terminal.
    pub fn settle(self, settlement: Settlement) -> Option<TransactionStatus> {
        match (self, settlement) {
            (TransactionStatus::Pending, Settlement::Approve) => Some(TransactionStatus::Completed),
            (TransactionStatus::Pending, Settlement::Reject) => Some(TransactionStatus::Rejected),
            _ => None,
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for TransactionStatus {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "pending" => Ok(TransactionStatus::Pending),
            "completed" => Ok(TransactionStatus::Completed),
            "rejected" => Ok(TransactionStatus::Rejected),
            _ => Err(UnknownVariant::new("transaction status", value)),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, sqlx::FromRow)]
pub struct Transaction {
    pub transaction_id: i64,
    pub user_id: i64,
    #[sqlx(try_from = "String")]
    pub transaction_type: TransactionKind,
    pub amount: Decimal,
    #[sqlx(try_from = "String")]
    pub status: TransactionStatus,
    pub description: Option<String>,
    pub deposit_id: Option<i64>,
    pub admin_id: Option<i64>,
    pub created_at: chrono::NaiveDateTime,
}

#[derive(Clone, Debug)]
pub struct NewTransaction {
    pub user_id: i64,
    pub transaction_type: TransactionKind,
    pub amount: Decimal,
    pub status: TransactionStatus,
    pub description: Option<String>,
    pub deposit_id: Option<i64>,
    pub admin_id: Option<i64>,
}

impl NewTransaction {
    pub fn completed(user_id: i64, transaction_type: TransactionKind, amount: Decimal) -> Self {
        Self {
            user_id,
            transaction_type,
            amount,
            status: TransactionStatus::Completed,
            description: None,
            deposit_id: None,
            admin_id: None,
        }
    }

    pub fn pending(user_id: i64, transaction_type: TransactionKind, amount: Decimal) -> Self {
        Self {
            status: TransactionStatus::Pending,
            ..Self::completed(user_id, transaction_type, amount)
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_deposit(mut self, deposit_id: i64) -> Self {
        self.deposit_id = Some(deposit_id);
        self
    }

    pub fn with_admin(mut self, admin_id: i64) -> Self {
        self.admin_id = Some(admin_id);
        self
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct TopupInstructions {
    pub address: String,
    pub min_amount: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_settles_once() {
        let completed = TransactionStatus::Pending.settle(Settlement::Approve);
        assert_eq!(completed, Some(TransactionStatus::Completed));
        assert_eq!(
            TransactionStatus::Pending.settle(Settlement::Reject),
            Some(TransactionStatus::Rejected)
        );

        for terminal in [TransactionStatus::Completed, TransactionStatus::Rejected] {
            assert_eq!(terminal.settle(Settlement::Approve), None);
            assert_eq!(terminal.settle(Settlement::Reject), None);
        }
    }

    #[test]
    fn withdraw_is_held_until_settled() {
        let withdraw = TransactionKind::Withdraw;
        assert_eq!(withdraw.on_request(), BalanceEffect::Reserve);
        assert_eq!(withdraw.on_settle(Settlement::Approve), BalanceEffect::Release);
        assert_eq!(withdraw.on_settle(Settlement::Reject), BalanceEffect::Refund);
    }

    #[test]
    fn topup_credits_only_on_approval() {
        let topup = TransactionKind::Topup;
        assert_eq!(topup.on_request(), BalanceEffect::None);
        assert_eq!(topup.on_settle(Settlement::Approve), BalanceEffect::Credit);
        assert_eq!(topup.on_settle(Settlement::Reject), BalanceEffect::None);
    }

    #[test]
    fn kinds_parse_from_their_column_value() {
        for kind in [
            TransactionKind::DepositCreated,
            TransactionKind::DepositClosed,
            TransactionKind::Topup,
            TransactionKind::Withdraw,
            TransactionKind::DailyAccrual,
            TransactionKind::AdminTopup,
            TransactionKind::ReferralBonus,
        ] {
            assert_eq!(TransactionKind::try_from(kind.to_string()).unwrap(), kind);
        }
        assert!(TransactionKind::try_from("bonus".to_string()).is_err());
    }
}
