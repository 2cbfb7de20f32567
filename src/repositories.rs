use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::models::{
    deposits::{Deposit, DepositStatus, NewDeposit},
    referrals::{NewReferralBonus, ReferralBonus},
    settings::LedgerStats,
    transactions::{NewTransaction, Transaction, TransactionStatus},
    users::{User, UserRecord},
};

pub mod deposits;
pub mod memory;
pub mod notifier;
pub mod postgres;
pub mod referrals;
pub mod settings;
pub mod transactions;
pub mod users;

/// Shared ledger storage.
///
/// Reads here see committed state only. Anything that moves money goes
/// through [`LedgerStore::begin`] so that every effect of one operation
/// commits or rolls back together.
#[async_trait]
pub trait LedgerStore: Send + Sync + 'static {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>, anyhow::Error>;

    async fn get_user(&self, user_id: i64) -> Result<Option<User>, anyhow::Error>;

    async fn get_user_by_referral_code(&self, code: &str) -> Result<Option<User>, anyhow::Error>;

    /// Inserts the user unless one with the same id exists; returns the stored row.
    async fn create_user(&self, user: &UserRecord) -> Result<User, anyhow::Error>;

    /// Returns false when the user does not exist.
    async fn set_admin(&self, user_id: i64, is_admin: bool) -> Result<bool, anyhow::Error>;

    async fn count_referrals(&self, user_id: i64) -> Result<i64, anyhow::Error>;

    async fn total_referral_bonuses(&self, referrer_id: i64) -> Result<Decimal, anyhow::Error>;

    async fn get_active_deposits(&self) -> Result<Vec<Deposit>, anyhow::Error>;

    async fn get_user_deposits(&self, user_id: i64) -> Result<Vec<Deposit>, anyhow::Error>;

    async fn get_transaction(&self, transaction_id: i64)
        -> Result<Option<Transaction>, anyhow::Error>;

    async fn get_pending_transactions(&self, limit: i64)
        -> Result<Vec<Transaction>, anyhow::Error>;

    async fn get_setting(&self, key: &str) -> Result<Option<String>, anyhow::Error>;

    async fn upsert_setting(&self, key: &str, value: &str) -> Result<(), anyhow::Error>;

    /// Returns true when the value was written.
    async fn insert_setting_if_absent(&self, key: &str, value: &str)
        -> Result<bool, anyhow::Error>;

    async fn get_stats(&self) -> Result<LedgerStats, anyhow::Error>;
}

/// One atomic unit of ledger work. Rows read through it are locked until
/// commit; dropping it without committing rolls everything back.
#[async_trait]
pub trait LedgerTx: Send {
    async fn get_user(&mut self, user_id: i64) -> Result<Option<User>, anyhow::Error>;

    /// Atomic increment; returns the new balance.
    async fn adjust_user_balance(&mut self, user_id: i64, delta: Decimal)
        -> Result<Decimal, anyhow::Error>;

    /// Atomic increment of the reserved funds; returns the new held balance.
    async fn adjust_held_balance(&mut self, user_id: i64, delta: Decimal)
        -> Result<Decimal, anyhow::Error>;

    async fn set_payout_address(&mut self, user_id: i64, address: &str)
        -> Result<(), anyhow::Error>;

    async fn get_deposit(&mut self, deposit_id: i64) -> Result<Option<Deposit>, anyhow::Error>;

    async fn insert_deposit(&mut self, deposit: &NewDeposit) -> Result<Deposit, anyhow::Error>;

    async fn update_deposit(
        &mut self,
        deposit_id: i64,
        new_balance: Decimal,
        last_accrual_date: NaiveDate,
        earned_delta: Decimal,
    ) -> Result<(), anyhow::Error>;

    async fn update_deposit_status(&mut self, deposit_id: i64, status: DepositStatus)
        -> Result<(), anyhow::Error>;

    async fn insert_transaction(&mut self, transaction: &NewTransaction)
        -> Result<Transaction, anyhow::Error>;

    async fn get_transaction(&mut self, transaction_id: i64)
        -> Result<Option<Transaction>, anyhow::Error>;

    async fn update_transaction_status(
        &mut self,
        transaction_id: i64,
        status: TransactionStatus,
        admin_id: Option<i64>,
        description: Option<&str>,
    ) -> Result<(), anyhow::Error>;

    async fn insert_referral_bonus(&mut self, bonus: &NewReferralBonus)
        -> Result<ReferralBonus, anyhow::Error>;

    async fn commit(self: Box<Self>) -> Result<(), anyhow::Error>;
}
