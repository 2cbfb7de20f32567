use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{LedgerStore, LedgerTx};
use crate::models::{
    deposits::{Deposit, DepositStatus, NewDeposit},
    referrals::{NewReferralBonus, ReferralBonus},
    settings::{AdminSetting, LedgerStats},
    transactions::{NewTransaction, Transaction, TransactionStatus},
    users::{User, UserRecord},
};

#[derive(Clone, Default)]
struct LedgerState {
    users: BTreeMap<i64, User>,
    deposits: BTreeMap<i64, Deposit>,
    transactions: BTreeMap<i64, Transaction>,
    referral_bonuses: BTreeMap<i64, ReferralBonus>,
    settings: HashMap<String, AdminSetting>,
    next_deposit_id: i64,
    next_transaction_id: i64,
    next_bonus_id: i64,
    failing_deposits: HashSet<i64>,
    stalled_deposits: HashSet<i64>,
    failing_transaction_inserts: bool,
    failing_referral_bonus_inserts: bool,
}

fn now() -> chrono::NaiveDateTime {
    chrono::Utc::now().naive_utc()
}

/// In-process ledger for tests and local runs.
///
/// A unit of work holds the whole ledger lock and edits a private copy, which
/// replaces the shared state on commit.
#[derive(Clone, Default)]
pub struct MemoryLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later `update_deposit` for this deposit fail.
    #[cfg(test)]
    pub async fn fail_deposit_updates(&self, deposit_id: i64) {
        self.state.lock().await.failing_deposits.insert(deposit_id);
    }

    /// Makes every later `update_deposit` for this deposit hang.
    #[cfg(test)]
    pub async fn stall_deposit_updates(&self, deposit_id: i64) {
        self.state.lock().await.stalled_deposits.insert(deposit_id);
    }

    /// Makes every later `insert_transaction` fail.
    #[cfg(test)]
    pub async fn fail_transaction_inserts(&self) {
        self.state.lock().await.failing_transaction_inserts = true;
    }

    /// Makes every later `insert_referral_bonus` fail.
    #[cfg(test)]
    pub async fn fail_referral_bonus_inserts(&self) {
        self.state.lock().await.failing_referral_bonus_inserts = true;
    }

    #[cfg(test)]
    pub async fn referral_bonuses(&self) -> Vec<ReferralBonus> {
        self.state
            .lock()
            .await
            .referral_bonuses
            .values()
            .cloned()
            .collect()
    }

    #[cfg(test)]
    pub async fn user_transactions(&self, user_id: i64) -> Vec<Transaction> {
        self.state
            .lock()
            .await
            .transactions
            .values()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect()
    }

    #[cfg(test)]
    pub async fn deposit(&self, deposit_id: i64) -> Option<Deposit> {
        self.state.lock().await.deposits.get(&deposit_id).cloned()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>, anyhow::Error> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();

        Ok(Box::new(MemoryLedgerTx { guard, working }))
    }

    async fn get_user(&self, user_id: i64) -> Result<Option<User>, anyhow::Error> {
        Ok(self.state.lock().await.users.get(&user_id).cloned())
    }

    async fn get_user_by_referral_code(&self, code: &str) -> Result<Option<User>, anyhow::Error> {
        let state = self.state.lock().await;

        Ok(state
            .users
            .values()
            .find(|u| u.referral_code == code)
            .cloned())
    }

    async fn create_user(&self, user: &UserRecord) -> Result<User, anyhow::Error> {
        let mut state = self.state.lock().await;

        if let Some(existing) = state.users.get(&user.user_id) {
            return Ok(existing.clone());
        }
        if state
            .users
            .values()
            .any(|u| u.referral_code == user.referral_code)
        {
            bail!("Duplicate referral code: {}", user.referral_code)
        }
        if user.referred_by == Some(user.user_id) {
            bail!("User {} cannot refer themselves", user.user_id)
        }

        let created = User {
            user_id: user.user_id,
            username: user.username.clone(),
            full_name: user.full_name.clone(),
            balance: Decimal::ZERO,
            held_balance: Decimal::ZERO,
            referral_code: user.referral_code.clone(),
            referred_by: user.referred_by,
            is_admin: false,
            payout_address: None,
            created_at: now(),
        };
        state.users.insert(created.user_id, created.clone());

        Ok(created)
    }

    async fn set_admin(&self, user_id: i64, is_admin: bool) -> Result<bool, anyhow::Error> {
        let mut state = self.state.lock().await;

        match state.users.get_mut(&user_id) {
            Some(user) => {
                user.is_admin = is_admin;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn count_referrals(&self, user_id: i64) -> Result<i64, anyhow::Error> {
        let state = self.state.lock().await;

        Ok(state
            .users
            .values()
            .filter(|u| u.referred_by == Some(user_id))
            .count() as i64)
    }

    async fn total_referral_bonuses(&self, referrer_id: i64) -> Result<Decimal, anyhow::Error> {
        let state = self.state.lock().await;

        Ok(state
            .referral_bonuses
            .values()
            .filter(|b| b.referrer_id == referrer_id)
            .map(|b| b.amount)
            .sum())
    }

    async fn get_active_deposits(&self) -> Result<Vec<Deposit>, anyhow::Error> {
        let state = self.state.lock().await;

        Ok(state
            .deposits
            .values()
            .filter(|d| d.status == DepositStatus::Active)
            .cloned()
            .collect())
    }

    async fn get_user_deposits(&self, user_id: i64) -> Result<Vec<Deposit>, anyhow::Error> {
        let state = self.state.lock().await;

        Ok(state
            .deposits
            .values()
            .rev()
            .filter(|d| d.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn get_transaction(
        &self,
        transaction_id: i64,
    ) -> Result<Option<Transaction>, anyhow::Error> {
        Ok(self
            .state
            .lock()
            .await
            .transactions
            .get(&transaction_id)
            .cloned())
    }

    async fn get_pending_transactions(
        &self,
        limit: i64,
    ) -> Result<Vec<Transaction>, anyhow::Error> {
        let state = self.state.lock().await;

        Ok(state
            .transactions
            .values()
            .rev()
            .filter(|t| t.status == TransactionStatus::Pending)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        let state = self.state.lock().await;

        Ok(state.settings.get(key).map(|s| s.setting_value.clone()))
    }

    async fn upsert_setting(&self, key: &str, value: &str) -> Result<(), anyhow::Error> {
        let mut state = self.state.lock().await;

        state.settings.insert(
            key.to_string(),
            AdminSetting {
                setting_key: key.to_string(),
                setting_value: value.to_string(),
                updated_at: now(),
            },
        );

        Ok(())
    }

    async fn insert_setting_if_absent(
        &self,
        key: &str,
        value: &str,
    ) -> Result<bool, anyhow::Error> {
        let mut state = self.state.lock().await;

        if state.settings.contains_key(key) {
            return Ok(false);
        }
        state.settings.insert(
            key.to_string(),
            AdminSetting {
                setting_key: key.to_string(),
                setting_value: value.to_string(),
                updated_at: now(),
            },
        );

        Ok(true)
    }

    async fn get_stats(&self) -> Result<LedgerStats, anyhow::Error> {
        let state = self.state.lock().await;
        let active: Vec<&Deposit> = state
            .deposits
            .values()
            .filter(|d| d.status == DepositStatus::Active)
            .collect();

        Ok(LedgerStats {
            total_users: state.users.len() as i64,
            total_balance: state.users.values().map(|u| u.balance).sum(),
            active_deposits: active.len() as i64,
            active_deposits_amount: active.iter().map(|d| d.current_balance).sum(),
        })
    }
}

pub struct MemoryLedgerTx {
    guard: OwnedMutexGuard<LedgerState>,
    working: LedgerState,
}

impl MemoryLedgerTx {
    fn user_mut(&mut self, user_id: i64) -> Result<&mut User, anyhow::Error> {
        self.working
            .users
            .get_mut(&user_id)
            .ok_or_else(|| anyhow!("User not found: {}", user_id))
    }
}

#[async_trait]
impl LedgerTx for MemoryLedgerTx {
    async fn get_user(&mut self, user_id: i64) -> Result<Option<User>, anyhow::Error> {
        Ok(self.working.users.get(&user_id).cloned())
    }

    async fn adjust_user_balance(
        &mut self,
        user_id: i64,
        delta: Decimal,
    ) -> Result<Decimal, anyhow::Error> {
        let user = self.user_mut(user_id)?;
        user.balance += delta;

        Ok(user.balance)
    }

    async fn adjust_held_balance(
        &mut self,
        user_id: i64,
        delta: Decimal,
    ) -> Result<Decimal, anyhow::Error> {
        let user = self.user_mut(user_id)?;
        user.held_balance += delta;

        Ok(user.held_balance)
    }

    async fn set_payout_address(
        &mut self,
        user_id: i64,
        address: &str,
    ) -> Result<(), anyhow::Error> {
        self.user_mut(user_id)?.payout_address = Some(address.to_string());

        Ok(())
    }

    async fn get_deposit(&mut self, deposit_id: i64) -> Result<Option<Deposit>, anyhow::Error> {
        Ok(self.working.deposits.get(&deposit_id).cloned())
    }

    async fn insert_deposit(&mut self, deposit: &NewDeposit) -> Result<Deposit, anyhow::Error> {
        if !self.working.users.contains_key(&deposit.user_id) {
            bail!("User not found: {}", deposit.user_id)
        }

        self.working.next_deposit_id += 1;
        let created = Deposit {
            deposit_id: self.working.next_deposit_id,
            user_id: deposit.user_id,
            amount: deposit.amount,
            interest_rate: deposit.interest_rate,
            current_balance: deposit.amount,
            status: DepositStatus::Active,
            created_at: now(),
            last_accrual_date: None,
            total_earned: Decimal::ZERO,
        };
        self.working
            .deposits
            .insert(created.deposit_id, created.clone());

        Ok(created)
    }

    async fn update_deposit(
        &mut self,
        deposit_id: i64,
        new_balance: Decimal,
        last_accrual_date: NaiveDate,
        earned_delta: Decimal,
    ) -> Result<(), anyhow::Error> {
        if self.working.stalled_deposits.contains(&deposit_id) {
            std::future::pending::<()>().await;
        }
        if self.working.failing_deposits.contains(&deposit_id) {
            bail!("Injected failure for deposit {}", deposit_id)
        }

        let deposit = self
            .working
            .deposits
            .get_mut(&deposit_id)
            .ok_or_else(|| anyhow!("Deposit not found: {}", deposit_id))?;
        deposit.current_balance = new_balance;
        deposit.last_accrual_date = Some(last_accrual_date);
        deposit.total_earned += earned_delta;

        Ok(())
    }

    async fn update_deposit_status(
        &mut self,
        deposit_id: i64,
        status: DepositStatus,
    ) -> Result<(), anyhow::Error> {
        let deposit = self
            .working
            .deposits
            .get_mut(&deposit_id)
            .ok_or_else(|| anyhow!("Deposit not found: {}", deposit_id))?;
        deposit.status = status;

        Ok(())
    }

    async fn insert_transaction(
        &mut self,
        transaction: &NewTransaction,
    ) -> Result<Transaction, anyhow::Error> {
        if self.working.failing_transaction_inserts {
            bail!("Injected failure for transaction of user {}", transaction.user_id)
        }
        if !self.working.users.contains_key(&transaction.user_id) {
            bail!("User not found: {}", transaction.user_id)
        }

        self.working.next_transaction_id += 1;
        let created = Transaction {
            transaction_id: self.working.next_transaction_id,
            user_id: transaction.user_id,
            transaction_type: transaction.transaction_type,
            amount: transaction.amount,
            status: transaction.status,
            description: transaction.description.clone(),
            deposit_id: transaction.deposit_id,
            admin_id: transaction.admin_id,
            created_at: now(),
        };
        self.working
            .transactions
            .insert(created.transaction_id, created.clone());

        Ok(created)
    }

    async fn get_transaction(
        &mut self,
        transaction_id: i64,
    ) -> Result<Option<Transaction>, anyhow::Error> {
        Ok(self.working.transactions.get(&transaction_id).cloned())
    }

    async fn update_transaction_status(
        &mut self,
        transaction_id: i64,
        status: TransactionStatus,
        admin_id: Option<i64>,
        description: Option<&str>,
    ) -> Result<(), anyhow::Error> {
        let transaction = self
            .working
            .transactions
            .get_mut(&transaction_id)
            .ok_or_else(|| anyhow!("Transaction not found: {}", transaction_id))?;
        transaction.status = status;
        if admin_id.is_some() {
            transaction.admin_id = admin_id;
        }
        if let Some(description) = description {
            transaction.description = Some(description.to_string());
        }

        Ok(())
    }

    async fn insert_referral_bonus(
        &mut self,
        bonus: &NewReferralBonus,
    ) -> Result<ReferralBonus, anyhow::Error> {
        if self.working.failing_referral_bonus_inserts {
            bail!("Injected failure for referral bonus of user {}", bonus.referred_id)
        }

        self.working.next_bonus_id += 1;
        let created = ReferralBonus {
            bonus_id: self.working.next_bonus_id,
            referrer_id: bonus.referrer_id,
            referred_id: bonus.referred_id,
            amount: bonus.amount,
            transaction_id: bonus.transaction_id,
            created_at: now(),
        };
        self.working
            .referral_bonuses
            .insert(created.bonus_id, created.clone());

        Ok(created)
    }

    async fn commit(self: Box<Self>) -> Result<(), anyhow::Error> {
        let MemoryLedgerTx { mut guard, working } = *self;
        *guard = working;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::transactions::TransactionKind;
    use rust_decimal_macros::dec;

    fn record(user_id: i64, code: &str) -> UserRecord {
        UserRecord {
            user_id,
            username: None,
            full_name: None,
            referral_code: code.to_string(),
            referred_by: None,
        }
    }

    #[tokio::test]
    async fn dropped_unit_of_work_rolls_back() {
        let ledger = MemoryLedger::new();
        ledger.create_user(&record(1, "AAAA1111")).await.unwrap();

        let mut tx = ledger.begin().await.unwrap();
        tx.adjust_user_balance(1, dec!(25)).await.unwrap();
        tx.insert_transaction(&NewTransaction::completed(1, TransactionKind::AdminTopup, dec!(25)))
            .await
            .unwrap();
        drop(tx);

        let user = ledger.get_user(1).await.unwrap().unwrap();
        assert_eq!(user.balance, Decimal::ZERO);
        assert!(ledger.user_transactions(1).await.is_empty());
    }

    #[tokio::test]
    async fn committed_unit_of_work_is_visible() {
        let ledger = MemoryLedger::new();
        ledger.create_user(&record(1, "AAAA1111")).await.unwrap();

        let mut tx = ledger.begin().await.unwrap();
        assert_eq!(tx.adjust_user_balance(1, dec!(25)).await.unwrap(), dec!(25));
        tx.commit().await.unwrap();

        let user = ledger.get_user(1).await.unwrap().unwrap();
        assert_eq!(user.balance, dec!(25));
    }

    #[tokio::test]
    async fn create_user_keeps_existing_row_and_unique_codes() {
        let ledger = MemoryLedger::new();
        ledger.create_user(&record(1, "AAAA1111")).await.unwrap();

        let again = ledger.create_user(&record(1, "BBBB2222")).await.unwrap();
        assert_eq!(again.referral_code, "AAAA1111");
        assert!(ledger.create_user(&record(2, "AAAA1111")).await.is_err());
    }

    #[tokio::test]
    async fn upsert_replaces_and_insert_if_absent_does_not() {
        let ledger = MemoryLedger::new();

        assert!(ledger.insert_setting_if_absent("news_content", "a").await.unwrap());
        assert!(!ledger.insert_setting_if_absent("news_content", "b").await.unwrap());
        assert_eq!(ledger.get_setting("news_content").await.unwrap().as_deref(), Some("a"));

        ledger.upsert_setting("news_content", "c").await.unwrap();
        assert_eq!(ledger.get_setting("news_content").await.unwrap().as_deref(), Some("c"));
    }
}
