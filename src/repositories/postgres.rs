use anyhow::{anyhow, bail};
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres};

use super::{deposits, referrals, settings, transactions, users, LedgerStore, LedgerTx};
use crate::models::{
    deposits::{Deposit, DepositStatus, NewDeposit},
    referrals::{NewReferralBonus, ReferralBonus},
    settings::LedgerStats,
    transactions::{NewTransaction, Transaction, TransactionStatus},
    users::{User, UserRecord},
};

#[derive(Clone)]
pub struct PgLedger {
    conn: PgPool,
}

impl PgLedger {
    /// Connects and brings the schema up to date.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, anyhow::Error> {
        let conn = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;

        sqlx::migrate!("./migrations").run(&conn).await?;

        Ok(Self { conn })
    }

    pub async fn close(&self) {
        self.conn.close().await;
    }
}

#[async_trait]
impl LedgerStore for PgLedger {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>, anyhow::Error> {
        let tx = self.conn.begin().await?;

        Ok(Box::new(PgLedgerTx { tx }))
    }

    async fn get_user(&self, user_id: i64) -> Result<Option<User>, anyhow::Error> {
        users::get_user(&self.conn, user_id).await
    }

    async fn get_user_by_referral_code(&self, code: &str) -> Result<Option<User>, anyhow::Error> {
        users::get_user_by_referral_code(&self.conn, code).await
    }

    async fn create_user(&self, user: &UserRecord) -> Result<User, anyhow::Error> {
        if let Some(created) = users::insert_user(&self.conn, user).await? {
            return Ok(created);
        }

        // The conflicting row may have been committed after the insert's
        // snapshot, so it is read back in a new statement.
        users::get_user(&self.conn, user.user_id)
            .await?
            .ok_or_else(|| anyhow!("User {} conflicted but could not be read", user.user_id))
    }

    async fn set_admin(&self, user_id: i64, is_admin: bool) -> Result<bool, anyhow::Error> {
        users::set_admin(&self.conn, user_id, is_admin).await
    }

    async fn count_referrals(&self, user_id: i64) -> Result<i64, anyhow::Error> {
        users::count_referrals(&self.conn, user_id).await
    }

    async fn total_referral_bonuses(&self, referrer_id: i64) -> Result<Decimal, anyhow::Error> {
        referrals::total_referral_bonuses(&self.conn, referrer_id).await
    }

    async fn get_active_deposits(&self) -> Result<Vec<Deposit>, anyhow::Error> {
        deposits::get_active_deposits(&self.conn).await
    }

    async fn get_user_deposits(&self, user_id: i64) -> Result<Vec<Deposit>, anyhow::Error> {
        deposits::get_user_deposits(&self.conn, user_id).await
    }

    async fn get_transaction(
        &self,
        transaction_id: i64,
    ) -> Result<Option<Transaction>, anyhow::Error> {
        transactions::get_transaction(&self.conn, transaction_id).await
    }

    async fn get_pending_transactions(
        &self,
        limit: i64,
    ) -> Result<Vec<Transaction>, anyhow::Error> {
        transactions::get_pending_transactions(&self.conn, limit).await
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        settings::get_setting(&self.conn, key).await
    }

    async fn upsert_setting(&self, key: &str, value: &str) -> Result<(), anyhow::Error> {
        settings::upsert_setting(&self.conn, key, value).await
    }

    async fn insert_setting_if_absent(
        &self,
        key: &str,
        value: &str,
    ) -> Result<bool, anyhow::Error> {
        settings::insert_setting_if_absent(&self.conn, key, value).await
    }

    async fn get_stats(&self) -> Result<LedgerStats, anyhow::Error> {
        settings::get_stats(&self.conn).await
    }
}

pub struct PgLedgerTx {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTx for PgLedgerTx {
    async fn get_user(&mut self, user_id: i64) -> Result<Option<User>, anyhow::Error> {
        users::get_user_for_update(&mut *self.tx, user_id).await
    }

    async fn adjust_user_balance(
        &mut self,
        user_id: i64,
        delta: Decimal,
    ) -> Result<Decimal, anyhow::Error> {
        users::adjust_balance(&mut *self.tx, user_id, delta)
            .await?
            .ok_or_else(|| anyhow!("User not found: {}", user_id))
    }

    async fn adjust_held_balance(
        &mut self,
        user_id: i64,
        delta: Decimal,
    ) -> Result<Decimal, anyhow::Error> {
        users::adjust_held_balance(&mut *self.tx, user_id, delta)
            .await?
            .ok_or_else(|| anyhow!("User not found: {}", user_id))
    }

    async fn set_payout_address(
        &mut self,
        user_id: i64,
        address: &str,
    ) -> Result<(), anyhow::Error> {
        users::set_payout_address(&mut *self.tx, user_id, address).await
    }

    async fn get_deposit(&mut self, deposit_id: i64) -> Result<Option<Deposit>, anyhow::Error> {
        deposits::get_deposit_for_update(&mut *self.tx, deposit_id).await
    }

    async fn insert_deposit(&mut self, deposit: &NewDeposit) -> Result<Deposit, anyhow::Error> {
        deposits::insert_deposit(&mut *self.tx, deposit).await
    }

    async fn update_deposit(
        &mut self,
        deposit_id: i64,
        new_balance: Decimal,
        last_accrual_date: NaiveDate,
        earned_delta: Decimal,
    ) -> Result<(), anyhow::Error> {
        let updated = deposits::update_deposit(
            &mut *self.tx,
            deposit_id,
            new_balance,
            last_accrual_date,
            earned_delta,
        )
        .await?;

        if updated == 0 {
            bail!("Deposit not found: {}", deposit_id)
        }

        Ok(())
    }

    async fn update_deposit_status(
        &mut self,
        deposit_id: i64,
        status: DepositStatus,
    ) -> Result<(), anyhow::Error> {
        if deposits::update_deposit_status(&mut *self.tx, deposit_id, status).await? == 0 {
            bail!("Deposit not found: {}", deposit_id)
        }

        Ok(())
    }

    async fn insert_transaction(
        &mut self,
        transaction: &NewTransaction,
    ) -> Result<Transaction, anyhow::Error> {
        transactions::insert_transaction(&mut *self.tx, transaction).await
    }

    async fn get_transaction(
        &mut self,
        transaction_id: i64,
    ) -> Result<Option<Transaction>, anyhow::Error> {
        transactions::get_transaction_for_update(&mut *self.tx, transaction_id).await
    }

    async fn update_transaction_status(
        &mut self,
        transaction_id: i64,
        status: TransactionStatus,
        admin_id: Option<i64>,
        description: Option<&str>,
    ) -> Result<(), anyhow::Error> {
        let updated = transactions::update_transaction_status(
            &mut *self.tx,
            transaction_id,
            status,
            admin_id,
            description,
        )
        .await?;

        if updated == 0 {
            bail!("Transaction not found: {}", transaction_id)
        }

        Ok(())
    }

    async fn insert_referral_bonus(
        &mut self,
        bonus: &NewReferralBonus,
    ) -> Result<ReferralBonus, anyhow::Error> {
        referrals::insert_referral_bonus(&mut *self.tx, bonus).await
    }

    async fn commit(self: Box<Self>) -> Result<(), anyhow::Error> {
        self.tx.commit().await?;

        Ok(())
    }
}
