use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::oneshot;

use super::{notify, referrals, require_admin, RequestHandler, Service, ServiceError};
use crate::models::deposits::{Deposit, NewDeposit};
use crate::models::referrals::ReferralBonus;
use crate::models::transactions::{NewTransaction, TransactionKind};
use crate::repositories::{notifier::Notifier, LedgerStore};
use crate::settings;
use crate::utils::{format_balance, validate_amount};

pub enum DepositRequest {
    OpenDeposit {
        user_id: i64,
        amount: Decimal,
        response: oneshot::Sender<Result<OpenedDeposit, ServiceError>>,
    },
    ListDeposits {
        user_id: i64,
        response: oneshot::Sender<Result<Vec<Deposit>, ServiceError>>,
    },
    CloseDeposit {
        deposit_id: i64,
        admin_id: i64,
        response: oneshot::Sender<Result<Deposit, ServiceError>>,
    },
}

#[derive(Clone, Debug, Serialize)]
pub struct OpenedDeposit {
    pub deposit: Deposit,
    pub referral_bonus: Option<ReferralBonus>,
}

#[derive(Clone)]
pub struct DepositRequestHandler {
    store: Arc<dyn LedgerStore>,
    notifier: Arc<dyn Notifier>,
    admin_ids: Arc<Vec<i64>>,
    rules: settings::Ledger,
}

impl DepositRequestHandler {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        notifier: Arc<dyn Notifier>,
        admin_ids: Arc<Vec<i64>>,
        rules: settings::Ledger,
    ) -> Self {
        Self {
            store,
            notifier,
            admin_ids,
            rules,
        }
    }

    /// Moves `amount` from the user's balance into a new deposit at the default
    /// rate and pays the referrer's bonus, all in one unit of work.
    pub async fn open_deposit(
        &self,
        user_id: i64,
        amount: Decimal,
    ) -> Result<OpenedDeposit, ServiceError> {
        let amount = validate_amount(amount)?;
        if amount < self.rules.min_deposit {
            return Err(ServiceError::BelowMinimum {
                minimum: self.rules.min_deposit,
                requested: amount,
            });
        }

        let mut tx = self.store.begin().await?;
        let user = tx
            .get_user(user_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("user {}", user_id)))?;

        if amount > user.balance {
            return Err(ServiceError::InsufficientBalance {
                available: user.balance,
                requested: amount,
            });
        }

        tx.adjust_user_balance(user_id, -amount).await?;
        let deposit = tx
            .insert_deposit(&NewDeposit {
                user_id,
                amount,
                interest_rate: self.rules.default_interest_rate,
            })
            .await?;
        tx.insert_transaction(
            &NewTransaction::completed(user_id, TransactionKind::DepositCreated, amount)
                .with_deposit(deposit.deposit_id)
                .with_description("Deposit opened"),
        )
        .await?;

        let referral_bonus = match user.referred_by {
            Some(referrer_id) => {
                referrals::credit_referral_bonus(
                    tx.as_mut(),
                    referrer_id,
                    user_id,
                    amount,
                    self.rules.referral_bonus_percent,
                )
                .await?
            }
            None => None,
        };

        tx.commit().await?;

        log::info!(
            "User {} opened deposit {} of {} at {}%",
            user_id,
            deposit.deposit_id,
            amount,
            deposit.interest_rate
        );

        Ok(OpenedDeposit {
            deposit,
            referral_bonus,
        })
    }

    async fn list_deposits(&self, user_id: i64) -> Result<Vec<Deposit>, ServiceError> {
        Ok(self.store.get_user_deposits(user_id).await?)
    }

    /// Closes an active deposit and returns its principal to the owner.
    /// Interest was already paid out to the balance day by day.
    pub async fn close_deposit(&self, deposit_id: i64, admin_id: i64) -> Result<Deposit, ServiceError> {
        require_admin(self.store.as_ref(), &self.admin_ids, admin_id).await?;

        let mut tx = self.store.begin().await?;
        let mut deposit = tx
            .get_deposit(deposit_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("deposit {}", deposit_id)))?;
        let closed = deposit
            .status
            .close()
            .ok_or(ServiceError::DepositClosed(deposit_id))?;

        tx.update_deposit_status(deposit_id, closed).await?;
        tx.adjust_user_balance(deposit.user_id, deposit.amount).await?;
        tx.insert_transaction(
            &NewTransaction::completed(deposit.user_id, TransactionKind::DepositClosed, deposit.amount)
                .with_deposit(deposit_id)
                .with_admin(admin_id)
                .with_description("Deposit closed, principal returned"),
        )
        .await?;
        tx.commit().await?;

        deposit.status = closed;
        notify(
            self.notifier.as_ref(),
            deposit.user_id,
            format!(
                "Your deposit #{} was closed. {} returned to your balance.",
                deposit_id,
                format_balance(deposit.amount)
            ),
        )
        .await;

        Ok(deposit)
    }
}

#[async_trait]
impl RequestHandler<DepositRequest> for DepositRequestHandler {
    async fn handle_request(&self, request: DepositRequest) {
        match request {
            DepositRequest::OpenDeposit {
                user_id,
                amount,
                response,
            } => {
                let result = self.open_deposit(user_id, amount).await;
                let _ = response.send(result);
            }
            DepositRequest::ListDeposits { user_id, response } => {
                let result = self.list_deposits(user_id).await;
                let _ = response.send(result);
            }
            DepositRequest::CloseDeposit {
                deposit_id,
                admin_id,
                response,
            } => {
                let result = self.close_deposit(deposit_id, admin_id).await;
                let _ = response.send(result);
            }
        }
    }
}

pub struct DepositService;

impl DepositService {
    pub fn new() -> Self {
        DepositService {}
    }
}

#[async_trait]
impl Service<DepositRequest, DepositRequestHandler> for DepositService {}
