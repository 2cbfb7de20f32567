use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::oneshot;

use super::{
    apply_balance_effect, notify, require_admin, RequestHandler, Service, ServiceError,
};
use crate::models::transactions::{
    NewTransaction, Settlement, TopupInstructions, Transaction, TransactionKind,
};
use crate::repositories::{notifier::Notifier, LedgerStore};
use crate::settings;
use crate::utils::{format_balance, validate_amount};

pub const DEFAULT_PENDING_LIMIT: i64 = 20;

pub enum TransactionServiceRequest {
    RequestWithdraw {
        user_id: i64,
        amount: Decimal,
        address: String,
        response: oneshot::Sender<Result<Transaction, ServiceError>>,
    },
    Approve {
        transaction_id: i64,
        admin_id: i64,
        response: oneshot::Sender<Result<Transaction, ServiceError>>,
    },
    Reject {
        transaction_id: i64,
        admin_id: i64,
        reason: String,
        response: oneshot::Sender<Result<Transaction, ServiceError>>,
    },
    AdminCredit {
        admin_id: i64,
        user_id: i64,
        amount: Decimal,
        response: oneshot::Sender<Result<Transaction, ServiceError>>,
    },
    ListPending {
        admin_id: i64,
        limit: Option<i64>,
        response: oneshot::Sender<Result<Vec<Transaction>, ServiceError>>,
    },
    TopupInstructions {
        response: oneshot::Sender<TopupInstructions>,
    },
}

#[derive(Clone)]
pub struct TransactionRequestHandler {
    store: Arc<dyn LedgerStore>,
    notifier: Arc<dyn Notifier>,
    admin_ids: Arc<Vec<i64>>,
    rules: settings::Ledger,
}

impl TransactionRequestHandler {
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

    fn validate_address(&self, address: &str) -> Result<(), ServiceError> {
        let valid = address.starts_with(&self.rules.payout_address_prefix)
            && address.chars().count() == self.rules.payout_address_length;

        if !valid {
            return Err(ServiceError::InvalidAddress(address.to_string()));
        }

        Ok(())
    }

    /// Reserves `amount` on the user's hold and queues a withdrawal for an
    /// administrator to approve or reject.
    pub async fn request_withdraw(
        &self,
        user_id: i64,
        amount: Decimal,
        address: &str,
    ) -> Result<Transaction, ServiceError> {
        let amount = validate_amount(amount)?;
        if amount < self.rules.min_withdraw {
            return Err(ServiceError::BelowMinimum {
                minimum: self.rules.min_withdraw,
                requested: amount,
            });
        }
        let address = address.trim();
        self.validate_address(address)?;

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

        let kind = TransactionKind::Withdraw;
        apply_balance_effect(tx.as_mut(), user_id, amount, kind.on_request()).await?;
        tx.set_payout_address(user_id, address).await?;
        let transaction = tx
            .insert_transaction(
                &NewTransaction::pending(user_id, kind, amount)
                    .with_description(format!("Withdrawal to {}", address)),
            )
            .await?;
        tx.commit().await?;

        log::info!(
            "User {} requested withdrawal {} of {} to {}",
            user_id,
            transaction.transaction_id,
            amount,
            address
        );

        Ok(transaction)
    }

    pub async fn approve(&self, transaction_id: i64, admin_id: i64) -> Result<Transaction, ServiceError> {
        self.settle(transaction_id, admin_id, Settlement::Approve, None)
            .await
    }

    pub async fn reject(
        &self,
        transaction_id: i64,
        admin_id: i64,
        reason: &str,
    ) -> Result<Transaction, ServiceError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ServiceError::EmptyReason);
        }

        self.settle(transaction_id, admin_id, Settlement::Reject, Some(reason))
            .await
    }

    /// Moves a pending transaction to its terminal state and applies the
    /// matching balance effect in the same unit of work. The user is told
    /// after commit.
    async fn settle(
        &self,
        transaction_id: i64,
        admin_id: i64,
        settlement: Settlement,
        reason: Option<&str>,
    ) -> Result<Transaction, ServiceError> {
        require_admin(self.store.as_ref(), &self.admin_ids, admin_id).await?;

        let mut tx = self.store.begin().await?;
        let mut transaction = tx
            .get_transaction(transaction_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("transaction {}", transaction_id)))?;
        let status = transaction
            .status
            .settle(settlement)
            .ok_or(ServiceError::AlreadyProcessed(transaction_id))?;

        let kind = transaction.transaction_type;
        apply_balance_effect(
            tx.as_mut(),
            transaction.user_id,
            transaction.amount,
            kind.on_settle(settlement),
        )
        .await?;

        let description = reason.map(|reason| match transaction.description.as_deref() {
            Some(existing) => format!("{}\nRejection reason: {}", existing, reason),
            None => format!("Rejection reason: {}", reason),
        });
        tx.update_transaction_status(transaction_id, status, Some(admin_id), description.as_deref())
            .await?;
        tx.commit().await?;

        log::info!(
            "Transaction {} ({}) {} by admin {}",
            transaction_id,
            kind,
            status,
            admin_id
        );

        transaction.status = status;
        transaction.admin_id = Some(admin_id);
        if description.is_some() {
            transaction.description = description;
        }

        if let Some(text) = settlement_message(&transaction, reason) {
            notify(self.notifier.as_ref(), transaction.user_id, text).await;
        }

        Ok(transaction)
    }

    /// Trusted immediate credit; never goes through the pending queue.
    pub async fn admin_credit(
        &self,
        admin_id: i64,
        user_id: i64,
        amount: Decimal,
    ) -> Result<Transaction, ServiceError> {
        require_admin(self.store.as_ref(), &self.admin_ids, admin_id).await?;
        let amount = validate_amount(amount)?;

        let mut tx = self.store.begin().await?;
        if tx.get_user(user_id).await?.is_none() {
            return Err(ServiceError::NotFound(format!("user {}", user_id)));
        }

        tx.adjust_user_balance(user_id, amount).await?;
        let transaction = tx
            .insert_transaction(
                &NewTransaction::completed(user_id, TransactionKind::AdminTopup, amount)
                    .with_admin(admin_id)
                    .with_description("Credited by administrator"),
            )
            .await?;
        tx.commit().await?;

        log::info!("Admin {} credited {} to user {}", admin_id, amount, user_id);

        notify(
            self.notifier.as_ref(),
            user_id,
            format!("{} was credited to your balance!", format_balance(amount)),
        )
        .await;

        Ok(transaction)
    }

    async fn list_pending(&self, admin_id: i64, limit: Option<i64>) -> Result<Vec<Transaction>, ServiceError> {
        require_admin(self.store.as_ref(), &self.admin_ids, admin_id).await?;

        Ok(self
            .store
            .get_pending_transactions(limit.unwrap_or(DEFAULT_PENDING_LIMIT))
            .await?)
    }

    pub fn topup_instructions(&self) -> TopupInstructions {
        TopupInstructions {
            address: self.rules.topup_address.clone(),
            min_amount: self.rules.min_topup,
        }
    }
}

fn settlement_message(transaction: &Transaction, reason: Option<&str>) -> Option<String> {
    let amount = format_balance(transaction.amount);

    match (transaction.transaction_type, reason) {
        (TransactionKind::Topup, None) => Some(format!(
            "Your topup request was approved!\n{} was credited to your balance!",
            amount
        )),
        (TransactionKind::Topup, Some(reason)) => Some(format!(
            "Your topup request was rejected.\n\nReason: {}\n\nContact the administrator for details.",
            reason
        )),
        (TransactionKind::Withdraw, None) => Some(format!(
            "Your withdrawal request was approved!\nAmount: {}\nFunds will be sent shortly.",
            amount
        )),
        (TransactionKind::Withdraw, Some(reason)) => Some(format!(
            "Your withdrawal request was rejected.\n\n{} was returned to your balance.\n\nReason: {}",
            amount, reason
        )),
        _ => None,
    }
}

#[async_trait]
impl RequestHandler<TransactionServiceRequest> for TransactionRequestHandler {
    async fn handle_request(&self, request: TransactionServiceRequest) {
        match request {
            TransactionServiceRequest::RequestWithdraw {
                user_id,
                amount,
                address,
                response,
            } => {
                let result = self.request_withdraw(user_id, amount, &address).await;
                let _ = response.send(result);
            }
            TransactionServiceRequest::Approve {
                transaction_id,
                admin_id,
                response,
            } => {
                let result = self.approve(transaction_id, admin_id).await;
                let _ = response.send(result);
            }
            TransactionServiceRequest::Reject {
                transaction_id,
                admin_id,
                reason,
                response,
            } => {
                let result = self.reject(transaction_id, admin_id, &reason).await;
                let _ = response.send(result);
            }
            TransactionServiceRequest::AdminCredit {
                admin_id,
                user_id,
                amount,
                response,
            } => {
                let result = self.admin_credit(admin_id, user_id, amount).await;
                let _ = response.send(result);
            }
            TransactionServiceRequest::ListPending {
                admin_id,
                limit,
                response,
            } => {
                let result = self.list_pending(admin_id, limit).await;
                let _ = response.send(result);
            }
            TransactionServiceRequest::TopupInstructions { response } => {
                let _ = response.send(self.topup_instructions());
            }
        }
    }
}

pub struct TransactionService;

impl TransactionService {
    pub fn new() -> Self {
        TransactionService {}
    }
}

#[async_trait]
impl Service<TransactionServiceRequest, TransactionRequestHandler> for TransactionService {}
