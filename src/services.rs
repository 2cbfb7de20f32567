use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::mpsc;

use crate::models::transactions::BalanceEffect;
use crate::repositories::{notifier::Notifier, LedgerStore, LedgerTx};
use crate::settings::Settings;

pub mod accruals;
pub mod admin;
pub mod deposits;
mod http;
pub mod referrals;
pub mod transactions;
pub mod users;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Transaction {0} was already processed")]
    AlreadyProcessed(i64),
    #[error("Deposit {0} is already closed")]
    DepositClosed(i64),
    #[error("Insufficient balance: available={available}, requested={requested}")]
    InsufficientBalance {
        available: Decimal,
        requested: Decimal,
    },
    #[error("Amount {requested} is below the minimum of {minimum}")]
    BelowMinimum { minimum: Decimal, requested: Decimal },
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
    #[error("Rejection reason cannot be empty")]
    EmptyReason,
    #[error("User {0} is not an administrator")]
    Unauthorized(i64),
    #[error("Invalid password")]
    InvalidPassword,
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Communication error: {0} - {1}")]
    Communication(String, String),
}

impl From<anyhow::Error> for ServiceError {
    fn from(e: anyhow::Error) -> Self {
        ServiceError::Storage(e.to_string())
    }
}

#[async_trait]
pub trait RequestHandler<T>: Send + Sync + 'static
where
    T: Send + 'static,
{
    async fn handle_request(&self, request: T);
}

#[async_trait]
pub trait Service<T, H>: Send + Sync + 'static
where
    T: Send + 'static,
    H: RequestHandler<T> + Clone + Send,
{
    async fn run(&mut self, handler: H, receiver: &mut mpsc::Receiver<T>) {
        while let Some(request) = receiver.recv().await {
            let handler = handler.clone();

            tokio::spawn(async move {
                handler.handle_request(request).await;
            });
        }
    }
}

/// Administrators are either listed in the config or flagged on their user row.
pub(crate) async fn require_admin(
    store: &dyn LedgerStore,
    admin_ids: &[i64],
    user_id: i64,
) -> Result<(), ServiceError> {
    if admin_ids.contains(&user_id) {
        return Ok(());
    }

    match store.get_user(user_id).await? {
        Some(user) if user.is_admin => Ok(()),
        _ => Err(ServiceError::Unauthorized(user_id)),
    }
}

pub(crate) async fn apply_balance_effect(
    tx: &mut dyn LedgerTx,
    user_id: i64,
    amount: Decimal,
    effect: BalanceEffect,
) -> Result<(), ServiceError> {
    match effect {
        BalanceEffect::None => {}
        BalanceEffect::Credit => {
            tx.adjust_user_balance(user_id, amount).await?;
        }
        BalanceEffect::Reserve => {
            tx.adjust_user_balance(user_id, -amount).await?;
            tx.adjust_held_balance(user_id, amount).await?;
        }
        BalanceEffect::Release => {
            tx.adjust_held_balance(user_id, -amount).await?;
        }
        BalanceEffect::Refund => {
            tx.adjust_held_balance(user_id, -amount).await?;
            tx.adjust_user_balance(user_id, amount).await?;
        }
    }

    Ok(())
}

/// Best effort: a user who cannot be reached must not undo committed work.
pub(crate) async fn notify(notifier: &dyn Notifier, user_id: i64, text: String) {
    if let Err(e) = notifier.notify_user(user_id, &text).await {
        log::warn!("Could not notify user {}: {}", user_id, e);
    }
}

pub async fn start_services(
    store: Arc<dyn LedgerStore>,
    notifier: Arc<dyn Notifier>,
    settings: Settings,
) -> Result<(), anyhow::Error> {
    let (accrual_tx, mut accrual_rx) = mpsc::channel(512);
    let (admin_tx, mut admin_rx) = mpsc::channel(512);
    let (deposit_tx, mut deposit_rx) = mpsc::channel(512);
    let (transaction_tx, mut transaction_rx) = mpsc::channel(512);
    let (user_tx, mut user_rx) = mpsc::channel(512);

    let mut accrual_service = accruals::AccrualService::new();
    let mut admin_service = admin::AdminService::new();
    let mut deposit_service = deposits::DepositService::new();
    let mut transaction_service = transactions::TransactionService::new();
    let mut user_service = users::UserService::new();

    let admin_ids = Arc::new(settings.admin.ids.clone());

    log::info!("Starting accrual service.");
    let accrual_handler = accruals::AccrualRequestHandler::new(store.clone(), &settings.accruals);
    accrual_handler
        .start_accrual_task(Duration::from_secs(settings.accruals.check_interval_secs))
        .await;
    tokio::spawn(async move {
        accrual_service
            .run(accrual_handler, &mut accrual_rx)
            .await;
    });

    log::info!("Starting admin service.");
    let admin_handler = admin::AdminRequestHandler::new(
        store.clone(),
        admin_ids.clone(),
        settings.admin.default_password.clone(),
    );
    admin_handler.seed_password().await?;
    tokio::spawn(async move {
        admin_service.run(admin_handler, &mut admin_rx).await;
    });

    log::info!("Starting deposit service.");
    let deposit_handler = deposits::DepositRequestHandler::new(
        store.clone(),
        notifier.clone(),
        admin_ids.clone(),
        settings.ledger.clone(),
    );
    tokio::spawn(async move {
        deposit_service.run(deposit_handler, &mut deposit_rx).await;
    });

    log::info!("Starting transaction service.");
    let transaction_handler = transactions::TransactionRequestHandler::new(
        store.clone(),
        notifier.clone(),
        admin_ids.clone(),
        settings.ledger.clone(),
    );
    tokio::spawn(async move {
        transaction_service
            .run(transaction_handler, &mut transaction_rx)
            .await;
    });

    log::info!("Starting user service.");
    let user_handler = users::UserRequestHandler::new(store.clone());
    tokio::spawn(async move {
        user_service.run(user_handler, &mut user_rx).await;
    });

    log::info!("Starting HTTP server on {}.", settings.http.listen);
    http::start_http_server(
        &settings.http,
        http::Channels {
            accrual_channel: accrual_tx,
            admin_channel: admin_tx,
            deposit_channel: deposit_tx,
            transaction_channel: transaction_tx,
            user_channel: user_tx,
        },
    )
    .await
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use rust_decimal::Decimal;

    use crate::models::users::{User, UserRecord};
    use crate::repositories::{memory::MemoryLedger, notifier::Notifier, LedgerStore};
    use crate::settings;

    pub fn ledger_rules() -> settings::Ledger {
        settings::Ledger {
            topup_address: "TTopupAddress0000000000000000000000".to_string(),
            ..settings::Ledger::default()
        }
    }

    pub async fn funded_user(
        store: &MemoryLedger,
        user_id: i64,
        referred_by: Option<i64>,
        balance: Decimal,
    ) -> User {
        store
            .create_user(&UserRecord {
                user_id,
                username: Some(format!("user{user_id}")),
                full_name: None,
                referral_code: format!("CODE{user_id:04}"),
                referred_by,
            })
            .await
            .unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.adjust_user_balance(user_id, balance).await.unwrap();
        tx.commit().await.unwrap();

        store.get_user(user_id).await.unwrap().unwrap()
    }

    pub async fn admin_user(store: &MemoryLedger, user_id: i64) -> User {
        let user = funded_user(store, user_id, None, Decimal::ZERO).await;
        store.set_admin(user_id, true).await.unwrap();
        user
    }

    /// Records every message; optionally fails each delivery after recording it.
    #[derive(Default)]
    pub struct RecordingNotifier {
        pub sent: Mutex<Vec<(i64, String)>>,
        pub fail: bool,
    }

    impl RecordingNotifier {
        pub fn failing() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                fail: true,
            }
        }

        pub fn messages_for(&self, user_id: i64) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter(|(id, _)| *id == user_id)
                .map(|(_, text)| text.clone())
                .collect()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify_user(&self, user_id: i64, text: &str) -> Result<(), anyhow::Error> {
            self.sent.lock().unwrap().push((user_id, text.to_string()));

            if self.fail {
                anyhow::bail!("user {} blocked the bot", user_id)
            }
            Ok(())
        }
    }
}
