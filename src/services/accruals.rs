use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use futures_util::{stream, StreamExt};
use rust_decimal::Decimal;
use tokio::sync::oneshot;

use super::{RequestHandler, Service, ServiceError};
use crate::models::deposits::AccrualSummary;
use crate::models::transactions::{NewTransaction, TransactionKind};
use crate::repositories::LedgerStore;
use crate::settings;
use crate::utils::percent_of;

pub enum AccrualRequest {
    Run {
        as_of: Option<NaiveDate>,
        response: oneshot::Sender<Result<AccrualSummary, ServiceError>>,
    },
}

pub fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

#[derive(Clone)]
pub struct AccrualRequestHandler {
    store: Arc<dyn LedgerStore>,
    per_deposit_timeout: Duration,
    concurrency: usize,
}

impl AccrualRequestHandler {
    pub fn new(store: Arc<dyn LedgerStore>, settings: &settings::Accruals) -> Self {
        Self {
            store,
            per_deposit_timeout: Duration::from_secs(settings.per_deposit_timeout_secs),
            concurrency: settings.concurrency.max(1),
        }
    }

    /// Re-runs the batch for the current date on every tick. Deposits that
    /// were already accrued today are skipped, so extra ticks are harmless.
    pub async fn start_accrual_task(&self, every: Duration) {
        let handler = self.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);

            loop {
                interval.tick().await;

                if let Err(e) = handler.run_daily_accruals(today()).await {
                    log::error!("Error running daily accruals: {}", e);
                }
            }
        });

        log::info!("Accrual task started");
    }

    /// Posts one day of interest on every active deposit not yet accrued for
    /// `as_of`. Each deposit is its own unit of work: a failure or timeout is
    /// logged and counted, and the rest of the batch carries on.
    pub async fn run_daily_accruals(&self, as_of: NaiveDate) -> Result<AccrualSummary, ServiceError> {
        let due: Vec<i64> = self
            .store
            .get_active_deposits()
            .await?
            .into_iter()
            .filter(|d| d.is_due(as_of))
            .map(|d| d.deposit_id)
            .collect();

        let mut results = stream::iter(due)
            .map(|deposit_id| {
                let handler = self.clone();
                async move {
                    let result =
                        tokio::time::timeout(handler.per_deposit_timeout, handler.accrue(deposit_id, as_of))
                            .await;
                    (deposit_id, result)
                }
            })
            .buffer_unordered(self.concurrency);

        let mut summary = AccrualSummary::default();
        while let Some((deposit_id, result)) = results.next().await {
            match result {
                Ok(Ok(Some(amount))) => {
                    summary.accruals_count += 1;
                    summary.total_accrued += amount;
                }
                Ok(Ok(None)) => {
                    log::debug!("Deposit {} no longer due for {}", deposit_id, as_of);
                }
                Ok(Err(e)) => {
                    log::error!("Accrual failed for deposit {}: {}", deposit_id, e);
                    summary.failed += 1;
                }
                Err(_) => {
                    log::warn!(
                        "Accrual for deposit {} timed out after {:?}",
                        deposit_id,
                        self.per_deposit_timeout
                    );
                    summary.failed += 1;
                }
            }
        }

        log::info!(
            "Accruals completed: accruals_count={} total_accrued={} failed={} as_of={}",
            summary.accruals_count,
            summary.total_accrued,
            summary.failed,
            as_of
        );

        Ok(summary)
    }

    async fn accrue(&self, deposit_id: i64, as_of: NaiveDate) -> Result<Option<Decimal>, ServiceError> {
        let mut tx = self.store.begin().await?;

        // re-read under lock, a concurrent run may have got here first
        let deposit = match tx.get_deposit(deposit_id).await? {
            Some(deposit) if deposit.is_due(as_of) => deposit,
            _ => return Ok(None),
        };

        let amount = percent_of(deposit.current_balance, deposit.interest_rate);

        tx.update_deposit(
            deposit_id,
            deposit.current_balance + amount,
            as_of,
            amount,
        )
        .await?;
        tx.adjust_user_balance(deposit.user_id, amount).await?;
        tx.insert_transaction(
            &NewTransaction::completed(deposit.user_id, TransactionKind::DailyAccrual, amount)
                .with_deposit(deposit_id)
                .with_description("Daily deposit accrual"),
        )
        .await?;
        tx.commit().await?;

        Ok(Some(amount))
    }
}

#[async_trait]
impl RequestHandler<AccrualRequest> for AccrualRequestHandler {
    async fn handle_request(&self, request: AccrualRequest) {
        match request {
            AccrualRequest::Run { as_of, response } => {
                let result = self.run_daily_accruals(as_of.unwrap_or_else(today)).await;
                let _ = response.send(result);
            }
        }
    }
}

pub struct AccrualService;

impl AccrualService {
    pub fn new() -> Self {
        AccrualService {}
    }
}

#[async_trait]
impl Service<AccrualRequest, AccrualRequestHandler> for AccrualService {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::memory::MemoryLedger;
    use crate::repositories::notifier::LogNotifier;
    use crate::services::deposits::DepositRequestHandler;
    use crate::services::testing::{funded_user, ledger_rules};
    use rust_decimal_macros::dec;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, d).unwrap()
    }

    fn engine(store: &MemoryLedger, timeout: Duration, concurrency: usize) -> AccrualRequestHandler {
        AccrualRequestHandler {
            store: Arc::new(store.clone()),
            per_deposit_timeout: timeout,
            concurrency,
        }
    }

    fn deposits(store: &MemoryLedger) -> DepositRequestHandler {
        DepositRequestHandler::new(
            Arc::new(store.clone()),
            Arc::new(LogNotifier),
            Arc::new(Vec::new()),
            ledger_rules(),
        )
    }

    #[tokio::test]
    async fn accrual_credits_deposit_and_owner_once_per_day() {
        let store = MemoryLedger::new();
        funded_user(&store, 1, None, dec!(100)).await;
        let opened = deposits(&store).open_deposit(1, dec!(50)).await.unwrap();
        assert_eq!(store.get_user(1).await.unwrap().unwrap().balance, dec!(50));

        let handler = engine(&store, Duration::from_secs(5), 4);
        let summary = handler.run_daily_accruals(day(1)).await.unwrap();
        assert_eq!(summary.accruals_count, 1);
        assert_eq!(summary.total_accrued, dec!(0.5));
        assert_eq!(summary.failed, 0);

        let deposit = store.deposit(opened.deposit.deposit_id).await.unwrap();
        assert_eq!(deposit.current_balance, dec!(50.5));
        assert_eq!(deposit.total_earned, dec!(0.5));
        assert_eq!(deposit.last_accrual_date, Some(day(1)));
        assert_eq!(store.get_user(1).await.unwrap().unwrap().balance, dec!(50.5));

        let again = handler.run_daily_accruals(day(1)).await.unwrap();
        assert_eq!(again.accruals_count, 0);
        assert_eq!(again.total_accrued, Decimal::ZERO);
        assert_eq!(store.deposit(opened.deposit.deposit_id).await.unwrap().current_balance, dec!(50.5));
        assert_eq!(store.get_user(1).await.unwrap().unwrap().balance, dec!(50.5));

        let accruals: Vec<_> = store
            .user_transactions(1)
            .await
            .into_iter()
            .filter(|t| t.transaction_type == TransactionKind::DailyAccrual)
            .collect();
        assert_eq!(accruals.len(), 1);
        assert_eq!(accruals[0].deposit_id, Some(opened.deposit.deposit_id));
        assert_eq!(accruals[0].amount, dec!(0.5));
    }

    #[tokio::test]
    async fn past_dates_already_covered_are_skipped() {
        let store = MemoryLedger::new();
        funded_user(&store, 1, None, dec!(100)).await;
        deposits(&store).open_deposit(1, dec!(100)).await.unwrap();

        let handler = engine(&store, Duration::from_secs(5), 1);
        assert_eq!(handler.run_daily_accruals(day(2)).await.unwrap().accruals_count, 1);
        assert_eq!(handler.run_daily_accruals(day(1)).await.unwrap().accruals_count, 0);
        assert_eq!(handler.run_daily_accruals(day(3)).await.unwrap().accruals_count, 1);
    }

    #[tokio::test]
    async fn accrual_compounds_exactly_in_decimal() {
        let store = MemoryLedger::new();
        funded_user(&store, 1, None, dec!(1000)).await;
        let opened = deposits(&store).open_deposit(1, dec!(1000)).await.unwrap();
        let handler = engine(&store, Duration::from_secs(5), 2);

        let mut expected = dec!(1000);
        for d in 1..=10 {
            let before = store.deposit(opened.deposit.deposit_id).await.unwrap().current_balance;
            handler.run_daily_accruals(day(d)).await.unwrap();
            expected += percent_of(before, dec!(1));

            let after = store.deposit(opened.deposit.deposit_id).await.unwrap().current_balance;
            assert_eq!(after, expected);
        }

        // 1000 * 1.01^3 has no more than 8 decimals, so no rounding happened yet
        let store = MemoryLedger::new();
        funded_user(&store, 1, None, dec!(1000)).await;
        let opened = deposits(&store).open_deposit(1, dec!(1000)).await.unwrap();
        let handler = engine(&store, Duration::from_secs(5), 2);
        for d in 1..=3 {
            handler.run_daily_accruals(day(d)).await.unwrap();
        }
        let deposit = store.deposit(opened.deposit.deposit_id).await.unwrap();
        assert_eq!(deposit.current_balance, dec!(1030.301));
        assert_eq!(deposit.total_earned, dec!(30.301));
    }

    #[tokio::test]
    async fn failing_deposit_does_not_block_the_batch() {
        let store = MemoryLedger::new();
        funded_user(&store, 1, None, dec!(100)).await;
        funded_user(&store, 2, None, dec!(100)).await;
        let broken = deposits(&store).open_deposit(1, dec!(100)).await.unwrap();
        let healthy = deposits(&store).open_deposit(2, dec!(100)).await.unwrap();
        store.fail_deposit_updates(broken.deposit.deposit_id).await;

        let handler = engine(&store, Duration::from_secs(5), 4);
        let summary = handler.run_daily_accruals(day(1)).await.unwrap();
        assert_eq!(summary.accruals_count, 1);
        assert_eq!(summary.total_accrued, dec!(1));
        assert_eq!(summary.failed, 1);

        // nothing of the failed unit was kept
        let untouched = store.deposit(broken.deposit.deposit_id).await.unwrap();
        assert_eq!(untouched.current_balance, dec!(100));
        assert_eq!(untouched.last_accrual_date, None);
        assert_eq!(store.get_user(1).await.unwrap().unwrap().balance, Decimal::ZERO);

        let accrued = store.deposit(healthy.deposit.deposit_id).await.unwrap();
        assert_eq!(accrued.current_balance, dec!(101));
        assert_eq!(store.get_user(2).await.unwrap().unwrap().balance, dec!(1));
    }

    #[tokio::test]
    async fn stalled_deposit_times_out_and_the_rest_proceed() {
        let store = MemoryLedger::new();
        funded_user(&store, 1, None, dec!(100)).await;
        funded_user(&store, 2, None, dec!(100)).await;
        let stalled = deposits(&store).open_deposit(1, dec!(100)).await.unwrap();
        deposits(&store).open_deposit(2, dec!(100)).await.unwrap();
        store.stall_deposit_updates(stalled.deposit.deposit_id).await;

        let handler = engine(&store, Duration::from_millis(50), 1);
        let summary = handler.run_daily_accruals(day(1)).await.unwrap();
        assert_eq!(summary.accruals_count, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(
            store.deposit(stalled.deposit.deposit_id).await.unwrap().last_accrual_date,
            None
        );
    }

    #[tokio::test]
    async fn closed_deposits_do_not_accrue() {
        let store = MemoryLedger::new();
        funded_user(&store, 1, None, dec!(100)).await;
        let opened = deposits(&store).open_deposit(1, dec!(100)).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.update_deposit_status(
            opened.deposit.deposit_id,
            crate::models::deposits::DepositStatus::Closed,
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let handler = engine(&store, Duration::from_secs(5), 1);
        assert_eq!(handler.run_daily_accruals(day(1)).await.unwrap().accruals_count, 0);
    }

    #[tokio::test]
    async fn run_request_answers_over_the_channel() {
        let store = MemoryLedger::new();
        funded_user(&store, 1, None, dec!(100)).await;
        deposits(&store).open_deposit(1, dec!(20)).await.unwrap();
        let handler = engine(&store, Duration::from_secs(5), 1);

        let (response, receiver) = oneshot::channel();
        handler
            .handle_request(AccrualRequest::Run {
                as_of: Some(day(5)),
                response,
            })
            .await;

        let summary = receiver.await.unwrap().unwrap();
        assert_eq!(summary.accruals_count, 1);
        assert_eq!(summary.total_accrued, dec!(0.2));
    }
}
