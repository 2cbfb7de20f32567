use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;

use super::{RequestHandler, Service, ServiceError};
use crate::models::deposits::DepositStatus;
use crate::models::users::{NewUser, ReferralSummary, User, UserProfile, UserRecord};
use crate::repositories::LedgerStore;
use crate::utils::generate_referral_code;

const REFERRAL_CODE_ATTEMPTS: usize = 10;

pub enum UserRequest {
    GetOrCreateUser {
        new_user: NewUser,
        response: oneshot::Sender<Result<User, ServiceError>>,
    },
    GetUser {
        id: i64,
        response: oneshot::Sender<Result<User, ServiceError>>,
    },
    GetProfile {
        id: i64,
        response: oneshot::Sender<Result<UserProfile, ServiceError>>,
    },
    GetReferrals {
        id: i64,
        response: oneshot::Sender<Result<ReferralSummary, ServiceError>>,
    },
}

#[derive(Clone)]
pub struct UserRequestHandler {
    store: Arc<dyn LedgerStore>,
}

impl UserRequestHandler {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        UserRequestHandler { store }
    }

    /// Registers a user on first contact. The referral code they arrived with
    /// is only honoured on that first call, and never when it is their own.
    pub async fn get_or_create_user(&self, new_user: NewUser) -> Result<User, ServiceError> {
        if let Some(user) = self.store.get_user(new_user.user_id).await? {
            return Ok(user);
        }

        let referred_by = match new_user.referral_code.as_deref().map(str::trim) {
            Some(code) if !code.is_empty() => self
                .store
                .get_user_by_referral_code(code)
                .await?
                .map(|referrer| referrer.user_id)
                .filter(|referrer_id| *referrer_id != new_user.user_id),
            _ => None,
        };

        let referral_code = self.unused_referral_code().await?;
        let user = self
            .store
            .create_user(&UserRecord {
                user_id: new_user.user_id,
                username: new_user.username,
                full_name: new_user.full_name,
                referral_code,
                referred_by,
            })
            .await?;

        log::info!(
            "Registered user {} (referred by {:?})",
            user.user_id,
            user.referred_by
        );

        Ok(user)
    }

    async fn unused_referral_code(&self) -> Result<String, ServiceError> {
        for _ in 0..REFERRAL_CODE_ATTEMPTS {
            let code = generate_referral_code();

            if self.store.get_user_by_referral_code(&code).await?.is_none() {
                return Ok(code);
            }
            log::debug!("Referral code {} already taken, retrying", code);
        }

        Err(ServiceError::Storage(
            "could not generate an unused referral code".to_string(),
        ))
    }

    pub async fn get_user(&self, id: i64) -> Result<User, ServiceError> {
        self.store
            .get_user(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("user {}", id)))
    }

    pub async fn profile(&self, id: i64) -> Result<UserProfile, ServiceError> {
        let user = self.get_user(id).await?;
        let active_deposits = self
            .store
            .get_user_deposits(id)
            .await?
            .iter()
            .filter(|d| d.status == DepositStatus::Active)
            .count() as i64;
        let referrals_count = self.store.count_referrals(id).await?;

        Ok(UserProfile {
            user_id: user.user_id,
            balance: user.balance,
            held_balance: user.held_balance,
            active_deposits,
            referrals_count,
            referral_code: user.referral_code,
        })
    }

    pub async fn referral_summary(&self, id: i64) -> Result<ReferralSummary, ServiceError> {
        let user = self.get_user(id).await?;

        Ok(ReferralSummary {
            referral_code: user.referral_code,
            referrals_count: self.store.count_referrals(id).await?,
            total_bonuses: self.store.total_referral_bonuses(id).await?,
        })
    }
}

#[async_trait]
impl RequestHandler<UserRequest> for UserRequestHandler {
    async fn handle_request(&self, request: UserRequest) {
        match request {
            UserRequest::GetOrCreateUser { new_user, response } => {
                let user = self.get_or_create_user(new_user).await;
                let _ = response.send(user);
            }
            UserRequest::GetUser { id, response } => {
                let user = self.get_user(id).await;
                let _ = response.send(user);
            }
            UserRequest::GetProfile { id, response } => {
                let profile = self.profile(id).await;
                let _ = response.send(profile);
            }
            UserRequest::GetReferrals { id, response } => {
                let summary = self.referral_summary(id).await;
                let _ = response.send(summary);
            }
        }
    }
}

pub struct UserService;

impl UserService {
    pub fn new() -> Self {
        UserService {}
    }
}

#[async_trait]
impl Service<UserRequest, UserRequestHandler> for UserService {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::memory::MemoryLedger;
    use crate::repositories::notifier::LogNotifier;
    use crate::services::deposits::DepositRequestHandler;
    use crate::services::testing::{funded_user, ledger_rules};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn new_user(user_id: i64, referral_code: Option<&str>) -> NewUser {
        NewUser {
            user_id,
            username: Some(format!("user{user_id}")),
            full_name: Some("Test User".to_string()),
            referral_code: referral_code.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn first_contact_registers_with_a_fresh_code() {
        let store = MemoryLedger::new();
        let handler = UserRequestHandler::new(Arc::new(store.clone()));

        let user = handler.get_or_create_user(new_user(1, None)).await.unwrap();

        assert_eq!(user.balance, Decimal::ZERO);
        assert_eq!(user.referral_code.len(), 8);
        assert!(user.referred_by.is_none());
        assert!(!user.is_admin);

        let again = handler.get_or_create_user(new_user(1, None)).await.unwrap();
        assert_eq!(again.referral_code, user.referral_code);
    }

    #[tokio::test]
    async fn concurrent_first_contacts_resolve_to_one_user() {
        let store = MemoryLedger::new();
        let handler = UserRequestHandler::new(Arc::new(store.clone()));

        let (first, second) = tokio::join!(
            handler.get_or_create_user(new_user(1, None)),
            handler.get_or_create_user(new_user(1, None)),
        );

        let (first, second) = (first.unwrap(), second.unwrap());
        assert_eq!(first.referral_code, second.referral_code);
        assert_eq!(
            store.get_user(1).await.unwrap().unwrap().referral_code,
            first.referral_code
        );
    }

    #[tokio::test]
    async fn referral_code_links_the_referrer() {
        let store = MemoryLedger::new();
        funded_user(&store, 1, None, Decimal::ZERO).await;
        let handler = UserRequestHandler::new(Arc::new(store.clone()));

        let user = handler
            .get_or_create_user(new_user(2, Some("CODE0001")))
            .await
            .unwrap();
        assert_eq!(user.referred_by, Some(1));

        let unknown = handler
            .get_or_create_user(new_user(3, Some("NOPE0000")))
            .await
            .unwrap();
        assert!(unknown.referred_by.is_none());
    }

    #[tokio::test]
    async fn referrer_is_fixed_at_registration() {
        let store = MemoryLedger::new();
        funded_user(&store, 1, None, Decimal::ZERO).await;
        funded_user(&store, 2, None, Decimal::ZERO).await;
        let handler = UserRequestHandler::new(Arc::new(store.clone()));

        let user = handler
            .get_or_create_user(new_user(2, Some("CODE0001")))
            .await
            .unwrap();
        assert!(user.referred_by.is_none());
    }

    #[tokio::test]
    async fn profile_and_referrals_reflect_the_ledger() {
        let store = MemoryLedger::new();
        funded_user(&store, 1, None, dec!(20)).await;
        funded_user(&store, 2, Some(1), dec!(200)).await;
        let deposits = DepositRequestHandler::new(
            Arc::new(store.clone()),
            Arc::new(LogNotifier),
            Arc::new(Vec::new()),
            ledger_rules(),
        );
        deposits.open_deposit(2, dec!(100)).await.unwrap();
        deposits.open_deposit(1, dec!(10)).await.unwrap();
        let handler = UserRequestHandler::new(Arc::new(store.clone()));

        let profile = handler.profile(1).await.unwrap();
        assert_eq!(profile.balance, dec!(15));
        assert_eq!(profile.active_deposits, 1);
        assert_eq!(profile.referrals_count, 1);
        assert_eq!(profile.referral_code, "CODE0001");

        let summary = handler.referral_summary(1).await.unwrap();
        assert_eq!(summary.referrals_count, 1);
        assert_eq!(summary.total_bonuses, dec!(5));

        assert!(matches!(
            handler.profile(42).await,
            Err(ServiceError::NotFound(_))
        ));
    }
}
