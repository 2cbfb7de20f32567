use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;

use super::{require_admin, RequestHandler, Service, ServiceError};
use crate::models::settings::{LedgerStats, ADMIN_PASSWORD_KEY, NEWS_CONTENT_KEY};
use crate::repositories::LedgerStore;
use crate::utils::hash_password;

const MIN_PASSWORD_LENGTH: usize = 3;

pub enum AdminRequest {
    Authorize {
        admin_id: i64,
        response: oneshot::Sender<Result<(), ServiceError>>,
    },
    Login {
        admin_id: i64,
        password: String,
        response: oneshot::Sender<Result<(), ServiceError>>,
    },
    ChangePassword {
        admin_id: i64,
        password: String,
        response: oneshot::Sender<Result<(), ServiceError>>,
    },
    GetNews {
        response: oneshot::Sender<Result<String, ServiceError>>,
    },
    SetNews {
        admin_id: i64,
        content: String,
        response: oneshot::Sender<Result<(), ServiceError>>,
    },
    GetStats {
        admin_id: i64,
        response: oneshot::Sender<Result<LedgerStats, ServiceError>>,
    },
    SetAdmin {
        admin_id: i64,
        user_id: i64,
        is_admin: bool,
        response: oneshot::Sender<Result<(), ServiceError>>,
    },
}

#[derive(Clone)]
pub struct AdminRequestHandler {
    store: Arc<dyn LedgerStore>,
    admin_ids: Arc<Vec<i64>>,
    default_password: String,
}

impl AdminRequestHandler {
    pub fn new(store: Arc<dyn LedgerStore>, admin_ids: Arc<Vec<i64>>, default_password: String) -> Self {
        Self {
            store,
            admin_ids,
            default_password,
        }
    }

    /// Stores the configured password unless one was set before, and flags
    /// the configured administrators that are already registered.
    pub async fn seed_password(&self) -> Result<(), ServiceError> {
        let seeded = self
            .store
            .insert_setting_if_absent(ADMIN_PASSWORD_KEY, &hash_password(&self.default_password))
            .await?;
        if seeded {
            log::info!("Admin password seeded from configuration");
        }

        for admin_id in self.admin_ids.iter() {
            if self.store.set_admin(*admin_id, true).await? {
                log::info!("User {} flagged as administrator", admin_id);
            }
        }

        Ok(())
    }

    pub async fn verify_admin_password(&self, admin_id: i64, password: &str) -> Result<(), ServiceError> {
        require_admin(self.store.as_ref(), &self.admin_ids, admin_id).await?;

        let stored = match self.store.get_setting(ADMIN_PASSWORD_KEY).await? {
            Some(hash) => hash,
            None => hash_password(&self.default_password),
        };

        if hash_password(password) != stored {
            log::warn!("Failed admin login for user {}", admin_id);
            return Err(ServiceError::InvalidPassword);
        }

        Ok(())
    }

    pub async fn change_admin_password(&self, admin_id: i64, password: &str) -> Result<(), ServiceError> {
        require_admin(self.store.as_ref(), &self.admin_ids, admin_id).await?;

        let password = password.trim();
        if password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(ServiceError::InvalidPassword);
        }

        self.store
            .upsert_setting(ADMIN_PASSWORD_KEY, &hash_password(password))
            .await?;
        log::info!("Admin password changed by {}", admin_id);

        Ok(())
    }

    pub async fn get_news(&self) -> Result<String, ServiceError> {
        Ok(self
            .store
            .get_setting(NEWS_CONTENT_KEY)
            .await?
            .unwrap_or_default())
    }

    pub async fn set_news(&self, admin_id: i64, content: &str) -> Result<(), ServiceError> {
        require_admin(self.store.as_ref(), &self.admin_ids, admin_id).await?;

        self.store
            .upsert_setting(NEWS_CONTENT_KEY, content.trim())
            .await?;

        Ok(())
    }

    pub async fn stats(&self, admin_id: i64) -> Result<LedgerStats, ServiceError> {
        require_admin(self.store.as_ref(), &self.admin_ids, admin_id).await?;

        Ok(self.store.get_stats().await?)
    }

    pub async fn set_admin(&self, admin_id: i64, user_id: i64, is_admin: bool) -> Result<(), ServiceError> {
        require_admin(self.store.as_ref(), &self.admin_ids, admin_id).await?;

        if !self.store.set_admin(user_id, is_admin).await? {
            return Err(ServiceError::NotFound(format!("user {}", user_id)));
        }
        log::info!("Admin {} set is_admin={} for user {}", admin_id, is_admin, user_id);

        Ok(())
    }
}

#[async_trait]
impl RequestHandler<AdminRequest> for AdminRequestHandler {
    async fn handle_request(&self, request: AdminRequest) {
        match request {
            AdminRequest::Authorize { admin_id, response } => {
                let result = require_admin(self.store.as_ref(), &self.admin_ids, admin_id).await;
                let _ = response.send(result);
            }
            AdminRequest::Login {
                admin_id,
                password,
                response,
            } => {
                let result = self.verify_admin_password(admin_id, &password).await;
                let _ = response.send(result);
            }
            AdminRequest::ChangePassword {
                admin_id,
                password,
                response,
            } => {
                let result = self.change_admin_password(admin_id, &password).await;
                let _ = response.send(result);
            }
            AdminRequest::GetNews { response } => {
                let _ = response.send(self.get_news().await);
            }
            AdminRequest::SetNews {
                admin_id,
                content,
                response,
            } => {
                let result = self.set_news(admin_id, &content).await;
                let _ = response.send(result);
            }
            AdminRequest::GetStats { admin_id, response } => {
                let _ = response.send(self.stats(admin_id).await);
            }
            AdminRequest::SetAdmin {
                admin_id,
                user_id,
                is_admin,
                response,
            } => {
                let result = self.set_admin(admin_id, user_id, is_admin).await;
                let _ = response.send(result);
            }
        }
    }
}

pub struct AdminService;

impl AdminService {
    pub fn new() -> Self {
        AdminService {}
    }
}

#[async_trait]
impl Service<AdminRequest, AdminRequestHandler> for AdminService {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::memory::MemoryLedger;
    use crate::services::testing::funded_user;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    const ADMIN: i64 = 1;

    fn handler(store: &MemoryLedger) -> AdminRequestHandler {
        AdminRequestHandler::new(Arc::new(store.clone()), Arc::new(vec![ADMIN]), "123".to_string())
    }

    #[tokio::test]
    async fn seeded_password_is_hashed_and_not_overwritten() {
        let store = MemoryLedger::new();
        let admin = handler(&store);

        admin.seed_password().await.unwrap();
        let stored = store.get_setting(ADMIN_PASSWORD_KEY).await.unwrap().unwrap();
        assert_eq!(stored, hash_password("123"));

        admin.change_admin_password(ADMIN, "secret").await.unwrap();
        admin.seed_password().await.unwrap();
        assert!(admin.verify_admin_password(ADMIN, "secret").await.is_ok());
        assert!(matches!(
            admin.verify_admin_password(ADMIN, "123").await,
            Err(ServiceError::InvalidPassword)
        ));
    }

    #[tokio::test]
    async fn default_password_works_before_seeding() {
        let store = MemoryLedger::new();

        assert!(handler(&store).verify_admin_password(ADMIN, "123").await.is_ok());
    }

    #[tokio::test]
    async fn short_passwords_and_strangers_are_refused() {
        let store = MemoryLedger::new();
        let admin = handler(&store);

        assert!(matches!(
            admin.change_admin_password(ADMIN, " ab ").await,
            Err(ServiceError::InvalidPassword)
        ));
        assert!(matches!(
            admin.verify_admin_password(2, "123").await,
            Err(ServiceError::Unauthorized(2))
        ));
        assert!(matches!(
            admin.set_news(2, "hello").await,
            Err(ServiceError::Unauthorized(2))
        ));
    }

    #[tokio::test]
    async fn news_round_trips_through_settings() {
        let store = MemoryLedger::new();
        let admin = handler(&store);

        assert_eq!(admin.get_news().await.unwrap(), "");
        admin.set_news(ADMIN, "  Rates are up  ").await.unwrap();
        assert_eq!(admin.get_news().await.unwrap(), "Rates are up");
    }

    #[tokio::test]
    async fn configured_admins_are_flagged_and_can_promote_others() {
        let store = MemoryLedger::new();
        funded_user(&store, ADMIN, None, dec!(10)).await;
        funded_user(&store, 2, None, dec!(5)).await;
        let admin = handler(&store);

        admin.seed_password().await.unwrap();
        assert!(store.get_user(ADMIN).await.unwrap().unwrap().is_admin);

        admin.set_admin(ADMIN, 2, true).await.unwrap();
        assert!(store.get_user(2).await.unwrap().unwrap().is_admin);
        assert!(matches!(
            admin.set_admin(ADMIN, 3, true).await,
            Err(ServiceError::NotFound(_))
        ));

        let stats = admin.stats(2).await.unwrap();
        assert_eq!(stats.total_users, 2);
        assert_eq!(stats.total_balance, dec!(15));
        assert_eq!(stats.active_deposits, 0);
        assert_eq!(stats.active_deposits_amount, Decimal::ZERO);
    }
}
