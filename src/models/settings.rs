use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub const ADMIN_PASSWORD_KEY: &str = "admin_password";
pub const NEWS_CONTENT_KEY: &str = "news_content";

#[derive(Clone, Debug, Deserialize, Serialize, sqlx::FromRow)]
pub struct AdminSetting {
    pub setting_key: String,
    pub setting_value: String,
    pub updated_at: chrono::NaiveDateTime,
}

#[derive(Clone, Debug, Default, Serialize, sqlx::FromRow)]
pub struct LedgerStats {
    pub total_users: i64,
    pub total_balance: Decimal,
    pub active_deposits: i64,
    pub active_deposits_amount: Decimal,
}
