use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Deserialize, Serialize, sqlx::FromRow)]
pub struct User {
    pub user_id: i64,
    pub username: Option<String>,
    pub full_name: Option<String>,
    pub balance: Decimal,
    // funds reserved by pending withdrawals, not spendable
    pub held_balance: Decimal,
    pub referral_code: String,
    pub referred_by: Option<i64>,
    pub is_admin: bool,
    pub payout_address: Option<String>,
    pub created_at: chrono::NaiveDateTime,
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewUser {
    pub user_id: i64,
    pub username: Option<String>,
    pub full_name: Option<String>,
    pub referral_code: Option<String>,
}

#[derive(Clone, Debug)]
pub struct UserRecord {
    pub user_id: i64,
    pub username: Option<String>,
    pub full_name: Option<String>,
    pub referral_code: String,
    pub referred_by: Option<i64>,
}

#[derive(Clone, Debug, Serialize)]
pub struct UserProfile {
    pub user_id: i64,
    pub balance: Decimal,
    pub held_balance: Decimal,
    pub active_deposits: i64,
    pub referrals_count: i64,
    pub referral_code: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct ReferralSummary {
    pub referral_code: String,
    pub referrals_count: i64,
    pub total_bonuses: Decimal,
}
