use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Deserialize, Serialize, sqlx::FromRow)]
pub struct ReferralBonus {
    pub bonus_id: i64,
    pub referrer_id: i64,
    pub referred_id: i64,
    pub amount: Decimal,
    pub transaction_id: Option<i64>,
    pub created_at: chrono::NaiveDateTime,
}

#[derive(Clone, Debug)]
pub struct NewReferralBonus {
    pub referrer_id: i64,
    pub referred_id: i64,
    pub amount: Decimal,
    pub transaction_id: Option<i64>,
}
