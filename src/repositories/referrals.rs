use rust_decimal::Decimal;
use sqlx::PgExecutor;

use crate::models::referrals::{NewReferralBonus, ReferralBonus};

pub async fn insert_referral_bonus<'e, E: PgExecutor<'e>>(
    conn: E,
    bonus: &NewReferralBonus,
) -> Result<ReferralBonus, anyhow::Error> {
    let bonus = sqlx::query_as::<_, ReferralBonus>(
        r#"
            INSERT INTO referral_bonuses (referrer_id, referred_id, amount, transaction_id)
            VALUES ($1, $2, $3, $4)
            RETURNING *
        "#,
    )
    .bind(bonus.referrer_id)
    .bind(bonus.referred_id)
    .bind(bonus.amount)
    .bind(bonus.transaction_id)
    .fetch_one(conn)
    .await?;

    Ok(bonus)
}

pub async fn total_referral_bonuses<'e, E: PgExecutor<'e>>(
    conn: E,
    referrer_id: i64,
) -> Result<Decimal, anyhow::Error> {
    let total: Decimal = sqlx::query_scalar(
        "SELECT COALESCE(SUM(amount), 0) FROM referral_bonuses WHERE referrer_id = $1",
    )
    .bind(referrer_id)
    .fetch_one(conn)
    .await?;

    Ok(total)
}
