use rust_decimal::Decimal;
use sqlx::PgExecutor;

use crate::models::users::{User, UserRecord};

pub async fn get_user<'e, E: PgExecutor<'e>>(
    conn: E,
    user_id: i64,
) -> Result<Option<User>, anyhow::Error> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE user_id = $1")
        .bind(user_id)
        .fetch_optional(conn)
        .await?;

    Ok(user)
}

pub async fn get_user_for_update<'e, E: PgExecutor<'e>>(
    conn: E,
    user_id: i64,
) -> Result<Option<User>, anyhow::Error> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE user_id = $1 FOR UPDATE")
        .bind(user_id)
        .fetch_optional(conn)
        .await?;

    Ok(user)
}

pub async fn get_user_by_referral_code<'e, E: PgExecutor<'e>>(
    conn: E,
    code: &str,
) -> Result<Option<User>, anyhow::Error> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE referral_code = $1")
        .bind(code)
        .fetch_optional(conn)
        .await?;

    Ok(user)
}

/// Returns `None` when the user already exists.
pub async fn insert_user<'e, E: PgExecutor<'e>>(
    conn: E,
    user: &UserRecord,
) -> Result<Option<User>, anyhow::Error> {
    let user = sqlx::query_as::<_, User>(
        r#"
            INSERT INTO users (user_id, username, full_name, referral_code, referred_by)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id) DO NOTHING
            RETURNING *
        "#,
    )
    .bind(user.user_id)
    .bind(&user.username)
    .bind(&user.full_name)
    .bind(&user.referral_code)
    .bind(user.referred_by)
    .fetch_optional(conn)
    .await?;

    Ok(user)
}

pub async fn adjust_balance<'e, E: PgExecutor<'e>>(
    conn: E,
    user_id: i64,
    delta: Decimal,
) -> Result<Option<Decimal>, anyhow::Error> {
    let balance = sqlx::query_scalar::<_, Decimal>(
        "UPDATE users SET balance = balance + $1 WHERE user_id = $2 RETURNING balance",
    )
    .bind(delta)
    .bind(user_id)
    .fetch_optional(conn)
    .await?;

    Ok(balance)
}

pub async fn adjust_held_balance<'e, E: PgExecutor<'e>>(
    conn: E,
    user_id: i64,
    delta: Decimal,
) -> Result<Option<Decimal>, anyhow::Error> {
    let held = sqlx::query_scalar::<_, Decimal>(
        "UPDATE users SET held_balance = held_balance + $1 WHERE user_id = $2 RETURNING held_balance",
    )
    .bind(delta)
    .bind(user_id)
    .fetch_optional(conn)
    .await?;

    Ok(held)
}

pub async fn set_payout_address<'e, E: PgExecutor<'e>>(
    conn: E,
    user_id: i64,
    address: &str,
) -> Result<(), anyhow::Error> {
    sqlx::query("UPDATE users SET payout_address = $1 WHERE user_id = $2")
        .bind(address)
        .bind(user_id)
        .execute(conn)
        .await?;

    Ok(())
}

pub async fn set_admin<'e, E: PgExecutor<'e>>(
    conn: E,
    user_id: i64,
    is_admin: bool,
) -> Result<bool, anyhow::Error> {
    let result = sqlx::query("UPDATE users SET is_admin = $1 WHERE user_id = $2")
        .bind(is_admin)
        .bind(user_id)
        .execute(conn)
        .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn count_referrals<'e, E: PgExecutor<'e>>(
    conn: E,
    user_id: i64,
) -> Result<i64, anyhow::Error> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE referred_by = $1")
        .bind(user_id)
        .fetch_one(conn)
        .await?;

    Ok(count)
}
