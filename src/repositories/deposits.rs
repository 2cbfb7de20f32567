use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::PgExecutor;

use crate::models::deposits::{Deposit, DepositStatus, NewDeposit};

pub async fn get_active_deposits<'e, E: PgExecutor<'e>>(
    conn: E,
) -> Result<Vec<Deposit>, anyhow::Error> {
    let deposits = sqlx::query_as::<_, Deposit>(
        "SELECT * FROM deposits WHERE status = $1 ORDER BY deposit_id",
    )
    .bind(DepositStatus::Active.as_str())
    .fetch_all(conn)
    .await?;

    Ok(deposits)
}

pub async fn get_user_deposits<'e, E: PgExecutor<'e>>(
    conn: E,
    user_id: i64,
) -> Result<Vec<Deposit>, anyhow::Error> {
    let deposits = sqlx::query_as::<_, Deposit>(
        "SELECT * FROM deposits WHERE user_id = $1 ORDER BY created_at DESC, deposit_id DESC",
    )
    .bind(user_id)
    .fetch_all(conn)
    .await?;

    Ok(deposits)
}

pub async fn get_deposit_for_update<'e, E: PgExecutor<'e>>(
    conn: E,
    deposit_id: i64,
) -> Result<Option<Deposit>, anyhow::Error> {
    let deposit =
        sqlx::query_as::<_, Deposit>("SELECT * FROM deposits WHERE deposit_id = $1 FOR UPDATE")
            .bind(deposit_id)
            .fetch_optional(conn)
            .await?;

    Ok(deposit)
}

pub async fn insert_deposit<'e, E: PgExecutor<'e>>(
    conn: E,
    deposit: &NewDeposit,
) -> Result<Deposit, anyhow::Error> {
    let deposit = sqlx::query_as::<_, Deposit>(
        r#"
            INSERT INTO deposits (user_id, amount, interest_rate, current_balance, status)
            VALUES ($1, $2, $3, $2, $4)
            RETURNING *
        "#,
    )
    .bind(deposit.user_id)
    .bind(deposit.amount)
    .bind(deposit.interest_rate)
    .bind(DepositStatus::Active.as_str())
    .fetch_one(conn)
    .await?;

    Ok(deposit)
}

pub async fn update_deposit<'e, E: PgExecutor<'e>>(
    conn: E,
    deposit_id: i64,
    new_balance: Decimal,
    last_accrual_date: NaiveDate,
    earned_delta: Decimal,
) -> Result<u64, anyhow::Error> {
    let result = sqlx::query(
        r#"
            UPDATE deposits
            SET current_balance = $1,
                last_accrual_date = $2,
                total_earned = total_earned + $3
            WHERE deposit_id = $4
        "#,
    )
    .bind(new_balance)
    .bind(last_accrual_date)
    .bind(earned_delta)
    .bind(deposit_id)
    .execute(conn)
    .await?;

    Ok(result.rows_affected())
}

pub async fn update_deposit_status<'e, E: PgExecutor<'e>>(
    conn: E,
    deposit_id: i64,
    status: DepositStatus,
) -> Result<u64, anyhow::Error> {
    let result = sqlx::query("UPDATE deposits SET status = $1 WHERE deposit_id = $2")
        .bind(status.as_str())
        .bind(deposit_id)
        .execute(conn)
        .await?;

    Ok(result.rows_affected())
}
