use sqlx::PgExecutor;

use crate::models::settings::LedgerStats;

pub async fn get_setting<'e, E: PgExecutor<'e>>(
    conn: E,
    key: &str,
) -> Result<Option<String>, anyhow::Error> {
    let value: Option<String> =
        sqlx::query_scalar("SELECT setting_value FROM admin_settings WHERE setting_key = $1")
            .bind(key)
            .fetch_optional(conn)
            .await?;

    Ok(value)
}

pub async fn upsert_setting<'e, E: PgExecutor<'e>>(
    conn: E,
    key: &str,
    value: &str,
) -> Result<(), anyhow::Error> {
    sqlx::query(
        r#"
            INSERT INTO admin_settings (setting_key, setting_value)
            VALUES ($1, $2)
            ON CONFLICT (setting_key)
            DO UPDATE SET setting_value = $2, updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(key)
    .bind(value)
    .execute(conn)
    .await?;

    Ok(())
}

pub async fn insert_setting_if_absent<'e, E: PgExecutor<'e>>(
    conn: E,
    key: &str,
    value: &str,
) -> Result<bool, anyhow::Error> {
    let result = sqlx::query(
        r#"
            INSERT INTO admin_settings (setting_key, setting_value)
            VALUES ($1, $2)
            ON CONFLICT (setting_key) DO NOTHING
        "#,
    )
    .bind(key)
    .bind(value)
    .execute(conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn get_stats<'e, E: PgExecutor<'e>>(conn: E) -> Result<LedgerStats, anyhow::Error> {
    let stats = sqlx::query_as::<_, LedgerStats>(
        r#"
            SELECT
                (SELECT COUNT(*) FROM users) AS total_users,
                (SELECT COALESCE(SUM(balance), 0) FROM users) AS total_balance,
                (SELECT COUNT(*) FROM deposits WHERE status = 'active') AS active_deposits,
                (SELECT COALESCE(SUM(current_balance), 0) FROM deposits WHERE status = 'active')
                    AS active_deposits_amount
        "#,
    )
    .fetch_one(conn)
    .await?;

    Ok(stats)
}
