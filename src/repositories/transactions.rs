use sqlx::PgExecutor;

use crate::models::transactions::{NewTransaction, Transaction, TransactionStatus};

pub async fn insert_transaction<'e, E: PgExecutor<'e>>(
    conn: E,
    transaction: &NewTransaction,
) -> Result<Transaction, anyhow::Error> {
    let transaction = sqlx::query_as::<_, Transaction>(
        r#"
            INSERT INTO transactions
            (user_id, transaction_type, amount, status, description, deposit_id, admin_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
        "#,
    )
    .bind(transaction.user_id)
    .bind(transaction.transaction_type.as_str())
    .bind(transaction.amount)
    .bind(transaction.status.as_str())
    .bind(&transaction.description)
    .bind(transaction.deposit_id)
    .bind(transaction.admin_id)
    .fetch_one(conn)
    .await?;

    Ok(transaction)
}

pub async fn get_transaction<'e, E: PgExecutor<'e>>(
    conn: E,
    transaction_id: i64,
) -> Result<Option<Transaction>, anyhow::Error> {
    let transaction =
        sqlx::query_as::<_, Transaction>("SELECT * FROM transactions WHERE transaction_id = $1")
            .bind(transaction_id)
            .fetch_optional(conn)
            .await?;

    Ok(transaction)
}

pub async fn get_transaction_for_update<'e, E: PgExecutor<'e>>(
    conn: E,
    transaction_id: i64,
) -> Result<Option<Transaction>, anyhow::Error> {
    let transaction = sqlx::query_as::<_, Transaction>(
        "SELECT * FROM transactions WHERE transaction_id = $1 FOR UPDATE",
    )
    .bind(transaction_id)
    .fetch_optional(conn)
    .await?;

    Ok(transaction)
}

pub async fn get_pending_transactions<'e, E: PgExecutor<'e>>(
    conn: E,
    limit: i64,
) -> Result<Vec<Transaction>, anyhow::Error> {
    let transactions = sqlx::query_as::<_, Transaction>(
        r#"SELECT * FROM transactions
        WHERE status = $1
        ORDER BY created_at DESC, transaction_id DESC
        LIMIT $2"#,
    )
    .bind(TransactionStatus::Pending.as_str())
    .bind(limit)
    .fetch_all(conn)
    .await?;

    Ok(transactions)
}

/// `description` replaces the stored text when given; a missing value keeps it.
pub async fn update_transaction_status<'e, E: PgExecutor<'e>>(
    conn: E,
    transaction_id: i64,
    status: TransactionStatus,
    admin_id: Option<i64>,
    description: Option<&str>,
) -> Result<u64, anyhow::Error> {
    let result = sqlx::query(
        r#"
            UPDATE transactions
            SET status = $1,
                admin_id = COALESCE($2, admin_id),
                description = COALESCE($3, description)
            WHERE transaction_id = $4
        "#,
    )
    .bind(status.as_str())
    .bind(admin_id)
    .bind(description)
    .bind(transaction_id)
    .execute(conn)
    .await?;

    Ok(result.rows_affected())
}
