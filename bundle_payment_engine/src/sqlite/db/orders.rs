use bpg_common::Cedis;
use log::debug;
use sqlx::SqliteConnection;

use crate::{
    db_types::{BundleItem, FulfillmentStatus, OrderBatch, OrderItem, OwnerId},
    traits::CheckoutError,
};

/// Persists the batch header. A concurrent duplicate insert for the same idempotency key loses on the UNIQUE
/// constraint; the loser gets the winner's row back with the boolean set to `false` and must not write items.
pub async fn insert_batch(
    owner: &OwnerId,
    total: Cedis,
    idempotency_key: &str,
    txn_reference: &str,
    conn: &mut SqliteConnection,
) -> Result<(OrderBatch, bool), CheckoutError> {
    let result: Result<OrderBatch, sqlx::Error> = sqlx::query_as(
        r#"
            INSERT INTO order_batches (idempotency_key, owner_id, total, txn_reference)
            VALUES ($1, $2, $3, $4)
            RETURNING *;
        "#,
    )
    .bind(idempotency_key)
    .bind(owner.as_str())
    .bind(total.value())
    .bind(txn_reference)
    .fetch_one(&mut *conn)
    .await;
    match result {
        Ok(batch) => {
            debug!("🛒️ Order batch #{} persisted for {owner} ({total})", batch.id);
            Ok((batch, true))
        },
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
            debug!("🛒️ Order batch [{idempotency_key}] lost an insert race; returning the winner's row");
            let batch = fetch_batch_by_key(idempotency_key, conn).await?.ok_or_else(|| {
                CheckoutError::DatabaseError(format!("Order batch [{idempotency_key}] vanished after insert conflict"))
            })?;
            Ok((batch, false))
        },
        Err(e) => Err(e.into()),
    }
}

pub async fn insert_items(
    batch_id: i64,
    priced_items: &[(BundleItem, Cedis)],
    conn: &mut SqliteConnection,
) -> Result<Vec<OrderItem>, CheckoutError> {
    let mut items = Vec::with_capacity(priced_items.len());
    for (item, price) in priced_items {
        let row: OrderItem = sqlx::query_as(
            r#"
                INSERT INTO order_items (batch_id, bundle_code, recipient, unit_price)
                VALUES ($1, $2, $3, $4)
                RETURNING *;
            "#,
        )
        .bind(batch_id)
        .bind(&item.bundle_code)
        .bind(&item.recipient)
        .bind(price.value())
        .fetch_one(&mut *conn)
        .await?;
        items.push(row);
    }
    Ok(items)
}

pub async fn fetch_batch_by_key(
    idempotency_key: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<OrderBatch>, CheckoutError> {
    let batch = sqlx::query_as(r#"SELECT * FROM order_batches WHERE idempotency_key = $1"#)
        .bind(idempotency_key)
        .fetch_optional(conn)
        .await?;
    Ok(batch)
}

pub async fn fetch_items_for_batch(
    batch_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<OrderItem>, CheckoutError> {
    let items = sqlx::query_as(r#"SELECT * FROM order_items WHERE batch_id = $1 ORDER BY id ASC"#)
        .bind(batch_id)
        .fetch_all(conn)
        .await?;
    Ok(items)
}

pub async fn update_item_status(
    item_id: i64,
    status: FulfillmentStatus,
    conn: &mut SqliteConnection,
) -> Result<OrderItem, CheckoutError> {
    let status = status.to_string();
    let item: Option<OrderItem> = sqlx::query_as(
        r#"UPDATE order_items SET fulfillment_status = $1, updated_at = CURRENT_TIMESTAMP WHERE id = $2 RETURNING *"#,
    )
    .bind(status)
    .bind(item_id)
    .fetch_optional(conn)
    .await?;
    item.ok_or(CheckoutError::ItemNotFound(item_id))
}
