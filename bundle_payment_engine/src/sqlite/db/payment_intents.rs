use chrono::{DateTime, Utc};
use log::{debug, trace};
use sqlx::SqliteConnection;

use crate::{
    db_types::{NewPaymentIntent, PaymentIntent},
    traits::ReconcilerError,
};

/// Records a Pending intent when a gateway checkout is initialized. A repeat initialization for the same gateway
/// reference returns the existing row unchanged.
pub async fn idempotent_insert(
    intent: NewPaymentIntent,
    conn: &mut SqliteConnection,
) -> Result<PaymentIntent, ReconcilerError> {
    let gateway_ref = intent.gateway_ref.clone();
    let result: Result<PaymentIntent, sqlx::Error> = sqlx::query_as(
        r#"
            INSERT INTO payment_intents (gateway_ref, owner_id, amount)
            VALUES ($1, $2, $3)
            RETURNING *;
        "#,
    )
    .bind(intent.gateway_ref)
    .bind(intent.owner_id.as_str())
    .bind(intent.amount.value())
    .fetch_one(&mut *conn)
    .await;
    match result {
        Ok(intent) => {
            debug!("🌐️ Payment intent [{}] created for {} ({})", intent.gateway_ref, intent.owner_id, intent.amount);
            Ok(intent)
        },
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
            trace!("🌐️ Payment intent [{gateway_ref}] already exists");
            fetch_by_gateway_ref(&gateway_ref, conn)
                .await?
                .ok_or(ReconcilerError::IntentNotFound(gateway_ref))
        },
        Err(e) => Err(e.into()),
    }
}

pub async fn fetch_by_gateway_ref(
    gateway_ref: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<PaymentIntent>, ReconcilerError> {
    let intent = sqlx::query_as(r#"SELECT * FROM payment_intents WHERE gateway_ref = $1"#)
        .bind(gateway_ref)
        .fetch_optional(conn)
        .await?;
    Ok(intent)
}

/// Marks the intent for `gateway_ref` as Completed, creating the row if the confirmation outran intent creation.
/// A previously purged (Failed) intent is also resolved to Completed here; a late confirmation still counts.
pub async fn upsert_completed(
    gateway_ref: &str,
    owner_id: &str,
    amount: i64,
    conn: &mut SqliteConnection,
) -> Result<PaymentIntent, ReconcilerError> {
    let intent: PaymentIntent = sqlx::query_as(
        r#"
            INSERT INTO payment_intents (gateway_ref, owner_id, amount, status)
            VALUES ($1, $2, $3, 'Completed')
            ON CONFLICT (gateway_ref) DO UPDATE SET
                status = 'Completed',
                updated_at = CURRENT_TIMESTAMP
            RETURNING *;
        "#,
    )
    .bind(gateway_ref)
    .bind(owner_id)
    .bind(amount)
    .fetch_one(conn)
    .await?;
    Ok(intent)
}

/// Marks Pending intents created at or before `cutoff` as Failed and returns them. Idempotent: a second purge over
/// the same window matches nothing.
pub async fn purge_stale(
    cutoff: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Vec<PaymentIntent>, ReconcilerError> {
    let purged: Vec<PaymentIntent> = sqlx::query_as(
        r#"UPDATE payment_intents SET
           status = 'Failed',
           updated_at = CURRENT_TIMESTAMP
           WHERE status = 'Pending' AND unixepoch(created_at) <= unixepoch($1)
           RETURNING *"#,
    )
    .bind(cutoff)
    .fetch_all(conn)
    .await?;
    Ok(purged)
}
