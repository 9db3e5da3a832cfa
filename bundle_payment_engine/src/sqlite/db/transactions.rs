use bpg_common::Cedis;
use log::debug;
use sqlx::SqliteConnection;

use crate::{
    db_types::{LedgerTransaction, TransactionKind},
    traits::LedgerError,
};

/// Appends a Completed transaction to the log, returning `false` in the second tuple element if a transaction with
/// this reference already existed (in which case the existing row is returned unchanged and nothing is written).
///
/// The uniqueness check rides on the UNIQUE constraints of the table itself, so it cannot race: of two concurrent
/// inserts for the same reference, the database accepts exactly one and the other lands in the replay branch.
pub async fn idempotent_insert(
    wallet_id: i64,
    kind: TransactionKind,
    amount: Cedis,
    reference: &str,
    reverses: Option<&str>,
    description: Option<String>,
    conn: &mut SqliteConnection,
) -> Result<(LedgerTransaction, bool), LedgerError> {
    let result: Result<LedgerTransaction, sqlx::Error> = sqlx::query_as(
        r#"
            INSERT INTO ledger_transactions (wallet_id, kind, amount, reference, reverses, description)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *;
        "#,
    )
    .bind(wallet_id)
    .bind(kind.to_string())
    .bind(amount.value())
    .bind(reference)
    .bind(reverses)
    .bind(description)
    .fetch_one(&mut *conn)
    .await;
    match result {
        Ok(txn) => {
            debug!("🧾️ Transaction [{reference}] recorded for {amount} against wallet #{wallet_id}");
            Ok((txn, true))
        },
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
            if e.message().contains("ledger_transactions.reverses") {
                return Err(LedgerError::AlreadyReversed(reverses.unwrap_or_default().to_string()));
            }
            debug!("🧾️ Transaction [{reference}] already exists. Returning it unchanged.");
            let existing = fetch_by_reference(reference, conn)
                .await?
                .ok_or_else(|| LedgerError::TransactionNotFound(reference.to_string()))?;
            Ok((existing, false))
        },
        Err(e) => Err(e.into()),
    }
}

pub async fn fetch_by_reference(
    reference: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<LedgerTransaction>, LedgerError> {
    let txn = sqlx::query_as(r#"SELECT * FROM ledger_transactions WHERE reference = $1"#)
        .bind(reference)
        .fetch_optional(conn)
        .await?;
    Ok(txn)
}

/// Returns the reversal (Refund) transaction for the given original reference, if one exists.
pub async fn fetch_reversal_of(
    original_reference: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<LedgerTransaction>, LedgerError> {
    let txn = sqlx::query_as(r#"SELECT * FROM ledger_transactions WHERE reverses = $1"#)
        .bind(original_reference)
        .fetch_optional(conn)
        .await?;
    Ok(txn)
}

/// The full transaction log for a wallet, oldest first.
pub async fn fetch_for_wallet(
    wallet_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<LedgerTransaction>, LedgerError> {
    let txns =
        sqlx::query_as(r#"SELECT * FROM ledger_transactions WHERE wallet_id = $1 ORDER BY created_at ASC, id ASC"#)
            .bind(wallet_id)
            .fetch_all(conn)
            .await?;
    Ok(txns)
}
