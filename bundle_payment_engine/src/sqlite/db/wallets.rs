use bpg_common::Cedis;
use log::{debug, trace};
use sqlx::SqliteConnection;

use crate::{
    db_types::{OwnerId, Wallet},
    traits::LedgerError,
};

pub async fn fetch_wallet_by_owner(
    owner: &OwnerId,
    conn: &mut SqliteConnection,
) -> Result<Option<Wallet>, LedgerError> {
    let wallet = sqlx::query_as(r#"SELECT * FROM wallets WHERE owner_id = $1"#)
        .bind(owner.as_str())
        .fetch_optional(conn)
        .await?;
    Ok(wallet)
}

pub async fn fetch_wallet(wallet_id: i64, conn: &mut SqliteConnection) -> Result<Option<Wallet>, LedgerError> {
    let wallet = sqlx::query_as(r#"SELECT * FROM wallets WHERE id = $1"#)
        .bind(wallet_id)
        .fetch_optional(conn)
        .await?;
    Ok(wallet)
}

/// Stamps the wallet row and reports whether it exists. Money-moving transactions call this as their very first
/// statement: the write takes the database's write lock up front, so the transaction never has to upgrade from a
/// read snapshot partway through and lose to SQLITE_BUSY under contention.
pub async fn touch(owner: &OwnerId, conn: &mut SqliteConnection) -> Result<bool, LedgerError> {
    let result = sqlx::query(r#"UPDATE wallets SET updated_at = CURRENT_TIMESTAMP WHERE owner_id = $1"#)
        .bind(owner.as_str())
        .execute(conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Creates a zero-balance wallet for the owner. If a wallet already exists for the owner, it is returned unchanged.
pub async fn idempotent_insert(owner: &OwnerId, conn: &mut SqliteConnection) -> Result<Wallet, LedgerError> {
    let result: Result<Wallet, sqlx::Error> =
        sqlx::query_as(r#"INSERT INTO wallets (owner_id) VALUES ($1) RETURNING *"#)
            .bind(owner.as_str())
            .fetch_one(&mut *conn)
            .await;
    match result {
        Ok(wallet) => {
            debug!("💼️ Created wallet #{} for owner {owner}", wallet.id);
            Ok(wallet)
        },
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
            trace!("💼️ Wallet for {owner} already exists");
            fetch_wallet_by_owner(owner, conn).await?.ok_or_else(|| LedgerError::WalletNotFound(owner.clone()))
        },
        Err(e) => Err(e.into()),
    }
}

/// Adds `delta` to the wallet balance without any precondition. Only use for credits; debits must go through
/// [`try_debit`] so that the balance check and the update are one atomic statement.
pub async fn adjust_balance(wallet_id: i64, delta: Cedis, conn: &mut SqliteConnection) -> Result<(), LedgerError> {
    let value = delta.value();
    let _ = sqlx::query(
        r#"UPDATE wallets SET
       balance = balance + $1,
       updated_at = CURRENT_TIMESTAMP
       WHERE id = $2"#,
    )
    .bind(value)
    .bind(wallet_id)
    .execute(conn)
    .await?;
    Ok(())
}

/// Attempts to subtract `amount` from the wallet balance. The availability check and the subtraction are a single
/// conditional UPDATE, so two concurrent debits can never both succeed against the same funds. Returns `false`
/// (and changes nothing) when the balance is insufficient.
pub async fn try_debit(wallet_id: i64, amount: Cedis, conn: &mut SqliteConnection) -> Result<bool, LedgerError> {
    let value = amount.value();
    let result = sqlx::query(
        r#"UPDATE wallets SET
       balance = balance - $1,
       updated_at = CURRENT_TIMESTAMP
       WHERE id = $2 AND balance >= $1"#,
    )
    .bind(value)
    .bind(wallet_id)
    .execute(conn)
    .await?;
    let debited = result.rows_affected() > 0;
    if !debited {
        trace!("💼️ Debit of {amount} against wallet #{wallet_id} refused: insufficient balance");
    }
    Ok(debited)
}
