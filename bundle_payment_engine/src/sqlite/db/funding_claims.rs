use chrono::{DateTime, Utc};
use log::{debug, trace, warn};
use sqlx::SqliteConnection;

use crate::{
    db_types::{ClaimStatus, FundingClaim, NewFundingClaim, OwnerId},
    traits::FundingError,
};

pub async fn insert_claim(
    claim: NewFundingClaim,
    code: &str,
    expires_at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<FundingClaim, FundingError> {
    let result: Result<FundingClaim, sqlx::Error> = sqlx::query_as(
        r#"
            INSERT INTO funding_claims (owner_id, amount, channel, code, expires_at, initiated_by, notes)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *;
        "#,
    )
    .bind(claim.owner_id.as_str())
    .bind(claim.amount.value())
    .bind(claim.channel)
    .bind(code)
    .bind(expires_at)
    .bind(claim.initiated_by)
    .bind(claim.notes)
    .fetch_one(conn)
    .await;
    match result {
        Ok(claim) => {
            debug!("🎫️ Funding claim #{} initiated for {} ({})", claim.id, claim.owner_id, claim.amount);
            Ok(claim)
        },
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
            // Code collisions are astronomically rare; the caller regenerates and retries.
            warn!("🎫️ Claim code collision on insert");
            Err(FundingError::ValidationError("Claim code already in use".to_string()))
        },
        Err(e) => Err(e.into()),
    }
}

pub async fn fetch_claim(claim_id: i64, conn: &mut SqliteConnection) -> Result<Option<FundingClaim>, FundingError> {
    let claim =
        sqlx::query_as(r#"SELECT * FROM funding_claims WHERE id = $1"#).bind(claim_id).fetch_optional(conn).await?;
    Ok(claim)
}

pub async fn fetch_claim_by_code(
    code: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<FundingClaim>, FundingError> {
    let claim =
        sqlx::query_as(r#"SELECT * FROM funding_claims WHERE code = $1"#).bind(code).fetch_optional(conn).await?;
    Ok(claim)
}

/// Transitions Initiated → PendingClaim. The state precondition is part of the UPDATE itself, so a concurrent
/// cancel or a repeated call loses cleanly and is diagnosed after the fact.
pub async fn mark_sent(
    claim_id: i64,
    operator: &str,
    external_ref: Option<String>,
    notes: Option<String>,
    conn: &mut SqliteConnection,
) -> Result<FundingClaim, FundingError> {
    let updated: Option<FundingClaim> = sqlx::query_as(
        r#"UPDATE funding_claims SET
           status = 'PendingClaim',
           external_ref = COALESCE($2, external_ref),
           notes = COALESCE($3, notes),
           updated_at = CURRENT_TIMESTAMP
           WHERE id = $1 AND status = 'Initiated'
           RETURNING *"#,
    )
    .bind(claim_id)
    .bind(external_ref)
    .bind(notes)
    .fetch_optional(&mut *conn)
    .await?;
    match updated {
        Some(claim) => {
            debug!("🎫️ Claim #{claim_id} marked sent by {operator}");
            Ok(claim)
        },
        None => Err(diagnose_transition(claim_id, "mark as sent", conn).await?),
    }
}

/// Transitions PendingClaim → Claimed, provided the claim window is still open at `now`. The caller wraps this and
/// the ledger credit in one transaction. Exactly one of any number of concurrent calls for the same code wins.
pub async fn settle(
    code: &str,
    claimant: &OwnerId,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<FundingClaim, FundingError> {
    let updated: Option<FundingClaim> = sqlx::query_as(
        r#"UPDATE funding_claims SET
           status = 'Claimed',
           claimed_by = $2,
           updated_at = CURRENT_TIMESTAMP
           WHERE code = $1 AND status = 'PendingClaim' AND unixepoch(expires_at) > unixepoch($3)
           RETURNING *"#,
    )
    .bind(code)
    .bind(claimant.as_str())
    .bind(now)
    .fetch_optional(&mut *conn)
    .await?;
    match updated {
        Some(claim) => {
            debug!("🎫️ Claim #{} settled by {claimant}", claim.id);
            Ok(claim)
        },
        None => {
            // Work out why the conditional update did not go through.
            let claim = fetch_claim_by_code(code, conn).await?.ok_or(FundingError::ClaimNotFound)?;
            let err = match claim.status {
                ClaimStatus::Claimed => FundingError::AlreadyClaimed,
                ClaimStatus::PendingClaim | ClaimStatus::Expired => FundingError::ExpiredClaim,
                state => FundingError::InvalidState { state, action: "claim".to_string() },
            };
            trace!("🎫️ Claim attempt on code rejected: {err}");
            Err(err)
        },
    }
}

/// Transitions Initiated or PendingClaim → Cancelled. No funds have moved in either state, so there is nothing to
/// reverse.
pub async fn cancel(
    claim_id: i64,
    operator: &str,
    reason: &str,
    conn: &mut SqliteConnection,
) -> Result<FundingClaim, FundingError> {
    let updated: Option<FundingClaim> = sqlx::query_as(
        r#"UPDATE funding_claims SET
           status = 'Cancelled',
           cancel_reason = $2,
           updated_at = CURRENT_TIMESTAMP
           WHERE id = $1 AND status IN ('Initiated', 'PendingClaim')
           RETURNING *"#,
    )
    .bind(claim_id)
    .bind(reason)
    .fetch_optional(&mut *conn)
    .await?;
    match updated {
        Some(claim) => {
            debug!("🎫️ Claim #{claim_id} cancelled by {operator}: {reason}");
            Ok(claim)
        },
        None => Err(diagnose_transition(claim_id, "cancel", conn).await?),
    }
}

/// Moves every PendingClaim whose expiry has passed into Expired and returns them. The racing case matters here:
/// a settle attempt and this sweep touching the same row cannot both win, because each is a single conditional
/// UPDATE on the current status.
pub async fn expire_due(
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Vec<FundingClaim>, FundingError> {
    let expired: Vec<FundingClaim> = sqlx::query_as(
        r#"UPDATE funding_claims SET
           status = 'Expired',
           updated_at = CURRENT_TIMESTAMP
           WHERE status = 'PendingClaim' AND unixepoch(expires_at) <= unixepoch($1)
           RETURNING *"#,
    )
    .bind(now)
    .fetch_all(conn)
    .await?;
    Ok(expired)
}

/// Ids of claims still Initiated past their expiry time. These are never auto-expired (the operator never marked
/// them sent, so no claim window opened); they are reported for manual follow-up.
pub async fn stale_initiated_ids(now: DateTime<Utc>, conn: &mut SqliteConnection) -> Result<Vec<i64>, FundingError> {
    let rows: Vec<(i64,)> = sqlx::query_as(
        r#"SELECT id FROM funding_claims WHERE status = 'Initiated' AND unixepoch(expires_at) <= unixepoch($1)"#,
    )
    .bind(now)
    .fetch_all(conn)
    .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Fetches the claim to explain a failed conditional transition. The row may have changed again since the UPDATE
/// ran, but any answer it gives is a state in which the transition is indeed not allowed.
async fn diagnose_transition(
    claim_id: i64,
    action: &str,
    conn: &mut SqliteConnection,
) -> Result<FundingError, FundingError> {
    let claim = fetch_claim(claim_id, conn).await?.ok_or(FundingError::ClaimNotFound)?;
    Ok(FundingError::InvalidState { state: claim.status, action: action.to_string() })
}
