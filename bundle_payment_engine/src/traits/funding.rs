use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{
    db_types::{ClaimStatus, FundingClaim, NewFundingClaim, OwnerId},
    traits::{ExpirySweepResult, LedgerError, LockoutError},
};

#[derive(Debug, Clone, Error)]
pub enum FundingError {
    #[error("We have an internal database engine problem (configuration/uptime etc.): {0}")]
    DatabaseError(String),
    #[error("Invalid funding request: {0}")]
    ValidationError(String),
    #[error("No wallet exists for owner {0}")]
    WalletNotFound(OwnerId),
    #[error("No funding claim matches")]
    ClaimNotFound,
    #[error("Cannot {action} a claim in the {state} state")]
    InvalidState { state: ClaimStatus, action: String },
    #[error("This code has already been claimed")]
    AlreadyClaimed,
    #[error("The claim window for this code has expired")]
    ExpiredClaim,
    #[error("The caller does not have permission to perform this action")]
    PermissionDenied,
    #[error("Too many failed claim attempts. Try again later.")]
    LockedOut,
    #[error("{0}")]
    LedgerError(#[from] LedgerError),
}

impl From<sqlx::Error> for FundingError {
    fn from(e: sqlx::Error) -> Self {
        FundingError::DatabaseError(e.to_string())
    }
}

impl From<LockoutError> for FundingError {
    fn from(e: LockoutError) -> Self {
        FundingError::DatabaseError(e.to_string())
    }
}

/// Persistence contract for the manual send-and-claim funding workflow.
///
/// The state machine:
/// ```text
/// Initiated --(mark_claim_sent)--> PendingClaim
/// PendingClaim --(settle_claim, before expiry)--> Claimed      [terminal]
/// PendingClaim --(expire_due_claims, past expiry)--> Expired   [terminal]
/// Initiated | PendingClaim --(cancel_claim)--> Cancelled       [terminal]
/// ```
/// Every transition is a conditional update on the current state, so a race between any two of them resolves to
/// exactly one winner; the loser observes the state has moved on and fails cleanly.
#[allow(async_fn_in_trait)]
pub trait FundingClaimStore: Clone {
    /// Persists a new claim in the Initiated state with the given code and expiry. No funds move.
    async fn insert_claim(
        &self,
        claim: NewFundingClaim,
        code: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<FundingClaim, FundingError>;

    /// Transitions Initiated → PendingClaim, recording who sent it and any external transfer reference.
    /// Fails with [`FundingError::InvalidState`] from any other state.
    async fn mark_claim_sent(
        &self,
        claim_id: i64,
        operator: &str,
        external_ref: Option<String>,
        notes: Option<String>,
    ) -> Result<FundingClaim, FundingError>;

    /// Atomically transitions PendingClaim → Claimed *and* credits the target wallet, using the claim code as the
    /// ledger reference, in one storage transaction. `now` is the instant the expiry check is evaluated against.
    ///
    /// Of two concurrent calls for the same code, exactly one succeeds; the other fails with
    /// [`FundingError::AlreadyClaimed`]. A call at or after `expires_at` fails with [`FundingError::ExpiredClaim`].
    async fn settle_claim(
        &self,
        code: &str,
        claimant: &OwnerId,
        now: DateTime<Utc>,
    ) -> Result<FundingClaim, FundingError>;

    /// Transitions Initiated or PendingClaim → Cancelled with a mandatory reason. No funds moved, so nothing to
    /// reverse.
    async fn cancel_claim(&self, claim_id: i64, operator: &str, reason: &str) -> Result<FundingClaim, FundingError>;

    /// Moves every PendingClaim past its expiry into Expired, and reports (without touching) Initiated claims past
    /// theirs. Idempotent; safe to run concurrently with itself and with [`Self::settle_claim`].
    async fn expire_due_claims(&self, now: DateTime<Utc>) -> Result<ExpirySweepResult, FundingError>;

    /// Fetches a claim by its internal id.
    async fn fetch_claim(&self, claim_id: i64) -> Result<Option<FundingClaim>, FundingError>;

    /// Fetches a claim by its code.
    async fn fetch_claim_by_code(&self, code: &str) -> Result<Option<FundingClaim>, FundingError>;
}
