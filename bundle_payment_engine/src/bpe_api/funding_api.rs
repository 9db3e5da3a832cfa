//! API for the manual send-and-claim funding workflow.

use std::fmt::Debug;

use chrono::{Duration, Utc};
use log::*;

use crate::{
    db_types::{CallerIdentity, FundingClaim, NewFundingClaim, OwnerId},
    events::{ClaimSettledEvent, EventProducers, WalletCreditedEvent},
    helpers::generate_claim_code,
    traits::{ExpirySweepResult, FundingClaimStore, FundingError, LedgerAudit, LockoutStore},
};

/// How many fresh codes to try when an insert collides with an existing one. With ~71 bits of entropy per code a
/// single collision is already extraordinary; two in a row means something else is wrong.
const CODE_RETRIES: usize = 3;

/// Claim attempts allowed per caller without a success before further attempts are refused. Claim codes are
/// shared secrets, so unbounded guessing cannot be allowed.
const MAX_CLAIM_FAILURES: i64 = 5;

/// How long a caller stays locked out after exhausting their attempts, in minutes.
const CLAIM_LOCKOUT_MINUTES: i64 = 15;

/// `FundingApi` drives the two-phase manual funding state machine.
///
/// An operator initiates a claim (recording intent, no funds move), marks it sent once the external transfer has
/// actually been made, and the customer redeems the claim code to credit their wallet. Cancellations and expiry
/// sweeps close abandoned cycles without ever touching a balance.
pub struct FundingApi<B> {
    db: B,
    claim_ttl: Duration,
    producers: EventProducers,
}

impl<B> Debug for FundingApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FundingApi")
    }
}

impl<B> FundingApi<B> {
    /// `claim_ttl` is the window between a claim being initiated and its code lapsing.
    pub fn new(db: B, claim_ttl: Duration, producers: EventProducers) -> Self {
        Self { db, claim_ttl, producers }
    }

    async fn call_claim_settled_hook(&self, claim: &FundingClaim) {
        for emitter in &self.producers.claim_settled_producer {
            debug!("🎫️ Notifying claim settled hook subscribers");
            let event = ClaimSettledEvent::new(claim.clone());
            emitter.publish_event(event).await;
        }
    }
}

impl<B> FundingApi<B>
where B: FundingClaimStore + LedgerAudit + LockoutStore
{
    /// Opens a new funding cycle for `claim.owner_id`. Operator only. Returns the persisted claim, including the
    /// generated claim code the operator passes on to the customer.
    pub async fn initiate(
        &self,
        caller: &CallerIdentity,
        claim: NewFundingClaim,
    ) -> Result<FundingClaim, FundingError> {
        if !caller.is_operator() {
            warn!("🎫️ {} tried to initiate a funding claim without operator rights", caller.owner_id);
            return Err(FundingError::PermissionDenied);
        }
        if !claim.amount.is_positive() {
            return Err(FundingError::ValidationError(format!(
                "Claim amount must be strictly positive, got {}",
                claim.amount
            )));
        }
        // The target wallet must exist up front so that settlement can never fail on a missing wallet.
        if self.db.fetch_wallet(&claim.owner_id).await?.is_none() {
            return Err(FundingError::WalletNotFound(claim.owner_id.clone()));
        }
        let expires_at = Utc::now() + self.claim_ttl;
        let mut last_err = None;
        for _ in 0..CODE_RETRIES {
            let code = generate_claim_code();
            match self.db.insert_claim(claim.clone(), &code, expires_at).await {
                Ok(persisted) => {
                    info!(
                        "🎫️ Funding claim #{} initiated for {} ({}) by {}, expires {}",
                        persisted.id, persisted.owner_id, persisted.amount, persisted.initiated_by, expires_at
                    );
                    return Ok(persisted);
                },
                Err(FundingError::ValidationError(msg)) => {
                    warn!("🎫️ Claim code collision, regenerating: {msg}");
                    last_err = Some(FundingError::ValidationError(msg));
                },
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            FundingError::ValidationError("Could not generate a unique claim code".to_string())
        }))
    }

    /// Records that the operator has made the external transfer, opening the claim window. Operator only.
    pub async fn mark_sent(
        &self,
        caller: &CallerIdentity,
        claim_id: i64,
        external_ref: Option<String>,
        notes: Option<String>,
    ) -> Result<FundingClaim, FundingError> {
        if !caller.is_operator() {
            return Err(FundingError::PermissionDenied);
        }
        let claim = self.db.mark_claim_sent(claim_id, caller.owner_id.as_str(), external_ref, notes).await?;
        info!("🎫️ Claim #{claim_id} marked sent by {}; claim window open until {}", caller.owner_id, claim.expires_at);
        Ok(claim)
    }

    /// Redeems a claim code, crediting the target wallet. The status transition and the credit are one atomic
    /// unit, so of any number of concurrent attempts on one code, exactly one credits.
    ///
    /// Redemption is owner only: the code is a shared secret between the operator and the customer the claim was
    /// opened for, and nobody else may settle it. Every attempt counts against the caller; once more than
    /// [`MAX_CLAIM_FAILURES`] accumulate without a success, further attempts are refused with
    /// [`FundingError::LockedOut`] until the counter lapses. A successful claim clears the counter.
    pub async fn claim(&self, caller: &CallerIdentity, code: &str) -> Result<FundingClaim, FundingError> {
        let lockout_key = format!("claim:{}", caller.owner_id);
        // Count the attempt before looking anything up. The upsert returns the authoritative tally from its own
        // connection, so a guess past the limit is refused even when a plain read would still lag behind.
        let window = Utc::now() + Duration::minutes(CLAIM_LOCKOUT_MINUTES);
        let attempts = self.db.record_attempt(&lockout_key, window).await?;
        if attempts > MAX_CLAIM_FAILURES {
            warn!("🎫️ {} is locked out of claiming after repeated failures", caller.owner_id);
            return Err(FundingError::LockedOut);
        }
        debug!("🎫️ Claim attempt {attempts} by {}", caller.owner_id);
        let target = self.db.fetch_claim_by_code(code).await?.ok_or(FundingError::ClaimNotFound)?;
        if !caller.acts_for(&target.owner_id) {
            warn!("🎫️ {} tried to redeem a claim code belonging to {}", caller.owner_id, target.owner_id);
            return Err(FundingError::PermissionDenied);
        }
        let claim = self.db.settle_claim(code, &caller.owner_id, Utc::now()).await?;
        self.db.reset(&lockout_key).await?;
        info!("🎫️ Claim #{} settled by {}; {} credited to {}", claim.id, caller.owner_id, claim.amount, claim.owner_id);
        self.call_claim_settled_hook(&claim).await;
        // The settlement credit is a wallet credit like any other, so those subscribers hear about it too.
        if let Ok(Some(txn)) = self.db.fetch_transaction_by_reference(&claim.code).await {
            for emitter in &self.producers.wallet_credited_producer {
                emitter.publish_event(WalletCreditedEvent::new(txn.clone())).await;
            }
        }
        Ok(claim)
    }

    /// Cancels a claim that has not settled. Operator only; the reason is mandatory because a cancellation voids a
    /// transfer the operator may already have asserted.
    pub async fn cancel(
        &self,
        caller: &CallerIdentity,
        claim_id: i64,
        reason: &str,
    ) -> Result<FundingClaim, FundingError> {
        if !caller.is_operator() {
            return Err(FundingError::PermissionDenied);
        }
        if reason.trim().is_empty() {
            return Err(FundingError::ValidationError("A cancellation reason is required".to_string()));
        }
        let claim = self.db.cancel_claim(claim_id, caller.owner_id.as_str(), reason).await?;
        info!("🎫️ Claim #{claim_id} cancelled by {}: {reason}", caller.owner_id);
        Ok(claim)
    }

    /// Expires every lapsed claim window and reports initiated-but-never-sent claims for follow-up.
    pub async fn expire_sweep(&self) -> Result<ExpirySweepResult, FundingError> {
        let result = self.db.expire_due_claims(Utc::now()).await?;
        if result.expired_count() > 0 {
            info!("🎫️ Expiry sweep moved {} claim(s) to Expired", result.expired_count());
        }
        if result.stale_initiated_count() > 0 {
            warn!(
                "🎫️ {} claim(s) are past expiry but still Initiated; the transfer was never marked sent: {:?}",
                result.stale_initiated_count(),
                result.stale_initiated
            );
        }
        Ok(result)
    }

    /// Fetches a claim by id. Operators see any claim; customers only their own.
    pub async fn claim_by_id(
        &self,
        caller: &CallerIdentity,
        claim_id: i64,
    ) -> Result<Option<FundingClaim>, FundingError> {
        let claim = self.db.fetch_claim(claim_id).await?;
        match claim {
            Some(c) if self.may_view(caller, &c.owner_id) => Ok(Some(c)),
            Some(_) => Err(FundingError::PermissionDenied),
            None => Ok(None),
        }
    }

    /// Fetches a claim by code. Operators see any claim; customers only their own.
    pub async fn claim_by_code(
        &self,
        caller: &CallerIdentity,
        code: &str,
    ) -> Result<Option<FundingClaim>, FundingError> {
        let claim = self.db.fetch_claim_by_code(code).await?;
        match claim {
            Some(c) if self.may_view(caller, &c.owner_id) => Ok(Some(c)),
            Some(_) => Err(FundingError::PermissionDenied),
            None => Ok(None),
        }
    }

    fn may_view(&self, caller: &CallerIdentity, owner: &OwnerId) -> bool {
        caller.is_operator() || caller.acts_for(owner)
    }
}
