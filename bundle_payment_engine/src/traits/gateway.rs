use bpg_common::Cedis;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    db_types::{NewPaymentIntent, OwnerId, PaymentIntent},
    traits::{AppliedTransaction, LedgerError},
};

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// The gateway could not be reached or answered with a transport-level failure. Retryable by the caller.
    #[error("The payment gateway is unreachable: {0}")]
    Unreachable(String),
    #[error("The gateway has no record of reference {0}")]
    UnknownReference(String),
}

#[derive(Debug, Clone, Error)]
pub enum ReconcilerError {
    #[error("We have an internal database engine problem (configuration/uptime etc.): {0}")]
    DatabaseError(String),
    #[error("The webhook signature is invalid")]
    SignatureInvalid,
    #[error("The webhook payload could not be parsed: {0}")]
    MalformedPayload(String),
    #[error("No payment intent exists for gateway reference {0}")]
    IntentNotFound(String),
    #[error("The payment does not belong to the calling owner")]
    OwnerMismatch,
    #[error("The gateway does not report this payment as successful")]
    NotConfirmed,
    #[error("{0}")]
    GatewayError(#[from] GatewayError),
    #[error("{0}")]
    LedgerError(#[from] LedgerError),
}

impl From<sqlx::Error> for ReconcilerError {
    fn from(e: sqlx::Error) -> Self {
        ReconcilerError::DatabaseError(e.to_string())
    }
}

/// The signed event body the gateway POSTs to the webhook endpoint. Amounts arrive in minor units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub reference: String,
    pub amount: i64,
    pub owner_id: String,
    pub timestamp: DateTime<Utc>,
}

/// What the gateway reports when asked to verify a reference.
#[derive(Debug, Clone)]
pub struct VerifiedPayment {
    pub success: bool,
    pub amount: Cedis,
    pub owner_id: OwnerId,
    pub paid_at: Option<DateTime<Utc>>,
}

/// Outbound verification boundary to the external card/mobile-money gateway.
///
/// Verification is a plain read against the gateway; it must never be called while holding a storage transaction.
#[allow(async_fn_in_trait)]
pub trait GatewayClient {
    /// A short stable name for this gateway, used as the namespace in derived ledger references.
    fn name(&self) -> &str;

    /// Asks the gateway for the current status of a checkout reference.
    async fn verify(&self, gateway_ref: &str) -> Result<VerifiedPayment, GatewayError>;
}

/// Persistence contract for gateway payment intents and their reconciliation into the ledger.
#[allow(async_fn_in_trait)]
pub trait PaymentIntentStore: Clone {
    /// Records a new Pending intent when a gateway checkout is initialized.
    /// A duplicate gateway reference returns the existing intent unchanged.
    async fn create_intent(&self, intent: NewPaymentIntent) -> Result<PaymentIntent, ReconcilerError>;

    /// Atomically credits the owner's wallet under `derived_reference` and marks the matching intent Completed, in
    /// one storage transaction. This is the single convergence point for the webhook and poll paths: whichever runs
    /// first applies the credit, the other replays as a no-op.
    ///
    /// An intent that was never recorded (e.g. the webhook outran intent creation) does not block the credit; the
    /// intent is upserted as Completed so the audit trail stays whole.
    async fn apply_gateway_credit(
        &self,
        owner: &OwnerId,
        amount: Cedis,
        gateway_ref: &str,
        derived_reference: &str,
    ) -> Result<AppliedTransaction, ReconcilerError>;

    /// Marks Pending intents older than `cutoff` as Failed and returns them. Purged intents never silently
    /// complete; a late confirmation still credits via [`Self::apply_gateway_credit`].
    async fn purge_stale_intents(&self, cutoff: DateTime<Utc>) -> Result<Vec<PaymentIntent>, ReconcilerError>;

    /// Fetches the intent for a gateway reference, or `None`.
    async fn fetch_intent(&self, gateway_ref: &str) -> Result<Option<PaymentIntent>, ReconcilerError>;
}
