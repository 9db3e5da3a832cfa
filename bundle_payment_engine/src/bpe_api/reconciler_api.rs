//! API reconciling external gateway payments into wallet credits.
//!
//! Two independent paths report the same payment: the gateway's signed webhook and our own poll verification.
//! Both converge on a single derived ledger reference, `"{gateway}:{gateway_ref}"`, so whichever path lands first
//! credits the wallet and the other becomes an idempotent replay. Neither path trusts the other to have run.

use std::fmt::Debug;

use bpg_common::{Cedis, Secret};
use chrono::{Duration, Utc};
use log::*;

use crate::{
    db_types::{CallerIdentity, NewPaymentIntent, OwnerId, PaymentIntent},
    events::{EventProducers, WalletCreditedEvent},
    helpers::calculate_hmac,
    traits::{
        AppliedTransaction,
        GatewayClient,
        PaymentIntentStore,
        ReconcilerError,
        WebhookPayload,
    },
};

pub struct ReconcilerApi<B, G> {
    db: B,
    gateway: G,
    webhook_secret: Secret<String>,
    producers: EventProducers,
}

impl<B, G> Debug for ReconcilerApi<B, G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ReconcilerApi")
    }
}

impl<B, G> ReconcilerApi<B, G>
where
    B: PaymentIntentStore,
    G: GatewayClient,
{
    pub fn new(db: B, gateway: G, webhook_secret: Secret<String>, producers: EventProducers) -> Self {
        Self { db, gateway, webhook_secret, producers }
    }

    /// Records that a gateway checkout has been started for the owner. Nothing moves until the payment confirms.
    pub async fn create_intent(&self, intent: NewPaymentIntent) -> Result<PaymentIntent, ReconcilerError> {
        if !intent.amount.is_positive() {
            return Err(ReconcilerError::MalformedPayload(format!(
                "Intent amount must be strictly positive, got {}",
                intent.amount
            )));
        }
        let intent = self.db.create_intent(intent).await?;
        debug!("🌐️ Payment intent [{}] recorded for {} ({})", intent.gateway_ref, intent.owner_id, intent.amount);
        Ok(intent)
    }

    /// Processes a signed webhook body from the gateway.
    ///
    /// The signature is verified against the raw bytes before anything is parsed. A bad signature or an
    /// unparseable body is the caller's cue to reject the request; every failure past that point is logged and
    /// swallowed (`Ok(None)`) so the endpoint still acknowledges receipt, and the poll path picks the payment up
    /// on its next pass.
    pub async fn handle_webhook(
        &self,
        raw_body: &[u8],
        signature: &str,
    ) -> Result<Option<AppliedTransaction>, ReconcilerError> {
        let expected = calculate_hmac(&self.webhook_secret, raw_body);
        if expected != signature {
            warn!("🌐️ Webhook rejected: signature mismatch");
            return Err(ReconcilerError::SignatureInvalid);
        }
        let payload: WebhookPayload = serde_json::from_slice(raw_body)
            .map_err(|e| ReconcilerError::MalformedPayload(e.to_string()))?;
        if payload.amount <= 0 {
            return Err(ReconcilerError::MalformedPayload(format!(
                "Webhook amount must be strictly positive, got {}",
                payload.amount
            )));
        }
        let owner = OwnerId::from(payload.owner_id.as_str());
        match self.reconcile(&owner, Cedis::from_pesewas(payload.amount), &payload.reference).await {
            Ok(applied) => Ok(Some(applied)),
            Err(e) => {
                error!("🌐️ Webhook for [{}] acknowledged but not applied: {e}", payload.reference);
                Ok(None)
            },
        }
    }

    /// Poll-verifies a gateway reference and credits the wallet if the gateway confirms it.
    ///
    /// This is the user-triggered "check my payment" path for intents that never received a webhook. The gateway's
    /// reported owner must match the authenticated caller (operators may verify anyone's payment). Safe to call
    /// for references the webhook already handled; the credit replays as a no-op.
    pub async fn verify_and_credit(
        &self,
        caller: &CallerIdentity,
        gateway_ref: &str,
    ) -> Result<AppliedTransaction, ReconcilerError> {
        let verified = self.gateway.verify(gateway_ref).await?;
        if !verified.success {
            debug!("🌐️ Gateway does not report [{gateway_ref}] as paid yet");
            return Err(ReconcilerError::NotConfirmed);
        }
        if !caller.is_operator() && !caller.acts_for(&verified.owner_id) {
            warn!("🌐️ {} asked to verify [{gateway_ref}], which belongs to {}", caller.owner_id, verified.owner_id);
            return Err(ReconcilerError::OwnerMismatch);
        }
        self.reconcile(&verified.owner_id, verified.amount, gateway_ref).await
    }

    /// Marks Pending intents older than `older_than` as Failed and returns them.
    pub async fn purge_stale(&self, older_than: Duration) -> Result<Vec<PaymentIntent>, ReconcilerError> {
        let cutoff = Utc::now() - older_than;
        let purged = self.db.purge_stale_intents(cutoff).await?;
        if !purged.is_empty() {
            info!("🌐️ Purged {} stale payment intent(s)", purged.len());
        }
        Ok(purged)
    }

    pub async fn intent(&self, gateway_ref: &str) -> Result<Option<PaymentIntent>, ReconcilerError> {
        self.db.fetch_intent(gateway_ref).await
    }

    /// The single convergence point for both reconciliation paths.
    ///
    /// If an intent exists for the reference, the reported owner must match it; a payment with no recorded intent
    /// is still credited to the reported owner (the webhook can outrun intent creation).
    async fn reconcile(
        &self,
        owner: &OwnerId,
        amount: Cedis,
        gateway_ref: &str,
    ) -> Result<AppliedTransaction, ReconcilerError> {
        if let Some(intent) = self.db.fetch_intent(gateway_ref).await? {
            if &intent.owner_id != owner {
                warn!(
                    "🌐️ [{gateway_ref}] reports owner {owner} but the intent was created by {}. Refusing to credit.",
                    intent.owner_id
                );
                return Err(ReconcilerError::OwnerMismatch);
            }
        }
        let derived_reference = format!("{}:{gateway_ref}", self.gateway.name());
        let result = self.db.apply_gateway_credit(owner, amount, gateway_ref, &derived_reference).await?;
        if result.applied {
            info!("🌐️ [{gateway_ref}] credited {amount} to {owner} under [{derived_reference}]");
            for emitter in &self.producers.wallet_credited_producer {
                emitter.publish_event(WalletCreditedEvent::new(result.transaction.clone())).await;
            }
        } else {
            debug!("🌐️ [{gateway_ref}] already reconciled. Replay.");
        }
        Ok(result)
    }
}
