//! API for idempotent multi-item bundle checkout.

use std::fmt::Debug;

use bpg_common::Cedis;
use log::*;

use crate::{
    db_types::{BundleItem, CallerIdentity, FulfillmentStatus, OrderBatch, OrderItem},
    events::{EventProducers, FulfillmentRequestedEvent},
    traits::{CatalogPricing, CheckoutError, CheckoutResult, OrderBatchStore},
};

/// A line item the checkout refused, with the reason. Rejected lines are never persisted and never priced into the
/// debit; the rest of the cart proceeds without them.
#[derive(Debug, Clone)]
pub struct RejectedLine {
    pub item: BundleItem,
    pub reason: String,
}

/// What a checkout call returns: the persisted batch (when any line survived pricing) plus the lines that were
/// turned away. `debited` is `false` on an idempotent replay.
#[derive(Debug, Clone)]
pub struct CheckoutOutcome {
    pub batch: OrderBatch,
    pub items: Vec<OrderItem>,
    pub debited: bool,
    pub rejected: Vec<RejectedLine>,
}

/// `CheckoutApi` turns a cart of bundle items into exactly one wallet debit and one persisted order batch,
/// however many times the same idempotency key is submitted.
pub struct CheckoutApi<B, C> {
    db: B,
    catalog: C,
    producers: EventProducers,
}

impl<B, C> Debug for CheckoutApi<B, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CheckoutApi")
    }
}

impl<B, C> CheckoutApi<B, C>
where
    B: OrderBatchStore,
    C: CatalogPricing,
{
    pub fn new(db: B, catalog: C, producers: EventProducers) -> Self {
        Self { db, catalog, producers }
    }

    /// Submits a cart for the calling customer.
    ///
    /// Each line is priced against the catalog; lines the catalog cannot price are reported in
    /// [`CheckoutOutcome::rejected`] and the rest of the cart continues. The surviving lines are debited as one
    /// total and persisted as one batch in a single storage transaction. Resubmitting the same idempotency key
    /// returns the original batch with `debited = false` and charges nothing.
    pub async fn checkout(
        &self,
        caller: &CallerIdentity,
        items: Vec<BundleItem>,
        idempotency_key: &str,
    ) -> Result<CheckoutOutcome, CheckoutError> {
        if !caller.acts_for(&caller.owner_id) {
            return Err(CheckoutError::PermissionDenied);
        }
        if idempotency_key.trim().is_empty() {
            return Err(CheckoutError::ValidationError("An idempotency key is required".to_string()));
        }
        if items.is_empty() {
            return Err(CheckoutError::ValidationError("The cart is empty".to_string()));
        }
        // A replay must return the batch as originally persisted, so check for it before re-pricing anything: the
        // catalog may have changed since the first submission.
        if let Some(existing) = self.db.fetch_batch_by_key(idempotency_key).await? {
            info!("🛒️ Checkout [{idempotency_key}] replayed. Returning the original batch.");
            return Ok(CheckoutOutcome {
                batch: existing.batch,
                items: existing.items,
                debited: false,
                rejected: vec![],
            });
        }
        let mut priced = Vec::with_capacity(items.len());
        let mut rejected = vec![];
        for item in items {
            match self.catalog.resolve_price(&item).await {
                Ok(price) if price.is_positive() => priced.push((item, price)),
                Ok(price) => {
                    warn!("🛒️ Catalog priced {} at {price}; line rejected", item.bundle_code);
                    rejected.push(RejectedLine { item, reason: format!("Catalog price is not positive: {price}") });
                },
                Err(e) => {
                    warn!("🛒️ Could not price {}: {e}", item.bundle_code);
                    rejected.push(RejectedLine { item, reason: e.to_string() });
                },
            }
        }
        if priced.is_empty() {
            return Err(CheckoutError::ValidationError("No line item could be priced".to_string()));
        }
        let total: Cedis = priced.iter().map(|(_, price)| *price).sum();
        let result = self.db.checkout_debit(&caller.owner_id, &priced, total, idempotency_key).await?;
        if result.debited {
            info!(
                "🛒️ Checkout [{idempotency_key}] debited {total} from {} for {} item(s)",
                caller.owner_id,
                result.items.len()
            );
            self.call_fulfillment_hook(&result).await;
        }
        let CheckoutResult { batch, items, debited } = result;
        Ok(CheckoutOutcome { batch, items, debited, rejected })
    }

    /// Fetches a batch by key. Operators see any batch; customers only their own.
    pub async fn batch_by_key(
        &self,
        caller: &CallerIdentity,
        idempotency_key: &str,
    ) -> Result<Option<CheckoutResult>, CheckoutError> {
        let result = self.db.fetch_batch_by_key(idempotency_key).await?;
        match result {
            Some(r) if caller.is_operator() || caller.acts_for(&r.batch.owner_id) => Ok(Some(r)),
            Some(_) => Err(CheckoutError::PermissionDenied),
            None => Ok(None),
        }
    }

    /// Records the provisioning outcome reported back for one line item. The debit is already final either way;
    /// a failed provisioning is compensated through a ledger reversal, not by touching the batch.
    pub async fn record_fulfillment(
        &self,
        caller: &CallerIdentity,
        item_id: i64,
        status: FulfillmentStatus,
    ) -> Result<OrderItem, CheckoutError> {
        if !caller.is_operator() {
            return Err(CheckoutError::PermissionDenied);
        }
        let item = self.db.update_item_fulfillment(item_id, status).await?;
        debug!("🛒️ Item #{item_id} fulfillment recorded as {status}");
        Ok(item)
    }

    async fn call_fulfillment_hook(&self, result: &CheckoutResult) {
        for emitter in &self.producers.fulfillment_requested_producer {
            debug!("🛒️ Notifying fulfillment hook subscribers");
            for item in &result.items {
                let event = FulfillmentRequestedEvent::new(result.batch.clone(), item.clone());
                emitter.publish_event(event).await;
            }
        }
    }
}
