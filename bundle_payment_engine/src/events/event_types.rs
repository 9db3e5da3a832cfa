use serde::{Deserialize, Serialize};

use crate::db_types::{FundingClaim, LedgerTransaction, OrderBatch, OrderItem};

/// Fired whenever a wallet balance increases, whatever the source (manual claim, gateway credit, refund).
/// Notification services subscribe to this to tell users their money has arrived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletCreditedEvent {
    pub transaction: LedgerTransaction,
}

impl WalletCreditedEvent {
    pub fn new(transaction: LedgerTransaction) -> Self {
        Self { transaction }
    }
}

/// Fired when a funding claim settles. Carries the full claim so handlers can see who initiated it, who sent the
/// money and who claimed it without another round trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimSettledEvent {
    pub claim: FundingClaim,
}

impl ClaimSettledEvent {
    pub fn new(claim: FundingClaim) -> Self {
        Self { claim }
    }
}

/// Fired once per debited line item after the checkout commits. Provisioning services pick these up and deliver
/// the bundles; the money side is already final by the time this event exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FulfillmentRequestedEvent {
    pub batch: OrderBatch,
    pub item: OrderItem,
}

impl FulfillmentRequestedEvent {
    pub fn new(batch: OrderBatch, item: OrderItem) -> Self {
        Self { batch, item }
    }
}
