use bpg_common::Cedis;
use thiserror::Error;

use crate::{
    db_types::{BundleItem, FulfillmentStatus, OrderItem, OwnerId},
    traits::{CheckoutResult, LedgerError},
};

#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    #[error("No active catalog entry matches bundle code {0}")]
    PriceNotFound(String),
    #[error("The catalog service failed: {0}")]
    LookupFailed(String),
}

#[derive(Debug, Clone, Error)]
pub enum CheckoutError {
    #[error("We have an internal database engine problem (configuration/uptime etc.): {0}")]
    DatabaseError(String),
    #[error("Invalid checkout request: {0}")]
    ValidationError(String),
    #[error("The caller does not have permission to perform this action")]
    PermissionDenied,
    #[error("No order batch exists with id {0}")]
    BatchNotFound(i64),
    #[error("No order line item exists with id {0}")]
    ItemNotFound(i64),
    #[error("{0}")]
    LedgerError(#[from] LedgerError),
}

impl From<sqlx::Error> for CheckoutError {
    fn from(e: sqlx::Error) -> Self {
        CheckoutError::DatabaseError(e.to_string())
    }
}

/// Catalog/pricing collaborator. Owned by the catalog service; the engine only asks for prices.
#[allow(async_fn_in_trait)]
pub trait CatalogPricing {
    /// Resolves one requested line to its active price for this purchaser.
    async fn resolve_price(&self, item: &BundleItem) -> Result<Cedis, CatalogError>;
}

/// Persistence contract for checkout batches.
#[allow(async_fn_in_trait)]
pub trait OrderBatchStore: Clone {
    /// In one storage transaction: debits the owner's wallet for `total` under `idempotency_key` and persists the
    /// batch with its line items, each starting in the Pending fulfillment state.
    ///
    /// Replay behaviour: if the batch already exists it is returned with `debited = false`. If the debit
    /// transaction exists but the batch does not (a crash between debit and batch persistence on a previous
    /// attempt), the batch is re-derived and persisted *without* debiting again.
    /// Insufficient balance aborts the whole call; no partial debit ever happens.
    async fn checkout_debit(
        &self,
        owner: &OwnerId,
        priced_items: &[(BundleItem, Cedis)],
        total: Cedis,
        idempotency_key: &str,
    ) -> Result<CheckoutResult, CheckoutError>;

    /// Fetches a batch and its items by idempotency key, or `None`.
    async fn fetch_batch_by_key(&self, idempotency_key: &str) -> Result<Option<CheckoutResult>, CheckoutError>;

    /// Records the downstream provisioning outcome for one line item. Purely informational with respect to the
    /// ledger; the financial debit is already final.
    async fn update_item_fulfillment(
        &self,
        item_id: i64,
        status: FulfillmentStatus,
    ) -> Result<OrderItem, CheckoutError>;
}
