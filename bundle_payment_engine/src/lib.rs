//! Bundle Payment Engine
//!
//! The core wallet ledger and funding reconciliation logic for a prepaid data-bundle sales platform. This library
//! is provider-agnostic: it knows nothing about HTTP, gateways' wire formats beyond their signed webhook bodies,
//! or how bundles are actually provisioned.
//!
//! The library is divided into two main sections:
//! 1. Storage management and control ([`mod@sqlite`]). SQLite is the supported backend. You should never need to
//!    access the database directly. Instead, use the public API provided by the engine. The exception is the data
//!    types stored in the database, which are defined in the [`mod@db_types`] module and are public.
//! 2. The engine public API ([`mod@bpe_api`]): the wallet ledger, the manual funding claim workflow, the gateway
//!    reconciler and checkout. The APIs are generic over the storage traits in [`mod@traits`], so any backend that
//!    implements those contracts can drive them.
//!
//! The engine also emits events when money moves: wallet credits, settled funding claims, and fulfillment
//! requests for paid order items. Subscribe through [`events::EventHooks`] to react to them.
pub mod db_types;
pub mod events;
#[cfg(feature = "sqlite")]
pub mod expiry_worker;
pub mod helpers;
pub mod traits;

pub mod bpe_api;
#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDatabase;

pub use bpe_api::{CheckoutApi, CheckoutOutcome, FundingApi, LedgerApi, ReconcilerApi, RejectedLine};
#[cfg(feature = "sqlite")]
pub use expiry_worker::start_expiry_worker;
