//! The public, backend-agnostic APIs of the bundle payment engine.
//!
//! Each API wraps a storage backend (any type implementing the relevant [`crate::traits`] contracts), adds the
//! request-level validation and permission checks, and fires event hooks after the underlying storage transaction
//! has committed. All money movement goes through these APIs; callers never talk to the backend directly.
pub mod checkout_api;
pub mod funding_api;
pub mod ledger_api;
pub mod reconciler_api;

pub use checkout_api::{CheckoutApi, CheckoutOutcome, RejectedLine};
pub use funding_api::FundingApi;
pub use ledger_api::LedgerApi;
pub use reconciler_api::ReconcilerApi;
