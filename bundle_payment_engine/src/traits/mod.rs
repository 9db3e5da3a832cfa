//! # Storage and collaborator contracts.
//!
//! This module defines the interface contracts the engine expects from its database backend and from its external
//! collaborators.
//!
//! ## The ledger
//! The [`WalletLedger`] trait is the single choke point through which money moves. Every external trigger, whether
//! an operator funding action, a gateway confirmation or a checkout, terminates in one of its three mutations
//! (`credit_wallet`, `debit_wallet`, `reverse_transaction`), each of which is atomic and keyed on a caller-supplied
//! idempotency reference. [`LedgerAudit`] provides the read side: balances, individual transactions, and full
//! per-wallet history.
//!
//! ## Workflow stores
//! * [`FundingClaimStore`] persists the manual send-and-claim funding state machine.
//! * [`PaymentIntentStore`] tracks external gateway checkout attempts and folds their confirmations into the ledger.
//! * [`OrderBatchStore`] persists checkout batches and their line items together with the single debit that backs
//!   them.
//! * [`LockoutStore`] is a shared, TTL-evicted failure counter for the auth collaborator.
//!
//! ## Collaborators
//! * [`GatewayClient`] is the outbound payment-gateway verification boundary.
//! * [`CatalogPricing`] resolves bundle descriptors to prices at checkout time.
mod checkout;
mod data_objects;
mod funding;
mod gateway;
mod ledger;
mod lockout;

pub use checkout::{CatalogError, CatalogPricing, CheckoutError, OrderBatchStore};
pub use data_objects::{AppliedTransaction, CheckoutResult, ExpirySweepResult, WalletHistory};
pub use funding::{FundingClaimStore, FundingError};
pub use gateway::{GatewayClient, GatewayError, PaymentIntentStore, ReconcilerError, VerifiedPayment, WebhookPayload};
pub use ledger::{LedgerAudit, LedgerError, WalletLedger};
pub use lockout::{LockoutError, LockoutStore};
