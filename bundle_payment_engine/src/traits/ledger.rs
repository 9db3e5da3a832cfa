use bpg_common::Cedis;
use thiserror::Error;

use crate::{
    db_types::{LedgerTransaction, OwnerId, TransactionKind, Wallet},
    traits::{AppliedTransaction, WalletHistory},
};

#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    #[error("We have an internal database engine problem (configuration/uptime etc.): {0}")]
    DatabaseError(String),
    #[error("Invalid ledger request: {0}")]
    ValidationError(String),
    #[error("No wallet exists for owner {0}")]
    WalletNotFound(OwnerId),
    #[error("Insufficient balance: need {needed} but only {available} is available")]
    InsufficientBalance { needed: Cedis, available: Cedis },
    #[error("No transaction exists with reference {0}")]
    TransactionNotFound(String),
    #[error("Transaction {0} has already been reversed")]
    AlreadyReversed(String),
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        LedgerError::DatabaseError(e.to_string())
    }
}

/// The only contract through which wallet balances change.
///
/// Each mutation combines the balance update and the transaction-log append into a single atomic unit: either both
/// happen, or neither does. Idempotency is keyed on the caller-supplied `reference`: a reference that has been seen
/// before returns the existing transaction with `applied = false` and moves no money. Two concurrent mutations
/// against the same wallet serialize on the storage engine's conditional update, so a debit can never succeed
/// against a balance a concurrent debit has already spent.
#[allow(async_fn_in_trait)]
pub trait WalletLedger: Clone {
    /// The URL of the database.
    fn url(&self) -> &str;

    /// Creates a zero-balance wallet for the owner. Called when a user account is created.
    /// Returns the existing wallet unchanged if one already exists.
    async fn create_wallet_for_owner(&self, owner: &OwnerId) -> Result<Wallet, LedgerError>;

    /// Atomically appends a Completed transaction of `kind` for `+amount` and increases the balance to match.
    ///
    /// `amount` must be strictly positive (the caller validates; the implementation may re-check).
    /// A duplicate `reference` is an idempotent replay.
    async fn credit_wallet(
        &self,
        owner: &OwnerId,
        amount: Cedis,
        kind: TransactionKind,
        reference: &str,
        description: Option<String>,
    ) -> Result<AppliedTransaction, LedgerError>;

    /// Atomically appends a Completed transaction of `kind` for `-amount` and decreases the balance to match.
    ///
    /// Fails with [`LedgerError::InsufficientBalance`] when the conditional balance update does not go through;
    /// that check and the write are one indivisible step, never a read-then-write pair.
    /// A duplicate `reference` is an idempotent replay and performs no balance check at all.
    async fn debit_wallet(
        &self,
        owner: &OwnerId,
        amount: Cedis,
        kind: TransactionKind,
        reference: &str,
        description: Option<String>,
    ) -> Result<AppliedTransaction, LedgerError>;

    /// Appends a Refund transaction compensating a previously Completed transaction, with the opposite sign.
    ///
    /// Fails with [`LedgerError::TransactionNotFound`] if `original_reference` is unknown and
    /// [`LedgerError::AlreadyReversed`] if a reversal for it already exists. Reversing a credit is itself
    /// balance-checked, since the credited funds may already have been spent.
    async fn reverse_transaction(
        &self,
        original_reference: &str,
        reference: &str,
    ) -> Result<AppliedTransaction, LedgerError>;

    /// Closes the database connection.
    async fn close(&mut self) -> Result<(), LedgerError> {
        Ok(())
    }
}

/// Read-only queries over wallets and the transaction log.
#[allow(async_fn_in_trait)]
pub trait LedgerAudit {
    /// Fetches the wallet for the given owner, or `None` if no wallet exists.
    async fn fetch_wallet(&self, owner: &OwnerId) -> Result<Option<Wallet>, LedgerError>;

    /// Fetches the transaction with the given idempotency reference, or `None`.
    async fn fetch_transaction_by_reference(&self, reference: &str)
        -> Result<Option<LedgerTransaction>, LedgerError>;

    /// The wallet together with its full, chronologically ordered transaction log.
    async fn history_for_owner(&self, owner: &OwnerId) -> Result<Option<WalletHistory>, LedgerError>;
}
