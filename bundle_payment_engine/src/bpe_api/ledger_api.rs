//! Unified API for wallet balances and the transaction log.

use std::fmt::Debug;

use bpg_common::Cedis;
use log::*;

use crate::{
    db_types::{LedgerTransaction, OwnerId, TransactionKind, Wallet},
    events::{EventProducers, WalletCreditedEvent},
    traits::{AppliedTransaction, LedgerAudit, LedgerError, WalletHistory, WalletLedger},
};

/// `LedgerApi` is the only path through which wallet money moves. It validates amounts and references before
/// handing off to the backend, and notifies wallet-credited hook subscribers after a credit lands.
pub struct LedgerApi<B> {
    db: B,
    producers: EventProducers,
}

impl<B> Debug for LedgerApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LedgerApi")
    }
}

impl<B> LedgerApi<B> {
    pub fn new(db: B, producers: EventProducers) -> Self {
        Self { db, producers }
    }

    async fn call_wallet_credited_hook(&self, transaction: &LedgerTransaction) {
        for emitter in &self.producers.wallet_credited_producer {
            debug!("💳️ Notifying wallet credited hook subscribers");
            let event = WalletCreditedEvent::new(transaction.clone());
            emitter.publish_event(event).await;
        }
    }
}

impl<B> LedgerApi<B>
where B: WalletLedger + LedgerAudit
{
    /// Creates a zero-balance wallet for the owner, or returns the existing one.
    pub async fn create_wallet(&self, owner: &OwnerId) -> Result<Wallet, LedgerError> {
        self.db.create_wallet_for_owner(owner).await
    }

    /// Credits `amount` to the owner's wallet under the given reference.
    ///
    /// A reference that has been used before is an idempotent replay: the existing transaction is returned with
    /// `applied = false` and no money moves. Hook subscribers are only notified when the credit actually applied.
    pub async fn credit(
        &self,
        owner: &OwnerId,
        amount: Cedis,
        kind: TransactionKind,
        reference: &str,
        description: Option<String>,
    ) -> Result<AppliedTransaction, LedgerError> {
        check_amount_and_reference(amount, reference)?;
        let result = self.db.credit_wallet(owner, amount, kind, reference, description).await?;
        if result.applied {
            debug!("💳️ {owner} credited with {amount} under [{reference}]");
            self.call_wallet_credited_hook(&result.transaction).await;
        } else {
            info!("💳️ Credit [{reference}] was a replay. Balance unchanged.");
        }
        Ok(result)
    }

    /// Debits `amount` from the owner's wallet under the given reference.
    ///
    /// Fails with [`LedgerError::InsufficientBalance`] without moving anything if the wallet cannot cover the
    /// amount. Duplicate references replay idempotently, skipping the balance check entirely.
    pub async fn debit(
        &self,
        owner: &OwnerId,
        amount: Cedis,
        kind: TransactionKind,
        reference: &str,
        description: Option<String>,
    ) -> Result<AppliedTransaction, LedgerError> {
        check_amount_and_reference(amount, reference)?;
        let result = self.db.debit_wallet(owner, amount, kind, reference, description).await?;
        if result.applied {
            debug!("💳️ {owner} debited {amount} under [{reference}]");
        } else {
            info!("💳️ Debit [{reference}] was a replay. Balance unchanged.");
        }
        Ok(result)
    }

    /// Appends a compensating Refund for a previously Completed transaction. A given transaction can be reversed
    /// at most once, however many times and under whatever references reversal is attempted.
    pub async fn reverse(
        &self,
        original_reference: &str,
        reference: &str,
    ) -> Result<AppliedTransaction, LedgerError> {
        if reference.trim().is_empty() {
            return Err(LedgerError::ValidationError("Reference must not be empty".to_string()));
        }
        let result = self.db.reverse_transaction(original_reference, reference).await?;
        if result.applied {
            debug!("💳️ [{original_reference}] reversed under [{reference}]");
            if result.transaction.amount.is_positive() {
                self.call_wallet_credited_hook(&result.transaction).await;
            }
        }
        Ok(result)
    }

    pub async fn balance(&self, owner: &OwnerId) -> Result<Cedis, LedgerError> {
        let wallet = self.db.fetch_wallet(owner).await?.ok_or_else(|| LedgerError::WalletNotFound(owner.clone()))?;
        Ok(wallet.balance)
    }

    pub async fn wallet(&self, owner: &OwnerId) -> Result<Option<Wallet>, LedgerError> {
        self.db.fetch_wallet(owner).await
    }

    pub async fn transaction_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<LedgerTransaction>, LedgerError> {
        self.db.fetch_transaction_by_reference(reference).await
    }

    /// The wallet and its full transaction log, oldest first.
    pub async fn history(&self, owner: &OwnerId) -> Result<Option<WalletHistory>, LedgerError> {
        self.db.history_for_owner(owner).await
    }
}

fn check_amount_and_reference(amount: Cedis, reference: &str) -> Result<(), LedgerError> {
    if !amount.is_positive() {
        return Err(LedgerError::ValidationError(format!("Amount must be strictly positive, got {amount}")));
    }
    if reference.trim().is_empty() {
        return Err(LedgerError::ValidationError("Reference must not be empty".to_string()));
    }
    Ok(())
}
