use std::fmt::Display;

use bpg_common::Cedis;

use crate::db_types::{FundingClaim, LedgerTransaction, OrderBatch, OrderItem, Wallet};

/// The result of a ledger mutation. `applied` is `true` when this call actually moved money, and `false` when the
/// reference had been seen before and the existing transaction was returned unchanged (an idempotent replay).
/// Replays are successful results, not errors, so callers branch on data rather than on an error path.
#[derive(Debug, Clone)]
pub struct AppliedTransaction {
    pub transaction: LedgerTransaction,
    pub applied: bool,
}

impl AppliedTransaction {
    pub fn fresh(transaction: LedgerTransaction) -> Self {
        Self { transaction, applied: true }
    }

    pub fn replayed(transaction: LedgerTransaction) -> Self {
        Self { transaction, applied: false }
    }
}

impl Display for AppliedTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = if self.applied { "applied" } else { "replayed" };
        write!(f, "[{}] {} {} ({tag})", self.transaction.reference, self.transaction.kind, self.transaction.amount)
    }
}

/// A wallet together with its complete transaction log, for audit and statement views.
#[derive(Debug, Clone)]
pub struct WalletHistory {
    pub wallet: Wallet,
    pub transactions: Vec<LedgerTransaction>,
}

impl WalletHistory {
    pub fn new(wallet: Wallet, transactions: Vec<LedgerTransaction>) -> Self {
        Self { wallet, transactions }
    }

    /// The sum of signed amounts over all Completed transactions. Always equals the wallet balance.
    pub fn completed_total(&self) -> Cedis {
        use crate::db_types::TransactionStatus::Completed;
        self.transactions.iter().filter(|t| t.status == Completed).map(|t| t.amount).sum()
    }
}

/// Outcome of one funding-claim expiry sweep.
#[derive(Debug, Clone, Default)]
pub struct ExpirySweepResult {
    /// Claims moved from PendingClaim to Expired by this sweep.
    pub expired: Vec<FundingClaim>,
    /// Ids of claims still sitting in Initiated past their expiry time. These are *not* transitioned (the operator
    /// never marked them sent, so no claim window ever opened); they are surfaced for manual follow-up.
    pub stale_initiated: Vec<i64>,
}

impl ExpirySweepResult {
    pub fn expired_count(&self) -> usize {
        self.expired.len()
    }

    pub fn stale_initiated_count(&self) -> usize {
        self.stale_initiated.len()
    }
}

/// The persisted outcome of a checkout: the batch, its line items, and whether this call performed the debit
/// (`debited = false` means the idempotency key had been seen before and the original batch is being returned).
#[derive(Debug, Clone)]
pub struct CheckoutResult {
    pub batch: OrderBatch,
    pub items: Vec<OrderItem>,
    pub debited: bool,
}
