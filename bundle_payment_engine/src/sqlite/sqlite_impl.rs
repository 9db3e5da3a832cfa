//! `SqliteDatabase` is a concrete implementation of a bundle payment engine backend.
//!
//! Unsurprisingly, it uses SQLite as the backend and implements all the traits defined in the [`crate::traits`]
//! module. Every mutation runs inside a single database transaction, and every precondition (balance sufficiency,
//! claim state, reference uniqueness) is folded into the conditional statement that performs the write, so no
//! check-then-act window exists anywhere in this file.
use std::fmt::Debug;

use bpg_common::Cedis;
use chrono::{DateTime, Utc};
use log::*;
use sqlx::SqlitePool;

use super::db::{db_url, funding_claims, lockouts, new_pool, orders, payment_intents, transactions, wallets};
use crate::{
    db_types::{
        BundleItem,
        FulfillmentStatus,
        FundingClaim,
        LedgerTransaction,
        NewFundingClaim,
        NewPaymentIntent,
        OrderItem,
        OwnerId,
        PaymentIntent,
        TransactionKind,
        TransactionStatus,
        Wallet,
    },
    traits::{
        AppliedTransaction,
        CheckoutError,
        CheckoutResult,
        ExpirySweepResult,
        FundingClaimStore,
        FundingError,
        LedgerAudit,
        LedgerError,
        LockoutError,
        LockoutStore,
        OrderBatchStore,
        PaymentIntentStore,
        ReconcilerError,
        WalletHistory,
        WalletLedger,
    },
};

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatabase ({:?})", self.pool)
    }
}

impl SqliteDatabase {
    /// Creates a new database API object using the URL from the environment.
    pub async fn new(max_connections: u32) -> Result<Self, sqlx::Error> {
        let url = db_url();
        SqliteDatabase::new_with_url(url.as_str(), max_connections).await
    }

    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        trace!("Creating new database connection pool with url {url}");
        let pool = new_pool(url, max_connections).await?;
        let url = url.to_string();
        Ok(Self { url, pool })
    }

    /// Returns a reference to the database connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl WalletLedger for SqliteDatabase {
    fn url(&self) -> &str {
        self.url.as_str()
    }

    async fn create_wallet_for_owner(&self, owner: &OwnerId) -> Result<Wallet, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        wallets::idempotent_insert(owner, &mut conn).await
    }

    async fn credit_wallet(
        &self,
        owner: &OwnerId,
        amount: Cedis,
        kind: TransactionKind,
        reference: &str,
        description: Option<String>,
    ) -> Result<AppliedTransaction, LedgerError> {
        let mut tx = self.pool.begin().await?;
        if !wallets::touch(owner, &mut tx).await? {
            return Err(LedgerError::WalletNotFound(owner.clone()));
        }
        let wallet = wallets::fetch_wallet_by_owner(owner, &mut tx)
            .await?
            .ok_or_else(|| LedgerError::WalletNotFound(owner.clone()))?;
        let (txn, fresh) =
            transactions::idempotent_insert(wallet.id, kind, amount, reference, None, description, &mut tx).await?;
        if fresh {
            wallets::adjust_balance(wallet.id, amount, &mut tx).await?;
            debug!("🗃️ Credited {amount} to wallet of {owner} under [{reference}]");
        }
        tx.commit().await?;
        Ok(AppliedTransaction { transaction: txn, applied: fresh })
    }

    async fn debit_wallet(
        &self,
        owner: &OwnerId,
        amount: Cedis,
        kind: TransactionKind,
        reference: &str,
        description: Option<String>,
    ) -> Result<AppliedTransaction, LedgerError> {
        let mut tx = self.pool.begin().await?;
        if !wallets::touch(owner, &mut tx).await? {
            return Err(LedgerError::WalletNotFound(owner.clone()));
        }
        let wallet = wallets::fetch_wallet_by_owner(owner, &mut tx)
            .await?
            .ok_or_else(|| LedgerError::WalletNotFound(owner.clone()))?;
        let (txn, fresh) =
            transactions::idempotent_insert(wallet.id, kind, -amount, reference, None, description, &mut tx).await?;
        if fresh {
            // The availability check lives inside this UPDATE. The earlier balance read is only used to build a
            // helpful error message and never decides the outcome.
            let debited = wallets::try_debit(wallet.id, amount, &mut tx).await?;
            if !debited {
                tx.rollback().await?;
                return Err(LedgerError::InsufficientBalance { needed: amount, available: wallet.balance });
            }
            debug!("🗃️ Debited {amount} from wallet of {owner} under [{reference}]");
        }
        tx.commit().await?;
        Ok(AppliedTransaction { transaction: txn, applied: fresh })
    }

    async fn reverse_transaction(
        &self,
        original_reference: &str,
        reference: &str,
    ) -> Result<AppliedTransaction, LedgerError> {
        let mut tx = self.pool.begin().await?;
        let original = transactions::fetch_by_reference(original_reference, &mut tx)
            .await?
            .ok_or_else(|| LedgerError::TransactionNotFound(original_reference.to_string()))?;
        if original.status != TransactionStatus::Completed {
            return Err(LedgerError::ValidationError(format!(
                "Only Completed transactions can be reversed; [{original_reference}] is {}",
                original.status
            )));
        }
        let amount = -original.amount;
        let description = Some(format!("Reversal of [{original_reference}]"));
        let (txn, fresh) = transactions::idempotent_insert(
            original.wallet_id,
            TransactionKind::Refund,
            amount,
            reference,
            Some(original_reference),
            description,
            &mut tx,
        )
        .await?;
        if fresh {
            if amount.is_negative() {
                // Reversing a credit: the funds may already have been spent, so this is an ordinary debit.
                let debited = wallets::try_debit(original.wallet_id, amount.abs(), &mut tx).await?;
                if !debited {
                    let available = wallets::fetch_wallet(original.wallet_id, &mut tx)
                        .await?
                        .map(|w| w.balance)
                        .unwrap_or_default();
                    tx.rollback().await?;
                    return Err(LedgerError::InsufficientBalance { needed: amount.abs(), available });
                }
            } else {
                wallets::adjust_balance(original.wallet_id, amount, &mut tx).await?;
            }
            debug!("🗃️ Reversed [{original_reference}] with [{reference}] for {amount}");
        }
        tx.commit().await?;
        Ok(AppliedTransaction { transaction: txn, applied: fresh })
    }

    async fn close(&mut self) -> Result<(), LedgerError> {
        self.pool.close().await;
        Ok(())
    }
}

impl LedgerAudit for SqliteDatabase {
    async fn fetch_wallet(&self, owner: &OwnerId) -> Result<Option<Wallet>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        wallets::fetch_wallet_by_owner(owner, &mut conn).await
    }

    async fn fetch_transaction_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<LedgerTransaction>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        transactions::fetch_by_reference(reference, &mut conn).await
    }

    async fn history_for_owner(&self, owner: &OwnerId) -> Result<Option<WalletHistory>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let Some(wallet) = wallets::fetch_wallet_by_owner(owner, &mut conn).await? else {
            return Ok(None);
        };
        let txns = transactions::fetch_for_wallet(wallet.id, &mut conn).await?;
        Ok(Some(WalletHistory::new(wallet, txns)))
    }
}

impl FundingClaimStore for SqliteDatabase {
    async fn insert_claim(
        &self,
        claim: NewFundingClaim,
        code: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<FundingClaim, FundingError> {
        let mut conn = self.pool.acquire().await?;
        funding_claims::insert_claim(claim, code, expires_at, &mut conn).await
    }

    async fn mark_claim_sent(
        &self,
        claim_id: i64,
        operator: &str,
        external_ref: Option<String>,
        notes: Option<String>,
    ) -> Result<FundingClaim, FundingError> {
        let mut conn = self.pool.acquire().await?;
        funding_claims::mark_sent(claim_id, operator, external_ref, notes, &mut conn).await
    }

    /// The status transition and the wallet credit commit or roll back together. Of two concurrent settle attempts
    /// on one code, the conditional UPDATE admits exactly one; the loser's transaction never reaches the credit.
    async fn settle_claim(
        &self,
        code: &str,
        claimant: &OwnerId,
        now: DateTime<Utc>,
    ) -> Result<FundingClaim, FundingError> {
        let mut tx = self.pool.begin().await?;
        let claim = funding_claims::settle(code, claimant, now, &mut tx).await?;
        let wallet = wallets::fetch_wallet_by_owner(&claim.owner_id, &mut tx)
            .await?
            .ok_or_else(|| FundingError::WalletNotFound(claim.owner_id.clone()))?;
        let description = Some(format!("Manual funding via {} claimed by {claimant}", claim.channel));
        let (_, fresh) = transactions::idempotent_insert(
            wallet.id,
            TransactionKind::Deposit,
            claim.amount,
            &claim.code,
            None,
            description,
            &mut tx,
        )
        .await?;
        if fresh {
            wallets::adjust_balance(wallet.id, claim.amount, &mut tx).await?;
        }
        tx.commit().await?;
        debug!("🗃️ Claim #{} settled; {} credited to {}", claim.id, claim.amount, claim.owner_id);
        Ok(claim)
    }

    async fn cancel_claim(&self, claim_id: i64, operator: &str, reason: &str) -> Result<FundingClaim, FundingError> {
        let mut conn = self.pool.acquire().await?;
        funding_claims::cancel(claim_id, operator, reason, &mut conn).await
    }

    async fn expire_due_claims(&self, now: DateTime<Utc>) -> Result<ExpirySweepResult, FundingError> {
        let mut tx = self.pool.begin().await?;
        let expired = funding_claims::expire_due(now, &mut tx).await?;
        let stale_initiated = funding_claims::stale_initiated_ids(now, &mut tx).await?;
        tx.commit().await?;
        Ok(ExpirySweepResult { expired, stale_initiated })
    }

    async fn fetch_claim(&self, claim_id: i64) -> Result<Option<FundingClaim>, FundingError> {
        let mut conn = self.pool.acquire().await?;
        funding_claims::fetch_claim(claim_id, &mut conn).await
    }

    async fn fetch_claim_by_code(&self, code: &str) -> Result<Option<FundingClaim>, FundingError> {
        let mut conn = self.pool.acquire().await?;
        funding_claims::fetch_claim_by_code(code, &mut conn).await
    }
}

impl PaymentIntentStore for SqliteDatabase {
    async fn create_intent(&self, intent: NewPaymentIntent) -> Result<PaymentIntent, ReconcilerError> {
        let mut conn = self.pool.acquire().await?;
        payment_intents::idempotent_insert(intent, &mut conn).await
    }

    async fn apply_gateway_credit(
        &self,
        owner: &OwnerId,
        amount: Cedis,
        gateway_ref: &str,
        derived_reference: &str,
    ) -> Result<AppliedTransaction, ReconcilerError> {
        let mut tx = self.pool.begin().await?;
        if !wallets::touch(owner, &mut tx).await? {
            return Err(LedgerError::WalletNotFound(owner.clone()).into());
        }
        let wallet = wallets::fetch_wallet_by_owner(owner, &mut tx)
            .await?
            .ok_or_else(|| LedgerError::WalletNotFound(owner.clone()))?;
        let description = Some(format!("Gateway payment [{gateway_ref}]"));
        let (txn, fresh) = transactions::idempotent_insert(
            wallet.id,
            TransactionKind::Deposit,
            amount,
            derived_reference,
            None,
            description,
            &mut tx,
        )
        .await?;
        if fresh {
            wallets::adjust_balance(wallet.id, amount, &mut tx).await?;
            debug!("🗃️ Gateway credit of {amount} applied to {owner} under [{derived_reference}]");
        } else {
            trace!("🗃️ Gateway credit [{derived_reference}] already applied. No-op.");
        }
        payment_intents::upsert_completed(gateway_ref, owner.as_str(), amount.value(), &mut tx).await?;
        tx.commit().await?;
        Ok(AppliedTransaction { transaction: txn, applied: fresh })
    }

    async fn purge_stale_intents(&self, cutoff: DateTime<Utc>) -> Result<Vec<PaymentIntent>, ReconcilerError> {
        let mut conn = self.pool.acquire().await?;
        payment_intents::purge_stale(cutoff, &mut conn).await
    }

    async fn fetch_intent(&self, gateway_ref: &str) -> Result<Option<PaymentIntent>, ReconcilerError> {
        let mut conn = self.pool.acquire().await?;
        payment_intents::fetch_by_gateway_ref(gateway_ref, &mut conn).await
    }
}

impl OrderBatchStore for SqliteDatabase {
    async fn checkout_debit(
        &self,
        owner: &OwnerId,
        priced_items: &[(BundleItem, Cedis)],
        total: Cedis,
        idempotency_key: &str,
    ) -> Result<CheckoutResult, CheckoutError> {
        let mut tx = self.pool.begin().await?;
        if !wallets::touch(owner, &mut tx).await? {
            return Err(LedgerError::WalletNotFound(owner.clone()).into());
        }
        if let Some(batch) = orders::fetch_batch_by_key(idempotency_key, &mut tx).await? {
            let items = orders::fetch_items_for_batch(batch.id, &mut tx).await?;
            tx.commit().await?;
            debug!("🗃️ Checkout [{idempotency_key}] replayed; returning existing batch #{}", batch.id);
            return Ok(CheckoutResult { batch, items, debited: false });
        }
        let wallet = wallets::fetch_wallet_by_owner(owner, &mut tx)
            .await?
            .ok_or_else(|| LedgerError::WalletNotFound(owner.clone()))?;
        let description = Some(format!("Checkout of {} bundle item(s)", priced_items.len()));
        let (_, fresh) = transactions::idempotent_insert(
            wallet.id,
            TransactionKind::Purchase,
            -total,
            idempotency_key,
            None,
            description,
            &mut tx,
        )
        .await
        .map_err(CheckoutError::LedgerError)?;
        if fresh {
            let debited = wallets::try_debit(wallet.id, total, &mut tx).await?;
            if !debited {
                tx.rollback().await?;
                return Err(LedgerError::InsufficientBalance { needed: total, available: wallet.balance }.into());
            }
        } else {
            // The debit already exists. A concurrent checkout with the same key may have just committed its
            // batch, in which case this is a replay of the winner's result.
            if let Some(batch) = orders::fetch_batch_by_key(idempotency_key, &mut tx).await? {
                let items = orders::fetch_items_for_batch(batch.id, &mut tx).await?;
                tx.commit().await?;
                debug!("🗃️ Checkout [{idempotency_key}] lost the race; returning batch #{}", batch.id);
                return Ok(CheckoutResult { batch, items, debited: false });
            }
            // Otherwise a previous attempt debited the wallet and then died before persisting the batch.
            // Re-derive the batch from the already-completed transaction instead of charging again.
            info!("🗃️ Checkout [{idempotency_key}] found a completed debit without a batch. Re-deriving the batch.");
        }
        let (batch, created) = orders::insert_batch(owner, total, idempotency_key, idempotency_key, &mut tx).await?;
        let items = if created {
            orders::insert_items(batch.id, priced_items, &mut tx).await?
        } else {
            orders::fetch_items_for_batch(batch.id, &mut tx).await?
        };
        tx.commit().await?;
        Ok(CheckoutResult { batch, items, debited: fresh && created })
    }

    async fn fetch_batch_by_key(&self, idempotency_key: &str) -> Result<Option<CheckoutResult>, CheckoutError> {
        let mut conn = self.pool.acquire().await?;
        let Some(batch) = orders::fetch_batch_by_key(idempotency_key, &mut conn).await? else {
            return Ok(None);
        };
        let items = orders::fetch_items_for_batch(batch.id, &mut conn).await?;
        Ok(Some(CheckoutResult { batch, items, debited: false }))
    }

    async fn update_item_fulfillment(
        &self,
        item_id: i64,
        status: FulfillmentStatus,
    ) -> Result<OrderItem, CheckoutError> {
        let mut conn = self.pool.acquire().await?;
        orders::update_item_status(item_id, status, &mut conn).await
    }
}

impl LockoutStore for SqliteDatabase {
    async fn record_attempt(&self, key: &str, expires_at: DateTime<Utc>) -> Result<i64, LockoutError> {
        let mut conn = self.pool.acquire().await?;
        lockouts::record_attempt(key, expires_at, &mut conn).await
    }

    async fn hits_for(&self, key: &str, now: DateTime<Utc>) -> Result<i64, LockoutError> {
        let mut conn = self.pool.acquire().await?;
        lockouts::hits_for(key, now, &mut conn).await
    }

    async fn reset(&self, key: &str) -> Result<(), LockoutError> {
        let mut conn = self.pool.acquire().await?;
        lockouts::reset(key, &mut conn).await
    }

    async fn evict_expired(&self, now: DateTime<Utc>) -> Result<u64, LockoutError> {
        let mut conn = self.pool.acquire().await?;
        lockouts::evict_expired(now, &mut conn).await
    }
}
