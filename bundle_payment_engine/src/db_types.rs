//! Database row types and status enums for the bundle payment engine.
//!
//! Everything that crosses the storage boundary lives here. Status enums are stored as TEXT and round-trip through
//! their `Display`/`FromStr` impls.

use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
use log::error;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use thiserror::Error;

pub use bpg_common::Cedis;

#[derive(Debug, Clone, Error)]
#[error("Invalid conversion: {0}")]
pub struct ConversionError(String);

//--------------------------------------      OwnerId       ----------------------------------------------------------
/// A lightweight wrapper around the identity a wallet belongs to. One owner has exactly one wallet.
#[derive(Clone, Debug, Type, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[sqlx(transparent)]
pub struct OwnerId(pub String);

impl Display for OwnerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for OwnerId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for OwnerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl OwnerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

//--------------------------------------       Wallet       ----------------------------------------------------------
/// The current spendable balance for one owner. Only the ledger mutates this row, and only together with an
/// appended [`LedgerTransaction`]; the balance always equals the sum of the wallet's Completed transaction amounts.
#[derive(Debug, Clone, FromRow)]
pub struct Wallet {
    pub id: i64,
    pub owner_id: OwnerId,
    pub balance: Cedis,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

//--------------------------------------  TransactionKind   ----------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
pub enum TransactionKind {
    Deposit,
    Withdrawal,
    Purchase,
    Refund,
    TransferIn,
    TransferOut,
}

impl Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionKind::Deposit => write!(f, "Deposit"),
            TransactionKind::Withdrawal => write!(f, "Withdrawal"),
            TransactionKind::Purchase => write!(f, "Purchase"),
            TransactionKind::Refund => write!(f, "Refund"),
            TransactionKind::TransferIn => write!(f, "TransferIn"),
            TransactionKind::TransferOut => write!(f, "TransferOut"),
        }
    }
}

impl FromStr for TransactionKind {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Deposit" => Ok(Self::Deposit),
            "Withdrawal" => Ok(Self::Withdrawal),
            "Purchase" => Ok(Self::Purchase),
            "Refund" => Ok(Self::Refund),
            "TransferIn" => Ok(Self::TransferIn),
            "TransferOut" => Ok(Self::TransferOut),
            s => Err(ConversionError(format!("Invalid transaction kind: {s}"))),
        }
    }
}

impl From<String> for TransactionKind {
    fn from(value: String) -> Self {
        value.parse().unwrap_or_else(|_| {
            error!("Invalid transaction kind: {value}. But this conversion cannot fail. Defaulting to Deposit");
            TransactionKind::Deposit
        })
    }
}

//-------------------------------------- TransactionStatus  ----------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
pub enum TransactionStatus {
    /// The transaction has been recorded but its effect is not yet final.
    Pending,
    /// The transaction is final and is reflected in the wallet balance.
    Completed,
    /// The transaction was abandoned and has no effect on the balance.
    Failed,
}

impl Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionStatus::Pending => write!(f, "Pending"),
            TransactionStatus::Completed => write!(f, "Completed"),
            TransactionStatus::Failed => write!(f, "Failed"),
        }
    }
}

impl FromStr for TransactionStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(Self::Pending),
            "Completed" => Ok(Self::Completed),
            "Failed" => Ok(Self::Failed),
            s => Err(ConversionError(format!("Invalid transaction status: {s}"))),
        }
    }
}

//-------------------------------------- LedgerTransaction  ----------------------------------------------------------
/// One append-only row in the transaction log. Immutable once written, apart from the single
/// Pending → Completed|Failed status transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct LedgerTransaction {
    pub id: i64,
    pub wallet_id: i64,
    pub kind: TransactionKind,
    /// Signed amount: positive for credits, negative for debits.
    pub amount: Cedis,
    pub status: TransactionStatus,
    /// The globally unique idempotency reference for this transaction.
    pub reference: String,
    /// For Refund rows: the reference of the transaction this one compensates.
    pub reverses: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

//--------------------------------------    ClaimStatus     ----------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
pub enum ClaimStatus {
    /// An operator has locked in the intent to fund, but nothing has been sent yet.
    Initiated,
    /// The operator asserts the money has physically been sent; the holder may now claim it.
    PendingClaim,
    /// The holder presented the claim code and the wallet was credited. Terminal.
    Claimed,
    /// The claim window lapsed before the holder claimed. Terminal.
    Expired,
    /// An operator cancelled the cycle, with a reason. Terminal.
    Cancelled,
}

impl ClaimStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ClaimStatus::Claimed | ClaimStatus::Expired | ClaimStatus::Cancelled)
    }
}

impl Display for ClaimStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClaimStatus::Initiated => write!(f, "Initiated"),
            ClaimStatus::PendingClaim => write!(f, "PendingClaim"),
            ClaimStatus::Claimed => write!(f, "Claimed"),
            ClaimStatus::Expired => write!(f, "Expired"),
            ClaimStatus::Cancelled => write!(f, "Cancelled"),
        }
    }
}

impl FromStr for ClaimStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Initiated" => Ok(Self::Initiated),
            "PendingClaim" => Ok(Self::PendingClaim),
            "Claimed" => Ok(Self::Claimed),
            "Expired" => Ok(Self::Expired),
            "Cancelled" => Ok(Self::Cancelled),
            s => Err(ConversionError(format!("Invalid claim status: {s}"))),
        }
    }
}

//--------------------------------------   FundingClaim     ----------------------------------------------------------
/// One manual funding cycle. The claim code is the shared secret that converts an operator-asserted transfer into a
/// wallet credit; it doubles as the ledger reference when the claim settles, so a cycle can credit at most once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct FundingClaim {
    pub id: i64,
    pub owner_id: OwnerId,
    pub amount: Cedis,
    /// Contact channel the money was sent through (e.g. a mobile-money phone number).
    pub channel: String,
    pub code: String,
    pub status: ClaimStatus,
    pub expires_at: DateTime<Utc>,
    pub initiated_by: String,
    pub claimed_by: Option<String>,
    /// Operator-supplied reference from the external transfer (e.g. a momo receipt number).
    pub external_ref: Option<String>,
    pub notes: Option<String>,
    pub cancel_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewFundingClaim {
    pub owner_id: OwnerId,
    pub amount: Cedis,
    pub channel: String,
    pub initiated_by: String,
    pub notes: Option<String>,
}

impl NewFundingClaim {
    pub fn new(owner_id: OwnerId, amount: Cedis, channel: impl Into<String>, initiated_by: impl Into<String>) -> Self {
        Self { owner_id, amount, channel: channel.into(), initiated_by: initiated_by.into(), notes: None }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

//--------------------------------------    IntentStatus    ----------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
pub enum IntentStatus {
    Pending,
    Completed,
    Failed,
}

impl Display for IntentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IntentStatus::Pending => write!(f, "Pending"),
            IntentStatus::Completed => write!(f, "Completed"),
            IntentStatus::Failed => write!(f, "Failed"),
        }
    }
}

impl FromStr for IntentStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(Self::Pending),
            "Completed" => Ok(Self::Completed),
            "Failed" => Ok(Self::Failed),
            s => Err(ConversionError(format!("Invalid intent status: {s}"))),
        }
    }
}

//--------------------------------------   PaymentIntent    ----------------------------------------------------------
/// One checkout attempt against the external card/mobile-money gateway, awaiting confirmation via webhook or poll.
/// Stale Pending intents are marked Failed by the purge; they never silently complete.
#[derive(Debug, Clone, FromRow)]
pub struct PaymentIntent {
    pub id: i64,
    pub gateway_ref: String,
    pub owner_id: OwnerId,
    pub amount: Cedis,
    pub status: IntentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPaymentIntent {
    pub gateway_ref: String,
    pub owner_id: OwnerId,
    pub amount: Cedis,
}

impl NewPaymentIntent {
    pub fn new(gateway_ref: impl Into<String>, owner_id: OwnerId, amount: Cedis) -> Self {
        Self { gateway_ref: gateway_ref.into(), owner_id, amount }
    }
}

//-------------------------------------- FulfillmentStatus  ----------------------------------------------------------
/// Tracks a line item's downstream provisioning independently of the (already final) financial debit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
pub enum FulfillmentStatus {
    Pending,
    Provisioned,
    Failed,
}

impl Display for FulfillmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FulfillmentStatus::Pending => write!(f, "Pending"),
            FulfillmentStatus::Provisioned => write!(f, "Provisioned"),
            FulfillmentStatus::Failed => write!(f, "Failed"),
        }
    }
}

impl FromStr for FulfillmentStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(Self::Pending),
            "Provisioned" => Ok(Self::Provisioned),
            "Failed" => Ok(Self::Failed),
            s => Err(ConversionError(format!("Invalid fulfillment status: {s}"))),
        }
    }
}

//--------------------------------------    OrderBatch      ----------------------------------------------------------
/// One checkout submission. Exactly one Purchase transaction (referenced by `txn_reference`) backs a batch,
/// regardless of how many line items it carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct OrderBatch {
    pub id: i64,
    pub idempotency_key: String,
    pub owner_id: OwnerId,
    pub total: Cedis,
    pub txn_reference: String,
    pub created_at: DateTime<Utc>,
}

//--------------------------------------     OrderItem      ----------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct OrderItem {
    pub id: i64,
    pub batch_id: i64,
    pub bundle_code: String,
    /// The phone number the bundle is provisioned to. Not necessarily the purchaser.
    pub recipient: String,
    pub unit_price: Cedis,
    pub fulfillment_status: FulfillmentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

//--------------------------------------    BundleItem      ----------------------------------------------------------
/// A single requested purchase line, before pricing. Resolved against the catalog at checkout time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleItem {
    pub bundle_code: String,
    pub recipient: String,
}

impl BundleItem {
    pub fn new(bundle_code: impl Into<String>, recipient: impl Into<String>) -> Self {
        Self { bundle_code: bundle_code.into(), recipient: recipient.into() }
    }
}

//--------------------------------------       Role         ----------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Back-office staff. May initiate, send and cancel funding claims.
    Operator,
    /// A wallet owner. May claim funding codes and check out against their own wallet.
    Customer,
    /// May view balances and history but never move money.
    ReadOnly,
}

//--------------------------------------  CallerIdentity    ----------------------------------------------------------
/// The resolved identity attached to every API call. Authentication itself happens upstream; the engine only
/// checks that the roles attached here permit the requested operation.
#[derive(Debug, Clone)]
pub struct CallerIdentity {
    pub owner_id: OwnerId,
    pub roles: Vec<Role>,
}

impl CallerIdentity {
    pub fn new(owner_id: impl Into<OwnerId>, roles: Vec<Role>) -> Self {
        Self { owner_id: owner_id.into(), roles }
    }

    pub fn operator(owner_id: impl Into<OwnerId>) -> Self {
        Self::new(owner_id, vec![Role::Operator])
    }

    pub fn customer(owner_id: impl Into<OwnerId>) -> Self {
        Self::new(owner_id, vec![Role::Customer])
    }

    pub fn is_operator(&self) -> bool {
        self.roles.contains(&Role::Operator)
    }

    /// True if this caller is the given owner acting on their own wallet.
    pub fn acts_for(&self, owner: &OwnerId) -> bool {
        self.roles.contains(&Role::Customer) && &self.owner_id == owner
    }
}
