use bpg_common::Cedis;
use bundle_payment_engine::{
    db_types::{CallerIdentity, ClaimStatus, NewFundingClaim, OwnerId},
    events::EventProducers,
    start_expiry_worker,
    traits::{FundingError, LedgerAudit, LockoutStore, WalletLedger},
    FundingApi,
    SqliteDatabase,
};
use chrono::{Duration, Utc};

use crate::support::prepare_env::{prepare_test_env, random_db_path};

mod support;

async fn new_funding(ttl: Duration) -> (FundingApi<SqliteDatabase>, SqliteDatabase) {
    let url = random_db_path();
    prepare_test_env(&url).await;
    let db = SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating database");
    (FundingApi::new(db.clone(), ttl, EventProducers::default()), db)
}

fn new_claim(owner: &OwnerId, amount: Cedis) -> NewFundingClaim {
    NewFundingClaim::new(owner.clone(), amount, "233241234567", "ops@example.com")
}

#[tokio::test]
async fn full_claim_walk_credits_exactly_once() {
    let (api, db) = new_funding(Duration::hours(72)).await;
    let operator = CallerIdentity::operator("ops@example.com");
    let owner = OwnerId::from("233200001001");
    let customer = CallerIdentity::customer(owner.clone());
    db.create_wallet_for_owner(&owner).await.unwrap();

    let claim = api.initiate(&operator, new_claim(&owner, Cedis::from_cedis(150))).await.unwrap();
    assert_eq!(claim.status, ClaimStatus::Initiated);
    assert_eq!(claim.amount, Cedis::from_cedis(150));
    assert_eq!(claim.code.len(), 14);

    // The code is useless until the operator asserts the money was actually sent.
    let err = api.claim(&customer, &claim.code).await.unwrap_err();
    assert!(matches!(err, FundingError::InvalidState { state: ClaimStatus::Initiated, .. }));
    assert_eq!(db.fetch_wallet(&owner).await.unwrap().unwrap().balance, Cedis::default());

    let sent = api.mark_sent(&operator, claim.id, Some("MOMO-REF-881".to_string()), None).await.unwrap();
    assert_eq!(sent.status, ClaimStatus::PendingClaim);
    assert_eq!(sent.external_ref.as_deref(), Some("MOMO-REF-881"));

    let settled = api.claim(&customer, &claim.code).await.unwrap();
    assert_eq!(settled.status, ClaimStatus::Claimed);
    assert_eq!(settled.claimed_by.as_deref(), Some("233200001001"));
    assert_eq!(db.fetch_wallet(&owner).await.unwrap().unwrap().balance, Cedis::from_cedis(150));
    // The ledger entry carries the claim code as its reference.
    let txn = db.fetch_transaction_by_reference(&claim.code).await.unwrap().expect("No settlement transaction");
    assert_eq!(txn.amount, Cedis::from_cedis(150));

    // The second redemption of the same code is refused and moves nothing.
    let err = api.claim(&customer, &claim.code).await.unwrap_err();
    assert!(matches!(err, FundingError::AlreadyClaimed));
    assert_eq!(db.fetch_wallet(&owner).await.unwrap().unwrap().balance, Cedis::from_cedis(150));
}

#[tokio::test]
async fn initiate_requires_operator_and_a_wallet() {
    let (api, db) = new_funding(Duration::hours(1)).await;
    let owner = OwnerId::from("233200001002");
    let customer = CallerIdentity::customer(owner.clone());
    let operator = CallerIdentity::operator("ops@example.com");

    let err = api.initiate(&customer, new_claim(&owner, Cedis::from_cedis(10))).await.unwrap_err();
    assert!(matches!(err, FundingError::PermissionDenied));

    let err = api.initiate(&operator, new_claim(&owner, Cedis::from_cedis(10))).await.unwrap_err();
    assert!(matches!(err, FundingError::WalletNotFound(_)));

    db.create_wallet_for_owner(&owner).await.unwrap();
    let err = api.initiate(&operator, new_claim(&owner, Cedis::default())).await.unwrap_err();
    assert!(matches!(err, FundingError::ValidationError(_)));
}

#[tokio::test]
async fn mark_sent_only_from_initiated() {
    let (api, db) = new_funding(Duration::hours(1)).await;
    let operator = CallerIdentity::operator("ops@example.com");
    let owner = OwnerId::from("233200001003");
    db.create_wallet_for_owner(&owner).await.unwrap();

    let claim = api.initiate(&operator, new_claim(&owner, Cedis::from_cedis(20))).await.unwrap();
    api.mark_sent(&operator, claim.id, None, None).await.unwrap();
    let err = api.mark_sent(&operator, claim.id, None, None).await.unwrap_err();
    assert!(matches!(err, FundingError::InvalidState { state: ClaimStatus::PendingClaim, .. }));
}

#[tokio::test]
async fn cancel_needs_a_reason_and_an_open_claim() {
    let (api, db) = new_funding(Duration::hours(1)).await;
    let operator = CallerIdentity::operator("ops@example.com");
    let owner = OwnerId::from("233200001004");
    let customer = CallerIdentity::customer(owner.clone());
    db.create_wallet_for_owner(&owner).await.unwrap();

    let claim = api.initiate(&operator, new_claim(&owner, Cedis::from_cedis(20))).await.unwrap();
    let err = api.cancel(&operator, claim.id, "  ").await.unwrap_err();
    assert!(matches!(err, FundingError::ValidationError(_)));
    let err = api.cancel(&customer, claim.id, "wrong person").await.unwrap_err();
    assert!(matches!(err, FundingError::PermissionDenied));

    let cancelled = api.cancel(&operator, claim.id, "Customer paid by card instead").await.unwrap();
    assert_eq!(cancelled.status, ClaimStatus::Cancelled);
    assert_eq!(cancelled.cancel_reason.as_deref(), Some("Customer paid by card instead"));

    // A settled claim cannot be cancelled.
    let claim = api.initiate(&operator, new_claim(&owner, Cedis::from_cedis(30))).await.unwrap();
    api.mark_sent(&operator, claim.id, None, None).await.unwrap();
    api.claim(&customer, &claim.code).await.unwrap();
    let err = api.cancel(&operator, claim.id, "too late").await.unwrap_err();
    assert!(matches!(err, FundingError::InvalidState { state: ClaimStatus::Claimed, .. }));
}

#[tokio::test]
async fn lapsed_windows_expire_and_the_sweep_is_idempotent() {
    // A negative TTL backdates the expiry, so every claim is born lapsed.
    let (api, db) = new_funding(Duration::seconds(-5)).await;
    let operator = CallerIdentity::operator("ops@example.com");
    let owner = OwnerId::from("233200001005");
    let customer = CallerIdentity::customer(owner.clone());
    db.create_wallet_for_owner(&owner).await.unwrap();

    let claim = api.initiate(&operator, new_claim(&owner, Cedis::from_cedis(40))).await.unwrap();
    api.mark_sent(&operator, claim.id, None, None).await.unwrap();

    let err = api.claim(&customer, &claim.code).await.unwrap_err();
    assert!(matches!(err, FundingError::ExpiredClaim));
    assert_eq!(db.fetch_wallet(&owner).await.unwrap().unwrap().balance, Cedis::default());

    let sweep = api.expire_sweep().await.unwrap();
    assert_eq!(sweep.expired_count(), 1);
    assert_eq!(sweep.expired[0].id, claim.id);
    assert_eq!(sweep.expired[0].status, ClaimStatus::Expired);

    let second = api.expire_sweep().await.unwrap();
    assert_eq!(second.expired_count(), 0);
}

#[tokio::test]
async fn stale_initiated_claims_are_reported_but_not_touched() {
    let (api, db) = new_funding(Duration::seconds(-5)).await;
    let operator = CallerIdentity::operator("ops@example.com");
    let owner = OwnerId::from("233200001006");
    db.create_wallet_for_owner(&owner).await.unwrap();

    let claim = api.initiate(&operator, new_claim(&owner, Cedis::from_cedis(10))).await.unwrap();
    let sweep = api.expire_sweep().await.unwrap();
    assert_eq!(sweep.expired_count(), 0);
    assert_eq!(sweep.stale_initiated, vec![claim.id]);

    // Still Initiated: the operator never asserted a transfer, so there is nothing to expire.
    let fetched = api.claim_by_id(&operator, claim.id).await.unwrap().unwrap();
    assert_eq!(fetched.status, ClaimStatus::Initiated);
}

#[tokio::test]
async fn repeated_failed_attempts_lock_the_caller_out() {
    let (api, db) = new_funding(Duration::hours(1)).await;
    let operator = CallerIdentity::operator("ops@example.com");
    let owner = OwnerId::from("233200001007");
    let customer = CallerIdentity::customer(owner.clone());
    db.create_wallet_for_owner(&owner).await.unwrap();

    let claim = api.initiate(&operator, new_claim(&owner, Cedis::from_cedis(25))).await.unwrap();
    api.mark_sent(&operator, claim.id, None, None).await.unwrap();

    for i in 0..5 {
        let err = api.claim(&customer, &format!("AAAA-BBBB-000{i}")).await.unwrap_err();
        assert!(matches!(err, FundingError::ClaimNotFound));
    }
    // Even the genuine code is refused now.
    let err = api.claim(&customer, &claim.code).await.unwrap_err();
    assert!(matches!(err, FundingError::LockedOut));
    assert_eq!(db.fetch_wallet(&owner).await.unwrap().unwrap().balance, Cedis::default());

    // The lockout is per caller; another customer's cycle is unaffected.
    let owner_b = OwnerId::from("233200001008");
    let customer_b = CallerIdentity::customer(owner_b.clone());
    db.create_wallet_for_owner(&owner_b).await.unwrap();
    let claim_b = api.initiate(&operator, new_claim(&owner_b, Cedis::from_cedis(25))).await.unwrap();
    api.mark_sent(&operator, claim_b.id, None, None).await.unwrap();
    let settled = api.claim(&customer_b, &claim_b.code).await.unwrap();
    assert_eq!(settled.status, ClaimStatus::Claimed);
    assert_eq!(db.fetch_wallet(&owner_b).await.unwrap().unwrap().balance, Cedis::from_cedis(25));
}

#[tokio::test]
async fn only_the_claim_owner_may_redeem_the_code() {
    let (api, db) = new_funding(Duration::hours(1)).await;
    let operator = CallerIdentity::operator("ops@example.com");
    let owner = OwnerId::from("233200001010");
    db.create_wallet_for_owner(&owner).await.unwrap();

    let claim = api.initiate(&operator, new_claim(&owner, Cedis::from_cedis(60))).await.unwrap();
    api.mark_sent(&operator, claim.id, None, None).await.unwrap();

    // Neither a different customer nor the operator themselves can settle the owner's code.
    let stranger = CallerIdentity::customer("233200001011");
    let err = api.claim(&stranger, &claim.code).await.unwrap_err();
    assert!(matches!(err, FundingError::PermissionDenied));
    let err = api.claim(&operator, &claim.code).await.unwrap_err();
    assert!(matches!(err, FundingError::PermissionDenied));
    let fetched = api.claim_by_id(&operator, claim.id).await.unwrap().unwrap();
    assert_eq!(fetched.status, ClaimStatus::PendingClaim);
    assert!(fetched.claimed_by.is_none());
    assert_eq!(db.fetch_wallet(&owner).await.unwrap().unwrap().balance, Cedis::default());

    let settled = api.claim(&CallerIdentity::customer(owner.clone()), &claim.code).await.unwrap();
    assert_eq!(settled.claimed_by.as_deref(), Some("233200001010"));
    assert_eq!(db.fetch_wallet(&owner).await.unwrap().unwrap().balance, Cedis::from_cedis(60));
}

#[tokio::test]
async fn a_successful_claim_clears_the_attempt_counter() {
    let (api, db) = new_funding(Duration::hours(1)).await;
    let operator = CallerIdentity::operator("ops@example.com");
    let owner = OwnerId::from("233200001012");
    let customer = CallerIdentity::customer(owner.clone());
    db.create_wallet_for_owner(&owner).await.unwrap();

    let claim = api.initiate(&operator, new_claim(&owner, Cedis::from_cedis(15))).await.unwrap();
    api.mark_sent(&operator, claim.id, None, None).await.unwrap();

    for i in 0..4 {
        let err = api.claim(&customer, &format!("AAAA-BBBB-111{i}")).await.unwrap_err();
        assert!(matches!(err, FundingError::ClaimNotFound));
    }
    api.claim(&customer, &claim.code).await.unwrap();

    // The counter restarted from zero: a full five fresh failures fit before the next refusal. Without the
    // reset, the earlier four would have pushed these over the limit immediately.
    for i in 0..5 {
        let err = api.claim(&customer, &format!("AAAA-BBBB-222{i}")).await.unwrap_err();
        assert!(matches!(err, FundingError::ClaimNotFound));
    }
    let err = api.claim(&customer, "AAAA-BBBB-2225").await.unwrap_err();
    assert!(matches!(err, FundingError::LockedOut));
}

#[tokio::test]
async fn expired_attempt_counters_read_as_zero() {
    let (_, db) = new_funding(Duration::hours(1)).await;
    // Backdated expiry: the counter is born lapsed.
    let hits = db.record_attempt("claim:233200001099", Utc::now() - Duration::minutes(1)).await.unwrap();
    assert_eq!(hits, 1);
    assert_eq!(db.hits_for("claim:233200001099", Utc::now()).await.unwrap(), 0);
}

#[tokio::test]
async fn simultaneous_claims_settle_exactly_once() {
    let (api, db) = new_funding(Duration::hours(1)).await;
    let operator = CallerIdentity::operator("ops@example.com");
    let owner = OwnerId::from("233200001013");
    let customer = CallerIdentity::customer(owner.clone());
    db.create_wallet_for_owner(&owner).await.unwrap();

    let claim = api.initiate(&operator, new_claim(&owner, Cedis::from_cedis(80))).await.unwrap();
    api.mark_sent(&operator, claim.id, None, None).await.unwrap();

    let (first, second) = tokio::join!(api.claim(&customer, &claim.code), api.claim(&customer, &claim.code));
    let results = [first, second];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let loser = results.iter().find(|r| r.is_err()).unwrap().as_ref().unwrap_err();
    assert!(matches!(loser, FundingError::AlreadyClaimed));
    assert_eq!(db.fetch_wallet(&owner).await.unwrap().unwrap().balance, Cedis::from_cedis(80));
}

#[tokio::test]
async fn the_background_sweep_expires_lapsed_claims() {
    let (api, db) = new_funding(Duration::seconds(-5)).await;
    let operator = CallerIdentity::operator("ops@example.com");
    let owner = OwnerId::from("233200001014");
    db.create_wallet_for_owner(&owner).await.unwrap();

    let claim = api.initiate(&operator, new_claim(&owner, Cedis::from_cedis(10))).await.unwrap();
    api.mark_sent(&operator, claim.id, None, None).await.unwrap();

    let worker =
        start_expiry_worker(db.clone(), EventProducers::default(), Duration::seconds(-5), Duration::hours(1));
    // The first sweep fires as soon as the worker starts.
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    let swept = api.claim_by_id(&operator, claim.id).await.unwrap().unwrap();
    assert_eq!(swept.status, ClaimStatus::Expired);
    worker.abort();
}

#[tokio::test]
async fn customers_only_see_their_own_claims() {
    let (api, db) = new_funding(Duration::hours(1)).await;
    let operator = CallerIdentity::operator("ops@example.com");
    let owner = OwnerId::from("233200001009");
    db.create_wallet_for_owner(&owner).await.unwrap();
    let claim = api.initiate(&operator, new_claim(&owner, Cedis::from_cedis(5))).await.unwrap();

    let stranger = CallerIdentity::customer("233200009999");
    let err = api.claim_by_code(&stranger, &claim.code).await.unwrap_err();
    assert!(matches!(err, FundingError::PermissionDenied));

    let own = CallerIdentity::customer(owner.clone());
    assert!(api.claim_by_code(&own, &claim.code).await.unwrap().is_some());
    assert!(api.claim_by_id(&operator, claim.id).await.unwrap().is_some());
    assert!(api.claim_by_code(&operator, "ZZZZ-ZZZZ-ZZZZ").await.unwrap().is_none());
}
