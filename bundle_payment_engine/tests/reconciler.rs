use std::collections::HashMap;

use bpg_common::{Cedis, Secret};
use bundle_payment_engine::{
    db_types::{CallerIdentity, IntentStatus, NewPaymentIntent, OwnerId},
    events::EventProducers,
    helpers::calculate_hmac,
    traits::{GatewayClient, GatewayError, LedgerAudit, ReconcilerError, VerifiedPayment, WalletLedger, WebhookPayload},
    ReconcilerApi,
    SqliteDatabase,
};
use chrono::{Duration, Utc};

use crate::support::prepare_env::{prepare_test_env, random_db_path};

mod support;

#[derive(Clone, Default)]
struct MockGateway {
    payments: HashMap<String, VerifiedPayment>,
    unreachable: bool,
}

impl MockGateway {
    fn with_payment(mut self, gateway_ref: &str, owner: &str, amount: Cedis, success: bool) -> Self {
        let payment = VerifiedPayment {
            success,
            amount,
            owner_id: OwnerId::from(owner),
            paid_at: success.then(Utc::now),
        };
        self.payments.insert(gateway_ref.to_string(), payment);
        self
    }
}

impl GatewayClient for MockGateway {
    fn name(&self) -> &str {
        "paystack"
    }

    async fn verify(&self, gateway_ref: &str) -> Result<VerifiedPayment, GatewayError> {
        if self.unreachable {
            return Err(GatewayError::Unreachable("connection refused".to_string()));
        }
        self.payments
            .get(gateway_ref)
            .cloned()
            .ok_or_else(|| GatewayError::UnknownReference(gateway_ref.to_string()))
    }
}

fn secret() -> Secret<String> {
    Secret::new("webhook-signing-key".to_string())
}

fn signed_body(reference: &str, amount: i64, owner: &str) -> (Vec<u8>, String) {
    let payload =
        WebhookPayload { reference: reference.to_string(), amount, owner_id: owner.to_string(), timestamp: Utc::now() };
    let body = serde_json::to_vec(&payload).unwrap();
    let signature = calculate_hmac(&secret(), &body);
    (body, signature)
}

async fn new_reconciler(gateway: MockGateway) -> (ReconcilerApi<SqliteDatabase, MockGateway>, SqliteDatabase) {
    let url = random_db_path();
    prepare_test_env(&url).await;
    let db = SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating database");
    (ReconcilerApi::new(db.clone(), gateway, secret(), EventProducers::default()), db)
}

#[tokio::test]
async fn webhook_and_poll_converge_on_one_credit() {
    let owner = OwnerId::from("233200002001");
    let gateway = MockGateway::default().with_payment("PAY-001", owner.as_str(), Cedis::from_cedis(80), true);
    let (api, db) = new_reconciler(gateway).await;
    db.create_wallet_for_owner(&owner).await.unwrap();
    api.create_intent(NewPaymentIntent::new("PAY-001", owner.clone(), Cedis::from_cedis(80))).await.unwrap();

    let (body, signature) = signed_body("PAY-001", 8000, owner.as_str());
    let applied = api.handle_webhook(&body, &signature).await.unwrap().expect("Webhook was swallowed");
    assert!(applied.applied);
    assert_eq!(applied.transaction.reference, "paystack:PAY-001");
    assert_eq!(db.fetch_wallet(&owner).await.unwrap().unwrap().balance, Cedis::from_cedis(80));
    let intent = api.intent("PAY-001").await.unwrap().unwrap();
    assert_eq!(intent.status, IntentStatus::Completed);

    // The user mashes "check my payment" afterwards. Same derived reference, so it replays.
    let customer = CallerIdentity::customer(owner.clone());
    let replay = api.verify_and_credit(&customer, "PAY-001").await.unwrap();
    assert!(!replay.applied);
    assert_eq!(replay.transaction.id, applied.transaction.id);
    assert_eq!(db.fetch_wallet(&owner).await.unwrap().unwrap().balance, Cedis::from_cedis(80));
}

#[tokio::test]
async fn poll_first_then_webhook_is_also_one_credit() {
    let owner = OwnerId::from("233200002002");
    let gateway = MockGateway::default().with_payment("PAY-002", owner.as_str(), Cedis::from_cedis(45), true);
    let (api, db) = new_reconciler(gateway).await;
    db.create_wallet_for_owner(&owner).await.unwrap();

    let customer = CallerIdentity::customer(owner.clone());
    let applied = api.verify_and_credit(&customer, "PAY-002").await.unwrap();
    assert!(applied.applied);

    let (body, signature) = signed_body("PAY-002", 4500, owner.as_str());
    let replay = api.handle_webhook(&body, &signature).await.unwrap().expect("Webhook was swallowed");
    assert!(!replay.applied);
    assert_eq!(db.fetch_wallet(&owner).await.unwrap().unwrap().balance, Cedis::from_cedis(45));
}

#[tokio::test]
async fn bad_signatures_and_bodies_are_rejected() {
    let (api, db) = new_reconciler(MockGateway::default()).await;
    let owner = OwnerId::from("233200002003");
    db.create_wallet_for_owner(&owner).await.unwrap();

    let (body, _) = signed_body("PAY-003", 1000, owner.as_str());
    let err = api.handle_webhook(&body, "bm90IGEgcmVhbCBzaWduYXR1cmU=").await.unwrap_err();
    assert!(matches!(err, ReconcilerError::SignatureInvalid));

    let garbage = b"not json at all";
    let signature = calculate_hmac(&secret(), garbage);
    let err = api.handle_webhook(garbage, &signature).await.unwrap_err();
    assert!(matches!(err, ReconcilerError::MalformedPayload(_)));

    let (body, signature) = signed_body("PAY-003", -50, owner.as_str());
    let err = api.handle_webhook(&body, &signature).await.unwrap_err();
    assert!(matches!(err, ReconcilerError::MalformedPayload(_)));

    assert_eq!(db.fetch_wallet(&owner).await.unwrap().unwrap().balance, Cedis::default());
}

#[tokio::test]
async fn internal_failures_are_swallowed_so_the_gateway_gets_its_ack() {
    let (api, _db) = new_reconciler(MockGateway::default()).await;
    // No wallet exists for this owner, so the credit fails internally.
    let (body, signature) = signed_body("PAY-004", 1000, "233200009404");
    let result = api.handle_webhook(&body, &signature).await.unwrap();
    assert!(result.is_none());
}

#[tokio::test]
async fn the_intent_owner_wins_an_ownership_dispute() {
    let owner_a = OwnerId::from("233200002005");
    let owner_b = OwnerId::from("233200002006");
    let gateway = MockGateway::default().with_payment("PAY-005", owner_b.as_str(), Cedis::from_cedis(10), true);
    let (api, db) = new_reconciler(gateway).await;
    db.create_wallet_for_owner(&owner_a).await.unwrap();
    db.create_wallet_for_owner(&owner_b).await.unwrap();
    api.create_intent(NewPaymentIntent::new("PAY-005", owner_a.clone(), Cedis::from_cedis(10))).await.unwrap();

    // Webhook claims the payment belongs to B, but A created the intent. Swallowed, nobody credited.
    let (body, signature) = signed_body("PAY-005", 1000, owner_b.as_str());
    assert!(api.handle_webhook(&body, &signature).await.unwrap().is_none());

    // B polling hits the same wall; A polling is refused because the gateway reports B as the payer.
    let err = api.verify_and_credit(&CallerIdentity::customer(owner_b.clone()), "PAY-005").await.unwrap_err();
    assert!(matches!(err, ReconcilerError::OwnerMismatch));
    let err = api.verify_and_credit(&CallerIdentity::customer(owner_a.clone()), "PAY-005").await.unwrap_err();
    assert!(matches!(err, ReconcilerError::OwnerMismatch));

    assert_eq!(db.fetch_wallet(&owner_a).await.unwrap().unwrap().balance, Cedis::default());
    assert_eq!(db.fetch_wallet(&owner_b).await.unwrap().unwrap().balance, Cedis::default());
}

#[tokio::test]
async fn unconfirmed_and_unreachable_payments_do_not_credit() {
    let owner = OwnerId::from("233200002007");
    let gateway = MockGateway::default().with_payment("PAY-006", owner.as_str(), Cedis::from_cedis(30), false);
    let (api, db) = new_reconciler(gateway).await;
    db.create_wallet_for_owner(&owner).await.unwrap();
    let customer = CallerIdentity::customer(owner.clone());

    let err = api.verify_and_credit(&customer, "PAY-006").await.unwrap_err();
    assert!(matches!(err, ReconcilerError::NotConfirmed));
    let err = api.verify_and_credit(&customer, "PAY-UNKNOWN").await.unwrap_err();
    assert!(matches!(err, ReconcilerError::GatewayError(GatewayError::UnknownReference(_))));

    let gateway = MockGateway { unreachable: true, ..MockGateway::default() };
    let (api, _db) = new_reconciler(gateway).await;
    let err = api.verify_and_credit(&customer, "PAY-006").await.unwrap_err();
    assert!(matches!(err, ReconcilerError::GatewayError(GatewayError::Unreachable(_))));

    assert_eq!(db.fetch_wallet(&owner).await.unwrap().unwrap().balance, Cedis::default());
}

#[tokio::test]
async fn stale_intents_fail_but_a_late_confirmation_still_credits() {
    let owner = OwnerId::from("233200002008");
    let gateway = MockGateway::default().with_payment("PAY-007", owner.as_str(), Cedis::from_cedis(60), true);
    let (api, db) = new_reconciler(gateway).await;
    db.create_wallet_for_owner(&owner).await.unwrap();
    api.create_intent(NewPaymentIntent::new("PAY-007", owner.clone(), Cedis::from_cedis(60))).await.unwrap();

    // A negative age pushes the cutoff into the future, so the Pending intent is stale immediately.
    let purged = api.purge_stale(Duration::seconds(-5)).await.unwrap();
    assert_eq!(purged.len(), 1);
    assert_eq!(api.intent("PAY-007").await.unwrap().unwrap().status, IntentStatus::Failed);

    // Nothing more to purge on a re-run.
    assert!(api.purge_stale(Duration::seconds(-5)).await.unwrap().is_empty());

    // The payment confirms after all. The credit still lands and the intent record completes.
    let (body, signature) = signed_body("PAY-007", 6000, owner.as_str());
    let applied = api.handle_webhook(&body, &signature).await.unwrap().expect("Webhook was swallowed");
    assert!(applied.applied);
    assert_eq!(db.fetch_wallet(&owner).await.unwrap().unwrap().balance, Cedis::from_cedis(60));
    assert_eq!(api.intent("PAY-007").await.unwrap().unwrap().status, IntentStatus::Completed);
}
