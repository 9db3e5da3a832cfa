use std::time::Duration;

use bpg_common::Cedis;
use bundle_payment_engine::{
    db_types::{OwnerId, TransactionKind},
    events::EventProducers,
    traits::LedgerError,
    LedgerApi,
    SqliteDatabase,
};
use log::*;
use tokio::runtime::Runtime;

use crate::support::prepare_env::{prepare_test_env, random_db_path};

mod support;

const NUM_CREDITS: u64 = 20;
const RATE: u64 = 100; // ledger mutations per second

#[test]
fn burst_credits_and_debits() {
    info!("🚀️ Starting ledger burst test");

    let sys = Runtime::new().unwrap();
    let delay = Duration::from_millis(1000 / RATE);

    sys.block_on(async move {
        let url = random_db_path();
        prepare_test_env(&url).await;
        let db = SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating database");
        let api = LedgerApi::new(db, EventProducers::default());
        let owner = OwnerId::from("233201112222");
        api.create_wallet(&owner).await.expect("Error creating wallet");

        let mut timer = tokio::time::interval(delay);
        for i in 0..NUM_CREDITS {
            timer.tick().await;
            let amount = Cedis::from_pesewas((i + 1) as i64 * 100);
            api.credit(&owner, amount, TransactionKind::Deposit, &format!("bursttx-00-{i}"), None)
                .await
                .expect("Error processing credit");
        }
        // 1+2+..+20 cedis
        assert_eq!(api.balance(&owner).await.unwrap(), Cedis::from_cedis(210));

        // Hammer the same wallet with more debits than the balance can cover. Exactly as many succeed as the
        // funds allow, and the rest fail with InsufficientBalance; the balance never dips below zero.
        let mut winners = 0;
        let mut losers = 0;
        for i in 0..NUM_CREDITS {
            timer.tick().await;
            match api.debit(&owner, Cedis::from_cedis(20), TransactionKind::Purchase, &format!("spend-{i}"), None).await
            {
                Ok(applied) => {
                    assert!(applied.applied);
                    winners += 1;
                },
                Err(LedgerError::InsufficientBalance { .. }) => losers += 1,
                Err(e) => panic!("Unexpected debit failure: {e}"),
            }
        }
        assert_eq!(winners, 10);
        assert_eq!(losers, 10);
        assert_eq!(api.balance(&owner).await.unwrap(), Cedis::from_cedis(10));

        let history = api.history(&owner).await.unwrap().expect("No history");
        assert_eq!(history.completed_total(), Cedis::from_cedis(10));
        // Only successful debits made it into the log.
        assert_eq!(history.transactions.len(), (NUM_CREDITS + 10) as usize);
    });
}

#[test]
fn contending_debits_have_exactly_one_winner() {
    let sys = Runtime::new().unwrap();
    sys.block_on(async move {
        let url = random_db_path();
        prepare_test_env(&url).await;
        let db = SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating database");
        let api = LedgerApi::new(db, EventProducers::default());
        let owner = OwnerId::from("233205556666");
        api.create_wallet(&owner).await.expect("Error creating wallet");
        api.credit(&owner, Cedis::from_cedis(20), TransactionKind::Deposit, "contend-seed", None)
            .await
            .expect("Error processing credit");

        // Four debits land at once, and the balance only covers one of them. The conditional debit decides the
        // winner inside the database, so exactly one succeeds no matter how the attempts interleave.
        let (a, b, c, d) = tokio::join!(
            api.debit(&owner, Cedis::from_cedis(15), TransactionKind::Purchase, "contend-a", None),
            api.debit(&owner, Cedis::from_cedis(15), TransactionKind::Purchase, "contend-b", None),
            api.debit(&owner, Cedis::from_cedis(15), TransactionKind::Purchase, "contend-c", None),
            api.debit(&owner, Cedis::from_cedis(15), TransactionKind::Purchase, "contend-d", None),
        );
        let results = [a, b, c, d];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        for loser in results.iter().filter(|r| r.is_err()) {
            assert!(matches!(loser.as_ref().unwrap_err(), LedgerError::InsufficientBalance { .. }));
        }
        assert_eq!(api.balance(&owner).await.unwrap(), Cedis::from_cedis(5));

        let history = api.history(&owner).await.unwrap().expect("No history");
        // The losers left no trace in the log.
        assert_eq!(history.transactions.len(), 2);
    });
}

#[test]
fn replayed_burst_settles_to_the_same_balance() {
    let sys = Runtime::new().unwrap();
    sys.block_on(async move {
        let url = random_db_path();
        prepare_test_env(&url).await;
        let db = SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating database");
        let api = LedgerApi::new(db, EventProducers::default());
        let owner = OwnerId::from("233203334444");
        api.create_wallet(&owner).await.expect("Error creating wallet");

        // A retry storm: every mutation delivered three times. The reference makes each one count exactly once.
        for round in 0..3 {
            for i in 0..10 {
                let result = api
                    .credit(&owner, Cedis::from_cedis(5), TransactionKind::Deposit, &format!("retry-{i}"), None)
                    .await
                    .expect("Error processing credit");
                assert_eq!(result.applied, round == 0);
            }
        }
        assert_eq!(api.balance(&owner).await.unwrap(), Cedis::from_cedis(50));
    });
}
