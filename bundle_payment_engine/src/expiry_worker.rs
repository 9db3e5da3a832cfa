use chrono::{Duration, Utc};
use log::*;
use tokio::task::JoinHandle;

use crate::{
    db_types::FundingClaim,
    events::EventProducers,
    traits::{LockoutStore, PaymentIntentStore},
    FundingApi,
    SqliteDatabase,
};

/// Starts the background maintenance worker. Do not await the returned JoinHandle, as it will run indefinitely.
///
/// Every minute it expires lapsed funding claim windows, fails payment intents that have sat Pending longer than
/// `intent_ttl`, and evicts lapsed lockout counters. All three jobs are idempotent, so overlapping runs after a
/// restart are harmless.
pub fn start_expiry_worker(
    db: SqliteDatabase,
    producers: EventProducers,
    claim_ttl: Duration,
    intent_ttl: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(std::time::Duration::from_secs(60));
        let funding = FundingApi::new(db.clone(), claim_ttl, producers);
        info!("🕰️ Expiry worker started");
        loop {
            timer.tick().await;
            debug!("🕰️ Running expiry jobs");
            match funding.expire_sweep().await {
                Ok(result) => {
                    if result.expired_count() > 0 {
                        info!("🕰️ {} claim(s) expired: {}", result.expired_count(), claim_list(&result.expired));
                    }
                },
                Err(e) => error!("🕰️ Error running claim expiry job: {e}"),
            }
            match db.purge_stale_intents(Utc::now() - intent_ttl).await {
                Ok(purged) if !purged.is_empty() => info!("🕰️ {} stale payment intent(s) failed", purged.len()),
                Ok(_) => {},
                Err(e) => error!("🕰️ Error purging stale payment intents: {e}"),
            }
            match db.evict_expired(Utc::now()).await {
                Ok(evicted) if evicted > 0 => debug!("🕰️ {evicted} lockout counter(s) evicted"),
                Ok(_) => {},
                Err(e) => error!("🕰️ Error evicting lockout counters: {e}"),
            }
        }
    })
}

fn claim_list(claims: &[FundingClaim]) -> String {
    claims
        .iter()
        .map(|c| format!("[{}] owner: {} amount: {}", c.id, c.owner_id, c.amount))
        .collect::<Vec<String>>()
        .join(", ")
}
