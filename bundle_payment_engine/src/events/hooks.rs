use std::{future::Future, pin::Pin, sync::Arc};

use crate::events::{
    ClaimSettledEvent,
    EventHandler,
    EventProducer,
    FulfillmentRequestedEvent,
    Handler,
    WalletCreditedEvent,
};

#[derive(Default, Clone)]
pub struct EventProducers {
    pub wallet_credited_producer: Vec<EventProducer<WalletCreditedEvent>>,
    pub claim_settled_producer: Vec<EventProducer<ClaimSettledEvent>>,
    pub fulfillment_requested_producer: Vec<EventProducer<FulfillmentRequestedEvent>>,
}

pub struct EventHandlers {
    pub on_wallet_credited: Option<EventHandler<WalletCreditedEvent>>,
    pub on_claim_settled: Option<EventHandler<ClaimSettledEvent>>,
    pub on_fulfillment_requested: Option<EventHandler<FulfillmentRequestedEvent>>,
}

impl EventHandlers {
    pub fn new(buffer_size: usize, hooks: EventHooks) -> Self {
        let on_wallet_credited = hooks.on_wallet_credited.map(|f| EventHandler::new(buffer_size, f));
        let on_claim_settled = hooks.on_claim_settled.map(|f| EventHandler::new(buffer_size, f));
        let on_fulfillment_requested = hooks.on_fulfillment_requested.map(|f| EventHandler::new(buffer_size, f));
        Self { on_wallet_credited, on_claim_settled, on_fulfillment_requested }
    }

    pub fn producers(&self) -> EventProducers {
        let mut result = EventProducers::default();
        if let Some(handler) = &self.on_wallet_credited {
            result.wallet_credited_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_claim_settled {
            result.claim_settled_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_fulfillment_requested {
            result.fulfillment_requested_producer.push(handler.subscribe());
        }
        result
    }

    pub async fn start_handlers(self) {
        if let Some(handler) = self.on_wallet_credited {
            tokio::spawn(async move {
                handler.start_handler().await;
            });
        }
        if let Some(handler) = self.on_claim_settled {
            tokio::spawn(async move {
                handler.start_handler().await;
            });
        }
        if let Some(handler) = self.on_fulfillment_requested {
            tokio::spawn(async move {
                handler.start_handler().await;
            });
        }
    }
}

#[derive(Default, Clone)]
pub struct EventHooks {
    pub on_wallet_credited: Option<Handler<WalletCreditedEvent>>,
    pub on_claim_settled: Option<Handler<ClaimSettledEvent>>,
    pub on_fulfillment_requested: Option<Handler<FulfillmentRequestedEvent>>,
}

impl EventHooks {
    pub fn on_wallet_credited<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(WalletCreditedEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_wallet_credited = Some(Arc::new(f));
        self
    }

    pub fn on_claim_settled<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(ClaimSettledEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_claim_settled = Some(Arc::new(f));
        self
    }

    pub fn on_fulfillment_requested<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(FulfillmentRequestedEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_fulfillment_requested = Some(Arc::new(f));
        self
    }
}
