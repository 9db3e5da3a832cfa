//! Pub-sub plumbing for engine events.
//!
//! Components register an async handler per event type and receive events through a bounded channel. Handlers get
//! only the event itself, never a view into engine state, so they cannot interfere with the money paths they
//! observe. Delivery is strictly in order: the loop awaits each handler invocation before taking the next event,
//! so a fulfillment subscriber sees a batch's line items in the order they were debited, and a slow handler
//! back-pressures producers through the channel instead of racing itself.
use std::{future::Future, pin::Pin, sync::Arc};

use log::*;
use tokio::sync::mpsc;

pub type Handler<E> = Arc<dyn Fn(E) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// The delivery loop for one event type. Build it around the handler to run, hand out producers with
/// [`EventHandler::subscribe`], then drive it with [`EventHandler::start_handler`]. The loop ends on its own once
/// every producer has been dropped.
pub struct EventHandler<E> {
    inbox: mpsc::Receiver<E>,
    subscriptions: mpsc::Sender<E>,
    handler: Handler<E>,
}

impl<E: Send + 'static> EventHandler<E> {
    pub fn new(buffer_size: usize, handler: Handler<E>) -> Self {
        let (subscriptions, inbox) = mpsc::channel(buffer_size);
        Self { inbox, subscriptions, handler }
    }

    pub fn subscribe(&self) -> EventProducer<E> {
        EventProducer { sender: self.subscriptions.clone() }
    }

    /// Runs the delivery loop to completion and consumes the handler.
    pub async fn start_handler(mut self) {
        // Let go of the subscription end first, or the loop would keep itself alive forever.
        drop(self.subscriptions);
        debug!("📣️ Event delivery loop started");
        let mut delivered = 0u64;
        while let Some(event) = self.inbox.recv().await {
            (self.handler)(event).await;
            delivered += 1;
            trace!("📣️ Event {delivered} handled");
        }
        debug!("📣️ All producers dropped; delivery loop finished after {delivered} event(s)");
    }
}

#[derive(Clone)]
pub struct EventProducer<E> {
    sender: mpsc::Sender<E>,
}

impl<E> EventProducer<E> {
    pub async fn publish_event(&self, event: E) {
        if self.sender.send(event).await.is_err() {
            error!("📣️ Event dropped: the delivery loop has already shut down");
        }
    }
}
