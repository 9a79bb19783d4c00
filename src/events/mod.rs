use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::entities::OrderStatus;

/// Order lifecycle events published after the fact. Consumers are informational;
/// nothing in the request path waits on them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    OrderCreated {
        order_id: Uuid,
        payment_reference: String,
        total_amount: Decimal,
        items_created: usize,
    },
    OrderStatusChanged {
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    },
    OrderDispatched {
        order_id: Uuid,
        dispatched_at: DateTime<Utc>,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::OrderCreated { .. } => "order_created",
            Event::OrderStatusChanged { .. } => "order_status_changed",
            Event::OrderDispatched { .. } => "order_dispatched",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Creates a sender/receiver pair with the given buffer.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self::new(tx), rx)
    }

    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Publishes without letting a closed or full channel reach the caller.
    pub async fn publish(&self, event: Event) {
        let name = event.name();
        if let Err(e) = self.send(event).await {
            warn!(event = name, error = %e, "dropping order event");
        }
    }
}

/// Drains the channel until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        counter!("storefront_events.processed", 1, "event" => event.name());
        match &event {
            Event::OrderCreated {
                order_id,
                payment_reference,
                total_amount,
                items_created,
            } => info!(
                %order_id,
                %payment_reference,
                %total_amount,
                items_created,
                "order created"
            ),
            Event::OrderStatusChanged { order_id, from, to } => {
                info!(%order_id, %from, %to, "order status changed")
            }
            Event::OrderDispatched {
                order_id,
                dispatched_at,
            } => info!(%order_id, %dispatched_at, "order dispatched"),
        }
    }

    info!("Event processing loop stopped");
}
