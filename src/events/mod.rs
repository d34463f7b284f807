use metrics::counter;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Order and payment lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    OrderCreated {
        order_id: Uuid,
        order_number: String,
    },
    OrderUpdated {
        order_id: Uuid,
    },
    /// The local order now carries its Paymob order id
    RemoteOrderLinked {
        order_id: Uuid,
        paymob_order_id: String,
    },
    CheckoutInitiated {
        order_id: Uuid,
        paymob_order_id: String,
    },
    PaymentSettled {
        order_id: Uuid,
        paymob_order_id: String,
        transaction_id: String,
    },
    PaymentNotSettled {
        paymob_order_id: Option<String>,
        transaction_id: String,
        provider_status: Option<String>,
    },
}

impl Event {
    fn name(&self) -> &'static str {
        match self {
            Event::OrderCreated { .. } => "order_created",
            Event::OrderUpdated { .. } => "order_updated",
            Event::RemoteOrderLinked { .. } => "remote_order_linked",
            Event::CheckoutInitiated { .. } => "checkout_initiated",
            Event::PaymentSettled { .. } => "payment_settled",
            Event::PaymentNotSettled { .. } => "payment_not_settled",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Best-effort publish: a closed channel is logged and otherwise ignored.
    pub async fn publish(&self, event: Event) {
        let name = event.name();
        if let Err(e) = self.send(event).await {
            warn!(event = name, error = %e, "Dropping event");
        }
    }
}

/// Drains the event channel into the structured log until every sender is gone.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        counter!("storefront.events", 1, "event" => event.name());
        match serde_json::to_string(&event) {
            Ok(payload) => info!(event = event.name(), %payload, "Event processed"),
            Err(_) => info!(event = event.name(), ?event, "Event processed"),
        }
    }

    info!("Event channel closed; stopping event processing loop");
}
