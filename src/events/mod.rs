use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Domain events published by the mutation coordinators after commit.
/// Dashboards and the kitchen display subscribe through the processor;
/// the ledger itself never depends on event delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    StockReceived {
        product_id: Uuid,
        location_id: i32,
        quantity: Decimal,
        unit_cost: Decimal,
        new_quantity: Decimal,
        new_avg_cost: Decimal,
        reference_id: Uuid,
    },
    StockDeducted {
        product_id: Uuid,
        location_id: i32,
        quantity: Decimal,
        new_quantity: Decimal,
        reference_id: Option<Uuid>,
    },
    StockAdjusted {
        product_id: Uuid,
        location_id: i32,
        previous_quantity: Decimal,
        new_quantity: Decimal,
        reason_code: String,
        reference_id: Option<Uuid>,
    },
    StockTransferred {
        product_id: Uuid,
        source_location_id: i32,
        dest_location_id: i32,
        quantity: Decimal,
        transfer_id: Uuid,
    },
    WasteRecorded {
        product_id: Uuid,
        location_id: i32,
        quantity: Decimal,
        reason_code: String,
    },
    /// A stock record's quantity is below zero after a mutation. Warning
    /// state: visible in reporting, never a blocker.
    NegativeStockDetected {
        product_id: Uuid,
        location_id: i32,
        quantity: Decimal,
        detected_at: DateTime<Utc>,
    },
    /// A sale line had no recipe; nothing was deducted for it.
    SaleLineUnmatched {
        reference_id: Option<Uuid>,
        sold: String,
        quantity_sold: Decimal,
    },
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
}

/// Builds a connected sender/receiver pair with a bounded buffer.
pub fn channel(buffer: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(buffer);
    (EventSender::new(tx), rx)
}

/// Drains the event channel, logging each event. The surrounding
/// application replaces this with its own fan-out when it needs more than
/// logs (dashboard polling reads the ledger anyway).
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    while let Some(event) = rx.recv().await {
        match &event {
            Event::NegativeStockDetected {
                product_id,
                location_id,
                quantity,
                ..
            } => {
                warn!(
                    product_id = %product_id,
                    location_id = %location_id,
                    quantity = %quantity,
                    "Negative stock detected"
                );
            }
            Event::SaleLineUnmatched {
                sold,
                quantity_sold,
                ..
            } => {
                warn!(
                    sold = %sold,
                    quantity_sold = %quantity_sold,
                    "Sale line had no recipe; stock not deducted"
                );
            }
            other => {
                info!(event = ?other, "Stock event");
            }
        }
    }
    info!("Event channel closed; processor exiting");
}
