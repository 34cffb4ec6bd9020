use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use prometheus::IntCounter;
use rust_decimal::Decimal;
use sea_orm::TransactionTrait;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::commands::{
    apply_and_record, unwrap_transaction_error, Command, LedgerPolicy, MovementMeta,
    REFERENCE_PURCHASE_ORDER,
};
use crate::costing::MovementInput;
use crate::db::DbPool;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::stock;

lazy_static! {
    static ref PURCHASE_RECEIPTS: IntCounter = IntCounter::new(
        "purchase_receipts_total",
        "Total number of purchase documents received into stock"
    )
    .expect("metric can be created");
    static ref PURCHASE_RECEIPT_FAILURES: IntCounter = IntCounter::new(
        "purchase_receipt_failures_total",
        "Total number of rejected purchase documents"
    )
    .expect("metric can be created");
}

/// One line of a purchase document, already resolved to a concrete
/// product by the caller (OCR candidates never reach this command raw).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseLine {
    pub product_id: Uuid,
    pub location_id: i32,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
}

/// Receives a whole purchase document. All lines commit as one
/// transaction or the document is rejected; there is no partial receipt.
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct ReceivePurchaseCommand {
    /// The purchase document id every ledger entry references.
    pub reference_id: Uuid,
    #[validate(length(min = 1, message = "A purchase document needs at least one line"))]
    pub lines: Vec<PurchaseLine>,
    pub received_by: Option<Uuid>,
    #[serde(default)]
    pub policy: LedgerPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptLineOutcome {
    pub product_id: Uuid,
    pub location_id: i32,
    pub quantity_received: Decimal,
    pub unit_cost: Decimal,
    pub new_quantity: Decimal,
    pub new_avg_cost: Decimal,
    pub movement_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceivePurchaseResult {
    pub reference_id: Uuid,
    pub lines: Vec<ReceiptLineOutcome>,
    pub received_at: DateTime<Utc>,
}

#[async_trait::async_trait]
impl Command for ReceivePurchaseCommand {
    type Result = ReceivePurchaseResult;

    #[instrument(skip(self, db_pool, event_sender), fields(reference_id = %self.reference_id))]
    async fn execute(
        &self,
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
    ) -> Result<Self::Result, ServiceError> {
        self.validate_input().map_err(|e| {
            PURCHASE_RECEIPT_FAILURES.inc();
            error!("Invalid purchase document: {}", e);
            e
        })?;

        let db = db_pool.as_ref();

        // Fixed lock order across all multi-row mutations.
        let mut sorted_lines = self.lines.clone();
        sorted_lines.sort_by_key(|l| (l.location_id, l.product_id));

        let mut attempt = 0u32;
        let outcome = loop {
            let lines = sorted_lines.clone();
            let reference_id = self.reference_id;
            let received_by = self.received_by;
            let cost_scale = self.policy.cost_scale;

            let result = db
                .transaction::<_, Vec<ReceiptLineOutcome>, ServiceError>(move |txn| {
                    Box::pin(async move {
                        let mut outcomes = Vec::with_capacity(lines.len());
                        for line in lines {
                            let record = stock::find_or_create_for_update(
                                txn,
                                line.product_id,
                                line.location_id,
                            )
                            .await?;
                            let input = MovementInput::receipt(line.quantity, line.unit_cost);
                            let (updated, movement) = apply_and_record(
                                txn,
                                record,
                                &input,
                                cost_scale,
                                MovementMeta {
                                    reference_id: Some(reference_id),
                                    reference_type: Some(REFERENCE_PURCHASE_ORDER),
                                    created_by: received_by,
                                    ..Default::default()
                                },
                            )
                            .await?;
                            outcomes.push(ReceiptLineOutcome {
                                product_id: updated.product_id,
                                location_id: updated.location_id,
                                quantity_received: line.quantity,
                                unit_cost: line.unit_cost,
                                new_quantity: updated.quantity,
                                new_avg_cost: updated.avg_cost,
                                movement_id: movement.id,
                            });
                        }
                        Ok(outcomes)
                    })
                })
                .await
                .map_err(unwrap_transaction_error);

            match result {
                Err(e) if e.is_lock_contention() && attempt < self.policy.lock_retry_attempts => {
                    attempt += 1;
                    warn!(
                        attempt,
                        "Lock contention while receiving purchase document; retrying"
                    );
                    sleep(Duration::from_millis(self.policy.lock_retry_backoff_ms)).await;
                }
                Err(e) => {
                    PURCHASE_RECEIPT_FAILURES.inc();
                    break Err(e);
                }
                Ok(lines) => break Ok(lines),
            }
        }?;

        for line in &outcome {
            if let Err(e) = event_sender
                .send(Event::StockReceived {
                    product_id: line.product_id,
                    location_id: line.location_id,
                    quantity: line.quantity_received,
                    unit_cost: line.unit_cost,
                    new_quantity: line.new_quantity,
                    new_avg_cost: line.new_avg_cost,
                    reference_id: self.reference_id,
                })
                .await
            {
                // The ledger is already committed; delivery is best-effort.
                warn!(error = %e, "Failed to publish stock receipt event");
            }
        }

        PURCHASE_RECEIPTS.inc();
        info!(
            reference_id = %self.reference_id,
            line_count = outcome.len(),
            "Purchase document received"
        );

        Ok(ReceivePurchaseResult {
            reference_id: self.reference_id,
            lines: outcome,
            received_at: Utc::now(),
        })
    }
}

impl ReceivePurchaseCommand {
    /// Rejects bad input before any lock is taken.
    fn validate_input(&self) -> Result<(), ServiceError> {
        self.validate()?;
        for (idx, line) in self.lines.iter().enumerate() {
            if line.quantity <= Decimal::ZERO {
                return Err(ServiceError::ValidationError(format!(
                    "Line {}: received quantity must be positive, got {}",
                    idx + 1,
                    line.quantity
                )));
            }
            if line.unit_cost < Decimal::ZERO {
                return Err(ServiceError::ValidationError(format!(
                    "Line {}: unit cost must not be negative, got {}",
                    idx + 1,
                    line.unit_cost
                )));
            }
        }
        Ok(())
    }
}
