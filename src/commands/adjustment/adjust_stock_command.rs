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
    REFERENCE_ADJUSTMENT,
};
use crate::costing::MovementInput;
use crate::db::DbPool;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::stock;

lazy_static! {
    static ref STOCK_ADJUSTMENTS: IntCounter = IntCounter::new(
        "stock_adjustments_total",
        "Total number of stock adjustments"
    )
    .expect("metric can be created");
    static ref STOCK_ADJUSTMENT_FAILURES: IntCounter = IntCounter::new(
        "stock_adjustment_failures_total",
        "Total number of failed stock adjustments"
    )
    .expect("metric can be created");
}

const VALID_REASONS: &[&str] = &[
    "CYCLE_COUNT",
    "QR_COUNT",
    "DAMAGED",
    "FOUND",
    "LOST",
    "EXPIRED",
    "CORRECTION",
];

/// Sets a stock record to a physically counted quantity. The command is
/// agnostic to the entry channel: the back-office count form and the
/// QR-token count page both land here with a different `reason_code`.
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct AdjustStockCommand {
    pub product_id: Uuid,
    pub location_id: i32,
    /// The counted quantity; the command derives the signed delta itself.
    pub actual_quantity: Decimal,
    #[validate(length(min = 1, max = 50))]
    pub reason_code: String,
    #[validate(length(max = 500))]
    pub note: Option<String>,
    /// Manual cost correction. Rarely used; quantity counts leave the
    /// average cost untouched.
    pub cost_override: Option<Decimal>,
    /// Adjustment document id, when the count came off a counting sheet.
    pub reference_id: Option<Uuid>,
    pub adjusted_by: Option<Uuid>,
    #[serde(default)]
    pub policy: LedgerPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdjustStockResult {
    pub movement_id: i64,
    pub product_id: Uuid,
    pub location_id: i32,
    pub previous_quantity: Decimal,
    pub delta: Decimal,
    pub new_quantity: Decimal,
    pub new_avg_cost: Decimal,
    pub adjusted_at: DateTime<Utc>,
}

#[async_trait::async_trait]
impl Command for AdjustStockCommand {
    type Result = AdjustStockResult;

    #[instrument(skip(self, db_pool, event_sender), fields(product_id = %self.product_id, location_id = %self.location_id))]
    async fn execute(
        &self,
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
    ) -> Result<Self::Result, ServiceError> {
        self.validate_input().map_err(|e| {
            STOCK_ADJUSTMENT_FAILURES.inc();
            error!("Invalid adjustment: {}", e);
            e
        })?;

        let db = db_pool.as_ref();

        let mut attempt = 0u32;
        let outcome = loop {
            let product_id = self.product_id;
            let location_id = self.location_id;
            let actual_quantity = self.actual_quantity;
            let cost_override = self.cost_override;
            let reference_id = self.reference_id;
            let reason_code = self.reason_code.clone();
            let note = self.note.clone();
            let adjusted_by = self.adjusted_by;
            let cost_scale = self.policy.cost_scale;

            let result = db
                .transaction::<_, AdjustStockResult, ServiceError>(move |txn| {
                    Box::pin(async move {
                        let record =
                            stock::find_or_create_for_update(txn, product_id, location_id).await?;
                        let previous_quantity = record.quantity;
                        let delta = actual_quantity - previous_quantity;
                        let input = MovementInput::adjustment(delta, cost_override);
                        let (updated, movement) = apply_and_record(
                            txn,
                            record,
                            &input,
                            cost_scale,
                            MovementMeta {
                                reference_id,
                                reference_type: Some(REFERENCE_ADJUSTMENT),
                                reason_code: Some(reason_code),
                                notes: note,
                                created_by: adjusted_by,
                            },
                        )
                        .await?;
                        Ok(AdjustStockResult {
                            movement_id: movement.id,
                            product_id: updated.product_id,
                            location_id: updated.location_id,
                            previous_quantity,
                            delta,
                            new_quantity: updated.quantity,
                            new_avg_cost: updated.avg_cost,
                            adjusted_at: Utc::now(),
                        })
                    })
                })
                .await
                .map_err(unwrap_transaction_error);

            match result {
                Err(e) if e.is_lock_contention() && attempt < self.policy.lock_retry_attempts => {
                    attempt += 1;
                    warn!(attempt, "Lock contention adjusting stock; retrying");
                    sleep(Duration::from_millis(self.policy.lock_retry_backoff_ms)).await;
                }
                Err(e) => {
                    STOCK_ADJUSTMENT_FAILURES.inc();
                    break Err(e);
                }
                Ok(result) => break Ok(result),
            }
        }?;

        if let Err(e) = event_sender
            .send(Event::StockAdjusted {
                product_id: outcome.product_id,
                location_id: outcome.location_id,
                previous_quantity: outcome.previous_quantity,
                new_quantity: outcome.new_quantity,
                reason_code: self.reason_code.clone(),
                reference_id: self.reference_id,
            })
            .await
        {
            warn!(error = %e, "Failed to publish adjustment event");
        }

        STOCK_ADJUSTMENTS.inc();
        info!(
            reason = %self.reason_code,
            previous = %outcome.previous_quantity,
            delta = %outcome.delta,
            new_quantity = %outcome.new_quantity,
            "Stock adjusted"
        );

        Ok(outcome)
    }
}

impl AdjustStockCommand {
    fn validate_input(&self) -> Result<(), ServiceError> {
        self.validate()?;
        if !VALID_REASONS.contains(&self.reason_code.as_str()) {
            return Err(ServiceError::ValidationError(format!(
                "Invalid reason code: {}. Valid codes are: {:?}",
                self.reason_code, VALID_REASONS
            )));
        }
        if self.actual_quantity < Decimal::ZERO {
            return Err(ServiceError::ValidationError(format!(
                "A physical count cannot be negative, got {}",
                self.actual_quantity
            )));
        }
        if let Some(cost_override) = self.cost_override {
            if cost_override < Decimal::ZERO {
                return Err(ServiceError::ValidationError(format!(
                    "Cost override must not be negative, got {}",
                    cost_override
                )));
            }
        }
        Ok(())
    }
}
