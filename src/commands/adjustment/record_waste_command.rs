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
    REFERENCE_WASTE,
};
use crate::costing::MovementInput;
use crate::db::DbPool;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::stock;

lazy_static! {
    static ref WASTE_RECORDS: IntCounter =
        IntCounter::new("waste_records_total", "Total number of waste records")
            .expect("metric can be created");
    static ref WASTE_RECORD_FAILURES: IntCounter = IntCounter::new(
        "waste_record_failures_total",
        "Total number of failed waste records"
    )
    .expect("metric can be created");
}

const VALID_REASONS: &[&str] = &["SPOILAGE", "BREAKAGE", "PREP_LOSS", "EXPIRED", "OTHER"];

/// Writes off spoiled or broken stock. Same cost rule as a deduction,
/// tagged separately so waste reporting can find it.
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct RecordWasteCommand {
    pub product_id: Uuid,
    pub location_id: i32,
    pub quantity: Decimal,
    #[validate(length(min = 1, max = 50))]
    pub reason_code: String,
    #[validate(length(max = 500))]
    pub note: Option<String>,
    pub reference_id: Option<Uuid>,
    pub recorded_by: Option<Uuid>,
    #[serde(default)]
    pub policy: LedgerPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordWasteResult {
    pub movement_id: i64,
    pub product_id: Uuid,
    pub location_id: i32,
    pub quantity_wasted: Decimal,
    pub unit_cost: Decimal,
    pub new_quantity: Decimal,
    pub recorded_at: DateTime<Utc>,
}

#[async_trait::async_trait]
impl Command for RecordWasteCommand {
    type Result = RecordWasteResult;

    #[instrument(skip(self, db_pool, event_sender), fields(product_id = %self.product_id, location_id = %self.location_id))]
    async fn execute(
        &self,
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
    ) -> Result<Self::Result, ServiceError> {
        self.validate_input().map_err(|e| {
            WASTE_RECORD_FAILURES.inc();
            error!("Invalid waste record: {}", e);
            e
        })?;

        let db = db_pool.as_ref();

        let mut attempt = 0u32;
        let outcome = loop {
            let product_id = self.product_id;
            let location_id = self.location_id;
            let quantity = self.quantity;
            let reference_id = self.reference_id;
            let reason_code = self.reason_code.clone();
            let note = self.note.clone();
            let recorded_by = self.recorded_by;
            let cost_scale = self.policy.cost_scale;

            let result = db
                .transaction::<_, RecordWasteResult, ServiceError>(move |txn| {
                    Box::pin(async move {
                        let record =
                            stock::find_or_create_for_update(txn, product_id, location_id).await?;
                        let input = MovementInput::waste(quantity);
                        let (updated, movement) = apply_and_record(
                            txn,
                            record,
                            &input,
                            cost_scale,
                            MovementMeta {
                                reference_id,
                                reference_type: Some(REFERENCE_WASTE),
                                reason_code: Some(reason_code),
                                notes: note,
                                created_by: recorded_by,
                            },
                        )
                        .await?;
                        Ok(RecordWasteResult {
                            movement_id: movement.id,
                            product_id: updated.product_id,
                            location_id: updated.location_id,
                            quantity_wasted: quantity,
                            unit_cost: movement.unit_cost,
                            new_quantity: updated.quantity,
                            recorded_at: Utc::now(),
                        })
                    })
                })
                .await
                .map_err(unwrap_transaction_error);

            match result {
                Err(e) if e.is_lock_contention() && attempt < self.policy.lock_retry_attempts => {
                    attempt += 1;
                    warn!(attempt, "Lock contention recording waste; retrying");
                    sleep(Duration::from_millis(self.policy.lock_retry_backoff_ms)).await;
                }
                Err(e) => {
                    WASTE_RECORD_FAILURES.inc();
                    break Err(e);
                }
                Ok(result) => break Ok(result),
            }
        }?;

        if let Err(e) = event_sender
            .send(Event::WasteRecorded {
                product_id: outcome.product_id,
                location_id: outcome.location_id,
                quantity: outcome.quantity_wasted,
                reason_code: self.reason_code.clone(),
            })
            .await
        {
            warn!(error = %e, "Failed to publish waste event");
        }
        if outcome.new_quantity < Decimal::ZERO {
            if let Err(e) = event_sender
                .send(Event::NegativeStockDetected {
                    product_id: outcome.product_id,
                    location_id: outcome.location_id,
                    quantity: outcome.new_quantity,
                    detected_at: Utc::now(),
                })
                .await
            {
                warn!(error = %e, "Failed to publish negative-stock event");
            }
        }

        WASTE_RECORDS.inc();
        info!(
            reason = %self.reason_code,
            quantity = %outcome.quantity_wasted,
            new_quantity = %outcome.new_quantity,
            "Waste recorded"
        );

        Ok(outcome)
    }
}

impl RecordWasteCommand {
    fn validate_input(&self) -> Result<(), ServiceError> {
        self.validate()?;
        if !VALID_REASONS.contains(&self.reason_code.as_str()) {
            return Err(ServiceError::ValidationError(format!(
                "Invalid reason code: {}. Valid codes are: {:?}",
                self.reason_code, VALID_REASONS
            )));
        }
        if self.quantity <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(format!(
                "Wasted quantity must be positive, got {}",
                self.quantity
            )));
        }
        Ok(())
    }
}
