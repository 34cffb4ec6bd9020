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
    REFERENCE_TRANSFER,
};
use crate::costing::MovementInput;
use crate::db::DbPool;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::stock;

lazy_static! {
    static ref STOCK_TRANSFERS: IntCounter = IntCounter::new(
        "stock_transfers_total",
        "Total number of inter-location stock transfers"
    )
    .expect("metric can be created");
    static ref STOCK_TRANSFER_FAILURES: IntCounter = IntCounter::new(
        "stock_transfer_failures_total",
        "Total number of failed stock transfers"
    )
    .expect("metric can be created");
}

/// Moves stock between two locations: a deduction at the source and a
/// receipt at the destination priced at the source's pre-transfer avg
/// cost, inside one transaction spanning both rows. Relocation neither
/// creates nor destroys ledger value.
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct TransferStockCommand {
    pub product_id: Uuid,
    pub source_location_id: i32,
    pub dest_location_id: i32,
    pub quantity: Decimal,
    /// Transfer document id; generated when the caller has none.
    pub reference_id: Option<Uuid>,
    pub transferred_by: Option<Uuid>,
    #[serde(default)]
    pub policy: LedgerPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferStockResult {
    pub transfer_id: Uuid,
    pub product_id: Uuid,
    pub source_location_id: i32,
    pub dest_location_id: i32,
    pub quantity: Decimal,
    /// The source avg cost the destination receipt was priced at.
    pub unit_cost: Decimal,
    pub source_quantity: Decimal,
    pub source_avg_cost: Decimal,
    pub dest_quantity: Decimal,
    pub dest_avg_cost: Decimal,
    pub transferred_at: DateTime<Utc>,
}

#[async_trait::async_trait]
impl Command for TransferStockCommand {
    type Result = TransferStockResult;

    #[instrument(skip(self, db_pool, event_sender), fields(product_id = %self.product_id))]
    async fn execute(
        &self,
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
    ) -> Result<Self::Result, ServiceError> {
        self.validate_input().map_err(|e| {
            STOCK_TRANSFER_FAILURES.inc();
            error!("Invalid transfer: {}", e);
            e
        })?;

        let db = db_pool.as_ref();
        let transfer_id = self.reference_id.unwrap_or_else(Uuid::new_v4);

        let mut attempt = 0u32;
        let outcome = loop {
            let product_id = self.product_id;
            let source_location_id = self.source_location_id;
            let dest_location_id = self.dest_location_id;
            let quantity = self.quantity;
            let transferred_by = self.transferred_by;
            let cost_scale = self.policy.cost_scale;

            let result = db
                .transaction::<_, TransferStockResult, ServiceError>(move |txn| {
                    Box::pin(async move {
                        // Both rows lock in location order so two opposing
                        // transfers cannot deadlock each other.
                        let (first_loc, second_loc) = if source_location_id < dest_location_id {
                            (source_location_id, dest_location_id)
                        } else {
                            (dest_location_id, source_location_id)
                        };
                        let first =
                            stock::find_or_create_for_update(txn, product_id, first_loc).await?;
                        let second =
                            stock::find_or_create_for_update(txn, product_id, second_loc).await?;
                        let (source_record, dest_record) =
                            if first.location_id == source_location_id {
                                (first, second)
                            } else {
                                (second, first)
                            };

                        // Captured before the outgoing leg touches the row.
                        let source_cost_before = source_record.avg_cost;

                        let (source_after, _out_movement) = apply_and_record(
                            txn,
                            source_record,
                            &MovementInput::transfer_out(quantity),
                            cost_scale,
                            MovementMeta {
                                reference_id: Some(transfer_id),
                                reference_type: Some(REFERENCE_TRANSFER),
                                created_by: transferred_by,
                                ..Default::default()
                            },
                        )
                        .await?;

                        let (dest_after, _in_movement) = apply_and_record(
                            txn,
                            dest_record,
                            &MovementInput::transfer_in(quantity, source_cost_before),
                            cost_scale,
                            MovementMeta {
                                reference_id: Some(transfer_id),
                                reference_type: Some(REFERENCE_TRANSFER),
                                created_by: transferred_by,
                                ..Default::default()
                            },
                        )
                        .await?;

                        Ok(TransferStockResult {
                            transfer_id,
                            product_id,
                            source_location_id,
                            dest_location_id,
                            quantity,
                            unit_cost: source_cost_before,
                            source_quantity: source_after.quantity,
                            source_avg_cost: source_after.avg_cost,
                            dest_quantity: dest_after.quantity,
                            dest_avg_cost: dest_after.avg_cost,
                            transferred_at: Utc::now(),
                        })
                    })
                })
                .await
                .map_err(unwrap_transaction_error);

            match result {
                Err(e) if e.is_lock_contention() && attempt < self.policy.lock_retry_attempts => {
                    attempt += 1;
                    warn!(attempt, "Lock contention transferring stock; retrying");
                    sleep(Duration::from_millis(self.policy.lock_retry_backoff_ms)).await;
                }
                Err(e) => {
                    STOCK_TRANSFER_FAILURES.inc();
                    break Err(e);
                }
                Ok(result) => break Ok(result),
            }
        }?;

        if let Err(e) = event_sender
            .send(Event::StockTransferred {
                product_id: outcome.product_id,
                source_location_id: outcome.source_location_id,
                dest_location_id: outcome.dest_location_id,
                quantity: outcome.quantity,
                transfer_id: outcome.transfer_id,
            })
            .await
        {
            warn!(error = %e, "Failed to publish transfer event");
        }
        if outcome.source_quantity < Decimal::ZERO {
            if let Err(e) = event_sender
                .send(Event::NegativeStockDetected {
                    product_id: outcome.product_id,
                    location_id: outcome.source_location_id,
                    quantity: outcome.source_quantity,
                    detected_at: Utc::now(),
                })
                .await
            {
                warn!(error = %e, "Failed to publish negative-stock event");
            }
        }

        STOCK_TRANSFERS.inc();
        info!(
            transfer_id = %outcome.transfer_id,
            from = %outcome.source_location_id,
            to = %outcome.dest_location_id,
            quantity = %outcome.quantity,
            "Stock transferred"
        );

        Ok(outcome)
    }
}

impl TransferStockCommand {
    fn validate_input(&self) -> Result<(), ServiceError> {
        self.validate()?;
        if self.source_location_id == self.dest_location_id {
            return Err(ServiceError::ValidationError(
                "Cannot transfer stock to the same location".to_string(),
            ));
        }
        if self.quantity <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(format!(
                "Transfer quantity must be positive, got {}",
                self.quantity
            )));
        }
        Ok(())
    }
}
