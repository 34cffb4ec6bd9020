use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ConnectionTrait, Set, TransactionError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::costing::{self, MovementInput};
use crate::db::DbPool;
use crate::entities::{stock_movement, stock_record};
use crate::errors::ServiceError;
use crate::events::EventSender;

pub mod adjustment;
pub mod deduction;
pub mod receiving;
pub mod transfer;

/// Command trait for implementing the Command Pattern
///
/// This trait allows for encapsulating all the logic needed to execute a
/// business operation into a single object that can be validated, executed,
/// and produce events.
#[async_trait]
pub trait Command: Send + Sync {
    /// The return type of the command when executed successfully
    type Result;

    /// Execute the command with the given dependencies
    ///
    /// # Arguments
    /// * `db_pool` - Database connection pool for persistence operations
    /// * `event_sender` - Channel to publish domain events
    ///
    /// # Returns
    /// * `Result<Self::Result, ServiceError>` - The result of command execution or an error
    async fn execute(
        &self,
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
    ) -> Result<Self::Result, ServiceError>;
}

/// Per-mutation settings every coordinator command carries: the currency's
/// minor-unit scale for WAC rounding and the bounded retry applied when a
/// transaction loses a lock race.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LedgerPolicy {
    pub cost_scale: u32,
    pub lock_retry_attempts: u32,
    pub lock_retry_backoff_ms: u64,
}

impl Default for LedgerPolicy {
    fn default() -> Self {
        Self {
            cost_scale: costing::DEFAULT_COST_SCALE,
            lock_retry_attempts: 3,
            lock_retry_backoff_ms: 25,
        }
    }
}

pub const REFERENCE_PURCHASE_ORDER: &str = "purchase_order";
pub const REFERENCE_SALE: &str = "sale";
pub const REFERENCE_ADJUSTMENT: &str = "adjustment";
pub const REFERENCE_WASTE: &str = "waste";
pub const REFERENCE_TRANSFER: &str = "transfer";

/// Audit fields stamped onto a ledger entry.
#[derive(Debug, Clone, Default)]
pub(crate) struct MovementMeta {
    pub reference_id: Option<Uuid>,
    pub reference_type: Option<&'static str>,
    pub reason_code: Option<String>,
    pub notes: Option<String>,
    pub created_by: Option<Uuid>,
}

/// Runs one movement through the costing engine, persists the new stock
/// state and appends the matching ledger entry — all on the caller's
/// transaction, so record and ledger commit or roll back together.
pub(crate) async fn apply_and_record<C: ConnectionTrait>(
    conn: &C,
    record: stock_record::Model,
    input: &MovementInput,
    cost_scale: u32,
    meta: MovementMeta,
) -> Result<(stock_record::Model, stock_movement::Model), ServiceError> {
    let applied = costing::apply(&record.state(), input, cost_scale)?;

    let mut active: stock_record::ActiveModel = record.into();
    active.quantity = Set(applied.quantity);
    active.avg_cost = Set(applied.avg_cost);
    active.updated_at = Set(Utc::now());
    let updated = active.update(conn).await.map_err(ServiceError::db_error)?;

    let movement = stock_movement::ActiveModel {
        product_id: Set(updated.product_id),
        location_id: Set(updated.location_id),
        movement_type: Set(input.movement_type.as_str().to_string()),
        quantity_delta: Set(input.quantity_delta),
        unit_cost: Set(applied.unit_cost_at_movement),
        resulting_quantity: Set(applied.quantity),
        resulting_avg_cost: Set(applied.avg_cost),
        reference_id: Set(meta.reference_id),
        reference_type: Set(meta.reference_type.map(str::to_string)),
        reason_code: Set(meta.reason_code),
        notes: Set(meta.notes),
        created_by: Set(meta.created_by),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(conn)
    .await
    .map_err(ServiceError::db_error)?;

    Ok((updated, movement))
}

pub(crate) fn unwrap_transaction_error(e: TransactionError<ServiceError>) -> ServiceError {
    match e {
        TransactionError::Connection(db_err) => ServiceError::db_error(db_err),
        TransactionError::Transaction(service_err) => service_err,
    }
}
