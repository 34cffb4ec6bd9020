//! Stock record lookups, the transactional row-lock helpers every
//! mutation coordinator goes through, and ledger replay.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::costing::{self, MovementInput, StockState};
use crate::db::{supports_row_locks, DbPool};
use crate::entities::stock_movement::{self, Entity as StockMovementEntity, MovementType};
use crate::entities::stock_record::{self, Entity as StockRecordEntity};
use crate::errors::ServiceError;

/// Loads the stock record for `(product, location)` with an exclusive row
/// lock, serializing every concurrent mutation of the pair on this row.
/// Must run inside the caller's transaction.
pub(crate) async fn find_for_update<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    location_id: i32,
) -> Result<Option<stock_record::Model>, ServiceError> {
    let mut query = StockRecordEntity::find()
        .filter(stock_record::Column::ProductId.eq(product_id))
        .filter(stock_record::Column::LocationId.eq(location_id));
    if supports_row_locks(conn.get_database_backend()) {
        query = query.lock_exclusive();
    }
    query.one(conn).await.map_err(ServiceError::db_error)
}

/// Like [`find_for_update`], creating the record lazily on the first
/// movement that ever references the pair. A concurrent creation loses the
/// unique-index race and falls back to locking the winner's row.
pub(crate) async fn find_or_create_for_update<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    location_id: i32,
) -> Result<stock_record::Model, ServiceError> {
    if let Some(record) = find_for_update(conn, product_id, location_id).await? {
        return Ok(record);
    }

    let fresh = stock_record::ActiveModel {
        product_id: Set(product_id),
        location_id: Set(location_id),
        quantity: Set(Decimal::ZERO),
        avg_cost: Set(Decimal::ZERO),
        created_at: Set(Utc::now()),
        updated_at: Set(Utc::now()),
        ..Default::default()
    };

    match fresh.insert(conn).await {
        Ok(created) => {
            debug!(
                product_id = %product_id,
                location_id = %location_id,
                "Created stock record on first movement"
            );
            Ok(created)
        }
        Err(e) if e.to_string().to_lowercase().contains("unique") => {
            find_for_update(conn, product_id, location_id)
                .await?
                .ok_or_else(|| {
                    ServiceError::InternalError(format!(
                        "Stock record for product {} at location {} vanished after insert conflict",
                        product_id, location_id
                    ))
                })
        }
        Err(e) => Err(ServiceError::db_error(e)),
    }
}

/// Outcome of checking a stock record against its replayed ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reconciliation {
    pub product_id: Uuid,
    pub location_id: i32,
    pub stored: Option<StockState>,
    pub replayed: StockState,
    pub movement_count: usize,
    pub consistent: bool,
}

/// Read-side access to stock records and the movement ledger.
#[derive(Clone)]
pub struct StockService {
    db: Arc<DbPool>,
}

impl StockService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub async fn get_record(
        &self,
        product_id: Uuid,
        location_id: i32,
    ) -> Result<Option<stock_record::Model>, ServiceError> {
        StockRecordEntity::find()
            .filter(stock_record::Column::ProductId.eq(product_id))
            .filter(stock_record::Column::LocationId.eq(location_id))
            .one(self.db.as_ref())
            .await
            .map_err(ServiceError::db_error)
    }

    #[instrument(skip(self))]
    pub async fn list_for_location(
        &self,
        location_id: i32,
    ) -> Result<Vec<stock_record::Model>, ServiceError> {
        StockRecordEntity::find()
            .filter(stock_record::Column::LocationId.eq(location_id))
            .all(self.db.as_ref())
            .await
            .map_err(ServiceError::db_error)
    }

    /// The full ledger for one pair, in append order.
    #[instrument(skip(self))]
    pub async fn movements(
        &self,
        product_id: Uuid,
        location_id: i32,
    ) -> Result<Vec<stock_movement::Model>, ServiceError> {
        StockMovementEntity::find()
            .filter(stock_movement::Column::ProductId.eq(product_id))
            .filter(stock_movement::Column::LocationId.eq(location_id))
            .order_by_asc(stock_movement::Column::Id)
            .all(self.db.as_ref())
            .await
            .map_err(ServiceError::db_error)
    }

    /// Rebuilds the stock state by folding every ledger entry through the
    /// costing engine from the empty state. The ledger is the sole source
    /// of truth; this is what "reconstruct" means.
    #[instrument(skip(self))]
    pub async fn replay_ledger(
        &self,
        product_id: Uuid,
        location_id: i32,
        cost_scale: u32,
    ) -> Result<(StockState, usize), ServiceError> {
        let movements = self.movements(product_id, location_id).await?;
        let mut state = StockState::empty();
        for movement in &movements {
            let movement_type = movement.movement_type().ok_or_else(|| {
                ServiceError::InternalError(format!(
                    "Ledger entry {} has unknown movement type '{}'",
                    movement.id, movement.movement_type
                ))
            })?;
            let input = replay_input(movement_type, movement);
            let applied = costing::apply(&state, &input, cost_scale)?;
            state = StockState::new(applied.quantity, applied.avg_cost);
        }
        Ok((state, movements.len()))
    }

    /// Compares the stored record with its replayed ledger. Drift means a
    /// write bypassed the coordinators and needs operational correction.
    #[instrument(skip(self))]
    pub async fn reconcile(
        &self,
        product_id: Uuid,
        location_id: i32,
        cost_scale: u32,
    ) -> Result<Reconciliation, ServiceError> {
        let (replayed, movement_count) =
            self.replay_ledger(product_id, location_id, cost_scale).await?;
        let stored = self
            .get_record(product_id, location_id)
            .await?
            .map(|r| r.state());
        let consistent = match &stored {
            Some(state) => *state == replayed,
            // No record and an empty ledger agree with each other.
            None => movement_count == 0,
        };
        Ok(Reconciliation {
            product_id,
            location_id,
            stored,
            replayed,
            movement_count,
            consistent,
        })
    }
}

fn replay_input(movement_type: MovementType, movement: &stock_movement::Model) -> MovementInput {
    match movement_type {
        MovementType::Receipt | MovementType::TransferIn => MovementInput {
            movement_type,
            quantity_delta: movement.quantity_delta,
            unit_cost: Some(movement.unit_cost),
            cost_override: None,
        },
        MovementType::Deduction | MovementType::Waste | MovementType::TransferOut => {
            MovementInput {
                movement_type,
                quantity_delta: movement.quantity_delta,
                unit_cost: None,
                cost_override: None,
            }
        }
        // The recorded unit cost of an adjustment is either the override
        // that was applied or the avg cost it left untouched; replaying it
        // as an override reproduces both cases exactly.
        MovementType::Adjustment => MovementInput {
            movement_type,
            quantity_delta: movement.quantity_delta,
            unit_cost: None,
            cost_override: Some(movement.unit_cost),
        },
    }
}
