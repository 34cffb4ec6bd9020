//! Read-only valuation and warning-state reporting. Snapshot reads, no
//! locks: dashboards must never block the coordinators.

use std::collections::BTreeMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::product::{self, Entity as ProductEntity};
use crate::entities::stock_location::{self, Entity as StockLocationEntity};
use crate::entities::stock_record::{self, Entity as StockRecordEntity};
use crate::errors::ServiceError;

/// `Σ quantity × avg_cost` over one location's stock records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationValuation {
    pub location_id: i32,
    pub location_code: String,
    pub total_value: Decimal,
    pub record_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LowStockItem {
    pub product_id: Uuid,
    pub sku: String,
    pub name: String,
    pub location_id: i32,
    pub quantity: Decimal,
    pub min_quantity: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegativeStockItem {
    pub product_id: Uuid,
    pub location_id: i32,
    pub quantity: Decimal,
    pub avg_cost: Decimal,
}

#[derive(Clone)]
pub struct ValuationService {
    db: Arc<DbPool>,
}

impl ValuationService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Per-location stock value, one row per known location (locations
    /// with no stock report zero).
    #[instrument(skip(self))]
    pub async fn location_valuations(&self) -> Result<Vec<LocationValuation>, ServiceError> {
        let locations = StockLocationEntity::find()
            .order_by_asc(stock_location::Column::Id)
            .all(self.db.as_ref())
            .await
            .map_err(ServiceError::db_error)?;

        let records = StockRecordEntity::find()
            .all(self.db.as_ref())
            .await
            .map_err(ServiceError::db_error)?;

        let mut totals: BTreeMap<i32, (Decimal, usize)> = BTreeMap::new();
        for record in &records {
            let entry = totals.entry(record.location_id).or_default();
            entry.0 += record.value();
            entry.1 += 1;
        }

        Ok(locations
            .into_iter()
            .map(|loc| {
                let (total_value, record_count) =
                    totals.get(&loc.id).copied().unwrap_or((Decimal::ZERO, 0));
                LocationValuation {
                    location_id: loc.id,
                    location_code: loc.code,
                    total_value,
                    record_count,
                }
            })
            .collect())
    }

    /// Total stock value across all locations.
    #[instrument(skip(self))]
    pub async fn total_valuation(&self) -> Result<Decimal, ServiceError> {
        let records = StockRecordEntity::find()
            .all(self.db.as_ref())
            .await
            .map_err(ServiceError::db_error)?;
        Ok(records.iter().map(|r| r.value()).sum())
    }

    /// Records at or below their product's minimum quantity. Products with
    /// no configured minimum (or zero) never report.
    #[instrument(skip(self))]
    pub async fn low_stock(&self) -> Result<Vec<LowStockItem>, ServiceError> {
        let products = ProductEntity::find()
            .filter(product::Column::MinQuantity.gt(Decimal::ZERO))
            .all(self.db.as_ref())
            .await
            .map_err(ServiceError::db_error)?;

        let mut items = Vec::new();
        for prod in products {
            let min_quantity = match prod.min_quantity {
                Some(min) if min > Decimal::ZERO => min,
                _ => continue,
            };
            let records = StockRecordEntity::find()
                .filter(stock_record::Column::ProductId.eq(prod.id))
                .filter(stock_record::Column::Quantity.lte(min_quantity))
                .all(self.db.as_ref())
                .await
                .map_err(ServiceError::db_error)?;
            for record in records {
                items.push(LowStockItem {
                    product_id: prod.id,
                    sku: prod.sku.clone(),
                    name: prod.name.clone(),
                    location_id: record.location_id,
                    quantity: record.quantity,
                    min_quantity,
                });
            }
        }
        Ok(items)
    }

    /// Every record currently below zero — the warning list operations
    /// works through to find missed receipts.
    #[instrument(skip(self))]
    pub async fn negative_stock(&self) -> Result<Vec<NegativeStockItem>, ServiceError> {
        let records = StockRecordEntity::find()
            .filter(stock_record::Column::Quantity.lt(Decimal::ZERO))
            .order_by_asc(stock_record::Column::LocationId)
            .all(self.db.as_ref())
            .await
            .map_err(ServiceError::db_error)?;

        Ok(records
            .into_iter()
            .map(|r| NegativeStockItem {
                product_id: r.product_id,
                location_id: r.location_id,
                quantity: r.quantity,
                avg_cost: r.avg_cost,
            })
            .collect())
    }
}
