use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
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
    REFERENCE_SALE,
};
use crate::costing::MovementInput;
use crate::db::DbPool;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::recipes::{RecipeResolver, Resolution};
use crate::services::stock;

lazy_static! {
    static ref SALE_DEDUCTIONS: IntCounter = IntCounter::new(
        "sale_deductions_total",
        "Total number of sale lines deducted from stock"
    )
    .expect("metric can be created");
    static ref SALE_DEDUCTION_UNMATCHED: IntCounter = IntCounter::new(
        "sale_deduction_unmatched_total",
        "Total number of sale lines with no recipe"
    )
    .expect("metric can be created");
    static ref SALE_DEDUCTION_FAILURES: IntCounter = IntCounter::new(
        "sale_deduction_failures_total",
        "Total number of sale lines whose deduction rolled back"
    )
    .expect("metric can be created");
    static ref NEGATIVE_STOCK_FLAGS: IntCounter = IntCounter::new(
        "negative_stock_flags_total",
        "Total number of deductions that drove a stock record negative"
    )
    .expect("metric can be created");
}

/// What the till sold: a concrete menu product (POS order closing) or a
/// raw name from a spreadsheet/OCR import.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SoldItem {
    Product(Uuid),
    Name(String),
}

impl fmt::Display for SoldItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SoldItem::Product(id) => write!(f, "product {}", id),
            SoldItem::Name(name) => write!(f, "\"{}\"", name),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaleLine {
    pub sold: SoldItem,
    pub quantity_sold: Decimal,
}

/// Deducts recipe ingredients for a closed sale. Stock problems never
/// block the sale: unmatched recipes, negative stock and rolled-back
/// lines all come back as warnings in the result, not as errors.
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct DeductSaleCommand {
    /// The sale/order id, when the caller has one.
    pub reference_id: Option<Uuid>,
    #[validate(length(min = 1, message = "A sale needs at least one line"))]
    pub lines: Vec<SaleLine>,
    pub deducted_by: Option<Uuid>,
    #[serde(default)]
    pub policy: LedgerPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngredientDeduction {
    pub product_id: Uuid,
    pub location_id: i32,
    pub quantity_deducted: Decimal,
    pub resulting_quantity: Decimal,
    pub resulting_negative: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SaleLineOutcome {
    /// Every ingredient of the recipe was deducted.
    Deducted {
        sold: SoldItem,
        quantity_sold: Decimal,
        ingredients: Vec<IngredientDeduction>,
    },
    /// No recipe; nothing deducted. Surfaced for manual BOM creation.
    Unmatched {
        sold: SoldItem,
        quantity_sold: Decimal,
    },
    /// Deduction rolled back; logged and surfaced, never propagated.
    Failed {
        sold: SoldItem,
        quantity_sold: Decimal,
        reason: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeductSaleResult {
    pub reference_id: Option<Uuid>,
    pub lines: Vec<SaleLineOutcome>,
}

impl DeductSaleResult {
    /// True when any line needs operator attention.
    pub fn has_warnings(&self) -> bool {
        self.lines.iter().any(|line| match line {
            SaleLineOutcome::Deducted { ingredients, .. } => {
                ingredients.iter().any(|i| i.resulting_negative)
            }
            SaleLineOutcome::Unmatched { .. } | SaleLineOutcome::Failed { .. } => true,
        })
    }
}

#[async_trait::async_trait]
impl Command for DeductSaleCommand {
    type Result = DeductSaleResult;

    #[instrument(skip(self, db_pool, event_sender))]
    async fn execute(
        &self,
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
    ) -> Result<Self::Result, ServiceError> {
        self.validate_input()?;

        let resolver = RecipeResolver::new(db_pool.clone());
        let mut outcomes = Vec::with_capacity(self.lines.len());

        for line in &self.lines {
            let outcome = self
                .deduct_sale_line(db_pool.as_ref(), &resolver, line, &event_sender)
                .await;
            outcomes.push(outcome);
        }

        Ok(DeductSaleResult {
            reference_id: self.reference_id,
            lines: outcomes,
        })
    }
}

impl DeductSaleCommand {
    fn validate_input(&self) -> Result<(), ServiceError> {
        self.validate()?;
        for (idx, line) in self.lines.iter().enumerate() {
            if line.quantity_sold <= Decimal::ZERO {
                return Err(ServiceError::ValidationError(format!(
                    "Line {}: quantity sold must be positive, got {}",
                    idx + 1,
                    line.quantity_sold
                )));
            }
            if let SoldItem::Name(name) = &line.sold {
                if name.trim().is_empty() {
                    return Err(ServiceError::ValidationError(format!(
                        "Line {}: sold item name is empty",
                        idx + 1
                    )));
                }
            }
        }
        Ok(())
    }

    /// One sale line, start to finish. Nothing here returns `Err`: every
    /// failure mode collapses into a warning outcome.
    async fn deduct_sale_line(
        &self,
        db: &DbPool,
        resolver: &RecipeResolver,
        line: &SaleLine,
        event_sender: &EventSender,
    ) -> SaleLineOutcome {
        let resolution = match &line.sold {
            SoldItem::Product(menu_product_id) => resolver.resolve(*menu_product_id).await,
            SoldItem::Name(raw_name) => resolver.resolve_by_name(raw_name).await,
        };

        let recipe = match resolution {
            Ok(Resolution::Found(recipe)) => recipe,
            Ok(Resolution::Unmatched) => {
                SALE_DEDUCTION_UNMATCHED.inc();
                if let Err(e) = event_sender
                    .send(Event::SaleLineUnmatched {
                        reference_id: self.reference_id,
                        sold: line.sold.to_string(),
                        quantity_sold: line.quantity_sold,
                    })
                    .await
                {
                    warn!(error = %e, "Failed to publish unmatched-sale event");
                }
                return SaleLineOutcome::Unmatched {
                    sold: line.sold.clone(),
                    quantity_sold: line.quantity_sold,
                };
            }
            Err(e) => {
                SALE_DEDUCTION_FAILURES.inc();
                error!(sold = %line.sold, error = %e, "Recipe resolution failed");
                return SaleLineOutcome::Failed {
                    sold: line.sold.clone(),
                    quantity_sold: line.quantity_sold,
                    reason: e.to_string(),
                };
            }
        };

        // Fixed lock order across all multi-row mutations.
        let mut bom_lines = recipe.lines.clone();
        bom_lines.sort_by_key(|l| (l.location_id, l.ingredient_product_id));

        let mut attempt = 0u32;
        let result = loop {
            let bom_lines = bom_lines.clone();
            let quantity_sold = line.quantity_sold;
            let reference_id = self.reference_id;
            let deducted_by = self.deducted_by;
            let cost_scale = self.policy.cost_scale;

            let result = db
                .transaction::<_, Vec<IngredientDeduction>, ServiceError>(move |txn| {
                    Box::pin(async move {
                        let mut deductions = Vec::with_capacity(bom_lines.len());
                        for bom_line in bom_lines {
                            let required = bom_line.quantity_per_unit * quantity_sold;
                            let record = stock::find_or_create_for_update(
                                txn,
                                bom_line.ingredient_product_id,
                                bom_line.location_id,
                            )
                            .await?;
                            let input = MovementInput::deduction(required);
                            let (updated, _movement) = apply_and_record(
                                txn,
                                record,
                                &input,
                                cost_scale,
                                MovementMeta {
                                    reference_id,
                                    reference_type: Some(REFERENCE_SALE),
                                    created_by: deducted_by,
                                    ..Default::default()
                                },
                            )
                            .await?;
                            deductions.push(IngredientDeduction {
                                product_id: updated.product_id,
                                location_id: updated.location_id,
                                quantity_deducted: required,
                                resulting_quantity: updated.quantity,
                                resulting_negative: updated.quantity < Decimal::ZERO,
                            });
                        }
                        Ok(deductions)
                    })
                })
                .await
                .map_err(unwrap_transaction_error);

            match result {
                Err(e) if e.is_lock_contention() && attempt < self.policy.lock_retry_attempts => {
                    attempt += 1;
                    warn!(attempt, sold = %line.sold, "Lock contention deducting sale line; retrying");
                    sleep(Duration::from_millis(self.policy.lock_retry_backoff_ms)).await;
                }
                other => break other,
            }
        };

        match result {
            Ok(ingredients) => {
                for ingredient in &ingredients {
                    if let Err(e) = event_sender
                        .send(Event::StockDeducted {
                            product_id: ingredient.product_id,
                            location_id: ingredient.location_id,
                            quantity: ingredient.quantity_deducted,
                            new_quantity: ingredient.resulting_quantity,
                            reference_id: self.reference_id,
                        })
                        .await
                    {
                        warn!(error = %e, "Failed to publish deduction event");
                    }
                    if ingredient.resulting_negative {
                        NEGATIVE_STOCK_FLAGS.inc();
                        if let Err(e) = event_sender
                            .send(Event::NegativeStockDetected {
                                product_id: ingredient.product_id,
                                location_id: ingredient.location_id,
                                quantity: ingredient.resulting_quantity,
                                detected_at: Utc::now(),
                            })
                            .await
                        {
                            warn!(error = %e, "Failed to publish negative-stock event");
                        }
                    }
                }
                SALE_DEDUCTIONS.inc();
                info!(
                    sold = %line.sold,
                    quantity_sold = %line.quantity_sold,
                    ingredient_count = ingredients.len(),
                    "Sale line deducted"
                );
                SaleLineOutcome::Deducted {
                    sold: line.sold.clone(),
                    quantity_sold: line.quantity_sold,
                    ingredients,
                }
            }
            Err(e) => {
                SALE_DEDUCTION_FAILURES.inc();
                // The sale already happened; bookkeeping catches up later.
                error!(sold = %line.sold, error = %e, "Sale-line deduction rolled back");
                SaleLineOutcome::Failed {
                    sold: line.sold.clone(),
                    quantity_sold: line.quantity_sold,
                    reason: e.to_string(),
                }
            }
        }
    }
}
