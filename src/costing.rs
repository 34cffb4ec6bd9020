//! Weighted-average costing engine.
//!
//! Pure functions only: every mutation coordinator computes its new stock
//! state by calling [`apply`] and persists whatever comes back. The WAC
//! formula lives here and nowhere else.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::entities::stock_movement::MovementType;

/// Minor-unit digits for a zero-decimal currency (LAK, VND and friends).
pub const DEFAULT_COST_SCALE: u32 = 0;

/// Current `(quantity, avg_cost)` of one stock record, detached from any row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockState {
    pub quantity: Decimal,
    pub avg_cost: Decimal,
}

impl StockState {
    pub fn new(quantity: Decimal, avg_cost: Decimal) -> Self {
        Self { quantity, avg_cost }
    }

    /// The state of a record that has never seen a movement.
    pub fn empty() -> Self {
        Self {
            quantity: Decimal::ZERO,
            avg_cost: Decimal::ZERO,
        }
    }
}

/// One incoming movement, before it is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementInput {
    pub movement_type: MovementType,
    /// Signed quantity change. Positive for receipts, negative for
    /// deductions; adjustments carry the `actual - current` delta.
    pub quantity_delta: Decimal,
    /// Purchase or transfer-in unit cost. Required for cost-bearing
    /// movements, absent otherwise.
    pub unit_cost: Option<Decimal>,
    /// Manual cost correction on an adjustment.
    pub cost_override: Option<Decimal>,
}

impl MovementInput {
    pub fn receipt(quantity: Decimal, unit_cost: Decimal) -> Self {
        Self {
            movement_type: MovementType::Receipt,
            quantity_delta: quantity,
            unit_cost: Some(unit_cost),
            cost_override: None,
        }
    }

    pub fn deduction(quantity: Decimal) -> Self {
        Self {
            movement_type: MovementType::Deduction,
            quantity_delta: -quantity,
            unit_cost: None,
            cost_override: None,
        }
    }

    pub fn waste(quantity: Decimal) -> Self {
        Self {
            movement_type: MovementType::Waste,
            quantity_delta: -quantity,
            unit_cost: None,
            cost_override: None,
        }
    }

    pub fn adjustment(delta: Decimal, cost_override: Option<Decimal>) -> Self {
        Self {
            movement_type: MovementType::Adjustment,
            quantity_delta: delta,
            unit_cost: None,
            cost_override,
        }
    }

    pub fn transfer_out(quantity: Decimal) -> Self {
        Self {
            movement_type: MovementType::TransferOut,
            quantity_delta: -quantity,
            unit_cost: None,
            cost_override: None,
        }
    }

    /// `unit_cost` must be the source record's avg cost captured before the
    /// matching transfer-out was applied.
    pub fn transfer_in(quantity: Decimal, unit_cost: Decimal) -> Self {
        Self {
            movement_type: MovementType::TransferIn,
            quantity_delta: quantity,
            unit_cost: Some(unit_cost),
            cost_override: None,
        }
    }
}

/// The post-state produced by applying one movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedMovement {
    pub quantity: Decimal,
    pub avg_cost: Decimal,
    /// Cost used or produced by this movement: the receipt unit cost, the
    /// avg cost consumed by a deduction, or the override on an adjustment.
    pub unit_cost_at_movement: Decimal,
}

#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum CostingError {
    #[error("{0:?} requires a positive quantity delta")]
    NonPositiveQuantity(MovementType),

    #[error("{0:?} requires a negative quantity delta")]
    NonNegativeQuantity(MovementType),

    #[error("{0:?} requires a unit cost")]
    MissingUnitCost(MovementType),

    #[error("unit cost must not be negative, got {0}")]
    NegativeUnitCost(Decimal),
}

fn round_cost(value: Decimal, cost_scale: u32) -> Decimal {
    value.round_dp_with_strategy(cost_scale, RoundingStrategy::MidpointNearestEven)
}

/// Applies `movement` to `current` and returns the new state.
///
/// Deductions are allowed to drive the quantity negative; flagging that is
/// the coordinator's job. `cost_scale` is the currency's minor-unit digit
/// count and bounds every avg-cost result.
pub fn apply(
    current: &StockState,
    movement: &MovementInput,
    cost_scale: u32,
) -> Result<AppliedMovement, CostingError> {
    match movement.movement_type {
        MovementType::Receipt | MovementType::TransferIn => {
            let unit_cost = movement
                .unit_cost
                .ok_or(CostingError::MissingUnitCost(movement.movement_type))?;
            if unit_cost < Decimal::ZERO {
                return Err(CostingError::NegativeUnitCost(unit_cost));
            }
            if movement.quantity_delta <= Decimal::ZERO {
                return Err(CostingError::NonPositiveQuantity(movement.movement_type));
            }
            Ok(apply_receipt(current, movement.quantity_delta, unit_cost, cost_scale))
        }
        MovementType::Deduction | MovementType::Waste | MovementType::TransferOut => {
            if movement.quantity_delta >= Decimal::ZERO {
                return Err(CostingError::NonNegativeQuantity(movement.movement_type));
            }
            Ok(AppliedMovement {
                quantity: current.quantity + movement.quantity_delta,
                avg_cost: current.avg_cost,
                unit_cost_at_movement: current.avg_cost,
            })
        }
        MovementType::Adjustment => {
            if let Some(cost_override) = movement.cost_override {
                if cost_override < Decimal::ZERO {
                    return Err(CostingError::NegativeUnitCost(cost_override));
                }
            }
            let avg_cost = match movement.cost_override {
                Some(cost_override) => round_cost(cost_override, cost_scale),
                None => current.avg_cost,
            };
            Ok(AppliedMovement {
                quantity: current.quantity + movement.quantity_delta,
                avg_cost,
                unit_cost_at_movement: avg_cost,
            })
        }
    }
}

/// WAC blend. When the current quantity is negative the negative portion
/// counts as a zero-cost baseline: it contributes nothing to the blended
/// value but still absorbs part of the incoming units.
fn apply_receipt(
    current: &StockState,
    delta: Decimal,
    unit_cost: Decimal,
    cost_scale: u32,
) -> AppliedMovement {
    let new_quantity = current.quantity + delta;
    let avg_cost = if new_quantity > Decimal::ZERO {
        let costed_quantity = current.quantity.max(Decimal::ZERO);
        round_cost(
            (costed_quantity * current.avg_cost + delta * unit_cost) / new_quantity,
            cost_scale,
        )
    } else {
        round_cost(unit_cost, cost_scale)
    };
    AppliedMovement {
        quantity: new_quantity,
        avg_cost,
        unit_cost_at_movement: unit_cost,
    }
}
