//! Recipe (BOM) resolution: maps a sold menu item to the ingredient
//! consumption lines the deduction coordinator applies.
//!
//! Two strategies behind one interface: exact menu-product-id lookup for
//! structured POS sales, and normalized-name lookup for spreadsheet/OCR
//! imports. Ambiguity always resolves to `Unmatched` — a missed deduction
//! is recoverable, a wrong-ingredient deduction is not.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::recipe_header::{self, Entity as RecipeHeaderEntity, STATUS_ACTIVE};
use crate::entities::recipe_line::{self, Entity as RecipeLineEntity};
use crate::errors::ServiceError;

/// A resolved recipe: header plus consumption lines in line order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipe {
    pub header: recipe_header::Model,
    pub lines: Vec<recipe_line::Model>,
}

/// Resolution outcome. `Unmatched` is a first-class expected result, not
/// an error: the caller records the line for manual BOM creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Resolution {
    Found(Recipe),
    Unmatched,
}

#[derive(Clone)]
pub struct RecipeResolver {
    db: Arc<DbPool>,
}

impl RecipeResolver {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Exact lookup by menu product id (structured POS sales).
    #[instrument(skip(self))]
    pub async fn resolve(&self, menu_product_id: Uuid) -> Result<Resolution, ServiceError> {
        let header = RecipeHeaderEntity::find()
            .filter(recipe_header::Column::MenuProductId.eq(menu_product_id))
            .filter(recipe_header::Column::Status.eq(STATUS_ACTIVE))
            .one(self.db.as_ref())
            .await
            .map_err(ServiceError::db_error)?;

        match header {
            Some(header) => Ok(Resolution::Found(self.load_lines(header).await?)),
            None => Ok(Resolution::Unmatched),
        }
    }

    /// Normalized-name lookup for imported sale rows. Matches on exact
    /// normalized equality first; failing that, accepts a single
    /// unambiguous containment candidate. Ties and no-matches come back
    /// `Unmatched`.
    #[instrument(skip(self))]
    pub async fn resolve_by_name(&self, raw_name: &str) -> Result<Resolution, ServiceError> {
        let needle = normalize_name(raw_name);
        if needle.is_empty() {
            return Ok(Resolution::Unmatched);
        }

        let headers = RecipeHeaderEntity::find()
            .filter(recipe_header::Column::Status.eq(STATUS_ACTIVE))
            .all(self.db.as_ref())
            .await
            .map_err(ServiceError::db_error)?;

        let mut exact = Vec::new();
        let mut partial = Vec::new();
        for header in headers {
            let candidate = normalize_name(&header.recipe_name);
            if candidate == needle {
                exact.push(header);
            } else if candidate.contains(&needle) || needle.contains(&candidate) {
                partial.push(header);
            }
        }

        let chosen = match (exact.len(), partial.len()) {
            (1, _) => exact.pop(),
            (0, 1) => partial.pop(),
            (exact_count, partial_count) => {
                debug!(
                    raw_name = %raw_name,
                    exact_count,
                    partial_count,
                    "Name resolution ambiguous or empty; returning unmatched"
                );
                None
            }
        };

        match chosen {
            Some(header) => Ok(Resolution::Found(self.load_lines(header).await?)),
            None => Ok(Resolution::Unmatched),
        }
    }

    async fn load_lines(&self, header: recipe_header::Model) -> Result<Recipe, ServiceError> {
        let lines = RecipeLineEntity::find()
            .filter(recipe_line::Column::RecipeId.eq(header.recipe_id))
            .order_by_asc(recipe_line::Column::LineNo)
            .all(self.db.as_ref())
            .await
            .map_err(ServiceError::db_error)?;
        Ok(Recipe { header, lines })
    }

    /// Creates an active recipe header. Used by the BOM management page and
    /// test fixtures; deduction never writes recipes.
    #[instrument(skip(self))]
    pub async fn create_recipe(
        &self,
        menu_product_id: Uuid,
        recipe_name: &str,
    ) -> Result<recipe_header::Model, ServiceError> {
        let header = recipe_header::ActiveModel {
            menu_product_id: Set(menu_product_id),
            recipe_name: Set(recipe_name.to_string()),
            status: Set(STATUS_ACTIVE.to_string()),
            created_at: Set(Utc::now()),
            updated_at: Set(Utc::now()),
            ..Default::default()
        };
        header
            .insert(self.db.as_ref())
            .await
            .map_err(ServiceError::db_error)
    }

    /// Appends a consumption line to a recipe.
    #[instrument(skip(self))]
    pub async fn add_line(
        &self,
        recipe_id: i64,
        ingredient_product_id: Uuid,
        location_id: i32,
        quantity_per_unit: Decimal,
        uom: Option<String>,
    ) -> Result<recipe_line::Model, ServiceError> {
        if quantity_per_unit <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "quantity_per_unit must be positive".to_string(),
            ));
        }

        let next_line_no = RecipeLineEntity::find()
            .filter(recipe_line::Column::RecipeId.eq(recipe_id))
            .all(self.db.as_ref())
            .await
            .map_err(ServiceError::db_error)?
            .len() as i32
            + 1;

        let line = recipe_line::ActiveModel {
            recipe_id: Set(recipe_id),
            ingredient_product_id: Set(ingredient_product_id),
            location_id: Set(location_id),
            quantity_per_unit: Set(quantity_per_unit),
            uom: Set(uom),
            line_no: Set(next_line_no),
            created_at: Set(Utc::now()),
            updated_at: Set(Utc::now()),
            ..Default::default()
        };
        line.insert(self.db.as_ref())
            .await
            .map_err(ServiceError::db_error)
    }
}

/// Lowercases, strips everything but letters/digits/spaces, and collapses
/// whitespace runs. "  Khao   Soi (L)" and "khao soi l" compare equal.
fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_was_space = true;
    for ch in name.chars() {
        if ch.is_alphanumeric() {
            out.extend(ch.to_lowercase());
            last_was_space = false;
        } else if !last_was_space {
            out.push(' ');
            last_was_space = true;
        }
    }
    while out.ends_with(' ') {
        out.pop();
    }
    out
}
