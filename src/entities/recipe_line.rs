use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One ingredient consumption line: selling a unit of the menu item takes
/// `quantity_per_unit` of the ingredient out of `location_id`.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "recipe_lines")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub recipe_line_id: i64,
    pub recipe_id: i64,
    pub ingredient_product_id: Uuid,
    pub location_id: i32,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub quantity_per_unit: Decimal,
    pub uom: Option<String>,
    pub line_no: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::recipe_header::Entity",
        from = "Column::RecipeId",
        to = "super::recipe_header::Column::RecipeId"
    )]
    RecipeHeader,
    #[sea_orm(
        belongs_to = "super::product::Entity",
        from = "Column::IngredientProductId",
        to = "super::product::Column::Id"
    )]
    IngredientProduct,
}

impl Related<super::recipe_header::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RecipeHeader.def()
    }
}

impl Related<super::product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::IngredientProduct.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
