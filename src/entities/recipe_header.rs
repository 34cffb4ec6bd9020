use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One menu item's bill of materials. Lines hold the per-unit ingredient
/// consumption; the header carries the name the fuzzy resolver matches
/// imported sale rows against.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "recipe_headers")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub recipe_id: i64,
    pub menu_product_id: Uuid,
    pub recipe_name: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const STATUS_ACTIVE: &str = "active";
pub const STATUS_RETIRED: &str = "retired";

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::product::Entity",
        from = "Column::MenuProductId",
        to = "super::product::Column::Id"
    )]
    MenuProduct,
    #[sea_orm(has_many = "super::recipe_line::Entity")]
    RecipeLines,
}

impl Related<super::product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MenuProduct.def()
    }
}

impl Related<super::recipe_line::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RecipeLines.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
