use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// What a product is to the kitchen: something sold off the menu, a raw
/// ingredient consumed by recipes, or packaging material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductKind {
    Sellable,
    RawMaterial,
    Packaging,
}

impl ProductKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductKind::Sellable => "sellable",
            ProductKind::RawMaterial => "raw_material",
            ProductKind::Packaging => "packaging",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "sellable" => Some(ProductKind::Sellable),
            "raw_material" => Some(ProductKind::RawMaterial),
            "packaging" => Some(ProductKind::Packaging),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "products")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub sku: String,
    pub name: String,
    /// Stored as string, converted through [`ProductKind`].
    pub product_kind: String,
    /// Base unit of measure ("kg", "l", "ea").
    pub uom: String,
    /// Optional alternate unit, e.g. purchase cases vs. kitchen portions.
    pub alt_uom: Option<String>,
    /// How many base units one alternate unit holds.
    #[sea_orm(column_type = "Decimal(Some((19, 6)))")]
    pub uom_conversion: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub reorder_point: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub min_quantity: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    pub fn kind(&self) -> Option<ProductKind> {
        ProductKind::from_str(&self.product_kind)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::stock_record::Entity")]
    StockRecords,
}

impl Related<super::stock_record::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StockRecords.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
