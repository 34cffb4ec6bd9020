#![allow(dead_code)]

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use uuid::Uuid;

use larder::db::{establish_connection_with_config, run_migrations, DbConfig, DbPool};
use larder::entities::{product, stock_location};
use larder::events::{self, EventSender};
use larder::services::recipes::RecipeResolver;

/// In-memory SQLite pinned to a single pooled connection so every query
/// sees the same database.
pub async fn setup_db() -> Arc<DbPool> {
    let config = DbConfig {
        url: "sqlite::memory:".into(),
        max_connections: 1,
        min_connections: 1,
        ..Default::default()
    };
    let db = establish_connection_with_config(&config)
        .await
        .expect("test database connects");
    run_migrations(&db).await.expect("migrations run");
    Arc::new(db)
}

/// Event sender whose receiver is drained by a background task, so
/// commands never block on a full channel.
pub fn drained_event_sender() -> Arc<EventSender> {
    let (sender, rx) = events::channel(1024);
    tokio::spawn(events::process_events(rx));
    Arc::new(sender)
}

pub async fn seed_location(db: &DbPool, code: &str) -> i32 {
    let location = stock_location::ActiveModel {
        code: Set(code.to_string()),
        name: Set(format!("Location {}", code)),
        created_at: Set(Utc::now()),
        ..Default::default()
    };
    location
        .insert(db)
        .await
        .expect("location inserts")
        .id
}

pub async fn seed_product(db: &DbPool, sku: &str, min_quantity: Option<Decimal>) -> Uuid {
    let id = Uuid::new_v4();
    let prod = product::ActiveModel {
        id: Set(id),
        sku: Set(sku.to_string()),
        name: Set(format!("Product {}", sku)),
        product_kind: Set("raw_material".to_string()),
        uom: Set("ea".to_string()),
        alt_uom: Set(None),
        uom_conversion: Set(None),
        reorder_point: Set(None),
        min_quantity: Set(min_quantity),
        created_at: Set(Utc::now()),
        updated_at: Set(Utc::now()),
    };
    prod.insert(db).await.expect("product inserts");
    id
}

pub async fn seed_sellable(db: &DbPool, sku: &str) -> Uuid {
    let id = Uuid::new_v4();
    let prod = product::ActiveModel {
        id: Set(id),
        sku: Set(sku.to_string()),
        name: Set(format!("Menu item {}", sku)),
        product_kind: Set("sellable".to_string()),
        uom: Set("ea".to_string()),
        alt_uom: Set(None),
        uom_conversion: Set(None),
        reorder_point: Set(None),
        min_quantity: Set(None),
        created_at: Set(Utc::now()),
        updated_at: Set(Utc::now()),
    };
    prod.insert(db).await.expect("product inserts");
    id
}

/// Creates an active recipe with the given `(ingredient, location,
/// quantity_per_unit)` lines.
pub async fn seed_recipe(
    db: Arc<DbPool>,
    menu_product_id: Uuid,
    recipe_name: &str,
    lines: &[(Uuid, i32, Decimal)],
) -> i64 {
    let resolver = RecipeResolver::new(db);
    let header = resolver
        .create_recipe(menu_product_id, recipe_name)
        .await
        .expect("recipe header inserts");
    for (ingredient, location, quantity_per_unit) in lines {
        resolver
            .add_line(
                header.recipe_id,
                *ingredient,
                *location,
                *quantity_per_unit,
                Some("ea".to_string()),
            )
            .await
            .expect("recipe line inserts");
    }
    header.recipe_id
}
