mod common;

use rust_decimal_macros::dec;
use uuid::Uuid;

use larder::commands::adjustment::{AdjustStockCommand, RecordWasteCommand};
use larder::commands::receiving::{PurchaseLine, ReceivePurchaseCommand};
use larder::commands::{Command, LedgerPolicy};
use larder::entities::stock_movement::MovementType;
use larder::errors::ServiceError;
use larder::services::stock::StockService;

use common::{drained_event_sender, seed_location, seed_product, setup_db};

async fn stock_up(
    db: std::sync::Arc<larder::db::DbPool>,
    product: Uuid,
    location: i32,
    quantity: rust_decimal::Decimal,
    unit_cost: rust_decimal::Decimal,
) {
    let events = drained_event_sender();
    ReceivePurchaseCommand {
        reference_id: Uuid::new_v4(),
        lines: vec![PurchaseLine {
            product_id: product,
            location_id: location,
            quantity,
            unit_cost,
        }],
        received_by: None,
        policy: LedgerPolicy::default(),
    }
    .execute(db, events)
    .await
    .unwrap();
}

#[tokio::test]
async fn count_sets_quantity_and_keeps_cost() {
    let db = setup_db().await;
    let events = drained_event_sender();
    let main = seed_location(&db, "MAIN").await;
    let flour = seed_product(&db, "FLOUR", None).await;
    stock_up(db.clone(), flour, main, dec!(12), dec!(650)).await;

    let result = AdjustStockCommand {
        product_id: flour,
        location_id: main,
        actual_quantity: dec!(9),
        reason_code: "CYCLE_COUNT".into(),
        note: Some("monthly count".into()),
        cost_override: None,
        reference_id: Some(Uuid::new_v4()),
        adjusted_by: Some(Uuid::new_v4()),
        policy: LedgerPolicy::default(),
    }
    .execute(db.clone(), events)
    .await
    .unwrap();

    assert_eq!(result.previous_quantity, dec!(12));
    assert_eq!(result.delta, dec!(-3));
    assert_eq!(result.new_quantity, dec!(9));
    assert_eq!(result.new_avg_cost, dec!(650));

    let stock = StockService::new(db);
    let movements = stock.movements(flour, main).await.unwrap();
    let adjustment = movements.last().unwrap();
    assert_eq!(adjustment.movement_type(), Some(MovementType::Adjustment));
    assert_eq!(adjustment.reason_code.as_deref(), Some("CYCLE_COUNT"));
    assert_eq!(adjustment.notes.as_deref(), Some("monthly count"));
}

#[tokio::test]
async fn count_recovers_negative_record() {
    // A count of 8 on a record driven to -5 books a +13 adjustment and
    // reuses the surviving avg cost.
    let db = setup_db().await;
    let events = drained_event_sender();
    let main = seed_location(&db, "MAIN").await;
    let prawns = seed_product(&db, "PRAWNS", None).await;
    stock_up(db.clone(), prawns, main, dec!(15), dec!(1200)).await;

    AdjustStockCommand {
        product_id: prawns,
        location_id: main,
        actual_quantity: dec!(0),
        reason_code: "LOST".into(),
        note: None,
        cost_override: None,
        reference_id: None,
        adjusted_by: None,
        policy: LedgerPolicy::default(),
    }
    .execute(db.clone(), events.clone())
    .await
    .unwrap();

    // A waste entry against the now-empty record drives it to -5.
    RecordWasteCommand {
        product_id: prawns,
        location_id: main,
        quantity: dec!(5),
        reason_code: "SPOILAGE".into(),
        note: None,
        reference_id: None,
        recorded_by: None,
        policy: LedgerPolicy::default(),
    }
    .execute(db.clone(), events.clone())
    .await
    .unwrap();

    let stock = StockService::new(db.clone());
    let record = stock.get_record(prawns, main).await.unwrap().unwrap();
    assert_eq!(record.quantity, dec!(-5));
    assert_eq!(record.avg_cost, dec!(1200));

    let result = AdjustStockCommand {
        product_id: prawns,
        location_id: main,
        actual_quantity: dec!(8),
        reason_code: "FOUND".into(),
        note: None,
        cost_override: None,
        reference_id: None,
        adjusted_by: None,
        policy: LedgerPolicy::default(),
    }
    .execute(db.clone(), events)
    .await
    .unwrap();

    assert_eq!(result.delta, dec!(13));
    assert_eq!(result.new_quantity, dec!(8));
    assert_eq!(result.new_avg_cost, dec!(1200));
}

#[tokio::test]
async fn cost_override_corrects_average_cost() {
    let db = setup_db().await;
    let events = drained_event_sender();
    let main = seed_location(&db, "MAIN").await;
    let oil = seed_product(&db, "OIL", None).await;
    stock_up(db.clone(), oil, main, dec!(10), dec!(2000)).await;

    let result = AdjustStockCommand {
        product_id: oil,
        location_id: main,
        actual_quantity: dec!(10),
        reason_code: "CORRECTION".into(),
        note: Some("supplier credit re-priced the last delivery".into()),
        cost_override: Some(dec!(1800)),
        reference_id: None,
        adjusted_by: None,
        policy: LedgerPolicy::default(),
    }
    .execute(db.clone(), events)
    .await
    .unwrap();

    assert_eq!(result.delta, dec!(0));
    assert_eq!(result.new_avg_cost, dec!(1800));

    let stock = StockService::new(db);
    let record = stock.get_record(oil, main).await.unwrap().unwrap();
    assert_eq!(record.avg_cost, dec!(1800));
}

#[tokio::test]
async fn adjustment_on_unseen_pair_creates_the_record() {
    let db = setup_db().await;
    let events = drained_event_sender();
    let freezer = seed_location(&db, "FREEZER").await;
    let icecream = seed_product(&db, "ICE-CREAM", None).await;

    let result = AdjustStockCommand {
        product_id: icecream,
        location_id: freezer,
        actual_quantity: dec!(24),
        reason_code: "QR_COUNT".into(),
        note: None,
        cost_override: None,
        reference_id: None,
        adjusted_by: None,
        policy: LedgerPolicy::default(),
    }
    .execute(db.clone(), events)
    .await
    .unwrap();

    assert_eq!(result.previous_quantity, dec!(0));
    assert_eq!(result.new_quantity, dec!(24));
    // No cost information has ever been seen for the pair.
    assert_eq!(result.new_avg_cost, dec!(0));
}

#[tokio::test]
async fn waste_reduces_quantity_at_current_cost() {
    let db = setup_db().await;
    let events = drained_event_sender();
    let main = seed_location(&db, "MAIN").await;
    let milk = seed_product(&db, "MILK", None).await;
    stock_up(db.clone(), milk, main, dec!(8), dec!(700)).await;

    let result = RecordWasteCommand {
        product_id: milk,
        location_id: main,
        quantity: dec!(2),
        reason_code: "EXPIRED".into(),
        note: None,
        reference_id: None,
        recorded_by: None,
        policy: LedgerPolicy::default(),
    }
    .execute(db.clone(), events)
    .await
    .unwrap();

    assert_eq!(result.new_quantity, dec!(6));
    assert_eq!(result.unit_cost, dec!(700));

    let stock = StockService::new(db);
    let movements = stock.movements(milk, main).await.unwrap();
    let waste = movements.last().unwrap();
    assert_eq!(waste.movement_type(), Some(MovementType::Waste));
    assert_eq!(waste.quantity_delta, dec!(-2));
    assert_eq!(waste.resulting_avg_cost, dec!(700));
}

#[tokio::test]
async fn bad_reason_codes_are_rejected_before_any_write() {
    let db = setup_db().await;
    let events = drained_event_sender();
    let main = seed_location(&db, "MAIN").await;
    let milk = seed_product(&db, "MILK", None).await;

    let err = AdjustStockCommand {
        product_id: milk,
        location_id: main,
        actual_quantity: dec!(5),
        reason_code: "VIBES".into(),
        note: None,
        cost_override: None,
        reference_id: None,
        adjusted_by: None,
        policy: LedgerPolicy::default(),
    }
    .execute(db.clone(), events)
    .await
    .unwrap_err();
    assert!(matches!(err, ServiceError::ValidationError(_)));

    let stock = StockService::new(db);
    assert!(stock.get_record(milk, main).await.unwrap().is_none());
}
