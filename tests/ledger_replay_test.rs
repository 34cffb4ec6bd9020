mod common;

use rust_decimal_macros::dec;
use uuid::Uuid;

use larder::commands::adjustment::{AdjustStockCommand, RecordWasteCommand};
use larder::commands::deduction::{DeductSaleCommand, SaleLine, SoldItem};
use larder::commands::receiving::{PurchaseLine, ReceivePurchaseCommand};
use larder::commands::transfer::TransferStockCommand;
use larder::commands::{Command, LedgerPolicy};
use larder::services::stock::StockService;

use common::{drained_event_sender, seed_location, seed_product, seed_recipe, seed_sellable, setup_db};

/// Replaying the full ledger for a pair from the empty state must
/// reproduce the stored stock record exactly — the ledger is the sole
/// source of truth.
#[tokio::test]
async fn replaying_the_ledger_reproduces_the_record() {
    let db = setup_db().await;
    let events = drained_event_sender();
    let main = seed_location(&db, "MAIN").await;
    let bar = seed_location(&db, "BAR").await;
    let gin = seed_product(&db, "GIN", None).await;
    let gin_tonic = seed_sellable(&db, "GIN-TONIC").await;
    seed_recipe(db.clone(), gin_tonic, "Gin Tonic", &[(gin, main, dec!(0.05))]).await;

    // A representative history: two receipts at different costs, sales,
    // a waste entry, a physical count and a transfer out.
    ReceivePurchaseCommand {
        reference_id: Uuid::new_v4(),
        lines: vec![PurchaseLine {
            product_id: gin,
            location_id: main,
            quantity: dec!(10),
            unit_cost: dec!(15000),
        }],
        received_by: None,
        policy: LedgerPolicy::default(),
    }
    .execute(db.clone(), events.clone())
    .await
    .unwrap();

    ReceivePurchaseCommand {
        reference_id: Uuid::new_v4(),
        lines: vec![PurchaseLine {
            product_id: gin,
            location_id: main,
            quantity: dec!(5),
            unit_cost: dec!(18000),
        }],
        received_by: None,
        policy: LedgerPolicy::default(),
    }
    .execute(db.clone(), events.clone())
    .await
    .unwrap();

    DeductSaleCommand {
        reference_id: Some(Uuid::new_v4()),
        lines: vec![SaleLine {
            sold: SoldItem::Product(gin_tonic),
            quantity_sold: dec!(40),
        }],
        deducted_by: None,
        policy: LedgerPolicy::default(),
    }
    .execute(db.clone(), events.clone())
    .await
    .unwrap();

    RecordWasteCommand {
        product_id: gin,
        location_id: main,
        quantity: dec!(1),
        reason_code: "BREAKAGE".into(),
        note: None,
        reference_id: None,
        recorded_by: None,
        policy: LedgerPolicy::default(),
    }
    .execute(db.clone(), events.clone())
    .await
    .unwrap();

    AdjustStockCommand {
        product_id: gin,
        location_id: main,
        actual_quantity: dec!(11),
        reason_code: "CYCLE_COUNT".into(),
        note: None,
        cost_override: None,
        reference_id: None,
        adjusted_by: None,
        policy: LedgerPolicy::default(),
    }
    .execute(db.clone(), events.clone())
    .await
    .unwrap();

    TransferStockCommand {
        product_id: gin,
        source_location_id: main,
        dest_location_id: bar,
        quantity: dec!(4),
        reference_id: None,
        transferred_by: None,
        policy: LedgerPolicy::default(),
    }
    .execute(db.clone(), events)
    .await
    .unwrap();

    let stock = StockService::new(db);
    for location in [main, bar] {
        let reconciliation = stock.reconcile(gin, location, 0).await.unwrap();
        assert!(
            reconciliation.consistent,
            "ledger replay drifted from the stored record at location {}: {:?}",
            location, reconciliation
        );
        assert!(reconciliation.movement_count > 0);
    }
}

#[tokio::test]
async fn replay_with_cost_override_adjustments() {
    let db = setup_db().await;
    let events = drained_event_sender();
    let main = seed_location(&db, "MAIN").await;
    let oil = seed_product(&db, "OIL", None).await;

    ReceivePurchaseCommand {
        reference_id: Uuid::new_v4(),
        lines: vec![PurchaseLine {
            product_id: oil,
            location_id: main,
            quantity: dec!(10),
            unit_cost: dec!(2000),
        }],
        received_by: None,
        policy: LedgerPolicy::default(),
    }
    .execute(db.clone(), events.clone())
    .await
    .unwrap();

    AdjustStockCommand {
        product_id: oil,
        location_id: main,
        actual_quantity: dec!(10),
        reason_code: "CORRECTION".into(),
        note: None,
        cost_override: Some(dec!(1850)),
        reference_id: None,
        adjusted_by: None,
        policy: LedgerPolicy::default(),
    }
    .execute(db.clone(), events)
    .await
    .unwrap();

    let stock = StockService::new(db);
    let reconciliation = stock.reconcile(oil, main, 0).await.unwrap();
    assert!(reconciliation.consistent, "{:?}", reconciliation);
    assert_eq!(reconciliation.replayed.avg_cost, dec!(1850));
}

#[tokio::test]
async fn unseen_pair_reconciles_as_empty() {
    let db = setup_db().await;
    let main = seed_location(&db, "MAIN").await;
    let ghost = seed_product(&db, "GHOST", None).await;

    let stock = StockService::new(db);
    let reconciliation = stock.reconcile(ghost, main, 0).await.unwrap();
    assert!(reconciliation.consistent);
    assert_eq!(reconciliation.movement_count, 0);
    assert!(reconciliation.stored.is_none());
}
