mod common;

use rust_decimal_macros::dec;
use uuid::Uuid;

use larder::commands::deduction::{DeductSaleCommand, SaleLine, SaleLineOutcome, SoldItem};
use larder::commands::receiving::{PurchaseLine, ReceivePurchaseCommand};
use larder::commands::{Command, LedgerPolicy};
use larder::services::stock::StockService;

use common::{drained_event_sender, seed_location, seed_product, seed_recipe, seed_sellable, setup_db};

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
async fn sale_deducts_recipe_ingredients() {
    let db = setup_db().await;
    let events = drained_event_sender();
    let kitchen = seed_location(&db, "KITCHEN").await;
    let noodles = seed_product(&db, "NOODLES", None).await;
    let chicken = seed_product(&db, "CHICKEN", None).await;
    let khao_soi = seed_sellable(&db, "KHAO-SOI").await;
    seed_recipe(
        db.clone(),
        khao_soi,
        "Khao Soi",
        &[(noodles, kitchen, dec!(0.2)), (chicken, kitchen, dec!(0.15))],
    )
    .await;

    stock_up(db.clone(), noodles, kitchen, dec!(10), dec!(400)).await;
    stock_up(db.clone(), chicken, kitchen, dec!(5), dec!(900)).await;

    let sale_id = Uuid::new_v4();
    let result = DeductSaleCommand {
        reference_id: Some(sale_id),
        lines: vec![SaleLine {
            sold: SoldItem::Product(khao_soi),
            quantity_sold: dec!(3),
        }],
        deducted_by: None,
        policy: LedgerPolicy::default(),
    }
    .execute(db.clone(), events)
    .await
    .unwrap();

    assert!(!result.has_warnings());
    match &result.lines[0] {
        SaleLineOutcome::Deducted { ingredients, .. } => {
            assert_eq!(ingredients.len(), 2);
        }
        other => panic!("expected deducted outcome, got {:?}", other),
    }

    let stock = StockService::new(db);
    let noodle_record = stock.get_record(noodles, kitchen).await.unwrap().unwrap();
    assert_eq!(noodle_record.quantity, dec!(9.4));
    // Deduction never touches the average cost.
    assert_eq!(noodle_record.avg_cost, dec!(400));
    let chicken_record = stock.get_record(chicken, kitchen).await.unwrap().unwrap();
    assert_eq!(chicken_record.quantity, dec!(4.55));

    let movements = stock.movements(noodles, kitchen).await.unwrap();
    assert_eq!(movements.len(), 2);
    assert_eq!(movements[1].reference_id, Some(sale_id));
    // Valuation uses the cost at deduction time.
    assert_eq!(movements[1].unit_cost, dec!(400));
}

#[tokio::test]
async fn oversell_goes_negative_and_is_flagged_not_blocked() {
    let db = setup_db().await;
    let events = drained_event_sender();
    let kitchen = seed_location(&db, "KITCHEN").await;
    let prawns = seed_product(&db, "PRAWNS", None).await;
    let pad_thai = seed_sellable(&db, "PAD-THAI").await;
    seed_recipe(db.clone(), pad_thai, "Pad Thai", &[(prawns, kitchen, dec!(1))]).await;

    stock_up(db.clone(), prawns, kitchen, dec!(15), dec!(1200)).await;

    let result = DeductSaleCommand {
        reference_id: Some(Uuid::new_v4()),
        lines: vec![SaleLine {
            sold: SoldItem::Product(pad_thai),
            quantity_sold: dec!(20),
        }],
        deducted_by: None,
        policy: LedgerPolicy::default(),
    }
    .execute(db.clone(), events)
    .await
    .unwrap();

    assert!(result.has_warnings());
    match &result.lines[0] {
        SaleLineOutcome::Deducted { ingredients, .. } => {
            assert!(ingredients[0].resulting_negative);
            assert_eq!(ingredients[0].resulting_quantity, dec!(-5));
        }
        other => panic!("expected deducted outcome, got {:?}", other),
    }

    let stock = StockService::new(db);
    let record = stock.get_record(prawns, kitchen).await.unwrap().unwrap();
    assert_eq!(record.quantity, dec!(-5));
    assert_eq!(record.avg_cost, dec!(1200));
}

#[tokio::test]
async fn sale_without_recipe_is_unmatched_and_deducts_nothing() {
    let db = setup_db().await;
    let events = drained_event_sender();
    seed_location(&db, "KITCHEN").await;
    let mystery = seed_sellable(&db, "SPECIAL").await;

    let result = DeductSaleCommand {
        reference_id: None,
        lines: vec![SaleLine {
            sold: SoldItem::Product(mystery),
            quantity_sold: dec!(2),
        }],
        deducted_by: None,
        policy: LedgerPolicy::default(),
    }
    .execute(db.clone(), events)
    .await
    .unwrap();

    assert!(result.has_warnings());
    assert!(matches!(result.lines[0], SaleLineOutcome::Unmatched { .. }));
}

#[tokio::test]
async fn imported_sale_resolves_by_fuzzy_name() {
    let db = setup_db().await;
    let events = drained_event_sender();
    let kitchen = seed_location(&db, "KITCHEN").await;
    let noodles = seed_product(&db, "NOODLES", None).await;
    let khao_soi = seed_sellable(&db, "KHAO-SOI").await;
    seed_recipe(db.clone(), khao_soi, "Khao Soi", &[(noodles, kitchen, dec!(0.2))]).await;

    stock_up(db.clone(), noodles, kitchen, dec!(10), dec!(400)).await;

    // Spreadsheet spelling differs in case and punctuation only.
    let result = DeductSaleCommand {
        reference_id: None,
        lines: vec![SaleLine {
            sold: SoldItem::Name("  KHAO   soi!".into()),
            quantity_sold: dec!(1),
        }],
        deducted_by: None,
        policy: LedgerPolicy::default(),
    }
    .execute(db.clone(), events)
    .await
    .unwrap();

    assert!(matches!(result.lines[0], SaleLineOutcome::Deducted { .. }));
    let stock = StockService::new(db);
    let record = stock.get_record(noodles, kitchen).await.unwrap().unwrap();
    assert_eq!(record.quantity, dec!(9.8));
}

#[tokio::test]
async fn ambiguous_imported_name_stays_unmatched() {
    let db = setup_db().await;
    let events = drained_event_sender();
    let kitchen = seed_location(&db, "KITCHEN").await;
    let noodles = seed_product(&db, "NOODLES", None).await;
    let small = seed_sellable(&db, "SOI-S").await;
    let large = seed_sellable(&db, "SOI-L").await;
    seed_recipe(db.clone(), small, "Khao Soi Small", &[(noodles, kitchen, dec!(0.15))]).await;
    seed_recipe(db.clone(), large, "Khao Soi Large", &[(noodles, kitchen, dec!(0.25))]).await;

    stock_up(db.clone(), noodles, kitchen, dec!(10), dec!(400)).await;

    let result = DeductSaleCommand {
        reference_id: None,
        lines: vec![SaleLine {
            sold: SoldItem::Name("Khao Soi".into()),
            quantity_sold: dec!(1),
        }],
        deducted_by: None,
        policy: LedgerPolicy::default(),
    }
    .execute(db.clone(), events)
    .await
    .unwrap();

    // Two plausible recipes: guessing would risk deducting the wrong one.
    assert!(matches!(result.lines[0], SaleLineOutcome::Unmatched { .. }));
    let stock = StockService::new(db);
    let record = stock.get_record(noodles, kitchen).await.unwrap().unwrap();
    assert_eq!(record.quantity, dec!(10));
}

#[tokio::test]
async fn mixed_sale_reports_per_line_outcomes() {
    let db = setup_db().await;
    let events = drained_event_sender();
    let kitchen = seed_location(&db, "KITCHEN").await;
    let noodles = seed_product(&db, "NOODLES", None).await;
    let khao_soi = seed_sellable(&db, "KHAO-SOI").await;
    let unknown = seed_sellable(&db, "OFF-MENU").await;
    seed_recipe(db.clone(), khao_soi, "Khao Soi", &[(noodles, kitchen, dec!(0.2))]).await;

    stock_up(db.clone(), noodles, kitchen, dec!(10), dec!(400)).await;

    let result = DeductSaleCommand {
        reference_id: Some(Uuid::new_v4()),
        lines: vec![
            SaleLine {
                sold: SoldItem::Product(khao_soi),
                quantity_sold: dec!(2),
            },
            SaleLine {
                sold: SoldItem::Product(unknown),
                quantity_sold: dec!(1),
            },
        ],
        deducted_by: None,
        policy: LedgerPolicy::default(),
    }
    .execute(db.clone(), events)
    .await
    .unwrap();

    assert_eq!(result.lines.len(), 2);
    assert!(matches!(result.lines[0], SaleLineOutcome::Deducted { .. }));
    assert!(matches!(result.lines[1], SaleLineOutcome::Unmatched { .. }));

    // The matched line still committed even though its sibling didn't.
    let stock = StockService::new(db);
    let record = stock.get_record(noodles, kitchen).await.unwrap().unwrap();
    assert_eq!(record.quantity, dec!(9.6));
}
