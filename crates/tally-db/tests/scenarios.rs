//! End-to-end runs through the engine: documents, stock and the ledger
//! moving together. Most run in memory; the contention cases use a
//! file-backed database so several connections race for the same rows.

use chrono::Utc;
use tally_core::accounts::{Account, AccountType};
use tally_core::customer::Supplier;
use tally_core::inventory::{InventoryItem, MovementType};
use tally_core::journal::TransactionType;
use tally_core::postings::AccountMap;
use tally_core::purchase::{PurchaseOrder, PurchaseOrderStatus, ReceiptLine};
use tally_core::sale::{PaymentMethod, SaleStatus};
use tally_core::{AuditStamp, CoreError, Money, Quantity, UnitCost};
use tally_db::{Database, DbConfig, DbError, Engine, EngineConfig};
use tempfile::TempDir;

const STORE: &str = "S1";

fn stamp() -> AuditStamp {
    AuditStamp::new("clerk-1", Utc::now())
}

fn account_numbers() -> AccountMap {
    AccountMap {
        cash: "1100".into(),
        accounts_receivable: "1200".into(),
        inventory: "1300".into(),
        accounts_payable: "2100".into(),
        sales_revenue: "4000".into(),
        sales_tax_payable: "2200".into(),
        cost_of_goods_sold: "5000".into(),
        inventory_shrinkage: "5100".into(),
    }
}

/// An engine with a 10% exclusive tax and the posting chart in place.
async fn posting_engine() -> Engine {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    with_chart(db).await
}

/// A posting engine over a database file in `dir`, with room for
/// concurrent connections and a generous retry budget.
async fn file_engine(dir: &TempDir) -> Engine {
    let db = Database::new(DbConfig::new(dir.path().join("tally.db")).max_connections(8))
        .await
        .unwrap();
    with_chart(db).await
}

async fn with_chart(db: Database) -> Engine {
    let mut config = EngineConfig::default()
        .with_store_tax(1000, false)
        .with_accounts(account_numbers());
    config.retry.max_elapsed_ms = 10_000;
    let engine = Engine::new(db, config).unwrap();

    for (number, kind) in [
        ("1100", AccountType::Asset),
        ("1200", AccountType::Asset),
        ("1300", AccountType::Asset),
        ("2100", AccountType::Liability),
        ("2200", AccountType::Liability),
        ("3000", AccountType::Equity),
        ("4000", AccountType::Revenue),
        ("5000", AccountType::Expense),
        ("5100", AccountType::Expense),
    ] {
        engine
            .create_account(Account::new("t", number, format!("Account {}", number), kind, Utc::now()))
            .await
            .unwrap();
    }
    engine
}

async fn stocked(engine: &Engine, product: &str, units: i64, cost_cents: i64) -> InventoryItem {
    let item = engine
        .create_inventory_item(InventoryItem::new("t", STORE, product, None, Utc::now()))
        .await
        .unwrap();
    engine
        .set_initial_stock(&item.id, Quantity::from_units(units), UnitCost::from_cents(cost_cents), &stamp())
        .await
        .unwrap()
        .item
}

async fn balance(engine: &Engine, number: &str) -> Money {
    engine
        .db()
        .accounts()
        .get_by_number(engine.tenant_id(), number)
        .await
        .unwrap()
        .unwrap()
        .current_balance
}

async fn assert_balances_round_trip(engine: &Engine) {
    let accounts = engine.db().accounts();
    for account in accounts.list(engine.tenant_id()).await.unwrap() {
        assert_eq!(
            accounts.recomputed_balance(&account.id).await.unwrap(),
            account.current_balance,
            "account {} drifted from its entries",
            account.account_number
        );
    }
}

// =============================================================================
// Sales
// =============================================================================

#[tokio::test]
async fn test_two_line_sale_settles_stock_and_ledger() {
    let engine = posting_engine().await;
    let coffee = stocked(&engine, "COFFEE", 10, 400).await;
    let mug = stocked(&engine, "MUG", 10, 200).await;

    let sale = engine.create_sale(STORE, None, &stamp()).await.unwrap();
    engine
        .add_sale_item(&sale.id, "COFFEE", None, Quantity::from_units(2), Money::from_cents(1_000), &stamp())
        .await
        .unwrap();
    let sale = engine
        .add_sale_item(&sale.id, "MUG", None, Quantity::from_units(1), Money::from_cents(500), &stamp())
        .await
        .unwrap();
    assert_eq!(sale.subtotal, Money::from_cents(2_500));
    assert_eq!(sale.tax_amount, Money::from_cents(250));
    assert_eq!(sale.total_amount, Money::from_cents(2_750));

    let paid = engine
        .add_sale_payment(&sale.id, PaymentMethod::Cash, Money::from_cents(3_000), None, &stamp())
        .await
        .unwrap();
    assert_eq!(paid.change_amount, Money::from_cents(250));
    assert_eq!(paid.amount_due, Money::zero());

    let outcome = engine.complete_sale(&sale.id, &stamp()).await.unwrap();
    assert_eq!(outcome.sale.status, SaleStatus::Completed);
    assert_eq!(outcome.movements.len(), 2);
    assert!(outcome.movements.iter().all(|m| m.movement_type == MovementType::Sale));

    let inventory = engine.db().inventory();
    let coffee = inventory.get(&coffee.id).await.unwrap().unwrap();
    let mug = inventory.get(&mug.id).await.unwrap().unwrap();
    assert_eq!(coffee.quantity_on_hand, Quantity::from_units(8));
    assert_eq!(mug.quantity_on_hand, Quantity::from_units(9));

    let journal = outcome.journal.unwrap();
    assert_eq!(journal.transaction_type, TransactionType::Sale);
    assert_eq!(journal.total_debit, journal.total_credit);

    assert_eq!(balance(&engine, "1100").await, Money::from_cents(2_750));
    assert_eq!(balance(&engine, "4000").await, Money::from_cents(2_500));
    assert_eq!(balance(&engine, "2200").await, Money::from_cents(250));
    assert_eq!(balance(&engine, "5000").await, Money::from_cents(1_000));
    assert_eq!(balance(&engine, "1300").await, Money::from_cents(-1_000));
    assert_balances_round_trip(&engine).await;
}

// =============================================================================
// Purchasing
// =============================================================================

async fn sent_order(engine: &Engine) -> PurchaseOrder {
    let supplier = engine
        .create_supplier(Supplier::new("t", "SUP-01", "Lahore Packaging", Utc::now()))
        .await
        .unwrap();
    let po = engine.create_purchase_order(STORE, &supplier.id, &stamp()).await.unwrap();
    engine
        .add_po_item(&po.id, "CUP", None, Quantity::from_units(10), UnitCost::from_cents(200), &stamp())
        .await
        .unwrap();
    engine.submit_po(&po.id, &stamp()).await.unwrap();
    engine.approve_po(&po.id, &stamp()).await.unwrap();
    engine.send_po(&po.id, &stamp()).await.unwrap()
}

async fn receive(engine: &Engine, po: &PurchaseOrder, units: i64) -> Result<PurchaseOrder, DbError> {
    let lines = [ReceiptLine {
        po_item_id: po.items[0].id.clone(),
        quantity: Quantity::from_units(units),
        unit_cost: None,
    }];
    let receipt = engine.draft_goods_receipt(&po.id, &lines, &stamp()).await?;
    let outcome = engine.complete_goods_receipt(&receipt.id, &stamp()).await?;
    Ok(outcome.order)
}

#[tokio::test]
async fn test_order_received_in_two_parts_then_refuses_more() {
    let engine = posting_engine().await;
    let po = sent_order(&engine).await;

    let after_first = receive(&engine, &po, 4).await.unwrap();
    assert_eq!(after_first.status, PurchaseOrderStatus::PartiallyReceived);
    assert_eq!(after_first.items[0].quantity_received, Quantity::from_units(4));
    assert!(!after_first.items[0].is_fully_received());

    let after_second = receive(&engine, &po, 6).await.unwrap();
    assert_eq!(after_second.status, PurchaseOrderStatus::Received);
    assert!(after_second.items[0].is_fully_received());

    let err = receive(&engine, &po, 1).await.unwrap_err();
    assert!(matches!(err, DbError::Core(CoreError::OverReceive { .. })));

    let stored = engine.db().purchases().get_order(&po.id).await.unwrap().unwrap();
    assert_eq!(stored.items[0].quantity_received, Quantity::from_units(10));

    let cups = engine
        .db()
        .inventory()
        .find(engine.tenant_id(), STORE, "CUP", None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cups.quantity_on_hand, Quantity::from_units(10));

    assert_eq!(balance(&engine, "1300").await, Money::from_cents(2_000));
    assert_eq!(balance(&engine, "2100").await, Money::from_cents(2_000));
    assert_balances_round_trip(&engine).await;
}

#[tokio::test]
async fn test_receipts_blend_average_cost() {
    let engine = posting_engine().await;
    let po = sent_order(&engine).await;

    receive(&engine, &po, 5).await.unwrap();
    let lines = [ReceiptLine {
        po_item_id: po.items[0].id.clone(),
        quantity: Quantity::from_units(5),
        unit_cost: Some(UnitCost::from_cents(300)),
    }];
    let receipt = engine.draft_goods_receipt(&po.id, &lines, &stamp()).await.unwrap();
    engine.complete_goods_receipt(&receipt.id, &stamp()).await.unwrap();

    let cups = engine
        .db()
        .inventory()
        .find(engine.tenant_id(), STORE, "CUP", None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cups.unit_cost, UnitCost::from_cents(250));
}

// =============================================================================
// Stock
// =============================================================================

#[tokio::test]
async fn test_issue_beyond_on_hand_is_refused() {
    let engine = posting_engine().await;
    let item = stocked(&engine, "TEA", 3, 100).await;

    let err = engine
        .issue_stock(&item.id, Quantity::from_units(5), None, &stamp())
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Core(CoreError::InsufficientOnHand { .. })));

    let stored = engine.db().inventory().get(&item.id).await.unwrap().unwrap();
    assert_eq!(stored.quantity_on_hand, Quantity::from_units(3));
    assert_eq!(stored.quantity_available, Quantity::from_units(3));
}

#[tokio::test]
async fn test_adjustment_applies_exactly_once() {
    let engine = posting_engine().await;
    let item = stocked(&engine, "TEA", 10, 100).await;

    let adj = engine.create_adjustment(STORE, "Cycle count", &stamp()).await.unwrap();
    engine
        .add_adjustment_item(&adj.id, &item.id, Quantity::from_units(8), None, &stamp())
        .await
        .unwrap();
    engine.approve_adjustment(&adj.id, &stamp()).await.unwrap();
    engine.apply_adjustment(&adj.id, &stamp()).await.unwrap();

    let err = engine.apply_adjustment(&adj.id, &stamp()).await.unwrap_err();
    assert!(matches!(err, DbError::Core(CoreError::AlreadyApplied { .. })));

    let stored = engine.db().inventory().get(&item.id).await.unwrap().unwrap();
    assert_eq!(stored.quantity_on_hand, Quantity::from_units(8));
    let movements = engine.db().movements().list_for_item(&item.id).await.unwrap();
    let adjustments = movements
        .iter()
        .filter(|m| m.movement_type == MovementType::Adjustment)
        .count();
    assert_eq!(adjustments, 1);

    assert_eq!(balance(&engine, "5100").await, Money::from_cents(200));
    assert_balances_round_trip(&engine).await;
}

// =============================================================================
// Ledger
// =============================================================================

#[tokio::test]
async fn test_reversal_nets_every_account_to_zero() {
    let engine = posting_engine().await;
    let cash = engine
        .db()
        .accounts()
        .get_by_number(engine.tenant_id(), "1100")
        .await
        .unwrap()
        .unwrap();
    let capital = engine
        .db()
        .accounts()
        .get_by_number(engine.tenant_id(), "3000")
        .await
        .unwrap()
        .unwrap();

    let txn = engine
        .open_transaction(TransactionType::JournalEntry, Utc::now().date_naive(), "Owner funding", None, &stamp())
        .await
        .unwrap();
    engine
        .add_entry(&txn.id, &cash.id, Money::from_cents(90_000), Money::zero(), None, &stamp())
        .await
        .unwrap();
    engine
        .add_entry(&txn.id, &capital.id, Money::zero(), Money::from_cents(90_000), None, &stamp())
        .await
        .unwrap();
    engine.post_transaction(&txn.id, &stamp()).await.unwrap();
    assert_eq!(balance(&engine, "1100").await, Money::from_cents(90_000));

    let reversal = engine.reverse_transaction(&txn.id, "Entered twice", &stamp()).await.unwrap();
    assert_eq!(reversal.reversal.total_debit, Money::from_cents(90_000));

    assert_eq!(balance(&engine, "1100").await, Money::zero());
    assert_eq!(balance(&engine, "3000").await, Money::zero());
    assert_balances_round_trip(&engine).await;
}

// =============================================================================
// Contention
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_issues_take_the_last_unit_once() {
    let dir = tempfile::tempdir().unwrap();
    let engine = file_engine(&dir).await;
    let item = stocked(&engine, "LAST", 1, 500).await;

    let mut handles = Vec::new();
    for clerk in 0..4 {
        let engine = engine.clone();
        let item_id = item.id.clone();
        handles.push(tokio::spawn(async move {
            let stamp = AuditStamp::new(format!("clerk-{}", clerk), Utc::now());
            engine.issue_stock(&item_id, Quantity::from_units(1), None, &stamp).await
        }));
    }

    let mut issued = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => issued += 1,
            Err(err) => assert!(
                matches!(err, DbError::Core(CoreError::InsufficientOnHand { .. })),
                "unexpected error: {}",
                err
            ),
        }
    }
    assert_eq!(issued, 1);

    let stored = engine.db().inventory().get(&item.id).await.unwrap().unwrap();
    assert_eq!(stored.quantity_on_hand, Quantity::zero());
    stored.check_invariants().unwrap();

    let movements = engine.db().movements().list_for_item(&item.id).await.unwrap();
    assert_eq!(movements.iter().filter(|m| m.is_outbound()).count(), 1);
}

/// A paid draft for one unit of each product, added in the given order.
async fn paid_sale(engine: &Engine, products: [&str; 2]) -> String {
    let sale = engine.create_sale(STORE, None, &stamp()).await.unwrap();
    for product in products {
        engine
            .add_sale_item(&sale.id, product, None, Quantity::from_units(1), Money::from_cents(1_000), &stamp())
            .await
            .unwrap();
    }
    engine
        .add_sale_payment(&sale.id, PaymentMethod::Cash, Money::from_cents(2_200), None, &stamp())
        .await
        .unwrap();
    sale.id
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sales_on_overlapping_items_settle_once() {
    let dir = tempfile::tempdir().unwrap();
    let engine = file_engine(&dir).await;
    let scarce = stocked(&engine, "SCARCE", 1, 400).await;
    let plenty = stocked(&engine, "PLENTY", 5, 200).await;

    // opposite line order on each sale
    let first = paid_sale(&engine, ["SCARCE", "PLENTY"]).await;
    let second = paid_sale(&engine, ["PLENTY", "SCARCE"]).await;

    let handles: Vec<_> = [first.clone(), second.clone()]
        .into_iter()
        .map(|sale_id| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.complete_sale(&sale_id, &stamp()).await })
        })
        .collect();

    let mut completed = Vec::new();
    for handle in handles {
        match handle.await.unwrap() {
            Ok(outcome) => completed.push(outcome.sale.id),
            Err(err) => assert!(
                matches!(err, DbError::Core(CoreError::InsufficientOnHand { .. })),
                "unexpected error: {}",
                err
            ),
        }
    }
    assert_eq!(completed.len(), 1);

    let loser = if completed[0] == first { &second } else { &first };
    let unsettled = engine.db().sales().get(loser).await.unwrap().unwrap();
    assert_eq!(unsettled.status, SaleStatus::Draft);

    let inventory = engine.db().inventory();
    let scarce = inventory.get(&scarce.id).await.unwrap().unwrap();
    let plenty = inventory.get(&plenty.id).await.unwrap().unwrap();
    assert_eq!(scarce.quantity_on_hand, Quantity::zero());
    assert_eq!(plenty.quantity_on_hand, Quantity::from_units(4));

    // one sale's worth of cash and cost, nothing from the loser
    assert_eq!(balance(&engine, "1100").await, Money::from_cents(2_200));
    assert_eq!(balance(&engine, "5000").await, Money::from_cents(600));
    assert_balances_round_trip(&engine).await;
}
