//! # Demo Ledger Seeder
//!
//! Populates a database with a small, fully posted retail ledger for
//! development.
//!
//! ## Usage
//! ```bash
//! # Seed ./tally_dev.db
//! cargo run -p tally-db --bin seed
//!
//! # Specify database path
//! cargo run -p tally-db --bin seed -- --db ./data/tally.db
//!
//! # Show what the engine is doing
//! RUST_LOG=tally_db=debug cargo run -p tally-db --bin seed
//! ```
//!
//! ## Generated Data
//! - Chart of accounts wired to the posting rules, plus owner's capital
//! - Opening capital journal (Cash / Owner's Capital)
//! - One supplier, one purchase order, fully received and paid
//! - One loyalty customer and one completed, taxed sale
//! - One account customer with a credit limit and a part-paid invoice

use chrono::{Duration, Utc};
use std::env;
use tally_core::accounts::{Account, AccountType};
use tally_core::customer::{Customer, Supplier};
use tally_core::journal::TransactionType;
use tally_core::postings::AccountMap;
use tally_core::purchase::ReceiptLine;
use tally_core::sale::PaymentMethod;
use tally_core::{AuditStamp, Money, Quantity, TaxRate, UnitCost, DEFAULT_TENANT_ID};
use tally_db::{Database, DbConfig, Engine, EngineConfig};
use tracing_subscriber::EnvFilter;

/// (number, name, type)
const CHART: &[(&str, &str, AccountType)] = &[
    ("1100", "Cash", AccountType::Asset),
    ("1200", "Accounts Receivable", AccountType::Asset),
    ("1300", "Inventory", AccountType::Asset),
    ("2100", "Accounts Payable", AccountType::Liability),
    ("2200", "Sales Tax Payable", AccountType::Liability),
    ("3000", "Owner's Capital", AccountType::Equity),
    ("4000", "Sales Revenue", AccountType::Revenue),
    ("5000", "Cost of Goods Sold", AccountType::Expense),
    ("5100", "Inventory Shrinkage", AccountType::Expense),
];

fn account_map() -> AccountMap {
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

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = env::args().collect();
    let mut db_path = String::from("./tally_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Tally Demo Ledger Seeder");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --db <PATH>    Database file path (default: ./tally_dev.db)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("🌱 Tally Demo Ledger Seeder");
    println!("===========================");
    println!("Database: {}", db_path);
    println!();

    let db = Database::new(DbConfig::new(&db_path)).await?;
    println!("✓ Connected to database");
    println!("✓ Migrations applied");

    let existing = db.accounts().list(DEFAULT_TENANT_ID).await?;
    if !existing.is_empty() {
        println!("⚠ Database already has {} accounts", existing.len());
        println!("  Skipping seed to avoid duplicates.");
        println!("  Delete the database file to regenerate.");
        return Ok(());
    }

    let config = EngineConfig::default()
        .with_store_tax(1000, false)
        .with_accounts(account_map());
    let engine = Engine::new(db, config)?;
    let store = engine.config().store.id.clone();
    let stamp = AuditStamp::new("seed", Utc::now());

    // Chart of accounts
    let mut capital_id = String::new();
    let mut cash_id = String::new();
    for (number, name, kind) in CHART {
        let account = engine
            .create_account(Account::new(DEFAULT_TENANT_ID, *number, *name, *kind, Utc::now()))
            .await?;
        match *number {
            "1100" => cash_id = account.id,
            "3000" => capital_id = account.id,
            _ => {}
        }
    }
    println!("✓ Created {} accounts", CHART.len());

    // Opening capital
    let opening = engine
        .open_transaction(
            TransactionType::JournalEntry,
            Utc::now().date_naive(),
            "Opening capital",
            None,
            &stamp,
        )
        .await?;
    let capital = Money::from_cents(100_000);
    engine
        .add_entry(&opening.id, &cash_id, capital, Money::zero(), None, &stamp)
        .await?;
    engine
        .add_entry(&opening.id, &capital_id, Money::zero(), capital, None, &stamp)
        .await?;
    let posted = engine.post_transaction(&opening.id, &stamp).await?;
    println!("✓ Posted {} ({})", posted.transaction.transaction_number, capital);

    // Purchasing
    let supplier = engine
        .create_supplier(Supplier::new(DEFAULT_TENANT_ID, "SUP-001", "Harbor Coffee Roasters", Utc::now()))
        .await?;
    let po = engine.create_purchase_order(&store, &supplier.id, &stamp).await?;
    engine
        .add_po_item(&po.id, "COFFEE-1KG", None, Quantity::from_units(20), UnitCost::from_cents(400), &stamp)
        .await?;
    engine
        .add_po_item(&po.id, "MUG-WHITE", None, Quantity::from_units(10), UnitCost::from_cents(250), &stamp)
        .await?;
    engine.submit_po(&po.id, &stamp).await?;
    engine.approve_po(&po.id, &stamp).await?;
    let po = engine.send_po(&po.id, &stamp).await?;

    let lines: Vec<ReceiptLine> = po
        .items
        .iter()
        .map(|item| ReceiptLine {
            po_item_id: item.id.clone(),
            quantity: item.quantity_pending(),
            unit_cost: None,
        })
        .collect();
    let receipt = engine.draft_goods_receipt(&po.id, &lines, &stamp).await?;
    let received = engine.complete_goods_receipt(&receipt.id, &stamp).await?;
    let po = engine.complete_po(&po.id, &stamp).await?;
    let po = engine.record_po_payment(&po.id, po.amount_due, &stamp).await?;
    println!(
        "✓ Received {} against {} ({}), paid in full",
        received.receipt.receipt_number,
        po.po_number,
        received.receipt.total_value()
    );

    // Sales
    let customer = engine
        .create_customer(Customer::new(DEFAULT_TENANT_ID, "CUST-001", "Amina Qureshi", Utc::now()))
        .await?;
    let sale = engine.create_sale(&store, Some(&customer.id), &stamp).await?;
    engine
        .add_sale_item(&sale.id, "COFFEE-1KG", None, Quantity::from_units(2), Money::from_cents(1_250), &stamp)
        .await?;
    let sale = engine
        .add_sale_item(&sale.id, "MUG-WHITE", None, Quantity::from_units(1), Money::from_cents(500), &stamp)
        .await?;
    engine.reserve_sale_stock(&sale.id, &stamp).await?;
    engine
        .add_sale_payment(&sale.id, PaymentMethod::Cash, Money::from_cents(4_000), None, &stamp)
        .await?;
    let completed = engine.complete_sale(&sale.id, &stamp).await?;
    println!(
        "✓ Completed {}: total {}, change {}",
        completed.sale.sale_number, completed.sale.total_amount, completed.sale.change_amount
    );

    // Receivables
    let account = engine
        .create_customer(
            Customer::new(DEFAULT_TENANT_ID, "CUST-002", "Harbor Cafe", Utc::now())
                .with_credit_limit(Money::from_cents(50_000)),
        )
        .await?;
    let invoice = engine
        .create_invoice(&account.id, Utc::now() + Duration::days(30), Some("Net 30"), &stamp)
        .await?;
    engine
        .add_invoice_item(
            &invoice.id,
            Some("COFFEE-1KG"),
            "Wholesale coffee, 1kg bags",
            Quantity::from_units(10),
            Money::from_cents(1_100),
            Some(TaxRate::from_bps(1000)),
            &stamp,
        )
        .await?;
    engine.send_invoice(&invoice.id, &stamp).await?;
    let paid = engine
        .record_invoice_payment(&invoice.id, Money::from_cents(5_000), &stamp)
        .await?;
    println!(
        "✓ Sent {}: total {}, balance due {}",
        paid.invoice.invoice_number, paid.invoice.total_amount, paid.invoice.balance_due
    );

    // Trial balance
    println!();
    println!("Trial balance");
    println!("-------------");
    for account in engine.db().accounts().list(DEFAULT_TENANT_ID).await? {
        println!(
            "  {:<6} {:<22} {:>12}",
            account.account_number, account.account_name, account.current_balance
        );
    }

    println!();
    println!("✓ Seed complete");
    Ok(())
}
