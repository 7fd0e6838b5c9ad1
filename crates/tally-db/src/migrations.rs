//! # Database Migrations
//!
//! Embedded SQL migrations for the ledger and stock schema.
//!
//! ## Schema Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      migrations/sqlite                                  │
//! │                                                                         │
//! │  001_ledger.sql     accounts, transactions, transaction_entries,       │
//! │                     document_sequences                                 │
//! │  002_inventory.sql  inventory_items, stock_movements                   │
//! │  003_documents.sql  customers, suppliers, sales (+ items, payments),   │
//! │                     purchase_orders (+ items), goods_receipts          │
//! │                     (+ items), stock_adjustments (+ items)             │
//! │  004_invoices.sql   customer credit columns, invoices (+ items)        │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Adding New Migrations
//!
//! 1. Create a new file in `migrations/sqlite/` with the next sequence number
//! 2. Name format: `NNN_description.sql`
//! 3. **NEVER** modify existing migrations - always add new ones

use sqlx::SqlitePool;
use tracing::info;

use crate::error::DbResult;

/// Embedded at compile time from `migrations/sqlite`.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations/sqlite");

/// Runs all pending database migrations.
///
/// Each migration runs in its own transaction and is recorded in
/// `_sqlx_migrations`, so calling this again is a no-op.
pub async fn run_migrations(pool: &SqlitePool) -> DbResult<()> {
    info!("Checking for pending migrations");

    MIGRATOR.run(pool).await?;

    info!("All migrations applied successfully");
    Ok(())
}

/// Returns `(total_migrations, applied_migrations)`.
pub async fn migration_status(pool: &SqlitePool) -> DbResult<(usize, usize)> {
    let total = MIGRATOR.migrations.len();

    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations")
        .fetch_one(pool)
        .await
        .unwrap_or(0);

    Ok((total, applied as usize))
}
