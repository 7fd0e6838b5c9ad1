//! # Repository Module
//!
//! SQL for every table, split per aggregate.
//!
//! ## Two Entry Points per Repository
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repository Layout                                    │
//! │                                                                         │
//! │  Read paths (callers)                 Write paths (Engine only)         │
//! │  ─────────────────────                ─────────────────────────         │
//! │  db.inventory().get(id)               inventory::fetch(&mut *tx, id)    │
//! │  db.inventory().list_low_stock(s)     inventory::insert(&mut *tx, &i)   │
//! │       │                               inventory::update(&mut *tx, &mut i)│
//! │       │ pool.acquire()                     │                            │
//! │       ▼                                    │ same BEGIN ... COMMIT       │
//! │  connection-level fn ◄─────────────────────┘                            │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every `update` is versioned: `WHERE id = ? AND version = ?`. Zero rows
//! affected means someone else wrote first and the call returns
//! [`DbError::Conflict`]. On success the in-memory `version` is bumped to
//! match the row.
//!
//! ## Available Repositories
//!
//! - [`AccountRepository`](account::AccountRepository) - Chart of accounts, balances
//! - [`JournalRepository`](journal::JournalRepository) - Transactions and entries
//! - [`InventoryRepository`](inventory::InventoryRepository) - Stock per store/product/variant
//! - [`MovementRepository`](movement::MovementRepository) - Append-only stock log
//! - [`SaleRepository`](sale::SaleRepository) - Sales, lines, payments
//! - [`PurchaseRepository`](purchase::PurchaseRepository) - Purchase orders, goods receipts
//! - [`AdjustmentRepository`](adjustment::AdjustmentRepository) - Stock adjustments
//! - [`PartyRepository`](party::PartyRepository) - Customers and suppliers
//! - [`InvoiceRepository`](invoice::InvoiceRepository) - Customer invoices
//! - [`sequence`] - Document numbers

use sqlx::sqlite::SqliteQueryResult;
use sqlx::SqliteConnection;

use crate::error::{DbError, DbResult};

pub mod account;
pub mod adjustment;
pub mod inventory;
pub mod invoice;
pub mod journal;
pub mod movement;
pub mod party;
pub mod purchase;
pub mod sale;
pub mod sequence;

/// Turns a zero-row versioned update into a conflict.
pub(crate) fn ensure_updated(result: SqliteQueryResult, entity: &'static str, id: &str) -> DbResult<()> {
    if result.rows_affected() == 0 {
        return Err(DbError::conflict(entity, id));
    }
    Ok(())
}

/// Deletes child rows of `parent_id` whose id is not in `keep`.
///
/// Used before upserting a document's lines, so removed lines disappear and
/// unique keys on the remaining lines never collide with stale rows.
pub(crate) async fn prune_children<'a>(
    conn: &mut SqliteConnection,
    table: &'static str,
    parent_column: &'static str,
    parent_id: &str,
    keep: impl IntoIterator<Item = &'a str>,
) -> DbResult<()> {
    let keep: Vec<&str> = keep.into_iter().collect();

    let select = format!("SELECT id FROM {} WHERE {} = ?", table, parent_column);
    let existing: Vec<String> = sqlx::query_scalar(&select)
        .bind(parent_id)
        .fetch_all(&mut *conn)
        .await?;

    let delete = format!("DELETE FROM {} WHERE id = ?", table);
    for id in existing.iter().filter(|id| !keep.contains(&id.as_str())) {
        sqlx::query(&delete).bind(id).execute(&mut *conn).await?;
    }
    Ok(())
}
