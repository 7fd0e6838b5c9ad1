//! # Engine
//!
//! Every state-changing business operation, each run as one SQLite
//! transaction.
//!
//! ## Operation Shape
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    engine.complete_sale(id, &stamp)                     │
//! │                                                                         │
//! │  with_retry ───────────────────────────────────────────────────────┐   │
//! │  │  BEGIN                                                          │   │
//! │  │    load aggregates            (repository::*::fetch)            │   │
//! │  │    apply business rules       (tally-core, in memory)           │   │
//! │  │    write in ascending id      (versioned UPDATE / INSERT)       │   │
//! │  │    post generated journal     (postings + Transaction::post)    │   │
//! │  │  COMMIT                                                         │   │
//! │  │                                                                 │   │
//! │  │  Err(Conflict | Busy) ──► rolled back, wait, run again ─────────┘   │
//! │  │  Err(anything else)   ──► rolled back, returned                     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Dropping the `sqlx` transaction without `commit()` rolls it back, so every
//! early `?` return leaves the database untouched.
//!
//! Operations are split by area:
//!
//! - [`ledger`] - accounts and journal transactions
//! - [`stock`] - inventory records and direct stock moves
//! - [`sales`] - customers, sales, settlement, refunds
//! - [`purchasing`] - suppliers, purchase orders, goods receipts
//! - [`adjustments`] - stock counts and corrections
//! - [`invoicing`] - customer credit and receivable invoices

use std::future::Future;

use backoff::future::retry;
use sqlx::SqliteConnection;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::{DbError, DbResult};
use crate::pool::Database;
use crate::repository::sequence::{self, DocumentKind};
use crate::repository::{account, journal};
use tally_core::accounts::ChartOfAccounts;
use tally_core::adjustment::StockAdjustment;
use tally_core::customer::LoyaltyProgram;
use tally_core::inventory::{InventoryItem, StockMovement};
use tally_core::invoice::Invoice;
use tally_core::journal::{BalanceChange, Transaction};
use tally_core::postings::AccountMap;
use tally_core::purchase::{GoodsReceipt, PurchaseOrder};
use tally_core::sale::Sale;
use tally_core::{AuditStamp, DEFAULT_TENANT_ID};

pub mod adjustments;
pub mod invoicing;
pub mod ledger;
pub mod purchasing;
pub mod sales;
pub mod stock;

// =============================================================================
// Outcomes
// =============================================================================

/// A single inventory record after a stock move, with the movement logged.
#[derive(Debug, Clone, PartialEq)]
pub struct StockChange {
    pub item: InventoryItem,
    pub movement: StockMovement,
}

/// A posted transaction and the balances it moved.
#[derive(Debug, Clone, PartialEq)]
pub struct Posting {
    pub transaction: Transaction,
    pub changes: Vec<BalanceChange>,
}

/// The reversed original, its posted reversal, and the balances moved.
#[derive(Debug, Clone, PartialEq)]
pub struct Reversal {
    pub original: Transaction,
    pub reversal: Transaction,
    pub changes: Vec<BalanceChange>,
}

/// Both sides of a store-to-store transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct Transfer {
    pub number: String,
    pub source: StockChange,
    pub destination: StockChange,
}

/// A sale after completion or refund.
#[derive(Debug, Clone, PartialEq)]
pub struct SaleOutcome {
    pub sale: Sale,
    pub movements: Vec<StockMovement>,
    /// Present when an account map is configured.
    pub journal: Option<Transaction>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReceiptOutcome {
    pub receipt: GoodsReceipt,
    pub order: PurchaseOrder,
    pub movements: Vec<StockMovement>,
    pub journal: Option<Transaction>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdjustmentOutcome {
    pub adjustment: StockAdjustment,
    pub movements: Vec<StockMovement>,
    pub journal: Option<Transaction>,
}

/// An invoice after a step that touches the receivable.
#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceOutcome {
    pub invoice: Invoice,
    pub journal: Option<Transaction>,
}

// =============================================================================
// Engine
// =============================================================================

/// Runs business operations against one tenant.
///
/// Cloning is cheap: clones share the pool.
#[derive(Debug, Clone)]
pub struct Engine {
    db: Database,
    config: EngineConfig,
    loyalty: LoyaltyProgram,
    tenant_id: String,
}

impl Engine {
    /// Creates an engine for the default tenant. Fails on invalid config.
    pub fn new(db: Database, config: EngineConfig) -> DbResult<Self> {
        config.validate()?;
        let loyalty = config.loyalty.program()?;
        Ok(Engine {
            db,
            config,
            loyalty,
            tenant_id: DEFAULT_TENANT_ID.to_string(),
        })
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = tenant_id.into();
        self
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// Runs `op` until it succeeds, fails permanently, or the retry budget
    /// is spent. Each attempt is a fresh database transaction.
    pub(crate) async fn with_retry<T, F, Fut>(&self, operation: &'static str, mut op: F) -> DbResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DbResult<T>>,
    {
        retry(self.config.retry.policy(), || {
            let attempt = op();
            async move {
                attempt.await.map_err(|err| {
                    if err.is_retryable() {
                        warn!(operation, error = %err, "Retrying after contention");
                        backoff::Error::transient(err)
                    } else {
                        backoff::Error::permanent(err)
                    }
                })
            }
        })
        .await
    }

    /// Claims the next document number inside the caller's transaction.
    pub(crate) async fn next_number(&self, conn: &mut SqliteConnection, kind: DocumentKind) -> DbResult<String> {
        sequence::next_number(conn, &self.tenant_id, kind).await
    }

    /// Resolves the configured account numbers to ids, if posting is on.
    pub(crate) async fn posting_map(&self, conn: &mut SqliteConnection) -> DbResult<Option<AccountMap>> {
        let Some(numbers) = &self.config.accounts else {
            return Ok(None);
        };

        let mut chart = ChartOfAccounts::new();
        for number in [
            &numbers.cash,
            &numbers.accounts_receivable,
            &numbers.inventory,
            &numbers.accounts_payable,
            &numbers.sales_revenue,
            &numbers.sales_tax_payable,
            &numbers.cost_of_goods_sold,
            &numbers.inventory_shrinkage,
        ] {
            if let Some(found) = account::fetch_by_number(conn, &self.tenant_id, number).await? {
                chart.insert(found);
            }
        }

        Ok(Some(AccountMap::from_numbers(&chart, numbers)?))
    }

    /// Posts `txn` against the accounts it touches and writes their new
    /// balances in ascending id order. The transaction row itself is left
    /// to the caller.
    pub(crate) async fn apply_posting(
        &self,
        conn: &mut SqliteConnection,
        txn: &mut Transaction,
        stamp: &AuditStamp,
    ) -> DbResult<Vec<BalanceChange>> {
        let ids = txn.account_ids();
        let mut chart = account::fetch_chart(conn, &ids).await?;
        let changes = txn.post(&mut chart, stamp)?;

        for change in &changes {
            let acct = chart
                .get_mut(&change.account_id)
                .ok_or_else(|| DbError::Internal(format!("posted account {} not loaded", change.account_id)))?;
            account::update(conn, acct).await?;
        }
        Ok(changes)
    }

    /// Posts and stores a journal draft produced by a posting rule.
    pub(crate) async fn post_generated(
        &self,
        conn: &mut SqliteConnection,
        draft: Option<Transaction>,
        stamp: &AuditStamp,
    ) -> DbResult<Option<Transaction>> {
        let Some(mut txn) = draft else {
            return Ok(None);
        };

        self.apply_posting(conn, &mut txn, stamp).await?;
        journal::insert(conn, &txn).await?;

        debug!(id = %txn.id, number = %txn.transaction_number, total = %txn.total_debit, "Posted generated journal");
        Ok(Some(txn))
    }
}
