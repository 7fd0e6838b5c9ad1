//! # Adjustment Operations
//!
//! Counted corrections. A draft collects counted quantities, approval locks
//! it, and applying sets each item's on-hand to the count in one
//! transaction. The net value change posts to Inventory against Inventory
//! Shrinkage when an account map is configured.

use std::collections::BTreeMap;

use sqlx::SqliteConnection;
use tracing::info;

use super::stock::load_item;
use super::{AdjustmentOutcome, Engine};
use crate::error::{DbError, DbResult};
use crate::repository::sequence::DocumentKind;
use crate::repository::{adjustment, inventory, movement};
use tally_core::adjustment::StockAdjustment;
use tally_core::postings;
use tally_core::{AuditStamp, Quantity};

impl Engine {
    pub async fn create_adjustment(&self, store_id: &str, reason: &str, stamp: &AuditStamp) -> DbResult<StockAdjustment> {
        self.with_retry("create_adjustment", || async move {
            let mut tx = self.db.pool().begin().await?;

            let number = self.next_number(&mut *tx, DocumentKind::Adjustment).await?;
            let adj = StockAdjustment::new(&self.tenant_id, number, store_id, reason, stamp.at)?;

            adjustment::insert(&mut *tx, &adj).await?;
            tx.commit().await?;

            info!(id = %adj.id, number = %adj.adjustment_number, store = %adj.store_id, "Adjustment opened");
            Ok(adj)
        })
        .await
    }

    /// Records a counted quantity for one item. Counting the same item again
    /// replaces the earlier line.
    pub async fn add_adjustment_item(
        &self,
        adjustment_id: &str,
        item_id: &str,
        new_quantity: Quantity,
        reason: Option<&str>,
        stamp: &AuditStamp,
    ) -> DbResult<StockAdjustment> {
        self.with_retry("add_adjustment_item", || async move {
            let mut tx = self.db.pool().begin().await?;

            let mut adj = load_adjustment(&mut *tx, adjustment_id).await?;
            let item = load_item(&mut *tx, item_id).await?;
            adj.add_item(&item, new_quantity, reason.map(str::to_string))?;
            adj.updated_at = stamp.at;

            adjustment::update(&mut *tx, &mut adj).await?;
            tx.commit().await?;
            Ok(adj)
        })
        .await
    }

    pub async fn approve_adjustment(&self, adjustment_id: &str, stamp: &AuditStamp) -> DbResult<StockAdjustment> {
        self.with_retry("approve_adjustment", || async move {
            let mut tx = self.db.pool().begin().await?;

            let mut adj = load_adjustment(&mut *tx, adjustment_id).await?;
            adj.approve(stamp)?;

            adjustment::update(&mut *tx, &mut adj).await?;
            tx.commit().await?;

            info!(id = %adj.id, number = %adj.adjustment_number, approver = %stamp.actor, "Adjustment approved");
            Ok(adj)
        })
        .await
    }

    /// Applies an approved adjustment. Any failing line leaves every item,
    /// the adjustment and the ledger unchanged.
    pub async fn apply_adjustment(&self, adjustment_id: &str, stamp: &AuditStamp) -> DbResult<AdjustmentOutcome> {
        self.with_retry("apply_adjustment", || self.apply_adjustment_once(adjustment_id, stamp))
            .await
    }

    async fn apply_adjustment_once(&self, adjustment_id: &str, stamp: &AuditStamp) -> DbResult<AdjustmentOutcome> {
        let mut tx = self.db.pool().begin().await?;

        let mut adj = load_adjustment(&mut *tx, adjustment_id).await?;
        let mut items = BTreeMap::new();
        for line in &adj.items {
            if !items.contains_key(&line.inventory_item_id) {
                let item = load_item(&mut *tx, &line.inventory_item_id).await?;
                items.insert(item.id.clone(), item);
            }
        }

        let movements = adj.apply(stamp, &mut items)?;

        for item in items.values_mut() {
            inventory::update(&mut *tx, item).await?;
        }
        for applied in &movements {
            movement::insert(&mut *tx, applied).await?;
        }
        adjustment::update(&mut *tx, &mut adj).await?;

        let journal = match self.posting_map(&mut *tx).await? {
            Some(map) => {
                let number = self.next_number(&mut *tx, DocumentKind::Journal).await?;
                let draft = postings::stock_adjustment(&adj, &movements, &map, number, stamp)?;
                self.post_generated(&mut *tx, draft, stamp).await?
            }
            None => None,
        };

        tx.commit().await?;

        info!(
            id = %adj.id,
            number = %adj.adjustment_number,
            lines = movements.len(),
            impact = %adj.total_value_impact(),
            "Adjustment applied"
        );
        Ok(AdjustmentOutcome {
            adjustment: adj,
            movements,
            journal,
        })
    }
}

async fn load_adjustment(conn: &mut SqliteConnection, id: &str) -> DbResult<StockAdjustment> {
    adjustment::fetch(conn, id)
        .await?
        .ok_or_else(|| DbError::not_found("StockAdjustment", id))
}
