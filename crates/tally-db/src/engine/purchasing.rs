//! # Purchasing Operations
//!
//! Suppliers, purchase orders and goods receipts.
//!
//! ```text
//! create_purchase_order ─► add_po_item* ─► submit_po ─► approve_po ─► send_po
//!                                                                       │
//!        draft_goods_receipt ─► complete_goods_receipt  (repeatable) ◄──┘
//!                                        │
//!                                        ▼ all lines received
//!                                   complete_po ─► record_po_payment*
//! ```
//!
//! Completing a receipt raises on-hand at the received cost, blends each
//! item's average cost and posts Inventory / Accounts Payable when an
//! account map is configured.

use std::collections::BTreeMap;

use sqlx::SqliteConnection;
use tracing::info;

use super::{Engine, ReceiptOutcome};
use crate::error::{DbError, DbResult};
use crate::repository::sequence::DocumentKind;
use crate::repository::{inventory, movement, party, purchase};
use tally_core::customer::Supplier;
use tally_core::inventory::InventoryItem;
use tally_core::postings;
use tally_core::purchase::{GoodsReceipt, PurchaseOrder, PurchaseOrderStatus, ReceiptLine};
use tally_core::{AuditStamp, CoreError, CoreResult, Money, Quantity, UnitCost};

impl Engine {
    // =========================================================================
    // Suppliers
    // =========================================================================

    pub async fn create_supplier(&self, supplier: Supplier) -> DbResult<Supplier> {
        self.with_retry("create_supplier", || self.create_supplier_once(supplier.clone()))
            .await
    }

    async fn create_supplier_once(&self, mut supplier: Supplier) -> DbResult<Supplier> {
        supplier.validate()?;
        supplier.tenant_id = self.tenant_id.clone();

        let mut tx = self.db.pool().begin().await?;
        party::insert_supplier(&mut *tx, &supplier).await?;
        tx.commit().await?;

        info!(id = %supplier.id, number = %supplier.supplier_number, "Supplier created");
        Ok(supplier)
    }

    // =========================================================================
    // Purchase Orders
    // =========================================================================

    /// Opens a draft order with the store's tax policy. Blocked suppliers
    /// cannot be ordered from.
    pub async fn create_purchase_order(
        &self,
        store_id: &str,
        supplier_id: &str,
        stamp: &AuditStamp,
    ) -> DbResult<PurchaseOrder> {
        self.with_retry("create_purchase_order", || {
            self.create_purchase_order_once(store_id, supplier_id, stamp)
        })
        .await
    }

    async fn create_purchase_order_once(
        &self,
        store_id: &str,
        supplier_id: &str,
        stamp: &AuditStamp,
    ) -> DbResult<PurchaseOrder> {
        let mut tx = self.db.pool().begin().await?;

        let supplier = load_supplier(&mut *tx, supplier_id).await?;
        if supplier.is_blocked {
            return Err(CoreError::InvalidStatus {
                entity: "Supplier",
                id: supplier.supplier_number.clone(),
                status: "blocked".to_string(),
                operation: "order from",
            }
            .into());
        }

        let policy = self.config.store_policy(store_id);
        let number = self.next_number(&mut *tx, DocumentKind::PurchaseOrder).await?;
        let mut po = PurchaseOrder::new(&self.tenant_id, number, store_id, supplier_id, stamp.at);
        po.set_tax(policy.tax_rate, policy.tax_inclusive)?;

        purchase::insert_order(&mut *tx, &po).await?;
        tx.commit().await?;

        info!(id = %po.id, number = %po.po_number, supplier = %supplier.supplier_number, "Purchase order opened");
        Ok(po)
    }

    pub async fn add_po_item(
        &self,
        po_id: &str,
        product_id: &str,
        variant_id: Option<&str>,
        quantity: Quantity,
        unit_cost: UnitCost,
        stamp: &AuditStamp,
    ) -> DbResult<PurchaseOrder> {
        self.with_retry("add_po_item", || {
            self.edit_order(po_id, stamp, move |po| {
                po.add_item(product_id, variant_id, quantity, unit_cost).map(|_| ())
            })
        })
        .await
    }

    pub async fn remove_po_item(&self, po_id: &str, line_id: &str, stamp: &AuditStamp) -> DbResult<PurchaseOrder> {
        self.with_retry("remove_po_item", || {
            self.edit_order(po_id, stamp, move |po| po.remove_item(line_id).map(|_| ()))
        })
        .await
    }

    /// Sets the order-level discount and shipping charge.
    pub async fn set_po_charges(
        &self,
        po_id: &str,
        discount: Money,
        shipping: Money,
        stamp: &AuditStamp,
    ) -> DbResult<PurchaseOrder> {
        self.with_retry("set_po_charges", || {
            self.edit_order(po_id, stamp, move |po| {
                po.set_discount(discount)?;
                po.set_shipping(shipping)
            })
        })
        .await
    }

    pub async fn submit_po(&self, po_id: &str, stamp: &AuditStamp) -> DbResult<PurchaseOrder> {
        self.with_retry("submit_po", || self.edit_order(po_id, stamp, move |po| po.submit(stamp.at)))
            .await
    }

    pub async fn approve_po(&self, po_id: &str, stamp: &AuditStamp) -> DbResult<PurchaseOrder> {
        self.with_retry("approve_po", || self.edit_order(po_id, stamp, move |po| po.approve(stamp)))
            .await
    }

    pub async fn send_po(&self, po_id: &str, stamp: &AuditStamp) -> DbResult<PurchaseOrder> {
        self.with_retry("send_po", || {
            self.edit_order(po_id, stamp, move |po| po.send_to_supplier(stamp.at))
        })
        .await
    }

    pub async fn cancel_po(&self, po_id: &str, reason: Option<&str>, stamp: &AuditStamp) -> DbResult<PurchaseOrder> {
        self.with_retry("cancel_po", || {
            self.edit_order(po_id, stamp, move |po| po.cancel(reason.map(str::to_string), stamp.at))
        })
        .await
    }

    async fn edit_order<F>(&self, po_id: &str, stamp: &AuditStamp, edit: F) -> DbResult<PurchaseOrder>
    where
        F: FnOnce(&mut PurchaseOrder) -> CoreResult<()>,
    {
        let mut tx = self.db.pool().begin().await?;

        let mut po = load_order(&mut *tx, po_id).await?;
        let before = po.status;
        edit(&mut po)?;
        po.updated_at = stamp.at;

        purchase::update_order(&mut *tx, &mut po).await?;
        tx.commit().await?;

        if po.status != before {
            info!(id = %po.id, number = %po.po_number, from = %before, to = %po.status, actor = %stamp.actor, "Purchase order moved");
        }
        Ok(po)
    }

    /// Closes a fully received order and books it on the supplier's account.
    pub async fn complete_po(&self, po_id: &str, stamp: &AuditStamp) -> DbResult<PurchaseOrder> {
        self.with_retry("complete_po", || async move {
            let mut tx = self.db.pool().begin().await?;

            let mut po = load_order(&mut *tx, po_id).await?;
            let mut supplier = load_supplier(&mut *tx, &po.supplier_id).await?;
            po.complete(&mut supplier, stamp.at)?;

            purchase::update_order(&mut *tx, &mut po).await?;
            party::update_supplier(&mut *tx, &mut supplier).await?;
            tx.commit().await?;

            info!(id = %po.id, number = %po.po_number, total = %po.total_amount, due = %po.amount_due, "Purchase order completed");
            Ok(po)
        })
        .await
    }

    /// Records a payment to the supplier. Once the order is completed its
    /// balance sits on the supplier, so the supplier is paid down too.
    pub async fn record_po_payment(&self, po_id: &str, amount: Money, stamp: &AuditStamp) -> DbResult<PurchaseOrder> {
        self.with_retry("record_po_payment", || async move {
            let mut tx = self.db.pool().begin().await?;

            let mut po = load_order(&mut *tx, po_id).await?;
            po.record_payment(amount, stamp.at)?;

            if po.status == PurchaseOrderStatus::Completed {
                let mut supplier = load_supplier(&mut *tx, &po.supplier_id).await?;
                supplier.record_payment(amount, stamp.at);
                party::update_supplier(&mut *tx, &mut supplier).await?;
            }

            purchase::update_order(&mut *tx, &mut po).await?;
            tx.commit().await?;

            info!(id = %po.id, number = %po.po_number, amount = %amount, due = %po.amount_due, "Supplier payment recorded");
            Ok(po)
        })
        .await
    }

    // =========================================================================
    // Goods Receipts
    // =========================================================================

    /// Drafts a receipt for some or all of an order's outstanding lines.
    pub async fn draft_goods_receipt(
        &self,
        po_id: &str,
        lines: &[ReceiptLine],
        stamp: &AuditStamp,
    ) -> DbResult<GoodsReceipt> {
        self.with_retry("draft_goods_receipt", || async move {
            let mut tx = self.db.pool().begin().await?;

            let po = load_order(&mut *tx, po_id).await?;
            let number = self.next_number(&mut *tx, DocumentKind::GoodsReceipt).await?;
            let receipt = GoodsReceipt::draft(&po, number, lines, stamp.at)?;

            purchase::insert_receipt(&mut *tx, &receipt).await?;
            tx.commit().await?;

            info!(id = %receipt.id, number = %receipt.receipt_number, order = %po.po_number, "Goods receipt drafted");
            Ok(receipt)
        })
        .await
    }

    /// Books a drafted receipt into stock, the order and the ledger.
    pub async fn complete_goods_receipt(&self, receipt_id: &str, stamp: &AuditStamp) -> DbResult<ReceiptOutcome> {
        self.with_retry("complete_goods_receipt", || {
            self.complete_goods_receipt_once(receipt_id, stamp)
        })
        .await
    }

    async fn complete_goods_receipt_once(&self, receipt_id: &str, stamp: &AuditStamp) -> DbResult<ReceiptOutcome> {
        let mut tx = self.db.pool().begin().await?;

        let mut receipt = purchase::fetch_receipt(&mut *tx, receipt_id)
            .await?
            .ok_or_else(|| DbError::not_found("GoodsReceipt", receipt_id))?;
        let mut po = load_order(&mut *tx, &receipt.purchase_order_id).await?;
        let receipts = receipt.complete(&mut po, stamp)?;

        // one stock record per product/variant at the receiving store
        let mut keys: BTreeMap<(String, Option<String>), String> = BTreeMap::new();
        let mut items: BTreeMap<String, (InventoryItem, bool)> = BTreeMap::new();
        for line in &receipts {
            let key = (line.product_id.clone(), line.variant_id.clone());
            if keys.contains_key(&key) {
                continue;
            }
            let found = inventory::find(
                &mut *tx,
                &self.tenant_id,
                &line.store_id,
                &line.product_id,
                line.variant_id.as_deref(),
            )
            .await?;
            let (item, created) = match found {
                Some(item) => (item, false),
                None => (
                    InventoryItem::new(
                        self.tenant_id.clone(),
                        line.store_id.clone(),
                        line.product_id.clone(),
                        line.variant_id.clone(),
                        stamp.at,
                    ),
                    true,
                ),
            };
            keys.insert(key, item.id.clone());
            items.insert(item.id.clone(), (item, created));
        }

        let mut plan: Vec<(&String, _)> = Vec::with_capacity(receipts.len());
        for line in &receipts {
            let item_id = keys
                .get(&(line.product_id.clone(), line.variant_id.clone()))
                .ok_or_else(|| DbError::Internal(format!("no stock record for {}", line.product_id)))?;
            plan.push((item_id, line));
        }
        plan.sort_by(|a, b| a.0.cmp(b.0));

        let reference = receipt.reference();
        let mut movements = Vec::with_capacity(plan.len());
        for (item_id, line) in plan {
            let (item, _) = items
                .get_mut(item_id.as_str())
                .ok_or_else(|| DbError::Internal(format!("inventory item {} not resolved", item_id)))?;
            let received = item
                .receive(line.quantity, line.unit_cost, stamp.at)?
                .with_reference(&reference)
                .with_actor(stamp.actor.clone());
            movements.push(received);
        }

        for (item, created) in items.values_mut() {
            if *created {
                inventory::insert(&mut *tx, item).await?;
            } else {
                inventory::update(&mut *tx, item).await?;
            }
        }
        for received in &movements {
            movement::insert(&mut *tx, received).await?;
        }

        purchase::update_order(&mut *tx, &mut po).await?;
        purchase::update_receipt(&mut *tx, &mut receipt).await?;

        let journal = match self.posting_map(&mut *tx).await? {
            Some(map) => {
                let number = self.next_number(&mut *tx, DocumentKind::Journal).await?;
                let draft = postings::goods_receipt(&receipt, &map, number, stamp)?;
                self.post_generated(&mut *tx, draft, stamp).await?
            }
            None => None,
        };

        tx.commit().await?;

        info!(
            id = %receipt.id,
            number = %receipt.receipt_number,
            order = %po.po_number,
            order_status = %po.status,
            value = %receipt.total_value(),
            "Goods receipt completed"
        );
        Ok(ReceiptOutcome {
            receipt,
            order: po,
            movements,
            journal,
        })
    }
}

async fn load_order(conn: &mut SqliteConnection, id: &str) -> DbResult<PurchaseOrder> {
    purchase::fetch_order(conn, id)
        .await?
        .ok_or_else(|| DbError::not_found("PurchaseOrder", id))
}

async fn load_supplier(conn: &mut SqliteConnection, id: &str) -> DbResult<Supplier> {
    party::fetch_supplier(conn, id)
        .await?
        .ok_or_else(|| DbError::not_found("Supplier", id))
}
