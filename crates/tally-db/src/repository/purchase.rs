//! # Purchase Repository
//!
//! Purchase orders and the goods receipts booked against them.
//!
//! ```text
//! purchase_orders ──< purchase_order_items
//!        │                    ▲
//!        └──< goods_receipts ──< goods_receipt_items (po_item_id)
//! ```
//!
//! Receipt lines reference order lines without cascade: an order line that
//! has been received against can never be removed.

use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use crate::repository::{ensure_updated, prune_children};
use tally_core::purchase::{GoodsReceipt, GoodsReceiptItem, PurchaseOrder, PurchaseOrderItem};

/// Repository for purchase order and receipt reads.
#[derive(Debug, Clone)]
pub struct PurchaseRepository {
    pool: SqlitePool,
}

impl PurchaseRepository {
    pub fn new(pool: SqlitePool) -> Self {
        PurchaseRepository { pool }
    }

    /// Gets a purchase order with its lines.
    pub async fn get_order(&self, id: &str) -> DbResult<Option<PurchaseOrder>> {
        let mut conn = self.pool.acquire().await?;
        fetch_order(&mut conn, id).await
    }

    /// Gets a goods receipt with its lines.
    pub async fn get_receipt(&self, id: &str) -> DbResult<Option<GoodsReceipt>> {
        let mut conn = self.pool.acquire().await?;
        fetch_receipt(&mut conn, id).await
    }

    /// Receipts booked against an order, in creation order.
    pub async fn list_receipts(&self, purchase_order_id: &str) -> DbResult<Vec<GoodsReceipt>> {
        let mut conn = self.pool.acquire().await?;
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT id FROM goods_receipts WHERE purchase_order_id = ?1 ORDER BY created_at, receipt_number",
        )
        .bind(purchase_order_id)
        .fetch_all(&mut *conn)
        .await?;

        let mut receipts = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(receipt) = fetch_receipt(&mut conn, &id).await? {
                receipts.push(receipt);
            }
        }
        Ok(receipts)
    }
}

// =============================================================================
// Purchase Orders
// =============================================================================

pub(crate) async fn fetch_order(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<PurchaseOrder>> {
    let po = sqlx::query_as::<_, PurchaseOrder>("SELECT * FROM purchase_orders WHERE id = ?1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    let Some(mut po) = po else {
        return Ok(None);
    };

    po.items = sqlx::query_as::<_, PurchaseOrderItem>(
        "SELECT * FROM purchase_order_items WHERE purchase_order_id = ?1 ORDER BY line_number",
    )
    .bind(id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(Some(po))
}

pub(crate) async fn insert_order(conn: &mut SqliteConnection, po: &PurchaseOrder) -> DbResult<()> {
    debug!(id = %po.id, number = %po.po_number, "Inserting purchase order");

    sqlx::query(
        r#"
        INSERT INTO purchase_orders (
            id, tenant_id, po_number, store_id, supplier_id, status,
            order_date, expected_delivery_date,
            subtotal, discount_value, discount_amount,
            tax_rate, tax_inclusive, tax_amount, shipping_cost, total_amount,
            amount_paid, amount_due,
            approved_by, approved_at, sent_at, completed_at,
            cancellation_reason, notes, created_at, updated_at, version
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5, ?6,
            ?7, ?8,
            ?9, ?10, ?11,
            ?12, ?13, ?14, ?15, ?16,
            ?17, ?18,
            ?19, ?20, ?21, ?22,
            ?23, ?24, ?25, ?26, ?27
        )
        "#,
    )
    .bind(&po.id)
    .bind(&po.tenant_id)
    .bind(&po.po_number)
    .bind(&po.store_id)
    .bind(&po.supplier_id)
    .bind(po.status)
    .bind(po.order_date)
    .bind(po.expected_delivery_date)
    .bind(po.subtotal)
    .bind(po.discount_value)
    .bind(po.discount_amount)
    .bind(po.tax_rate)
    .bind(po.tax_inclusive)
    .bind(po.tax_amount)
    .bind(po.shipping_cost)
    .bind(po.total_amount)
    .bind(po.amount_paid)
    .bind(po.amount_due)
    .bind(&po.approved_by)
    .bind(po.approved_at)
    .bind(po.sent_at)
    .bind(po.completed_at)
    .bind(&po.cancellation_reason)
    .bind(&po.notes)
    .bind(po.created_at)
    .bind(po.updated_at)
    .bind(po.version)
    .execute(&mut *conn)
    .await?;

    save_order_items(conn, po).await
}

pub(crate) async fn update_order(conn: &mut SqliteConnection, po: &mut PurchaseOrder) -> DbResult<()> {
    debug!(id = %po.id, status = %po.status, "Updating purchase order");

    let result = sqlx::query(
        r#"
        UPDATE purchase_orders SET
            status = ?1,
            expected_delivery_date = ?2,
            subtotal = ?3,
            discount_value = ?4,
            discount_amount = ?5,
            tax_rate = ?6,
            tax_inclusive = ?7,
            tax_amount = ?8,
            shipping_cost = ?9,
            total_amount = ?10,
            amount_paid = ?11,
            amount_due = ?12,
            approved_by = ?13,
            approved_at = ?14,
            sent_at = ?15,
            completed_at = ?16,
            cancellation_reason = ?17,
            notes = ?18,
            updated_at = ?19,
            version = version + 1
        WHERE id = ?20 AND version = ?21
        "#,
    )
    .bind(po.status)
    .bind(po.expected_delivery_date)
    .bind(po.subtotal)
    .bind(po.discount_value)
    .bind(po.discount_amount)
    .bind(po.tax_rate)
    .bind(po.tax_inclusive)
    .bind(po.tax_amount)
    .bind(po.shipping_cost)
    .bind(po.total_amount)
    .bind(po.amount_paid)
    .bind(po.amount_due)
    .bind(&po.approved_by)
    .bind(po.approved_at)
    .bind(po.sent_at)
    .bind(po.completed_at)
    .bind(&po.cancellation_reason)
    .bind(&po.notes)
    .bind(po.updated_at)
    .bind(&po.id)
    .bind(po.version)
    .execute(&mut *conn)
    .await?;

    ensure_updated(result, "PurchaseOrder", &po.id)?;
    po.version += 1;

    save_order_items(conn, po).await
}

async fn save_order_items(conn: &mut SqliteConnection, po: &PurchaseOrder) -> DbResult<()> {
    prune_children(
        conn,
        "purchase_order_items",
        "purchase_order_id",
        &po.id,
        po.items.iter().map(|i| i.id.as_str()),
    )
    .await?;

    for item in &po.items {
        sqlx::query(
            r#"
            INSERT INTO purchase_order_items (
                id, purchase_order_id, line_number, product_id, variant_id,
                quantity_ordered, quantity_received, unit_cost, line_total
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT (id) DO UPDATE SET
                line_number = excluded.line_number,
                quantity_ordered = excluded.quantity_ordered,
                quantity_received = excluded.quantity_received,
                unit_cost = excluded.unit_cost,
                line_total = excluded.line_total
            "#,
        )
        .bind(&item.id)
        .bind(&item.purchase_order_id)
        .bind(item.line_number)
        .bind(&item.product_id)
        .bind(&item.variant_id)
        .bind(item.quantity_ordered)
        .bind(item.quantity_received)
        .bind(item.unit_cost)
        .bind(item.line_total)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

// =============================================================================
// Goods Receipts
// =============================================================================

pub(crate) async fn fetch_receipt(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<GoodsReceipt>> {
    let receipt = sqlx::query_as::<_, GoodsReceipt>("SELECT * FROM goods_receipts WHERE id = ?1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    let Some(mut receipt) = receipt else {
        return Ok(None);
    };

    receipt.items = sqlx::query_as::<_, GoodsReceiptItem>(
        "SELECT * FROM goods_receipt_items WHERE goods_receipt_id = ?1 ORDER BY line_number",
    )
    .bind(id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(Some(receipt))
}

pub(crate) async fn insert_receipt(conn: &mut SqliteConnection, receipt: &GoodsReceipt) -> DbResult<()> {
    debug!(id = %receipt.id, number = %receipt.receipt_number, po = %receipt.purchase_order_id, "Inserting goods receipt");

    sqlx::query(
        r#"
        INSERT INTO goods_receipts (
            id, tenant_id, receipt_number, purchase_order_id, store_id, status,
            received_by, received_at, notes, created_at, updated_at, version
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        "#,
    )
    .bind(&receipt.id)
    .bind(&receipt.tenant_id)
    .bind(&receipt.receipt_number)
    .bind(&receipt.purchase_order_id)
    .bind(&receipt.store_id)
    .bind(receipt.status)
    .bind(&receipt.received_by)
    .bind(receipt.received_at)
    .bind(&receipt.notes)
    .bind(receipt.created_at)
    .bind(receipt.updated_at)
    .bind(receipt.version)
    .execute(&mut *conn)
    .await?;

    for item in &receipt.items {
        sqlx::query(
            r#"
            INSERT INTO goods_receipt_items (
                id, goods_receipt_id, line_number, po_item_id, product_id, variant_id,
                quantity_received, unit_cost
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&item.id)
        .bind(&item.goods_receipt_id)
        .bind(item.line_number)
        .bind(&item.po_item_id)
        .bind(&item.product_id)
        .bind(&item.variant_id)
        .bind(item.quantity_received)
        .bind(item.unit_cost)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Receipt lines are fixed at draft time; only the header changes.
pub(crate) async fn update_receipt(conn: &mut SqliteConnection, receipt: &mut GoodsReceipt) -> DbResult<()> {
    debug!(id = %receipt.id, status = %receipt.status, "Updating goods receipt");

    let result = sqlx::query(
        r#"
        UPDATE goods_receipts SET
            status = ?1,
            received_by = ?2,
            received_at = ?3,
            notes = ?4,
            updated_at = ?5,
            version = version + 1
        WHERE id = ?6 AND version = ?7
        "#,
    )
    .bind(receipt.status)
    .bind(&receipt.received_by)
    .bind(receipt.received_at)
    .bind(&receipt.notes)
    .bind(receipt.updated_at)
    .bind(&receipt.id)
    .bind(receipt.version)
    .execute(&mut *conn)
    .await?;

    ensure_updated(result, "GoodsReceipt", &receipt.id)?;
    receipt.version += 1;
    Ok(())
}
