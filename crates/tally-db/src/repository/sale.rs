//! # Sale Repository
//!
//! Database operations for sales, their lines and payments.
//!
//! ## Sale Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sale Lifecycle                                    │
//! │                                                                         │
//! │  1. CREATE DRAFT                                                       │
//! │     └── insert() → sales row + no lines                                │
//! │                                                                         │
//! │  2. EDIT CART                                                          │
//! │     └── update() → header (versioned) + lines/payments synced          │
//! │                                                                         │
//! │  3. COMPLETE / CANCEL / REFUND                                         │
//! │     └── update() inside the same transaction that moves stock,         │
//! │         updates the customer and posts the journal                     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use crate::repository::{ensure_updated, prune_children};
use tally_core::sale::{Sale, SaleItem, SalePayment};

/// Repository for sale reads.
#[derive(Debug, Clone)]
pub struct SaleRepository {
    pool: SqlitePool,
}

impl SaleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        SaleRepository { pool }
    }

    /// Gets a sale with lines and payments.
    pub async fn get(&self, id: &str) -> DbResult<Option<Sale>> {
        let mut conn = self.pool.acquire().await?;
        fetch(&mut conn, id).await
    }

    pub async fn get_by_number(&self, tenant_id: &str, number: &str) -> DbResult<Option<Sale>> {
        let mut conn = self.pool.acquire().await?;
        let id: Option<String> = sqlx::query_scalar("SELECT id FROM sales WHERE tenant_id = ?1 AND sale_number = ?2")
            .bind(tenant_id)
            .bind(number)
            .fetch_optional(&mut *conn)
            .await?;

        match id {
            Some(id) => fetch(&mut conn, &id).await,
            None => Ok(None),
        }
    }

    /// A customer's sales, newest first. Lines are not loaded.
    pub async fn list_for_customer(&self, customer_id: &str) -> DbResult<Vec<Sale>> {
        let sales = sqlx::query_as::<_, Sale>(
            "SELECT * FROM sales WHERE customer_id = ?1 ORDER BY sale_date DESC",
        )
        .bind(customer_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(sales)
    }
}

// =============================================================================
// Connection-level operations
// =============================================================================

pub(crate) async fn fetch(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Sale>> {
    let sale = sqlx::query_as::<_, Sale>("SELECT * FROM sales WHERE id = ?1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    let Some(mut sale) = sale else {
        return Ok(None);
    };

    sale.items = sqlx::query_as::<_, SaleItem>("SELECT * FROM sale_items WHERE sale_id = ?1 ORDER BY line_number")
        .bind(id)
        .fetch_all(&mut *conn)
        .await?;
    sale.payments = sqlx::query_as::<_, SalePayment>(
        "SELECT * FROM sale_payments WHERE sale_id = ?1 ORDER BY created_at, rowid",
    )
    .bind(id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(Some(sale))
}

pub(crate) async fn insert(conn: &mut SqliteConnection, sale: &Sale) -> DbResult<()> {
    debug!(id = %sale.id, number = %sale.sale_number, "Inserting sale");

    sqlx::query(
        r#"
        INSERT INTO sales (
            id, tenant_id, sale_number, store_id, customer_id, cashier_id, status,
            subtotal, discount_type, discount_value, discount_amount,
            tax_rate, tax_inclusive, tax_amount, total_amount,
            amount_paid, amount_due, change_amount,
            loyalty_points_earned, loyalty_points_redeemed,
            refunded_amount, refund_reason, cancellation_reason, notes,
            sale_date, completed_at, created_at, updated_at, version
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5, ?6, ?7,
            ?8, ?9, ?10, ?11,
            ?12, ?13, ?14, ?15,
            ?16, ?17, ?18,
            ?19, ?20,
            ?21, ?22, ?23, ?24,
            ?25, ?26, ?27, ?28, ?29
        )
        "#,
    )
    .bind(&sale.id)
    .bind(&sale.tenant_id)
    .bind(&sale.sale_number)
    .bind(&sale.store_id)
    .bind(&sale.customer_id)
    .bind(&sale.cashier_id)
    .bind(sale.status)
    .bind(sale.subtotal)
    .bind(sale.discount_type)
    .bind(sale.discount_value)
    .bind(sale.discount_amount)
    .bind(sale.tax_rate)
    .bind(sale.tax_inclusive)
    .bind(sale.tax_amount)
    .bind(sale.total_amount)
    .bind(sale.amount_paid)
    .bind(sale.amount_due)
    .bind(sale.change_amount)
    .bind(sale.loyalty_points_earned)
    .bind(sale.loyalty_points_redeemed)
    .bind(sale.refunded_amount)
    .bind(&sale.refund_reason)
    .bind(&sale.cancellation_reason)
    .bind(&sale.notes)
    .bind(sale.sale_date)
    .bind(sale.completed_at)
    .bind(sale.created_at)
    .bind(sale.updated_at)
    .bind(sale.version)
    .execute(&mut *conn)
    .await?;

    save_children(conn, sale).await
}

/// Versioned header update plus line and payment sync.
pub(crate) async fn update(conn: &mut SqliteConnection, sale: &mut Sale) -> DbResult<()> {
    debug!(id = %sale.id, status = %sale.status, total = %sale.total_amount, "Updating sale");

    let result = sqlx::query(
        r#"
        UPDATE sales SET
            customer_id = ?1,
            cashier_id = ?2,
            status = ?3,
            subtotal = ?4,
            discount_type = ?5,
            discount_value = ?6,
            discount_amount = ?7,
            tax_rate = ?8,
            tax_inclusive = ?9,
            tax_amount = ?10,
            total_amount = ?11,
            amount_paid = ?12,
            amount_due = ?13,
            change_amount = ?14,
            loyalty_points_earned = ?15,
            loyalty_points_redeemed = ?16,
            refunded_amount = ?17,
            refund_reason = ?18,
            cancellation_reason = ?19,
            notes = ?20,
            completed_at = ?21,
            updated_at = ?22,
            version = version + 1
        WHERE id = ?23 AND version = ?24
        "#,
    )
    .bind(&sale.customer_id)
    .bind(&sale.cashier_id)
    .bind(sale.status)
    .bind(sale.subtotal)
    .bind(sale.discount_type)
    .bind(sale.discount_value)
    .bind(sale.discount_amount)
    .bind(sale.tax_rate)
    .bind(sale.tax_inclusive)
    .bind(sale.tax_amount)
    .bind(sale.total_amount)
    .bind(sale.amount_paid)
    .bind(sale.amount_due)
    .bind(sale.change_amount)
    .bind(sale.loyalty_points_earned)
    .bind(sale.loyalty_points_redeemed)
    .bind(sale.refunded_amount)
    .bind(&sale.refund_reason)
    .bind(&sale.cancellation_reason)
    .bind(&sale.notes)
    .bind(sale.completed_at)
    .bind(sale.updated_at)
    .bind(&sale.id)
    .bind(sale.version)
    .execute(&mut *conn)
    .await?;

    ensure_updated(result, "Sale", &sale.id)?;
    sale.version += 1;

    save_children(conn, sale).await
}

async fn save_children(conn: &mut SqliteConnection, sale: &Sale) -> DbResult<()> {
    prune_children(conn, "sale_items", "sale_id", &sale.id, sale.items.iter().map(|i| i.id.as_str())).await?;

    for item in &sale.items {
        sqlx::query(
            r#"
            INSERT INTO sale_items (
                id, sale_id, line_number, product_id, variant_id, inventory_item_id,
                quantity, unit_price, discount_amount, line_total, unit_cost, quantity_reserved
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT (id) DO UPDATE SET
                line_number = excluded.line_number,
                inventory_item_id = excluded.inventory_item_id,
                quantity = excluded.quantity,
                unit_price = excluded.unit_price,
                discount_amount = excluded.discount_amount,
                line_total = excluded.line_total,
                unit_cost = excluded.unit_cost,
                quantity_reserved = excluded.quantity_reserved
            "#,
        )
        .bind(&item.id)
        .bind(&item.sale_id)
        .bind(item.line_number)
        .bind(&item.product_id)
        .bind(&item.variant_id)
        .bind(&item.inventory_item_id)
        .bind(item.quantity)
        .bind(item.unit_price)
        .bind(item.discount_amount)
        .bind(item.line_total)
        .bind(item.unit_cost)
        .bind(item.quantity_reserved)
        .execute(&mut *conn)
        .await?;
    }

    prune_children(conn, "sale_payments", "sale_id", &sale.id, sale.payments.iter().map(|p| p.id.as_str())).await?;

    // Payments are immutable once taken.
    for payment in &sale.payments {
        sqlx::query(
            r#"
            INSERT INTO sale_payments (id, sale_id, payment_method, amount, reference, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&payment.id)
        .bind(&payment.sale_id)
        .bind(payment.payment_method)
        .bind(payment.amount)
        .bind(&payment.reference)
        .bind(payment.created_at)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use chrono::Utc;
    use tally_core::sale::{PaymentMethod, SaleStatus};
    use tally_core::{Money, Quantity, TaxRate};

    #[tokio::test]
    async fn test_sale_round_trips_lines_and_payments() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();
        let now = Utc::now();

        let mut sale = Sale::new("t1", "SAL-000001", "S1", now).with_tax(TaxRate::from_bps(1000), false);
        insert(&mut conn, &sale).await.unwrap();

        sale.add_item("P1", None, Quantity::from_units(2), Money::from_cents(1000)).unwrap();
        sale.add_item("P2", None, Quantity::from_units(1), Money::from_cents(500)).unwrap();
        sale.add_payment(PaymentMethod::Cash, Money::from_cents(3000), None, now).unwrap();
        update(&mut conn, &mut sale).await.unwrap();

        let loaded = db.sales().get(&sale.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, SaleStatus::Draft);
        assert_eq!(loaded.items.len(), 2);
        assert_eq!(loaded.payments.len(), 1);
        assert_eq!(loaded.total_amount, Money::from_cents(2750));
        assert_eq!(loaded.version, 1);
    }

    #[tokio::test]
    async fn test_removed_line_is_deleted() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();

        let mut sale = Sale::new("t1", "SAL-000001", "S1", Utc::now());
        let line_id = sale
            .add_item("P1", None, Quantity::from_units(1), Money::from_cents(100))
            .unwrap()
            .id
            .clone();
        insert(&mut conn, &sale).await.unwrap();

        sale.remove_item(&line_id).unwrap();
        update(&mut conn, &mut sale).await.unwrap();

        let loaded = fetch(&mut conn, &sale.id).await.unwrap().unwrap();
        assert!(loaded.items.is_empty());
    }
}
