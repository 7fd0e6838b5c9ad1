//! # Invoice Repository
//!
//! Customer invoices and their lines. List reads return headers only.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use crate::repository::{ensure_updated, prune_children};
use tally_core::invoice::{Invoice, InvoiceItem};

/// Repository for invoice reads.
#[derive(Debug, Clone)]
pub struct InvoiceRepository {
    pool: SqlitePool,
}

impl InvoiceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        InvoiceRepository { pool }
    }

    /// Gets an invoice with its lines.
    pub async fn get(&self, id: &str) -> DbResult<Option<Invoice>> {
        let mut conn = self.pool.acquire().await?;
        fetch(&mut conn, id).await
    }

    pub async fn list_for_customer(&self, customer_id: &str) -> DbResult<Vec<Invoice>> {
        let invoices = sqlx::query_as::<_, Invoice>(
            "SELECT * FROM invoices WHERE customer_id = ?1 ORDER BY invoice_date DESC",
        )
        .bind(customer_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(invoices)
    }

    /// Issued, unsettled invoices past their due date at `as_of`, oldest due
    /// first.
    pub async fn list_overdue(&self, tenant_id: &str, as_of: DateTime<Utc>) -> DbResult<Vec<Invoice>> {
        let mut conn = self.pool.acquire().await?;
        fetch_open_past_due(&mut conn, tenant_id, as_of).await
    }
}

pub(crate) async fn fetch(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Invoice>> {
    let invoice = sqlx::query_as::<_, Invoice>("SELECT * FROM invoices WHERE id = ?1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    let Some(mut invoice) = invoice else {
        return Ok(None);
    };

    invoice.items = sqlx::query_as::<_, InvoiceItem>(
        "SELECT * FROM invoice_items WHERE invoice_id = ?1 ORDER BY line_number",
    )
    .bind(id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(Some(invoice))
}

pub(crate) async fn fetch_open_past_due(
    conn: &mut SqliteConnection,
    tenant_id: &str,
    as_of: DateTime<Utc>,
) -> DbResult<Vec<Invoice>> {
    let invoices = sqlx::query_as::<_, Invoice>(
        r#"
        SELECT * FROM invoices
        WHERE tenant_id = ?1
          AND status IN ('sent', 'overdue')
          AND due_date < ?2
        ORDER BY due_date
        "#,
    )
    .bind(tenant_id)
    .bind(as_of)
    .fetch_all(&mut *conn)
    .await?;

    Ok(invoices)
}

pub(crate) async fn insert(conn: &mut SqliteConnection, invoice: &Invoice) -> DbResult<()> {
    debug!(id = %invoice.id, number = %invoice.invoice_number, "Inserting invoice");

    sqlx::query(
        r#"
        INSERT INTO invoices (
            id, tenant_id, invoice_number, customer_id, status,
            invoice_date, due_date,
            subtotal, discount_value, discount_amount, tax_amount, total_amount,
            paid_amount, balance_due,
            payment_terms, notes, sent_at, paid_at, cancellation_reason,
            created_at, updated_at, version
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5,
            ?6, ?7,
            ?8, ?9, ?10, ?11, ?12,
            ?13, ?14,
            ?15, ?16, ?17, ?18, ?19,
            ?20, ?21, ?22
        )
        "#,
    )
    .bind(&invoice.id)
    .bind(&invoice.tenant_id)
    .bind(&invoice.invoice_number)
    .bind(&invoice.customer_id)
    .bind(invoice.status)
    .bind(invoice.invoice_date)
    .bind(invoice.due_date)
    .bind(invoice.subtotal)
    .bind(invoice.discount_value)
    .bind(invoice.discount_amount)
    .bind(invoice.tax_amount)
    .bind(invoice.total_amount)
    .bind(invoice.paid_amount)
    .bind(invoice.balance_due)
    .bind(&invoice.payment_terms)
    .bind(&invoice.notes)
    .bind(invoice.sent_at)
    .bind(invoice.paid_at)
    .bind(&invoice.cancellation_reason)
    .bind(invoice.created_at)
    .bind(invoice.updated_at)
    .bind(invoice.version)
    .execute(&mut *conn)
    .await?;

    save_items(conn, invoice).await
}

pub(crate) async fn update(conn: &mut SqliteConnection, invoice: &mut Invoice) -> DbResult<()> {
    debug!(id = %invoice.id, status = %invoice.status, balance = %invoice.balance_due, "Updating invoice");

    let result = sqlx::query(
        r#"
        UPDATE invoices SET
            status = ?1,
            due_date = ?2,
            subtotal = ?3,
            discount_value = ?4,
            discount_amount = ?5,
            tax_amount = ?6,
            total_amount = ?7,
            paid_amount = ?8,
            balance_due = ?9,
            payment_terms = ?10,
            notes = ?11,
            sent_at = ?12,
            paid_at = ?13,
            cancellation_reason = ?14,
            updated_at = ?15,
            version = version + 1
        WHERE id = ?16 AND version = ?17
        "#,
    )
    .bind(invoice.status)
    .bind(invoice.due_date)
    .bind(invoice.subtotal)
    .bind(invoice.discount_value)
    .bind(invoice.discount_amount)
    .bind(invoice.tax_amount)
    .bind(invoice.total_amount)
    .bind(invoice.paid_amount)
    .bind(invoice.balance_due)
    .bind(&invoice.payment_terms)
    .bind(&invoice.notes)
    .bind(invoice.sent_at)
    .bind(invoice.paid_at)
    .bind(&invoice.cancellation_reason)
    .bind(invoice.updated_at)
    .bind(&invoice.id)
    .bind(invoice.version)
    .execute(&mut *conn)
    .await?;

    ensure_updated(result, "Invoice", &invoice.id)?;
    invoice.version += 1;

    save_items(conn, invoice).await
}

async fn save_items(conn: &mut SqliteConnection, invoice: &Invoice) -> DbResult<()> {
    prune_children(
        conn,
        "invoice_items",
        "invoice_id",
        &invoice.id,
        invoice.items.iter().map(|i| i.id.as_str()),
    )
    .await?;

    for item in &invoice.items {
        sqlx::query(
            r#"
            INSERT INTO invoice_items (
                id, invoice_id, line_number, product_id, description,
                quantity, unit_price, tax_rate, tax_amount, line_total
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT (id) DO UPDATE SET
                quantity = excluded.quantity,
                unit_price = excluded.unit_price,
                tax_rate = excluded.tax_rate,
                tax_amount = excluded.tax_amount,
                line_total = excluded.line_total
            "#,
        )
        .bind(&item.id)
        .bind(&item.invoice_id)
        .bind(item.line_number)
        .bind(&item.product_id)
        .bind(&item.description)
        .bind(item.quantity)
        .bind(item.unit_price)
        .bind(item.tax_rate)
        .bind(item.tax_amount)
        .bind(item.line_total)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use crate::repository::party;
    use chrono::Duration;
    use tally_core::customer::Customer;
    use tally_core::invoice::InvoiceStatus;
    use tally_core::types::TaxRate;
    use tally_core::{Money, Quantity};

    async fn customer(conn: &mut SqliteConnection) -> Customer {
        let customer = Customer::new("t1", "C-001", "Ada", Utc::now());
        party::insert_customer(conn, &customer).await.unwrap();
        customer
    }

    #[tokio::test]
    async fn test_invoice_round_trips_lines() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();
        let customer = customer(&mut conn).await;
        let now = Utc::now();

        let mut invoice = Invoice::new("t1", "INV-000001", &customer.id, now + Duration::days(14), now)
            .unwrap()
            .with_terms("Net 14");
        invoice
            .add_item(Some("P1"), "Espresso beans", Quantity::from_units(3), Money::from_cents(1_200), Some(TaxRate::from_bps(1000)))
            .unwrap();
        let dropped = invoice
            .add_item(None, "Delivery", Quantity::from_units(1), Money::from_cents(500), None)
            .unwrap()
            .id
            .clone();
        insert(&mut conn, &invoice).await.unwrap();

        invoice.remove_item(&dropped).unwrap();
        update(&mut conn, &mut invoice).await.unwrap();

        let loaded = db.invoices().get(&invoice.id).await.unwrap().unwrap();
        assert_eq!(loaded.items.len(), 1);
        assert_eq!(loaded.items[0].tax_rate, Some(TaxRate::from_bps(1000)));
        assert_eq!(loaded.total_amount, Money::from_cents(3_960));
        assert_eq!(loaded.payment_terms.as_deref(), Some("Net 14"));
        assert_eq!(loaded.version, 1);
    }

    #[tokio::test]
    async fn test_overdue_listing_skips_drafts_and_paid() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();
        let customer = customer(&mut conn).await;
        let issued = Utc::now() - Duration::days(40);

        let mut past_due = Invoice::new("t1", "INV-000001", &customer.id, issued + Duration::days(30), issued).unwrap();
        past_due
            .add_item(None, "Catering", Quantity::from_units(1), Money::from_cents(9_000), None)
            .unwrap();
        past_due.send(issued).unwrap();
        let draft = Invoice::new("t1", "INV-000002", &customer.id, issued + Duration::days(30), issued).unwrap();
        let mut paid = Invoice::new("t1", "INV-000003", &customer.id, issued + Duration::days(30), issued).unwrap();
        paid.add_item(None, "Catering", Quantity::from_units(1), Money::from_cents(100), None)
            .unwrap();
        paid.send(issued).unwrap();
        paid.record_payment(Money::from_cents(100), issued).unwrap();
        assert_eq!(paid.status, InvoiceStatus::Paid);

        for invoice in [&past_due, &draft, &paid] {
            insert(&mut conn, invoice).await.unwrap();
        }

        let overdue = db.invoices().list_overdue("t1", Utc::now()).await.unwrap();
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].id, past_due.id);
        assert_eq!(db.invoices().list_for_customer(&customer.id).await.unwrap().len(), 3);
    }
}
