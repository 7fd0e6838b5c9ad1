//! # Party Repository
//!
//! Customers (loyalty, lifetime spend, what they owe us on invoices) and
//! suppliers (what we owe them).

use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use crate::repository::ensure_updated;
use tally_core::customer::{Customer, Supplier};

/// Repository for customer and supplier reads.
#[derive(Debug, Clone)]
pub struct PartyRepository {
    pool: SqlitePool,
}

impl PartyRepository {
    pub fn new(pool: SqlitePool) -> Self {
        PartyRepository { pool }
    }

    pub async fn get_customer(&self, id: &str) -> DbResult<Option<Customer>> {
        let mut conn = self.pool.acquire().await?;
        fetch_customer(&mut conn, id).await
    }

    pub async fn get_customer_by_number(&self, tenant_id: &str, number: &str) -> DbResult<Option<Customer>> {
        let customer = sqlx::query_as::<_, Customer>(
            "SELECT * FROM customers WHERE tenant_id = ?1 AND customer_number = ?2",
        )
        .bind(tenant_id)
        .bind(number)
        .fetch_optional(&self.pool)
        .await?;

        Ok(customer)
    }

    pub async fn get_supplier(&self, id: &str) -> DbResult<Option<Supplier>> {
        let mut conn = self.pool.acquire().await?;
        fetch_supplier(&mut conn, id).await
    }

    /// Customers with an unpaid invoice balance, largest first.
    pub async fn list_customers_with_balance(&self, tenant_id: &str) -> DbResult<Vec<Customer>> {
        let customers = sqlx::query_as::<_, Customer>(
            r#"
            SELECT * FROM customers
            WHERE tenant_id = ?1 AND current_balance > 0
            ORDER BY current_balance DESC
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(customers)
    }

    /// Suppliers we currently owe money, largest balance first.
    pub async fn list_suppliers_with_balance(&self, tenant_id: &str) -> DbResult<Vec<Supplier>> {
        let suppliers = sqlx::query_as::<_, Supplier>(
            r#"
            SELECT * FROM suppliers
            WHERE tenant_id = ?1 AND current_balance > 0
            ORDER BY current_balance DESC
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(suppliers)
    }
}

// =============================================================================
// Customers
// =============================================================================

pub(crate) async fn fetch_customer(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Customer>> {
    let customer = sqlx::query_as::<_, Customer>("SELECT * FROM customers WHERE id = ?1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    Ok(customer)
}

pub(crate) async fn insert_customer(conn: &mut SqliteConnection, customer: &Customer) -> DbResult<()> {
    debug!(id = %customer.id, number = %customer.customer_number, "Inserting customer");

    sqlx::query(
        r#"
        INSERT INTO customers (
            id, tenant_id, customer_number, name, email, phone,
            loyalty_points, loyalty_tier, total_spent, total_orders,
            first_purchase_date, last_purchase_date, credit_limit, current_balance,
            is_active, created_at, updated_at, version
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5, ?6,
            ?7, ?8, ?9, ?10,
            ?11, ?12, ?13, ?14,
            ?15, ?16, ?17, ?18
        )
        "#,
    )
    .bind(&customer.id)
    .bind(&customer.tenant_id)
    .bind(&customer.customer_number)
    .bind(&customer.name)
    .bind(&customer.email)
    .bind(&customer.phone)
    .bind(customer.loyalty_points)
    .bind(customer.loyalty_tier)
    .bind(customer.total_spent)
    .bind(customer.total_orders)
    .bind(customer.first_purchase_date)
    .bind(customer.last_purchase_date)
    .bind(customer.credit_limit)
    .bind(customer.current_balance)
    .bind(customer.is_active)
    .bind(customer.created_at)
    .bind(customer.updated_at)
    .bind(customer.version)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub(crate) async fn update_customer(conn: &mut SqliteConnection, customer: &mut Customer) -> DbResult<()> {
    debug!(id = %customer.id, points = customer.loyalty_points, "Updating customer");

    let result = sqlx::query(
        r#"
        UPDATE customers SET
            name = ?1,
            email = ?2,
            phone = ?3,
            loyalty_points = ?4,
            loyalty_tier = ?5,
            total_spent = ?6,
            total_orders = ?7,
            first_purchase_date = ?8,
            last_purchase_date = ?9,
            credit_limit = ?10,
            current_balance = ?11,
            is_active = ?12,
            updated_at = ?13,
            version = version + 1
        WHERE id = ?14 AND version = ?15
        "#,
    )
    .bind(&customer.name)
    .bind(&customer.email)
    .bind(&customer.phone)
    .bind(customer.loyalty_points)
    .bind(customer.loyalty_tier)
    .bind(customer.total_spent)
    .bind(customer.total_orders)
    .bind(customer.first_purchase_date)
    .bind(customer.last_purchase_date)
    .bind(customer.credit_limit)
    .bind(customer.current_balance)
    .bind(customer.is_active)
    .bind(customer.updated_at)
    .bind(&customer.id)
    .bind(customer.version)
    .execute(&mut *conn)
    .await?;

    ensure_updated(result, "Customer", &customer.id)?;
    customer.version += 1;
    Ok(())
}

// =============================================================================
// Suppliers
// =============================================================================

pub(crate) async fn fetch_supplier(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Supplier>> {
    let supplier = sqlx::query_as::<_, Supplier>("SELECT * FROM suppliers WHERE id = ?1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    Ok(supplier)
}

pub(crate) async fn insert_supplier(conn: &mut SqliteConnection, supplier: &Supplier) -> DbResult<()> {
    debug!(id = %supplier.id, number = %supplier.supplier_number, "Inserting supplier");

    sqlx::query(
        r#"
        INSERT INTO suppliers (
            id, tenant_id, supplier_number, company_name, email, phone,
            current_balance, total_purchased, first_order_date, last_order_date,
            is_blocked, created_at, updated_at, version
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5, ?6,
            ?7, ?8, ?9, ?10,
            ?11, ?12, ?13, ?14
        )
        "#,
    )
    .bind(&supplier.id)
    .bind(&supplier.tenant_id)
    .bind(&supplier.supplier_number)
    .bind(&supplier.company_name)
    .bind(&supplier.email)
    .bind(&supplier.phone)
    .bind(supplier.current_balance)
    .bind(supplier.total_purchased)
    .bind(supplier.first_order_date)
    .bind(supplier.last_order_date)
    .bind(supplier.is_blocked)
    .bind(supplier.created_at)
    .bind(supplier.updated_at)
    .bind(supplier.version)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub(crate) async fn update_supplier(conn: &mut SqliteConnection, supplier: &mut Supplier) -> DbResult<()> {
    debug!(id = %supplier.id, balance = %supplier.current_balance, "Updating supplier");

    let result = sqlx::query(
        r#"
        UPDATE suppliers SET
            company_name = ?1,
            email = ?2,
            phone = ?3,
            current_balance = ?4,
            total_purchased = ?5,
            first_order_date = ?6,
            last_order_date = ?7,
            is_blocked = ?8,
            updated_at = ?9,
            version = version + 1
        WHERE id = ?10 AND version = ?11
        "#,
    )
    .bind(&supplier.company_name)
    .bind(&supplier.email)
    .bind(&supplier.phone)
    .bind(supplier.current_balance)
    .bind(supplier.total_purchased)
    .bind(supplier.first_order_date)
    .bind(supplier.last_order_date)
    .bind(supplier.is_blocked)
    .bind(supplier.updated_at)
    .bind(&supplier.id)
    .bind(supplier.version)
    .execute(&mut *conn)
    .await?;

    ensure_updated(result, "Supplier", &supplier.id)?;
    supplier.version += 1;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use chrono::Utc;
    use tally_core::customer::{LoyaltyProgram, LoyaltyTier};
    use tally_core::Money;

    #[tokio::test]
    async fn test_customer_loyalty_persists() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();

        let mut customer = Customer::new("t1", "C-001", "Ada", Utc::now());
        insert_customer(&mut conn, &customer).await.unwrap();

        let program = LoyaltyProgram::new(100, Money::from_cents(1)).unwrap();
        let earned = customer.record_purchase(Money::from_cents(250_000), &program, Utc::now());
        update_customer(&mut conn, &mut customer).await.unwrap();

        let loaded = db.parties().get_customer(&customer.id).await.unwrap().unwrap();
        assert_eq!(loaded.loyalty_points, earned);
        assert_eq!(loaded.total_orders, 1);
        assert_eq!(loaded.loyalty_tier, LoyaltyTier::for_points(earned));
        assert_eq!(loaded.version, 1);
    }

    #[tokio::test]
    async fn test_customer_credit_persists() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();

        let mut customer = Customer::new("t1", "C-002", "Grace", Utc::now()).with_credit_limit(Money::from_cents(10_000));
        let cash_only = Customer::new("t1", "C-003", "Linus", Utc::now());
        insert_customer(&mut conn, &customer).await.unwrap();
        insert_customer(&mut conn, &cash_only).await.unwrap();

        customer.charge_account(Money::from_cents(7_500), Utc::now()).unwrap();
        update_customer(&mut conn, &mut customer).await.unwrap();

        let loaded = db.parties().get_customer(&customer.id).await.unwrap().unwrap();
        assert_eq!(loaded.credit_limit, Money::from_cents(10_000));
        assert_eq!(loaded.available_credit(), Some(Money::from_cents(2_500)));

        let listed = db.parties().list_customers_with_balance("t1").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, customer.id);
    }

    #[tokio::test]
    async fn test_supplier_balance_listing() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();

        let mut owed = Supplier::new("t1", "V-001", "Beans Ltd", Utc::now());
        owed.record_purchase_order(Money::from_cents(5000), Money::from_cents(5000), Utc::now());
        let settled = Supplier::new("t1", "V-002", "Cups Co", Utc::now());
        insert_supplier(&mut conn, &owed).await.unwrap();
        insert_supplier(&mut conn, &settled).await.unwrap();

        let listed = db.parties().list_suppliers_with_balance("t1").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, owed.id);
    }
}
