//! # Inventory Repository
//!
//! Stock records keyed by (store, product, variant).
//!
//! ```text
//! ┌──────────┬────────────┬───────────┬───────────┬────────────┐
//! │ store_id │ product_id │ variant_id│ on_hand   │ reserved   │
//! ├──────────┼────────────┼───────────┼───────────┼────────────┤
//! │ S1       │ P-COFFEE   │ NULL      │ 40.000    │ 2.000      │
//! │ S1       │ P-SHIRT    │ V-M       │ 12.000    │ 0.000      │
//! └──────────┴────────────┴───────────┴───────────┴────────────┘
//! ```
//!
//! The schema enforces `available = on_hand - reserved` on every write, so a
//! row can never be stored with the derived column out of step.

use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use crate::repository::ensure_updated;
use tally_core::inventory::InventoryItem;

/// Repository for inventory reads.
#[derive(Debug, Clone)]
pub struct InventoryRepository {
    pool: SqlitePool,
}

impl InventoryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        InventoryRepository { pool }
    }

    pub async fn get(&self, id: &str) -> DbResult<Option<InventoryItem>> {
        let mut conn = self.pool.acquire().await?;
        fetch(&mut conn, id).await
    }

    /// Looks up the record for a product (and variant) at a store.
    pub async fn find(
        &self,
        tenant_id: &str,
        store_id: &str,
        product_id: &str,
        variant_id: Option<&str>,
    ) -> DbResult<Option<InventoryItem>> {
        let mut conn = self.pool.acquire().await?;
        find(&mut conn, tenant_id, store_id, product_id, variant_id).await
    }

    /// All records for a store, by product.
    pub async fn list_for_store(&self, tenant_id: &str, store_id: &str) -> DbResult<Vec<InventoryItem>> {
        let items = sqlx::query_as::<_, InventoryItem>(
            r#"
            SELECT * FROM inventory_items
            WHERE tenant_id = ?1 AND store_id = ?2
            ORDER BY product_id, variant_id
            "#,
        )
        .bind(tenant_id)
        .bind(store_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(items)
    }

    /// Records at or below their reorder point.
    pub async fn list_low_stock(&self, tenant_id: &str, store_id: &str) -> DbResult<Vec<InventoryItem>> {
        let items = self.list_for_store(tenant_id, store_id).await?;
        Ok(items.into_iter().filter(|item| item.is_low_stock()).collect())
    }

    /// Records whose available quantity warrants a purchase.
    pub async fn list_needing_reorder(&self, tenant_id: &str, store_id: &str) -> DbResult<Vec<InventoryItem>> {
        let items = self.list_for_store(tenant_id, store_id).await?;
        Ok(items.into_iter().filter(|item| item.needs_reorder().is_some()).collect())
    }
}

// =============================================================================
// Connection-level operations
// =============================================================================

pub(crate) async fn fetch(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<InventoryItem>> {
    let item = sqlx::query_as::<_, InventoryItem>("SELECT * FROM inventory_items WHERE id = ?1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    Ok(item)
}

pub(crate) async fn find(
    conn: &mut SqliteConnection,
    tenant_id: &str,
    store_id: &str,
    product_id: &str,
    variant_id: Option<&str>,
) -> DbResult<Option<InventoryItem>> {
    // `IS` matches NULL against NULL.
    let item = sqlx::query_as::<_, InventoryItem>(
        r#"
        SELECT * FROM inventory_items
        WHERE tenant_id = ?1 AND store_id = ?2 AND product_id = ?3 AND variant_id IS ?4
        "#,
    )
    .bind(tenant_id)
    .bind(store_id)
    .bind(product_id)
    .bind(variant_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(item)
}

pub(crate) async fn insert(conn: &mut SqliteConnection, item: &InventoryItem) -> DbResult<()> {
    debug!(id = %item.id, store_id = %item.store_id, product_id = %item.product_id, "Inserting inventory item");

    sqlx::query(
        r#"
        INSERT INTO inventory_items (
            id, tenant_id, store_id, product_id, variant_id,
            quantity_on_hand, quantity_reserved, quantity_available,
            unit_cost, last_cost, reorder_point, reorder_quantity,
            max_stock_level, bin_location, created_at, updated_at, version
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5,
            ?6, ?7, ?8,
            ?9, ?10, ?11, ?12,
            ?13, ?14, ?15, ?16, ?17
        )
        "#,
    )
    .bind(&item.id)
    .bind(&item.tenant_id)
    .bind(&item.store_id)
    .bind(&item.product_id)
    .bind(&item.variant_id)
    .bind(item.quantity_on_hand)
    .bind(item.quantity_reserved)
    .bind(item.quantity_available)
    .bind(item.unit_cost)
    .bind(item.last_cost)
    .bind(item.reorder_point)
    .bind(item.reorder_quantity)
    .bind(item.max_stock_level)
    .bind(&item.bin_location)
    .bind(item.created_at)
    .bind(item.updated_at)
    .bind(item.version)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Versioned update of quantities, costs and stock levels.
pub(crate) async fn update(conn: &mut SqliteConnection, item: &mut InventoryItem) -> DbResult<()> {
    debug!(
        id = %item.id,
        on_hand = %item.quantity_on_hand,
        reserved = %item.quantity_reserved,
        "Updating inventory item"
    );

    let result = sqlx::query(
        r#"
        UPDATE inventory_items SET
            quantity_on_hand = ?1,
            quantity_reserved = ?2,
            quantity_available = ?3,
            unit_cost = ?4,
            last_cost = ?5,
            reorder_point = ?6,
            reorder_quantity = ?7,
            max_stock_level = ?8,
            bin_location = ?9,
            updated_at = ?10,
            version = version + 1
        WHERE id = ?11 AND version = ?12
        "#,
    )
    .bind(item.quantity_on_hand)
    .bind(item.quantity_reserved)
    .bind(item.quantity_available)
    .bind(item.unit_cost)
    .bind(item.last_cost)
    .bind(item.reorder_point)
    .bind(item.reorder_quantity)
    .bind(item.max_stock_level)
    .bind(&item.bin_location)
    .bind(item.updated_at)
    .bind(&item.id)
    .bind(item.version)
    .execute(&mut *conn)
    .await?;

    ensure_updated(result, "InventoryItem", &item.id)?;
    item.version += 1;
    Ok(())
}
