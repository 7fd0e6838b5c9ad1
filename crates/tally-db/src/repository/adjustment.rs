//! # Adjustment Repository
//!
//! Stock adjustments (cycle counts, corrections) and their lines.

use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use crate::repository::{ensure_updated, prune_children};
use tally_core::adjustment::{StockAdjustment, StockAdjustmentItem};

/// Repository for adjustment reads.
#[derive(Debug, Clone)]
pub struct AdjustmentRepository {
    pool: SqlitePool,
}

impl AdjustmentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        AdjustmentRepository { pool }
    }

    /// Gets an adjustment with its lines.
    pub async fn get(&self, id: &str) -> DbResult<Option<StockAdjustment>> {
        let mut conn = self.pool.acquire().await?;
        fetch(&mut conn, id).await
    }
}

pub(crate) async fn fetch(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<StockAdjustment>> {
    let adjustment = sqlx::query_as::<_, StockAdjustment>("SELECT * FROM stock_adjustments WHERE id = ?1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    let Some(mut adjustment) = adjustment else {
        return Ok(None);
    };

    adjustment.items = sqlx::query_as::<_, StockAdjustmentItem>(
        "SELECT * FROM stock_adjustment_items WHERE adjustment_id = ?1 ORDER BY rowid",
    )
    .bind(id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(Some(adjustment))
}

pub(crate) async fn insert(conn: &mut SqliteConnection, adjustment: &StockAdjustment) -> DbResult<()> {
    debug!(id = %adjustment.id, number = %adjustment.adjustment_number, "Inserting stock adjustment");

    sqlx::query(
        r#"
        INSERT INTO stock_adjustments (
            id, tenant_id, adjustment_number, store_id, reason, notes, status,
            approved_by, approved_at, applied_by, applied_at,
            created_at, updated_at, version
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
        "#,
    )
    .bind(&adjustment.id)
    .bind(&adjustment.tenant_id)
    .bind(&adjustment.adjustment_number)
    .bind(&adjustment.store_id)
    .bind(&adjustment.reason)
    .bind(&adjustment.notes)
    .bind(adjustment.status)
    .bind(&adjustment.approved_by)
    .bind(adjustment.approved_at)
    .bind(&adjustment.applied_by)
    .bind(adjustment.applied_at)
    .bind(adjustment.created_at)
    .bind(adjustment.updated_at)
    .bind(adjustment.version)
    .execute(&mut *conn)
    .await?;

    save_items(conn, adjustment).await
}

pub(crate) async fn update(conn: &mut SqliteConnection, adjustment: &mut StockAdjustment) -> DbResult<()> {
    debug!(id = %adjustment.id, status = %adjustment.status, "Updating stock adjustment");

    let result = sqlx::query(
        r#"
        UPDATE stock_adjustments SET
            notes = ?1,
            status = ?2,
            approved_by = ?3,
            approved_at = ?4,
            applied_by = ?5,
            applied_at = ?6,
            updated_at = ?7,
            version = version + 1
        WHERE id = ?8 AND version = ?9
        "#,
    )
    .bind(&adjustment.notes)
    .bind(adjustment.status)
    .bind(&adjustment.approved_by)
    .bind(adjustment.approved_at)
    .bind(&adjustment.applied_by)
    .bind(adjustment.applied_at)
    .bind(adjustment.updated_at)
    .bind(&adjustment.id)
    .bind(adjustment.version)
    .execute(&mut *conn)
    .await?;

    ensure_updated(result, "StockAdjustment", &adjustment.id)?;
    adjustment.version += 1;

    save_items(conn, adjustment).await
}

async fn save_items(conn: &mut SqliteConnection, adjustment: &StockAdjustment) -> DbResult<()> {
    prune_children(
        conn,
        "stock_adjustment_items",
        "adjustment_id",
        &adjustment.id,
        adjustment.items.iter().map(|i| i.id.as_str()),
    )
    .await?;

    for item in &adjustment.items {
        sqlx::query(
            r#"
            INSERT INTO stock_adjustment_items (
                id, adjustment_id, inventory_item_id, current_quantity, new_quantity, unit_cost, reason
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT (id) DO UPDATE SET
                current_quantity = excluded.current_quantity,
                new_quantity = excluded.new_quantity,
                unit_cost = excluded.unit_cost,
                reason = excluded.reason
            "#,
        )
        .bind(&item.id)
        .bind(&item.adjustment_id)
        .bind(&item.inventory_item_id)
        .bind(item.current_quantity)
        .bind(item.new_quantity)
        .bind(item.unit_cost)
        .bind(&item.reason)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use crate::repository::inventory;
    use chrono::Utc;
    use tally_core::inventory::InventoryItem;
    use tally_core::Quantity;

    #[tokio::test]
    async fn test_replaced_line_does_not_collide() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();
        let now = Utc::now();

        let item = InventoryItem::new("t1", "S1", "P1", None, now);
        inventory::insert(&mut conn, &item).await.unwrap();

        let mut adjustment = StockAdjustment::new("t1", "ADJ-000001", "S1", "Cycle count", now).unwrap();
        adjustment.add_item(&item, Quantity::from_units(3), None).unwrap();
        insert(&mut conn, &adjustment).await.unwrap();

        // Same inventory item again: new line id, same unique key.
        adjustment.add_item(&item, Quantity::from_units(5), None).unwrap();
        update(&mut conn, &mut adjustment).await.unwrap();

        let loaded = db.adjustments().get(&adjustment.id).await.unwrap().unwrap();
        assert_eq!(loaded.items.len(), 1);
        assert_eq!(loaded.items[0].new_quantity, Quantity::from_units(5));
    }
}
