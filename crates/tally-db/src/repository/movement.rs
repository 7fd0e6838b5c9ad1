//! # Movement Repository
//!
//! The stock movement log. Rows are only ever inserted; triggers in the
//! schema abort any UPDATE or DELETE.

use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use tally_core::inventory::StockMovement;

/// Repository for movement history.
#[derive(Debug, Clone)]
pub struct MovementRepository {
    pool: SqlitePool,
}

impl MovementRepository {
    pub fn new(pool: SqlitePool) -> Self {
        MovementRepository { pool }
    }

    /// History of one inventory record, oldest first.
    pub async fn list_for_item(&self, inventory_item_id: &str) -> DbResult<Vec<StockMovement>> {
        let movements = sqlx::query_as::<_, StockMovement>(
            r#"
            SELECT * FROM stock_movements
            WHERE inventory_item_id = ?1
            ORDER BY created_at, rowid
            "#,
        )
        .bind(inventory_item_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(movements)
    }

    /// Movements caused by one document, e.g. every line of a goods receipt.
    pub async fn list_for_reference(&self, reference_type: &str, reference_id: &str) -> DbResult<Vec<StockMovement>> {
        let movements = sqlx::query_as::<_, StockMovement>(
            r#"
            SELECT * FROM stock_movements
            WHERE reference_type = ?1 AND reference_id = ?2
            ORDER BY created_at, rowid
            "#,
        )
        .bind(reference_type)
        .bind(reference_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(movements)
    }
}

pub(crate) async fn insert(conn: &mut SqliteConnection, movement: &StockMovement) -> DbResult<()> {
    debug!(
        id = %movement.id,
        item = %movement.inventory_item_id,
        kind = %movement.movement_type,
        quantity = %movement.quantity,
        "Recording stock movement"
    );

    sqlx::query(
        r#"
        INSERT INTO stock_movements (
            id, tenant_id, store_id, inventory_item_id, product_id, variant_id,
            movement_type, quantity, unit_cost, quantity_before, quantity_after,
            reference_type, reference_id, reference_number, notes, created_by, created_at
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5, ?6,
            ?7, ?8, ?9, ?10, ?11,
            ?12, ?13, ?14, ?15, ?16, ?17
        )
        "#,
    )
    .bind(&movement.id)
    .bind(&movement.tenant_id)
    .bind(&movement.store_id)
    .bind(&movement.inventory_item_id)
    .bind(&movement.product_id)
    .bind(&movement.variant_id)
    .bind(movement.movement_type)
    .bind(movement.quantity)
    .bind(movement.unit_cost)
    .bind(movement.quantity_before)
    .bind(movement.quantity_after)
    .bind(&movement.reference_type)
    .bind(&movement.reference_id)
    .bind(&movement.reference_number)
    .bind(&movement.notes)
    .bind(&movement.created_by)
    .bind(movement.created_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use crate::repository::inventory;
    use chrono::Utc;
    use tally_core::inventory::InventoryItem;
    use tally_core::{Quantity, UnitCost};

    #[tokio::test]
    async fn test_movements_cannot_be_rewritten() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();

        let mut item = InventoryItem::new("t1", "S1", "P1", None, Utc::now());
        let movement = item
            .receive(Quantity::from_units(5), UnitCost::from_cents(200), Utc::now())
            .unwrap();
        inventory::insert(&mut conn, &item).await.unwrap();
        insert(&mut conn, &movement).await.unwrap();

        let history = db.movements().list_for_item(&item.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].quantity_after, Quantity::from_units(5));

        let update = sqlx::query("UPDATE stock_movements SET quantity = 0 WHERE id = ?1")
            .bind(&movement.id)
            .execute(&mut *conn)
            .await;
        assert!(update.is_err());

        let delete = sqlx::query("DELETE FROM stock_movements WHERE id = ?1")
            .bind(&movement.id)
            .execute(&mut *conn)
            .await;
        assert!(delete.is_err());
    }
}
