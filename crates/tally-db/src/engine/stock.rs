//! # Stock Operations
//!
//! Direct moves against single inventory records: opening stock,
//! reservations, ad-hoc receipts and issues, returns, write-offs and
//! store-to-store transfers.
//!
//! Every move writes the updated item (versioned) and one append-only
//! movement row in the same transaction. These moves do not post to the
//! ledger; only sales, goods receipts and adjustments do.

use sqlx::SqliteConnection;
use tracing::info;

use super::{Engine, StockChange, Transfer};
use crate::error::{DbError, DbResult};
use crate::repository::sequence::DocumentKind;
use crate::repository::{inventory, movement};
use tally_core::inventory::{InventoryItem, MovementType, StockMovement};
use tally_core::{new_id, AuditStamp, CoreError, CoreResult, DocumentRef, Quantity, UnitCost, ValidationError};

impl Engine {
    /// Registers a stock record for a product (or variant) at a store.
    pub async fn create_inventory_item(&self, item: InventoryItem) -> DbResult<InventoryItem> {
        self.with_retry("create_inventory_item", || self.create_inventory_item_once(item.clone()))
            .await
    }

    async fn create_inventory_item_once(&self, mut item: InventoryItem) -> DbResult<InventoryItem> {
        item.tenant_id = self.tenant_id.clone();
        item.check_invariants()?;

        let mut tx = self.db.pool().begin().await?;
        inventory::insert(&mut *tx, &item).await?;
        tx.commit().await?;

        info!(id = %item.id, store = %item.store_id, product = %item.product_id, "Inventory item created");
        Ok(item)
    }

    /// Books opening stock at a known cost.
    pub async fn set_initial_stock(
        &self,
        item_id: &str,
        quantity: Quantity,
        unit_cost: UnitCost,
        stamp: &AuditStamp,
    ) -> DbResult<StockChange> {
        self.with_retry("set_initial_stock", || {
            self.move_stock(item_id, None, stamp, move |item| item.set_initial(quantity, unit_cost, stamp.at))
        })
        .await
    }

    /// Promises stock to an open document without moving it.
    pub async fn reserve(&self, item_id: &str, quantity: Quantity, stamp: &AuditStamp) -> DbResult<InventoryItem> {
        self.with_retry("reserve", || async move {
            let mut tx = self.db.pool().begin().await?;
            let mut item = load_item(&mut *tx, item_id).await?;
            item.reserve(quantity, stamp.at)?;
            inventory::update(&mut *tx, &mut item).await?;
            tx.commit().await?;
            Ok(item)
        })
        .await
    }

    pub async fn release(&self, item_id: &str, quantity: Quantity, stamp: &AuditStamp) -> DbResult<InventoryItem> {
        self.with_retry("release", || async move {
            let mut tx = self.db.pool().begin().await?;
            let mut item = load_item(&mut *tx, item_id).await?;
            item.release(quantity, stamp.at)?;
            inventory::update(&mut *tx, &mut item).await?;
            tx.commit().await?;
            Ok(item)
        })
        .await
    }

    /// Receives stock outside a purchase order and blends the average cost.
    pub async fn receive_stock(
        &self,
        item_id: &str,
        quantity: Quantity,
        unit_cost: UnitCost,
        reference: Option<&DocumentRef>,
        stamp: &AuditStamp,
    ) -> DbResult<StockChange> {
        self.with_retry("receive_stock", || {
            self.move_stock(item_id, reference, stamp, move |item| item.receive(quantity, unit_cost, stamp.at))
        })
        .await
    }

    /// Issues unreserved stock under the store's negative-inventory policy.
    pub async fn issue_stock(
        &self,
        item_id: &str,
        quantity: Quantity,
        reference: Option<&DocumentRef>,
        stamp: &AuditStamp,
    ) -> DbResult<StockChange> {
        self.with_retry("issue_stock", || {
            self.move_stock(item_id, reference, stamp, move |item| {
                let allow_negative = self.config.store_policy(&item.store_id).allow_negative_inventory;
                item.issue(quantity, Quantity::zero(), allow_negative, stamp.at)
            })
        })
        .await
    }

    /// Puts returned goods back on the shelf at the current average cost.
    pub async fn return_stock(
        &self,
        item_id: &str,
        quantity: Quantity,
        reference: Option<&DocumentRef>,
        stamp: &AuditStamp,
    ) -> DbResult<StockChange> {
        self.with_retry("return_stock", || {
            self.move_stock(item_id, reference, stamp, move |item| item.return_to_stock(quantity, stamp.at))
        })
        .await
    }

    /// Removes damaged or expired stock.
    pub async fn write_off_stock(
        &self,
        item_id: &str,
        quantity: Quantity,
        kind: MovementType,
        notes: Option<&str>,
        stamp: &AuditStamp,
    ) -> DbResult<StockChange> {
        self.with_retry("write_off_stock", || {
            self.move_stock(item_id, None, stamp, move |item| {
                item.write_off(quantity, kind, notes.map(str::to_string), stamp.at)
            })
        })
        .await
    }

    /// Runs one stock move against one item and logs its movement.
    async fn move_stock<F>(
        &self,
        item_id: &str,
        reference: Option<&DocumentRef>,
        stamp: &AuditStamp,
        apply: F,
    ) -> DbResult<StockChange>
    where
        F: FnOnce(&mut InventoryItem) -> CoreResult<StockMovement>,
    {
        let mut tx = self.db.pool().begin().await?;

        let mut item = load_item(&mut *tx, item_id).await?;
        let mut logged = apply(&mut item)?.with_actor(stamp.actor.clone());
        if let Some(reference) = reference {
            logged = logged.with_reference(reference);
        }

        inventory::update(&mut *tx, &mut item).await?;
        movement::insert(&mut *tx, &logged).await?;
        tx.commit().await?;

        info!(
            item = %item.id,
            kind = %logged.movement_type,
            quantity = %logged.quantity,
            on_hand = %item.quantity_on_hand,
            "Stock moved"
        );
        Ok(StockChange { item, movement: logged })
    }

    // =========================================================================
    // Transfers
    // =========================================================================

    /// Moves available stock to the same product's record at another store,
    /// creating that record if needed. The destination receives at the
    /// source's average cost.
    pub async fn transfer_stock(
        &self,
        from_item_id: &str,
        to_store_id: &str,
        quantity: Quantity,
        stamp: &AuditStamp,
    ) -> DbResult<Transfer> {
        self.with_retry("transfer_stock", || {
            self.transfer_stock_once(from_item_id, to_store_id, quantity, stamp)
        })
        .await
    }

    async fn transfer_stock_once(
        &self,
        from_item_id: &str,
        to_store_id: &str,
        quantity: Quantity,
        stamp: &AuditStamp,
    ) -> DbResult<Transfer> {
        let mut tx = self.db.pool().begin().await?;

        let mut source = load_item(&mut *tx, from_item_id).await?;
        if source.store_id == to_store_id {
            return Err(CoreError::from(ValidationError::InvalidFormat {
                field: "to_store_id".to_string(),
                reason: "transfer source and destination are the same store".to_string(),
            })
            .into());
        }

        let existing = inventory::find(
            &mut *tx,
            &self.tenant_id,
            to_store_id,
            &source.product_id,
            source.variant_id.as_deref(),
        )
        .await?;
        let created = existing.is_none();
        let mut destination = existing.unwrap_or_else(|| {
            InventoryItem::new(
                self.tenant_id.clone(),
                to_store_id,
                source.product_id.clone(),
                source.variant_id.clone(),
                stamp.at,
            )
        });

        let number = self.next_number(&mut *tx, DocumentKind::Transfer).await?;
        let reference = DocumentRef::new("transfer", new_id(), number.clone());

        let cost = source.unit_cost;
        let out = source
            .transfer_out(quantity, stamp.at)?
            .with_reference(&reference)
            .with_actor(stamp.actor.clone());
        let incoming = destination
            .transfer_in(quantity, cost, stamp.at)?
            .with_reference(&reference)
            .with_actor(stamp.actor.clone());

        // ascending id order across both records
        let mut pair = [(&mut source, false), (&mut destination, created)];
        pair.sort_by(|a, b| a.0.id.cmp(&b.0.id));
        for (item, is_new) in pair {
            if is_new {
                inventory::insert(&mut *tx, item).await?;
            } else {
                inventory::update(&mut *tx, item).await?;
            }
        }
        movement::insert(&mut *tx, &out).await?;
        movement::insert(&mut *tx, &incoming).await?;
        tx.commit().await?;

        info!(
            number = %number,
            from = %source.store_id,
            to = %destination.store_id,
            product = %source.product_id,
            quantity = %quantity,
            "Stock transferred"
        );
        Ok(Transfer {
            number,
            source: StockChange {
                item: source,
                movement: out,
            },
            destination: StockChange {
                item: destination,
                movement: incoming,
            },
        })
    }
}

pub(crate) async fn load_item(conn: &mut SqliteConnection, id: &str) -> DbResult<InventoryItem> {
    inventory::fetch(conn, id)
        .await?
        .ok_or_else(|| DbError::not_found("InventoryItem", id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::pool::{Database, DbConfig};
    use chrono::Utc;

    async fn engine(config: EngineConfig) -> Engine {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        Engine::new(db, config).unwrap()
    }

    fn stamp() -> AuditStamp {
        AuditStamp::new("stocker", Utc::now())
    }

    async fn stocked(engine: &Engine, store: &str, units: i64, cents: i64) -> InventoryItem {
        let item = engine
            .create_inventory_item(InventoryItem::new("t", store, "P1", None, Utc::now()))
            .await
            .unwrap();
        engine
            .set_initial_stock(&item.id, Quantity::from_units(units), UnitCost::from_cents(cents), &stamp())
            .await
            .unwrap()
            .item
    }

    #[tokio::test]
    async fn test_issue_beyond_on_hand_changes_nothing() {
        let engine = engine(EngineConfig::default()).await;
        let item = stocked(&engine, "S1", 3, 100).await;

        let err = engine
            .issue_stock(&item.id, Quantity::from_units(5), None, &stamp())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Core(CoreError::InsufficientOnHand { .. })));

        let stored = engine.db().inventory().get(&item.id).await.unwrap().unwrap();
        assert_eq!(stored.quantity_on_hand, Quantity::from_units(3));
        assert_eq!(engine.db().movements().list_for_item(&item.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_negative_policy_allows_oversell() {
        let engine = engine(EngineConfig::default().with_negative_inventory(true)).await;
        let item = stocked(&engine, "S1", 3, 100).await;

        let change = engine
            .issue_stock(&item.id, Quantity::from_units(5), None, &stamp())
            .await
            .unwrap();
        assert_eq!(change.item.quantity_on_hand, Quantity::from_units(-2));
        assert_eq!(change.movement.quantity, Quantity::from_units(-5));
    }

    #[tokio::test]
    async fn test_receipt_blends_average_cost() {
        let engine = engine(EngineConfig::default()).await;
        let item = stocked(&engine, "S1", 10, 200).await;

        let change = engine
            .receive_stock(&item.id, Quantity::from_units(10), UnitCost::from_cents(300), None, &stamp())
            .await
            .unwrap();
        assert_eq!(change.item.unit_cost, UnitCost::from_cents(250));
        assert_eq!(change.item.last_cost, UnitCost::from_cents(300));
        assert_eq!(change.movement.created_by.as_deref(), Some("stocker"));
    }

    #[tokio::test]
    async fn test_reserve_then_release() {
        let engine = engine(EngineConfig::default()).await;
        let item = stocked(&engine, "S1", 5, 100).await;

        let held = engine.reserve(&item.id, Quantity::from_units(4), &stamp()).await.unwrap();
        assert_eq!(held.quantity_available, Quantity::from_units(1));

        let err = engine.reserve(&item.id, Quantity::from_units(2), &stamp()).await.unwrap_err();
        assert!(matches!(err, DbError::Core(CoreError::InsufficientAvailable { .. })));

        let err = engine.release(&item.id, Quantity::from_units(5), &stamp()).await.unwrap_err();
        assert!(matches!(err, DbError::Core(CoreError::OverRelease { .. })));

        let freed = engine.release(&item.id, Quantity::from_units(4), &stamp()).await.unwrap();
        assert_eq!(freed.quantity_reserved, Quantity::zero());
        freed.check_invariants().unwrap();
    }

    #[tokio::test]
    async fn test_write_off_spares_reserved_stock() {
        let engine = engine(EngineConfig::default()).await;
        let item = stocked(&engine, "S1", 5, 100).await;
        engine.reserve(&item.id, Quantity::from_units(3), &stamp()).await.unwrap();

        let err = engine
            .write_off_stock(&item.id, Quantity::from_units(3), MovementType::Damage, None, &stamp())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Core(CoreError::InsufficientAvailable { .. })));

        let change = engine
            .write_off_stock(&item.id, Quantity::from_units(2), MovementType::Expired, Some("Past date"), &stamp())
            .await
            .unwrap();
        assert_eq!(change.item.quantity_on_hand, Quantity::from_units(3));
        assert_eq!(change.movement.notes.as_deref(), Some("Past date"));
    }

    #[tokio::test]
    async fn test_return_restocks_at_average_cost() {
        let engine = engine(EngineConfig::default()).await;
        let item = stocked(&engine, "S1", 2, 150).await;

        let change = engine
            .return_stock(&item.id, Quantity::from_units(1), None, &stamp())
            .await
            .unwrap();
        assert_eq!(change.item.quantity_on_hand, Quantity::from_units(3));
        assert_eq!(change.movement.movement_type, MovementType::Return);
        assert_eq!(change.movement.unit_cost, UnitCost::from_cents(150));
    }

    #[tokio::test]
    async fn test_transfer_creates_destination_at_source_cost() {
        let engine = engine(EngineConfig::default()).await;
        let item = stocked(&engine, "S1", 10, 400).await;

        let transfer = engine
            .transfer_stock(&item.id, "S2", Quantity::from_units(4), &stamp())
            .await
            .unwrap();
        assert_eq!(transfer.number, "TRF-000001");
        assert_eq!(transfer.source.item.quantity_on_hand, Quantity::from_units(6));
        assert_eq!(transfer.destination.item.quantity_on_hand, Quantity::from_units(4));
        assert_eq!(transfer.destination.item.unit_cost, UnitCost::from_cents(400));

        let found = engine
            .db()
            .inventory()
            .find(engine.tenant_id(), "S2", "P1", None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, transfer.destination.item.id);

        let linked = engine
            .db()
            .movements()
            .list_for_reference("transfer", transfer.source.movement.reference_id.as_deref().unwrap())
            .await
            .unwrap();
        assert_eq!(linked.len(), 2);
    }

    #[tokio::test]
    async fn test_transfer_to_same_store_is_rejected() {
        let engine = engine(EngineConfig::default()).await;
        let item = stocked(&engine, "S1", 1, 100).await;

        let err = engine
            .transfer_stock(&item.id, "S1", Quantity::from_units(1), &stamp())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Core(CoreError::Validation(_))));
    }
}
