//! # Inventory
//!
//! Per-store stock records with weighted-average cost, and the append-only
//! movement log every quantity change produces.
//!
//! ## Quantities
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   on_hand   ████████████████████████████████████  (physically here)    │
//! │   reserved  ██████████████                        (promised to drafts) │
//! │   available               ██████████████████████  on_hand − reserved    │
//! │                                                                         │
//! │   Invariants                                                            │
//! │     available == on_hand − reserved                                     │
//! │     0 ≤ reserved ≤ max(on_hand, 0)                                      │
//! │                                                                         │
//! │   on_hand may go negative only through issue(.., allow_negative=true)  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every mutating method checks all of its preconditions first and returns
//! an error without touching the record. On success it returns the
//! [`StockMovement`] describing the change; the caller persists both.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::{Money, Quantity, UnitCost};
use crate::types::{new_id, DocumentRef};
use crate::validation::validate_positive_quantity;

// =============================================================================
// Movement Type
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    Sale,
    Purchase,
    Adjustment,
    TransferIn,
    TransferOut,
    Return,
    Damage,
    Expired,
    Initial,
}

text_enum!(MovementType {
    Sale => "sale",
    Purchase => "purchase",
    Adjustment => "adjustment",
    TransferIn => "transfer_in",
    TransferOut => "transfer_out",
    Return => "return",
    Damage => "damage",
    Expired => "expired",
    Initial => "initial",
});

// =============================================================================
// Inventory Item
// =============================================================================

/// Stock of one product (or variant) at one store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct InventoryItem {
    pub id: String,
    pub tenant_id: String,
    pub store_id: String,
    pub product_id: String,
    pub variant_id: Option<String>,
    pub quantity_on_hand: Quantity,
    pub quantity_reserved: Quantity,
    /// Always `on_hand − reserved`; stored for low-stock queries.
    pub quantity_available: Quantity,
    /// Weighted-average cost.
    pub unit_cost: UnitCost,
    /// Cost of the most recent receipt.
    pub last_cost: UnitCost,
    pub reorder_point: Quantity,
    pub reorder_quantity: Quantity,
    pub max_stock_level: Option<Quantity>,
    pub bin_location: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

impl InventoryItem {
    pub fn new(
        tenant_id: impl Into<String>,
        store_id: impl Into<String>,
        product_id: impl Into<String>,
        variant_id: Option<String>,
        at: DateTime<Utc>,
    ) -> Self {
        InventoryItem {
            id: new_id(),
            tenant_id: tenant_id.into(),
            store_id: store_id.into(),
            product_id: product_id.into(),
            variant_id,
            quantity_on_hand: Quantity::zero(),
            quantity_reserved: Quantity::zero(),
            quantity_available: Quantity::zero(),
            unit_cost: UnitCost::zero(),
            last_cost: UnitCost::zero(),
            reorder_point: Quantity::zero(),
            reorder_quantity: Quantity::zero(),
            max_stock_level: None,
            bin_location: None,
            created_at: at,
            updated_at: at,
            version: 0,
        }
    }

    pub fn with_reorder(mut self, point: Quantity, quantity: Quantity) -> Self {
        self.reorder_point = point;
        self.reorder_quantity = quantity;
        self
    }

    pub fn with_max_stock(mut self, max: Quantity) -> Self {
        self.max_stock_level = Some(max);
        self
    }

    // =========================================================================
    // Invariants
    // =========================================================================

    /// Verifies the quantity invariants on a loaded record.
    pub fn check_invariants(&self) -> CoreResult<()> {
        let violation = |what: String| Err(CoreError::IntegrityViolation(format!("inventory item {}: {}", self.id, what)));

        if self.quantity_available != self.quantity_on_hand - self.quantity_reserved {
            return violation(format!(
                "available {} != on hand {} - reserved {}",
                self.quantity_available, self.quantity_on_hand, self.quantity_reserved
            ));
        }
        if self.quantity_reserved.is_negative() {
            return violation(format!("reserved {} is negative", self.quantity_reserved));
        }
        if self.quantity_reserved > self.quantity_on_hand.floor_zero() {
            return violation(format!(
                "reserved {} exceeds on hand {}",
                self.quantity_reserved, self.quantity_on_hand
            ));
        }
        Ok(())
    }

    fn refresh_available(&mut self, at: DateTime<Utc>) {
        self.quantity_available = self.quantity_on_hand - self.quantity_reserved;
        self.updated_at = at;
    }

    fn movement(
        &self,
        movement_type: MovementType,
        quantity: Quantity,
        unit_cost: UnitCost,
        quantity_before: Quantity,
        at: DateTime<Utc>,
    ) -> StockMovement {
        StockMovement {
            id: new_id(),
            tenant_id: self.tenant_id.clone(),
            store_id: self.store_id.clone(),
            inventory_item_id: self.id.clone(),
            product_id: self.product_id.clone(),
            variant_id: self.variant_id.clone(),
            movement_type,
            quantity,
            unit_cost,
            quantity_before,
            quantity_after: self.quantity_on_hand,
            reference_type: None,
            reference_id: None,
            reference_number: None,
            notes: None,
            created_by: None,
            created_at: at,
        }
    }

    fn ensure_available(&self, requested: Quantity) -> CoreResult<()> {
        if requested > self.quantity_available {
            return Err(CoreError::InsufficientAvailable {
                item_id: self.id.clone(),
                available: self.quantity_available,
                requested,
            });
        }
        Ok(())
    }

    // =========================================================================
    // Reservations
    // =========================================================================

    /// Promises `qty` to an open document. On-hand is unchanged.
    pub fn reserve(&mut self, qty: Quantity, at: DateTime<Utc>) -> CoreResult<()> {
        validate_positive_quantity("quantity", qty)?;
        self.ensure_available(qty)?;

        self.quantity_reserved += qty;
        self.refresh_available(at);
        Ok(())
    }

    pub fn release(&mut self, qty: Quantity, at: DateTime<Utc>) -> CoreResult<()> {
        validate_positive_quantity("quantity", qty)?;
        if qty > self.quantity_reserved {
            return Err(CoreError::OverRelease {
                item_id: self.id.clone(),
                reserved: self.quantity_reserved,
                requested: qty,
            });
        }

        self.quantity_reserved -= qty;
        self.refresh_available(at);
        Ok(())
    }

    // =========================================================================
    // Stock Changes
    // =========================================================================

    /// Sets on-hand to a counted quantity.
    pub fn adjust_on_hand(
        &mut self,
        new_quantity: Quantity,
        reason: Option<String>,
        at: DateTime<Utc>,
    ) -> CoreResult<StockMovement> {
        if new_quantity.is_negative() {
            return Err(ValidationError::MustNotBeNegative {
                field: "new_quantity".to_string(),
            }
            .into());
        }
        if new_quantity < self.quantity_reserved {
            return Err(CoreError::BelowReserved {
                item_id: self.id.clone(),
                reserved: self.quantity_reserved,
                requested: new_quantity,
            });
        }

        let before = self.quantity_on_hand;
        self.quantity_on_hand = new_quantity;
        self.refresh_available(at);

        let mut movement = self.movement(MovementType::Adjustment, new_quantity - before, self.unit_cost, before, at);
        movement.notes = reason;
        Ok(movement)
    }

    fn receive_as(
        &mut self,
        movement_type: MovementType,
        qty: Quantity,
        cost: UnitCost,
        at: DateTime<Utc>,
    ) -> CoreResult<StockMovement> {
        validate_positive_quantity("quantity", qty)?;
        if cost.is_negative() {
            return Err(ValidationError::MustNotBeNegative {
                field: "unit_cost".to_string(),
            }
            .into());
        }

        let before = self.quantity_on_hand;
        if before.is_positive() {
            self.unit_cost = UnitCost::weighted_average(before, self.unit_cost, qty, cost);
        } else {
            self.unit_cost = cost;
        }
        self.quantity_on_hand += qty;
        self.refresh_available(at);

        Ok(self.movement(movement_type, qty, cost, before, at))
    }

    /// Books incoming stock and blends the average cost.
    pub fn receive(&mut self, qty: Quantity, cost: UnitCost, at: DateTime<Utc>) -> CoreResult<StockMovement> {
        let movement = self.receive_as(MovementType::Purchase, qty, cost, at)?;
        self.last_cost = cost;
        Ok(movement)
    }

    /// Opening stock for a new item.
    pub fn set_initial(&mut self, qty: Quantity, cost: UnitCost, at: DateTime<Utc>) -> CoreResult<StockMovement> {
        let movement = self.receive_as(MovementType::Initial, qty, cost, at)?;
        self.last_cost = cost;
        Ok(movement)
    }

    /// Stock arriving from another store at that store's cost.
    pub fn transfer_in(&mut self, qty: Quantity, cost: UnitCost, at: DateTime<Utc>) -> CoreResult<StockMovement> {
        self.receive_as(MovementType::TransferIn, qty, cost, at)
    }

    /// Customer return back onto the shelf at the current average cost.
    pub fn return_to_stock(&mut self, qty: Quantity, at: DateTime<Utc>) -> CoreResult<StockMovement> {
        let cost = self.unit_cost;
        self.receive_as(MovementType::Return, qty, cost, at)
    }

    /// Takes stock out for a sale.
    ///
    /// `from_reserved` is the part of `qty` that was reserved for this sale.
    /// The rest must come from available stock: it can never consume what
    /// other documents have reserved, even with `allow_negative`.
    pub fn issue(
        &mut self,
        qty: Quantity,
        from_reserved: Quantity,
        allow_negative: bool,
        at: DateTime<Utc>,
    ) -> CoreResult<StockMovement> {
        validate_positive_quantity("quantity", qty)?;
        if from_reserved.is_negative() || from_reserved > qty {
            return Err(ValidationError::OutOfRange {
                field: "from_reserved".to_string(),
                min: 0,
                max: qty.milli(),
            }
            .into());
        }
        if from_reserved > self.quantity_reserved {
            return Err(CoreError::OverRelease {
                item_id: self.id.clone(),
                reserved: self.quantity_reserved,
                requested: from_reserved,
            });
        }
        if !allow_negative && qty > self.quantity_on_hand {
            return Err(CoreError::InsufficientOnHand {
                item_id: self.id.clone(),
                on_hand: self.quantity_on_hand,
                requested: qty,
            });
        }

        let on_hand_after = self.quantity_on_hand - qty;
        let reserved_after = self.quantity_reserved - from_reserved;
        if reserved_after > on_hand_after.floor_zero() {
            return Err(CoreError::InsufficientAvailable {
                item_id: self.id.clone(),
                available: self.quantity_available,
                requested: qty - from_reserved,
            });
        }

        let before = self.quantity_on_hand;
        self.quantity_on_hand = on_hand_after;
        self.quantity_reserved = reserved_after;
        self.refresh_available(at);

        Ok(self.movement(MovementType::Sale, -qty, self.unit_cost, before, at))
    }

    /// Ships stock to another store.
    pub fn transfer_out(&mut self, qty: Quantity, at: DateTime<Utc>) -> CoreResult<StockMovement> {
        validate_positive_quantity("quantity", qty)?;
        self.ensure_available(qty)?;

        let before = self.quantity_on_hand;
        self.quantity_on_hand -= qty;
        self.refresh_available(at);

        Ok(self.movement(MovementType::TransferOut, -qty, self.unit_cost, before, at))
    }

    /// Removes damaged or expired stock. Reserved stock is never written off.
    pub fn write_off(
        &mut self,
        qty: Quantity,
        kind: MovementType,
        notes: Option<String>,
        at: DateTime<Utc>,
    ) -> CoreResult<StockMovement> {
        if !matches!(kind, MovementType::Damage | MovementType::Expired) {
            return Err(ValidationError::InvalidFormat {
                field: "movement_type".to_string(),
                reason: format!("write-off must be damage or expired, got {}", kind),
            }
            .into());
        }
        validate_positive_quantity("quantity", qty)?;
        self.ensure_available(qty)?;

        let before = self.quantity_on_hand;
        self.quantity_on_hand -= qty;
        self.refresh_available(at);

        let mut movement = self.movement(kind, -qty, self.unit_cost, before, at);
        movement.notes = notes;
        Ok(movement)
    }

    // =========================================================================
    // Derived Reads
    // =========================================================================

    pub fn is_low_stock(&self) -> bool {
        self.quantity_on_hand <= self.reorder_point
    }

    pub fn is_out_of_stock(&self) -> bool {
        !self.quantity_available.is_positive()
    }

    pub fn is_overstocked(&self) -> bool {
        self.max_stock_level
            .map(|max| self.quantity_on_hand > max)
            .unwrap_or(false)
    }

    /// On-hand valued at average cost. Negative stock values at zero.
    pub fn total_value(&self) -> Money {
        self.quantity_on_hand.floor_zero().times_cost(self.unit_cost)
    }

    /// Suggested reorder quantity when at or below the reorder point.
    ///
    /// Tops up to `max_stock_level` when one is set, never ordering less
    /// than `reorder_quantity`.
    pub fn needs_reorder(&self) -> Option<Quantity> {
        if !self.is_low_stock() || !self.reorder_quantity.is_positive() {
            return None;
        }
        let suggestion = match self.max_stock_level {
            Some(max) => (max - self.quantity_on_hand).max(self.reorder_quantity),
            None => self.reorder_quantity,
        };
        Some(suggestion)
    }
}

// =============================================================================
// Stock Movement
// =============================================================================

/// Append-only record of one quantity change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct StockMovement {
    pub id: String,
    pub tenant_id: String,
    pub store_id: String,
    pub inventory_item_id: String,
    pub product_id: String,
    pub variant_id: Option<String>,
    pub movement_type: MovementType,
    /// Signed: positive in, negative out.
    pub quantity: Quantity,
    pub unit_cost: UnitCost,
    pub quantity_before: Quantity,
    pub quantity_after: Quantity,
    pub reference_type: Option<String>,
    pub reference_id: Option<String>,
    pub reference_number: Option<String>,
    pub notes: Option<String>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl StockMovement {
    pub fn with_reference(mut self, reference: &DocumentRef) -> Self {
        self.reference_type = Some(reference.kind.clone());
        self.reference_id = Some(reference.id.clone());
        self.reference_number = Some(reference.number.clone());
        self
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.created_by = Some(actor.into());
        self
    }

    #[inline]
    pub fn is_inbound(&self) -> bool {
        self.quantity.is_positive()
    }

    #[inline]
    pub fn is_outbound(&self) -> bool {
        self.quantity.is_negative()
    }

    /// Absolute quantity at the movement's unit cost.
    pub fn total_value(&self) -> Money {
        self.quantity.abs().times_cost(self.unit_cost)
    }

    pub fn description(&self) -> String {
        let verb = match self.movement_type {
            MovementType::Sale => "Sold",
            MovementType::Purchase => "Received",
            MovementType::Adjustment => "Adjusted",
            MovementType::TransferIn => "Transferred in",
            MovementType::TransferOut => "Transferred out",
            MovementType::Return => "Returned",
            MovementType::Damage => "Damaged",
            MovementType::Expired => "Expired",
            MovementType::Initial => "Opening stock",
        };
        match &self.reference_number {
            Some(number) => format!("{} {} ({})", verb, self.quantity.abs(), number),
            None => format!("{} {}", verb, self.quantity.abs()),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn units(n: i64) -> Quantity {
        Quantity::from_units(n)
    }

    fn stocked(on_hand: i64, cost_cents: i64) -> InventoryItem {
        let now = Utc::now();
        let mut item = InventoryItem::new("t1", "store-1", "prod-1", None, now);
        if on_hand > 0 {
            item.receive(units(on_hand), UnitCost::from_cents(cost_cents), now).unwrap();
        }
        item
    }

    #[test]
    fn test_reserve_and_release() {
        let mut item = stocked(10, 100);
        item.reserve(units(4), Utc::now()).unwrap();
        assert_eq!(item.quantity_available, units(6));

        let before = item.clone();
        let err = item.reserve(units(7), Utc::now()).unwrap_err();
        assert!(matches!(err, CoreError::InsufficientAvailable { .. }));
        assert_eq!(item, before);

        assert!(matches!(
            item.release(units(5), Utc::now()),
            Err(CoreError::OverRelease { .. })
        ));
        item.release(units(4), Utc::now()).unwrap();
        assert_eq!(item.quantity_reserved, Quantity::zero());
        item.check_invariants().unwrap();
    }

    #[test]
    fn test_weighted_average_receive() {
        let mut item = stocked(10, 200);
        let movement = item.receive(units(30), UnitCost::from_cents(300), Utc::now()).unwrap();
        assert_eq!(item.unit_cost, UnitCost::from_cents(275));
        assert_eq!(item.last_cost, UnitCost::from_cents(300));
        assert_eq!(movement.movement_type, MovementType::Purchase);
        assert_eq!(movement.quantity_before, units(10));
        assert_eq!(movement.quantity_after, units(40));
        assert_eq!(item.total_value(), Money::from_cents(11_000));
    }

    #[test]
    fn test_receive_into_negative_stock_takes_new_cost() {
        let mut item = stocked(2, 100);
        item.issue(units(5), Quantity::zero(), true, Utc::now()).unwrap();
        assert_eq!(item.quantity_on_hand, units(-3));

        item.receive(units(10), UnitCost::from_cents(400), Utc::now()).unwrap();
        assert_eq!(item.unit_cost, UnitCost::from_cents(400));
        assert_eq!(item.quantity_on_hand, units(7));
    }

    #[test]
    fn test_issue_respects_other_reservations() {
        let mut item = stocked(10, 100);
        item.reserve(units(8), Utc::now()).unwrap();

        // 2 available, asking for 3 unreserved
        let err = item.issue(units(3), Quantity::zero(), false, Utc::now()).unwrap_err();
        assert!(matches!(err, CoreError::InsufficientAvailable { .. }));

        // negative stock still cannot eat reserved units
        let err = item.issue(units(3), Quantity::zero(), true, Utc::now()).unwrap_err();
        assert!(matches!(err, CoreError::InsufficientAvailable { .. }));

        let movement = item.issue(units(5), units(5), false, Utc::now()).unwrap();
        assert_eq!(movement.quantity, units(-5));
        assert!(movement.is_outbound());
        assert_eq!(item.quantity_on_hand, units(5));
        assert_eq!(item.quantity_reserved, units(3));
        assert_eq!(item.quantity_available, units(2));
        item.check_invariants().unwrap();
    }

    #[test]
    fn test_issue_insufficient_on_hand() {
        let mut item = stocked(3, 100);
        let before = item.clone();
        let err = item.issue(units(4), Quantity::zero(), false, Utc::now()).unwrap_err();
        assert!(matches!(err, CoreError::InsufficientOnHand { .. }));
        assert_eq!(item, before);

        assert!(matches!(
            item.issue(units(1), units(1), false, Utc::now()),
            Err(CoreError::OverRelease { .. })
        ));
    }

    #[test]
    fn test_adjust_on_hand() {
        let mut item = stocked(10, 100);
        item.reserve(units(4), Utc::now()).unwrap();

        assert!(matches!(
            item.adjust_on_hand(units(-1), None, Utc::now()),
            Err(CoreError::Validation(_))
        ));
        let err = item.adjust_on_hand(units(3), None, Utc::now()).unwrap_err();
        assert!(matches!(err, CoreError::BelowReserved { .. }));

        let movement = item.adjust_on_hand(units(7), Some("count".into()), Utc::now()).unwrap();
        assert_eq!(movement.quantity, units(-3));
        assert_eq!(movement.quantity_before, units(10));
        assert_eq!(movement.quantity_after, units(7));
        assert_eq!(movement.notes.as_deref(), Some("count"));
        assert_eq!(item.quantity_available, units(3));
    }

    #[test]
    fn test_transfers_and_write_offs() {
        let mut item = stocked(10, 100);
        item.reserve(units(6), Utc::now()).unwrap();

        assert!(item.transfer_out(units(5), Utc::now()).is_err());
        let out = item.transfer_out(units(2), Utc::now()).unwrap();
        assert_eq!(out.movement_type, MovementType::TransferOut);

        assert!(item.write_off(units(1), MovementType::Sale, None, Utc::now()).is_err());
        assert!(item.write_off(units(3), MovementType::Damage, None, Utc::now()).is_err());
        let damaged = item.write_off(units(2), MovementType::Damage, None, Utc::now()).unwrap();
        assert_eq!(damaged.total_value(), Money::from_cents(200));
        assert_eq!(item.quantity_on_hand, units(6));

        item.transfer_in(units(6), UnitCost::from_cents(200), Utc::now()).unwrap();
        assert_eq!(item.unit_cost, UnitCost::from_cents(150));
        item.check_invariants().unwrap();
    }

    #[test]
    fn test_check_invariants_detects_corruption() {
        let mut item = stocked(5, 100);
        item.quantity_reserved = units(6);
        item.quantity_available = units(-1);
        assert!(matches!(
            item.check_invariants(),
            Err(CoreError::IntegrityViolation(_))
        ));
    }

    #[test]
    fn test_reorder_suggestions() {
        let item = stocked(3, 100)
            .with_reorder(units(5), units(10))
            .with_max_stock(units(20));
        assert!(item.is_low_stock());
        assert_eq!(item.needs_reorder(), Some(units(17)));
        assert!(!item.is_overstocked());

        let plenty = stocked(30, 100).with_reorder(units(5), units(10)).with_max_stock(units(20));
        assert_eq!(plenty.needs_reorder(), None);
        assert!(plenty.is_overstocked());
    }

    #[test]
    fn test_movement_description() {
        let mut item = stocked(0, 0);
        let movement = item
            .receive(units(3), UnitCost::from_cents(100), Utc::now())
            .unwrap()
            .with_reference(&DocumentRef::new("goods_receipt", "gr-1", "GR-000001"));
        assert!(movement.is_inbound());
        assert_eq!(movement.description(), "Received 3.000 (GR-000001)");
    }
}
