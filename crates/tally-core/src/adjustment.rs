//! # Stock Adjustments
//!
//! Counted corrections to on-hand quantities, approved before they apply.
//!
//! ```text
//! DRAFT ──approve()──► APPROVED ──apply()──► APPLIED (terminal)
//!   │  add_item()          needs ≥ 1 line
//! ```
//!
//! `apply` runs every line on a copy of the affected inventory items and
//! writes the copies back only when all lines succeed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::inventory::{InventoryItem, StockMovement};
use crate::money::{Money, Quantity, UnitCost};
use crate::types::{new_id, AuditStamp, DocumentRef};
use crate::validation::validate_name;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentStatus {
    Draft,
    Approved,
    Applied,
}

text_enum!(AdjustmentStatus {
    Draft => "draft",
    Approved => "approved",
    Applied => "applied",
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct StockAdjustmentItem {
    pub id: String,
    pub adjustment_id: String,
    pub inventory_item_id: String,
    /// On-hand when the line was added.
    pub current_quantity: Quantity,
    pub new_quantity: Quantity,
    pub unit_cost: Option<UnitCost>,
    pub reason: Option<String>,
}

impl StockAdjustmentItem {
    pub fn quantity_difference(&self) -> Quantity {
        self.new_quantity - self.current_quantity
    }

    /// Signed value of the difference at the snapshot cost.
    pub fn value_impact(&self) -> Money {
        self.unit_cost
            .map(|cost| self.quantity_difference().times_cost(cost))
            .unwrap_or_default()
    }

    pub fn is_increase(&self) -> bool {
        self.quantity_difference().is_positive()
    }

    pub fn is_decrease(&self) -> bool {
        self.quantity_difference().is_negative()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct StockAdjustment {
    pub id: String,
    pub tenant_id: String,
    pub adjustment_number: String,
    pub store_id: String,
    pub reason: String,
    pub notes: Option<String>,
    pub status: AdjustmentStatus,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub applied_by: Option<String>,
    pub applied_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
    #[cfg_attr(feature = "sqlx", sqlx(skip))]
    pub items: Vec<StockAdjustmentItem>,
}

impl StockAdjustment {
    pub fn new(
        tenant_id: impl Into<String>,
        adjustment_number: impl Into<String>,
        store_id: impl Into<String>,
        reason: impl Into<String>,
        at: DateTime<Utc>,
    ) -> CoreResult<Self> {
        let reason = reason.into();
        validate_name("reason", &reason)?;
        Ok(StockAdjustment {
            id: new_id(),
            tenant_id: tenant_id.into(),
            adjustment_number: adjustment_number.into(),
            store_id: store_id.into(),
            reason,
            notes: None,
            status: AdjustmentStatus::Draft,
            approved_by: None,
            approved_at: None,
            applied_by: None,
            applied_at: None,
            created_at: at,
            updated_at: at,
            version: 0,
            items: Vec::new(),
        })
    }

    pub fn reference(&self) -> DocumentRef {
        DocumentRef::new("stock_adjustment", self.id.clone(), self.adjustment_number.clone())
    }

    /// Adds a counted quantity for `item`, snapshotting its current on-hand
    /// and cost. A second line for the same item replaces the first.
    pub fn add_item(
        &mut self,
        item: &InventoryItem,
        new_quantity: Quantity,
        reason: Option<String>,
    ) -> CoreResult<&StockAdjustmentItem> {
        if self.status != AdjustmentStatus::Draft {
            return Err(CoreError::NotDraft {
                entity: "StockAdjustment",
                id: self.adjustment_number.clone(),
                status: self.status.to_string(),
            });
        }
        if item.store_id != self.store_id {
            return Err(ValidationError::InvalidFormat {
                field: "inventory_item_id".to_string(),
                reason: format!("item {} is stocked at another store", item.id),
            }
            .into());
        }
        if new_quantity.is_negative() {
            return Err(ValidationError::MustNotBeNegative {
                field: "new_quantity".to_string(),
            }
            .into());
        }

        let line = StockAdjustmentItem {
            id: new_id(),
            adjustment_id: self.id.clone(),
            inventory_item_id: item.id.clone(),
            current_quantity: item.quantity_on_hand,
            new_quantity,
            unit_cost: Some(item.unit_cost),
            reason,
        };
        let index = match self.items.iter().position(|l| l.inventory_item_id == item.id) {
            Some(index) => {
                self.items[index] = line;
                index
            }
            None => {
                self.items.push(line);
                self.items.len() - 1
            }
        };
        Ok(&self.items[index])
    }

    pub fn approve(&mut self, stamp: &AuditStamp) -> CoreResult<()> {
        if self.status != AdjustmentStatus::Draft {
            return Err(CoreError::InvalidStatus {
                entity: "StockAdjustment",
                id: self.adjustment_number.clone(),
                status: self.status.to_string(),
                operation: "approve",
            });
        }
        if self.items.is_empty() {
            return Err(ValidationError::Required {
                field: "items".to_string(),
            }
            .into());
        }
        self.status = AdjustmentStatus::Approved;
        self.approved_by = Some(stamp.actor.clone());
        self.approved_at = Some(stamp.at);
        self.updated_at = stamp.at;
        Ok(())
    }

    /// Applies every line to `inventory`, keyed by inventory item id.
    ///
    /// Lines run in ascending inventory-item order. If any line fails,
    /// `inventory` and the adjustment are left exactly as they were.
    pub fn apply(
        &mut self,
        stamp: &AuditStamp,
        inventory: &mut BTreeMap<String, InventoryItem>,
    ) -> CoreResult<Vec<StockMovement>> {
        match self.status {
            AdjustmentStatus::Applied => {
                return Err(CoreError::AlreadyApplied {
                    id: self.adjustment_number.clone(),
                })
            }
            AdjustmentStatus::Draft => {
                return Err(CoreError::NotApproved {
                    id: self.adjustment_number.clone(),
                })
            }
            AdjustmentStatus::Approved => {}
        }

        let lines: BTreeMap<&str, &StockAdjustmentItem> = self
            .items
            .iter()
            .map(|line| (line.inventory_item_id.as_str(), line))
            .collect();
        let reference = self.reference();
        let notes = format!("Stock adjustment: {}", self.reason);

        let mut staged = Vec::with_capacity(lines.len());
        let mut movements = Vec::with_capacity(lines.len());
        for (item_id, line) in lines {
            let mut item = inventory
                .get(item_id)
                .cloned()
                .ok_or_else(|| CoreError::InventoryItemNotFound(item_id.to_string()))?;
            let line_notes = match &line.reason {
                Some(reason) => format!("{} ({})", notes, reason),
                None => notes.clone(),
            };
            let movement = item
                .adjust_on_hand(line.new_quantity, Some(line_notes), stamp.at)?
                .with_reference(&reference)
                .with_actor(stamp.actor.clone());
            movements.push(movement);
            staged.push(item);
        }

        for item in staged {
            inventory.insert(item.id.clone(), item);
        }
        self.status = AdjustmentStatus::Applied;
        self.applied_by = Some(stamp.actor.clone());
        self.applied_at = Some(stamp.at);
        self.updated_at = stamp.at;
        Ok(movements)
    }

    pub fn total_items(&self) -> usize {
        self.items.len()
    }

    pub fn total_value_impact(&self) -> Money {
        self.items.iter().map(|i| i.value_impact()).sum()
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

    fn stamp() -> AuditStamp {
        AuditStamp::new("manager-1", Utc::now())
    }

    fn stock(on_hand: i64) -> InventoryItem {
        let now = Utc::now();
        let mut item = InventoryItem::new("t1", "store-1", "prod", None, now);
        item.receive(units(on_hand), UnitCost::from_cents(150), now).unwrap();
        item
    }

    #[test]
    fn test_apply_requires_approval() {
        let item = stock(10);
        let mut adj = StockAdjustment::new("t1", "ADJ-1", "store-1", "cycle count", Utc::now()).unwrap();
        assert!(adj.approve(&stamp()).is_err());

        adj.add_item(&item, units(8), None).unwrap();
        let mut inventory = BTreeMap::from([(item.id.clone(), item)]);
        assert!(matches!(
            adj.apply(&stamp(), &mut inventory),
            Err(CoreError::NotApproved { .. })
        ));

        adj.approve(&stamp()).unwrap();
        let movements = adj.apply(&stamp(), &mut inventory).unwrap();
        assert_eq!(movements.len(), 1);
        assert_eq!(movements[0].quantity, units(-2));
        assert_eq!(movements[0].reference_number.as_deref(), Some("ADJ-1"));
        assert_eq!(movements[0].created_by.as_deref(), Some("manager-1"));
        assert_eq!(adj.status, AdjustmentStatus::Applied);

        assert!(matches!(
            adj.apply(&stamp(), &mut inventory),
            Err(CoreError::AlreadyApplied { .. })
        ));
    }

    #[test]
    fn test_failed_line_rolls_back_all() {
        let good = stock(10);
        let mut reserved = stock(10);
        reserved.reserve(units(6), Utc::now()).unwrap();

        let mut adj = StockAdjustment::new("t1", "ADJ-2", "store-1", "shrink", Utc::now()).unwrap();
        adj.add_item(&good, units(12), None).unwrap();
        adj.add_item(&reserved, units(5), None).unwrap();
        adj.approve(&stamp()).unwrap();

        let mut inventory = BTreeMap::from([
            (good.id.clone(), good.clone()),
            (reserved.id.clone(), reserved.clone()),
        ]);
        let err = adj.apply(&stamp(), &mut inventory).unwrap_err();
        assert!(matches!(err, CoreError::BelowReserved { .. }));
        assert_eq!(inventory[&good.id], good);
        assert_eq!(inventory[&reserved.id], reserved);
        assert_eq!(adj.status, AdjustmentStatus::Approved);
    }

    #[test]
    fn test_value_impact() {
        let a = stock(10);
        let b = stock(4);
        let mut adj = StockAdjustment::new("t1", "ADJ-3", "store-1", "count", Utc::now()).unwrap();
        adj.add_item(&a, units(7), None).unwrap();
        adj.add_item(&b, units(5), Some("found".into())).unwrap();

        assert_eq!(adj.total_items(), 2);
        assert!(adj.items[0].is_decrease());
        assert!(adj.items[1].is_increase());
        // -3 × 1.50 + 1 × 1.50
        assert_eq!(adj.total_value_impact(), Money::from_cents(-300));

        adj.add_item(&a, units(10), None).unwrap();
        assert_eq!(adj.total_items(), 2);
        assert_eq!(adj.total_value_impact(), Money::from_cents(150));
    }

    #[test]
    fn test_rejects_other_store_and_negative() {
        let now = Utc::now();
        let elsewhere = InventoryItem::new("t1", "store-2", "prod", None, now);
        let mut adj = StockAdjustment::new("t1", "ADJ-4", "store-1", "count", now).unwrap();
        assert!(adj.add_item(&elsewhere, units(1), None).is_err());
        assert!(adj.add_item(&stock(1), units(-1), None).is_err());
        assert!(StockAdjustment::new("t1", "ADJ-5", "store-1", " ", now).is_err());
    }
}
