//! # Purchasing
//!
//! Purchase orders and the goods receipts that book stock against them.
//!
//! ## Purchase Order Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  DRAFT ─submit─► PENDING ─approve─► APPROVED ─send─► SENT              │
//! │    │                │                   │              │                │
//! │    │                │                   │              │ goods receipts │
//! │    │                │                   │              ▼                │
//! │    │                │                   │      PARTIALLY_RECEIVED       │
//! │    │                │                   │              │                │
//! │    │                │                   │              ▼                │
//! │    │                │                   │          RECEIVED ─complete─► COMPLETED
//! │    ▼                ▼                   ▼              ▼                │
//! │  ─────────────────────── cancel() ──────────────────► CANCELLED        │
//! │                      (not from RECEIVED / COMPLETED)                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Receiving
//! A [`GoodsReceipt`] is drafted against a sent order and completed in one
//! step. Completion checks every line against `ordered − received` before
//! any quantity changes, then hands back [`StockReceipt`] instructions for
//! the inventory side.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::customer::Supplier;
use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::{Money, Quantity, UnitCost};
use crate::types::{new_id, AuditStamp, DocumentRef, TaxRate};
use crate::validation::{validate_bps, validate_non_negative, validate_positive_amount, validate_positive_quantity};

// =============================================================================
// Enums
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum PurchaseOrderStatus {
    Draft,
    Pending,
    Approved,
    Sent,
    PartiallyReceived,
    Received,
    Completed,
    Cancelled,
}

text_enum!(PurchaseOrderStatus {
    Draft => "draft",
    Pending => "pending",
    Approved => "approved",
    Sent => "sent",
    PartiallyReceived => "partially_received",
    Received => "received",
    Completed => "completed",
    Cancelled => "cancelled",
});

impl PurchaseOrderStatus {
    /// Goods may be received in these states.
    pub fn accepts_receipts(&self) -> bool {
        matches!(
            self,
            PurchaseOrderStatus::Sent | PurchaseOrderStatus::PartiallyReceived | PurchaseOrderStatus::Received
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum GoodsReceiptStatus {
    Draft,
    Completed,
}

text_enum!(GoodsReceiptStatus {
    Draft => "draft",
    Completed => "completed",
});

// =============================================================================
// Purchase Order
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct PurchaseOrderItem {
    pub id: String,
    pub purchase_order_id: String,
    pub line_number: i64,
    pub product_id: String,
    pub variant_id: Option<String>,
    pub quantity_ordered: Quantity,
    pub quantity_received: Quantity,
    pub unit_cost: UnitCost,
    pub line_total: Money,
}

impl PurchaseOrderItem {
    pub fn quantity_pending(&self) -> Quantity {
        (self.quantity_ordered - self.quantity_received).floor_zero()
    }

    pub fn is_fully_received(&self) -> bool {
        self.quantity_received >= self.quantity_ordered
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct PurchaseOrder {
    pub id: String,
    pub tenant_id: String,
    pub po_number: String,
    pub store_id: String,
    pub supplier_id: String,
    pub status: PurchaseOrderStatus,
    pub order_date: DateTime<Utc>,
    pub expected_delivery_date: Option<NaiveDate>,
    pub subtotal: Money,
    /// Requested fixed discount; `discount_amount` is what applies.
    pub discount_value: Money,
    pub discount_amount: Money,
    pub tax_rate: TaxRate,
    pub tax_inclusive: bool,
    pub tax_amount: Money,
    pub shipping_cost: Money,
    pub total_amount: Money,
    pub amount_paid: Money,
    pub amount_due: Money,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
    #[cfg_attr(feature = "sqlx", sqlx(skip))]
    pub items: Vec<PurchaseOrderItem>,
}

impl PurchaseOrder {
    pub fn new(
        tenant_id: impl Into<String>,
        po_number: impl Into<String>,
        store_id: impl Into<String>,
        supplier_id: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        PurchaseOrder {
            id: new_id(),
            tenant_id: tenant_id.into(),
            po_number: po_number.into(),
            store_id: store_id.into(),
            supplier_id: supplier_id.into(),
            status: PurchaseOrderStatus::Draft,
            order_date: at,
            expected_delivery_date: None,
            subtotal: Money::zero(),
            discount_value: Money::zero(),
            discount_amount: Money::zero(),
            tax_rate: TaxRate::zero(),
            tax_inclusive: false,
            tax_amount: Money::zero(),
            shipping_cost: Money::zero(),
            total_amount: Money::zero(),
            amount_paid: Money::zero(),
            amount_due: Money::zero(),
            approved_by: None,
            approved_at: None,
            sent_at: None,
            completed_at: None,
            cancellation_reason: None,
            notes: None,
            created_at: at,
            updated_at: at,
            version: 0,
            items: Vec::new(),
        }
    }

    pub fn reference(&self) -> DocumentRef {
        DocumentRef::new("purchase_order", self.id.clone(), self.po_number.clone())
    }

    fn ensure_draft(&self) -> CoreResult<()> {
        if self.status != PurchaseOrderStatus::Draft {
            return Err(CoreError::NotDraft {
                entity: "PurchaseOrder",
                id: self.po_number.clone(),
                status: self.status.to_string(),
            });
        }
        Ok(())
    }

    fn invalid_status(&self, operation: &'static str) -> CoreError {
        CoreError::InvalidStatus {
            entity: "PurchaseOrder",
            id: self.po_number.clone(),
            status: self.status.to_string(),
            operation,
        }
    }

    pub fn item(&self, line_id: &str) -> CoreResult<&PurchaseOrderItem> {
        self.items
            .iter()
            .find(|i| i.id == line_id)
            .ok_or_else(|| CoreError::LineNotFound {
                document_id: self.po_number.clone(),
                line_id: line_id.to_string(),
            })
    }

    // =========================================================================
    // Totals
    // =========================================================================

    pub fn calculate_totals(&mut self) {
        for item in &mut self.items {
            item.line_total = item.quantity_ordered.times_cost(item.unit_cost);
        }
        self.subtotal = self.items.iter().map(|i| i.line_total).sum();
        self.discount_amount = self.discount_value.min(self.subtotal).floor_zero();

        let taxable = self.subtotal - self.discount_amount;
        if self.tax_inclusive {
            self.tax_amount = taxable.extract_inclusive_tax(self.tax_rate);
            self.total_amount = taxable + self.shipping_cost;
        } else {
            self.tax_amount = taxable.calculate_tax(self.tax_rate);
            self.total_amount = taxable + self.tax_amount + self.shipping_cost;
        }
        self.amount_due = (self.total_amount - self.amount_paid).floor_zero();
    }

    // =========================================================================
    // Editing (draft only)
    // =========================================================================

    pub fn add_item(
        &mut self,
        product_id: &str,
        variant_id: Option<&str>,
        quantity: Quantity,
        unit_cost: UnitCost,
    ) -> CoreResult<&PurchaseOrderItem> {
        self.ensure_draft()?;
        validate_positive_quantity("quantity", quantity)?;
        if unit_cost.is_negative() {
            return Err(ValidationError::MustNotBeNegative {
                field: "unit_cost".to_string(),
            }
            .into());
        }

        let existing = self
            .items
            .iter()
            .position(|i| i.product_id == product_id && i.variant_id.as_deref() == variant_id);
        let index = match existing {
            Some(index) => {
                self.items[index].quantity_ordered += quantity;
                index
            }
            None => {
                let line_number = self.items.iter().map(|i| i.line_number).max().unwrap_or(0) + 1;
                self.items.push(PurchaseOrderItem {
                    id: new_id(),
                    purchase_order_id: self.id.clone(),
                    line_number,
                    product_id: product_id.to_string(),
                    variant_id: variant_id.map(str::to_string),
                    quantity_ordered: quantity,
                    quantity_received: Quantity::zero(),
                    unit_cost,
                    line_total: Money::zero(),
                });
                self.items.len() - 1
            }
        };
        self.calculate_totals();
        Ok(&self.items[index])
    }

    pub fn remove_item(&mut self, line_id: &str) -> CoreResult<PurchaseOrderItem> {
        self.ensure_draft()?;
        let index = self
            .items
            .iter()
            .position(|i| i.id == line_id)
            .ok_or_else(|| CoreError::LineNotFound {
                document_id: self.po_number.clone(),
                line_id: line_id.to_string(),
            })?;
        let removed = self.items.remove(index);
        self.calculate_totals();
        Ok(removed)
    }

    pub fn set_discount(&mut self, amount: Money) -> CoreResult<()> {
        self.ensure_draft()?;
        validate_non_negative("discount_amount", amount)?;
        self.discount_value = amount;
        self.calculate_totals();
        Ok(())
    }

    pub fn set_shipping(&mut self, amount: Money) -> CoreResult<()> {
        self.ensure_draft()?;
        validate_non_negative("shipping_cost", amount)?;
        self.shipping_cost = amount;
        self.calculate_totals();
        Ok(())
    }

    pub fn set_tax(&mut self, rate: TaxRate, inclusive: bool) -> CoreResult<()> {
        self.ensure_draft()?;
        validate_bps("tax_rate", rate.bps())?;
        self.tax_rate = rate;
        self.tax_inclusive = inclusive;
        self.calculate_totals();
        Ok(())
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    pub fn submit(&mut self, at: DateTime<Utc>) -> CoreResult<()> {
        self.ensure_draft()?;
        if self.items.is_empty() {
            return Err(ValidationError::Required {
                field: "items".to_string(),
            }
            .into());
        }
        self.status = PurchaseOrderStatus::Pending;
        self.updated_at = at;
        Ok(())
    }

    pub fn approve(&mut self, stamp: &AuditStamp) -> CoreResult<()> {
        if self.status != PurchaseOrderStatus::Pending {
            return Err(self.invalid_status("approve"));
        }
        self.status = PurchaseOrderStatus::Approved;
        self.approved_by = Some(stamp.actor.clone());
        self.approved_at = Some(stamp.at);
        self.updated_at = stamp.at;
        Ok(())
    }

    pub fn send_to_supplier(&mut self, at: DateTime<Utc>) -> CoreResult<()> {
        if self.status != PurchaseOrderStatus::Approved {
            return Err(self.invalid_status("send"));
        }
        self.status = PurchaseOrderStatus::Sent;
        self.sent_at = Some(at);
        self.updated_at = at;
        Ok(())
    }

    pub fn cancel(&mut self, reason: Option<String>, at: DateTime<Utc>) -> CoreResult<()> {
        match self.status {
            PurchaseOrderStatus::Received | PurchaseOrderStatus::Completed | PurchaseOrderStatus::Cancelled => {
                Err(self.invalid_status("cancel"))
            }
            _ => {
                self.status = PurchaseOrderStatus::Cancelled;
                self.cancellation_reason = reason;
                self.updated_at = at;
                Ok(())
            }
        }
    }

    /// Closes a fully received order and books it against the supplier.
    pub fn complete(&mut self, supplier: &mut Supplier, at: DateTime<Utc>) -> CoreResult<()> {
        if self.status != PurchaseOrderStatus::Received {
            return Err(self.invalid_status("complete"));
        }
        if supplier.id != self.supplier_id {
            return Err(CoreError::IntegrityViolation(format!(
                "purchase order {} belongs to supplier {}, not {}",
                self.po_number, self.supplier_id, supplier.id
            )));
        }
        self.status = PurchaseOrderStatus::Completed;
        self.completed_at = Some(at);
        self.updated_at = at;
        supplier.record_purchase_order(self.total_amount, self.amount_due, at);
        Ok(())
    }

    /// Records a payment to the supplier against this order.
    pub fn record_payment(&mut self, amount: Money, at: DateTime<Utc>) -> CoreResult<()> {
        if matches!(self.status, PurchaseOrderStatus::Draft | PurchaseOrderStatus::Cancelled) {
            return Err(self.invalid_status("record payment"));
        }
        validate_positive_amount("amount", amount)?;
        if amount > self.amount_due {
            return Err(ValidationError::OutOfRange {
                field: "amount".to_string(),
                min: 1,
                max: self.amount_due.cents(),
            }
            .into());
        }
        self.amount_paid += amount;
        self.calculate_totals();
        self.updated_at = at;
        Ok(())
    }

    /// Recomputes the receiving status from line quantities.
    fn refresh_receiving_status(&mut self) {
        if self.items.iter().all(|i| i.is_fully_received()) {
            self.status = PurchaseOrderStatus::Received;
        } else if self.items.iter().any(|i| i.quantity_received.is_positive()) {
            self.status = PurchaseOrderStatus::PartiallyReceived;
        }
    }

    pub fn is_fully_received(&self) -> bool {
        !self.items.is_empty() && self.items.iter().all(|i| i.is_fully_received())
    }
}

// =============================================================================
// Goods Receipt
// =============================================================================

/// A requested receipt line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptLine {
    pub po_item_id: String,
    pub quantity: Quantity,
    /// Defaults to the order line's cost.
    pub unit_cost: Option<UnitCost>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct GoodsReceiptItem {
    pub id: String,
    pub goods_receipt_id: String,
    pub line_number: i64,
    pub po_item_id: String,
    pub product_id: String,
    pub variant_id: Option<String>,
    pub quantity_received: Quantity,
    pub unit_cost: UnitCost,
}

/// Stock to book into inventory for one receipt line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReceipt {
    pub po_item_id: String,
    pub store_id: String,
    pub product_id: String,
    pub variant_id: Option<String>,
    pub quantity: Quantity,
    pub unit_cost: UnitCost,
}

impl StockReceipt {
    pub fn value(&self) -> Money {
        self.quantity.times_cost(self.unit_cost)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct GoodsReceipt {
    pub id: String,
    pub tenant_id: String,
    pub receipt_number: String,
    pub purchase_order_id: String,
    pub store_id: String,
    pub status: GoodsReceiptStatus,
    pub received_by: Option<String>,
    pub received_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
    #[cfg_attr(feature = "sqlx", sqlx(skip))]
    pub items: Vec<GoodsReceiptItem>,
}

impl GoodsReceipt {
    /// Drafts a receipt against an order that is out with the supplier.
    pub fn draft(
        po: &PurchaseOrder,
        receipt_number: impl Into<String>,
        lines: &[ReceiptLine],
        at: DateTime<Utc>,
    ) -> CoreResult<GoodsReceipt> {
        if !po.status.accepts_receipts() {
            return Err(po.invalid_status("receive goods"));
        }
        if lines.is_empty() {
            return Err(ValidationError::Required {
                field: "lines".to_string(),
            }
            .into());
        }

        let id = new_id();
        let mut items = Vec::with_capacity(lines.len());
        for (index, line) in lines.iter().enumerate() {
            validate_positive_quantity("quantity", line.quantity)?;
            let po_item = po.item(&line.po_item_id)?;
            let unit_cost = line.unit_cost.unwrap_or(po_item.unit_cost);
            if unit_cost.is_negative() {
                return Err(ValidationError::MustNotBeNegative {
                    field: "unit_cost".to_string(),
                }
                .into());
            }
            items.push(GoodsReceiptItem {
                id: new_id(),
                goods_receipt_id: id.clone(),
                line_number: index as i64 + 1,
                po_item_id: po_item.id.clone(),
                product_id: po_item.product_id.clone(),
                variant_id: po_item.variant_id.clone(),
                quantity_received: line.quantity,
                unit_cost,
            });
        }

        Ok(GoodsReceipt {
            id,
            tenant_id: po.tenant_id.clone(),
            receipt_number: receipt_number.into(),
            purchase_order_id: po.id.clone(),
            store_id: po.store_id.clone(),
            status: GoodsReceiptStatus::Draft,
            received_by: None,
            received_at: None,
            notes: None,
            created_at: at,
            updated_at: at,
            version: 0,
            items,
        })
    }

    pub fn reference(&self) -> DocumentRef {
        DocumentRef::new("goods_receipt", self.id.clone(), self.receipt_number.clone())
    }

    pub fn total_value(&self) -> Money {
        self.items
            .iter()
            .map(|i| i.quantity_received.times_cost(i.unit_cost))
            .sum()
    }

    /// Completes the receipt against `po`.
    ///
    /// Every line is checked before any quantity moves: one over-receiving
    /// line fails the whole receipt with nothing changed.
    pub fn complete(&mut self, po: &mut PurchaseOrder, stamp: &AuditStamp) -> CoreResult<Vec<StockReceipt>> {
        if self.status != GoodsReceiptStatus::Draft {
            return Err(CoreError::NotDraft {
                entity: "GoodsReceipt",
                id: self.receipt_number.clone(),
                status: self.status.to_string(),
            });
        }
        if self.purchase_order_id != po.id {
            return Err(CoreError::IntegrityViolation(format!(
                "goods receipt {} is for order {}, not {}",
                self.receipt_number, self.purchase_order_id, po.id
            )));
        }
        if !po.status.accepts_receipts() {
            return Err(po.invalid_status("receive goods"));
        }

        let mut requested: BTreeMap<&str, Quantity> = BTreeMap::new();
        for item in &self.items {
            *requested.entry(item.po_item_id.as_str()).or_default() += item.quantity_received;
        }
        for (line_id, quantity) in &requested {
            let line = po.item(line_id)?;
            if line.quantity_received + *quantity > line.quantity_ordered {
                return Err(CoreError::OverReceive {
                    line_id: line_id.to_string(),
                    ordered: line.quantity_ordered,
                    received: line.quantity_received,
                    requested: *quantity,
                });
            }
        }

        for line in &mut po.items {
            if let Some(quantity) = requested.get(line.id.as_str()) {
                line.quantity_received += *quantity;
            }
        }
        po.refresh_receiving_status();
        po.updated_at = stamp.at;

        self.status = GoodsReceiptStatus::Completed;
        self.received_by = Some(stamp.actor.clone());
        self.received_at = Some(stamp.at);
        self.updated_at = stamp.at;

        Ok(self
            .items
            .iter()
            .map(|item| StockReceipt {
                po_item_id: item.po_item_id.clone(),
                store_id: self.store_id.clone(),
                product_id: item.product_id.clone(),
                variant_id: item.variant_id.clone(),
                quantity: item.quantity_received,
                unit_cost: item.unit_cost,
            })
            .collect())
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
        AuditStamp::new("buyer-1", Utc::now())
    }

    /// A sent order: 10 × p1 @ $2.00, 5 × p2 @ $4.00.
    fn sent_order() -> PurchaseOrder {
        let mut po = PurchaseOrder::new("t1", "PO-000001", "store-1", "sup-1", Utc::now());
        po.add_item("p1", None, units(10), UnitCost::from_cents(200)).unwrap();
        po.add_item("p2", None, units(5), UnitCost::from_cents(400)).unwrap();
        po.submit(Utc::now()).unwrap();
        po.approve(&stamp()).unwrap();
        po.send_to_supplier(Utc::now()).unwrap();
        po
    }

    fn line(po: &PurchaseOrder, index: usize, qty: i64) -> ReceiptLine {
        ReceiptLine {
            po_item_id: po.items[index].id.clone(),
            quantity: units(qty),
            unit_cost: None,
        }
    }

    #[test]
    fn test_totals_with_shipping() {
        let mut po = PurchaseOrder::new("t1", "PO-1", "store-1", "sup-1", Utc::now());
        po.add_item("p1", None, units(10), UnitCost::from_cents(200)).unwrap();
        po.set_discount(Money::from_cents(500)).unwrap();
        po.set_tax(TaxRate::from_bps(1000), false).unwrap();
        po.set_shipping(Money::from_cents(750)).unwrap();

        assert_eq!(po.subtotal.cents(), 2000);
        assert_eq!(po.discount_amount.cents(), 500);
        assert_eq!(po.tax_amount.cents(), 150);
        assert_eq!(po.total_amount.cents(), 2400);
        assert_eq!(po.amount_due.cents(), 2400);
    }

    #[test]
    fn test_approval_requires_submission() {
        let mut po = PurchaseOrder::new("t1", "PO-1", "store-1", "sup-1", Utc::now());
        assert!(po.submit(Utc::now()).is_err());
        po.add_item("p1", None, units(1), UnitCost::from_cents(100)).unwrap();
        assert!(matches!(po.approve(&stamp()), Err(CoreError::InvalidStatus { .. })));

        po.submit(Utc::now()).unwrap();
        po.approve(&stamp()).unwrap();
        assert_eq!(po.approved_by.as_deref(), Some("buyer-1"));
        assert!(po.add_item("p2", None, units(1), UnitCost::zero()).is_err());
    }

    #[test]
    fn test_receipt_requires_sent_order() {
        let mut po = PurchaseOrder::new("t1", "PO-1", "store-1", "sup-1", Utc::now());
        po.add_item("p1", None, units(1), UnitCost::from_cents(100)).unwrap();
        let lines = [line(&po, 0, 1)];
        assert!(GoodsReceipt::draft(&po, "GR-1", &lines, Utc::now()).is_err());
    }

    #[test]
    fn test_partial_then_full_receipt() {
        let mut po = sent_order();
        let mut first = GoodsReceipt::draft(&po, "GR-1", &[line(&po, 0, 4)], Utc::now()).unwrap();
        let receipts = first.complete(&mut po, &stamp()).unwrap();
        assert_eq!(receipts.len(), 1);
        assert_eq!(receipts[0].value().cents(), 800);
        assert_eq!(po.status, PurchaseOrderStatus::PartiallyReceived);
        assert_eq!(first.received_by.as_deref(), Some("buyer-1"));

        let mut second =
            GoodsReceipt::draft(&po, "GR-2", &[line(&po, 0, 6), line(&po, 1, 5)], Utc::now()).unwrap();
        second.complete(&mut po, &stamp()).unwrap();
        assert_eq!(po.status, PurchaseOrderStatus::Received);
        assert!(po.is_fully_received());

        assert!(matches!(
            second.complete(&mut po, &stamp()),
            Err(CoreError::NotDraft { .. })
        ));
    }

    #[test]
    fn test_over_receive_changes_nothing() {
        let mut po = sent_order();
        // p2 is fine but p1 is split across two lines that together exceed 10
        let lines = [line(&po, 1, 5), line(&po, 0, 6), line(&po, 0, 5)];
        let mut receipt = GoodsReceipt::draft(&po, "GR-1", &lines, Utc::now()).unwrap();
        let before = po.clone();

        let err = receipt.complete(&mut po, &stamp()).unwrap_err();
        assert!(matches!(err, CoreError::OverReceive { .. }));
        assert_eq!(po, before);
        assert_eq!(receipt.status, GoodsReceiptStatus::Draft);
    }

    #[test]
    fn test_receipt_cost_override() {
        let mut po = sent_order();
        let lines = [ReceiptLine {
            po_item_id: po.items[0].id.clone(),
            quantity: units(2),
            unit_cost: Some(UnitCost::from_cents(250)),
        }];
        let mut receipt = GoodsReceipt::draft(&po, "GR-1", &lines, Utc::now()).unwrap();
        assert_eq!(receipt.total_value().cents(), 500);
        let receipts = receipt.complete(&mut po, &stamp()).unwrap();
        assert_eq!(receipts[0].unit_cost, UnitCost::from_cents(250));
    }

    #[test]
    fn test_cancel_rules() {
        let mut po = sent_order();
        po.cancel(Some("supplier out".into()), Utc::now()).unwrap();
        assert!(po.cancel(None, Utc::now()).is_err());

        let mut received = sent_order();
        let lines = [line(&received, 0, 10), line(&received, 1, 5)];
        GoodsReceipt::draft(&received, "GR-1", &lines, Utc::now())
            .unwrap()
            .complete(&mut received, &stamp())
            .unwrap();
        assert!(matches!(
            received.cancel(None, Utc::now()),
            Err(CoreError::InvalidStatus { .. })
        ));
    }

    #[test]
    fn test_complete_updates_supplier() {
        let mut po = sent_order();
        let mut supplier = Supplier::new("t1", "SUP-1", "Acme", Utc::now());
        supplier.id = po.supplier_id.clone();

        assert!(po.complete(&mut supplier, Utc::now()).is_err());
        let lines = [line(&po, 0, 10), line(&po, 1, 5)];
        GoodsReceipt::draft(&po, "GR-1", &lines, Utc::now())
            .unwrap()
            .complete(&mut po, &stamp())
            .unwrap();

        po.record_payment(Money::from_cents(1000), Utc::now()).unwrap();
        assert!(po.record_payment(Money::from_cents(5000), Utc::now()).is_err());

        po.complete(&mut supplier, Utc::now()).unwrap();
        assert_eq!(po.status, PurchaseOrderStatus::Completed);
        assert_eq!(supplier.total_purchased.cents(), 4000);
        assert_eq!(supplier.current_balance.cents(), 3000);
    }
}
