//! # Sale Settlement
//!
//! Point-of-sale transactions from cart to completion, cancellation and
//! refund.
//!
//! ## Sale Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │     park()                                                              │
//! │   ┌────────────────┐                                                    │
//! │   │                ▼                                                    │
//! │ DRAFT ◄────── PENDING          items, discount, tax: DRAFT only        │
//! │   │  resume()      │           payments: DRAFT or PENDING              │
//! │   │                │                                                    │
//! │   │ complete()     │ cancel()                                           │
//! │   ▼                ▼                                                    │
//! │ COMPLETED      CANCELLED ◄── cancel() from DRAFT too                   │
//! │   │                                                                     │
//! │   │ process_refund()                                                    │
//! │   ├──────────► PARTIALLY_REFUNDED   (refunded < total)                  │
//! │   └──────────► REFUNDED             (refunded == total)                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Totals
//! ```text
//! line_total  = quantity × unit_price − line discount
//! subtotal    = Σ line_total
//! discount    = subtotal × bps          (percentage)
//!             | min(value, subtotal)    (fixed)
//! taxable     = subtotal − discount
//! exclusive:  tax = taxable × rate              total = taxable + tax
//! inclusive:  tax = taxable × rate / (1 + rate) total = taxable
//! amount_due  = max(0, total − paid)
//! change      = max(0, paid − total)
//! ```
//!
//! `complete` does not touch stock. It returns a [`SaleCompletion`] plan that
//! the storage layer executes against inventory in the same database
//! transaction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::customer::LoyaltyProgram;
use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::{Money, Quantity, UnitCost};
use crate::types::{new_id, DocumentRef, TaxRate};
use crate::validation::{validate_bps, validate_non_negative, validate_positive_amount, validate_positive_quantity};

// =============================================================================
// Enums
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum SaleStatus {
    Draft,
    Pending,
    Completed,
    Cancelled,
    Refunded,
    PartiallyRefunded,
}

text_enum!(SaleStatus {
    Draft => "draft",
    Pending => "pending",
    Completed => "completed",
    Cancelled => "cancelled",
    Refunded => "refunded",
    PartiallyRefunded => "partially_refunded",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    CreditCard,
    DebitCard,
    Check,
    BankTransfer,
    DigitalWallet,
    StoreCredit,
    LoyaltyPoints,
}

text_enum!(PaymentMethod {
    Cash => "cash",
    CreditCard => "credit_card",
    DebitCard => "debit_card",
    Check => "check",
    BankTransfer => "bank_transfer",
    DigitalWallet => "digital_wallet",
    StoreCredit => "store_credit",
    LoyaltyPoints => "loyalty_points",
});

/// Order-level discount. `discount_value` is basis points for
/// `Percentage` and cents for `FixedAmount`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum DiscountType {
    None,
    Percentage,
    FixedAmount,
}

text_enum!(DiscountType {
    None => "none",
    Percentage => "percentage",
    FixedAmount => "fixed_amount",
});

// =============================================================================
// Lines and Payments
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct SaleItem {
    pub id: String,
    pub sale_id: String,
    pub line_number: i64,
    pub product_id: String,
    pub variant_id: Option<String>,
    /// Stock record the line was reserved against, if any.
    pub inventory_item_id: Option<String>,
    pub quantity: Quantity,
    pub unit_price: Money,
    pub discount_amount: Money,
    pub line_total: Money,
    /// Average cost at the moment stock was issued.
    pub unit_cost: Option<UnitCost>,
    pub quantity_reserved: Quantity,
}

impl SaleItem {
    pub fn gross_amount(&self) -> Money {
        self.quantity.times_price(self.unit_price)
    }

    fn recalculate(&mut self) {
        self.line_total = self.gross_amount() - self.discount_amount;
    }

    pub fn cost_amount(&self) -> Option<Money> {
        self.unit_cost.map(|cost| self.quantity.times_cost(cost))
    }

    pub fn profit_amount(&self) -> Option<Money> {
        self.cost_amount().map(|cost| self.line_total - cost)
    }

    /// Profit over line total, in basis points.
    pub fn profit_margin_bps(&self) -> Option<i64> {
        let profit = self.profit_amount()?;
        if !self.line_total.is_positive() {
            return None;
        }
        Some(profit.cents() * 10_000 / self.line_total.cents())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct SalePayment {
    pub id: String,
    pub sale_id: String,
    pub payment_method: PaymentMethod,
    pub amount: Money,
    pub reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Completion / Cancellation Plans
// =============================================================================

/// One line's stock to issue at completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockIssue {
    pub line_id: String,
    pub inventory_item_id: Option<String>,
    pub store_id: String,
    pub product_id: String,
    pub variant_id: Option<String>,
    pub quantity: Quantity,
    /// Portion of `quantity` that was reserved for this sale.
    pub from_reserved: Quantity,
}

/// Everything outside the sale that completion must change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleCompletion {
    pub sale_id: String,
    pub reference: DocumentRef,
    pub issues: Vec<StockIssue>,
    pub customer_id: Option<String>,
    /// Added to the customer's lifetime spend.
    pub customer_total: Money,
    pub loyalty_points: i64,
}

/// A reservation to hand back to inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRelease {
    pub line_id: String,
    pub inventory_item_id: String,
    pub quantity: Quantity,
}

// =============================================================================
// Sale
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Sale {
    pub id: String,
    pub tenant_id: String,
    pub sale_number: String,
    pub store_id: String,
    pub customer_id: Option<String>,
    pub cashier_id: Option<String>,
    pub status: SaleStatus,
    pub subtotal: Money,
    pub discount_type: DiscountType,
    pub discount_value: i64,
    pub discount_amount: Money,
    pub tax_rate: TaxRate,
    pub tax_inclusive: bool,
    pub tax_amount: Money,
    pub total_amount: Money,
    pub amount_paid: Money,
    pub amount_due: Money,
    pub change_amount: Money,
    pub loyalty_points_earned: i64,
    pub loyalty_points_redeemed: i64,
    pub refunded_amount: Money,
    pub refund_reason: Option<String>,
    pub cancellation_reason: Option<String>,
    pub notes: Option<String>,
    pub sale_date: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
    #[cfg_attr(feature = "sqlx", sqlx(skip))]
    pub items: Vec<SaleItem>,
    #[cfg_attr(feature = "sqlx", sqlx(skip))]
    pub payments: Vec<SalePayment>,
}

impl Sale {
    pub fn new(
        tenant_id: impl Into<String>,
        sale_number: impl Into<String>,
        store_id: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Sale {
            id: new_id(),
            tenant_id: tenant_id.into(),
            sale_number: sale_number.into(),
            store_id: store_id.into(),
            customer_id: None,
            cashier_id: None,
            status: SaleStatus::Draft,
            subtotal: Money::zero(),
            discount_type: DiscountType::None,
            discount_value: 0,
            discount_amount: Money::zero(),
            tax_rate: TaxRate::zero(),
            tax_inclusive: false,
            tax_amount: Money::zero(),
            total_amount: Money::zero(),
            amount_paid: Money::zero(),
            amount_due: Money::zero(),
            change_amount: Money::zero(),
            loyalty_points_earned: 0,
            loyalty_points_redeemed: 0,
            refunded_amount: Money::zero(),
            refund_reason: None,
            cancellation_reason: None,
            notes: None,
            sale_date: at,
            completed_at: None,
            created_at: at,
            updated_at: at,
            version: 0,
            items: Vec::new(),
            payments: Vec::new(),
        }
    }

    pub fn with_customer(mut self, customer_id: impl Into<String>) -> Self {
        self.customer_id = Some(customer_id.into());
        self
    }

    pub fn with_cashier(mut self, cashier_id: impl Into<String>) -> Self {
        self.cashier_id = Some(cashier_id.into());
        self
    }

    pub fn with_tax(mut self, rate: TaxRate, inclusive: bool) -> Self {
        self.tax_rate = rate;
        self.tax_inclusive = inclusive;
        self.calculate_totals();
        self
    }

    pub fn reference(&self) -> DocumentRef {
        DocumentRef::new("sale", self.id.clone(), self.sale_number.clone())
    }

    fn ensure_draft(&self) -> CoreResult<()> {
        if self.status != SaleStatus::Draft {
            return Err(CoreError::NotDraft {
                entity: "Sale",
                id: self.sale_number.clone(),
                status: self.status.to_string(),
            });
        }
        Ok(())
    }

    fn invalid_status(&self, operation: &'static str) -> CoreError {
        CoreError::InvalidStatus {
            entity: "Sale",
            id: self.sale_number.clone(),
            status: self.status.to_string(),
            operation,
        }
    }

    fn line_not_found(&self, line_id: &str) -> CoreError {
        CoreError::LineNotFound {
            document_id: self.sale_number.clone(),
            line_id: line_id.to_string(),
        }
    }

    // =========================================================================
    // Totals
    // =========================================================================

    /// Recomputes every derived amount from lines, discount, tax and payments.
    pub fn calculate_totals(&mut self) {
        for item in &mut self.items {
            item.recalculate();
        }
        self.subtotal = self.items.iter().map(|i| i.line_total).sum();

        self.discount_amount = match self.discount_type {
            DiscountType::None => Money::zero(),
            DiscountType::Percentage => {
                let bps = u32::try_from(self.discount_value).unwrap_or(0);
                self.subtotal.percentage(bps)
            }
            DiscountType::FixedAmount => Money::from_cents(self.discount_value).min(self.subtotal).floor_zero(),
        };

        let taxable = self.subtotal - self.discount_amount;
        if self.tax_inclusive {
            self.tax_amount = taxable.extract_inclusive_tax(self.tax_rate);
            self.total_amount = taxable;
        } else {
            self.tax_amount = taxable.calculate_tax(self.tax_rate);
            self.total_amount = taxable + self.tax_amount;
        }

        self.amount_paid = self.payments.iter().map(|p| p.amount).sum();
        self.amount_due = self.outstanding().floor_zero();
        self.change_amount = (self.amount_paid - self.total_amount).floor_zero();
    }

    /// `total − paid`, unfloored.
    pub fn outstanding(&self) -> Money {
        self.total_amount - self.amount_paid
    }

    // =========================================================================
    // Cart Editing (draft only)
    // =========================================================================

    /// Adds a line, or merges into an existing line for the same product
    /// and variant.
    pub fn add_item(
        &mut self,
        product_id: &str,
        variant_id: Option<&str>,
        quantity: Quantity,
        unit_price: Money,
    ) -> CoreResult<&SaleItem> {
        self.ensure_draft()?;
        validate_positive_quantity("quantity", quantity)?;
        validate_non_negative("unit_price", unit_price)?;

        let existing = self
            .items
            .iter()
            .position(|i| i.product_id == product_id && i.variant_id.as_deref() == variant_id);

        let index = match existing {
            Some(index) => {
                self.items[index].quantity += quantity;
                index
            }
            None => {
                let line_number = self.items.iter().map(|i| i.line_number).max().unwrap_or(0) + 1;
                self.items.push(SaleItem {
                    id: new_id(),
                    sale_id: self.id.clone(),
                    line_number,
                    product_id: product_id.to_string(),
                    variant_id: variant_id.map(str::to_string),
                    inventory_item_id: None,
                    quantity,
                    unit_price,
                    discount_amount: Money::zero(),
                    line_total: Money::zero(),
                    unit_cost: None,
                    quantity_reserved: Quantity::zero(),
                });
                self.items.len() - 1
            }
        };
        self.calculate_totals();
        Ok(&self.items[index])
    }

    /// Removes a line and returns it so its reservation can be released.
    pub fn remove_item(&mut self, line_id: &str) -> CoreResult<SaleItem> {
        self.ensure_draft()?;
        let index = self
            .items
            .iter()
            .position(|i| i.id == line_id)
            .ok_or_else(|| self.line_not_found(line_id))?;
        let removed = self.items.remove(index);
        self.calculate_totals();
        Ok(removed)
    }

    pub fn apply_line_discount(&mut self, line_id: &str, amount: Money) -> CoreResult<()> {
        self.ensure_draft()?;
        validate_non_negative("discount_amount", amount)?;
        let not_found = self.line_not_found(line_id);
        let item = self.items.iter_mut().find(|i| i.id == line_id).ok_or(not_found)?;
        if amount > item.gross_amount() {
            return Err(ValidationError::OutOfRange {
                field: "discount_amount".to_string(),
                min: 0,
                max: item.gross_amount().cents(),
            }
            .into());
        }
        item.discount_amount = amount;
        self.calculate_totals();
        Ok(())
    }

    /// Sets the order-level discount.
    pub fn apply_discount(&mut self, discount_type: DiscountType, value: i64) -> CoreResult<()> {
        self.ensure_draft()?;
        match discount_type {
            DiscountType::None => {}
            DiscountType::Percentage => {
                let bps = u32::try_from(value).map_err(|_| ValidationError::OutOfRange {
                    field: "discount_value".to_string(),
                    min: 0,
                    max: 10_000,
                })?;
                validate_bps("discount_value", bps)?;
            }
            DiscountType::FixedAmount => validate_non_negative("discount_value", Money::from_cents(value))?,
        }
        self.discount_type = discount_type;
        self.discount_value = if discount_type == DiscountType::None { 0 } else { value };
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

    /// Records a reservation made against `inventory_item_id` for a line.
    pub fn record_reservation(&mut self, line_id: &str, inventory_item_id: &str, quantity: Quantity) -> CoreResult<()> {
        self.ensure_draft()?;
        let not_found = self.line_not_found(line_id);
        let item = self.items.iter_mut().find(|i| i.id == line_id).ok_or(not_found)?;
        item.inventory_item_id = Some(inventory_item_id.to_string());
        item.quantity_reserved += quantity;
        Ok(())
    }

    /// Snapshots the issued cost on a line after completion.
    pub fn record_line_cost(&mut self, line_id: &str, cost: UnitCost) -> CoreResult<()> {
        let not_found = self.line_not_found(line_id);
        let item = self.items.iter_mut().find(|i| i.id == line_id).ok_or(not_found)?;
        item.unit_cost = Some(cost);
        Ok(())
    }

    // =========================================================================
    // Payments
    // =========================================================================

    pub fn add_payment(
        &mut self,
        method: PaymentMethod,
        amount: Money,
        reference: Option<String>,
        at: DateTime<Utc>,
    ) -> CoreResult<&SalePayment> {
        if !matches!(self.status, SaleStatus::Draft | SaleStatus::Pending) {
            return Err(self.invalid_status("take payment"));
        }
        validate_positive_amount("amount", amount)?;

        self.payments.push(SalePayment {
            id: new_id(),
            sale_id: self.id.clone(),
            payment_method: method,
            amount,
            reference,
            created_at: at,
        });
        self.updated_at = at;
        self.calculate_totals();

        let last = self.payments.len() - 1;
        Ok(&self.payments[last])
    }

    /// Pays with loyalty points. The customer's balance is checked and
    /// debited by the caller.
    ///
    /// Points never buy change: their value may not exceed what the sale
    /// still owes.
    pub fn redeem_points(&mut self, points: i64, program: &LoyaltyProgram, at: DateTime<Utc>) -> CoreResult<()> {
        if !matches!(self.status, SaleStatus::Draft | SaleStatus::Pending) {
            return Err(self.invalid_status("take payment"));
        }
        if self.customer_id.is_none() {
            return Err(ValidationError::Required {
                field: "customer_id".to_string(),
            }
            .into());
        }
        if points <= 0 {
            return Err(ValidationError::MustBePositive {
                field: "points".to_string(),
            }
            .into());
        }
        let value = program.value_of(points);
        let amount_due = self.outstanding().floor_zero();
        if value > amount_due {
            return Err(CoreError::ExceedsAmountDue {
                sale_id: self.sale_number.clone(),
                amount_due,
                requested: value,
            });
        }
        self.add_payment(
            PaymentMethod::LoyaltyPoints,
            value,
            Some(format!("{} points", points)),
            at,
        )?;
        self.loyalty_points_redeemed += points;
        Ok(())
    }

    pub fn park(&mut self, at: DateTime<Utc>) -> CoreResult<()> {
        if self.status != SaleStatus::Draft {
            return Err(self.invalid_status("park"));
        }
        self.status = SaleStatus::Pending;
        self.updated_at = at;
        Ok(())
    }

    pub fn resume(&mut self, at: DateTime<Utc>) -> CoreResult<()> {
        if self.status != SaleStatus::Pending {
            return Err(self.invalid_status("resume"));
        }
        self.status = SaleStatus::Draft;
        self.updated_at = at;
        Ok(())
    }

    // =========================================================================
    // Completion
    // =========================================================================

    /// Completes a fully paid draft and returns what must happen elsewhere.
    pub fn complete(&mut self, program: &LoyaltyProgram, at: DateTime<Utc>) -> CoreResult<SaleCompletion> {
        self.ensure_draft()?;
        if self.items.is_empty() {
            return Err(ValidationError::Required {
                field: "items".to_string(),
            }
            .into());
        }
        self.calculate_totals();
        if self.outstanding().is_positive() {
            return Err(CoreError::NotFullyPaid {
                sale_id: self.sale_number.clone(),
                amount_due: self.outstanding(),
            });
        }
        // lines removed after a redemption can leave points covering more than the total
        if self.loyalty_amount() > self.total_amount {
            return Err(CoreError::ExceedsAmountDue {
                sale_id: self.sale_number.clone(),
                amount_due: self.total_amount,
                requested: self.loyalty_amount(),
            });
        }

        let issues = self
            .items
            .iter()
            .map(|item| StockIssue {
                line_id: item.id.clone(),
                inventory_item_id: item.inventory_item_id.clone(),
                store_id: self.store_id.clone(),
                product_id: item.product_id.clone(),
                variant_id: item.variant_id.clone(),
                quantity: item.quantity,
                from_reserved: item.quantity_reserved.min(item.quantity),
            })
            .collect();

        let loyalty_points = match self.customer_id {
            Some(_) => program.points_for(self.total_amount),
            None => 0,
        };

        for item in &mut self.items {
            item.quantity_reserved = Quantity::zero();
        }
        self.status = SaleStatus::Completed;
        self.loyalty_points_earned = loyalty_points;
        self.completed_at = Some(at);
        self.updated_at = at;

        Ok(SaleCompletion {
            sale_id: self.id.clone(),
            reference: self.reference(),
            issues,
            customer_id: self.customer_id.clone(),
            customer_total: self.total_amount,
            loyalty_points,
        })
    }

    /// Cancels an open sale. Every outstanding reservation is returned for
    /// release.
    pub fn cancel(&mut self, reason: Option<String>, at: DateTime<Utc>) -> CoreResult<Vec<StockRelease>> {
        match self.status {
            SaleStatus::Completed | SaleStatus::Refunded | SaleStatus::PartiallyRefunded => {
                return Err(CoreError::AlreadyCompleted {
                    id: self.sale_number.clone(),
                })
            }
            SaleStatus::Cancelled => return Err(self.invalid_status("cancel")),
            SaleStatus::Draft | SaleStatus::Pending => {}
        }

        let mut releases = Vec::new();
        for item in &mut self.items {
            if let Some(inventory_item_id) = &item.inventory_item_id {
                if item.quantity_reserved.is_positive() {
                    releases.push(StockRelease {
                        line_id: item.id.clone(),
                        inventory_item_id: inventory_item_id.clone(),
                        quantity: item.quantity_reserved,
                    });
                }
            }
            item.quantity_reserved = Quantity::zero();
        }

        self.status = SaleStatus::Cancelled;
        self.cancellation_reason = reason;
        self.updated_at = at;
        Ok(releases)
    }

    /// Refunds part or all of a completed sale. Returns the new status.
    pub fn process_refund(&mut self, amount: Money, reason: &str, at: DateTime<Utc>) -> CoreResult<SaleStatus> {
        if self.status != SaleStatus::Completed {
            return Err(CoreError::NotCompleted {
                id: self.sale_number.clone(),
                status: self.status.to_string(),
            });
        }
        validate_positive_amount("amount", amount)?;

        let refundable = self.refundable_amount();
        if amount > refundable {
            return Err(CoreError::ExceedsRefundable {
                sale_id: self.sale_number.clone(),
                refundable,
                requested: amount,
            });
        }

        self.refunded_amount += amount;
        self.refund_reason = Some(reason.to_string());
        self.status = if self.refunded_amount == self.total_amount {
            SaleStatus::Refunded
        } else {
            SaleStatus::PartiallyRefunded
        };
        self.updated_at = at;
        Ok(self.status)
    }

    // =========================================================================
    // Derived Reads
    // =========================================================================

    pub fn refundable_amount(&self) -> Money {
        self.total_amount - self.refunded_amount
    }

    /// Total quantity across lines.
    pub fn item_count(&self) -> Quantity {
        self.items.iter().map(|i| i.quantity).sum()
    }

    pub fn unique_item_count(&self) -> usize {
        self.items.len()
    }

    pub fn is_paid(&self) -> bool {
        !self.outstanding().is_positive()
    }

    pub fn is_overpaid(&self) -> bool {
        self.outstanding().is_negative()
    }

    /// Payments that settle in cash-like tender (everything but points).
    pub fn tendered_amount(&self) -> Money {
        self.payments
            .iter()
            .filter(|p| p.payment_method != PaymentMethod::LoyaltyPoints)
            .map(|p| p.amount)
            .sum()
    }

    pub fn loyalty_amount(&self) -> Money {
        self.payments
            .iter()
            .filter(|p| p.payment_method == PaymentMethod::LoyaltyPoints)
            .map(|p| p.amount)
            .sum()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> Sale {
        Sale::new("t1", "SAL-000001", "store-1", Utc::now())
    }

    fn units(n: i64) -> Quantity {
        Quantity::from_units(n)
    }

    #[test]
    fn test_exclusive_tax_totals() {
        let mut sale = draft().with_tax(TaxRate::from_bps(825), false);
        sale.add_item("p1", None, units(2), Money::from_cents(1000)).unwrap();
        sale.add_item("p2", None, units(1), Money::from_cents(550)).unwrap();
        sale.apply_discount(DiscountType::Percentage, 1_000).unwrap();

        assert_eq!(sale.subtotal.cents(), 2550);
        assert_eq!(sale.discount_amount.cents(), 255);
        assert_eq!(sale.tax_amount.cents(), 189);
        assert_eq!(sale.total_amount.cents(), 2484);
        assert_eq!(sale.amount_due.cents(), 2484);
    }

    #[test]
    fn test_inclusive_tax_totals() {
        let mut sale = draft().with_tax(TaxRate::from_bps(1000), true);
        sale.add_item("p1", None, units(1), Money::from_cents(11_000)).unwrap();
        assert_eq!(sale.tax_amount.cents(), 1000);
        assert_eq!(sale.total_amount.cents(), 11_000);
    }

    #[test]
    fn test_fixed_discount_capped_at_subtotal() {
        let mut sale = draft();
        sale.add_item("p1", None, units(1), Money::from_cents(500)).unwrap();
        sale.apply_discount(DiscountType::FixedAmount, 900).unwrap();
        assert_eq!(sale.discount_amount.cents(), 500);
        assert!(sale.total_amount.is_zero());
    }

    #[test]
    fn test_add_item_merges_lines() {
        let mut sale = draft();
        sale.add_item("p1", Some("v1"), units(1), Money::from_cents(100)).unwrap();
        sale.add_item("p1", Some("v1"), units(2), Money::from_cents(100)).unwrap();
        sale.add_item("p1", None, units(1), Money::from_cents(100)).unwrap();
        assert_eq!(sale.unique_item_count(), 2);
        assert_eq!(sale.item_count(), units(4));
        assert_eq!(sale.items[0].line_total.cents(), 300);
    }

    #[test]
    fn test_line_discount_and_removal() {
        let mut sale = draft();
        let line_id = sale.add_item("p1", None, units(2), Money::from_cents(1000)).unwrap().id.clone();
        sale.apply_line_discount(&line_id, Money::from_cents(300)).unwrap();
        assert_eq!(sale.subtotal.cents(), 1700);
        assert!(sale.apply_line_discount(&line_id, Money::from_cents(2001)).is_err());

        let removed = sale.remove_item(&line_id).unwrap();
        assert_eq!(removed.product_id, "p1");
        assert!(sale.subtotal.is_zero());
        assert!(matches!(sale.remove_item(&line_id), Err(CoreError::LineNotFound { .. })));
    }

    #[test]
    fn test_payments_and_change() {
        let mut sale = draft();
        sale.add_item("p1", None, units(1), Money::from_cents(1250)).unwrap();
        assert!(sale.add_payment(PaymentMethod::Cash, Money::zero(), None, Utc::now()).is_err());

        sale.add_payment(PaymentMethod::Cash, Money::from_cents(2000), None, Utc::now()).unwrap();
        assert!(sale.is_paid());
        assert!(sale.is_overpaid());
        assert!(sale.amount_due.is_zero());
        assert_eq!(sale.change_amount.cents(), 750);
    }

    #[test]
    fn test_complete_requires_payment() {
        let mut sale = draft();
        sale.add_item("p1", None, units(1), Money::from_cents(1000)).unwrap();
        sale.add_payment(PaymentMethod::Cash, Money::from_cents(400), None, Utc::now()).unwrap();

        let err = sale.complete(&LoyaltyProgram::default(), Utc::now()).unwrap_err();
        assert!(matches!(err, CoreError::NotFullyPaid { amount_due, .. } if amount_due.cents() == 600));
        assert_eq!(sale.status, SaleStatus::Draft);
    }

    #[test]
    fn test_complete_produces_plan() {
        let mut sale = draft().with_customer("cust-1");
        let line_id = sale.add_item("p1", None, units(3), Money::from_cents(10_000)).unwrap().id.clone();
        sale.record_reservation(&line_id, "inv-1", units(2)).unwrap();
        sale.add_payment(PaymentMethod::CreditCard, Money::from_cents(30_000), None, Utc::now()).unwrap();

        let plan = sale.complete(&LoyaltyProgram::default(), Utc::now()).unwrap();
        assert_eq!(sale.status, SaleStatus::Completed);
        assert_eq!(plan.issues.len(), 1);
        assert_eq!(plan.issues[0].from_reserved, units(2));
        assert_eq!(plan.issues[0].inventory_item_id.as_deref(), Some("inv-1"));
        assert_eq!(plan.customer_total.cents(), 30_000);
        assert_eq!(plan.loyalty_points, 3);
        assert_eq!(sale.loyalty_points_earned, 3);

        assert!(matches!(
            sale.complete(&LoyaltyProgram::default(), Utc::now()),
            Err(CoreError::NotDraft { .. })
        ));
        assert!(sale.add_item("p2", None, units(1), Money::zero()).is_err());
    }

    #[test]
    fn test_cancel_releases_reservations() {
        let mut sale = draft();
        let line_id = sale.add_item("p1", None, units(3), Money::from_cents(100)).unwrap().id.clone();
        sale.record_reservation(&line_id, "inv-1", units(3)).unwrap();
        sale.park(Utc::now()).unwrap();

        let releases = sale.cancel(Some("walked out".into()), Utc::now()).unwrap();
        assert_eq!(releases.len(), 1);
        assert_eq!(releases[0].quantity, units(3));
        assert_eq!(sale.status, SaleStatus::Cancelled);
        assert!(matches!(
            sale.cancel(None, Utc::now()),
            Err(CoreError::InvalidStatus { .. })
        ));
    }

    #[test]
    fn test_cancel_completed_fails() {
        let mut sale = draft();
        sale.add_item("p1", None, units(1), Money::from_cents(100)).unwrap();
        sale.add_payment(PaymentMethod::Cash, Money::from_cents(100), None, Utc::now()).unwrap();
        sale.complete(&LoyaltyProgram::default(), Utc::now()).unwrap();
        assert!(matches!(
            sale.cancel(None, Utc::now()),
            Err(CoreError::AlreadyCompleted { .. })
        ));
    }

    #[test]
    fn test_refunds() {
        let mut sale = draft();
        sale.add_item("p1", None, units(1), Money::from_cents(5000)).unwrap();
        assert!(matches!(
            sale.process_refund(Money::from_cents(100), "x", Utc::now()),
            Err(CoreError::NotCompleted { .. })
        ));
        sale.add_payment(PaymentMethod::Cash, Money::from_cents(5000), None, Utc::now()).unwrap();
        sale.complete(&LoyaltyProgram::default(), Utc::now()).unwrap();

        assert!(matches!(
            sale.process_refund(Money::from_cents(5001), "x", Utc::now()),
            Err(CoreError::ExceedsRefundable { .. })
        ));
        let status = sale.process_refund(Money::from_cents(2000), "damaged", Utc::now()).unwrap();
        assert_eq!(status, SaleStatus::PartiallyRefunded);
        assert_eq!(sale.refundable_amount().cents(), 3000);

        let mut full = draft();
        full.add_item("p1", None, units(1), Money::from_cents(5000)).unwrap();
        full.add_payment(PaymentMethod::Cash, Money::from_cents(5000), None, Utc::now()).unwrap();
        full.complete(&LoyaltyProgram::default(), Utc::now()).unwrap();
        assert_eq!(
            full.process_refund(Money::from_cents(5000), "return", Utc::now()).unwrap(),
            SaleStatus::Refunded
        );
    }

    #[test]
    fn test_redeem_points_pays_sale() {
        let mut sale = draft();
        sale.add_item("p1", None, units(1), Money::from_cents(1000)).unwrap();
        assert!(sale.redeem_points(100, &LoyaltyProgram::default(), Utc::now()).is_err());

        let mut sale = sale.with_customer("cust-1");
        sale.redeem_points(300, &LoyaltyProgram::default(), Utc::now()).unwrap();
        assert_eq!(sale.amount_paid.cents(), 300);
        assert_eq!(sale.loyalty_amount().cents(), 300);
        assert!(sale.tendered_amount().is_zero());
        assert_eq!(sale.loyalty_points_redeemed, 300);
    }

    #[test]
    fn test_points_cannot_exceed_amount_due() {
        let program = LoyaltyProgram::default();
        let mut empty = draft().with_customer("cust-1");
        let err = empty.redeem_points(5, &program, Utc::now()).unwrap_err();
        assert!(matches!(err, CoreError::ExceedsAmountDue { .. }));
        assert!(empty.payments.is_empty());
        assert!(empty.change_amount.is_zero());

        let mut sale = draft().with_customer("cust-1");
        sale.add_item("p1", None, units(1), Money::from_cents(1000)).unwrap();
        let err = sale.redeem_points(1001, &program, Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            CoreError::ExceedsAmountDue { amount_due, requested, .. }
                if amount_due.cents() == 1000 && requested.cents() == 1001
        ));

        sale.redeem_points(1000, &program, Utc::now()).unwrap();
        assert!(sale.amount_due.is_zero());
        assert!(sale.change_amount.is_zero());
        assert!(sale.redeem_points(1, &program, Utc::now()).is_err());
    }

    #[test]
    fn test_points_left_over_after_removal_block_completion() {
        let program = LoyaltyProgram::default();
        let mut sale = draft().with_customer("cust-1");
        sale.add_item("p1", None, units(1), Money::from_cents(1000)).unwrap();
        let extra = sale.add_item("p2", None, units(1), Money::from_cents(500)).unwrap().id.clone();
        sale.redeem_points(1200, &program, Utc::now()).unwrap();
        sale.remove_item(&extra).unwrap();

        let err = sale.complete(&program, Utc::now()).unwrap_err();
        assert!(matches!(err, CoreError::ExceedsAmountDue { .. }));
        assert_eq!(sale.status, SaleStatus::Draft);
    }

    #[test]
    fn test_line_profit() {
        let mut sale = draft();
        let line_id = sale.add_item("p1", None, units(2), Money::from_cents(1000)).unwrap().id.clone();
        sale.record_line_cost(&line_id, UnitCost::from_cents(600)).unwrap();
        let line = &sale.items[0];
        assert_eq!(line.profit_amount(), Some(Money::from_cents(800)));
        assert_eq!(line.profit_margin_bps(), Some(4_000));
    }
}
