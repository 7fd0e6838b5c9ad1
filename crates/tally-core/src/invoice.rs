//! # Customer Invoices
//!
//! Accounts-receivable invoices: goods or services billed to a customer's
//! account and paid later.
//!
//! ## Invoice Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  DRAFT ──send()──► SENT ──record_payment()──► PAID (balance_due == 0)  │
//! │    │                 │  ▲                                               │
//! │    │                 │  │ record_payment() keeps going                  │
//! │    │   mark_overdue()▼  │                                               │
//! │    │              OVERDUE ──record_payment()──► PAID                    │
//! │    │                 │                                                  │
//! │    └──cancel()──► CANCELLED ◄──cancel() (sent/overdue, nothing paid)   │
//! │                                                                         │
//! │  lines and discount: DRAFT only                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Totals
//! ```text
//! line tax    = quantity × unit_price × line rate     (no rate → 0)
//! line_total  = quantity × unit_price + line tax
//! subtotal    = Σ quantity × unit_price
//! discount    = min(discount_value, subtotal)
//! total       = subtotal − discount + Σ line tax
//! balance_due = total − paid
//! ```
//!
//! Sending an invoice charges the customer's account; payments and
//! cancellation settle it. The caller applies those to the [`Customer`]
//! in the same database transaction.
//!
//! [`Customer`]: crate::customer::Customer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::{Money, Quantity};
use crate::types::{new_id, DocumentRef, TaxRate};
use crate::validation::{validate_name, validate_non_negative, validate_positive_amount, validate_positive_quantity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    Paid,
    Overdue,
    Cancelled,
}

text_enum!(InvoiceStatus {
    Draft => "draft",
    Sent => "sent",
    Paid => "paid",
    Overdue => "overdue",
    Cancelled => "cancelled",
});

impl InvoiceStatus {
    /// Sent and not yet settled or cancelled.
    pub fn is_open(&self) -> bool {
        matches!(self, InvoiceStatus::Sent | InvoiceStatus::Overdue)
    }
}

// =============================================================================
// Invoice Item
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct InvoiceItem {
    pub id: String,
    pub invoice_id: String,
    pub line_number: i64,
    pub product_id: Option<String>,
    pub description: String,
    pub quantity: Quantity,
    pub unit_price: Money,
    pub tax_rate: Option<TaxRate>,
    pub tax_amount: Money,
    /// Including tax.
    pub line_total: Money,
}

impl InvoiceItem {
    pub fn base_amount(&self) -> Money {
        self.quantity.times_price(self.unit_price)
    }

    fn calculate_line_total(&mut self) {
        let base = self.base_amount();
        self.tax_amount = self.tax_rate.map(|rate| base.calculate_tax(rate)).unwrap_or_default();
        self.line_total = base + self.tax_amount;
    }
}

// =============================================================================
// Invoice
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Invoice {
    pub id: String,
    pub tenant_id: String,
    pub invoice_number: String,
    pub customer_id: String,
    pub status: InvoiceStatus,
    pub invoice_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub subtotal: Money,
    pub discount_value: Money,
    pub discount_amount: Money,
    pub tax_amount: Money,
    pub total_amount: Money,
    pub paid_amount: Money,
    pub balance_due: Money,
    pub payment_terms: Option<String>,
    pub notes: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
    #[cfg_attr(feature = "sqlx", sqlx(skip))]
    pub items: Vec<InvoiceItem>,
}

impl Invoice {
    /// Opens a draft dated `at`. The due date may not precede it.
    pub fn new(
        tenant_id: impl Into<String>,
        invoice_number: impl Into<String>,
        customer_id: impl Into<String>,
        due_date: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> CoreResult<Self> {
        if due_date < at {
            return Err(ValidationError::InvalidFormat {
                field: "due_date".to_string(),
                reason: "falls before the invoice date".to_string(),
            }
            .into());
        }
        Ok(Invoice {
            id: new_id(),
            tenant_id: tenant_id.into(),
            invoice_number: invoice_number.into(),
            customer_id: customer_id.into(),
            status: InvoiceStatus::Draft,
            invoice_date: at,
            due_date,
            subtotal: Money::zero(),
            discount_value: Money::zero(),
            discount_amount: Money::zero(),
            tax_amount: Money::zero(),
            total_amount: Money::zero(),
            paid_amount: Money::zero(),
            balance_due: Money::zero(),
            payment_terms: None,
            notes: None,
            sent_at: None,
            paid_at: None,
            cancellation_reason: None,
            created_at: at,
            updated_at: at,
            version: 0,
            items: Vec::new(),
        })
    }

    pub fn with_terms(mut self, terms: impl Into<String>) -> Self {
        self.payment_terms = Some(terms.into());
        self
    }

    pub fn reference(&self) -> DocumentRef {
        DocumentRef::new("invoice", self.id.clone(), self.invoice_number.clone())
    }

    fn ensure_draft(&self) -> CoreResult<()> {
        if self.status != InvoiceStatus::Draft {
            return Err(CoreError::NotDraft {
                entity: "Invoice",
                id: self.invoice_number.clone(),
                status: self.status.to_string(),
            });
        }
        Ok(())
    }

    fn invalid_status(&self, operation: &'static str) -> CoreError {
        CoreError::InvalidStatus {
            entity: "Invoice",
            id: self.invoice_number.clone(),
            status: self.status.to_string(),
            operation,
        }
    }

    pub fn calculate_totals(&mut self) {
        for item in &mut self.items {
            item.calculate_line_total();
        }
        self.subtotal = self.items.iter().map(InvoiceItem::base_amount).sum();
        self.tax_amount = self.items.iter().map(|i| i.tax_amount).sum();
        self.discount_amount = self.discount_value.min(self.subtotal);
        self.total_amount = self.subtotal - self.discount_amount + self.tax_amount;
        self.balance_due = self.total_amount - self.paid_amount;
    }

    /// Revenue billed, net of discount and tax.
    pub fn net_amount(&self) -> Money {
        self.subtotal - self.discount_amount
    }

    // =========================================================================
    // Draft Editing
    // =========================================================================

    pub fn add_item(
        &mut self,
        product_id: Option<&str>,
        description: &str,
        quantity: Quantity,
        unit_price: Money,
        tax_rate: Option<TaxRate>,
    ) -> CoreResult<&InvoiceItem> {
        self.ensure_draft()?;
        validate_name("description", description)?;
        validate_positive_quantity("quantity", quantity)?;
        validate_non_negative("unit_price", unit_price)?;

        let line_number = self.items.iter().map(|i| i.line_number).max().unwrap_or(0) + 1;
        self.items.push(InvoiceItem {
            id: new_id(),
            invoice_id: self.id.clone(),
            line_number,
            product_id: product_id.map(str::to_string),
            description: description.to_string(),
            quantity,
            unit_price,
            tax_rate,
            tax_amount: Money::zero(),
            line_total: Money::zero(),
        });
        self.calculate_totals();

        let last = self.items.len() - 1;
        Ok(&self.items[last])
    }

    pub fn remove_item(&mut self, line_id: &str) -> CoreResult<InvoiceItem> {
        self.ensure_draft()?;
        let index = self
            .items
            .iter()
            .position(|i| i.id == line_id)
            .ok_or_else(|| CoreError::LineNotFound {
                document_id: self.invoice_number.clone(),
                line_id: line_id.to_string(),
            })?;
        let removed = self.items.remove(index);
        self.calculate_totals();
        Ok(removed)
    }

    /// Fixed discount, capped at the subtotal.
    pub fn apply_discount(&mut self, amount: Money) -> CoreResult<()> {
        self.ensure_draft()?;
        validate_non_negative("discount", amount)?;
        self.discount_value = amount;
        self.calculate_totals();
        Ok(())
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Issues the invoice. Returns the amount to charge to the customer.
    pub fn send(&mut self, at: DateTime<Utc>) -> CoreResult<Money> {
        self.ensure_draft()?;
        if self.items.is_empty() {
            return Err(ValidationError::Required {
                field: "items".to_string(),
            }
            .into());
        }
        self.calculate_totals();
        if !self.total_amount.is_positive() {
            return Err(ValidationError::MustBePositive {
                field: "total_amount".to_string(),
            }
            .into());
        }
        self.status = InvoiceStatus::Sent;
        self.sent_at = Some(at);
        self.updated_at = at;
        Ok(self.total_amount)
    }

    pub fn record_payment(&mut self, amount: Money, at: DateTime<Utc>) -> CoreResult<()> {
        if !self.status.is_open() {
            return Err(self.invalid_status("take payment"));
        }
        validate_positive_amount("amount", amount)?;
        if amount > self.balance_due {
            return Err(CoreError::ExceedsBalanceDue {
                invoice_id: self.invoice_number.clone(),
                balance_due: self.balance_due,
                requested: amount,
            });
        }

        self.paid_amount += amount;
        self.balance_due = self.total_amount - self.paid_amount;
        if self.is_paid() {
            self.status = InvoiceStatus::Paid;
            self.paid_at = Some(at);
        }
        self.updated_at = at;
        Ok(())
    }

    /// Flags a sent invoice whose due date has passed. Returns whether the
    /// status changed.
    pub fn mark_overdue(&mut self, now: DateTime<Utc>) -> bool {
        if self.status != InvoiceStatus::Sent || self.due_date >= now {
            return false;
        }
        self.status = InvoiceStatus::Overdue;
        self.updated_at = now;
        true
    }

    /// Cancels a draft, or an issued invoice with nothing paid against it.
    /// Returns the amount that was charged to the customer and must be
    /// taken back; zero for a draft.
    pub fn cancel(&mut self, reason: Option<String>, at: DateTime<Utc>) -> CoreResult<Money> {
        let charged = match self.status {
            InvoiceStatus::Draft => Money::zero(),
            InvoiceStatus::Sent | InvoiceStatus::Overdue if self.paid_amount.is_zero() => self.total_amount,
            _ => return Err(self.invalid_status("cancel")),
        };
        self.status = InvoiceStatus::Cancelled;
        self.cancellation_reason = reason;
        self.balance_due = Money::zero();
        self.updated_at = at;
        Ok(charged)
    }

    // =========================================================================
    // Derived Reads
    // =========================================================================

    pub fn is_paid(&self) -> bool {
        !self.balance_due.is_positive()
    }

    /// Issued, unsettled and past its due date at `now`.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status.is_open() && self.due_date < now
    }

    /// Whole days past due at `now`, or 0.
    pub fn days_overdue(&self, now: DateTime<Utc>) -> i64 {
        if !self.is_overdue(now) {
            return 0;
        }
        (now - self.due_date).num_days()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn draft(now: DateTime<Utc>) -> Invoice {
        Invoice::new("t1", "INV-000001", "cust-1", now + Duration::days(30), now).unwrap()
    }

    #[test]
    fn test_line_totals_include_tax() {
        let now = Utc::now();
        let mut invoice = draft(now);
        let line = invoice
            .add_item(None, "Consulting", Quantity::from_units(3), Money::from_cents(5000), Some(TaxRate::from_bps(1000)))
            .unwrap();
        assert_eq!(line.tax_amount.cents(), 1500);
        assert_eq!(line.line_total.cents(), 16_500);

        invoice
            .add_item(Some("p1"), "Cable", Quantity::from_units(1), Money::from_cents(1000), None)
            .unwrap();
        invoice.apply_discount(Money::from_cents(2000)).unwrap();

        assert_eq!(invoice.subtotal.cents(), 16_000);
        assert_eq!(invoice.tax_amount.cents(), 1500);
        assert_eq!(invoice.discount_amount.cents(), 2000);
        assert_eq!(invoice.total_amount.cents(), 15_500);
        assert_eq!(invoice.balance_due.cents(), 15_500);
        assert_eq!(invoice.net_amount().cents(), 14_000);
    }

    #[test]
    fn test_due_date_before_invoice_date_is_rejected() {
        let now = Utc::now();
        assert!(Invoice::new("t1", "INV-1", "c1", now - Duration::days(1), now).is_err());
    }

    #[test]
    fn test_send_requires_lines_and_locks_edits() {
        let now = Utc::now();
        let mut invoice = draft(now);
        assert!(matches!(invoice.send(now), Err(CoreError::Validation(_))));

        invoice
            .add_item(None, "Repair", Quantity::from_units(1), Money::from_cents(8000), None)
            .unwrap();
        assert_eq!(invoice.send(now).unwrap().cents(), 8000);
        assert_eq!(invoice.status, InvoiceStatus::Sent);

        let err = invoice
            .add_item(None, "Extra", Quantity::from_units(1), Money::from_cents(100), None)
            .unwrap_err();
        assert!(matches!(err, CoreError::NotDraft { .. }));
    }

    #[test]
    fn test_payments_settle_balance() {
        let now = Utc::now();
        let mut invoice = draft(now);
        invoice
            .add_item(None, "Repair", Quantity::from_units(1), Money::from_cents(8000), None)
            .unwrap();
        assert!(invoice.record_payment(Money::from_cents(100), now).is_err());
        invoice.send(now).unwrap();

        invoice.record_payment(Money::from_cents(3000), now).unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Sent);
        assert_eq!(invoice.balance_due.cents(), 5000);

        let err = invoice.record_payment(Money::from_cents(5001), now).unwrap_err();
        assert!(matches!(err, CoreError::ExceedsBalanceDue { .. }));

        invoice.record_payment(Money::from_cents(5000), now).unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Paid);
        assert!(invoice.is_paid());
        assert_eq!(invoice.paid_at, Some(now));
    }

    #[test]
    fn test_overdue_reads() {
        let now = Utc::now();
        let mut invoice = draft(now);
        invoice
            .add_item(None, "Repair", Quantity::from_units(1), Money::from_cents(8000), None)
            .unwrap();
        let later = now + Duration::days(40);
        assert!(!invoice.is_overdue(later));

        invoice.send(now).unwrap();
        assert!(!invoice.mark_overdue(now));
        assert!(invoice.is_overdue(later));
        assert_eq!(invoice.days_overdue(later), 10);
        assert_eq!(invoice.days_overdue(now), 0);

        assert!(invoice.mark_overdue(later));
        assert_eq!(invoice.status, InvoiceStatus::Overdue);

        // still payable once overdue
        invoice.record_payment(Money::from_cents(8000), later).unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Paid);
        assert!(!invoice.is_overdue(later));
    }

    #[test]
    fn test_cancel_rules() {
        let now = Utc::now();
        let mut unsent = draft(now);
        assert!(unsent.cancel(None, now).unwrap().is_zero());

        let mut issued = draft(now);
        issued
            .add_item(None, "Repair", Quantity::from_units(1), Money::from_cents(8000), None)
            .unwrap();
        issued.send(now).unwrap();
        let mut part_paid = issued.clone();

        assert_eq!(issued.cancel(Some("Billed twice".into()), now).unwrap().cents(), 8000);
        assert_eq!(issued.status, InvoiceStatus::Cancelled);
        assert!(issued.cancel(None, now).is_err());

        part_paid.record_payment(Money::from_cents(1000), now).unwrap();
        let err = part_paid.cancel(None, now).unwrap_err();
        assert!(matches!(err, CoreError::InvalidStatus { operation: "cancel", .. }));
    }
}
