//! # Posting Rules
//!
//! Turns completed business events into balanced journal drafts.
//!
//! ```text
//! ┌───────────────────┬──────────────────────────────┬──────────────────────────────┐
//! │ Event             │ Debit                        │ Credit                       │
//! ├───────────────────┼──────────────────────────────┼──────────────────────────────┤
//! │ Sale completion   │ Cash (tendered − change)     │ Sales revenue (total − tax)  │
//! │                   │ Sales revenue (points used)  │ Sales tax payable (tax)      │
//! │                   │ Receivable (unpaid)          │                              │
//! │                   │ COGS (Σ qty × unit cost)     │ Inventory (Σ qty × unit cost)│
//! │ Goods receipt     │ Inventory                    │ Accounts payable             │
//! │ Adjustment (−)    │ Inventory shrinkage          │ Inventory                    │
//! │ Adjustment (+)    │ Inventory                    │ Inventory shrinkage          │
//! │ Refund            │ Sales revenue (net share)    │ Cash                         │
//! │                   │ Sales tax payable (tax share)│                              │
//! │ Invoice sent      │ Receivable (total)           │ Sales revenue (net)          │
//! │                   │                              │ Sales tax payable (tax)      │
//! │ Invoice payment   │ Cash                         │ Receivable                   │
//! │ Invoice cancelled │ Sales revenue (net)          │ Receivable (total)           │
//! │                   │ Sales tax payable (tax)      │                              │
//! └───────────────────┴──────────────────────────────┴──────────────────────────────┘
//! ```
//!
//! Zero amounts produce no line. An event with nothing to post returns
//! `None`. The drafts come back unposted; the caller posts them in the
//! same database transaction as the stock change.

use serde::{Deserialize, Serialize};

use crate::accounts::ChartOfAccounts;
use crate::adjustment::StockAdjustment;
use crate::error::{CoreError, CoreResult};
use crate::inventory::StockMovement;
use crate::invoice::Invoice;
use crate::journal::{Transaction, TransactionType};
use crate::money::Money;
use crate::purchase::GoodsReceipt;
use crate::sale::Sale;
use crate::types::{AuditStamp, DocumentRef};

/// Account ids the posting rules write to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountMap {
    pub cash: String,
    pub accounts_receivable: String,
    pub inventory: String,
    pub accounts_payable: String,
    pub sales_revenue: String,
    pub sales_tax_payable: String,
    pub cost_of_goods_sold: String,
    pub inventory_shrinkage: String,
}

impl AccountMap {
    /// Builds a map from account numbers, looked up in `chart`.
    pub fn from_numbers(chart: &ChartOfAccounts, numbers: &AccountMap) -> CoreResult<AccountMap> {
        let id_of = |number: &str| {
            chart
                .find_by_number(number)
                .map(|a| a.id.clone())
                .ok_or_else(|| CoreError::AccountNotFound(number.to_string()))
        };
        Ok(AccountMap {
            cash: id_of(&numbers.cash)?,
            accounts_receivable: id_of(&numbers.accounts_receivable)?,
            inventory: id_of(&numbers.inventory)?,
            accounts_payable: id_of(&numbers.accounts_payable)?,
            sales_revenue: id_of(&numbers.sales_revenue)?,
            sales_tax_payable: id_of(&numbers.sales_tax_payable)?,
            cost_of_goods_sold: id_of(&numbers.cost_of_goods_sold)?,
            inventory_shrinkage: id_of(&numbers.inventory_shrinkage)?,
        })
    }
}

/// Collects lines and drops zero amounts.
struct Draft {
    txn: Transaction,
}

impl Draft {
    fn new(
        tenant_id: &str,
        number: String,
        transaction_type: TransactionType,
        description: String,
        reference: &DocumentRef,
        stamp: &AuditStamp,
    ) -> Self {
        let txn = Transaction::open(
            tenant_id,
            number,
            transaction_type,
            stamp.at.date_naive(),
            description,
            stamp.at,
        )
        .with_reference(reference);
        Draft { txn }
    }

    fn debit(&mut self, account_id: &str, amount: Money, description: &str) -> CoreResult<()> {
        if amount.is_zero() {
            return Ok(());
        }
        self.txn.debit(account_id, amount, Some(description.to_string()))
    }

    fn credit(&mut self, account_id: &str, amount: Money, description: &str) -> CoreResult<()> {
        if amount.is_zero() {
            return Ok(());
        }
        self.txn.credit(account_id, amount, Some(description.to_string()))
    }

    fn finish(self) -> Option<Transaction> {
        if self.txn.entries.is_empty() {
            None
        } else {
            Some(self.txn)
        }
    }
}

/// Revenue, tax, tender and cost of goods for a completed sale.
///
/// Unit costs must already be recorded on the lines; lines without a cost
/// contribute no COGS.
pub fn sale_completion(
    sale: &Sale,
    map: &AccountMap,
    number: String,
    stamp: &AuditStamp,
) -> CoreResult<Option<Transaction>> {
    let mut draft = Draft::new(
        &sale.tenant_id,
        number,
        TransactionType::Sale,
        format!("Sale {}", sale.sale_number),
        &sale.reference(),
        stamp,
    );

    // points never exceed the total, so change always comes out of tender
    let cash = sale.tendered_amount() - sale.change_amount;
    let receivable = sale.outstanding().floor_zero();

    draft.debit(&map.cash, cash, "Payment received")?;
    draft.debit(&map.sales_revenue, sale.loyalty_amount(), "Loyalty points redeemed")?;
    draft.debit(&map.accounts_receivable, receivable, "Amount due")?;
    draft.credit(&map.sales_revenue, sale.total_amount - sale.tax_amount, "Sales revenue")?;
    draft.credit(&map.sales_tax_payable, sale.tax_amount, "Sales tax")?;

    let cogs: Money = sale.items.iter().filter_map(|i| i.cost_amount()).sum();
    draft.debit(&map.cost_of_goods_sold, cogs, "Cost of goods sold")?;
    draft.credit(&map.inventory, cogs, "Inventory issued")?;

    Ok(draft.finish())
}

/// Inventory received on credit.
pub fn goods_receipt(
    receipt: &GoodsReceipt,
    map: &AccountMap,
    number: String,
    stamp: &AuditStamp,
) -> CoreResult<Option<Transaction>> {
    let mut draft = Draft::new(
        &receipt.tenant_id,
        number,
        TransactionType::Purchase,
        format!("Goods receipt {}", receipt.receipt_number),
        &receipt.reference(),
        stamp,
    );
    let value = receipt.total_value();
    draft.debit(&map.inventory, value, "Inventory received")?;
    draft.credit(&map.accounts_payable, value, "Owed to supplier")?;
    Ok(draft.finish())
}

/// Net value change of an applied adjustment, from its movements.
pub fn stock_adjustment(
    adjustment: &StockAdjustment,
    movements: &[StockMovement],
    map: &AccountMap,
    number: String,
    stamp: &AuditStamp,
) -> CoreResult<Option<Transaction>> {
    let mut draft = Draft::new(
        &adjustment.tenant_id,
        number,
        TransactionType::Adjustment,
        format!("Stock adjustment {}: {}", adjustment.adjustment_number, adjustment.reason),
        &adjustment.reference(),
        stamp,
    );

    let net: Money = movements.iter().map(|m| m.quantity.times_cost(m.unit_cost)).sum();
    if net.is_negative() {
        draft.debit(&map.inventory_shrinkage, net.abs(), "Stock shortage")?;
        draft.credit(&map.inventory, net.abs(), "Stock shortage")?;
    } else {
        draft.debit(&map.inventory, net, "Stock overage")?;
        draft.credit(&map.inventory_shrinkage, net, "Stock overage")?;
    }
    Ok(draft.finish())
}

/// Cash paid back against a completed sale.
///
/// The refund is split between revenue and tax in the sale's proportion.
/// The tax share is taken cumulatively over `refunded_amount`, which must
/// already include `amount`, so a sale refunded in parts gives back exactly
/// the tax it collected.
pub fn sale_refund(
    sale: &Sale,
    amount: Money,
    map: &AccountMap,
    number: String,
    stamp: &AuditStamp,
) -> CoreResult<Option<Transaction>> {
    let mut draft = Draft::new(
        &sale.tenant_id,
        number,
        TransactionType::Payment,
        format!("Refund on sale {}", sale.sale_number),
        &sale.reference(),
        stamp,
    );
    let refunded_before = sale.refunded_amount - amount;
    let tax = sale.tax_amount.prorate(sale.refunded_amount, sale.total_amount)
        - sale.tax_amount.prorate(refunded_before, sale.total_amount);

    draft.debit(&map.sales_revenue, amount - tax, "Sales returned")?;
    draft.debit(&map.sales_tax_payable, tax, "Sales tax returned")?;
    draft.credit(&map.cash, amount, "Refund paid")?;
    Ok(draft.finish())
}

/// Revenue and tax billed to the customer's account.
pub fn invoice_issued(
    invoice: &Invoice,
    map: &AccountMap,
    number: String,
    stamp: &AuditStamp,
) -> CoreResult<Option<Transaction>> {
    let mut draft = Draft::new(
        &invoice.tenant_id,
        number,
        TransactionType::Sale,
        format!("Invoice {}", invoice.invoice_number),
        &invoice.reference(),
        stamp,
    );
    draft.debit(&map.accounts_receivable, invoice.total_amount, "Invoiced")?;
    draft.credit(&map.sales_revenue, invoice.net_amount(), "Sales revenue")?;
    draft.credit(&map.sales_tax_payable, invoice.tax_amount, "Sales tax")?;
    Ok(draft.finish())
}

pub fn invoice_payment(
    invoice: &Invoice,
    amount: Money,
    map: &AccountMap,
    number: String,
    stamp: &AuditStamp,
) -> CoreResult<Option<Transaction>> {
    let mut draft = Draft::new(
        &invoice.tenant_id,
        number,
        TransactionType::Receipt,
        format!("Payment on invoice {}", invoice.invoice_number),
        &invoice.reference(),
        stamp,
    );
    draft.debit(&map.cash, amount, "Payment received")?;
    draft.credit(&map.accounts_receivable, amount, "Invoice settled")?;
    Ok(draft.finish())
}

/// Reverses [`invoice_issued`] for an invoice cancelled after sending.
/// `charged` is what [`Invoice::cancel`] returned; zero posts nothing.
pub fn invoice_cancelled(
    invoice: &Invoice,
    charged: Money,
    map: &AccountMap,
    number: String,
    stamp: &AuditStamp,
) -> CoreResult<Option<Transaction>> {
    if charged.is_zero() {
        return Ok(None);
    }
    let mut draft = Draft::new(
        &invoice.tenant_id,
        number,
        TransactionType::Adjustment,
        format!("Invoice {} cancelled", invoice.invoice_number),
        &invoice.reference(),
        stamp,
    );
    draft.debit(&map.sales_revenue, invoice.net_amount(), "Revenue reversed")?;
    draft.debit(&map.sales_tax_payable, invoice.tax_amount, "Sales tax reversed")?;
    draft.credit(&map.accounts_receivable, charged, "Invoice cancelled")?;
    Ok(draft.finish())
}

// =============================================================================
// Unit Tests
// =============================================================================
