//! # Invoicing Operations
//!
//! Customer credit and accounts-receivable invoices.
//!
//! ```text
//! create_invoice ─► add_invoice_item* ─► send_invoice ─► record_invoice_payment*
//!                                            │                    │
//!                                            │ charge_account     │ settle_account
//!                                            ▼                    ▼
//!                                    Receivable / Revenue    Cash / Receivable
//! ```
//!
//! Sending charges the customer's account, checked against its credit limit,
//! and posts the receivable. Payments and cancellation take it back off.
//! Each step moves the invoice, the customer and the ledger in one
//! transaction.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::info;

use super::sales::load_customer;
use super::{Engine, InvoiceOutcome};
use crate::error::{DbError, DbResult};
use crate::repository::sequence::DocumentKind;
use crate::repository::{invoice, party};
use tally_core::customer::Customer;
use tally_core::invoice::Invoice;
use tally_core::postings;
use tally_core::{AuditStamp, CoreResult, Money, Quantity, TaxRate};

impl Engine {
    // =========================================================================
    // Credit
    // =========================================================================

    /// Sets how much a customer may owe on invoices. Zero removes the limit.
    pub async fn set_credit_limit(&self, customer_id: &str, limit: Money, stamp: &AuditStamp) -> DbResult<Customer> {
        self.with_retry("set_credit_limit", || async move {
            let mut tx = self.db.pool().begin().await?;

            let mut customer = load_customer(&mut *tx, customer_id).await?;
            customer.set_credit_limit(limit, stamp.at)?;

            party::update_customer(&mut *tx, &mut customer).await?;
            tx.commit().await?;

            info!(id = %customer.id, limit = %limit, balance = %customer.current_balance, "Credit limit set");
            Ok(customer)
        })
        .await
    }

    // =========================================================================
    // Drafting
    // =========================================================================

    pub async fn create_invoice(
        &self,
        customer_id: &str,
        due_date: DateTime<Utc>,
        payment_terms: Option<&str>,
        stamp: &AuditStamp,
    ) -> DbResult<Invoice> {
        self.with_retry("create_invoice", || async move {
            let mut tx = self.db.pool().begin().await?;

            let customer = load_customer(&mut *tx, customer_id).await?;
            let number = self.next_number(&mut *tx, DocumentKind::Invoice).await?;
            let mut invoice = Invoice::new(&self.tenant_id, number, &customer.id, due_date, stamp.at)?;
            invoice.payment_terms = payment_terms.map(str::to_string);

            invoice::insert(&mut *tx, &invoice).await?;
            tx.commit().await?;

            info!(id = %invoice.id, number = %invoice.invoice_number, customer = %customer.customer_number, "Invoice opened");
            Ok(invoice)
        })
        .await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn add_invoice_item(
        &self,
        invoice_id: &str,
        product_id: Option<&str>,
        description: &str,
        quantity: Quantity,
        unit_price: Money,
        tax_rate: Option<TaxRate>,
        stamp: &AuditStamp,
    ) -> DbResult<Invoice> {
        self.with_retry("add_invoice_item", || {
            self.edit_invoice(invoice_id, stamp, move |inv| {
                inv.add_item(product_id, description, quantity, unit_price, tax_rate)
                    .map(|_| ())
            })
        })
        .await
    }

    pub async fn remove_invoice_item(&self, invoice_id: &str, line_id: &str, stamp: &AuditStamp) -> DbResult<Invoice> {
        self.with_retry("remove_invoice_item", || {
            self.edit_invoice(invoice_id, stamp, move |inv| inv.remove_item(line_id).map(|_| ()))
        })
        .await
    }

    pub async fn apply_invoice_discount(&self, invoice_id: &str, amount: Money, stamp: &AuditStamp) -> DbResult<Invoice> {
        self.with_retry("apply_invoice_discount", || {
            self.edit_invoice(invoice_id, stamp, move |inv| inv.apply_discount(amount))
        })
        .await
    }

    async fn edit_invoice<F>(&self, invoice_id: &str, stamp: &AuditStamp, edit: F) -> DbResult<Invoice>
    where
        F: FnOnce(&mut Invoice) -> CoreResult<()>,
    {
        let mut tx = self.db.pool().begin().await?;

        let mut inv = load_invoice(&mut *tx, invoice_id).await?;
        edit(&mut inv)?;
        inv.updated_at = stamp.at;

        invoice::update(&mut *tx, &mut inv).await?;
        tx.commit().await?;
        Ok(inv)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Issues the invoice and charges it to the customer's account. A charge
    /// past the credit limit leaves the invoice a draft.
    pub async fn send_invoice(&self, invoice_id: &str, stamp: &AuditStamp) -> DbResult<InvoiceOutcome> {
        self.with_retry("send_invoice", || self.send_invoice_once(invoice_id, stamp))
            .await
    }

    async fn send_invoice_once(&self, invoice_id: &str, stamp: &AuditStamp) -> DbResult<InvoiceOutcome> {
        let mut tx = self.db.pool().begin().await?;

        let mut inv = load_invoice(&mut *tx, invoice_id).await?;
        let charge = inv.send(stamp.at)?;
        let mut customer = load_customer(&mut *tx, &inv.customer_id).await?;
        customer.charge_account(charge, stamp.at)?;

        invoice::update(&mut *tx, &mut inv).await?;
        party::update_customer(&mut *tx, &mut customer).await?;

        let journal = match self.posting_map(&mut *tx).await? {
            Some(map) => {
                let number = self.next_number(&mut *tx, DocumentKind::Journal).await?;
                let draft = postings::invoice_issued(&inv, &map, number, stamp)?;
                self.post_generated(&mut *tx, draft, stamp).await?
            }
            None => None,
        };

        tx.commit().await?;

        info!(
            id = %inv.id,
            number = %inv.invoice_number,
            total = %inv.total_amount,
            customer_balance = %customer.current_balance,
            "Invoice sent"
        );
        Ok(InvoiceOutcome { invoice: inv, journal })
    }

    pub async fn record_invoice_payment(
        &self,
        invoice_id: &str,
        amount: Money,
        stamp: &AuditStamp,
    ) -> DbResult<InvoiceOutcome> {
        self.with_retry("record_invoice_payment", || {
            self.record_invoice_payment_once(invoice_id, amount, stamp)
        })
        .await
    }

    async fn record_invoice_payment_once(
        &self,
        invoice_id: &str,
        amount: Money,
        stamp: &AuditStamp,
    ) -> DbResult<InvoiceOutcome> {
        let mut tx = self.db.pool().begin().await?;

        let mut inv = load_invoice(&mut *tx, invoice_id).await?;
        inv.record_payment(amount, stamp.at)?;
        let mut customer = load_customer(&mut *tx, &inv.customer_id).await?;
        customer.settle_account(amount, stamp.at);

        invoice::update(&mut *tx, &mut inv).await?;
        party::update_customer(&mut *tx, &mut customer).await?;

        let journal = match self.posting_map(&mut *tx).await? {
            Some(map) => {
                let number = self.next_number(&mut *tx, DocumentKind::Journal).await?;
                let draft = postings::invoice_payment(&inv, amount, &map, number, stamp)?;
                self.post_generated(&mut *tx, draft, stamp).await?
            }
            None => None,
        };

        tx.commit().await?;

        info!(id = %inv.id, number = %inv.invoice_number, amount = %amount, due = %inv.balance_due, "Invoice payment recorded");
        Ok(InvoiceOutcome { invoice: inv, journal })
    }

    /// Cancels a draft, or a sent invoice nothing has been paid on. A sent
    /// invoice comes back off the customer's account and out of revenue.
    pub async fn cancel_invoice(
        &self,
        invoice_id: &str,
        reason: Option<&str>,
        stamp: &AuditStamp,
    ) -> DbResult<InvoiceOutcome> {
        self.with_retry("cancel_invoice", || self.cancel_invoice_once(invoice_id, reason, stamp))
            .await
    }

    async fn cancel_invoice_once(
        &self,
        invoice_id: &str,
        reason: Option<&str>,
        stamp: &AuditStamp,
    ) -> DbResult<InvoiceOutcome> {
        let mut tx = self.db.pool().begin().await?;

        let mut inv = load_invoice(&mut *tx, invoice_id).await?;
        let charged = inv.cancel(reason.map(str::to_string), stamp.at)?;
        if charged.is_positive() {
            let mut customer = load_customer(&mut *tx, &inv.customer_id).await?;
            customer.settle_account(charged, stamp.at);
            party::update_customer(&mut *tx, &mut customer).await?;
        }
        invoice::update(&mut *tx, &mut inv).await?;

        let journal = match self.posting_map(&mut *tx).await? {
            Some(map) => {
                let number = self.next_number(&mut *tx, DocumentKind::Journal).await?;
                let draft = postings::invoice_cancelled(&inv, charged, &map, number, stamp)?;
                self.post_generated(&mut *tx, draft, stamp).await?
            }
            None => None,
        };

        tx.commit().await?;

        info!(id = %inv.id, number = %inv.invoice_number, reversed = %charged, "Invoice cancelled");
        Ok(InvoiceOutcome { invoice: inv, journal })
    }

    /// Flags every sent invoice past its due date at `stamp.at`. Returns the
    /// invoices that changed.
    pub async fn mark_overdue_invoices(&self, stamp: &AuditStamp) -> DbResult<Vec<Invoice>> {
        self.with_retry("mark_overdue_invoices", || async move {
            let mut tx = self.db.pool().begin().await?;

            let mut flagged = Vec::new();
            for mut inv in invoice::fetch_open_past_due(&mut *tx, &self.tenant_id, stamp.at).await? {
                if inv.mark_overdue(stamp.at) {
                    invoice::update(&mut *tx, &mut inv).await?;
                    flagged.push(inv);
                }
            }
            tx.commit().await?;

            if !flagged.is_empty() {
                info!(count = flagged.len(), as_of = %stamp.at, "Invoices marked overdue");
            }
            Ok(flagged)
        })
        .await
    }
}

async fn load_invoice(conn: &mut SqliteConnection, id: &str) -> DbResult<Invoice> {
    invoice::fetch(conn, id)
        .await?
        .ok_or_else(|| DbError::not_found("Invoice", id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::pool::{Database, DbConfig};
    use chrono::Duration;
    use tally_core::accounts::{Account, AccountType};
    use tally_core::invoice::InvoiceStatus;
    use tally_core::postings::AccountMap;
    use tally_core::CoreError;

    fn stamp() -> AuditStamp {
        AuditStamp::new("clerk-1", Utc::now())
    }

    fn account_numbers() -> AccountMap {
        AccountMap {
            cash: "1100".into(),
            accounts_receivable: "1200".into(),
            inventory: "1300".into(),
            accounts_payable: "2100".into(),
            sales_revenue: "4000".into(),
            sales_tax_payable: "2200".into(),
            cost_of_goods_sold: "5000".into(),
            inventory_shrinkage: "5100".into(),
        }
    }

    async fn engine() -> Engine {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let engine = Engine::new(db, EngineConfig::default().with_accounts(account_numbers())).unwrap();
        for (number, kind) in [
            ("1100", AccountType::Asset),
            ("1200", AccountType::Asset),
            ("1300", AccountType::Asset),
            ("2100", AccountType::Liability),
            ("2200", AccountType::Liability),
            ("4000", AccountType::Revenue),
            ("5000", AccountType::Expense),
            ("5100", AccountType::Expense),
        ] {
            engine
                .create_account(Account::new("t", number, format!("Account {}", number), kind, Utc::now()))
                .await
                .unwrap();
        }
        engine
    }

    async fn balance(engine: &Engine, number: &str) -> Money {
        engine
            .db()
            .accounts()
            .get_by_number(engine.tenant_id(), number)
            .await
            .unwrap()
            .unwrap()
            .current_balance
    }

    /// A customer allowed to owe up to 500.00.
    async fn account_customer(engine: &Engine) -> Customer {
        let customer = Customer::new("t", "C-100", "Harbor Cafe", Utc::now()).with_credit_limit(Money::from_cents(50_000));
        engine.create_customer(customer).await.unwrap()
    }

    /// A draft for `customer` due in 30 days: one line of `cents` plus 10% tax.
    async fn drafted(engine: &Engine, customer: &Customer, cents: i64) -> Invoice {
        let now = stamp();
        let inv = engine
            .create_invoice(&customer.id, now.at + Duration::days(30), Some("Net 30"), &now)
            .await
            .unwrap();
        engine
            .add_invoice_item(
                &inv.id,
                None,
                "Wholesale beans",
                Quantity::from_units(1),
                Money::from_cents(cents),
                Some(TaxRate::from_bps(1000)),
                &now,
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_send_charges_account_and_posts_receivable() {
        let engine = engine().await;
        let customer = account_customer(&engine).await;
        let inv = drafted(&engine, &customer, 20_000).await;
        assert_eq!(inv.invoice_number, "INV-000001");

        let outcome = engine.send_invoice(&inv.id, &stamp()).await.unwrap();
        assert_eq!(outcome.invoice.status, InvoiceStatus::Sent);
        assert_eq!(outcome.invoice.balance_due, Money::from_cents(22_000));
        assert!(outcome.journal.is_some());

        let stored = engine.db().parties().get_customer(&customer.id).await.unwrap().unwrap();
        assert_eq!(stored.current_balance, Money::from_cents(22_000));
        assert_eq!(stored.available_credit(), Some(Money::from_cents(28_000)));

        assert_eq!(balance(&engine, "1200").await, Money::from_cents(22_000));
        assert_eq!(balance(&engine, "4000").await, Money::from_cents(20_000));
        assert_eq!(balance(&engine, "2200").await, Money::from_cents(2_000));
    }

    #[tokio::test]
    async fn test_credit_limit_keeps_invoice_a_draft() {
        let engine = engine().await;
        let customer = account_customer(&engine).await;
        let first = drafted(&engine, &customer, 40_000).await;
        engine.send_invoice(&first.id, &stamp()).await.unwrap();

        // 440.00 owed, 60.00 of headroom, 11.00 asked
        let second = drafted(&engine, &customer, 1_000).await;
        let err = engine.send_invoice(&second.id, &stamp()).await.unwrap_err();
        assert!(matches!(err, DbError::Core(CoreError::CreditLimitExceeded { .. })));

        let stored = engine.db().invoices().get(&second.id).await.unwrap().unwrap();
        assert_eq!(stored.status, InvoiceStatus::Draft);
        let stored = engine.db().parties().get_customer(&customer.id).await.unwrap().unwrap();
        assert_eq!(stored.current_balance, Money::from_cents(44_000));
        assert_eq!(balance(&engine, "1200").await, Money::from_cents(44_000));

        // raising the limit lets it through
        engine
            .set_credit_limit(&customer.id, Money::from_cents(100_000), &stamp())
            .await
            .unwrap();
        engine.send_invoice(&second.id, &stamp()).await.unwrap();
    }

    #[tokio::test]
    async fn test_payments_settle_invoice_and_account() {
        let engine = engine().await;
        let customer = account_customer(&engine).await;
        let inv = drafted(&engine, &customer, 10_000).await;
        engine.send_invoice(&inv.id, &stamp()).await.unwrap();

        let partial = engine
            .record_invoice_payment(&inv.id, Money::from_cents(6_000), &stamp())
            .await
            .unwrap();
        assert_eq!(partial.invoice.status, InvoiceStatus::Sent);
        assert_eq!(partial.invoice.balance_due, Money::from_cents(5_000));

        let err = engine
            .record_invoice_payment(&inv.id, Money::from_cents(5_001), &stamp())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Core(CoreError::ExceedsBalanceDue { .. })));

        let settled = engine
            .record_invoice_payment(&inv.id, Money::from_cents(5_000), &stamp())
            .await
            .unwrap();
        assert_eq!(settled.invoice.status, InvoiceStatus::Paid);
        assert!(settled.invoice.paid_at.is_some());

        let stored = engine.db().parties().get_customer(&customer.id).await.unwrap().unwrap();
        assert!(!stored.has_outstanding_balance());
        assert_eq!(balance(&engine, "1200").await, Money::zero());
        assert_eq!(balance(&engine, "1100").await, Money::from_cents(11_000));

        // paid invoices stay paid
        let err = engine.cancel_invoice(&inv.id, None, &stamp()).await.unwrap_err();
        assert!(matches!(err, DbError::Core(CoreError::InvalidStatus { .. })));
    }

    #[tokio::test]
    async fn test_cancel_sent_invoice_reverses_charge() {
        let engine = engine().await;
        let customer = account_customer(&engine).await;
        let inv = drafted(&engine, &customer, 10_000).await;
        engine.send_invoice(&inv.id, &stamp()).await.unwrap();

        let outcome = engine
            .cancel_invoice(&inv.id, Some("Billed twice"), &stamp())
            .await
            .unwrap();
        assert_eq!(outcome.invoice.status, InvoiceStatus::Cancelled);
        assert!(outcome.journal.is_some());

        let stored = engine.db().parties().get_customer(&customer.id).await.unwrap().unwrap();
        assert!(stored.current_balance.is_zero());
        for number in ["1200", "2200", "4000"] {
            assert_eq!(balance(&engine, number).await, Money::zero());
        }

        // a draft cancels without touching the ledger
        let draft = drafted(&engine, &customer, 500).await;
        let outcome = engine.cancel_invoice(&draft.id, None, &stamp()).await.unwrap();
        assert!(outcome.journal.is_none());
    }

    #[tokio::test]
    async fn test_mark_overdue_flags_sent_invoices_past_due() {
        let engine = engine().await;
        let customer = account_customer(&engine).await;
        let issued = AuditStamp::new("clerk-1", Utc::now() - Duration::days(45));

        let late = engine
            .create_invoice(&customer.id, issued.at + Duration::days(30), None, &issued)
            .await
            .unwrap();
        engine
            .add_invoice_item(&late.id, None, "Catering", Quantity::from_units(1), Money::from_cents(3_000), None, &issued)
            .await
            .unwrap();
        engine.send_invoice(&late.id, &issued).await.unwrap();

        let unsent = engine
            .create_invoice(&customer.id, issued.at + Duration::days(30), None, &issued)
            .await
            .unwrap();
        let current = drafted(&engine, &customer, 1_000).await;
        engine.send_invoice(&current.id, &stamp()).await.unwrap();

        let flagged = engine.mark_overdue_invoices(&stamp()).await.unwrap();
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].id, late.id);
        assert_eq!(flagged[0].status, InvoiceStatus::Overdue);
        assert!(flagged[0].days_overdue(Utc::now()) >= 14);

        let unsent = engine.db().invoices().get(&unsent.id).await.unwrap().unwrap();
        assert_eq!(unsent.status, InvoiceStatus::Draft);

        // already flagged, so a second sweep changes nothing
        assert!(engine.mark_overdue_invoices(&stamp()).await.unwrap().is_empty());

        // overdue invoices still take payment
        let paid = engine
            .record_invoice_payment(&late.id, Money::from_cents(3_000), &stamp())
            .await
            .unwrap();
        assert_eq!(paid.invoice.status, InvoiceStatus::Paid);
    }
}
