//! # Sale Operations
//!
//! Cart editing, reservations and settlement.
//!
//! ## Completion
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      complete_sale (one transaction)                    │
//! │                                                                         │
//! │  1. sale.complete()           paid in full? → SaleCompletion plan       │
//! │  2. resolve stock records     reserved item, else store/product lookup │
//! │                               missing + negatives allowed → new record  │
//! │  3. issue per line            ascending item id, reserved part first    │
//! │                               line cost := average cost at issue        │
//! │  4. customer                  lifetime spend + loyalty points           │
//! │  5. journal                   revenue, tax, tender, COGS (if mapped)    │
//! │                                                                         │
//! │  Any failure ──► nothing written                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;

use sqlx::SqliteConnection;
use tracing::info;

use super::stock::load_item;
use super::{Engine, SaleOutcome};
use crate::error::{DbError, DbResult};
use crate::repository::sequence::DocumentKind;
use crate::repository::{inventory, movement, party, sale};
use tally_core::customer::Customer;
use tally_core::inventory::InventoryItem;
use tally_core::postings;
use tally_core::sale::{DiscountType, PaymentMethod, Sale};
use tally_core::{AuditStamp, CoreError, CoreResult, Money, Quantity, ValidationError};

impl Engine {
    // =========================================================================
    // Customers
    // =========================================================================

    pub async fn create_customer(&self, customer: Customer) -> DbResult<Customer> {
        self.with_retry("create_customer", || self.create_customer_once(customer.clone()))
            .await
    }

    async fn create_customer_once(&self, mut customer: Customer) -> DbResult<Customer> {
        customer.validate()?;
        customer.tenant_id = self.tenant_id.clone();

        let mut tx = self.db.pool().begin().await?;
        party::insert_customer(&mut *tx, &customer).await?;
        tx.commit().await?;

        info!(id = %customer.id, number = %customer.customer_number, "Customer created");
        Ok(customer)
    }

    // =========================================================================
    // Cart
    // =========================================================================

    /// Opens a draft sale with the store's tax policy. The actor is the cashier.
    pub async fn create_sale(
        &self,
        store_id: &str,
        customer_id: Option<&str>,
        stamp: &AuditStamp,
    ) -> DbResult<Sale> {
        self.with_retry("create_sale", || self.create_sale_once(store_id, customer_id, stamp))
            .await
    }

    async fn create_sale_once(
        &self,
        store_id: &str,
        customer_id: Option<&str>,
        stamp: &AuditStamp,
    ) -> DbResult<Sale> {
        let mut tx = self.db.pool().begin().await?;

        let policy = self.config.store_policy(store_id);
        let number = self.next_number(&mut *tx, DocumentKind::Sale).await?;
        let mut draft = Sale::new(&self.tenant_id, number, store_id, stamp.at)
            .with_tax(policy.tax_rate, policy.tax_inclusive)
            .with_cashier(stamp.actor.clone());

        if let Some(customer_id) = customer_id {
            load_customer(&mut *tx, customer_id).await?;
            draft = draft.with_customer(customer_id);
        }

        sale::insert(&mut *tx, &draft).await?;
        tx.commit().await?;

        info!(id = %draft.id, number = %draft.sale_number, store = %store_id, "Sale opened");
        Ok(draft)
    }

    /// Adds a line, merging with an existing line for the same product.
    pub async fn add_sale_item(
        &self,
        sale_id: &str,
        product_id: &str,
        variant_id: Option<&str>,
        quantity: Quantity,
        unit_price: Money,
        stamp: &AuditStamp,
    ) -> DbResult<Sale> {
        self.with_retry("add_sale_item", || {
            self.edit_sale(sale_id, stamp, move |s| {
                s.add_item(product_id, variant_id, quantity, unit_price).map(|_| ())
            })
        })
        .await
    }

    /// Drops a line and hands its reservation back to stock.
    pub async fn remove_sale_item(&self, sale_id: &str, line_id: &str, stamp: &AuditStamp) -> DbResult<Sale> {
        self.with_retry("remove_sale_item", || self.remove_sale_item_once(sale_id, line_id, stamp))
            .await
    }

    async fn remove_sale_item_once(&self, sale_id: &str, line_id: &str, stamp: &AuditStamp) -> DbResult<Sale> {
        let mut tx = self.db.pool().begin().await?;

        let mut draft = load_sale(&mut *tx, sale_id).await?;
        let removed = draft.remove_item(line_id)?;
        draft.updated_at = stamp.at;

        if let Some(item_id) = &removed.inventory_item_id {
            if removed.quantity_reserved.is_positive() {
                let mut item = load_item(&mut *tx, item_id).await?;
                item.release(removed.quantity_reserved, stamp.at)?;
                inventory::update(&mut *tx, &mut item).await?;
            }
        }

        sale::update(&mut *tx, &mut draft).await?;
        tx.commit().await?;
        Ok(draft)
    }

    pub async fn apply_sale_discount(
        &self,
        sale_id: &str,
        discount_type: DiscountType,
        value: i64,
        stamp: &AuditStamp,
    ) -> DbResult<Sale> {
        self.with_retry("apply_sale_discount", || {
            self.edit_sale(sale_id, stamp, move |s| s.apply_discount(discount_type, value))
        })
        .await
    }

    pub async fn apply_line_discount(
        &self,
        sale_id: &str,
        line_id: &str,
        amount: Money,
        stamp: &AuditStamp,
    ) -> DbResult<Sale> {
        self.with_retry("apply_line_discount", || {
            self.edit_sale(sale_id, stamp, move |s| s.apply_line_discount(line_id, amount))
        })
        .await
    }

    pub async fn add_sale_payment(
        &self,
        sale_id: &str,
        method: PaymentMethod,
        amount: Money,
        reference: Option<&str>,
        stamp: &AuditStamp,
    ) -> DbResult<Sale> {
        self.with_retry("add_sale_payment", || {
            self.edit_sale(sale_id, stamp, move |s| {
                s.add_payment(method, amount, reference.map(str::to_string), stamp.at)
                    .map(|_| ())
            })
        })
        .await
    }

    /// Parks a draft so the terminal can serve someone else.
    pub async fn park_sale(&self, sale_id: &str, stamp: &AuditStamp) -> DbResult<Sale> {
        self.with_retry("park_sale", || self.edit_sale(sale_id, stamp, move |s| s.park(stamp.at)))
            .await
    }

    pub async fn resume_sale(&self, sale_id: &str, stamp: &AuditStamp) -> DbResult<Sale> {
        self.with_retry("resume_sale", || self.edit_sale(sale_id, stamp, move |s| s.resume(stamp.at)))
            .await
    }

    async fn edit_sale<F>(&self, sale_id: &str, stamp: &AuditStamp, edit: F) -> DbResult<Sale>
    where
        F: FnOnce(&mut Sale) -> CoreResult<()>,
    {
        let mut tx = self.db.pool().begin().await?;

        let mut draft = load_sale(&mut *tx, sale_id).await?;
        edit(&mut draft)?;
        draft.updated_at = stamp.at;

        sale::update(&mut *tx, &mut draft).await?;
        tx.commit().await?;
        Ok(draft)
    }

    /// Pays part of the sale with the customer's points.
    pub async fn redeem_loyalty_points(&self, sale_id: &str, points: i64, stamp: &AuditStamp) -> DbResult<Sale> {
        self.with_retry("redeem_loyalty_points", || async move {
            let mut tx = self.db.pool().begin().await?;

            let mut draft = load_sale(&mut *tx, sale_id).await?;
            let customer_id = draft.customer_id.clone().ok_or_else(|| {
                CoreError::from(ValidationError::Required {
                    field: "customer_id".to_string(),
                })
            })?;
            draft.redeem_points(points, &self.loyalty, stamp.at)?;

            let mut customer = load_customer(&mut *tx, &customer_id).await?;
            customer.redeem_loyalty_points(points, stamp.at)?;

            party::update_customer(&mut *tx, &mut customer).await?;
            sale::update(&mut *tx, &mut draft).await?;
            tx.commit().await?;

            info!(sale = %draft.sale_number, customer = %customer_id, points, "Loyalty points redeemed");
            Ok(draft)
        })
        .await
    }

    // =========================================================================
    // Reservations
    // =========================================================================

    /// Reserves each line's unreserved quantity against the store's stock.
    pub async fn reserve_sale_stock(&self, sale_id: &str, stamp: &AuditStamp) -> DbResult<Sale> {
        self.with_retry("reserve_sale_stock", || self.reserve_sale_stock_once(sale_id, stamp))
            .await
    }

    async fn reserve_sale_stock_once(&self, sale_id: &str, stamp: &AuditStamp) -> DbResult<Sale> {
        let mut tx = self.db.pool().begin().await?;
        let mut draft = load_sale(&mut *tx, sale_id).await?;

        let mut wanted: BTreeMap<String, (InventoryItem, Vec<(String, Quantity)>)> = BTreeMap::new();
        for line in &draft.items {
            let needed = line.quantity - line.quantity_reserved;
            if !needed.is_positive() {
                continue;
            }
            let item = match &line.inventory_item_id {
                Some(id) => load_item(&mut *tx, id).await?,
                None => inventory::find(
                    &mut *tx,
                    &self.tenant_id,
                    &draft.store_id,
                    &line.product_id,
                    line.variant_id.as_deref(),
                )
                .await?
                .ok_or_else(|| CoreError::InventoryItemNotFound(line.product_id.clone()))?,
            };
            wanted
                .entry(item.id.clone())
                .or_insert_with(|| (item, Vec::new()))
                .1
                .push((line.id.clone(), needed));
        }

        for (item_id, (mut item, lines)) in wanted {
            for (line_id, needed) in lines {
                item.reserve(needed, stamp.at)?;
                draft.record_reservation(&line_id, &item_id, needed)?;
            }
            inventory::update(&mut *tx, &mut item).await?;
        }

        draft.updated_at = stamp.at;
        sale::update(&mut *tx, &mut draft).await?;
        tx.commit().await?;
        Ok(draft)
    }

    // =========================================================================
    // Settlement
    // =========================================================================

    /// Settles a fully paid draft: stock, customer and journal in one go.
    pub async fn complete_sale(&self, sale_id: &str, stamp: &AuditStamp) -> DbResult<SaleOutcome> {
        self.with_retry("complete_sale", || self.complete_sale_once(sale_id, stamp))
            .await
    }

    async fn complete_sale_once(&self, sale_id: &str, stamp: &AuditStamp) -> DbResult<SaleOutcome> {
        let mut tx = self.db.pool().begin().await?;

        let mut settled = load_sale(&mut *tx, sale_id).await?;
        let completion = settled.complete(&self.loyalty, stamp.at)?;
        let policy = self.config.store_policy(&settled.store_id);

        // resolve every line's stock record before anything moves
        let mut items: BTreeMap<String, (InventoryItem, bool)> = BTreeMap::new();
        let mut plan = Vec::with_capacity(completion.issues.len());
        for issue in &completion.issues {
            let found = match &issue.inventory_item_id {
                Some(id) => Some(load_item(&mut *tx, id).await?),
                None => {
                    inventory::find(
                        &mut *tx,
                        &self.tenant_id,
                        &issue.store_id,
                        &issue.product_id,
                        issue.variant_id.as_deref(),
                    )
                    .await?
                }
            };
            let (item, created) = match found {
                Some(item) => (item, false),
                None if policy.allow_negative_inventory => (
                    InventoryItem::new(
                        self.tenant_id.clone(),
                        issue.store_id.clone(),
                        issue.product_id.clone(),
                        issue.variant_id.clone(),
                        stamp.at,
                    ),
                    true,
                ),
                None => return Err(CoreError::InventoryItemNotFound(issue.product_id.clone()).into()),
            };
            plan.push((item.id.clone(), issue));
            items.entry(item.id.clone()).or_insert((item, created));
        }
        plan.sort_by(|a, b| a.0.cmp(&b.0));

        let mut movements = Vec::with_capacity(plan.len());
        for (item_id, issue) in &plan {
            let (item, _) = items
                .get_mut(item_id)
                .ok_or_else(|| DbError::Internal(format!("inventory item {} not resolved", item_id)))?;
            let issued = item
                .issue(issue.quantity, issue.from_reserved, policy.allow_negative_inventory, stamp.at)?
                .with_reference(&completion.reference)
                .with_actor(stamp.actor.clone());
            settled.record_line_cost(&issue.line_id, issued.unit_cost)?;
            movements.push(issued);
        }

        for (item, created) in items.values_mut() {
            if *created {
                inventory::insert(&mut *tx, item).await?;
            } else {
                inventory::update(&mut *tx, item).await?;
            }
        }
        for issued in &movements {
            movement::insert(&mut *tx, issued).await?;
        }

        if let Some(customer_id) = &completion.customer_id {
            let mut customer = load_customer(&mut *tx, customer_id).await?;
            customer.record_purchase(completion.customer_total, &self.loyalty, stamp.at);
            party::update_customer(&mut *tx, &mut customer).await?;
        }

        sale::update(&mut *tx, &mut settled).await?;

        let journal = match self.posting_map(&mut *tx).await? {
            Some(map) => {
                let number = self.next_number(&mut *tx, DocumentKind::Journal).await?;
                let draft = postings::sale_completion(&settled, &map, number, stamp)?;
                self.post_generated(&mut *tx, draft, stamp).await?
            }
            None => None,
        };

        tx.commit().await?;

        info!(
            id = %settled.id,
            number = %settled.sale_number,
            total = %settled.total_amount,
            change = %settled.change_amount,
            lines = movements.len(),
            "Sale completed"
        );
        Ok(SaleOutcome {
            sale: settled,
            movements,
            journal,
        })
    }

    /// Cancels an open sale, releases every reservation it holds and gives
    /// redeemed loyalty points back to the customer.
    pub async fn cancel_sale(&self, sale_id: &str, reason: Option<&str>, stamp: &AuditStamp) -> DbResult<Sale> {
        self.with_retry("cancel_sale", || self.cancel_sale_once(sale_id, reason, stamp))
            .await
    }

    async fn cancel_sale_once(&self, sale_id: &str, reason: Option<&str>, stamp: &AuditStamp) -> DbResult<Sale> {
        let mut tx = self.db.pool().begin().await?;

        let mut cancelled = load_sale(&mut *tx, sale_id).await?;
        let mut releases = cancelled.cancel(reason.map(str::to_string), stamp.at)?;
        releases.sort_by(|a, b| a.inventory_item_id.cmp(&b.inventory_item_id));

        let mut by_item: BTreeMap<&str, Quantity> = BTreeMap::new();
        for release in &releases {
            *by_item.entry(release.inventory_item_id.as_str()).or_insert_with(Quantity::zero) += release.quantity;
        }
        for (item_id, quantity) in by_item {
            let mut item = load_item(&mut *tx, item_id).await?;
            item.release(quantity, stamp.at)?;
            inventory::update(&mut *tx, &mut item).await?;
        }

        if cancelled.loyalty_points_redeemed > 0 {
            if let Some(customer_id) = &cancelled.customer_id {
                let mut customer = load_customer(&mut *tx, customer_id).await?;
                customer.add_loyalty_points(cancelled.loyalty_points_redeemed, stamp.at);
                party::update_customer(&mut *tx, &mut customer).await?;
            }
        }

        sale::update(&mut *tx, &mut cancelled).await?;
        tx.commit().await?;

        info!(
            id = %cancelled.id,
            number = %cancelled.sale_number,
            released = releases.len(),
            points_returned = cancelled.loyalty_points_redeemed,
            "Sale cancelled"
        );
        Ok(cancelled)
    }

    /// Refunds part or all of a completed sale. Stock is not returned here;
    /// use [`Engine::return_stock`] for goods coming back.
    pub async fn refund_sale(
        &self,
        sale_id: &str,
        amount: Money,
        reason: &str,
        stamp: &AuditStamp,
    ) -> DbResult<SaleOutcome> {
        self.with_retry("refund_sale", || self.refund_sale_once(sale_id, amount, reason, stamp))
            .await
    }

    async fn refund_sale_once(
        &self,
        sale_id: &str,
        amount: Money,
        reason: &str,
        stamp: &AuditStamp,
    ) -> DbResult<SaleOutcome> {
        let mut tx = self.db.pool().begin().await?;

        let mut refunded = load_sale(&mut *tx, sale_id).await?;
        let status = refunded.process_refund(amount, reason, stamp.at)?;

        if let Some(customer_id) = refunded.customer_id.clone() {
            let mut customer = load_customer(&mut *tx, &customer_id).await?;
            customer.record_refund(amount, stamp.at);
            party::update_customer(&mut *tx, &mut customer).await?;
        }

        sale::update(&mut *tx, &mut refunded).await?;

        let journal = match self.posting_map(&mut *tx).await? {
            Some(map) => {
                let number = self.next_number(&mut *tx, DocumentKind::Journal).await?;
                let draft = postings::sale_refund(&refunded, amount, &map, number, stamp)?;
                self.post_generated(&mut *tx, draft, stamp).await?
            }
            None => None,
        };

        tx.commit().await?;

        info!(id = %refunded.id, number = %refunded.sale_number, amount = %amount, status = %status, "Sale refunded");
        Ok(SaleOutcome {
            sale: refunded,
            movements: Vec::new(),
            journal,
        })
    }
}

async fn load_sale(conn: &mut SqliteConnection, id: &str) -> DbResult<Sale> {
    sale::fetch(conn, id).await?.ok_or_else(|| DbError::not_found("Sale", id))
}

pub(super) async fn load_customer(conn: &mut SqliteConnection, id: &str) -> DbResult<Customer> {
    party::fetch_customer(conn, id)
        .await?
        .ok_or_else(|| DbError::not_found("Customer", id))
}
