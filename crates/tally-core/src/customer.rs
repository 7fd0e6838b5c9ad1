//! # Customers and Suppliers
//!
//! Purchase history, loyalty and the receivable balance for customers;
//! order history and the running payable for suppliers. Both are updated
//! only as a side effect of completing a sale, a purchase order or an
//! invoice step.
//!
//! ## Credit
//! ```text
//! current_balance   what the customer owes on sent invoices
//! credit_limit      0 = no limit
//! available_credit  max(0, limit − balance), None without a limit
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::types::new_id;
use crate::validation::{validate_bps, validate_name, validate_non_negative, validate_positive_amount};

// =============================================================================
// Loyalty
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum LoyaltyTier {
    Bronze,
    Silver,
    Gold,
    Platinum,
}

text_enum!(LoyaltyTier {
    Bronze => "bronze",
    Silver => "silver",
    Gold => "gold",
    Platinum => "platinum",
});

impl LoyaltyTier {
    /// Tier for a points balance.
    pub fn for_points(points: i64) -> Self {
        match points {
            p if p >= 10_000 => LoyaltyTier::Platinum,
            p if p >= 5_000 => LoyaltyTier::Gold,
            p if p >= 1_000 => LoyaltyTier::Silver,
            _ => LoyaltyTier::Bronze,
        }
    }
}

/// Earning and redemption rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoyaltyProgram {
    /// Points per currency unit spent, in basis points. 100 = 1%.
    pub points_rate_bps: u32,
    /// What one point is worth when redeemed.
    pub point_value: Money,
}

impl Default for LoyaltyProgram {
    fn default() -> Self {
        LoyaltyProgram {
            points_rate_bps: 100,
            point_value: Money::from_cents(1),
        }
    }
}

impl LoyaltyProgram {
    pub fn new(points_rate_bps: u32, point_value: Money) -> CoreResult<Self> {
        validate_bps("points_rate_bps", points_rate_bps)?;
        Ok(LoyaltyProgram {
            points_rate_bps,
            point_value,
        })
    }

    /// `floor(total in currency units × rate)`. Non-positive totals earn nothing.
    ///
    /// ```rust
    /// use tally_core::customer::LoyaltyProgram;
    /// use tally_core::money::Money;
    ///
    /// let program = LoyaltyProgram::default();
    /// assert_eq!(program.points_for(Money::from_cents(27_500)), 2);
    /// assert_eq!(program.points_for(Money::from_cents(9_999)), 0);
    /// ```
    pub fn points_for(&self, total: Money) -> i64 {
        if !total.is_positive() {
            return 0;
        }
        // cents × bps / (100 × 10_000)
        (total.cents() as i128 * self.points_rate_bps as i128 / 1_000_000) as i64
    }

    /// Currency value of `points`.
    pub fn value_of(&self, points: i64) -> Money {
        self.point_value * points
    }
}

// =============================================================================
// Customer
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Customer {
    pub id: String,
    pub tenant_id: String,
    pub customer_number: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub loyalty_points: i64,
    pub loyalty_tier: LoyaltyTier,
    pub total_spent: Money,
    pub total_orders: i64,
    pub first_purchase_date: Option<DateTime<Utc>>,
    pub last_purchase_date: Option<DateTime<Utc>>,
    pub credit_limit: Money,
    /// Owed on invoices.
    pub current_balance: Money,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

impl Customer {
    pub fn new(
        tenant_id: impl Into<String>,
        customer_number: impl Into<String>,
        name: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Customer {
            id: new_id(),
            tenant_id: tenant_id.into(),
            customer_number: customer_number.into(),
            name: name.into(),
            email: None,
            phone: None,
            loyalty_points: 0,
            loyalty_tier: LoyaltyTier::Bronze,
            total_spent: Money::zero(),
            total_orders: 0,
            first_purchase_date: None,
            last_purchase_date: None,
            credit_limit: Money::zero(),
            current_balance: Money::zero(),
            is_active: true,
            created_at: at,
            updated_at: at,
            version: 0,
        }
    }

    pub fn with_credit_limit(mut self, limit: Money) -> Self {
        self.credit_limit = limit;
        self
    }

    pub fn validate(&self) -> CoreResult<()> {
        validate_name("name", &self.name)?;
        validate_non_negative("credit_limit", self.credit_limit)?;
        Ok(())
    }

    /// Records a completed sale. Returns the points earned.
    pub fn record_purchase(&mut self, total: Money, program: &LoyaltyProgram, at: DateTime<Utc>) -> i64 {
        self.total_spent += total;
        self.total_orders += 1;
        if self.first_purchase_date.is_none() {
            self.first_purchase_date = Some(at);
        }
        self.last_purchase_date = Some(at);

        let points = program.points_for(total);
        self.add_loyalty_points(points, at);
        points
    }

    /// Takes a refund back out of lifetime spend. Points already earned stay.
    pub fn record_refund(&mut self, amount: Money, at: DateTime<Utc>) {
        self.total_spent = (self.total_spent - amount).floor_zero();
        self.updated_at = at;
    }

    pub fn add_loyalty_points(&mut self, points: i64, at: DateTime<Utc>) {
        self.loyalty_points += points.max(0);
        self.loyalty_tier = LoyaltyTier::for_points(self.loyalty_points);
        self.updated_at = at;
    }

    pub fn redeem_loyalty_points(&mut self, points: i64, at: DateTime<Utc>) -> CoreResult<()> {
        if points <= 0 || points > self.loyalty_points {
            return Err(CoreError::InsufficientLoyaltyPoints {
                customer_id: self.id.clone(),
                available: self.loyalty_points,
                requested: points,
            });
        }
        self.loyalty_points -= points;
        self.loyalty_tier = LoyaltyTier::for_points(self.loyalty_points);
        self.updated_at = at;
        Ok(())
    }

    // =========================================================================
    // Credit
    // =========================================================================

    pub fn has_credit_limit(&self) -> bool {
        self.credit_limit.is_positive()
    }

    pub fn has_outstanding_balance(&self) -> bool {
        self.current_balance.is_positive()
    }

    pub fn is_over_credit_limit(&self) -> bool {
        self.has_credit_limit() && self.current_balance > self.credit_limit
    }

    /// Headroom under the credit limit, or `None` when no limit is set.
    pub fn available_credit(&self) -> Option<Money> {
        self.has_credit_limit()
            .then(|| (self.credit_limit - self.current_balance).floor_zero())
    }

    pub fn set_credit_limit(&mut self, limit: Money, at: DateTime<Utc>) -> CoreResult<()> {
        validate_non_negative("credit_limit", limit)?;
        self.credit_limit = limit;
        self.updated_at = at;
        Ok(())
    }

    /// Puts an issued invoice on the customer's account. Fails when it
    /// would take the balance past the credit limit.
    pub fn charge_account(&mut self, amount: Money, at: DateTime<Utc>) -> CoreResult<()> {
        validate_positive_amount("amount", amount)?;
        if let Some(available) = self.available_credit() {
            if amount > available {
                return Err(CoreError::CreditLimitExceeded {
                    customer_id: self.id.clone(),
                    available,
                    requested: amount,
                });
            }
        }
        self.current_balance += amount;
        self.updated_at = at;
        Ok(())
    }

    /// Takes a payment or a cancelled charge off the account.
    pub fn settle_account(&mut self, amount: Money, at: DateTime<Utc>) {
        self.current_balance = (self.current_balance - amount).floor_zero();
        self.updated_at = at;
    }

    pub fn average_order_value(&self) -> Money {
        if self.total_orders == 0 {
            return Money::zero();
        }
        Money::from_cents(self.total_spent.cents() / self.total_orders)
    }
}

// =============================================================================
// Supplier
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Supplier {
    pub id: String,
    pub tenant_id: String,
    pub supplier_number: String,
    pub company_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    /// What we currently owe this supplier.
    pub current_balance: Money,
    pub total_purchased: Money,
    pub first_order_date: Option<DateTime<Utc>>,
    pub last_order_date: Option<DateTime<Utc>>,
    pub is_blocked: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

impl Supplier {
    pub fn new(
        tenant_id: impl Into<String>,
        supplier_number: impl Into<String>,
        company_name: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Supplier {
            id: new_id(),
            tenant_id: tenant_id.into(),
            supplier_number: supplier_number.into(),
            company_name: company_name.into(),
            email: None,
            phone: None,
            current_balance: Money::zero(),
            total_purchased: Money::zero(),
            first_order_date: None,
            last_order_date: None,
            is_blocked: false,
            created_at: at,
            updated_at: at,
            version: 0,
        }
    }

    pub fn validate(&self) -> CoreResult<()> {
        validate_name("company_name", &self.company_name)?;
        Ok(())
    }

    /// Records a completed purchase order worth `amount`, of which
    /// `unpaid` is still owed.
    pub fn record_purchase_order(&mut self, amount: Money, unpaid: Money, at: DateTime<Utc>) {
        self.total_purchased += amount;
        self.current_balance += unpaid;
        if self.first_order_date.is_none() {
            self.first_order_date = Some(at);
        }
        self.last_order_date = Some(at);
        self.updated_at = at;
    }

    /// Reduces the payable. Overpayment leaves a zero balance.
    pub fn record_payment(&mut self, amount: Money, at: DateTime<Utc>) {
        self.current_balance = (self.current_balance - amount).floor_zero();
        self.updated_at = at;
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
