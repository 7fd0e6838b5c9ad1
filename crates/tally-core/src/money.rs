//! # Money, Quantity & Unit Cost
//!
//! Fixed-point primitives used by every other module.
//!
//! ## Precision Table
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Type        Stored as        Scale        Example                      │
//! │  ──────────  ───────────────  ───────────  ───────────────────────────  │
//! │  Money       i64 cents        1/100        1099      → $10.99           │
//! │  UnitCost    i64              1/10 000     20_500    → $2.0500          │
//! │  Quantity    i64 milli-units  1/1000       2_500     → 2.500 units      │
//! │                                                                         │
//! │  Products cross scales through i128 and round half away from zero:     │
//! │    Quantity × Money    → Money                                         │
//! │    Quantity × UnitCost → Money                                         │
//! │    weighted average    → UnitCost                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! No binary floating point is ever involved. Weighted-average cost is
//! recomputed on every receipt, so drift from repeated float rounding would
//! compound across thousands of updates.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};

use crate::types::TaxRate;

/// Scale of [`Quantity`]: thousandths of a unit.
pub const QUANTITY_SCALE: i64 = 1_000;

/// Scale of [`UnitCost`]: ten-thousandths of a currency unit.
pub const UNIT_COST_SCALE: i64 = 10_000;

/// Divides with rounding half away from zero.
///
/// `den` must be non-zero. All cross-scale arithmetic in this module funnels
/// through here so rounding is identical everywhere.
pub(crate) fn div_round(num: i128, den: i128) -> i128 {
    let (num, den) = if den < 0 { (-num, -den) } else { (num, den) };
    if num >= 0 {
        (num + den / 2) / den
    } else {
        -((-num + den / 2) / den)
    }
}

// =============================================================================
// Money
// =============================================================================

/// A monetary value in the smallest currency unit (cents).
///
/// Signed so refunds, contra postings and negative adjustments stay in the
/// same type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(transparent))]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from cents.
    ///
    /// ```rust
    /// use tally_core::money::Money;
    ///
    /// let price = Money::from_cents(1099);
    /// assert_eq!(price.to_string(), "$10.99");
    /// ```
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Creates a Money value from major and minor units.
    ///
    /// For negative amounts only the major unit carries the sign:
    /// `from_major_minor(-5, 50)` is -$5.50.
    #[inline]
    pub const fn from_major_minor(major: i64, minor: i64) -> Self {
        if major < 0 {
            Money(major * 100 - minor)
        } else {
            Money(major * 100 + minor)
        }
    }

    /// Returns the value in cents.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Returns the major unit (dollars) portion.
    #[inline]
    pub const fn dollars(&self) -> i64 {
        self.0 / 100
    }

    /// Returns the minor unit portion (always 0-99).
    #[inline]
    pub const fn cents_part(&self) -> i64 {
        (self.0 % 100).abs()
    }

    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    #[inline]
    pub const fn abs(&self) -> Self {
        Money(self.0.abs())
    }

    /// Clamps negative values to zero.
    #[inline]
    pub fn floor_zero(self) -> Self {
        if self.0 < 0 {
            Money::zero()
        } else {
            self
        }
    }

    /// Tax added on top of this amount (exclusive pricing).
    ///
    /// `(amount × bps) / 10000`, rounded half away from zero.
    ///
    /// ```rust
    /// use tally_core::money::Money;
    /// use tally_core::types::TaxRate;
    ///
    /// let taxable = Money::from_cents(2500);
    /// assert_eq!(taxable.calculate_tax(TaxRate::from_bps(1000)).cents(), 250);
    /// ```
    pub fn calculate_tax(&self, rate: TaxRate) -> Money {
        Money(div_round(self.0 as i128 * rate.bps() as i128, 10_000) as i64)
    }

    /// Tax already contained in this amount (inclusive pricing).
    ///
    /// `amount × rate / (1 + rate)`, which in basis points is
    /// `amount × bps / (10000 + bps)`.
    ///
    /// ```rust
    /// use tally_core::money::Money;
    /// use tally_core::types::TaxRate;
    ///
    /// // $11.00 including 10% tax contains $1.00 of tax
    /// let gross = Money::from_cents(1100);
    /// assert_eq!(gross.extract_inclusive_tax(TaxRate::from_bps(1000)).cents(), 100);
    /// ```
    pub fn extract_inclusive_tax(&self, rate: TaxRate) -> Money {
        let bps = rate.bps() as i128;
        Money(div_round(self.0 as i128 * bps, 10_000 + bps) as i64)
    }

    /// The given percentage (in basis points) of this amount.
    pub fn percentage(&self, bps: u32) -> Money {
        Money(div_round(self.0 as i128 * bps as i128, 10_000) as i64)
    }

    /// Applies a percentage discount and returns the discounted amount.
    pub fn apply_percentage_discount(&self, discount_bps: u32) -> Money {
        *self - self.percentage(discount_bps)
    }

    /// `self × part / whole`, rounded half away from zero. Zero when
    /// `whole` is zero.
    pub fn prorate(&self, part: Money, whole: Money) -> Money {
        if whole.is_zero() {
            return Money::zero();
        }
        Money(div_round(self.0 as i128 * part.0 as i128, whole.0 as i128) as i64)
    }

    /// Multiplies by a whole-unit count.
    #[inline]
    pub const fn multiply_quantity(&self, qty: i64) -> Self {
        Money(self.0 * qty)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{}${}.{:02}", sign, self.dollars().abs(), self.cents_part())
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

impl Neg for Money {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        Money(-self.0)
    }
}

impl Mul<i64> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, qty: i64) -> Self {
        Money(self.0 * qty)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + *m)
    }
}

// =============================================================================
// Quantity
// =============================================================================

/// A stock quantity in thousandths of a unit.
///
/// Three decimal places cover weighed goods (1.250 kg) while keeping
/// whole-unit retail at a plain `from_units(n)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(transparent))]
pub struct Quantity(i64);

impl Quantity {
    /// Whole units.
    #[inline]
    pub const fn from_units(units: i64) -> Self {
        Quantity(units * QUANTITY_SCALE)
    }

    /// Raw thousandths.
    #[inline]
    pub const fn from_milli(milli: i64) -> Self {
        Quantity(milli)
    }

    #[inline]
    pub const fn milli(&self) -> i64 {
        self.0
    }

    /// Whole-unit part, truncated toward zero.
    #[inline]
    pub const fn whole_units(&self) -> i64 {
        self.0 / QUANTITY_SCALE
    }

    #[inline]
    pub const fn zero() -> Self {
        Quantity(0)
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    #[inline]
    pub const fn abs(&self) -> Self {
        Quantity(self.0.abs())
    }

    /// Clamps negative values to zero.
    #[inline]
    pub fn floor_zero(self) -> Self {
        if self.0 < 0 {
            Quantity::zero()
        } else {
            self
        }
    }

    /// Extended price: `quantity × unit price`, rounded to the cent.
    pub fn times_price(&self, price: Money) -> Money {
        Money::from_cents(div_round(self.0 as i128 * price.cents() as i128, QUANTITY_SCALE as i128) as i64)
    }

    /// Extended cost: `quantity × unit cost`, rounded to the cent.
    pub fn times_cost(&self, cost: UnitCost) -> Money {
        // milli × (1/10000) → cents needs a divisor of 1000 × 100
        let den = QUANTITY_SCALE as i128 * (UNIT_COST_SCALE / 100) as i128;
        Money::from_cents(div_round(self.0 as i128 * cost.raw() as i128, den) as i64)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.abs();
        write!(f, "{}{}.{:03}", sign, abs / QUANTITY_SCALE, abs % QUANTITY_SCALE)
    }
}

impl Default for Quantity {
    fn default() -> Self {
        Quantity::zero()
    }
}

impl Add for Quantity {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Quantity(self.0 + other.0)
    }
}

impl AddAssign for Quantity {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Quantity {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Quantity(self.0 - other.0)
    }
}

impl SubAssign for Quantity {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

impl Neg for Quantity {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        Quantity(-self.0)
    }
}

impl Sum for Quantity {
    fn sum<I: Iterator<Item = Quantity>>(iter: I) -> Self {
        iter.fold(Quantity::zero(), |acc, q| acc + q)
    }
}

// =============================================================================
// Unit Cost
// =============================================================================

/// Per-unit cost with four decimal places.
///
/// Kept separate from [`Money`] so a weighted-average update cannot silently
/// drop to cent precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(transparent))]
pub struct UnitCost(i64);

impl UnitCost {
    /// Raw ten-thousandths of a currency unit.
    #[inline]
    pub const fn from_raw(raw: i64) -> Self {
        UnitCost(raw)
    }

    /// Whole cents, e.g. a supplier price list entry.
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        UnitCost(cents * (UNIT_COST_SCALE / 100))
    }

    #[inline]
    pub const fn raw(&self) -> i64 {
        self.0
    }

    #[inline]
    pub const fn zero() -> Self {
        UnitCost(0)
    }

    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Rounds to the nearest cent.
    pub fn to_money(&self) -> Money {
        Money::from_cents(div_round(self.0 as i128, (UNIT_COST_SCALE / 100) as i128) as i64)
    }

    /// Blends two cost layers by quantity.
    ///
    /// `(q1 × c1 + q2 × c2) / (q1 + q2)`, rounded to four decimals.
    /// Falls back to `c2` when the combined quantity is not positive.
    ///
    /// ```rust
    /// use tally_core::money::{Quantity, UnitCost};
    ///
    /// let avg = UnitCost::weighted_average(
    ///     Quantity::from_units(10), UnitCost::from_cents(200),
    ///     Quantity::from_units(5), UnitCost::from_cents(350),
    /// );
    /// assert_eq!(avg, UnitCost::from_cents(250));
    /// ```
    pub fn weighted_average(q1: Quantity, c1: UnitCost, q2: Quantity, c2: UnitCost) -> UnitCost {
        let total_qty = q1.milli() as i128 + q2.milli() as i128;
        if total_qty <= 0 {
            return c2;
        }
        let value = q1.milli() as i128 * c1.0 as i128 + q2.milli() as i128 * c2.0 as i128;
        UnitCost(div_round(value, total_qty) as i64)
    }
}

impl fmt::Display for UnitCost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.abs();
        write!(f, "{}${}.{:04}", sign, abs / UNIT_COST_SCALE, abs % UNIT_COST_SCALE)
    }
}

impl Default for UnitCost {
    fn default() -> Self {
        UnitCost::zero()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Money::from_cents(1099).to_string(), "$10.99");
        assert_eq!(Money::from_cents(-550).to_string(), "-$5.50");
        assert_eq!(Money::zero().to_string(), "$0.00");
        assert_eq!(Quantity::from_milli(2500).to_string(), "2.500");
        assert_eq!(Quantity::from_milli(-1).to_string(), "-0.001");
        assert_eq!(UnitCost::from_raw(20_512).to_string(), "$2.0512");
    }

    #[test]
    fn test_from_major_minor() {
        assert_eq!(Money::from_major_minor(10, 99).cents(), 1099);
        assert_eq!(Money::from_major_minor(-5, 50).cents(), -550);
    }

    #[test]
    fn test_div_round_half_away_from_zero() {
        assert_eq!(div_round(5, 10), 1);
        assert_eq!(div_round(4, 10), 0);
        assert_eq!(div_round(-5, 10), -1);
        assert_eq!(div_round(-4, 10), 0);
        assert_eq!(div_round(15, -10), -2);
    }

    #[test]
    fn test_exclusive_tax() {
        let rate = TaxRate::from_bps(825);
        // $10.00 × 8.25% = 82.5¢ → 83¢
        assert_eq!(Money::from_cents(1000).calculate_tax(rate).cents(), 83);
        // refunds round symmetrically
        assert_eq!(Money::from_cents(-1000).calculate_tax(rate).cents(), -83);
    }

    #[test]
    fn test_inclusive_tax() {
        let rate = TaxRate::from_bps(1000);
        assert_eq!(Money::from_cents(2750).extract_inclusive_tax(rate).cents(), 250);
        assert_eq!(Money::from_cents(999).extract_inclusive_tax(rate).cents(), 91);
        assert_eq!(Money::from_cents(500).extract_inclusive_tax(TaxRate::zero()).cents(), 0);
    }

    #[test]
    fn test_percentage_discount() {
        let subtotal = Money::from_cents(10000);
        assert_eq!(subtotal.apply_percentage_discount(1000).cents(), 9000);
        assert_eq!(subtotal.percentage(1250).cents(), 1250);
    }

    #[test]
    fn test_prorate() {
        let tax = Money::from_cents(250);
        assert_eq!(tax.prorate(Money::from_cents(1000), Money::from_cents(2750)).cents(), 91);
        assert_eq!(tax.prorate(Money::from_cents(2750), Money::from_cents(2750)).cents(), 250);
        assert!(tax.prorate(Money::from_cents(100), Money::zero()).is_zero());
    }

    #[test]
    fn test_quantity_times_price() {
        let price = Money::from_cents(1000);
        assert_eq!(Quantity::from_units(2).times_price(price).cents(), 2000);
        // 1.255 kg at $3.99 = $5.00745 → $5.01
        assert_eq!(Quantity::from_milli(1255).times_price(Money::from_cents(399)).cents(), 501);
    }

    #[test]
    fn test_quantity_times_cost() {
        let cost = UnitCost::from_raw(20_050); // $2.0050
        assert_eq!(Quantity::from_units(3).times_cost(cost).cents(), 602); // 6.015 → 6.02
        assert_eq!(Quantity::from_units(10).times_cost(UnitCost::from_cents(200)).cents(), 2000);
    }

    #[test]
    fn test_weighted_average() {
        let avg = UnitCost::weighted_average(
            Quantity::from_units(4),
            UnitCost::from_cents(200),
            Quantity::from_units(6),
            UnitCost::from_cents(300),
        );
        // (4×2 + 6×3) / 10 = 2.60
        assert_eq!(avg, UnitCost::from_cents(260));
    }

    #[test]
    fn test_weighted_average_keeps_four_decimals() {
        let avg = UnitCost::weighted_average(
            Quantity::from_units(3),
            UnitCost::from_cents(100),
            Quantity::from_units(1),
            UnitCost::from_cents(200),
        );
        // 5 / 4 = 1.25
        assert_eq!(avg.raw(), 12_500);

        let avg = UnitCost::weighted_average(
            Quantity::from_units(2),
            UnitCost::from_cents(100),
            Quantity::from_units(1),
            UnitCost::from_cents(200),
        );
        // 4 / 3 = 1.3333
        assert_eq!(avg.raw(), 13_333);
    }

    #[test]
    fn test_weighted_average_falls_back_when_empty() {
        let avg = UnitCost::weighted_average(
            Quantity::zero(),
            UnitCost::from_cents(999),
            Quantity::zero(),
            UnitCost::from_cents(150),
        );
        assert_eq!(avg, UnitCost::from_cents(150));
    }

    #[test]
    fn test_sum_and_neg() {
        let total: Money = [Money::from_cents(100), Money::from_cents(250)].iter().sum();
        assert_eq!(total.cents(), 350);
        assert_eq!((-total).cents(), -350);
        assert_eq!(Money::from_cents(-5).floor_zero(), Money::zero());
    }

    #[test]
    fn test_unit_cost_to_money() {
        assert_eq!(UnitCost::from_raw(20_050).to_money().cents(), 201);
        assert_eq!(UnitCost::from_raw(20_049).to_money().cents(), 200);
    }
}
