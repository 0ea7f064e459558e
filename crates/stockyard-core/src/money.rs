//! # Money Module
//!
//! Integer-cent money used by every price column, invoice total and the
//! auto-pricing calculator.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Catalog prices travel through three places:                            │
//! │                                                                         │
//! │    SQLite column (INTEGER cents)                                        │
//! │         │                                                               │
//! │         ▼                                                               │
//! │    Money arithmetic (markup, surcharge, line totals)                    │
//! │         │                                                               │
//! │         ▼                                                               │
//! │    Remote document (integer cents, exact round trip)                    │
//! │                                                                         │
//! │  A float anywhere in that chain makes two devices disagree about the    │
//! │  same price after a push/pull cycle, which the LWW merge would then     │
//! │  report as a change. Integers compare exactly.                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use stockyard_core::money::Money;
//!
//! let cost = Money::from_cents(1_000);
//! let with_margin = cost.increase_bps(3_500); // +35%
//! assert_eq!(with_margin.cents(), 1_350);
//! assert_eq!(with_margin.round_up_to(100).cents(), 1_400);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Mul, Sub};
use ts_rs::TS;

/// Basis points in one whole (100%).
pub const BPS_ONE: i64 = 10_000;

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in the smallest currency unit.
///
/// Signed so that discounts and reversals can be expressed directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from cents.
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Returns the value in cents.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Zero.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Multiplies a unit price by a line quantity.
    ///
    /// ## Example
    /// ```rust
    /// use stockyard_core::money::Money;
    ///
    /// let unit = Money::from_cents(299);
    /// assert_eq!(unit.multiply_quantity(3).cents(), 897);
    /// ```
    #[inline]
    pub const fn multiply_quantity(&self, qty: i64) -> Self {
        Money(self.0 * qty)
    }

    /// Returns `bps` basis points of this amount, rounded half away from zero.
    ///
    /// `Money::from_cents(1000).portion_bps(825)` is 83 cents (8.25%).
    pub fn portion_bps(&self, bps: i64) -> Money {
        // i128 so that large catalog totals cannot overflow the product
        let raw = self.0 as i128 * bps as i128;
        let half = (BPS_ONE / 2) as i128;
        let rounded = if raw >= 0 {
            (raw + half) / BPS_ONE as i128
        } else {
            (raw - half) / BPS_ONE as i128
        };
        Money(rounded as i64)
    }

    /// Increases this amount by `bps` basis points (markup, surcharge).
    pub fn increase_bps(&self, bps: i64) -> Money {
        *self + self.portion_bps(bps)
    }

    /// Decreases this amount by `bps` basis points (retention, discount).
    pub fn decrease_bps(&self, bps: i64) -> Money {
        *self - self.portion_bps(bps)
    }

    /// Rounds up to the next multiple of `step` cents.
    ///
    /// A non-positive step returns the value unchanged. Negative amounts are
    /// rounded towards zero so that "up" always means "not cheaper".
    pub fn round_up_to(&self, step: i64) -> Money {
        if step <= 0 {
            return *self;
        }
        let rem = self.0.rem_euclid(step);
        if rem == 0 {
            *self
        } else {
            Money(self.0 - rem + step)
        }
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Debug-oriented rendering; the UI formats with its own locale.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{}${}.{:02}", sign, (self.0 / 100).abs(), (self.0 % 100).abs())
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

impl Mul<i64> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, qty: i64) -> Self {
        Money(self.0 * qty)
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
