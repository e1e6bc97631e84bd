use std::fmt;
use std::iter::Sum;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

/// Money amount with 2 decimal places, stored as integer cents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Money(i64);

impl Money {
    const SCALE: i64 = 100;

    pub const ZERO: Money = Money(0);

    /// Largest magnitude accepted from outside input: ten trillion.
    pub const MAX: Money = Money(1_000_000_000_000_000);

    /// Convert a decimal to cents, rounding half away from zero.
    /// `None` if the result is beyond [`Money::MAX`].
    pub fn from_decimal(value: Decimal) -> Option<Self> {
        let cents = value
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
            .checked_mul(Decimal::ONE_HUNDRED)?
            .to_i64()?;
        (cents.unsigned_abs() <= Self::MAX.0 as u64).then_some(Money(cents))
    }

    /// Convert a float through its shortest decimal form, so `1.005` is
    /// rounded as written rather than as stored.
    /// `None` for NaN, infinities and amounts beyond [`Money::MAX`].
    pub fn try_from_float(value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        value
            .to_string()
            .parse::<Decimal>()
            .ok()
            .and_then(Self::from_decimal)
    }

    #[cfg(test)]
    pub(crate) fn from_float(value: f64) -> Self {
        match Self::try_from_float(value) {
            Some(money) => money,
            None => panic!("{value} is not a money amount"),
        }
    }

    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    pub const fn cents(self) -> i64 {
        self.0
    }

    pub const fn abs(self) -> Self {
        Money(self.0.saturating_abs())
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// Cents past the last whole dollar.
    pub(crate) const fn fraction(self) -> i64 {
        self.0 % Self::SCALE
    }

    pub(crate) const fn one_unit() -> Self {
        Money(Self::SCALE)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let whole = abs / Self::SCALE as u64;
        let frac = abs % Self::SCALE as u64;
        write!(f, "{sign}{whole}.{frac:02}")
    }
}

impl std::ops::Add for Money {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Money(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Money {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Money(self.0 - rhs.0)
    }
}

impl std::ops::AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl std::ops::SubAssign for Money {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Money::ZERO, |acc, m| acc + m)
    }
}
