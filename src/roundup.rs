//! Round-up calculation for purchases.

use crate::Money;

/// Amount needed to bring `amount` up to the next whole dollar.
///
/// The sign of `amount` is ignored. A whole-dollar purchase still rounds up by
/// a full dollar, so the result is always in `(0.00, 1.00]`.
pub fn calculate_roundup(amount: Money) -> Money {
    let cents = amount.abs().fraction();
    if cents == 0 {
        Money::one_unit()
    } else {
        Money::one_unit() - Money::from_cents(cents)
    }
}

/// Sum of the round-ups of every amount.
pub fn calculate_total_roundup(amounts: impl IntoIterator<Item = Money>) -> Money {
    amounts.into_iter().map(calculate_roundup).sum()
}
