//! Derivation rules for liquidity events.
//!
//! Pure functions over decimal amounts. Results depend only on their
//! inputs, so a replayed window derives identical rows.

use rust_decimal::Decimal;

use super::types::PoolAllocation;

/// Sums decimal amounts, returning `None` on overflow.
#[must_use]
pub fn checked_sum(values: &[Decimal]) -> Option<Decimal> {
    values
        .iter()
        .try_fold(Decimal::ZERO, |acc, value| acc.checked_add(*value))
}

/// Splits `shares` across outcomes proportional to the complement of each
/// outcome's share of the total amount.
///
/// With amounts `a_i` and total `T`, outcome `i` receives
/// `shares * (T - a_i) / sum_j (T - a_j)`. Outcomes that received less
/// collateral get more pool shares. When every weight is zero (a single
/// outcome, or nothing deposited) the shares are split evenly.
///
/// Returns `None` if an intermediate value leaves the decimal range.
#[must_use]
pub fn split_by_complement(shares: Decimal, amounts: &[Decimal]) -> Option<Vec<PoolAllocation>> {
    let total = checked_sum(amounts)?;
    let weights = amounts
        .iter()
        .map(|a| total.checked_sub(*a))
        .collect::<Option<Vec<Decimal>>>()?;
    allocate(shares, amounts, &weights)
}

/// Splits `shares` across outcomes proportional to each outcome's amount.
///
/// Used for liquidity removal, where every outcome gives back its own
/// share of the pool. Even split when all amounts are zero.
#[must_use]
pub fn split_proportional(shares: Decimal, amounts: &[Decimal]) -> Option<Vec<PoolAllocation>> {
    allocate(shares, amounts, amounts)
}

fn allocate(
    shares: Decimal,
    amounts: &[Decimal],
    weights: &[Decimal],
) -> Option<Vec<PoolAllocation>> {
    let weight_sum = checked_sum(weights)?;
    let count = Decimal::from(amounts.len().max(1));

    amounts
        .iter()
        .zip(weights)
        .enumerate()
        .map(|(index, (amount, weight))| {
            // Fraction first: raw token amounts multiplied together leave
            // the 96-bit range.
            let pool_shares = if weight_sum.is_zero() {
                shares.checked_div(count)?
            } else {
                shares.checked_mul(weight.checked_div(weight_sum)?)?
            };
            Some(PoolAllocation {
                outcome_index: u32::try_from(index).unwrap_or(u32::MAX),
                amount: *amount,
                pool_shares,
            })
        })
        .collect()
}

/// Applies a signed collateral change to a pool balance.
///
/// Returns `None` if the pool would go negative, which means the mirrored
/// state has diverged from the chain, or if the sum overflows.
#[must_use]
pub fn apply_pool_delta(balance: Decimal, delta: Decimal) -> Option<Decimal> {
    let next = balance.checked_add(delta)?;
    (!next.is_sign_negative() || next.is_zero()).then_some(next)
}

/// Net collateral a buy adds to the outcome pool.
#[must_use]
pub fn buy_pool_delta(investment_amount: Decimal, fee_amount: Decimal) -> Option<Decimal> {
    investment_amount.checked_sub(fee_amount)
}

/// Net collateral a sell takes out of the outcome pool (negative).
#[must_use]
pub fn sell_pool_delta(return_amount: Decimal, fee_amount: Decimal) -> Option<Decimal> {
    return_amount.checked_add(fee_amount).map(|out| -out)
}
