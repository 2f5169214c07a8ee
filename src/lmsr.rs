// ============================================================================
// LMSR Pricing Engine
// ============================================================================
//
// Logarithmic Market Scoring Rule for a binary market.
//
// Cost in shares, with liquidity l, shares q_for and q_against:
//
//     C = l * ln(e^(q_for/l) + e^(q_against/l))
//       = m + l * ln(1 + e^(-|q_for - q_against| / l)),   m = max(q_for, q_against)
//
// The second form never overflows and makes C >= m obvious: the market
// always holds enough to pay every winning share. With l = 0 the cost is m.
//
// The contract cannot evaluate logarithms, so every (l, q_for, q_against)
// within a market's limits is precomputed into a Merkle-committed table.
// A transition proves its collateral with a path into that table.
//
// All arithmetic is rust_decimal fixed-point; results are rounded up to
// whole collateral units so the figure is exact and reproducible.
//
// ============================================================================

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::codec::{encode_uint, sha256, Hash256};
use crate::config::MarketLimits;
use crate::error::{MarketError, Result};
use crate::market::Balance;
use crate::merkle::{verify_path, MerkleProof, MerkleTree};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Collateral units per share; also the payout per winning share
pub const SATS_PER_SHARE: u64 = 1 << 20;

/// Width of the collateral field in a pricing-table leaf
pub const COLLATERAL_WIDTH: usize = 6;

/// Beyond this spread the ln term is below one collateral unit
const SPREAD_CUTOFF: Decimal = dec!(40);

/// 1 / e
const E_INVERSE: Decimal = dec!(0.3678794411714423215955237702);

const SERIES_MAX_TERMS: u32 = 96;

// ============================================================================
// FIXED-POINT HELPERS
// ============================================================================

/// e^(-x) for x >= 0
fn exp_neg(x: Decimal) -> Decimal {
    let whole = x.trunc();
    let frac = x - whole;

    // Taylor series of e^(-frac), frac in [0, 1)
    let mut term = Decimal::ONE;
    let mut sum = Decimal::ONE;
    for k in 1..SERIES_MAX_TERMS {
        term = -term * frac / Decimal::from(k);
        if term.is_zero() {
            break;
        }
        sum += term;
    }

    let mut result = sum;
    for _ in 0..whole.to_u32().unwrap_or(0) {
        result *= E_INVERSE;
    }
    result
}

/// ln(1 + x) for x in [0, 1], via 2 * atanh(x / (2 + x))
fn ln_1p(x: Decimal) -> Decimal {
    let y = x / (dec!(2) + x);
    let y_squared = y * y;

    let mut power = y;
    let mut sum = Decimal::ZERO;
    for k in 0..SERIES_MAX_TERMS {
        let term = power / Decimal::from(2 * k + 1);
        if term.is_zero() {
            break;
        }
        sum += term;
        power *= y_squared;
    }
    dec!(2) * sum
}

/// l * ln(1 + e^(-spread / l)) in shares
fn spread_term(liquidity: u32, spread: u32) -> Decimal {
    if liquidity == 0 {
        return Decimal::ZERO;
    }
    let l = Decimal::from(liquidity);
    let ratio = Decimal::from(spread) / l;
    if ratio > SPREAD_CUTOFF {
        return Decimal::ZERO;
    }
    l * ln_1p(exp_neg(ratio))
}

fn collateral_units(max_shares: u32, term: Decimal) -> Result<u64> {
    let cost = (Decimal::from(max_shares) + term) * Decimal::from(SATS_PER_SHARE);
    cost.ceil()
        .to_u64()
        .ok_or_else(|| MarketError::bounds(format!("Collateral {} does not fit in u64", cost)))
}

// ============================================================================
// PRICING
// ============================================================================

/// LMSR cost of a balance in share units
pub fn lmsr_cost(balance: &Balance) -> Decimal {
    let max = balance.shares_for.max(balance.shares_against);
    let spread = balance.shares_for.abs_diff(balance.shares_against);
    Decimal::from(max) + spread_term(balance.liquidity, spread)
}

/// Collateral a market with this aggregate balance must lock
pub fn required_collateral(balance: &Balance) -> Result<u64> {
    let max = balance.shares_for.max(balance.shares_against);
    let spread = balance.shares_for.abs_diff(balance.shares_against);
    collateral_units(max, spread_term(balance.liquidity, spread))
}

/// Marginal price of a "for" share, between 0 and 1
///
/// With no liquidity the price snaps to 0, 1 or 0.5.
pub fn marginal_price_for(balance: &Balance) -> Decimal {
    let (f, a) = (balance.shares_for, balance.shares_against);
    if balance.liquidity == 0 {
        return match f.cmp(&a) {
            std::cmp::Ordering::Greater => Decimal::ONE,
            std::cmp::Ordering::Less => Decimal::ZERO,
            std::cmp::Ordering::Equal => dec!(0.5),
        };
    }
    let ratio = Decimal::from(f.abs_diff(a)) / Decimal::from(balance.liquidity);
    let other = if ratio > SPREAD_CUTOFF { Decimal::ZERO } else { exp_neg(ratio) };
    let leading = Decimal::ONE / (Decimal::ONE + other);
    if f >= a {
        leading
    } else {
        Decimal::ONE - leading
    }
}

/// Collateral moving into (positive) or out of (negative) the market when
/// the aggregate goes from `before` to `after`
pub fn trade_cost(before: &Balance, after: &Balance) -> Result<i128> {
    Ok(required_collateral(after)? as i128 - required_collateral(before)? as i128)
}

/// Payout for `shares` winning shares
pub fn payout(shares: u32) -> u64 {
    shares as u64 * SATS_PER_SHARE
}

// ============================================================================
// PRICING TABLE
// ============================================================================

/// Leaf committing `balance -> collateral`
pub fn pricing_leaf(balance: &Balance, collateral: u64) -> Result<Hash256> {
    let mut bytes = balance.to_bytes()?;
    bytes.extend(encode_uint(collateral, COLLATERAL_WIDTH)?);
    Ok(sha256(&bytes))
}

/// Collateral plus proof that the pricing table commits to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceLookup {
    pub balance: Balance,
    pub collateral: u64,
    pub proof: MerkleProof,
}

/// Merkle-committed table of every priced balance within `limits`
#[derive(Debug, Clone)]
pub struct PricingTable {
    limits: MarketLimits,
    tree: MerkleTree,
}

impl PricingTable {
    pub fn build(limits: MarketLimits) -> Result<Self> {
        limits.validate()?;

        let side = limits.max_shares as usize + 1;
        let mut leaves = Vec::with_capacity((limits.max_liquidity as usize + 1) * side * side);
        for liquidity in 0..=limits.max_liquidity {
            // The ln term depends only on liquidity and the spread
            let terms: Vec<Decimal> = (0..=limits.max_shares)
                .map(|spread| spread_term(liquidity, spread))
                .collect();
            for shares_for in 0..=limits.max_shares {
                for shares_against in 0..=limits.max_shares {
                    let balance = Balance::new(liquidity, shares_for, shares_against);
                    let spread = shares_for.abs_diff(shares_against) as usize;
                    let collateral = collateral_units(shares_for.max(shares_against), terms[spread])?;
                    leaves.push(pricing_leaf(&balance, collateral)?);
                }
            }
        }

        let tree = MerkleTree::from_leaves(leaves);
        tracing::debug!(
            max_liquidity = limits.max_liquidity,
            max_shares = limits.max_shares,
            leaves = tree.len(),
            root = %tree.root(),
            "Built LMSR pricing table"
        );
        Ok(Self { limits, tree })
    }

    pub fn limits(&self) -> MarketLimits {
        self.limits
    }

    pub fn leaves(&self) -> &[Hash256] {
        self.tree.leaves()
    }

    pub fn root(&self) -> Hash256 {
        self.tree.root()
    }

    /// Leaf position of a balance
    pub fn index_of(&self, balance: &Balance) -> Result<usize> {
        balance.check_limits(&self.limits)?;
        let side = self.limits.max_shares as usize + 1;
        Ok((balance.liquidity as usize * side + balance.shares_for as usize) * side
            + balance.shares_against as usize)
    }

    pub fn lookup(&self, balance: &Balance) -> Result<PriceLookup> {
        let index = self.index_of(balance)?;
        Ok(PriceLookup {
            balance: *balance,
            collateral: required_collateral(balance)?,
            proof: self.tree.path(index)?,
        })
    }
}

/// All table leaves for the given limits
pub fn pricing_table(limits: MarketLimits) -> Result<Vec<Hash256>> {
    Ok(PricingTable::build(limits)?.leaves().to_vec())
}

/// Check a claimed collateral figure against a table root
pub fn verify_price_lookup(root: &Hash256, balance: &Balance, collateral: u64, proof: &MerkleProof) -> bool {
    match pricing_leaf(balance, collateral) {
        Ok(leaf) => verify_path(root, &leaf, proof),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_limits() -> MarketLimits {
        MarketLimits::new(3, 12).unwrap()
    }

    #[test]
    fn test_empty_market_costs_nothing() {
        assert_eq!(required_collateral(&Balance::new(0, 0, 0)).unwrap(), 0);
    }

    #[test]
    fn test_zero_liquidity_is_max_shares() {
        assert_eq!(required_collateral(&Balance::new(0, 5, 2)).unwrap(), 5 * SATS_PER_SHARE);
        assert_eq!(required_collateral(&Balance::new(0, 2, 9)).unwrap(), 9 * SATS_PER_SHARE);
    }

    #[test]
    fn test_balanced_market_costs_l_ln2() {
        // ln 2 * 2^20 = 726817.66...
        assert_eq!(required_collateral(&Balance::new(1, 0, 0)).unwrap(), 726_818);
        // 2 * ln 2 * 2^20 = 1453635.32...
        assert_eq!(required_collateral(&Balance::new(2, 0, 0)).unwrap(), 1_453_636);
    }

    #[test]
    fn test_series_accuracy() {
        let ln2 = ln_1p(Decimal::ONE);
        assert!((ln2 - dec!(0.6931471805599453094172321215)).abs() < dec!(0.0000000000000000001));
        let e_inv = exp_neg(Decimal::ONE);
        assert!((e_inv - E_INVERSE).abs() < dec!(0.0000000000000000001));
        let e_inv_half = exp_neg(dec!(0.5));
        assert!((e_inv_half - dec!(0.6065306597126334236037995349)).abs() < dec!(0.0000000000000000001));
    }

    #[test]
    fn test_collateral_covers_winning_shares() {
        for l in 0..=3 {
            for f in 0..=12 {
                for a in 0..=12 {
                    let collateral = required_collateral(&Balance::new(l, f, a)).unwrap();
                    assert!(collateral >= payout(f.max(a)));
                }
            }
        }
    }

    #[test]
    fn test_collateral_monotonic_in_each_side() {
        for l in 0..=3 {
            for fixed in 0..=12 {
                let mut prev_for = 0;
                let mut prev_against = 0;
                for moving in 0..=12 {
                    let by_for = required_collateral(&Balance::new(l, moving, fixed)).unwrap();
                    let by_against = required_collateral(&Balance::new(l, fixed, moving)).unwrap();
                    assert!(by_for >= prev_for, "l={} f={} a={}", l, moving, fixed);
                    assert!(by_against >= prev_against, "l={} f={} a={}", l, fixed, moving);
                    prev_for = by_for;
                    prev_against = by_against;
                }
            }
        }
    }

    #[test]
    fn test_marginal_price() {
        assert_eq!(marginal_price_for(&Balance::new(2, 3, 3)), dec!(0.5));
        let up = marginal_price_for(&Balance::new(2, 5, 1));
        let down = marginal_price_for(&Balance::new(2, 1, 5));
        assert!(up > dec!(0.5) && up < Decimal::ONE);
        assert!((up + down - Decimal::ONE).abs() < dec!(0.000000000000000001));
        assert_eq!(marginal_price_for(&Balance::new(0, 1, 0)), Decimal::ONE);
    }

    #[test]
    fn test_trade_cost_sign() {
        let before = Balance::new(1, 2, 0);
        let after = Balance::new(1, 4, 0);
        assert!(trade_cost(&before, &after).unwrap() > 0);
        assert!(trade_cost(&after, &before).unwrap() < 0);
    }

    #[test]
    fn test_table_layout_and_lookup() {
        let limits = small_limits();
        let table = PricingTable::build(limits).unwrap();
        assert_eq!(table.leaves().len(), 4 * 13 * 13);

        let balance = Balance::new(2, 7, 3);
        let index = table.index_of(&balance).unwrap();
        assert_eq!(index, (2 * 13 + 7) * 13 + 3);

        let lookup = table.lookup(&balance).unwrap();
        assert_eq!(lookup.proof.index(), Some(index));
        assert_eq!(table.leaves()[index], pricing_leaf(&balance, lookup.collateral).unwrap());
        assert!(verify_price_lookup(&table.root(), &balance, lookup.collateral, &lookup.proof));
        assert!(!verify_price_lookup(&table.root(), &balance, lookup.collateral - 1, &lookup.proof));
    }

    #[test]
    fn test_table_rejects_out_of_bounds() {
        let table = PricingTable::build(small_limits()).unwrap();
        assert!(matches!(table.lookup(&Balance::new(4, 0, 0)), Err(MarketError::Bounds(_))));
        assert!(matches!(table.lookup(&Balance::new(1, 13, 0)), Err(MarketError::Bounds(_))));
        assert!(matches!(table.lookup(&Balance::new(1, 0, 13)), Err(MarketError::Bounds(_))));
    }

    #[test]
    fn test_table_is_deterministic() {
        let a = pricing_table(small_limits()).unwrap();
        let b = pricing_table(small_limits()).unwrap();
        assert_eq!(a, b);
    }
}
