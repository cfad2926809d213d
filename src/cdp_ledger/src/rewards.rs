//! Reward-per-stake accumulator for redistributed collateral and debt.
//!
//! A liquidation that the absorption pool cannot cover bumps `l_coll` and
//! `l_debt` by the residual divided by the total stake. Each position owes
//! `(L - snapshot) * stake / 1e18` of both until it is touched, so a
//! redistribution costs O(1) whatever the number of positions. The
//! truncated part of every division is carried into the next one.

use crate::numeric::{mul_div, scaled_div_rem, Coll, Debt, Wad, DECIMAL_PRECISION};
use crate::position::RewardSnapshot;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardAccumulator {
    pub l_coll: Wad,
    pub l_debt: Wad,
    pub last_coll_error: u128,
    pub last_debt_error: u128,
}

impl RewardAccumulator {
    pub fn snapshot(&self) -> RewardSnapshot {
        RewardSnapshot {
            l_coll: self.l_coll,
            l_debt: self.l_debt,
        }
    }

    pub fn pending_coll(&self, snapshot: &RewardSnapshot, stake: u128) -> Coll {
        let per_unit_stake = self.l_coll.to_u128() - snapshot.l_coll.to_u128();
        Coll::new(mul_div(per_unit_stake, stake, DECIMAL_PRECISION))
    }

    pub fn pending_debt(&self, snapshot: &RewardSnapshot, stake: u128) -> Debt {
        let per_unit_stake = self.l_debt.to_u128() - snapshot.l_debt.to_u128();
        Debt::new(mul_div(per_unit_stake, stake, DECIMAL_PRECISION))
    }

    /// Spreads `coll` and `debt` over `total_stakes`.
    pub fn distribute(&mut self, coll: Coll, debt: Debt, total_stakes: u128) {
        assert!(
            total_stakes > 0,
            "bug: redistribution with zero total stakes"
        );

        let (coll_per_stake, coll_error) =
            scaled_div_rem(coll.to_u128(), self.last_coll_error, total_stakes);
        let (debt_per_stake, debt_error) =
            scaled_div_rem(debt.to_u128(), self.last_debt_error, total_stakes);

        self.l_coll = self.l_coll + Wad::new(coll_per_stake);
        self.l_debt = self.l_debt + Wad::new(debt_per_stake);
        self.last_coll_error = coll_error;
        self.last_debt_error = debt_error;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_is_proportional_to_stake() {
        let mut acc = RewardAccumulator::default();
        let before = acc.snapshot();
        acc.distribute(Coll::from_units(3), Debt::from_units(300), 4 * DECIMAL_PRECISION);

        let one = DECIMAL_PRECISION;
        assert_eq!(acc.pending_coll(&before, one), Coll::new(750_000_000_000_000_000));
        assert_eq!(acc.pending_debt(&before, 3 * one), Debt::from_units(225));
        assert_eq!(acc.pending_debt(&acc.snapshot(), 3 * one), Debt::ZERO);
    }

    #[test]
    fn truncation_is_carried_forward() {
        let mut acc = RewardAccumulator::default();
        // 1 wei over 3 stakes: nothing per stake yet, everything carried.
        acc.distribute(Coll::new(1), Debt::new(1), 3);
        assert_eq!(acc.l_coll, Wad::new(333_333_333_333_333_333));
        assert_eq!(acc.last_coll_error, 1);

        acc.distribute(Coll::new(2), Debt::new(2), 3);
        assert_eq!(acc.l_coll, Wad::new(DECIMAL_PRECISION));
        assert_eq!(acc.last_coll_error, 0);
        assert_eq!(acc.l_debt, acc.l_coll);
    }

    #[test]
    #[should_panic(expected = "zero total stakes")]
    fn distributing_over_nothing_is_a_bug() {
        RewardAccumulator::default().distribute(Coll::new(1), Debt::new(1), 0);
    }
}
