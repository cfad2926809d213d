use crate::numeric::{mul_div, Coll};
use serde::{Deserialize, Serialize};

/// Total stake and the snapshot pair captured after each liquidation.
///
/// A new stake is `coll * total_stakes_snapshot / total_collateral_snapshot`.
/// Gas compensation leaves the system without a matching stake reduction, so
/// stakes issued later are diluted by exactly that loss.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeTracker {
    pub total_stakes: u128,
    pub total_stakes_snapshot: u128,
    pub total_collateral_snapshot: Coll,
}

impl StakeTracker {
    pub fn compute_new_stake(&self, coll: Coll) -> u128 {
        if self.total_collateral_snapshot.is_zero() || self.total_stakes_snapshot == 0 {
            return coll.to_u128();
        }
        mul_div(
            coll.to_u128(),
            self.total_stakes_snapshot,
            self.total_collateral_snapshot.to_u128(),
        )
    }

    pub fn replace_stake(&mut self, old_stake: u128, new_stake: u128) {
        self.total_stakes = self
            .total_stakes
            .checked_sub(old_stake)
            .and_then(|rest| rest.checked_add(new_stake))
            .unwrap_or_else(|| {
                panic!(
                    "bug: total stakes {} cannot replace {old_stake} with {new_stake}",
                    self.total_stakes
                )
            });
    }

    pub fn update_snapshots(&mut self, total_collateral: Coll) {
        self.total_stakes_snapshot = self.total_stakes;
        self.total_collateral_snapshot = total_collateral;
    }

    pub fn reset_snapshots(&mut self) {
        self.total_stakes_snapshot = 0;
        self.total_collateral_snapshot = Coll::ZERO;
    }
}
