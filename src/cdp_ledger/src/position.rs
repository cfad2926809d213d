use crate::numeric::{Coll, Debt, Wad};
use candid::Principal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    #[default]
    NonExistent,
    Active,
    ClosedByOwner,
    ClosedByLiquidation,
    ClosedByRedemption,
}

impl PositionStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, PositionStatus::Active)
    }
}

impl fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionStatus::NonExistent => write!(f, "Non-existent"),
            PositionStatus::Active => write!(f, "Active"),
            PositionStatus::ClosedByOwner => write!(f, "Closed by owner"),
            PositionStatus::ClosedByLiquidation => write!(f, "Closed by liquidation"),
            PositionStatus::ClosedByRedemption => write!(f, "Closed by redemption"),
        }
    }
}

/// Accumulator values at the position's last touch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardSnapshot {
    pub l_coll: Wad,
    pub l_debt: Wad,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub owner: Principal,
    /// Applied debt, excluding anything still pending in the accumulator.
    pub debt: Debt,
    /// Applied collateral, excluding anything still pending in the accumulator.
    pub coll: Coll,
    pub stake: u128,
    pub status: PositionStatus,
    pub array_index: u64,
    pub reward_snapshot: RewardSnapshot,
    /// Residual debt parked by a redemption that would have left dust behind.
    pub redemption_pending_debt: Debt,
    /// Debt redeemed away from this position since it was opened.
    pub redeemed_debt_total: Debt,
}

impl Position {
    pub fn new(owner: Principal) -> Self {
        Self {
            owner,
            debt: Debt::ZERO,
            coll: Coll::ZERO,
            stake: 0,
            status: PositionStatus::NonExistent,
            array_index: 0,
            reward_snapshot: RewardSnapshot::default(),
            redemption_pending_debt: Debt::ZERO,
            redeemed_debt_total: Debt::ZERO,
        }
    }

    /// A position a redemption has emptied of applied debt, or one carrying
    /// parked dust. Only scavenge or an owner close finalize it.
    pub fn is_awaiting_scavenge(&self) -> bool {
        self.status.is_active() && (self.debt.is_zero() || !self.redemption_pending_debt.is_zero())
    }
}

/// The components of a position's economic exposure. Callers must not
/// assume the raw fields alone are the true values.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntireDebtAndColl {
    pub debt: Debt,
    pub coll: Coll,
    pub pending_coll: Coll,
    pub pending_debt: Debt,
    pub redemption_pending_debt: Debt,
}

impl EntireDebtAndColl {
    pub fn entire_debt(&self) -> Debt {
        self.debt + self.pending_debt + self.redemption_pending_debt
    }

    pub fn entire_coll(&self) -> Coll {
        self.coll + self.pending_coll
    }

    /// Debt a redemption may still draw against.
    pub fn redeemable_debt(&self) -> Debt {
        self.debt + self.pending_debt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entire_amounts_add_every_component() {
        let amounts = EntireDebtAndColl {
            debt: Debt::from_units(100),
            coll: Coll::from_units(2),
            pending_coll: Coll::from_units(1),
            pending_debt: Debt::from_units(10),
            redemption_pending_debt: Debt::from_units(5),
        };
        assert_eq!(amounts.entire_debt(), Debt::from_units(115));
        assert_eq!(amounts.redeemable_debt(), Debt::from_units(110));
        assert_eq!(amounts.entire_coll(), Coll::from_units(3));
    }

    #[test]
    fn only_active_positions_await_scavenge() {
        let mut position = Position::new(Principal::from_slice(&[1]));
        assert!(!position.is_awaiting_scavenge());
        position.status = PositionStatus::Active;
        assert!(position.is_awaiting_scavenge());
        position.debt = Debt::from_units(100);
        assert!(!position.is_awaiting_scavenge());
        position.redemption_pending_debt = Debt::new(1);
        assert!(position.is_awaiting_scavenge());
    }
}
