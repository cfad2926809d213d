use crate::numeric::{Coll, Debt, Wad};
use crate::position::PositionStatus;
use candid::Principal;
use serde::{Deserialize, Serialize};

/// Notifications emitted by the ledger, drained by the embedding through
/// `CdpEngine::take_events`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    #[serde(rename = "open_position")]
    OpenPosition {
        owner: Principal,
        coll: Coll,
        debt: Debt,
        borrowing_fee: Debt,
        stake: u128,
    },

    #[serde(rename = "adjust_position")]
    AdjustPosition {
        owner: Principal,
        coll: Coll,
        debt: Debt,
        borrowing_fee: Debt,
        stake: u128,
    },

    #[serde(rename = "position_closed")]
    PositionClosed {
        owner: Principal,
        status: PositionStatus,
    },

    #[serde(rename = "total_stakes_updated")]
    TotalStakesUpdated { total_stakes: u128 },

    #[serde(rename = "system_snapshots_updated")]
    SystemSnapshotsUpdated {
        total_stakes_snapshot: u128,
        total_collateral_snapshot: Coll,
    },

    #[serde(rename = "redistribution")]
    Redistribution {
        coll: Coll,
        debt: Debt,
        l_coll: Wad,
        l_debt: Wad,
    },

    #[serde(rename = "liquidate_position")]
    LiquidatePosition {
        owner: Principal,
        liquidator: Principal,
        debt: Debt,
        coll: Coll,
        gas_compensation: Coll,
        offset_debt: Debt,
        offset_coll: Coll,
        collateral_surplus: Coll,
        recovery_mode: bool,
    },

    #[serde(rename = "redeem_from_position")]
    RedeemFromPosition {
        owner: Principal,
        debt_redeemed: Debt,
        coll_drawn: Coll,
        parked_debt: Debt,
    },

    #[serde(rename = "redemption")]
    Redemption {
        redeemer: Principal,
        attempted: Debt,
        redeemed: Debt,
        collateral_drawn: Coll,
        fee: Coll,
    },

    #[serde(rename = "scavenge_position")]
    ScavengePosition {
        owner: Principal,
        caller: Principal,
        obligation: Debt,
        coll: Coll,
        caller_coll: Coll,
        free_debt: Debt,
    },

    #[serde(rename = "collateral_surplus_claimed")]
    CollateralSurplusClaimed { owner: Principal, amount: Coll },

    #[serde(rename = "base_rate_updated")]
    BaseRateUpdated { base_rate: Wad, timestamp: u64 },
}

impl Event {
    /// Owner of the position the event concerns, if any.
    pub fn owner(&self) -> Option<Principal> {
        match self {
            Event::OpenPosition { owner, .. }
            | Event::AdjustPosition { owner, .. }
            | Event::PositionClosed { owner, .. }
            | Event::LiquidatePosition { owner, .. }
            | Event::RedeemFromPosition { owner, .. }
            | Event::ScavengePosition { owner, .. }
            | Event::CollateralSurplusClaimed { owner, .. } => Some(*owner),
            Event::TotalStakesUpdated { .. }
            | Event::SystemSnapshotsUpdated { .. }
            | Event::Redistribution { .. }
            | Event::Redemption { .. }
            | Event::BaseRateUpdated { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_snake_case_tags() {
        let event = Event::PositionClosed {
            owner: Principal::from_slice(&[7]),
            status: PositionStatus::ClosedByLiquidation,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.starts_with("{\"position_closed\""), "{json}");
        assert_eq!(serde_json::from_str::<Event>(&json).unwrap(), event);
        assert_eq!(event.owner(), Some(Principal::from_slice(&[7])));
    }
}
