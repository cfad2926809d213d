use crate::event::Event;
use crate::fees::BaseRate;
use crate::logs::DEBUG;
use crate::numeric::{Coll, Debt, Ratio, Wad};
use crate::position::{EntireDebtAndColl, Position, PositionStatus};
use crate::rewards::RewardAccumulator;
use crate::stakes::StakeTracker;
use crate::{
    compute_icr, compute_nominal_icr, EngineError, CRITICAL_COLLATERAL_RATIO,
    MINIMUM_COLLATERAL_RATIO,
};
use candid::{CandidType, Principal};
use ic_canister_log::log;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

macro_rules! ensure_eq {
    ($lhs:expr, $rhs:expr, $msg:expr $(, $args:expr)* $(,)*) => {
        if $lhs != $rhs {
            return Err(format!("{} ({:?}) != {} ({:?}): {}",
                               std::stringify!($lhs), $lhs,
                               std::stringify!($rhs), $rhs,
                               format!($msg $(,$args)*)));
        }
    }
}

macro_rules! ensure {
    ($cond:expr, $msg:expr $(, $args:expr)* $(,)*) => {
        if !$cond {
            return Err(format!("Condition {} is false: {}",
                               std::stringify!($cond),
                               format!($msg $(,$args)*)));
        }
    }
}

// 0.5% of the liquidated collateral.
pub const DEFAULT_GAS_COMPENSATION_DIVISOR: u128 = 200;
pub const DEFAULT_MIN_NET_DEBT: Debt = Debt::from_units(100);
pub const DEFAULT_REDEMPTION_FEE_FLOOR: Ratio = Ratio::new(dec!(0.005));
pub const DEFAULT_BORROWING_FEE_FLOOR: Ratio = Ratio::new(dec!(0.005));
pub const DEFAULT_MAX_BORROWING_FEE: Ratio = Ratio::new(dec!(0.05));

/// System-wide regime, derived from the total collateral ratio.
#[derive(CandidType, Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    /// No restrictions on the ledger interactions.
    #[default]
    GeneralAvailability,
    /// The total collateral ratio is below the critical ratio. Positions
    /// below the system ratio become liquidatable and risky adjustments
    /// are refused.
    Recovery,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::GeneralAvailability => write!(f, "General availability"),
            Mode::Recovery => write!(f, "Recovery"),
        }
    }
}

#[derive(CandidType, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub minimum_collateral_ratio: Ratio,
    pub critical_collateral_ratio: Ratio,
    /// Gas compensation is `coll / gas_compensation_divisor`.
    pub gas_compensation_divisor: u128,
    pub max_gas_compensation: Option<Coll>,
    pub min_net_debt: Debt,
    pub redemption_fee_floor: Ratio,
    pub borrowing_fee_floor: Ratio,
    pub max_borrowing_fee: Ratio,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            minimum_collateral_ratio: MINIMUM_COLLATERAL_RATIO,
            critical_collateral_ratio: CRITICAL_COLLATERAL_RATIO,
            gas_compensation_divisor: DEFAULT_GAS_COMPENSATION_DIVISOR,
            max_gas_compensation: None,
            min_net_debt: DEFAULT_MIN_NET_DEBT,
            redemption_fee_floor: DEFAULT_REDEMPTION_FEE_FLOOR,
            borrowing_fee_floor: DEFAULT_BORROWING_FEE_FLOOR,
            max_borrowing_fee: DEFAULT_MAX_BORROWING_FEE,
        }
    }
}

impl EngineConfig {
    /// Parses a JSON configuration. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let config: EngineConfig =
            serde_json::from_str(json).map_err(|e| EngineError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let one = Ratio::new(dec!(1));
        let zero = Ratio::new(dec!(0));
        if self.minimum_collateral_ratio <= one {
            return Err(EngineError::InvalidConfig(format!(
                "minimum collateral ratio {} must be above 1",
                self.minimum_collateral_ratio
            )));
        }
        if self.critical_collateral_ratio < self.minimum_collateral_ratio {
            return Err(EngineError::InvalidConfig(format!(
                "critical collateral ratio {} is below the minimum {}",
                self.critical_collateral_ratio, self.minimum_collateral_ratio
            )));
        }
        if self.gas_compensation_divisor == 0 {
            return Err(EngineError::InvalidConfig(
                "gas compensation divisor must be positive".to_string(),
            ));
        }
        if self.min_net_debt.is_zero() {
            return Err(EngineError::InvalidConfig(
                "minimum net debt must be positive".to_string(),
            ));
        }
        for (name, rate) in [
            ("redemption fee floor", self.redemption_fee_floor),
            ("borrowing fee floor", self.borrowing_fee_floor),
            ("max borrowing fee", self.max_borrowing_fee),
        ] {
            if rate < zero || rate > one {
                return Err(EngineError::InvalidConfig(format!(
                    "{name} {rate} is not within [0, 1]"
                )));
            }
        }
        if self.max_borrowing_fee < self.borrowing_fee_floor {
            return Err(EngineError::InvalidConfig(format!(
                "max borrowing fee {} is below the floor {}",
                self.max_borrowing_fee, self.borrowing_fee_floor
            )));
        }
        Ok(())
    }
}

#[derive(CandidType, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitArg {
    pub config: EngineConfig,
}

/// Collateral and debt held in aggregate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    pub coll: Coll,
    pub debt: Debt,
}

/// Raw amounts a closed position held at the moment it was closed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClosedAmounts {
    pub coll: Coll,
    pub debt: Debt,
    pub redemption_pending_debt: Debt,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    pub config: EngineConfig,

    pub positions: BTreeMap<Principal, Position>,
    /// Owners of active positions; `Position::array_index` points here.
    pub owners: Vec<Principal>,

    pub rewards: RewardAccumulator,
    pub stakes: StakeTracker,

    /// Applied collateral and debt of active positions.
    pub active_pool: Pool,
    /// Redistributed collateral and debt not yet applied to any position.
    pub default_pool: Pool,
    /// Debt parked by redemptions, awaiting scavenge or liquidation.
    pub redeemed_debt: Debt,
    /// Collateral owed to owners of positions closed by a capped liquidation.
    pub collateral_surplus: BTreeMap<Principal, Coll>,

    pub fees: BaseRate,

    #[serde(skip)]
    pending_events: Vec<Event>,
}

impl From<InitArg> for State {
    fn from(args: InitArg) -> Self {
        Self {
            config: args.config,
            positions: BTreeMap::new(),
            owners: vec![],
            rewards: RewardAccumulator::default(),
            stakes: StakeTracker::default(),
            active_pool: Pool::default(),
            default_pool: Pool::default(),
            redeemed_debt: Debt::ZERO,
            collateral_surplus: BTreeMap::new(),
            fees: BaseRate::default(),
            pending_events: vec![],
        }
    }
}

impl State {
    pub fn record_event(&mut self, event: Event) {
        self.pending_events.push(event);
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.pending_events)
    }

    pub fn mcr(&self) -> Wad {
        self.config.minimum_collateral_ratio.to_wad()
    }

    pub fn ccr(&self) -> Wad {
        self.config.critical_collateral_ratio.to_wad()
    }

    pub fn position(&self, owner: &Principal) -> Option<&Position> {
        self.positions.get(owner)
    }

    pub fn position_status(&self, owner: &Principal) -> PositionStatus {
        self.positions
            .get(owner)
            .map(|position| position.status)
            .unwrap_or_default()
    }

    pub fn active_position(&self, owner: &Principal) -> Result<&Position, EngineError> {
        match self.positions.get(owner) {
            Some(position) if position.status.is_active() => Ok(position),
            Some(position) => Err(EngineError::InvalidState(format!(
                "position of {} is {}",
                owner, position.status
            ))),
            None => Err(EngineError::InvalidState(format!(
                "{} has no position",
                owner
            ))),
        }
    }

    pub fn active_position_count(&self) -> usize {
        self.owners.len()
    }

    pub fn pending_collateral_reward(&self, owner: &Principal) -> Coll {
        match self.positions.get(owner) {
            Some(position) if position.status.is_active() => self
                .rewards
                .pending_coll(&position.reward_snapshot, position.stake),
            _ => Coll::ZERO,
        }
    }

    pub fn pending_debt_reward(&self, owner: &Principal) -> Debt {
        match self.positions.get(owner) {
            Some(position) if position.status.is_active() => self
                .rewards
                .pending_debt(&position.reward_snapshot, position.stake),
            _ => Debt::ZERO,
        }
    }

    pub fn has_pending_rewards(&self, owner: &Principal) -> bool {
        match self.positions.get(owner) {
            Some(position) if position.status.is_active() => {
                position.reward_snapshot.l_coll < self.rewards.l_coll
                    || position.reward_snapshot.l_debt < self.rewards.l_debt
            }
            _ => false,
        }
    }

    pub fn get_entire_debt_and_coll(
        &self,
        owner: &Principal,
    ) -> Result<EntireDebtAndColl, EngineError> {
        let position = self.active_position(owner)?;
        Ok(EntireDebtAndColl {
            debt: position.debt,
            coll: position.coll,
            pending_coll: self
                .rewards
                .pending_coll(&position.reward_snapshot, position.stake),
            pending_debt: self
                .rewards
                .pending_debt(&position.reward_snapshot, position.stake),
            redemption_pending_debt: position.redemption_pending_debt,
        })
    }

    pub fn current_icr(&self, owner: &Principal, price: Wad) -> Result<Wad, EngineError> {
        let entire = self.get_entire_debt_and_coll(owner)?;
        Ok(compute_icr(entire.entire_coll(), entire.entire_debt(), price))
    }

    /// Key of the position in the sorted index.
    pub fn nominal_icr(&self, owner: &Principal) -> Wad {
        self.get_entire_debt_and_coll(owner)
            .map(|entire| compute_nominal_icr(entire.entire_coll(), entire.entire_debt()))
            .unwrap_or(Wad::MAX)
    }

    /// Moves the position's pending redistribution rewards from the default
    /// pool into its raw fields. A second call with no accumulator change in
    /// between is a no-op.
    pub fn apply_pending_rewards(&mut self, owner: &Principal) {
        let Some(position) = self.positions.get_mut(owner) else {
            return;
        };
        if !position.status.is_active() {
            return;
        }
        let pending_coll = self
            .rewards
            .pending_coll(&position.reward_snapshot, position.stake);
        let pending_debt = self
            .rewards
            .pending_debt(&position.reward_snapshot, position.stake);
        position.reward_snapshot = self.rewards.snapshot();
        if pending_coll.is_zero() && pending_debt.is_zero() {
            return;
        }
        position.coll += pending_coll;
        position.debt += pending_debt;

        self.default_pool.coll -= pending_coll;
        self.default_pool.debt -= pending_debt;
        self.active_pool.coll += pending_coll;
        self.active_pool.debt += pending_debt;

        log!(
            DEBUG,
            "[apply_pending_rewards] {} received {} collateral and {} debt",
            owner,
            pending_coll,
            pending_debt
        );
    }

    pub fn open_position(
        &mut self,
        owner: Principal,
        coll: Coll,
        debt: Debt,
    ) -> Result<u128, EngineError> {
        if self.position_status(&owner).is_active() {
            return Err(EngineError::InvalidState(format!(
                "position of {} is already active",
                owner
            )));
        }
        let stake = self.stakes.compute_new_stake(coll);
        let position = Position {
            owner,
            debt,
            coll,
            stake,
            status: PositionStatus::Active,
            array_index: self.owners.len() as u64,
            reward_snapshot: self.rewards.snapshot(),
            redemption_pending_debt: Debt::ZERO,
            redeemed_debt_total: Debt::ZERO,
        };
        self.positions.insert(owner, position);
        self.owners.push(owner);
        self.active_pool.coll += coll;
        self.active_pool.debt += debt;
        self.stakes.replace_stake(0, stake);
        self.record_event(Event::TotalStakesUpdated {
            total_stakes: self.stakes.total_stakes,
        });
        Ok(stake)
    }

    /// Removes an active position whose rewards were applied and whose
    /// stake was already removed. Returns the raw amounts it held.
    pub fn close_position(&mut self, owner: &Principal, status: PositionStatus) -> ClosedAmounts {
        assert!(
            !status.is_active() && status != PositionStatus::NonExistent,
            "bug: {:?} is not a closing status",
            status
        );
        let (closed, index) = match self.positions.get_mut(owner) {
            Some(position) if position.status.is_active() => {
                assert_eq!(
                    position.stake, 0,
                    "bug: closing position of {} with a live stake",
                    owner
                );
                let closed = ClosedAmounts {
                    coll: position.coll,
                    debt: position.debt,
                    redemption_pending_debt: position.redemption_pending_debt,
                };
                let index = position.array_index as usize;
                position.coll = Coll::ZERO;
                position.debt = Debt::ZERO;
                position.redemption_pending_debt = Debt::ZERO;
                position.reward_snapshot = Default::default();
                position.array_index = 0;
                position.status = status;
                (closed, index)
            }
            _ => panic!("bug: closing a position of {} that is not active", owner),
        };

        let removed = self.owners.swap_remove(index);
        assert_eq!(removed, *owner, "bug: owner array out of sync");
        if let Some(moved) = self.owners.get(index).copied() {
            if let Some(position) = self.positions.get_mut(&moved) {
                position.array_index = index as u64;
            }
        }

        self.active_pool.coll -= closed.coll;
        self.active_pool.debt -= closed.debt;
        self.redeemed_debt -= closed.redemption_pending_debt;

        if self.owners.is_empty() {
            self.rewards.reset();
            self.stakes.reset_snapshots();
        }

        self.record_event(Event::PositionClosed {
            owner: *owner,
            status,
        });
        closed
    }

    /// Raw fields and the active pool grow together.
    pub fn increase_position(&mut self, owner: &Principal, coll: Coll, debt: Debt) {
        let position = self.active_position_mut(owner);
        position.coll += coll;
        position.debt += debt;
        self.active_pool.coll += coll;
        self.active_pool.debt += debt;
    }

    pub fn decrease_position(&mut self, owner: &Principal, coll: Coll, debt: Debt) {
        let position = self.active_position_mut(owner);
        position.coll -= coll;
        position.debt -= debt;
        self.active_pool.coll -= coll;
        self.active_pool.debt -= debt;
    }

    /// Moves `amount` of applied debt into the position's redemption-pending
    /// share and the system `redeemed_debt` counter.
    pub fn park_redemption_debt(&mut self, owner: &Principal, amount: Debt) {
        let position = self.active_position_mut(owner);
        position.debt -= amount;
        position.redemption_pending_debt += amount;
        self.active_pool.debt -= amount;
        self.redeemed_debt += amount;
    }

    pub fn update_stake(&mut self, owner: &Principal) -> u128 {
        let new_stake = {
            let coll = self.active_position_mut(owner).coll;
            self.stakes.compute_new_stake(coll)
        };
        let position = self.active_position_mut(owner);
        let old_stake = std::mem::replace(&mut position.stake, new_stake);
        self.stakes.replace_stake(old_stake, new_stake);
        self.record_event(Event::TotalStakesUpdated {
            total_stakes: self.stakes.total_stakes,
        });
        new_stake
    }

    pub fn remove_stake(&mut self, owner: &Principal) -> u128 {
        let position = self.active_position_mut(owner);
        let old_stake = std::mem::take(&mut position.stake);
        self.stakes.replace_stake(old_stake, 0);
        self.record_event(Event::TotalStakesUpdated {
            total_stakes: self.stakes.total_stakes,
        });
        old_stake
    }

    /// Spreads a liquidation residual over every remaining stake.
    pub fn redistribute(&mut self, coll: Coll, debt: Debt) {
        if coll.is_zero() && debt.is_zero() {
            return;
        }
        self.rewards
            .distribute(coll, debt, self.stakes.total_stakes);
        self.default_pool.coll += coll;
        self.default_pool.debt += debt;
        self.record_event(Event::Redistribution {
            coll,
            debt,
            l_coll: self.rewards.l_coll,
            l_debt: self.rewards.l_debt,
        });
    }

    pub fn update_system_snapshots(&mut self) {
        let total_collateral = self.entire_system_coll();
        self.stakes.update_snapshots(total_collateral);
        self.record_event(Event::SystemSnapshotsUpdated {
            total_stakes_snapshot: self.stakes.total_stakes_snapshot,
            total_collateral_snapshot: self.stakes.total_collateral_snapshot,
        });
    }

    pub fn add_collateral_surplus(&mut self, owner: Principal, amount: Coll) {
        if amount.is_zero() {
            return;
        }
        *self.collateral_surplus.entry(owner).or_default() += amount;
    }

    pub fn entire_system_coll(&self) -> Coll {
        self.active_pool.coll + self.default_pool.coll
    }

    pub fn entire_system_debt(&self) -> Debt {
        self.active_pool.debt + self.default_pool.debt + self.redeemed_debt
    }

    pub fn get_tcr(&self, price: Wad) -> Wad {
        compute_icr(self.entire_system_coll(), self.entire_system_debt(), price)
    }

    pub fn check_recovery_mode(&self, price: Wad) -> bool {
        self.get_tcr(price) < self.ccr()
    }

    pub fn mode(&self, price: Wad) -> Mode {
        if self.check_recovery_mode(price) {
            Mode::Recovery
        } else {
            Mode::GeneralAvailability
        }
    }

    fn active_position_mut(&mut self, owner: &Principal) -> &mut Position {
        match self.positions.get_mut(owner) {
            Some(position) if position.status.is_active() => position,
            _ => panic!("bug: position of {} is not active", owner),
        }
    }

    pub fn check_invariants(&self) -> Result<(), String> {
        let active: Vec<&Position> = self
            .positions
            .values()
            .filter(|position| position.status.is_active())
            .collect();

        ensure_eq!(
            active.len(),
            self.owners.len(),
            "owner array does not match the active positions"
        );
        for (index, owner) in self.owners.iter().enumerate() {
            let position = self
                .positions
                .get(owner)
                .ok_or_else(|| format!("owner {} has no position", owner))?;
            ensure!(
                position.status.is_active(),
                "owner {} is listed but not active",
                owner
            );
            ensure_eq!(
                position.array_index,
                index as u64,
                "array index of {} is stale",
                owner
            );
        }

        let coll: Coll = active.iter().map(|position| position.coll).sum();
        let debt: Debt = active.iter().map(|position| position.debt).sum();
        let parked: Debt = active
            .iter()
            .map(|position| position.redemption_pending_debt)
            .sum();
        let total_stakes: u128 = active.iter().map(|position| position.stake).sum();
        ensure_eq!(coll, self.active_pool.coll, "active collateral mismatch");
        ensure_eq!(debt, self.active_pool.debt, "active debt mismatch");
        ensure_eq!(parked, self.redeemed_debt, "redeemed debt mismatch");
        ensure_eq!(
            total_stakes,
            self.stakes.total_stakes,
            "total stakes mismatch"
        );

        let pending_coll: Coll = active
            .iter()
            .map(|p| self.rewards.pending_coll(&p.reward_snapshot, p.stake))
            .sum();
        let pending_debt: Debt = active
            .iter()
            .map(|p| self.rewards.pending_debt(&p.reward_snapshot, p.stake))
            .sum();
        ensure!(
            pending_coll <= self.default_pool.coll,
            "pending collateral {} exceeds the default pool {}",
            pending_coll,
            self.default_pool.coll
        );
        ensure!(
            pending_debt <= self.default_pool.debt,
            "pending debt {} exceeds the default pool {}",
            pending_debt,
            self.default_pool.debt
        );

        for position in self.positions.values() {
            if !position.status.is_active() {
                ensure!(
                    position.coll.is_zero()
                        && position.debt.is_zero()
                        && position.stake == 0
                        && position.redemption_pending_debt.is_zero(),
                    "closed position of {} still holds funds",
                    position.owner
                );
            }
        }

        Ok(())
    }
}
