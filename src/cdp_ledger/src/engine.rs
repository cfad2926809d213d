use crate::borrower::{self, AdjustArg, BorrowOutcome, CloseOutcome};
use crate::collaborators::Environment;
use crate::event::Event;
use crate::fees::redemption_rate;
use crate::liquidation::{self, LiquidationTotals};
use crate::logs::INFO;
use crate::numeric::{Coll, Debt, Wad};
use crate::position::{EntireDebtAndColl, PositionStatus};
use crate::redemption::{self, RedemptionOutcome, ScavengeOutcome};
use crate::state::{InitArg, State};
use crate::storage::{self, StorageError};
use crate::{EngineError, Fees, SystemStatus};
use candid::Principal;
use ic_canister_log::log;

/// Owns the ledger state and the collaborators it drives. Every mutating
/// operation takes `&mut self`; share an engine across threads behind one
/// `Mutex`.
pub struct CdpEngine<E: Environment> {
    state: State,
    env: E,
}

impl<E: Environment> CdpEngine<E> {
    pub fn new(args: InitArg, env: E) -> Result<Self, EngineError> {
        args.config.validate()?;
        log!(
            INFO,
            "[init] minimum collateral ratio {}, critical collateral ratio {}",
            args.config.minimum_collateral_ratio,
            args.config.critical_collateral_ratio
        );
        Ok(Self {
            state: State::from(args),
            env,
        })
    }

    /// Rebuilds an engine from bytes produced by [`CdpEngine::snapshot`].
    pub fn restore(bytes: &[u8], env: E) -> Result<Self, StorageError> {
        let state = storage::decode_state(bytes)?;
        log!(
            INFO,
            "[restore] restored {} active positions",
            state.active_position_count()
        );
        Ok(Self { state, env })
    }

    pub fn snapshot(&self) -> Result<Vec<u8>, StorageError> {
        storage::encode_state(&self.state)
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn env(&self) -> &E {
        &self.env
    }

    pub fn env_mut(&mut self) -> &mut E {
        &mut self.env
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        self.state.take_events()
    }

    pub fn open_position(
        &mut self,
        owner: Principal,
        coll: Coll,
        debt: Debt,
        max_fee_percentage: Wad,
    ) -> Result<BorrowOutcome, EngineError> {
        borrower::open_position(
            &mut self.state,
            &mut self.env,
            owner,
            coll,
            debt,
            max_fee_percentage,
        )
    }

    pub fn adjust_position(
        &mut self,
        owner: Principal,
        arg: AdjustArg,
    ) -> Result<BorrowOutcome, EngineError> {
        borrower::adjust_position(&mut self.state, &mut self.env, owner, arg)
    }

    pub fn close_position(&mut self, owner: Principal) -> Result<CloseOutcome, EngineError> {
        borrower::close_position(&mut self.state, &mut self.env, owner)
    }

    pub fn claim_collateral_surplus(&mut self, owner: Principal) -> Result<Coll, EngineError> {
        borrower::claim_collateral_surplus(&mut self.state, &mut self.env, owner)
    }

    pub fn liquidate(
        &mut self,
        liquidator: Principal,
        owner: Principal,
    ) -> Result<LiquidationTotals, EngineError> {
        liquidation::batch_liquidate(&mut self.state, &mut self.env, liquidator, &[owner])
    }

    pub fn batch_liquidate(
        &mut self,
        liquidator: Principal,
        owners: &[Principal],
    ) -> Result<LiquidationTotals, EngineError> {
        liquidation::batch_liquidate(&mut self.state, &mut self.env, liquidator, owners)
    }

    pub fn liquidate_worst(
        &mut self,
        liquidator: Principal,
        max_positions: usize,
    ) -> Result<LiquidationTotals, EngineError> {
        liquidation::liquidate_worst(&mut self.state, &mut self.env, liquidator, max_positions)
    }

    pub fn redeem(
        &mut self,
        redeemer: Principal,
        amount: Debt,
        max_fee_percentage: Wad,
        max_iterations: Option<usize>,
    ) -> Result<RedemptionOutcome, EngineError> {
        redemption::redeem(
            &mut self.state,
            &mut self.env,
            redeemer,
            amount,
            max_fee_percentage,
            max_iterations,
        )
    }

    pub fn scavenge(
        &mut self,
        caller: Principal,
        owner: Principal,
    ) -> Result<ScavengeOutcome, EngineError> {
        redemption::scavenge(&mut self.state, &mut self.env, caller, owner)
    }

    /// Applies the position's pending rewards and refreshes its index key.
    pub fn apply_pending_rewards(&mut self, owner: Principal) -> Result<(), EngineError> {
        self.state.active_position(&owner)?;
        self.state.apply_pending_rewards(&owner);
        self.env
            .reinsert_position(owner, self.state.nominal_icr(&owner));
        Ok(())
    }

    pub fn get_entire_debt_and_coll(
        &self,
        owner: &Principal,
    ) -> Result<EntireDebtAndColl, EngineError> {
        self.state.get_entire_debt_and_coll(owner)
    }

    pub fn position_status(&self, owner: &Principal) -> PositionStatus {
        self.state.position_status(owner)
    }

    pub fn pending_collateral_reward(&self, owner: &Principal) -> Coll {
        self.state.pending_collateral_reward(owner)
    }

    pub fn pending_debt_reward(&self, owner: &Principal) -> Debt {
        self.state.pending_debt_reward(owner)
    }

    pub fn current_icr(&self, owner: &Principal) -> Result<Wad, EngineError> {
        self.state.current_icr(owner, self.env.current_price())
    }

    pub fn get_tcr(&self) -> Wad {
        self.state.get_tcr(self.env.current_price())
    }

    pub fn check_recovery_mode(&self) -> bool {
        self.state.check_recovery_mode(self.env.current_price())
    }

    pub fn get_fees(&self) -> Fees {
        let now = self.env.now_nanos();
        let config = &self.state.config;
        let borrowing_rate = if self.check_recovery_mode() {
            Wad::ZERO
        } else {
            self.state.fees.borrowing_rate(
                now,
                config.borrowing_fee_floor.to_wad(),
                config.max_borrowing_fee.to_wad(),
            )
        };
        Fees {
            borrowing_rate,
            redemption_rate: redemption_rate(
                self.state.fees.decayed_base_rate(now),
                config.redemption_fee_floor.to_wad(),
            ),
        }
    }

    pub fn get_status(&self) -> SystemStatus {
        let price = self.env.current_price();
        SystemStatus {
            price,
            total_collateral: self.state.entire_system_coll(),
            total_debt: self.state.entire_system_debt(),
            total_collateral_ratio: self.state.get_tcr(price),
            mode: self.state.mode(price),
            active_positions: self.state.active_position_count() as u64,
            total_stakes: self.state.stakes.total_stakes,
            l_coll: self.state.rewards.l_coll,
            l_debt: self.state.rewards.l_debt,
            redeemed_debt: self.state.redeemed_debt,
            base_rate: self.state.fees.decayed_base_rate(self.env.now_nanos()),
        }
    }
}
