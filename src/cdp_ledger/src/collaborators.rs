//! Interfaces of the systems the ledger drives but does not own.
//!
//! Every mutating call here is infallible: the ledger validates balances
//! and amounts before the first mutation of an operation, so an
//! implementation that cannot honour a call has hit a bug.

use crate::numeric::{Coll, Debt, Wad};
use candid::Principal;

pub trait PriceFeed {
    /// Debt-token value of one whole unit of collateral, 1e18 scaled.
    fn current_price(&self) -> Wad;
}

/// Active positions ordered by nominal collateral ratio, lowest first.
pub trait SortedPositions {
    fn insert_position(&mut self, owner: Principal, nominal_icr: Wad);
    fn reinsert_position(&mut self, owner: Principal, nominal_icr: Wad);
    fn remove_position(&mut self, owner: &Principal);
    fn worst_position(&self) -> Option<Principal>;
    /// The next better-collateralized position after `owner`.
    fn next_position(&self, owner: &Principal) -> Option<Principal>;
}

pub trait DebtToken {
    fn mint(&mut self, to: &Principal, amount: Debt);
    fn burn(&mut self, from: &Principal, amount: Debt);
    fn balance_of(&self, owner: &Principal) -> Debt;
    fn transfer(&mut self, from: &Principal, to: &Principal, amount: Debt);
}

/// Pooled deposits that absorb liquidated debt in exchange for collateral.
pub trait AbsorptionPool {
    fn available_deposits(&self) -> Debt;
    /// Offers `debt` together with `coll`; returns the debt actually absorbed.
    fn offset(&mut self, debt: Debt, coll: Coll) -> Debt;
    /// Called after every liquidation that found deposits in the pool.
    fn on_reward_event(&mut self);
    /// Account holding the pool's debt tokens; absorbed debt is burned from it.
    fn pool_account(&self) -> Principal;
}

pub trait FeeSink {
    fn receive_collateral_fee(&mut self, amount: Coll);
    fn receive_debt_fee(&mut self, amount: Debt);
    /// Account borrowing fees are minted to.
    fn fee_account(&self) -> Principal;
}

/// Collateral leaving the ledger.
pub trait CollateralSink {
    fn send_collateral(&mut self, to: &Principal, amount: Coll);
}

pub trait Clock {
    fn now_nanos(&self) -> u64;
}

/// Everything an engine needs, injected at construction.
pub trait Environment:
    PriceFeed + SortedPositions + DebtToken + AbsorptionPool + FeeSink + CollateralSink + Clock
{
}

impl<T> Environment for T where
    T: PriceFeed + SortedPositions + DebtToken + AbsorptionPool + FeeSink + CollateralSink + Clock
{
}
