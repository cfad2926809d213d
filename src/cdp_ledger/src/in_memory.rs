//! Reference implementations of the collaborators, used by the tests and
//! by embeddings that keep everything in one process.

use crate::collaborators::{
    AbsorptionPool, Clock, CollateralSink, DebtToken, FeeSink, PriceFeed, SortedPositions,
};
use crate::numeric::{Coll, Debt, Wad};
use candid::Principal;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound::{Excluded, Unbounded};

/// Positions ordered by `(nominal ICR, owner)`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SortedIndex {
    keys: BTreeMap<Principal, Wad>,
    order: BTreeSet<(Wad, Principal)>,
}

impl SortedIndex {
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn contains(&self, owner: &Principal) -> bool {
        self.keys.contains_key(owner)
    }

    /// Owners from the lowest nominal ICR to the highest.
    pub fn iter(&self) -> impl Iterator<Item = Principal> + '_ {
        self.order.iter().map(|(_, owner)| *owner)
    }

    fn insert(&mut self, owner: Principal, key: Wad) {
        if let Some(previous) = self.keys.insert(owner, key) {
            self.order.remove(&(previous, owner));
        }
        self.order.insert((key, owner));
    }

    fn remove(&mut self, owner: &Principal) {
        if let Some(key) = self.keys.remove(owner) {
            self.order.remove(&(key, *owner));
        }
    }

    fn first(&self) -> Option<Principal> {
        self.order.iter().next().map(|(_, owner)| *owner)
    }

    fn after(&self, owner: &Principal) -> Option<Principal> {
        let key = self.keys.get(owner)?;
        self.order
            .range((Excluded((*key, *owner)), Unbounded))
            .next()
            .map(|(_, next)| *next)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InMemoryToken {
    balances: BTreeMap<Principal, Debt>,
    pub total_minted: Debt,
    pub total_burned: Debt,
}

impl InMemoryToken {
    pub fn total_supply(&self) -> Debt {
        self.total_minted - self.total_burned
    }

    fn debit(&mut self, from: &Principal, amount: Debt) {
        let balance = self.balances.get(from).copied().unwrap_or_default();
        let remaining = balance.checked_sub(amount).unwrap_or_else(|| {
            panic!(
                "bug: {} holds {} debt tokens, cannot debit {}",
                from, balance, amount
            )
        });
        self.balances.insert(*from, remaining);
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InMemoryPool {
    pub deposits: Debt,
    pub debt_absorbed: Debt,
    pub collateral_gains: Coll,
    pub reward_events: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InMemoryEnvironment {
    pub price: Wad,
    pub now_nanos: u64,
    pub index: SortedIndex,
    pub token: InMemoryToken,
    pub pool: InMemoryPool,
    pub collateral_fees: Coll,
    pub debt_fees: Debt,
    pub collateral_sent: BTreeMap<Principal, Coll>,
    pool_account: Principal,
    fee_account: Principal,
}

impl InMemoryEnvironment {
    pub fn new(price: Wad) -> Self {
        Self {
            price,
            now_nanos: 0,
            index: SortedIndex::default(),
            token: InMemoryToken::default(),
            pool: InMemoryPool::default(),
            collateral_fees: Coll::ZERO,
            debt_fees: Debt::ZERO,
            collateral_sent: BTreeMap::new(),
            pool_account: Principal::from_slice(&[0xfe, 0x01]),
            fee_account: Principal::from_slice(&[0xfe, 0x02]),
        }
    }

    pub fn set_price(&mut self, price: Wad) {
        self.price = price;
    }

    pub fn advance_time(&mut self, nanos: u64) {
        self.now_nanos += nanos;
    }

    /// Moves `amount` of `from`'s debt tokens into the absorption pool.
    pub fn deposit_to_pool(&mut self, from: &Principal, amount: Debt) {
        let pool_account = self.pool_account;
        self.transfer(from, &pool_account, amount);
        self.pool.deposits += amount;
    }

    pub fn collateral_sent_to(&self, to: &Principal) -> Coll {
        self.collateral_sent.get(to).copied().unwrap_or_default()
    }

    /// Collateral that left through the sink or the fee path.
    pub fn total_collateral_out(&self) -> Coll {
        self.collateral_sent.values().copied().sum::<Coll>() + self.collateral_fees
    }
}

impl PriceFeed for InMemoryEnvironment {
    fn current_price(&self) -> Wad {
        self.price
    }
}

impl SortedPositions for InMemoryEnvironment {
    fn insert_position(&mut self, owner: Principal, nominal_icr: Wad) {
        self.index.insert(owner, nominal_icr);
    }

    fn reinsert_position(&mut self, owner: Principal, nominal_icr: Wad) {
        self.index.insert(owner, nominal_icr);
    }

    fn remove_position(&mut self, owner: &Principal) {
        self.index.remove(owner);
    }

    fn worst_position(&self) -> Option<Principal> {
        self.index.first()
    }

    fn next_position(&self, owner: &Principal) -> Option<Principal> {
        self.index.after(owner)
    }
}

impl DebtToken for InMemoryEnvironment {
    fn mint(&mut self, to: &Principal, amount: Debt) {
        *self.token.balances.entry(*to).or_default() += amount;
        self.token.total_minted += amount;
    }

    fn burn(&mut self, from: &Principal, amount: Debt) {
        self.token.debit(from, amount);
        self.token.total_burned += amount;
    }

    fn balance_of(&self, owner: &Principal) -> Debt {
        self.token.balances.get(owner).copied().unwrap_or_default()
    }

    fn transfer(&mut self, from: &Principal, to: &Principal, amount: Debt) {
        self.token.debit(from, amount);
        *self.token.balances.entry(*to).or_default() += amount;
    }
}

impl AbsorptionPool for InMemoryEnvironment {
    fn available_deposits(&self) -> Debt {
        self.pool.deposits
    }

    fn offset(&mut self, debt: Debt, coll: Coll) -> Debt {
        let absorbed = debt.min(self.pool.deposits);
        if absorbed.is_zero() {
            return Debt::ZERO;
        }
        let coll_gain = if absorbed == debt {
            coll
        } else {
            coll.mul_div(absorbed.to_u128(), debt.to_u128())
        };
        self.pool.deposits -= absorbed;
        self.pool.debt_absorbed += absorbed;
        self.pool.collateral_gains += coll_gain;
        absorbed
    }

    fn on_reward_event(&mut self) {
        self.pool.reward_events += 1;
    }

    fn pool_account(&self) -> Principal {
        self.pool_account
    }
}

impl FeeSink for InMemoryEnvironment {
    fn receive_collateral_fee(&mut self, amount: Coll) {
        self.collateral_fees += amount;
    }

    fn receive_debt_fee(&mut self, amount: Debt) {
        self.debt_fees += amount;
    }

    fn fee_account(&self) -> Principal {
        self.fee_account
    }
}

impl CollateralSink for InMemoryEnvironment {
    fn send_collateral(&mut self, to: &Principal, amount: Coll) {
        if amount.is_zero() {
            return;
        }
        *self.collateral_sent.entry(*to).or_default() += amount;
    }
}

impl Clock for InMemoryEnvironment {
    fn now_nanos(&self) -> u64 {
        self.now_nanos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner(n: u8) -> Principal {
        Principal::from_slice(&[n])
    }

    #[test]
    fn index_walks_from_worst_to_best() {
        let mut env = InMemoryEnvironment::new(Wad::ONE);
        env.insert_position(owner(1), Wad::from_units(3));
        env.insert_position(owner(2), Wad::from_units(1));
        env.insert_position(owner(3), Wad::from_units(2));
        assert_eq!(env.worst_position(), Some(owner(2)));
        assert_eq!(env.next_position(&owner(2)), Some(owner(3)));
        assert_eq!(env.next_position(&owner(1)), None);

        env.reinsert_position(owner(1), Wad::ZERO);
        assert_eq!(env.worst_position(), Some(owner(1)));
        env.remove_position(&owner(1));
        assert_eq!(env.index.iter().collect::<Vec<_>>(), vec![owner(2), owner(3)]);
        assert_eq!(env.next_position(&owner(1)), None);
    }

    #[test]
    fn token_tracks_supply() {
        let mut env = InMemoryEnvironment::new(Wad::ONE);
        env.mint(&owner(1), Debt::from_units(10));
        env.transfer(&owner(1), &owner(2), Debt::from_units(4));
        env.burn(&owner(2), Debt::from_units(1));
        assert_eq!(env.balance_of(&owner(1)), Debt::from_units(6));
        assert_eq!(env.balance_of(&owner(2)), Debt::from_units(3));
        assert_eq!(env.token.total_supply(), Debt::from_units(9));
    }

    #[test]
    #[should_panic(expected = "cannot debit")]
    fn burning_more_than_the_balance_is_a_bug() {
        let mut env = InMemoryEnvironment::new(Wad::ONE);
        env.burn(&owner(1), Debt::new(1));
    }

    #[test]
    fn pool_absorbs_up_to_its_deposits() {
        let mut env = InMemoryEnvironment::new(Wad::ONE);
        env.mint(&owner(1), Debt::from_units(50));
        env.deposit_to_pool(&owner(1), Debt::from_units(50));
        let absorbed = env.offset(Debt::from_units(100), Coll::from_units(2));
        assert_eq!(absorbed, Debt::from_units(50));
        assert_eq!(env.pool.collateral_gains, Coll::from_units(1));
        assert_eq!(env.available_deposits(), Debt::ZERO);
        assert_eq!(env.balance_of(&env.pool_account()), Debt::from_units(50));
    }
}
