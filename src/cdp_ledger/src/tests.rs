use crate::borrower::AdjustArg;
use crate::collaborators::DebtToken;
use crate::in_memory::InMemoryEnvironment;
use crate::numeric::{Coll, Debt, Wad, DECIMAL_PRECISION, NICR_PRECISION};
use crate::redemption::RedemptionOutcome;
use crate::rewards::RewardAccumulator;
use crate::state::InitArg;
use crate::CdpEngine;
use candid::Principal;
use proptest::collection::vec as pvec;
use proptest::prelude::*;
use std::collections::BTreeMap;

const OWNERS: u8 = 6;
const MINUTE_NANOS: u64 = 60 * crate::SEC_NANOS;

#[derive(Clone, Debug)]
enum Op {
    Open { owner: u8, coll: u128, icr_percent: u128 },
    Deposit { owner: u8, coll: u128 },
    Withdraw { owner: u8, coll: u128 },
    Draw { owner: u8, debt: u128 },
    Repay { owner: u8, debt: u128 },
    SetPrice { price_units: u64 },
    Liquidate { owner: u8 },
    LiquidateWorst { n: usize },
    Redeem { redeemer: u8, debt: u128 },
    Scavenge { caller: u8, owner: u8 },
    Close { owner: u8 },
    PoolDeposit { owner: u8, debt: u128 },
    ClaimSurplus { owner: u8 },
    AdvanceTime { minutes: u64 },
}

fn arb_owner() -> impl Strategy<Value = u8> {
    0..OWNERS
}

fn arb_coll() -> impl Strategy<Value = u128> {
    DECIMAL_PRECISION / 10..50 * DECIMAL_PRECISION
}

fn arb_debt() -> impl Strategy<Value = u128> {
    DECIMAL_PRECISION..3_000 * DECIMAL_PRECISION
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (arb_owner(), arb_coll(), 112..400u128)
            .prop_map(|(owner, coll, icr_percent)| Op::Open { owner, coll, icr_percent }),
        1 => (arb_owner(), arb_coll()).prop_map(|(owner, coll)| Op::Deposit { owner, coll }),
        1 => (arb_owner(), arb_coll()).prop_map(|(owner, coll)| Op::Withdraw { owner, coll }),
        1 => (arb_owner(), arb_debt()).prop_map(|(owner, debt)| Op::Draw { owner, debt }),
        1 => (arb_owner(), arb_debt()).prop_map(|(owner, debt)| Op::Repay { owner, debt }),
        2 => (100..300u64).prop_map(|price_units| Op::SetPrice { price_units }),
        2 => arb_owner().prop_map(|owner| Op::Liquidate { owner }),
        1 => (1..4usize).prop_map(|n| Op::LiquidateWorst { n }),
        2 => (arb_owner(), arb_debt()).prop_map(|(redeemer, debt)| Op::Redeem { redeemer, debt }),
        1 => (arb_owner(), arb_owner()).prop_map(|(caller, owner)| Op::Scavenge { caller, owner }),
        1 => arb_owner().prop_map(|owner| Op::Close { owner }),
        1 => (arb_owner(), arb_debt()).prop_map(|(owner, debt)| Op::PoolDeposit { owner, debt }),
        1 => arb_owner().prop_map(|owner| Op::ClaimSurplus { owner }),
        1 => (0..2_000u64).prop_map(|minutes| Op::AdvanceTime { minutes }),
    ]
}

fn principal(n: u8) -> Principal {
    Principal::from_slice(&[0x10, n])
}

fn new_engine() -> CdpEngine<InMemoryEnvironment> {
    CdpEngine::new(
        InitArg::default(),
        InMemoryEnvironment::new(Wad::from_units(200)),
    )
    .unwrap()
}

/// Runs `op` and returns the collateral it brought into the ledger.
fn apply(engine: &mut CdpEngine<InMemoryEnvironment>, op: &Op) -> Coll {
    let before = (engine.state().clone(), engine.env().clone());
    let liquidator = principal(OWNERS);
    let (result, deposited) = match *op {
        Op::Open {
            owner,
            coll,
            icr_percent,
        } => {
            let coll = Coll::new(coll);
            let debt = coll
                .value_at(engine.env().price)
                .mul_div(100, icr_percent);
            let result = engine
                .open_position(principal(owner), coll, debt, Wad::ONE)
                .map(|_| ());
            (result, coll)
        }
        Op::Deposit { owner, coll } => {
            let arg = AdjustArg {
                coll_deposit: Coll::new(coll),
                ..Default::default()
            };
            let result = engine.adjust_position(principal(owner), arg).map(|_| ());
            (result, Coll::new(coll))
        }
        Op::Withdraw { owner, coll } => {
            let arg = AdjustArg {
                coll_withdrawal: Coll::new(coll),
                ..Default::default()
            };
            (engine.adjust_position(principal(owner), arg).map(|_| ()), Coll::ZERO)
        }
        Op::Draw { owner, debt } => {
            let arg = AdjustArg {
                debt_draw: Debt::new(debt),
                max_fee_percentage: Wad::ONE,
                ..Default::default()
            };
            (engine.adjust_position(principal(owner), arg).map(|_| ()), Coll::ZERO)
        }
        Op::Repay { owner, debt } => {
            let arg = AdjustArg {
                debt_repayment: Debt::new(debt),
                ..Default::default()
            };
            (engine.adjust_position(principal(owner), arg).map(|_| ()), Coll::ZERO)
        }
        Op::SetPrice { price_units } => {
            engine.env_mut().set_price(Wad::from_units(price_units));
            return Coll::ZERO;
        }
        Op::Liquidate { owner } => (
            engine.liquidate(liquidator, principal(owner)).map(|_| ()),
            Coll::ZERO,
        ),
        Op::LiquidateWorst { n } => (engine.liquidate_worst(liquidator, n).map(|_| ()), Coll::ZERO),
        Op::Redeem { redeemer, debt } => {
            let redeemer = principal(redeemer);
            let amount = Debt::new(debt).min(engine.env().balance_of(&redeemer));
            let price = engine.env().price;
            let eligible = redeemable_icrs(engine, price);
            let result = engine.redeem(redeemer, amount, Wad::ONE, None);
            if let Ok(outcome) = &result {
                check_redemption_order(&eligible, price, outcome);
            }
            (result.map(|_| ()), Coll::ZERO)
        }
        Op::Scavenge { caller, owner } => (
            engine.scavenge(principal(caller), principal(owner)).map(|_| ()),
            Coll::ZERO,
        ),
        Op::Close { owner } => (engine.close_position(principal(owner)).map(|_| ()), Coll::ZERO),
        Op::PoolDeposit { owner, debt } => {
            let owner = principal(owner);
            let amount = Debt::new(debt).min(engine.env().balance_of(&owner));
            engine.env_mut().deposit_to_pool(&owner, amount);
            return Coll::ZERO;
        }
        Op::ClaimSurplus { owner } => (
            engine.claim_collateral_surplus(principal(owner)).map(|_| ()),
            Coll::ZERO,
        ),
        Op::AdvanceTime { minutes } => {
            engine.env_mut().advance_time(minutes * MINUTE_NANOS);
            return Coll::ZERO;
        }
    };

    match result {
        Ok(()) => deposited,
        Err(_) => {
            assert_eq!(engine.state(), &before.0, "failed {:?} changed the state", op);
            assert_eq!(engine.env(), &before.1, "failed {:?} touched collaborators", op);
            Coll::ZERO
        }
    }
}

/// ICR of every position a redemption may draw from at `price`.
fn redeemable_icrs(engine: &CdpEngine<InMemoryEnvironment>, price: Wad) -> BTreeMap<Principal, Wad> {
    let state = engine.state();
    state
        .owners
        .iter()
        .filter_map(|owner| {
            let entire = state.get_entire_debt_and_coll(owner).ok()?;
            let icr = state.current_icr(owner, price).ok()?;
            (icr >= state.mcr() && !entire.redeemable_debt().is_zero()).then_some((*owner, icr))
        })
        .collect()
}

/// A redemption visits positions in non-decreasing ICR and leaves no
/// cheaper eligible position untouched. Index keys are nominal ratios with
/// 1e20 precision, so two equal keys may hide an ICR gap of `price / 1e20`.
fn check_redemption_order(
    eligible: &BTreeMap<Principal, Wad>,
    price: Wad,
    outcome: &RedemptionOutcome,
) {
    let slack = Wad::new(price.to_u128() / NICR_PRECISION + 1);
    let visited: Vec<Wad> = outcome
        .positions
        .iter()
        .map(|step| {
            *eligible
                .get(&step.owner)
                .unwrap_or_else(|| panic!("redeemed from ineligible {}", step.owner))
        })
        .collect();
    for pair in visited.windows(2) {
        assert!(
            pair[0] <= pair[1] + slack,
            "redeemed ICR {} before {}",
            pair[0],
            pair[1]
        );
    }
    let Some(highest) = visited.iter().max().copied() else {
        return;
    };
    for (owner, icr) in eligible {
        if outcome.positions.iter().all(|step| step.owner != *owner) {
            assert!(
                *icr + slack >= highest,
                "skipped {} at ICR {} while redeeming at {}",
                owner,
                icr,
                highest
            );
        }
    }
}

fn check_conservation(engine: &CdpEngine<InMemoryEnvironment>, deposited: Coll) {
    let state = engine.state();
    let env = engine.env();
    assert_eq!(state.check_invariants(), Ok(()));

    // Every debt token in circulation is backed by tracked debt.
    assert_eq!(state.entire_system_debt(), env.token.total_supply());

    let entire_debt: Debt = state
        .owners
        .iter()
        .map(|owner| state.get_entire_debt_and_coll(owner).unwrap().entire_debt())
        .sum();
    assert!(entire_debt <= state.entire_system_debt());

    let surplus: Coll = state.collateral_surplus.values().copied().sum();
    assert_eq!(
        deposited,
        state.entire_system_coll() + surplus + env.total_collateral_out()
    );

    assert_eq!(env.index.len(), state.owners.len());
    for owner in &state.owners {
        assert!(env.index.contains(owner), "{} missing from the index", owner);
    }

    // The index order follows the live nominal ratios.
    let keys: Vec<Wad> = env.index.iter().map(|owner| state.nominal_icr(&owner)).collect();
    assert!(
        keys.windows(2).all(|pair| pair[0] <= pair[1]),
        "index out of order: {:?}",
        keys
    );
}

proptest! {
    #[test]
    fn test_conservation_over_random_operations(ops in pvec(arb_op(), 1..60)) {
        let mut engine = new_engine();
        let mut deposited = Coll::ZERO;
        for op in &ops {
            deposited += apply(&mut engine, op);
            check_conservation(&engine, deposited);
        }
    }

    #[test]
    fn test_redistribution_loses_at_most_dust(
        stakes in pvec(1..100 * DECIMAL_PRECISION, 1..10),
        amounts in pvec(0..1_000 * DECIMAL_PRECISION, 1..5),
    ) {
        let mut acc = RewardAccumulator::default();
        let snapshot = acc.snapshot();
        let total_stakes: u128 = stakes.iter().sum();
        for amount in &amounts {
            acc.distribute(Coll::new(*amount), Debt::new(*amount), total_stakes);
        }
        let distributed: u128 = amounts.iter().sum();
        let handed_out: u128 = stakes
            .iter()
            .map(|stake| acc.pending_coll(&snapshot, *stake).to_u128())
            .sum();
        let dust_bound = stakes.len() as u128 + total_stakes / DECIMAL_PRECISION + 1;
        assert!(handed_out <= distributed);
        assert!(distributed - handed_out <= dust_bound, "lost {} wei", distributed - handed_out);
    }

    #[test]
    fn test_apply_pending_rewards_is_idempotent(
        colls in pvec(1..50 * DECIMAL_PRECISION, 2..6),
        redistributed in 1..10 * DECIMAL_PRECISION,
    ) {
        let mut state = crate::state::State::from(InitArg::default());
        for (n, coll) in colls.iter().enumerate() {
            state
                .open_position(principal(n as u8), Coll::new(*coll), Debt::from_units(1_000))
                .unwrap();
        }
        state.redistribute(Coll::new(redistributed), Debt::new(redistributed));
        let owner = principal(0);
        state.apply_pending_rewards(&owner);
        let once = state.clone();
        state.apply_pending_rewards(&owner);
        assert_eq!(state, once);
        assert_eq!(state.check_invariants(), Ok(()));
    }
}
