use crate::collaborators::Environment;
use crate::event::Event;
use crate::logs::{DEBUG, INFO};
use crate::numeric::{Coll, Debt, Wad};
use crate::position::PositionStatus;
use crate::state::{EngineConfig, State};
use crate::{compute_icr, EngineError};
use candid::Principal;
use ic_canister_log::log;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiquidationKind {
    /// ICR below the minimum collateral ratio.
    BelowMinimum,
    /// Recovery mode and MCR <= ICR < TCR. The collateral taken is capped
    /// at `debt * MCR / price`; the rest is left for the owner to claim.
    Recovery,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidationTotals {
    pub liquidated: Vec<Principal>,
    pub debt: Debt,
    pub coll: Coll,
    pub gas_compensation: Coll,
    pub offset_debt: Debt,
    pub offset_coll: Coll,
    pub redistributed_debt: Debt,
    pub redistributed_coll: Coll,
    pub collateral_surplus: Coll,
}

/// Collateral paid to the liquidator: `coll / divisor`, at least one wei,
/// never more than the configured cap or the collateral itself.
pub fn gas_compensation(coll: Coll, config: &EngineConfig) -> Coll {
    if coll.is_zero() {
        return Coll::ZERO;
    }
    let mut compensation =
        Coll::new(coll.to_u128() / config.gas_compensation_divisor).max(Coll::new(1));
    if let Some(cap) = config.max_gas_compensation {
        compensation = compensation.min(cap);
    }
    compensation.min(coll)
}

/// Whether `owner` can be liquidated right now. Recovery mode is derived
/// from the current state, so a batch re-evaluates it before every position.
pub fn liquidation_kind(state: &State, owner: &Principal, price: Wad) -> Option<LiquidationKind> {
    let position = state.position(owner)?;
    if !position.status.is_active() {
        return None;
    }
    let entire = state.get_entire_debt_and_coll(owner).ok()?;
    let debt = entire.entire_debt();
    if debt.is_zero() {
        return None;
    }
    // The residual must have someone to be redistributed to.
    if state.stakes.total_stakes <= position.stake {
        return None;
    }

    let icr = compute_icr(entire.entire_coll(), debt, price);
    if icr < state.mcr() {
        return Some(LiquidationKind::BelowMinimum);
    }
    let tcr = state.get_tcr(price);
    if tcr < state.ccr() && icr < tcr {
        return Some(LiquidationKind::Recovery);
    }
    None
}

/// A redistribution moves the entire ratio of every position that holds a
/// stake, including the ones nobody touched. Their index keys are refreshed
/// so that `worst_position` and `next_position` follow the live ratios.
fn rekey_positions<E: Environment>(state: &State, env: &mut E) {
    for owner in &state.owners {
        env.reinsert_position(*owner, state.nominal_icr(owner));
    }
    log!(
        DEBUG,
        "[rekey_positions] refreshed {} index keys after a redistribution",
        state.owners.len()
    );
}

fn liquidate_position<E: Environment>(
    state: &mut State,
    env: &mut E,
    liquidator: &Principal,
    owner: &Principal,
    price: Wad,
    kind: LiquidationKind,
    totals: &mut LiquidationTotals,
) {
    state.apply_pending_rewards(owner);
    state.remove_stake(owner);
    let closed = state.close_position(owner, PositionStatus::ClosedByLiquidation);
    let debt = closed.debt + closed.redemption_pending_debt;
    let mut coll = closed.coll;

    let mut surplus = Coll::ZERO;
    if kind == LiquidationKind::Recovery {
        let capped = debt.mul_wad(state.mcr()).to_coll(price);
        if coll > capped {
            surplus = coll - capped;
            coll = capped;
            state.add_collateral_surplus(*owner, surplus);
        }
    }

    let gas = gas_compensation(coll, &state.config);
    let net_coll = coll - gas;

    let pool_account = env.pool_account();
    let deposits = env
        .available_deposits()
        .min(env.balance_of(&pool_account));
    let debt_to_offset = debt.min(deposits);
    let (offset_debt, offset_coll) = if debt_to_offset.is_zero() {
        (Debt::ZERO, Coll::ZERO)
    } else {
        let coll_to_offset = net_coll.mul_div(debt_to_offset.to_u128(), debt.to_u128());
        let absorbed = env.offset(debt_to_offset, coll_to_offset).min(debt_to_offset);
        let coll_absorbed = if absorbed == debt_to_offset {
            coll_to_offset
        } else {
            coll_to_offset.mul_div(absorbed.to_u128(), debt_to_offset.to_u128())
        };
        if !absorbed.is_zero() {
            env.burn(&pool_account, absorbed);
            env.send_collateral(&pool_account, coll_absorbed);
        }
        (absorbed, coll_absorbed)
    };

    let redistributed_debt = debt - offset_debt;
    let redistributed_coll = net_coll - offset_coll;
    state.redistribute(redistributed_coll, redistributed_debt);
    state.update_system_snapshots();

    if !deposits.is_zero() {
        env.on_reward_event();
    }
    env.send_collateral(liquidator, gas);
    env.remove_position(owner);
    if !redistributed_debt.is_zero() || !redistributed_coll.is_zero() {
        rekey_positions(state, env);
    }

    log!(
        INFO,
        "[liquidate_position] liquidated position of {} ({:?}): debt {}, collateral {}, offset {}, redistributed {}, gas compensation {}",
        owner,
        kind,
        debt,
        coll,
        offset_debt,
        redistributed_debt,
        gas
    );

    state.record_event(Event::LiquidatePosition {
        owner: *owner,
        liquidator: *liquidator,
        debt,
        coll,
        gas_compensation: gas,
        offset_debt,
        offset_coll,
        collateral_surplus: surplus,
        recovery_mode: kind == LiquidationKind::Recovery,
    });

    totals.liquidated.push(*owner);
    totals.debt += debt;
    totals.coll += coll;
    totals.gas_compensation += gas;
    totals.offset_debt += offset_debt;
    totals.offset_coll += offset_coll;
    totals.redistributed_debt += redistributed_debt;
    totals.redistributed_coll += redistributed_coll;
    totals.collateral_surplus += surplus;
}

/// Liquidates the listed positions in order, skipping the ones that do not
/// exist, are closed, or are not liquidatable when their turn comes.
pub fn batch_liquidate<E: Environment>(
    state: &mut State,
    env: &mut E,
    liquidator: Principal,
    owners: &[Principal],
) -> Result<LiquidationTotals, EngineError> {
    if owners.is_empty() {
        return Err(EngineError::EmptyBatch);
    }
    let price = env.current_price();

    // Nothing has moved before the first eligible entry, so it is always
    // liquidated once we get past this check.
    if !owners
        .iter()
        .any(|owner| liquidation_kind(state, owner, price).is_some())
    {
        log!(
            DEBUG,
            "[batch_liquidate] none of the {} listed positions is liquidatable",
            owners.len()
        );
        return Err(EngineError::NothingToLiquidate);
    }

    let mut totals = LiquidationTotals::default();
    for owner in owners {
        match liquidation_kind(state, owner, price) {
            Some(kind) => {
                liquidate_position(state, env, &liquidator, owner, price, kind, &mut totals);
            }
            None => {
                log!(DEBUG, "[batch_liquidate] skipping {}", owner);
            }
        }
    }
    Ok(totals)
}

/// Liquidates from the worst position up, stopping after `max_positions`
/// or at the first position that is not liquidatable.
pub fn liquidate_worst<E: Environment>(
    state: &mut State,
    env: &mut E,
    liquidator: Principal,
    max_positions: usize,
) -> Result<LiquidationTotals, EngineError> {
    if max_positions == 0 {
        return Err(EngineError::EmptyBatch);
    }
    let price = env.current_price();
    let worst_is_eligible = env
        .worst_position()
        .and_then(|owner| liquidation_kind(state, &owner, price))
        .is_some();
    if !worst_is_eligible {
        return Err(EngineError::NothingToLiquidate);
    }

    let mut totals = LiquidationTotals::default();
    while totals.liquidated.len() < max_positions {
        let Some(owner) = env.worst_position() else {
            break;
        };
        let Some(kind) = liquidation_kind(state, &owner, price) else {
            break;
        };
        liquidate_position(state, env, &liquidator, &owner, price, kind, &mut totals);
    }
    log!(
        INFO,
        "[liquidate_worst] liquidated {} positions",
        totals.liquidated.len()
    );
    Ok(totals)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gas_compensation_is_half_a_percent_with_a_floor() {
        let config = EngineConfig::default();
        assert_eq!(
            gas_compensation(Coll::from_units(1), &config),
            Coll::new(5_000_000_000_000_000)
        );
        assert_eq!(gas_compensation(Coll::new(150), &config), Coll::new(1));
        assert_eq!(gas_compensation(Coll::ZERO, &config), Coll::ZERO);
    }

    #[test]
    fn gas_compensation_respects_the_cap() {
        let config = EngineConfig {
            max_gas_compensation: Some(Coll::from_units(1)),
            ..Default::default()
        };
        assert_eq!(
            gas_compensation(Coll::from_units(1_000), &config),
            Coll::from_units(1)
        );
    }
}
