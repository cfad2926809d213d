//! Redemptions: debt tokens in, collateral out at face value, drawn from
//! the worst-collateralized positions first.
//!
//! A redemption is planned against an unmodified state and only applied
//! once the whole plan, fee included, is known to be acceptable.
//! Redemption never closes a position. One left without applied debt, or
//! holding parked dust, stays active until someone scavenges it.

use crate::collaborators::Environment;
use crate::event::Event;
use crate::fees::{as_percent, redemption_rate};
use crate::logs::{DEBUG, INFO};
use crate::numeric::{Coll, Debt, Wad};
use crate::position::PositionStatus;
use crate::state::State;
use crate::{compute_icr, EngineError};
use candid::Principal;
use ic_canister_log::log;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionRedemption {
    pub owner: Principal,
    pub debt_redeemed: Debt,
    pub coll_drawn: Coll,
    /// Residual moved to the redemption-pending share by the dust rule.
    pub parked_debt: Debt,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedemptionOutcome {
    pub attempted: Debt,
    pub redeemed: Debt,
    pub collateral_drawn: Coll,
    pub fee_rate: Wad,
    pub fee: Coll,
    pub collateral_sent: Coll,
    pub positions: Vec<PositionRedemption>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScavengeOutcome {
    pub owner: Principal,
    /// Debt burned from the caller to finalize the position.
    pub obligation: Debt,
    pub collateral_returned: Coll,
    /// Face value of the obligation in collateral, paid to a caller other
    /// than the owner.
    pub collateral_to_caller: Coll,
    /// Debt redeemed away from the position, kept by the owner as tokens.
    pub free_debt: Debt,
}

/// Walks the index worst-first and decides how much each position gives up.
fn plan_redemption<E: Environment>(
    state: &State,
    env: &E,
    amount: Debt,
    price: Wad,
    max_iterations: Option<usize>,
) -> Vec<PositionRedemption> {
    let mcr = state.mcr();
    let min_net_debt = state.config.min_net_debt;
    let mut remaining = amount;
    let mut plan = vec![];
    let mut cursor = env.worst_position();

    while let Some(owner) = cursor {
        if remaining.is_zero() || max_iterations.is_some_and(|cap| plan.len() >= cap) {
            break;
        }
        cursor = env.next_position(&owner);

        let Ok(entire) = state.get_entire_debt_and_coll(&owner) else {
            continue;
        };
        let icr = compute_icr(entire.entire_coll(), entire.entire_debt(), price);
        if icr < mcr {
            log!(
                DEBUG,
                "[redeem] skipping {}: ICR {:.2}% below the minimum",
                owner,
                icr.to_f64() * 100.0
            );
            continue;
        }
        let redeemable = entire.redeemable_debt();
        if redeemable.is_zero() {
            continue;
        }

        let share = remaining.min(redeemable);
        let residual = redeemable - share;
        let parked_debt = if !residual.is_zero() && residual < min_net_debt {
            residual
        } else {
            Debt::ZERO
        };
        plan.push(PositionRedemption {
            owner,
            debt_redeemed: share,
            coll_drawn: share.to_coll(price),
            parked_debt,
        });
        remaining -= share;
    }
    plan
}

pub fn redeem<E: Environment>(
    state: &mut State,
    env: &mut E,
    redeemer: Principal,
    amount: Debt,
    max_fee_percentage: Wad,
    max_iterations: Option<usize>,
) -> Result<RedemptionOutcome, EngineError> {
    if amount.is_zero() {
        return Err(EngineError::ZeroAmount);
    }
    let fee_floor = state.config.redemption_fee_floor.to_wad();
    if max_fee_percentage < fee_floor || max_fee_percentage > Wad::ONE {
        return Err(EngineError::InvalidMaxFee { max_fee_percentage });
    }
    let balance = env.balance_of(&redeemer);
    if balance < amount {
        return Err(EngineError::InsufficientBalance {
            required: amount,
            available: balance,
        });
    }
    let price = env.current_price();
    let tcr = state.get_tcr(price);
    if tcr < state.mcr() {
        return Err(EngineError::RedeemBelowMCR { tcr });
    }

    let plan = plan_redemption(state, env, amount, price, max_iterations);
    if plan.is_empty() {
        return Err(EngineError::NothingToRedeem);
    }
    let redeemed: Debt = plan.iter().map(|step| step.debt_redeemed).sum();
    let collateral_drawn: Coll = plan.iter().map(|step| step.coll_drawn).sum();

    let now = env.now_nanos();
    let new_base_rate =
        state
            .fees
            .base_rate_after_redemption(now, redeemed, state.entire_system_debt());
    let fee_rate = redemption_rate(new_base_rate, fee_floor);
    if fee_rate > max_fee_percentage {
        return Err(EngineError::FeeExceedsMax {
            fee_rate,
            max_fee_percentage,
        });
    }
    let fee = collateral_drawn.mul_wad(fee_rate);
    if fee >= collateral_drawn {
        return Err(EngineError::FeeEatsAllCollateral {
            fee,
            collateral_drawn,
        });
    }

    for step in &plan {
        state.apply_pending_rewards(&step.owner);
        state.decrease_position(&step.owner, step.coll_drawn, step.debt_redeemed);
        if !step.parked_debt.is_zero() {
            state.park_redemption_debt(&step.owner, step.parked_debt);
        }
        if let Some(position) = state.positions.get_mut(&step.owner) {
            position.redeemed_debt_total += step.debt_redeemed;
        }
        state.update_stake(&step.owner);
        env.reinsert_position(step.owner, state.nominal_icr(&step.owner));
        log!(
            DEBUG,
            "[redeem] took {} debt and {} collateral from {}, parked {}",
            step.debt_redeemed,
            step.coll_drawn,
            step.owner,
            step.parked_debt
        );
        state.record_event(Event::RedeemFromPosition {
            owner: step.owner,
            debt_redeemed: step.debt_redeemed,
            coll_drawn: step.coll_drawn,
            parked_debt: step.parked_debt,
        });
    }

    state.fees.update_from_redemption(now, new_base_rate);
    state.record_event(Event::BaseRateUpdated {
        base_rate: new_base_rate,
        timestamp: now,
    });

    let collateral_sent = collateral_drawn - fee;
    env.burn(&redeemer, redeemed);
    env.receive_collateral_fee(fee);
    env.send_collateral(&redeemer, collateral_sent);

    log!(
        INFO,
        "[redeem] {} redeemed {} of {} across {} positions for {} collateral (fee {}, {:.4}%)",
        redeemer,
        redeemed,
        amount,
        plan.len(),
        collateral_sent,
        fee,
        as_percent(fee_rate)
    );
    state.record_event(Event::Redemption {
        redeemer,
        attempted: amount,
        redeemed,
        collateral_drawn,
        fee,
    });

    Ok(RedemptionOutcome {
        attempted: amount,
        redeemed,
        collateral_drawn,
        fee_rate,
        fee,
        collateral_sent,
        positions: plan,
    })
}

/// Finalizes a position a redemption emptied of applied debt or left with
/// parked dust. The caller settles the remaining obligation with their own
/// debt tokens, which leaves the owner's tokens free. A caller other than
/// the owner is paid the obligation's face value in collateral and the
/// owner receives the rest. Settling with burned tokens keeps the token
/// supply equal to the tracked system debt.
pub fn scavenge<E: Environment>(
    state: &mut State,
    env: &mut E,
    caller: Principal,
    owner: Principal,
) -> Result<ScavengeOutcome, EngineError> {
    let position = state.active_position(&owner)?;
    if !position.is_awaiting_scavenge() {
        return Err(EngineError::InvalidState(format!(
            "position of {} still carries {} applied debt",
            owner, position.debt
        )));
    }
    let free_debt = position.redeemed_debt_total;

    let entire = state.get_entire_debt_and_coll(&owner)?;
    let obligation = entire.entire_debt();
    let price = env.current_price();
    let icr = compute_icr(entire.entire_coll(), obligation, price);
    if icr < state.mcr() {
        return Err(EngineError::StillLiquidatable { icr });
    }
    let balance = env.balance_of(&caller);
    if balance < obligation {
        return Err(EngineError::InsufficientBalance {
            required: obligation,
            available: balance,
        });
    }

    state.apply_pending_rewards(&owner);
    state.remove_stake(&owner);
    let closed = state.close_position(&owner, PositionStatus::ClosedByRedemption);
    // At or above the minimum ratio the collateral covers the face value.
    let collateral_to_caller = if caller == owner {
        Coll::ZERO
    } else {
        obligation.to_coll(price).min(closed.coll)
    };
    let collateral_returned = closed.coll - collateral_to_caller;
    if !obligation.is_zero() {
        env.burn(&caller, obligation);
    }
    if !collateral_to_caller.is_zero() {
        env.send_collateral(&caller, collateral_to_caller);
    }
    env.send_collateral(&owner, collateral_returned);
    env.remove_position(&owner);

    log!(
        INFO,
        "[scavenge] {} closed the position of {}: burned {}, paid {} collateral to the caller, returned {}, free debt {}",
        caller,
        owner,
        obligation,
        collateral_to_caller,
        collateral_returned,
        free_debt
    );
    state.record_event(Event::ScavengePosition {
        owner,
        caller,
        obligation,
        coll: collateral_returned,
        caller_coll: collateral_to_caller,
        free_debt,
    });

    Ok(ScavengeOutcome {
        owner,
        obligation,
        collateral_returned,
        collateral_to_caller,
        free_debt,
    })
}

