use crate::collaborators::Environment;
use crate::event::Event;
use crate::logs::INFO;
use crate::numeric::{Coll, Debt, Wad};
use crate::position::PositionStatus;
use crate::state::State;
use crate::{compute_icr, EngineError};
use candid::Principal;
use ic_canister_log::log;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustArg {
    pub coll_deposit: Coll,
    pub coll_withdrawal: Coll,
    pub debt_draw: Debt,
    pub debt_repayment: Debt,
    /// Only checked when drawing debt.
    pub max_fee_percentage: Wad,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BorrowOutcome {
    pub debt: Debt,
    pub borrowing_fee: Debt,
    pub stake: u128,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseOutcome {
    pub debt_burned: Debt,
    pub collateral_returned: Coll,
}

fn check_max_fee(state: &State, max_fee_percentage: Wad, recovery: bool) -> Result<(), EngineError> {
    let floor = if recovery {
        Wad::ZERO
    } else {
        state.config.borrowing_fee_floor.to_wad()
    };
    if max_fee_percentage < floor || max_fee_percentage > Wad::ONE {
        return Err(EngineError::InvalidMaxFee { max_fee_percentage });
    }
    Ok(())
}

/// Fee owed on `amount` of new debt. Free in recovery mode.
fn borrowing_fee(
    state: &State,
    now: u64,
    amount: Debt,
    max_fee_percentage: Wad,
    recovery: bool,
) -> Result<Debt, EngineError> {
    if recovery || amount.is_zero() {
        return Ok(Debt::ZERO);
    }
    let fee_rate = state.fees.borrowing_rate(
        now,
        state.config.borrowing_fee_floor.to_wad(),
        state.config.max_borrowing_fee.to_wad(),
    );
    if fee_rate > max_fee_percentage {
        return Err(EngineError::FeeExceedsMax {
            fee_rate,
            max_fee_percentage,
        });
    }
    Ok(amount.mul_wad(fee_rate))
}

fn require_ratio(ratio: Wad, required: Wad) -> Result<(), EngineError> {
    if ratio < required {
        return Err(EngineError::CollateralRatioTooLow { ratio, required });
    }
    Ok(())
}

fn charge_borrowing_fee<E: Environment>(state: &mut State, env: &mut E, now: u64, fee: Debt) {
    state.fees.decay_from_borrowing(now);
    state.record_event(Event::BaseRateUpdated {
        base_rate: state.fees.base_rate,
        timestamp: now,
    });
    if fee.is_zero() {
        return;
    }
    let fee_account = env.fee_account();
    env.mint(&fee_account, fee);
    env.receive_debt_fee(fee);
}

pub fn open_position<E: Environment>(
    state: &mut State,
    env: &mut E,
    owner: Principal,
    coll: Coll,
    debt: Debt,
    max_fee_percentage: Wad,
) -> Result<BorrowOutcome, EngineError> {
    if state.position_status(&owner).is_active() {
        return Err(EngineError::InvalidState(format!(
            "position of {} is already active",
            owner
        )));
    }
    if coll.is_zero() {
        return Err(EngineError::ZeroAmount);
    }
    if debt < state.config.min_net_debt {
        return Err(EngineError::AmountTooLow {
            minimum_amount: state.config.min_net_debt,
        });
    }
    let price = env.current_price();
    let now = env.now_nanos();
    let recovery = state.check_recovery_mode(price);
    check_max_fee(state, max_fee_percentage, recovery)?;
    let fee = borrowing_fee(state, now, debt, max_fee_percentage, recovery)?;
    let composite_debt = debt + fee;

    let icr = compute_icr(coll, composite_debt, price);
    if recovery {
        require_ratio(icr, state.ccr())?;
    } else {
        require_ratio(icr, state.mcr())?;
        let new_tcr = compute_icr(
            state.entire_system_coll() + coll,
            state.entire_system_debt() + composite_debt,
            price,
        );
        require_ratio(new_tcr, state.ccr())?;
    }

    if !recovery {
        charge_borrowing_fee(state, env, now, fee);
    }
    let stake = state.open_position(owner, coll, composite_debt)?;
    env.insert_position(owner, state.nominal_icr(&owner));
    env.mint(&owner, debt);

    log!(
        INFO,
        "[open_position] {} opened a position with {} collateral and {} debt (fee {})",
        owner,
        coll,
        composite_debt,
        fee
    );
    state.record_event(Event::OpenPosition {
        owner,
        coll,
        debt: composite_debt,
        borrowing_fee: fee,
        stake,
    });

    Ok(BorrowOutcome {
        debt: composite_debt,
        borrowing_fee: fee,
        stake,
    })
}

pub fn adjust_position<E: Environment>(
    state: &mut State,
    env: &mut E,
    owner: Principal,
    arg: AdjustArg,
) -> Result<BorrowOutcome, EngineError> {
    let position = state.active_position(&owner)?;
    if position.is_awaiting_scavenge() {
        return Err(EngineError::InvalidState(format!(
            "position of {} is awaiting scavenge",
            owner
        )));
    }
    if arg.coll_deposit.is_zero()
        && arg.coll_withdrawal.is_zero()
        && arg.debt_draw.is_zero()
        && arg.debt_repayment.is_zero()
    {
        return Err(EngineError::ZeroAmount);
    }
    if !arg.coll_deposit.is_zero() && !arg.coll_withdrawal.is_zero() {
        return Err(EngineError::InvalidState(
            "cannot deposit and withdraw collateral at once".to_string(),
        ));
    }
    if !arg.debt_draw.is_zero() && !arg.debt_repayment.is_zero() {
        return Err(EngineError::InvalidState(
            "cannot draw and repay debt at once".to_string(),
        ));
    }

    let price = env.current_price();
    let now = env.now_nanos();
    let recovery = state.check_recovery_mode(price);
    if recovery && !arg.coll_withdrawal.is_zero() {
        return Err(EngineError::RecoveryModeRestriction(
            "collateral withdrawal".to_string(),
        ));
    }
    if !arg.debt_draw.is_zero() {
        check_max_fee(state, arg.max_fee_percentage, recovery)?;
    }
    let fee = borrowing_fee(state, now, arg.debt_draw, arg.max_fee_percentage, recovery)?;

    let entire = state.get_entire_debt_and_coll(&owner)?;
    let old_coll = entire.entire_coll();
    let old_debt = entire.entire_debt();
    let new_coll = (old_coll + arg.coll_deposit)
        .checked_sub(arg.coll_withdrawal)
        .ok_or_else(|| {
            EngineError::InvalidState(format!(
                "cannot withdraw {} collateral out of {}",
                arg.coll_withdrawal, old_coll
            ))
        })?;
    let new_debt = (old_debt + arg.debt_draw + fee)
        .checked_sub(arg.debt_repayment)
        .ok_or(EngineError::AmountTooLow {
            minimum_amount: state.config.min_net_debt,
        })?;
    if new_debt < state.config.min_net_debt {
        return Err(EngineError::AmountTooLow {
            minimum_amount: state.config.min_net_debt,
        });
    }
    let balance = env.balance_of(&owner);
    if balance < arg.debt_repayment {
        return Err(EngineError::InsufficientBalance {
            required: arg.debt_repayment,
            available: balance,
        });
    }

    let old_icr = compute_icr(old_coll, old_debt, price);
    let new_icr = compute_icr(new_coll, new_debt, price);
    if recovery {
        // Deposits and repayments only raise the ICR.
        if !arg.debt_draw.is_zero() {
            require_ratio(new_icr, state.ccr())?;
            require_ratio(new_icr, old_icr)?;
        }
    } else {
        require_ratio(new_icr, state.mcr())?;
        let new_tcr = compute_icr(
            state.entire_system_coll() + new_coll - old_coll,
            state.entire_system_debt() + new_debt - old_debt,
            price,
        );
        require_ratio(new_tcr, state.ccr())?;
    }

    if !arg.debt_draw.is_zero() && !recovery {
        charge_borrowing_fee(state, env, now, fee);
    }
    state.apply_pending_rewards(&owner);
    state.increase_position(&owner, arg.coll_deposit, arg.debt_draw + fee);
    state.decrease_position(&owner, arg.coll_withdrawal, arg.debt_repayment);
    let stake = state.update_stake(&owner);
    env.reinsert_position(owner, state.nominal_icr(&owner));

    if !arg.debt_draw.is_zero() {
        env.mint(&owner, arg.debt_draw);
    }
    if !arg.debt_repayment.is_zero() {
        env.burn(&owner, arg.debt_repayment);
    }
    env.send_collateral(&owner, arg.coll_withdrawal);

    log!(
        INFO,
        "[adjust_position] {} now holds {} collateral and {} debt",
        owner,
        new_coll,
        new_debt
    );
    state.record_event(Event::AdjustPosition {
        owner,
        coll: new_coll,
        debt: new_debt,
        borrowing_fee: fee,
        stake,
    });

    Ok(BorrowOutcome {
        debt: new_debt,
        borrowing_fee: fee,
        stake,
    })
}

/// Repays the entire obligation from the owner's balance and returns all
/// collateral.
pub fn close_position<E: Environment>(
    state: &mut State,
    env: &mut E,
    owner: Principal,
) -> Result<CloseOutcome, EngineError> {
    let entire = state.get_entire_debt_and_coll(&owner)?;
    let price = env.current_price();
    if state.check_recovery_mode(price) {
        return Err(EngineError::RecoveryModeRestriction(
            "closing a position".to_string(),
        ));
    }
    let obligation = entire.entire_debt();
    let new_tcr = compute_icr(
        state.entire_system_coll() - entire.entire_coll(),
        state.entire_system_debt() - obligation,
        price,
    );
    require_ratio(new_tcr, state.ccr())?;
    let balance = env.balance_of(&owner);
    if balance < obligation {
        return Err(EngineError::InsufficientBalance {
            required: obligation,
            available: balance,
        });
    }

    state.apply_pending_rewards(&owner);
    state.remove_stake(&owner);
    let closed = state.close_position(&owner, PositionStatus::ClosedByOwner);
    env.burn(&owner, obligation);
    env.send_collateral(&owner, closed.coll);
    env.remove_position(&owner);

    log!(
        INFO,
        "[close_position] {} repaid {} and withdrew {} collateral",
        owner,
        obligation,
        closed.coll
    );

    Ok(CloseOutcome {
        debt_burned: obligation,
        collateral_returned: closed.coll,
    })
}

pub fn claim_collateral_surplus<E: Environment>(
    state: &mut State,
    env: &mut E,
    owner: Principal,
) -> Result<Coll, EngineError> {
    let amount = state
        .collateral_surplus
        .remove(&owner)
        .ok_or_else(|| EngineError::InvalidState(format!("{} has no collateral surplus", owner)))?;
    env.send_collateral(&owner, amount);
    log!(
        INFO,
        "[claim_collateral_surplus] {} claimed {} collateral",
        owner,
        amount
    );
    state.record_event(Event::CollateralSurplusClaimed { owner, amount });
    Ok(amount)
}
