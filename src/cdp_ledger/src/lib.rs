use crate::numeric::{mul_div, Coll, Debt, Ratio, Wad, NICR_PRECISION};
use crate::state::Mode;
use candid::CandidType;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod borrower;
pub mod collaborators;
pub mod engine;
pub mod event;
pub mod fees;
pub mod in_memory;
pub mod liquidation;
pub mod logs;
pub mod numeric;
pub mod position;
pub mod redemption;
pub mod rewards;
pub mod stakes;
pub mod state;
pub mod storage;

#[cfg(test)]
mod tests;

pub use engine::CdpEngine;

pub const SEC_NANOS: u64 = 1_000_000_000;

// Below this ratio a position is liquidatable.
pub const MINIMUM_COLLATERAL_RATIO: Ratio = Ratio::new(dec!(1.1)); // 110%
// Below this system-wide ratio the ledger is in recovery mode.
pub const CRITICAL_COLLATERAL_RATIO: Ratio = Ratio::new(dec!(1.5)); // 150%

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineError {
    /// The position is not in the status the operation expects.
    InvalidState(String),
    NothingToLiquidate,
    RedeemBelowMCR { tcr: Wad },
    ZeroAmount,
    InsufficientBalance { required: Debt, available: Debt },
    FeeExceedsMax { fee_rate: Wad, max_fee_percentage: Wad },
    FeeEatsAllCollateral { fee: Coll, collateral_drawn: Coll },
    StillLiquidatable { icr: Wad },
    EmptyBatch,
    NothingToRedeem,
    InvalidMaxFee { max_fee_percentage: Wad },
    AmountTooLow { minimum_amount: Debt },
    CollateralRatioTooLow { ratio: Wad, required: Wad },
    RecoveryModeRestriction(String),
    InvalidConfig(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::InvalidState(msg) => write!(f, "invalid position state: {msg}"),
            EngineError::NothingToLiquidate => write!(f, "nothing to liquidate"),
            EngineError::RedeemBelowMCR { tcr } => write!(
                f,
                "cannot redeem while the total collateral ratio ({:.2}%) is below the minimum",
                tcr.to_f64() * 100.0
            ),
            EngineError::ZeroAmount => write!(f, "amount must be greater than zero"),
            EngineError::InsufficientBalance {
                required,
                available,
            } => write!(f, "insufficient balance: required {required}, available {available}"),
            EngineError::FeeExceedsMax {
                fee_rate,
                max_fee_percentage,
            } => write!(
                f,
                "fee rate {:.4}% exceeds the accepted maximum {:.4}%",
                fee_rate.to_f64() * 100.0,
                max_fee_percentage.to_f64() * 100.0
            ),
            EngineError::FeeEatsAllCollateral {
                fee,
                collateral_drawn,
            } => write!(f, "fee {fee} would consume all drawn collateral {collateral_drawn}"),
            EngineError::StillLiquidatable { icr } => write!(
                f,
                "position is liquidatable (ICR {:.2}%)",
                icr.to_f64() * 100.0
            ),
            EngineError::EmptyBatch => write!(f, "empty liquidation batch"),
            EngineError::NothingToRedeem => write!(f, "no position could be redeemed against"),
            EngineError::InvalidMaxFee { max_fee_percentage } => write!(
                f,
                "max fee percentage {:.4}% is out of range",
                max_fee_percentage.to_f64() * 100.0
            ),
            EngineError::AmountTooLow { minimum_amount } => {
                write!(f, "amount too low, minimum is {minimum_amount}")
            }
            EngineError::CollateralRatioTooLow { ratio, required } => write!(
                f,
                "collateral ratio {:.2}% is below the required {:.2}%",
                ratio.to_f64() * 100.0,
                required.to_f64() * 100.0
            ),
            EngineError::RecoveryModeRestriction(msg) => {
                write!(f, "not allowed in recovery mode: {msg}")
            }
            EngineError::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}

/// Individual collateral ratio: `coll * price / debt`. Debt-free positions
/// report `Wad::MAX`.
pub fn compute_icr(coll: Coll, debt: Debt, price: Wad) -> Wad {
    if debt.is_zero() {
        return Wad::MAX;
    }
    Wad::new(mul_div(coll.to_u128(), price.to_u128(), debt.to_u128()))
}

/// Price-independent ratio `coll * 1e20 / debt`, the key of the sorted index.
pub fn compute_nominal_icr(coll: Coll, debt: Debt) -> Wad {
    if debt.is_zero() {
        return Wad::MAX;
    }
    Wad::new(mul_div(coll.to_u128(), NICR_PRECISION, debt.to_u128()))
}

#[derive(CandidType, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemStatus {
    pub price: Wad,
    pub total_collateral: Coll,
    pub total_debt: Debt,
    pub total_collateral_ratio: Wad,
    pub mode: Mode,
    pub active_positions: u64,
    pub total_stakes: u128,
    pub l_coll: Wad,
    pub l_debt: Wad,
    pub redeemed_debt: Debt,
    pub base_rate: Wad,
}

#[derive(CandidType, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fees {
    pub borrowing_rate: Wad,
    pub redemption_rate: Wad,
}
