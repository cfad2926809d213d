//! Exponentially decaying base rate shared by redemption and borrowing fees.
//!
//! Redemptions raise the base rate by half the redeemed fraction of the
//! total debt; it then halves every twelve hours. Borrowing only ever
//! decays it.

use crate::numeric::{Debt, Wad, DECIMAL_PRECISION};
use crate::SEC_NANOS;
use serde::{Deserialize, Serialize};

/// 0.5 ^ (1 / 720): twelve-hour half life at one-minute granularity.
pub const MINUTE_DECAY_FACTOR: Wad = Wad::new(999_037_758_833_783_000);

pub const SECONDS_IN_ONE_MINUTE: u64 = 60;

// Redemption bump divisor.
const BETA: u128 = 2;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseRate {
    pub base_rate: Wad,
    /// Nanoseconds.
    pub last_fee_operation_time: u64,
}

impl BaseRate {
    pub fn minutes_passed(&self, now: u64) -> u64 {
        now.saturating_sub(self.last_fee_operation_time) / (SECONDS_IN_ONE_MINUTE * SEC_NANOS)
    }

    pub fn decayed_base_rate(&self, now: u64) -> Wad {
        let decay = MINUTE_DECAY_FACTOR.pow(self.minutes_passed(now));
        self.base_rate.dec_mul(decay)
    }

    /// Base rate after redeeming `redeemed` out of `total_debt`, capped at 100%.
    pub fn base_rate_after_redemption(&self, now: u64, redeemed: Debt, total_debt: Debt) -> Wad {
        if total_debt.is_zero() {
            return Wad::ONE;
        }
        let redeemed_fraction = Wad::from_ratio(redeemed.to_u128(), total_debt.to_u128());
        let bumped = self.decayed_base_rate(now) + Wad::new(redeemed_fraction.to_u128() / BETA);
        bumped.min(Wad::ONE)
    }

    pub fn borrowing_rate(&self, now: u64, floor: Wad, max_borrowing_fee: Wad) -> Wad {
        (floor + self.decayed_base_rate(now)).min(max_borrowing_fee)
    }

    pub fn update_from_redemption(&mut self, now: u64, new_base_rate: Wad) {
        self.base_rate = new_base_rate;
        self.update_last_fee_operation_time(now);
    }

    pub fn decay_from_borrowing(&mut self, now: u64) {
        self.base_rate = self.decayed_base_rate(now).min(Wad::ONE);
        self.update_last_fee_operation_time(now);
    }

    // Advancing by less than a minute would drop the partial minute from
    // every future decay.
    fn update_last_fee_operation_time(&mut self, now: u64) {
        let elapsed = now.saturating_sub(self.last_fee_operation_time);
        if elapsed >= SECONDS_IN_ONE_MINUTE * SEC_NANOS {
            self.last_fee_operation_time = now;
        }
    }
}

/// Redemption fee rate for a given base rate, capped at 100%.
pub fn redemption_rate(base_rate: Wad, floor: Wad) -> Wad {
    (floor + base_rate).min(Wad::ONE)
}

/// Rate expressed as a percentage, for logs.
pub fn as_percent(rate: Wad) -> f64 {
    rate.to_u128() as f64 * 100.0 / DECIMAL_PRECISION as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: u64 = SECONDS_IN_ONE_MINUTE * SEC_NANOS;

    #[test]
    fn base_rate_halves_every_twelve_hours() {
        let rate = BaseRate {
            base_rate: Wad::from_ratio(1, 10),
            last_fee_operation_time: 0,
        };
        let decayed = rate.decayed_base_rate(720 * MINUTE).to_f64();
        assert!((decayed - 0.05).abs() < 1e-6, "decayed to {decayed}");
        assert_eq!(rate.decayed_base_rate(59 * SEC_NANOS), rate.base_rate);
    }

    #[test]
    fn redemption_bumps_by_half_the_redeemed_fraction() {
        let rate = BaseRate::default();
        let bumped =
            rate.base_rate_after_redemption(0, Debt::from_units(100), Debt::from_units(1_000));
        assert_eq!(bumped, Wad::from_ratio(5, 100));
        assert_eq!(
            redemption_rate(bumped, Wad::from_ratio(5, 1_000)),
            Wad::from_ratio(55, 1_000)
        );
        assert_eq!(
            rate.base_rate_after_redemption(0, Debt::from_units(5), Debt::from_units(1)),
            Wad::ONE
        );
    }

    #[test]
    fn fee_operation_time_only_moves_after_a_full_minute() {
        let mut rate = BaseRate::default();
        rate.update_from_redemption(30 * SEC_NANOS, Wad::from_ratio(1, 100));
        assert_eq!(rate.last_fee_operation_time, 0);
        rate.decay_from_borrowing(90 * SEC_NANOS);
        assert_eq!(rate.last_fee_operation_time, 90 * SEC_NANOS);
    }

    #[test]
    fn borrowing_rate_is_capped() {
        let rate = BaseRate {
            base_rate: Wad::from_ratio(1, 10),
            last_fee_operation_time: 0,
        };
        let floor = Wad::from_ratio(5, 1_000);
        let max = Wad::from_ratio(5, 100);
        assert_eq!(rate.borrowing_rate(0, floor, max), max);
        assert_eq!(BaseRate::default().borrowing_rate(0, floor, max), floor);
    }
}
