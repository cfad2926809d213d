//! Fixed-point amounts used throughout the ledger.
//!
//! Collateral and debt are both 18-decimal unsigned integers. Conversions
//! between them go through a [`Wad`] price (debt per whole unit of
//! collateral). Every product is computed with a 256-bit intermediate and
//! rounds toward zero unless the function name says otherwise.

use candid::types::{Serializer, Type, TypeInner};
use candid::CandidType;
use ethnum::U256;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub, SubAssign};

pub const DECIMAL_PRECISION: u128 = 1_000_000_000_000_000_000;

/// Scale of the nominal collateral ratio used as the sorted index key.
pub const NICR_PRECISION: u128 = 100_000_000_000_000_000_000;

/// Cap on the exponent of [`Wad::pow`]: 1000 years expressed in minutes.
const MAX_POW_EXPONENT: u64 = 525_600_000;

fn to_u128_saturating(value: U256) -> u128 {
    if *value.high() != 0 {
        u128::MAX
    } else {
        *value.low()
    }
}

/// `a * b / denominator`, rounded down. Saturates at `u128::MAX`.
pub fn mul_div(a: u128, b: u128, denominator: u128) -> u128 {
    assert_ne!(denominator, 0, "bug: mul_div with zero denominator");
    to_u128_saturating(U256::from(a) * U256::from(b) / U256::from(denominator))
}

/// `(amount * 1e18 + carry) / denominator` together with the remainder.
pub fn scaled_div_rem(amount: u128, carry: u128, denominator: u128) -> (u128, u128) {
    assert_ne!(denominator, 0, "bug: scaled_div_rem with zero denominator");
    let numerator = U256::from(amount) * U256::from(DECIMAL_PRECISION) + U256::from(carry);
    let denominator = U256::from(denominator);
    let remainder = numerator % denominator;
    (to_u128_saturating(numerator / denominator), *remainder.low())
}

fn fmt_fixed(raw: u128, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let units = raw / DECIMAL_PRECISION;
    let fraction = raw % DECIMAL_PRECISION;
    if fraction == 0 {
        return write!(f, "{units}");
    }
    let digits = format!("{fraction:018}");
    write!(f, "{units}.{}", digits.trim_end_matches('0'))
}

macro_rules! fixed_point_amount {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            CandidType,
            Clone,
            Copy,
            Debug,
            Default,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            Serialize,
            Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(u128);

        impl $name {
            pub const ZERO: $name = $name(0);

            pub const fn new(raw: u128) -> Self {
                Self(raw)
            }

            /// `units` whole tokens, i.e. `units * 1e18` raw.
            pub const fn from_units(units: u64) -> Self {
                Self(units as u128 * DECIMAL_PRECISION)
            }

            pub const fn to_u128(self) -> u128 {
                self.0
            }

            pub const fn is_zero(self) -> bool {
                self.0 == 0
            }

            pub fn checked_sub(self, other: Self) -> Option<Self> {
                self.0.checked_sub(other.0).map(Self)
            }

            /// `self * numerator / denominator`, rounded down.
            pub fn mul_div(self, numerator: u128, denominator: u128) -> Self {
                Self(mul_div(self.0, numerator, denominator))
            }

            /// `self * rate`, rounded down.
            pub fn mul_wad(self, rate: Wad) -> Self {
                Self(mul_div(self.0, rate.to_u128(), DECIMAL_PRECISION))
            }
        }

        impl From<u128> for $name {
            fn from(raw: u128) -> Self {
                Self(raw)
            }
        }

        impl Add for $name {
            type Output = Self;

            fn add(self, other: Self) -> Self {
                match self.0.checked_add(other.0) {
                    Some(sum) => Self(sum),
                    None => panic!("bug: {} overflow", stringify!($name)),
                }
            }
        }

        impl AddAssign for $name {
            fn add_assign(&mut self, other: Self) {
                *self = *self + other;
            }
        }

        impl Sub for $name {
            type Output = Self;

            fn sub(self, other: Self) -> Self {
                match self.0.checked_sub(other.0) {
                    Some(difference) => Self(difference),
                    None => panic!(
                        "bug: {} underflow ({} - {})",
                        stringify!($name),
                        self.0,
                        other.0
                    ),
                }
            }
        }

        impl SubAssign for $name {
            fn sub_assign(&mut self, other: Self) {
                *self = *self - other;
            }
        }

        impl Sum for $name {
            fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
                iter.fold(Self::ZERO, |acc, x| acc + x)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt_fixed(self.0, f)
            }
        }
    };
}

fixed_point_amount!(
    /// Collateral amount, 18 decimals.
    Coll
);

fixed_point_amount!(
    /// Debt-token amount, 18 decimals.
    Debt
);

fixed_point_amount!(
    /// Unsigned 1e18 fixed-point number: prices, collateral ratios, fee rates.
    Wad
);

impl Wad {
    pub const ONE: Wad = Wad(DECIMAL_PRECISION);
    pub const MAX: Wad = Wad(u128::MAX);

    /// `numerator / denominator` as a wad, rounded down.
    pub fn from_ratio(numerator: u128, denominator: u128) -> Wad {
        Wad(mul_div(numerator, DECIMAL_PRECISION, denominator))
    }

    /// Product of two wads, rounded half up.
    pub fn dec_mul(self, other: Wad) -> Wad {
        let product = U256::from(self.0) * U256::from(other.0) + U256::from(DECIMAL_PRECISION / 2);
        Wad(to_u128_saturating(product / U256::from(DECIMAL_PRECISION)))
    }

    /// `self ^ exponent` by repeated squaring. The exponent is capped so
    /// that decay over absurd idle periods stays cheap.
    pub fn pow(self, exponent: u64) -> Wad {
        let mut n = exponent.min(MAX_POW_EXPONENT);
        if n == 0 {
            return Wad::ONE;
        }
        let mut x = self;
        let mut y = Wad::ONE;
        while n > 1 {
            if n % 2 == 1 {
                y = x.dec_mul(y);
            }
            x = x.dec_mul(x);
            n /= 2;
        }
        x.dec_mul(y)
    }

    pub fn to_f64(self) -> f64 {
        self.0 as f64 / DECIMAL_PRECISION as f64
    }
}

impl Coll {
    /// Debt-token value of this collateral at `price`.
    pub fn value_at(self, price: Wad) -> Debt {
        Debt::new(mul_div(self.0, price.to_u128(), DECIMAL_PRECISION))
    }
}

impl Debt {
    /// Collateral worth `self` at `price`, rounded down.
    pub fn to_coll(self, price: Wad) -> Coll {
        if price.is_zero() {
            return Coll::new(u128::MAX);
        }
        Coll::new(mul_div(self.0, DECIMAL_PRECISION, price.to_u128()))
    }
}

/// Human-facing ratio used in configuration, e.g. `dec!(1.1)` for 110%.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Ratio(pub Decimal);

impl Ratio {
    pub const fn new(value: Decimal) -> Self {
        Self(value)
    }

    /// Fixed-point form used by the engine. Negative ratios clamp to zero.
    pub fn to_wad(self) -> Wad {
        (self.0 * dec!(1_000_000_000_000_000_000))
            .trunc()
            .to_u128()
            .map(Wad::new)
            .unwrap_or(Wad::ZERO)
    }
}

// Travels as decimal text, the same form serde gives it.
impl CandidType for Ratio {
    fn _ty() -> Type {
        TypeInner::Text.into()
    }

    fn idl_serialize<S>(&self, serializer: S) -> Result<(), S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_text(&self.0.to_string())
    }
}

impl fmt::Display for Ratio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mul_div_does_not_overflow_on_large_products() {
        let coll = 1_000_000u128 * DECIMAL_PRECISION;
        let price = 2_000u128 * DECIMAL_PRECISION;
        assert_eq!(
            mul_div(coll, price, DECIMAL_PRECISION),
            2_000_000_000u128 * DECIMAL_PRECISION
        );
    }

    #[test]
    fn mul_div_rounds_down() {
        assert_eq!(mul_div(10, 1, 3), 3);
        assert_eq!(mul_div(9, 1, 3), 3);
    }

    #[test]
    fn collateral_debt_conversions_at_price() {
        let price = Wad::from_units(200);
        assert_eq!(Coll::from_units(20).value_at(price), Debt::from_units(4_000));
        assert_eq!(Debt::from_units(190).to_coll(price), Coll::new(950_000_000_000_000_000));
    }

    #[test]
    fn pow_matches_twelve_hour_half_life() {
        let factor = Wad::new(999_037_758_833_783_000);
        let half = factor.pow(720).to_f64();
        assert!((half - 0.5).abs() < 1e-6, "decay after 720 minutes was {half}");
        assert_eq!(factor.pow(0), Wad::ONE);
        assert_eq!(Wad::ONE.pow(u64::MAX), Wad::ONE);
    }

    #[test]
    fn ratio_converts_to_wad() {
        let mcr = Ratio::new(dec!(1.1));
        assert_eq!(mcr.to_wad(), Wad::new(1_100_000_000_000_000_000));
        assert_eq!(Ratio::new(dec!(-1)).to_wad(), Wad::ZERO);
    }

    #[test]
    fn display_trims_fraction() {
        assert_eq!(Debt::from_units(42).to_string(), "42");
        assert_eq!(Coll::new(1_500_000_000_000_000_000).to_string(), "1.5");
    }

    #[test]
    #[should_panic(expected = "underflow")]
    fn subtraction_underflow_is_a_bug() {
        let _ = Debt::from_units(1) - Debt::from_units(2);
    }
}
