//! This module defines various unit types and their conversions.
//!
//! Energy is measured in MWh, power in MW, durations in hours and money in the currency of the
//! price data.
use serde::{Deserialize, Serialize};
use std::iter::Sum;

macro_rules! unit_struct {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(
            Debug,
            Default,
            Clone,
            Copy,
            PartialEq,
            PartialOrd,
            Serialize,
            Deserialize,
            derive_more::Add,
            derive_more::Sub,
            derive_more::AddAssign,
            derive_more::SubAssign,
            derive_more::Neg,
            derive_more::Display,
        )]
        #[serde(transparent)]
        pub struct $name(pub f64);

        impl $name {
            /// Create a new instance of the unit type from an `f64` value.
            pub const fn new(value: f64) -> Self {
                Self(value)
            }

            /// Returns the value of the unit type as an `f64`.
            pub const fn value(self) -> f64 {
                self.0
            }

            /// The absolute value
            pub fn abs(self) -> Self {
                Self(self.0.abs())
            }

            /// The smaller of `self` and `other`
            pub fn min(self, other: Self) -> Self {
                Self(self.0.min(other.0))
            }

            /// The larger of `self` and `other`
            pub fn max(self, other: Self) -> Self {
                Self(self.0.max(other.0))
            }

            /// Whether the value is neither infinite nor NaN
            pub fn is_finite(self) -> bool {
                self.0.is_finite()
            }
        }

        impl Sum for $name {
            fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
                Self(iter.map(|x| x.0).sum())
            }
        }

        impl std::ops::Mul<Dimensionless> for $name {
            type Output = $name;
            fn mul(self, rhs: Dimensionless) -> $name {
                $name(self.0 * rhs.0)
            }
        }

        impl std::ops::Div<Dimensionless> for $name {
            type Output = $name;
            fn div(self, rhs: Dimensionless) -> $name {
                $name(self.0 / rhs.0)
            }
        }

        impl std::ops::Div<$name> for $name {
            type Output = Dimensionless;
            fn div(self, rhs: $name) -> Dimensionless {
                Dimensionless(self.0 / rhs.0)
            }
        }
    };
}

macro_rules! impl_mul {
    ($Lhs:ty, $Rhs:ty, $Out:ty) => {
        impl std::ops::Mul<$Rhs> for $Lhs {
            type Output = $Out;
            fn mul(self, rhs: $Rhs) -> $Out {
                <$Out>::new(self.0 * rhs.0)
            }
        }
        impl std::ops::Mul<$Lhs> for $Rhs {
            type Output = $Out;
            fn mul(self, lhs: $Lhs) -> $Out {
                <$Out>::new(self.0 * lhs.0)
            }
        }
    };
}

macro_rules! impl_div {
    ($Lhs:ty, $Rhs:ty, $Out:ty) => {
        impl std::ops::Div<$Rhs> for $Lhs {
            type Output = $Out;
            fn div(self, rhs: $Rhs) -> $Out {
                <$Out>::new(self.0 / rhs.0)
            }
        }
    };
}

/// Represents a dimensionless quantity, such as an efficiency or a fraction of capacity.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    PartialOrd,
    Serialize,
    Deserialize,
    derive_more::Add,
    derive_more::Sub,
    derive_more::Display,
)]
#[serde(transparent)]
pub struct Dimensionless(pub f64);

impl Dimensionless {
    /// Create a new dimensionless value
    pub const fn new(value: f64) -> Self {
        Self(value)
    }

    /// Returns the value as an `f64`.
    pub const fn value(self) -> f64 {
        self.0
    }
}

impl std::ops::Mul for Dimensionless {
    type Output = Dimensionless;

    fn mul(self, rhs: Dimensionless) -> Self::Output {
        Dimensionless(self.0 * rhs.0)
    }
}

impl std::ops::Div for Dimensionless {
    type Output = Dimensionless;

    fn div(self, rhs: Dimensionless) -> Self::Output {
        Dimensionless(self.0 / rhs.0)
    }
}

// Base quantities
unit_struct!(Energy, "An amount of energy in MWh.");
unit_struct!(Power, "A rate of energy flow in MW.");
unit_struct!(Hours, "A duration in hours.");
unit_struct!(Money, "An amount of money.");

// Derived quantities
unit_struct!(MoneyPerEnergy, "A price per MWh.");

impl_mul!(Power, Hours, Energy);
impl_mul!(MoneyPerEnergy, Energy, Money);
impl_div!(Energy, Hours, Power);
impl_div!(Money, Energy, MoneyPerEnergy);

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    #[test]
    fn test_power_times_hours() {
        let energy = Power(2.0) * Hours(0.25);
        assert_eq!(energy, Energy(0.5));
        assert_eq!(energy / Hours(0.25), Power(2.0));
    }

    #[test]
    fn test_price_times_energy() {
        let cost = MoneyPerEnergy(40.0) * Energy(-0.5);
        assert_approx_eq!(f64, cost.value(), -20.0);
    }

    #[test]
    fn test_sum_and_neg() {
        let total: Money = [Money(1.0), Money(-3.0), Money(0.5)].into_iter().sum();
        assert_eq!(total, Money(-1.5));
        assert_eq!(-total, Money(1.5));
    }

    #[test]
    fn test_same_unit_ratio() {
        assert_eq!(Energy(5.0) / Energy(10.0), Dimensionless(0.5));
    }
}
