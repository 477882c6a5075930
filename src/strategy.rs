//! Battery scheduling strategies.
//!
//! There are two shapes of strategy:
//!
//! * Causal strategies ([`RuleStrategy`], [`ThresholdStrategy`]) decide on a command at each step
//!   using only the current price, time and battery state.
//! * [`LpStrategy`] solves one optimisation problem over the whole horizon before the run starts,
//!   producing a [`Schedule`] which is then replayed step by step.
//!
//! Both are driven through the same [`Decide`] interface by the simulator, so that costs are
//! accounted for identically.
use crate::battery::{BatteryModel, BatteryState};
use crate::error::{Error, Result};
use crate::price::PriceSeries;
use crate::units::Power;
use std::fmt;
use std::str::FromStr;
use strum::{EnumIter, IntoEnumIterator};
use unicase::UniCase;

pub mod lp;
pub use lp::{LpParameters, LpStrategy, Schedule};
pub mod rule;
pub use rule::{Action, Condition, Rule, RuleParameters, RuleStrategy};
pub mod threshold;
pub use threshold::{ThresholdMode, ThresholdParameters, ThresholdStrategy};

/// Something which can choose a power command for a step
pub trait Decide {
    /// Choose the power command for step `t` (positive = charge, negative = discharge).
    ///
    /// The command may be infeasible; the battery model clips it.
    fn decide(
        &self,
        t: usize,
        prices: &PriceSeries,
        state: &BatteryState,
        battery: &BatteryModel,
    ) -> Power;
}

/// The recognised kinds of strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter)]
pub enum StrategyKind {
    /// An ordered list of conditional rules
    Rule,
    /// Charge below one price, discharge above another
    Threshold,
    /// Cost-minimising schedule from a linear program
    LinearProgramming,
}

impl StrategyKind {
    /// The user-facing name of the strategy
    pub fn name(self) -> &'static str {
        match self {
            Self::Rule => "Rule-Based",
            Self::Threshold => "Threshold-Based",
            Self::LinearProgramming => "Linear-Programming",
        }
    }

    /// A name suitable for use in file names
    pub fn file_stem(self) -> String {
        self.name().to_lowercase().replace('-', "_")
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StrategyKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let name = UniCase::new(s.trim());
        Self::iter()
            .find(|kind| UniCase::new(kind.name()) == name)
            .ok_or_else(|| Error::UnknownStrategy(s.to_string()))
    }
}

/// A fully configured strategy
#[derive(Debug, Clone, PartialEq)]
pub enum Strategy {
    /// See [`RuleStrategy`]
    Rule(RuleStrategy),
    /// See [`ThresholdStrategy`]
    Threshold(ThresholdStrategy),
    /// See [`LpStrategy`]
    LinearProgramming(LpStrategy),
}

impl Strategy {
    /// The kind of this strategy
    pub fn kind(&self) -> StrategyKind {
        match self {
            Self::Rule(_) => StrategyKind::Rule,
            Self::Threshold(_) => StrategyKind::Threshold,
            Self::LinearProgramming(_) => StrategyKind::LinearProgramming,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("Rule-Based", StrategyKind::Rule)]
    #[case("rule-based", StrategyKind::Rule)]
    #[case("THRESHOLD-BASED", StrategyKind::Threshold)]
    #[case(" Linear-Programming ", StrategyKind::LinearProgramming)]
    fn test_strategy_kind_from_str(#[case] name: &str, #[case] expected: StrategyKind) {
        assert_eq!(name.parse::<StrategyKind>().unwrap(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("LP")]
    #[case("Rule Based")]
    fn test_strategy_kind_from_str_unknown(#[case] name: &str) {
        assert_eq!(
            name.parse::<StrategyKind>(),
            Err(Error::UnknownStrategy(name.to_string()))
        );
    }

    #[test]
    fn test_file_stem() {
        assert_eq!(
            StrategyKind::LinearProgramming.file_stem(),
            "linear_programming"
        );
    }
}
