//! A strategy defined by an ordered list of conditional rules.
use super::Decide;
use crate::battery::{BatteryModel, BatteryState};
use crate::error::{Error, Result};
use crate::price::PriceSeries;
use crate::units::{MoneyPerEnergy, Power};
use chrono::Timelike;
use serde::Deserialize;
use serde_string_enum::DeserializeLabeledStringEnum;

/// What the battery should do when a rule matches
#[derive(DeserializeLabeledStringEnum, Debug, Clone, Copy, PartialEq)]
pub enum Action {
    /// Charge at the maximum charging power
    #[string = "charge"]
    Charge,
    /// Discharge at the maximum discharging power
    #[string = "discharge"]
    Discharge,
    /// Do nothing
    #[string = "hold"]
    Hold,
}

impl Action {
    /// The power command corresponding to this action
    fn power(self, battery: &BatteryModel) -> Power {
        let params = battery.parameters();
        match self {
            Self::Charge => params.p_charge_max,
            Self::Discharge => -params.p_discharge_max,
            Self::Hold => Power(0.0),
        }
    }
}

/// The condition under which a rule applies
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "when", rename_all = "snake_case")]
pub enum Condition {
    /// Always matches
    Always,
    /// The current price is strictly below `price`
    PriceBelow {
        /// The price limit
        price: MoneyPerEnergy,
    },
    /// The current price is strictly above `price`
    PriceAbove {
        /// The price limit
        price: MoneyPerEnergy,
    },
    /// The state of charge is strictly below `fraction` of capacity
    SocBelow {
        /// Fraction of capacity
        fraction: f64,
    },
    /// The state of charge is strictly above `fraction` of capacity
    SocAbove {
        /// Fraction of capacity
        fraction: f64,
    },
    /// The step starts in the hour range `[start, end)`.
    ///
    /// If `start > end` the range wraps around midnight.
    HourBetween {
        /// First hour included
        start: u32,
        /// First hour excluded
        end: u32,
    },
}

impl Condition {
    /// Whether the condition holds at step `t`
    fn matches(
        &self,
        t: usize,
        prices: &PriceSeries,
        state: &BatteryState,
        battery: &BatteryModel,
    ) -> bool {
        let soc_fraction = || (state.soc / battery.parameters().capacity).value();
        match *self {
            Self::Always => true,
            Self::PriceBelow { price } => prices.price(t) < price,
            Self::PriceAbove { price } => prices.price(t) > price,
            Self::SocBelow { fraction } => soc_fraction() < fraction,
            Self::SocAbove { fraction } => soc_fraction() > fraction,
            Self::HourBetween { start, end } => {
                let hour = prices.timestamp(t).hour();
                if start <= end {
                    (start..end).contains(&hour)
                } else {
                    hour >= start || hour < end
                }
            }
        }
    }

    /// Check that the condition's parameters make sense
    fn validate(&self) -> Result<()> {
        match *self {
            Self::Always => Ok(()),
            Self::PriceBelow { price } | Self::PriceAbove { price } => {
                if price.is_finite() {
                    Ok(())
                } else {
                    Err(Error::Configuration(
                        "rule price must be a finite number".into(),
                    ))
                }
            }
            Self::SocBelow { fraction } | Self::SocAbove { fraction } => {
                if (0.0..=1.0).contains(&fraction) {
                    Ok(())
                } else {
                    Err(Error::Configuration(format!(
                        "rule SOC fraction must be between 0 and 1 (got {fraction})"
                    )))
                }
            }
            Self::HourBetween { start, end } => {
                if start < 24 && end <= 24 {
                    Ok(())
                } else {
                    Err(Error::Configuration(format!(
                        "invalid rule hour range {start}..{end}"
                    )))
                }
            }
        }
    }
}

/// A condition paired with the action to take when it holds
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Rule {
    /// When the rule applies
    #[serde(flatten)]
    pub condition: Condition,
    /// What to do
    pub action: Action,
}

/// Configuration for the rule-based strategy, as read from the model file
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RuleParameters {
    /// Rules in order of precedence
    #[serde(default = "default_rules")]
    pub rules: Vec<Rule>,
}

impl Default for RuleParameters {
    fn default() -> Self {
        Self {
            rules: default_rules(),
        }
    }
}

/// Charge around midday and discharge in the evening peak
fn default_rules() -> Vec<Rule> {
    vec![
        Rule {
            condition: Condition::HourBetween { start: 12, end: 14 },
            action: Action::Charge,
        },
        Rule {
            condition: Condition::HourBetween { start: 19, end: 21 },
            action: Action::Discharge,
        },
    ]
}

impl RuleParameters {
    /// Validate the rules and create the strategy
    pub fn build(&self) -> Result<RuleStrategy> {
        RuleStrategy::new(self.rules.clone())
    }
}

/// Evaluates rules in declaration order; the first matching rule wins and no match means hold.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleStrategy {
    rules: Vec<Rule>,
}

impl RuleStrategy {
    /// Create a new [`RuleStrategy`]
    pub fn new(rules: Vec<Rule>) -> Result<Self> {
        for rule in &rules {
            rule.condition.validate()?;
        }

        Ok(Self { rules })
    }
}

impl Decide for RuleStrategy {
    fn decide(
        &self,
        t: usize,
        prices: &PriceSeries,
        state: &BatteryState,
        battery: &BatteryModel,
    ) -> Power {
        self.rules
            .iter()
            .find(|rule| rule.condition.matches(t, prices, state, battery))
            .map_or(Power(0.0), |rule| rule.action.power(battery))
    }
}
