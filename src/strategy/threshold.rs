//! A strategy which charges when prices are low and discharges when they are high.
use super::Decide;
use crate::battery::{BatteryModel, BatteryState};
use crate::error::{Error, Result};
use crate::price::{PriceSeries, quantile};
use crate::units::{MoneyPerEnergy, Power};
use chrono::NaiveDate;
use log::{debug, info};
use serde::Deserialize;
use serde_string_enum::DeserializeLabeledStringEnum;
use std::collections::BTreeMap;

/// How the configured thresholds are interpreted
#[derive(DeserializeLabeledStringEnum, Debug, Clone, Copy, PartialEq, Default)]
pub enum ThresholdMode {
    /// Thresholds are prices
    #[string = "absolute"]
    Absolute,
    /// Thresholds are quantiles (between 0 and 1) of the whole price series.
    ///
    /// NB: This looks ahead at the full series to fix the thresholds before the run starts.
    #[default]
    #[string = "quantile"]
    Quantile,
    /// Thresholds are quantiles of each calendar day's prices, so they follow the daily price
    /// level on a multi-day series.
    ///
    /// NB: This looks ahead at the rest of the day.
    #[string = "daily_quantile"]
    DailyQuantile,
}

/// Configuration for the threshold strategy, as read from the model file
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ThresholdParameters {
    /// How `low` and `high` are interpreted
    #[serde(default)]
    pub mode: ThresholdMode,
    /// Charge when the price is below this
    #[serde(default = "default_low")]
    pub low: f64,
    /// Discharge when the price is above this
    #[serde(default = "default_high")]
    pub high: f64,
}

fn default_low() -> f64 {
    0.15
}

fn default_high() -> f64 {
    0.85
}

impl Default for ThresholdParameters {
    fn default() -> Self {
        Self {
            mode: ThresholdMode::default(),
            low: default_low(),
            high: default_high(),
        }
    }
}

impl ThresholdParameters {
    /// Resolve the thresholds to prices for the given series and create the strategy
    pub fn build(&self, prices: &PriceSeries) -> Result<ThresholdStrategy> {
        match self.mode {
            ThresholdMode::Absolute => {
                ThresholdStrategy::new(MoneyPerEnergy(self.low), MoneyPerEnergy(self.high))
            }
            ThresholdMode::Quantile => {
                self.check_quantiles()?;
                let low = prices.quantile(self.low);
                let high = prices.quantile(self.high);
                info!("Threshold quantiles resolved to prices: low = {low}, high = {high}");
                ThresholdStrategy::new(low, high)
            }
            ThresholdMode::DailyQuantile => {
                self.check_quantiles()?;
                let thresholds: Vec<_> = prices
                    .days()
                    .into_iter()
                    .map(|(date, day_prices)| {
                        let low = quantile(day_prices, self.low);
                        let high = quantile(day_prices, self.high);
                        debug!("Thresholds for {date}: low = {low}, high = {high}");
                        (date, low, high)
                    })
                    .collect();
                info!(
                    "Threshold quantiles resolved separately for {} days",
                    thresholds.len()
                );
                ThresholdStrategy::daily(thresholds)
            }
        }
    }

    /// Check that `low` and `high` are valid quantiles
    fn check_quantiles(&self) -> Result<()> {
        for q in [self.low, self.high] {
            if !(0.0..=1.0).contains(&q) {
                return Err(Error::Configuration(format!(
                    "threshold quantiles must be between 0 and 1 (got {q})"
                )));
            }
        }

        Ok(())
    }
}

/// A pair of price thresholds
#[derive(Debug, Clone, Copy, PartialEq)]
struct Band {
    low: MoneyPerEnergy,
    high: MoneyPerEnergy,
}

impl Band {
    /// Create a new [`Band`], checking that `low` is not above `high`
    fn new(low: MoneyPerEnergy, high: MoneyPerEnergy) -> Result<Self> {
        if !low.is_finite() || !high.is_finite() {
            return Err(Error::Configuration(
                "price thresholds must be finite numbers".into(),
            ));
        }
        if low > high {
            return Err(Error::Configuration(format!(
                "low threshold ({low}) is greater than high threshold ({high})"
            )));
        }

        Ok(Self { low, high })
    }
}

/// The thresholds in force over a run
#[derive(Debug, Clone, PartialEq)]
enum Thresholds {
    /// The same thresholds for every step
    Fixed(Band),
    /// Separate thresholds for each calendar day
    Daily(BTreeMap<NaiveDate, Band>),
}

/// Charge at full power below the low threshold, discharge at full power above the high
/// threshold, hold otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdStrategy {
    thresholds: Thresholds,
}

impl ThresholdStrategy {
    /// Create a new [`ThresholdStrategy`] with the same thresholds throughout
    pub fn new(low: MoneyPerEnergy, high: MoneyPerEnergy) -> Result<Self> {
        Ok(Self {
            thresholds: Thresholds::Fixed(Band::new(low, high)?),
        })
    }

    /// Create a new [`ThresholdStrategy`] with `(date, low, high)` thresholds for each day.
    ///
    /// The battery holds on days without thresholds.
    pub fn daily<I>(thresholds: I) -> Result<Self>
    where
        I: IntoIterator<Item = (NaiveDate, MoneyPerEnergy, MoneyPerEnergy)>,
    {
        let bands = thresholds
            .into_iter()
            .map(|(date, low, high)| Ok((date, Band::new(low, high)?)))
            .collect::<Result<_>>()?;

        Ok(Self {
            thresholds: Thresholds::Daily(bands),
        })
    }

    /// The `(low, high)` thresholds which apply on `date`, if any
    pub fn thresholds(&self, date: NaiveDate) -> Option<(MoneyPerEnergy, MoneyPerEnergy)> {
        let band = match &self.thresholds {
            Thresholds::Fixed(band) => Some(band),
            Thresholds::Daily(bands) => bands.get(&date),
        };

        band.map(|band| (band.low, band.high))
    }
}

impl Decide for ThresholdStrategy {
    fn decide(
        &self,
        t: usize,
        prices: &PriceSeries,
        _state: &BatteryState,
        battery: &BatteryModel,
    ) -> Power {
        let Some((low, high)) = self.thresholds(prices.timestamp(t).date()) else {
            return Power(0.0);
        };

        let price = prices.price(t);
        let params = battery.parameters();
        if price < low {
            params.p_charge_max
        } else if price > high {
            -params.p_discharge_max
        } else {
            Power(0.0)
        }
    }
}
