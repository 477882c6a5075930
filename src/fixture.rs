//! Fixtures for tests
use crate::battery::{BatteryModel, BatteryParameters};
use crate::price::PriceSeries;
use crate::units::{Dimensionless, Energy, MoneyPerEnergy, Power};
use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use rstest::fixture;

/// Assert that an operation fails with the given error
macro_rules! assert_error {
    ($result:expr, $expected:expr) => {
        assert_eq!($result.unwrap_err(), crate::error::Error::from($expected));
    };
}
pub(crate) use assert_error;

/// The timestamp of the first step in test price series
pub fn start_time() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2023, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

/// An hourly price series starting at [`start_time`]
pub fn hourly_prices(prices: &[f64]) -> PriceSeries {
    PriceSeries::new(
        start_time(),
        TimeDelta::hours(1),
        prices.iter().copied().map(MoneyPerEnergy).collect(),
    )
    .unwrap()
}

/// A battery with the default parameters
#[fixture]
pub fn battery() -> BatteryModel {
    BatteryModel::new(BatteryParameters::default()).unwrap()
}

/// A lossless 10 MWh battery, half full, which can fill or empty in two hours
#[fixture]
pub fn scenario_battery() -> BatteryModel {
    BatteryModel::new(BatteryParameters {
        capacity: Energy(10.0),
        soc_min: Energy(0.0),
        soc_max: Energy(10.0),
        soc_initial: Energy(5.0),
        p_charge_max: Power(5.0),
        p_discharge_max: Power(5.0),
        efficiency_charge: Dimensionless(1.0),
        efficiency_discharge: Dimensionless(1.0),
        ..BatteryParameters::default()
    })
    .unwrap()
}
