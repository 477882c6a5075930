//! On-site demand and PV generation sharing the battery's grid connection.
//!
//! The battery sits behind the same meter as the site, so in each step the grid sees the site's
//! net load (`load - pv`) plus the battery's own exchange. PV surplus which the battery doesn't
//! absorb is exported at the market price.
use crate::error::{Error, Result};
use crate::price::PriceSeries;
use crate::units::{Dimensionless, Power};
use chrono::{Datelike, NaiveDateTime, Timelike, Weekday};
use itertools::Itertools;
use serde::Deserialize;
use std::f64::consts::PI;

/// Day of the year on which modelled PV output peaks (the June solstice)
const PV_PEAK_DAY: f64 = 173.0;

/// Fraction of weekday demand drawn at weekends
const WEEKEND_LOAD_FACTOR: f64 = 0.75;

/// Parameters of the modelled site profiles, as read from the `[site]` section of the model file.
///
/// Used only when the price data has no `load` or `pv` columns.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct SiteParameters {
    /// Installed PV capacity (zero for no PV)
    #[serde(default)]
    pub pv_capacity: Power,
    /// Peak site demand (zero for no demand)
    #[serde(default)]
    pub load_peak: Power,
}

impl SiteParameters {
    /// Whether the site has neither PV nor demand
    pub fn is_empty(&self) -> bool {
        self.pv_capacity == Power(0.0) && self.load_peak == Power(0.0)
    }

    /// Create the modelled profiles for the timestamps in `prices`
    pub fn build(&self, prices: &PriceSeries) -> Result<SiteProfile> {
        for (name, value) in [("pv_capacity", self.pv_capacity), ("load_peak", self.load_peak)] {
            if !value.is_finite() || value < Power(0.0) {
                return Err(Error::Configuration(format!(
                    "{name} must be a non-negative number (got {value})"
                )));
            }
        }

        let timestamps = (0..prices.len()).map(|t| prices.timestamp(t)).collect_vec();
        let load = timestamps
            .iter()
            .map(|&ts| self.load_peak * Dimensionless(modelled_load_factor(ts)))
            .collect();
        let pv = timestamps
            .iter()
            .map(|&ts| self.pv_capacity * Dimensionless(modelled_pv_factor(ts)))
            .collect();

        SiteProfile::new(load, pv)
    }
}

/// Hours since midnight, including the fractional part
fn hour_of_day(timestamp: NaiveDateTime) -> f64 {
    f64::from(timestamp.hour()) + f64::from(timestamp.minute()) / 60.0
}

/// Modelled PV output as a fraction of installed capacity.
///
/// Output follows a sine from 06:00 to 18:00, peaking at noon, scaled between 0.8 in midwinter and
/// 1.0 in midsummer.
fn modelled_pv_factor(timestamp: NaiveDateTime) -> f64 {
    let daylight = (PI * (hour_of_day(timestamp) - 6.0) / 12.0).sin().max(0.0);
    let day_of_year = f64::from(timestamp.ordinal());
    let seasonal = 0.9 + 0.1 * (2.0 * PI * (day_of_year - PV_PEAK_DAY) / 365.0).cos();

    daylight * seasonal
}

/// Modelled demand as a fraction of peak demand, with a morning and an evening peak
fn modelled_load_factor(timestamp: NaiveDateTime) -> f64 {
    let hour = hour_of_day(timestamp);
    let morning = (PI * (hour - 6.0) / 16.0).sin().powi(2);
    let evening = (PI * (hour - 17.0) / 10.0).sin().powi(2);
    let weekday = match timestamp.weekday() {
        Weekday::Sat | Weekday::Sun => WEEKEND_LOAD_FACTOR,
        _ => 1.0,
    };

    0.5 * (morning + evening) * weekday
}

/// Site demand and PV generation for each step of a run
#[derive(Debug, Clone, PartialEq)]
pub struct SiteProfile {
    load: Vec<Power>,
    pv: Vec<Power>,
}

impl SiteProfile {
    /// Create a new [`SiteProfile`].
    ///
    /// Both series must have the same length and contain only finite, non-negative values.
    pub fn new(load: Vec<Power>, pv: Vec<Power>) -> Result<Self> {
        if load.len() != pv.len() {
            return Err(Error::DataValidation(format!(
                "load has {} steps but PV has {}",
                load.len(),
                pv.len()
            )));
        }

        for (name, series) in [("load", &load), ("PV", &pv)] {
            if let Some((t, value)) = series
                .iter()
                .find_position(|value| !value.is_finite() || **value < Power(0.0))
            {
                return Err(Error::DataValidation(format!(
                    "{name} at step {t} must be a non-negative number (got {value})"
                )));
            }
        }

        Ok(Self { load, pv })
    }

    /// The number of steps covered
    pub fn len(&self) -> usize {
        self.load.len()
    }

    /// Whether the profile covers no steps
    pub fn is_empty(&self) -> bool {
        self.load.is_empty()
    }

    /// Site demand in step `t`
    pub fn load(&self, t: usize) -> Power {
        self.load[t]
    }

    /// PV generation in step `t`
    pub fn pv(&self, t: usize) -> Power {
        self.pv[t]
    }

    /// Power the site draws from the grid in step `t` without the battery (negative = surplus)
    pub fn net_load(&self, t: usize) -> Power {
        self.load[t] - self.pv[t]
    }

    /// Check that the profile covers exactly `n_steps` steps
    pub fn check_len(&self, n_steps: usize) -> Result<()> {
        if self.len() != n_steps {
            return Err(Error::DataValidation(format!(
                "site profile has {} steps but the price series has {n_steps}",
                self.len()
            )));
        }

        Ok(())
    }
}
