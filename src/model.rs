//! Defines the `ModelParameters` struct, which represents the contents of `model.toml`.
use crate::battery::{BatteryModel, BatteryParameters};
use crate::error;
use crate::input::{input_err_msg, read_toml};
use crate::price::PriceSeries;
use crate::site::{SiteParameters, SiteProfile};
use crate::strategy::{LpParameters, RuleParameters, Strategy, StrategyKind, ThresholdParameters};
use crate::units::{Dimensionless, Energy, MoneyPerEnergy, Power};
use anyhow::{Context, Result, ensure};
use chrono::TimeDelta;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// The name of the model file
pub const MODEL_PARAMETERS_FILE_NAME: &str = "model.toml";

/// Represents the contents of the entire model file.
///
/// Every section is optional; missing values take their defaults.
#[derive(Debug, Default, Deserialize, PartialEq)]
pub struct ModelParameters {
    /// The duration of one step in minutes.
    ///
    /// Must agree with the price data if given. Required if the data has only one row.
    pub time_step_minutes: Option<u32>,
    /// The battery's physical and economic parameters
    #[serde(default)]
    pub battery: BatteryConfig,
    /// Options for the threshold strategy
    #[serde(default)]
    pub threshold: ThresholdParameters,
    /// Options for the rule-based strategy
    #[serde(default)]
    pub rule: RuleParameters,
    /// Options for the LP strategy
    #[serde(default)]
    pub lp: LpParameters,
    /// Modelled site demand and PV, used if the price data has none
    #[serde(default)]
    pub site: SiteParameters,
}

/// The `[battery]` section of the model file.
///
/// `soc_max` defaults to the capacity and `soc_initial` to half of the capacity.
#[derive(Debug, Default, Deserialize, PartialEq)]
pub struct BatteryConfig {
    capacity: Option<Energy>,
    soc_min: Option<Energy>,
    soc_max: Option<Energy>,
    soc_initial: Option<Energy>,
    p_charge_max: Option<Power>,
    p_discharge_max: Option<Power>,
    efficiency_charge: Option<Dimensionless>,
    efficiency_discharge: Option<Dimensionless>,
    grid_fee: Option<MoneyPerEnergy>,
    degradation_cost: Option<MoneyPerEnergy>,
}

impl BatteryConfig {
    /// Fill in defaults for any missing values
    pub fn parameters(&self) -> BatteryParameters {
        let defaults = BatteryParameters::default();
        let capacity = self.capacity.unwrap_or(defaults.capacity);

        BatteryParameters {
            capacity,
            soc_min: self.soc_min.unwrap_or(defaults.soc_min),
            soc_max: self.soc_max.unwrap_or(capacity),
            soc_initial: self
                .soc_initial
                .unwrap_or(capacity * Dimensionless(0.5)),
            p_charge_max: self.p_charge_max.unwrap_or(defaults.p_charge_max),
            p_discharge_max: self.p_discharge_max.unwrap_or(defaults.p_discharge_max),
            efficiency_charge: self.efficiency_charge.unwrap_or(defaults.efficiency_charge),
            efficiency_discharge: self
                .efficiency_discharge
                .unwrap_or(defaults.efficiency_discharge),
            grid_fee: self.grid_fee.unwrap_or(defaults.grid_fee),
            degradation_cost: self.degradation_cost.unwrap_or(defaults.degradation_cost),
        }
    }
}

/// Check that the `time_step_minutes` parameter is valid
fn check_time_step_minutes(value: Option<u32>) -> Result<()> {
    if let Some(value) = value {
        ensure!(value > 0, "time_step_minutes must be greater than zero");
    }

    Ok(())
}

impl ModelParameters {
    /// Read a model file.
    ///
    /// # Arguments
    ///
    /// * `file_path` - Path to the model file
    ///
    /// # Returns
    ///
    /// The model file contents as a [`ModelParameters`] struct or an error if the file is invalid
    pub fn from_path(file_path: &Path) -> Result<ModelParameters> {
        let model_params: ModelParameters = read_toml(file_path)?;

        model_params
            .validate()
            .with_context(|| input_err_msg(file_path))?;

        Ok(model_params)
    }

    /// Load the model parameters to use with the given price file.
    ///
    /// If `model_path` is given it is read. Otherwise, a `model.toml` in the same folder as the
    /// price data is used if present, and failing that, the default parameters.
    ///
    /// # Returns
    ///
    /// The parameters and the path to the file they were read from, if any.
    pub fn for_data_file(
        data_path: &Path,
        model_path: Option<&Path>,
    ) -> Result<(ModelParameters, Option<PathBuf>)> {
        let file_path = match model_path {
            Some(path) => Some(path.to_path_buf()),
            None => data_path
                .parent()
                .map(|dir| dir.join(MODEL_PARAMETERS_FILE_NAME))
                .filter(|path| path.is_file()),
        };

        match file_path {
            Some(path) => Ok((Self::from_path(&path)?, Some(path))),
            None => Ok((ModelParameters::default(), None)),
        }
    }

    /// Validate parameters after reading in file
    fn validate(&self) -> Result<()> {
        check_time_step_minutes(self.time_step_minutes)?;

        Ok(())
    }

    /// The configured step duration, if any
    pub fn time_step(&self) -> Option<TimeDelta> {
        self.time_step_minutes
            .map(|minutes| TimeDelta::minutes(i64::from(minutes)))
    }

    /// Create the battery model, checking that its parameters are consistent
    pub fn battery_model(&self) -> error::Result<BatteryModel> {
        BatteryModel::new(self.battery.parameters())
    }

    /// Choose the site profile for a run.
    ///
    /// A profile read with the price data takes precedence. Otherwise, the profile is modelled
    /// from the `[site]` section, if it describes any PV or demand.
    pub fn site_profile(
        &self,
        prices: &PriceSeries,
        from_data: Option<SiteProfile>,
    ) -> error::Result<Option<SiteProfile>> {
        match from_data {
            Some(site) => Ok(Some(site)),
            None if self.site.is_empty() => Ok(None),
            None => self.site.build(prices).map(Some),
        }
    }

    /// Create a configured strategy of the given kind.
    ///
    /// # Arguments
    ///
    /// * `kind` - Which strategy to create
    /// * `prices` - The price series (needed to resolve quantile thresholds)
    /// * `default_time_limit` - LP time limit in seconds, if none is configured in this file
    pub fn strategy(
        &self,
        kind: StrategyKind,
        prices: &PriceSeries,
        default_time_limit: Option<f64>,
    ) -> error::Result<Strategy> {
        Ok(match kind {
            StrategyKind::Rule => Strategy::Rule(self.rule.build()?),
            StrategyKind::Threshold => Strategy::Threshold(self.threshold.build(prices)?),
            StrategyKind::LinearProgramming => {
                Strategy::LinearProgramming(self.lp.build(default_time_limit)?)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::fixture::hourly_prices;
    use crate::strategy::ThresholdMode;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_battery_defaults() {
        let params = BatteryConfig::default().parameters();
        assert_eq!(params, BatteryParameters::default());

        let config: BatteryConfig = toml::from_str("capacity = 10.0").unwrap();
        let params = config.parameters();
        assert_eq!(params.soc_max, Energy(10.0));
        assert_eq!(params.soc_initial, Energy(5.0));
        assert_eq!(params.p_charge_max, Power(0.5));
    }

    #[test]
    fn test_model_params_from_path() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join(MODEL_PARAMETERS_FILE_NAME);
        {
            let mut file = File::create(&file_path).unwrap();
            writeln!(
                file,
                "time_step_minutes = 30

[battery]
capacity = 2.0
p_charge_max = 1.0

[threshold]
mode = \"absolute\"
low = 10.0
high = 50.0

[lp]
terminal_soc = true"
            )
            .unwrap();
        }

        let model_params = ModelParameters::from_path(&file_path).unwrap();
        assert_eq!(model_params.time_step(), Some(TimeDelta::minutes(30)));
        assert_eq!(model_params.battery.parameters().capacity, Energy(2.0));
        assert_eq!(model_params.threshold.mode, ThresholdMode::Absolute);
        assert!(model_params.lp.terminal_soc);
        assert_eq!(model_params.rule, RuleParameters::default());
    }

    #[test]
    fn test_model_params_zero_time_step() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join(MODEL_PARAMETERS_FILE_NAME);
        fs_write(&file_path, "time_step_minutes = 0");
        assert!(ModelParameters::from_path(&file_path).is_err());
    }

    #[test]
    fn test_for_data_file() {
        let dir = tempdir().unwrap();
        let data_path = dir.path().join("prices.csv");

        // No model file
        let (params, path) = ModelParameters::for_data_file(&data_path, None).unwrap();
        assert_eq!(params, ModelParameters::default());
        assert!(path.is_none());

        // Model file next to data
        let model_path = dir.path().join(MODEL_PARAMETERS_FILE_NAME);
        fs_write(&model_path, "time_step_minutes = 15");
        let (params, path) = ModelParameters::for_data_file(&data_path, None).unwrap();
        assert_eq!(params.time_step_minutes, Some(15));
        assert_eq!(path, Some(model_path));

        // Explicit model file which doesn't exist
        let missing = dir.path().join("missing.toml");
        assert!(ModelParameters::for_data_file(&data_path, Some(&missing)).is_err());
    }

    #[test]
    fn test_battery_model_invalid() {
        let params: ModelParameters =
            toml::from_str("[battery]\ncapacity = 10.0\nsoc_initial = 12.0").unwrap();
        assert!(matches!(
            params.battery_model(),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_site_profile() {
        let prices = hourly_prices(&[1.0, 2.0]);
        let params = ModelParameters::default();
        assert_eq!(params.site_profile(&prices, None).unwrap(), None);

        let params: ModelParameters = toml::from_str("[site]\nload_peak = 4.0").unwrap();
        let modelled = params.site_profile(&prices, None).unwrap().unwrap();
        assert_eq!(modelled.len(), 2);
        assert!(modelled.load(0) > Power(0.0));
        assert_eq!(modelled.pv(0), Power(0.0));

        // Data from the price file wins
        let from_data = SiteProfile::new(vec![Power(1.0); 2], vec![Power(0.0); 2]).unwrap();
        let site = params
            .site_profile(&prices, Some(from_data.clone()))
            .unwrap();
        assert_eq!(site, Some(from_data));
    }

    #[test]
    fn test_strategy() {
        let params = ModelParameters::default();
        let prices = hourly_prices(&[1.0, 2.0, 3.0]);
        for kind in [
            StrategyKind::Rule,
            StrategyKind::Threshold,
            StrategyKind::LinearProgramming,
        ] {
            assert_eq!(params.strategy(kind, &prices, None).unwrap().kind(), kind);
        }
    }

    fn fs_write(path: &Path, contents: &str) {
        std::fs::write(path, contents).unwrap();
    }
}
