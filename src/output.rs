//! The module responsible for writing output data to disk and reading it back.
use crate::input::{input_err_msg, read_csv};
use crate::metrics::Metrics;
use crate::simulation::{BatchOutcome, RunResult, StepRecord};
use crate::strategy::StrategyKind;
use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub mod metadata;

/// The root folder in which data-specific output folders will be created
pub const OUTPUT_DIRECTORY_ROOT: &str = "batsim_results";

/// The output file name for the strategy comparison table
const COMPARISON_FILE_NAME: &str = "comparison.csv";

/// Get the default output folder for the given price file
pub fn get_output_dir(data_path: &Path) -> Result<PathBuf> {
    // Get the data set name from the file path. This ends up being convoluted because we need to
    // check for all possible errors.
    let data_path = data_path
        .canonicalize() // canonicalise in case the user has specified a relative path
        .context("Could not resolve path to price data")?;

    let data_name = data_path
        .file_stem()
        .context("Price data path has no file name")?
        .to_str()
        .context("Invalid chars in price data file name")?;

    // Construct path
    Ok([OUTPUT_DIRECTORY_ROOT, data_name].iter().collect())
}

/// Create the output directory, with parents, if it doesn't exist already.
///
/// Existing files are left alone: each run only replaces the files it writes itself.
pub fn create_output_directory(output_dir: &Path) -> Result<()> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create directory: {}", output_dir.display()))
}

/// Check whether writing the output files for `strategies` would replace existing files.
///
/// `comparison` indicates whether the comparison table will be written too.
///
/// # Returns
///
/// The paths of the files which will be replaced. This is an error if there are any and
/// `allow_overwrite` is not set.
pub fn check_existing_output(
    output_dir: &Path,
    strategies: &[StrategyKind],
    comparison: bool,
    allow_overwrite: bool,
) -> Result<Vec<PathBuf>> {
    let mut paths: Vec<_> = strategies
        .iter()
        .flat_map(|&kind| {
            [
                results_file_path(output_dir, kind),
                metrics_file_path(output_dir, kind),
            ]
        })
        .collect();
    if comparison {
        paths.push(output_dir.join(COMPARISON_FILE_NAME));
    }
    paths.retain(|path| path.exists());

    if let Some(path) = paths.first() {
        ensure!(
            allow_overwrite,
            "Output file {} already exists. \
            Please delete it or pass the --overwrite command-line option.",
            path.display()
        );
    }

    Ok(paths)
}

/// The path to the results file for the given strategy
pub fn results_file_path(output_dir: &Path, strategy: StrategyKind) -> PathBuf {
    output_dir.join(format!("{}_results.csv", strategy.file_stem()))
}

/// The path to the metrics file for the given strategy
pub fn metrics_file_path(output_dir: &Path, strategy: StrategyKind) -> PathBuf {
    output_dir.join(format!("{}_metrics.toml", strategy.file_stem()))
}

/// Write the step records of a run to a CSV file in `output_dir`
pub fn write_results(output_dir: &Path, result: &RunResult) -> Result<PathBuf> {
    let file_path = results_file_path(output_dir, result.strategy());
    let mut writer = csv::Writer::from_path(&file_path)
        .with_context(|| format!("Could not create {}", file_path.display()))?;
    for step in result.steps() {
        writer.serialize(step)?;
    }
    writer.flush()?;

    Ok(file_path)
}

/// Read back the results of a previous run of `strategy` from `output_dir`.
///
/// The total cost is recomputed from the step costs, so the result has the same shape as the one
/// which was written.
pub fn read_results(output_dir: &Path, strategy: StrategyKind) -> Result<RunResult> {
    let file_path = results_file_path(output_dir, strategy);
    ensure!(
        file_path.is_file(),
        "No saved results for {strategy} strategy: {} not found. Run the simulation first.",
        file_path.display()
    );

    let steps: Vec<StepRecord> = read_csv(&file_path)?;
    for (expected, step) in steps.iter().enumerate() {
        ensure!(
            step.t == expected,
            "{}: steps are not in order (expected step {expected}, found {})",
            input_err_msg(&file_path),
            step.t
        );
    }

    Ok(RunResult::from_steps(strategy, steps))
}

/// Write metrics for a run to a TOML file in `output_dir`
pub fn write_metrics(output_dir: &Path, strategy: StrategyKind, metrics: &Metrics) -> Result<()> {
    let file_path = metrics_file_path(output_dir, strategy);
    fs::write(&file_path, toml::to_string(metrics)?)
        .with_context(|| format!("Could not write {}", file_path.display()))?;

    Ok(())
}

/// Represents a row in the comparison CSV file.
///
/// Failed runs have an error message and no metrics.
#[derive(Serialize, Deserialize, Debug, PartialEq, Default)]
struct ComparisonRow {
    strategy: String,
    total_cost: Option<f64>,
    profit: Option<f64>,
    revenue: Option<f64>,
    grid_cost: Option<f64>,
    degradation_cost: Option<f64>,
    savings: Option<f64>,
    revenue_to_cost_ratio: Option<f64>,
    degradation_cost_share: Option<f64>,
    average_daily_profit: Option<f64>,
    profit_volatility: Option<f64>,
    full_cycles: Option<f64>,
    clipped_steps: Option<usize>,
    error: Option<String>,
}

impl ComparisonRow {
    /// Create a new [`ComparisonRow`]
    fn new(label: &str, outcome: std::result::Result<&Metrics, String>) -> Self {
        match outcome {
            Ok(metrics) => Self {
                strategy: label.to_string(),
                total_cost: Some(metrics.total_cost.value()),
                profit: Some(metrics.profit.value()),
                revenue: Some(metrics.revenue.value()),
                grid_cost: Some(metrics.grid_cost.value()),
                degradation_cost: Some(metrics.degradation_cost.value()),
                savings: Some(metrics.savings.value()),
                revenue_to_cost_ratio: metrics.revenue_to_cost_ratio,
                degradation_cost_share: metrics.degradation_cost_share,
                average_daily_profit: Some(metrics.average_daily_profit.value()),
                profit_volatility: metrics.profit_volatility.map(|v| v.value()),
                full_cycles: Some(metrics.full_cycles),
                clipped_steps: Some(metrics.clipped_steps),
                error: None,
            },
            Err(error) => Self {
                strategy: label.to_string(),
                error: Some(error),
                ..Self::default()
            },
        }
    }
}

/// Write a summary of a batch of runs to `comparison.csv` in `output_dir`.
///
/// `metrics` must contain one entry per successful outcome, in the same order.
pub fn write_comparison(
    output_dir: &Path,
    outcomes: &[BatchOutcome],
    metrics: &[Metrics],
) -> Result<()> {
    let file_path = output_dir.join(COMPARISON_FILE_NAME);
    let mut writer = csv::Writer::from_path(&file_path)
        .with_context(|| format!("Could not create {}", file_path.display()))?;

    let mut metrics = metrics.iter();
    for outcome in outcomes {
        let row = match &outcome.result {
            Ok(_) => {
                let metrics = metrics
                    .next()
                    .context("Missing metrics for successful run")?;
                ComparisonRow::new(&outcome.label, Ok(metrics))
            }
            Err(err) => ComparisonRow::new(&outcome.label, Err(err.to_string())),
        };
        writer.serialize(row)?;
    }
    writer.flush()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battery::BatteryModel;
    use crate::error::{Error, InfeasibleKind};
    use crate::fixture::{hourly_prices, scenario_battery};
    use crate::metrics::evaluate;
    use crate::simulation::Simulator;
    use crate::strategy::{Strategy, ThresholdStrategy};
    use crate::units::MoneyPerEnergy;
    use itertools::Itertools;
    use rstest::rstest;
    use std::fs::File;
    use tempfile::tempdir;

    fn threshold_run(battery: BatteryModel) -> RunResult {
        let strategy = Strategy::Threshold(
            ThresholdStrategy::new(MoneyPerEnergy(2.0), MoneyPerEnergy(4.0)).unwrap(),
        );
        Simulator::new(battery)
            .run(&hourly_prices(&[1.0, 5.0, 3.0, 5.0]), &strategy)
            .unwrap()
    }

    #[rstest]
    fn test_write_and_read_results(scenario_battery: BatteryModel) {
        let dir = tempdir().unwrap();
        let result = threshold_run(scenario_battery);

        let file_path = write_results(dir.path(), &result).unwrap();
        assert_eq!(file_path, dir.path().join("threshold_based_results.csv"));
        let read = read_results(dir.path(), StrategyKind::Threshold).unwrap();
        assert_eq!(read, result);
    }

    #[test]
    fn test_read_results_missing() {
        let dir = tempdir().unwrap();
        assert!(read_results(dir.path(), StrategyKind::Rule).is_err());
    }

    #[rstest]
    fn test_write_metrics(scenario_battery: BatteryModel) {
        let dir = tempdir().unwrap();
        let result = threshold_run(scenario_battery.clone());
        let metrics = evaluate(&result, &scenario_battery);
        write_metrics(dir.path(), StrategyKind::Threshold, &metrics).unwrap();

        let contents =
            fs::read_to_string(dir.path().join("threshold_based_metrics.toml")).unwrap();
        let table: toml::Table = toml::from_str(&contents).unwrap();
        assert_eq!(table["total_cost"].as_float(), Some(-45.0));
        assert_eq!(table["clipped_steps"].as_integer(), Some(0));
    }

    #[rstest]
    fn test_write_comparison(scenario_battery: BatteryModel) {
        let dir = tempdir().unwrap();
        let result = threshold_run(scenario_battery.clone());
        let metrics = evaluate(&result, &scenario_battery);
        let outcomes = [
            BatchOutcome {
                label: "Threshold-Based".into(),
                result: Ok(result),
            },
            BatchOutcome {
                label: "Linear-Programming".into(),
                result: Err(Error::InfeasibleSchedule(InfeasibleKind::Infeasible)),
            },
        ];
        write_comparison(dir.path(), &outcomes, &[metrics]).unwrap();

        let rows: Vec<ComparisonRow> =
            csv::Reader::from_path(dir.path().join(COMPARISON_FILE_NAME))
                .unwrap()
                .into_deserialize()
                .try_collect()
                .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].total_cost, Some(-45.0));
        assert_eq!(rows[0].revenue, Some(50.0));
        assert_eq!(rows[0].grid_cost, Some(5.0));
        assert_eq!(rows[0].revenue_to_cost_ratio, Some(10.0));
        assert_eq!(rows[0].average_daily_profit, Some(45.0));
        assert_eq!(rows[0].profit_volatility, None);
        assert_eq!(rows[0].error, None);
        assert_eq!(rows[1].total_cost, None);
        assert_eq!(rows[1].revenue, None);
        assert!(rows[1].error.as_ref().unwrap().contains("no feasible solution"));
    }

    #[test]
    fn test_create_output_directory_new_directory() {
        let temp_dir = tempdir().unwrap();
        let output_dir = temp_dir.path().join("output").join("nested");
        create_output_directory(&output_dir).unwrap();
        assert!(output_dir.is_dir());
    }

    #[test]
    fn test_create_output_directory_keeps_files() {
        let temp_dir = tempdir().unwrap();
        let output_dir = temp_dir.path().join("output");
        fs::create_dir(&output_dir).unwrap();
        File::create(output_dir.join("file.txt")).unwrap();

        create_output_directory(&output_dir).unwrap();
        assert!(output_dir.join("file.txt").is_file());
    }

    #[rstest]
    fn test_check_existing_output(scenario_battery: BatteryModel) {
        let dir = tempdir().unwrap();
        let strategies = [StrategyKind::Threshold, StrategyKind::Rule];
        assert!(
            check_existing_output(dir.path(), &strategies, true, false)
                .unwrap()
                .is_empty()
        );

        // Files for other strategies don't count
        write_results(dir.path(), &threshold_run(scenario_battery)).unwrap();
        assert!(
            check_existing_output(dir.path(), &[StrategyKind::Rule], false, false)
                .unwrap()
                .is_empty()
        );

        assert!(check_existing_output(dir.path(), &strategies, false, false).is_err());
        assert_eq!(
            check_existing_output(dir.path(), &strategies, false, true).unwrap(),
            [dir.path().join("threshold_based_results.csv")]
        );

        File::create(dir.path().join(COMPARISON_FILE_NAME)).unwrap();
        assert!(check_existing_output(dir.path(), &[], true, false).is_err());
        assert!(
            check_existing_output(dir.path(), &[], false, false)
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn test_get_output_dir() {
        let temp_dir = tempdir().unwrap();
        let data_path = temp_dir.path().join("spot_prices.csv");
        File::create(&data_path).unwrap();
        assert_eq!(
            get_output_dir(&data_path).unwrap(),
            Path::new(OUTPUT_DIRECTORY_ROOT).join("spot_prices")
        );
    }
}
