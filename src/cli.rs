//! The command line interface for the simulator.
use crate::battery::BatteryModel;
use crate::input::{PriceData, read_price_data};
use crate::log;
use crate::metrics::{Metrics, evaluate};
use crate::model::ModelParameters;
use crate::output::metadata::write_metadata;
use crate::output::{
    check_existing_output, create_output_directory, get_output_dir, read_results,
    write_comparison, write_metrics, write_results,
};
use crate::price::PriceSeries;
use crate::settings::Settings;
use crate::simulation::{BatchRun, Simulator, run_batch};
use crate::site::SiteProfile;
use crate::strategy::StrategyKind;
use ::log::{info, warn};
use anyhow::{Context, Result, ensure};
use clap::{Args, CommandFactory, Parser, Subcommand};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::thread;
use strum::IntoEnumIterator;

pub mod example;
use example::ExampleSubcommands;
pub mod settings;
use settings::SettingsSubcommands;

/// The command line interface for the simulator.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// The available commands.
    #[command(subcommand)]
    command: Option<Commands>,
    /// Flag to provide the CLI docs as markdown
    #[arg(long, hide = true)]
    markdown_help: bool,
}

/// Options for the run command
#[derive(Args)]
pub struct RunOpts {
    /// The strategy to simulate (Rule-Based, Threshold-Based or Linear-Programming)
    #[arg(short, long, default_value = "Linear-Programming")]
    pub strategy: StrategyKind,
    /// Path to the model file (defaults to model.toml next to the price data, if present)
    #[arg(short, long)]
    pub model: Option<PathBuf>,
    /// Directory for output files
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,
    /// Whether to replace output files left by a previous run of the same strategy
    #[arg(long)]
    pub overwrite: bool,
    /// Load the results of a previous run from the output directory instead of simulating
    #[arg(long)]
    pub no_simulate: bool,
}

/// Options for the compare command
#[derive(Args)]
pub struct CompareOpts {
    /// Path to the model file (defaults to model.toml next to the price data, if present)
    #[arg(short, long)]
    pub model: Option<PathBuf>,
    /// Directory for output files
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,
    /// Whether to replace output files left by a previous comparison
    #[arg(long)]
    pub overwrite: bool,
    /// Number of worker threads (defaults to the available parallelism)
    #[arg(short, long)]
    pub threads: Option<NonZeroUsize>,
}

/// The available commands.
#[derive(Subcommand)]
enum Commands {
    /// Simulate one strategy against a price series.
    Run {
        /// Path to the price data (CSV).
        data_path: PathBuf,
        /// Other run options
        #[command(flatten)]
        opts: RunOpts,
    },
    /// Simulate every strategy against a price series and compare the results.
    Compare {
        /// Path to the price data (CSV).
        data_path: PathBuf,
        /// Other compare options
        #[command(flatten)]
        opts: CompareOpts,
    },
    /// Validate price data and model parameters.
    Validate {
        /// Path to the price data (CSV).
        data_path: PathBuf,
        /// Path to the model file (defaults to model.toml next to the price data, if present)
        #[arg(short, long)]
        model: Option<PathBuf>,
    },
    /// Manage example data sets.
    Example {
        /// The available subcommands for managing examples.
        #[command(subcommand)]
        subcommand: ExampleSubcommands,
    },
    /// Manage settings file.
    Settings {
        /// The subcommands for managing the settings file.
        #[command(subcommand)]
        subcommand: SettingsSubcommands,
    },
}

impl Commands {
    /// Execute the supplied CLI command
    fn execute(self) -> Result<()> {
        match self {
            Self::Run { data_path, opts } => {
                handle_run_command(&data_path, &opts, None).map(|_| ())
            }
            Self::Compare { data_path, opts } => {
                handle_compare_command(&data_path, &opts, None).map(|_| ())
            }
            Self::Validate { data_path, model } => {
                handle_validate_command(&data_path, model.as_deref(), None)
            }
            Self::Example { subcommand } => subcommand.execute(),
            Self::Settings { subcommand } => subcommand.execute(),
        }
    }
}

/// Parse CLI arguments and start the program
pub fn run_cli() -> Result<()> {
    let cli = Cli::parse();

    // Invoked as: `$ batsim --markdown-help`
    if cli.markdown_help {
        clap_markdown::print_help_markdown::<Cli>();
        return Ok(());
    }

    let Some(command) = cli.command else {
        // Output program help
        let help_str = Cli::command().render_long_help().to_string();
        println!("{help_str}");
        return Ok(());
    };

    command.execute()
}

/// The inputs shared by all commands which simulate
struct Inputs {
    model: ModelParameters,
    model_path: Option<PathBuf>,
    prices: PriceSeries,
    site: Option<SiteProfile>,
    battery: BatteryModel,
}

impl Inputs {
    /// A simulator for the configured battery and site
    fn simulator(&self) -> Simulator {
        let simulator = Simulator::new(self.battery.clone());
        match &self.site {
            Some(site) => simulator.with_site(site.clone()),
            None => simulator,
        }
    }
}

/// Load and validate the model parameters and price data
fn load_inputs(data_path: &Path, model_path: Option<&Path>) -> Result<Inputs> {
    let (model, model_path) = ModelParameters::for_data_file(data_path, model_path)
        .context("Failed to load model parameters.")?;
    if let Some(path) = &model_path {
        info!("Loaded model parameters from {}", path.display());
    }

    let battery = model
        .battery_model()
        .context("Invalid battery parameters.")?;
    let PriceData { prices, site } =
        read_price_data(data_path, model.time_step()).context("Failed to load price data.")?;
    if site.is_some() && !model.site.is_empty() {
        warn!("Using site demand and PV from the price data; the [site] parameters are ignored");
    }
    let site = model
        .site_profile(&prices, site)
        .context("Invalid site parameters.")?;

    Ok(Inputs {
        model,
        model_path,
        prices,
        site,
        battery,
    })
}

/// Use the provided settings or load them from the settings file
fn load_settings(settings: Option<Settings>) -> Result<Settings> {
    match settings {
        Some(settings) => Ok(settings),
        None => Settings::load().context("Failed to load settings."),
    }
}

/// Initialise the program logger, unless this has already been done
fn init_logger(settings: &Settings, log_file_path: Option<&Path>) -> Result<()> {
    if log::is_logger_initialised() {
        return Ok(());
    }

    log::init(Some(&settings.log_level), log_file_path).context("Failed to initialise logging.")
}

/// Resolve the output folder, using the default for the data file if none was given
fn resolve_output_dir(data_path: &Path, output_dir: Option<&Path>) -> Result<PathBuf> {
    match output_dir {
        Some(path) => Ok(path.to_path_buf()),
        None => get_output_dir(data_path),
    }
}

/// Create the output folder and start logging to it.
///
/// Nothing is deleted. If the output files for `strategies` (and the comparison table, if
/// `comparison` is set) already exist, this fails unless `overwrite` is set, in which case those
/// files alone are replaced once the run has finished.
fn prepare_output_dir(
    output_path: &Path,
    strategies: &[StrategyKind],
    comparison: bool,
    overwrite: bool,
    settings: &Settings,
) -> Result<()> {
    let existing = check_existing_output(output_path, strategies, comparison, overwrite)?;
    create_output_directory(output_path)?;

    init_logger(settings, Some(output_path))?;
    info!("Output folder: {}", output_path.display());

    // NB: We have to wait until the logger is initialised to display this warning
    for path in existing {
        warn!("{} will be overwritten", path.display());
    }

    Ok(())
}

/// Handle the `run` command.
///
/// # Returns
///
/// The metrics for the run.
pub fn handle_run_command(
    data_path: &Path,
    opts: &RunOpts,
    settings: Option<Settings>,
) -> Result<Metrics> {
    let settings = load_settings(settings)?;
    let output_path = resolve_output_dir(data_path, opts.output_dir.as_deref())?;

    if opts.no_simulate {
        // Logging to the console only, as the output folder is left untouched
        init_logger(&settings, None)?;
        return load_saved_run(data_path, &output_path, opts);
    }

    prepare_output_dir(
        &output_path,
        &[opts.strategy],
        false,
        opts.overwrite || settings.overwrite,
        &settings,
    )?;
    let inputs = load_inputs(data_path, opts.model.as_deref())?;
    let strategy = inputs
        .model
        .strategy(
            opts.strategy,
            &inputs.prices,
            Some(settings.lp_time_limit_secs),
        )
        .context("Invalid strategy parameters.")?;

    info!("Running {} strategy", opts.strategy);
    let result = inputs
        .simulator()
        .run(&inputs.prices, &strategy)
        .with_context(|| format!("{} run failed.", opts.strategy))?;
    let metrics = evaluate(&result, &inputs.battery);

    write_results(&output_path, &result)?;
    write_metrics(&output_path, opts.strategy, &metrics)?;
    write_metadata(
        &output_path,
        data_path,
        inputs.model_path.as_deref(),
        vec![opts.strategy.to_string()],
    )
    .context("Failed to save metadata.")?;

    info!("Simulation complete!\n{metrics}");

    Ok(metrics)
}

/// Evaluate the saved results of a previous run
fn load_saved_run(data_path: &Path, output_path: &Path, opts: &RunOpts) -> Result<Metrics> {
    let (model, _) = ModelParameters::for_data_file(data_path, opts.model.as_deref())
        .context("Failed to load model parameters.")?;
    let battery = model
        .battery_model()
        .context("Invalid battery parameters.")?;

    let result = read_results(output_path, opts.strategy)?;
    info!(
        "Loaded {} steps of {} results from {}",
        result.len(),
        opts.strategy,
        output_path.display()
    );
    let metrics = evaluate(&result, &battery);
    info!("{metrics}");

    Ok(metrics)
}

/// Handle the `compare` command.
///
/// A failing strategy does not stop the others from running, but the command fails afterwards.
///
/// # Returns
///
/// The metrics for each strategy which ran successfully.
pub fn handle_compare_command(
    data_path: &Path,
    opts: &CompareOpts,
    settings: Option<Settings>,
) -> Result<Vec<(StrategyKind, Metrics)>> {
    let settings = load_settings(settings)?;
    let output_path = resolve_output_dir(data_path, opts.output_dir.as_deref())?;
    let all_kinds: Vec<_> = StrategyKind::iter().collect();
    prepare_output_dir(
        &output_path,
        &all_kinds,
        true,
        opts.overwrite || settings.overwrite,
        &settings,
    )?;
    let inputs = load_inputs(data_path, opts.model.as_deref())?;

    let runs = all_kinds
        .iter()
        .map(|&kind| {
            let strategy = inputs
                .model
                .strategy(kind, &inputs.prices, Some(settings.lp_time_limit_secs))
                .with_context(|| format!("Invalid parameters for {kind} strategy."))?;
            Ok(BatchRun {
                label: kind.to_string(),
                strategy,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let threads = opts.threads.unwrap_or_else(|| {
        thread::available_parallelism().unwrap_or(NonZeroUsize::MIN)
    });
    let outcomes = run_batch(&inputs.prices, &inputs.simulator(), runs, threads);

    let mut all_metrics = Vec::new();
    let mut n_failed = 0;
    for outcome in &outcomes {
        match &outcome.result {
            Ok(result) => {
                let metrics = evaluate(result, &inputs.battery);
                write_results(&output_path, result)?;
                write_metrics(&output_path, result.strategy(), &metrics)?;
                info!("{}:\n{metrics}", outcome.label);
                all_metrics.push((result.strategy(), metrics));
            }
            Err(_) => n_failed += 1,
        }
    }

    let metrics: Vec<_> = all_metrics.iter().map(|(_, m)| m.clone()).collect();
    write_comparison(&output_path, &outcomes, &metrics)?;
    write_metadata(
        &output_path,
        data_path,
        inputs.model_path.as_deref(),
        outcomes.iter().map(|outcome| outcome.label.clone()).collect(),
    )
    .context("Failed to save metadata.")?;

    ensure!(
        n_failed == 0,
        "{n_failed} of {} strategies failed. See comparison.csv for details.",
        outcomes.len()
    );
    info!("Comparison complete!");

    Ok(all_metrics)
}

/// Handle the `validate` command.
pub fn handle_validate_command(
    data_path: &Path,
    model_path: Option<&Path>,
    settings: Option<Settings>,
) -> Result<()> {
    let settings = load_settings(settings)?;

    // Initialise program logger (we won't save log files when running the validate command)
    init_logger(&settings, None)?;

    // Load/validate the inputs, including the parameters of every strategy
    let inputs = load_inputs(data_path, model_path).context("Failed to validate inputs.")?;
    for kind in StrategyKind::iter() {
        inputs
            .model
            .strategy(kind, &inputs.prices, Some(settings.lp_time_limit_secs))
            .with_context(|| format!("Invalid parameters for {kind} strategy."))?;
    }
    info!("Validation successful!");

    Ok(())
}
