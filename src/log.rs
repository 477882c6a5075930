//! Initialisation of the program logger.
//!
//! Messages go to the console (coloured when attached to a terminal) and, for runs which produce
//! output, to info and error log files in the output folder. The level can be set in the settings
//! file or overridden with an environment variable.
use anyhow::{Context, Result, bail};
use chrono::Local;
use fern::colors::{Color, ColoredLevelConfig};
use fern::{Dispatch, FormatCallback};
use log::{LevelFilter, Record};
use std::env;
use std::fmt::{Arguments, Display};
use std::fs::{File, OpenOptions};
use std::io::IsTerminal;
use std::path::Path;
use std::sync::OnceLock;

/// A flag indicating whether the logger has been initialised
static LOGGER_INIT: OnceLock<()> = OnceLock::new();

/// The environment variable which overrides the log level
pub const LOG_LEVEL_ENV_VAR: &str = "BATSIM_LOG_LEVEL";

/// The default log level for the program.
///
/// Used as a fallback if the user hasn't specified something else with the `BATSIM_LOG_LEVEL`
/// environment variable or the settings.toml file.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// The file name for the log file containing messages about the ordinary operation of the program
pub const LOG_INFO_FILE_NAME: &str = "batsim_info.log";

/// The file name for the log file containing warnings and error messages
pub const LOG_ERROR_FILE_NAME: &str = "batsim_error.log";

/// Timestamp format for console messages
const CONSOLE_TIME_FORMAT: &str = "%H:%M:%S";

/// Timestamp format for log files, which may outlive the run
const FILE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Whether the program logger has been initialised
pub fn is_logger_initialised() -> bool {
    LOGGER_INIT.get().is_some()
}

/// Initialise the program logger.
///
/// The level is taken from the `BATSIM_LOG_LEVEL` environment variable if set, otherwise from
/// `settings.toml`, otherwise [`DEFAULT_LOG_LEVEL`]. Recognised levels are `off`, `error`, `warn`,
/// `info`, `debug` and `trace`.
///
/// # Arguments
///
/// * `log_level_from_settings`: The log level specified in `settings.toml`
/// * `log_file_path`: The folder in which to create log files, if any
pub fn init(log_level_from_settings: Option<&str>, log_file_path: Option<&Path>) -> Result<()> {
    let log_level = resolve_log_level(
        env::var(LOG_LEVEL_ENV_VAR).ok().as_deref(),
        log_level_from_settings,
    )?;

    if is_logger_initialised() {
        bail!("Logger already initialised");
    }

    let mut dispatch = Dispatch::new().chain(console_dispatch(log_level));
    if let Some(dir) = log_file_path {
        dispatch = dispatch.chain(file_dispatch(log_level, dir)?);
    }

    dispatch.apply().context("Logger already initialised")?;
    let _ = LOGGER_INIT.set(());

    Ok(())
}

/// Pick the log level, preferring the environment variable over the settings file
fn resolve_log_level(from_env: Option<&str>, from_settings: Option<&str>) -> Result<LevelFilter> {
    parse_log_level(from_env.or(from_settings).unwrap_or(DEFAULT_LOG_LEVEL))
}

/// Convert a log level name (case-insensitive) to a [`LevelFilter`]
fn parse_log_level(log_level: &str) -> Result<LevelFilter> {
    Ok(match log_level.to_lowercase().as_str() {
        "off" => LevelFilter::Off,
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "info" => LevelFilter::Info,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        unknown => bail!("Unknown log level: {unknown}"),
    })
}

/// Messages for stdout (below warning) and stderr (warnings and errors)
fn console_dispatch(log_level: LevelFilter) -> Dispatch {
    let colours = ColoredLevelConfig::new()
        .error(Color::Red)
        .warn(Color::Yellow)
        .info(Color::Green)
        .debug(Color::Blue)
        .trace(Color::Magenta);
    let stdout_colour = std::io::stdout().is_terminal().then_some(colours);
    let stderr_colour = std::io::stderr().is_terminal().then_some(colours);

    Dispatch::new()
        .chain(
            Dispatch::new()
                .filter(|metadata| metadata.level() > LevelFilter::Warn)
                .format(move |out, message, record| {
                    write_console(out, message, record, stdout_colour.as_ref());
                })
                .level(log_level)
                .chain(std::io::stdout()),
        )
        .chain(
            Dispatch::new()
                .format(move |out, message, record| {
                    write_console(out, message, record, stderr_colour.as_ref());
                })
                .level(log_level.min(LevelFilter::Warn))
                .chain(std::io::stderr()),
        )
}

/// Messages for the info and error log files in `dir`.
///
/// The info file always records at least info-level messages, whatever the console level.
fn file_dispatch(log_level: LevelFilter, dir: &Path) -> Result<Dispatch> {
    let info_file = open_log_file(&dir.join(LOG_INFO_FILE_NAME))?;
    let error_file = open_log_file(&dir.join(LOG_ERROR_FILE_NAME))?;

    Ok(Dispatch::new()
        .format(write_file)
        .chain(
            Dispatch::new()
                .filter(|metadata| metadata.level() > LevelFilter::Warn)
                .level(log_level.max(LevelFilter::Info))
                .chain(info_file),
        )
        .chain(Dispatch::new().level(LevelFilter::Warn).chain(error_file)))
}

/// Create a log file, replacing any left by an earlier run
fn open_log_file(file_path: &Path) -> Result<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(file_path)
        .with_context(|| format!("Could not create log file {}", file_path.display()))
}

/// The module path of a message, without the crate name
fn short_target(target: &str) -> &str {
    target
        .strip_prefix(concat!(env!("CARGO_PKG_NAME"), "::"))
        .unwrap_or(target)
}

/// Format a single log line
fn format_line(
    out: FormatCallback,
    time_format: &str,
    level: impl Display,
    record: &Record,
    message: &Arguments,
) {
    let timestamp = Local::now().format(time_format);
    let target = short_target(record.target());
    out.finish(format_args!("[{timestamp} {level} {target}] {message}"));
}

/// Write a console message, coloured if `colours` is given
fn write_console(
    out: FormatCallback,
    message: &Arguments,
    record: &Record,
    colours: Option<&ColoredLevelConfig>,
) {
    match colours {
        Some(colours) => format_line(
            out,
            CONSOLE_TIME_FORMAT,
            colours.color(record.level()),
            record,
            message,
        ),
        None => format_line(out, CONSOLE_TIME_FORMAT, record.level(), record, message),
    }
}

/// Write a log file message
fn write_file(out: FormatCallback, message: &Arguments, record: &Record) {
    format_line(out, FILE_TIME_FORMAT, record.level(), record, message);
}
