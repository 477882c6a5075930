//! Simulation of battery charge/discharge strategies against a series of energy prices.
#![warn(missing_docs)]
use std::path::PathBuf;

pub mod battery;
pub mod cli;
pub mod error;
pub mod input;
pub mod log;
pub mod metrics;
pub mod model;
pub mod output;
pub mod price;
pub mod settings;
pub mod simulation;
pub mod site;
pub mod strategy;
pub mod units;

pub use error::{Error, Result};

#[cfg(test)]
mod fixture;

/// Get the config folder for the program.
///
/// This will be *e.g.* `~/.config/batsim` on Linux.
pub fn get_batsim_config_dir() -> PathBuf {
    let Some(mut config_dir) = dirs::config_dir() else {
        // No config dir on this platform: fall back to the current folder
        return PathBuf::from("batsim");
    };
    config_dir.push("batsim");

    config_dir
}
