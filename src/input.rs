//! Common routines for handling input data.
use crate::error::Error;
use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use itertools::Itertools;
use serde::de::{Deserialize, DeserializeOwned, Deserializer};
use std::fs;
use std::path::Path;

pub mod prices;
pub use prices::{PriceData, read_price_data};

/// Formats accepted for timestamps in input files
const TIMESTAMP_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"];

/// Read a series of type `T`s from a CSV file.
///
/// Malformed rows and empty files are reported as [`Error::DataValidation`], with the file path
/// as context.
///
/// # Arguments
///
/// * `file_path` - Path to the CSV file
pub fn read_csv<T: DeserializeOwned>(file_path: &Path) -> Result<Vec<T>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(file_path)
        .with_context(|| input_err_msg(file_path))?;

    let records: Vec<T> = reader
        .deserialize()
        .map(|record| record.map_err(|err| Error::DataValidation(err.to_string())))
        .try_collect()
        .with_context(|| input_err_msg(file_path))?;

    if records.is_empty() {
        return Err(Error::DataValidation("CSV file cannot be empty".into()))
            .with_context(|| input_err_msg(file_path));
    }

    Ok(records)
}

/// Parse a TOML file at the specified path.
///
/// # Arguments
///
/// * `file_path` - Path to the TOML file
///
/// # Returns
///
/// * The deserialised TOML data or an error if the file could not be read or parsed.
pub fn read_toml<T: DeserializeOwned>(file_path: &Path) -> Result<T> {
    let toml_str = fs::read_to_string(file_path).with_context(|| input_err_msg(file_path))?;
    let toml_data = toml::from_str(&toml_str).with_context(|| input_err_msg(file_path))?;
    Ok(toml_data)
}

/// Format an error message to include the file path
pub fn input_err_msg<P: AsRef<Path>>(file_path: P) -> String {
    format!("Error reading {}", file_path.as_ref().display())
}

/// Parse a timestamp in one of the accepted ISO 8601 forms
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
}

/// Read a timestamp, accepting either a `T` or a space between date and time
pub fn deserialise_timestamp<'de, D>(deserialiser: D) -> Result<NaiveDateTime, D::Error>
where
    D: Deserializer<'de>,
{
    let value: String = Deserialize::deserialize(deserialiser)?;
    parse_timestamp(&value)
        .ok_or_else(|| serde::de::Error::custom(format!("Invalid timestamp: {value}")))
}
