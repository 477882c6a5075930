//! Code for reading price data, and optionally site demand and PV, from a CSV file.
use super::{deserialise_timestamp, input_err_msg, read_csv};
use crate::error::Error;
use crate::price::PriceSeries;
use crate::site::SiteProfile;
use crate::units::{MoneyPerEnergy, Power};
use anyhow::{Context, Result};
use chrono::{NaiveDateTime, TimeDelta};
use itertools::Itertools;
use log::info;
use serde::Deserialize;
use std::path::Path;

/// Represents a row of the price CSV file
#[derive(Debug, PartialEq, Deserialize)]
struct PriceRow {
    #[serde(deserialize_with = "deserialise_timestamp")]
    timestamp: NaiveDateTime,
    price: f64,
    #[serde(default)]
    load: Option<f64>,
    #[serde(default)]
    pv: Option<f64>,
}

/// The contents of a price file
#[derive(Debug, PartialEq)]
pub struct PriceData {
    /// The validated price series
    pub prices: PriceSeries,
    /// Site demand and PV generation, if the file has `load` or `pv` columns
    pub site: Option<SiteProfile>,
}

/// Read a price series from a CSV file with `timestamp` and `price` columns.
///
/// The file may also have `load` and `pv` columns (in MW). If either is given, it must have a
/// value in every row; a missing column counts as zero.
///
/// # Arguments
///
/// * `file_path` - Path to the CSV file
/// * `step` - The expected step duration, if known. Required if the file has only one row.
///
/// # Returns
///
/// The validated data. Problems with the data are reported as
/// [`crate::error::Error::DataValidation`].
pub fn read_price_data(file_path: &Path, step: Option<TimeDelta>) -> Result<PriceData> {
    let rows: Vec<PriceRow> = read_csv(file_path)?;
    let site = read_site_columns(&rows).with_context(|| input_err_msg(file_path))?;
    let points = rows
        .into_iter()
        .map(|row| (row.timestamp, MoneyPerEnergy(row.price)));
    let prices = PriceSeries::from_points(points, step).with_context(|| input_err_msg(file_path))?;

    info!(
        "Read {} prices at {}-minute intervals from {}",
        prices.len(),
        prices.step().num_minutes(),
        file_path.display()
    );
    if site.is_some() {
        info!("Using site demand and PV from {}", file_path.display());
    }

    Ok(PriceData { prices, site })
}

/// Collect the optional `load` and `pv` columns into a [`SiteProfile`]
fn read_site_columns(rows: &[PriceRow]) -> crate::error::Result<Option<SiteProfile>> {
    let load = read_optional_column(rows, "load", |row| row.load)?;
    let pv = read_optional_column(rows, "pv", |row| row.pv)?;
    if load.is_none() && pv.is_none() {
        return Ok(None);
    }

    let zeros = || vec![Power(0.0); rows.len()];
    SiteProfile::new(load.unwrap_or_else(zeros), pv.unwrap_or_else(zeros)).map(Some)
}

/// Read a column which is either missing from every row or present in all of them
fn read_optional_column(
    rows: &[PriceRow],
    name: &str,
    get: impl Fn(&PriceRow) -> Option<f64>,
) -> crate::error::Result<Option<Vec<Power>>> {
    if rows.iter().all(|row| get(row).is_none()) {
        return Ok(None);
    }

    rows.iter()
        .enumerate()
        .map(|(t, row)| {
            get(row)
                .map(Power)
                .ok_or_else(|| Error::DataValidation(format!("missing {name} value at step {t}")))
        })
        .try_collect()
        .map(Some)
}
