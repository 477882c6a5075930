//! Code for working with time series of energy prices.
use crate::error::{Error, Result};
use crate::units::{Hours, MoneyPerEnergy};
use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use itertools::Itertools;

/// An ordered, gap-free sequence of prices with a fixed step duration.
///
/// Step `t` covers the interval starting at `timestamp(t)` and lasting `step_hours()`.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceSeries {
    timestamps: Vec<NaiveDateTime>,
    prices: Vec<MoneyPerEnergy>,
    step: TimeDelta,
}

impl PriceSeries {
    /// Create a series starting at `start` with one price per step.
    pub fn new(start: NaiveDateTime, step: TimeDelta, prices: Vec<MoneyPerEnergy>) -> Result<Self> {
        check_step(step)?;
        let timestamps = (0..prices.len())
            .map(|t| {
                let offset = i32::try_from(t)
                    .ok()
                    .and_then(|t| step.checked_mul(t))
                    .ok_or_else(|| Error::DataValidation("time series is too long".into()))?;
                start
                    .checked_add_signed(offset)
                    .ok_or_else(|| Error::DataValidation("timestamp out of range".into()))
            })
            .try_collect()?;

        Self::from_parts(timestamps, prices, step)
    }

    /// Create a series from `(timestamp, price)` pairs.
    ///
    /// The step duration is inferred from the data. If `step` is given, it must agree with the
    /// data, and it is required when there is only one point.
    pub fn from_points<I>(points: I, step: Option<TimeDelta>) -> Result<Self>
    where
        I: IntoIterator<Item = (NaiveDateTime, MoneyPerEnergy)>,
    {
        let (timestamps, prices): (Vec<_>, Vec<_>) = points.into_iter().unzip();

        let step = match (timestamps.first(), timestamps.get(1), step) {
            (_, Some(second), Some(step)) => {
                let inferred = *second - timestamps[0];
                if inferred != step {
                    return Err(Error::DataValidation(format!(
                        "data has a time step of {} minutes but {} minutes was expected",
                        inferred.num_minutes(),
                        step.num_minutes()
                    )));
                }
                step
            }
            (_, Some(second), None) => *second - timestamps[0],
            (Some(_), None, Some(step)) => step,
            (Some(_), None, None) => {
                return Err(Error::DataValidation(
                    "cannot infer the time step from a single price; it must be configured".into(),
                ));
            }
            (None, _, _) => return Err(Error::DataValidation("price series is empty".into())),
        };

        Self::from_parts(timestamps, prices, step)
    }

    /// Validate the components and assemble the series
    fn from_parts(
        timestamps: Vec<NaiveDateTime>,
        prices: Vec<MoneyPerEnergy>,
        step: TimeDelta,
    ) -> Result<Self> {
        if prices.is_empty() {
            return Err(Error::DataValidation("price series is empty".into()));
        }
        check_step(step)?;

        if let Some((t, price)) = prices.iter().find_position(|price| !price.is_finite()) {
            return Err(Error::DataValidation(format!(
                "price at step {t} is not a finite number ({price})"
            )));
        }

        for (t, (prev, next)) in timestamps.iter().tuple_windows().enumerate() {
            if next <= prev {
                return Err(Error::DataValidation(format!(
                    "timestamps must be strictly increasing ({next} follows {prev})"
                )));
            }
            if *next - *prev != step {
                return Err(Error::DataValidation(format!(
                    "non-uniform time step between steps {t} and {} ({prev} to {next})",
                    t + 1
                )));
            }
        }

        Ok(Self {
            timestamps,
            prices,
            step,
        })
    }

    /// The number of steps in the series
    pub fn len(&self) -> usize {
        self.prices.len()
    }

    /// Always false: a valid series has at least one step
    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    /// The price at step `t`
    pub fn price(&self, t: usize) -> MoneyPerEnergy {
        self.prices[t]
    }

    /// The start of step `t`
    pub fn timestamp(&self, t: usize) -> NaiveDateTime {
        self.timestamps[t]
    }

    /// All the prices in order
    pub fn prices(&self) -> &[MoneyPerEnergy] {
        &self.prices
    }

    /// Iterate over `(timestamp, price)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (NaiveDateTime, MoneyPerEnergy)> + '_ {
        self.timestamps.iter().copied().zip(self.prices.iter().copied())
    }

    /// The duration of one step
    pub fn step(&self) -> TimeDelta {
        self.step
    }

    /// The duration of one step in hours (Δt)
    pub fn step_hours(&self) -> Hours {
        Hours(self.step.num_milliseconds() as f64 / 3_600_000.0)
    }

    /// The price below which a fraction `q` of the prices lie. See [`quantile`].
    pub fn quantile(&self, q: f64) -> MoneyPerEnergy {
        quantile(&self.prices, q)
    }

    /// The prices for each calendar day in the series, in order.
    ///
    /// The first and last days may be partial.
    pub fn days(&self) -> Vec<(NaiveDate, &[MoneyPerEnergy])> {
        let mut days = Vec::new();
        let mut start = 0;
        for (date, group) in &self.timestamps.iter().chunk_by(|timestamp| timestamp.date()) {
            let end = start + group.count();
            days.push((date, &self.prices[start..end]));
            start = end;
        }

        days
    }
}

/// The price below which a fraction `q` of `prices` lie.
///
/// Linear interpolation between the closest ranks is used, so the median of an even number of
/// prices is the mean of the two middle values. `prices` must not be empty.
pub fn quantile(prices: &[MoneyPerEnergy], q: f64) -> MoneyPerEnergy {
    let sorted = prices
        .iter()
        .map(|p| p.value())
        .sorted_by(f64::total_cmp)
        .collect_vec();

    let rank = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor();
    let frac = rank - lower;
    // rank is within [0, len - 1], so truncation is safe
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let lower = lower as usize;
    let upper = (lower + 1).min(sorted.len() - 1);

    MoneyPerEnergy(sorted[lower] + frac * (sorted[upper] - sorted[lower]))
}

/// Check that the step duration is positive
fn check_step(step: TimeDelta) -> Result<()> {
    if step <= TimeDelta::zero() {
        return Err(Error::DataValidation(format!(
            "time step must be positive (got {} seconds)",
            step.num_seconds()
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{hourly_prices, start_time};
    use float_cmp::assert_approx_eq;
    use rstest::rstest;

    fn point(hour: u32, price: f64) -> (NaiveDateTime, MoneyPerEnergy) {
        (
            start_time().date().and_hms_opt(hour, 0, 0).unwrap(),
            MoneyPerEnergy(price),
        )
    }

    #[test]
    fn test_new() {
        let series = hourly_prices(&[1.0, 5.0, 1.0, 5.0]);
        assert_eq!(series.len(), 4);
        assert_eq!(series.step_hours(), Hours(1.0));
        assert_eq!(series.timestamp(3), point(3, 0.0).0);
        assert_eq!(series.price(1), MoneyPerEnergy(5.0));
    }

    #[test]
    fn test_from_points_infers_step() {
        let series =
            PriceSeries::from_points([point(0, 1.0), point(1, 2.0), point(2, 3.0)], None).unwrap();
        assert_eq!(series.step(), TimeDelta::hours(1));
    }

    #[test]
    fn test_from_points_single_point() {
        assert!(matches!(
            PriceSeries::from_points([point(0, 1.0)], None),
            Err(Error::DataValidation(_))
        ));

        let series = PriceSeries::from_points([point(0, 1.0)], Some(TimeDelta::minutes(15)));
        assert_eq!(series.unwrap().step_hours(), Hours(0.25));
    }

    #[rstest]
    #[case::empty(vec![], None)]
    #[case::gap(vec![point(0, 1.0), point(1, 1.0), point(3, 1.0)], None)]
    #[case::decreasing(vec![point(2, 1.0), point(1, 1.0)], None)]
    #[case::duplicate(vec![point(1, 1.0), point(1, 1.0)], None)]
    #[case::nan(vec![point(0, 1.0), point(1, f64::NAN)], None)]
    #[case::step_mismatch(vec![point(0, 1.0), point(1, 1.0)], Some(TimeDelta::minutes(15)))]
    fn test_from_points_invalid(
        #[case] points: Vec<(NaiveDateTime, MoneyPerEnergy)>,
        #[case] step: Option<TimeDelta>,
    ) {
        assert!(matches!(
            PriceSeries::from_points(points, step),
            Err(Error::DataValidation(_))
        ));
    }

    #[test]
    fn test_new_zero_step() {
        let prices = vec![MoneyPerEnergy(1.0)];
        assert!(PriceSeries::new(start_time(), TimeDelta::zero(), prices).is_err());
    }

    #[rstest]
    #[case(0.0, 1.0)]
    #[case(1.0, 4.0)]
    #[case(0.5, 2.5)]
    #[case(0.25, 1.75)]
    fn test_quantile(#[case] q: f64, #[case] expected: f64) {
        let series = hourly_prices(&[4.0, 1.0, 3.0, 2.0]);
        assert_approx_eq!(f64, series.quantile(q).value(), expected);
    }

    #[test]
    fn test_days() {
        // Starts at 22:00, so the first day is partial
        let start = start_time() + TimeDelta::hours(22);
        let prices = (0..28).map(|t| MoneyPerEnergy(f64::from(t))).collect();
        let series = PriceSeries::new(start, TimeDelta::hours(1), prices).unwrap();

        let days = series.days();
        assert_eq!(days.len(), 3);
        assert_eq!(days[0].0, start.date());
        assert_eq!(days[0].1, [MoneyPerEnergy(0.0), MoneyPerEnergy(1.0)]);
        assert_eq!(days[1].1.len(), 24);
        assert_eq!(days[2].1, [MoneyPerEnergy(26.0), MoneyPerEnergy(27.0)]);
    }
}
