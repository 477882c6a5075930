//! Post-hoc evaluation of completed runs.
use crate::battery::BatteryModel;
use crate::simulation::{RunResult, StepRecord};
use crate::units::{Energy, Money, MoneyPerEnergy, Power};
use itertools::Itertools;
use serde::Serialize;
use std::fmt;

/// Tolerance (MWh) used when checking recorded states of charge against their bounds
const SOC_TOLERANCE: f64 = 1e-6;

/// Aggregate performance indicators for one run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metrics {
    /// Sum of all step costs
    pub total_cost: Money,
    /// Negated total cost
    pub profit: Money,
    /// Equivalent full cycles: total SOC movement divided by twice the capacity
    pub full_cycles: f64,
    /// Number of steps in which the requested command was clipped
    pub clipped_steps: usize,
    /// Number of steps ending outside the SOC bounds (should always be zero)
    pub soc_violations: usize,
    /// Energy bought from the grid
    pub energy_imported: Energy,
    /// Energy sold to the grid
    pub energy_exported: Energy,
    /// Battery-side energy while charging
    pub total_charged: Energy,
    /// Battery-side energy while discharging
    pub total_discharged: Energy,
    /// Mean state of charge at the end of each step
    pub average_soc: Energy,
    /// Income from energy sold to the grid
    pub revenue: Money,
    /// Spending on energy bought from the grid, including grid fees
    pub grid_cost: Money,
    /// The part of the total cost due to battery wear
    pub degradation_cost: Money,
    /// What the site would have paid for its net load without the battery
    pub baseline_cost: Money,
    /// Baseline cost minus total cost
    pub savings: Money,
    /// Revenue divided by grid and degradation costs (absent if those are zero)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revenue_to_cost_ratio: Option<f64>,
    /// Degradation as a fraction of grid and degradation costs (absent if those are zero)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degradation_cost_share: Option<f64>,
    /// Number of calendar days touched by the run
    pub days: usize,
    /// Profit divided by the number of days
    pub average_daily_profit: Money,
    /// Sample standard deviation of the profit made on each day (absent for a single day)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profit_volatility: Option<Money>,
    /// Profit per MWh of throughput (absent if the battery never moved)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profit_per_mwh: Option<MoneyPerEnergy>,
}

/// Money flows with the grid over a run
struct GridFlows {
    revenue: Money,
    cost: Money,
    baseline: Money,
}

/// Split the grid exchange of each step into purchases and sales.
///
/// The baseline is what the site's net load alone would have cost.
fn grid_flows(steps: &[StepRecord], grid_fee: MoneyPerEnergy) -> GridFlows {
    let mut flows = GridFlows {
        revenue: Money(0.0),
        cost: Money(0.0),
        baseline: Money(0.0),
    };

    for step in steps {
        let grid = step.grid_power * step.hours;
        let imported = grid.max(Energy(0.0));
        let exported = (-grid).max(Energy(0.0));
        flows.revenue += step.price * exported;
        flows.cost += (step.price + grid_fee) * imported;

        let site = (step.load - step.pv) * step.hours;
        flows.baseline += step.price * site + grid_fee * site.max(Energy(0.0));
    }

    flows
}

/// Sum the profit (negated step costs) made on each calendar day
fn daily_profits(steps: &[StepRecord]) -> Vec<Money> {
    steps
        .iter()
        .chunk_by(|step| step.timestamp.date())
        .into_iter()
        .map(|(_, day)| -day.map(|step| step.step_cost).sum::<Money>())
        .collect()
}

/// The sample standard deviation, or `None` for fewer than two values
fn sample_std_dev(values: &[Money]) -> Option<Money> {
    if values.len() < 2 {
        return None;
    }

    let n = values.len() as f64;
    let mean = values.iter().map(|v| v.value()).sum::<f64>() / n;
    let variance = values
        .iter()
        .map(|v| (v.value() - mean).powi(2))
        .sum::<f64>()
        / (n - 1.0);

    Some(Money(variance.sqrt()))
}

/// Compute the [`Metrics`] for a completed run.
///
/// The run is not modified.
pub fn evaluate(result: &RunResult, battery: &BatteryModel) -> Metrics {
    let params = battery.parameters();
    let steps = result.steps();

    let sum_energy = |f: fn(Power) -> Power| -> Energy {
        steps.iter().map(|step| f(step.grid_power) * step.hours).sum()
    };
    let energy_imported = sum_energy(|p| p.max(Power(0.0)));
    let energy_exported = sum_energy(|p| (-p).max(Power(0.0)));

    let total_charged: Energy = steps
        .iter()
        .map(|step| step.decision.max(Power(0.0)) * step.hours)
        .sum();
    let total_discharged: Energy = steps
        .iter()
        .map(|step| (-step.decision).max(Power(0.0)) * step.hours)
        .sum();
    let throughput = total_charged + total_discharged;

    let soc_movement: Energy = steps
        .iter()
        .map(|step| (step.soc_after - step.soc_before).abs())
        .sum();
    let full_cycles = (soc_movement / (params.capacity + params.capacity)).value();

    let clipped_steps = steps.iter().filter(|step| step.clipped).count();
    let soc_violations = steps
        .iter()
        .filter(|step| {
            step.soc_after.value() < params.soc_min.value() - SOC_TOLERANCE
                || step.soc_after.value() > params.soc_max.value() + SOC_TOLERANCE
        })
        .count();

    let average_soc = if steps.is_empty() {
        Energy(0.0)
    } else {
        Energy(steps.iter().map(|step| step.soc_after.value()).sum::<f64>() / steps.len() as f64)
    };

    let total_cost = result.total_cost();
    let profit = -total_cost;
    let profit_per_mwh = (throughput > Energy(0.0)).then(|| profit / throughput);

    let flows = grid_flows(steps, params.grid_fee);
    let degradation_cost = params.degradation_cost * throughput;
    let spending = flows.cost + degradation_cost;
    let (revenue_to_cost_ratio, degradation_cost_share) = if spending == Money(0.0) {
        (None, None)
    } else {
        (
            Some((flows.revenue / spending).value()),
            Some((degradation_cost / spending).value()),
        )
    };

    let daily = daily_profits(steps);
    let days = daily.len();
    let average_daily_profit = if days == 0 {
        Money(0.0)
    } else {
        Money(profit.value() / days as f64)
    };

    Metrics {
        total_cost,
        profit,
        full_cycles,
        clipped_steps,
        soc_violations,
        energy_imported,
        energy_exported,
        total_charged,
        total_discharged,
        average_soc,
        revenue: flows.revenue,
        grid_cost: flows.cost,
        degradation_cost,
        baseline_cost: flows.baseline,
        savings: flows.baseline - total_cost,
        revenue_to_cost_ratio,
        degradation_cost_share,
        days,
        average_daily_profit,
        profit_volatility: sample_std_dev(&daily),
        profit_per_mwh,
    }
}

/// Write an optional value, or `n/a` if it is missing
fn write_optional(f: &mut fmt::Formatter<'_>, label: &str, value: Option<f64>) -> fmt::Result {
    match value {
        Some(value) => writeln!(f, "{label:<19}{value:.3}"),
        None => writeln!(f, "{label:<19}n/a"),
    }
}

impl fmt::Display for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total cost:        {:.2}", self.total_cost.value())?;
        writeln!(f, "Profit:            {:.2}", self.profit.value())?;
        writeln!(
            f,
            "Revenue:           {:.2} (grid cost {:.2}, degradation cost {:.2})",
            self.revenue.value(),
            self.grid_cost.value(),
            self.degradation_cost.value()
        )?;
        writeln!(
            f,
            "Savings:           {:.2} against a baseline of {:.2}",
            self.savings.value(),
            self.baseline_cost.value()
        )?;
        write_optional(f, "Revenue/cost:", self.revenue_to_cost_ratio)?;
        write_optional(f, "Degradation share:", self.degradation_cost_share)?;
        writeln!(
            f,
            "Daily profit:      {:.2} on average over {} day(s)",
            self.average_daily_profit.value(),
            self.days
        )?;
        write_optional(
            f,
            "Profit volatility:",
            self.profit_volatility.map(Money::value),
        )?;
        writeln!(f, "Full cycles:       {:.3}", self.full_cycles)?;
        writeln!(f, "Clipped steps:     {}", self.clipped_steps)?;
        writeln!(f, "SOC violations:    {}", self.soc_violations)?;
        writeln!(
            f,
            "Grid energy:       {:.3} MWh imported, {:.3} MWh exported",
            self.energy_imported.value(),
            self.energy_exported.value()
        )?;
        writeln!(
            f,
            "Battery energy:    {:.3} MWh charged, {:.3} MWh discharged",
            self.total_charged.value(),
            self.total_discharged.value()
        )?;
        writeln!(f, "Average SOC:       {:.3} MWh", self.average_soc.value())?;
        match self.profit_per_mwh {
            Some(value) => write!(f, "Profit per MWh:    {:.2}", value.value()),
            None => write!(f, "Profit per MWh:    n/a"),
        }
    }
}
