//! A strategy which computes a cost-minimising schedule over the whole horizon with linear
//! programming.
//!
//! For every step `t` there is a charging power `c_t` and a discharging power `d_t`, both
//! non-negative, and the state of charge `s_t` at the end of the step. If the battery shares its
//! meter with a site, `n_t` is the site's net load. The problem is:
//!
//! ```text
//! minimise   Σ_t Δt · [(price_t + degradation) · c_t
//!                      + (degradation − price_t · efficiency_discharge) · d_t
//!                      + grid_fee · m_t]
//! subject to s_t = s_{t-1} + Δt · (c_t · efficiency_charge − d_t / efficiency_discharge)
//!            s_{-1} = soc_initial
//!            m_t ≥ n_t + c_t − efficiency_discharge · d_t,  m_t ≥ 0
//!            soc_min ≤ s_t ≤ soc_max
//!            0 ≤ c_t ≤ p_charge_max, 0 ≤ d_t ≤ p_discharge_max
//! ```
//!
//! `m_t` is the power imported from the grid, so the fee is only paid on what the site and battery
//! buy together. These columns are left out when there is no grid fee. The site's own energy cost
//! (`Σ_t Δt · price_t · n_t`) is fixed and is added back when reporting the objective.
//!
//! Optionally the final state of charge is required to be at least a target value, and optionally
//! a binary variable per step forbids charging and discharging at the same time (which makes the
//! problem a MILP).
use super::Decide;
use crate::battery::{BatteryModel, BatteryParameters, BatteryState};
use crate::error::{Error, InfeasibleKind, Result};
use crate::price::PriceSeries;
use crate::site::SiteProfile;
use crate::units::{Energy, Hours, Money, MoneyPerEnergy, Power};
use highs::{HighsModelStatus, RowProblem as Problem, Sense};
use log::{Level, debug, info, log_enabled, warn};
use serde::Deserialize;
use std::time::Duration;

pub mod constraints;
use constraints::add_constraints;

/// A decision variable in the optimisation.
///
/// Note that this type does **not** include the value of the variable; it just refers to a
/// particular column of the problem.
type Variable = highs::Col;

/// Values below this (in MW) are treated as zero when reading the solution
const SOLUTION_TOLERANCE: f64 = 1e-9;

/// The columns of the problem, grouped by kind.
///
/// Columns are added to the problem in the order charge, discharge, SOC, import, mode, so the
/// solution values can be read back by position.
pub struct Variables {
    /// Charging power for each step
    pub charge: Vec<Variable>,
    /// Discharging power for each step
    pub discharge: Vec<Variable>,
    /// State of charge at the end of each step
    pub soc: Vec<Variable>,
    /// Power imported from the grid in each step (only if there is a grid fee)
    pub import: Option<Vec<Variable>>,
    /// Binary charging mode for each step (only if exclusivity is enforced)
    pub mode: Option<Vec<Variable>>,
}

/// Configuration for the LP strategy, as read from the model file
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct LpParameters {
    /// Require the final state of charge to be at least its target
    #[serde(default)]
    pub terminal_soc: bool,
    /// The target for the final state of charge (defaults to the initial state of charge)
    pub terminal_soc_target: Option<Energy>,
    /// Wall-clock budget for the solver, in seconds
    pub time_limit_secs: Option<f64>,
    /// Forbid simultaneous charging and discharging with one binary variable per step
    #[serde(default)]
    pub exclusive: bool,
}

impl LpParameters {
    /// Create the strategy.
    ///
    /// `default_time_limit` is used if no time limit is configured here.
    pub fn build(&self, default_time_limit: Option<f64>) -> Result<LpStrategy> {
        let time_limit = self
            .time_limit_secs
            .or(default_time_limit)
            .map(|secs| {
                Duration::try_from_secs_f64(secs)
                    .ok()
                    .filter(|limit| !limit.is_zero())
                    .ok_or_else(|| {
                        Error::Configuration(format!(
                            "LP time limit must be a positive number of seconds (got {secs})"
                        ))
                    })
            })
            .transpose()?;

        if let Some(target) = self.terminal_soc_target {
            if !target.is_finite() {
                return Err(Error::Configuration(
                    "terminal SOC target must be a finite number".into(),
                ));
            }
        }

        Ok(LpStrategy {
            terminal_soc: self
                .terminal_soc
                .then_some(self.terminal_soc_target)
                .map(|target| target.map_or(TerminalSoc::Initial, TerminalSoc::Target)),
            time_limit,
            exclusive: self.exclusive,
        })
    }
}

/// A lower bound on the state of charge at the end of the horizon
#[derive(Debug, Clone, Copy, PartialEq)]
enum TerminalSoc {
    /// The battery must end at least as full as it started
    Initial,
    /// The battery must end with at least this much energy
    Target(Energy),
}

/// Solves for a cost-minimising schedule over the whole horizon before the run starts
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LpStrategy {
    terminal_soc: Option<TerminalSoc>,
    time_limit: Option<Duration>,
    exclusive: bool,
}

impl LpStrategy {
    /// Require the final state of charge to be at least `target`, or at least the initial state of
    /// charge if `target` is `None`
    pub fn with_terminal_soc(mut self, target: Option<Energy>) -> Self {
        self.terminal_soc = Some(target.map_or(TerminalSoc::Initial, TerminalSoc::Target));
        self
    }

    /// Forbid simultaneous charging and discharging
    pub fn with_exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    /// Give up if the solver takes longer than `limit`
    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.time_limit = Some(limit);
        self
    }

    /// Compute the optimal schedule for `prices`, for a battery with its own grid connection.
    ///
    /// # Returns
    ///
    /// The schedule, or [`Error::InfeasibleSchedule`] if there is none. There is no fallback to
    /// another strategy.
    pub fn solve(&self, prices: &PriceSeries, battery: &BatteryModel) -> Result<Schedule> {
        self.solve_for_site(prices, None, battery)
    }

    /// Compute the optimal schedule for `prices`, for a battery sharing its meter with `site`.
    ///
    /// # Returns
    ///
    /// The schedule, [`Error::DataValidation`] if the site profile doesn't match the prices, or
    /// [`Error::InfeasibleSchedule`] if there is no schedule.
    pub fn solve_for_site(
        &self,
        prices: &PriceSeries,
        site: Option<&SiteProfile>,
        battery: &BatteryModel,
    ) -> Result<Schedule> {
        let params = battery.parameters();
        let dt = prices.step_hours();
        let n_steps = prices.len();
        let net_load: Vec<_> = match site {
            Some(site) => {
                site.check_len(n_steps)?;
                (0..n_steps).map(|t| site.net_load(t)).collect()
            }
            None => vec![Power(0.0); n_steps],
        };

        // Set up problem
        let mut problem = Problem::default();
        let variables = add_variables(&mut problem, prices, params, self.exclusive);

        // Add constraints
        let terminal_target = self.terminal_soc.map(|terminal| match terminal {
            TerminalSoc::Initial => params.soc_initial,
            TerminalSoc::Target(target) => target,
        });
        add_constraints(
            &mut problem,
            &variables,
            params,
            dt,
            &net_load,
            terminal_target,
        );

        debug!(
            "Solving LP with {} columns and {} rows over {n_steps} steps",
            problem.num_cols(),
            problem.num_rows()
        );

        // Solve problem
        let mut highs_model = problem.optimise(Sense::Minimise);
        highs_model.set_option("output_flag", log_enabled!(Level::Trace));
        if let Some(limit) = self.time_limit {
            highs_model.set_option("time_limit", limit.as_secs_f64());
        }

        let solved = highs_model.solve();
        match solved.status() {
            HighsModelStatus::Optimal => {}
            HighsModelStatus::Infeasible | HighsModelStatus::UnboundedOrInfeasible => {
                return Err(InfeasibleKind::Infeasible.into());
            }
            HighsModelStatus::ReachedTimeLimit => {
                let seconds = self.time_limit.map_or(f64::INFINITY, |l| l.as_secs_f64());
                return Err(InfeasibleKind::TimeLimit { seconds }.into());
            }
            status => return Err(InfeasibleKind::Solver(format!("{status:?}")).into()),
        }

        let solution = solved.get_solution();
        let columns = solution.columns();
        let charge = read_powers(&columns[..n_steps], params.p_charge_max);
        let discharge = read_powers(&columns[n_steps..2 * n_steps], params.p_discharge_max);
        let soc = columns[2 * n_steps..3 * n_steps]
            .iter()
            .map(|&s| Energy(s))
            .collect();

        let schedule = Schedule::new(charge, discharge, soc, prices, &net_load, params);
        info!("LP schedule found with objective {}", schedule.objective());

        let overlapping = schedule.overlapping_steps().count();
        if overlapping > 0 {
            warn!(
                "LP schedule charges and discharges simultaneously in {overlapping} step(s); \
                only the net command will be applied"
            );
        }

        Ok(schedule)
    }
}

/// The objective coefficient for charging power in one step
pub fn charge_cost_coefficient(
    price: MoneyPerEnergy,
    params: &BatteryParameters,
    dt: Hours,
) -> f64 {
    ((price + params.degradation_cost) * (Power(1.0) * dt)).value()
}

/// The objective coefficient for discharging power in one step
pub fn discharge_cost_coefficient(
    price: MoneyPerEnergy,
    params: &BatteryParameters,
    dt: Hours,
) -> f64 {
    ((params.degradation_cost - price * params.efficiency_discharge) * (Power(1.0) * dt)).value()
}

/// The objective coefficient for grid import in one step
pub fn import_cost_coefficient(params: &BatteryParameters, dt: Hours) -> f64 {
    (params.grid_fee * (Power(1.0) * dt)).value()
}

/// Add variables to the optimisation problem.
///
/// # Arguments
///
/// * `problem` - The optimisation problem
/// * `prices` - The price for each step
/// * `params` - Battery parameters
/// * `exclusive` - Whether to add binary charging mode variables
///
/// Import variables are only added if there is a grid fee.
///
/// # Returns
///
/// The problem's [`Variables`].
fn add_variables(
    problem: &mut Problem,
    prices: &PriceSeries,
    params: &BatteryParameters,
    exclusive: bool,
) -> Variables {
    let dt = prices.step_hours();

    let charge = prices
        .prices()
        .iter()
        .map(|&price| {
            let coeff = charge_cost_coefficient(price, params, dt);
            problem.add_column(coeff, 0.0..=params.p_charge_max.value())
        })
        .collect();

    let discharge = prices
        .prices()
        .iter()
        .map(|&price| {
            let coeff = discharge_cost_coefficient(price, params, dt);
            problem.add_column(coeff, 0.0..=params.p_discharge_max.value())
        })
        .collect();

    // SOC variables are auxiliary and don't contribute to the objective
    let soc = (0..prices.len())
        .map(|_| problem.add_column(0.0, params.soc_min.value()..=params.soc_max.value()))
        .collect();

    let import = (params.grid_fee > MoneyPerEnergy(0.0)).then(|| {
        let coeff = import_cost_coefficient(params, dt);
        (0..prices.len())
            .map(|_| problem.add_column(coeff, 0.0..))
            .collect()
    });

    let mode = exclusive.then(|| {
        (0..prices.len())
            .map(|_| problem.add_integer_column(0.0, 0.0..=1.0))
            .collect()
    });

    Variables {
        charge,
        discharge,
        soc,
        import,
        mode,
    }
}

/// Convert solution values to powers, removing solver noise outside `[0, max]`
fn read_powers(values: &[f64], max: Power) -> Vec<Power> {
    values
        .iter()
        .map(|&value| {
            if value.abs() < SOLUTION_TOLERANCE {
                Power(0.0)
            } else {
                Power(value).max(Power(0.0)).min(max)
            }
        })
        .collect()
}

/// A precomputed charge/discharge plan for a whole horizon
#[derive(Debug, Clone, PartialEq)]
pub struct Schedule {
    charge: Vec<Power>,
    discharge: Vec<Power>,
    soc: Vec<Energy>,
    objective: Money,
}

impl Schedule {
    /// Create a new [`Schedule`], evaluating its cost including the site's net load.
    ///
    /// This is the cost the simulator would record if every command were applied unchanged.
    fn new(
        charge: Vec<Power>,
        discharge: Vec<Power>,
        soc: Vec<Energy>,
        prices: &PriceSeries,
        net_load: &[Power],
        params: &BatteryParameters,
    ) -> Self {
        let dt = prices.step_hours();
        let objective = prices
            .prices()
            .iter()
            .zip(net_load)
            .zip(charge.iter().zip(&discharge))
            .map(|((&price, &n), (&c, &d))| {
                let import = (n + c - d * params.efficiency_discharge).max(Power(0.0));
                charge_cost_coefficient(price, params, dt) * c.value()
                    + discharge_cost_coefficient(price, params, dt) * d.value()
                    + import_cost_coefficient(params, dt) * import.value()
                    + (price * (n * dt)).value()
            })
            .sum();

        Self {
            charge,
            discharge,
            soc,
            objective: Money(objective),
        }
    }

    /// The number of steps in the schedule
    pub fn len(&self) -> usize {
        self.charge.len()
    }

    /// Whether the schedule has no steps
    pub fn is_empty(&self) -> bool {
        self.charge.is_empty()
    }

    /// The signed power command for step `t` (`c_t - d_t`)
    pub fn command(&self, t: usize) -> Power {
        self.charge[t] - self.discharge[t]
    }

    /// Charging power for each step
    pub fn charge(&self) -> &[Power] {
        &self.charge
    }

    /// Discharging power for each step
    pub fn discharge(&self) -> &[Power] {
        &self.discharge
    }

    /// Planned state of charge at the end of each step
    pub fn soc(&self) -> &[Energy] {
        &self.soc
    }

    /// The value of the LP objective for this schedule
    pub fn objective(&self) -> Money {
        self.objective
    }

    /// Steps in which both charging and discharging are non-zero
    pub fn overlapping_steps(&self) -> impl Iterator<Item = usize> + '_ {
        self.charge
            .iter()
            .zip(&self.discharge)
            .enumerate()
            .filter(|(_, (c, d))| **c > Power(0.0) && **d > Power(0.0))
            .map(|(t, _)| t)
    }
}

impl Decide for Schedule {
    fn decide(
        &self,
        t: usize,
        _prices: &PriceSeries,
        _state: &BatteryState,
        _battery: &BatteryModel,
    ) -> Power {
        self.command(t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{assert_error, battery, hourly_prices, scenario_battery};
    use crate::units::Dimensionless;
    use float_cmp::assert_approx_eq;
    use rstest::rstest;

    #[rstest]
    fn test_solve_alternating_prices(scenario_battery: BatteryModel) {
        let prices = hourly_prices(&[1.0, 5.0, 1.0, 5.0]);
        let schedule = LpStrategy::default()
            .solve(&prices, &scenario_battery)
            .unwrap();

        assert_approx_eq!(f64, schedule.objective().value(), -40.0, epsilon = 1e-6);
        let commands: Vec<_> = (0..4).map(|t| schedule.command(t).value()).collect();
        for (command, expected) in commands.into_iter().zip([5.0, -5.0, 5.0, -5.0]) {
            assert_approx_eq!(f64, command, expected, epsilon = 1e-6);
        }
        assert_eq!(schedule.overlapping_steps().count(), 0);
    }

    #[rstest]
    fn test_solve_plan_respects_soc_bounds(scenario_battery: BatteryModel) {
        let prices = hourly_prices(&[3.0, 1.0, 1.0, 1.0, 9.0, 9.0, 9.0, 2.0]);
        let schedule = LpStrategy::default()
            .solve(&prices, &scenario_battery)
            .unwrap();

        assert_eq!(schedule.len(), prices.len());
        for soc in schedule.soc() {
            assert!(soc.value() >= -1e-6 && soc.value() <= 10.0 + 1e-6);
        }
    }

    #[rstest]
    fn test_solve_idempotent(scenario_battery: BatteryModel) {
        let prices = hourly_prices(&[4.0, 2.0, 7.0, 1.0, 3.0, 8.0]);
        let strategy = LpStrategy::default();
        let first = strategy.solve(&prices, &scenario_battery).unwrap();
        let second = strategy.solve(&prices, &scenario_battery).unwrap();
        assert_eq!(first, second);
    }

    #[rstest]
    fn test_solve_terminal_soc(scenario_battery: BatteryModel) {
        // Without a terminal constraint the battery is emptied at the end
        let prices = hourly_prices(&[5.0, 5.0]);
        let schedule = LpStrategy::default()
            .solve(&prices, &scenario_battery)
            .unwrap();
        assert_approx_eq!(f64, schedule.soc()[1].value(), 0.0, epsilon = 1e-6);

        let schedule = LpStrategy::default()
            .with_terminal_soc(None)
            .solve(&prices, &scenario_battery)
            .unwrap();
        assert_approx_eq!(f64, schedule.soc()[1].value(), 5.0, epsilon = 1e-6);
        assert_approx_eq!(f64, schedule.objective().value(), 0.0, epsilon = 1e-6);
    }

    #[rstest]
    fn test_solve_unreachable_terminal_soc(scenario_battery: BatteryModel) {
        // At most 5 MWh can be added in a single step
        let prices = hourly_prices(&[1.0]);
        let result = LpStrategy::default()
            .with_terminal_soc(Some(Energy(10.5)))
            .solve(&prices, &scenario_battery);
        assert_error!(result, InfeasibleKind::Infeasible);
    }

    #[rstest]
    fn test_solve_exclusive(scenario_battery: BatteryModel) {
        let prices = hourly_prices(&[1.0, 5.0, 1.0, 5.0]);
        let schedule = LpStrategy::default()
            .with_exclusive()
            .solve(&prices, &scenario_battery)
            .unwrap();
        assert_approx_eq!(f64, schedule.objective().value(), -40.0, epsilon = 1e-6);
        assert_eq!(schedule.overlapping_steps().count(), 0);
    }

    #[rstest]
    fn test_solve_negative_prices_overlap(battery: BatteryModel) {
        // Being paid to import, the relaxation charges at full power in both steps and burns off
        // the excess by discharging at the same time
        let prices = hourly_prices(&[-100.0, -100.0]);
        let schedule = LpStrategy::default().solve(&prices, &battery).unwrap();

        assert!(schedule.overlapping_steps().count() > 0);
        let charged: f64 = schedule.charge().iter().map(|c| c.value()).sum();
        let discharged: f64 = schedule.discharge().iter().map(|d| d.value()).sum();
        assert_approx_eq!(f64, charged, 1.0, epsilon = 1e-6);
        assert_approx_eq!(f64, discharged, 0.36, epsilon = 1e-6);
        assert_approx_eq!(f64, schedule.objective().value(), -67.6, epsilon = 1e-6);
    }

    #[rstest]
    fn test_solve_exclusive_negative_prices(battery: BatteryModel) {
        let prices = hourly_prices(&[-100.0, -100.0]);
        let schedule = LpStrategy::default()
            .with_exclusive()
            .solve(&prices, &battery)
            .unwrap();

        assert_eq!(schedule.overlapping_steps().count(), 0);
        // Only the 0.5 MWh of headroom can be filled
        assert_approx_eq!(
            f64,
            schedule.objective().value(),
            -100.0 * 0.5 / 0.9,
            epsilon = 1e-6
        );
    }

    #[rstest]
    fn test_solve_grid_fee_on_net_import(scenario_battery: BatteryModel) {
        let battery = BatteryModel::new(BatteryParameters {
            grid_fee: MoneyPerEnergy(10.0),
            ..scenario_battery.parameters().clone()
        })
        .unwrap();
        let prices = hourly_prices(&[2.0, 2.0]);
        let site = SiteProfile::new(vec![Power(0.0), Power(5.0)], vec![Power(5.0), Power(0.0)])
            .unwrap();

        // Storing the PV surplus and using it for the later demand avoids the fee altogether
        let schedule = LpStrategy::default()
            .with_terminal_soc(None)
            .solve_for_site(&prices, Some(&site), &battery)
            .unwrap();
        assert_approx_eq!(f64, schedule.command(0).value(), 5.0, epsilon = 1e-6);
        assert_approx_eq!(f64, schedule.command(1).value(), -5.0, epsilon = 1e-6);
        assert_approx_eq!(f64, schedule.objective().value(), 0.0, epsilon = 1e-6);
    }

    #[rstest]
    fn test_solve_site_length_mismatch(scenario_battery: BatteryModel) {
        let prices = hourly_prices(&[1.0, 2.0]);
        let site = SiteProfile::new(vec![Power(1.0)], vec![Power(0.0)]).unwrap();
        let result = LpStrategy::default().solve_for_site(&prices, Some(&site), &scenario_battery);
        assert!(matches!(result, Err(Error::DataValidation(_))));
    }

    #[test]
    fn test_cost_coefficients() {
        let params = BatteryParameters {
            efficiency_discharge: Dimensionless(0.8),
            grid_fee: MoneyPerEnergy(1.0),
            degradation_cost: MoneyPerEnergy(2.0),
            ..BatteryParameters::default()
        };
        let price = MoneyPerEnergy(10.0);
        let dt = Hours(0.5);
        assert_approx_eq!(f64, charge_cost_coefficient(price, &params, dt), 6.0);
        assert_approx_eq!(f64, discharge_cost_coefficient(price, &params, dt), -3.0);
        assert_approx_eq!(f64, import_cost_coefficient(&params, dt), 0.5);
    }

    #[rstest]
    #[case(Some(0.0))]
    #[case(Some(-1.0))]
    #[case(Some(f64::NAN))]
    fn test_build_invalid_time_limit(#[case] time_limit_secs: Option<f64>) {
        let params = LpParameters {
            time_limit_secs,
            ..LpParameters::default()
        };
        assert!(matches!(params.build(None), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_build() {
        let params: LpParameters =
            toml::from_str("terminal_soc = true\nterminal_soc_target = 0.8").unwrap();
        let strategy = params.build(Some(30.0)).unwrap();
        assert_eq!(
            strategy,
            LpStrategy::default()
                .with_terminal_soc(Some(Energy(0.8)))
                .with_time_limit(Duration::from_secs(30))
        );

        // Target is ignored unless the terminal constraint is enabled
        let params: LpParameters = toml::from_str("terminal_soc_target = 0.8").unwrap();
        assert_eq!(params.build(None).unwrap(), LpStrategy::default());
    }

    #[rstest]
    fn test_schedule_decide(scenario_battery: BatteryModel) {
        let prices = hourly_prices(&[1.0, 5.0]);
        let schedule = Schedule::new(
            vec![Power(2.0), Power(0.0)],
            vec![Power(0.0), Power(1.5)],
            vec![Energy(7.0), Energy(5.5)],
            &prices,
            &[Power(0.0), Power(1.0)],
            scenario_battery.parameters(),
        );
        let state = scenario_battery.initial_state();
        assert_eq!(
            schedule.decide(1, &prices, &state, &scenario_battery),
            Power(-1.5)
        );
        assert_approx_eq!(f64, schedule.objective().value(), 2.0 - 7.5 + 5.0);
    }
}
