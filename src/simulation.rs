//! Functionality for running a battery strategy over a price series.
use crate::battery::BatteryModel;
use crate::error::Result;
use crate::price::PriceSeries;
use crate::site::SiteProfile;
use crate::strategy::{Decide, Strategy, StrategyKind};
use crate::units::{Energy, Hours, Money, MoneyPerEnergy, Power};
use chrono::NaiveDateTime;
use log::{debug, info};
use serde::{Deserialize, Serialize};

pub mod batch;
pub use batch::{BatchOutcome, BatchRun, run_batch};

/// What happened in one step of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Index of the step
    pub t: usize,
    /// Start of the step
    pub timestamp: NaiveDateTime,
    /// Duration of the step
    pub hours: Hours,
    /// Energy price during the step
    pub price: MoneyPerEnergy,
    /// Site demand during the step
    pub load: Power,
    /// PV generation during the step
    pub pv: Power,
    /// Power command returned by the strategy
    pub requested: Power,
    /// Power command applied after clipping (positive = charge)
    pub decision: Power,
    /// Power exchanged with the grid by the site and battery together (positive = import)
    pub grid_power: Power,
    /// State of charge at the start of the step
    pub soc_before: Energy,
    /// State of charge at the end of the step
    pub soc_after: Energy,
    /// Cost incurred in the step (negative = revenue)
    pub step_cost: Money,
    /// Whether the requested command was clipped
    pub clipped: bool,
}

/// The complete record of a single run
#[derive(Debug, Clone, PartialEq)]
pub struct RunResult {
    strategy: StrategyKind,
    steps: Vec<StepRecord>,
    total_cost: Money,
}

impl RunResult {
    /// Assemble a result from its step records, summing up the total cost
    pub fn from_steps(strategy: StrategyKind, steps: Vec<StepRecord>) -> Self {
        let total_cost = steps.iter().map(|step| step.step_cost).sum();
        Self {
            strategy,
            steps,
            total_cost,
        }
    }

    /// The strategy which produced this result
    pub fn strategy(&self) -> StrategyKind {
        self.strategy
    }

    /// The record for each step, in order
    pub fn steps(&self) -> &[StepRecord] {
        &self.steps
    }

    /// The number of steps in the run
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the run has no steps
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// The sum of all step costs
    pub fn total_cost(&self) -> Money {
        self.total_cost
    }

    /// The state of charge before the first step
    pub fn soc_initial(&self) -> Option<Energy> {
        self.steps.first().map(|step| step.soc_before)
    }
}

/// Drives a battery through a price series under a strategy
#[derive(Debug, Clone)]
pub struct Simulator {
    battery: BatteryModel,
    site: Option<SiteProfile>,
}

impl Simulator {
    /// Create a new [`Simulator`] for a battery with its own grid connection
    pub fn new(battery: BatteryModel) -> Self {
        Self {
            battery,
            site: None,
        }
    }

    /// Place the battery behind the same meter as a site with the given demand and PV
    pub fn with_site(mut self, site: SiteProfile) -> Self {
        self.site = Some(site);
        self
    }

    /// The battery being simulated
    pub fn battery(&self) -> &BatteryModel {
        &self.battery
    }

    /// The site sharing the battery's grid connection, if any
    pub fn site(&self) -> Option<&SiteProfile> {
        self.site.as_ref()
    }

    /// Run `strategy` over the whole of `prices`.
    ///
    /// For the LP strategy, the schedule is computed first and then replayed through the same loop
    /// as the other strategies, so that costs are accounted for in the same way.
    ///
    /// Fails if the site profile doesn't cover the price series or if no LP schedule is found.
    pub fn run(&self, prices: &PriceSeries, strategy: &Strategy) -> Result<RunResult> {
        let kind = strategy.kind();
        if let Some(site) = &self.site {
            site.check_len(prices.len())?;
        }
        info!("Running {kind} strategy over {} steps", prices.len());

        let result = match strategy {
            Strategy::Rule(rule) => self.run_policy(prices, rule, kind),
            Strategy::Threshold(threshold) => self.run_policy(prices, threshold, kind),
            Strategy::LinearProgramming(lp) => {
                let schedule = lp.solve_for_site(prices, self.site.as_ref(), &self.battery)?;
                self.run_policy(prices, &schedule, kind)
            }
        };

        info!(
            "{kind} strategy finished with total cost {}",
            result.total_cost()
        );

        Ok(result)
    }

    /// Step through `prices` in order, asking `policy` for a command at each step.
    ///
    /// This never fails: infeasible commands are clipped by the battery model. The site profile
    /// must already have been checked against `prices`.
    fn run_policy<D: Decide + ?Sized>(
        &self,
        prices: &PriceSeries,
        policy: &D,
        strategy: StrategyKind,
    ) -> RunResult {
        let dt = prices.step_hours();
        let mut state = self.battery.initial_state();
        let mut steps = Vec::with_capacity(prices.len());

        for (t, (timestamp, price)) in prices.iter().enumerate() {
            let requested = policy.decide(t, prices, &state, &self.battery);
            let outcome = self.battery.step(state, requested, dt);
            let (load, pv) = self
                .site
                .as_ref()
                .map_or((Power(0.0), Power(0.0)), |site| (site.load(t), site.pv(t)));
            let net_load = load - pv;
            let step_cost = self.battery.step_cost(price, net_load, &outcome, dt);

            steps.push(StepRecord {
                t,
                timestamp,
                hours: dt,
                price,
                load,
                pv,
                requested,
                decision: outcome.applied,
                grid_power: net_load + outcome.grid_power,
                soc_before: state.soc,
                soc_after: outcome.state.soc,
                step_cost,
                clipped: outcome.clipped,
            });
            state = outcome.state;
        }

        let clipped = steps.iter().filter(|step| step.clipped).count();
        if clipped > 0 {
            debug!("{clipped} of {} commands were clipped", steps.len());
        }

        RunResult::from_steps(strategy, steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battery::BatteryParameters;
    use crate::fixture::{hourly_prices, scenario_battery};
    use crate::strategy::{Action, Condition, LpStrategy, Rule, RuleStrategy, ThresholdStrategy};
    use float_cmp::assert_approx_eq;
    use rstest::rstest;

    fn threshold(low: f64, high: f64) -> Strategy {
        Strategy::Threshold(
            ThresholdStrategy::new(MoneyPerEnergy(low), MoneyPerEnergy(high)).unwrap(),
        )
    }

    fn always(action: Action) -> Strategy {
        Strategy::Rule(
            RuleStrategy::new(vec![Rule {
                condition: Condition::Always,
                action,
            }])
            .unwrap(),
        )
    }

    #[rstest]
    fn test_run_threshold(scenario_battery: BatteryModel) {
        let prices = hourly_prices(&[1.0, 5.0, 1.0, 5.0]);
        let result = Simulator::new(scenario_battery)
            .run(&prices, &threshold(2.0, 4.0))
            .unwrap();

        assert_eq!(result.strategy(), StrategyKind::Threshold);
        assert_eq!(result.len(), 4);
        let decisions: Vec<_> = result.steps().iter().map(|s| s.decision).collect();
        assert_eq!(
            decisions,
            [Power(5.0), Power(-5.0), Power(5.0), Power(-5.0)]
        );
        let socs: Vec<_> = result.steps().iter().map(|s| s.soc_after).collect();
        assert_eq!(socs, [Energy(10.0), Energy(5.0), Energy(10.0), Energy(5.0)]);
        assert_approx_eq!(f64, result.total_cost().value(), -40.0);
        assert_eq!(result.soc_initial(), Some(Energy(5.0)));
    }

    #[rstest]
    fn test_run_lp_matches_objective(scenario_battery: BatteryModel) {
        let prices = hourly_prices(&[3.0, 1.0, 4.0, 1.0, 5.0, 9.0, 2.0, 6.0]);
        let lp = LpStrategy::default();
        let schedule = lp.solve(&prices, &scenario_battery).unwrap();
        let result = Simulator::new(scenario_battery)
            .run(&prices, &Strategy::LinearProgramming(lp))
            .unwrap();

        assert_eq!(result.strategy(), StrategyKind::LinearProgramming);
        assert_approx_eq!(
            f64,
            result.total_cost().value(),
            schedule.objective().value(),
            epsilon = 1e-6
        );
    }

    #[rstest]
    fn test_run_single_step_full_battery_holds() {
        let battery = BatteryModel::new(BatteryParameters {
            soc_initial: Energy(1.0),
            ..BatteryParameters::default()
        })
        .unwrap();
        let prices = hourly_prices(&[1.0]);
        let result = Simulator::new(battery)
            .run(&prices, &always(Action::Charge))
            .unwrap();

        let step = &result.steps()[0];
        assert_eq!(step.requested, Power(0.5));
        assert_eq!(step.decision, Power(0.0));
        assert!(step.clipped);
        assert_eq!(step.soc_after, Energy(1.0));
        assert_eq!(result.total_cost(), Money(0.0));
    }

    #[rstest]
    fn test_run_clipping_is_recorded(scenario_battery: BatteryModel) {
        let prices = hourly_prices(&[1.0; 3]);
        let result = Simulator::new(scenario_battery)
            .run(&prices, &always(Action::Discharge))
            .unwrap();

        let clipped: Vec<_> = result.steps().iter().map(|s| s.clipped).collect();
        assert_eq!(clipped, [false, true, true]);
        assert_eq!(result.steps()[2].soc_after, Energy(0.0));
    }

    #[rstest]
    fn test_run_infeasible_lp_is_not_replaced(scenario_battery: BatteryModel) {
        let prices = hourly_prices(&[1.0, 2.0]);
        let lp = LpStrategy::default().with_terminal_soc(Some(Energy(20.0)));
        let result =
            Simulator::new(scenario_battery).run(&prices, &Strategy::LinearProgramming(lp));
        assert!(matches!(
            result,
            Err(crate::error::Error::InfeasibleSchedule(_))
        ));
    }

    fn site(load: &[f64], pv: &[f64]) -> SiteProfile {
        SiteProfile::new(
            load.iter().copied().map(Power).collect(),
            pv.iter().copied().map(Power).collect(),
        )
        .unwrap()
    }

    #[rstest]
    fn test_run_with_site(scenario_battery: BatteryModel) {
        let prices = hourly_prices(&[1.0, 5.0]);
        let result = Simulator::new(scenario_battery)
            .with_site(site(&[2.0, 2.0], &[0.0, 0.5]))
            .run(&prices, &threshold(2.0, 4.0))
            .unwrap();

        let grid: Vec<_> = result.steps().iter().map(|s| s.grid_power).collect();
        assert_eq!(grid, [Power(7.0), Power(-3.5)]);
        assert_eq!(result.steps()[1].load, Power(2.0));
        assert_eq!(result.steps()[1].pv, Power(0.5));
        assert_approx_eq!(f64, result.total_cost().value(), 7.0 - 17.5);
    }

    #[rstest]
    fn test_run_site_length_mismatch(scenario_battery: BatteryModel) {
        let prices = hourly_prices(&[1.0, 5.0, 3.0]);
        let result = Simulator::new(scenario_battery)
            .with_site(site(&[1.0], &[0.0]))
            .run(&prices, &threshold(2.0, 4.0));
        assert!(matches!(
            result,
            Err(crate::error::Error::DataValidation(_))
        ));
    }

    #[rstest]
    fn test_run_lp_with_site_matches_objective(scenario_battery: BatteryModel) {
        let battery = BatteryModel::new(BatteryParameters {
            grid_fee: MoneyPerEnergy(1.5),
            degradation_cost: MoneyPerEnergy(0.1),
            ..scenario_battery.parameters().clone()
        })
        .unwrap();
        let prices = hourly_prices(&[3.0, 1.0, 4.0, 2.0, 5.0, 9.0]);
        let site = site(&[1.0, 1.0, 1.0, 3.0, 3.0, 3.0], &[0.0, 4.0, 6.0, 2.0, 0.0, 0.0]);
        let lp = LpStrategy::default();
        let schedule = lp.solve_for_site(&prices, Some(&site), &battery).unwrap();

        let simulator = Simulator::new(battery).with_site(site);
        let result = simulator
            .run(&prices, &Strategy::LinearProgramming(lp))
            .unwrap();
        assert_approx_eq!(
            f64,
            result.total_cost().value(),
            schedule.objective().value(),
            epsilon = 1e-6
        );

        let threshold = simulator.run(&prices, &threshold(2.5, 4.5)).unwrap();
        assert!(result.total_cost().value() <= threshold.total_cost().value() + 1e-6);
    }

    #[test]
    fn test_from_steps_sums_costs() {
        let prices = hourly_prices(&[2.0, 3.0]);
        let steps = prices
            .iter()
            .enumerate()
            .map(|(t, (timestamp, price))| StepRecord {
                t,
                timestamp,
                hours: Hours(1.0),
                price,
                load: Power(0.0),
                pv: Power(0.0),
                requested: Power(0.0),
                decision: Power(0.0),
                grid_power: Power(0.0),
                soc_before: Energy(0.0),
                soc_after: Energy(0.0),
                step_cost: Money(t as f64 + 1.5),
                clipped: false,
            })
            .collect();
        let result = RunResult::from_steps(StrategyKind::Rule, steps);
        assert_approx_eq!(f64, result.total_cost().value(), 4.0);
    }
}
