//! The physical battery model and its state transition.
use crate::error::{Error, Result};
use crate::units::{Dimensionless, Energy, Hours, Money, MoneyPerEnergy, Power};
use float_cmp::approx_eq;
use log::debug;
use serde::{Deserialize, Serialize};

/// Absolute tolerance (MW) below which a change to the requested power is not counted as clipping
const CLIP_TOLERANCE: f64 = 1e-9;

/// Physical and economic parameters of a battery.
///
/// The defaults describe a 1 MWh battery with 0.5 MW of power in each direction and 90% efficiency
/// both when charging and discharging, starting half full.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatteryParameters {
    /// Total energy capacity
    pub capacity: Energy,
    /// Lowest permitted state of charge
    pub soc_min: Energy,
    /// Highest permitted state of charge
    pub soc_max: Energy,
    /// State of charge at the start of a run
    pub soc_initial: Energy,
    /// Maximum charging power
    pub p_charge_max: Power,
    /// Maximum discharging power
    pub p_discharge_max: Power,
    /// Fraction of imported energy which ends up stored
    pub efficiency_charge: Dimensionless,
    /// Fraction of stored energy which reaches the grid when discharging
    pub efficiency_discharge: Dimensionless,
    /// Fee paid per MWh imported from the grid
    pub grid_fee: MoneyPerEnergy,
    /// Wear cost per MWh of charge or discharge throughput
    pub degradation_cost: MoneyPerEnergy,
}

impl Default for BatteryParameters {
    fn default() -> Self {
        Self {
            capacity: Energy(1.0),
            soc_min: Energy(0.0),
            soc_max: Energy(1.0),
            soc_initial: Energy(0.5),
            p_charge_max: Power(0.5),
            p_discharge_max: Power(0.5),
            efficiency_charge: Dimensionless(0.9),
            efficiency_discharge: Dimensionless(0.9),
            grid_fee: MoneyPerEnergy(0.0),
            degradation_cost: MoneyPerEnergy(0.0),
        }
    }
}

/// The mutable state of a battery during a run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatteryState {
    /// Stored energy
    pub soc: Energy,
}

/// The result of applying one power command for one step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutcome {
    /// The state after the step
    pub state: BatteryState,
    /// The command actually applied after clipping (positive = charge)
    pub applied: Power,
    /// Power exchanged with the grid (positive = import, negative = export)
    pub grid_power: Power,
    /// Whether the requested command had to be truncated
    pub clipped: bool,
}

/// A validated, immutable battery configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct BatteryModel {
    params: BatteryParameters,
}

impl BatteryModel {
    /// Create a new [`BatteryModel`], checking that the parameters are consistent.
    pub fn new(params: BatteryParameters) -> Result<Self> {
        check_parameters(&params)?;
        Ok(Self { params })
    }

    /// The battery's parameters
    pub fn parameters(&self) -> &BatteryParameters {
        &self.params
    }

    /// The state at the start of a run
    pub fn initial_state(&self) -> BatteryState {
        BatteryState {
            soc: self.params.soc_initial,
        }
    }

    /// Apply `command` for a step of length `dt`.
    ///
    /// Charging adds `command * dt * efficiency_charge` to the state of charge; discharging removes
    /// `|command| * dt / efficiency_discharge`. The command is first limited to the rated power
    /// and then truncated so that the state of charge stays within bounds. This never fails: an
    /// infeasible request is degraded to the nearest feasible one.
    pub fn step(&self, state: BatteryState, command: Power, dt: Hours) -> StepOutcome {
        let p = &self.params;

        let mut applied = if command.is_finite() {
            command.max(-p.p_discharge_max).min(p.p_charge_max)
        } else {
            Power(0.0)
        };

        if applied > Power(0.0) {
            let headroom = (p.soc_max - state.soc).max(Energy(0.0));
            applied = applied.min(headroom / dt / p.efficiency_charge);
        } else if applied < Power(0.0) {
            let available = (state.soc - p.soc_min).max(Energy(0.0));
            applied = applied.max(-(available * p.efficiency_discharge / dt));
        }

        let delta = if applied >= Power(0.0) {
            applied * dt * p.efficiency_charge
        } else {
            applied * dt / p.efficiency_discharge
        };
        let soc = (state.soc + delta).max(p.soc_min).min(p.soc_max);

        let grid_power = if applied >= Power(0.0) {
            applied
        } else {
            applied * p.efficiency_discharge
        };

        let clipped = !approx_eq!(
            f64,
            command.value(),
            applied.value(),
            epsilon = CLIP_TOLERANCE
        );
        if clipped {
            debug!("Clipped power command from {command} MW to {applied} MW");
        }

        StepOutcome {
            state: BatteryState { soc },
            applied,
            grid_power,
            clipped,
        }
    }

    /// The cost of a step: energy bought minus energy sold at `price`, plus grid fees on imports
    /// and degradation on throughput.
    ///
    /// `net_load` is what the site draws from the grid besides the battery (negative for a PV
    /// surplus). Fees apply to the combined import only.
    pub fn step_cost(
        &self,
        price: MoneyPerEnergy,
        net_load: Power,
        outcome: &StepOutcome,
        dt: Hours,
    ) -> Money {
        let p = &self.params;
        let grid_energy = (net_load + outcome.grid_power) * dt;
        let imported = grid_energy.max(Energy(0.0));
        let throughput = outcome.applied.abs() * dt;

        price * grid_energy + p.grid_fee * imported + p.degradation_cost * throughput
    }
}

/// Check that the battery parameters are physically consistent
fn check_parameters(p: &BatteryParameters) -> Result<()> {
    let fail = |msg: String| Err(Error::Configuration(msg));

    let all_finite = [
        p.capacity.value(),
        p.soc_min.value(),
        p.soc_max.value(),
        p.soc_initial.value(),
        p.p_charge_max.value(),
        p.p_discharge_max.value(),
        p.efficiency_charge.value(),
        p.efficiency_discharge.value(),
        p.grid_fee.value(),
        p.degradation_cost.value(),
    ]
    .iter()
    .all(|x| x.is_finite());
    if !all_finite {
        return fail("battery parameters must be finite numbers".into());
    }

    if p.capacity <= Energy(0.0) {
        return fail(format!("capacity must be positive (got {})", p.capacity));
    }
    if p.soc_min < Energy(0.0) {
        return fail(format!("soc_min cannot be negative (got {})", p.soc_min));
    }
    if p.soc_min > p.soc_max {
        return fail(format!(
            "soc_min ({}) is greater than soc_max ({})",
            p.soc_min, p.soc_max
        ));
    }
    if p.soc_max > p.capacity {
        return fail(format!(
            "soc_max ({}) exceeds capacity ({})",
            p.soc_max, p.capacity
        ));
    }
    if p.soc_initial < p.soc_min || p.soc_initial > p.soc_max {
        return fail(format!(
            "soc_initial ({}) is outside [{}, {}]",
            p.soc_initial, p.soc_min, p.soc_max
        ));
    }
    if p.p_charge_max < Power(0.0) || p.p_discharge_max < Power(0.0) {
        return fail("maximum charge and discharge power cannot be negative".into());
    }
    for (name, eff) in [
        ("efficiency_charge", p.efficiency_charge),
        ("efficiency_discharge", p.efficiency_discharge),
    ] {
        if eff <= Dimensionless(0.0) || eff > Dimensionless(1.0) {
            return fail(format!("{name} must be in (0, 1] (got {eff})"));
        }
    }
    if p.grid_fee < MoneyPerEnergy(0.0) || p.degradation_cost < MoneyPerEnergy(0.0) {
        return fail("grid_fee and degradation_cost cannot be negative".into());
    }

    Ok(())
}
