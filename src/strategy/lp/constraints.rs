//! Code for adding constraints to the battery scheduling problem.
use super::Variables;
use crate::battery::BatteryParameters;
use crate::units::{Energy, Hours, Power};
use highs::RowProblem as Problem;

/// Add all constraints to the problem.
///
/// # Arguments
///
/// * `problem` - The optimisation problem
/// * `variables` - The variables in the problem
/// * `params` - Battery parameters
/// * `dt` - Duration of one step
/// * `net_load` - The site's net load in each step
/// * `terminal_target` - Lower bound on the final state of charge, if any
pub fn add_constraints(
    problem: &mut Problem,
    variables: &Variables,
    params: &BatteryParameters,
    dt: Hours,
    net_load: &[Power],
    terminal_target: Option<Energy>,
) {
    add_soc_balance_constraints(problem, variables, params, dt);

    if let Some(import) = &variables.import {
        add_import_constraints(problem, variables, import, params, net_load);
    }

    if let Some(target) = terminal_target {
        add_terminal_soc_constraint(problem, variables, target);
    }

    if let Some(mode) = &variables.mode {
        add_exclusivity_constraints(problem, variables, mode, params);
    }
}

/// Link the state of charge in consecutive steps.
///
/// For each step: `s_t - s_{t-1} - Δt·η_c·c_t + (Δt/η_d)·d_t = 0`, where `s_{-1}` is the
/// initial state of charge and so moves to the right-hand side.
fn add_soc_balance_constraints(
    problem: &mut Problem,
    variables: &Variables,
    params: &BatteryParameters,
    dt: Hours,
) {
    let charge_factor = dt.value() * params.efficiency_charge.value();
    let discharge_factor = dt.value() / params.efficiency_discharge.value();
    let initial = params.soc_initial.value();

    for (t, ((&c, &d), &s)) in variables
        .charge
        .iter()
        .zip(&variables.discharge)
        .zip(&variables.soc)
        .enumerate()
    {
        let terms = [(s, 1.0), (c, -charge_factor), (d, discharge_factor)];
        if t == 0 {
            problem.add_row(initial..=initial, terms);
        } else {
            let prev = variables.soc[t - 1];
            problem.add_row(
                0.0..=0.0,
                [terms[0], terms[1], terms[2], (prev, -1.0)],
            );
        }
    }
}

/// Make the import variables at least the power drawn from the grid.
///
/// For each step: `m_t - c_t + η_d·d_t ≥ n_t`. Together with `m_t ≥ 0` and a positive cost on
/// `m_t`, this makes `m_t` the positive part of the grid exchange at the optimum.
fn add_import_constraints(
    problem: &mut Problem,
    variables: &Variables,
    import: &[highs::Col],
    params: &BatteryParameters,
    net_load: &[Power],
) {
    let efficiency = params.efficiency_discharge.value();

    for (((&c, &d), &m), &n) in variables
        .charge
        .iter()
        .zip(&variables.discharge)
        .zip(import)
        .zip(net_load)
    {
        problem.add_row(n.value().., [(m, 1.0), (c, -1.0), (d, efficiency)]);
    }
}

/// Require the state of charge at the end of the horizon to be at least `target`
fn add_terminal_soc_constraint(problem: &mut Problem, variables: &Variables, target: Energy) {
    if let Some(&last) = variables.soc.last() {
        problem.add_row(target.value().., [(last, 1.0)]);
    }
}

/// Forbid charging and discharging in the same step.
///
/// With a binary `u_t` per step: `c_t ≤ p_charge_max·u_t` and
/// `d_t ≤ p_discharge_max·(1 - u_t)`.
fn add_exclusivity_constraints(
    problem: &mut Problem,
    variables: &Variables,
    mode: &[highs::Col],
    params: &BatteryParameters,
) {
    let p_charge = params.p_charge_max.value();
    let p_discharge = params.p_discharge_max.value();

    for ((&c, &d), &u) in variables.charge.iter().zip(&variables.discharge).zip(mode) {
        problem.add_row(..=0.0, [(c, 1.0), (u, -p_charge)]);
        problem.add_row(..=p_discharge, [(d, 1.0), (u, p_discharge)]);
    }
}
