//! Running several independent strategies over the same price series in parallel.
use super::{RunResult, Simulator};
use crate::error::Result;
use crate::price::PriceSeries;
use crate::strategy::Strategy;
use crossbeam_channel::{bounded, unbounded};
use log::{debug, warn};
use std::num::NonZeroUsize;
use std::thread;

/// One run in a batch
#[derive(Debug, Clone)]
pub struct BatchRun {
    /// A name identifying the run in reports
    pub label: String,
    /// The strategy to run
    pub strategy: Strategy,
}

/// The outcome of one run in a batch
#[derive(Debug)]
pub struct BatchOutcome {
    /// The label of the run
    pub label: String,
    /// The result, or the error which stopped this run
    pub result: Result<RunResult>,
}

/// Execute `runs` on up to `threads` worker threads.
///
/// Each run gets its own copy of `simulator` and its own battery state, so runs share nothing
/// mutable. A failing run does not stop the others. Outcomes are returned in the same order as
/// `runs`.
pub fn run_batch(
    prices: &PriceSeries,
    simulator: &Simulator,
    runs: Vec<BatchRun>,
    threads: NonZeroUsize,
) -> Vec<BatchOutcome> {
    let n_runs = runs.len();
    let n_workers = threads.get().min(n_runs);
    debug!("Running batch of {n_runs} runs on {n_workers} threads");

    let (job_tx, job_rx) = bounded::<(usize, BatchRun)>(n_workers.max(1));
    let (outcome_tx, outcome_rx) = unbounded();

    thread::scope(|scope| {
        for _ in 0..n_workers {
            let job_rx = job_rx.clone();
            let outcome_tx = outcome_tx.clone();
            scope.spawn(move || {
                for (index, run) in job_rx {
                    let simulator = simulator.clone();
                    let result = simulator.run(prices, &run.strategy);
                    if let Err(err) = &result {
                        warn!("Run \"{}\" failed: {err}", run.label);
                    }

                    let outcome = BatchOutcome {
                        label: run.label,
                        result,
                    };

                    // The receiver outlives the scope, so this cannot fail
                    let _ = outcome_tx.send((index, outcome));
                }
            });
        }
        drop(job_rx);
        drop(outcome_tx);

        for job in runs.into_iter().enumerate() {
            if job_tx.send(job).is_err() {
                break;
            }
        }
        drop(job_tx);
    });

    let mut outcomes: Vec<_> = outcome_rx.into_iter().collect();
    outcomes.sort_by_key(|(index, _)| *index);
    outcomes.into_iter().map(|(_, outcome)| outcome).collect()
}
