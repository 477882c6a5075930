//! Error types for the simulation core.
//!
//! Each error is raised at the boundary closest to where the problem is detected and is surfaced
//! to the caller unmodified. Clipping of battery commands is not an error.
use thiserror::Error;

/// Why an optimal schedule could not be produced
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InfeasibleKind {
    /// The constraints admit no solution
    #[error("the problem has no feasible solution")]
    Infeasible,
    /// The solver ran out of its wall-clock budget
    #[error("the solver exceeded its time limit of {seconds}s")]
    TimeLimit {
        /// The budget which was exceeded
        seconds: f64,
    },
    /// The solver stopped for some other reason
    #[error("the solver stopped with status {0}")]
    Solver(String),
}

/// An error raised by the simulation core
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// Malformed or non-uniform price series
    #[error("invalid price data: {0}")]
    DataValidation(String),
    /// Inconsistent battery parameters
    #[error("invalid battery configuration: {0}")]
    Configuration(String),
    /// The LP strategy could not compute a schedule
    #[error("could not compute an optimal schedule: {0}")]
    InfeasibleSchedule(#[from] InfeasibleKind),
    /// The strategy name is not recognised
    #[error(
        "unknown strategy \"{0}\" (expected one of: Rule-Based, Threshold-Based, Linear-Programming)"
    )]
    UnknownStrategy(String),
}

/// A [`Result`](std::result::Result) with the core [`Error`] type
pub type Result<T> = std::result::Result<T, Error>;
