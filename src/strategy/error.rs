//! Strategy-level errors.

use thiserror::Error;

use crate::market::MarketError;

/// Why the allocation optimizer produced no allocation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OptimizationError {
    #[error("invalid optimizer input: {0}")]
    InvalidInput(String),

    #[error("allocation constraints are infeasible")]
    Infeasible,

    #[error("allocation objective is unbounded")]
    Unbounded,

    #[error("solver did not converge within {0} iterations")]
    IterationLimit(usize),

    #[error("constraint `{constraint}` violated by {residual:e}")]
    ConstraintViolation { constraint: String, residual: f64 },
}

/// Failure of a controller tick.
#[derive(Debug, Error)]
pub enum StrategyError {
    #[error(transparent)]
    Optimization(#[from] OptimizationError),

    #[error(transparent)]
    Market(#[from] MarketError),

    #[error("no price for {0} in market row")]
    MissingPrice(String),
}
