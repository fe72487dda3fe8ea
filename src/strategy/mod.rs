//! Delta-neutral LP strategy.
//!
//! Contains the core logic for:
//! - Volatility estimation and band sizing
//! - Solving the delta-neutral capital split
//! - Opening, monitoring and unwinding the hedged position

mod band;
mod controller;
mod error;
mod optimizer;
mod solver;
mod types;
mod volatility;

pub use band::BandCalculator;
pub use controller::{
    ControllerState, ExitOutcome, ExitReason, InvestOutcome, MarketContext, PositionController,
    SkipReason, TickOutcome,
};
pub use error::{OptimizationError, StrategyError};
pub use optimizer::{band_constants, AllocationOptimizer};
pub use solver::LinearProgram;
pub use types::{Allocation, Band, Position};
pub use volatility::VolatilityEstimator;
