//! Market layer: lending venue and AMM pool abstraction plus the in-process simulator.

pub mod amm;
pub mod error;
pub mod feed;
pub mod simulated;
pub mod traits;
pub mod types;

pub use error::MarketError;
pub use feed::{MarketRow, PriceSeries};
pub use simulated::SimulatedMarket;
pub use traits::MarketSimulator;
#[cfg(test)]
pub use traits::MockMarketSimulator;
pub use types::*;
