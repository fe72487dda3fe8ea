//! # LP Delta Hedger
//!
//! Delta-neutral concentrated-liquidity market making: capital is split
//! between a lending venue and an AMM range so that the borrowed base asset
//! offsets the pool's exposure.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `market`: Market simulator contract, price feed, AMM math and an in-process simulator
//! - `strategy`: Volatility, band sizing, the allocation LP and the position controller
//! - `backtest`: Historical replay, parameter sweeps and performance metrics
//! - `utils`: Shared utilities and decimal arithmetic

pub mod backtest;
pub mod config;
pub mod market;
pub mod strategy;
pub mod utils;

pub use config::Config;
