//! Backtesting module for the delta-neutral LP strategy.
//!
//! This module provides:
//! - Historical price loading (CSV import)
//! - Row-by-row replay through the simulated market and position controller
//! - Parameter sweep over band multipliers
//! - Performance metrics calculation
//!
//! # Example
//!
//! ```rust,ignore
//! use lp_delta_hedger::backtest::{BacktestConfig, BacktestEngine, CsvDataLoader};
//!
//! let loader = CsvDataLoader::new("data/weth_usdc_1m.csv", "WETH", "USDC")?;
//! let mut engine = BacktestEngine::new(loader, Config::default(), BacktestConfig::default());
//!
//! let result = engine.run(start, end).await?;
//! println!("Return: {:.2}%", result.metrics.total_return_pct);
//! ```

mod data;
mod engine;
mod metrics;
mod runner;

pub use data::{CsvDataLoader, DataLoader};
pub use engine::{BacktestEngine, BacktestResult};
pub use metrics::{BacktestMetrics, ReportPoint, RunActivity};
pub use runner::{AmpSpace, SweepResults, SweepRunner};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Configuration for a backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    /// Initial capital for the backtest, in quote units
    pub initial_balance: Decimal,

    /// Minutes between controller ticks.
    /// The market is updated on every row regardless.
    pub control_interval_minutes: u32,

    /// Whether to record a report point for every row
    pub record_report: bool,

    /// Directory for result files (optional)
    pub output_path: Option<String>,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_balance: Decimal::new(10000, 0), // $10,000
            control_interval_minutes: 60,            // hourly, like the live trigger
            record_report: true,
            output_path: None,
        }
    }
}

/// Result file stem for one run: `"{upper}-{lower}.{YYYYMMDD}~{YYYYMMDD}"`.
pub fn result_file_name(
    upper_amp: Decimal,
    lower_amp: Decimal,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> String {
    format!(
        "{}-{}.{}~{}",
        upper_amp.normalize(),
        lower_amp.normalize(),
        start.format("%Y%m%d"),
        end.format("%Y%m%d")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn test_result_file_name() {
        let start = Utc.with_ymd_and_hms(2023, 8, 13, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2023, 8, 17, 23, 59, 0).unwrap();

        assert_eq!(
            result_file_name(dec!(0.9), dec!(0.50), start, end),
            "0.9-0.5.20230813~20230817"
        );
    }

    #[test]
    fn test_default_config() {
        let config = BacktestConfig::default();
        assert_eq!(config.initial_balance, dec!(10000));
        assert_eq!(config.control_interval_minutes, 60);
        assert!(config.record_report);
    }
}
