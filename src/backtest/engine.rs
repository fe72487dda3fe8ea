//! Backtesting simulation engine.
//!
//! Replays historical market rows through the simulated market and the
//! position controller.

use crate::backtest::metrics::{BacktestMetrics, ReportPoint, RunActivity};
use crate::backtest::{BacktestConfig, DataLoader};
use crate::config::Config;
use crate::market::{ActionRecord, MarketRow, MarketSimulator, PriceSeries, SimulatedMarket};
use crate::strategy::{
    ExitOutcome, InvestOutcome, MarketContext, PositionController, StrategyError, TickOutcome,
};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Complete result of a backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    pub config: Config,
    pub backtest_config: BacktestConfig,
    pub metrics: BacktestMetrics,
    pub report: Vec<ReportPoint>,
    #[serde(skip_deserializing)]
    pub actions: Vec<ActionRecord>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub rows_processed: usize,
    pub control_ticks: usize,
}

impl BacktestResult {
    /// Export the per-row report to CSV.
    pub fn report_to_csv(&self, path: &str) -> Result<()> {
        use std::io::Write;
        let mut file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create report file: {}", path))?;
        writeln!(
            file,
            "timestamp,price,net_value,fee_base,fee_quote,equity,drawdown,invested"
        )?;

        for point in &self.report {
            writeln!(
                file,
                "{},{},{},{},{},{},{},{}",
                point.timestamp.to_rfc3339(),
                point.price,
                point.net_value,
                point.fee_base,
                point.fee_quote,
                point.equity,
                point.drawdown,
                point.invested,
            )?;
        }

        Ok(())
    }

    /// Export the simulator action log as JSON.
    pub fn actions_to_json(&self, path: &str) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.actions)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write action log: {}", path))?;
        Ok(())
    }

    /// Get a summary string.
    pub fn summary(&self) -> String {
        format!(
            "{}\n\nBacktest Period: {} to {}\nRows: {}\nControl Ticks: {}\nActions: {}",
            self.metrics.summary(),
            self.start_time.format("%Y-%m-%d"),
            self.end_time.format("%Y-%m-%d"),
            self.rows_processed,
            self.control_ticks,
            self.actions.len(),
        )
    }
}

/// The backtesting simulation engine.
pub struct BacktestEngine<D: DataLoader> {
    data_loader: D,
    config: Config,
    backtest_config: BacktestConfig,

    // Tracking for metrics
    report: Vec<ReportPoint>,
    peak_equity: Decimal,
    activity: RunActivity,
    control_ticks: usize,
}

impl<D: DataLoader> BacktestEngine<D> {
    /// Create a new backtest engine.
    pub fn new(data_loader: D, config: Config, backtest_config: BacktestConfig) -> Self {
        let initial_balance = backtest_config.initial_balance;

        Self {
            data_loader,
            config,
            backtest_config,
            report: Vec::new(),
            peak_equity: initial_balance,
            activity: RunActivity::default(),
            control_ticks: 0,
        }
    }

    /// Run the backtest from start to end time.
    pub async fn run(
        &mut self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<BacktestResult> {
        info!(
            start = %start.format("%Y-%m-%d %H:%M"),
            end = %end.format("%Y-%m-%d %H:%M"),
            upper_amp = %self.config.strategy.upper_amp,
            lower_amp = %self.config.strategy.lower_amp,
            "Starting backtest"
        );

        // Load historical data
        let rows = self.data_loader.load_rows(start, end)?;
        if rows.is_empty() {
            anyhow::bail!("No data available for the specified time range");
        }

        info!(rows = rows.len(), "Loaded market rows");

        // Reset tracking
        self.report.clear();
        self.peak_equity = self.backtest_config.initial_balance;
        self.activity = RunActivity::default();
        self.control_ticks = 0;

        let base_asset = self.config.market.base_asset.clone();
        let feed = Arc::new(PriceSeries::from_rows(&rows, &base_asset));

        let mut market = SimulatedMarket::new(self.config.market.clone());
        market.set_balance(
            &self.config.market.quote_asset,
            self.backtest_config.initial_balance,
        );
        let mut controller = PositionController::new(MarketContext::new(market, feed), &self.config);

        let interval = Duration::minutes(i64::from(self.backtest_config.control_interval_minutes));
        let mut next_control: Option<DateTime<Utc>> = None;

        for (i, row) in rows.iter().enumerate() {
            controller.market_mut().update(row);

            // Fires on the first row, then once per interval
            if next_control.map_or(true, |t| row.timestamp >= t) {
                self.control(&mut controller, row).await?;
                next_control = Some(row.timestamp + interval);
            }

            if self.backtest_config.record_report {
                let point = self.report_point(&controller, row)?;
                if point.equity > self.peak_equity {
                    self.peak_equity = point.equity;
                }
                self.report.push(point);
            }

            // Progress logging
            if i % 10_000 == 0 {
                debug!(
                    progress = format!("{}/{}", i, rows.len()),
                    invested = controller.position().is_some(),
                    "Backtest progress"
                );
            }
        }

        let market = controller.into_context().market;
        self.activity.swap_fees_paid = market.total_swap_fees();
        self.activity.interest_paid = market.total_interest_paid();

        // Calculate metrics
        let metrics = BacktestMetrics::calculate(
            &self.report,
            self.backtest_config.initial_balance,
            &self.activity,
        );

        info!(
            total_return_pct = %metrics.total_return_pct.round_dp(4),
            positions_opened = metrics.positions_opened,
            positions_closed = metrics.positions_closed,
            "Backtest complete"
        );

        Ok(BacktestResult {
            config: self.config.clone(),
            backtest_config: self.backtest_config.clone(),
            metrics,
            report: self.report.clone(),
            actions: market.actions().to_vec(),
            start_time: start,
            end_time: end,
            rows_processed: rows.len(),
            control_ticks: self.control_ticks,
        })
    }

    /// Run one controller tick and tally what it did.
    ///
    /// Optimizer failures leave the controller idle and the run continues;
    /// simulator failures abort the run.
    async fn control(
        &mut self,
        controller: &mut PositionController<SimulatedMarket>,
        row: &MarketRow,
    ) -> Result<()> {
        self.control_ticks += 1;
        let entered_at = controller.entry_timestamp();

        let outcome = controller
            .on_tick(row)
            .await
            .with_context(|| format!("Exit failed at {}", row.timestamp))?;

        self.record_tick(outcome, entered_at, row)
    }

    /// Tally a tick. The exit is recorded before the reinvest result is looked at.
    fn record_tick(
        &mut self,
        outcome: TickOutcome,
        entered_at: Option<DateTime<Utc>>,
        row: &MarketRow,
    ) -> Result<()> {
        if let Some(ExitOutcome::Closed { reason, .. }) = &outcome.exit {
            let held_hours = entered_at
                .map(|t| (row.timestamp - t).num_minutes() as f64 / 60.0)
                .unwrap_or(0.0);
            self.activity.record_exit(reason.label(), held_hours);
        }

        match outcome.invest {
            Ok(InvestOutcome::Opened(_)) => self.activity.positions_opened += 1,
            Ok(InvestOutcome::Skipped(reason)) => self.activity.record_skip(reason.label()),
            Ok(InvestOutcome::AlreadyInvested) => {}
            Err(StrategyError::Optimization(e)) => {
                self.activity.optimizer_failures += 1;
                warn!(timestamp = %row.timestamp, error = %e, "Allocation failed, staying idle");
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Controller tick failed at {}", row.timestamp))
            }
        }

        Ok(())
    }

    fn report_point(
        &self,
        controller: &PositionController<SimulatedMarket>,
        row: &MarketRow,
    ) -> Result<ReportPoint> {
        let base = &self.config.market.base_asset;
        let price = row
            .price(base)
            .with_context(|| format!("Missing {} price at {}", base, row.timestamp))?;

        let net_value = controller.net_value(row)?;
        let fees = controller.accumulated_fees();
        let balance = controller.market().market_balance();
        let uncollected_value = balance.uncollected_base * price + balance.uncollected_quote;

        Ok(ReportPoint::new(
            row.timestamp,
            price,
            net_value,
            fees.base,
            fees.quote,
            uncollected_value,
            controller.position().is_some(),
            self.peak_equity,
        ))
    }

    /// Get the report recorded so far.
    pub fn report(&self) -> &[ReportPoint] {
        &self.report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::CsvDataLoader;
    use crate::market::{CollectedFees, MarketError};
    use crate::strategy::{ExitReason, OptimizationError};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    // =========================================================================
    // Test Helpers
    // =========================================================================

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
    }

    fn test_backtest_config() -> BacktestConfig {
        BacktestConfig {
            initial_balance: dec!(10000),
            control_interval_minutes: 60,
            record_report: true,
            output_path: None,
        }
    }

    /// Minute rows alternating between 1 and `1 + step`.
    fn rows(minutes: i64, step: Decimal) -> Vec<MarketRow> {
        (0..minutes)
            .map(|i| {
                let price = if i % 2 == 0 { dec!(1) } else { dec!(1) + step };
                let mut prices = HashMap::new();
                prices.insert("WETH".to_string(), price);
                prices.insert("USDC".to_string(), dec!(1));
                MarketRow::new(t0() + Duration::minutes(i), prices)
                    .with_activity(dec!(1000), dec!(0))
            })
            .collect()
    }

    fn engine(
        rows: Vec<MarketRow>,
        config: Config,
    ) -> BacktestEngine<CsvDataLoader> {
        BacktestEngine::new(CsvDataLoader::from_rows(rows), config, test_backtest_config())
    }

    // =========================================================================
    // Run Tests
    // =========================================================================

    #[tokio::test]
    async fn test_run_with_empty_data() {
        let mut engine = engine(rows(10, dec!(0.00007)), Config::default());

        let start = t0() + Duration::days(10);
        let result = engine.run(start, start + Duration::days(1)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_stable_market_opens_once() {
        let mut config = Config::default();
        config.strategy.target_delta = dec!(-0.01);
        let mut engine = engine(rows(240, dec!(0.00007)), config);

        let result = engine
            .run(t0(), t0() + Duration::minutes(240))
            .await
            .unwrap();

        assert_eq!(result.rows_processed, 240);
        assert_eq!(result.control_ticks, 4);
        assert_eq!(result.report.len(), 240);
        assert_eq!(result.metrics.positions_opened, 1);
        assert_eq!(result.metrics.positions_closed, 0);
        assert!(result.report.iter().all(|p| p.invested));

        // Pool volume pays fees while in range
        let last = result.report.last().unwrap();
        assert!(last.fee_quote > Decimal::ZERO);
        assert!(last.equity > last.net_value);

        let kinds: Vec<_> = result.actions.iter().map(|a| a.action.kind()).collect();
        assert_eq!(kinds, vec!["supply", "borrow", "sell", "add_liquidity"]);
    }

    #[tokio::test]
    async fn test_unstable_market_is_skipped_every_tick() {
        let mut engine = engine(rows(180, dec!(0.01)), Config::default());

        let result = engine
            .run(t0(), t0() + Duration::minutes(180))
            .await
            .unwrap();

        assert_eq!(result.metrics.positions_opened, 0);
        assert_eq!(result.metrics.skips.get("market_unstable"), Some(&3));
        assert!(result.actions.is_empty());
        assert_eq!(result.report.last().unwrap().net_value, dec!(10000));
    }

    #[tokio::test]
    async fn test_optimizer_failures_are_counted_and_run_continues() {
        let mut config = Config::default();
        config.strategy.target_delta = dec!(0.05);
        let mut engine = engine(rows(120, dec!(0.00007)), config);

        let result = engine
            .run(t0(), t0() + Duration::minutes(120))
            .await
            .unwrap();

        assert_eq!(result.metrics.optimizer_failures, 2);
        assert_eq!(result.metrics.positions_opened, 0);
        assert_eq!(result.report.len(), 120);
    }

    #[tokio::test]
    async fn test_no_report_when_disabled() {
        let rows = rows(60, dec!(0.00007));
        let mut engine = BacktestEngine::new(
            CsvDataLoader::from_rows(rows),
            Config::default(),
            BacktestConfig {
                record_report: false,
                ..test_backtest_config()
            },
        );

        let result = engine.run(t0(), t0() + Duration::hours(1)).await.unwrap();
        assert!(result.report.is_empty());
        assert_eq!(result.control_ticks, 1);
        assert!(engine.report().is_empty());
    }

    #[test]
    fn test_exit_counted_when_reinvest_fails() {
        let mut engine = engine(rows(10, dec!(0.00007)), Config::default());
        let tick_rows = rows(1, dec!(0.00007));
        let row = &tick_rows[0];

        let outcome = TickOutcome {
            exit: Some(ExitOutcome::Closed {
                reason: ExitReason::OutOfRange {
                    price: dec!(1.1),
                    low: dec!(0.975),
                    high: dec!(1.045),
                },
                fees: CollectedFees::default(),
            }),
            invest: Err(StrategyError::Optimization(OptimizationError::Infeasible)),
        };
        engine
            .record_tick(outcome, Some(row.timestamp - Duration::hours(3)), row)
            .unwrap();

        assert_eq!(engine.activity.positions_closed, 1);
        assert_eq!(engine.activity.exits.get("out_of_range"), Some(&1));
        assert_eq!(engine.activity.total_position_hours, 3.0);
        assert_eq!(engine.activity.optimizer_failures, 1);

        // Simulator failures still abort, after the exit is tallied
        let outcome = TickOutcome {
            exit: Some(ExitOutcome::Closed {
                reason: ExitReason::NetValueDrift {
                    current: dec!(10300),
                    entry: dec!(10000),
                },
                fees: CollectedFees::default(),
            }),
            invest: Err(StrategyError::Market(MarketError::InvalidAmount(Decimal::ZERO))),
        };
        assert!(engine.record_tick(outcome, None, row).is_err());
        assert_eq!(engine.activity.positions_closed, 2);
    }

    // =========================================================================
    // BacktestResult Tests
    // =========================================================================

    #[tokio::test]
    async fn test_report_csv_and_summary() {
        let mut engine = engine(rows(120, dec!(0.00007)), Config::default());
        let result = engine
            .run(t0(), t0() + Duration::minutes(120))
            .await
            .unwrap();

        let path = std::env::temp_dir().join(format!("lpdh-report-{}.csv", std::process::id()));
        let path = path.to_string_lossy().to_string();
        result.report_to_csv(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 121);
        assert!(content.starts_with("timestamp,price,net_value"));
        std::fs::remove_file(&path).ok();

        let summary = result.summary();
        assert!(summary.contains("Backtest Period"));
        assert!(summary.contains("Rows: 120"));
    }
}
