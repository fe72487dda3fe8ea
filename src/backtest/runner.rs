//! Parameter sweep runner for backtesting optimization.
//!
//! Runs one backtest per `(upper_amp, lower_amp)` pair in parallel.

use crate::backtest::{result_file_name, BacktestConfig, BacktestEngine, BacktestResult, DataLoader};
use crate::config::Config;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn};

/// Band multipliers to explore during a sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmpSpace {
    pub upper_amps: Vec<Decimal>,
    pub lower_amps: Vec<Decimal>,
}

impl Default for AmpSpace {
    fn default() -> Self {
        Self {
            upper_amps: vec![dec!(0.5), dec!(0.7), dec!(0.9), dec!(1.1), dec!(1.3)],
            lower_amps: vec![dec!(0.3), dec!(0.5), dec!(0.7), dec!(0.9)],
        }
    }
}

impl AmpSpace {
    /// Create a minimal space for quick testing.
    pub fn minimal() -> Self {
        Self {
            upper_amps: vec![dec!(0.9)],
            lower_amps: vec![dec!(0.5)],
        }
    }

    /// Count total number of combinations.
    pub fn combination_count(&self) -> usize {
        self.upper_amps.len() * self.lower_amps.len()
    }

    /// Generate all config combinations, upper multiplier outermost.
    pub fn generate_configs(&self, base_config: &Config) -> Vec<Config> {
        let mut configs = Vec::with_capacity(self.combination_count());

        for &upper_amp in &self.upper_amps {
            for &lower_amp in &self.lower_amps {
                let mut config = base_config.clone();
                config.strategy.upper_amp = upper_amp;
                config.strategy.lower_amp = lower_amp;
                configs.push(config);
            }
        }

        configs
    }

    /// Describe a config's swept values.
    pub fn describe_config(config: &Config) -> String {
        format!(
            "upper_amp={} lower_amp={} alpha={}",
            config.strategy.upper_amp.normalize(),
            config.strategy.lower_amp.normalize(),
            config.strategy.alpha.normalize(),
        )
    }
}

/// Results from a parameter sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepResults {
    /// All completed run results
    pub runs: Vec<(Config, BacktestResult)>,

    /// Best config by Sharpe ratio
    pub best_by_sharpe: Option<usize>,

    /// Best config by total return
    pub best_by_return: Option<usize>,

    /// Best config by Calmar ratio (return/drawdown)
    pub best_by_calmar: Option<usize>,

    /// Total combinations in the space
    pub total_combinations: usize,

    /// Runs skipped because their result file already existed
    pub skipped_runs: usize,

    /// Successful runs
    pub successful_runs: usize,

    /// Failed runs
    pub failed_runs: usize,
}

impl SweepResults {
    /// Get the best result by Sharpe ratio.
    pub fn best_sharpe(&self) -> Option<&(Config, BacktestResult)> {
        self.best_by_sharpe.and_then(|i| self.runs.get(i))
    }

    /// Get the best result by total return.
    pub fn best_return(&self) -> Option<&(Config, BacktestResult)> {
        self.best_by_return.and_then(|i| self.runs.get(i))
    }

    /// Get the best result by Calmar ratio.
    pub fn best_calmar(&self) -> Option<&(Config, BacktestResult)> {
        self.best_by_calmar.and_then(|i| self.runs.get(i))
    }

    /// Export results to CSV.
    pub fn to_csv(&self, path: &str) -> Result<()> {
        use std::io::Write;
        let mut file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create sweep file: {}", path))?;

        writeln!(
            file,
            "upper_amp,lower_amp,total_return_pct,sharpe_ratio,calmar_ratio,max_dd_pct,fee_value_earned,positions_opened,positions_closed,optimizer_failures"
        )?;

        for (config, result) in &self.runs {
            writeln!(
                file,
                "{},{},{},{},{},{},{},{},{},{}",
                config.strategy.upper_amp,
                config.strategy.lower_amp,
                result.metrics.total_return_pct,
                result.metrics.sharpe_ratio,
                result.metrics.calmar_ratio,
                result.metrics.max_drawdown * dec!(100),
                result.metrics.fee_value_earned,
                result.metrics.positions_opened,
                result.metrics.positions_closed,
                result.metrics.optimizer_failures,
            )?;
        }

        Ok(())
    }

    /// Generate a summary comparison table.
    pub fn summary(&self) -> String {
        let mut s = String::new();

        s.push_str("═══════════════════════════════════════════════════════════════\n");
        s.push_str("BAND SWEEP RESULTS\n");
        s.push_str("═══════════════════════════════════════════════════════════════\n");
        s.push_str(&format!(
            "Total: {} | Successful: {} | Skipped: {} | Failed: {}\n\n",
            self.total_combinations, self.successful_runs, self.skipped_runs, self.failed_runs
        ));

        if let Some((config, result)) = self.best_return() {
            s.push_str("BEST BY RETURN:\n");
            s.push_str(&format!("  Config: {}\n", AmpSpace::describe_config(config)));
            s.push_str(&format!(
                "  Return: {:.2}% | Sharpe: {:.3} | MaxDD: {:.2}%\n\n",
                result.metrics.total_return_pct,
                result.metrics.sharpe_ratio,
                result.metrics.max_drawdown * dec!(100)
            ));
        }

        if let Some((config, result)) = self.best_sharpe() {
            s.push_str("BEST BY SHARPE RATIO:\n");
            s.push_str(&format!("  Config: {}\n", AmpSpace::describe_config(config)));
            s.push_str(&format!(
                "  Sharpe: {:.3} | Return: {:.2}% | MaxDD: {:.2}%\n\n",
                result.metrics.sharpe_ratio,
                result.metrics.total_return_pct,
                result.metrics.max_drawdown * dec!(100)
            ));
        }

        if let Some((config, result)) = self.best_calmar() {
            s.push_str("BEST BY CALMAR RATIO:\n");
            s.push_str(&format!("  Config: {}\n", AmpSpace::describe_config(config)));
            s.push_str(&format!(
                "  Calmar: {:.3} | Return: {:.2}% | MaxDD: {:.2}%\n",
                result.metrics.calmar_ratio,
                result.metrics.total_return_pct,
                result.metrics.max_drawdown * dec!(100)
            ));
        }

        s.push_str("═══════════════════════════════════════════════════════════════\n");

        s
    }
}

/// Outcome of one sweep task.
enum RunOutcome {
    Completed(Box<(Config, BacktestResult)>),
    Skipped,
    Failed,
}

/// Parameter sweep runner for parallel backtesting.
pub struct SweepRunner {
    amp_space: AmpSpace,
    base_config: Config,
    backtest_config: BacktestConfig,
    parallelism: usize,
    output_dir: Option<PathBuf>,
}

impl SweepRunner {
    /// Create a new sweep runner.
    pub fn new(
        amp_space: AmpSpace,
        base_config: Config,
        backtest_config: BacktestConfig,
        parallelism: usize,
    ) -> Self {
        Self {
            amp_space,
            base_config,
            backtest_config,
            parallelism: parallelism.max(1),
            output_dir: None,
        }
    }

    /// Write each run's report to `dir`, skipping runs whose file already exists.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    /// Run the parameter sweep.
    pub async fn run<D: DataLoader + Clone + Send + Sync + 'static>(
        &self,
        data_loader: D,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<SweepResults> {
        let configs = self.amp_space.generate_configs(&self.base_config);
        let total_combinations = configs.len();

        if let Some(dir) = &self.output_dir {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create output dir: {}", dir.display()))?;
        }

        info!(
            combinations = total_combinations,
            parallelism = self.parallelism,
            "Starting band sweep"
        );

        let semaphore = Arc::new(Semaphore::new(self.parallelism));
        let data_loader = Arc::new(data_loader);

        let mut handles = Vec::with_capacity(configs.len());

        for (i, config) in configs.into_iter().enumerate() {
            let sem = semaphore.clone();
            let loader = data_loader.clone();
            let bt_config = self.backtest_config.clone();
            let output = self.output_dir.as_ref().map(|dir| {
                dir.join(format!(
                    "{}.csv",
                    result_file_name(
                        config.strategy.upper_amp,
                        config.strategy.lower_amp,
                        start,
                        end
                    )
                ))
            });

            let handle = tokio::spawn(async move {
                let Ok(_permit) = sem.acquire().await else {
                    return RunOutcome::Failed;
                };
                let label = AmpSpace::describe_config(&config);

                if let Some(path) = output.as_deref().filter(|p| p.exists()) {
                    info!(run = i + 1, total = total_combinations, path = %path.display(), "Result exists, skipping");
                    return RunOutcome::Skipped;
                }

                info!(run = i + 1, total = total_combinations, config = %label, "Testing");

                let mut engine = BacktestEngine::new((*loader).clone(), config.clone(), bt_config);

                let result = match engine.run(start, end).await {
                    Ok(result) => result,
                    Err(e) => {
                        warn!(run = i + 1, config = %label, error = %e, "Run failed");
                        return RunOutcome::Failed;
                    }
                };

                if let Some(path) = output.as_deref() {
                    if let Err(e) = write_report(&result, path) {
                        warn!(run = i + 1, config = %label, error = %e, "Failed to write report");
                        return RunOutcome::Failed;
                    }
                }

                info!(
                    run = i + 1,
                    total = total_combinations,
                    sharpe = %result.metrics.sharpe_ratio.round_dp(3),
                    return_pct = %result.metrics.total_return_pct.round_dp(2),
                    "Run complete"
                );
                RunOutcome::Completed(Box::new((config, result)))
            });

            handles.push(handle);
        }

        // Collect results
        let mut runs = Vec::new();
        let mut skipped_runs = 0;
        let mut failed_runs = 0;

        for handle in handles {
            match handle.await {
                Ok(RunOutcome::Completed(run)) => runs.push(*run),
                Ok(RunOutcome::Skipped) => skipped_runs += 1,
                Ok(RunOutcome::Failed) => failed_runs += 1,
                Err(e) => {
                    warn!(error = %e, "Sweep task panicked");
                    failed_runs += 1;
                }
            }
        }

        let best_by_sharpe = best_by(&runs, |r| r.metrics.sharpe_ratio);
        let best_by_return = best_by(&runs, |r| r.metrics.total_return_pct);
        let best_by_calmar = best_by(&runs, |r| r.metrics.calmar_ratio);

        let successful_runs = runs.len();
        Ok(SweepResults {
            runs,
            best_by_sharpe,
            best_by_return,
            best_by_calmar,
            total_combinations,
            skipped_runs,
            successful_runs,
            failed_runs,
        })
    }
}

fn best_by(
    runs: &[(Config, BacktestResult)],
    key: impl Fn(&BacktestResult) -> Decimal,
) -> Option<usize> {
    runs.iter()
        .enumerate()
        .max_by_key(|(_, (_, result))| key(result))
        .map(|(i, _)| i)
}

fn write_report(result: &BacktestResult, path: &Path) -> Result<()> {
    let path = path
        .to_str()
        .with_context(|| format!("Non UTF-8 output path: {}", path.display()))?;
    result.report_to_csv(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::CsvDataLoader;
    use crate::market::MarketRow;
    use chrono::{Duration, TimeZone};
    use std::collections::HashMap;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
    }

    fn loader(minutes: i64) -> CsvDataLoader {
        let rows = (0..minutes)
            .map(|i| {
                let price = if i % 2 == 0 { dec!(1) } else { dec!(1.00007) };
                let mut prices = HashMap::new();
                prices.insert("WETH".to_string(), price);
                prices.insert("USDC".to_string(), dec!(1));
                MarketRow::new(t0() + Duration::minutes(i), prices)
                    .with_activity(dec!(1000), dec!(0))
            })
            .collect();
        CsvDataLoader::from_rows(rows)
    }

    // =========================================================================
    // AmpSpace Tests
    // =========================================================================

    #[test]
    fn test_amp_space_count() {
        assert_eq!(AmpSpace::default().combination_count(), 5 * 4);
        assert_eq!(AmpSpace::minimal().combination_count(), 1);
    }

    #[test]
    fn test_generate_configs() {
        let space = AmpSpace {
            upper_amps: vec![dec!(0.8), dec!(1.0)],
            lower_amps: vec![dec!(0.4), dec!(0.6)],
        };

        let configs = space.generate_configs(&Config::default());

        assert_eq!(configs.len(), 4);
        assert_eq!(configs[0].strategy.upper_amp, dec!(0.8));
        assert_eq!(configs[0].strategy.lower_amp, dec!(0.4));
        assert_eq!(configs[1].strategy.lower_amp, dec!(0.6));
        assert_eq!(configs[3].strategy.upper_amp, dec!(1.0));
        // Everything else comes from the base config
        assert_eq!(configs[3].strategy.alpha, dec!(0.7));
    }

    #[test]
    fn test_describe_config() {
        let desc = AmpSpace::describe_config(&Config::default());
        assert_eq!(desc, "upper_amp=0.9 lower_amp=0.5 alpha=0.7");
    }

    // =========================================================================
    // SweepRunner Tests
    // =========================================================================

    #[tokio::test]
    async fn test_sweep_runs_every_pair_and_picks_best() {
        let space = AmpSpace {
            upper_amps: vec![dec!(0.9)],
            lower_amps: vec![dec!(0.5), dec!(0.7)],
        };
        let runner = SweepRunner::new(space, Config::default(), BacktestConfig::default(), 2);

        let results = runner
            .run(loader(120), t0(), t0() + Duration::minutes(120))
            .await
            .unwrap();

        assert_eq!(results.total_combinations, 2);
        assert_eq!(results.successful_runs, 2);
        assert_eq!(results.failed_runs, 0);
        assert!(results.best_return().is_some());
        assert!(results.summary().contains("BEST BY RETURN"));
    }

    #[tokio::test]
    async fn test_sweep_skips_existing_results() {
        let dir = std::env::temp_dir().join(format!("lpdh-sweep-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);

        let runner = SweepRunner::new(
            AmpSpace::minimal(),
            Config::default(),
            BacktestConfig::default(),
            1,
        )
        .with_output_dir(&dir);

        let end = t0() + Duration::minutes(120);
        let first = runner.run(loader(120), t0(), end).await.unwrap();
        assert_eq!(first.successful_runs, 1);
        assert!(dir.join("0.9-0.5.20240301~20240301.csv").exists());

        let second = runner.run(loader(120), t0(), end).await.unwrap();
        assert_eq!(second.successful_runs, 0);
        assert_eq!(second.skipped_runs, 1);
        assert!(second.best_return().is_none());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_failed_runs_are_counted() {
        let runner = SweepRunner::new(
            AmpSpace::minimal(),
            Config::default(),
            BacktestConfig::default(),
            1,
        );

        // No rows in range
        let start = t0() + Duration::days(30);
        let results = runner
            .run(loader(60), start, start + Duration::hours(1))
            .await
            .unwrap();

        assert_eq!(results.failed_runs, 1);
        assert_eq!(results.successful_runs, 0);
    }
}
