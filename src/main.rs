//! LP Delta Hedger - Main Entry Point
//!
//! Backtests, band sweeps and one-off allocation solves.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use lp_delta_hedger::backtest::{
    result_file_name, AmpSpace, BacktestConfig, BacktestEngine, CsvDataLoader, DataLoader,
    SweepRunner,
};
use lp_delta_hedger::config::Config;
use lp_delta_hedger::strategy::{band_constants, AllocationOptimizer};
use rust_decimal::Decimal;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// LP Delta Hedger CLI
#[derive(Parser)]
#[command(name = "lp-delta-hedger")]
#[command(version, about = "Delta-neutral concentrated liquidity hedged on a lending venue")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a backtest simulation on historical data
    Backtest {
        /// Path to CSV data file
        #[arg(short, long)]
        data: String,

        /// Start date (YYYY-MM-DD)
        #[arg(short, long)]
        start: String,

        /// End date (YYYY-MM-DD)
        #[arg(short, long)]
        end: String,

        /// Initial balance for simulation, in quote units
        #[arg(short = 'b', long, default_value = "10000")]
        initial_balance: Decimal,

        /// Upper band multiplier (overrides config)
        #[arg(long)]
        upper_amp: Option<Decimal>,

        /// Lower band multiplier (overrides config)
        #[arg(long)]
        lower_amp: Option<Decimal>,

        /// Output directory for results
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Run a sweep over band multipliers
    Sweep {
        /// Path to CSV data file
        #[arg(short, long)]
        data: String,

        /// Start date (YYYY-MM-DD)
        #[arg(short, long)]
        start: String,

        /// End date (YYYY-MM-DD)
        #[arg(short, long)]
        end: String,

        /// Initial balance for simulation, in quote units
        #[arg(short = 'b', long, default_value = "10000")]
        initial_balance: Decimal,

        /// Number of parallel backtests
        #[arg(short, long, default_value = "4")]
        parallelism: usize,

        /// Output directory for per-run reports and the sweep table
        #[arg(short, long)]
        output: Option<String>,

        /// Use minimal amp space (faster, for testing)
        #[arg(long)]
        minimal: bool,
    },

    /// Solve the capital allocation for a band
    Solve {
        /// Upper band ratio (> 1)
        h: f64,

        /// Lower band ratio (0 < l < 1)
        l: f64,

        /// Loan-to-value ratio (0 < alpha < 1)
        alpha: f64,

        /// Target net delta (<= 0)
        #[arg(default_value = "0", allow_negative_numbers = true)]
        delta: f64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    init_logging()?;

    match cli.command {
        Commands::Backtest {
            data,
            start,
            end,
            initial_balance,
            upper_amp,
            lower_amp,
            output,
        } => {
            run_backtest(
                &data,
                &start,
                &end,
                initial_balance,
                upper_amp,
                lower_amp,
                output.as_deref(),
            )
            .await
        }
        Commands::Sweep {
            data,
            start,
            end,
            initial_balance,
            parallelism,
            output,
            minimal,
        } => {
            run_sweep(
                &data,
                &start,
                &end,
                initial_balance,
                parallelism,
                output.as_deref(),
                minimal,
            )
            .await
        }
        Commands::Solve { h, l, alpha, delta } => solve(h, l, alpha, delta),
    }
}

/// Initialize logging to stdout and an hourly rolling file.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "lp-delta-hedger.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Keep the writer alive for the program duration
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("lp_delta_hedger=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}

/// Load and validate config from file and environment.
fn load_config() -> Result<Config> {
    let config = Config::load()?;
    config.validate()?;
    log_config(&config);
    Ok(config)
}

fn log_config(config: &Config) {
    let s = &config.strategy;
    let m = &config.market;
    info!(
        upper_amp = %s.upper_amp,
        lower_amp = %s.lower_amp,
        alpha = %s.alpha,
        rebalance_tolerance = %s.rebalance_tolerance,
        volatility_threshold = %s.volatility_threshold,
        target_delta = %s.target_delta,
        "Strategy configuration"
    );
    info!(
        pair = format!("{}/{}", m.base_asset, m.quote_asset),
        fee_rate = %m.fee_rate,
        max_ltv = %m.max_ltv,
        "Market configuration"
    );
}

/// Parse `YYYY-MM-DD` bounds into a full-day UTC range.
fn parse_period(start_str: &str, end_str: &str) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let start_date = NaiveDate::parse_from_str(start_str, "%Y-%m-%d")
        .with_context(|| format!("Invalid start date '{}'", start_str))?;
    let end_date = NaiveDate::parse_from_str(end_str, "%Y-%m-%d")
        .with_context(|| format!("Invalid end date '{}'", end_str))?;
    anyhow::ensure!(start_date <= end_date, "Start date is after end date");

    let start = start_date
        .and_hms_opt(0, 0, 0)
        .context("Invalid start time")?
        .and_utc();
    let end = end_date
        .and_hms_opt(23, 59, 59)
        .context("Invalid end time")?
        .and_utc();
    Ok((start, end))
}

fn load_data(data_path: &str, config: &Config) -> Result<CsvDataLoader> {
    info!(path = data_path, "Loading data");
    let data_loader =
        CsvDataLoader::new(data_path, &config.market.base_asset, &config.market.quote_asset)?;

    if let Some((data_start, data_end)) = data_loader.available_range() {
        info!(
            rows = data_loader.len(),
            from = %data_start.format("%Y-%m-%d %H:%M"),
            to = %data_end.format("%Y-%m-%d %H:%M"),
            "Data range"
        );
    }
    Ok(data_loader)
}

/// Run a single backtest with the given parameters.
async fn run_backtest(
    data_path: &str,
    start_str: &str,
    end_str: &str,
    initial_balance: Decimal,
    upper_amp: Option<Decimal>,
    lower_amp: Option<Decimal>,
    output_dir: Option<&str>,
) -> Result<()> {
    info!("╔════════════════════════════════════════════════════════════╗");
    info!("║              BACKTEST MODE                                 ║");
    info!("╚════════════════════════════════════════════════════════════╝");

    let (start, end) = parse_period(start_str, end_str)?;

    let mut config = load_config()?;
    if let Some(amp) = upper_amp {
        config.strategy.upper_amp = amp;
    }
    if let Some(amp) = lower_amp {
        config.strategy.lower_amp = amp;
    }
    config.validate()?;

    let data_loader = load_data(data_path, &config)?;

    let backtest_config = BacktestConfig {
        initial_balance,
        output_path: output_dir.map(String::from),
        ..BacktestConfig::default()
    };

    let mut engine = BacktestEngine::new(data_loader, config.clone(), backtest_config);
    let result = engine.run(start, end).await?;

    println!("\n{}", result.summary());

    if let Some(dir) = output_dir {
        std::fs::create_dir_all(dir)?;

        let stem = result_file_name(
            config.strategy.upper_amp,
            config.strategy.lower_amp,
            start,
            end,
        );
        let report_path = format!("{}/{}.csv", dir, stem);
        result.report_to_csv(&report_path)?;
        info!(path = %report_path, "Report saved");

        let actions_path = format!("{}/{}.actions.json", dir, stem);
        result.actions_to_json(&actions_path)?;
        info!(path = %actions_path, "Action log saved");
    }

    Ok(())
}

/// Run a sweep over band multipliers.
async fn run_sweep(
    data_path: &str,
    start_str: &str,
    end_str: &str,
    initial_balance: Decimal,
    parallelism: usize,
    output_dir: Option<&str>,
    minimal: bool,
) -> Result<()> {
    info!("╔════════════════════════════════════════════════════════════╗");
    info!("║           BAND SWEEP MODE                                  ║");
    info!("╚════════════════════════════════════════════════════════════╝");

    let (start, end) = parse_period(start_str, end_str)?;
    let base_config = load_config()?;
    let data_loader = load_data(data_path, &base_config)?;

    let amp_space = if minimal {
        AmpSpace::minimal()
    } else {
        AmpSpace::default()
    };
    info!(
        combinations = amp_space.combination_count(),
        parallelism,
        "Amp space ready"
    );

    let backtest_config = BacktestConfig {
        initial_balance,
        ..BacktestConfig::default()
    };

    let mut runner = SweepRunner::new(amp_space, base_config, backtest_config, parallelism);
    if let Some(dir) = output_dir {
        runner = runner.with_output_dir(dir);
    }
    let results = runner.run(data_loader, start, end).await?;

    println!("\n{}", results.summary());

    if let Some(dir) = output_dir {
        let results_path = format!("{}/sweep_results.csv", dir);
        results.to_csv(&results_path)?;
        info!(path = %results_path, "Sweep results saved");
    }

    Ok(())
}

/// Print the allocation for one band.
fn solve(h: f64, l: f64, alpha: f64, delta: f64) -> Result<()> {
    let allocation = AllocationOptimizer::new()
        .solve_with_delta(h, l, alpha, delta)
        .with_context(|| format!("No allocation for h={} l={} alpha={} delta={}", h, l, alpha, delta))?;
    let (k, big_l) = band_constants(h, l);

    println!("═══════════════════════════════════════════════════════════════");
    println!("ALLOCATION  h={}  l={}  alpha={}  delta={}", h, l, alpha, delta);
    println!("═══════════════════════════════════════════════════════════════");
    println!("Pool ratio k:            {:.6}", k);
    println!("Liquidity factor L:      {:.6}", big_l);
    println!("Supply to lending:       {}", allocation.supply_to_lending);
    println!("Reserve uninvested:      {}", allocation.reserve_uninvested);
    println!("Quote in pool:           {}", allocation.quote_in_pool);
    println!("Base in pool:            {}", allocation.base_in_pool);
    println!("Base borrowed:           {}", allocation.base_borrowed);
    println!("Quote from borrow swap:  {}", allocation.quote_from_borrow_swap);
    println!(
        "Deployed in pool:        {}",
        allocation.amm_deployed().round_dp(6)
    );
    println!(
        "Capital check:           {}",
        (allocation.supply_to_lending + allocation.reserve_uninvested).round_dp(6)
    );

    Ok(())
}
