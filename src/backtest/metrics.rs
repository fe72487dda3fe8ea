//! Performance metrics calculation for backtesting.
//!
//! Provides Sharpe ratio, Sortino ratio, drawdown analysis, fee income and
//! controller activity counts.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::utils::decimal::{to_decimal_or_zero, to_f64};

/// One row of the per-tick report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportPoint {
    pub timestamp: DateTime<Utc>,
    /// Base asset price in quote units
    pub price: Decimal,
    /// Portfolio value excluding uncollected fees
    pub net_value: Decimal,
    /// Fees earned so far (collected + uncollected), base units
    pub fee_base: Decimal,
    /// Fees earned so far (collected + uncollected), quote units
    pub fee_quote: Decimal,
    /// Net value plus uncollected fees
    pub equity: Decimal,
    pub drawdown: Decimal,
    pub invested: bool,
}

impl ReportPoint {
    /// Create a new report point.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        timestamp: DateTime<Utc>,
        price: Decimal,
        net_value: Decimal,
        fee_base: Decimal,
        fee_quote: Decimal,
        uncollected_value: Decimal,
        invested: bool,
        peak_equity: Decimal,
    ) -> Self {
        let equity = net_value + uncollected_value;
        let drawdown = if peak_equity > Decimal::ZERO && equity < peak_equity {
            (peak_equity - equity) / peak_equity
        } else {
            Decimal::ZERO
        };

        Self {
            timestamp,
            price,
            net_value,
            fee_base,
            fee_quote,
            equity,
            drawdown,
            invested,
        }
    }
}

/// Controller activity tallied by the engine during a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunActivity {
    pub positions_opened: u64,
    pub positions_closed: u64,
    /// Exit count keyed by reason label
    pub exits: BTreeMap<String, u64>,
    /// Skipped invest attempts keyed by reason label
    pub skips: BTreeMap<String, u64>,
    pub optimizer_failures: u64,
    /// Hours spent in closed positions
    pub total_position_hours: f64,
    pub swap_fees_paid: Decimal,
    pub interest_paid: Decimal,
}

impl RunActivity {
    pub fn record_exit(&mut self, label: &str, held_hours: f64) {
        self.positions_closed += 1;
        self.total_position_hours += held_hours;
        *self.exits.entry(label.to_string()).or_insert(0) += 1;
    }

    pub fn record_skip(&mut self, label: &str) {
        *self.skips.entry(label.to_string()).or_insert(0) += 1;
    }
}

/// Comprehensive backtest performance metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestMetrics {
    // Returns
    /// Total absolute return (final - initial)
    pub total_return: Decimal,
    /// Total return as percentage
    pub total_return_pct: Decimal,
    /// Annualized return percentage
    pub annualized_return: Decimal,

    // Risk
    /// Maximum drawdown fraction
    pub max_drawdown: Decimal,
    /// Duration of maximum drawdown in hours
    pub max_drawdown_duration_hours: i64,
    /// Annualized volatility (std dev of returns)
    pub volatility: Decimal,

    // Risk-adjusted
    /// Sharpe ratio (assuming 0 risk-free rate)
    pub sharpe_ratio: Decimal,
    /// Sortino ratio (downside deviation only)
    pub sortino_ratio: Decimal,
    /// Calmar ratio (return / max drawdown)
    pub calmar_ratio: Decimal,

    // Strategy-specific
    /// LP fees earned in base units
    pub fee_base_earned: Decimal,
    /// LP fees earned in quote units
    pub fee_quote_earned: Decimal,
    /// LP fees valued in quote at the final price
    pub fee_value_earned: Decimal,
    /// Swap fees paid on entry and exit conversions
    pub swap_fees_paid: Decimal,
    /// Borrow interest accrued
    pub interest_paid: Decimal,

    // Activity
    pub positions_opened: u64,
    pub positions_closed: u64,
    pub exits: BTreeMap<String, u64>,
    pub skips: BTreeMap<String, u64>,
    pub optimizer_failures: u64,
    /// Average position duration in hours
    pub avg_position_duration_hours: f64,
    /// Share of report points with an open position, percentage
    pub time_invested_pct: Decimal,

    // Time
    /// Backtest duration in days
    pub duration_days: f64,
}

impl BacktestMetrics {
    /// Calculate metrics from the report and run activity.
    pub fn calculate(
        report: &[ReportPoint],
        initial_balance: Decimal,
        activity: &RunActivity,
    ) -> Self {
        let (Some(first), Some(last)) = (report.first(), report.last()) else {
            return Self::empty();
        };

        // Duration
        let duration = last.timestamp - first.timestamp;
        let duration_days = duration.num_seconds() as f64 / 86400.0;
        let duration_years = duration_days / 365.0;

        // Returns
        let total_return = last.equity - initial_balance;
        let total_return_pct = if initial_balance > Decimal::ZERO {
            total_return / initial_balance * dec!(100)
        } else {
            Decimal::ZERO
        };

        let annualized_return = if duration_years > 0.0 {
            let factor = 1.0 + to_f64(total_return_pct) / 100.0;
            let annualized = factor.powf(1.0 / duration_years) - 1.0;
            to_decimal_or_zero(annualized * 100.0)
        } else {
            Decimal::ZERO
        };

        // Drawdown
        let (max_drawdown, max_dd_duration) = calculate_max_drawdown(report);

        // Returns for volatility calculation
        let returns = calculate_period_returns(report);
        let volatility = calculate_volatility(&returns, duration_years);

        // Risk-adjusted metrics
        let sharpe_ratio = calculate_sharpe(&returns, duration_years);
        let sortino_ratio = calculate_sortino(&returns, duration_years);
        let calmar_ratio = if max_drawdown > Decimal::ZERO {
            annualized_return / (max_drawdown * dec!(100))
        } else {
            Decimal::ZERO
        };

        // Activity
        let avg_position_duration_hours = if activity.positions_closed > 0 {
            activity.total_position_hours / activity.positions_closed as f64
        } else {
            0.0
        };

        let invested_points = report.iter().filter(|p| p.invested).count();
        let time_invested_pct =
            Decimal::from(invested_points) / Decimal::from(report.len()) * dec!(100);

        Self {
            total_return,
            total_return_pct,
            annualized_return,
            max_drawdown,
            max_drawdown_duration_hours: max_dd_duration,
            volatility,
            sharpe_ratio,
            sortino_ratio,
            calmar_ratio,
            fee_base_earned: last.fee_base,
            fee_quote_earned: last.fee_quote,
            fee_value_earned: last.fee_base * last.price + last.fee_quote,
            swap_fees_paid: activity.swap_fees_paid,
            interest_paid: activity.interest_paid,
            positions_opened: activity.positions_opened,
            positions_closed: activity.positions_closed,
            exits: activity.exits.clone(),
            skips: activity.skips.clone(),
            optimizer_failures: activity.optimizer_failures,
            avg_position_duration_hours,
            time_invested_pct,
            duration_days,
        }
    }

    /// Create empty metrics (for error cases).
    pub fn empty() -> Self {
        Self {
            total_return: Decimal::ZERO,
            total_return_pct: Decimal::ZERO,
            annualized_return: Decimal::ZERO,
            max_drawdown: Decimal::ZERO,
            max_drawdown_duration_hours: 0,
            volatility: Decimal::ZERO,
            sharpe_ratio: Decimal::ZERO,
            sortino_ratio: Decimal::ZERO,
            calmar_ratio: Decimal::ZERO,
            fee_base_earned: Decimal::ZERO,
            fee_quote_earned: Decimal::ZERO,
            fee_value_earned: Decimal::ZERO,
            swap_fees_paid: Decimal::ZERO,
            interest_paid: Decimal::ZERO,
            positions_opened: 0,
            positions_closed: 0,
            exits: BTreeMap::new(),
            skips: BTreeMap::new(),
            optimizer_failures: 0,
            avg_position_duration_hours: 0.0,
            time_invested_pct: Decimal::ZERO,
            duration_days: 0.0,
        }
    }

    /// Format metrics as a summary string.
    pub fn summary(&self) -> String {
        let tally = |counts: &BTreeMap<String, u64>| {
            if counts.is_empty() {
                return "none".to_string();
            }
            counts
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(", ")
        };

        format!(
            r#"═══════════════════════════════════════════════
BACKTEST RESULTS ({:.1} days)
═══════════════════════════════════════════════
RETURNS
  Total Return:      ${:.2} ({:.2}%)
  Annualized:        {:.2}%

RISK
  Max Drawdown:      {:.2}%
  Volatility:        {:.2}%

RISK-ADJUSTED
  Sharpe Ratio:      {:.3}
  Sortino Ratio:     {:.3}
  Calmar Ratio:      {:.3}

FEES
  LP Fees (base):    {:.6}
  LP Fees (quote):   ${:.2}
  LP Fees (value):   ${:.2}
  Swap Fees Paid:    ${:.2}
  Interest Paid:     ${:.2}

ACTIVITY
  Positions Opened:  {}
  Positions Closed:  {}
  Exits:             {}
  Skipped Ticks:     {}
  Optimizer Errors:  {}
  Time Invested:     {:.1}%
═══════════════════════════════════════════════"#,
            self.duration_days,
            self.total_return,
            self.total_return_pct,
            self.annualized_return,
            self.max_drawdown * dec!(100),
            self.volatility * dec!(100),
            self.sharpe_ratio,
            self.sortino_ratio,
            self.calmar_ratio,
            self.fee_base_earned,
            self.fee_quote_earned,
            self.fee_value_earned,
            self.swap_fees_paid,
            self.interest_paid,
            self.positions_opened,
            self.positions_closed,
            tally(&self.exits),
            tally(&self.skips),
            self.optimizer_failures,
            self.time_invested_pct,
        )
    }
}

/// Calculate period returns from the report.
fn calculate_period_returns(report: &[ReportPoint]) -> Vec<f64> {
    report
        .windows(2)
        .map(|w| {
            let prev = w[0].equity;
            let curr = w[1].equity;
            if prev > Decimal::ZERO {
                to_f64((curr - prev) / prev)
            } else {
                0.0
            }
        })
        .collect()
}

/// Calculate maximum drawdown and its duration.
fn calculate_max_drawdown(report: &[ReportPoint]) -> (Decimal, i64) {
    let Some(first) = report.first() else {
        return (Decimal::ZERO, 0);
    };

    let mut peak = first.equity;
    let mut max_dd = Decimal::ZERO;
    let mut max_dd_start: Option<DateTime<Utc>> = None;
    let mut max_dd_duration: i64 = 0;
    let mut current_dd_start: Option<DateTime<Utc>> = None;

    for point in report {
        if point.equity > peak {
            peak = point.equity;
            current_dd_start = None;
        } else if peak > Decimal::ZERO {
            let dd = (peak - point.equity) / peak;
            if dd > max_dd {
                max_dd = dd;
                if current_dd_start.is_none() {
                    current_dd_start = Some(point.timestamp);
                }
                max_dd_start = current_dd_start;
            }
        }

        if let Some(start) = max_dd_start {
            let duration = (point.timestamp - start).num_hours();
            if duration > max_dd_duration {
                max_dd_duration = duration;
            }
        }
    }

    (max_dd, max_dd_duration)
}

fn mean_and_std(returns: &[f64]) -> (f64, f64) {
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

/// Calculate annualized volatility from returns.
fn calculate_volatility(returns: &[f64], duration_years: f64) -> Decimal {
    if returns.len() < 2 || duration_years <= 0.0 {
        return Decimal::ZERO;
    }

    let (_, std_dev) = mean_and_std(returns);
    let periods_per_year = returns.len() as f64 / duration_years;
    to_decimal_or_zero(std_dev * periods_per_year.sqrt())
}

/// Calculate Sharpe ratio (assuming 0 risk-free rate).
fn calculate_sharpe(returns: &[f64], duration_years: f64) -> Decimal {
    if returns.is_empty() || duration_years <= 0.0 {
        return Decimal::ZERO;
    }

    let (mean, std_dev) = mean_and_std(returns);
    if std_dev < 1e-10 {
        return Decimal::ZERO;
    }

    // Annualize
    let periods_per_year = returns.len() as f64 / duration_years;
    let annualized_return = mean * periods_per_year;
    let annualized_std = std_dev * periods_per_year.sqrt();

    to_decimal_or_zero(annualized_return / annualized_std)
}

/// Calculate Sortino ratio (downside deviation only).
fn calculate_sortino(returns: &[f64], duration_years: f64) -> Decimal {
    if returns.is_empty() || duration_years <= 0.0 {
        return Decimal::ZERO;
    }

    let (mean, _) = mean_and_std(returns);

    // Downside deviation (negative returns only)
    let downside: Vec<f64> = returns.iter().filter(|&&r| r < 0.0).copied().collect();
    if downside.is_empty() {
        // No negative returns, cap at a large value
        return dec!(100);
    }

    let downside_variance = downside.iter().map(|r| r.powi(2)).sum::<f64>() / downside.len() as f64;
    let downside_deviation = downside_variance.sqrt();
    if downside_deviation < 1e-10 {
        return dec!(100);
    }

    // Annualize
    let periods_per_year = returns.len() as f64 / duration_years;
    let annualized_return = mean * periods_per_year;
    let annualized_dd = downside_deviation * periods_per_year.sqrt();

    to_decimal_or_zero(annualized_return / annualized_dd)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn point(day: u32, equity: Decimal, peak: Decimal) -> ReportPoint {
        ReportPoint::new(
            Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap(),
            dec!(2000),
            equity,
            Decimal::ZERO,
            Decimal::ZERO,
            Decimal::ZERO,
            true,
            peak,
        )
    }

    #[test]
    fn test_report_point_drawdown() {
        let p = ReportPoint::new(
            Utc::now(),
            dec!(2000),
            dec!(9400),  // net value
            dec!(0.05),  // fee base
            dec!(100),   // fee quote
            dec!(100),   // uncollected value
            true,
            dec!(10000), // peak
        );

        assert_eq!(p.equity, dec!(9500));
        assert_eq!(p.drawdown, dec!(0.05)); // 5% drawdown
    }

    #[test]
    fn test_max_drawdown_calculation() {
        let curve = vec![
            point(1, dec!(10000), dec!(10000)),
            point(2, dec!(10500), dec!(10500)),
            point(3, dec!(9500), dec!(10500)),
            point(4, dec!(11000), dec!(11000)),
        ];

        let (max_dd, duration) = calculate_max_drawdown(&curve);
        // Max DD was from 10500 to 9500 = 9.52%
        assert!(max_dd > dec!(0.09) && max_dd < dec!(0.10));
        assert_eq!(duration, 24);
    }

    #[test]
    fn test_period_returns() {
        let curve = vec![
            point(1, dec!(10000), dec!(10000)),
            point(2, dec!(10100), dec!(10100)),
            point(3, dec!(10000), dec!(10100)),
        ];

        let returns = calculate_period_returns(&curve);
        assert_eq!(returns.len(), 2);
        assert!((returns[0] - 0.01).abs() < 1e-12);
        assert!(returns[1] < 0.0);
    }

    #[test]
    fn test_calculate_from_report() {
        let curve = vec![
            point(1, dec!(10000), dec!(10000)),
            point(2, dec!(10050), dec!(10050)),
            point(3, dec!(10100), dec!(10100)),
        ];
        let mut activity = RunActivity {
            positions_opened: 2,
            ..Default::default()
        };
        activity.record_exit("out_of_range", 24.0);
        activity.record_skip("market_unstable");

        let metrics = BacktestMetrics::calculate(&curve, dec!(10000), &activity);
        assert_eq!(metrics.total_return, dec!(100));
        assert_eq!(metrics.total_return_pct, dec!(1));
        assert_eq!(metrics.positions_closed, 1);
        assert_eq!(metrics.avg_position_duration_hours, 24.0);
        assert_eq!(metrics.exits.get("out_of_range"), Some(&1));
        assert_eq!(metrics.time_invested_pct, dec!(100));
        assert_eq!(metrics.sortino_ratio, dec!(100));
    }

    #[test]
    fn test_empty_report() {
        let metrics = BacktestMetrics::calculate(&[], dec!(10000), &RunActivity::default());
        assert_eq!(metrics.total_return, Decimal::ZERO);
        assert_eq!(metrics.positions_opened, 0);
    }

    #[test]
    fn test_metrics_summary() {
        let mut metrics = BacktestMetrics::empty();
        metrics.total_return = dec!(500);
        metrics.positions_opened = 3;
        metrics.exits.insert("net_value_drift".to_string(), 2);

        let summary = metrics.summary();
        assert!(summary.contains("500.00"));
        assert!(summary.contains("Sharpe"));
        assert!(summary.contains("net_value_drift=2"));
    }
}
