//! Short-horizon annualized volatility of the base asset.

use chrono::{DateTime, Duration, Utc};

use crate::config::StrategyConfig;
use crate::market::PriceSeries;

/// Rolling-window volatility from consecutive price ratios.
#[derive(Debug, Clone, Copy)]
pub struct VolatilityEstimator {
    lookback: Duration,
    samples_per_day: u32,
}

impl Default for VolatilityEstimator {
    fn default() -> Self {
        Self::new(1440, 1440)
    }
}

impl VolatilityEstimator {
    pub fn new(lookback_minutes: u32, samples_per_day: u32) -> Self {
        Self {
            lookback: Duration::minutes(i64::from(lookback_minutes)),
            samples_per_day,
        }
    }

    pub fn from_config(config: &StrategyConfig) -> Self {
        Self::new(config.volatility_lookback_minutes, config.samples_per_day)
    }

    /// `sqrt(365 * samples_per_day)`
    pub fn annualization_factor(&self) -> f64 {
        (365.0 * f64::from(self.samples_per_day)).sqrt()
    }

    /// Annualized volatility as of `as_of`.
    ///
    /// Uses `[as_of - lookback, as_of]` when that window starts inside the
    /// series, otherwise the first full lookback window of the series.
    /// Returns 0.0 when the window holds fewer than two ratios.
    pub fn estimate(&self, prices: &PriceSeries, as_of: DateTime<Utc>) -> f64 {
        let Some(first) = prices.first_timestamp() else {
            return 0.0;
        };

        let window = if as_of - self.lookback >= first {
            prices.window(as_of - self.lookback, as_of)
        } else {
            prices.window(first, first + self.lookback)
        };

        match ratio_std(window) {
            Some(std) => {
                let sigma = std * self.annualization_factor();
                if sigma.is_finite() {
                    sigma
                } else {
                    0.0
                }
            }
            None => 0.0,
        }
    }
}

/// Sample standard deviation of `p[t] / p[t-1]`.
fn ratio_std(prices: &[f64]) -> Option<f64> {
    let ratios: Vec<f64> = prices.windows(2).map(|w| w[1] / w[0]).collect();
    if ratios.len() < 2 {
        return None;
    }

    let n = ratios.len() as f64;
    let mean = ratios.iter().sum::<f64>() / n;
    let variance = ratios.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let std = variance.sqrt();
    std.is_finite().then_some(std)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
    }

    fn series(prices: &[f64]) -> PriceSeries {
        PriceSeries::new(
            prices
                .iter()
                .enumerate()
                .map(|(i, p)| (t0() + Duration::minutes(i as i64), *p))
                .collect(),
        )
    }

    #[test]
    fn test_constant_prices_have_zero_volatility() {
        let s = series(&[2000.0; 100]);
        assert_eq!(VolatilityEstimator::default().estimate(&s, t0() + Duration::minutes(99)), 0.0);
    }

    #[test]
    fn test_too_few_samples_is_zero() {
        let estimator = VolatilityEstimator::default();
        assert_eq!(estimator.estimate(&series(&[]), t0()), 0.0);
        assert_eq!(estimator.estimate(&series(&[1.0]), t0()), 0.0);
        // two prices give a single ratio
        assert_eq!(estimator.estimate(&series(&[1.0, 1.1]), t0() + Duration::minutes(1)), 0.0);
    }

    #[test]
    fn test_known_value() {
        let s = series(&[100.0, 101.0, 100.0]);
        let sigma = VolatilityEstimator::default().estimate(&s, t0() + Duration::minutes(2));

        let r1: f64 = 101.0 / 100.0;
        let r2: f64 = 100.0 / 101.0;
        let expected = (r1 - r2).abs() / 2f64.sqrt() * (365.0 * 1440.0_f64).sqrt();
        assert!((sigma - expected).abs() < 1e-9);
    }

    #[test]
    fn test_early_ticks_use_first_day_window() {
        let prices: Vec<f64> = (0..3000)
            .map(|i| if i < 1440 && i % 2 == 0 { 100.0 } else { 101.0 })
            .collect();
        let s = series(&prices);
        let estimator = VolatilityEstimator::default();

        let early = estimator.estimate(&s, t0() + Duration::minutes(10));
        let day_one = estimator.estimate(&s, t0() + Duration::days(1));
        assert!(early > 0.0);
        assert_eq!(early, day_one);

        // Well past the oscillating stretch the window is flat
        let late = estimator.estimate(&s, t0() + Duration::minutes(2999));
        assert_eq!(late, 0.0);
    }

    #[test]
    fn test_annualization_follows_sampling_rate() {
        let hourly = VolatilityEstimator::new(1440, 24);
        assert!((hourly.annualization_factor() - (365.0 * 24.0_f64).sqrt()).abs() < 1e-12);
    }
}
