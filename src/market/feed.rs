//! Price feed types: per-tick market rows and the historical price series.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::utils::decimal::to_f64;

/// Market data delivered to the controller for one tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketRow {
    pub timestamp: DateTime<Utc>,
    /// Spot price per asset symbol, in quote units
    pub prices: HashMap<String, Decimal>,
    /// Swap volume through the pool during this row, in quote units
    #[serde(default)]
    pub volume: Decimal,
    /// Active in-range liquidity owned by other providers
    #[serde(default)]
    pub pool_liquidity: Decimal,
}

impl MarketRow {
    /// Create a row with prices only.
    pub fn new(timestamp: DateTime<Utc>, prices: HashMap<String, Decimal>) -> Self {
        Self {
            timestamp,
            prices,
            volume: Decimal::ZERO,
            pool_liquidity: Decimal::ZERO,
        }
    }

    /// Set pool activity for fee accrual.
    pub fn with_activity(mut self, volume: Decimal, pool_liquidity: Decimal) -> Self {
        self.volume = volume;
        self.pool_liquidity = pool_liquidity;
        self
    }

    /// Get the price of an asset.
    pub fn price(&self, symbol: &str) -> Option<Decimal> {
        self.prices.get(symbol).copied()
    }
}

/// Time-ordered price history of one asset.
#[derive(Debug, Clone, Default)]
pub struct PriceSeries {
    timestamps: Vec<DateTime<Utc>>,
    prices: Vec<f64>,
}

impl PriceSeries {
    /// Build a series from `(timestamp, price)` samples, sorting by time.
    pub fn new(mut samples: Vec<(DateTime<Utc>, f64)>) -> Self {
        samples.sort_by_key(|(ts, _)| *ts);
        let (timestamps, prices) = samples.into_iter().unzip();
        Self { timestamps, prices }
    }

    /// Extract the series of `symbol` from market rows. Rows without it are skipped.
    pub fn from_rows(rows: &[MarketRow], symbol: &str) -> Self {
        Self::new(
            rows.iter()
                .filter_map(|row| row.price(symbol).map(|p| (row.timestamp, to_f64(p))))
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    pub fn first_timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamps.first().copied()
    }

    /// Prices with `start <= timestamp <= end`.
    pub fn window(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> &[f64] {
        let lo = self.timestamps.partition_point(|ts| *ts < start);
        let hi = self.timestamps.partition_point(|ts| *ts <= end);
        if lo >= hi {
            return &[];
        }
        &self.prices[lo..hi]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_window_is_inclusive() {
        let series = PriceSeries::new(
            (0..10)
                .map(|i| (t0() + Duration::minutes(i), i as f64))
                .collect(),
        );

        let w = series.window(t0() + Duration::minutes(2), t0() + Duration::minutes(5));
        assert_eq!(w, &[2.0, 3.0, 4.0, 5.0]);
        assert!(series
            .window(t0() + Duration::minutes(20), t0() + Duration::minutes(30))
            .is_empty());
    }

    #[test]
    fn test_from_rows_sorts_and_skips_missing() {
        let mut late = HashMap::new();
        late.insert("WETH".to_string(), dec!(2100));
        let mut early = HashMap::new();
        early.insert("WETH".to_string(), dec!(2000));
        let mut other = HashMap::new();
        other.insert("USDC".to_string(), dec!(1));

        let rows = vec![
            MarketRow::new(t0() + Duration::minutes(1), late),
            MarketRow::new(t0(), early),
            MarketRow::new(t0() + Duration::minutes(2), other),
        ];

        let series = PriceSeries::from_rows(&rows, "WETH");
        assert_eq!(series.len(), 2);
        assert_eq!(series.first_timestamp(), Some(t0()));
        assert_eq!(series.window(t0(), t0() + Duration::minutes(5)), &[2000.0, 2100.0]);
    }
}
