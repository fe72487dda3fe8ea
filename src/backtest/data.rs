//! Historical data loading for backtesting.
//!
//! Provides CSV import of minute-level pool prices.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::path::Path;

use crate::market::MarketRow;

/// Trait for loading historical market data.
pub trait DataLoader: Send + Sync {
    /// Load all rows in the given time range (inclusive).
    fn load_rows(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<MarketRow>>;

    /// Get the available date range in the data.
    fn available_range(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)>;
}

/// CSV data loader for historical backtesting.
///
/// Expected CSV format (volume and pool liquidity optional):
/// ```csv
/// timestamp,price,volume,pool_liquidity
/// 2024-01-01T00:00:00Z,2280.51,152000.0,8.1e17
/// ```
///
/// `price` is the base asset in quote units; the quote asset is priced at 1.
#[derive(Clone)]
pub struct CsvDataLoader {
    rows: Vec<MarketRow>,
}

impl CsvDataLoader {
    /// Load data from a CSV file.
    pub fn new<P: AsRef<Path>>(path: P, base_asset: &str, quote_asset: &str) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read CSV file: {}", path.display()))?;

        Self::from_csv_content(&content, base_asset, quote_asset)
    }

    /// Load data from CSV content string.
    pub fn from_csv_content(content: &str, base_asset: &str, quote_asset: &str) -> Result<Self> {
        let mut rows: Vec<MarketRow> = Vec::new();

        for (line_num, line) in content.lines().enumerate() {
            // Skip header
            if line_num == 0 && line.starts_with("timestamp") {
                continue;
            }

            if line.trim().is_empty() {
                continue;
            }

            let row = CsvRow::parse(line)
                .with_context(|| format!("Failed to parse line {}: {}", line_num + 1, line))?;

            let mut prices = HashMap::new();
            prices.insert(base_asset.to_string(), row.price);
            prices.insert(quote_asset.to_string(), Decimal::ONE);
            rows.push(
                MarketRow::new(row.timestamp, prices).with_activity(row.volume, row.pool_liquidity),
            );
        }

        if rows.is_empty() {
            anyhow::bail!("CSV file contains no data rows");
        }

        Ok(Self::from_rows(rows))
    }

    /// Create a loader from in-memory rows.
    pub fn from_rows(mut rows: Vec<MarketRow>) -> Self {
        rows.sort_by_key(|r| r.timestamp);
        Self { rows }
    }

    /// Get total number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if the loader has no data.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl DataLoader for CsvDataLoader {
    fn load_rows(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<MarketRow>> {
        let filtered: Vec<MarketRow> = self
            .rows
            .iter()
            .filter(|r| r.timestamp >= start && r.timestamp <= end)
            .cloned()
            .collect();

        Ok(filtered)
    }

    fn available_range(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let start = self.rows.first()?.timestamp;
        let end = self.rows.last()?.timestamp;
        Some((start, end))
    }
}

/// Internal struct for parsing CSV rows.
#[derive(Debug)]
struct CsvRow {
    timestamp: DateTime<Utc>,
    price: Decimal,
    volume: Decimal,
    pool_liquidity: Decimal,
}

impl CsvRow {
    fn parse(line: &str) -> Result<Self> {
        let parts: Vec<&str> = line.split(',').map(str::trim).collect();
        if parts.len() < 2 {
            anyhow::bail!(
                "Expected at least 2 columns (timestamp,price[,volume,pool_liquidity]), got {}",
                parts.len()
            );
        }

        let price: Decimal = parts[1]
            .parse()
            .with_context(|| format!("Invalid price: {}", parts[1]))?;
        anyhow::ensure!(price > Decimal::ZERO, "Price must be positive: {}", price);

        Ok(Self {
            timestamp: parse_timestamp(parts[0])?,
            price,
            volume: optional_decimal(parts.get(2).copied(), "volume")?,
            pool_liquidity: optional_decimal(parts.get(3).copied(), "pool_liquidity")?,
        })
    }
}

/// RFC 3339, or `YYYY-MM-DD HH:MM:SS` taken as UTC.
fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = raw.parse::<DateTime<Utc>>() {
        return Ok(ts);
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .with_context(|| format!("Invalid timestamp: {}", raw))
}

fn optional_decimal(raw: Option<&str>, name: &str) -> Result<Decimal> {
    match raw {
        None | Some("") => Ok(Decimal::ZERO),
        // Pool liquidity is often exported in exponent form
        Some(value) => Decimal::from_scientific(value)
            .or_else(|_| value.parse())
            .with_context(|| format!("Invalid {}: {}", name, value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone};
    use rust_decimal_macros::dec;

    #[test]
    fn test_csv_parsing() {
        let csv = r#"timestamp,price,volume,pool_liquidity
2024-01-01T00:01:00Z,2281.00,1000,5e3
2024-01-01T00:00:00Z,2280.50,150000.5,0
"#;

        let loader = CsvDataLoader::from_csv_content(csv, "WETH", "USDC").unwrap();
        assert_eq!(loader.len(), 2);

        let range = loader.available_range().unwrap();
        assert_eq!(range.0, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(range.1, Utc.with_ymd_and_hms(2024, 1, 1, 0, 1, 0).unwrap());

        let rows = loader.load_rows(range.0, range.1).unwrap();
        assert_eq!(rows[0].price("WETH"), Some(dec!(2280.50)));
        assert_eq!(rows[0].price("USDC"), Some(dec!(1)));
        assert_eq!(rows[0].volume, dec!(150000.5));
        assert_eq!(rows[1].pool_liquidity, dec!(5000));
    }

    #[test]
    fn test_price_only_rows_and_naive_timestamps() {
        let csv = "2024-01-01 00:00:00,1.0001\n\n2024-01-01 00:01:00,1.0002\n";

        let loader = CsvDataLoader::from_csv_content(csv, "WETH", "USDC").unwrap();
        let rows = loader
            .load_rows(
                Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            )
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].volume, Decimal::ZERO);
    }

    #[test]
    fn test_filter_by_date_range() {
        let csv = r#"timestamp,price
2024-01-01T00:00:00Z,2000
2024-01-02T00:00:00Z,2100
2024-01-03T00:00:00Z,2200
"#;

        let loader = CsvDataLoader::from_csv_content(csv, "WETH", "USDC").unwrap();

        let start = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 2, 12, 0, 0).unwrap();

        let filtered = loader.load_rows(start, end).unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].timestamp.day(), 2);
    }

    #[test]
    fn test_bad_rows_are_rejected() {
        assert!(CsvDataLoader::from_csv_content("timestamp,price\n", "WETH", "USDC").is_err());
        assert!(CsvDataLoader::from_csv_content("2024-01-01T00:00:00Z\n", "WETH", "USDC").is_err());
        assert!(
            CsvDataLoader::from_csv_content("2024-01-01T00:00:00Z,-5\n", "WETH", "USDC").is_err()
        );
        assert!(CsvDataLoader::from_csv_content("yesterday,5\n", "WETH", "USDC").is_err());
    }
}
