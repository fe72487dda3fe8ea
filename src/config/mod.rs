//! Configuration management for the LP delta hedger.
//!
//! Loads settings from environment variables and config files.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Band, allocation and rebalance parameters
    #[serde(default)]
    pub strategy: StrategyConfig,
    /// Pool and lending venue parameters
    #[serde(default)]
    pub market: MarketConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Upper band multiplier: h = 1 + sigma * upper_amp
    #[serde(default = "default_upper_amp")]
    pub upper_amp: Decimal,
    /// Lower band multiplier: l = 1 - sigma * lower_amp
    #[serde(default = "default_lower_amp")]
    pub lower_amp: Decimal,
    /// Loan-to-value used when borrowing against supplied collateral (0.0-1.0)
    #[serde(default = "default_alpha")]
    pub alpha: Decimal,
    /// Net value drift that forces an exit (0.02 = 2%)
    #[serde(default = "default_rebalance_tolerance")]
    pub rebalance_tolerance: Decimal,
    /// Annualized volatility above which no position is opened
    #[serde(default = "default_volatility_threshold")]
    pub volatility_threshold: Decimal,
    /// Ceiling for the upper band ratio h
    #[serde(default = "default_max_upper_ratio")]
    pub max_upper_ratio: Decimal,
    /// Floor for the lower band ratio l
    #[serde(default = "default_min_lower_ratio")]
    pub min_lower_ratio: Decimal,
    /// Bands narrower than this (h - l) are rejected
    #[serde(default = "default_min_band_width")]
    pub min_band_width: Decimal,
    /// Residual directional exposure targeted by the optimizer (0 = fully neutral)
    #[serde(default)]
    pub target_delta: Decimal,
    /// Reproduce the historical lower clamp that overwrote h instead of l.
    /// Only for comparison runs against old results.
    #[serde(default)]
    pub legacy_lower_clamp: bool,
    /// Trailing window used for volatility estimation
    #[serde(default = "default_volatility_lookback_minutes")]
    pub volatility_lookback_minutes: u32,
    /// Price samples per day, used to annualize volatility
    #[serde(default = "default_samples_per_day")]
    pub samples_per_day: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    /// Volatile asset provided to the pool and borrowed from the lending venue
    #[serde(default = "default_base_asset")]
    pub base_asset: String,
    /// Stable asset used as collateral and accounting unit
    #[serde(default = "default_quote_asset")]
    pub quote_asset: String,
    /// Pool swap fee rate (0.0005 = 5 bps tier)
    #[serde(default = "default_fee_rate")]
    pub fee_rate: Decimal,
    /// Maximum borrow value relative to supplied value enforced by the venue
    #[serde(default = "default_max_ltv")]
    pub max_ltv: Decimal,
    /// Simple annual rate earned on supplied collateral
    #[serde(default = "default_supply_apy")]
    pub supply_apy: Decimal,
    /// Simple annual rate paid on borrows
    #[serde(default = "default_borrow_apy")]
    pub borrow_apy: Decimal,
}

// Default value functions
fn default_upper_amp() -> Decimal {
    Decimal::new(9, 1) // 0.9
}

fn default_lower_amp() -> Decimal {
    Decimal::new(5, 1) // 0.5
}

fn default_alpha() -> Decimal {
    Decimal::new(7, 1) // 0.7
}

fn default_rebalance_tolerance() -> Decimal {
    Decimal::new(2, 2) // 0.02
}

fn default_volatility_threshold() -> Decimal {
    Decimal::new(9, 1) // 0.9
}

fn default_max_upper_ratio() -> Decimal {
    Decimal::new(10, 0)
}

fn default_min_lower_ratio() -> Decimal {
    Decimal::new(1, 1) // 0.1
}

fn default_min_band_width() -> Decimal {
    Decimal::new(1, 4) // 0.0001
}

fn default_volatility_lookback_minutes() -> u32 {
    1440 // one day of minute bars
}

fn default_samples_per_day() -> u32 {
    1440
}

fn default_base_asset() -> String {
    "WETH".to_string()
}

fn default_quote_asset() -> String {
    "USDC".to_string()
}

fn default_fee_rate() -> Decimal {
    Decimal::new(5, 4) // 0.0005
}

fn default_max_ltv() -> Decimal {
    Decimal::new(8, 1) // 0.8
}

fn default_supply_apy() -> Decimal {
    Decimal::new(3, 2) // 0.03
}

fn default_borrow_apy() -> Decimal {
    Decimal::new(4, 2) // 0.04
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("LPDH"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        let s = &self.strategy;
        let m = &self.market;

        anyhow::ensure!(
            s.alpha > Decimal::ZERO && s.alpha < Decimal::ONE,
            "alpha must be between 0 and 1 (exclusive)"
        );

        anyhow::ensure!(
            s.alpha <= m.max_ltv,
            "alpha ({}) must not exceed the venue max_ltv ({})",
            s.alpha,
            m.max_ltv
        );

        anyhow::ensure!(
            s.upper_amp >= Decimal::ZERO && s.lower_amp >= Decimal::ZERO,
            "band amplifiers must be non-negative"
        );

        anyhow::ensure!(
            s.rebalance_tolerance > Decimal::ZERO && s.rebalance_tolerance < Decimal::ONE,
            "rebalance_tolerance must be between 0 and 1"
        );

        anyhow::ensure!(
            s.max_upper_ratio > Decimal::ONE,
            "max_upper_ratio must be greater than 1"
        );

        anyhow::ensure!(
            s.min_lower_ratio > Decimal::ZERO && s.min_lower_ratio < Decimal::ONE,
            "min_lower_ratio must be between 0 and 1"
        );

        anyhow::ensure!(
            s.volatility_lookback_minutes > 0 && s.samples_per_day > 0,
            "volatility window and sampling rate must be positive"
        );

        anyhow::ensure!(
            m.fee_rate >= Decimal::ZERO && m.fee_rate < Decimal::ONE,
            "fee_rate must be between 0 and 1"
        );

        anyhow::ensure!(
            m.base_asset != m.quote_asset,
            "base_asset and quote_asset must differ"
        );

        Ok(())
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            upper_amp: default_upper_amp(),
            lower_amp: default_lower_amp(),
            alpha: default_alpha(),
            rebalance_tolerance: default_rebalance_tolerance(),
            volatility_threshold: default_volatility_threshold(),
            max_upper_ratio: default_max_upper_ratio(),
            min_lower_ratio: default_min_lower_ratio(),
            min_band_width: default_min_band_width(),
            target_delta: Decimal::ZERO,
            legacy_lower_clamp: false,
            volatility_lookback_minutes: default_volatility_lookback_minutes(),
            samples_per_day: default_samples_per_day(),
        }
    }
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            base_asset: default_base_asset(),
            quote_asset: default_quote_asset(),
            fee_rate: default_fee_rate(),
            max_ltv: default_max_ltv(),
            supply_apy: default_supply_apy(),
            borrow_apy: default_borrow_apy(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_alpha_above_max_ltv_is_rejected() {
        let mut config = Config::default();
        config.strategy.alpha = dec!(0.85);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_same_assets_rejected() {
        let mut config = Config::default();
        config.market.quote_asset = config.market.base_asset.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"strategy": {"upper_amp": "1.2"}}"#).unwrap();
        assert_eq!(config.strategy.upper_amp, dec!(1.2));
        assert_eq!(config.strategy.lower_amp, dec!(0.5));
        assert_eq!(config.market.quote_asset, "USDC");
    }
}
