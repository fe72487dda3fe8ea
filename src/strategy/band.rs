//! Price band sizing from volatility.

use rust_decimal::Decimal;

use super::types::Band;
use crate::config::StrategyConfig;

/// Maps volatility and two asymmetry multipliers to a clamped band.
#[derive(Debug, Clone, Copy)]
pub struct BandCalculator {
    max_upper_ratio: Decimal,
    min_lower_ratio: Decimal,
    legacy_lower_clamp: bool,
}

impl Default for BandCalculator {
    fn default() -> Self {
        Self::from_config(&StrategyConfig::default())
    }
}

impl BandCalculator {
    pub fn new(max_upper_ratio: Decimal, min_lower_ratio: Decimal) -> Self {
        Self {
            max_upper_ratio,
            min_lower_ratio,
            legacy_lower_clamp: false,
        }
    }

    pub fn from_config(config: &StrategyConfig) -> Self {
        Self {
            max_upper_ratio: config.max_upper_ratio,
            min_lower_ratio: config.min_lower_ratio,
            legacy_lower_clamp: config.legacy_lower_clamp,
        }
    }

    /// Write the lower floor into `h` instead of `l`, as old result sets did.
    pub fn with_legacy_lower_clamp(mut self, enabled: bool) -> Self {
        self.legacy_lower_clamp = enabled;
        self
    }

    /// `h = 1 + sigma * upper_amp`, `l = 1 - sigma * lower_amp`, clamped.
    pub fn compute(&self, sigma: Decimal, upper_amp: Decimal, lower_amp: Decimal) -> Band {
        let mut h = Decimal::ONE + sigma * upper_amp;
        let mut l = Decimal::ONE - sigma * lower_amp;

        if h > self.max_upper_ratio {
            h = self.max_upper_ratio;
        }
        if l < self.min_lower_ratio {
            if self.legacy_lower_clamp {
                h = self.min_lower_ratio;
            } else {
                l = self.min_lower_ratio;
            }
        }

        Band::new(h, l)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_reference_band() {
        let band = BandCalculator::default().compute(dec!(0.05), dec!(0.9), dec!(0.5));
        assert_eq!(band, Band::new(dec!(1.045), dec!(0.975)));
    }

    #[test]
    fn test_zero_sigma_collapses_band() {
        let band = BandCalculator::default().compute(Decimal::ZERO, dec!(0.9), dec!(0.5));
        assert_eq!(band, Band::new(dec!(1), dec!(1)));
        assert!(!band.is_usable(dec!(0.0001)));
    }

    #[test]
    fn test_large_sigma_is_clamped() {
        let band = BandCalculator::default().compute(dec!(20), dec!(0.9), dec!(0.5));
        assert_eq!(band.h, dec!(10));
        assert_eq!(band.l, dec!(0.1));
    }

    #[test]
    fn test_legacy_clamp_overwrites_upper() {
        let band = BandCalculator::default()
            .with_legacy_lower_clamp(true)
            .compute(dec!(20), dec!(0.9), dec!(0.5));
        assert_eq!(band.h, dec!(0.1));
        assert_eq!(band.l, dec!(-9));
    }

    #[test]
    fn test_custom_limits() {
        let band = BandCalculator::new(dec!(1.5), dec!(0.8)).compute(dec!(1), dec!(1), dec!(1));
        assert_eq!(band, Band::new(dec!(1.5), dec!(0.8)));
    }
}
