//! Delta-neutral capital allocation across lending and the AMM pool.
//!
//! Variables (fractions of total capital):
//!
//! | var | meaning                               |
//! |-----|---------------------------------------|
//! | x0  | quote supplied as collateral          |
//! | x1  | quote kept out of lending             |
//! | x2  | quote deployed in the pool            |
//! | x3  | base value deployed in the pool       |
//! | x4  | base value borrowed                   |
//! | x5  | borrowed base value swapped to quote  |
//!
//! With `k = (1 - h^-0.5) / (1 - l^0.5)` and `L = 1 / (2 - h^-0.5 - l^0.5)`
//! the optimizer maximizes `x2 + x3` subject to:
//!
//! ```text
//! x0 + x1 = 1
//! k * x2 = x3
//! (1 - h^-0.5) * (x2 + x3) * L = x4 + delta
//! x1 + x5 = x2
//! x4 = x3 + x5
//! alpha * x0 = x4
//! x0, x1, x2, x3, x5 >= 0
//! ```

use rust_decimal::Decimal;
use tracing::debug;

use super::error::OptimizationError;
use super::solver::LinearProgram;
use super::types::{Allocation, Band};
use crate::utils::decimal::{to_decimal, to_f64};

/// Pivot budget for the six-variable program.
pub const DEFAULT_MAX_ITERATIONS: usize = 200;

/// Pool composition constants for a band: `(k, L)`.
///
/// `k` is the base-to-quote value ratio of a position spanning
/// `[P * l, P * h]` at `P`; `L` scales deployed value into delta.
pub fn band_constants(h: f64, l: f64) -> (f64, f64) {
    let inv_sqrt_h = h.powf(-0.5);
    let sqrt_l = l.sqrt();
    let k = (1.0 - inv_sqrt_h) / (1.0 - sqrt_l);
    let liq = 1.0 / (2.0 - inv_sqrt_h - sqrt_l);
    (k, liq)
}

/// Stateless solver for the delta-neutral capital split.
#[derive(Debug, Clone, Copy)]
pub struct AllocationOptimizer {
    max_iterations: usize,
}

impl Default for AllocationOptimizer {
    fn default() -> Self {
        Self::new()
    }
}

impl AllocationOptimizer {
    pub fn new() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    pub fn with_max_iterations(max_iterations: usize) -> Self {
        Self { max_iterations }
    }

    /// Fully neutral allocation for band `[l, h]` and loan-to-value `alpha`.
    pub fn solve(&self, h: f64, l: f64, alpha: f64) -> Result<Allocation, OptimizationError> {
        self.solve_with_delta(h, l, alpha, 0.0)
    }

    /// Allocation leaving `delta` of residual base exposure.
    pub fn solve_with_delta(
        &self,
        h: f64,
        l: f64,
        alpha: f64,
        delta: f64,
    ) -> Result<Allocation, OptimizationError> {
        validate_inputs(h, l, alpha, delta)?;

        let (k, liq) = band_constants(h, l);
        if !(k.is_finite() && k > 0.0 && liq.is_finite()) {
            return Err(OptimizationError::InvalidInput(format!(
                "band h={h}, l={l} gives k={k}, L={liq}"
            )));
        }
        let exposure = (1.0 - h.powf(-0.5)) * liq;

        let x = LinearProgram::new(6)
            .maximize(vec![0.0, 0.0, 1.0, 1.0, 0.0, 0.0])
            .equality("capital", vec![1.0, 1.0, 0.0, 0.0, 0.0, 0.0], 1.0)
            .equality("pool ratio", vec![0.0, 0.0, k, -1.0, 0.0, 0.0], 0.0)
            .equality(
                "delta neutrality",
                vec![0.0, 0.0, exposure, exposure, -1.0, 0.0],
                delta,
            )
            .equality("quote balance", vec![0.0, 1.0, -1.0, 0.0, 0.0, 1.0], 0.0)
            .equality("base balance", vec![0.0, 0.0, 0.0, -1.0, 1.0, -1.0], 0.0)
            .equality("loan to value", vec![alpha, 0.0, 0.0, 0.0, -1.0, 0.0], 0.0)
            .free(4)
            .solve(self.max_iterations)?;

        let allocation = to_allocation(&x)?;
        debug!(
            h,
            l,
            alpha,
            delta,
            k,
            deployed = %allocation.amm_deployed(),
            "Allocation solved"
        );
        Ok(allocation)
    }

    /// Decimal entry point used by the controller.
    pub fn solve_band(
        &self,
        band: &Band,
        alpha: Decimal,
        delta: Decimal,
    ) -> Result<Allocation, OptimizationError> {
        self.solve_with_delta(
            to_f64(band.h),
            to_f64(band.l),
            to_f64(alpha),
            to_f64(delta),
        )
    }
}

fn validate_inputs(h: f64, l: f64, alpha: f64, delta: f64) -> Result<(), OptimizationError> {
    if ![h, l, alpha, delta].iter().all(|v| v.is_finite()) {
        return Err(OptimizationError::InvalidInput(
            "inputs must be finite".to_string(),
        ));
    }
    if h <= 1.0 {
        return Err(OptimizationError::InvalidInput(format!(
            "upper ratio must exceed 1, got {h}"
        )));
    }
    if !(l > 0.0 && l < 1.0) {
        return Err(OptimizationError::InvalidInput(format!(
            "lower ratio must be in (0, 1), got {l}"
        )));
    }
    if !(alpha > 0.0 && alpha < 1.0) {
        return Err(OptimizationError::InvalidInput(format!(
            "alpha must be in (0, 1), got {alpha}"
        )));
    }
    Ok(())
}

fn to_allocation(x: &[f64]) -> Result<Allocation, OptimizationError> {
    let convert = |i: usize| {
        to_decimal(x[i]).ok_or_else(|| {
            OptimizationError::InvalidInput(format!("x{i}={} is not representable", x[i]))
        })
    };
    Ok(Allocation {
        supply_to_lending: convert(0)?,
        reserve_uninvested: convert(1)?,
        quote_in_pool: convert(2)?,
        base_in_pool: convert(3)?,
        base_borrowed: convert(4)?,
        quote_from_borrow_swap: convert(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::solver::RESIDUAL_TOLERANCE;
    use rust_decimal_macros::dec;

    fn residuals(a: &Allocation, h: f64, l: f64, alpha: f64, delta: f64) -> Vec<f64> {
        let x: Vec<f64> = a.as_array().iter().map(|d| to_f64(*d)).collect();
        let (k, liq) = band_constants(h, l);
        let exposure = (1.0 - h.powf(-0.5)) * liq;
        vec![
            x[0] + x[1] - 1.0,
            x[2] * k - x[3],
            exposure * (x[2] + x[3]) - x[4] - delta,
            x[1] + x[5] - x[2],
            x[4] - x[3] - x[5],
            alpha * x[0] - x[4],
        ]
    }

    // =========================================================================
    // Constraint Tests
    // =========================================================================

    #[test]
    fn test_constraints_hold_across_inputs() {
        let optimizer = AllocationOptimizer::new();
        let cases = [
            (1.045, 0.975, 0.7),
            (1.2, 0.9, 0.5),
            (2.0, 0.5, 0.7),
            (10.0, 0.1, 0.3),
            (1.001, 0.999, 0.9),
        ];

        for (h, l, alpha) in cases {
            let allocation = optimizer.solve(h, l, alpha).unwrap();
            for r in residuals(&allocation, h, l, alpha, 0.0) {
                assert!(r.abs() <= RESIDUAL_TOLERANCE, "h={h} l={l}: residual {r}");
            }
            for v in allocation.as_array() {
                assert!(v >= Decimal::ZERO, "h={h} l={l}: negative {v}");
            }
        }
    }

    #[test]
    fn test_reference_band_scenario() {
        // sigma = 0.05, upper_amp = 0.9, lower_amp = 0.5
        let allocation = AllocationOptimizer::new().solve(1.045, 0.975, 0.7).unwrap();

        assert!(allocation.amm_deployed() > Decimal::ZERO);
        let capital = allocation.supply_to_lending + allocation.reserve_uninvested;
        assert!((capital - Decimal::ONE).abs() < dec!(0.000001));

        let (k, _) = band_constants(1.045, 0.975);
        let expected_quote = 0.7 / (0.7 + k);
        assert!((to_f64(allocation.quote_in_pool) - expected_quote).abs() < 1e-6);
        assert!((to_f64(allocation.supply_to_lending) - (1.0 - expected_quote)).abs() < 1e-6);
        assert!(to_f64(allocation.quote_from_borrow_swap).abs() < 1e-6);
    }

    #[test]
    fn test_solution_is_deterministic() {
        let optimizer = AllocationOptimizer::new();
        let a = optimizer.solve(1.12, 0.93, 0.7).unwrap();
        let b = optimizer.solve(1.12, 0.93, 0.7).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_output_precision() {
        let allocation = AllocationOptimizer::new().solve(1.045, 0.975, 0.7).unwrap();
        for v in allocation.as_array() {
            assert!(v.scale() <= 12);
        }
    }

    // =========================================================================
    // Delta Tests
    // =========================================================================

    #[test]
    fn test_short_delta_routes_borrow_into_quote() {
        let delta = -0.05;
        let allocation = AllocationOptimizer::new()
            .solve_with_delta(1.045, 0.975, 0.7, delta)
            .unwrap();

        assert!((to_f64(allocation.quote_from_borrow_swap) - 0.05).abs() < 1e-6);
        for r in residuals(&allocation, 1.045, 0.975, 0.7, delta) {
            assert!(r.abs() <= RESIDUAL_TOLERANCE);
        }
    }

    #[test]
    fn test_long_delta_is_infeasible() {
        // x5 = -delta would have to go negative
        let err = AllocationOptimizer::new()
            .solve_with_delta(1.045, 0.975, 0.7, 0.05)
            .unwrap_err();
        assert_eq!(err, OptimizationError::Infeasible);
    }

    // =========================================================================
    // Input Validation Tests
    // =========================================================================

    #[test]
    fn test_invalid_inputs_rejected() {
        let optimizer = AllocationOptimizer::new();
        for (h, l, alpha) in [
            (1.0, 1.0, 0.7),
            (1.0, 0.9, 0.7),
            (1.1, 1.0, 0.7),
            (1.1, 0.0, 0.7),
            (1.1, 0.9, 0.0),
            (1.1, 0.9, 1.0),
            (f64::NAN, 0.9, 0.7),
            (f64::INFINITY, 0.9, 0.7),
        ] {
            assert!(
                matches!(
                    optimizer.solve(h, l, alpha),
                    Err(OptimizationError::InvalidInput(_))
                ),
                "h={h} l={l} alpha={alpha}"
            );
        }
    }

    #[test]
    fn test_solve_band_matches_float_entry() {
        let optimizer = AllocationOptimizer::new();
        let band = Band::new(dec!(1.045), dec!(0.975));
        let from_band = optimizer.solve_band(&band, dec!(0.7), Decimal::ZERO).unwrap();
        let from_float = optimizer.solve(1.045, 0.975, 0.7).unwrap();
        assert_eq!(from_band, from_float);
    }
}
