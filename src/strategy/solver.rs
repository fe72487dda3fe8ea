//! Dense two-phase simplex for small equality-constrained linear programs.
//!
//! Variables are non-negative unless marked free; free variables are split
//! into a positive and a negative column. Phase I starts at the origin with
//! one artificial variable per row and drives them to zero; Phase II then
//! maximizes the objective. Pivoting follows Bland's rule so degenerate
//! vertices cannot cycle.

use super::error::OptimizationError;

/// Pivot and reduced-cost tolerance.
const PIVOT_EPS: f64 = 1e-12;

/// Phase I objective above this means no feasible point exists.
const FEASIBILITY_EPS: f64 = 1e-9;

/// Maximum equality residual accepted on the final point.
pub const RESIDUAL_TOLERANCE: f64 = 1e-6;

/// Negative values down to this are treated as round-off and clipped to zero.
const CLIP_EPS: f64 = 1e-9;

#[derive(Debug, Clone)]
struct Row {
    label: &'static str,
    coeffs: Vec<f64>,
    rhs: f64,
}

/// `maximize c·x` subject to labelled equality rows `a·x = b`.
#[derive(Debug, Clone)]
pub struct LinearProgram {
    objective: Vec<f64>,
    rows: Vec<Row>,
    free: Vec<bool>,
}

impl LinearProgram {
    pub fn new(num_vars: usize) -> Self {
        Self {
            objective: vec![0.0; num_vars],
            rows: Vec::new(),
            free: vec![false; num_vars],
        }
    }

    pub fn num_vars(&self) -> usize {
        self.objective.len()
    }

    pub fn maximize(mut self, objective: Vec<f64>) -> Self {
        debug_assert_eq!(objective.len(), self.num_vars());
        self.objective = objective;
        self
    }

    pub fn equality(mut self, label: &'static str, coeffs: Vec<f64>, rhs: f64) -> Self {
        debug_assert_eq!(coeffs.len(), self.num_vars());
        self.rows.push(Row { label, coeffs, rhs });
        self
    }

    /// Lift the non-negativity bound on `var`.
    pub fn free(mut self, var: usize) -> Self {
        self.free[var] = true;
        self
    }

    /// Solve, returning the optimal point in declared variable order.
    pub fn solve(&self, max_iterations: usize) -> Result<Vec<f64>, OptimizationError> {
        let all_finite = self.objective.iter().all(|v| v.is_finite())
            && self
                .rows
                .iter()
                .all(|r| r.rhs.is_finite() && r.coeffs.iter().all(|v| v.is_finite()));
        if !all_finite {
            return Err(OptimizationError::InvalidInput(
                "non-finite coefficient".to_string(),
            ));
        }

        // Column layout: one column per bounded var, two per free var.
        let mut columns: Vec<(usize, f64)> = Vec::new();
        for var in 0..self.num_vars() {
            columns.push((var, 1.0));
            if self.free[var] {
                columns.push((var, -1.0));
            }
        }

        let mut tableau = Tableau::new(&self.rows, &columns);
        let mut budget = IterationBudget::new(max_iterations);

        // Phase I: maximize -Σ artificials.
        let n = columns.len();
        let phase_one: Vec<f64> = (0..tableau.width())
            .map(|c| if c >= n { -1.0 } else { 0.0 })
            .collect();
        tableau.optimize(&phase_one, tableau.width(), &mut budget)?;

        let infeasibility: f64 = tableau
            .basis
            .iter()
            .enumerate()
            .filter(|(_, col)| **col >= n)
            .map(|(row, _)| tableau.rhs(row))
            .sum();
        if infeasibility > FEASIBILITY_EPS {
            return Err(OptimizationError::Infeasible);
        }

        tableau.drive_out_artificials(n);

        // Phase II over structural columns only.
        let phase_two: Vec<f64> = (0..tableau.width())
            .map(|c| {
                if c < n {
                    let (var, sign) = columns[c];
                    sign * self.objective[var]
                } else {
                    0.0
                }
            })
            .collect();
        tableau.optimize(&phase_two, n, &mut budget)?;

        let mut x = vec![0.0; self.num_vars()];
        for (row, &col) in tableau.basis.iter().enumerate() {
            if col < n {
                let (var, sign) = columns[col];
                x[var] += sign * tableau.rhs(row);
            }
        }

        self.verify(&mut x)?;
        Ok(x)
    }

    fn verify(&self, x: &mut [f64]) -> Result<(), OptimizationError> {
        for (var, value) in x.iter_mut().enumerate() {
            if self.free[var] || *value >= 0.0 {
                continue;
            }
            if *value < -CLIP_EPS {
                return Err(OptimizationError::ConstraintViolation {
                    constraint: format!("x{var} >= 0"),
                    residual: *value,
                });
            }
            *value = 0.0;
        }

        for row in &self.rows {
            let lhs: f64 = row.coeffs.iter().zip(x.iter()).map(|(a, v)| a * v).sum();
            let residual = lhs - row.rhs;
            if !residual.is_finite() || residual.abs() > RESIDUAL_TOLERANCE {
                return Err(OptimizationError::ConstraintViolation {
                    constraint: row.label.to_string(),
                    residual,
                });
            }
        }
        Ok(())
    }
}

struct IterationBudget {
    used: usize,
    max: usize,
}

impl IterationBudget {
    fn new(max: usize) -> Self {
        Self { used: 0, max }
    }

    fn spend(&mut self) -> Result<(), OptimizationError> {
        self.used += 1;
        if self.used > self.max {
            return Err(OptimizationError::IterationLimit(self.max));
        }
        Ok(())
    }
}

/// Row-major tableau `[A | I | b]` with the basic column of each row.
struct Tableau {
    cells: Vec<Vec<f64>>,
    basis: Vec<usize>,
}

impl Tableau {
    fn new(rows: &[Row], columns: &[(usize, f64)]) -> Self {
        let m = rows.len();
        let n = columns.len();
        let mut cells = Vec::with_capacity(m);
        for (i, row) in rows.iter().enumerate() {
            // Flip rows so every rhs starts non-negative.
            let flip = if row.rhs < 0.0 { -1.0 } else { 1.0 };
            let mut cell = vec![0.0; n + m + 1];
            for (c, &(var, sign)) in columns.iter().enumerate() {
                cell[c] = flip * sign * row.coeffs[var];
            }
            cell[n + i] = 1.0;
            cell[n + m] = flip * row.rhs;
            cells.push(cell);
        }
        let basis = (n..n + m).collect();
        Self { cells, basis }
    }

    /// Number of columns excluding the rhs.
    fn width(&self) -> usize {
        self.cells.first().map_or(0, |r| r.len() - 1)
    }

    fn rhs(&self, row: usize) -> f64 {
        let w = self.width();
        self.cells[row][w]
    }

    fn reduced_cost(&self, cost: &[f64], col: usize) -> f64 {
        let basic: f64 = self
            .basis
            .iter()
            .enumerate()
            .map(|(row, &b)| cost[b] * self.cells[row][col])
            .sum();
        cost[col] - basic
    }

    /// Maximize `cost` letting only columns below `allowed` enter.
    fn optimize(
        &mut self,
        cost: &[f64],
        allowed: usize,
        budget: &mut IterationBudget,
    ) -> Result<(), OptimizationError> {
        loop {
            let entering = (0..allowed)
                .filter(|c| !self.basis.contains(c))
                .find(|&c| self.reduced_cost(cost, c) > PIVOT_EPS);
            let Some(col) = entering else {
                return Ok(());
            };

            let mut leaving: Option<(usize, f64)> = None;
            for row in 0..self.cells.len() {
                let a = self.cells[row][col];
                if a <= PIVOT_EPS {
                    continue;
                }
                let ratio = self.rhs(row) / a;
                let better = match leaving {
                    None => true,
                    Some((best, best_ratio)) => {
                        ratio < best_ratio - PIVOT_EPS
                            || (ratio <= best_ratio + PIVOT_EPS
                                && self.basis[row] < self.basis[best])
                    }
                };
                if better {
                    leaving = Some((row, ratio));
                }
            }
            let Some((row, _)) = leaving else {
                return Err(OptimizationError::Unbounded);
            };

            budget.spend()?;
            self.pivot(row, col);
        }
    }

    fn pivot(&mut self, row: usize, col: usize) {
        let pivot = self.cells[row][col];
        for v in self.cells[row].iter_mut() {
            *v /= pivot;
        }
        let pivot_row = self.cells[row].clone();
        for (r, cells) in self.cells.iter_mut().enumerate() {
            if r == row {
                continue;
            }
            let factor = cells[col];
            if factor == 0.0 {
                continue;
            }
            for (v, p) in cells.iter_mut().zip(pivot_row.iter()) {
                *v -= factor * p;
            }
        }
        self.basis[row] = col;
    }

    /// Pivot zero-valued artificials out of the basis, dropping rows that
    /// turn out to be linear combinations of the others.
    fn drive_out_artificials(&mut self, structural: usize) {
        let mut row = 0;
        while row < self.cells.len() {
            if self.basis[row] < structural {
                row += 1;
                continue;
            }
            let replacement = (0..structural)
                .filter(|c| !self.basis.contains(c))
                .find(|&c| self.cells[row][c].abs() > PIVOT_EPS.sqrt());
            match replacement {
                Some(col) => {
                    self.pivot(row, col);
                    row += 1;
                }
                None => {
                    self.cells.remove(row);
                    self.basis.remove(row);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_simple_maximization_with_slacks() {
        // max 3x + 2y  s.t. x + y <= 4, x + 3y <= 6
        let lp = LinearProgram::new(4)
            .maximize(vec![3.0, 2.0, 0.0, 0.0])
            .equality("cap", vec![1.0, 1.0, 1.0, 0.0], 4.0)
            .equality("mix", vec![1.0, 3.0, 0.0, 1.0], 6.0);

        let x = lp.solve(100).unwrap();
        assert!(approx(x[0], 4.0));
        assert!(approx(x[1], 0.0));
    }

    #[test]
    fn test_free_variable_goes_negative() {
        // max x  s.t. x + f = 2, x + s = 5, f free
        let lp = LinearProgram::new(3)
            .maximize(vec![1.0, 0.0, 0.0])
            .equality("sum", vec![1.0, 1.0, 0.0], 2.0)
            .equality("cap", vec![1.0, 0.0, 1.0], 5.0)
            .free(1);

        let x = lp.solve(100).unwrap();
        assert!(approx(x[0], 5.0));
        assert!(approx(x[1], -3.0));
    }

    #[test]
    fn test_negative_rhs_is_infeasible_for_nonnegative_vars() {
        let lp = LinearProgram::new(2)
            .maximize(vec![1.0, 1.0])
            .equality("sum", vec![1.0, 1.0], -1.0);

        assert_eq!(lp.solve(100), Err(OptimizationError::Infeasible));
    }

    #[test]
    fn test_unbounded_objective() {
        // max x  s.t. x - y = 1
        let lp = LinearProgram::new(2)
            .maximize(vec![1.0, 0.0])
            .equality("diff", vec![1.0, -1.0], 1.0);

        assert_eq!(lp.solve(100), Err(OptimizationError::Unbounded));
    }

    #[test]
    fn test_redundant_row_is_dropped() {
        let lp = LinearProgram::new(2)
            .maximize(vec![1.0, 0.0])
            .equality("a", vec![1.0, 1.0], 1.0)
            .equality("a twice", vec![2.0, 2.0], 2.0);

        let x = lp.solve(100).unwrap();
        assert!(approx(x[0], 1.0));
        assert!(approx(x[1], 0.0));
    }

    #[test]
    fn test_iteration_cap() {
        let lp = LinearProgram::new(2)
            .maximize(vec![1.0, 1.0])
            .equality("sum", vec![1.0, 1.0], 1.0);

        assert_eq!(lp.solve(0), Err(OptimizationError::IterationLimit(0)));
    }

    #[test]
    fn test_non_finite_coefficients_rejected() {
        let lp = LinearProgram::new(1)
            .maximize(vec![1.0])
            .equality("nan", vec![f64::NAN], 1.0);

        assert!(matches!(lp.solve(10), Err(OptimizationError::InvalidInput(_))));
    }
}
