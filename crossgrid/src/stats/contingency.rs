//! Pearson chi-square test of independence and residual matrices.

use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF};
use tracing::warn;

use crate::error::{EngineError, Result};

/// Outcome of a chi-square contingency test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContingencyResult {
    /// Pearson chi-square statistic.
    pub chi2: f64,
    /// p-value under the chi-square distribution with `dof` degrees of
    /// freedom.
    pub p: f64,
    /// Degrees of freedom, `(rows - 1) * (cols - 1)`.
    pub dof: u64,
    /// Expected count per cell under independence.
    pub expected: Vec<Vec<f64>>,
    /// Standardized residual per cell, `(observed - expected) / sqrt(expected)`.
    pub residuals: Vec<Vec<f64>>,
}

fn validate(observed: &[Vec<f64>]) -> Result<(usize, usize)> {
    let n_rows = observed.len();
    if n_rows == 0 {
        return Err(EngineError::parse("contingency table has no rows"));
    }
    let n_cols = observed[0].len();
    if n_cols == 0 {
        return Err(EngineError::parse("contingency table has no columns"));
    }
    if observed.iter().any(|row| row.len() != n_cols) {
        return Err(EngineError::parse("contingency table rows have uneven widths"));
    }
    Ok((n_rows, n_cols))
}

/// Runs the chi-square test of independence over an observed count matrix.
///
/// Rows or columns whose total is zero yield zero-expected cells; those
/// cells contribute nothing to the statistic and their residual is zero
/// rather than NaN, so a degenerate margin degrades a cell, not the whole
/// analysis.
pub fn chi2_contingency(observed: &[Vec<f64>]) -> Result<ContingencyResult> {
    let (n_rows, n_cols) = validate(observed)?;

    let row_totals: Vec<f64> = observed.iter().map(|row| row.iter().sum()).collect();
    let col_totals: Vec<f64> = (0..n_cols)
        .map(|j| observed.iter().map(|row| row[j]).sum())
        .collect();
    let grand_total: f64 = row_totals.iter().sum();
    if grand_total <= 0.0 {
        warn!("contingency table sums to zero; statistics degrade to zero");
    } else if row_totals.iter().any(|&t| t <= 0.0) || col_totals.iter().any(|&t| t <= 0.0) {
        warn!("zero-total margin present; affected cells get zero expected and residual");
    }

    let expected: Vec<Vec<f64>> = (0..n_rows)
        .map(|i| {
            (0..n_cols)
                .map(|j| {
                    if grand_total > 0.0 {
                        row_totals[i] * col_totals[j] / grand_total
                    } else {
                        0.0
                    }
                })
                .collect()
        })
        .collect();

    let mut chi2 = 0.0;
    for i in 0..n_rows {
        for j in 0..n_cols {
            let e = expected[i][j];
            if e > 0.0 {
                let diff = observed[i][j] - e;
                chi2 += diff * diff / e;
            }
        }
    }

    let dof = (n_rows as u64 - 1) * (n_cols as u64 - 1);
    let p = if dof == 0 {
        1.0
    } else {
        let dist = ChiSquared::new(dof as f64)
            .map_err(|e| EngineError::internal(format!("chi-square distribution: {e}")))?;
        dist.sf(chi2)
    };

    let residuals = standardized_residuals(observed, &expected);

    Ok(ContingencyResult {
        chi2,
        p,
        dof,
        expected,
        residuals,
    })
}

/// Standardized residuals, `(observed - expected) / sqrt(expected)`.
///
/// Zero-expected cells produce a residual of zero.
pub fn standardized_residuals(observed: &[Vec<f64>], expected: &[Vec<f64>]) -> Vec<Vec<f64>> {
    observed
        .iter()
        .zip(expected.iter())
        .map(|(obs_row, exp_row)| {
            obs_row
                .iter()
                .zip(exp_row.iter())
                .map(|(&o, &e)| if e > 0.0 { (o - e) / e.sqrt() } else { 0.0 })
                .collect()
        })
        .collect()
}

/// Haberman-adjusted residuals using marginal totals:
/// `(observed - expected) / sqrt(v)` with
/// `v = col_total * row_total * (n - row_total) * (n - col_total) / n^3`.
///
/// A stricter alternative to [`standardized_residuals`]; available as a
/// utility but not wired into the main pipeline.
pub fn adjusted_residuals(observed: &[Vec<f64>], expected: &[Vec<f64>]) -> Result<Vec<Vec<f64>>> {
    let (n_rows, n_cols) = validate(observed)?;

    let row_totals: Vec<f64> = observed.iter().map(|row| row.iter().sum()).collect();
    let col_totals: Vec<f64> = (0..n_cols)
        .map(|j| observed.iter().map(|row| row[j]).sum())
        .collect();
    let n: f64 = row_totals.iter().sum();

    let result = (0..n_rows)
        .map(|i| {
            (0..n_cols)
                .map(|j| {
                    if n <= 0.0 {
                        return 0.0;
                    }
                    let v = col_totals[j] * row_totals[i] * (n - row_totals[i])
                        * (n - col_totals[j])
                        / n.powi(3);
                    if v > 0.0 {
                        (observed[i][j] - expected[i][j]) / v.sqrt()
                    } else {
                        0.0
                    }
                })
                .collect()
        })
        .collect();
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64, eps: f64) -> bool {
        (a - b).abs() < eps
    }

    #[test]
    fn test_known_two_by_two() {
        // classic example: chi2 = 240 * (50*35 - 15*140)^2 / (190*50*65*175)
        let observed = vec![vec![50.0, 15.0], vec![140.0, 35.0]];
        let result = chi2_contingency(&observed).unwrap();

        assert_eq!(result.dof, 1);
        assert!(close(result.expected[0][0], 65.0 * 190.0 / 240.0, 1e-9));
        assert!(result.p > 0.0 && result.p < 1.0);
        assert!(result.chi2 > 0.0);
    }

    #[test]
    fn test_marginal_consistency() {
        let observed = vec![
            vec![6.0, 0.0, 0.0, 0.0, 0.0],
            vec![0.0, 1.0, 1.0, 1.0, 1.0],
        ];
        let result = chi2_contingency(&observed).unwrap();

        let row_totals: Vec<f64> = observed.iter().map(|r| r.iter().sum()).collect();
        for (i, row) in result.expected.iter().enumerate() {
            let sum: f64 = row.iter().sum();
            assert!(close(sum, row_totals[i], 1e-9));
        }
        for j in 0..5 {
            let col_expected: f64 = result.expected.iter().map(|r| r[j]).sum();
            let col_observed: f64 = observed.iter().map(|r| r[j]).sum();
            assert!(close(col_expected, col_observed, 1e-9));
        }

        let grand_expected: f64 = result.expected.iter().flatten().sum();
        assert!(close(grand_expected, 10.0, 1e-9));
    }

    #[test]
    fn test_residual_signs() {
        let observed = vec![vec![10.0, 0.0], vec![5.0, 5.0]];
        let result = chi2_contingency(&observed).unwrap();

        for i in 0..2 {
            for j in 0..2 {
                let diff = observed[i][j] - result.expected[i][j];
                let residual = result.residuals[i][j];
                if diff > 0.0 {
                    assert!(residual > 0.0);
                } else if diff < 0.0 {
                    assert!(residual < 0.0);
                } else {
                    assert_eq!(residual, 0.0);
                }
            }
        }
    }

    #[test]
    fn test_independent_table_is_not_significant() {
        // perfectly proportional table: chi2 == 0, p == 1
        let observed = vec![vec![10.0, 20.0], vec![20.0, 40.0]];
        let result = chi2_contingency(&observed).unwrap();
        assert!(close(result.chi2, 0.0, 1e-9));
        assert!(close(result.p, 1.0, 1e-9));
    }

    #[test]
    fn test_single_row_has_zero_dof() {
        let observed = vec![vec![3.0, 4.0, 5.0]];
        let result = chi2_contingency(&observed).unwrap();
        assert_eq!(result.dof, 0);
        assert_eq!(result.p, 1.0);
        assert!(close(result.chi2, 0.0, 1e-9));
    }

    #[test]
    fn test_zero_column_degrades_gracefully() {
        let observed = vec![vec![5.0, 0.0], vec![7.0, 0.0]];
        let result = chi2_contingency(&observed).unwrap();
        // second column: expected 0 everywhere, residual 0, no NaN anywhere
        for row in &result.residuals {
            assert!(row.iter().all(|v| v.is_finite()));
            assert_eq!(row[1], 0.0);
        }
        assert!(result.chi2.is_finite());
    }

    #[test]
    fn test_adjusted_residuals_are_finite() {
        let observed = vec![vec![50.0, 15.0], vec![140.0, 35.0]];
        let result = chi2_contingency(&observed).unwrap();
        let adjusted = adjusted_residuals(&observed, &result.expected).unwrap();
        for row in &adjusted {
            assert!(row.iter().all(|v| v.is_finite()));
        }
        // adjusted residuals are at least as large in magnitude
        assert!(adjusted[0][0].abs() >= result.residuals[0][0].abs());
    }

    #[test]
    fn test_uneven_rows_rejected() {
        let observed = vec![vec![1.0, 2.0], vec![3.0]];
        assert!(chi2_contingency(&observed).is_err());
    }
}
