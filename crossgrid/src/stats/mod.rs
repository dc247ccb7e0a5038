//! Contingency statistics over cross-tab artifacts.
//!
//! [`contingency`] holds the chi-square test and residual math,
//! [`cell`] the per-cell derived statistics and significance
//! classification, [`set`] the per-pair record batch, and [`labels`] the
//! cross-table label catalog.

pub mod cell;
pub mod contingency;
pub mod labels;
pub mod set;

pub use cell::{CellRecord, Significance, LARGE_CUTOFF, SIG_CUTOFF};
pub use contingency::{
    adjusted_residuals, chi2_contingency, standardized_residuals, ContingencyResult,
};
pub use labels::{ranked_units, LabelCatalog, LabelEntry};
pub use set::ContingencySet;

/// Rounds to two decimal places, the precision every displayed percentage
/// and residual uses.
pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::round2;

    #[test]
    fn test_round2() {
        assert_eq!(round2(33.333_333), 33.33);
        assert_eq!(round2(66.666_666), 66.67);
        assert_eq!(round2(-2.345), -2.35);
    }
}
