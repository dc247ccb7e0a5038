//! Per-cell statistics and the significance classification.
//!
//! Every displayed quantity (row percent, expected diff, significance
//! bucket) is a pure function of the four stored numbers plus the residual;
//! nothing derived is persisted separately.

use serde::{Deserialize, Serialize};

use super::round2;

/// Residual magnitude above which a cell is a significance candidate.
pub const SIG_CUTOFF: f64 = 2.0;

/// Minimum percentage difference from expectation for a candidate cell to
/// classify as significant. Suppresses cells with tiny counts but huge
/// relative swings.
pub const LARGE_CUTOFF: f64 = 1.0;

/// One cell of a contingency table with its stored statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellRecord {
    /// Row label this cell belongs to (the collection value).
    pub collection_label: String,
    /// 1-based column position, stable across reads.
    pub order: u32,
    /// Verbose column label.
    pub label: String,
    /// URL- and filesystem-safe form of the label.
    pub label_slug: String,
    /// Observed count.
    pub value: f64,
    /// Expected count under independence.
    pub expected_value: f64,
    /// Total of the cell's row.
    pub row_total: f64,
    /// Total of the cell's column.
    pub column_total: f64,
    /// Standardized residual.
    pub chi_value: f64,
}

/// Three-way significance bucket driving all downstream highlighting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Significance {
    /// Significantly above the expected count.
    AboveExpected,
    /// Significantly below the expected count.
    BelowExpected,
    /// No significant deviation (small residual, or a large residual on a
    /// negligible magnitude).
    NotSignificant,
}

impl CellRecord {
    /// Observed count as a share of its row, in percent.
    pub fn as_row_percent(&self) -> f64 {
        round2(self.value / self.row_total * 100.0)
    }

    /// Observed count as a share of its column, in percent.
    pub fn as_column_percent(&self) -> f64 {
        round2(self.value / self.column_total * 100.0)
    }

    /// Expected count, truncated to an integer for display.
    pub fn expected(&self) -> i64 {
        self.expected_value as i64
    }

    /// Observed count as an integer.
    pub fn int_value(&self) -> i64 {
        self.value as i64
    }

    /// Observed minus (truncated) expected.
    pub fn expected_diff(&self) -> i64 {
        (self.value - self.expected() as f64) as i64
    }

    /// Signed percentage difference from expectation. A zero expected count
    /// maps to ±100 by convention.
    pub fn diff_percent_rel(&self) -> f64 {
        let diff = self.expected_diff();
        let expected = self.expected();
        if expected != 0 {
            round2(diff as f64 / expected as f64 * 100.0)
        } else if diff > 0 {
            100.0
        } else {
            -100.0
        }
    }

    /// Magnitude-only percentage difference from expectation, never
    /// negative. A zero expected count maps to 100.
    pub fn diff_percent(&self) -> f64 {
        let diff = self.expected_diff().abs();
        let expected = self.expected();
        if expected != 0 {
            round2(diff as f64 / expected as f64 * 100.0)
        } else {
            100.0
        }
    }

    /// Residual rounded for display.
    pub fn round_chi(&self) -> f64 {
        round2(self.chi_value)
    }

    /// Classifies the cell against both cutoffs.
    ///
    /// The residual gate dominates: a large percentage swing with a small
    /// residual is noise, and a large residual with a sub-1% swing is not
    /// worth highlighting. This is the single source of truth for all
    /// consumers; chart colors and table highlighting must go through it.
    pub fn significance(&self) -> Significance {
        let diff = self.diff_percent();
        if self.chi_value > SIG_CUTOFF {
            if diff < LARGE_CUTOFF {
                Significance::NotSignificant
            } else {
                Significance::AboveExpected
            }
        } else if self.chi_value < -SIG_CUTOFF {
            if diff < LARGE_CUTOFF {
                Significance::NotSignificant
            } else {
                Significance::BelowExpected
            }
        } else {
            Significance::NotSignificant
        }
    }
}
