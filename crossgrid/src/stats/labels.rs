//! Cross-table label identity.
//!
//! A column value appearing in several cross-tabs under the same analysis
//! is one logical label ("Monday" under day-of-week); the catalog
//! deduplicates them so reporting can ask "where does this label deviate
//! most across all row categories".

use serde::{Deserialize, Serialize};

use super::cell::{CellRecord, LARGE_CUTOFF, SIG_CUTOFF};
use super::set::ContingencySet;

/// One logical label under an analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelEntry {
    /// Analysis rule slug the label belongs to.
    pub analysis_slug: String,
    /// Verbose label text.
    pub name: String,
    /// Label slug; (analysis_slug, slug) is the identity key.
    pub slug: String,
    /// Column position of the label's first appearance.
    pub order: u32,
}

/// Deduplicated labels across a service's contingency sets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LabelCatalog {
    entries: Vec<LabelEntry>,
}

impl LabelCatalog {
    /// Builds the catalog from generated sets, keeping the first occurrence
    /// of each (analysis, label slug) pair.
    pub fn generate(sets: &[ContingencySet]) -> Self {
        let mut entries: Vec<LabelEntry> = Vec::new();
        for set in sets {
            for unit in &set.units {
                let exists = entries
                    .iter()
                    .any(|e| e.analysis_slug == set.analysis_slug && e.slug == unit.label_slug);
                if !exists {
                    entries.push(LabelEntry {
                        analysis_slug: set.analysis_slug.clone(),
                        name: unit.label.clone(),
                        slug: unit.label_slug.clone(),
                        order: unit.order,
                    });
                }
            }
        }
        Self { entries }
    }

    /// All catalog entries.
    pub fn entries(&self) -> &[LabelEntry] {
        &self.entries
    }

    /// Entries belonging to one analysis, in order of first appearance.
    pub fn for_analysis(&self, analysis_slug: &str) -> Vec<&LabelEntry> {
        self.entries
            .iter()
            .filter(|e| e.analysis_slug == analysis_slug)
            .collect()
    }

    /// Looks an entry up by identity key.
    pub fn get(&self, analysis_slug: &str, label_slug: &str) -> Option<&LabelEntry> {
        self.entries
            .iter()
            .find(|e| e.analysis_slug == analysis_slug && e.slug == label_slug)
    }
}

/// Sort key collapsing a cell to its significance direction: +1 above, -1
/// below, 0 otherwise. The magnitude gate and empty cells zero it out, the
/// same way the cell classification does.
fn significance_bucket(unit: &CellRecord) -> i32 {
    let mut bucket = if unit.chi_value >= SIG_CUTOFF {
        1
    } else if unit.chi_value <= -SIG_CUTOFF {
        -1
    } else {
        0
    };
    if unit.diff_percent() < LARGE_CUTOFF {
        bucket = 0;
    }
    if unit.int_value() == 0 {
        bucket = 0;
    }
    bucket
}

/// The cells of one label across every row category, ranked most
/// over-represented first.
///
/// Sorted by significance direction, then relative difference, then
/// residual; the stable sorts mean later keys only break ties in earlier
/// ones.
pub fn ranked_units<'a>(set: &'a ContingencySet, label_slug: &str) -> Vec<&'a CellRecord> {
    let mut units: Vec<&CellRecord> = set
        .units
        .iter()
        .filter(|u| u.label_slug == label_slug)
        .collect();

    units.sort_by(|a, b| {
        b.chi_value
            .partial_cmp(&a.chi_value)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    units.sort_by(|a, b| {
        b.diff_percent_rel()
            .partial_cmp(&a.diff_percent_rel())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    units.sort_by_key(|u| std::cmp::Reverse(significance_bucket(u)));
    units
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(collection: &str, slug: &str, value: f64, expected: f64, chi: f64) -> CellRecord {
        CellRecord {
            collection_label: collection.to_string(),
            order: 1,
            label: slug.to_string(),
            label_slug: slug.to_string(),
            value,
            expected_value: expected,
            row_total: 100.0,
            column_total: 100.0,
            chi_value: chi,
        }
    }

    fn set_with(units: Vec<CellRecord>) -> ContingencySet {
        ContingencySet {
            service: "svc".to_string(),
            collection_slug: "category".to_string(),
            analysis_slug: "day".to_string(),
            source_file: "grid.csv".to_string(),
            grand_total: 0.0,
            chi2: 0.0,
            p: 1.0,
            dof: 1,
            units,
            generated_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_catalog_dedup() {
        let set_a = set_with(vec![record("A", "monday", 5.0, 4.0, 0.5)]);
        let mut set_b = set_with(vec![record("B", "monday", 7.0, 6.0, 0.4)]);
        set_b.collection_slug = "year".to_string();

        let catalog = LabelCatalog::generate(&[set_a, set_b]);
        assert_eq!(catalog.entries().len(), 1);
        assert!(catalog.get("day", "monday").is_some());
        assert!(catalog.get("day", "tuesday").is_none());
    }

    #[test]
    fn test_ranking_prefers_significant_above() {
        let set = set_with(vec![
            // significant below
            record("Below", "monday", 10.0, 40.0, -4.0),
            // insignificant residual despite large relative diff
            record("Noise", "monday", 3.0, 2.0, 1.0),
            // significant above, modest diff
            record("Above", "monday", 50.0, 40.0, 3.0),
            // significant residual but negligible magnitude
            record("Gated", "monday", 1000.0, 999.5, 2.5),
        ]);

        let ranked = ranked_units(&set, "monday");
        let order: Vec<&str> = ranked.iter().map(|u| u.collection_label.as_str()).collect();

        assert_eq!(order.first(), Some(&"Above"));
        assert_eq!(order.last(), Some(&"Below"));
    }
}
