//! The per-pair statistics batch: one record per cell plus the table-level
//! chi-square scalars.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::crosstab::{self, CrossTab};
use crate::error::Result;
use crate::slug::artifact_safe_slug;

use super::cell::CellRecord;
use super::contingency::chi2_contingency;

/// All statistics derived from one cross-tab: the chi-square scalars and a
/// cell record for every (row, column) position.
///
/// Generated in a single batch per cross-tab; regenerating replaces the
/// whole set (never merges), and records are read-only afterward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContingencySet {
    /// Service this set belongs to.
    pub service: String,
    /// Collection rule slug (row dimension).
    pub collection_slug: String,
    /// Analysis rule slug (column dimension).
    pub analysis_slug: String,
    /// Path of the cross-tab artifact this set was generated from.
    pub source_file: String,
    /// Sum of every observed count.
    pub grand_total: f64,
    /// Pearson chi-square statistic.
    pub chi2: f64,
    /// p-value.
    pub p: f64,
    /// Degrees of freedom.
    pub dof: u64,
    /// One record per cell, row-major, column order within each row.
    pub units: Vec<CellRecord>,
    /// When this set was generated.
    pub generated_at: DateTime<Utc>,
}

impl ContingencySet {
    /// Generates the statistics for a cross-tab.
    #[instrument(skip(crosstab), fields(collection = collection_slug, analysis = analysis_slug))]
    pub fn generate(
        service: &str,
        collection_slug: &str,
        analysis_slug: &str,
        source_file: &str,
        crosstab: &CrossTab,
    ) -> Result<Self> {
        let observed = crosstab.observed_matrix();
        let result = chi2_contingency(&observed)?;

        let row_totals = crosstab.row_totals();
        let column_totals = crosstab.column_totals();
        let grand_total: f64 = row_totals.iter().map(|&t| t as f64).sum();

        let mut units = Vec::with_capacity(crosstab.rows.len() * crosstab.columns.len());
        for (i, row) in crosstab.rows.iter().enumerate() {
            let mut order = 0u32;
            for (j, label) in crosstab.columns.iter().enumerate() {
                order += 1;
                units.push(CellRecord {
                    collection_label: row.label.clone(),
                    order,
                    label: label.clone(),
                    label_slug: artifact_safe_slug(label),
                    value: row.counts[j] as f64,
                    expected_value: result.expected[i][j],
                    row_total: row_totals[i] as f64,
                    column_total: column_totals[j] as f64,
                    chi_value: result.residuals[i][j],
                });
            }
        }
        debug!(cells = units.len(), chi2 = result.chi2, "generated statistics");

        Ok(Self {
            service: service.to_string(),
            collection_slug: collection_slug.to_string(),
            analysis_slug: analysis_slug.to_string(),
            source_file: source_file.to_string(),
            grand_total,
            chi2: result.chi2,
            p: result.p,
            dof: result.dof,
            units,
            generated_at: Utc::now(),
        })
    }

    /// Regenerates statistics from a persisted cross-tab artifact.
    pub fn from_artifact(
        service: &str,
        collection_slug: &str,
        analysis_slug: &str,
        path: &Path,
    ) -> Result<Self> {
        let crosstab = crosstab::read_csv(path)?;
        Self::generate(
            service,
            collection_slug,
            analysis_slug,
            &path.to_string_lossy(),
            &crosstab,
        )
    }

    /// Cell records for one row label, in column order.
    pub fn units_for(&self, collection_label: &str) -> Vec<&CellRecord> {
        self.units
            .iter()
            .filter(|u| u.collection_label == collection_label)
            .collect()
    }

    /// Distinct row labels, in table order.
    pub fn collection_labels(&self) -> Vec<&str> {
        let mut labels: Vec<&str> = Vec::new();
        for unit in &self.units {
            if !labels.contains(&unit.collection_label.as_str()) {
                labels.push(unit.collection_label.as_str());
            }
        }
        labels
    }

    /// Writes the set as JSON, replacing any previous file atomically.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let tmp_path = path.with_extension("json.tmp");
        {
            let file = std::fs::File::create(&tmp_path)?;
            serde_json::to_writer_pretty(file, self)?;
        }
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }

    /// Reads a set back from JSON.
    pub fn read_json(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let set = serde_json::from_reader(file)?;
        Ok(set)
    }
}
