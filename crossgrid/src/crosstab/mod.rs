//! Cross-tabulation: pivoting the working table into a labelled count
//! matrix.
//!
//! The builder delegates the counting to DataFusion (a two-way GROUP BY)
//! and applies the cleanup pipeline in Rust: verbosification of column
//! headers, allowed-value filtering, zero row/column pruning, optional
//! column reordering and row-label humanization. An empty result after all
//! filtering is a hard failure: it almost always means a broken lookup,
//! not an empty dataset.

use std::collections::HashMap;

use arrow::array::{Array, Int64Array, StringArray};
use arrow::compute;
use arrow::datatypes::DataType;
use datafusion::prelude::SessionContext;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::error::{EngineError, Result};
use crate::rules::{AnalysisRule, CategoryValue, CollectionRule};
use crate::table::Table;

mod artifact;

pub use artifact::{read_csv, write_csv};

/// Row label excluded before coded row labels are humanized: survey exports
/// keep the form placeholder as a real answer value.
const PLACEHOLDER_ROW_LABEL: &str = "please select";

/// A two-way count matrix: one row per collection value, one column per
/// verbose analysis label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossTab {
    /// Header of the row-label column (the collection slug).
    pub row_header: String,
    /// Verbose column labels, in display order.
    pub columns: Vec<String>,
    /// Rows, each aligned with `columns`.
    pub rows: Vec<CrossTabRow>,
}

/// One row of a cross-tab.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossTabRow {
    /// The row label (collection value).
    pub label: String,
    /// Counts per column.
    pub counts: Vec<i64>,
}

impl CrossTab {
    /// Totals per row.
    pub fn row_totals(&self) -> Vec<i64> {
        self.rows.iter().map(|r| r.counts.iter().sum()).collect()
    }

    /// Totals per column.
    pub fn column_totals(&self) -> Vec<i64> {
        let mut totals = vec![0i64; self.columns.len()];
        for row in &self.rows {
            for (idx, count) in row.counts.iter().enumerate() {
                totals[idx] += count;
            }
        }
        totals
    }

    /// Sum of every cell.
    pub fn grand_total(&self) -> i64 {
        self.rows
            .iter()
            .map(|r| r.counts.iter().sum::<i64>())
            .sum()
    }

    /// The counts as a float matrix for the contingency test.
    pub fn observed_matrix(&self) -> Vec<Vec<f64>> {
        self.rows
            .iter()
            .map(|r| r.counts.iter().map(|&c| c as f64).collect())
            .collect()
    }
}

/// Removes count columns whose total is exactly zero.
fn clean_zero_columns(crosstab: CrossTab) -> CrossTab {
    let totals = crosstab.column_totals();
    let keep: Vec<usize> = (0..crosstab.columns.len())
        .filter(|&idx| totals[idx] != 0)
        .collect();
    if keep.len() == crosstab.columns.len() {
        return crosstab;
    }

    let columns = keep.iter().map(|&i| crosstab.columns[i].clone()).collect();
    let rows = crosstab
        .rows
        .into_iter()
        .map(|row| CrossTabRow {
            label: row.label,
            counts: keep.iter().map(|&i| row.counts[i]).collect(),
        })
        .collect();
    CrossTab {
        row_header: crosstab.row_header,
        columns,
        rows,
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Builds cross-tabs for one (collection, analysis) pair.
pub struct CrossTabBuilder<'a> {
    collection: &'a CollectionRule,
    analysis: &'a AnalysisRule,
}

impl<'a> CrossTabBuilder<'a> {
    /// Creates a builder for the pair.
    pub fn new(collection: &'a CollectionRule, analysis: &'a AnalysisRule) -> Self {
        Self {
            collection,
            analysis,
        }
    }

    fn empty_error(&self) -> EngineError {
        EngineError::empty_result(self.collection.slug(), self.analysis.slug())
    }

    /// Pivots the working table into a cross-tab and runs the cleanup
    /// pipeline.
    #[instrument(skip_all, fields(collection = %self.collection.slug(), analysis = %self.analysis.slug()))]
    pub async fn build(&self, table: &Table) -> Result<CrossTab> {
        if table.num_rows() == 0 {
            return Err(self.empty_error());
        }

        let coll_slug = self.collection.slug();
        let ana_slug = self.analysis.slug();

        // Numeric category codes must not carry spurious decimals once
        // they become headers.
        let table = table.coerce_float_to_int(ana_slug)?;

        let ctx = SessionContext::new();
        table.register(&ctx, "data")?;

        let coll_ident = quote_ident(coll_slug);
        let ana_ident = quote_ident(ana_slug);
        // Null ids do not count; without an id column every row weighs 1.
        let count_expr = if table.has_column("id") {
            format!("COUNT({})", quote_ident("id"))
        } else {
            "COUNT(*)".to_string()
        };

        let raw_cols = self.distinct_column_keys(&ctx, &ana_ident).await?;
        let (row_keys, cells) = self
            .pivot_counts(&ctx, &coll_ident, &ana_ident, &count_expr, &raw_cols)
            .await?;

        // Resolve allowed/verbose values, inferring from the data when the
        // rule declared none.
        let allowed: Vec<CategoryValue> = if self.analysis.config.allowed_values.is_empty() {
            raw_cols
                .iter()
                .map(|k| CategoryValue::Str(k.clone()))
                .collect()
        } else {
            self.analysis.config.allowed_values.clone()
        };
        let verbose: Vec<String> = if self.analysis.config.verbose_allowed_values.is_empty() {
            allowed.iter().map(|v| v.to_string()).collect()
        } else {
            self.analysis.config.verbose_allowed_values.clone()
        };
        if allowed.len() != verbose.len() {
            return Err(EngineError::configuration(format!(
                "rule '{}' pairs {} allowed values with {} verbose labels",
                ana_slug,
                allowed.len(),
                verbose.len()
            )));
        }

        let nice: HashMap<String, String> = allowed
            .iter()
            .map(|v| v.to_string())
            .zip(verbose.iter().cloned())
            .collect();

        // Rename raw keys to verbose headers, dropping columns outside the
        // verbose set. Two raw codes mapping to the same label overwrite:
        // the later code's counts win, they are never summed.
        let mut headers: Vec<String> = Vec::new();
        let mut owner: HashMap<String, usize> = HashMap::new();
        for (j, key) in raw_cols.iter().enumerate() {
            let header = nice.get(key).cloned().unwrap_or_else(|| key.clone());
            if !verbose.contains(&header) {
                continue;
            }
            if owner.insert(header.clone(), j).is_some() {
                warn!(
                    label = %header,
                    raw_code = %key,
                    "verbose label collision: counts overwritten, not summed"
                );
            } else {
                headers.push(header);
            }
        }

        let mut rows: Vec<CrossTabRow> = Vec::with_capacity(row_keys.len());
        for (i, label) in row_keys.iter().enumerate() {
            let counts: Vec<i64> = headers
                .iter()
                .map(|h| {
                    let j = owner[h];
                    cells.get(&(i, j)).copied().unwrap_or(0)
                })
                .collect();
            // Rows whose every surviving column is zero are dropped.
            if counts.iter().any(|&c| c != 0) {
                rows.push(CrossTabRow {
                    label: label.clone(),
                    counts,
                });
            }
        }

        // Rule-specific column order, applied after verbosification. A
        // returned subset keeps only the listed columns.
        if let Some(reorder) = &self.analysis.reorder {
            let new_order = reorder(&headers);
            let mut indices = Vec::with_capacity(new_order.len());
            for header in &new_order {
                let idx = headers.iter().position(|h| h == header).ok_or_else(|| {
                    EngineError::configuration(format!(
                        "reorder_columns returned unknown column '{header}'"
                    ))
                })?;
                indices.push(idx);
            }
            headers = new_order;
            for row in &mut rows {
                row.counts = indices.iter().map(|&i| row.counts[i]).collect();
            }
        }

        // Humanize coded row labels where the collection provides a lookup.
        if let Some(lookup) = &self.collection.label_lookup {
            let mut mapped = Vec::with_capacity(rows.len());
            for mut row in rows {
                if row.label == PLACEHOLDER_ROW_LABEL {
                    continue;
                }
                let code = row.label.parse::<f64>().map_err(|_| {
                    EngineError::parse(format!(
                        "row label '{}' is not a numeric code for lookup",
                        row.label
                    ))
                })? as i64;
                match lookup.get(&code.to_string()) {
                    Some(human) => {
                        row.label = human.clone();
                        mapped.push(row);
                    }
                    None => {
                        debug!(code, "row label code missing from lookup; dropping row");
                    }
                }
            }
            rows = mapped;
        }

        // Restrict rows to the collection's allowed values (inferred
        // collections admit everything).
        let allowed_rows = self.collection.allowed_row_values();
        if !allowed_rows.is_empty() {
            rows.retain(|r| allowed_rows.contains(&r.label));
        }

        let crosstab = clean_zero_columns(CrossTab {
            row_header: coll_slug.to_string(),
            columns: headers,
            rows,
        });

        if crosstab.rows.is_empty() {
            return Err(self.empty_error());
        }
        debug!(
            rows = crosstab.rows.len(),
            columns = crosstab.columns.len(),
            grand_total = crosstab.grand_total(),
            "built cross-tab"
        );
        Ok(crosstab)
    }

    /// A pre-built matrix supplied by the rule: only row filtering, zero
    /// column cleanup and the empty check apply.
    pub fn passthrough(&self, seed: CrossTab) -> Result<CrossTab> {
        let allowed_rows = self.collection.allowed_row_values();
        let mut rows = seed.rows;
        if !allowed_rows.is_empty() {
            rows.retain(|r| allowed_rows.contains(&r.label));
        }

        let crosstab = clean_zero_columns(CrossTab {
            row_header: seed.row_header,
            columns: seed.columns,
            rows,
        });
        if crosstab.rows.is_empty() {
            return Err(self.empty_error());
        }
        Ok(crosstab)
    }

    /// Distinct non-null column keys, in the engine's sort order (numeric
    /// codes sort numerically, strings lexically), stringified.
    async fn distinct_column_keys(
        &self,
        ctx: &SessionContext,
        ana_ident: &str,
    ) -> Result<Vec<String>> {
        let sql = format!(
            "SELECT DISTINCT {ana_ident} AS col_key FROM data \
             WHERE {ana_ident} IS NOT NULL ORDER BY col_key"
        );
        let batches = ctx.sql(&sql).await?.collect().await?;

        let mut keys = Vec::new();
        for batch in &batches {
            let cast = compute::cast(batch.column(0), &DataType::Utf8)?;
            let strings = cast
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(|| EngineError::internal("col_key did not cast to Utf8"))?;
            for i in 0..strings.len() {
                keys.push(strings.value(i).to_string());
            }
        }
        Ok(keys)
    }

    /// Runs the two-way frequency query and indexes the counts by
    /// (row position, raw column position).
    async fn pivot_counts(
        &self,
        ctx: &SessionContext,
        coll_ident: &str,
        ana_ident: &str,
        count_expr: &str,
        raw_cols: &[String],
    ) -> Result<(Vec<String>, HashMap<(usize, usize), i64>)> {
        let sql = format!(
            "SELECT {coll_ident} AS row_key, {ana_ident} AS col_key, {count_expr} AS n \
             FROM data \
             WHERE {coll_ident} IS NOT NULL AND {ana_ident} IS NOT NULL \
             GROUP BY {coll_ident}, {ana_ident} \
             ORDER BY row_key, col_key"
        );
        let batches = ctx.sql(&sql).await?.collect().await?;

        let col_index: HashMap<&str, usize> = raw_cols
            .iter()
            .enumerate()
            .map(|(idx, key)| (key.as_str(), idx))
            .collect();

        let mut row_keys: Vec<String> = Vec::new();
        let mut row_index: HashMap<String, usize> = HashMap::new();
        let mut cells: HashMap<(usize, usize), i64> = HashMap::new();

        for batch in &batches {
            let rows_cast = compute::cast(batch.column(0), &DataType::Utf8)?;
            let row_strings = rows_cast
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(|| EngineError::internal("row_key did not cast to Utf8"))?;
            let cols_cast = compute::cast(batch.column(1), &DataType::Utf8)?;
            let col_strings = cols_cast
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(|| EngineError::internal("col_key did not cast to Utf8"))?;
            let counts = batch
                .column(2)
                .as_any()
                .downcast_ref::<Int64Array>()
                .ok_or_else(|| EngineError::internal("expected Int64 counts"))?;

            for i in 0..batch.num_rows() {
                let row_key = row_strings.value(i).to_string();
                let row_pos = match row_index.get(&row_key) {
                    Some(&pos) => pos,
                    None => {
                        let pos = row_keys.len();
                        row_index.insert(row_key.clone(), pos);
                        row_keys.push(row_key);
                        pos
                    }
                };
                let col_key = col_strings.value(i);
                let Some(&col_pos) = col_index.get(col_key) else {
                    continue;
                };
                cells.insert((row_pos, col_pos), counts.value(i));
            }
        }
        Ok((row_keys, cells))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{DeriveStrategy, RuleConfig};
    use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray};
    use std::collections::HashMap as StdHashMap;
    use std::sync::Arc;

    fn collection(allowed: Vec<CategoryValue>) -> CollectionRule {
        CollectionRule::new(
            RuleConfig::new("category", "Category").with_allowed_values(allowed),
            DeriveStrategy::Existing,
        )
    }

    fn analysis(config: RuleConfig) -> AnalysisRule {
        AnalysisRule::new(config, DeriveStrategy::Existing)
    }

    fn day_table() -> Table {
        // category A: 6 rows all on day 0; category B: one row each on days 1-4
        let mut categories = vec!["A"; 6];
        categories.extend(vec!["B"; 4]);
        let days: Int64Array = vec![0, 0, 0, 0, 0, 0, 1, 2, 3, 4]
            .into_iter()
            .map(Some)
            .collect();
        let ids: Int64Array = (1..=10).map(Some).collect();
        Table::try_from_columns(vec![
            ("id", Arc::new(ids) as ArrayRef),
            ("category", Arc::new(StringArray::from(categories)) as ArrayRef),
            ("day", Arc::new(days) as ArrayRef),
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn test_two_way_counts() {
        let coll = collection(vec!["A".into(), "B".into()]);
        let ana = analysis(RuleConfig::new("day", "Day of Week"));
        let crosstab = CrossTabBuilder::new(&coll, &ana)
            .build(&day_table())
            .await
            .unwrap();

        assert_eq!(crosstab.columns, vec!["0", "1", "2", "3", "4"]);
        assert_eq!(crosstab.rows.len(), 2);
        assert_eq!(crosstab.rows[0].label, "A");
        assert_eq!(crosstab.rows[0].counts, vec![6, 0, 0, 0, 0]);
        assert_eq!(crosstab.rows[1].counts, vec![0, 1, 1, 1, 1]);
        assert_eq!(crosstab.grand_total(), 10);
        assert_eq!(crosstab.column_totals(), vec![6, 1, 1, 1, 1]);
    }

    #[tokio::test]
    async fn test_verbose_headers_and_value_restriction() {
        let coll = collection(vec!["A".into(), "B".into()]);
        let ana = analysis(
            RuleConfig::new("day", "Day of Week")
                .with_allowed_values(vec![CategoryValue::Int(0), CategoryValue::Int(1)])
                .with_verbose_values(vec!["Sunday", "Monday"]),
        );
        let crosstab = CrossTabBuilder::new(&coll, &ana)
            .build(&day_table())
            .await
            .unwrap();

        // days 2-4 are outside the allowed set and dropped
        assert_eq!(crosstab.columns, vec!["Sunday", "Monday"]);
        assert_eq!(crosstab.rows[0].counts, vec![6, 0]);
        assert_eq!(crosstab.rows[1].counts, vec![0, 1]);
    }

    #[tokio::test]
    async fn test_float_codes_coerced() {
        let categories = StringArray::from(vec!["A", "A", "B"]);
        let codes: Float64Array = vec![Some(1.0), None, Some(2.0)].into_iter().collect();
        let table = Table::try_from_columns(vec![
            ("category", Arc::new(categories) as ArrayRef),
            ("code", Arc::new(codes) as ArrayRef),
        ])
        .unwrap();

        let coll = collection(vec!["A".into(), "B".into()]);
        let ana = analysis(RuleConfig::new("code", "Code"));
        let crosstab = CrossTabBuilder::new(&coll, &ana).build(&table).await.unwrap();

        // null became code 0; no "1.0" style headers
        assert_eq!(crosstab.columns, vec!["0", "1", "2"]);
    }

    #[tokio::test]
    async fn test_zero_rows_dropped() {
        let coll = collection(vec!["A".into(), "B".into(), "C".into()]);
        let ana = analysis(
            RuleConfig::new("day", "Day").with_allowed_values(vec![CategoryValue::Int(1)]),
        );
        let crosstab = CrossTabBuilder::new(&coll, &ana)
            .build(&day_table())
            .await
            .unwrap();

        // category A only has day-0 rows, so it sums to zero and is gone
        assert_eq!(crosstab.rows.len(), 1);
        assert_eq!(crosstab.rows[0].label, "B");
    }

    #[tokio::test]
    async fn test_empty_result_is_error() {
        let coll = collection(vec!["Z".into()]);
        let ana = analysis(RuleConfig::new("day", "Day"));
        let err = CrossTabBuilder::new(&coll, &ana)
            .build(&day_table())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::EmptyResult { .. }));
    }

    #[tokio::test]
    async fn test_label_collision_last_write_wins() {
        // Two distinct raw codes verbosify to the same label: a single
        // column remains, and the later code's counts replace the earlier
        // ones. They are never summed.
        let categories = StringArray::from(vec!["A", "A", "A"]);
        let codes: Int64Array = vec![1, 1, 2].into_iter().map(Some).collect();
        let table = Table::try_from_columns(vec![
            ("category", Arc::new(categories) as ArrayRef),
            ("code", Arc::new(codes) as ArrayRef),
        ])
        .unwrap();

        let coll = collection(vec!["A".into()]);
        let ana = analysis(
            RuleConfig::new("code", "Code")
                .with_allowed_values(vec![CategoryValue::Int(1), CategoryValue::Int(2)])
                .with_verbose_values(vec!["One", "One"]),
        );
        let crosstab = CrossTabBuilder::new(&coll, &ana).build(&table).await.unwrap();

        assert_eq!(crosstab.columns, vec!["One"]);
        // code 2 was processed last; its single row wins over code 1's two
        assert_eq!(crosstab.rows[0].counts, vec![1]);
    }

    #[tokio::test]
    async fn test_reorder_columns() {
        let coll = collection(vec!["A".into(), "B".into()]);
        let ana = AnalysisRule::new(RuleConfig::new("day", "Day"), DeriveStrategy::Existing)
            .with_reorder(|headers| {
                let mut reversed: Vec<String> = headers.to_vec();
                reversed.reverse();
                reversed
            });
        let crosstab = CrossTabBuilder::new(&coll, &ana)
            .build(&day_table())
            .await
            .unwrap();

        assert_eq!(crosstab.columns, vec!["4", "3", "2", "1", "0"]);
        assert_eq!(crosstab.rows[0].counts, vec![0, 0, 0, 0, 6]);
    }

    #[tokio::test]
    async fn test_row_label_lookup_with_placeholder() {
        let categories = StringArray::from(vec!["1", "1", "2", "please select", "9"]);
        let flags = StringArray::from(vec!["yes", "no", "yes", "yes", "yes"]);
        let table = Table::try_from_columns(vec![
            ("answer", Arc::new(categories) as ArrayRef),
            ("flag", Arc::new(flags) as ArrayRef),
        ])
        .unwrap();

        let mut lookup = StdHashMap::new();
        lookup.insert("1".to_string(), "University".to_string());
        lookup.insert("2".to_string(), "School".to_string());

        let coll = CollectionRule::new(
            RuleConfig::new("answer", "Education")
                .with_allowed_values(vec!["University".into(), "School".into()]),
            DeriveStrategy::Existing,
        )
        .with_label_lookup(lookup);
        let ana = analysis(RuleConfig::new("flag", "Flag"));

        let crosstab = CrossTabBuilder::new(&coll, &ana).build(&table).await.unwrap();

        let labels: Vec<&str> = crosstab.rows.iter().map(|r| r.label.as_str()).collect();
        // the placeholder row and the code missing from the lookup are gone
        assert_eq!(labels, vec!["University", "School"]);
    }

    #[tokio::test]
    async fn test_passthrough_filters_and_cleans() {
        let coll = collection(vec!["A".into()]);
        let ana = analysis(RuleConfig::new("pre", "Prebuilt"));

        let seed = CrossTab {
            row_header: "category".to_string(),
            columns: vec!["x".to_string(), "y".to_string()],
            rows: vec![
                CrossTabRow {
                    label: "A".to_string(),
                    counts: vec![3, 0],
                },
                CrossTabRow {
                    label: "B".to_string(),
                    counts: vec![1, 0],
                },
            ],
        };

        let crosstab = CrossTabBuilder::new(&coll, &ana).passthrough(seed).unwrap();
        assert_eq!(crosstab.rows.len(), 1);
        assert_eq!(crosstab.columns, vec!["x"]);
    }
}
