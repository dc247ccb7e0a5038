//! Column derivation: turning raw records into categorical row and column
//! labels.
//!
//! The deriver assembles a minimal working table (only the columns the
//! active rules need, cached columns first), runs the analysis rule's
//! prepare hook, derives the collection and analysis columns via each
//! rule's strategy, applies the restriction chain, and projects down to the
//! columns the pivot needs.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{ArrayRef, StringArray};
use tracing::{debug, info, instrument, warn};

use crate::error::{EngineError, Result};
use crate::restrict::{apply_restrictions, Restriction};
use crate::rules::{AnalysisRule, CollectionRule, DeriveStrategy};
use crate::sources::TableSource;
use crate::table::Table;

mod cache;

pub use cache::{ColumnCache, LookupCache};

/// Derives categorical columns and assembles working tables.
pub struct ColumnDeriver<'a> {
    lookup_dir: PathBuf,
    lookups: &'a LookupCache,
    column_cache: Option<ColumnCache>,
}

impl<'a> ColumnDeriver<'a> {
    /// Creates a deriver reading lookup tables from `lookup_dir`.
    pub fn new(lookup_dir: impl Into<PathBuf>, lookups: &'a LookupCache) -> Self {
        Self {
            lookup_dir: lookup_dir.into(),
            lookups,
            column_cache: None,
        }
    }

    /// Enables the on-disk derived-column cache.
    pub fn with_column_cache(mut self, cache: ColumnCache) -> Self {
        self.column_cache = Some(cache);
        self
    }

    /// Directory lookup tables are read from.
    pub fn lookup_dir(&self) -> &Path {
        &self.lookup_dir
    }

    /// Produces the categorical column for a rule over the given table.
    ///
    /// The array is aligned with the table's rows; unmappable records are
    /// null. Fails fast with a rule-attributed error when a required source
    /// column is absent.
    pub async fn derive_column(
        &self,
        table: &Table,
        slug: &str,
        strategy: &DeriveStrategy,
        required_columns: &[String],
    ) -> Result<ArrayRef> {
        for column in required_columns {
            if !table.has_column(column) {
                return Err(EngineError::column_not_found(slug, column));
            }
        }

        match strategy {
            DeriveStrategy::Existing => Ok(table.require_column(slug, slug)?.clone()),
            DeriveStrategy::RowWise(transform) => {
                debug!(rule = slug, "deriving column row-wise");
                let values: StringArray = table.rows().map(|row| transform(&row)).collect();
                Ok(Arc::new(values))
            }
            DeriveStrategy::Lookup { key_column, lookup } => {
                let mapping = self
                    .lookups
                    .get_or_load(slug, &self.lookup_dir, lookup)
                    .await?;
                let keys = table.string_values(slug, key_column)?;
                let values: StringArray = keys
                    .into_iter()
                    .map(|key| key.and_then(|k| mapping.get(&k).cloned()))
                    .collect();
                Ok(Arc::new(values))
            }
        }
    }

    /// Builds the working table for one (collection, analysis) pair.
    ///
    /// Loads only the columns the pair needs, preferring cached columns,
    /// then derives the two label columns (caching them for later runs)
    /// and applies the restriction chain: register-wide, then the analysis
    /// rule's, then the collection rule's. The result is projected to the
    /// label columns plus `id` when present.
    #[instrument(skip_all, fields(collection = %collection.slug(), analysis = %analysis.slug()))]
    pub async fn assemble(
        &self,
        source: &dyn TableSource,
        collection: &CollectionRule,
        analysis: &AnalysisRule,
        extra_required: &[String],
        global_restriction: Option<&Restriction>,
        regenerate: bool,
    ) -> Result<Table> {
        fn push_unique(name: &str, wanted: &mut Vec<String>) {
            if !wanted.iter().any(|w| w == name) {
                wanted.push(name.to_string());
            }
        }

        let mut wanted: Vec<String> = Vec::new();
        for name in extra_required
            .iter()
            .chain(collection.config.required_columns.iter())
            .chain(analysis.config.required_columns.iter())
        {
            push_unique(name, &mut wanted);
        }
        // The label columns themselves may already exist in the source.
        push_unique(analysis.slug(), &mut wanted);
        push_unique(collection.slug(), &mut wanted);

        let mut table = self.load_limited(source, &wanted, regenerate).await?;
        let source_rows = table.num_rows();

        if let Some(prepare) = &analysis.prepare {
            table = prepare(&table)?;
            if table.num_rows() != source_rows {
                debug!(
                    before = source_rows,
                    after = table.num_rows(),
                    "prepare hook changed row count"
                );
            }
        }

        table = self
            .ensure_label_column(
                source,
                table,
                collection.slug(),
                &collection.strategy,
                &collection.config.required_columns,
                source_rows,
                regenerate,
            )
            .await?;
        table = self
            .ensure_label_column(
                source,
                table,
                analysis.slug(),
                &analysis.strategy,
                &analysis.config.required_columns,
                source_rows,
                regenerate,
            )
            .await?;

        // Register-wide restriction first (broadest), collection last so the
        // analysis derivation saw the widest possible data.
        table = apply_restrictions(
            table,
            &[
                global_restriction,
                analysis.restriction.as_ref(),
                collection.restriction.as_ref(),
            ],
        )?;

        let mut keep: Vec<&str> = Vec::new();
        if table.has_column("id") {
            keep.push("id");
        }
        keep.push(analysis.slug());
        keep.push(collection.slug());
        table.select(&keep)
    }

    /// Loads the named columns from cache and source, skipping (with a
    /// warning) columns found in neither, which may be derived afterwards.
    async fn load_limited(
        &self,
        source: &dyn TableSource,
        wanted: &[String],
        regenerate: bool,
    ) -> Result<Table> {
        let identity = source.identity();
        let available = source.header().await?;

        let mut cached: Vec<(String, ArrayRef)> = Vec::new();
        if let Some(cache) = &self.column_cache {
            if !regenerate {
                for name in wanted {
                    if let Some(array) = cache.load(&identity, name).await? {
                        cached.push((name.clone(), array));
                    }
                }
            }
        }

        let from_source: Vec<String> = wanted
            .iter()
            .filter(|name| !cached.iter().any(|(n, _)| n == *name))
            .filter(|name| available.contains(name))
            .cloned()
            .collect();

        let source_table = if from_source.is_empty() {
            None
        } else {
            let table = source.load(Some(&from_source)).await?;
            if let Some(cache) = &self.column_cache {
                for name in &from_source {
                    if let Some(array) = table.column(name) {
                        cache.store(&identity, name, array)?;
                    }
                }
            }
            Some(table)
        };

        let expected_rows = source_table.as_ref().map(|t| t.num_rows());
        let mut columns: Vec<(String, ArrayRef)> = Vec::new();
        if let Some(cache) = &self.column_cache {
            for (name, array) in cached {
                if let Some(array) = cache.check_length(&name, array, expected_rows) {
                    columns.push((name, array));
                }
            }
        }
        if let Some(table) = &source_table {
            for name in &from_source {
                if let Some(array) = table.column(name) {
                    columns.push((name.clone(), array.clone()));
                }
            }
        }

        for name in wanted {
            if !columns.iter().any(|(n, _)| n == name) {
                info!(column = %name, "column not found; expecting it to be derived");
            }
        }

        if columns.is_empty() {
            return Err(EngineError::configuration(format!(
                "none of the requested columns exist in source '{identity}'"
            )));
        }

        // Preserve the wanted order for deterministic schemas.
        columns.sort_by_key(|(name, _)| wanted.iter().position(|w| w == name).unwrap_or(usize::MAX));
        let refs: Vec<(&str, ArrayRef)> = columns
            .iter()
            .map(|(n, a)| (n.as_str(), a.clone()))
            .collect();
        Table::try_from_columns(refs)
    }

    /// Makes sure the label column exists, deriving (and caching) it when
    /// absent or when regeneration is forced.
    #[allow(clippy::too_many_arguments)]
    async fn ensure_label_column(
        &self,
        source: &dyn TableSource,
        table: Table,
        slug: &str,
        strategy: &DeriveStrategy,
        required_columns: &[String],
        source_rows: usize,
        regenerate: bool,
    ) -> Result<Table> {
        if table.has_column(slug) && !regenerate {
            return Ok(table);
        }
        if table.has_column(slug) && matches!(strategy, DeriveStrategy::Existing) {
            return Ok(table);
        }

        info!(rule = slug, "creating label column");
        let array = self
            .derive_column(&table, slug, strategy, required_columns)
            .await?;

        if let Some(cache) = &self.column_cache {
            if table.num_rows() == source_rows {
                cache.store(&source.identity(), slug, &array)?;
            } else {
                warn!(
                    rule = slug,
                    "prepare hook changed row count; skipping column cache write"
                );
            }
        }

        table.with_column(slug, array)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{LookupSpec, RuleConfig};
    use crate::sources::MemorySource;
    use arrow::array::Int64Array;

    fn source_table() -> Table {
        let ids: Int64Array = vec![1, 2, 3, 7].into_iter().map(Some).collect();
        let hours: Int64Array = vec![9, 22, 9, 14].into_iter().map(Some).collect();
        let categories = StringArray::from(vec!["roads", "lights", "roads", "roads"]);
        Table::try_from_columns(vec![
            ("id", Arc::new(ids) as ArrayRef),
            ("hour", Arc::new(hours) as ArrayRef),
            ("category", Arc::new(categories) as ArrayRef),
        ])
        .unwrap()
    }

    fn collection_rule() -> CollectionRule {
        CollectionRule::new(
            RuleConfig::new("category", "Category").with_required_columns(vec!["category"]),
            DeriveStrategy::Existing,
        )
    }

    #[tokio::test]
    async fn test_row_wise_derivation() {
        let lookups = LookupCache::new();
        let deriver = ColumnDeriver::new("/tmp", &lookups);
        let table = source_table();

        let strategy = DeriveStrategy::RowWise(Arc::new(|row| {
            row.i64_value("hour")
                .map(|h| if h < 12 { "Morning" } else { "Later" }.to_string())
        }));
        let array = deriver
            .derive_column(&table, "daypart", &strategy, &["hour".to_string()])
            .await
            .unwrap();

        let table = table.with_column("daypart", array).unwrap();
        assert_eq!(table.row(0).text("daypart"), Some("Morning"));
        assert_eq!(table.row(1).text("daypart"), Some("Later"));
    }

    #[tokio::test]
    async fn test_missing_required_column_is_attributed() {
        let lookups = LookupCache::new();
        let deriver = ColumnDeriver::new("/tmp", &lookups);

        let strategy = DeriveStrategy::RowWise(Arc::new(|_| None));
        let err = deriver
            .derive_column(
                &source_table(),
                "gender",
                &strategy,
                &["derived_gender".to_string()],
            )
            .await
            .unwrap_err();

        match err {
            EngineError::ColumnNotFound { column, rule } => {
                assert_eq!(column, "derived_gender");
                assert_eq!(rule, "gender");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_lookup_derivation_leaves_unmatched_null() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("gender_by_id.csv"),
            "id,gender\n1,male\n2,female\n3,male\n",
        )
        .unwrap();

        let lookups = LookupCache::new();
        let deriver = ColumnDeriver::new(dir.path(), &lookups);
        let table = source_table();

        let strategy = DeriveStrategy::Lookup {
            key_column: "id".to_string(),
            lookup: LookupSpec::new("gender_by_id.csv", "id", "gender"),
        };
        let array = deriver
            .derive_column(&table, "gender", &strategy, &["id".to_string()])
            .await
            .unwrap();

        let table = table.with_column("gender", array).unwrap();
        assert_eq!(table.row(0).text("gender"), Some("male"));
        // id 7 is missing from the lookup
        assert!(table.row(3).is_null("gender"));
    }

    #[tokio::test]
    async fn test_assemble_projects_and_restricts() {
        let lookups = LookupCache::new();
        let deriver = ColumnDeriver::new("/tmp", &lookups);
        let source = MemorySource::new("reports", source_table());

        let analysis = AnalysisRule::new(
            RuleConfig::new("daypart", "Part of Day").with_required_columns(vec!["hour"]),
            DeriveStrategy::RowWise(Arc::new(|row| {
                row.i64_value("hour")
                    .map(|h| if h < 12 { "Morning" } else { "Later" }.to_string())
            })),
        );

        let global = Restriction::new("no-lights", |row: &crate::table::RowView<'_>| {
            row.text("category") != Some("lights")
        });

        let table = deriver
            .assemble(&source, &collection_rule(), &analysis, &[], Some(&global), false)
            .await
            .unwrap();

        assert_eq!(table.column_names(), vec!["id", "daypart", "category"]);
        assert_eq!(table.num_rows(), 3);
    }

    #[tokio::test]
    async fn test_assemble_uses_column_cache() {
        let dir = tempfile::tempdir().unwrap();
        let lookups = LookupCache::new();
        let cache = ColumnCache::new(dir.path());
        let deriver = ColumnDeriver::new("/tmp", &lookups).with_column_cache(cache.clone());
        let source = MemorySource::new("reports", source_table());

        let analysis = AnalysisRule::new(
            RuleConfig::new("daypart", "Part of Day").with_required_columns(vec!["hour"]),
            DeriveStrategy::RowWise(Arc::new(|row| {
                row.i64_value("hour")
                    .map(|h| if h < 12 { "Morning" } else { "Later" }.to_string())
            })),
        );

        deriver
            .assemble(&source, &collection_rule(), &analysis, &[], None, false)
            .await
            .unwrap();

        // The derived column landed in the cache alongside the source columns.
        assert!(cache.path_for("reports", "daypart").is_file());
        assert!(cache.path_for("reports", "hour").is_file());
    }
}
