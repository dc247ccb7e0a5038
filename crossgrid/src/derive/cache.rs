//! Caches used during column derivation.
//!
//! Two distinct caches exist:
//!
//! * [`LookupCache`] memoizes external lookup tables (id → category) per
//!   rule identity for the lifetime of the process, write-once-read-many.
//! * [`ColumnCache`] persists derived or source-loaded columns to disk so
//!   repeated runs over the same source skip recomputation entirely.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use arrow::array::{Array, ArrayRef};
use tracing::{debug, warn};

use crate::error::Result;
use crate::rules::LookupSpec;
use crate::sources::{load_lookup, CsvSource, TableSource};

/// Process-local memoization of lookup tables, keyed by rule identity.
///
/// Injected into the deriver rather than hidden in global state, so tests
/// can supply a fresh cache and assert hit/miss behavior.
#[derive(Debug, Default)]
pub struct LookupCache {
    tables: Mutex<HashMap<String, Arc<HashMap<String, String>>>>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl LookupCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the lookup table for a rule, loading it on first access.
    pub async fn get_or_load(
        &self,
        rule_slug: &str,
        lookup_dir: &Path,
        spec: &LookupSpec,
    ) -> Result<Arc<HashMap<String, String>>> {
        if let Some(table) = self
            .tables
            .lock()
            .expect("lookup cache poisoned")
            .get(rule_slug)
        {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(table.clone());
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let path = lookup_dir.join(&spec.file);
        let mapping = Arc::new(load_lookup(&path, &spec.key_column, &spec.value_column).await?);
        debug!(rule = rule_slug, entries = mapping.len(), "cached lookup table");

        self.tables
            .lock()
            .expect("lookup cache poisoned")
            .insert(rule_slug.to_string(), mapping.clone());
        Ok(mapping)
    }

    /// Number of cache hits so far.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }

    /// Number of cache misses so far.
    pub fn misses(&self) -> usize {
        self.misses.load(Ordering::Relaxed)
    }
}

/// On-disk cache of individual columns, keyed by (source identity, column
/// name).
///
/// Columns are stored as single-column CSV files. A missing cache entry
/// silently degrades to recomputation from source; a stale entry (row count
/// no longer matching the source) is discarded with a warning. Entries are
/// only invalidated by the `regenerate` flag or by deleting the files.
#[derive(Debug, Clone)]
pub struct ColumnCache {
    dir: PathBuf,
}

impl ColumnCache {
    /// Creates a cache rooted at the given directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the cache entry for a column.
    pub fn path_for(&self, source_identity: &str, column: &str) -> PathBuf {
        self.dir.join(format!("{source_identity}_{column}.csv"))
    }

    /// Loads a cached column if present.
    pub async fn load(&self, source_identity: &str, column: &str) -> Result<Option<ArrayRef>> {
        let path = self.path_for(source_identity, column);
        if !path.is_file() {
            return Ok(None);
        }

        let table = CsvSource::new(&path)?.load(None).await?;
        match table.column(column) {
            Some(array) => {
                debug!(column, "loaded column from cache");
                Ok(Some(array.clone()))
            }
            None => {
                warn!(
                    column,
                    path = %path.display(),
                    "cache file does not contain the expected column; ignoring"
                );
                Ok(None)
            }
        }
    }

    /// Writes a column to the cache, replacing any previous entry.
    ///
    /// The write goes through a temp file and a rename so a crash cannot
    /// leave a half-written entry behind.
    pub fn store(&self, source_identity: &str, column: &str, array: &ArrayRef) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(source_identity, column);
        let tmp_path = path.with_extension("csv.tmp");

        let table = crate::table::Table::try_from_columns(vec![(column, array.clone())])?;
        {
            let file = std::fs::File::create(&tmp_path)?;
            let mut writer = arrow::csv::WriterBuilder::new()
                .with_header(true)
                .build(file);
            writer.write(table.batch())?;
        }
        std::fs::rename(&tmp_path, &path)?;
        debug!(column, path = %path.display(), "stored column in cache");
        Ok(())
    }

    /// Removes a cache entry if present.
    pub fn invalidate(&self, source_identity: &str, column: &str) -> Result<()> {
        let path = self.path_for(source_identity, column);
        if path.is_file() {
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }

    /// The cache directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Validates a cached column against the expected row count, discarding
    /// stale entries.
    pub fn check_length(
        &self,
        column: &str,
        array: ArrayRef,
        expected_rows: Option<usize>,
    ) -> Option<ArrayRef> {
        match expected_rows {
            Some(expected) if array.len() != expected => {
                warn!(
                    column,
                    cached_rows = array.len(),
                    expected_rows = expected,
                    "cached column is stale; recomputing from source"
                );
                None
            }
            _ => Some(array),
        }
    }
}
