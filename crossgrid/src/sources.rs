//! Data sources for Crossgrid working tables.
//!
//! Source tables and lookup tables arrive as delimited files; both are read
//! through DataFusion so schema inference and projection behave the same
//! everywhere. An in-memory source is provided for tests and embedding.

use std::collections::HashMap;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::compute::concat_batches;
use arrow::datatypes::Schema;
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use datafusion::prelude::{CsvReadOptions, SessionContext};
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::table::Table;

/// A source of rows for the engine.
///
/// Implementations expose the available column names (so the deriver can
/// plan a minimal projection) and load some or all columns into a single
/// in-memory [`Table`].
#[async_trait]
pub trait TableSource: Debug + Send + Sync {
    /// Column names available from this source, in file order.
    async fn header(&self) -> Result<Vec<String>>;

    /// Loads the source, optionally projected down to the named columns.
    ///
    /// Requested columns that do not exist in the source are skipped by the
    /// caller, not here; passing an unknown name is an error.
    async fn load(&self, columns: Option<&[String]>) -> Result<Table>;

    /// Stable identity used to key derived-column caches.
    ///
    /// For file sources this is the file stem; a new file name invalidates
    /// cached columns.
    fn identity(&self) -> String;
}

/// A CSV-file backed table source.
#[derive(Debug, Clone)]
pub struct CsvSource {
    path: PathBuf,
}

impl CsvSource {
    /// Creates a CSV source, verifying the file exists.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.is_file() {
            return Err(EngineError::configuration(format!(
                "source file not found: {}",
                path.display()
            )));
        }
        Ok(Self { path })
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn path_str(&self) -> Result<&str> {
        self.path
            .to_str()
            .ok_or_else(|| EngineError::configuration("source path is not valid UTF-8"))
    }
}

#[async_trait]
impl TableSource for CsvSource {
    async fn header(&self) -> Result<Vec<String>> {
        let ctx = SessionContext::new();
        let df = ctx.read_csv(self.path_str()?, CsvReadOptions::new()).await?;
        Ok(df
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect())
    }

    async fn load(&self, columns: Option<&[String]>) -> Result<Table> {
        let ctx = SessionContext::new();
        let df = ctx.read_csv(self.path_str()?, CsvReadOptions::new()).await?;
        let df = match columns {
            Some(names) => {
                let refs: Vec<&str> = names.iter().map(|s| s.as_str()).collect();
                df.select_columns(&refs)?
            }
            None => df,
        };
        let schema = Arc::new(Schema::from(df.schema()));
        let batches = df.collect().await?;
        let batch = if batches.is_empty() {
            RecordBatch::new_empty(schema)
        } else {
            concat_batches(&batches[0].schema(), &batches)?
        };
        debug!(
            source = %self.path.display(),
            rows = batch.num_rows(),
            columns = batch.num_columns(),
            "loaded csv source"
        );
        Ok(Table::new(batch))
    }

    fn identity(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "source".to_string())
    }
}

/// An in-memory table source, for tests and embedding callers that already
/// hold their rows as Arrow batches.
#[derive(Debug, Clone)]
pub struct MemorySource {
    name: String,
    table: Table,
}

impl MemorySource {
    /// Wraps a table under a stable identity.
    pub fn new(name: impl Into<String>, table: Table) -> Self {
        Self {
            name: name.into(),
            table,
        }
    }
}

#[async_trait]
impl TableSource for MemorySource {
    async fn header(&self) -> Result<Vec<String>> {
        Ok(self.table.column_names())
    }

    async fn load(&self, columns: Option<&[String]>) -> Result<Table> {
        match columns {
            Some(names) => {
                let refs: Vec<&str> = names.iter().map(|s| s.as_str()).collect();
                self.table.select(&refs)
            }
            None => Ok(self.table.clone()),
        }
    }

    fn identity(&self) -> String {
        self.name.clone()
    }
}

/// Loads a two-column lookup table (key → category) from a CSV file.
///
/// Keys and values are stringified so integer identifiers and their string
/// forms resolve identically. Rows with a null key or value are dropped.
pub async fn load_lookup(
    path: impl AsRef<Path>,
    key_column: &str,
    value_column: &str,
) -> Result<HashMap<String, String>> {
    let source = CsvSource::new(path.as_ref())?;
    let table = source
        .load(Some(&[key_column.to_string(), value_column.to_string()]))
        .await?;

    let keys = table.string_values("lookup", key_column)?;
    let values = table.string_values("lookup", value_column)?;

    let mut mapping = HashMap::with_capacity(keys.len());
    for (key, value) in keys.into_iter().zip(values.into_iter()) {
        if let (Some(k), Some(v)) = (key, value) {
            mapping.insert(k, v);
        }
    }
    debug!(
        lookup = %path.as_ref().display(),
        entries = mapping.len(),
        "loaded lookup table"
    );
    Ok(mapping)
}
