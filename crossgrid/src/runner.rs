//! Batch orchestration over the (collection × analysis) matrix.
//!
//! Each pair moves through: check for an existing artifact, check for a
//! lock marker, build the working table, pivot, persist the artifact, then
//! generate and persist its statistics. Rule-level errors abort only the
//! pair; the batch continues and the report records what happened.
//!
//! The lock marker is advisory, not atomic: a check-then-act race exists
//! between "lock absent" and "lock created". A collision costs a duplicate
//! computation, never a corrupt artifact, because artifact writes replace
//! the file atomically.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use crate::config::{lock_path, DatasetConfig, RunOptions};
use crate::crosstab::{self, CrossTabBuilder};
use crate::derive::{ColumnCache, ColumnDeriver, LookupCache};
use crate::error::Result;
use crate::rules::{AnalysisRule, CollectionRule, Register};
use crate::sources::{CsvSource, TableSource};
use crate::stats::{ContingencySet, LabelCatalog};

/// Outcome of one (collection, analysis) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PairStatus {
    /// Artifact and statistics were written.
    Done,
    /// Artifact already existed and `force` was off.
    SkippedExisting,
    /// A lock marker was present; another invocation owns the pair (or a
    /// previous one crashed mid-write and needs operator attention).
    SkippedLocked,
    /// The analysis excludes this collection.
    SkippedExcluded,
    /// The pair failed; the message carries the error.
    Failed(String),
}

/// Per-pair record in a run report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairOutcome {
    /// Collection rule slug.
    pub collection_slug: String,
    /// Analysis rule slug.
    pub analysis_slug: String,
    /// What happened.
    pub status: PairStatus,
}

/// Summary of a batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Service the run covered.
    pub service: String,
    /// When the run started.
    pub started: DateTime<Utc>,
    /// When the run finished.
    pub finished: Option<DateTime<Utc>>,
    /// One outcome per pair, in processing order.
    pub outcomes: Vec<PairOutcome>,
}

impl RunReport {
    fn record(&mut self, collection: &str, analysis: &str, status: PairStatus) {
        self.outcomes.push(PairOutcome {
            collection_slug: collection.to_string(),
            analysis_slug: analysis.to_string(),
            status,
        });
    }

    /// Number of pairs that completed.
    pub fn completed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status == PairStatus::Done)
            .count()
    }

    /// Number of pairs that failed.
    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, PairStatus::Failed(_)))
            .count()
    }

    /// Number of pairs skipped for any reason.
    pub fn skipped(&self) -> usize {
        self.outcomes.len() - self.completed() - self.failed()
    }
}

/// Runs a register's full matrix against a dataset.
pub struct BatchRunner {
    config: DatasetConfig,
    lookups: LookupCache,
    source: Option<Arc<dyn TableSource>>,
}

impl BatchRunner {
    /// Creates a runner for a dataset; the source table is read from the
    /// config's source file.
    pub fn new(config: DatasetConfig) -> Self {
        Self {
            config,
            lookups: LookupCache::new(),
            source: None,
        }
    }

    /// Overrides the source table (tests, embedded callers).
    pub fn with_source(mut self, source: Arc<dyn TableSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// The dataset configuration.
    pub fn config(&self) -> &DatasetConfig {
        &self.config
    }

    /// The process-wide lookup cache.
    pub fn lookup_cache(&self) -> &LookupCache {
        &self.lookups
    }

    fn resolve_source(&self) -> Result<Arc<dyn TableSource>> {
        match &self.source {
            Some(source) => Ok(source.clone()),
            None => Ok(Arc::new(CsvSource::new(&self.config.source_file)?)),
        }
    }

    /// Processes every (collection, analysis) pair of the register.
    ///
    /// Idempotent: pairs whose artifact exists are skipped unless `force`,
    /// and locked pairs are never touched. Failures abort only their pair.
    #[instrument(skip_all, fields(service = register.service()))]
    pub async fn run_all(&self, register: &Register, options: &RunOptions) -> Result<RunReport> {
        self.config.ensure_dirs()?;
        let source = self.resolve_source()?;

        let mut report = RunReport {
            service: register.service().to_string(),
            started: Utc::now(),
            finished: None,
            outcomes: Vec::new(),
        };

        let total = register.pair_count();
        let mut count = 0usize;

        for collection in register.collections() {
            info!(collection = collection.slug(), "collection");
            for analysis in register.analyses() {
                count += 1;
                if analysis.excludes(collection.slug()) {
                    report.record(collection.slug(), analysis.slug(), PairStatus::SkippedExcluded);
                    continue;
                }
                info!(
                    analysis = %analysis.config.name,
                    progress = format!("{count}/{total}"),
                    "pair"
                );

                let artifact = self
                    .config
                    .artifact_path(collection.slug(), analysis.slug());
                if artifact.is_file() && !options.force {
                    report.record(collection.slug(), analysis.slug(), PairStatus::SkippedExisting);
                    continue;
                }

                let lock = lock_path(&artifact);
                if lock.is_file() {
                    warn!(lock = %lock.display(), "lock marker present; skipping pair");
                    report.record(collection.slug(), analysis.slug(), PairStatus::SkippedLocked);
                    continue;
                }
                if options.create_locks {
                    std::fs::write(&lock, "")?;
                }

                let status = match self
                    .process_pair(source.as_ref(), register, collection, analysis, options)
                    .await
                {
                    Ok(_) => {
                        // Only a successful artifact write releases the
                        // lock; a crash leaves it visible.
                        if lock.is_file() {
                            std::fs::remove_file(&lock)?;
                        }
                        PairStatus::Done
                    }
                    Err(e) => {
                        error!(
                            collection = collection.slug(),
                            analysis = analysis.slug(),
                            error = %e,
                            "pair failed"
                        );
                        PairStatus::Failed(e.to_string())
                    }
                };
                report.record(collection.slug(), analysis.slug(), status);
            }
        }

        report.finished = Some(Utc::now());
        info!(
            completed = report.completed(),
            failed = report.failed(),
            skipped = report.skipped(),
            "run finished"
        );
        Ok(report)
    }

    /// Generates the artifact and statistics for one pair.
    async fn process_pair(
        &self,
        source: &dyn TableSource,
        register: &Register,
        collection: &CollectionRule,
        analysis: &AnalysisRule,
        options: &RunOptions,
    ) -> Result<PathBuf> {
        let builder = CrossTabBuilder::new(collection, analysis);

        let crosstab = match &analysis.passthrough {
            Some(provider) => builder.passthrough(provider()?)?,
            None => {
                let deriver = ColumnDeriver::new(&self.config.lookup_dir, &self.lookups)
                    .with_column_cache(ColumnCache::new(&self.config.cache_dir));
                let table = deriver
                    .assemble(
                        source,
                        collection,
                        analysis,
                        register.require_columns(),
                        register.restriction(),
                        options.regenerate,
                    )
                    .await?;
                builder.build(&table).await?
            }
        };

        let artifact = self
            .config
            .artifact_path(collection.slug(), analysis.slug());
        crosstab::write_csv(&crosstab, &artifact)?;

        let stats = ContingencySet::generate(
            register.service(),
            collection.slug(),
            analysis.slug(),
            &artifact.to_string_lossy(),
            &crosstab,
        )?;
        stats.write_json(&self.config.stats_path(collection.slug(), analysis.slug()))?;

        Ok(artifact)
    }

    /// Loads every persisted statistics set for the register's pairs.
    pub fn load_stats_sets(&self, register: &Register) -> Result<Vec<ContingencySet>> {
        let mut sets = Vec::new();
        for collection in register.collections() {
            for analysis in register.analyses() {
                let path = self.config.stats_path(collection.slug(), analysis.slug());
                if path.is_file() {
                    sets.push(ContingencySet::read_json(&path)?);
                }
            }
        }
        Ok(sets)
    }

    /// Builds the label catalog from the register's persisted statistics.
    pub fn build_label_catalog(&self, register: &Register) -> Result<LabelCatalog> {
        let sets = self.load_stats_sets(register)?;
        Ok(LabelCatalog::generate(&sets))
    }
}
