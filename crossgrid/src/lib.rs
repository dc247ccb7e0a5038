//! # Crossgrid - Cross-tabulation Significance Engine
//!
//! Crossgrid ingests tabular survey and report datasets (civic issue
//! reports, political-contact messages, freedom-of-information survey
//! responses), cross-tabulates a chosen row dimension (the "collection",
//! e.g. report category) against many column dimensions ("analyses", e.g.
//! hour of day, gender, deprivation decile), and computes chi-square-based
//! statistics describing how each cell deviates from the
//! independence-assumption expectation.
//!
//! ## Overview
//!
//! A dataset declares its dimensions as rules: a configuration record
//! (slug, allowed values, display labels, required source columns) plus a
//! transform strategy that turns a raw record into a categorical value.
//! The engine then runs the pipeline per (collection, analysis) pair:
//!
//! 1. load the minimal projection of the source table (cached columns
//!    first),
//! 2. derive the row-label and column-label columns,
//! 3. apply the restriction chain (register-wide, analysis, collection),
//! 4. pivot into a count matrix and clean it up (verbose headers,
//!    allowed-value filtering, zero row/column pruning),
//! 5. persist the cross-tab as a CSV artifact,
//! 6. run the chi-square test and persist per-cell statistics.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use crossgrid::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example() -> crossgrid::error::Result<()> {
//! // Rows: report category. Columns: hour bucket derived from a timestamp.
//! let category = CollectionRule::new(
//!     RuleConfig::new("category", "Report Category")
//!         .with_allowed_values(vec!["Potholes".into(), "Street lighting".into()]),
//!     DeriveStrategy::Existing,
//! );
//! let daypart = AnalysisRule::new(
//!     RuleConfig::new("daypart", "Time of Day").with_required_columns(vec!["created"]),
//!     DeriveStrategy::RowWise(Arc::new(|row| {
//!         row.text("created")
//!             .and_then(|t| t.get(11..13))
//!             .and_then(|h| h.parse::<u32>().ok())
//!             .map(|h| if h < 12 { "Morning".to_string() } else { "Afternoon".to_string() })
//!     })),
//! )
//! .with_group("Time");
//!
//! let register = Register::new("fms").collection(category).analysis(daypart);
//!
//! let config = DatasetConfig::new("fms", "data/fms/merged_points.csv");
//! let runner = BatchRunner::new(config);
//! let report = runner.run_all(&register, &RunOptions::default().with_locks(true)).await?;
//!
//! println!("{} pairs done, {} failed", report.completed(), report.failed());
//! # Ok(())
//! # }
//! ```
//!
//! ## Statistics contract
//!
//! For every cell the engine stores the observed count, the expected count
//! under independence, the row and column totals, and the standardized
//! residual `(observed - expected) / sqrt(expected)`. Everything a report
//! displays - row percentages, expected differences, the three-way
//! significance bucket - is derived on demand from those stored numbers
//! (see [`stats::cell::CellRecord`]). The significance classification is
//! deliberately implemented once: a cell is "significantly above/below
//! expected" only when the residual clears `±2.0` *and* the percentage
//! difference clears `1%`; everything else is "not significant".
//!
//! ## Batch semantics
//!
//! Runs are idempotent and advisory-locked: existing artifacts are skipped
//! unless forced, a `<artifact>.partial.txt` marker makes concurrent
//! invocations (scheduled re-runs, manual triggers) leave in-progress pairs
//! alone, and a crash leaves a visible stuck lock rather than a corrupt
//! artifact. Failures - a missing source column, a cross-tab that filters
//! down to nothing - abort only their pair and are recorded in the
//! [`runner::RunReport`].

pub mod config;
pub mod crosstab;
pub mod derive;
pub mod error;
pub mod logging;
pub mod prelude;
pub mod restrict;
pub mod rules;
pub mod runner;
pub mod slug;
pub mod sources;
pub mod stats;
pub mod table;
