//! Prelude for commonly used types in crossgrid.

pub use crate::config::{DatasetConfig, RunOptions};
pub use crate::crosstab::{CrossTab, CrossTabBuilder, CrossTabRow};
pub use crate::derive::{ColumnCache, ColumnDeriver, LookupCache};
pub use crate::error::{EngineError, ErrorContext, Result};
pub use crate::logging::LogConfig;
pub use crate::restrict::Restriction;
pub use crate::rules::{
    AnalysisRule, CategoryValue, CollectionRule, DeriveStrategy, LookupSpec, Register, RuleConfig,
    VariantSpec,
};
pub use crate::runner::{BatchRunner, PairStatus, RunReport};
pub use crate::sources::{CsvSource, MemorySource, TableSource};
pub use crate::stats::{CellRecord, ContingencySet, LabelCatalog, Significance};
pub use crate::table::{RowView, Table};
