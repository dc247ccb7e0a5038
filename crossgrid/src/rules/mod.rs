//! The declarative rule model.
//!
//! A dataset declares one or more collection rules (the row dimension of
//! every cross-tab) and analysis rules (the column dimensions). Each rule is
//! a configuration record plus a transform strategy: no inheritance, no
//! mutation; variants of a rule set are built with
//! [`Register::variant`](crate::rules::Register::variant).

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::crosstab::CrossTab;
use crate::error::Result;
use crate::restrict::Restriction;
use crate::table::{RowView, Table};

mod registry;

pub use registry::{Register, VariantSpec};

/// A canonical category code: survey exports mix integer and string codes
/// for the same logical category, so both forms must stringify to the same
/// key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CategoryValue {
    /// Integer category code (e.g. a decile, an answer id).
    Int(i64),
    /// String category code (e.g. "male", "Potholes").
    Str(String),
}

impl CategoryValue {
    /// Whether this value is an integer code.
    pub fn is_int(&self) -> bool {
        matches!(self, CategoryValue::Int(_))
    }
}

impl fmt::Display for CategoryValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CategoryValue::Int(v) => write!(f, "{v}"),
            CategoryValue::Str(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for CategoryValue {
    fn from(value: i64) -> Self {
        CategoryValue::Int(value)
    }
}

impl From<&str> for CategoryValue {
    fn from(value: &str) -> Self {
        CategoryValue::Str(value.to_string())
    }
}

impl From<String> for CategoryValue {
    fn from(value: String) -> Self {
        CategoryValue::Str(value)
    }
}

/// Shared configuration for collection and analysis rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Stable identifier; doubles as the derived column name and the
    /// external URL/lookup token.
    pub slug: String,
    /// Human-readable name.
    pub name: String,
    /// Longer description shown alongside results.
    pub description: String,
    /// Source columns this rule needs loaded.
    pub required_columns: Vec<String>,
    /// Canonical output values, in display order. Empty means "infer from
    /// the data": distinct non-null values, sorted.
    pub allowed_values: Vec<CategoryValue>,
    /// Display label per allowed value, paired positionally. Empty means
    /// the stringified allowed values are used as-is.
    pub verbose_allowed_values: Vec<String>,
}

impl RuleConfig {
    /// Creates a minimal config.
    pub fn new(slug: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            name: name.into(),
            description: String::new(),
            required_columns: Vec::new(),
            allowed_values: Vec::new(),
            verbose_allowed_values: Vec::new(),
        }
    }

    /// Sets the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the source columns this rule needs loaded.
    pub fn with_required_columns(mut self, columns: Vec<&str>) -> Self {
        self.required_columns = columns.into_iter().map(|c| c.to_string()).collect();
        self
    }

    /// Sets the allowed output values.
    pub fn with_allowed_values(mut self, values: Vec<CategoryValue>) -> Self {
        self.allowed_values = values;
        self
    }

    /// Sets the display labels, paired positionally with the allowed values.
    pub fn with_verbose_values(mut self, values: Vec<&str>) -> Self {
        self.verbose_allowed_values = values.into_iter().map(|v| v.to_string()).collect();
        self
    }

    /// Display labels with the default applied: the stringified allowed
    /// values when no verbose labels were declared.
    pub fn resolved_verbose_values(&self) -> Vec<String> {
        if self.verbose_allowed_values.is_empty() {
            self.allowed_values.iter().map(|v| v.to_string()).collect()
        } else {
            self.verbose_allowed_values.clone()
        }
    }
}

/// Row-wise transform: record → categorical output (None = unmappable).
pub type RowTransform = Arc<dyn Fn(&RowView<'_>) -> Option<String> + Send + Sync>;

/// Hook run on the working table before derivation; may filter or extend it
/// (e.g. restrict to survey respondents before deriving their answers).
pub type PrepareHook = Arc<dyn Fn(&Table) -> Result<Table> + Send + Sync>;

/// Column reordering hook, applied to verbose headers after verbosification.
/// Returning a subset drops the omitted columns.
pub type ColumnReorder = Arc<dyn Fn(&[String]) -> Vec<String> + Send + Sync>;

/// Provider of a pre-built count matrix for passthrough analyses.
pub type PassthroughProvider = Arc<dyn Fn() -> Result<CrossTab> + Send + Sync>;

/// Description of an external lookup table used by a `Lookup` strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupSpec {
    /// File name within the dataset's lookup directory.
    pub file: String,
    /// Column holding the lookup key.
    pub key_column: String,
    /// Column holding the category value.
    pub value_column: String,
}

impl LookupSpec {
    /// Creates a lookup spec.
    pub fn new(
        file: impl Into<String>,
        key_column: impl Into<String>,
        value_column: impl Into<String>,
    ) -> Self {
        Self {
            file: file.into(),
            key_column: key_column.into(),
            value_column: value_column.into(),
        }
    }
}

/// How a rule's categorical column is produced.
#[derive(Clone)]
pub enum DeriveStrategy {
    /// The source already contains a column named after the rule's slug.
    Existing,
    /// Pure row-wise transform with no external state.
    RowWise(RowTransform),
    /// Map an identifier column through an external lookup table, loaded
    /// once per rule and memoized.
    Lookup {
        /// Column whose (stringified) value keys into the lookup.
        key_column: String,
        /// The lookup table to load.
        lookup: LookupSpec,
    },
}

impl fmt::Debug for DeriveStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeriveStrategy::Existing => write!(f, "Existing"),
            DeriveStrategy::RowWise(_) => write!(f, "RowWise"),
            DeriveStrategy::Lookup { key_column, lookup } => f
                .debug_struct("Lookup")
                .field("key_column", key_column)
                .field("file", &lookup.file)
                .finish(),
        }
    }
}

/// The row dimension of a cross-tab (e.g. report category).
#[derive(Clone)]
pub struct CollectionRule {
    /// Shared rule configuration.
    pub config: RuleConfig,
    /// Whether this is the service's default collection.
    pub default: bool,
    /// Whether the collection appears in header navigation.
    pub display_in_header: bool,
    /// How the row-label column is produced.
    pub strategy: DeriveStrategy,
    /// Restriction applied after derivation, last in the chain.
    pub restriction: Option<Restriction>,
    /// Optional code → human label mapping applied to row labels after
    /// pivoting (coded survey answers).
    pub label_lookup: Option<Arc<HashMap<String, String>>>,
}

impl CollectionRule {
    /// Creates a collection rule.
    pub fn new(config: RuleConfig, strategy: DeriveStrategy) -> Self {
        Self {
            config,
            default: false,
            display_in_header: true,
            strategy,
            restriction: None,
            label_lookup: None,
        }
    }

    /// Marks this collection as the service default.
    pub fn with_default(mut self, default: bool) -> Self {
        self.default = default;
        self
    }

    /// Controls header navigation visibility.
    pub fn with_display_in_header(mut self, display: bool) -> Self {
        self.display_in_header = display;
        self
    }

    /// Sets the collection-level restriction.
    pub fn with_restriction(mut self, restriction: Restriction) -> Self {
        self.restriction = Some(restriction);
        self
    }

    /// Sets the row-label lookup (code → human label).
    pub fn with_label_lookup(mut self, lookup: HashMap<String, String>) -> Self {
        self.label_lookup = Some(Arc::new(lookup));
        self
    }

    /// The rule's slug.
    pub fn slug(&self) -> &str {
        &self.config.slug
    }

    /// Row labels this collection admits, stringified for comparison with
    /// pivoted row keys. Integer codes compare through their string form,
    /// matching post-lookup string labels.
    pub fn allowed_row_values(&self) -> HashSet<String> {
        self.config
            .allowed_values
            .iter()
            .map(|v| v.to_string())
            .collect()
    }
}

impl fmt::Debug for CollectionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionRule")
            .field("slug", &self.config.slug)
            .field("default", &self.default)
            .field("strategy", &self.strategy)
            .finish()
    }
}

/// A column dimension of a cross-tab (e.g. hour of day, gender).
#[derive(Clone)]
pub struct AnalysisRule {
    /// Shared rule configuration.
    pub config: RuleConfig,
    /// Axis label used when charting this analysis.
    pub h_label: String,
    /// Display group this analysis belongs to (e.g. "Time").
    pub group: String,
    /// Whether the analysis appears in overview pages.
    pub overview: bool,
    /// Ordering weight within its group.
    pub priority: i32,
    /// Collection slugs this analysis must not be paired with.
    pub exclusions: Vec<String>,
    /// How the column-label column is produced.
    pub strategy: DeriveStrategy,
    /// Hook run before derivation (may filter or extend the table).
    pub prepare: Option<PrepareHook>,
    /// Restriction applied after derivation, before the collection's.
    pub restriction: Option<Restriction>,
    /// Column reordering hook, applied after verbosification.
    pub reorder: Option<ColumnReorder>,
    /// When set, the cross-tab is taken from this provider instead of being
    /// pivoted from the working table.
    pub passthrough: Option<PassthroughProvider>,
}

impl AnalysisRule {
    /// Creates an analysis rule.
    pub fn new(config: RuleConfig, strategy: DeriveStrategy) -> Self {
        Self {
            config,
            h_label: "Category".to_string(),
            group: String::new(),
            overview: false,
            priority: 0,
            exclusions: Vec::new(),
            strategy,
            prepare: None,
            restriction: None,
            reorder: None,
            passthrough: None,
        }
    }

    /// Sets the chart axis label.
    pub fn with_h_label(mut self, label: impl Into<String>) -> Self {
        self.h_label = label.into();
        self
    }

    /// Sets the display group.
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    /// Marks this analysis for overview pages.
    pub fn with_overview(mut self, overview: bool) -> Self {
        self.overview = overview;
        self
    }

    /// Sets the ordering weight.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Sets collection slugs this analysis skips.
    pub fn with_exclusions(mut self, exclusions: Vec<&str>) -> Self {
        self.exclusions = exclusions.into_iter().map(|e| e.to_string()).collect();
        self
    }

    /// Sets the pre-derivation hook.
    pub fn with_prepare<F>(mut self, prepare: F) -> Self
    where
        F: Fn(&Table) -> Result<Table> + Send + Sync + 'static,
    {
        self.prepare = Some(Arc::new(prepare));
        self
    }

    /// Sets the analysis-level restriction.
    pub fn with_restriction(mut self, restriction: Restriction) -> Self {
        self.restriction = Some(restriction);
        self
    }

    /// Sets the column reorder hook.
    pub fn with_reorder<F>(mut self, reorder: F) -> Self
    where
        F: Fn(&[String]) -> Vec<String> + Send + Sync + 'static,
    {
        self.reorder = Some(Arc::new(reorder));
        self
    }

    /// Supplies a pre-built count matrix instead of pivoting.
    pub fn with_passthrough<F>(mut self, provider: F) -> Self
    where
        F: Fn() -> Result<CrossTab> + Send + Sync + 'static,
    {
        self.passthrough = Some(Arc::new(provider));
        self
    }

    /// The rule's slug.
    pub fn slug(&self) -> &str {
        &self.config.slug
    }

    /// Whether this analysis is excluded for the given collection.
    pub fn excludes(&self, collection_slug: &str) -> bool {
        self.exclusions.iter().any(|e| e == collection_slug)
    }
}

impl fmt::Debug for AnalysisRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisRule")
            .field("slug", &self.config.slug)
            .field("group", &self.group)
            .field("strategy", &self.strategy)
            .field("passthrough", &self.passthrough.is_some())
            .finish()
    }
}
