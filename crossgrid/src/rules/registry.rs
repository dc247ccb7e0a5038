//! Rule registers and variant construction.

use std::fmt;
use std::sync::Arc;

use crate::restrict::Restriction;

use super::{AnalysisRule, CollectionRule};

/// The full rule set for one service (dataset): its collection rules, its
/// analysis rules, a register-wide restriction, and the columns every pair
/// needs loaded.
///
/// Registers are immutable once built; dataset variants ("same analyses,
/// restricted to 2019", "no cobrands") are produced with [`Register::variant`]
/// rather than by mutating a shared registry.
#[derive(Clone)]
pub struct Register {
    service: String,
    require_columns: Vec<String>,
    restriction: Option<Restriction>,
    collections: Vec<Arc<CollectionRule>>,
    analyses: Vec<Arc<AnalysisRule>>,
}

impl Register {
    /// Creates an empty register for a service.
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            require_columns: Vec::new(),
            restriction: None,
            collections: Vec::new(),
            analyses: Vec::new(),
        }
    }

    /// Columns every pair of this register needs loaded (e.g. the column
    /// the register-wide restriction reads).
    pub fn with_require_columns(mut self, columns: Vec<&str>) -> Self {
        self.require_columns = columns.into_iter().map(|c| c.to_string()).collect();
        self
    }

    /// Sets the register-wide restriction, applied before any rule-level
    /// restriction.
    pub fn with_restriction(mut self, restriction: Restriction) -> Self {
        self.restriction = Some(restriction);
        self
    }

    /// Registers a collection rule.
    pub fn collection(mut self, rule: CollectionRule) -> Self {
        self.collections.push(Arc::new(rule));
        self
    }

    /// Registers an analysis rule.
    pub fn analysis(mut self, rule: AnalysisRule) -> Self {
        self.analyses.push(Arc::new(rule));
        self
    }

    /// The service slug.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Register-wide required columns.
    pub fn require_columns(&self) -> &[String] {
        &self.require_columns
    }

    /// Register-wide restriction, if any.
    pub fn restriction(&self) -> Option<&Restriction> {
        self.restriction.as_ref()
    }

    /// Registered collection rules, in registration order.
    pub fn collections(&self) -> &[Arc<CollectionRule>] {
        &self.collections
    }

    /// Registered analysis rules, in registration order.
    pub fn analyses(&self) -> &[Arc<AnalysisRule>] {
        &self.analyses
    }

    /// The default collection, if one was marked.
    pub fn default_collection(&self) -> Option<&Arc<CollectionRule>> {
        self.collections.iter().find(|c| c.default)
    }

    /// Size of the full (collection × analysis) matrix, exclusions included.
    pub fn pair_count(&self) -> usize {
        self.collections.len() * self.analyses.len()
    }

    /// Builds a new register from this one: a new service slug, a filtered
    /// rule set, and optionally a different register-wide restriction.
    ///
    /// The base register is left untouched; rules are shared by reference
    /// except where the variant changes them (a new default collection).
    pub fn variant(&self, spec: VariantSpec) -> Register {
        let passes = |slug: &str| -> bool {
            if spec.include.is_empty() && spec.exclude.is_empty() {
                return true;
            }
            if !spec.include.is_empty() {
                return spec.include.iter().any(|s| s == slug);
            }
            !spec.exclude.iter().any(|s| s == slug)
        };

        let collections = self
            .collections
            .iter()
            .filter(|c| passes(c.slug()))
            .map(|c| match &spec.new_default {
                Some(default_slug) => {
                    let make_default = c.slug() == default_slug;
                    if make_default == c.default {
                        c.clone()
                    } else {
                        let mut rule = c.as_ref().clone();
                        rule.default = make_default;
                        if make_default {
                            rule.display_in_header = true;
                        }
                        Arc::new(rule)
                    }
                }
                None => c.clone(),
            })
            .collect();

        let analyses = self
            .analyses
            .iter()
            .filter(|a| passes(a.slug()))
            .cloned()
            .collect();

        let require_columns = if spec.require_columns.is_empty() {
            self.require_columns.clone()
        } else {
            spec.require_columns
        };

        Register {
            service: spec.service,
            require_columns,
            restriction: spec.restriction,
            collections,
            analyses,
        }
    }
}

impl fmt::Debug for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Register")
            .field("service", &self.service)
            .field("collections", &self.collections.len())
            .field("analyses", &self.analyses.len())
            .finish()
    }
}

/// Overrides applied when deriving a register variant.
#[derive(Debug, Default)]
pub struct VariantSpec {
    /// Service slug of the new register.
    pub service: String,
    /// Rule slugs to keep; empty keeps everything not excluded.
    pub include: Vec<String>,
    /// Rule slugs to drop; ignored when `include` is non-empty.
    pub exclude: Vec<String>,
    /// Register-wide restriction of the variant (replaces the base's).
    pub restriction: Option<Restriction>,
    /// Register-wide required columns; empty inherits the base's.
    pub require_columns: Vec<String>,
    /// Collection slug to mark as the variant's default.
    pub new_default: Option<String>,
}

impl VariantSpec {
    /// Creates a variant spec for the given service slug.
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            ..Default::default()
        }
    }

    /// Keeps only the named rule slugs.
    pub fn with_include(mut self, slugs: Vec<&str>) -> Self {
        self.include = slugs.into_iter().map(|s| s.to_string()).collect();
        self
    }

    /// Drops the named rule slugs.
    pub fn with_exclude(mut self, slugs: Vec<&str>) -> Self {
        self.exclude = slugs.into_iter().map(|s| s.to_string()).collect();
        self
    }

    /// Sets the variant's register-wide restriction.
    pub fn with_restriction(mut self, restriction: Restriction) -> Self {
        self.restriction = Some(restriction);
        self
    }

    /// Sets the variant's register-wide required columns.
    pub fn with_require_columns(mut self, columns: Vec<&str>) -> Self {
        self.require_columns = columns.into_iter().map(|c| c.to_string()).collect();
        self
    }

    /// Marks a collection slug as the variant's default.
    pub fn with_new_default(mut self, slug: impl Into<String>) -> Self {
        self.new_default = Some(slug.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{AnalysisRule, CollectionRule, DeriveStrategy, RuleConfig};

    fn base_register() -> Register {
        Register::new("fms")
            .collection(
                CollectionRule::new(RuleConfig::new("category", "Category"), DeriveStrategy::Existing)
                    .with_default(true),
            )
            .collection(CollectionRule::new(
                RuleConfig::new("year", "Year"),
                DeriveStrategy::Existing,
            ))
            .analysis(AnalysisRule::new(
                RuleConfig::new("hour", "Hour of Day"),
                DeriveStrategy::Existing,
            ))
            .analysis(AnalysisRule::new(
                RuleConfig::new("method", "Method"),
                DeriveStrategy::Existing,
            ))
    }

    #[test]
    fn test_pair_count() {
        assert_eq!(base_register().pair_count(), 4);
    }

    #[test]
    fn test_variant_excludes_rules() {
        let base = base_register();
        let variant = base.variant(
            VariantSpec::new("fms-2019")
                .with_exclude(vec!["year", "method"])
                .with_restriction(Restriction::new("year-2019", |_| true)),
        );

        assert_eq!(variant.service(), "fms-2019");
        assert_eq!(variant.collections().len(), 1);
        assert_eq!(variant.analyses().len(), 1);
        assert!(variant.restriction().is_some());

        // base register untouched
        assert_eq!(base.collections().len(), 2);
        assert!(base.restriction().is_none());
    }

    #[test]
    fn test_variant_include_only() {
        let variant = base_register().variant(VariantSpec::new("small").with_include(vec!["category", "hour"]));
        assert_eq!(variant.collections().len(), 1);
        assert_eq!(variant.analyses().len(), 1);
    }

    #[test]
    fn test_variant_new_default() {
        let variant = base_register().variant(VariantSpec::new("alt").with_new_default("year"));
        let default = variant.default_collection().unwrap();
        assert_eq!(default.slug(), "year");
        assert!(default.display_in_header);

        let old_default = variant
            .collections()
            .iter()
            .find(|c| c.slug() == "category")
            .unwrap();
        assert!(!old_default.default);
    }
}
