//! Row restrictions applied to the working table before aggregation.
//!
//! Restrictions are pure filters composed in a fixed sequence: the
//! register-wide restriction first (it covers the most rows and its effect
//! can be cached upstream), then the analysis rule's, then the collection
//! rule's. Each predicate sees the full working table, not a projection, so
//! restriction logic can reference any loaded column.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::table::{RowView, Table};

/// Predicate over a single row.
pub type RowPredicate = Arc<dyn Fn(&RowView<'_>) -> bool + Send + Sync>;

/// A named pure row filter.
#[derive(Clone)]
pub struct Restriction {
    name: String,
    predicate: RowPredicate,
}

impl Restriction {
    /// Creates a restriction from a predicate.
    pub fn new<F>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&RowView<'_>) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            predicate: Arc::new(predicate),
        }
    }

    /// Restriction keeping rows whose column value is one of the given
    /// options (null never matches).
    pub fn column_in(
        name: impl Into<String>,
        column: impl Into<String>,
        options: Vec<String>,
    ) -> Self {
        let column = column.into();
        Self::new(name, move |row| {
            row.str_value(&column)
                .map(|v| options.contains(&v))
                .unwrap_or(false)
        })
    }

    /// Name used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Applies the filter, returning the surviving rows.
    pub fn apply(&self, table: &Table) -> Result<Table> {
        let before = table.num_rows();
        let filtered = table.filter_rows(|row| (self.predicate)(row))?;
        debug!(
            restriction = %self.name,
            before,
            after = filtered.num_rows(),
            "applied restriction"
        );
        Ok(filtered)
    }
}

impl fmt::Debug for Restriction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Restriction")
            .field("name", &self.name)
            .finish()
    }
}

/// Applies restrictions in sequence, skipping absent ones.
///
/// Callers pass `[global, analysis, collection]`; the order is part of the
/// contract and must not be rearranged.
pub fn apply_restrictions(table: Table, restrictions: &[Option<&Restriction>]) -> Result<Table> {
    let mut current = table;
    for restriction in restrictions.iter().flatten() {
        current = restriction.apply(&current)?;
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{ArrayRef, Int64Array, StringArray};
    use std::sync::Arc;

    fn table() -> Table {
        let year: Int64Array = vec![2018, 2019, 2019, 2020].into_iter().map(Some).collect();
        let cobrand = StringArray::from(vec![
            Some("fixmystreet"),
            Some("oxfordshire"),
            Some("fixmystreet"),
            None,
        ]);
        Table::try_from_columns(vec![
            ("year", Arc::new(year) as ArrayRef),
            ("cobrand", Arc::new(cobrand) as ArrayRef),
        ])
        .unwrap()
    }

    #[test]
    fn test_single_restriction() {
        let only_2019 = Restriction::new("year-2019", |row| row.i64_value("year") == Some(2019));
        let filtered = only_2019.apply(&table()).unwrap();
        assert_eq!(filtered.num_rows(), 2);
    }

    #[test]
    fn test_column_in_ignores_null() {
        let r = Restriction::column_in("main-site", "cobrand", vec!["fixmystreet".to_string()]);
        let filtered = r.apply(&table()).unwrap();
        assert_eq!(filtered.num_rows(), 2);
    }

    #[test]
    fn test_ordered_composition() {
        let only_2019 = Restriction::new("year-2019", |row| row.i64_value("year") == Some(2019));
        let main_site = Restriction::column_in("main-site", "cobrand", vec!["fixmystreet".to_string()]);

        let filtered =
            apply_restrictions(table(), &[Some(&only_2019), None, Some(&main_site)]).unwrap();
        assert_eq!(filtered.num_rows(), 1);
        assert_eq!(filtered.row(0).i64_value("year"), Some(2019));
    }
}
