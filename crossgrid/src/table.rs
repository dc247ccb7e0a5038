//! In-memory working table over an Arrow [`RecordBatch`].
//!
//! All data is materialized in memory per dataset: derivation rules and
//! restrictions operate row-wise on a single batch, while aggregation is
//! delegated to DataFusion by registering the batch as a table.

use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BooleanArray, Float32Array, Float64Array, Int32Array, Int64Array,
    StringArray,
};
use arrow::compute;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use datafusion::prelude::SessionContext;

use crate::error::{EngineError, Result};

/// An owned, immutable tabular working set.
///
/// Cheap to clone (column buffers are shared). Mutating operations return a
/// new `Table` rather than editing in place, mirroring how restrictions and
/// derivations are pure per the rule contract.
#[derive(Debug, Clone)]
pub struct Table {
    batch: RecordBatch,
}

impl Table {
    /// Wraps an existing record batch.
    pub fn new(batch: RecordBatch) -> Self {
        Self { batch }
    }

    /// Builds a table from named columns.
    ///
    /// All arrays must have the same length.
    pub fn try_from_columns(columns: Vec<(&str, ArrayRef)>) -> Result<Self> {
        let fields: Vec<Field> = columns
            .iter()
            .map(|(name, array)| Field::new(*name, array.data_type().clone(), true))
            .collect();
        let arrays: Vec<ArrayRef> = columns.into_iter().map(|(_, a)| a).collect();
        let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)?;
        Ok(Self { batch })
    }

    /// Returns the underlying record batch.
    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    /// Number of rows in the table.
    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    /// Column names in schema order.
    pub fn column_names(&self) -> Vec<String> {
        self.batch
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect()
    }

    /// Whether a column with this name exists.
    pub fn has_column(&self, name: &str) -> bool {
        self.batch.schema().index_of(name).is_ok()
    }

    /// Looks up a column by name.
    pub fn column(&self, name: &str) -> Option<&ArrayRef> {
        self.batch
            .schema()
            .index_of(name)
            .ok()
            .map(|idx| self.batch.column(idx))
    }

    /// Looks up a column a rule depends on, failing with an error that
    /// names both the rule and the missing column.
    pub fn require_column(&self, rule: &str, name: &str) -> Result<&ArrayRef> {
        self.column(name)
            .ok_or_else(|| EngineError::column_not_found(rule, name))
    }

    /// Returns a new table with `array` stored under `name`, replacing any
    /// existing column of that name.
    pub fn with_column(&self, name: &str, array: ArrayRef) -> Result<Self> {
        if array.len() != self.num_rows() {
            return Err(EngineError::internal(format!(
                "column '{}' has {} rows, table has {}",
                name,
                array.len(),
                self.num_rows()
            )));
        }

        let schema = self.batch.schema();
        let mut fields: Vec<Field> = Vec::with_capacity(schema.fields().len() + 1);
        let mut arrays: Vec<ArrayRef> = Vec::with_capacity(schema.fields().len() + 1);

        let mut replaced = false;
        for (idx, field) in schema.fields().iter().enumerate() {
            if field.name() == name {
                fields.push(Field::new(name, array.data_type().clone(), true));
                arrays.push(array.clone());
                replaced = true;
            } else {
                fields.push(field.as_ref().clone());
                arrays.push(self.batch.column(idx).clone());
            }
        }
        if !replaced {
            fields.push(Field::new(name, array.data_type().clone(), true));
            arrays.push(array);
        }

        let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)?;
        Ok(Self { batch })
    }

    /// Projects the table down to the named columns, in the given order.
    pub fn select(&self, names: &[&str]) -> Result<Self> {
        let schema = self.batch.schema();
        let mut indices = Vec::with_capacity(names.len());
        for name in names {
            let idx = schema
                .index_of(name)
                .map_err(|_| EngineError::column_not_found("projection", *name))?;
            indices.push(idx);
        }
        let batch = self.batch.project(&indices)?;
        Ok(Self { batch })
    }

    /// Keeps the rows where `mask` is true.
    pub fn filter(&self, mask: &BooleanArray) -> Result<Self> {
        let batch = compute::filter_record_batch(&self.batch, mask)?;
        Ok(Self { batch })
    }

    /// Keeps the rows where the predicate holds.
    pub fn filter_rows<F>(&self, predicate: F) -> Result<Self>
    where
        F: Fn(&RowView<'_>) -> bool,
    {
        let mask: BooleanArray = (0..self.num_rows())
            .map(|idx| Some(predicate(&RowView::new(&self.batch, idx))))
            .collect();
        self.filter(&mask)
    }

    /// Returns a view over a single row.
    pub fn row(&self, index: usize) -> RowView<'_> {
        RowView::new(&self.batch, index)
    }

    /// Iterates over row views.
    pub fn rows(&self) -> impl Iterator<Item = RowView<'_>> {
        (0..self.num_rows()).map(move |idx| RowView::new(&self.batch, idx))
    }

    /// Returns the column's values stringified, with nulls preserved.
    ///
    /// Handles the mixed int/str category codes found in survey exports by
    /// casting through Utf8, so `5` and `"5"` converge on the same key.
    pub fn string_values(&self, rule: &str, name: &str) -> Result<Vec<Option<String>>> {
        let column = self.require_column(rule, name)?;
        let cast = compute::cast(column, &DataType::Utf8)?;
        let strings = cast
            .as_any()
            .downcast_ref::<StringArray>()
            .ok_or_else(|| EngineError::internal("cast to Utf8 did not yield a string array"))?;
        Ok((0..strings.len())
            .map(|i| {
                if strings.is_null(i) {
                    None
                } else {
                    Some(strings.value(i).to_string())
                }
            })
            .collect())
    }

    /// Coerces a floating-point column to integers, mapping nulls to zero.
    ///
    /// Numeric category codes read from CSV frequently arrive as floats
    /// (nulls force the float dtype); codes must not carry spurious
    /// decimals once they become column headers. Non-float columns are
    /// returned unchanged.
    pub fn coerce_float_to_int(&self, name: &str) -> Result<Self> {
        let Some(column) = self.column(name) else {
            return Ok(self.clone());
        };
        if !matches!(column.data_type(), DataType::Float64 | DataType::Float32) {
            return Ok(self.clone());
        }

        let as_f64 = compute::cast(column, &DataType::Float64)?;
        let floats = as_f64
            .as_any()
            .downcast_ref::<Float64Array>()
            .ok_or_else(|| EngineError::internal("cast to Float64 did not yield a float array"))?;
        let ints: Int64Array = (0..floats.len())
            .map(|i| {
                if floats.is_null(i) {
                    Some(0)
                } else {
                    Some(floats.value(i) as i64)
                }
            })
            .collect();
        self.with_column(name, Arc::new(ints))
    }

    /// Registers this table with a DataFusion session context.
    pub fn register(&self, ctx: &SessionContext, name: &str) -> Result<()> {
        ctx.register_batch(name, self.batch.clone())?;
        Ok(())
    }
}

/// A lightweight view over one row of a table.
///
/// Typed accessors return `None` when the column is absent or the value is
/// null, which is what derivation transforms want: an unmappable record
/// yields a null category.
pub struct RowView<'a> {
    batch: &'a RecordBatch,
    index: usize,
}

impl<'a> RowView<'a> {
    fn new(batch: &'a RecordBatch, index: usize) -> Self {
        Self { batch, index }
    }

    /// Index of this row within the table.
    pub fn index(&self) -> usize {
        self.index
    }

    fn column(&self, name: &str) -> Option<&'a ArrayRef> {
        self.batch
            .schema()
            .index_of(name)
            .ok()
            .map(|idx| self.batch.column(idx))
    }

    /// Whether the value is null (or the column absent).
    pub fn is_null(&self, name: &str) -> bool {
        match self.column(name) {
            Some(col) => col.is_null(self.index),
            None => true,
        }
    }

    /// Borrowed string value of a Utf8 column.
    pub fn text(&self, name: &str) -> Option<&'a str> {
        let col = self.column(name)?;
        let strings = col.as_any().downcast_ref::<StringArray>()?;
        if strings.is_null(self.index) {
            None
        } else {
            Some(strings.value(self.index))
        }
    }

    /// Value rendered as a string, whatever the column type.
    pub fn str_value(&self, name: &str) -> Option<String> {
        let col = self.column(name)?;
        if col.is_null(self.index) {
            return None;
        }
        match col.data_type() {
            DataType::Utf8 => self.text(name).map(|s| s.to_string()),
            DataType::Int64 | DataType::Int32 => self.i64_value(name).map(|v| v.to_string()),
            DataType::Float64 | DataType::Float32 => self.f64_value(name).map(|v| v.to_string()),
            DataType::Boolean => {
                let bools = col.as_any().downcast_ref::<BooleanArray>()?;
                Some(bools.value(self.index).to_string())
            }
            _ => None,
        }
    }

    /// Integer value of an int column.
    pub fn i64_value(&self, name: &str) -> Option<i64> {
        let col = self.column(name)?;
        if col.is_null(self.index) {
            return None;
        }
        match col.data_type() {
            DataType::Int64 => col
                .as_any()
                .downcast_ref::<Int64Array>()
                .map(|a| a.value(self.index)),
            DataType::Int32 => col
                .as_any()
                .downcast_ref::<Int32Array>()
                .map(|a| i64::from(a.value(self.index))),
            _ => None,
        }
    }

    /// Float value of a numeric column.
    pub fn f64_value(&self, name: &str) -> Option<f64> {
        let col = self.column(name)?;
        if col.is_null(self.index) {
            return None;
        }
        match col.data_type() {
            DataType::Float64 => col
                .as_any()
                .downcast_ref::<Float64Array>()
                .map(|a| a.value(self.index)),
            DataType::Float32 => col
                .as_any()
                .downcast_ref::<Float32Array>()
                .map(|a| f64::from(a.value(self.index))),
            DataType::Int64 | DataType::Int32 => self.i64_value(name).map(|v| v as f64),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> Table {
        let ids: Int64Array = vec![1, 2, 3, 4].into_iter().map(Some).collect();
        let categories = StringArray::from(vec![Some("roads"), Some("lights"), None, Some("roads")]);
        let scores: Float64Array = vec![Some(1.0), None, Some(3.5), Some(4.0)]
            .into_iter()
            .collect();
        Table::try_from_columns(vec![
            ("id", Arc::new(ids) as ArrayRef),
            ("category", Arc::new(categories) as ArrayRef),
            ("score", Arc::new(scores) as ArrayRef),
        ])
        .unwrap()
    }

    #[test]
    fn test_column_access() {
        let table = sample_table();
        assert_eq!(table.num_rows(), 4);
        assert!(table.has_column("category"));
        assert!(table.column("missing").is_none());

        let err = table.require_column("my_rule", "missing").unwrap_err();
        assert!(err.to_string().contains("my_rule"));
    }

    #[test]
    fn test_with_column_replaces() {
        let table = sample_table();
        let flags = StringArray::from(vec!["a", "b", "c", "d"]);
        let table = table.with_column("category", Arc::new(flags)).unwrap();
        assert_eq!(table.column_names().len(), 3);
        assert_eq!(table.row(0).text("category"), Some("a"));
    }

    #[test]
    fn test_filter_rows() {
        let table = sample_table();
        let filtered = table
            .filter_rows(|row| row.text("category") == Some("roads"))
            .unwrap();
        assert_eq!(filtered.num_rows(), 2);
    }

    #[test]
    fn test_string_values_mixes_types() {
        let table = sample_table();
        let ids = table.string_values("test", "id").unwrap();
        assert_eq!(ids[0].as_deref(), Some("1"));

        let cats = table.string_values("test", "category").unwrap();
        assert_eq!(cats[2], None);
    }

    #[test]
    fn test_coerce_float_to_int() {
        let table = sample_table().coerce_float_to_int("score").unwrap();
        let row_values: Vec<Option<i64>> = (0..4).map(|i| table.row(i).i64_value("score")).collect();
        assert_eq!(
            row_values,
            vec![Some(1), Some(0), Some(3), Some(4)] // null -> 0, 3.5 truncates
        );

        // non-float columns pass through untouched
        let same = table.coerce_float_to_int("category").unwrap();
        assert_eq!(same.row(0).text("category"), Some("roads"));
    }

    #[test]
    fn test_select_projection() {
        let table = sample_table();
        let projected = table.select(&["category", "id"]).unwrap();
        assert_eq!(projected.column_names(), vec!["category", "id"]);
    }
}
