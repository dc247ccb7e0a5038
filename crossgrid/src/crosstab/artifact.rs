//! Persisted cross-tab artifacts.
//!
//! The artifact is a CSV file: first column holds the row labels under the
//! collection slug, the remaining columns are verbose category labels with
//! integer counts. Writes replace the file atomically so a crash never
//! leaves a half-written artifact that could be mistaken for a valid one.

use std::fs::File;
use std::io::Seek;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::compute;
use arrow::csv::reader::Format;
use arrow::csv::{ReaderBuilder, WriterBuilder};
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::table::Table;

use super::{CrossTab, CrossTabRow};

/// Writes a cross-tab to a CSV artifact, replacing any existing file.
pub fn write_csv(crosstab: &CrossTab, path: &Path) -> Result<()> {
    let labels: StringArray = crosstab
        .rows
        .iter()
        .map(|r| Some(r.label.clone()))
        .collect();
    let mut columns: Vec<(&str, ArrayRef)> =
        vec![(crosstab.row_header.as_str(), Arc::new(labels) as ArrayRef)];
    for (idx, header) in crosstab.columns.iter().enumerate() {
        let counts: Int64Array = crosstab
            .rows
            .iter()
            .map(|r| Some(r.counts[idx]))
            .collect();
        columns.push((header.as_str(), Arc::new(counts) as ArrayRef));
    }
    let table = Table::try_from_columns(columns)?;

    let tmp_path = path.with_extension("csv.tmp");
    {
        let file = File::create(&tmp_path)?;
        let mut writer = WriterBuilder::new().with_header(true).build(file);
        writer.write(table.batch())?;
    }
    std::fs::rename(&tmp_path, path)?;
    debug!(path = %path.display(), "wrote cross-tab artifact");
    Ok(())
}

/// Reads a cross-tab back from a CSV artifact.
///
/// Tolerant of the quirks of hand-maintained grids: blank count cells read
/// as zero, and rows with an empty label are skipped entirely.
pub fn read_csv(path: &Path) -> Result<CrossTab> {
    let mut file = File::open(path)?;
    let format = Format::default().with_header(true);
    let (schema, _) = format
        .infer_schema(&mut file, None)
        .map_err(EngineError::Arrow)?;
    file.rewind()?;

    let reader = ReaderBuilder::new(Arc::new(schema.clone()))
        .with_header(true)
        .build(file)?;
    let batches: Vec<RecordBatch> = reader
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(EngineError::Arrow)?;

    let field_names: Vec<String> = schema.fields().iter().map(|f| f.name().clone()).collect();
    let Some((row_header, count_headers)) = field_names.split_first() else {
        return Err(EngineError::parse(format!(
            "artifact {} has no columns",
            path.display()
        )));
    };

    let mut rows: Vec<CrossTabRow> = Vec::new();
    for batch in &batches {
        let labels_cast = compute::cast(batch.column(0), &DataType::Utf8)?;
        let labels = labels_cast
            .as_any()
            .downcast_ref::<StringArray>()
            .ok_or_else(|| EngineError::internal("row labels did not cast to Utf8"))?;

        let mut count_columns: Vec<Float64Array> = Vec::with_capacity(count_headers.len());
        for idx in 1..batch.num_columns() {
            let cast = compute::cast(batch.column(idx), &DataType::Float64)?;
            let floats = cast
                .as_any()
                .downcast_ref::<Float64Array>()
                .ok_or_else(|| EngineError::internal("counts did not cast to Float64"))?
                .clone();
            count_columns.push(floats);
        }

        for i in 0..batch.num_rows() {
            if labels.is_null(i) || labels.value(i).is_empty() {
                continue;
            }
            let counts: Vec<i64> = count_columns
                .iter()
                .map(|col| {
                    if col.is_null(i) {
                        0
                    } else {
                        col.value(i) as i64
                    }
                })
                .collect();
            rows.push(CrossTabRow {
                label: labels.value(i).to_string(),
                counts,
            });
        }
    }

    Ok(CrossTab {
        row_header: row_header.clone(),
        columns: count_headers.to_vec(),
        rows,
    })
}
