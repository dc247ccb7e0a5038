//! Error types for the Crossgrid engine.
//!
//! This module provides a comprehensive error handling strategy using `thiserror`
//! for automatic error trait implementations. All errors in the Crossgrid engine
//! are represented by the `EngineError` enum.

use thiserror::Error;

/// The main error type for the Crossgrid engine.
///
/// This enum represents all possible errors that can occur while deriving
/// columns, building cross-tabulations, and computing contingency statistics.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A column a rule depends on is absent from the working table.
    ///
    /// Fatal for the (collection, analysis) pair being processed; the batch
    /// runner continues with the next pair.
    #[error("Column '{column}' required by rule '{rule}' not found in table")]
    ColumnNotFound {
        /// Name of the missing column
        column: String,
        /// Slug of the rule that required it
        rule: String,
    },

    /// A cross-tabulation came out with zero rows after filtering.
    ///
    /// Always fatal for the pair: an empty result almost always signals a
    /// broken lookup or join, never a legitimately empty dataset.
    #[error("Cross-tab for '{collection}' x '{analysis}' contains no data")]
    EmptyResult {
        /// Collection rule slug
        collection: String,
        /// Analysis rule slug
        analysis: String,
    },

    /// Error from DataFusion operations.
    #[error("DataFusion error: {0}")]
    DataFusion(#[from] datafusion::error::DataFusionError),

    /// Error from Arrow operations.
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Error from I/O operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error when parsing or processing data.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Error related to rule or dataset configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Error from serialization/deserialization operations.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Error when an operation is not supported.
    #[error("Operation not supported: {0}")]
    NotSupported(String),

    /// Generic internal error for unexpected conditions.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A type alias for `Result<T, EngineError>`.
///
/// This is the standard `Result` type used throughout the Crossgrid engine.
pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// Creates a missing-column error attributed to the given rule.
    pub fn column_not_found(rule: impl Into<String>, column: impl Into<String>) -> Self {
        Self::ColumnNotFound {
            column: column.into(),
            rule: rule.into(),
        }
    }

    /// Creates an empty-result error for a (collection, analysis) pair.
    pub fn empty_result(collection: impl Into<String>, analysis: impl Into<String>) -> Self {
        Self::EmptyResult {
            collection: collection.into(),
            analysis: analysis.into(),
        }
    }

    /// Creates a configuration error with the given message.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Creates a parse error with the given message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Creates an internal error with the given message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns true when the error aborts a single pair rather than the batch.
    pub fn is_pair_scoped(&self) -> bool {
        matches!(
            self,
            Self::ColumnNotFound { .. } | Self::EmptyResult { .. }
        )
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Adds context to an error.
    fn context(self, msg: &str) -> Result<T>;

    /// Adds context with a lazy message.
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: Into<EngineError>,
{
    fn context(self, msg: &str) -> Result<T> {
        self.map_err(|e| {
            let base_error = e.into();
            EngineError::Internal(format!("{}: {}", msg, base_error))
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let msg = f();
            let base_error = e.into();
            EngineError::Internal(format!("{}: {}", msg, base_error))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_not_found() {
        let err = EngineError::column_not_found("gender", "derived_gender");
        assert_eq!(
            err.to_string(),
            "Column 'derived_gender' required by rule 'gender' not found in table"
        );
        assert!(err.is_pair_scoped());
    }

    #[test]
    fn test_empty_result() {
        let err = EngineError::empty_result("category", "hour");
        assert_eq!(
            err.to_string(),
            "Cross-tab for 'category' x 'hour' contains no data"
        );
        assert!(err.is_pair_scoped());
    }

    #[test]
    fn test_batch_scoped_errors() {
        let err = EngineError::configuration("bad output folder");
        assert!(!err.is_pair_scoped());
    }

    #[test]
    fn test_error_context() {
        fn failing_operation() -> Result<()> {
            Err(EngineError::Internal("something went wrong".to_string()))
        }

        let result = failing_operation().context("while writing artifact");
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(err.to_string().contains("while writing artifact"));
    }
}
