//! Logging utilities and configuration for Crossgrid.
//!
//! Batch runs are log-driven: skipped pairs, degenerate cells and label
//! collisions are surfaced as structured `tracing` events rather than an
//! interactive error surface.

use tracing::Level;

/// Logging configuration for Crossgrid batch runs.
///
/// This configuration allows fine-grained control over logging behavior
/// so long batch runs stay readable.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Base log level for engine components
    pub base_level: Level,
    /// Whether to log per-rule derivation details
    pub log_rule_details: bool,
    /// Whether to log data loading and artifact writes
    pub log_data_operations: bool,
    /// Maximum length for logged field values (to prevent huge logs)
    pub max_field_length: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            base_level: Level::INFO,
            log_rule_details: false,
            log_data_operations: true,
            max_field_length: 256,
        }
    }
}

impl LogConfig {
    /// Creates a verbose configuration suitable for debugging a single pair.
    pub fn verbose() -> Self {
        Self {
            base_level: Level::DEBUG,
            log_rule_details: true,
            log_data_operations: true,
            max_field_length: 1024,
        }
    }

    /// Creates a minimal configuration for scheduled production runs.
    pub fn production() -> Self {
        Self {
            base_level: Level::WARN,
            log_rule_details: false,
            log_data_operations: false,
            max_field_length: 128,
        }
    }

    /// Creates a balanced configuration suitable for most use cases.
    pub fn balanced() -> Self {
        Self::default()
    }
}

/// Truncates a string to the maximum field length if needed.
pub fn truncate_field(value: &str, max_length: usize) -> String {
    if value.len() <= max_length {
        value.to_string()
    } else {
        let truncated: String = value.chars().take(max_length).collect();
        format!("{truncated}...(truncated)")
    }
}

/// Utilities for setting up structured logging for batch runs.
pub mod setup {
    use super::LogConfig;
    use tracing_subscriber::{fmt, EnvFilter};

    /// Installs a global fmt subscriber honouring `RUST_LOG` when set,
    /// falling back to the config's base level.
    ///
    /// Returns quietly if a subscriber is already installed, so tests can
    /// call it repeatedly.
    pub fn init_logging(config: &LogConfig) {
        let fallback = format!("crossgrid={}", config.base_level.to_string().to_lowercase());
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(fallback));

        let _ = fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init();
    }
}
