//! Dataset and run configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Locations and identity of one dataset (service).
///
/// Loadable from JSON so scheduled runs and manual re-triggers share the
/// same configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Service slug, used in artifact names.
    pub service: String,
    /// The raw per-record CSV.
    pub source_file: PathBuf,
    /// Directory holding rule lookup tables.
    pub lookup_dir: PathBuf,
    /// Directory for the derived-column cache.
    pub cache_dir: PathBuf,
    /// Directory cross-tab artifacts and statistics are written to.
    pub output_dir: PathBuf,
}

impl DatasetConfig {
    /// Creates a config with the conventional directory layout next to the
    /// source file: `lookups/`, `cache/`, and `processed/<service>/`.
    pub fn new(service: impl Into<String>, source_file: impl Into<PathBuf>) -> Self {
        let service = service.into();
        let source_file = source_file.into();
        let base = source_file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            lookup_dir: base.join("lookups"),
            cache_dir: base.join("cache"),
            output_dir: base.join("processed").join(&service),
            service,
            source_file,
        }
    }

    /// Overrides the lookup directory.
    pub fn with_lookup_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.lookup_dir = dir.into();
        self
    }

    /// Overrides the cache directory.
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    /// Overrides the output directory.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Reads a config from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        let config = serde_json::from_reader(file)?;
        Ok(config)
    }

    /// Creates the cache and output directories when absent.
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.cache_dir)?;
        std::fs::create_dir_all(&self.output_dir)?;
        Ok(())
    }

    /// Path of the cross-tab artifact for a pair.
    pub fn artifact_path(&self, collection_slug: &str, analysis_slug: &str) -> PathBuf {
        self.output_dir.join(format!(
            "{}_{}_{}.csv",
            self.service, collection_slug, analysis_slug
        ))
    }

    /// Path of the statistics JSON for a pair.
    pub fn stats_path(&self, collection_slug: &str, analysis_slug: &str) -> PathBuf {
        self.output_dir.join(format!(
            "{}_{}_{}.stats.json",
            self.service, collection_slug, analysis_slug
        ))
    }
}

/// Returns the advisory lock-marker path for an artifact.
///
/// Presence of the marker signals in-progress or crashed generation; the
/// runner never breaks another invocation's lock automatically.
pub fn lock_path(artifact: &Path) -> PathBuf {
    let mut name = artifact
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(".partial.txt");
    artifact.with_file_name(name)
}

/// Flags controlling a batch run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RunOptions {
    /// Regenerate pairs whose artifact already exists.
    pub force: bool,
    /// Write lock markers before heavy work, so concurrent invocations
    /// skip in-progress pairs.
    pub create_locks: bool,
    /// Recompute derived columns, overwriting the column cache.
    pub regenerate: bool,
}

impl RunOptions {
    /// Regenerates existing artifacts.
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Enables lock markers.
    pub fn with_locks(mut self, create_locks: bool) -> Self {
        self.create_locks = create_locks;
        self
    }

    /// Forces derived-column recomputation.
    pub fn with_regenerate(mut self, regenerate: bool) -> Self {
        self.regenerate = regenerate;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conventional_layout() {
        let config = DatasetConfig::new("fms", "/data/fms/merged_points.csv");
        assert_eq!(config.lookup_dir, PathBuf::from("/data/fms/lookups"));
        assert_eq!(config.cache_dir, PathBuf::from("/data/fms/cache"));
        assert_eq!(config.output_dir, PathBuf::from("/data/fms/processed/fms"));
        assert_eq!(
            config.artifact_path("category", "hour"),
            PathBuf::from("/data/fms/processed/fms/fms_category_hour.csv")
        );
    }

    #[test]
    fn test_lock_path_derivation() {
        let artifact = PathBuf::from("/out/fms_category_hour.csv");
        assert_eq!(
            lock_path(&artifact),
            PathBuf::from("/out/fms_category_hour.csv.partial.txt")
        );
    }

    #[test]
    fn test_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatasetConfig::new("wtt", dir.path().join("messages.csv"));
        let path = dir.path().join("wtt.json");
        std::fs::write(&path, serde_json::to_string(&config).unwrap()).unwrap();

        let loaded = DatasetConfig::from_json_file(&path).unwrap();
        assert_eq!(loaded.service, "wtt");
        assert_eq!(loaded.output_dir, config.output_dir);
    }

    #[test]
    fn test_run_options_builders() {
        let options = RunOptions::default()
            .with_force(true)
            .with_locks(true)
            .with_regenerate(false);
        assert!(options.force);
        assert!(options.create_locks);
        assert!(!options.regenerate);
    }
}
