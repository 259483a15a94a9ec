//! Result artifact persistence.
//!
//! One JSON file per city plus two run-level files, all written atomically
//! (temp file then rename) so an interrupted run never leaves a torn
//! artifact. Per-city files land on disk as soon as that city finishes,
//! independent of the rest of the batch, which makes partial runs
//! inspectable and recoverable.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use super::aggregate::ComparisonSummary;
use super::runner::CityAnalysisResult;

/// Combined map of every city's result, keyed by city id.
pub const ALL_CITIES_FILE: &str = "all_cities_results.json";

/// Cross-city comparison artifact.
pub const COMPARISON_FILE: &str = "comparison_summary.json";

#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Serialization(serde_json::Error),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "artifact I/O error: {}", e),
            Self::Serialization(e) => write!(f, "artifact serialization error: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e)
    }
}

/// Writes and reads analysis artifacts under one output directory.
#[derive(Debug, Clone)]
pub struct ResultsStore {
    dir: PathBuf,
}

impl ResultsStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn city_path(&self, city_id: &str) -> PathBuf {
        self.dir.join(format!("{city_id}_results.json"))
    }

    /// Persists one city's result as `<city>_results.json`.
    pub fn save_city(&self, result: &CityAnalysisResult) -> Result<PathBuf, StoreError> {
        self.write_atomic(&self.city_path(&result.city_id), result)
    }

    /// Loads a previously saved city result if present.
    pub fn load_city(&self, city_id: &str) -> Result<Option<CityAnalysisResult>, StoreError> {
        read_optional(&self.city_path(city_id))
    }

    /// Persists the combined per-city map as `all_cities_results.json`.
    pub fn save_all_cities(
        &self,
        results: &BTreeMap<String, CityAnalysisResult>,
    ) -> Result<PathBuf, StoreError> {
        self.write_atomic(&self.dir.join(ALL_CITIES_FILE), results)
    }

    /// Loads the combined map from a previous run if present.
    pub fn load_all_cities(
        &self,
    ) -> Result<Option<BTreeMap<String, CityAnalysisResult>>, StoreError> {
        read_optional(&self.dir.join(ALL_CITIES_FILE))
    }

    /// Persists the cross-city comparison as `comparison_summary.json`.
    pub fn save_summary(&self, summary: &ComparisonSummary) -> Result<PathBuf, StoreError> {
        self.write_atomic(&self.dir.join(COMPARISON_FILE), summary)
    }

    /// Loads the comparison artifact from a previous run if present.
    pub fn load_summary(&self) -> Result<Option<ComparisonSummary>, StoreError> {
        read_optional(&self.dir.join(COMPARISON_FILE))
    }

    /// Serializes to a sibling temp file, then renames into place. Rename
    /// within one directory is atomic on POSIX filesystems.
    fn write_atomic<T: Serialize>(&self, path: &Path, value: &T) -> Result<PathBuf, StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(value)?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &json)?;
        fs::rename(&tmp, path)?;
        debug!(path = %path.display(), bytes = json.len(), "artifact written");
        Ok(path.to_path_buf())
    }
}

fn read_optional<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let json = match fs::read_to_string(path) {
        Ok(json) => json,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_str(&json)?))
}
