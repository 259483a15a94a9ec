//! Multi-city batch driver.
//!
//! Discovers city listings files, pushes every city through the analysis
//! runner, persists each city's artifact the moment it finishes, then
//! aggregates the surviving results into the comparison summary. Cities are
//! independent, so by default they run across the rayon thread pool;
//! `sequential` forces one at a time. City order is fixed by sorted ids and
//! each city's pipeline is deterministic, so the artifacts are identical
//! either way.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::{info, warn};

use super::aggregate::{self, ComparisonSummary};
use super::artifact::{ResultsStore, StoreError};
use super::config::AnalysisConfig;
use super::loader::{self, LoadError};
use super::runner::{CityAnalysisResult, CityAnalysisRunner, CityStatus};

#[derive(Debug)]
pub enum BatchError {
    Discovery(LoadError),
    Store(StoreError),
}

impl fmt::Display for BatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Discovery(e) => write!(f, "city discovery failed: {}", e),
            Self::Store(e) => write!(f, "artifact persistence failed: {}", e),
        }
    }
}

impl std::error::Error for BatchError {}

impl From<LoadError> for BatchError {
    fn from(e: LoadError) -> Self {
        Self::Discovery(e)
    }
}

impl From<StoreError> for BatchError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

/// Execution knobs that are not analysis configuration.
#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    /// Restrict the run to these city ids. Empty means every discovered
    /// city.
    pub cities: Vec<String>,
    /// Process cities one at a time instead of across the thread pool.
    pub sequential: bool,
}

/// One finished batch: every city result plus the aggregate summary.
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub results: BTreeMap<String, CityAnalysisResult>,
    pub summary: ComparisonSummary,
}

impl BatchReport {
    pub fn successful_cities(&self) -> usize {
        self.results
            .values()
            .filter(|r| matches!(r.status, CityStatus::Completed))
            .count()
    }
}

/// Runs the whole multi-city pipeline and owns artifact persistence.
pub struct BatchDriver {
    runner: CityAnalysisRunner,
    store: ResultsStore,
}

impl BatchDriver {
    pub fn new(config: AnalysisConfig, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            runner: CityAnalysisRunner::new(config),
            store: ResultsStore::new(output_dir),
        }
    }

    pub fn store(&self) -> &ResultsStore {
        &self.store
    }

    /// Discovers, analyzes, and persists every city under `data_dir`.
    ///
    /// An empty directory yields an empty but well-formed report; the
    /// run-level artifacts are written regardless of how many cities
    /// succeeded. Per-city failures are recorded in their result slots and
    /// never abort the batch.
    pub fn run(&self, data_dir: &Path, options: &BatchOptions) -> Result<BatchReport, BatchError> {
        let mut files = loader::discover_city_files(data_dir)?;

        if !options.cities.is_empty() {
            for requested in &options.cities {
                if !files.contains_key(requested) {
                    warn!(city = %requested, "requested city has no listings file");
                }
            }
            files.retain(|city_id, _| options.cities.contains(city_id));
        }

        info!(
            cities = files.len(),
            dir = %data_dir.display(),
            sequential = options.sequential,
            "starting batch analysis"
        );

        let jobs: Vec<(String, PathBuf)> = files.into_iter().collect();
        let outcomes: Vec<Result<(String, CityAnalysisResult), StoreError>> =
            if options.sequential {
                jobs.iter()
                    .map(|(city_id, path)| self.run_city(city_id, path))
                    .collect()
            } else {
                jobs.par_iter()
                    .map(|(city_id, path)| self.run_city(city_id, path))
                    .collect()
            };

        let mut results = BTreeMap::new();
        for outcome in outcomes {
            let (city_id, result) = outcome?;
            results.insert(city_id, result);
        }

        self.store.save_all_cities(&results)?;
        let summary = aggregate::aggregate(&results);
        self.store.save_summary(&summary)?;

        info!(
            total = summary.run_summary.total_cities,
            successful = summary.run_summary.successful_cities,
            failed = summary.run_summary.failed_cities,
            tests = summary.total_tests,
            "batch analysis finished"
        );

        Ok(BatchReport { results, summary })
    }

    fn run_city(
        &self,
        city_id: &str,
        path: &Path,
    ) -> Result<(String, CityAnalysisResult), StoreError> {
        let result = self.runner.analyze_file(city_id, path);
        self.store.save_city(&result)?;
        Ok((city_id.to_string(), result))
    }
}
