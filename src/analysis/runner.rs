//! Per-city analysis orchestration
//!
//! One runner drives one city through adapt, clean, gate, and the five
//! scenarios. A city is a state machine: pending until its file is read,
//! running through the battery, then completed or failed. Failures stay
//! inside the city: a missing file, an unreadable dataset, or a sample
//! below the minimum mark this city failed and nothing else. Test-level
//! errors are already captured inside the scenario maps and do not touch
//! city status.

use super::cleaner::{CleanReport, DatasetCleaner};
use super::config::AnalysisConfig;
use super::loader::{self, LoadError, RawTable};
use super::scenarios::{self, Scenario, ScenarioResults};
use super::schema::SchemaAdapter;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Lifecycle of one city's analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CityStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Why a whole city failed. Test-level trouble never becomes one of these.
#[derive(Debug, Clone, PartialEq)]
pub enum CityFailure {
    MissingSourceFile(PathBuf),
    Load(String),
    InsufficientSample { actual: usize, required: usize },
}

impl std::fmt::Display for CityFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingSourceFile(path) => {
                write!(f, "source file not found: {}", path.display())
            }
            Self::Load(msg) => write!(f, "failed to load dataset: {}", msg),
            Self::InsufficientSample { actual, required } => {
                write!(f, "insufficient sample: {} rows (minimum {})", actual, required)
            }
        }
    }
}

impl std::error::Error for CityFailure {}

/// Immutable outcome of one city's battery. Written once, never touched
/// by another city's processing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CityAnalysisResult {
    pub city_id: String,
    pub display_name: String,
    /// Row count after cleaning.
    pub sample_size: usize,
    pub status: CityStatus,
    pub scenario1: ScenarioResults,
    pub scenario2: ScenarioResults,
    pub scenario3: ScenarioResults,
    pub scenario4: ScenarioResults,
    pub scenario5: ScenarioResults,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clean_report: Option<CleanReport>,
}

impl CityAnalysisResult {
    /// Fresh result shell with empty scenario maps.
    pub fn pending(city_id: &str) -> Self {
        Self {
            city_id: city_id.to_string(),
            display_name: loader::display_name(city_id),
            sample_size: 0,
            status: CityStatus::Pending,
            scenario1: ScenarioResults::new(),
            scenario2: ScenarioResults::new(),
            scenario3: ScenarioResults::new(),
            scenario4: ScenarioResults::new(),
            scenario5: ScenarioResults::new(),
            error: None,
            clean_report: None,
        }
    }

    /// Marks this result failed with the failure's message.
    pub fn failed(mut self, failure: &CityFailure) -> Self {
        self.status = CityStatus::Failed;
        self.error = Some(failure.to_string());
        self
    }

    pub fn scenario(&self, scenario: Scenario) -> &ScenarioResults {
        match scenario {
            Scenario::PhysicalSpace => &self.scenario1,
            Scenario::Location => &self.scenario2,
            Scenario::Scale => &self.scenario3,
            Scenario::Trust => &self.scenario4,
            Scenario::Activity => &self.scenario5,
        }
    }

    pub fn scenario_mut(&mut self, scenario: Scenario) -> &mut ScenarioResults {
        match scenario {
            Scenario::PhysicalSpace => &mut self.scenario1,
            Scenario::Location => &mut self.scenario2,
            Scenario::Scale => &mut self.scenario3,
            Scenario::Trust => &mut self.scenario4,
            Scenario::Activity => &mut self.scenario5,
        }
    }

    /// Completed test count across all scenarios.
    pub fn completed_tests(&self) -> usize {
        Scenario::ALL
            .iter()
            .map(|s| {
                self.scenario(*s)
                    .values()
                    .filter(|slot| slot.completed().is_some())
                    .count()
            })
            .sum()
    }
}

/// Drives one city end to end. Stateless between cities, so a single
/// runner can be shared across a parallel batch.
#[derive(Debug, Clone)]
pub struct CityAnalysisRunner {
    config: AnalysisConfig,
    adapter: SchemaAdapter,
    cleaner: DatasetCleaner,
}

impl CityAnalysisRunner {
    pub fn new(config: AnalysisConfig) -> Self {
        let adapter = SchemaAdapter::from_config(&config);
        let cleaner = DatasetCleaner::new(config.clone());
        Self {
            config,
            adapter,
            cleaner,
        }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Analyze one city from its source file. Never returns an error: any
    /// failure is folded into the result so the batch can keep going.
    pub fn analyze_file(&self, city_id: &str, path: &Path) -> CityAnalysisResult {
        let result = CityAnalysisResult::pending(city_id);
        let (raw, ingest) = match loader::read_raw_table(path) {
            Ok(loaded) => loaded,
            Err(LoadError::MissingSourceFile(path)) => {
                let failure = CityFailure::MissingSourceFile(path);
                warn!(city = %city_id, "{}", failure);
                return result.failed(&failure);
            }
            Err(e) => {
                let failure = CityFailure::Load(e.to_string());
                warn!(city = %city_id, "{}", failure);
                return result.failed(&failure);
            }
        };
        if !ingest.row_errors.is_empty() {
            debug!(
                city = %city_id,
                skipped = ingest.row_errors.len(),
                "malformed rows skipped during ingest"
            );
        }
        self.analyze_table(city_id, raw)
    }

    /// Analyze one city from an already-loaded raw table.
    pub fn analyze_table(&self, city_id: &str, raw: RawTable) -> CityAnalysisResult {
        let mut result = CityAnalysisResult::pending(city_id);
        result.status = CityStatus::Running;
        info!(city = %city_id, rows = raw.rows.len(), "city analysis started");

        let adapted = self.adapter.adapt(raw);
        let missing = adapted.presence.missing();
        if !missing.is_empty() {
            debug!(city = %city_id, missing = ?missing, "canonical fields not found");
        }
        if adapted.numeric_parse_failures > 0 {
            debug!(
                city = %city_id,
                cells = adapted.numeric_parse_failures,
                "unparseable numeric cells treated as missing"
            );
        }

        let mut table = adapted.table;
        let report = self.cleaner.clean(&mut table);
        info!(
            city = %city_id,
            rows_in = report.rows_in,
            rows_out = report.rows_out,
            retained = report.retained_fraction,
            "cleaning finished"
        );

        result.sample_size = table.len();
        result.clean_report = Some(report);

        if result.sample_size < self.config.min_city_sample {
            let failure = CityFailure::InsufficientSample {
                actual: result.sample_size,
                required: self.config.min_city_sample,
            };
            warn!(city = %city_id, "{}", failure);
            return result.failed(&failure);
        }

        for scenario in Scenario::ALL {
            let outcome = scenarios::run_scenario(scenario, &table, &self.config);
            let failed = outcome.values().filter(|slot| slot.is_failed()).count();
            if failed > 0 {
                warn!(
                    city = %city_id,
                    scenario = scenario.key(),
                    failed_tests = failed,
                    "tests failed inside scenario"
                );
            }
            *result.scenario_mut(scenario) = outcome;
        }

        result.status = CityStatus::Completed;
        info!(
            city = %city_id,
            tests = result.completed_tests(),
            "city analysis completed"
        );
        result
    }
}
