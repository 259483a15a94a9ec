//! Cross-city aggregation.
//!
//! Takes every city's completed battery and asks the replication question:
//! which (scenario, test) pairs hold up across markets? Three views are
//! produced from the same flattened record set: significance consistency
//! (how many cities found the effect), direction agreement (do correlations
//! share a sign), and effect-size dispersion (how large and how variable
//! the measured effects are). Failed cities are excluded from every view
//! but still counted in the run summary.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::runner::{CityAnalysisResult, CityStatus};
use super::scenarios::Scenario;
use super::stats;

/// Share of contributing cities that must agree before a pattern is called
/// universal (significance) or consistent (direction).
pub const CONSENSUS_SHARE: f64 = 0.8;

/// Minimum number of cities contributing an effect measure before
/// dispersion statistics are reported for it.
pub const MIN_DISPERSION_CITIES: usize = 3;

/// One completed test from one city, flattened for grouping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CityTestRecord {
    pub city_id: String,
    pub city_display: String,
    pub scenario: u8,
    pub scenario_name: String,
    pub test_name: String,
    pub p_value: f64,
    pub significant: bool,
    pub sample_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub premium_ratio: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coefficient: Option<f64>,
}

/// Replication strength for one (scenario, test) pair.
///
/// `Strong` requires every contributing city, `High` at least the consensus
/// share, `Partial` anything below. The coarser `is_universal` boolean on
/// [`ConsistencyRow`] keys off the consensus share alone, so a 9/10 pair is
/// universal but not strong; both readings are exposed side by side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeneralizabilityTier {
    Strong,
    High,
    Partial,
}

impl GeneralizabilityTier {
    pub fn from_rate(rate: f64) -> Self {
        if rate >= 1.0 {
            GeneralizabilityTier::Strong
        } else if rate >= CONSENSUS_SHARE {
            GeneralizabilityTier::High
        } else {
            GeneralizabilityTier::Partial
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GeneralizabilityTier::Strong => "strong",
            GeneralizabilityTier::High => "high",
            GeneralizabilityTier::Partial => "partial",
        }
    }
}

/// How consistently one test reached significance across cities.
///
/// `total_cities` counts cities that actually produced this test, not
/// cities in the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsistencyRow {
    pub scenario: u8,
    pub scenario_name: String,
    pub test_name: String,
    pub total_cities: usize,
    pub significant_cities: usize,
    pub significance_rate: f64,
    pub is_universal: bool,
    pub tier: GeneralizabilityTier,
}

/// Sign agreement of a test's correlation across cities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectionRow {
    pub scenario: u8,
    pub scenario_name: String,
    pub test_name: String,
    pub positive: usize,
    pub negative: usize,
    pub total: usize,
    pub direction_consistent: bool,
}

/// Descriptive spread of one effect measure across cities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispersionStats {
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

impl DispersionStats {
    /// Returns `None` for an empty slice. With a single value the standard
    /// deviation is reported as zero.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        Some(DispersionStats {
            count: values.len(),
            mean: stats::mean(values)?,
            median: stats::median(values)?,
            std: stats::sample_std(values).unwrap_or(0.0),
            min: *sorted.first()?,
            max: *sorted.last()?,
        })
    }
}

/// Which effect measure a dispersion row describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectMeasure {
    Correlation,
    PremiumRatio,
}

impl EffectMeasure {
    pub fn as_str(&self) -> &'static str {
        match self {
            EffectMeasure::Correlation => "correlation",
            EffectMeasure::PremiumRatio => "premium_ratio",
        }
    }
}

/// Cross-city spread of one effect measure for one test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectDispersionRow {
    pub scenario: u8,
    pub scenario_name: String,
    pub test_name: String,
    pub measure: EffectMeasure,
    pub stats: DispersionStats,
}

/// Per-scenario outcome counts for the run summary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScenarioStats {
    pub cities_with_results: usize,
    pub total_tests: usize,
    pub significant_tests: usize,
}

/// Run-level accounting: how many cities made it through, and what each
/// scenario produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub total_cities: usize,
    pub successful_cities: usize,
    pub failed_cities: usize,
    pub scenario_statistics: BTreeMap<String, ScenarioStats>,
}

/// The aggregate artifact: all three cross-city views plus run accounting.
///
/// `total_tests` counts flattened completed tests across cities;
/// `total_cities` counts every city in the run, failed ones included.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonSummary {
    pub generated_at: DateTime<Utc>,
    pub consistency: Vec<ConsistencyRow>,
    pub direction: Vec<DirectionRow>,
    pub effect_sizes: Vec<EffectDispersionRow>,
    pub run_summary: RunSummary,
    pub total_tests: usize,
    pub total_cities: usize,
}

/// Flattens every completed test of every non-failed city into records.
///
/// Cities with a recorded error are skipped entirely; error slots inside a
/// surviving city's scenarios are skipped individually.
pub fn extract_test_records(
    results: &BTreeMap<String, CityAnalysisResult>,
) -> Vec<CityTestRecord> {
    let mut records = Vec::new();
    for (city_id, result) in results {
        if result.error.is_some() {
            continue;
        }
        for scenario in Scenario::ALL {
            for (test_name, slot) in result.scenario(scenario) {
                let Some(test) = slot.completed() else {
                    continue;
                };
                records.push(CityTestRecord {
                    city_id: city_id.clone(),
                    city_display: result.display_name.clone(),
                    scenario: scenario.number(),
                    scenario_name: scenario.display_name().to_string(),
                    test_name: test_name.clone(),
                    p_value: test.p_value,
                    significant: test.significant,
                    sample_size: result.sample_size,
                    correlation: test.correlation,
                    premium_ratio: test.premium_ratio,
                    coefficient: test.coefficient,
                });
            }
        }
    }
    records
}

fn group_records(
    records: &[CityTestRecord],
) -> BTreeMap<(u8, String), Vec<&CityTestRecord>> {
    let mut groups: BTreeMap<(u8, String), Vec<&CityTestRecord>> = BTreeMap::new();
    for record in records {
        groups
            .entry((record.scenario, record.test_name.clone()))
            .or_default()
            .push(record);
    }
    groups
}

/// Scores each (scenario, test) pair by the share of cities that found it
/// significant.
pub fn significance_consistency(records: &[CityTestRecord]) -> Vec<ConsistencyRow> {
    group_records(records)
        .into_iter()
        .map(|((scenario, test_name), group)| {
            let total = group.len();
            let significant = group.iter().filter(|r| r.significant).count();
            let rate = significant as f64 / total as f64;
            ConsistencyRow {
                scenario,
                scenario_name: group[0].scenario_name.clone(),
                test_name,
                total_cities: total,
                significant_cities: significant,
                significance_rate: rate,
                is_universal: rate >= CONSENSUS_SHARE,
                tier: GeneralizabilityTier::from_rate(rate),
            }
        })
        .collect()
}

/// Checks sign agreement for every test that reports a correlation.
///
/// A zero correlation counts toward neither side. Tests without any
/// correlation values produce no row.
pub fn effect_direction(records: &[CityTestRecord]) -> Vec<DirectionRow> {
    group_records(records)
        .into_iter()
        .filter_map(|((scenario, test_name), group)| {
            let correlations: Vec<f64> =
                group.iter().filter_map(|r| r.correlation).collect();
            if correlations.is_empty() {
                return None;
            }
            let total = correlations.len();
            let positive = correlations.iter().filter(|c| **c > 0.0).count();
            let negative = correlations.iter().filter(|c| **c < 0.0).count();
            let consistent = positive as f64 / total as f64 >= CONSENSUS_SHARE
                || negative as f64 / total as f64 >= CONSENSUS_SHARE;
            Some(DirectionRow {
                scenario,
                scenario_name: group[0].scenario_name.clone(),
                test_name,
                positive,
                negative,
                total,
                direction_consistent: consistent,
            })
        })
        .collect()
}

/// Summarizes the spread of correlations and premium ratios per test.
///
/// A row is only emitted once at least [`MIN_DISPERSION_CITIES`] cities
/// contribute that measure; below that, spread numbers are noise.
pub fn effect_dispersion(records: &[CityTestRecord]) -> Vec<EffectDispersionRow> {
    let mut rows = Vec::new();
    for ((scenario, test_name), group) in group_records(records) {
        for measure in [EffectMeasure::Correlation, EffectMeasure::PremiumRatio] {
            let values: Vec<f64> = group
                .iter()
                .filter_map(|r| match measure {
                    EffectMeasure::Correlation => r.correlation,
                    EffectMeasure::PremiumRatio => r.premium_ratio,
                })
                .collect();
            if values.len() < MIN_DISPERSION_CITIES {
                continue;
            }
            let Some(dispersion) = DispersionStats::from_values(&values) else {
                continue;
            };
            rows.push(EffectDispersionRow {
                scenario,
                scenario_name: group[0].scenario_name.clone(),
                test_name: test_name.clone(),
                measure,
                stats: dispersion,
            });
        }
    }
    rows
}

/// Counts per-run and per-scenario outcomes over every city, failed ones
/// included.
pub fn summarize_run(results: &BTreeMap<String, CityAnalysisResult>) -> RunSummary {
    let total = results.len();
    let successful = results
        .values()
        .filter(|r| matches!(r.status, CityStatus::Completed))
        .count();

    let mut scenario_statistics = BTreeMap::new();
    for scenario in Scenario::ALL {
        let mut stats = ScenarioStats::default();
        for result in results.values() {
            let slots = result.scenario(scenario);
            if slots.is_empty() {
                continue;
            }
            stats.cities_with_results += 1;
            for slot in slots.values() {
                if let Some(test) = slot.completed() {
                    stats.total_tests += 1;
                    if test.significant {
                        stats.significant_tests += 1;
                    }
                }
            }
        }
        scenario_statistics.insert(scenario.key().to_string(), stats);
    }

    RunSummary {
        total_cities: total,
        successful_cities: successful,
        failed_cities: total - successful,
        scenario_statistics,
    }
}

/// Builds the full cross-city comparison from a finished batch.
pub fn aggregate(results: &BTreeMap<String, CityAnalysisResult>) -> ComparisonSummary {
    let records = extract_test_records(results);
    ComparisonSummary {
        generated_at: Utc::now(),
        consistency: significance_consistency(&records),
        direction: effect_direction(&records),
        effect_sizes: effect_dispersion(&records),
        run_summary: summarize_run(results),
        total_tests: records.len(),
        total_cities: results.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::runner::CityFailure;
    use crate::analysis::scenarios::{TestResult, TestSlot};

    fn completed_test(p_value: f64, correlation: Option<f64>) -> TestSlot {
        TestSlot::Completed(TestResult {
            test_name: String::new(),
            statistic: Some(1.0),
            p_value,
            significant: p_value < 0.05,
            correlation,
            premium_ratio: None,
            group_medians: None,
            coefficient: None,
        })
    }

    fn city_with_test(
        id: &str,
        scenario: Scenario,
        test_name: &str,
        slot: TestSlot,
    ) -> CityAnalysisResult {
        let mut result = CityAnalysisResult::pending(id);
        result.status = CityStatus::Completed;
        result.sample_size = 500;
        result
            .scenario_mut(scenario)
            .insert(test_name.to_string(), slot);
        result
    }

    #[test]
    fn test_nine_of_ten_is_universal_but_not_strong() {
        let mut results = BTreeMap::new();
        for i in 0..10 {
            let p = if i == 0 { 0.2 } else { 0.01 };
            let id = format!("city{i:02}");
            results.insert(
                id.clone(),
                city_with_test(
                    &id,
                    Scenario::PhysicalSpace,
                    "privacy_premium",
                    completed_test(p, None),
                ),
            );
        }

        let rows = significance_consistency(&extract_test_records(&results));
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.total_cities, 10);
        assert_eq!(row.significant_cities, 9);
        assert!((row.significance_rate - 0.9).abs() < 1e-12);
        assert!(row.is_universal);
        assert_eq!(row.tier, GeneralizabilityTier::High);
    }

    #[test]
    fn test_unanimous_significance_is_strong() {
        let mut results = BTreeMap::new();
        for i in 0..4 {
            let id = format!("c{i}");
            results.insert(
                id.clone(),
                city_with_test(
                    &id,
                    Scenario::Scale,
                    "scale_price",
                    completed_test(0.001, Some(0.3)),
                ),
            );
        }
        let rows = significance_consistency(&extract_test_records(&results));
        assert_eq!(rows[0].tier, GeneralizabilityTier::Strong);
        assert!(rows[0].is_universal);
    }

    #[test]
    fn test_mixed_signs_break_direction_consistency() {
        let mut results = BTreeMap::new();
        for (i, corr) in [0.5, -0.5, 0.6].into_iter().enumerate() {
            let id = format!("c{i}");
            results.insert(
                id.clone(),
                city_with_test(
                    &id,
                    Scenario::Trust,
                    "rating_occupancy",
                    completed_test(0.01, Some(corr)),
                ),
            );
        }
        let rows = effect_direction(&extract_test_records(&results));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].positive, 2);
        assert_eq!(rows[0].negative, 1);
        assert!(!rows[0].direction_consistent);
    }

    #[test]
    fn test_shared_sign_is_direction_consistent() {
        let mut results = BTreeMap::new();
        for (i, corr) in [0.5, 0.4, 0.6].into_iter().enumerate() {
            let id = format!("c{i}");
            results.insert(
                id.clone(),
                city_with_test(
                    &id,
                    Scenario::Trust,
                    "rating_occupancy",
                    completed_test(0.01, Some(corr)),
                ),
            );
        }
        let rows = effect_direction(&extract_test_records(&results));
        assert!(rows[0].direction_consistent);
    }

    #[test]
    fn test_dispersion_requires_three_cities() {
        let mut results = BTreeMap::new();
        for (i, corr) in [0.5, 0.4].into_iter().enumerate() {
            let id = format!("c{i}");
            results.insert(
                id.clone(),
                city_with_test(
                    &id,
                    Scenario::Activity,
                    "ltm_price",
                    completed_test(0.01, Some(corr)),
                ),
            );
        }
        assert!(effect_dispersion(&extract_test_records(&results)).is_empty());

        results.insert(
            "c2".to_string(),
            city_with_test(
                "c2",
                Scenario::Activity,
                "ltm_price",
                completed_test(0.01, Some(0.6)),
            ),
        );
        let rows = effect_dispersion(&extract_test_records(&results));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].measure, EffectMeasure::Correlation);
        let stats = &rows[0].stats;
        assert_eq!(stats.count, 3);
        assert!((stats.mean - 0.5).abs() < 1e-12);
        assert!((stats.median - 0.5).abs() < 1e-12);
        assert!((stats.min - 0.4).abs() < 1e-12);
        assert!((stats.max - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_failed_cities_are_counted_but_not_scored() {
        let mut results = BTreeMap::new();
        results.insert(
            "good".to_string(),
            city_with_test(
                "good",
                Scenario::PhysicalSpace,
                "privacy_premium",
                completed_test(0.01, None),
            ),
        );
        results.insert(
            "bad".to_string(),
            CityAnalysisResult::pending("bad").failed(&CityFailure::InsufficientSample {
                actual: 40,
                required: 100,
            }),
        );

        let records = extract_test_records(&results);
        assert_eq!(records.len(), 1);

        let summary = aggregate(&results);
        assert_eq!(summary.total_cities, 2);
        assert_eq!(summary.run_summary.successful_cities, 1);
        assert_eq!(summary.run_summary.failed_cities, 1);
        assert_eq!(summary.consistency.len(), 1);
        assert_eq!(summary.consistency[0].total_cities, 1);
    }

    #[test]
    fn test_error_slots_are_skipped_within_a_city() {
        let mut city = city_with_test(
            "c0",
            Scenario::PhysicalSpace,
            "privacy_premium",
            completed_test(0.01, None),
        );
        city.scenario_mut(Scenario::PhysicalSpace).insert(
            "capacity_premium".to_string(),
            TestSlot::Failed {
                error: "degenerate sample: zero rank variance".to_string(),
            },
        );
        let mut results = BTreeMap::new();
        results.insert("c0".to_string(), city);

        let records = extract_test_records(&results);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].test_name, "privacy_premium");

        let summary = summarize_run(&results);
        let s1 = &summary.scenario_statistics["scenario1"];
        assert_eq!(s1.cities_with_results, 1);
        assert_eq!(s1.total_tests, 1);
        assert_eq!(s1.significant_tests, 1);
    }

    #[test]
    fn test_empty_run_produces_well_formed_summary() {
        let results = BTreeMap::new();
        let summary = aggregate(&results);
        assert_eq!(summary.total_cities, 0);
        assert_eq!(summary.total_tests, 0);
        assert!(summary.consistency.is_empty());
        assert!(summary.direction.is_empty());
        assert!(summary.effect_sizes.is_empty());
        assert_eq!(summary.run_summary.successful_cities, 0);
        assert_eq!(summary.run_summary.scenario_statistics.len(), 5);
    }

    #[test]
    fn test_dispersion_stats_none_on_empty() {
        assert!(DispersionStats::from_values(&[]).is_none());
        let single = DispersionStats::from_values(&[2.0]).unwrap();
        assert_eq!(single.count, 1);
        assert_eq!(single.std, 0.0);
    }
}
