//! The fixed five-scenario test battery
//!
//! Each scenario is a named bundle of hypothesis tests over specific
//! canonical columns. Three outcomes per test slot:
//!
//! - a gate was not met (missing column, empty group, too few rows):
//!   no entry is recorded at all;
//! - the test ran: a `Completed` slot with `significant == (p < alpha)`;
//! - the computation itself failed (degenerate sample, singular design):
//!   a `Failed` slot carrying the error text.
//!
//! A failure in one test never stops the others; the runner relies on that.

use super::cleaner::HOST_SCALE_BIN;
use super::config::AnalysisConfig;
use super::regression;
use super::stats;
use super::table::CityTable;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Room-category vocabulary of the source datasets.
pub const ENTIRE_UNIT_LABEL: &str = "Entire home/apt";
pub const PRIVATE_ROOM_LABEL: &str = "Private room";

const TRUST_FLAG_TRUE: &str = "t";
const TRUST_FLAG_FALSE: &str = "f";

/// The five scenarios, in battery order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Scenario {
    PhysicalSpace,
    Location,
    Scale,
    Trust,
    Activity,
}

impl Scenario {
    pub const ALL: [Scenario; 5] = [
        Scenario::PhysicalSpace,
        Scenario::Location,
        Scenario::Scale,
        Scenario::Trust,
        Scenario::Activity,
    ];

    /// Stable key used in persisted results.
    pub fn key(self) -> &'static str {
        match self {
            Scenario::PhysicalSpace => "scenario1",
            Scenario::Location => "scenario2",
            Scenario::Scale => "scenario3",
            Scenario::Trust => "scenario4",
            Scenario::Activity => "scenario5",
        }
    }

    pub fn number(self) -> u8 {
        match self {
            Scenario::PhysicalSpace => 1,
            Scenario::Location => 2,
            Scenario::Scale => 3,
            Scenario::Trust => 4,
            Scenario::Activity => 5,
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Scenario::PhysicalSpace => "physical-space premium",
            Scenario::Location => "location premium",
            Scenario::Scale => "scale premium",
            Scenario::Trust => "trust monetization",
            Scenario::Activity => "activity signal",
        }
    }
}

/// One completed hypothesis test. Effect-measure fields are filled
/// according to the kind of test; absent ones are omitted from JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub test_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statistic: Option<f64>,
    pub p_value: f64,
    pub significant: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub premium_ratio: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_medians: Option<BTreeMap<String, f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coefficient: Option<f64>,
}

impl TestResult {
    fn new(test_name: &str, p_value: f64, alpha: f64) -> Self {
        Self {
            test_name: test_name.to_string(),
            statistic: None,
            p_value,
            significant: p_value < alpha,
            correlation: None,
            premium_ratio: None,
            group_medians: None,
            coefficient: None,
        }
    }
}

/// A test slot is either a completed result or an error marker. Failures
/// are data, not control flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TestSlot {
    Completed(TestResult),
    Failed { error: String },
}

impl TestSlot {
    pub fn completed(&self) -> Option<&TestResult> {
        match self {
            TestSlot::Completed(result) => Some(result),
            TestSlot::Failed { .. } => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, TestSlot::Failed { .. })
    }
}

/// Results of one scenario, keyed by test name.
pub type ScenarioResults = BTreeMap<String, TestSlot>;

/// Run one scenario's tests against a cleaned table.
pub fn run_scenario(
    scenario: Scenario,
    table: &CityTable,
    config: &AnalysisConfig,
) -> ScenarioResults {
    match scenario {
        Scenario::PhysicalSpace => physical_space(table, config),
        Scenario::Location => location(table, config),
        Scenario::Scale => scale(table, config),
        Scenario::Trust => trust(table, config),
        Scenario::Activity => activity(table, config),
    }
}

/// Scenario 1: does physical space command a premium? Privacy split,
/// capacity association, and the capacity-by-category interaction.
fn physical_space(table: &CityTable, config: &AnalysisConfig) -> ScenarioResults {
    let mut results = ScenarioResults::new();

    // privacy_premium: entire units against private rooms on price.
    let entire = category_prices(table, ENTIRE_UNIT_LABEL);
    let private = category_prices(table, PRIVATE_ROOM_LABEL);
    match stats::rank_sum(&entire, &private) {
        Ok(Some(test)) => {
            let mut result =
                TestResult::new("privacy_premium", test.p_value, config.significance_level);
            result.statistic = Some(test.statistic);
            result.premium_ratio = test.ratio_of_medians;
            let mut medians = BTreeMap::new();
            medians.insert(ENTIRE_UNIT_LABEL.to_string(), test.median_a);
            medians.insert(PRIVATE_ROOM_LABEL.to_string(), test.median_b);
            result.group_medians = Some(medians);
            results.insert(result.test_name.clone(), TestSlot::Completed(result));
        }
        Ok(None) => {}
        Err(e) => {
            results.insert(
                "privacy_premium".to_string(),
                TestSlot::Failed { error: e.to_string() },
            );
        }
    }

    // capacity_premium: capacity/price association over the sane capacity
    // range (bounds inclusive).
    if let Some(pairs) = table.numeric_pairs("capacity", "price") {
        let [lo, hi] = config.capacity_bounds;
        let in_range: Vec<(f64, f64)> = pairs
            .into_iter()
            .filter(|(capacity, _)| *capacity >= lo && *capacity <= hi)
            .collect();
        if in_range.len() > config.min_city_sample {
            let (capacity, price): (Vec<f64>, Vec<f64>) = in_range.into_iter().unzip();
            results.insert(
                "capacity_premium".to_string(),
                correlation_slot("capacity_premium", &capacity, &price, config),
            );
        }
    }

    // interaction_effect: is the capacity slope different for entire units?
    if let Some(slot) = interaction_effect(table, config) {
        results.insert("interaction_effect".to_string(), slot);
    }

    results
}

fn interaction_effect(table: &CityTable, config: &AnalysisConfig) -> Option<TestSlot> {
    let price_col = table.numeric("price")?;
    let capacity_col = table.numeric("capacity")?;
    let category_col = table.text("room_category")?;

    let mut price = Vec::new();
    let mut capacity = Vec::new();
    let mut entire = Vec::new();
    for i in 0..table.len() {
        let (Some(p), Some(c)) = (price_col[i], capacity_col[i]) else {
            continue;
        };
        price.push(p);
        capacity.push(c);
        // Missing category counts as not-entire.
        let is_entire = category_col[i].as_deref() == Some(ENTIRE_UNIT_LABEL);
        entire.push(if is_entire { 1.0 } else { 0.0 });
    }
    if price.len() <= config.min_city_sample {
        return None;
    }

    Some(match regression::fit_interaction(&price, &capacity, &entire) {
        Ok(model) => {
            let mut result = TestResult::new(
                "interaction_effect",
                model.p_value,
                config.significance_level,
            );
            result.statistic = Some(model.t_statistic);
            result.coefficient = Some(model.coefficient);
            TestSlot::Completed(result)
        }
        Err(e) => TestSlot::Failed { error: e.to_string() },
    })
}

/// Scenario 2: regional price differences.
fn location(table: &CityTable, config: &AnalysisConfig) -> ScenarioResults {
    let mut results = ScenarioResults::new();
    if table.non_missing("region") > config.min_city_sample {
        if let Some(groups) = grouped_values(table, "region", "price") {
            if let Some(slot) = omnibus_slot("region_comparison", &groups, config) {
                results.insert("region_comparison".to_string(), slot);
            }
        }
    }
    results
}

/// Scenario 3: does host scale move price or availability?
fn scale(table: &CityTable, config: &AnalysisConfig) -> ScenarioResults {
    let mut results = ScenarioResults::new();
    if table.non_missing(HOST_SCALE_BIN) <= config.min_city_sample {
        return results;
    }
    if let Some(groups) = grouped_values(table, HOST_SCALE_BIN, "price") {
        if let Some(slot) = omnibus_slot("scale_price", &groups, config) {
            results.insert("scale_price".to_string(), slot);
        }
    }
    if let Some(groups) = grouped_values(table, HOST_SCALE_BIN, "availability") {
        if let Some(slot) = omnibus_slot("scale_occupancy", &groups, config) {
            results.insert("scale_occupancy".to_string(), slot);
        }
    }
    results
}

/// Scenario 4: is trust monetized? Rating/availability association plus the
/// superhost split.
fn trust(table: &CityTable, config: &AnalysisConfig) -> ScenarioResults {
    let mut results = ScenarioResults::new();

    if let Some(pairs) = table.numeric_pairs("review_rating", "availability") {
        if pairs.len() > config.min_city_sample {
            let (rating, availability): (Vec<f64>, Vec<f64>) = pairs.into_iter().unzip();
            results.insert(
                "rating_occupancy".to_string(),
                correlation_slot("rating_occupancy", &rating, &availability, config),
            );
        }
    }

    if let (Some(flags), Some(availability)) =
        (table.text("trust_flag"), table.numeric("availability"))
    {
        let mut superhost = Vec::new();
        let mut regular = Vec::new();
        let mut eligible_rows = 0usize;
        for (flag, value) in flags.iter().zip(availability) {
            let (Some(flag), Some(value)) = (flag.as_deref(), value) else {
                continue;
            };
            eligible_rows += 1;
            match flag {
                TRUST_FLAG_TRUE => superhost.push(*value),
                TRUST_FLAG_FALSE => regular.push(*value),
                _ => {}
            }
        }
        if eligible_rows > config.min_city_sample
            && superhost.len() > config.min_group_size
            && regular.len() > config.min_group_size
        {
            match stats::rank_sum(&superhost, &regular) {
                Ok(Some(test)) => {
                    let mut result = TestResult::new(
                        "superhost_comparison",
                        test.p_value,
                        config.significance_level,
                    );
                    result.statistic = Some(test.statistic);
                    let mut medians = BTreeMap::new();
                    medians.insert("superhost".to_string(), test.median_a);
                    medians.insert("regular".to_string(), test.median_b);
                    result.group_medians = Some(medians);
                    results.insert(result.test_name.clone(), TestSlot::Completed(result));
                }
                Ok(None) => {}
                Err(e) => {
                    results.insert(
                        "superhost_comparison".to_string(),
                        TestSlot::Failed { error: e.to_string() },
                    );
                }
            }
        }
    }

    results
}

/// Scenario 5: review activity against price and availability.
fn activity(table: &CityTable, config: &AnalysisConfig) -> ScenarioResults {
    let mut results = ScenarioResults::new();
    let tests: [(&str, &str, &str); 3] = [
        ("ltm_price", "reviews_recent", "price"),
        ("historical_price", "reviews_total", "price"),
        ("ltm_occupancy", "reviews_recent", "availability"),
    ];
    for (name, x_col, y_col) in tests {
        if let Some(pairs) = table.numeric_pairs(x_col, y_col) {
            if pairs.len() > config.min_city_sample {
                let (x, y): (Vec<f64>, Vec<f64>) = pairs.into_iter().unzip();
                results.insert(name.to_string(), correlation_slot(name, &x, &y, config));
            }
        }
    }
    results
}

/// Non-missing prices of one room category; empty when the category or a
/// needed column is absent.
fn category_prices(table: &CityTable, label: &str) -> Vec<f64> {
    table
        .group_rows_by_text("room_category")
        .and_then(|groups| {
            let rows = groups.get(label)?;
            table.numeric_at("price", rows)
        })
        .unwrap_or_default()
}

/// Labeled non-missing values for a multi-group test; `None` when either
/// column is absent.
fn grouped_values(
    table: &CityTable,
    group_col: &str,
    value_col: &str,
) -> Option<Vec<(String, Vec<f64>)>> {
    let groups = table.group_rows_by_text(group_col)?;
    let mut out = Vec::with_capacity(groups.len());
    for (label, rows) in groups {
        let values = table.numeric_at(value_col, &rows)?;
        out.push((label, values));
    }
    Some(out)
}

fn correlation_slot(name: &str, x: &[f64], y: &[f64], config: &AnalysisConfig) -> TestSlot {
    match stats::monotonic_association(x, y) {
        Ok(test) => {
            let mut result = TestResult::new(name, test.p_value, config.significance_level);
            result.correlation = Some(test.correlation);
            TestSlot::Completed(result)
        }
        Err(e) => TestSlot::Failed { error: e.to_string() },
    }
}

fn omnibus_slot(
    name: &str,
    groups: &[(String, Vec<f64>)],
    config: &AnalysisConfig,
) -> Option<TestSlot> {
    match stats::rank_omnibus(groups, config.min_group_size) {
        Ok(Some(test)) => {
            let mut result = TestResult::new(name, test.p_value, config.significance_level);
            result.statistic = Some(test.statistic);
            result.group_medians = Some(test.group_medians);
            Some(TestSlot::Completed(result))
        }
        Ok(None) => None,
        Err(e) => Some(TestSlot::Failed { error: e.to_string() }),
    }
}
