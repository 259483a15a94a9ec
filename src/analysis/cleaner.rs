//! Deterministic cleaning and feature derivation
//!
//! Fixed pipeline over a canonical city table. Step order matters: price
//! quantiles are taken after unparseable and nonpositive rows are gone,
//! and the capacity requirement runs after imputation has had its chance.
//!
//! The pipeline is idempotent. Imputation steps and outlier removal each
//! leave a marker column behind (`capacity_imputed`, `outlier_class`, the
//! per-score rating flags) and skip themselves when the marker is already
//! present; re-deriving them from an already-cleaned table would shift
//! medians and quantiles onto the trimmed distribution. The remaining
//! steps recompute to identical values on cleaned input.

use super::config::AnalysisConfig;
use super::stats;
use super::table::CityTable;
use serde::{Deserialize, Serialize};

pub const HAS_REVIEWS: &str = "has_reviews";
pub const CAPACITY_IMPUTED: &str = "capacity_imputed";
pub const HOST_LISTINGS_IMPUTED: &str = "host_listings_imputed";
pub const OUTLIER_CLASS: &str = "outlier_class";
pub const LOG_PRICE: &str = "log_price";
pub const HOST_SCALE_BIN: &str = "host_scale_bin";
pub const SPECIALIZATION_BIN: &str = "specialization_bin";

/// Review score columns and their "had a real rating" flag columns.
/// A zero in these fields means "never rated", not "rated zero".
pub const REVIEW_SCORE_FLAGS: [(&str, &str); 7] = [
    ("review_accuracy", "has_accuracy_review"),
    ("review_cleanliness", "has_cleanliness_review"),
    ("review_checkin", "has_checkin_review"),
    ("review_communication", "has_communication_review"),
    ("review_location", "has_location_review"),
    ("review_value", "has_value_review"),
    ("review_rating", "has_rating_review"),
];

/// Per-record price tag assigned during outlier screening.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutlierClass {
    Normal,
    /// Nonpositive price. Cannot occur after the price filter, kept so the
    /// tag set is closed.
    Impossible,
    /// Beyond the error-tail quantile and an exact round-number multiple.
    LikelyError,
    /// Outside the IQR fence but plausibly a real luxury listing.
    LegitExtreme,
}

impl OutlierClass {
    pub fn as_str(self) -> &'static str {
        match self {
            OutlierClass::Normal => "normal",
            OutlierClass::Impossible => "impossible",
            OutlierClass::LikelyError => "likely_error",
            OutlierClass::LegitExtreme => "legit_extreme",
        }
    }
}

/// Row accounting for one cleaning pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanReport {
    pub rows_in: usize,
    pub rows_out: usize,
    /// rows_out / rows_in; 1.0 for an empty input.
    pub retained_fraction: f64,
    pub price_unparseable: usize,
    pub price_nonpositive: usize,
    pub impossible_removed: usize,
    pub likely_error_removed: usize,
    pub legit_extreme_kept: usize,
    pub capacity_dropped: usize,
    pub capacity_imputed: usize,
    pub host_listings_imputed: usize,
}

impl CleanReport {
    fn new(rows_in: usize) -> Self {
        Self {
            rows_in,
            rows_out: rows_in,
            retained_fraction: 1.0,
            price_unparseable: 0,
            price_nonpositive: 0,
            impossible_removed: 0,
            likely_error_removed: 0,
            legit_extreme_kept: 0,
            capacity_dropped: 0,
            capacity_imputed: 0,
            host_listings_imputed: 0,
        }
    }
}

/// The cleaning pipeline. Stateless apart from configuration.
#[derive(Debug, Clone)]
pub struct DatasetCleaner {
    config: AnalysisConfig,
}

impl DatasetCleaner {
    pub fn new(config: AnalysisConfig) -> Self {
        Self { config }
    }

    /// Run the full pipeline in place and report row accounting.
    pub fn clean(&self, table: &mut CityTable) -> CleanReport {
        let rows_in = table.len();
        let mut report = CleanReport::new(rows_in);

        self.fill_recent_reviews(table);
        self.flag_has_reviews(table);
        self.impute_capacity(table, &mut report);
        self.impute_review_scores(table);
        self.impute_host_listings(table, &mut report);
        self.normalize_price(table, &mut report);
        self.screen_price_outliers(table, &mut report);
        self.require_capacity(table, &mut report);
        self.derive_bins(table);

        report.rows_out = table.len();
        report.retained_fraction = if rows_in == 0 {
            1.0
        } else {
            report.rows_out as f64 / rows_in as f64
        };
        report
    }

    /// Step 1a: missing recent-review counts mean zero recent reviews.
    fn fill_recent_reviews(&self, table: &mut CityTable) {
        if let Some(values) = table.numeric_mut("reviews_recent") {
            for v in values {
                if v.is_none() {
                    *v = Some(0.0);
                }
            }
        }
    }

    /// Step 1b: 0/1 flag for "has ever been reviewed".
    fn flag_has_reviews(&self, table: &mut CityTable) {
        if let Some(totals) = table.numeric("reviews_total") {
            let flags: Vec<Option<f64>> = totals
                .iter()
                .map(|v| Some(if v.map_or(false, |x| x > 0.0) { 1.0 } else { 0.0 }))
                .collect();
            table.insert_numeric(HAS_REVIEWS, flags);
        }
    }

    /// Step 2: capacity 0 is missing; impute by room-category median with a
    /// global-median fallback. The flag records pre-imputation missingness.
    fn impute_capacity(&self, table: &mut CityTable, report: &mut CleanReport) {
        if table.has_column(CAPACITY_IMPUTED) {
            return;
        }
        let Some(raw) = table.numeric("capacity") else {
            return;
        };

        let pre: Vec<Option<f64>> = raw
            .iter()
            .map(|v| match v {
                Some(x) if *x != 0.0 => Some(*x),
                _ => None,
            })
            .collect();
        let flags: Vec<Option<f64>> = pre
            .iter()
            .map(|v| Some(if v.is_none() { 1.0 } else { 0.0 }))
            .collect();

        let known: Vec<f64> = pre.iter().filter_map(|v| *v).collect();
        let global_median = stats::median(&known);

        let mut filled = pre.clone();
        if let Some(groups) = table.group_rows_by_text("room_category") {
            for rows in groups.values() {
                let group_values: Vec<f64> =
                    rows.iter().filter_map(|&r| pre[r]).collect();
                let fill = stats::median(&group_values).or(global_median);
                for &r in rows {
                    if filled[r].is_none() {
                        filled[r] = fill;
                    }
                }
            }
        }
        // Rows without a room category, or tables without one at all.
        for v in &mut filled {
            if v.is_none() {
                *v = global_median;
            }
        }

        report.capacity_imputed = pre
            .iter()
            .zip(&filled)
            .filter(|(before, after)| before.is_none() && after.is_some())
            .count();

        table.insert_numeric("capacity", filled);
        table.insert_numeric(CAPACITY_IMPUTED, flags);
    }

    /// Step 3: per review-score field, zero means unrated. Flag real
    /// ratings, then fill the gaps with the field median.
    fn impute_review_scores(&self, table: &mut CityTable) {
        for (column, flag_column) in REVIEW_SCORE_FLAGS {
            if table.has_column(flag_column) {
                continue;
            }
            let Some(raw) = table.numeric(column) else {
                continue;
            };

            let pre: Vec<Option<f64>> = raw
                .iter()
                .map(|v| match v {
                    Some(x) if *x != 0.0 => Some(*x),
                    _ => None,
                })
                .collect();
            let flags: Vec<Option<f64>> = pre
                .iter()
                .map(|v| Some(if v.is_some() { 1.0 } else { 0.0 }))
                .collect();

            let known: Vec<f64> = pre.iter().filter_map(|v| *v).collect();
            let fill = stats::median(&known);
            let filled: Vec<Option<f64>> =
                pre.into_iter().map(|v| v.or(fill)).collect();

            table.insert_numeric(column, filled);
            table.insert_numeric(flag_column, flags);
        }
    }

    /// Step 4: host listing count 0 is missing; impute with the column
    /// median. The entire-unit count is left alone: zero entire-unit
    /// listings is a real category consumed by the specialization bin.
    fn impute_host_listings(&self, table: &mut CityTable, report: &mut CleanReport) {
        if table.has_column(HOST_LISTINGS_IMPUTED) {
            return;
        }
        let Some(raw) = table.numeric("host_listings") else {
            return;
        };

        let pre: Vec<Option<f64>> = raw
            .iter()
            .map(|v| match v {
                Some(x) if *x != 0.0 => Some(*x),
                _ => None,
            })
            .collect();
        let flags: Vec<Option<f64>> = pre
            .iter()
            .map(|v| Some(if v.is_none() { 1.0 } else { 0.0 }))
            .collect();

        let known: Vec<f64> = pre.iter().filter_map(|v| *v).collect();
        let fill = stats::median(&known);
        let filled: Vec<Option<f64>> = pre
            .iter()
            .map(|v| v.or(fill))
            .collect();

        report.host_listings_imputed = pre
            .iter()
            .zip(&filled)
            .filter(|(before, after)| before.is_none() && after.is_some())
            .count();

        table.insert_numeric("host_listings", filled);
        table.insert_numeric(HOST_LISTINGS_IMPUTED, flags);
    }

    /// Step 5: price arrives as raw text. Strip the currency symbol and
    /// thousands separators, parse, and drop rows that end up missing or
    /// nonpositive. On an already-cleaned table the column is numeric and
    /// only the (vacuous) filter reruns.
    fn normalize_price(&self, table: &mut CityTable, report: &mut CleanReport) {
        if let Some(text) = table.text("price") {
            let parsed: Vec<Option<f64>> = text
                .iter()
                .map(|cell| cell.as_deref().and_then(parse_price))
                .collect();
            table.insert_numeric("price", parsed);
        }
        let Some(price) = table.numeric("price") else {
            return;
        };

        let mut keep = Vec::with_capacity(price.len());
        for v in price {
            match v {
                Some(x) if *x > 0.0 => keep.push(true),
                Some(_) => {
                    report.price_nonpositive += 1;
                    keep.push(false);
                }
                None => {
                    report.price_unparseable += 1;
                    keep.push(false);
                }
            }
        }
        table.retain_rows(&keep);
    }

    /// Step 6: classify every surviving price, remove the impossible and
    /// likely-error rows, and derive log price. Runs once; the tag column
    /// is the marker.
    fn screen_price_outliers(&self, table: &mut CityTable, report: &mut CleanReport) {
        if table.has_column(OUTLIER_CLASS) {
            return;
        }
        let Some(price) = table.numeric("price") else {
            return;
        };
        let rows = price.len();

        let mut sorted: Vec<f64> = price.iter().filter_map(|v| *v).collect();
        sorted.sort_by(f64::total_cmp);
        let (Some(q1), Some(q3), Some(p999)) = (
            stats::quantile_sorted(&sorted, 0.25),
            stats::quantile_sorted(&sorted, 0.75),
            stats::quantile_sorted(&sorted, self.config.error_tail_quantile),
        ) else {
            table.insert_text(OUTLIER_CLASS, vec![None; rows]);
            table.insert_numeric(LOG_PRICE, vec![None; rows]);
            return;
        };
        let iqr = q3 - q1;
        let lower = q1 - self.config.iqr_multiplier * iqr;
        let upper = q3 + self.config.iqr_multiplier * iqr;

        let mut classes: Vec<Option<String>> = Vec::with_capacity(price.len());
        let mut keep: Vec<bool> = Vec::with_capacity(price.len());
        for v in price {
            let Some(p) = *v else {
                classes.push(None);
                keep.push(false);
                continue;
            };
            let class = if p <= 0.0 {
                OutlierClass::Impossible
            } else if p > p999 && is_multiple_of(p, self.config.error_tail_multiple) {
                OutlierClass::LikelyError
            } else if p < lower || p > upper {
                OutlierClass::LegitExtreme
            } else {
                OutlierClass::Normal
            };
            match class {
                OutlierClass::Impossible => {
                    report.impossible_removed += 1;
                    keep.push(false);
                }
                OutlierClass::LikelyError => {
                    report.likely_error_removed += 1;
                    keep.push(false);
                }
                OutlierClass::LegitExtreme => {
                    report.legit_extreme_kept += 1;
                    keep.push(true);
                }
                OutlierClass::Normal => keep.push(true),
            }
            classes.push(Some(class.as_str().to_string()));
        }

        table.insert_text(OUTLIER_CLASS, classes);
        table.retain_rows(&keep);

        let Some(price) = table.numeric("price") else {
            return;
        };
        let log: Vec<Option<f64>> = price.iter().map(|v| v.map(f64::ln)).collect();
        table.insert_numeric(LOG_PRICE, log);
    }

    /// Step 7: capacity must be present and positive by now.
    fn require_capacity(&self, table: &mut CityTable, report: &mut CleanReport) {
        let Some(capacity) = table.numeric("capacity") else {
            return;
        };
        let keep: Vec<bool> = capacity
            .iter()
            .map(|v| matches!(v, Some(x) if *x > 0.0))
            .collect();
        report.capacity_dropped = keep.iter().filter(|k| !**k).count();
        table.retain_rows(&keep);
    }

    /// Step 8: fixed categorical bins for the scale analyses.
    fn derive_bins(&self, table: &mut CityTable) {
        if let Some(values) = table.numeric("host_listings") {
            let labels: Vec<Option<String>> = values
                .iter()
                .map(|v| {
                    v.and_then(|x| self.config.host_scale_bins.label_for(x))
                        .map(str::to_string)
                })
                .collect();
            table.insert_text(HOST_SCALE_BIN, labels);
        }
        if let Some(values) = table.numeric("entire_unit_listings") {
            let labels: Vec<Option<String>> = values
                .iter()
                .map(|v| {
                    v.and_then(|x| self.config.specialization_bins.label_for(x))
                        .map(str::to_string)
                })
                .collect();
            table.insert_text(SPECIALIZATION_BIN, labels);
        }
    }
}

/// Strip currency formatting and parse. `None` for anything that is not a
/// finite number afterwards.
fn parse_price(raw: &str) -> Option<f64> {
    let stripped: String = raw.chars().filter(|c| *c != '$' && *c != ',').collect();
    let trimmed = stripped.trim();
    if trimmed.is_empty() {
        return None;
    }
    match fast_float::parse::<f64, _>(trimmed) {
        Ok(v) if v.is_finite() => Some(v),
        _ => None,
    }
}

/// Exact multiple test with a small float tolerance.
fn is_multiple_of(value: f64, step: f64) -> bool {
    if step <= 0.0 {
        return false;
    }
    let rem = value.rem_euclid(step);
    rem < 1e-9 || (step - rem) < 1e-9
}
