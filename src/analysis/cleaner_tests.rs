//! Cleaning Pipeline Tests
//!
//! These tests verify that:
//! 1. Currency-formatted prices parse and bad rows are dropped, not coerced
//! 2. The round-number tail heuristic removes likely errors but keeps
//!    legitimate extremes
//! 3. Imputation fills capacity, review scores, and host listing counts by
//!    the documented median rules and records flags
//! 4. The entire-unit listing count keeps its zeros for the specialization bin
//! 5. The pipeline is idempotent on already-cleaned data

use crate::analysis::cleaner::{
    DatasetCleaner, CAPACITY_IMPUTED, HAS_REVIEWS, HOST_LISTINGS_IMPUTED, HOST_SCALE_BIN,
    LOG_PRICE, OUTLIER_CLASS, SPECIALIZATION_BIN,
};
use crate::analysis::config::AnalysisConfig;
use crate::analysis::table::CityTable;

fn cleaner() -> DatasetCleaner {
    DatasetCleaner::new(AnalysisConfig::default())
}

fn text_column(values: &[Option<&str>]) -> Vec<Option<String>> {
    values.iter().map(|v| v.map(str::to_string)).collect()
}

// =============================================================================
// Price normalization and outlier screening
// =============================================================================

#[test]
fn test_price_parsing_drops_bad_rows() {
    let mut table = CityTable::new(6);
    table.insert_text(
        "price",
        text_column(&[
            Some("$1,200.00"),
            Some("free"),
            Some("95"),
            Some("-5"),
            None,
            Some("1205"),
        ]),
    );
    table.insert_numeric("capacity", vec![Some(2.0); 6]);

    let report = cleaner().clean(&mut table);

    assert_eq!(report.rows_in, 6);
    assert_eq!(report.rows_out, 3);
    assert_eq!(report.price_unparseable, 2); // "free" and the missing cell
    assert_eq!(report.price_nonpositive, 1);
    assert_eq!(
        table.numeric("price").unwrap(),
        &[Some(1200.0), Some(95.0), Some(1205.0)]
    );
    let log = table.numeric(LOG_PRICE).unwrap();
    assert!((log[0].unwrap() - 1200.0f64.ln()).abs() < 1e-12);
}

#[test]
fn test_round_number_tail_removed_but_extreme_kept() {
    // 100 ordinary prices plus two extremes: 5000 is a round number beyond
    // the tail quantile, 4999 is merely expensive.
    let mut prices: Vec<Option<String>> =
        (0..100).map(|i| Some(format!("{}", 101 + i))).collect();
    prices.push(Some("5000".to_string()));
    prices.push(Some("4999".to_string()));
    let rows = prices.len();

    let mut table = CityTable::new(rows);
    table.insert_text("price", prices);
    table.insert_numeric("capacity", vec![Some(2.0); rows]);

    let report = cleaner().clean(&mut table);

    assert_eq!(report.likely_error_removed, 1);
    assert_eq!(report.legit_extreme_kept, 1);
    assert_eq!(report.impossible_removed, 0);
    assert_eq!(report.rows_out, 101);

    let price = table.numeric("price").unwrap();
    assert!(price.iter().all(|p| *p != Some(5000.0)));
    assert!(price.contains(&Some(4999.0)));

    let class = table.text(OUTLIER_CLASS).unwrap();
    let kept_extreme = price
        .iter()
        .zip(class)
        .find(|(p, _)| **p == Some(4999.0))
        .and_then(|(_, c)| c.as_deref());
    assert_eq!(kept_extreme, Some("legit_extreme"));
}

// =============================================================================
// Imputation rules
// =============================================================================

#[test]
fn test_capacity_imputed_by_room_category_with_global_fallback() {
    let mut table = CityTable::new(5);
    table.insert_text(
        "price",
        text_column(&[Some("101"), Some("111"), Some("121"), Some("131"), Some("141")]),
    );
    table.insert_numeric(
        "capacity",
        vec![Some(0.0), Some(2.0), Some(4.0), None, None],
    );
    table.insert_text(
        "room_category",
        text_column(&[Some("A"), Some("A"), Some("A"), Some("B"), None]),
    );

    let report = cleaner().clean(&mut table);

    assert_eq!(report.rows_out, 5);
    assert_eq!(report.capacity_imputed, 3); // zero row, B row, uncategorized row
    // Group A median is 3; B has no usable values so the global median (3)
    // fills it, as it does the uncategorized row.
    assert_eq!(
        table.numeric("capacity").unwrap(),
        &[Some(3.0), Some(2.0), Some(4.0), Some(3.0), Some(3.0)]
    );
    assert_eq!(
        table.numeric(CAPACITY_IMPUTED).unwrap(),
        &[Some(1.0), Some(0.0), Some(0.0), Some(1.0), Some(1.0)]
    );
}

#[test]
fn test_unfillable_capacity_rows_are_dropped() {
    let mut table = CityTable::new(2);
    table.insert_text("price", text_column(&[Some("101"), Some("111")]));
    table.insert_numeric("capacity", vec![Some(0.0), None]);

    let report = cleaner().clean(&mut table);

    assert_eq!(report.rows_out, 0);
    assert_eq!(report.capacity_dropped, 2);
    assert_eq!(report.capacity_imputed, 0);
}

#[test]
fn test_review_score_zero_means_unrated() {
    let mut table = CityTable::new(4);
    table.insert_text(
        "price",
        text_column(&[Some("101"), Some("111"), Some("121"), Some("131")]),
    );
    table.insert_numeric("capacity", vec![Some(2.0); 4]);
    table.insert_numeric(
        "review_rating",
        vec![Some(5.0), Some(0.0), None, Some(4.0)],
    );

    cleaner().clean(&mut table);

    // Median of the real ratings {5, 4} is 4.5.
    assert_eq!(
        table.numeric("review_rating").unwrap(),
        &[Some(5.0), Some(4.5), Some(4.5), Some(4.0)]
    );
    assert_eq!(
        table.numeric("has_rating_review").unwrap(),
        &[Some(1.0), Some(0.0), Some(0.0), Some(1.0)]
    );
}

#[test]
fn test_host_listings_imputed_but_entire_unit_zeros_survive() {
    let mut table = CityTable::new(3);
    table.insert_text("price", text_column(&[Some("101"), Some("111"), Some("121")]));
    table.insert_numeric("capacity", vec![Some(2.0); 3]);
    table.insert_numeric("host_listings", vec![Some(0.0), Some(2.0), Some(6.0)]);
    table.insert_numeric(
        "entire_unit_listings",
        vec![Some(0.0), Some(1.0), Some(3.0)],
    );

    let report = cleaner().clean(&mut table);

    assert_eq!(report.host_listings_imputed, 1);
    // Median of {2, 6} fills the zero.
    assert_eq!(
        table.numeric("host_listings").unwrap(),
        &[Some(4.0), Some(2.0), Some(6.0)]
    );
    assert_eq!(
        table.numeric(HOST_LISTINGS_IMPUTED).unwrap(),
        &[Some(1.0), Some(0.0), Some(0.0)]
    );
    // Zero entire-unit listings is a category, not a gap.
    assert_eq!(
        table.numeric("entire_unit_listings").unwrap(),
        &[Some(0.0), Some(1.0), Some(3.0)]
    );
    let spec_bin = table.text(SPECIALIZATION_BIN).unwrap();
    assert_eq!(spec_bin[0].as_deref(), Some("0"));
    assert_eq!(spec_bin[1].as_deref(), Some("1"));
    assert_eq!(spec_bin[2].as_deref(), Some("2+"));
}

#[test]
fn test_recent_review_fill_and_has_reviews_flag() {
    let mut table = CityTable::new(3);
    table.insert_text("price", text_column(&[Some("101"), Some("111"), Some("121")]));
    table.insert_numeric("capacity", vec![Some(2.0); 3]);
    table.insert_numeric("reviews_total", vec![Some(3.0), Some(0.0), None]);
    table.insert_numeric("reviews_recent", vec![None, Some(2.0), None]);

    cleaner().clean(&mut table);

    assert_eq!(
        table.numeric("reviews_recent").unwrap(),
        &[Some(0.0), Some(2.0), Some(0.0)]
    );
    assert_eq!(
        table.numeric(HAS_REVIEWS).unwrap(),
        &[Some(1.0), Some(0.0), Some(0.0)]
    );
}

// =============================================================================
// Binning
// =============================================================================

#[test]
fn test_host_scale_bin_edges() {
    let counts = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 9.0];
    let rows = counts.len();
    let mut table = CityTable::new(rows);
    table.insert_text(
        "price",
        text_column(&[
            Some("101"),
            Some("111"),
            Some("121"),
            Some("131"),
            Some("141"),
            Some("151"),
            Some("161"),
        ]),
    );
    table.insert_numeric("capacity", vec![Some(2.0); rows]);
    table.insert_numeric(
        "host_listings",
        counts.iter().map(|c| Some(*c)).collect(),
    );

    cleaner().clean(&mut table);

    let bins: Vec<Option<&str>> = table
        .text(HOST_SCALE_BIN)
        .unwrap()
        .iter()
        .map(|v| v.as_deref())
        .collect();
    assert_eq!(
        bins,
        vec![
            Some("1"),
            Some("2-3"),
            Some("2-3"),
            Some("4-5"),
            Some("4-5"),
            Some(">5"),
            Some(">5"),
        ]
    );
}

// =============================================================================
// Idempotence and edge cases
// =============================================================================

#[test]
fn test_cleaning_twice_changes_nothing() {
    let mut table = CityTable::new(8);
    table.insert_text(
        "price",
        text_column(&[
            Some("$1,200.00"),
            Some("free"),
            Some("95"),
            Some("101"),
            Some("111"),
            Some("121"),
            Some("131"),
            Some("141"),
        ]),
    );
    table.insert_numeric(
        "capacity",
        vec![
            Some(2.0),
            Some(4.0),
            Some(0.0),
            Some(3.0),
            Some(2.0),
            None,
            Some(5.0),
            Some(2.0),
        ],
    );
    table.insert_text(
        "room_category",
        text_column(&[
            Some("Entire home/apt"),
            Some("Private room"),
            Some("Entire home/apt"),
            Some("Private room"),
            Some("Entire home/apt"),
            Some("Private room"),
            Some("Entire home/apt"),
            Some("Private room"),
        ]),
    );
    table.insert_numeric(
        "review_rating",
        vec![
            Some(5.0),
            Some(0.0),
            Some(4.0),
            None,
            Some(4.5),
            Some(3.5),
            Some(0.0),
            Some(4.8),
        ],
    );
    table.insert_numeric(
        "host_listings",
        vec![
            Some(1.0),
            Some(0.0),
            Some(2.0),
            Some(4.0),
            Some(1.0),
            Some(7.0),
            Some(2.0),
            Some(1.0),
        ],
    );
    table.insert_numeric(
        "entire_unit_listings",
        vec![
            Some(1.0),
            Some(0.0),
            Some(0.0),
            Some(2.0),
            Some(1.0),
            Some(5.0),
            Some(0.0),
            Some(1.0),
        ],
    );
    table.insert_numeric("reviews_total", vec![Some(10.0); 8]);
    table.insert_numeric("reviews_recent", vec![None; 8]);

    let c = cleaner();
    let first = c.clean(&mut table);
    let snapshot = table.clone();

    let second = c.clean(&mut table);

    assert_eq!(table, snapshot);
    assert_eq!(second.rows_in, first.rows_out);
    assert_eq!(second.rows_out, first.rows_out);
    assert_eq!(second.retained_fraction, 1.0);
    assert_eq!(second.price_unparseable, 0);
    assert_eq!(second.capacity_imputed, 0);
}

#[test]
fn test_empty_table_reports_full_retention() {
    let mut table = CityTable::new(0);
    let report = cleaner().clean(&mut table);
    assert_eq!(report.rows_in, 0);
    assert_eq!(report.rows_out, 0);
    assert_eq!(report.retained_fraction, 1.0);
}
