//! Integration tests for the multi-city batch pipeline
//!
//! These tests drive the public API end to end against synthetic listings
//! fixtures: plain and gzip-compressed city files with variant column
//! names, currency-formatted prices, an undersized city that must fail the
//! sample gate, and artifact recovery through the results store.
//!
//! Fixture data is generated from row indices only, so every run of every
//! test sees byte-identical inputs.

use std::fs;
use std::io::Write;
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;
use tempfile::TempDir;

use stayscope::analysis::aggregate::{EffectMeasure, GeneralizabilityTier};
use stayscope::analysis::batch::{BatchDriver, BatchOptions, BatchReport};
use stayscope::analysis::config::AnalysisConfig;
use stayscope::analysis::artifact::ResultsStore;
use stayscope::analysis::runner::CityStatus;

/// Synthetic listings export with real-world header variants. Prices are
/// currency-formatted (`"$1,234.56"`, quoted) to exercise the full parse
/// path, and every 13th listing is priced 8x to exercise the outlier
/// screen without tripping the round-number error heuristic.
fn city_csv(rows: usize, scale: f64) -> String {
    let mut out = String::from(
        "Price,accommodates,room_type,neighbourhood_group_cleansed,\
         calculated_host_listings_count,calculated_host_listings_count_entire_homes,\
         review_scores_rating,number_of_reviews,number_of_reviews_ltm,\
         availability_365,host_is_superhost\n",
    );
    for i in 0..rows {
        let capacity = 1 + i % 6;
        let entire = i % 2 == 0;
        let room = if entire { "Entire home/apt" } else { "Private room" };
        let region = ["Central", "North", "South"][i % 3];
        let base = if entire { 120.0 } else { 60.0 };
        let mut price =
            base + 18.0 * capacity as f64 + 12.0 * (i % 3) as f64 + (i % 7) as f64 + 0.37;
        if i % 13 == 0 {
            price *= 8.0;
        }
        price *= scale;
        let host_listings = 1 + i % 9;
        let entire_units = i % 4;
        let rating = 4.0 + (i % 10) as f64 / 10.0;
        let reviews = i % 50;
        let reviews_ltm = i % 12;
        let availability = 60 + (i * 7) % 240;
        let superhost = if i % 5 == 0 { "t" } else { "f" };
        out.push_str(&format!(
            "\"{}\",{},{},{},{},{},{:.1},{},{},{},{}\n",
            currency(price),
            capacity,
            room,
            region,
            host_listings,
            entire_units,
            rating,
            reviews,
            reviews_ltm,
            availability,
            superhost,
        ));
    }
    out
}

fn currency(price: f64) -> String {
    let formatted = format!("{:.2}", price);
    let (dollars, cents) = formatted.split_once('.').unwrap();
    let mut grouped = String::new();
    for (idx, ch) in dollars.chars().enumerate() {
        if idx > 0 && (dollars.len() - idx) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    format!("${grouped}.{cents}")
}

fn write_plain(dir: &Path, file_name: &str, content: &str) {
    fs::write(dir.join(file_name), content).unwrap();
}

fn write_gzip(dir: &Path, file_name: &str, content: &str) {
    let file = fs::File::create(dir.join(file_name)).unwrap();
    let mut encoder = GzEncoder::new(file, Compression::default());
    encoder.write_all(content.as_bytes()).unwrap();
    encoder.finish().unwrap();
}

/// Three viable cities (one gzipped, one with a separator in the file
/// name) plus one city below the sample gate.
fn standard_fixture(dir: &Path) {
    write_plain(dir, "alphalistings.csv", &city_csv(160, 1.0));
    write_gzip(dir, "betalistings.csv.gz", &city_csv(160, 1.2));
    write_plain(dir, "gamma_listings.csv", &city_csv(160, 0.9));
    write_plain(dir, "tinylistings.csv", &city_csv(12, 1.0));
}

fn run_batch(data: &Path, out: &Path, sequential: bool) -> BatchReport {
    let driver = BatchDriver::new(AnalysisConfig::default(), out);
    let options = BatchOptions {
        cities: Vec::new(),
        sequential,
    };
    driver.run(data, &options).unwrap()
}

#[test]
fn test_full_batch_replicates_patterns_across_cities() {
    let data = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    standard_fixture(data.path());

    let report = run_batch(data.path(), out.path(), false);

    assert_eq!(report.results.len(), 4);
    assert_eq!(report.successful_cities(), 3);

    let alpha = &report.results["alpha"];
    assert!(matches!(alpha.status, CityStatus::Completed));
    assert_eq!(alpha.sample_size, 160);
    assert_eq!(alpha.completed_tests(), 11);
    let clean = alpha.clean_report.as_ref().unwrap();
    assert_eq!(clean.rows_out, 160);
    assert_eq!(clean.legit_extreme_kept, 13);
    assert_eq!(clean.likely_error_removed, 0);

    let tiny = &report.results["tiny"];
    assert!(matches!(tiny.status, CityStatus::Failed));
    assert!(tiny
        .error
        .as_deref()
        .unwrap()
        .contains("insufficient sample"));

    let summary = &report.summary;
    assert_eq!(summary.total_cities, 4);
    assert_eq!(summary.run_summary.successful_cities, 3);
    assert_eq!(summary.run_summary.failed_cities, 1);

    // The privacy premium is baked into every viable city, so it must
    // replicate unanimously.
    let privacy = summary
        .consistency
        .iter()
        .find(|row| row.test_name == "privacy_premium")
        .unwrap();
    assert_eq!(privacy.scenario, 1);
    assert_eq!(privacy.total_cities, 3);
    assert_eq!(privacy.significant_cities, 3);
    assert!(privacy.is_universal);
    assert_eq!(privacy.tier, GeneralizabilityTier::Strong);

    // Price rises with capacity in every city, so the correlation shares a
    // sign everywhere.
    let capacity = summary
        .direction
        .iter()
        .find(|row| row.test_name == "capacity_premium")
        .unwrap();
    assert_eq!(capacity.total, 3);
    assert_eq!(capacity.positive, 3);
    assert!(capacity.direction_consistent);

    for row in &summary.consistency {
        assert!(row.significance_rate >= 0.0 && row.significance_rate <= 1.0);
        assert!(row.significant_cities <= row.total_cities);
        assert!(row.total_cities <= 3);
    }

    // Three contributing cities is exactly enough for dispersion rows.
    let capacity_spread = summary
        .effect_sizes
        .iter()
        .find(|row| {
            row.test_name == "capacity_premium" && row.measure == EffectMeasure::Correlation
        })
        .unwrap();
    assert_eq!(capacity_spread.stats.count, 3);
    assert!(capacity_spread.stats.min <= capacity_spread.stats.median);
    assert!(capacity_spread.stats.median <= capacity_spread.stats.max);

    let premium_spread = summary
        .effect_sizes
        .iter()
        .find(|row| {
            row.test_name == "privacy_premium" && row.measure == EffectMeasure::PremiumRatio
        })
        .unwrap();
    assert_eq!(premium_spread.stats.count, 3);
    assert!(premium_spread.stats.mean > 1.0);
}

#[test]
fn test_artifacts_are_written_and_internally_consistent() {
    let data = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    standard_fixture(data.path());

    run_batch(data.path(), out.path(), false);

    for name in [
        "alpha_results.json",
        "beta_results.json",
        "gamma_results.json",
        "tiny_results.json",
        "all_cities_results.json",
        "comparison_summary.json",
    ] {
        assert!(out.path().join(name).exists(), "missing artifact {name}");
    }

    // Every persisted significance flag must agree with its p-value at the
    // default 0.05 level.
    let alpha: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(out.path().join("alpha_results.json")).unwrap())
            .unwrap();
    assert_eq!(alpha["city_id"], "alpha");
    assert_eq!(alpha["status"], "completed");
    let mut checked = 0;
    for key in ["scenario1", "scenario2", "scenario3", "scenario4", "scenario5"] {
        for (_, test) in alpha[key].as_object().unwrap() {
            let Some(p) = test.get("p_value").and_then(|p| p.as_f64()) else {
                continue;
            };
            assert_eq!(test["significant"].as_bool().unwrap(), p < 0.05);
            checked += 1;
        }
    }
    assert_eq!(checked, 11);

    let summary: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(out.path().join("comparison_summary.json")).unwrap(),
    )
    .unwrap();
    assert!(summary["generated_at"].is_string());
    assert_eq!(summary["total_cities"], 4);
    let scenario1 = &summary["run_summary"]["scenario_statistics"]["scenario1"];
    assert_eq!(scenario1["cities_with_results"], 3);
    assert!(scenario1["total_tests"].as_u64().unwrap() >= scenario1["significant_tests"].as_u64().unwrap());
}

#[test]
fn test_gzip_is_preferred_when_both_formats_exist() {
    let data = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    // The plain file is an undersized stub; only the gzip variant can pass
    // the sample gate.
    write_plain(data.path(), "deltalistings.csv", &city_csv(12, 1.0));
    write_gzip(data.path(), "deltalistings.csv.gz", &city_csv(160, 1.0));

    let report = run_batch(data.path(), out.path(), true);

    assert_eq!(report.results.len(), 1);
    let delta = &report.results["delta"];
    assert!(matches!(delta.status, CityStatus::Completed));
    assert_eq!(delta.sample_size, 160);
}

#[test]
fn test_parallel_and_sequential_runs_produce_identical_artifacts() {
    let data = TempDir::new().unwrap();
    standard_fixture(data.path());

    let out_par = TempDir::new().unwrap();
    let out_seq = TempDir::new().unwrap();
    run_batch(data.path(), out_par.path(), false);
    run_batch(data.path(), out_seq.path(), true);

    let parallel = fs::read_to_string(out_par.path().join("all_cities_results.json")).unwrap();
    let sequential = fs::read_to_string(out_seq.path().join("all_cities_results.json")).unwrap();
    assert_eq!(parallel, sequential);
}

#[test]
fn test_results_store_recovers_saved_artifacts() {
    let data = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    standard_fixture(data.path());

    let report = run_batch(data.path(), out.path(), false);

    let store = ResultsStore::new(out.path());
    let alpha = store.load_city("alpha").unwrap().unwrap();
    assert_eq!(alpha.sample_size, report.results["alpha"].sample_size);
    assert!(matches!(alpha.status, CityStatus::Completed));
    assert!(store.load_city("atlantis").unwrap().is_none());

    let all = store.load_all_cities().unwrap().unwrap();
    assert_eq!(all.len(), 4);

    let summary = store.load_summary().unwrap().unwrap();
    assert_eq!(summary.total_cities, 4);
    assert_eq!(
        summary.run_summary.successful_cities,
        report.summary.run_summary.successful_cities
    );
}
