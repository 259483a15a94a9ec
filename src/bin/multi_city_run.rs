//! Multi-City Analysis Runner CLI
//!
//! Batch entrypoint: discovers city listings files, runs the five-scenario
//! pricing battery on every city, persists per-city and aggregate JSON
//! artifacts, and prints a console summary.
//!
//! # Usage
//!
//! ```bash
//! cargo run --release --bin multi_city_run -- \
//!   --data-dir ./data \
//!   --output-dir ./multi_city_results \
//!   --config analysis.toml
//! ```
//!
//! # Exit Codes
//!
//! - 0: Run completed with at least one successful city
//! - 1: Run completed but no city succeeded
//! - 2: Configuration or validation error
//! - 3: Runtime error (discovery, persistence, I/O)

use anyhow::Context;
use clap::Parser;
use stayscope::analysis::artifact::{ALL_CITIES_FILE, COMPARISON_FILE};
use stayscope::analysis::batch::{BatchDriver, BatchOptions, BatchReport};
use stayscope::analysis::config::AnalysisConfig;
use stayscope::analysis::runner::CityStatus;
use std::path::{Path, PathBuf};

/// Cross-city rental pricing analysis runner
#[derive(Parser, Debug)]
#[command(name = "multi_city_run")]
#[command(about = "Run the five-scenario pricing battery across every city dataset")]
struct Cli {
    /// Directory containing <city>listings.csv or <city>listings.csv.gz files
    #[arg(short, long, default_value = "data")]
    data_dir: PathBuf,

    /// Directory for per-city and aggregate JSON artifacts
    #[arg(short, long, default_value = "multi_city_results")]
    output_dir: PathBuf,

    /// Optional TOML analysis configuration
    #[arg(short, long, env = "STAYSCOPE_CONFIG")]
    config: Option<PathBuf>,

    /// Restrict the run to specific city ids (repeatable)
    #[arg(long = "city", value_name = "CITY_ID")]
    cities: Vec<String>,

    /// Process cities one at a time instead of across the thread pool
    #[arg(long)]
    sequential: bool,
}

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("stayscope=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("ERROR: {:#}", e);
            std::process::exit(2);
        }
    };

    let driver = BatchDriver::new(config, &cli.output_dir);
    let options = BatchOptions {
        cities: cli.cities.clone(),
        sequential: cli.sequential,
    };

    let report = match driver.run(&cli.data_dir, &options) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            std::process::exit(3);
        }
    };

    if report.results.is_empty() {
        eprintln!(
            "No city listings files found under {}",
            cli.data_dir.display()
        );
        eprintln!("Expected files named <city>listings.csv.gz or <city>listings.csv");
        std::process::exit(1);
    }

    let (exit_code, exit_reason) = if report.successful_cities() > 0 {
        (0, "run completed")
    } else {
        (1, "no city passed the minimum sample gate")
    };

    print_summary(&report, &cli.output_dir, exit_code, exit_reason);
    std::process::exit(exit_code);
}

fn load_config(path: Option<&Path>) -> anyhow::Result<AnalysisConfig> {
    match path {
        Some(path) => AnalysisConfig::load(path)
            .with_context(|| format!("invalid analysis config {}", path.display())),
        None => Ok(AnalysisConfig::default()),
    }
}

fn print_summary(report: &BatchReport, output_dir: &Path, exit_code: i32, exit_reason: &str) {
    let summary = &report.summary;

    eprintln!("\n{}", "=".repeat(70));
    eprintln!("MULTI-CITY ANALYSIS SUMMARY");
    eprintln!("{}", "=".repeat(70));

    for result in report.results.values() {
        match result.status {
            CityStatus::Completed => eprintln!(
                "{:<22} {:>7} listings  {:>3} tests",
                result.display_name,
                result.sample_size,
                result.completed_tests()
            ),
            _ => eprintln!(
                "{:<22} FAILED: {}",
                result.display_name,
                result.error.as_deref().unwrap_or("unknown")
            ),
        }
    }

    eprintln!("{}", "-".repeat(70));
    eprintln!(
        "Cities:             {} total, {} successful, {} failed",
        summary.run_summary.total_cities,
        summary.run_summary.successful_cities,
        summary.run_summary.failed_cities
    );
    eprintln!("Tests Completed:    {}", summary.total_tests);
    eprintln!("{}", "-".repeat(70));

    if summary.consistency.is_empty() {
        eprintln!("No cross-city patterns to score");
    } else {
        eprintln!("CROSS-CITY REPLICATION");
        for row in &summary.consistency {
            eprintln!(
                "  s{} {:<22} {:>2}/{:<2} significant ({:>5.1}%)  {}",
                row.scenario,
                row.test_name,
                row.significant_cities,
                row.total_cities,
                row.significance_rate * 100.0,
                row.tier.as_str()
            );
        }
    }

    eprintln!("{}", "-".repeat(70));
    eprintln!("Artifacts:          {}", output_dir.display());
    eprintln!("  per city          <city>_results.json");
    eprintln!("  combined          {}", ALL_CITIES_FILE);
    eprintln!("  comparison        {}", COMPARISON_FILE);
    eprintln!("{}", "-".repeat(70));
    eprintln!("Exit Code:          {}", exit_code);
    eprintln!("Exit Reason:        {}", exit_reason);
    eprintln!("{}", "=".repeat(70));
}
