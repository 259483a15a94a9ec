//! Cross-City Rental Pricing Analysis
//!
//! Deterministic batch engine that answers one question: which pricing
//! patterns replicate across short-term rental markets, and which are
//! quirks of a single city?
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         BatchDriver                             │
//! │  (discovers city files, fans out across rayon, persists)        │
//! └─────────────────────────────────────────────────────────────────┘
//!                                │ per city
//!                                ▼
//! ┌─────────────┐   ┌─────────────┐   ┌─────────────┐
//! │ loader      │──▶│ SchemaAdapter│──▶│ DatasetCleaner│
//! │ (csv/.gz)   │   │ (canonical) │   │ (8 steps)   │
//! └─────────────┘   └─────────────┘   └─────────────┘
//!                                │
//!                                ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    CityAnalysisRunner                           │
//! │  five scenario batteries over the cleaned CityTable             │
//! └─────────────────────────────────────────────────────────────────┘
//!                                │ all cities
//!                                ▼
//! ┌─────────────────┐                    ┌─────────────────┐
//! │ aggregate       │───────────────────▶│ ResultsStore    │
//! │ (replication)   │                    │ (atomic JSON)   │
//! └─────────────────┘                    └─────────────────┘
//! ```
//!
//! # Determinism Guarantees
//!
//! - **City order**: sorted ids, identical parallel or sequential
//! - **Cleaning**: fixed step order, idempotent on cleaned tables
//! - **Tests**: closed-form statistics, no sampling, no RNG
//! - **Artifacts**: `BTreeMap` keys, so JSON field order never shifts

pub mod aggregate;
pub mod artifact;
pub mod batch;
pub mod cleaner;
pub mod config;
pub mod loader;
pub mod regression;
pub mod runner;
pub mod scenarios;
pub mod schema;
pub mod stats;
pub mod table;

#[cfg(test)]
mod cleaner_tests;

// Re-exports for convenience
pub use aggregate::{ComparisonSummary, ConsistencyRow, DirectionRow, GeneralizabilityTier};
pub use artifact::{ResultsStore, StoreError};
pub use batch::{BatchDriver, BatchOptions, BatchReport};
pub use cleaner::{CleanReport, DatasetCleaner, OutlierClass};
pub use config::AnalysisConfig;
pub use loader::LoadError;
pub use runner::{CityAnalysisResult, CityAnalysisRunner, CityFailure, CityStatus};
pub use scenarios::{Scenario, ScenarioResults, TestResult, TestSlot};
pub use schema::{CanonicalField, PresenceMap, SchemaAdapter};
pub use stats::StatTestError;
pub use table::{CityTable, Column};
