//! StayScope Library
//!
//! Exposes the cross-city analysis pipeline for use by binaries and tests.

pub mod analysis;

// Re-export the batch surface at crate root for compatibility
pub use analysis::{AnalysisConfig, BatchDriver, BatchOptions, BatchReport, ResultsStore};
