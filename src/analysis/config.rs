//! Analysis configuration
//!
//! One explicit value object carrying every threshold the pipeline uses.
//! Components receive it by reference; nothing reads ambient state.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Configuration for the full cross-city analysis pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Minimum rows a city must retain after cleaning for the battery to run.
    #[serde(default = "default_min_city_sample")]
    pub min_city_sample: usize,

    /// Fixed significance threshold; `significant == (p < level)` everywhere.
    #[serde(default = "default_significance_level")]
    pub significance_level: f64,

    /// Multiplier on the interquartile range when flagging price outliers.
    #[serde(default = "default_iqr_multiplier")]
    pub iqr_multiplier: f64,

    /// Minimum per-group sample for the multi-group rank test.
    #[serde(default = "default_min_group_size")]
    pub min_group_size: usize,

    /// Inclusive capacity range for the capacity/price association.
    #[serde(default = "default_capacity_bounds")]
    pub capacity_bounds: [f64; 2],

    /// Quantile above which a round-number price is treated as a data error.
    #[serde(default = "default_error_tail_quantile")]
    pub error_tail_quantile: f64,

    /// Round-number step for the tail heuristic (exact multiples flagged).
    #[serde(default = "default_error_tail_multiple")]
    pub error_tail_multiple: f64,

    /// Bins over the host listing count (left-inclusive fixed edges).
    #[serde(default = "default_host_scale_bins")]
    pub host_scale_bins: BinSpec,

    /// Bins over the entire-unit listing count (left-inclusive fixed edges).
    #[serde(default = "default_specialization_bins")]
    pub specialization_bins: BinSpec,

    /// Optional override of the canonical-field variant-name table.
    /// Keys are canonical field names, values are ordered variant lists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_variants: Option<BTreeMap<String, Vec<String>>>,
}

fn default_min_city_sample() -> usize {
    100
}

fn default_significance_level() -> f64 {
    0.05
}

fn default_iqr_multiplier() -> f64 {
    1.5
}

fn default_min_group_size() -> usize {
    10
}

fn default_capacity_bounds() -> [f64; 2] {
    [1.0, 10.0]
}

fn default_error_tail_quantile() -> f64 {
    0.999
}

fn default_error_tail_multiple() -> f64 {
    10.0
}

fn default_host_scale_bins() -> BinSpec {
    BinSpec {
        edges: vec![0.0, 1.0, 3.0, 5.0, f64::INFINITY],
        labels: vec![
            "1".to_string(),
            "2-3".to_string(),
            "4-5".to_string(),
            ">5".to_string(),
        ],
    }
}

fn default_specialization_bins() -> BinSpec {
    BinSpec {
        edges: vec![-0.5, 0.5, 1.5, f64::INFINITY],
        labels: vec!["0".to_string(), "1".to_string(), "2+".to_string()],
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            min_city_sample: default_min_city_sample(),
            significance_level: default_significance_level(),
            iqr_multiplier: default_iqr_multiplier(),
            min_group_size: default_min_group_size(),
            capacity_bounds: default_capacity_bounds(),
            error_tail_quantile: default_error_tail_quantile(),
            error_tail_multiple: default_error_tail_multiple(),
            host_scale_bins: default_host_scale_bins(),
            specialization_bins: default_specialization_bins(),
            field_variants: None,
        }
    }
}

impl AnalysisConfig {
    /// Load from a TOML file. Missing keys fall back to defaults.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check internal consistency of the thresholds and bin tables.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(0.0 < self.significance_level && self.significance_level < 1.0) {
            anyhow::bail!(
                "significance_level must lie in (0, 1), got {}",
                self.significance_level
            );
        }
        if self.iqr_multiplier <= 0.0 {
            anyhow::bail!("iqr_multiplier must be positive, got {}", self.iqr_multiplier);
        }
        if !(0.0 < self.error_tail_quantile && self.error_tail_quantile < 1.0) {
            anyhow::bail!(
                "error_tail_quantile must lie in (0, 1), got {}",
                self.error_tail_quantile
            );
        }
        if self.capacity_bounds[0] > self.capacity_bounds[1] {
            anyhow::bail!(
                "capacity_bounds must be ordered, got [{}, {}]",
                self.capacity_bounds[0],
                self.capacity_bounds[1]
            );
        }
        self.host_scale_bins
            .validate()
            .map_err(|e| anyhow::anyhow!("host_scale_bins: {}", e))?;
        self.specialization_bins
            .validate()
            .map_err(|e| anyhow::anyhow!("specialization_bins: {}", e))?;
        Ok(())
    }
}

/// Fixed-edge binning table. Edges define `len(labels)` intervals; interval
/// `i` is `(edges[i], edges[i+1]]`, with the first interval also including
/// its left edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinSpec {
    pub edges: Vec<f64>,
    pub labels: Vec<String>,
}

impl BinSpec {
    pub fn validate(&self) -> Result<(), String> {
        if self.edges.len() != self.labels.len() + 1 {
            return Err(format!(
                "expected {} edges for {} labels, got {}",
                self.labels.len() + 1,
                self.labels.len(),
                self.edges.len()
            ));
        }
        if self.edges.windows(2).any(|w| w[0] >= w[1]) {
            return Err("edges must be strictly increasing".to_string());
        }
        Ok(())
    }

    /// Label for a value, or `None` when it falls outside every interval.
    pub fn label_for(&self, value: f64) -> Option<&str> {
        if value.is_nan() || self.edges.is_empty() {
            return None;
        }
        if value == self.edges[0] {
            return self.labels.first().map(String::as_str);
        }
        for (i, window) in self.edges.windows(2).enumerate() {
            if value > window[0] && value <= window[1] {
                return self.labels.get(i).map(String::as_str);
            }
        }
        None
    }
}
