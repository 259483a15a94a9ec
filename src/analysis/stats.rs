//! Rank-based hypothesis tests and descriptive helpers
//!
//! Everything here is nonparametric on purpose: nightly-rate distributions
//! are heavy-tailed and a t-test on raw prices would be driven by a handful
//! of penthouses. Two-group comparisons use the rank-sum test with the
//! normal approximation (tie and continuity corrected), multi-group
//! comparisons use the tie-corrected rank omnibus statistic against a
//! chi-squared reference, and ordered associations use rank correlation
//! with a Student-t p-value.
//!
//! Gate misses (empty group, fewer than three eligible groups) return
//! `Ok(None)`: the comparison was never attempted. Degenerate inputs that
//! defeat the math (zero rank variance) are errors, so the caller can
//! record a failed test instead of silently skipping it.

use statrs::distribution::{ChiSquared, ContinuousCDF, Normal, StudentsT};
use std::collections::BTreeMap;

/// Why a statistic could not be computed.
#[derive(Debug, Clone, PartialEq)]
pub enum StatTestError {
    /// Input has no variation left to test.
    DegenerateSample(&'static str),
    TooFewSamples { actual: usize, required: usize },
    LengthMismatch { x: usize, y: usize },
    /// Design matrix is rank deficient.
    SingularDesign,
}

impl std::fmt::Display for StatTestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DegenerateSample(what) => write!(f, "degenerate sample: {}", what),
            Self::TooFewSamples { actual, required } => {
                write!(f, "too few samples: {} (need at least {})", actual, required)
            }
            Self::LengthMismatch { x, y } => {
                write!(f, "length mismatch: x has {} values, y has {}", x, y)
            }
            Self::SingularDesign => write!(f, "design matrix is singular"),
        }
    }
}

impl std::error::Error for StatTestError {}

/// Sample median. `None` on empty input.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Some(sorted[mid])
    } else {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    }
}

/// Linearly interpolated quantile of an already-sorted slice.
pub fn quantile_sorted(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let q = q.clamp(0.0, 1.0);
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        return Some(sorted[lo]);
    }
    let frac = pos - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Sample standard deviation (n - 1 denominator). `None` below two values.
pub fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let ss: f64 = values.iter().map(|v| (v - m) * (v - m)).sum();
    Some((ss / (values.len() - 1) as f64).sqrt())
}

/// One-based ranks with ties assigned the mean of their rank range.
pub fn midranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0.0; values.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        let rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = rank;
        }
        i = j + 1;
    }
    ranks
}

/// Sum of t^3 - t over tie groups of a sorted slice.
fn tie_term(sorted: &[f64]) -> f64 {
    let mut sum = 0.0;
    let mut i = 0;
    while i < sorted.len() {
        let mut j = i;
        while j + 1 < sorted.len() && sorted[j + 1] == sorted[i] {
            j += 1;
        }
        let t = (j - i + 1) as f64;
        sum += t * t * t - t;
        i = j + 1;
    }
    sum
}

/// Two-group rank-sum comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct RankSumTest {
    /// U statistic of the first group.
    pub statistic: f64,
    /// Two-sided p-value from the normal approximation.
    pub p_value: f64,
    pub median_a: f64,
    pub median_b: f64,
    /// median_a / median_b; `None` when the second median is not positive.
    pub ratio_of_medians: Option<f64>,
}

/// Rank-sum test of `a` against `b`.
///
/// Either group empty means the comparison does not apply and yields
/// `Ok(None)`. Zero rank variance (every value identical) is an error.
pub fn rank_sum(a: &[f64], b: &[f64]) -> Result<Option<RankSumTest>, StatTestError> {
    if a.is_empty() || b.is_empty() {
        return Ok(None);
    }
    let (Some(median_a), Some(median_b)) = (median(a), median(b)) else {
        return Ok(None);
    };

    let n1 = a.len() as f64;
    let n2 = b.len() as f64;
    let n = n1 + n2;

    let mut combined = Vec::with_capacity(a.len() + b.len());
    combined.extend_from_slice(a);
    combined.extend_from_slice(b);
    let ranks = midranks(&combined);
    let rank_sum_a: f64 = ranks[..a.len()].iter().sum();
    let u1 = rank_sum_a - n1 * (n1 + 1.0) / 2.0;

    let mut sorted = combined;
    sorted.sort_by(f64::total_cmp);
    let variance = n1 * n2 / 12.0 * ((n + 1.0) - tie_term(&sorted) / (n * (n - 1.0)));
    if variance <= 0.0 {
        return Err(StatTestError::DegenerateSample("rank-sum variance is zero"));
    }

    let mean_u = n1 * n2 / 2.0;
    // Continuity correction; z pinned at zero when U sits on its mean.
    let z = ((u1 - mean_u).abs() - 0.5).max(0.0) / variance.sqrt();
    let normal = Normal::new(0.0, 1.0)
        .map_err(|_| StatTestError::DegenerateSample("standard normal"))?;
    let p_value = (2.0 * (1.0 - normal.cdf(z))).clamp(0.0, 1.0);

    let ratio_of_medians = (median_b > 0.0).then(|| median_a / median_b);

    Ok(Some(RankSumTest {
        statistic: u1,
        p_value,
        median_a,
        median_b,
        ratio_of_medians,
    }))
}

/// Multi-group rank omnibus comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct RankOmnibusTest {
    /// Tie-corrected H statistic.
    pub statistic: f64,
    pub p_value: f64,
    /// Median per input group, including groups too small to enter the test.
    pub group_medians: BTreeMap<String, f64>,
}

/// Rank omnibus test over labeled groups.
///
/// Groups below `min_group_size` stay out of the statistic but still get a
/// median. Fewer than three eligible groups yields `Ok(None)`.
pub fn rank_omnibus(
    groups: &[(String, Vec<f64>)],
    min_group_size: usize,
) -> Result<Option<RankOmnibusTest>, StatTestError> {
    let eligible: Vec<(&str, &[f64])> = groups
        .iter()
        .filter(|(_, values)| values.len() >= min_group_size)
        .map(|(label, values)| (label.as_str(), values.as_slice()))
        .collect();
    if eligible.len() < 3 {
        return Ok(None);
    }

    let total: usize = eligible.iter().map(|(_, values)| values.len()).sum();
    let n = total as f64;
    let mut combined = Vec::with_capacity(total);
    for (_, values) in &eligible {
        combined.extend_from_slice(values);
    }
    let ranks = midranks(&combined);

    let mut rank_sq_sum = 0.0;
    let mut offset = 0;
    for (_, values) in &eligible {
        let len = values.len();
        let sum: f64 = ranks[offset..offset + len].iter().sum();
        rank_sq_sum += sum * sum / len as f64;
        offset += len;
    }
    let mut h = 12.0 / (n * (n + 1.0)) * rank_sq_sum - 3.0 * (n + 1.0);

    let mut sorted = combined;
    sorted.sort_by(f64::total_cmp);
    let correction = 1.0 - tie_term(&sorted) / (n * n * n - n);
    if correction <= 0.0 {
        return Err(StatTestError::DegenerateSample("all group values identical"));
    }
    h /= correction;

    let df = (eligible.len() - 1) as f64;
    let chi = ChiSquared::new(df).map_err(|_| StatTestError::DegenerateSample("chi-squared"))?;
    let p_value = (1.0 - chi.cdf(h.max(0.0))).clamp(0.0, 1.0);

    let mut group_medians = BTreeMap::new();
    for (label, values) in groups {
        if let Some(m) = median(values) {
            group_medians.insert(label.clone(), m);
        }
    }

    Ok(Some(RankOmnibusTest {
        statistic: h,
        p_value,
        group_medians,
    }))
}

/// Rank correlation with its two-sided p-value.
#[derive(Debug, Clone, PartialEq)]
pub struct AssociationTest {
    pub correlation: f64,
    pub p_value: f64,
}

/// Monotonic association between paired samples: rank correlation with a
/// Student-t p-value on n - 2 degrees of freedom. A perfect monotone
/// relation reports p = 0 directly.
pub fn monotonic_association(x: &[f64], y: &[f64]) -> Result<AssociationTest, StatTestError> {
    if x.len() != y.len() {
        return Err(StatTestError::LengthMismatch { x: x.len(), y: y.len() });
    }
    if x.len() < 3 {
        return Err(StatTestError::TooFewSamples { actual: x.len(), required: 3 });
    }

    let rx = midranks(x);
    let ry = midranks(y);
    // Midranks always sum to n(n+1)/2, so the mean rank is exact.
    let mean_rank = (x.len() as f64 + 1.0) / 2.0;

    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for i in 0..x.len() {
        let dx = rx[i] - mean_rank;
        let dy = ry[i] - mean_rank;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    if sxx <= 0.0 || syy <= 0.0 {
        return Err(StatTestError::DegenerateSample("constant ranks"));
    }

    let correlation = (sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0);
    if correlation.abs() >= 1.0 {
        return Ok(AssociationTest {
            correlation,
            p_value: 0.0,
        });
    }

    let df = x.len() as f64 - 2.0;
    let t = correlation * (df / (1.0 - correlation * correlation)).sqrt();
    let dist = StudentsT::new(0.0, 1.0, df)
        .map_err(|_| StatTestError::DegenerateSample("t distribution"))?;
    let p_value = (2.0 * (1.0 - dist.cdf(t.abs()))).clamp(0.0, 1.0);

    Ok(AssociationTest {
        correlation,
        p_value,
    })
}
