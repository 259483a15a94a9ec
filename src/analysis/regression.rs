//! Interaction regression
//!
//! One job: does the capacity-price slope differ for entire units versus
//! shared ones? Ordinary least squares on
//! `price ~ capacity + entire + capacity * entire`, solved by the normal
//! equations. The inverse of X'X is computed explicitly rather than going
//! through a least-squares solver: a rank-deficient design (say every row
//! is an entire unit) must surface as a singularity, not as a quietly
//! pseudo-inverted fit. The interaction coefficient and its t-test are the
//! only outputs anyone reads.

use super::stats::StatTestError;
use nalgebra::{DMatrix, DVector};
use statrs::distribution::{ContinuousCDF, StudentsT};

const PARAMS: usize = 4;
const INTERACTION_IDX: usize = 3;

/// Fitted interaction term of `price ~ capacity * entire`.
#[derive(Debug, Clone, PartialEq)]
pub struct InteractionModel {
    /// Coefficient of the capacity-by-entire interaction column.
    pub coefficient: f64,
    pub std_error: f64,
    pub t_statistic: f64,
    /// Two-sided p-value on n - 4 degrees of freedom.
    pub p_value: f64,
    pub n: usize,
}

/// Fit the interaction model. `entire` is a 0/1 indicator per row.
pub fn fit_interaction(
    price: &[f64],
    capacity: &[f64],
    entire: &[f64],
) -> Result<InteractionModel, StatTestError> {
    if price.len() != capacity.len() {
        return Err(StatTestError::LengthMismatch {
            x: price.len(),
            y: capacity.len(),
        });
    }
    if price.len() != entire.len() {
        return Err(StatTestError::LengthMismatch {
            x: price.len(),
            y: entire.len(),
        });
    }
    let n = price.len();
    // One residual degree of freedom at minimum.
    if n < PARAMS + 1 {
        return Err(StatTestError::TooFewSamples {
            actual: n,
            required: PARAMS + 1,
        });
    }

    let mut design = Vec::with_capacity(n * PARAMS);
    for i in 0..n {
        design.push(1.0);
        design.push(capacity[i]);
        design.push(entire[i]);
        design.push(capacity[i] * entire[i]);
    }
    let x = DMatrix::from_row_slice(n, PARAMS, &design);
    let y = DVector::from_column_slice(price);

    let xtx = x.transpose() * &x;
    let xty = x.transpose() * &y;
    let inv = xtx.try_inverse().ok_or(StatTestError::SingularDesign)?;
    let beta = &inv * xty;

    let residual = &y - &x * &beta;
    let rss = residual.norm_squared();
    let df = (n - PARAMS) as f64;
    let sigma_sq = rss / df;

    let var = sigma_sq * inv[(INTERACTION_IDX, INTERACTION_IDX)];
    if !(var > 0.0) {
        return Err(StatTestError::DegenerateSample(
            "zero variance for interaction coefficient",
        ));
    }
    let std_error = var.sqrt();
    let coefficient = beta[INTERACTION_IDX];
    let t_statistic = coefficient / std_error;

    let dist = StudentsT::new(0.0, 1.0, df)
        .map_err(|_| StatTestError::DegenerateSample("t distribution"))?;
    let p_value = (2.0 * (1.0 - dist.cdf(t_statistic.abs()))).clamp(0.0, 1.0);

    Ok(InteractionModel {
        coefficient,
        std_error,
        t_statistic,
        p_value,
        n,
    })
}
