//! Weighted geometric median (Weiszfeld iteration)
//!
//! The geometric median minimizes the sum of Euclidean distances to the
//! batch, so a minority of arbitrarily distant vectors can only pull it a
//! bounded amount. This is the reference point outliers are measured against.

use ndarray::Array1;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::check_batch;
use crate::error::AggregationError;
use crate::model::ModelVector;

/// Iteration budget and numerical guards for center estimation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CenterConfig {
    /// Hard cap on Weiszfeld steps
    pub max_iterations: usize,
    /// Stop once the center moves less than this (L2)
    pub tolerance: f64,
    /// Vectors closer than this to the estimate count as sitting on it
    pub min_distance: f64,
}

impl Default for CenterConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: 1e-7,
            min_distance: 1e-9,
        }
    }
}

/// Robust center of one round's batch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeometricCenter {
    /// The center estimate
    pub vector: ModelVector,
    /// Weiszfeld steps taken
    pub iterations: usize,
    /// Whether the step size fell below the tolerance within the budget
    pub converged: bool,
}

/// Unweighted geometric center. See [`compute_weighted_center`].
pub fn compute_center(
    vectors: &[ModelVector],
    prior_center: Option<&ModelVector>,
    config: &CenterConfig,
) -> Result<GeometricCenter, AggregationError> {
    compute_weighted_center(vectors, None, prior_center, config)
}

/// Weighted geometric center by Weiszfeld iteration.
///
/// Each step re-weights vector `i` by `w_i / d_i` where `d_i` is its
/// distance to the current estimate. The first estimate is `prior_center`
/// when supplied with the batch's length, otherwise the weighted arithmetic
/// mean.
///
/// An estimate that lands on data points (within `min_distance`) stops only
/// if it is the true median there, i.e. the pull of the other vectors does
/// not exceed the weight sitting on it. Otherwise it steps away using the
/// Vardi-Zhang modified update, so a vector placed on the seed cannot pin
/// the center.
///
/// Deterministic: distances are computed in parallel but reduced
/// sequentially in input order, so repeated calls return bit-identical
/// results.
///
/// # Arguments
///
/// * `vectors` - Batch of equal-length, finite vectors
/// * `weights` - Optional non-negative per-vector weights (e.g. sample counts)
/// * `prior_center` - Optional warm start, usually the previous round's center
/// * `config` - Iteration budget and numerical guards
pub fn compute_weighted_center(
    vectors: &[ModelVector],
    weights: Option<&[f32]>,
    prior_center: Option<&ModelVector>,
    config: &CenterConfig,
) -> Result<GeometricCenter, AggregationError> {
    if vectors.is_empty() {
        return Err(AggregationError::EmptyBatch);
    }
    if config.max_iterations == 0 {
        return Err(AggregationError::InvalidPolicy(
            "max_iterations must be positive".to_string(),
        ));
    }

    let dim = check_batch(vectors)?;
    let weights = normalize_weights(weights, vectors.len())?;

    let mut center = match prior_center {
        Some(prior) if prior.len() == dim && prior.is_finite() => prior.as_array().mapv(|x| x as f64),
        Some(prior) => {
            debug!(
                prior_len = prior.len(),
                dim, "Ignoring unusable prior center; seeding from mean"
            );
            weighted_mean(vectors, &weights, dim)
        }
        None => weighted_mean(vectors, &weights, dim),
    };

    let mut iterations = 0;
    let mut converged = false;

    while iterations < config.max_iterations {
        iterations += 1;

        let distances: Vec<f64> = vectors
            .par_iter()
            .map(|v| v.distance_to(&center))
            .collect();

        // Vectors within `min_distance` of the estimate are treated as
        // sitting on it and carry mass `eta` there (Vardi-Zhang)
        let mut numer = Array1::<f64>::zeros(dim);
        let mut denom = 0.0f64;
        let mut eta = 0.0f64;
        for ((v, &w), &d) in vectors.iter().zip(weights.iter()).zip(distances.iter()) {
            if d <= config.min_distance {
                eta += w;
                continue;
            }
            let coeff = w / d;
            numer.zip_mut_with(v.as_array(), |acc, &x| *acc += coeff * x as f64);
            denom += coeff;
        }

        if denom == 0.0 {
            // All weight sits on the estimate
            converged = true;
            break;
        }

        let next = if eta > 0.0 {
            // Resultant of unit pulls from the remaining vectors
            let pull = &numer - &(&center * denom);
            let r = pull.iter().map(|x| x * x).sum::<f64>().sqrt();
            if r <= eta {
                debug!(iterations, "Center is optimal at a data point");
                converged = true;
                break;
            }
            let gamma = eta / r;
            numer / denom * (1.0 - gamma) + &center * gamma
        } else {
            numer / denom
        };

        let shift = next
            .iter()
            .zip(center.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f64>()
            .sqrt();
        center = next;

        if shift <= config.tolerance {
            converged = true;
            break;
        }
    }

    debug!(iterations, converged, "Geometric center estimated");

    Ok(GeometricCenter {
        vector: ModelVector::from(center.mapv(|x| x as f32)),
        iterations,
        converged,
    })
}

fn normalize_weights(weights: Option<&[f32]>, n: usize) -> Result<Vec<f64>, AggregationError> {
    match weights {
        None => Ok(vec![1.0; n]),
        Some(w) => {
            if w.len() != n {
                return Err(AggregationError::InvalidPolicy(format!(
                    "{} weights for {} vectors",
                    w.len(),
                    n
                )));
            }
            if w.iter().any(|x| !x.is_finite() || *x < 0.0) {
                return Err(AggregationError::InvalidPolicy(
                    "weights must be finite and non-negative".to_string(),
                ));
            }
            let total: f64 = w.iter().map(|&x| x as f64).sum();
            if total <= 0.0 {
                return Err(AggregationError::InvalidPolicy(
                    "weights sum to zero".to_string(),
                ));
            }
            Ok(w.iter().map(|&x| x as f64 / total).collect())
        }
    }
}

fn weighted_mean(vectors: &[ModelVector], weights: &[f64], dim: usize) -> Array1<f64> {
    let mut sum = Array1::<f64>::zeros(dim);
    let mut total = 0.0f64;
    for (v, &w) in vectors.iter().zip(weights.iter()) {
        sum.zip_mut_with(v.as_array(), |acc, &x| *acc += w * x as f64);
        total += w;
    }
    sum / total
}
