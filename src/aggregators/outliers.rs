//! Distance-based outlier detection
//!
//! Each vector's Euclidean distance to the round's geometric center is
//! compared against a threshold chosen by an [`OutlierPolicy`].

use std::cmp::Ordering;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::check_batch;
use crate::error::AggregationError;
use crate::math::stats::median;
use crate::model::ModelVector;

/// How far from the center a vector may sit before it is rejected.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutlierPolicy {
    /// Reject `d > max(multiple * median(d), min_radius)`.
    ///
    /// When half or more of the batch sits exactly on the center the median
    /// distance is zero and the threshold falls to `min_radius`, so every
    /// vector that differs at all is rejected. Raise `min_radius` to the
    /// expected spread of honest updates when identical submissions are
    /// likely (quantised models, devices that skip training).
    MedianMultiple {
        /// Multiple of the median distance (must be positive)
        multiple: f64,
        /// Lower bound on the threshold, so a batch of near-identical
        /// vectors does not reject on rounding noise
        min_radius: f64,
    },
    /// Keep the `floor(n/2) + 1` closest vectors; ties go to the lower index
    ClosestMajority,
    /// Reject `d > radius`
    FixedRadius(f64),
}

impl Default for OutlierPolicy {
    fn default() -> Self {
        OutlierPolicy::MedianMultiple {
            multiple: 3.0,
            min_radius: 1e-6,
        }
    }
}

impl OutlierPolicy {
    /// Reject non-positive or non-finite parameters.
    pub fn validate(&self) -> Result<(), AggregationError> {
        match *self {
            OutlierPolicy::MedianMultiple {
                multiple,
                min_radius,
            } => {
                if !(multiple.is_finite() && multiple > 0.0) {
                    return Err(AggregationError::InvalidPolicy(format!(
                        "median multiple must be positive, got {}",
                        multiple
                    )));
                }
                if !(min_radius.is_finite() && min_radius >= 0.0) {
                    return Err(AggregationError::InvalidPolicy(format!(
                        "min_radius must be non-negative, got {}",
                        min_radius
                    )));
                }
                Ok(())
            }
            OutlierPolicy::ClosestMajority => Ok(()),
            OutlierPolicy::FixedRadius(r) => {
                if !(r.is_finite() && r >= 0.0) {
                    return Err(AggregationError::InvalidPolicy(format!(
                        "radius must be non-negative, got {}",
                        r
                    )));
                }
                Ok(())
            }
        }
    }
}

/// Result of filtering one batch. Indices refer to the input batch and are
/// ascending.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OutlierSplit {
    /// Indices kept for aggregation
    pub accepted: Vec<usize>,
    /// Indices rejected as outliers
    pub rejected: Vec<usize>,
    /// Distance of every input vector to the center
    pub distances: Vec<f64>,
    /// Effective cut-off (for `ClosestMajority`, the largest accepted distance)
    pub threshold: f64,
}

impl OutlierSplit {
    /// Clone out the accepted vectors in index order. Indices past the end
    /// of `vectors` are skipped.
    pub fn accepted_vectors(&self, vectors: &[ModelVector]) -> Vec<ModelVector> {
        self.accepted
            .iter()
            .filter_map(|&i| vectors.get(i).cloned())
            .collect()
    }
}

/// Split `vectors` into accepted and rejected by distance to `center`.
///
/// An empty batch yields an empty split. Vectors exactly at the threshold
/// are accepted; where a policy must cut through equal distances
/// (`ClosestMajority`) the lower input index wins.
pub fn detect_outliers(
    vectors: &[ModelVector],
    center: &ModelVector,
    policy: &OutlierPolicy,
) -> Result<OutlierSplit, AggregationError> {
    policy.validate()?;
    if vectors.is_empty() {
        return Ok(OutlierSplit::default());
    }

    let dim = check_batch(vectors)?;
    if center.len() != dim {
        return Err(AggregationError::DimensionMismatch {
            expected: dim,
            actual: center.len(),
            index: vectors.len(),
        });
    }

    let center64 = center.as_array().mapv(|x| x as f64);
    let distances: Vec<f64> = vectors
        .par_iter()
        .map(|v| v.distance_to(&center64))
        .collect();

    let (accepted, threshold) = match *policy {
        OutlierPolicy::MedianMultiple {
            multiple,
            min_radius,
        } => {
            let med = median(&distances).unwrap_or(0.0);
            let threshold = (multiple * med).max(min_radius);
            (within(&distances, threshold), threshold)
        }
        OutlierPolicy::FixedRadius(radius) => (within(&distances, radius), radius),
        OutlierPolicy::ClosestMajority => closest_majority(&distances),
    };

    let rejected = (0..vectors.len())
        .filter(|i| accepted.binary_search(i).is_err())
        .collect();

    Ok(OutlierSplit {
        accepted,
        rejected,
        distances,
        threshold,
    })
}

fn within(distances: &[f64], threshold: f64) -> Vec<usize> {
    distances
        .iter()
        .enumerate()
        .filter(|(_, &d)| d <= threshold)
        .map(|(i, _)| i)
        .collect()
}

fn closest_majority(distances: &[f64]) -> (Vec<usize>, f64) {
    let keep = distances.len() / 2 + 1;

    let mut order: Vec<usize> = (0..distances.len()).collect();
    // Stable sort: equal distances keep input order
    order.sort_by(|&a, &b| {
        distances[a]
            .partial_cmp(&distances[b])
            .unwrap_or(Ordering::Equal)
    });
    order.truncate(keep);

    let threshold = order.iter().map(|&i| distances[i]).fold(0.0, f64::max);
    order.sort_unstable();
    (order, threshold)
}
