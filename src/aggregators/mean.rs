//! Elementwise arithmetic mean of accepted updates
//!
//! Standard federated averaging (McMahan et al., 2017). On its own it has no
//! Byzantine tolerance; it is applied only after outlier filtering, and by
//! the decryption quorum to recompute the same aggregate for audit.

use ndarray::Array1;

use super::check_batch;
use crate::error::AggregationError;
use crate::model::ModelVector;

/// Elementwise mean of `accepted`.
///
/// All vectors must share one length; a mismatch is
/// [`AggregationError::DimensionMismatch`] and nothing is truncated or padded.
/// Accumulates in `f64` in input order.
pub fn aggregate(accepted: &[ModelVector]) -> Result<ModelVector, AggregationError> {
    if accepted.is_empty() {
        return Err(AggregationError::EmptyBatch);
    }

    let dim = check_batch(accepted)?;
    let sum = accepted
        .iter()
        .fold(Array1::<f64>::zeros(dim), |mut acc, v| {
            acc.zip_mut_with(v.as_array(), |a, &x| *a += x as f64);
            acc
        });

    let n = accepted.len() as f64;
    Ok(ModelVector::from(sum.mapv(|x| (x / n) as f32)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean() {
        let updates = vec![ModelVector::new(vec![1.0, 2.0]), ModelVector::new(vec![3.0, 4.0])];
        let result = aggregate(&updates).unwrap();
        assert_eq!(result, ModelVector::new(vec![2.0, 3.0]));
    }

    #[test]
    fn test_single_vector_returned_exactly() {
        let v = ModelVector::new(vec![42.0, 7.0, -0.1]);
        assert_eq!(aggregate(std::slice::from_ref(&v)).unwrap(), v);
    }

    #[test]
    fn test_vulnerable_without_filtering() {
        let updates = vec![
            ModelVector::new(vec![1.0]),
            ModelVector::new(vec![1.0]),
            ModelVector::new(vec![100.0]), // Single attacker poisons result
        ];
        let result = aggregate(&updates).unwrap();
        assert!(result.as_array()[0] > 10.0);
    }

    #[test]
    fn test_empty() {
        assert_eq!(aggregate(&[]).unwrap_err(), AggregationError::EmptyBatch);
    }

    #[test]
    fn test_dimension_mismatch() {
        let updates = vec![ModelVector::zeros(2), ModelVector::zeros(2), ModelVector::zeros(1)];
        assert_eq!(
            aggregate(&updates).unwrap_err(),
            AggregationError::DimensionMismatch {
                expected: 2,
                actual: 1,
                index: 2
            }
        );
    }
}
