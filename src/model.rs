//! Model update vectors and their wire form.

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::error::AggregationError;
use crate::math::norms::{l2_distance, l2_norm};

/// Width of one serialized element.
pub const ELEMENT_BYTES: usize = 4;

/// Flat model parameters. All vectors in one aggregation batch share a length.
///
/// Serialized as little-endian `f32`s; the length is implied by the byte count.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelVector(Array1<f32>);

impl ModelVector {
    /// Wrap owned values.
    pub fn new(values: Vec<f32>) -> Self {
        Self(Array1::from(values))
    }

    /// `len` copies of `value`.
    pub fn filled(len: usize, value: f32) -> Self {
        Self(Array1::from_elem(len, value))
    }

    /// All zeros.
    pub fn zeros(len: usize) -> Self {
        Self(Array1::zeros(len))
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no parameters.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Underlying array.
    pub fn as_array(&self) -> &Array1<f32> {
        &self.0
    }

    /// Consume into the underlying array.
    pub fn into_array(self) -> Array1<f32> {
        self.0
    }

    /// Copy out as a plain vector.
    pub fn to_vec(&self) -> Vec<f32> {
        self.0.to_vec()
    }

    /// True if no element is NaN or infinite.
    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|x| x.is_finite())
    }

    /// Euclidean norm.
    pub fn norm(&self) -> f32 {
        l2_norm(&self.0)
    }

    /// Euclidean distance to a center held in `f64`.
    pub fn distance_to(&self, center: &Array1<f64>) -> f64 {
        l2_distance(&self.0, center)
    }

    /// Largest elementwise absolute difference. Lengths must match.
    pub fn max_abs_diff(&self, other: &ModelVector) -> Option<f32> {
        if self.len() != other.len() {
            return None;
        }
        Some(
            self.0
                .iter()
                .zip(other.0.iter())
                .map(|(a, b)| (a - b).abs())
                .fold(0.0f32, f32::max),
        )
    }

    /// Little-endian `f32` bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len() * ELEMENT_BYTES);
        for x in self.0.iter() {
            out.extend_from_slice(&x.to_le_bytes());
        }
        out
    }

    /// Parse little-endian `f32` bytes; the length must be a multiple of 4.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AggregationError> {
        if bytes.len() % ELEMENT_BYTES != 0 {
            return Err(AggregationError::MalformedVector(bytes.len()));
        }
        let values = bytes
            .chunks_exact(ELEMENT_BYTES)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Ok(Self::new(values))
    }
}

impl From<Vec<f32>> for ModelVector {
    fn from(values: Vec<f32>) -> Self {
        Self::new(values)
    }
}

impl From<Array1<f32>> for ModelVector {
    fn from(values: Array1<f32>) -> Self {
        Self(values)
    }
}
