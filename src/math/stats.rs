//! Order statistics.

use std::cmp::Ordering;

/// Median of `values`; the mean of the two middle values for even counts.
///
/// Returns `None` for an empty slice. NaN sorts as equal, so callers
/// reject non-finite input first.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}
