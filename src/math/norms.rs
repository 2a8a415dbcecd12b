//! Norm computations for vectors.
//!
//! Accumulation runs sequentially in `f64` so results are bit-identical
//! across runs and thread counts.

/// L2 (Euclidean) norm.
pub fn l2_norm<'a, A>(v: A) -> f32
where
    A: IntoIterator<Item = &'a f32>,
{
    (l2_norm_sq(v) as f64).sqrt() as f32
}

/// Squared L2 norm (avoids sqrt).
pub fn l2_norm_sq<'a, A>(v: A) -> f32
where
    A: IntoIterator<Item = &'a f32>,
{
    v.into_iter().map(|&x| (x as f64) * (x as f64)).sum::<f64>() as f32
}

/// Euclidean distance between two equal-length sequences.
///
/// Callers check lengths; extra trailing elements of the longer side are ignored.
pub fn l2_distance<'a, A, B>(a: A, b: B) -> f64
where
    A: IntoIterator<Item = &'a f32>,
    B: IntoIterator<Item = &'a f64>,
{
    a.into_iter()
        .zip(b)
        .map(|(&x, &c)| {
            let d = x as f64 - c;
            d * d
        })
        .sum::<f64>()
        .sqrt()
}
