//! Mathematical primitives for Tessera-FL.
//!
//! Provides shared math utilities used by aggregation and auditing:
//!
//! - [`norms`] — L2 norms and distances
//! - [`stats`] — order statistics

pub mod norms;
pub mod stats;

pub use norms::{l2_distance, l2_norm, l2_norm_sq};
pub use stats::median;
