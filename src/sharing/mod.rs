//! (t, n) threshold secret sharing.
//!
//! Shamir's scheme over GF(2^8), applied independently to each of the 32
//! secret bytes. Shares are evaluations at the nonzero points `1..=n`, so at
//! most 255 holders are supported.
//!
//! Any `t - 1` shares are information-theoretically independent of the
//! secret. Shares carry no commitments: a corrupted share reconstructs a
//! wrong secret without any error.

mod gf256;
pub mod shamir;

pub use shamir::{reconstruct, share, SharedSecret, Share, MAX_SHARES, SECRET_LEN, SHARE_WIRE_LEN};
