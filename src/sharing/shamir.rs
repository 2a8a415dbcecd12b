//! Share generation and Lagrange reconstruction.

use std::collections::HashSet;
use std::fmt;

use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::gf256;
use crate::error::SharingError;

/// Secret length in bytes.
pub const SECRET_LEN: usize = 32;

/// Largest `n`: evaluation points are the nonzero field elements.
pub const MAX_SHARES: usize = 255;

/// `[index: 1][value: 32]`.
pub const SHARE_WIRE_LEN: usize = 1 + SECRET_LEN;

/// A 32-byte shared secret. Zeroized on drop, redacted in `Debug`.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret([u8; SECRET_LEN]);

impl SharedSecret {
    /// Wrap raw secret bytes.
    pub fn from_bytes(bytes: [u8; SECRET_LEN]) -> Self {
        Self(bytes)
    }

    /// Fresh secret from the OS CSPRNG.
    pub fn random() -> Self {
        let mut bytes = [0u8; SECRET_LEN];
        OsRng.fill_bytes(&mut bytes);
        let secret = Self(bytes);
        bytes.zeroize();
        secret
    }

    /// Raw bytes, for key derivation by the holder of the reconstructed secret.
    pub fn as_bytes(&self) -> &[u8; SECRET_LEN] {
        &self.0
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSecret(<redacted>)")
    }
}

/// One evaluation `(i, f(i))` of the sharing polynomial, byte-wise.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Share {
    index: u8,
    value: [u8; SECRET_LEN],
}

impl Share {
    /// Build a share; index 0 is the secret itself and is refused.
    pub fn new(index: u8, value: [u8; SECRET_LEN]) -> Result<Self, SharingError> {
        if index == 0 {
            return Err(SharingError::InvalidIndex(0));
        }
        Ok(Self { index, value })
    }

    /// Evaluation point.
    pub fn index(&self) -> u8 {
        self.index
    }

    /// Evaluation value.
    pub fn value(&self) -> &[u8; SECRET_LEN] {
        &self.value
    }

    /// Wire form `[index][value]`, zeroized when dropped.
    pub fn to_bytes(&self) -> Zeroizing<Vec<u8>> {
        let mut out = Zeroizing::new(Vec::with_capacity(SHARE_WIRE_LEN));
        out.push(self.index);
        out.extend_from_slice(&self.value);
        out
    }

    /// Parse the wire form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SharingError> {
        if bytes.len() != SHARE_WIRE_LEN {
            return Err(SharingError::MalformedShare(bytes.len()));
        }
        let mut value = [0u8; SECRET_LEN];
        value.copy_from_slice(&bytes[1..]);
        let share = Self::new(bytes[0], value);
        value.zeroize();
        share
    }
}

impl fmt::Debug for Share {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Share")
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

/// Random coefficients `a1..a(t-1)` per secret byte. `a0` is the secret and
/// is read from it directly.
#[derive(Zeroize, ZeroizeOnDrop)]
struct Polynomial {
    coefficients: Vec<[u8; SECRET_LEN]>,
}

impl Polynomial {
    fn random(degree: usize) -> Self {
        let mut coefficients = vec![[0u8; SECRET_LEN]; degree];
        for c in coefficients.iter_mut() {
            OsRng.fill_bytes(c);
        }
        Self { coefficients }
    }

    fn evaluate(&self, secret: &[u8; SECRET_LEN], x: u8) -> [u8; SECRET_LEN] {
        let mut out = [0u8; SECRET_LEN];
        for (byte, slot) in out.iter_mut().enumerate() {
            let coeffs = std::iter::once(secret[byte])
                .chain(self.coefficients.iter().map(|c| c[byte]));
            *slot = gf256::eval(coeffs, x);
        }
        out
    }
}

fn check_parameters(n: usize, t: usize) -> Result<(), SharingError> {
    if t == 0 || t > n || n > MAX_SHARES {
        return Err(SharingError::InvalidParameters { n, t });
    }
    Ok(())
}

/// Split `secret` into `n` shares, any `t` of which reconstruct it.
///
/// Requires `1 <= t <= n <= 255`. The polynomial is erased before returning.
pub fn share(secret: &SharedSecret, n: usize, t: usize) -> Result<Vec<Share>, SharingError> {
    check_parameters(n, t)?;

    let poly = Polynomial::random(t - 1);
    let shares = (1..=n as u8)
        .map(|x| Share {
            index: x,
            value: poly.evaluate(secret.as_bytes(), x),
        })
        .collect();
    Ok(shares)
}

/// Recover the secret from at least `t` shares with distinct indices.
///
/// Uses the first `t` distinct shares in the order given. Any share index
/// repeated in `shares` is [`SharingError::DuplicateIndex`]; fewer than `t`
/// shares is [`SharingError::InsufficientShares`].
pub fn reconstruct(shares: &[Share], t: usize) -> Result<SharedSecret, SharingError> {
    if t == 0 || t > MAX_SHARES {
        return Err(SharingError::InvalidParameters {
            n: shares.len(),
            t,
        });
    }

    let mut seen = HashSet::with_capacity(shares.len());
    for s in shares {
        if s.index == 0 {
            return Err(SharingError::InvalidIndex(0));
        }
        if !seen.insert(s.index) {
            return Err(SharingError::DuplicateIndex(s.index));
        }
    }

    if shares.len() < t {
        return Err(SharingError::InsufficientShares {
            needed: t,
            actual: shares.len(),
        });
    }

    let points = &shares[..t];
    let mut secret = [0u8; SECRET_LEN];
    for (i, si) in points.iter().enumerate() {
        // L_i(0) = prod_{j != i} x_j / (x_j - x_i)
        let mut basis = 1u8;
        for (j, sj) in points.iter().enumerate() {
            if i != j {
                let denom = gf256::add(sj.index, si.index);
                basis = gf256::mul(basis, gf256::mul(sj.index, gf256::inv(denom)));
            }
        }
        for (acc, &y) in secret.iter_mut().zip(si.value.iter()) {
            *acc = gf256::add(*acc, gf256::mul(basis, y));
        }
    }

    let out = SharedSecret(secret);
    secret.zeroize();
    Ok(out)
}
