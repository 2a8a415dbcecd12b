//! Error types for Tessera-FL
//!
//! One enum per failure family, plus [`TesseraError`] which wraps them all
//! so `?` composes across the crypto, sharing, aggregation and ledger layers.

use thiserror::Error;

use crate::ledger::PrincipalId;

/// Failures of the ECDH / HKDF / AEAD pipeline.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// The peer public key is not a valid curve point (identity, off-curve, bad encoding)
    #[error("Invalid public key")]
    InvalidPublicKey,

    /// Derived scalar is zero or not below the group order
    #[error("Invalid secret key material")]
    InvalidSecretKey,

    /// AEAD tag did not verify; no plaintext is released
    #[error("Authentication failed")]
    AuthenticationFailed,

    /// Plaintext exceeds the AEAD length limit
    #[error("Plaintext too long for AEAD")]
    PlaintextTooLong,

    /// Blob is too short to hold IV and tag
    #[error("Malformed blob: {len} bytes (minimum 32)")]
    MalformedBlob {
        /// Length of the rejected blob
        len: usize,
    },
}

/// Failures of threshold secret sharing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SharingError {
    /// Fewer distinct shares than the threshold
    #[error("Insufficient shares: need {needed}, got {actual}")]
    InsufficientShares {
        /// Threshold `t`
        needed: usize,
        /// Distinct shares supplied
        actual: usize,
    },

    /// Two supplied shares carry the same evaluation point
    #[error("Duplicate share index: {0}")]
    DuplicateIndex(u8),

    /// Share index 0 would reveal the secret directly
    #[error("Invalid share index: {0}")]
    InvalidIndex(u8),

    /// Requires `1 <= t <= n <= 255`
    #[error("Invalid sharing parameters: n={n}, t={t}")]
    InvalidParameters {
        /// Number of shares
        n: usize,
        /// Threshold
        t: usize,
    },

    /// Share bytes do not follow the `[index][32-byte value]` layout
    #[error("Malformed share: {0} bytes")]
    MalformedShare(usize),
}

/// Failures of robust aggregation. Any of these aborts the round.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AggregationError {
    /// No vectors to aggregate
    #[error("Empty batch provided")]
    EmptyBatch,

    /// Vectors in one batch have different lengths
    #[error("Dimension mismatch: expected {expected}, got {actual} at index {index}")]
    DimensionMismatch {
        /// Length of the first vector
        expected: usize,
        /// Length of the offending vector
        actual: usize,
        /// Position of the offending vector in the batch
        index: usize,
    },

    /// Too few vectors survived filtering
    #[error("Quorum not met: need {needed}, got {actual}")]
    QuorumNotMet {
        /// Minimum accepted vectors
        needed: usize,
        /// Vectors actually accepted
        actual: usize,
    },

    /// Serialized vector length is not a multiple of 4 bytes
    #[error("Malformed vector: {0} bytes")]
    MalformedVector(usize),

    /// A vector contains NaN or infinity
    #[error("Non-finite value in vector {0}")]
    NonFinite(usize),

    /// Policy or weight parameters out of range
    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),

    /// Round state machine asked to move backwards or skip a phase
    #[error("Phase violation: cannot move from {from} to {to}")]
    PhaseViolation {
        /// Current phase
        from: &'static str,
        /// Requested phase
        to: &'static str,
    },
}

/// Failures reported by the external ledger.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Write acknowledged but not yet readable; retry with backoff
    #[error("Not yet finalized")]
    NotYetFinalized,

    /// No record under the requested key
    #[error("Not found: {0}")]
    NotFound(String),

    /// Ledger could not be reached
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),
}

/// Configuration loading or validation failures.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Could not read the configuration file
    #[error("Config I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON did not match the schema
    #[error("Config parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Values parsed but are inconsistent
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// All possible errors in Tessera-FL
#[derive(Error, Debug)]
pub enum TesseraError {
    /// Cryptographic failure
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Secret-sharing failure
    #[error(transparent)]
    Sharing(#[from] SharingError),

    /// Aggregation failure
    #[error(transparent)]
    Aggregation(#[from] AggregationError),

    /// Ledger failure
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Configuration failure
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A device was asked for a share it never received
    #[error("No key share held by {0}")]
    ShareNotReceived(PrincipalId),

    /// Array shape error from ndarray
    #[error("Array shape error: {0}")]
    ShapeError(String),
}

impl From<ndarray::ShapeError> for TesseraError {
    fn from(e: ndarray::ShapeError) -> Self {
        TesseraError::ShapeError(e.to_string())
    }
}
