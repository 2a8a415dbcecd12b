//! # Tessera-FL: Threshold-Keyed Secure Robust Aggregation for Federated Learning
//!
//! Tessera combines three pieces so that a federated-learning network can
//! aggregate model updates without trusting any single party:
//!
//! - **Threshold key management** - a [`KeyAuthority`] splits a per-epoch
//!   master secret into `n` Shamir shares ([`sharing`]); any `t` of them
//!   rebuild it, fewer reveal nothing.
//! - **Authenticated encryption** - ECDH on secp256k1, HKDF-SHA256 and
//!   AES-256-GCM ([`crypto`]) for model updates and share transport.
//! - **Byzantine-robust aggregation** - a geometric-median center, distance
//!   based outlier rejection, and the mean of survivors ([`aggregators`]).
//!
//! A [`DecryptionQuorum`] holding `t` shares can independently decrypt the
//! accepted updates and recompute the aggregate as an audit.
//!
//! ## High-Level API
//!
//! Use [`RoundCoordinator`] to drive complete rounds over a [`Ledger`], or
//! [`RobustAggregator`] directly on plaintext batches.

#![deny(missing_docs)]

pub mod aggregators;
pub mod config;
pub mod coordinator;
pub mod crypto;
pub mod error;
pub mod ledger;
pub mod math;
pub mod model;
pub mod participants;
pub mod sharing;
pub mod verification;

// Re-exports
pub use aggregators::{aggregate, compute_center, detect_outliers};
pub use aggregators::{AggregationConfig, OutlierPolicy, QuorumRule, RobustAggregator};
pub use config::EngineConfig;
pub use coordinator::RoundCoordinator;
pub use crypto::{EncryptedBlob, KeyPair, KeyPurpose};
pub use error::TesseraError;
pub use ledger::{InMemoryLedger, Ledger, PrincipalId, RoundId};
pub use model::ModelVector;
pub use participants::{DecryptionQuorum, EdgeDevice, KeyAuthority, Trainer};
pub use sharing::{reconstruct, share, SharedSecret, Share};
pub use verification::AuditLog;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
