//! External ledger collaborator.
//!
//! The core only needs an append-only bulletin board and key-value registry:
//! public keys, per-round encrypted updates, encrypted key shares and the
//! current global model. [`Ledger`] is that contract; [`InMemoryLedger`] is
//! a thread-safe implementation with a configurable finality lag.
//!
//! Reads that follow a write may see [`LedgerError::NotYetFinalized`];
//! callers go through [`with_retry`].

pub mod memory;
pub mod retry;

pub use memory::InMemoryLedger;
pub use retry::{with_retry, RetryPolicy};

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::crypto::EncryptedBlob;
use crate::error::LedgerError;
use crate::model::ModelVector;

/// Monotonically increasing round index.
pub type RoundId = u64;

/// Stable identifier of a device, server, authority or decryption node.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalId(String);

impl PrincipalId {
    /// Wrap an identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Reserved principal under which the quorum decryption public key is published.
    pub fn quorum() -> Self {
        Self("quorum".to_string())
    }

    /// Borrow as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PrincipalId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Registry and bulletin board operations the core relies on.
///
/// Writes are durable once they return `Ok`. Implementations must be safe to
/// share across device threads.
pub trait Ledger: Send + Sync {
    /// Publish a principal's SEC1 public key.
    fn register_public_key(&self, principal: &PrincipalId, public_key: &[u8]) -> Result<(), LedgerError>;

    /// Look up a principal's public key.
    fn get_public_key(&self, principal: &PrincipalId) -> Result<Vec<u8>, LedgerError>;

    /// Record a device's sealed update for `round`.
    fn upload_blob(
        &self,
        round: RoundId,
        principal: &PrincipalId,
        blob: &EncryptedBlob,
    ) -> Result<(), LedgerError>;

    /// All sealed updates for `round`, in upload order.
    fn get_blobs(&self, round: RoundId) -> Result<Vec<(PrincipalId, EncryptedBlob)>, LedgerError>;

    /// Publish the global model produced by `round`.
    fn publish_global_model(&self, round: RoundId, model: &ModelVector) -> Result<(), LedgerError>;

    /// Latest published global model and the round that produced it.
    fn get_global_model(&self) -> Result<(RoundId, ModelVector), LedgerError>;

    /// Store a key share that `owner` sealed for `holder`.
    ///
    /// `owner` is the writer's own identity, implicit on a real ledger.
    fn upload_key_share(
        &self,
        owner: &PrincipalId,
        holder: &PrincipalId,
        blob: &EncryptedBlob,
    ) -> Result<(), LedgerError>;

    /// Fetch the key share `owner` sealed for `holder`.
    fn get_key_share(&self, owner: &PrincipalId, holder: &PrincipalId) -> Result<EncryptedBlob, LedgerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_principal_display_and_serde() {
        let id = PrincipalId::new("device-3");
        assert_eq!(id.to_string(), "device-3");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"device-3\"");
        assert_eq!(PrincipalId::from("device-3"), id);
        assert_ne!(PrincipalId::quorum(), id);
    }
}
