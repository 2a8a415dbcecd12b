//! Principals of the protocol.
//!
//! - [`KeyAuthority`] generates the per-epoch master secret, splits it, and
//!   sends each holder its share sealed end-to-end.
//! - [`EdgeDevice`] trains locally, seals its update, and holds a key share
//!   until a quorum asks for it.
//! - [`DecryptionQuorum`] rebuilds the secret from `t` shares, opens the
//!   accepted updates and recomputes the aggregate for audit.

pub mod authority;
pub mod device;
pub mod quorum;

pub use authority::{Epoch, KeyAuthority};
pub use device::{EdgeDevice, LeastSquaresTrainer, Trainer};
pub use quorum::{AuditOutcome, DecryptionQuorum, SealedUpdate};

use crate::crypto::{decode_public_key, PublicKey};
use crate::error::TesseraError;
use crate::ledger::{with_retry, Ledger, PrincipalId, RetryPolicy};

/// Publish `public_key` for `principal`, retrying transient ledger errors.
pub(crate) fn register_key(
    ledger: &dyn Ledger,
    principal: &PrincipalId,
    public_key: &[u8],
    retry: &RetryPolicy,
) -> Result<(), TesseraError> {
    with_retry(retry, "register_public_key", || {
        ledger.register_public_key(principal, public_key)
    })?;
    Ok(())
}

/// Fetch and decode a principal's public key.
pub(crate) fn lookup_key(
    ledger: &dyn Ledger,
    principal: &PrincipalId,
    retry: &RetryPolicy,
) -> Result<PublicKey, TesseraError> {
    let bytes = with_retry(retry, "get_public_key", || ledger.get_public_key(principal))?;
    Ok(decode_public_key(&bytes)?)
}
