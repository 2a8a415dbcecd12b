//! Decryption quorum: secret reconstruction and independent re-aggregation.

use rayon::prelude::*;
use tracing::{info, warn};
use zeroize::Zeroizing;

use super::register_key;
use crate::aggregators::aggregate;
use crate::crypto::{open, EncryptedBlob, KeyPair, KeyPurpose, PublicKey};
use crate::error::{AggregationError, TesseraError};
use crate::ledger::{Ledger, PrincipalId, RetryPolicy, RoundId};
use crate::model::ModelVector;
use crate::sharing::{reconstruct, Share};
use crate::verification::AuditReport;

/// One device's audit copy as read from the ledger.
#[derive(Clone, Debug)]
pub struct SealedUpdate {
    /// Uploading device
    pub sender: PrincipalId,
    /// Device public key, the ECDH peer for opening `blob`
    pub sender_public: PublicKey,
    /// Update sealed to the quorum public key
    pub blob: EncryptedBlob,
}

/// Aggregate recomputed from the quorum's own decryptions.
#[derive(Clone, Debug, PartialEq)]
pub struct AuditOutcome {
    /// Mean of every update that opened cleanly
    pub aggregate: ModelVector,
    /// Devices whose update entered `aggregate`
    pub included: Vec<PrincipalId>,
    /// Devices whose blob failed to authenticate or parse
    pub excluded: Vec<PrincipalId>,
}

/// A decryption node acting for the quorum.
///
/// Holders reveal their shares to this node sealed under its key pair. The
/// reconstructed secret and the quorum scalar derived from it live only for
/// the duration of one [`reconstruct_and_audit`](Self::reconstruct_and_audit)
/// call.
pub struct DecryptionQuorum {
    id: PrincipalId,
    keys: KeyPair,
}

impl DecryptionQuorum {
    /// Node with a fresh transport key pair.
    pub fn new(id: PrincipalId) -> Self {
        Self {
            id,
            keys: KeyPair::generate(),
        }
    }

    /// Ledger identity.
    pub fn id(&self) -> &PrincipalId {
        &self.id
    }

    /// Key holders seal their revealed shares to.
    pub fn public_key(&self) -> &PublicKey {
        self.keys.public_key()
    }

    /// Publish this node's transport key.
    pub fn register(&self, ledger: &dyn Ledger, retry: &RetryPolicy) -> Result<(), TesseraError> {
        register_key(ledger, &self.id, &self.keys.public_key_bytes(), retry)
    }

    /// Open a share a holder sealed with
    /// [`EdgeDevice::reveal_share_sealed`](super::EdgeDevice::reveal_share_sealed).
    pub fn open_share(&self, holder: &PublicKey, blob: &EncryptedBlob) -> Result<Share, TesseraError> {
        let bytes = Zeroizing::new(open(
            self.keys.secret_key(),
            holder,
            KeyPurpose::KeyShareEncryption,
            blob,
        )?);
        Ok(Share::from_bytes(&bytes)?)
    }

    /// Rebuild the master secret from `shares`, open every blob in `batch`
    /// and average the results.
    ///
    /// Share problems (`InsufficientShares`, `DuplicateIndex`) fail the
    /// whole call. A blob that fails authentication, or decrypts to bytes
    /// that are not a vector, is logged and excluded; the rest are still
    /// aggregated. If nothing opens the result is
    /// [`AggregationError::EmptyBatch`].
    pub fn reconstruct_and_audit(
        &self,
        shares: &[Share],
        threshold: usize,
        batch: &[SealedUpdate],
    ) -> Result<AuditOutcome, TesseraError> {
        let quorum = {
            let secret = reconstruct(shares, threshold)?;
            KeyPair::derive(secret.as_bytes(), KeyPurpose::ModelDecryption)?
        };

        let opened: Vec<Result<ModelVector, TesseraError>> = batch
            .par_iter()
            .map(|u| -> Result<ModelVector, TesseraError> {
                let bytes = open(
                    quorum.secret_key(),
                    &u.sender_public,
                    KeyPurpose::ModelEncryption,
                    &u.blob,
                )?;
                Ok(ModelVector::from_bytes(&bytes)?)
            })
            .collect();

        let mut vectors = Vec::with_capacity(batch.len());
        let mut included = Vec::with_capacity(batch.len());
        let mut excluded = Vec::new();
        for (u, result) in batch.iter().zip(opened) {
            match result {
                Ok(v) => {
                    vectors.push(v);
                    included.push(u.sender.clone());
                }
                Err(e) => {
                    warn!(principal = %u.sender, error = %e, "Excluding update from audit");
                    excluded.push(u.sender.clone());
                }
            }
        }

        if vectors.is_empty() {
            return Err(AggregationError::EmptyBatch.into());
        }
        let aggregate = aggregate(&vectors)?;

        Ok(AuditOutcome {
            aggregate,
            included,
            excluded,
        })
    }

    /// [`reconstruct_and_audit`](Self::reconstruct_and_audit), then compare
    /// with the aggregate published for `round`.
    ///
    /// A mismatch larger than `tolerance`, or a length mismatch, yields a
    /// report with `passed == false`; it is never an `Err`.
    pub fn audit_round(
        &self,
        round: RoundId,
        shares: &[Share],
        threshold: usize,
        batch: &[SealedUpdate],
        published: &ModelVector,
        tolerance: f32,
    ) -> Result<AuditReport, TesseraError> {
        let outcome = self.reconstruct_and_audit(shares, threshold, batch)?;
        let report = AuditReport::compare(round, published, outcome, tolerance);

        if report.passed {
            info!(round, included = report.included.len(), "Audit passed");
        } else {
            warn!(
                round,
                max_abs_diff = ?report.max_abs_diff,
                tolerance,
                excluded = report.excluded.len(),
                "Audit mismatch between published and recomputed aggregate"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::seal;
    use crate::error::SharingError;
    use crate::sharing::{share, SharedSecret};

    struct Fixture {
        shares: Vec<Share>,
        quorum_public: PublicKey,
    }

    fn fixture() -> Fixture {
        let secret = SharedSecret::random();
        let quorum_public = KeyPair::derive(secret.as_bytes(), KeyPurpose::ModelDecryption)
            .unwrap()
            .public_key()
            .clone();
        Fixture {
            shares: share(&secret, 5, 3).unwrap(),
            quorum_public,
        }
    }

    fn sealed(name: &str, update: &ModelVector, quorum_public: &PublicKey) -> SealedUpdate {
        let device = KeyPair::generate();
        SealedUpdate {
            sender: PrincipalId::new(name),
            sender_public: device.public_key().clone(),
            blob: seal(
                device.secret_key(),
                quorum_public,
                KeyPurpose::ModelEncryption,
                &update.to_bytes(),
            )
            .unwrap(),
        }
    }

    #[test]
    fn test_recomputes_mean() {
        let fx = fixture();
        let batch = vec![
            sealed("a", &ModelVector::new(vec![1.0, 2.0]), &fx.quorum_public),
            sealed("b", &ModelVector::new(vec![3.0, 4.0]), &fx.quorum_public),
        ];
        let node = DecryptionQuorum::new(PrincipalId::new("tn"));
        let outcome = node.reconstruct_and_audit(&fx.shares[2..], 3, &batch).unwrap();
        assert_eq!(outcome.aggregate, ModelVector::new(vec![2.0, 3.0]));
        assert_eq!(outcome.included.len(), 2);
        assert!(outcome.excluded.is_empty());
    }

    #[test]
    fn test_corrupt_blob_excluded_not_fatal() {
        let fx = fixture();
        let mut bad = sealed("bad", &ModelVector::filled(2, 9.0), &fx.quorum_public);
        let mut bytes = bad.blob.as_bytes().to_vec();
        bytes[20] ^= 0x01;
        bad.blob = EncryptedBlob::from_bytes(bytes).unwrap();

        let batch = vec![
            sealed("a", &ModelVector::filled(2, 1.0), &fx.quorum_public),
            bad,
            sealed("c", &ModelVector::filled(2, 3.0), &fx.quorum_public),
        ];
        let node = DecryptionQuorum::new(PrincipalId::new("tn"));
        let outcome = node.reconstruct_and_audit(&fx.shares, 3, &batch).unwrap();
        assert_eq!(outcome.aggregate, ModelVector::filled(2, 2.0));
        assert_eq!(outcome.excluded, vec![PrincipalId::new("bad")]);
    }

    #[test]
    fn test_two_of_three_shares_insufficient() {
        let fx = fixture();
        let node = DecryptionQuorum::new(PrincipalId::new("tn"));
        let err = node.reconstruct_and_audit(&fx.shares[..2], 3, &[]).unwrap_err();
        assert!(matches!(
            err,
            TesseraError::Sharing(SharingError::InsufficientShares { needed: 3, actual: 2 })
        ));
    }

    #[test]
    fn test_audit_round_flags_mismatch() {
        let fx = fixture();
        let batch = vec![sealed("a", &ModelVector::filled(3, 1.0), &fx.quorum_public)];
        let node = DecryptionQuorum::new(PrincipalId::new("tn"));

        let ok = node
            .audit_round(4, &fx.shares, 3, &batch, &ModelVector::filled(3, 1.0), 1e-4)
            .unwrap();
        assert!(ok.passed);
        assert_eq!(ok.round, 4);

        let tampered = node
            .audit_round(4, &fx.shares, 3, &batch, &ModelVector::filled(3, 1.5), 1e-4)
            .unwrap();
        assert!(!tampered.passed);
        assert_eq!(tampered.max_abs_diff, Some(0.5));
    }

    #[test]
    fn test_share_transport() {
        let fx = fixture();
        let holder = KeyPair::generate();
        let node = DecryptionQuorum::new(PrincipalId::new("tn"));
        let blob = seal(
            holder.secret_key(),
            node.public_key(),
            KeyPurpose::KeyShareEncryption,
            &fx.shares[0].to_bytes(),
        )
        .unwrap();
        assert_eq!(node.open_share(holder.public_key(), &blob).unwrap(), fx.shares[0]);
    }
}
