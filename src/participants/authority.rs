//! Key authority: master secret generation and share distribution.

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use zeroize::Zeroizing;

use super::{lookup_key, register_key};
use crate::crypto::{seal, KeyPair, KeyPurpose, PublicKey};
use crate::error::TesseraError;
use crate::ledger::{with_retry, Ledger, PrincipalId, RetryPolicy};
use crate::sharing::{share, SharedSecret, SECRET_LEN};

/// Public outcome of one key epoch. Contains nothing secret.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Epoch {
    /// Epoch counter, starting at 1
    pub number: u64,
    /// Share holders; `holders[i]` received the share with index `i + 1`
    pub holders: Vec<PrincipalId>,
    /// Shares needed to reconstruct
    pub threshold: usize,
    /// SEC1 encoding of the quorum public key, as published under
    /// [`PrincipalId::quorum`]
    pub quorum_public_key: Vec<u8>,
}

/// Trusted dealer for the `(t, n)` master secret.
///
/// The secret exists only inside [`generate_epoch`](Self::generate_epoch)
/// and is erased before the first share leaves.
pub struct KeyAuthority {
    id: PrincipalId,
    keys: KeyPair,
    entropy: Zeroizing<[u8; SECRET_LEN]>,
    epoch: u64,
}

impl KeyAuthority {
    /// Authority with a fresh key pair.
    pub fn new(id: PrincipalId) -> Self {
        Self {
            id,
            keys: KeyPair::generate(),
            entropy: Zeroizing::new([0u8; SECRET_LEN]),
            epoch: 0,
        }
    }

    /// Ledger identity.
    pub fn id(&self) -> &PrincipalId {
        &self.id
    }

    /// Public key holders use to open their shares.
    pub fn public_key(&self) -> &PublicKey {
        self.keys.public_key()
    }

    /// Epochs generated so far.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Publish this authority's public key.
    pub fn register(&self, ledger: &dyn Ledger, retry: &RetryPolicy) -> Result<(), TesseraError> {
        register_key(ledger, &self.id, &self.keys.public_key_bytes(), retry)
    }

    /// Fold a participant's randomness into the next epoch's secret.
    ///
    /// Contributions are XORed with each other and with the authority's own
    /// CSPRNG output, so the secret is unpredictable as long as any one
    /// source is.
    pub fn contribute_entropy(&mut self, contribution: &[u8; SECRET_LEN]) {
        for (acc, &b) in self.entropy.iter_mut().zip(contribution.iter()) {
            *acc ^= b;
        }
    }

    /// Generate a master secret, publish the quorum public key, and send
    /// each of `holders` its share sealed under `"key_share_encryption"`.
    ///
    /// Holder public keys are resolved before the secret exists, so a
    /// missing holder aborts the epoch without any secret material created.
    pub fn generate_epoch(
        &mut self,
        holders: &[PrincipalId],
        threshold: usize,
        ledger: &dyn Ledger,
        retry: &RetryPolicy,
    ) -> Result<Epoch, TesseraError> {
        let holder_keys = holders
            .iter()
            .map(|h| lookup_key(ledger, h, retry))
            .collect::<Result<Vec<_>, _>>()?;

        let (shares, quorum_public_key) = {
            let mut seed = Zeroizing::new([0u8; SECRET_LEN]);
            OsRng.fill_bytes(&mut seed[..]);
            for (s, &e) in seed.iter_mut().zip(self.entropy.iter()) {
                *s ^= e;
            }
            let secret = SharedSecret::from_bytes(*seed);

            let quorum = KeyPair::derive(secret.as_bytes(), KeyPurpose::ModelDecryption)?;
            let shares = share(&secret, holders.len(), threshold)?;
            (shares, quorum.public_key_bytes())
            // secret, seed and the quorum scalar are zeroized here
        };
        self.entropy = Zeroizing::new([0u8; SECRET_LEN]);
        self.epoch += 1;
        debug!(epoch = self.epoch, "Master secret split and erased");

        with_retry(retry, "register quorum key", || {
            ledger.register_public_key(&PrincipalId::quorum(), &quorum_public_key)
        })?;

        for ((holder, holder_key), s) in holders.iter().zip(&holder_keys).zip(&shares) {
            let blob = seal(
                self.keys.secret_key(),
                holder_key,
                KeyPurpose::KeyShareEncryption,
                &s.to_bytes(),
            )?;
            with_retry(retry, "upload_key_share", || {
                ledger.upload_key_share(&self.id, holder, &blob)
            })?;
        }

        info!(
            epoch = self.epoch,
            holders = holders.len(),
            threshold,
            "Key shares distributed"
        );

        Ok(Epoch {
            number: self.epoch,
            holders: holders.to_vec(),
            threshold,
            quorum_public_key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{decode_public_key, open};
    use crate::error::{LedgerError, SharingError};
    use crate::ledger::InMemoryLedger;
    use crate::sharing::{reconstruct, Share};

    fn holder(ledger: &InMemoryLedger, name: &str) -> (PrincipalId, KeyPair) {
        let id = PrincipalId::new(name);
        let keys = KeyPair::generate();
        ledger.register_public_key(&id, &keys.public_key_bytes()).unwrap();
        (id, keys)
    }

    #[test]
    fn test_epoch_distributes_openable_shares() {
        let ledger = InMemoryLedger::new();
        let retry = RetryPolicy::no_retry();
        let mut authority = KeyAuthority::new(PrincipalId::new("ka"));
        authority.register(&ledger, &retry).unwrap();

        let holders: Vec<_> = (0..5).map(|i| holder(&ledger, &format!("h{}", i))).collect();
        let ids: Vec<_> = holders.iter().map(|(id, _)| id.clone()).collect();
        let epoch = authority.generate_epoch(&ids, 3, &ledger, &retry).unwrap();

        assert_eq!(epoch.number, 1);
        assert_eq!(
            ledger.get_public_key(&PrincipalId::quorum()).unwrap(),
            epoch.quorum_public_key
        );

        let shares: Vec<Share> = holders
            .iter()
            .map(|(id, keys)| {
                let blob = ledger.get_key_share(authority.id(), id).unwrap();
                let bytes = open(
                    keys.secret_key(),
                    authority.public_key(),
                    KeyPurpose::KeyShareEncryption,
                    &blob,
                )
                .unwrap();
                Share::from_bytes(&bytes).unwrap()
            })
            .collect();
        assert_eq!(shares[2].index(), 3);

        // Any 3 shares rebuild the secret behind the published quorum key
        let secret = reconstruct(&shares[1..4], 3).unwrap();
        let quorum = KeyPair::derive(secret.as_bytes(), KeyPurpose::ModelDecryption).unwrap();
        assert_eq!(
            quorum.public_key(),
            &decode_public_key(&epoch.quorum_public_key).unwrap()
        );
    }

    #[test]
    fn test_unknown_holder_aborts_before_sharing() {
        let ledger = InMemoryLedger::new();
        let mut authority = KeyAuthority::new(PrincipalId::new("ka"));
        let (known, _) = holder(&ledger, "h0");

        let err = authority
            .generate_epoch(
                &[known, PrincipalId::new("ghost")],
                2,
                &ledger,
                &RetryPolicy::no_retry(),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            TesseraError::Ledger(LedgerError::NotFound(_))
        ));
        assert_eq!(authority.epoch(), 0);
        assert!(ledger.get_public_key(&PrincipalId::quorum()).is_err());
    }

    #[test]
    fn test_invalid_threshold() {
        let ledger = InMemoryLedger::new();
        let mut authority = KeyAuthority::new(PrincipalId::new("ka"));
        let (h, _) = holder(&ledger, "h0");
        let err = authority
            .generate_epoch(&[h], 2, &ledger, &RetryPolicy::no_retry())
            .unwrap_err();
        assert!(matches!(
            err,
            TesseraError::Sharing(SharingError::InvalidParameters { n: 1, t: 2 })
        ));
    }

    #[test]
    fn test_epochs_rotate_quorum_key() {
        let ledger = InMemoryLedger::new();
        let retry = RetryPolicy::no_retry();
        let mut authority = KeyAuthority::new(PrincipalId::new("ka"));
        let ids: Vec<_> = (0..3).map(|i| holder(&ledger, &format!("h{}", i)).0).collect();

        authority.contribute_entropy(&[0xAB; SECRET_LEN]);
        let first = authority.generate_epoch(&ids, 2, &ledger, &retry).unwrap();
        let second = authority.generate_epoch(&ids, 2, &ledger, &retry).unwrap();
        assert_eq!(second.number, 2);
        assert_ne!(first.quorum_public_key, second.quorum_public_key);
    }
}
