//! Self-describing framing for AEAD ciphertexts.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CryptoError;

/// IV length in bytes.
pub const IV_LEN: usize = 16;

/// GCM authentication tag length in bytes.
pub const TAG_LEN: usize = 16;

/// `[IV: 16 bytes][CIPHERTEXT: N bytes][AUTH_TAG: 16 bytes]`.
///
/// Invariant: `len() == IV_LEN + plaintext_len() + TAG_LEN`. The framing is
/// checked on construction, so accessors never panic.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<u8>", into = "Vec<u8>")]
pub struct EncryptedBlob {
    bytes: Vec<u8>,
}

impl EncryptedBlob {
    /// Wrap raw framed bytes, rejecting anything too short to hold IV and tag.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, CryptoError> {
        if bytes.len() < IV_LEN + TAG_LEN {
            return Err(CryptoError::MalformedBlob { len: bytes.len() });
        }
        Ok(Self { bytes })
    }

    pub(crate) fn from_parts(iv: &[u8; IV_LEN], sealed: Vec<u8>) -> Self {
        let mut bytes = Vec::with_capacity(IV_LEN + sealed.len());
        bytes.extend_from_slice(iv);
        bytes.extend_from_slice(&sealed);
        Self { bytes }
    }

    /// The 16-byte IV.
    pub fn iv(&self) -> &[u8] {
        &self.bytes[..IV_LEN]
    }

    /// Ciphertext without IV or tag.
    pub fn ciphertext(&self) -> &[u8] {
        &self.bytes[IV_LEN..self.bytes.len() - TAG_LEN]
    }

    /// The 16-byte authentication tag.
    pub fn tag(&self) -> &[u8] {
        &self.bytes[self.bytes.len() - TAG_LEN..]
    }

    /// Ciphertext followed by tag, the layout the AEAD expects.
    pub(crate) fn sealed(&self) -> &[u8] {
        &self.bytes[IV_LEN..]
    }

    /// Full framed bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consume into the framed bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Total framed length.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Always false: a valid blob carries at least IV and tag.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Length of the plaintext this blob decrypts to.
    pub fn plaintext_len(&self) -> usize {
        self.bytes.len() - IV_LEN - TAG_LEN
    }
}

impl TryFrom<Vec<u8>> for EncryptedBlob {
    type Error = CryptoError;

    fn try_from(bytes: Vec<u8>) -> Result<Self, Self::Error> {
        Self::from_bytes(bytes)
    }
}

impl From<EncryptedBlob> for Vec<u8> {
    fn from(blob: EncryptedBlob) -> Self {
        blob.bytes
    }
}

impl fmt::Debug for EncryptedBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedBlob")
            .field("len", &self.bytes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_framing_accessors() {
        let mut raw = vec![1u8; IV_LEN];
        raw.extend_from_slice(&[2u8; 5]);
        raw.extend_from_slice(&[3u8; TAG_LEN]);

        let blob = EncryptedBlob::from_bytes(raw).unwrap();
        assert_eq!(blob.len(), 37);
        assert_eq!(blob.plaintext_len(), 5);
        assert!(blob.iv().iter().all(|&b| b == 1));
        assert_eq!(blob.ciphertext(), &[2u8; 5]);
        assert!(blob.tag().iter().all(|&b| b == 3));
    }

    #[test]
    fn test_too_short_rejected() {
        let err = EncryptedBlob::from_bytes(vec![0u8; 31]).unwrap_err();
        assert_eq!(err, CryptoError::MalformedBlob { len: 31 });
    }

    #[test]
    fn test_empty_plaintext_is_valid() {
        let blob = EncryptedBlob::from_bytes(vec![0u8; 32]).unwrap();
        assert_eq!(blob.plaintext_len(), 0);
        assert!(blob.ciphertext().is_empty());
    }

    #[test]
    fn test_serde_rejects_short_bytes() {
        let json = serde_json::to_string(&vec![0u8; 10]).unwrap();
        assert!(serde_json::from_str::<EncryptedBlob>(&json).is_err());
    }
}
