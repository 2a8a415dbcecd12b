//! Principal key pairs, purpose labels and symmetric keys.

use std::fmt;

use hkdf::Hkdf;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::{PublicKey, SecretKey};
use rand::rngs::OsRng;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

/// Length of a derived symmetric key.
pub const KEY_LEN: usize = 32;

/// HKDF `info` label. Each purpose yields an independent key from the same
/// shared secret, so a key derived for one purpose never decrypts another.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KeyPurpose {
    /// Device update sealed to the aggregator or to the quorum key
    ModelEncryption,
    /// Key share sealed by the authority to a holder, or by a holder to a decryption node
    KeyShareEncryption,
    /// Quorum decryption scalar derived from the reconstructed master secret
    ModelDecryption,
}

impl KeyPurpose {
    /// The raw label bytes fed to HKDF.
    pub fn label(self) -> &'static [u8] {
        match self {
            KeyPurpose::ModelEncryption => b"model_encryption",
            KeyPurpose::KeyShareEncryption => b"key_share_encryption",
            KeyPurpose::ModelDecryption => b"model_decryption",
        }
    }
}

/// 32-byte AEAD key. Zeroized on drop, redacted in `Debug`.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_LEN]);

impl SymmetricKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// HKDF-SHA256 (no salt) over `ikm`, expanded with the purpose label.
    pub fn derive(ikm: &[u8], purpose: KeyPurpose) -> Result<Self, CryptoError> {
        let mut okm = [0u8; KEY_LEN];
        hkdf_expand(ikm, purpose, &mut okm)?;
        let key = Self(okm);
        okm.zeroize();
        Ok(key)
    }

    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey(<redacted>)")
    }
}

fn hkdf_expand(
    ikm: &[u8],
    purpose: KeyPurpose,
    out: &mut [u8; KEY_LEN],
) -> Result<(), CryptoError> {
    Hkdf::<Sha256>::new(None, ikm)
        .expand(purpose.label(), out)
        .map_err(|_| CryptoError::InvalidSecretKey)
}

/// secp256k1 key pair owned by one principal. The secret scalar never leaves
/// its owner; only [`KeyPair::public_key`] is shared.
#[derive(Clone)]
pub struct KeyPair {
    secret: SecretKey,
    public: PublicKey,
}

impl KeyPair {
    /// Fresh key pair from the OS CSPRNG.
    pub fn generate() -> Self {
        let secret = SecretKey::random(&mut OsRng);
        let public = secret.public_key();
        Self { secret, public }
    }

    /// Key pair whose scalar is HKDF(`ikm`, `purpose`).
    ///
    /// Used to turn the reconstructed master secret into the quorum's
    /// decryption scalar. Fails only if the 32 derived bytes are zero or not
    /// below the group order (probability ~2^-128).
    pub fn derive(ikm: &[u8], purpose: KeyPurpose) -> Result<Self, CryptoError> {
        let mut okm = [0u8; KEY_LEN];
        hkdf_expand(ikm, purpose, &mut okm)?;
        let secret = SecretKey::from_slice(&okm).map_err(|_| CryptoError::InvalidSecretKey);
        okm.zeroize();
        let secret = secret?;
        let public = secret.public_key();
        Ok(Self { secret, public })
    }

    /// Public point, safe to publish.
    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// SEC1 uncompressed encoding of the public point (65 bytes).
    pub fn public_key_bytes(&self) -> Vec<u8> {
        encode_public_key(&self.public)
    }

    pub(crate) fn secret_key(&self) -> &SecretKey {
        &self.secret
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public_key_bytes())
            .finish_non_exhaustive()
    }
}

/// SEC1 uncompressed encoding (`0x04 || x || y`).
pub fn encode_public_key(public: &PublicKey) -> Vec<u8> {
    public.to_encoded_point(false).as_bytes().to_vec()
}

/// Parse SEC1 bytes, rejecting the identity and off-curve points.
pub fn decode_public_key(bytes: &[u8]) -> Result<PublicKey, CryptoError> {
    PublicKey::from_sec1_bytes(bytes).map_err(|_| CryptoError::InvalidPublicKey)
}
