//! ECDH key agreement and AES-256-GCM sealing.

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::AesGcm;
use k256::{PublicKey, SecretKey};
use rand::rngs::OsRng;
use rand::RngCore;

use super::blob::{EncryptedBlob, IV_LEN};
use super::keys::{decode_public_key, KeyPurpose, SymmetricKey};
use crate::error::CryptoError;

/// AES-256-GCM with a 16-byte IV.
type Cipher = AesGcm<Aes256, U16>;

/// ECDH between `my_secret` and `their_public`, then HKDF with the purpose label.
pub fn derive_shared_key(
    my_secret: &SecretKey,
    their_public: &PublicKey,
    purpose: KeyPurpose,
) -> Result<SymmetricKey, CryptoError> {
    let shared = k256::ecdh::diffie_hellman(my_secret.to_nonzero_scalar(), their_public.as_affine());
    SymmetricKey::derive(shared.raw_secret_bytes().as_slice(), purpose)
}

/// [`derive_shared_key`] for a peer key still in SEC1 wire form.
///
/// Fails with [`CryptoError::InvalidPublicKey`] for the identity point,
/// off-curve points or malformed encodings.
pub fn derive_shared_key_from_bytes(
    my_secret: &SecretKey,
    their_public: &[u8],
    purpose: KeyPurpose,
) -> Result<SymmetricKey, CryptoError> {
    let their_public = decode_public_key(their_public)?;
    derive_shared_key(my_secret, &their_public, purpose)
}

/// Encrypt under `key` with a fresh random IV.
///
/// Two calls on the same plaintext produce different blobs that decrypt to
/// the same bytes.
pub fn encrypt(key: &SymmetricKey, plaintext: &[u8]) -> Result<EncryptedBlob, CryptoError> {
    let cipher = Cipher::new(GenericArray::from_slice(key.as_bytes()));

    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);

    let sealed = cipher
        .encrypt(GenericArray::from_slice(&iv), plaintext)
        .map_err(|_| CryptoError::PlaintextTooLong)?;

    Ok(EncryptedBlob::from_parts(&iv, sealed))
}

/// Decrypt and verify. Fails closed: on a bad tag no plaintext is returned.
pub fn decrypt(key: &SymmetricKey, blob: &EncryptedBlob) -> Result<Vec<u8>, CryptoError> {
    let cipher = Cipher::new(GenericArray::from_slice(key.as_bytes()));

    cipher
        .decrypt(GenericArray::from_slice(blob.iv()), blob.sealed())
        .map_err(|_| CryptoError::AuthenticationFailed)
}

/// Derive the pairwise key for `purpose` and encrypt in one step.
pub fn seal(
    my_secret: &SecretKey,
    their_public: &PublicKey,
    purpose: KeyPurpose,
    plaintext: &[u8],
) -> Result<EncryptedBlob, CryptoError> {
    let key = derive_shared_key(my_secret, their_public, purpose)?;
    encrypt(&key, plaintext)
}

/// Derive the pairwise key for `purpose` and decrypt in one step.
pub fn open(
    my_secret: &SecretKey,
    their_public: &PublicKey,
    purpose: KeyPurpose,
    blob: &EncryptedBlob,
) -> Result<Vec<u8>, CryptoError> {
    let key = derive_shared_key(my_secret, their_public, purpose)?;
    decrypt(&key, blob)
}
