//! Authenticated encryption channel between principals.
//!
//! Every confidential payload in the system travels through the same
//! pipeline:
//!
//! 1. ECDH on secp256k1 between the sender's secret key and the
//!    recipient's public key
//! 2. HKDF-SHA256 over the raw shared x-coordinate, with a purpose label as
//!    `info` ([`KeyPurpose`])
//! 3. AES-256-GCM with a fresh random 16-byte IV, framed as
//!    `[IV: 16][CIPHERTEXT: N][TAG: 16]` ([`EncryptedBlob`])
//!
//! Distinct purpose labels keep model-update keys and key-share keys
//! separate even when the same two principals talk to each other.

pub mod blob;
pub mod channel;
pub mod keys;

pub use blob::{EncryptedBlob, IV_LEN, TAG_LEN};
pub use channel::{decrypt, derive_shared_key, derive_shared_key_from_bytes, encrypt, open, seal};
pub use keys::{decode_public_key, encode_public_key, KeyPair, KeyPurpose, SymmetricKey};

pub use k256::{PublicKey, SecretKey};
