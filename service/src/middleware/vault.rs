//! Envelope encryption for provider credentials.
//!
//! Each secret is sealed under its own random Data Encryption Key (DEK) with
//! AES-256-GCM, and the DEK is in turn sealed under the process-wide Key
//! Encryption Key (KEK). The KEK only ever wraps DEKs, so rotating it means
//! re-wrapping DEKs; the secret ciphertext is never touched.

use aes_gcm::{Aes256Gcm, KeyInit, Nonce, aead::Aead};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroizing;

/// AES-256 key length in bytes.
pub const KEY_LEN: usize = 32;
/// AES-GCM nonce length in bytes.
pub const NONCE_LEN: usize = 12;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("invalid key length: expected {KEY_LEN} bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error("encryption failed")]
    EncryptionFailed,
    #[error("decryption failed")]
    DecryptionFailed,
    #[error("decrypted secret is not valid UTF-8")]
    InvalidUtf8,
    #[error("random number generator failure: {0}")]
    Rng(String),
}

// ---------------------------------------------------------------------------
// Stored material
// ---------------------------------------------------------------------------

/// The four encrypted fields persisted for every provider credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedBundle {
    #[serde(with = "hex_bytes")]
    pub encrypted_secret: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub secret_nonce: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub encrypted_dek: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub dek_nonce: Vec<u8>,
}

/// A DEK re-wrapped under a new KEK.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotatedDek {
    pub encrypted_dek: Vec<u8>,
    pub dek_nonce: Vec<u8>,
}

impl EncryptedBundle {
    /// Return a copy of this bundle carrying the re-wrapped DEK.
    ///
    /// The secret ciphertext and its nonce are kept as-is.
    pub fn with_rotated_dek(&self, rotated: RotatedDek) -> Self {
        Self {
            encrypted_secret: self.encrypted_secret.clone(),
            secret_nonce: self.secret_nonce.clone(),
            encrypted_dek: rotated.encrypted_dek,
            dek_nonce: rotated.dek_nonce,
        }
    }
}

// ---------------------------------------------------------------------------
// KeyVault
// ---------------------------------------------------------------------------

/// Envelope-encryption engine bound to one KEK (plus an optional previous
/// KEK accepted for unwrapping while a rotation is in flight).
///
/// Constructed once at startup and shared by reference; all operations take
/// `&self` and are safe to call concurrently.
pub struct KeyVault {
    current: Aes256Gcm,
    previous: Option<Aes256Gcm>,
}

impl std::fmt::Debug for KeyVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyVault")
            .field("has_previous_kek", &self.previous.is_some())
            .finish_non_exhaustive()
    }
}

impl KeyVault {
    /// Build a vault from a 32-byte KEK. Any other length is rejected here,
    /// not at first use.
    pub fn new(kek: &[u8]) -> Result<Self, VaultError> {
        Ok(Self {
            current: cipher_for(kek)?,
            previous: None,
        })
    }

    /// Also accept `kek` when unwrapping DEKs that have not been rotated yet.
    pub fn with_previous_kek(mut self, kek: &[u8]) -> Result<Self, VaultError> {
        self.previous = Some(cipher_for(kek)?);
        Ok(self)
    }

    /// Seal `plaintext` under a fresh DEK, and the DEK under the KEK.
    ///
    /// Both nonces and the DEK are freshly random on every call, so sealing
    /// the same plaintext twice never yields identical bytes.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedBundle, VaultError> {
        let mut dek = Zeroizing::new([0u8; KEY_LEN]);
        fill_random(dek.as_mut_slice())?;
        let dek_cipher = cipher_for(dek.as_slice())?;

        let secret_nonce = random_nonce()?;
        let encrypted_secret = dek_cipher
            .encrypt(Nonce::from_slice(&secret_nonce), plaintext)
            .map_err(|_| VaultError::EncryptionFailed)?;

        let dek_nonce = random_nonce()?;
        let encrypted_dek = self
            .current
            .encrypt(Nonce::from_slice(&dek_nonce), dek.as_slice())
            .map_err(|_| VaultError::EncryptionFailed)?;

        Ok(EncryptedBundle {
            encrypted_secret,
            secret_nonce: secret_nonce.to_vec(),
            encrypted_dek,
            dek_nonce: dek_nonce.to_vec(),
        })
    }

    /// Open a bundle. Any authentication failure (tampering, wrong KEK,
    /// malformed nonce) is reported as [`VaultError::DecryptionFailed`] and
    /// no partial plaintext is returned.
    pub fn decrypt(&self, bundle: &EncryptedBundle) -> Result<Zeroizing<Vec<u8>>, VaultError> {
        let dek = self.unwrap_dek(bundle)?;
        let dek_cipher = cipher_for(&dek).map_err(|_| VaultError::DecryptionFailed)?;
        dek_cipher
            .decrypt(nonce(&bundle.secret_nonce)?, bundle.encrypted_secret.as_slice())
            .map(Zeroizing::new)
            .map_err(|_| VaultError::DecryptionFailed)
    }

    /// [`decrypt`](Self::decrypt) for secrets that are UTF-8 API keys.
    pub fn decrypt_secret(&self, bundle: &EncryptedBundle) -> Result<Zeroizing<String>, VaultError> {
        let bytes = self.decrypt(bundle)?;
        let text = std::str::from_utf8(&bytes).map_err(|_| VaultError::InvalidUtf8)?;
        Ok(Zeroizing::new(text.to_string()))
    }

    /// Unwrap the bundle's DEK with this vault's KEK and re-wrap it under
    /// `new_kek`. The secret ciphertext is not re-encrypted.
    pub fn rotate_dek(
        &self,
        bundle: &EncryptedBundle,
        new_kek: &[u8],
    ) -> Result<RotatedDek, VaultError> {
        let new_cipher = cipher_for(new_kek)?;
        let dek = self.unwrap_dek(bundle)?;

        let dek_nonce = random_nonce()?;
        let encrypted_dek = new_cipher
            .encrypt(Nonce::from_slice(&dek_nonce), dek.as_slice())
            .map_err(|_| VaultError::EncryptionFailed)?;

        Ok(RotatedDek {
            encrypted_dek,
            dek_nonce: dek_nonce.to_vec(),
        })
    }

    fn unwrap_dek(&self, bundle: &EncryptedBundle) -> Result<Zeroizing<Vec<u8>>, VaultError> {
        let dek_nonce = nonce(&bundle.dek_nonce)?;
        let encrypted_dek = bundle.encrypted_dek.as_slice();

        let dek = match self.current.decrypt(dek_nonce, encrypted_dek) {
            Ok(dek) => dek,
            Err(_) => {
                let previous = self.previous.as_ref().ok_or(VaultError::DecryptionFailed)?;
                let dek = previous
                    .decrypt(dek_nonce, encrypted_dek)
                    .map_err(|_| VaultError::DecryptionFailed)?;
                tracing::debug!("unwrapped DEK with previous KEK");
                dek
            }
        };

        let dek = Zeroizing::new(dek);
        if dek.len() != KEY_LEN {
            return Err(VaultError::DecryptionFailed);
        }
        Ok(dek)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn cipher_for(key: &[u8]) -> Result<Aes256Gcm, VaultError> {
    if key.len() != KEY_LEN {
        return Err(VaultError::InvalidKeyLength(key.len()));
    }
    Aes256Gcm::new_from_slice(key).map_err(|_| VaultError::InvalidKeyLength(key.len()))
}

fn nonce(bytes: &[u8]) -> Result<&Nonce<aes_gcm::aead::consts::U12>, VaultError> {
    if bytes.len() != NONCE_LEN {
        return Err(VaultError::DecryptionFailed);
    }
    Ok(Nonce::from_slice(bytes))
}

fn random_nonce() -> Result<[u8; NONCE_LEN], VaultError> {
    let mut nonce = [0u8; NONCE_LEN];
    fill_random(&mut nonce)?;
    Ok(nonce)
}

pub(crate) fn fill_random(buf: &mut [u8]) -> Result<(), VaultError> {
    getrandom::fill(buf).map_err(|e| VaultError::Rng(e.to_string()))
}

/// Hex (de)serialization for binary columns.
mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}
