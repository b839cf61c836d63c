//! Key-Encryption-Key loading.
//!
//! The KEK comes from an environment variable (64 hex characters) or, when
//! that is unset, from the OS keychain through the `keyring` crate:
//! - macOS: Keychain
//! - Linux: kernel keyutils
//! - Windows: Credential Manager

use thiserror::Error;
use zeroize::Zeroizing;

use crate::middleware::vault::{self, KEY_LEN, KeyVault};

pub const KEYRING_SERVICE: &str = "byokgate";
pub const KEYRING_USER_CURRENT: &str = "kek";
pub const KEYRING_USER_PREVIOUS: &str = "kek-previous";

pub const ENV_KEK: &str = "BYOKGATE_KEK";
pub const ENV_PREVIOUS_KEK: &str = "BYOKGATE_PREVIOUS_KEK";

#[derive(Debug, Error)]
pub enum KekError {
    #[error("no KEK configured: set {env} or store it in the OS keyring")]
    Missing { env: &'static str },
    #[error("KEK is not valid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),
    #[error(transparent)]
    Vault(#[from] vault::VaultError),
    #[error("previous KEK: {0}")]
    Previous(#[source] Box<KekError>),
}

/// Decode a hex-encoded KEK. Length is checked later by `KeyVault::new`.
pub fn decode_kek_hex(value: &str) -> Result<Zeroizing<Vec<u8>>, KekError> {
    Ok(Zeroizing::new(hex::decode(value.trim())?))
}

/// Load the current KEK: `env_value` first, then the keyring.
pub fn load_current(env_value: Option<String>) -> Result<Zeroizing<Vec<u8>>, KekError> {
    match load(env_value, KEYRING_USER_CURRENT)? {
        Some(kek) => Ok(kek),
        None => Err(KekError::Missing { env: ENV_KEK }),
    }
}

/// Load the previous KEK if one is configured.
pub fn load_previous(env_value: Option<String>) -> Result<Option<Zeroizing<Vec<u8>>>, KekError> {
    load(env_value, KEYRING_USER_PREVIOUS)
}

/// Build the vault from the current KEK and, when one is configured, the
/// previous KEK. A previous KEK that is set but unusable is an error.
pub fn load_vault(
    current_env: Option<String>,
    previous_env: Option<String>,
) -> Result<KeyVault, KekError> {
    let current = load_current(current_env)?;
    let vault = KeyVault::new(&current)?;
    let previous = |e: KekError| KekError::Previous(Box::new(e));
    match load_previous(previous_env).map_err(previous)? {
        Some(kek) => {
            let vault = vault.with_previous_kek(&kek).map_err(|e| previous(e.into()))?;
            tracing::info!("Previous KEK loaded for rotation");
            Ok(vault)
        }
        None => Ok(vault),
    }
}

fn load(env_value: Option<String>, keyring_user: &str) -> Result<Option<Zeroizing<Vec<u8>>>, KekError> {
    let env_value = env_value.map(Zeroizing::new);
    if let Some(value) = env_value.as_ref().filter(|v| !v.trim().is_empty()) {
        return decode_kek_hex(value).map(Some);
    }

    let entry = keyring::Entry::new(KEYRING_SERVICE, keyring_user)?;
    match entry.get_password() {
        Ok(value) => {
            let value = Zeroizing::new(value);
            decode_kek_hex(&value).map(Some)
        }
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Store a hex KEK in the OS keychain.
pub fn store_in_keyring(keyring_user: &str, kek_hex: &str) -> Result<(), KekError> {
    decode_kek_hex(kek_hex)?;
    let entry = keyring::Entry::new(KEYRING_SERVICE, keyring_user)?;
    entry.set_password(kek_hex)?;
    Ok(())
}

/// Generate a fresh random KEK, hex-encoded.
pub fn generate_kek_hex() -> Result<Zeroizing<String>, KekError> {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    vault::fill_random(key.as_mut_slice())?;
    Ok(Zeroizing::new(hex::encode(key.as_slice())))
}
