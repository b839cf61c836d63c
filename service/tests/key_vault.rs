use byokgate_service::middleware::vault::{EncryptedBundle, KeyVault, VaultError};

const KEK_A: [u8; 32] = [0xA1; 32];
const KEK_B: [u8; 32] = [0xB2; 32];
const SECRET: &str = "sk-live-0123456789abcdef";

fn sealed() -> (KeyVault, EncryptedBundle) {
    let vault = KeyVault::new(&KEK_A).unwrap();
    let bundle = vault.encrypt(SECRET.as_bytes()).unwrap();
    (vault, bundle)
}

#[test]
fn secret_round_trips_as_string() {
    let (vault, bundle) = sealed();
    assert_eq!(vault.decrypt_secret(&bundle).unwrap().as_str(), SECRET);
}

#[test]
fn empty_secret_round_trips() {
    let vault = KeyVault::new(&KEK_A).unwrap();
    let bundle = vault.encrypt(b"").unwrap();
    assert!(vault.decrypt(&bundle).unwrap().is_empty());
}

#[test]
fn every_encryption_is_fresh() {
    let vault = KeyVault::new(&KEK_A).unwrap();
    let first = vault.encrypt(SECRET.as_bytes()).unwrap();
    let second = vault.encrypt(SECRET.as_bytes()).unwrap();

    assert_ne!(first.encrypted_secret, second.encrypted_secret);
    assert_ne!(first.secret_nonce, second.secret_nonce);
    assert_ne!(first.encrypted_dek, second.encrypted_dek);
    assert_ne!(first.dek_nonce, second.dek_nonce);
    assert_eq!(first.secret_nonce.len(), 12);
    assert_eq!(first.dek_nonce.len(), 12);
}

#[test]
fn tampering_with_any_field_fails_decryption() {
    let (vault, bundle) = sealed();
    let tamper: [fn(&mut EncryptedBundle); 4] = [
        |b| b.encrypted_secret[0] ^= 0x01,
        |b| b.secret_nonce[0] ^= 0x01,
        |b| b.encrypted_dek[0] ^= 0x01,
        |b| b.dek_nonce[0] ^= 0x01,
    ];

    for (i, f) in tamper.iter().enumerate() {
        let mut bad = bundle.clone();
        f(&mut bad);
        assert!(
            matches!(vault.decrypt(&bad), Err(VaultError::DecryptionFailed)),
            "field {i} tamper went unnoticed"
        );
    }
}

#[test]
fn truncated_ciphertext_fails_decryption() {
    let (vault, mut bundle) = sealed();
    bundle.encrypted_secret.truncate(4);
    assert!(matches!(
        vault.decrypt(&bundle),
        Err(VaultError::DecryptionFailed)
    ));
}

#[test]
fn wrong_kek_fails_decryption() {
    let (_, bundle) = sealed();
    let other = KeyVault::new(&KEK_B).unwrap();
    assert!(matches!(
        other.decrypt(&bundle),
        Err(VaultError::DecryptionFailed)
    ));
}

#[test]
fn rotated_dek_decrypts_under_new_kek_only() {
    let (old_vault, bundle) = sealed();
    let rotated = old_vault.rotate_dek(&bundle, &KEK_B).unwrap();
    let new_bundle = bundle.with_rotated_dek(rotated);

    assert_eq!(new_bundle.encrypted_secret, bundle.encrypted_secret);
    assert_eq!(new_bundle.secret_nonce, bundle.secret_nonce);
    assert_ne!(new_bundle.encrypted_dek, bundle.encrypted_dek);

    let new_vault = KeyVault::new(&KEK_B).unwrap();
    assert_eq!(new_vault.decrypt_secret(&new_bundle).unwrap().as_str(), SECRET);
    assert!(old_vault.decrypt(&new_bundle).is_err());

    // The pre-rotation row is untouched and still opens under the old KEK.
    assert_eq!(old_vault.decrypt_secret(&bundle).unwrap().as_str(), SECRET);
}

#[test]
fn previous_kek_unwraps_unrotated_rows() {
    let (_, bundle) = sealed();

    let without = KeyVault::new(&KEK_B).unwrap();
    assert!(without.decrypt(&bundle).is_err());

    let with = KeyVault::new(&KEK_B)
        .unwrap()
        .with_previous_kek(&KEK_A)
        .unwrap();
    assert_eq!(with.decrypt_secret(&bundle).unwrap().as_str(), SECRET);

    // New rows are always wrapped under the current KEK.
    let fresh = with.encrypt(b"new").unwrap();
    assert!(without.decrypt(&fresh).is_ok());
}

#[test]
fn invalid_key_lengths_are_rejected_up_front() {
    for len in [0usize, 16, 31, 33, 64] {
        let key = vec![0u8; len];
        assert!(
            matches!(KeyVault::new(&key), Err(VaultError::InvalidKeyLength(n)) if n == len),
            "length {len}"
        );
    }

    let vault = KeyVault::new(&KEK_A).unwrap();
    assert!(matches!(
        vault.with_previous_kek(&[1u8; 16]),
        Err(VaultError::InvalidKeyLength(16))
    ));

    let (vault, bundle) = sealed();
    assert!(matches!(
        vault.rotate_dek(&bundle, &[1u8; 24]),
        Err(VaultError::InvalidKeyLength(24))
    ));
}

#[test]
fn non_utf8_secret_is_reported() {
    let vault = KeyVault::new(&KEK_A).unwrap();
    let bundle = vault.encrypt(&[0xff, 0xfe, 0xfd]).unwrap();
    assert!(matches!(
        vault.decrypt_secret(&bundle),
        Err(VaultError::InvalidUtf8)
    ));
}
