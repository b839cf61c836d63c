//! Operator actions on tenants and credentials.
//!
//! These run from the CLI against the same store file the server reads.
//! Nothing here is reachable over HTTP.

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::middleware::kek::KekError;
use crate::middleware::store::{MemoryStore, ProviderCredential, StoreError, Tenant};
use crate::middleware::vault::{KeyVault, VaultError};
use crate::providers::{CatalogError, ProviderCatalog, ValidateKeyError};

#[derive(Debug, Error)]
pub enum AdminError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Vault(#[from] VaultError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Validation(#[from] ValidateKeyError),
    #[error(transparent)]
    Kek(#[from] KekError),
    #[error("secret must not be empty")]
    EmptySecret,
}

/// Tenant metadata safe to print.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TenantSummary {
    pub id: Uuid,
    pub name: String,
    pub enabled: bool,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

impl From<&Tenant> for TenantSummary {
    fn from(t: &Tenant) -> Self {
        Self {
            id: t.id,
            name: t.name.clone(),
            enabled: t.enabled,
            created_at_ms: t.created_at_ms,
            updated_at_ms: t.updated_at_ms,
        }
    }
}

/// Credential metadata without any ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CredentialSummary {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub provider_name: String,
    pub alias: String,
    pub is_active: bool,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

impl From<&ProviderCredential> for CredentialSummary {
    fn from(c: &ProviderCredential) -> Self {
        Self {
            id: c.id,
            tenant_id: c.tenant_id,
            provider_name: c.provider_name.clone(),
            alias: c.alias.clone(),
            is_active: c.is_active,
            created_at_ms: c.created_at_ms,
            updated_at_ms: c.updated_at_ms,
        }
    }
}

/// A tenant as returned at creation or rotation, the only time the
/// plaintext token is available.
#[derive(Debug, Serialize)]
pub struct IssuedToken {
    pub tenant: TenantSummary,
    pub token: String,
}

pub fn create_tenant(store: &MemoryStore, name: &str) -> Result<IssuedToken, AdminError> {
    let (tenant, token) = store.create_tenant(name)?;
    tracing::info!(tenant_id = %tenant.id, name, "Created tenant");
    Ok(IssuedToken {
        tenant: TenantSummary::from(&tenant),
        token,
    })
}

pub fn rotate_tenant_token(store: &MemoryStore, tenant_id: Uuid) -> Result<IssuedToken, AdminError> {
    let token = store.rotate_tenant_token(tenant_id)?;
    let tenant = store
        .get_tenant(tenant_id)
        .ok_or(StoreError::TenantNotFound(tenant_id))?;
    tracing::info!(%tenant_id, "Rotated tenant token");
    Ok(IssuedToken {
        tenant: TenantSummary::from(&tenant),
        token,
    })
}

pub fn list_tenants(store: &MemoryStore) -> Vec<TenantSummary> {
    store.list_tenants().iter().map(TenantSummary::from).collect()
}

/// Input for [`add_credential`].
pub struct NewCredential<'a> {
    pub tenant_id: Uuid,
    pub provider_name: &'a str,
    pub alias: &'a str,
    pub secret: Zeroizing<String>,
    /// Probe the provider with the key before storing it.
    pub validate: bool,
}

/// Encrypt and store a provider key, making it the tenant's active
/// credential for that provider.
pub async fn add_credential(
    store: &MemoryStore,
    vault: &KeyVault,
    catalog: &ProviderCatalog,
    client: &reqwest::Client,
    new: NewCredential<'_>,
) -> Result<CredentialSummary, AdminError> {
    if new.secret.trim().is_empty() {
        return Err(AdminError::EmptySecret);
    }
    if store.get_tenant(new.tenant_id).is_none() {
        return Err(StoreError::TenantNotFound(new.tenant_id).into());
    }
    let provider = catalog.get(new.provider_name)?;

    if new.validate {
        provider.validate_key_dyn(client, &new.secret).await?;
        tracing::debug!(provider = new.provider_name, "Provider accepted key");
    }

    let bundle = vault.encrypt(new.secret.as_bytes())?;
    let credential =
        store.insert_credential(new.tenant_id, provider.name(), new.alias, bundle, true)?;
    tracing::info!(
        tenant_id = %new.tenant_id,
        credential_id = %credential.id,
        provider = new.provider_name,
        "Added provider credential"
    );
    Ok(CredentialSummary::from(&credential))
}

pub fn list_credentials(store: &MemoryStore, tenant_id: Uuid) -> Vec<CredentialSummary> {
    store
        .list_credentials(tenant_id)
        .iter()
        .map(CredentialSummary::from)
        .collect()
}

/// Re-wrap every stored DEK under `new_kek`.
///
/// Every credential is re-wrapped in memory first; the store is written only
/// if all of them succeed. Returns the number of credentials rotated.
pub fn rotate_kek(
    store: &MemoryStore,
    vault: &KeyVault,
    new_kek: &[u8],
) -> Result<usize, AdminError> {
    // Rejects a bad key length before touching any row.
    KeyVault::new(new_kek)?;

    let credentials = store.snapshot().credentials;
    let rotated = credentials
        .iter()
        .map(|c| Ok((c.id, vault.rotate_dek(&c.bundle, new_kek)?)))
        .collect::<Result<Vec<_>, VaultError>>()
        .inspect_err(|e| tracing::error!(error = %e, "KEK rotation aborted, store unchanged"))?;

    let count = store.apply_rotated_deks(rotated)?;
    tracing::info!(credentials = count, "Rotated KEK");
    Ok(count)
}
