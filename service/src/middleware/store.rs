//! Tenant and credential storage.
//!
//! The proxy only consumes two narrow read interfaces, [`TokenStore`] and
//! [`CredentialStore`]. [`MemoryStore`] implements both and can persist its
//! rows to a JSON document. Secrets inside that document are already
//! envelope-encrypted and tenant tokens are stored only as SHA-256 digests.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{PoisonError, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::middleware::auth::{self, TenantContext};
use crate::middleware::vault::{EncryptedBundle, RotatedDek};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("tenant not found: {0}")]
    TenantNotFound(Uuid),
    #[error("credential not found: {0}")]
    CredentialNotFound(Uuid),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("store backend error: {0}")]
    Backend(String),
}

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

/// An organization allowed to call the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    /// SHA-256 hex digest of the bearer token. Globally unique.
    pub token_hash: String,
    pub enabled: bool,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

impl Tenant {
    pub fn context(&self) -> TenantContext {
        TenantContext {
            tenant_id: self.id,
            tenant_name: self.name.clone(),
            enabled: self.enabled,
        }
    }
}

/// One tenant's API key for one provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCredential {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub provider_name: String,
    pub alias: String,
    #[serde(flatten)]
    pub bundle: EncryptedBundle,
    pub is_active: bool,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

/// The persisted document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreData {
    #[serde(default)]
    pub tenants: Vec<Tenant>,
    #[serde(default)]
    pub credentials: Vec<ProviderCredential>,
}

// ---------------------------------------------------------------------------
// Collaborator traits
// ---------------------------------------------------------------------------

/// Resolves hashed tenant tokens.
pub trait TokenStore: Send + Sync {
    /// Look up the tenant owning `token_hash`. `Ok(None)` means unknown.
    fn find_tenant_by_token_hash(
        &self,
        token_hash: &str,
    ) -> impl Future<Output = Result<Option<TenantContext>, StoreError>> + Send;
}

/// Resolves a tenant's active credential for a provider.
pub trait CredentialStore: Send + Sync {
    /// `Ok(None)` means the tenant has no active credential for the provider.
    fn get_active_credential(
        &self,
        tenant_id: Uuid,
        provider_name: &str,
    ) -> impl Future<Output = Result<Option<EncryptedBundle>, StoreError>> + Send;
}

/// Boxed future returned by the object-safe store wrappers.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Object-safe version of [`TokenStore`].
///
/// Auto-implemented for every `T: TokenStore + 'static`.
pub trait TokenStoreDyn: Send + Sync {
    fn find_tenant_by_token_hash_dyn<'a>(
        &'a self,
        token_hash: &'a str,
    ) -> StoreFuture<'a, Option<TenantContext>>;
}

impl<T: TokenStore + 'static> TokenStoreDyn for T {
    fn find_tenant_by_token_hash_dyn<'a>(
        &'a self,
        token_hash: &'a str,
    ) -> StoreFuture<'a, Option<TenantContext>> {
        Box::pin(self.find_tenant_by_token_hash(token_hash))
    }
}

/// Object-safe version of [`CredentialStore`].
pub trait CredentialStoreDyn: Send + Sync {
    fn get_active_credential_dyn<'a>(
        &'a self,
        tenant_id: Uuid,
        provider_name: &'a str,
    ) -> StoreFuture<'a, Option<EncryptedBundle>>;
}

impl<T: CredentialStore + 'static> CredentialStoreDyn for T {
    fn get_active_credential_dyn<'a>(
        &'a self,
        tenant_id: Uuid,
        provider_name: &'a str,
    ) -> StoreFuture<'a, Option<EncryptedBundle>> {
        Box::pin(self.get_active_credential(tenant_id, provider_name))
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// In-memory store with optional JSON-file persistence.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<StoreData>,
    path: Option<PathBuf>,
}

impl MemoryStore {
    /// Create an empty, non-persistent store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a store backed by `path`. A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let data = read_document(&path)?;
        tracing::info!(
            path = %path.display(),
            tenants = data.tenants.len(),
            credentials = data.credentials.len(),
            "Loaded credential store"
        );
        Ok(Self {
            data: RwLock::new(data),
            path: Some(path),
        })
    }

    /// Re-read the backing file, replacing the in-memory rows.
    pub fn reload(&self) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let data = read_document(path)?;
        *self.data.write().unwrap_or_else(PoisonError::into_inner) = data;
        Ok(())
    }

    /// A copy of every row.
    pub fn snapshot(&self) -> StoreData {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Apply `f` to the rows and persist the result. If `f` fails nothing
    /// is changed.
    fn update<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut StoreData) -> Result<T, StoreError>,
    {
        let mut guard = self.data.write().unwrap_or_else(PoisonError::into_inner);
        let mut draft = guard.clone();
        let out = f(&mut draft)?;
        if let Some(path) = &self.path {
            write_document(path, &draft)?;
        }
        *guard = draft;
        Ok(out)
    }

    // -----------------------------------------------------------------------
    // Tenants
    // -----------------------------------------------------------------------

    /// Create a tenant and return it with its plaintext token. The token is
    /// not retrievable afterwards.
    pub fn create_tenant(&self, name: &str) -> Result<(Tenant, String), StoreError> {
        let (token, token_hash) = new_token()?;
        let now = now_ms();
        let tenant = Tenant {
            id: Uuid::new_v4(),
            name: name.to_string(),
            token_hash,
            enabled: true,
            created_at_ms: now,
            updated_at_ms: now,
        };

        self.update(|data| {
            ensure_unique_hash(data, &tenant.token_hash)?;
            data.tenants.push(tenant.clone());
            Ok(())
        })?;
        Ok((tenant, token))
    }

    /// Replace a tenant's token. The old token stops working immediately.
    pub fn rotate_tenant_token(&self, tenant_id: Uuid) -> Result<String, StoreError> {
        let (token, token_hash) = new_token()?;
        self.update(|data| {
            ensure_unique_hash(data, &token_hash)?;
            let tenant = tenant_mut(data, tenant_id)?;
            tenant.token_hash = token_hash;
            tenant.updated_at_ms = now_ms();
            Ok(())
        })?;
        Ok(token)
    }

    /// Flip the tenant kill switch.
    pub fn set_tenant_enabled(&self, tenant_id: Uuid, enabled: bool) -> Result<(), StoreError> {
        self.update(|data| {
            let tenant = tenant_mut(data, tenant_id)?;
            tenant.enabled = enabled;
            tenant.updated_at_ms = now_ms();
            Ok(())
        })
    }

    /// Delete a tenant and every credential it owns. Returns the number of
    /// credentials removed.
    pub fn delete_tenant(&self, tenant_id: Uuid) -> Result<usize, StoreError> {
        self.update(|data| {
            let before = data.tenants.len();
            data.tenants.retain(|t| t.id != tenant_id);
            if data.tenants.len() == before {
                return Err(StoreError::TenantNotFound(tenant_id));
            }
            let before = data.credentials.len();
            data.credentials.retain(|c| c.tenant_id != tenant_id);
            Ok(before - data.credentials.len())
        })
    }

    pub fn get_tenant(&self, tenant_id: Uuid) -> Option<Tenant> {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .tenants
            .iter()
            .find(|t| t.id == tenant_id)
            .cloned()
    }

    pub fn list_tenants(&self) -> Vec<Tenant> {
        self.snapshot().tenants
    }

    // -----------------------------------------------------------------------
    // Credentials
    // -----------------------------------------------------------------------

    /// Store a new credential row. When `activate` is set, any other active
    /// credential for the same tenant and provider is deactivated.
    pub fn insert_credential(
        &self,
        tenant_id: Uuid,
        provider_name: &str,
        alias: &str,
        bundle: EncryptedBundle,
        activate: bool,
    ) -> Result<ProviderCredential, StoreError> {
        let now = now_ms();
        let credential = ProviderCredential {
            id: Uuid::new_v4(),
            tenant_id,
            provider_name: provider_name.to_string(),
            alias: alias.to_string(),
            bundle,
            is_active: activate,
            created_at_ms: now,
            updated_at_ms: now,
        };

        self.update(|data| {
            tenant_mut(data, tenant_id)?;
            if activate {
                deactivate_siblings(data, tenant_id, provider_name, now);
            }
            data.credentials.push(credential.clone());
            Ok(())
        })?;
        Ok(credential)
    }

    /// Activate or deactivate a credential. Activation deactivates siblings.
    pub fn set_credential_active(&self, credential_id: Uuid, active: bool) -> Result<(), StoreError> {
        self.update(|data| {
            let now = now_ms();
            let (tenant_id, provider_name) = {
                let credential = credential_mut(data, credential_id)?;
                (credential.tenant_id, credential.provider_name.clone())
            };
            if active {
                deactivate_siblings(data, tenant_id, &provider_name, now);
            }
            let credential = credential_mut(data, credential_id)?;
            credential.is_active = active;
            credential.updated_at_ms = now;
            Ok(())
        })
    }

    pub fn delete_credential(&self, credential_id: Uuid) -> Result<(), StoreError> {
        self.update(|data| {
            let before = data.credentials.len();
            data.credentials.retain(|c| c.id != credential_id);
            if data.credentials.len() == before {
                return Err(StoreError::CredentialNotFound(credential_id));
            }
            Ok(())
        })
    }

    pub fn list_credentials(&self, tenant_id: Uuid) -> Vec<ProviderCredential> {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .credentials
            .iter()
            .filter(|c| c.tenant_id == tenant_id)
            .cloned()
            .collect()
    }

    /// Swap in re-wrapped DEKs for the given credentials in one write.
    pub fn apply_rotated_deks(&self, rotated: Vec<(Uuid, RotatedDek)>) -> Result<usize, StoreError> {
        self.update(|data| {
            let now = now_ms();
            let count = rotated.len();
            for (credential_id, dek) in rotated {
                let credential = credential_mut(data, credential_id)?;
                credential.bundle = credential.bundle.with_rotated_dek(dek);
                credential.updated_at_ms = now;
            }
            Ok(count)
        })
    }
}

impl TokenStore for MemoryStore {
    async fn find_tenant_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<TenantContext>, StoreError> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        Ok(data
            .tenants
            .iter()
            .find(|t| t.token_hash == token_hash)
            .map(Tenant::context))
    }
}

impl CredentialStore for MemoryStore {
    async fn get_active_credential(
        &self,
        tenant_id: Uuid,
        provider_name: &str,
    ) -> Result<Option<EncryptedBundle>, StoreError> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        Ok(data
            .credentials
            .iter()
            .find(|c| c.tenant_id == tenant_id && c.provider_name == provider_name && c.is_active)
            .map(|c| c.bundle.clone()))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_document(path: &Path) -> Result<StoreData, StoreError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StoreData::default()),
        Err(e) => Err(e.into()),
    }
}

/// Write via a sibling temp file and rename so readers never see a torn file.
fn write_document(path: &Path, data: &StoreData) -> Result<(), StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let serialized = serde_json::to_vec_pretty(data)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &serialized)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn new_token() -> Result<(String, String), StoreError> {
    auth::generate_token().map_err(|e| StoreError::Backend(e.to_string()))
}

fn ensure_unique_hash(data: &StoreData, token_hash: &str) -> Result<(), StoreError> {
    if data.tenants.iter().any(|t| t.token_hash == token_hash) {
        return Err(StoreError::Conflict("token hash already in use".to_string()));
    }
    Ok(())
}

fn tenant_mut(data: &mut StoreData, tenant_id: Uuid) -> Result<&mut Tenant, StoreError> {
    data.tenants
        .iter_mut()
        .find(|t| t.id == tenant_id)
        .ok_or(StoreError::TenantNotFound(tenant_id))
}

fn credential_mut(
    data: &mut StoreData,
    credential_id: Uuid,
) -> Result<&mut ProviderCredential, StoreError> {
    data.credentials
        .iter_mut()
        .find(|c| c.id == credential_id)
        .ok_or(StoreError::CredentialNotFound(credential_id))
}

fn deactivate_siblings(data: &mut StoreData, tenant_id: Uuid, provider_name: &str, now: u64) {
    for c in data
        .credentials
        .iter_mut()
        .filter(|c| c.tenant_id == tenant_id && c.provider_name == provider_name && c.is_active)
    {
        c.is_active = false;
        c.updated_at_ms = now;
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::auth::hash_token;
    use crate::middleware::vault::KeyVault;

    fn bundle() -> EncryptedBundle {
        KeyVault::new(&[1u8; 32]).unwrap().encrypt(b"sk-test").unwrap()
    }

    #[tokio::test]
    async fn token_lookup_uses_hash() {
        let store = MemoryStore::new();
        let (tenant, token) = store.create_tenant("acme").unwrap();

        let found = store
            .find_tenant_by_token_hash(&hash_token(&token))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.tenant_id, tenant.id);
        assert!(found.enabled);

        assert!(store.find_tenant_by_token_hash(&token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn activation_keeps_one_active_per_provider() {
        let store = MemoryStore::new();
        let (tenant, _) = store.create_tenant("acme").unwrap();

        let first = store
            .insert_credential(tenant.id, "openai", "primary", bundle(), true)
            .unwrap();
        let second = store
            .insert_credential(tenant.id, "openai", "rotated", bundle(), true)
            .unwrap();

        let rows = store.list_credentials(tenant.id);
        let active: Vec<_> = rows.iter().filter(|c| c.is_active).collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, second.id);

        store.set_credential_active(first.id, true).unwrap();
        let active = store
            .get_active_credential(tenant.id, "openai")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(active, first.bundle);
    }

    #[test]
    fn failed_update_leaves_rows_untouched() {
        let store = MemoryStore::new();
        let err = store
            .insert_credential(Uuid::new_v4(), "openai", "x", bundle(), true)
            .unwrap_err();
        assert!(matches!(err, StoreError::TenantNotFound(_)));
        assert!(store.snapshot().credentials.is_empty());
    }
}
