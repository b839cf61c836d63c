//! Middleware layer for the gateway.
//!
//! This layer sits between the HTTP surface and the upstream providers,
//! handling:
//! - **auth**: tenant bearer-token authentication
//! - **vault**: envelope encryption of provider credentials
//! - **kek**: Key-Encryption-Key loading (environment or OS keychain)
//! - **store**: tenant and credential rows
//! - **metrics**: request/response metrics

pub mod auth;
pub mod kek;
pub mod metrics;
pub mod store;
pub mod vault;

// Re-export commonly used types
pub use auth::{AuthGate, TenantContext};
pub use store::{CredentialStore, MemoryStore, TokenStore};
pub use vault::{EncryptedBundle, KeyVault};
