//! Tenant authentication.
//!
//! Turns `Authorization: Bearer <token>` into a [`TenantContext`] or rejects
//! the request before any proxying work starts. Tokens are hashed with
//! SHA-256 before lookup, so the store is only ever indexed by digest and
//! the raw token never leaves this module.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::HeaderValue;
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use crate::error::GatewayError;
use crate::middleware::store::TokenStoreDyn;
use crate::middleware::vault::{self, VaultError};

/// Prefix for generated tenant tokens.
const TOKEN_PREFIX: &str = "bgw_";

/// Number of random bytes in a generated token (256 bits).
const TOKEN_RANDOM_BYTES: usize = 32;

/// Authenticated tenant, attached to request extensions by [`require_tenant`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantContext {
    pub tenant_id: Uuid,
    pub tenant_name: String,
    pub enabled: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    /// Missing header, wrong scheme, or empty token.
    #[error("missing or malformed bearer token")]
    Unauthorized,
    /// Unknown token or disabled tenant. The two are deliberately the same.
    #[error("invalid or revoked token")]
    Forbidden,
    #[error("token store unavailable")]
    Internal,
}

// ---------------------------------------------------------------------------
// Token helpers
// ---------------------------------------------------------------------------

/// SHA-256 hex digest of a tenant token.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Generate a new random tenant token and return `(plaintext, sha256_hex)`.
pub fn generate_token() -> Result<(String, String), VaultError> {
    let mut random_bytes = [0u8; TOKEN_RANDOM_BYTES];
    vault::fill_random(&mut random_bytes)?;
    let token = format!("{TOKEN_PREFIX}{}", hex::encode(random_bytes));
    let hash = hash_token(&token);
    Ok((token, hash))
}

/// Extract the token from an `Authorization` header value.
///
/// The scheme is matched case-insensitively; the token must be non-empty.
pub fn extract_bearer_token(header: Option<&HeaderValue>) -> Result<&str, AuthError> {
    let value = header
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthError::Unauthorized)?;
    let (scheme, token) = value.split_once(' ').ok_or(AuthError::Unauthorized)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::Unauthorized);
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(AuthError::Unauthorized);
    }
    Ok(token)
}

// ---------------------------------------------------------------------------
// AuthGate
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AuthGate {
    store: Arc<dyn TokenStoreDyn>,
}

impl std::fmt::Debug for AuthGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthGate").finish_non_exhaustive()
    }
}

impl AuthGate {
    pub fn new(store: Arc<dyn TokenStoreDyn>) -> Self {
        Self { store }
    }

    /// Authenticate a raw `Authorization` header value.
    ///
    /// Malformed headers fail with [`AuthError::Unauthorized`] without
    /// touching the store.
    pub async fn authenticate(&self, header: Option<&HeaderValue>) -> Result<TenantContext, AuthError> {
        let token = extract_bearer_token(header)?;
        self.validate_token(token).await
    }

    /// Resolve a token to an enabled tenant.
    pub async fn validate_token(&self, token: &str) -> Result<TenantContext, AuthError> {
        let token_hash = hash_token(token);
        match self.store.find_tenant_by_token_hash_dyn(&token_hash).await {
            Ok(Some(tenant)) if tenant.enabled => Ok(tenant),
            Ok(Some(tenant)) => {
                tracing::debug!(tenant_id = %tenant.tenant_id, "Rejected disabled tenant");
                Err(AuthError::Forbidden)
            }
            Ok(None) => Err(AuthError::Forbidden),
            Err(e) => {
                tracing::error!(error = %e, "Token store lookup failed");
                Err(AuthError::Internal)
            }
        }
    }
}

/// Axum middleware that authenticates the caller and injects
/// [`TenantContext`] into request extensions.
pub async fn require_tenant(State(gate): State<AuthGate>, mut req: Request, next: Next) -> Response {
    match gate.authenticate(req.headers().get(AUTHORIZATION)).await {
        Ok(tenant) => {
            req.extensions_mut().insert(tenant);
            next.run(req).await
        }
        Err(e) => GatewayError::from(e).into_response(),
    }
}
