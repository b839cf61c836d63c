pub mod anthropic;
pub mod catalog;
pub mod openai;

// Re-export for convenience
pub use anthropic::AnthropicProvider;
pub use catalog::{CatalogError, ModelRef, ProviderCatalog};
pub use openai::OpenAiProvider;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_stream::Stream;

/// Timeout for the credential-creation key probe.
const VALIDATE_KEY_TIMEOUT: Duration = Duration::from_secs(15);

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Outcome of an upstream key probe that did not succeed.
#[derive(Debug, Error)]
pub enum ValidateKeyError {
    #[error("provider rejected the API key (HTTP {0})")]
    InvalidKey(u16),
    #[error("key validation failed: {0}")]
    ValidationFailed(String),
}

// ---------------------------------------------------------------------------
// Common types
// ---------------------------------------------------------------------------

/// A boxed, pinned, sendable stream.
pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send>>;

/// What a model can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Chat,
    Vision,
    ToolCall,
    Reasoning,
    StructuredOutput,
}

/// A model served by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Exact model identifier clients put in the `model` field.
    pub id: String,
    /// Maximum context window size in tokens.
    pub context_size: u32,
    pub capabilities: Vec<Capability>,
}

impl ModelInfo {
    pub fn new(id: &str, context_size: u32, capabilities: &[Capability]) -> Self {
        Self {
            id: id.to_string(),
            context_size,
            capabilities: capabilities.to_vec(),
        }
    }
}

/// Static description of an upstream provider. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderDescriptor {
    /// Unique catalog key, e.g. `openai`.
    pub name: String,
    pub display_name: String,
    /// Base API URL without trailing slash, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    /// Header carrying the provider secret, e.g. `authorization`.
    pub auth_header_name: &'static str,
    pub models: Vec<ModelInfo>,
}

impl ProviderDescriptor {
    pub fn chat_completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    pub fn models_url(&self) -> String {
        format!("{}/models", self.base_url.trim_end_matches('/'))
    }

    /// Exact, case-sensitive match against the model catalog.
    pub fn supports_model(&self, model_id: &str) -> bool {
        self.models.iter().any(|m| m.id == model_id)
    }
}

// ---------------------------------------------------------------------------
// Provider trait
// ---------------------------------------------------------------------------

/// Common interface for all upstream providers.
///
/// Providers differ in where requests go and how the secret is presented;
/// the forwarder asks the provider instead of branching on its name. New
/// providers are added by implementing this trait and registering them in
/// the [`ProviderCatalog`].
pub trait Provider: Send + Sync {
    fn descriptor(&self) -> &ProviderDescriptor;

    /// Render the value of [`ProviderDescriptor::auth_header_name`].
    fn format_auth_value(&self, secret: &str) -> String;

    /// Fixed headers the provider requires on every call. An allow-listed
    /// client header of the same name takes precedence.
    fn extra_headers(&self) -> &'static [(&'static str, &'static str)] {
        &[]
    }

    /// Lightweight upstream probe that checks `secret` is accepted.
    ///
    /// Only used when a credential is created, never on the request path.
    fn validate_key(
        &self,
        client: &reqwest::Client,
        secret: &str,
    ) -> impl Future<Output = Result<(), ValidateKeyError>> + Send {
        let url = self.descriptor().models_url();
        let headers = self.auth_headers(secret);
        let client = client.clone();
        async move {
            let headers = headers?;
            probe(&client, &url, headers).await
        }
    }

    /// The auth header plus [`extra_headers`](Self::extra_headers).
    fn auth_headers(&self, secret: &str) -> Result<HeaderMap, ValidateKeyError> {
        let invalid = |header: &str| {
            ValidateKeyError::ValidationFailed(format!("invalid provider header {header:?}"))
        };
        let mut headers = HeaderMap::new();
        let auth_header = self.descriptor().auth_header_name;
        let name = HeaderName::from_bytes(auth_header.as_bytes()).map_err(|_| invalid(auth_header))?;
        let mut value = HeaderValue::from_str(&self.format_auth_value(secret)).map_err(|_| {
            ValidateKeyError::ValidationFailed("secret is not a valid header value".to_string())
        })?;
        value.set_sensitive(true);
        headers.insert(name, value);
        for &(name, value) in self.extra_headers() {
            headers.insert(
                HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid(name))?,
                HeaderValue::from_str(value).map_err(|_| invalid(name))?,
            );
        }
        Ok(headers)
    }
}

// ---------------------------------------------------------------------------
// Dyn-compatible wrapper for Provider
// ---------------------------------------------------------------------------

/// Boxed future alias for a key probe.
type ValidateFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ValidateKeyError>> + Send + 'a>>;

/// Object-safe version of [`Provider`], using boxed futures.
///
/// Auto-implemented for every `T: Provider + 'static`.
/// Use `Arc<dyn ProviderDyn>` wherever you need to erase the concrete type.
pub trait ProviderDyn: Send + Sync {
    fn descriptor_dyn(&self) -> &ProviderDescriptor;

    fn format_auth_value_dyn(&self, secret: &str) -> String;

    fn extra_headers_dyn(&self) -> &'static [(&'static str, &'static str)];

    fn validate_key_dyn<'a>(
        &'a self,
        client: &'a reqwest::Client,
        secret: &'a str,
    ) -> ValidateFuture<'a>;

    fn name(&self) -> &str {
        &self.descriptor_dyn().name
    }
}

impl<T: Provider + 'static> ProviderDyn for T {
    fn descriptor_dyn(&self) -> &ProviderDescriptor {
        self.descriptor()
    }

    fn format_auth_value_dyn(&self, secret: &str) -> String {
        self.format_auth_value(secret)
    }

    fn extra_headers_dyn(&self) -> &'static [(&'static str, &'static str)] {
        self.extra_headers()
    }

    fn validate_key_dyn<'a>(
        &'a self,
        client: &'a reqwest::Client,
        secret: &'a str,
    ) -> ValidateFuture<'a> {
        Box::pin(self.validate_key(client, secret))
    }
}

/// `GET url` with `headers`; 2xx is valid, 401/403 is a rejected key.
async fn probe(
    client: &reqwest::Client,
    url: &str,
    headers: HeaderMap,
) -> Result<(), ValidateKeyError> {
    let response = client
        .get(url)
        .headers(headers)
        .timeout(VALIDATE_KEY_TIMEOUT)
        .send()
        .await
        .map_err(|e| ValidateKeyError::ValidationFailed(e.to_string()))?;

    let status = response.status();
    if status.is_success() {
        Ok(())
    } else if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
    {
        Err(ValidateKeyError::InvalidKey(status.as_u16()))
    } else {
        Err(ValidateKeyError::ValidationFailed(format!(
            "unexpected HTTP {status} from {url}"
        )))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
