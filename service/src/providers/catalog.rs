//! Provider directory and model-to-provider routing.
//!
//! Registration rejects duplicate provider names and model IDs claimed by
//! more than one provider, so [`ProviderCatalog::resolve_provider_for_model`]
//! has at most one answer for any model. Header names and values a provider
//! declares are checked here too, so the request path never sees one that
//! cannot be sent.

use std::sync::Arc;

use reqwest::header::{HeaderName, HeaderValue};
use serde::Serialize;
use thiserror::Error;

use crate::providers::{AnthropicProvider, OpenAiProvider, ProviderDescriptor, ProviderDyn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("provider '{0}' is already registered")]
    DuplicateProvider(String),
    #[error("model '{model}' is already served by provider '{provider}'")]
    DuplicateModel { model: String, provider: String },
    #[error("provider '{0}' not found")]
    NotFound(String),
    #[error("unsupported model '{0}'")]
    UnsupportedModel(String),
    #[error("provider '{provider}' declares an invalid header: {header:?}")]
    InvalidHeader { provider: String, header: String },
}

/// A model together with the provider that serves it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelRef {
    pub provider: String,
    pub model_id: String,
}

/// Read-only after startup; safe to share behind an `Arc`.
#[derive(Default)]
pub struct ProviderCatalog {
    providers: Vec<Arc<dyn ProviderDyn>>,
}

impl std::fmt::Debug for ProviderCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderCatalog")
            .field("providers", &self.providers.iter().map(|p| p.name()).collect::<Vec<_>>())
            .finish()
    }
}

impl ProviderCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// OpenAI and Anthropic at their public endpoints.
    pub fn default_catalog() -> Result<Self, CatalogError> {
        Self::with_builtin(OpenAiProvider::new(), AnthropicProvider::new())
    }

    /// The built-in providers, e.g. with base URLs taken from configuration.
    pub fn with_builtin(
        openai: OpenAiProvider,
        anthropic: AnthropicProvider,
    ) -> Result<Self, CatalogError> {
        let mut catalog = Self::new();
        catalog.register(openai)?;
        catalog.register(anthropic)?;
        Ok(catalog)
    }

    pub fn register<P: ProviderDyn + 'static>(&mut self, provider: P) -> Result<(), CatalogError> {
        self.register_arc(Arc::new(provider))
    }

    pub fn register_arc(&mut self, provider: Arc<dyn ProviderDyn>) -> Result<(), CatalogError> {
        let incoming = provider.descriptor_dyn();
        if self.providers.iter().any(|p| p.name() == incoming.name) {
            return Err(CatalogError::DuplicateProvider(incoming.name.clone()));
        }
        check_headers(provider.as_ref())?;
        for model in &incoming.models {
            if let Some(owner) = self
                .providers
                .iter()
                .find(|p| p.descriptor_dyn().supports_model(&model.id))
            {
                return Err(CatalogError::DuplicateModel {
                    model: model.id.clone(),
                    provider: owner.name().to_string(),
                });
            }
        }
        tracing::debug!(
            provider = %incoming.name,
            models = incoming.models.len(),
            "Registered provider"
        );
        self.providers.push(provider);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn ProviderDyn>, CatalogError> {
        self.providers
            .iter()
            .find(|p| p.name() == name)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(name.to_string()))
    }

    /// Descriptors in registration order.
    pub fn list(&self) -> Vec<&ProviderDescriptor> {
        self.providers.iter().map(|p| p.descriptor_dyn()).collect()
    }

    pub fn all_models(&self) -> Vec<ModelRef> {
        self.providers
            .iter()
            .flat_map(|p| {
                p.descriptor_dyn().models.iter().map(|m| ModelRef {
                    provider: p.name().to_string(),
                    model_id: m.id.clone(),
                })
            })
            .collect()
    }

    /// Exact-match lookup. Unknown models fail closed.
    pub fn resolve_provider_for_model(
        &self,
        model_id: &str,
    ) -> Result<Arc<dyn ProviderDyn>, CatalogError> {
        self.providers
            .iter()
            .find(|p| p.descriptor_dyn().supports_model(model_id))
            .cloned()
            .ok_or_else(|| CatalogError::UnsupportedModel(model_id.to_string()))
    }
}

/// Header names must already be in lowercase canonical form; values must be
/// sendable as-is.
fn check_headers(provider: &dyn ProviderDyn) -> Result<(), CatalogError> {
    let invalid = |header: &str| CatalogError::InvalidHeader {
        provider: provider.name().to_string(),
        header: header.to_string(),
    };
    let valid_name =
        |name: &str| HeaderName::from_bytes(name.as_bytes()).is_ok_and(|h| h.as_str() == name);

    let auth_header = provider.descriptor_dyn().auth_header_name;
    if !valid_name(auth_header) {
        return Err(invalid(auth_header));
    }
    for &(name, value) in provider.extra_headers_dyn() {
        if !valid_name(name) {
            return Err(invalid(name));
        }
        if HeaderValue::from_str(value).is_err() {
            return Err(invalid(value));
        }
    }
    Ok(())
}
