use crate::providers::{Capability, ModelInfo, Provider, ProviderDescriptor};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";

/// API version pinned on every upstream call.
pub const API_VERSION: &str = "2023-06-01";

/// Adapter for the Anthropic API through its OpenAI-compatible
/// chat-completions endpoint.
pub struct AnthropicProvider {
    descriptor: ProviderDescriptor,
}

impl AnthropicProvider {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL.to_string())
    }

    /// Create a provider with a custom base URL.
    pub fn with_base_url(base_url: String) -> Self {
        use Capability::*;
        Self {
            descriptor: ProviderDescriptor {
                name: "anthropic".to_string(),
                display_name: "Anthropic".to_string(),
                base_url: base_url.trim_end_matches('/').to_string(),
                auth_header_name: "x-api-key",
                models: vec![
                    ModelInfo::new("claude-3-5-sonnet-20241022", 200_000, &[Chat, Vision, ToolCall]),
                    ModelInfo::new("claude-3-5-haiku-20241022", 200_000, &[Chat, ToolCall]),
                    ModelInfo::new("claude-3-opus-20240229", 200_000, &[Chat, Vision, ToolCall]),
                    ModelInfo::new("claude-3-sonnet-20240229", 200_000, &[Chat, Vision, ToolCall]),
                    ModelInfo::new("claude-3-haiku-20240307", 200_000, &[Chat, Vision, ToolCall]),
                ],
            },
        }
    }

    /// Return the configured base URL.
    pub fn base_url(&self) -> &str {
        &self.descriptor.base_url
    }
}

impl Default for AnthropicProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl Provider for AnthropicProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    fn format_auth_value(&self, secret: &str) -> String {
        secret.to_string()
    }

    fn extra_headers(&self) -> &'static [(&'static str, &'static str)] {
        &[("anthropic-version", API_VERSION)]
    }
}
