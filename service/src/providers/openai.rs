use crate::providers::{Capability, ModelInfo, Provider, ProviderDescriptor};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Adapter for the OpenAI API.
///
/// The secret is sent as `Authorization: Bearer <key>`. Any
/// OpenAI-compatible endpoint can be targeted through [`with_base_url`](Self::with_base_url).
pub struct OpenAiProvider {
    descriptor: ProviderDescriptor,
}

impl OpenAiProvider {
    /// Create a provider pointed at the public OpenAI API.
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL.to_string())
    }

    /// Create a provider with a custom base URL.
    pub fn with_base_url(base_url: String) -> Self {
        use Capability::*;
        Self {
            descriptor: ProviderDescriptor {
                name: "openai".to_string(),
                display_name: "OpenAI".to_string(),
                base_url: base_url.trim_end_matches('/').to_string(),
                auth_header_name: "authorization",
                models: vec![
                    ModelInfo::new("gpt-4o", 128_000, &[Chat, Vision, ToolCall, StructuredOutput]),
                    ModelInfo::new("gpt-4o-mini", 128_000, &[Chat, Vision, ToolCall, StructuredOutput]),
                    ModelInfo::new("gpt-4-turbo", 128_000, &[Chat, Vision, ToolCall]),
                    ModelInfo::new("gpt-4", 8_192, &[Chat, ToolCall]),
                    ModelInfo::new("gpt-3.5-turbo", 16_385, &[Chat, ToolCall]),
                    ModelInfo::new("o1", 200_000, &[Chat, Vision, Reasoning, StructuredOutput]),
                    ModelInfo::new("o1-mini", 128_000, &[Chat, Reasoning]),
                    ModelInfo::new("o3-mini", 200_000, &[Chat, ToolCall, Reasoning, StructuredOutput]),
                ],
            },
        }
    }

    /// Return the configured base URL.
    pub fn base_url(&self) -> &str {
        &self.descriptor.base_url
    }
}

impl Default for OpenAiProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl Provider for OpenAiProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    fn format_auth_value(&self, secret: &str) -> String {
        format!("Bearer {secret}")
    }
}
