//! Header allow-lists in both directions.
//!
//! Nothing crosses the gateway unless listed here. In particular the
//! tenant's `Authorization` header is never on the request list.

use axum::http::header::{CACHE_CONTROL, CONNECTION, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use zeroize::Zeroizing;

use crate::error::GatewayError;
use crate::providers::ProviderDyn;

/// Client headers copied to the upstream request.
pub const FORWARDED_REQUEST_HEADERS: &[&str] = &[
    "accept",
    "x-request-id",
    "openai-organization",
    "openai-project",
    "anthropic-beta",
    "anthropic-version",
];

/// Upstream headers copied to the client response.
pub const RELAYED_RESPONSE_HEADERS: &[&str] = &[
    "content-type",
    "content-length",
    "content-encoding",
    "x-request-id",
    "request-id",
    "retry-after",
];

/// Rate-limit header families, matched by prefix.
pub const RELAYED_RESPONSE_PREFIXES: &[&str] = &["x-ratelimit-", "anthropic-ratelimit-"];

/// Headers for the upstream call: provider extras, then allow-listed client
/// headers, then `Content-Type` and the provider auth header.
///
/// Later steps overwrite earlier ones, so the auth header always carries the
/// provider secret.
pub fn upstream_request_headers(
    inbound: &HeaderMap,
    provider: &dyn ProviderDyn,
    secret: &str,
) -> Result<HeaderMap, GatewayError> {
    let invalid = |header: &str| {
        GatewayError::Internal(format!(
            "provider {} declares invalid header {header:?}",
            provider.name()
        ))
    };
    let mut headers = HeaderMap::new();

    for &(name, value) in provider.extra_headers_dyn() {
        headers.insert(
            HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid(name))?,
            HeaderValue::from_str(value).map_err(|_| invalid(name))?,
        );
    }

    for &name in FORWARDED_REQUEST_HEADERS {
        let mut values = inbound.get_all(name).iter();
        if let Some(first) = values.next() {
            let name = HeaderName::from_static(name);
            headers.insert(name.clone(), first.clone());
            for value in values {
                headers.append(name.clone(), value.clone());
            }
        }
    }

    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    let auth_value = Zeroizing::new(provider.format_auth_value_dyn(secret));
    let mut auth_value = HeaderValue::from_str(&auth_value).map_err(|_| {
        GatewayError::Internal(format!(
            "stored {} credential is not a valid header value",
            provider.name()
        ))
    })?;
    auth_value.set_sensitive(true);
    let auth_header = provider.descriptor_dyn().auth_header_name;
    headers.insert(
        HeaderName::from_bytes(auth_header.as_bytes()).map_err(|_| invalid(auth_header))?,
        auth_value,
    );

    Ok(headers)
}

fn is_relayed(name: &HeaderName) -> bool {
    let name = name.as_str();
    RELAYED_RESPONSE_HEADERS.iter().any(|h| *h == name)
        || RELAYED_RESPONSE_PREFIXES.iter().any(|p| name.starts_with(p))
}

/// Allow-listed upstream headers for a buffered response.
pub fn relayed_response_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in upstream {
        if is_relayed(name) {
            headers.append(name.clone(), value.clone());
        }
    }
    headers
}

/// Headers for a committed event stream.
///
/// Request-id and rate-limit headers are kept; the framing headers are
/// replaced.
pub fn streaming_response_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = relayed_response_headers(upstream);
    headers.remove(CONTENT_LENGTH);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(
        HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{AnthropicProvider, OpenAiProvider};
    use axum::http::header::AUTHORIZATION;

    fn inbound() -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(AUTHORIZATION, HeaderValue::from_static("Bearer bgw_tenant"));
        h.insert("x-api-key", HeaderValue::from_static("client-supplied"));
        h.insert("cookie", HeaderValue::from_static("session=1"));
        h.insert("accept", HeaderValue::from_static("text/event-stream"));
        h.insert("x-request-id", HeaderValue::from_static("req-123"));
        h.insert("openai-organization", HeaderValue::from_static("org-1"));
        h.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        h
    }

    #[test]
    fn openai_headers_replace_tenant_token() {
        let h = upstream_request_headers(&inbound(), &OpenAiProvider::new(), "sk-openai").unwrap();
        assert_eq!(h.get(AUTHORIZATION).unwrap(), "Bearer sk-openai");
        assert_eq!(h.get_all(AUTHORIZATION).iter().count(), 1);
        assert!(h.get(AUTHORIZATION).unwrap().is_sensitive());
        assert!(h.get("x-api-key").is_none());
        assert!(h.get("cookie").is_none());
        assert_eq!(h.get(CONTENT_TYPE).unwrap(), "application/json");
        assert_eq!(h.get("x-request-id").unwrap(), "req-123");
        assert_eq!(h.get("openai-organization").unwrap(), "org-1");
        assert_eq!(h.get("accept").unwrap(), "text/event-stream");
    }

    #[test]
    fn anthropic_headers_never_carry_authorization() {
        let h = upstream_request_headers(&inbound(), &AnthropicProvider::new(), "sk-ant").unwrap();
        assert!(h.get(AUTHORIZATION).is_none());
        assert_eq!(h.get("x-api-key").unwrap(), "sk-ant");
        assert_eq!(h.get("anthropic-version").unwrap(), "2023-06-01");
    }

    #[test]
    fn client_anthropic_version_overrides_default() {
        let mut h = inbound();
        h.insert("anthropic-version", HeaderValue::from_static("2024-01-01"));
        let out = upstream_request_headers(&h, &AnthropicProvider::new(), "sk-ant").unwrap();
        assert_eq!(out.get("anthropic-version").unwrap(), "2024-01-01");
    }

    #[test]
    fn invalid_secret_is_internal() {
        let err = upstream_request_headers(&HeaderMap::new(), &OpenAiProvider::new(), "bad\nkey")
            .unwrap_err();
        assert!(matches!(err, GatewayError::Internal(_)));
    }

    #[test]
    fn unsendable_provider_header_is_internal() {
        struct Broken(crate::providers::ProviderDescriptor);

        impl crate::providers::Provider for Broken {
            fn descriptor(&self) -> &crate::providers::ProviderDescriptor {
                &self.0
            }

            fn format_auth_value(&self, secret: &str) -> String {
                secret.to_string()
            }
        }

        let mut descriptor = OpenAiProvider::new().descriptor_dyn().clone();
        descriptor.auth_header_name = "x api key";
        let err = upstream_request_headers(&inbound(), &Broken(descriptor), "sk").unwrap_err();
        assert!(matches!(err, GatewayError::Internal(m) if m.contains("x api key")));
    }

    #[test]
    fn response_allow_list() {
        let mut up = HeaderMap::new();
        up.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        up.insert("x-request-id", HeaderValue::from_static("up-1"));
        up.insert("x-ratelimit-remaining-requests", HeaderValue::from_static("99"));
        up.insert("anthropic-ratelimit-tokens-limit", HeaderValue::from_static("1000"));
        up.insert("set-cookie", HeaderValue::from_static("a=b"));
        up.insert("openai-processing-ms", HeaderValue::from_static("12"));
        let h = relayed_response_headers(&up);
        assert_eq!(h.len(), 4);
        assert!(h.get("set-cookie").is_none());
        assert!(h.get("openai-processing-ms").is_none());
    }

    #[test]
    fn streaming_headers_are_committed() {
        let mut up = HeaderMap::new();
        up.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream; charset=utf-8"));
        up.insert(CONTENT_LENGTH, HeaderValue::from_static("10"));
        up.insert("x-request-id", HeaderValue::from_static("up-1"));
        let h = streaming_response_headers(&up);
        assert_eq!(h.get(CONTENT_TYPE).unwrap(), "text/event-stream");
        assert_eq!(h.get(CACHE_CONTROL).unwrap(), "no-cache");
        assert_eq!(h.get(CONNECTION).unwrap(), "keep-alive");
        assert_eq!(h.get("x-accel-buffering").unwrap(), "no");
        assert_eq!(h.get("x-request-id").unwrap(), "up-1");
        assert!(h.get(CONTENT_LENGTH).is_none());
    }
}
