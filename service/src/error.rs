//! Request-path error taxonomy.
//!
//! Only failures local to the gateway are rendered here. Upstream 4xx/5xx
//! responses are relayed as-is and never pass through this type.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

use crate::middleware::auth::AuthError;
use crate::middleware::store::StoreError;
use crate::middleware::vault::VaultError;
use crate::providers::CatalogError;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("missing or malformed bearer token")]
    Unauthorized,
    #[error("invalid or revoked token")]
    Forbidden,
    #[error("method not allowed")]
    MethodNotAllowed,
    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },
    #[error("{0}")]
    BadRequest(String),
    #[error("unsupported model: {0}")]
    UnsupportedModel(String),
    #[error("no provider key configured for {0}")]
    NoCredential(String),
    #[error("failed to reach upstream provider")]
    UpstreamUnreachable(#[source] reqwest::Error),
    #[error("upstream provider timed out")]
    UpstreamTimeout,
    /// The detail is logged, never sent to the client.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::BadRequest(_) | Self::UnsupportedModel(_) | Self::NoCredential(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::UpstreamUnreachable(_) => StatusCode::BAD_GATEWAY,
            Self::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Value of `error.type` in the response envelope.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Unauthorized => "authentication_error",
            Self::Forbidden => "permission_error",
            Self::MethodNotAllowed
            | Self::PayloadTooLarge { .. }
            | Self::BadRequest(_)
            | Self::UnsupportedModel(_)
            | Self::NoCredential(_) => "invalid_request_error",
            Self::UpstreamUnreachable(_) => "upstream_error",
            Self::UpstreamTimeout => "timeout_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Client-visible message.
    pub fn public_message(&self) -> String {
        match self {
            Self::Internal(_) => "internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            Self::Internal(detail) => tracing::error!(error = %detail, "Internal gateway error"),
            Self::UpstreamUnreachable(e) => tracing::warn!(error = %e, "Upstream unreachable"),
            other => tracing::debug!(status = status.as_u16(), error = %other, "Request rejected"),
        }
        let body = json!({
            "error": {
                "message": self.public_message(),
                "type": self.error_type(),
            }
        });
        (status, Json(body)).into_response()
    }
}

impl From<AuthError> for GatewayError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Unauthorized => Self::Unauthorized,
            AuthError::Forbidden => Self::Forbidden,
            AuthError::Internal => Self::Internal(e.to_string()),
        }
    }
}

impl From<CatalogError> for GatewayError {
    fn from(e: CatalogError) -> Self {
        match e {
            CatalogError::UnsupportedModel(model) => Self::UnsupportedModel(model),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<VaultError> for GatewayError {
    fn from(e: VaultError) -> Self {
        Self::Internal(format!("credential decryption: {e}"))
    }
}

impl From<StoreError> for GatewayError {
    fn from(e: StoreError) -> Self {
        Self::Internal(format!("credential store: {e}"))
    }
}
