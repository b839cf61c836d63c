//! HTTP surface and per-request pipeline.
//!
//! Each chat-completions request runs Auth, BodyRead, RouteResolved,
//! CredentialResolved and Forwarding strictly in that order. Authentication
//! happens in the [`require_tenant`] layer; the remaining stages live in
//! [`proxy_chat_completion`].

pub mod body;
pub mod forward;
pub mod headers;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::{HeaderMap, Method};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::middleware::from_fn_with_state;
use axum::{Extension, Json, Router};
use serde_json::json;
use tracing::Instrument;
use uuid::Uuid;

use crate::error::GatewayError;
use crate::middleware::auth::{AuthGate, TenantContext, require_tenant};
use crate::middleware::metrics::{Outcome, record_outcome};
use crate::middleware::store::CredentialStoreDyn;
use crate::middleware::vault::KeyVault;
use crate::providers::ProviderCatalog;

pub use body::RequestHints;

/// Default request body cap (10 MiB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Default total timeout for non-streaming upstream calls.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy)]
pub struct ProxySettings {
    pub max_body_bytes: usize,
    /// Applies to non-streaming calls only.
    pub request_timeout: Duration,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Everything a request needs, built once at startup.
pub struct GatewayState {
    pub auth: AuthGate,
    pub catalog: Arc<ProviderCatalog>,
    pub vault: Arc<KeyVault>,
    pub credentials: Arc<dyn CredentialStoreDyn>,
    pub client: reqwest::Client,
    pub settings: ProxySettings,
}

/// Build the axum router.
///
/// `/v1/chat/completions` and `/v1/models` sit behind [`require_tenant`];
/// `/healthz` does not.
pub fn router(state: Arc<GatewayState>) -> Router {
    let protected = Router::new()
        .route("/v1/chat/completions", any(chat_completions))
        .route("/v1/models", get(list_models))
        .route_layer(from_fn_with_state(state.auth.clone(), require_tenant));

    Router::new()
        .merge(protected)
        .route("/healthz", get(healthz))
        .with_state(state)
}

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn list_models(State(state): State<Arc<GatewayState>>) -> Json<serde_json::Value> {
    let data: Vec<_> = state
        .catalog
        .all_models()
        .into_iter()
        .map(|m| {
            json!({
                "id": m.model_id,
                "object": "model",
                "owned_by": m.provider,
            })
        })
        .collect();
    Json(json!({ "object": "list", "data": data }))
}

fn request_id(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

async fn chat_completions(
    State(state): State<Arc<GatewayState>>,
    Extension(tenant): Extension<TenantContext>,
    req: Request,
) -> Response {
    let span = tracing::info_span!(
        "proxy",
        tenant_id = %tenant.tenant_id,
        request_id = %request_id(req.headers()),
        model = tracing::field::Empty,
        provider = tracing::field::Empty,
        stream = tracing::field::Empty,
    );
    match proxy_chat_completion(&state, &tenant, req)
        .instrument(span)
        .await
    {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

/// Outcome for a request that failed before any upstream call.
fn local_outcome(err: &GatewayError) -> Outcome {
    match err {
        GatewayError::Internal(_) => Outcome::InternalError,
        _ => Outcome::Rejected,
    }
}

/// Run one authenticated request through the forwarding pipeline.
pub async fn proxy_chat_completion(
    state: &GatewayState,
    tenant: &TenantContext,
    req: Request,
) -> Result<Response, GatewayError> {
    if req.method() != Method::POST {
        record_outcome("none", Outcome::Rejected);
        return Err(GatewayError::MethodNotAllowed);
    }

    let (parts, body) = req.into_parts();
    let body = body::read_capped(&parts.headers, body, state.settings.max_body_bytes)
        .await
        .inspect_err(|_| record_outcome("none", Outcome::Rejected))?;

    let hints = RequestHints::sniff(&body);
    let span = tracing::Span::current();
    span.record("stream", hints.stream);

    let Some(model) = hints.model.as_deref() else {
        record_outcome("none", Outcome::Rejected);
        return Err(GatewayError::BadRequest("model is required".to_string()));
    };
    span.record("model", model);

    let provider = state
        .catalog
        .resolve_provider_for_model(model)
        .inspect_err(|_| record_outcome("none", Outcome::Rejected))?;
    let provider_name = provider.name().to_string();
    span.record("provider", provider_name.as_str());

    let record_failure = |e: &GatewayError| record_outcome(&provider_name, local_outcome(e));
    let bundle = state
        .credentials
        .get_active_credential_dyn(tenant.tenant_id, &provider_name)
        .await
        .map_err(GatewayError::from)
        .and_then(|b| b.ok_or_else(|| GatewayError::NoCredential(provider_name.clone())))
        .inspect_err(record_failure)?;

    let timeout = (!hints.stream).then_some(state.settings.request_timeout);
    let upstream = {
        let secret = state
            .vault
            .decrypt_secret(&bundle)
            .map_err(GatewayError::from)
            .inspect_err(record_failure)?;
        forward::build_upstream_request(
            &state.client,
            &*provider,
            &parts.headers,
            body,
            &secret,
            timeout,
        )
        .inspect_err(record_failure)?
    };

    tracing::debug!("Forwarding to upstream");
    if hints.stream {
        forward::relay_streaming(&state.client, upstream, &provider_name).await
    } else {
        forward::relay_buffered(&state.client, upstream, &provider_name).await
    }
}
