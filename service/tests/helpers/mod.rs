//! Shared integration-test harness: a mock provider plus a gateway bound to
//! an ephemeral port.

#![allow(dead_code)]

pub mod mock_upstream;

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use byokgate_service::middleware::auth::TenantContext;
use byokgate_service::middleware::store::{StoreError, TokenStore, TokenStoreDyn};
use byokgate_service::middleware::{AuthGate, KeyVault, MemoryStore};
use byokgate_service::providers::{AnthropicProvider, OpenAiProvider, ProviderCatalog};
use byokgate_service::proxy::{self, GatewayState, ProxySettings, forward};
use tokio::net::TcpListener;
use uuid::Uuid;

pub use mock_upstream::{Captured, MockServerHandle, MockUpstream};

pub const TEST_KEK: [u8; 32] = [0x42; 32];
pub const OPENAI_SECRET: &str = "sk-openai-provider-secret";
pub const ANTHROPIC_SECRET: &str = "sk-ant-provider-secret";

/// A running gateway and the store behind it.
pub struct TestGateway {
    pub url: String,
    pub store: Arc<MemoryStore>,
    pub vault: Arc<KeyVault>,
    http: reqwest::Client,
}

/// Builder for [`TestGateway`].
pub struct GatewayBuilder {
    base_url: String,
    settings: ProxySettings,
    token_store: Option<Arc<dyn TokenStoreDyn>>,
}

impl GatewayBuilder {
    /// Point both built-in providers at `base_url`.
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            settings: ProxySettings::default(),
            token_store: None,
        }
    }

    pub fn max_body_bytes(mut self, limit: usize) -> Self {
        self.settings.max_body_bytes = limit;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.settings.request_timeout = timeout;
        self
    }

    /// Authenticate against `store` instead of the gateway's MemoryStore.
    pub fn token_store(mut self, store: Arc<dyn TokenStoreDyn>) -> Self {
        self.token_store = Some(store);
        self
    }

    pub async fn start(self) -> TestGateway {
        let store = Arc::new(MemoryStore::new());
        let vault = Arc::new(KeyVault::new(&TEST_KEK).unwrap());
        let catalog = ProviderCatalog::with_builtin(
            OpenAiProvider::with_base_url(self.base_url.clone()),
            AnthropicProvider::with_base_url(self.base_url.clone()),
        )
        .unwrap();
        let token_store: Arc<dyn TokenStoreDyn> = match self.token_store {
            Some(s) => s,
            None => store.clone() as Arc<dyn TokenStoreDyn>,
        };

        let state = Arc::new(GatewayState {
            auth: AuthGate::new(token_store),
            catalog: Arc::new(catalog),
            vault: vault.clone(),
            credentials: store.clone(),
            client: forward::build_http_client(Duration::from_secs(2)).unwrap(),
            settings: self.settings,
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, proxy::router(state)).await.unwrap();
        });

        TestGateway {
            url: format!("http://{addr}"),
            store,
            vault,
            http: reqwest::Client::new(),
        }
    }
}

impl TestGateway {
    /// Create an enabled tenant with the given `(provider, secret)` keys and
    /// return its bearer token.
    pub fn tenant_with_keys(&self, name: &str, keys: &[(&str, &str)]) -> (Uuid, String) {
        let (tenant, token) = self.store.create_tenant(name).unwrap();
        for (provider, secret) in keys {
            let bundle = self.vault.encrypt(secret.as_bytes()).unwrap();
            self.store
                .insert_credential(tenant.id, provider, "default", bundle, true)
                .unwrap();
        }
        (tenant.id, token)
    }

    /// Tenant with both built-in providers configured.
    pub fn default_tenant(&self) -> String {
        self.tenant_with_keys(
            "acme",
            &[("openai", OPENAI_SECRET), ("anthropic", ANTHROPIC_SECRET)],
        )
        .1
    }

    pub fn chat_url(&self) -> String {
        format!("{}/v1/chat/completions", self.url)
    }

    pub async fn post_chat(&self, token: &str, body: impl Into<reqwest::Body>) -> reqwest::Response {
        self.http
            .post(self.chat_url())
            .bearer_auth(token)
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await
            .unwrap()
    }
}

/// Read a gateway error envelope, returning `(type, message)`.
pub async fn error_envelope(response: reqwest::Response) -> (String, String) {
    let body: serde_json::Value = response.json().await.unwrap();
    (
        body["error"]["type"].as_str().unwrap().to_string(),
        body["error"]["message"].as_str().unwrap().to_string(),
    )
}

/// An address nothing listens on.
pub async fn closed_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

// ---------------------------------------------------------------------------
// Token store doubles
// ---------------------------------------------------------------------------

/// Counts lookups and knows no tokens.
#[derive(Default)]
pub struct CountingTokenStore {
    pub calls: AtomicUsize,
}

impl CountingTokenStore {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TokenStore for CountingTokenStore {
    async fn find_tenant_by_token_hash(
        &self,
        _token_hash: &str,
    ) -> Result<Option<TenantContext>, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(None)
    }
}

/// Always fails with a backend error whose text must never reach clients.
pub struct FailingTokenStore;

pub const BACKEND_ERROR_DETAIL: &str = "connection refused: postgres://admin:hunter2@db";

impl TokenStore for FailingTokenStore {
    async fn find_tenant_by_token_hash(
        &self,
        _token_hash: &str,
    ) -> Result<Option<TenantContext>, StoreError> {
        Err(StoreError::Backend(BACKEND_ERROR_DETAIL.to_string()))
    }
}
