//! Mock LLM provider for integration testing.
//!
//! Serves `/v1/chat/completions` with a preconfigured reply and records
//! every request it receives, headers included, so tests can check exactly
//! what the gateway sent upstream.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::Response;
use axum::routing::{get, post};
use futures_util::StreamExt;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// The only key the mock's `/v1/models` accepts.
pub const GOOD_KEY: &str = "sk-good";

/// What the mock answers to chat-completions calls.
#[derive(Debug, Clone)]
pub enum Reply {
    /// A buffered JSON response.
    Json { status: u16, body: String },
    /// A finite event stream, one chunk per `interval`.
    Sse {
        chunks: Vec<String>,
        interval: Duration,
    },
    /// An event stream that never ends. Dropping it notifies
    /// [`MockServerHandle::wait_reply_dropped`].
    Endless { interval: Duration },
    /// JSON 200 after `delay`. Dropping the handler before then notifies
    /// [`MockServerHandle::wait_reply_dropped`].
    Slow { delay: Duration },
}

/// A request as received by the mock.
#[derive(Debug, Clone)]
pub struct Captured {
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Captured {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Does any header value contain `needle`?
    pub fn any_header_contains(&self, needle: &str) -> bool {
        self.headers
            .values()
            .any(|v| v.to_str().is_ok_and(|s| s.contains(needle)))
    }
}

struct MockState {
    reply: Reply,
    requests: Mutex<Vec<Captured>>,
    reply_dropped: Notify,
}

#[derive(Debug, Clone)]
pub struct MockUpstream {
    reply: Reply,
}

impl MockUpstream {
    pub fn json(status: u16, body: &str) -> Self {
        Self {
            reply: Reply::Json {
                status,
                body: body.to_string(),
            },
        }
    }

    pub fn sse(chunks: &[&str], interval: Duration) -> Self {
        Self {
            reply: Reply::Sse {
                chunks: chunks.iter().map(|c| c.to_string()).collect(),
                interval,
            },
        }
    }

    pub fn endless(interval: Duration) -> Self {
        Self {
            reply: Reply::Endless { interval },
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            reply: Reply::Slow { delay },
        }
    }

    /// Start the mock server on an ephemeral port.
    pub async fn start(self) -> MockServerHandle {
        let state = Arc::new(MockState {
            reply: self.reply,
            requests: Mutex::new(Vec::new()),
            reply_dropped: Notify::new(),
        });

        let app = Router::new()
            .route("/v1/chat/completions", post(handle_chat))
            .route("/v1/models", get(handle_models))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        MockServerHandle {
            addr,
            state,
            _handle: handle,
        }
    }
}

/// Handle to the running mock server.
pub struct MockServerHandle {
    pub addr: SocketAddr,
    state: Arc<MockState>,
    _handle: JoinHandle<()>,
}

impl MockServerHandle {
    /// Base URL to configure providers with.
    pub fn base_url(&self) -> String {
        format!("http://{}/v1", self.addr)
    }

    pub fn request_count(&self) -> usize {
        self.state.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<Captured> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn last_request(&self) -> Captured {
        self.requests().pop().expect("mock received no request")
    }

    /// Wait until an endless stream or a pending slow reply has been dropped
    /// by the server, i.e. the gateway closed the upstream connection.
    pub async fn wait_reply_dropped(&self, within: Duration) -> bool {
        tokio::time::timeout(within, self.state.reply_dropped.notified())
            .await
            .is_ok()
    }
}

/// Notifies [`MockServerHandle::wait_reply_dropped`] when dropped while
/// still armed.
struct DropSignal(Option<Arc<MockState>>);

impl DropSignal {
    fn armed(state: &Arc<MockState>) -> Self {
        Self(Some(state.clone()))
    }

    fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for DropSignal {
    fn drop(&mut self) {
        if let Some(state) = &self.0 {
            state.reply_dropped.notify_one();
        }
    }
}

async fn handle_chat(
    State(state): State<Arc<MockState>>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    state.requests.lock().unwrap().push(Captured {
        path: uri.path().to_string(),
        headers,
        body,
    });

    match state.reply.clone() {
        Reply::Json { status, body } => json_response(status, body),
        Reply::Slow { delay } => {
            let guard = DropSignal::armed(&state);
            tokio::time::sleep(delay).await;
            guard.disarm();
            json_response(200, r#"{"id":"slow"}"#.to_string())
        }
        Reply::Sse { chunks, interval } => {
            let stream = futures_util::stream::iter(chunks).then(move |chunk| async move {
                tokio::time::sleep(interval).await;
                Ok::<_, Infallible>(Bytes::from(chunk))
            });
            sse_response(Body::from_stream(stream))
        }
        Reply::Endless { interval } => {
            let guard = DropSignal::armed(&state);
            let stream = futures_util::stream::unfold((0u64, guard), move |(n, guard)| async move {
                tokio::time::sleep(interval).await;
                let chunk = Bytes::from(format!("data: {{\"n\":{n}}}\n\n"));
                Some((Ok::<_, Infallible>(chunk), (n + 1, guard)))
            });
            sse_response(Body::from_stream(stream))
        }
    }
}

fn json_response(status: u16, body: String) -> Response {
    Response::builder()
        .status(StatusCode::from_u16(status).unwrap())
        .header("content-type", "application/json")
        .header("x-request-id", "upstream-req-1")
        .header("x-ratelimit-remaining-requests", "42")
        .header("set-cookie", "upstream-session=1")
        .header("openai-processing-ms", "7")
        .body(Body::from(body))
        .unwrap()
}

fn sse_response(body: Body) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/event-stream")
        .header("x-request-id", "upstream-stream-1")
        .body(body)
        .unwrap()
}

/// Accepts [`GOOD_KEY`] in either provider's auth header.
async fn handle_models(headers: HeaderMap) -> StatusCode {
    let bearer = format!("Bearer {GOOD_KEY}");
    let ok = headers.get("authorization").is_some_and(|v| v == bearer.as_str())
        || headers.get("x-api-key").is_some_and(|v| v == GOOD_KEY);
    if ok {
        StatusCode::OK
    } else {
        StatusCode::UNAUTHORIZED
    }
}
