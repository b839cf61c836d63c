//! The upstream exchange: building the outbound request and relaying the
//! response, buffered or streamed.

use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use futures_util::StreamExt;
use tokio_stream::Stream;
use tracing::Span;

use crate::error::GatewayError;
use crate::middleware::metrics::{Outcome, UpstreamTimer, record_outcome};
use crate::providers::{BoxStream, ProviderDyn};
use crate::proxy::headers;

/// Shared outbound client.
///
/// Transparent decompression is off so relayed bytes are exactly what the
/// provider sent. No total timeout is set here; the buffered path applies
/// one per request.
pub fn build_http_client(connect_timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .no_gzip()
        .no_brotli()
        .no_deflate()
        .no_zstd()
        .build()
}

/// Build the upstream `POST` carrying `body` unchanged.
///
/// `timeout` bounds the whole exchange including the response body; pass
/// `None` for streaming.
pub fn build_upstream_request(
    client: &reqwest::Client,
    provider: &dyn ProviderDyn,
    inbound: &HeaderMap,
    body: Bytes,
    secret: &str,
    timeout: Option<Duration>,
) -> Result<reqwest::Request, GatewayError> {
    let headers = headers::upstream_request_headers(inbound, provider, secret)?;
    let mut builder = client
        .post(provider.descriptor_dyn().chat_completions_url())
        .headers(headers)
        .body(body);
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder
        .build()
        .map_err(|e| GatewayError::Internal(format!("building upstream request: {e}")))
}

fn classify(provider: &str, e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        tracing::warn!(provider, "Upstream request timed out");
        record_outcome(provider, Outcome::Timeout);
        GatewayError::UpstreamTimeout
    } else {
        record_outcome(provider, Outcome::Unreachable);
        GatewayError::UpstreamUnreachable(e)
    }
}

/// Send `request` and relay status, allow-listed headers and the full body.
pub async fn relay_buffered(
    client: &reqwest::Client,
    request: reqwest::Request,
    provider: &str,
) -> Result<Response, GatewayError> {
    let timer = UpstreamTimer::start(provider);
    let upstream = client
        .execute(request)
        .await
        .map_err(|e| classify(provider, e))?;
    let latency = timer.finish();
    tracing::debug!(
        status = upstream.status().as_u16(),
        latency_ms = latency.as_millis() as u64,
        "Upstream responded"
    );
    buffer_response(upstream, provider).await
}

async fn buffer_response(
    upstream: reqwest::Response,
    provider: &str,
) -> Result<Response, GatewayError> {
    let status = upstream.status();
    let headers = headers::relayed_response_headers(upstream.headers());
    let body = upstream.bytes().await.map_err(|e| classify(provider, e))?;
    record_outcome(provider, Outcome::Relayed);

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    Ok(response)
}

/// Send `request` and, on upstream 200, relay the body chunk by chunk.
///
/// Any other status is buffered and relayed like a non-streaming response,
/// since providers report failed streaming requests as ordinary JSON.
pub async fn relay_streaming(
    client: &reqwest::Client,
    request: reqwest::Request,
    provider: &str,
) -> Result<Response, GatewayError> {
    let timer = UpstreamTimer::start(provider);
    let upstream = client
        .execute(request)
        .await
        .map_err(|e| classify(provider, e))?;
    timer.finish();

    if upstream.status() != StatusCode::OK {
        tracing::debug!(
            status = upstream.status().as_u16(),
            "Upstream rejected streaming request"
        );
        return buffer_response(upstream, provider).await;
    }

    let headers = headers::streaming_response_headers(upstream.headers());
    let relay = RelayStream::new(Box::pin(upstream.bytes_stream()), provider);

    let mut response = Response::new(Body::from_stream(relay));
    *response.headers_mut() = headers;
    Ok(response)
}

// ---------------------------------------------------------------------------
// RelayStream
// ---------------------------------------------------------------------------

/// Passes upstream chunks through one at a time.
///
/// Ends on upstream EOF or on the first read error; an event stream whose
/// headers are committed has no way to report an error. Dropping it before
/// the end (client gone) drops the upstream response, which closes the
/// upstream connection.
pub struct RelayStream {
    inner: BoxStream<reqwest::Result<Bytes>>,
    provider: String,
    span: Span,
    chunks: u64,
    finished: bool,
}

impl RelayStream {
    pub fn new(inner: BoxStream<reqwest::Result<Bytes>>, provider: &str) -> Self {
        Self {
            inner,
            provider: provider.to_string(),
            span: Span::current(),
            chunks: 0,
            finished: false,
        }
    }

    fn finish(&mut self, outcome: Outcome) {
        self.finished = true;
        record_outcome(&self.provider, outcome);
    }
}

impl Stream for RelayStream {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        match self.inner.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                self.chunks += 1;
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                let _enter = self.span.clone().entered();
                tracing::warn!(error = %e, chunks = self.chunks, "Upstream stream failed, ending relay");
                self.finish(Outcome::Unreachable);
                Poll::Ready(None)
            }
            Poll::Ready(None) => {
                let _enter = self.span.clone().entered();
                tracing::debug!(chunks = self.chunks, "Upstream stream completed");
                self.finish(Outcome::StreamCompleted);
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for RelayStream {
    fn drop(&mut self) {
        if !self.finished {
            let _enter = self.span.enter();
            tracing::info!(chunks = self.chunks, "Client disconnected mid-stream");
            record_outcome(&self.provider, Outcome::ClientDisconnected);
        }
    }
}
