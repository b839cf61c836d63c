//! Request metrics.
//!
//! Recorded through the `metrics` facade; without an installed recorder
//! every call is a no-op.
//!
//! - `byokgate_requests_total{provider, outcome}`
//! - `byokgate_upstream_latency_seconds{provider}`

use std::time::{Duration, Instant};

pub const REQUESTS_TOTAL: &str = "byokgate_requests_total";
pub const UPSTREAM_LATENCY: &str = "byokgate_upstream_latency_seconds";

/// How a proxied request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Upstream response relayed (any status).
    Relayed,
    /// Streaming relay finished at upstream EOF.
    StreamCompleted,
    /// Client went away before the relay finished.
    ClientDisconnected,
    Unreachable,
    Timeout,
    /// Rejected locally before any upstream call.
    Rejected,
    /// Gateway-side failure, e.g. an unreadable credential store or a key
    /// that no longer decrypts.
    InternalError,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Relayed => "relayed",
            Outcome::StreamCompleted => "stream_completed",
            Outcome::ClientDisconnected => "client_disconnected",
            Outcome::Unreachable => "unreachable",
            Outcome::Timeout => "timeout",
            Outcome::Rejected => "rejected",
            Outcome::InternalError => "internal_error",
        }
    }
}

pub fn record_outcome(provider: &str, outcome: Outcome) {
    metrics::counter!(
        REQUESTS_TOTAL,
        "provider" => provider.to_string(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

pub fn record_upstream_latency(provider: &str, latency: Duration) {
    metrics::histogram!(UPSTREAM_LATENCY, "provider" => provider.to_string())
        .record(latency.as_secs_f64());
}

/// Times one upstream exchange, from send to response headers.
pub struct UpstreamTimer {
    start: Instant,
    provider: String,
}

impl UpstreamTimer {
    pub fn start(provider: &str) -> Self {
        Self {
            start: Instant::now(),
            provider: provider.to_string(),
        }
    }

    /// Record the elapsed time and return it.
    pub fn finish(self) -> Duration {
        let elapsed = self.start.elapsed();
        record_upstream_latency(&self.provider, elapsed);
        elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_labels_are_distinct() {
        let all = [
            Outcome::Relayed,
            Outcome::StreamCompleted,
            Outcome::ClientDisconnected,
            Outcome::Unreachable,
            Outcome::Timeout,
            Outcome::Rejected,
            Outcome::InternalError,
        ];
        let mut labels: Vec<_> = all.iter().map(|o| o.as_str()).collect();
        labels.sort();
        labels.dedup();
        assert_eq!(labels.len(), all.len());
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_outcome("openai", Outcome::Relayed);
        let elapsed = UpstreamTimer::start("openai").finish();
        assert!(elapsed < Duration::from_secs(5));
    }
}
