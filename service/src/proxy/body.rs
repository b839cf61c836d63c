//! Inbound body handling: a capped read and a partial decode of the two
//! fields the router needs.

use std::fmt;

use axum::body::Body;
use axum::http::HeaderMap;
use axum::http::header::CONTENT_LENGTH;
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use serde::de::{DeserializeSeed, Deserializer, IgnoredAny, MapAccess, Visitor};

use crate::error::GatewayError;

/// Read the whole body, failing as soon as it exceeds `limit` bytes.
///
/// A declared `Content-Length` above the limit is rejected before any byte
/// is read. Never holds more than `limit` bytes.
pub async fn read_capped(
    headers: &HeaderMap,
    body: Body,
    limit: usize,
) -> Result<Bytes, GatewayError> {
    let declared = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if declared.is_some_and(|len| len > limit as u64) {
        return Err(GatewayError::PayloadTooLarge { limit });
    }

    let mut buf = BytesMut::with_capacity(declared.map_or(0, |len| len as usize));
    let mut stream = body.into_data_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| {
            tracing::debug!(error = %e, "Failed to read request body");
            GatewayError::BadRequest("failed to read request body".to_string())
        })?;
        if buf.len() + chunk.len() > limit {
            return Err(GatewayError::PayloadTooLarge { limit });
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}

/// Routing hints pulled from a chat-completions body.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RequestHints {
    pub model: Option<String>,
    pub stream: bool,
}

impl RequestHints {
    /// Decode top-level `model` and `stream` without validating the rest.
    ///
    /// Fields seen before a syntax error are kept, so a truncated body can
    /// still be routed. Non-string `model` is ignored; only a literal `true`
    /// turns streaming on.
    pub fn sniff(body: &[u8]) -> Self {
        let mut hints = Self::default();
        let mut de = serde_json::Deserializer::from_slice(body);
        if let Err(e) = HintsSeed(&mut hints).deserialize(&mut de) {
            tracing::debug!(error = %e, "Request body is not well-formed JSON");
        }
        hints
    }
}

struct HintsSeed<'a>(&'a mut RequestHints);

impl<'de> DeserializeSeed<'de> for HintsSeed<'_> {
    type Value = ();

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<(), D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for HintsSeed<'_> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a JSON object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<(), A::Error> {
        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "model" => {
                    self.0.model = match map.next_value::<serde_json::Value>()? {
                        serde_json::Value::String(model) => Some(model),
                        _ => None,
                    };
                }
                "stream" => {
                    self.0.stream = matches!(
                        map.next_value::<serde_json::Value>()?,
                        serde_json::Value::Bool(true)
                    );
                }
                _ => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }
        Ok(())
    }
}
