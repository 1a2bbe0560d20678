//! Normalized HTTP response shared by both transport strategies.

use std::time::Duration;

use bytes::Bytes;
use http::HeaderMap;
use tokio::sync::mpsc;

use crate::error::{Error, Result};

/// Response body: fully buffered, or a chunk stream for `stream=true` posts.
#[derive(Debug)]
pub enum Body {
    /// Complete body held in memory.
    Full(Bytes),
    /// Incremental chunks fed by the transport. Errors mid-stream terminate
    /// the receiver after delivering the error item.
    Stream(mpsc::Receiver<Result<Bytes>>),
}

/// HTTP response normalized across transport strategies.
///
/// Exposes status code, headers, raw bytes, a JSON accessor, the elapsed
/// time until headers were received, and a status-check method.
#[derive(Debug)]
pub struct Response {
    status: u16,
    headers: HeaderMap,
    body: Body,
    elapsed: Duration,
    url: String,
}

impl Response {
    /// Assemble a response. Public so injected [`SendRequest`] doubles can
    /// produce canned responses.
    ///
    /// [`SendRequest`]: crate::transport::SendRequest
    pub fn new(
        status: u16,
        headers: HeaderMap,
        body: Body,
        elapsed: Duration,
        url: impl Into<String>,
    ) -> Self {
        Self {
            status,
            headers,
            body,
            elapsed,
            url: url.into(),
        }
    }

    /// HTTP status code.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Single header value as a string, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The URL that was actually requested.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Time from request dispatch until response headers were received.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Whether the status is in the 2xx range.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Whether the body is a chunk stream rather than a buffered payload.
    pub fn is_stream(&self) -> bool {
        matches!(self.body, Body::Stream(_))
    }

    /// Raw body bytes. Errors for streaming bodies, which must be consumed
    /// chunk by chunk.
    pub fn bytes(&self) -> Result<&Bytes> {
        match &self.body {
            Body::Full(bytes) => Ok(bytes),
            Body::Stream(_) => Err(Error::BodyConsumed(
                "streaming body, use chunk()/into_stream()",
            )),
        }
    }

    /// Body decoded as UTF-8 text.
    pub fn text(&self) -> Result<String> {
        let bytes = self.bytes()?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| Error::connection(format!("UTF-8 decode error: {}", e)))
    }

    /// Body deserialized as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        let bytes = self.bytes()?;
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Next chunk of a streaming body. `Ok(None)` marks end of stream.
    ///
    /// Read-idle enforcement happens on the producer side, so a hung stream
    /// yields `Error::ReadIdleTimeout` here rather than waiting forever.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>> {
        match &mut self.body {
            Body::Full(_) => Err(Error::BodyConsumed("buffered body, use bytes()")),
            Body::Stream(rx) => rx.recv().await.transpose(),
        }
    }

    /// Blocking variant of [`chunk`](Self::chunk) for synchronous callers.
    pub fn chunk_blocking(&mut self) -> Result<Option<Bytes>> {
        match &mut self.body {
            Body::Full(_) => Err(Error::BodyConsumed("buffered body, use bytes()")),
            Body::Stream(rx) => rx.blocking_recv().transpose(),
        }
    }

    /// Take ownership of the raw body.
    pub fn into_body(self) -> Body {
        self.body
    }

    /// Chunk receiver for a streaming body, or `None` when buffered.
    pub fn into_stream(self) -> Option<mpsc::Receiver<Result<Bytes>>> {
        match self.body {
            Body::Stream(rx) => Some(rx),
            Body::Full(_) => None,
        }
    }

    /// Turn a non-2xx response into [`Error::HttpStatus`], preserving the
    /// body bytes for the caller to map to a vendor-specific error.
    pub fn error_for_status(self) -> Result<Self> {
        if self.is_success() {
            return Ok(self);
        }
        let status = self.status;
        let body = match self.body {
            Body::Full(bytes) => bytes,
            // Transports buffer non-2xx bodies even for stream requests, so
            // this arm only fires for hand-built responses.
            Body::Stream(_) => Bytes::new(),
        };
        Err(Error::HttpStatus { status, body })
    }
}
