//! Error types for the egress crate.

use std::io;
use std::time::Duration;

use bytes::Bytes;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building transports or sending requests.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Unsatisfiable transport options. Fatal at build time; the caller must
    /// change options rather than retry.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Network-level failure (DNS, TCP, resets). Surfaced unmodified, never
    /// retried inside this layer.
    #[error("connection error: {0}")]
    Connection(String),

    /// Non-2xx status on `post`. Carries the response body so the caller can
    /// map it to a vendor-specific error.
    #[error("HTTP {status}: {}", body_snippet(.body))]
    HttpStatus { status: u16, body: Bytes },

    /// Connect timeout (DNS + TCP + TLS handshake).
    #[error("connect timeout after {0:?}")]
    ConnectTimeout(Duration),

    /// Read idle timeout: no response data received within the duration.
    #[error("read idle timeout after {0:?} - stream may be hung")]
    ReadIdleTimeout(Duration),

    /// Total request deadline exceeded.
    #[error("total request deadline exceeded after {0:?}")]
    TotalTimeout(Duration),

    /// Pool acquire timeout: no request slot became available.
    #[error("pool acquire timeout after {0:?} - no connections available")]
    PoolAcquireTimeout(Duration),

    /// Generic timeout where the phase could not be attributed.
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// TLS/SSL error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// URL parsing error.
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Request issued on a handler that was already closed.
    #[error("handler is closed")]
    Closed,

    /// Response body was already consumed or is a stream.
    #[error("response body unavailable: {0}")]
    BodyConsumed(&'static str),
}

impl Error {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// Create a TLS error.
    pub fn tls(message: impl Into<String>) -> Self {
        Self::Tls(message.into())
    }

    /// Create a generic timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout(message.into())
    }

    /// Create an HTTP status error from a non-2xx response.
    pub fn http_status(status: u16, body: impl Into<Bytes>) -> Self {
        Self::HttpStatus {
            status,
            body: body.into(),
        }
    }

    /// Status code for `HttpStatus` errors, `None` otherwise.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Raw response body for `HttpStatus` errors.
    pub fn body(&self) -> Option<&Bytes> {
        match self {
            Self::HttpStatus { body, .. } => Some(body),
            _ => None,
        }
    }

    /// Deserialize the error response body for `HttpStatus` errors.
    pub fn body_json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        match self {
            Self::HttpStatus { body, .. } => Ok(serde_json::from_slice(body)?),
            _ => Err(Error::BodyConsumed("not an HTTP status error")),
        }
    }

    /// Whether this error is any of the timeout variants.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::ConnectTimeout(_)
                | Self::ReadIdleTimeout(_)
                | Self::TotalTimeout(_)
                | Self::PoolAcquireTimeout(_)
                | Self::Timeout(_)
        )
    }
}

fn body_snippet(body: &Bytes) -> String {
    const MAX: usize = 256;
    let text = String::from_utf8_lossy(body);
    if text.len() <= MAX {
        return text.into_owned();
    }
    // Truncate on a char boundary: byte MAX may fall inside a multi-byte
    // character.
    let mut end = MAX;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_accessors() {
        let err = Error::http_status(500, Bytes::from_static(b"{\"error\":\"x\"}"));
        assert_eq!(err.status(), Some(500));
        let parsed: serde_json::Value = err.body_json().unwrap();
        assert_eq!(parsed["error"], "x");
    }

    #[test]
    fn test_timeout_classification() {
        assert!(Error::TotalTimeout(Duration::from_secs(1)).is_timeout());
        assert!(Error::PoolAcquireTimeout(Duration::from_secs(1)).is_timeout());
        assert!(!Error::Closed.is_timeout());
    }

    #[test]
    fn test_status_on_other_variants() {
        assert_eq!(Error::Closed.status(), None);
        assert!(Error::Closed.body().is_none());
    }

    #[test]
    fn test_display_truncates_long_multibyte_body() {
        // Byte 256 falls inside a two-byte character; Display must not
        // panic on the boundary.
        let mut body = String::from("a");
        body.push_str(&"é".repeat(200));
        let err = Error::http_status(500, Bytes::from(body));
        let rendered = err.to_string();
        assert!(rendered.starts_with("HTTP 500"));
        assert!(rendered.ends_with("..."));
    }

    #[test]
    fn test_display_keeps_short_bodies_whole() {
        let err = Error::http_status(404, Bytes::from_static("égaré".as_bytes()));
        assert!(err.to_string().contains("égaré"));
    }
}
