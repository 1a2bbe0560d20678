//! # Egress
//!
//! Unified outbound HTTP transport layer: sync and async handlers over
//! fingerprint-keyed pooled transports, with environment-sourced proxy and
//! TLS policy.
//!
//! Handlers come in two flavors with one contract. `get` and `delete`
//! return responses as-is regardless of status; `post` raises a typed
//! [`Error::HttpStatus`] on non-2xx and can stream the response body.
//! Equivalent configurations share one transport through a
//! [`TransportRegistry`], and closing a handler releases its pooled
//! connections deterministically.
//!
//! ```no_run
//! # async fn run() -> egress::Result<()> {
//! let registry = egress::TransportRegistry::new();
//! let handler = registry.async_handler(&egress::TransportOverrides::provider())?;
//! let response = handler
//!     .post(
//!         "https://api.example.com/v1/chat",
//!         serde_json::json!({"input": "hello"}),
//!         &[],
//!         &[("authorization", "Bearer token")],
//!         false,
//!     )
//!     .await?;
//! let reply: serde_json::Value = response.json()?;
//! handler.aclose().await;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod handler;
pub mod lifecycle;
pub mod registry;
pub mod response;
pub mod timeouts;
pub mod transport;

pub use cache::ClientCache;
pub use config::{
    resolve, EnvSnapshot, ProxyConfig, ProxyOverride, SecurityLevel, TransportConfig,
    TransportOverrides,
};
pub use error::{Error, Result};
pub use fingerprint::ConnectionFingerprint;
pub use handler::{AsyncHandler, HandlerBuilder, Payload, SyncHandler};
pub use lifecycle::{LeakHook, LifecycleGuard};
pub use registry::TransportRegistry;
pub use response::{Body, Response};
pub use timeouts::Timeouts;
pub use transport::{
    AsyncTransport, Mode, RequestSpec, SendRequest, Strategy, SyncTransport, TransportFactory,
    VerifyMode,
};
