//! Caller-facing handler facades.
//!
//! A handler owns exactly one transport, applies default headers and
//! timeouts, and exposes the narrow get/post/delete contract collaborators
//! program against. `get` and `delete` return the response as-is regardless
//! of status, so callers can distinguish transport success from
//! application-level provider errors; `post` raises a typed
//! [`Error::HttpStatus`] on non-2xx. No method retries anything.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use url::Url;

use crate::cache::ClientCache;
use crate::config::{resolve, EnvSnapshot, TransportConfig, TransportOverrides};
use crate::error::{Error, Result};
use crate::fingerprint::ConnectionFingerprint;
use crate::lifecycle::{LeakHook, LifecycleGuard};
use crate::response::Response;
use crate::timeouts::Timeouts;
use crate::transport::{
    AsyncTransport, RequestSpec, SendRequest, SyncTransport, TransportFactory,
};

/// Request body for `post`.
#[derive(Debug, Clone)]
pub enum Payload {
    Empty,
    /// JSON-serialized; sets `Content-Type: application/json` unless the
    /// caller supplied one.
    Json(serde_json::Value),
    Raw(Bytes),
}

impl Default for Payload {
    fn default() -> Self {
        Self::Empty
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

impl From<Bytes> for Payload {
    fn from(value: Bytes) -> Self {
        Self::Raw(value)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(value: Vec<u8>) -> Self {
        Self::Raw(Bytes::from(value))
    }
}

impl From<&'static str> for Payload {
    fn from(value: &'static str) -> Self {
        Self::Raw(Bytes::from_static(value.as_bytes()))
    }
}

/// Builder shared by both handler flavors.
///
/// Construction accepts scalar or per-phase timeouts, a concurrency limit,
/// or an externally owned sender adopted as-is (bypassing factory and
/// cache). Nothing touches the network until the first request.
#[derive(Default)]
pub struct HandlerBuilder {
    overrides: TransportOverrides,
    env: Option<EnvSnapshot>,
    default_headers: HeaderMap,
    injected: Option<Arc<dyn SendRequest>>,
    leak_hook: Option<LeakHook>,
}

impl HandlerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scalar total timeout or a full per-phase [`Timeouts`] set.
    pub fn timeout(mut self, timeout: impl Into<Timeouts>) -> Self {
        self.overrides.timeouts = Some(timeout.into());
        self
    }

    pub fn concurrent_limit(mut self, limit: usize) -> Self {
        self.overrides.concurrent_limit = Some(limit);
        self
    }

    /// Replace all transport overrides wholesale.
    pub fn overrides(mut self, overrides: TransportOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Resolve against this snapshot instead of capturing the process
    /// environment.
    pub fn env(mut self, env: EnvSnapshot) -> Self {
        self.env = Some(env);
        self
    }

    /// Add a default header, sent unless the caller overrides it per call.
    pub fn default_header(mut self, name: &str, value: &str) -> Self {
        insert_default_header(&mut self.default_headers, name, value);
        self
    }

    /// Adopt an externally built sender as-is, bypassing the factory.
    pub fn transport(mut self, sender: Arc<dyn SendRequest>) -> Self {
        self.injected = Some(sender);
        self
    }

    /// Observe leak diagnostics (test seam).
    pub fn leak_hook(mut self, hook: LeakHook) -> Self {
        self.leak_hook = Some(hook);
        self
    }

    fn resolve_config(&self) -> Result<TransportConfig> {
        let env = match &self.env {
            Some(env) => env.clone(),
            None => EnvSnapshot::capture(),
        };
        resolve(&env, &self.overrides)
    }

    fn guard(&self, handler_type: &'static str) -> LifecycleGuard {
        match &self.leak_hook {
            Some(hook) => LifecycleGuard::with_leak_hook(handler_type, Arc::clone(hook)),
            None => LifecycleGuard::new(handler_type),
        }
    }

    pub fn build_async(self) -> Result<AsyncHandler> {
        let config = self.resolve_config()?;
        let fingerprint = ConnectionFingerprint::from_config(&config);
        let transport = match &self.injected {
            Some(sender) => Arc::new(AsyncTransport::injected(
                Arc::clone(sender),
                config.concurrent_limit,
            )),
            None => Arc::new(TransportFactory::build_async(&config)?),
        };
        let guard = self.guard("AsyncHandler");
        Ok(AsyncHandler {
            transport: Mutex::new(Some(transport)),
            default_headers: self.default_headers,
            timeouts: config.timeouts,
            guard,
            fingerprint,
            cache: None,
        })
    }

    pub fn build_sync(self) -> Result<SyncHandler> {
        if self.injected.is_some() {
            return Err(Error::configuration(
                "injected senders are async-only; use build_async",
            ));
        }
        let config = self.resolve_config()?;
        let fingerprint = ConnectionFingerprint::from_config(&config);
        let transport = Arc::new(TransportFactory::build_sync(&config)?);
        let guard = self.guard("SyncHandler");
        Ok(SyncHandler {
            transport: Mutex::new(Some(transport)),
            default_headers: self.default_headers,
            timeouts: config.timeouts,
            guard,
            fingerprint,
            cache: None,
        })
    }
}

/// Asynchronous handler: suspends the calling task only at the network-I/O
/// boundary.
#[derive(Debug)]
pub struct AsyncHandler {
    transport: Mutex<Option<Arc<AsyncTransport>>>,
    default_headers: HeaderMap,
    timeouts: Timeouts,
    guard: LifecycleGuard,
    fingerprint: ConnectionFingerprint,
    cache: Option<ClientCache<Arc<AsyncTransport>>>,
}

impl AsyncHandler {
    pub fn builder() -> HandlerBuilder {
        HandlerBuilder::new()
    }

    pub(crate) fn from_parts(
        transport: Arc<AsyncTransport>,
        config: &TransportConfig,
        fingerprint: ConnectionFingerprint,
        cache: ClientCache<Arc<AsyncTransport>>,
    ) -> Self {
        Self {
            transport: Mutex::new(Some(transport)),
            default_headers: HeaderMap::new(),
            timeouts: config.timeouts.clone(),
            guard: LifecycleGuard::new("AsyncHandler"),
            fingerprint,
            cache: Some(cache),
        }
    }

    /// Add a default header after construction. Registry-minted handlers
    /// start with none; chain this to attach them. Invalid names or values
    /// are logged and skipped, same as the builder.
    pub fn with_default_header(mut self, name: &str, value: &str) -> Self {
        insert_default_header(&mut self.default_headers, name, value);
        self
    }

    /// Attach a leak observer after construction (test seam).
    pub fn with_leak_hook(mut self, hook: LeakHook) -> Self {
        self.guard.set_leak_hook(hook);
        self
    }

    /// Fetch; the response is returned as-is for any status.
    pub async fn get(
        &self,
        url: &str,
        params: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> Result<Response> {
        let spec = self.spec(Method::GET, url, params, headers, Payload::Empty, false)?;
        self.transport()?.execute(spec).await
    }

    /// Delete; the response is returned as-is for any status.
    pub async fn delete(
        &self,
        url: &str,
        params: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> Result<Response> {
        let spec = self.spec(Method::DELETE, url, params, headers, Payload::Empty, false)?;
        self.transport()?.execute(spec).await
    }

    /// Post; non-2xx raises [`Error::HttpStatus`] carrying the body.
    /// `stream=true` delivers the response body as chunks without buffering.
    pub async fn post(
        &self,
        url: &str,
        body: impl Into<Payload>,
        params: &[(&str, &str)],
        headers: &[(&str, &str)],
        stream: bool,
    ) -> Result<Response> {
        let spec = self.spec(Method::POST, url, params, headers, body.into(), stream)?;
        let response = self.transport()?.execute(spec).await?;
        response.error_for_status()
    }

    /// Close and release pooled connections. Idempotent.
    pub fn close(&self) {
        if self.guard.mark_closed() {
            if let Some(cache) = &self.cache {
                cache.evict(&self.fingerprint);
            }
            *self.transport.lock().expect("handler mutex poisoned") = None;
        }
    }

    /// Async-flavored close for scoped teardown paths. Equivalent to
    /// [`close`](Self::close); the release itself never suspends.
    pub async fn aclose(&self) {
        self.close();
    }

    pub fn is_closed(&self) -> bool {
        self.guard.is_closed()
    }

    pub fn fingerprint(&self) -> &ConnectionFingerprint {
        &self.fingerprint
    }

    fn transport(&self) -> Result<Arc<AsyncTransport>> {
        self.transport
            .lock()
            .expect("handler mutex poisoned")
            .clone()
            .ok_or(Error::Closed)
    }

    fn spec(
        &self,
        method: Method,
        url: &str,
        params: &[(&str, &str)],
        headers: &[(&str, &str)],
        payload: Payload,
        stream: bool,
    ) -> Result<RequestSpec> {
        build_spec(
            method,
            url,
            params,
            headers,
            payload,
            stream,
            &self.default_headers,
            &self.timeouts,
        )
    }
}

/// Synchronous handler: blocks the calling thread for the span of each
/// request. Closes itself on drop, so scoped usage releases deterministically
/// on every exit path.
#[derive(Debug)]
pub struct SyncHandler {
    transport: Mutex<Option<Arc<SyncTransport>>>,
    default_headers: HeaderMap,
    timeouts: Timeouts,
    guard: LifecycleGuard,
    fingerprint: ConnectionFingerprint,
    cache: Option<ClientCache<Arc<SyncTransport>>>,
}

impl SyncHandler {
    pub fn builder() -> HandlerBuilder {
        HandlerBuilder::new()
    }

    pub(crate) fn from_parts(
        transport: Arc<SyncTransport>,
        config: &TransportConfig,
        fingerprint: ConnectionFingerprint,
        cache: ClientCache<Arc<SyncTransport>>,
    ) -> Self {
        Self {
            transport: Mutex::new(Some(transport)),
            default_headers: HeaderMap::new(),
            timeouts: config.timeouts.clone(),
            guard: LifecycleGuard::new("SyncHandler"),
            fingerprint,
            cache: Some(cache),
        }
    }

    /// Add a default header after construction. Registry-minted handlers
    /// start with none; chain this to attach them. Invalid names or values
    /// are logged and skipped, same as the builder.
    pub fn with_default_header(mut self, name: &str, value: &str) -> Self {
        insert_default_header(&mut self.default_headers, name, value);
        self
    }

    /// Attach a leak observer after construction (test seam).
    pub fn with_leak_hook(mut self, hook: LeakHook) -> Self {
        self.guard.set_leak_hook(hook);
        self
    }

    pub fn get(
        &self,
        url: &str,
        params: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> Result<Response> {
        let spec = self.spec(Method::GET, url, params, headers, Payload::Empty, false)?;
        self.transport()?.execute(spec)
    }

    pub fn delete(
        &self,
        url: &str,
        params: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> Result<Response> {
        let spec = self.spec(Method::DELETE, url, params, headers, Payload::Empty, false)?;
        self.transport()?.execute(spec)
    }

    pub fn post(
        &self,
        url: &str,
        body: impl Into<Payload>,
        params: &[(&str, &str)],
        headers: &[(&str, &str)],
        stream: bool,
    ) -> Result<Response> {
        let spec = self.spec(Method::POST, url, params, headers, body.into(), stream)?;
        let response = self.transport()?.execute(spec)?;
        response.error_for_status()
    }

    /// Close and release pooled connections. Idempotent.
    pub fn close(&self) {
        if self.guard.mark_closed() {
            if let Some(cache) = &self.cache {
                cache.evict(&self.fingerprint);
            }
            *self.transport.lock().expect("handler mutex poisoned") = None;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.guard.is_closed()
    }

    pub fn fingerprint(&self) -> &ConnectionFingerprint {
        &self.fingerprint
    }

    fn transport(&self) -> Result<Arc<SyncTransport>> {
        self.transport
            .lock()
            .expect("handler mutex poisoned")
            .clone()
            .ok_or(Error::Closed)
    }

    fn spec(
        &self,
        method: Method,
        url: &str,
        params: &[(&str, &str)],
        headers: &[(&str, &str)],
        payload: Payload,
        stream: bool,
    ) -> Result<RequestSpec> {
        build_spec(
            method,
            url,
            params,
            headers,
            payload,
            stream,
            &self.default_headers,
            &self.timeouts,
        )
    }
}

impl Drop for SyncHandler {
    fn drop(&mut self) {
        self.close();
    }
}

fn insert_default_header(headers: &mut HeaderMap, name: &str, value: &str) {
    if let (Ok(name), Ok(value)) = (
        HeaderName::from_bytes(name.as_bytes()),
        HeaderValue::from_str(value),
    ) {
        headers.insert(name, value);
    } else {
        tracing::warn!(header = name, "ignoring invalid default header");
    }
}

#[allow(clippy::too_many_arguments)]
fn build_spec(
    method: Method,
    url: &str,
    params: &[(&str, &str)],
    headers: &[(&str, &str)],
    payload: Payload,
    stream: bool,
    default_headers: &HeaderMap,
    timeouts: &Timeouts,
) -> Result<RequestSpec> {
    let mut url = Url::parse(url)?;
    if !params.is_empty() {
        url.query_pairs_mut().extend_pairs(params);
    }

    // Defaults merge under caller-supplied headers: caller wins.
    let mut merged = default_headers.clone();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| Error::configuration(format!("invalid header name {:?}: {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| Error::configuration(format!("invalid header value: {}", e)))?;
        merged.insert(name, value);
    }

    let body = match payload {
        Payload::Empty => Bytes::new(),
        Payload::Raw(bytes) => bytes,
        Payload::Json(value) => {
            if !merged.contains_key(CONTENT_TYPE) {
                merged.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            }
            Bytes::from(serde_json::to_vec(&value)?)
        }
    };

    Ok(RequestSpec {
        method,
        url,
        headers: merged,
        body,
        stream,
        timeouts: timeouts.clone(),
    })
}
