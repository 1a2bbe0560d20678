//! Transport strategies and the factory that selects between them.
//!
//! Two mutually exclusive strategies sit behind one request/response
//! surface:
//!
//! - **Standard**: conventional pooled client (reqwest), sync and async.
//! - **Pooled**: hyper-util legacy pool over a hand-built TCP + rustls
//!   connector, offering finer keepalive and idle-cleanup control.
//!   Async only.
//!
//! Strategy selection is a tagged-variant decision resolved once from the
//! immutable configuration, never re-evaluated per request.

pub mod pooled;
pub mod standard;
pub mod tls;

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::{HeaderMap, Method};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use url::Url;

use crate::config::TransportConfig;
use crate::error::{Error, Result};
use crate::response::Response;
use crate::timeouts::Timeouts;

pub use tls::VerifyMode;

/// Which of the two network stacks backs a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// Conventional pooled transport.
    Standard,
    /// Finer-grained pool behind the same request/response surface.
    Pooled,
}

/// Whether callers block a thread or suspend a task per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Sync,
    Async,
}

/// Resolve the strategy for a mode/configuration pair.
///
/// Async mode prefers the pooled strategy unless it is disabled process-wide,
/// IPv4 pinning is requested (the pooled connector resolves through the
/// system resolver and cannot pin the address family), or proxies are
/// configured (the pooled connector does not tunnel). Sync mode always uses
/// the standard strategy. Explicitly forcing an unsatisfiable combination is
/// a configuration error rather than a silent fallback.
pub fn select_strategy(mode: Mode, config: &TransportConfig) -> Result<Strategy> {
    if let Some(forced) = config.strategy_override {
        if forced == Strategy::Pooled {
            if mode == Mode::Sync {
                return Err(Error::configuration(
                    "pooled transport strategy is async-only",
                ));
            }
            if config.force_ipv4 {
                return Err(Error::configuration(
                    "pooled transport cannot pin the address family; drop force_ipv4 or use the standard strategy",
                ));
            }
            if config.proxies.is_some() {
                return Err(Error::configuration(
                    "pooled transport does not support proxies; use the standard strategy",
                ));
            }
        }
        return Ok(forced);
    }

    match mode {
        Mode::Sync => Ok(Strategy::Standard),
        Mode::Async => {
            if config.pooled_disabled || config.force_ipv4 || config.proxies.is_some() {
                Ok(Strategy::Standard)
            } else {
                Ok(Strategy::Pooled)
            }
        }
    }
}

/// One outbound request, fully specified by the handler facade.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Deliver the response body as a chunk stream instead of buffering.
    pub stream: bool,
    pub timeouts: Timeouts,
}

/// Injectable request sender: the seam for externally built clients and
/// test doubles, adopted as-is and bypassing factory and cache.
pub trait SendRequest: Send + Sync {
    fn send<'a>(
        &'a self,
        spec: RequestSpec,
    ) -> Pin<Box<dyn Future<Output = Result<Response>> + Send + 'a>>;
}

/// Lazily initialized client cell.
///
/// Transport handles are constructed speculatively per unique fingerprint,
/// so the underlying client is only built on first request. The init lock
/// guarantees a single build even under concurrent first requests.
pub(crate) struct Lazy<T> {
    cell: OnceLock<T>,
    init: Mutex<()>,
}

impl<T> Lazy<T> {
    pub(crate) fn new() -> Self {
        Self {
            cell: OnceLock::new(),
            init: Mutex::new(()),
        }
    }

    pub(crate) fn get_or_try_init<F>(&self, build: F) -> Result<&T>
    where
        F: FnOnce() -> Result<T>,
    {
        if let Some(value) = self.cell.get() {
            return Ok(value);
        }
        let _guard = self.init.lock().expect("lazy init mutex poisoned");
        if self.cell.get().is_none() {
            let value = build()?;
            let _ = self.cell.set(value);
        }
        Ok(self.cell.get().expect("initialized above"))
    }
}

impl<T> std::fmt::Debug for Lazy<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lazy")
            .field("initialized", &self.cell.get().is_some())
            .finish()
    }
}

/// Asynchronous transport handle: one strategy, one bounded request gate.
#[derive(Debug)]
pub struct AsyncTransport {
    strategy: Option<Strategy>,
    inner: AsyncTransportInner,
    limiter: Arc<Semaphore>,
}

enum AsyncTransportInner {
    Standard(standard::StandardTransport),
    Pooled(pooled::PooledTransport),
    Injected(Arc<dyn SendRequest>),
}

impl std::fmt::Debug for AsyncTransportInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Standard(_) => f.write_str("Standard"),
            Self::Pooled(_) => f.write_str("Pooled"),
            Self::Injected(_) => f.write_str("Injected"),
        }
    }
}

impl AsyncTransport {
    /// Adopt an externally owned sender as-is.
    pub fn injected(sender: Arc<dyn SendRequest>, concurrent_limit: usize) -> Self {
        Self {
            strategy: None,
            inner: AsyncTransportInner::Injected(sender),
            limiter: Arc::new(Semaphore::new(concurrent_limit.max(1))),
        }
    }

    /// The selected strategy; `None` for injected senders.
    pub fn strategy(&self) -> Option<Strategy> {
        self.strategy
    }

    /// Send one request. Requests beyond `concurrent_limit` queue on the
    /// gate rather than opening unbounded sockets; the slot is held until
    /// the response body completes, including streamed bodies.
    pub async fn execute(&self, spec: RequestSpec) -> Result<Response> {
        let permit = self.acquire_slot(spec.timeouts.pool_acquire).await?;
        match &self.inner {
            AsyncTransportInner::Standard(t) => t.execute(spec, permit).await,
            AsyncTransportInner::Pooled(t) => t.execute(spec, permit).await,
            AsyncTransportInner::Injected(t) => {
                let result = t.send(spec).await;
                drop(permit);
                result
            }
        }
    }

    async fn acquire_slot(&self, timeout: Option<Duration>) -> Result<OwnedSemaphorePermit> {
        let acquire = Arc::clone(&self.limiter).acquire_owned();
        let acquired = match timeout {
            Some(d) => tokio::time::timeout(d, acquire)
                .await
                .map_err(|_| Error::PoolAcquireTimeout(d))?,
            None => acquire.await,
        };
        acquired.map_err(|_| Error::Closed)
    }
}

/// Synchronous transport handle. Always the standard strategy.
#[derive(Debug)]
pub struct SyncTransport {
    inner: standard::BlockingTransport,
    gate: Gate,
}

impl SyncTransport {
    /// Send one request, blocking the calling thread for its whole span.
    /// The gate slot travels with the request so a streamed body keeps it
    /// held until the stream completes, mirroring the async permit.
    pub fn execute(&self, spec: RequestSpec) -> Result<Response> {
        let slot = self.gate.acquire(spec.timeouts.pool_acquire)?;
        self.inner.execute(spec, slot)
    }
}

/// Builds transports from resolved configurations.
///
/// Building has no network side effects: the underlying client comes into
/// being on first request.
pub struct TransportFactory;

impl TransportFactory {
    pub fn build_async(config: &TransportConfig) -> Result<AsyncTransport> {
        let strategy = select_strategy(Mode::Async, config)?;
        tracing::debug!(?strategy, "building async transport");
        let inner = match strategy {
            Strategy::Standard => {
                AsyncTransportInner::Standard(standard::StandardTransport::new(config.clone()))
            }
            Strategy::Pooled => {
                AsyncTransportInner::Pooled(pooled::PooledTransport::new(config.clone()))
            }
        };
        Ok(AsyncTransport {
            strategy: Some(strategy),
            inner,
            limiter: Arc::new(Semaphore::new(config.concurrent_limit)),
        })
    }

    pub fn build_sync(config: &TransportConfig) -> Result<SyncTransport> {
        let strategy = select_strategy(Mode::Sync, config)?;
        debug_assert_eq!(strategy, Strategy::Standard);
        Ok(SyncTransport {
            inner: standard::BlockingTransport::new(config.clone()),
            gate: Gate::new(config.concurrent_limit),
        })
    }
}

/// Counting gate bounding in-flight blocking requests.
#[derive(Debug)]
struct Gate {
    inner: Arc<GateInner>,
}

#[derive(Debug)]
struct GateInner {
    limit: usize,
    in_flight: Mutex<usize>,
    released: Condvar,
}

/// Held for the span of one blocking request, including a streamed body:
/// the slot is owned so a stream reader thread can carry it until the last
/// chunk arrives.
#[derive(Debug)]
pub(crate) struct GateSlot {
    inner: Arc<GateInner>,
}

impl Gate {
    fn new(limit: usize) -> Self {
        Self {
            inner: Arc::new(GateInner {
                limit: limit.max(1),
                in_flight: Mutex::new(0),
                released: Condvar::new(),
            }),
        }
    }

    fn acquire(&self, timeout: Option<Duration>) -> Result<GateSlot> {
        let inner = &self.inner;
        let mut count = inner.in_flight.lock().expect("gate mutex poisoned");
        match timeout {
            Some(d) => {
                // Each wakeup waits on the remaining budget, so spurious
                // notifies cannot stretch the total wait past the deadline.
                let deadline = Instant::now() + d;
                while *count >= inner.limit {
                    let left = deadline.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        return Err(Error::PoolAcquireTimeout(d));
                    }
                    let (guard, _) = inner
                        .released
                        .wait_timeout(count, left)
                        .expect("gate mutex poisoned");
                    count = guard;
                }
            }
            None => {
                while *count >= inner.limit {
                    count = inner.released.wait(count).expect("gate mutex poisoned");
                }
            }
        }
        *count += 1;
        Ok(GateSlot {
            inner: Arc::clone(inner),
        })
    }
}

impl Drop for GateSlot {
    fn drop(&mut self) {
        let mut count = self.inner.in_flight.lock().expect("gate mutex poisoned");
        *count -= 1;
        self.inner.released.notify_one();
    }
}
