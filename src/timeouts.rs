//! Timeout configuration for outbound requests.
//!
//! # Timeout Types
//!
//! - **connect**: DNS + TCP + TLS handshake timeout
//! - **read_idle**: Maximum time between received body chunks (resets on each chunk)
//! - **total**: Absolute deadline for the entire request lifecycle
//! - **pool_acquire**: Time to wait for a request slot when `concurrent_limit` is saturated
//!
//! Every timeout is per-request and terminal to that one request only.

use std::time::Duration;

/// Per-phase timeout set.
///
/// All timeouts are optional. When `None`, no timeout is applied for that phase.
///
/// # Timeout Semantics
///
/// - **connect**: Does NOT reset. Deadline for establishing the transport connection.
/// - **read_idle**: RESETS on each chunk received. Detects hung streams.
/// - **total**: Does NOT reset. Absolute deadline covering connect + send + receive.
/// - **pool_acquire**: Does NOT reset. Time waiting for a free request slot.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Timeouts {
    /// Timeout for establishing a connection (DNS + TCP + TLS handshake).
    pub connect: Option<Duration>,

    /// Maximum time waiting for the next chunk of a streaming response body.
    ///
    /// **This timeout resets on each successful read.** For streaming
    /// responses this is typically the primary timeout mechanism.
    pub read_idle: Option<Duration>,

    /// Absolute time limit for the entire request lifecycle.
    ///
    /// For streaming responses you typically want this disabled (`None`) and
    /// rely on `read_idle` instead.
    pub total: Option<Duration>,

    /// Time waiting for a request slot when the concurrency limit is reached.
    pub pool_acquire: Option<Duration>,
}

impl Timeouts {
    /// Create a new Timeouts with all phases set to None.
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults for ad-hoc handlers: 5s connect, 5s total.
    pub fn ad_hoc() -> Self {
        Self {
            connect: Some(Duration::from_secs(5)),
            read_idle: None,
            total: Some(Duration::from_secs(5)),
            pool_acquire: Some(Duration::from_secs(10)),
        }
    }

    /// Defaults for long-running provider calls: 5s connect, 600s total.
    ///
    /// `read_idle` is left generous so slow token streams are not killed.
    pub fn provider() -> Self {
        Self {
            connect: Some(Duration::from_secs(5)),
            read_idle: Some(Duration::from_secs(120)),
            total: Some(Duration::from_secs(600)),
            pool_acquire: Some(Duration::from_secs(10)),
        }
    }

    /// Set connect timeout.
    pub fn connect(mut self, timeout: Duration) -> Self {
        self.connect = Some(timeout);
        self
    }

    /// Set read idle timeout.
    pub fn read_idle(mut self, timeout: Duration) -> Self {
        self.read_idle = Some(timeout);
        self
    }

    /// Set total request deadline.
    pub fn total(mut self, timeout: Duration) -> Self {
        self.total = Some(timeout);
        self
    }

    /// Set pool acquire timeout.
    pub fn pool_acquire(mut self, timeout: Duration) -> Self {
        self.pool_acquire = Some(timeout);
        self
    }

    /// Disable the total deadline (streaming responses can run indefinitely).
    pub fn no_total_timeout(mut self) -> Self {
        self.total = None;
        self
    }

    /// Fill unset phases from `defaults`, keeping phases already set.
    pub fn or_defaults(mut self, defaults: &Timeouts) -> Self {
        self.connect = self.connect.or(defaults.connect);
        self.read_idle = self.read_idle.or(defaults.read_idle);
        self.total = self.total.or(defaults.total);
        self.pool_acquire = self.pool_acquire.or(defaults.pool_acquire);
        self
    }
}

/// A scalar timeout is shorthand for a total deadline; per-phase defaults
/// still apply underneath it.
impl From<Duration> for Timeouts {
    fn from(total: Duration) -> Self {
        Self {
            connect: None,
            read_idle: None,
            total: Some(total),
            pool_acquire: None,
        }
    }
}
