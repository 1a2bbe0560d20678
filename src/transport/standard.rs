//! Standard strategy: conventional pooled transport backed by reqwest.
//!
//! Used for all synchronous traffic and for asynchronous traffic whenever
//! the pooled strategy is unavailable (process-wide disable toggle, IPv4
//! pinning, proxies). The underlying client is built lazily on first
//! request; until then a handle is just configuration.

use std::net::{IpAddr, Ipv4Addr};
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::sync::OwnedSemaphorePermit;

use crate::config::{ProxyConfig, TransportConfig};
use crate::error::{Error, Result};
use crate::response::{Body, Response};
use crate::timeouts::Timeouts;
use crate::transport::{GateSlot, Lazy, RequestSpec};

const STREAM_CHANNEL_CAPACITY: usize = 16;
const BLOCKING_READ_CHUNK: usize = 8 * 1024;

/// Async reqwest transport.
#[derive(Debug)]
pub(crate) struct StandardTransport {
    config: TransportConfig,
    client: Lazy<reqwest::Client>,
}

impl StandardTransport {
    pub(crate) fn new(config: TransportConfig) -> Self {
        Self {
            config,
            client: Lazy::new(),
        }
    }

    fn client(&self) -> Result<reqwest::Client> {
        self.client
            .get_or_try_init(|| build_async_client(&self.config))
            .cloned()
    }

    pub(crate) async fn execute(
        &self,
        spec: RequestSpec,
        permit: OwnedSemaphorePermit,
    ) -> Result<Response> {
        let client = self.client()?;
        let started = Instant::now();

        let mut builder = client
            .request(spec.method.clone(), spec.url.as_str())
            .headers(spec.headers.clone());
        if !spec.body.is_empty() {
            builder = builder.body(spec.body.clone());
        }

        let send = builder.send();
        let response = match spec.timeouts.total {
            Some(total) => tokio::time::timeout(total, send)
                .await
                .map_err(|_| Error::TotalTimeout(total))?,
            None => send.await,
        }
        .map_err(|e| map_reqwest_error(e, &spec.timeouts))?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let url = response.url().to_string();
        let elapsed = started.elapsed();

        // Non-2xx bodies are buffered even for stream requests so the error
        // payload survives into Error::HttpStatus.
        let success = (200..300).contains(&status);
        if !spec.stream || !success {
            let collect = response.bytes();
            let bytes = match remaining(spec.timeouts.total, started) {
                Some(budget) => tokio::time::timeout(budget, collect)
                    .await
                    .map_err(|_| Error::TotalTimeout(spec.timeouts.total.unwrap_or(budget)))?,
                None => collect.await,
            }
            .map_err(|e| map_reqwest_error(e, &spec.timeouts))?;
            drop(permit);
            return Ok(Response::new(status, headers, Body::Full(bytes), elapsed, url));
        }

        let (tx, rx) = mpsc::channel::<Result<Bytes>>(STREAM_CHANNEL_CAPACITY);
        let read_idle = spec.timeouts.read_idle;
        let mut stream = response.bytes_stream();
        tokio::spawn(async move {
            // The request slot stays held until the stream completes.
            let _permit = permit;
            loop {
                let next = match read_idle {
                    Some(idle) => match tokio::time::timeout(idle, stream.next()).await {
                        Ok(item) => item,
                        Err(_) => {
                            let _ = tx.send(Err(Error::ReadIdleTimeout(idle))).await;
                            break;
                        }
                    },
                    None => stream.next().await,
                };
                match next {
                    Some(Ok(chunk)) => {
                        if tx.send(Ok(chunk)).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        let _ = tx.send(Err(Error::connection(e.to_string()))).await;
                        break;
                    }
                    None => break,
                }
            }
        });

        Ok(Response::new(status, headers, Body::Stream(rx), elapsed, url))
    }
}

/// Blocking reqwest transport for synchronous handlers.
#[derive(Debug)]
pub(crate) struct BlockingTransport {
    config: TransportConfig,
    client: Lazy<reqwest::blocking::Client>,
}

impl BlockingTransport {
    pub(crate) fn new(config: TransportConfig) -> Self {
        Self {
            config,
            client: Lazy::new(),
        }
    }

    fn client(&self) -> Result<reqwest::blocking::Client> {
        self.client
            .get_or_try_init(|| build_blocking_client(&self.config))
            .cloned()
    }

    pub(crate) fn execute(&self, spec: RequestSpec, slot: GateSlot) -> Result<Response> {
        let client = self.client()?;
        let started = Instant::now();

        let mut builder = client
            .request(spec.method.clone(), spec.url.as_str())
            .headers(spec.headers.clone());
        if !spec.body.is_empty() {
            builder = builder.body(spec.body.clone());
        }
        if let Some(total) = spec.timeouts.total {
            builder = builder.timeout(total);
        }

        let response = builder
            .send()
            .map_err(|e| map_reqwest_error(e, &spec.timeouts))?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let url = response.url().to_string();
        let elapsed = started.elapsed();

        let success = (200..300).contains(&status);
        if !spec.stream || !success {
            let bytes = response
                .bytes()
                .map_err(|e| map_reqwest_error(e, &spec.timeouts))?;
            drop(slot);
            return Ok(Response::new(status, headers, Body::Full(bytes), elapsed, url));
        }

        let (tx, rx) = mpsc::channel::<Result<Bytes>>(STREAM_CHANNEL_CAPACITY);
        std::thread::spawn(move || {
            use std::io::Read;
            // The request slot stays held until the stream completes.
            let _slot = slot;
            let mut response = response;
            let mut buf = vec![0u8; BLOCKING_READ_CHUNK];
            loop {
                match response.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        let chunk = Bytes::copy_from_slice(&buf[..n]);
                        if tx.blocking_send(Ok(chunk)).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = tx.blocking_send(Err(Error::connection(e.to_string())));
                        break;
                    }
                }
            }
        });

        Ok(Response::new(status, headers, Body::Stream(rx), elapsed, url))
    }
}

fn remaining(total: Option<Duration>, started: Instant) -> Option<Duration> {
    total.map(|d| d.saturating_sub(started.elapsed()))
}

fn map_reqwest_error(err: reqwest::Error, timeouts: &Timeouts) -> Error {
    if err.is_timeout() {
        if err.is_connect() {
            return Error::ConnectTimeout(timeouts.connect.unwrap_or(Duration::ZERO));
        }
        return match timeouts.total {
            Some(total) => Error::TotalTimeout(total),
            None => Error::timeout(err.to_string()),
        };
    }
    if err.is_builder() {
        return Error::configuration(err.to_string());
    }
    Error::connection(err.to_string())
}

macro_rules! apply_common_builder_options {
    ($builder:expr, $config:expr) => {{
        let mut builder = $builder
            .use_rustls_tls()
            .danger_accept_invalid_certs(!$config.ssl_verify)
            .pool_max_idle_per_host($config.concurrent_limit);

        if let Some(connect) = $config.timeouts.connect {
            builder = builder.connect_timeout(connect);
        }

        if let Some(path) = &$config.ca_bundle_path {
            let pem = std::fs::read(path)
                .map_err(|e| Error::tls(format!("CA bundle {}: {}", path.display(), e)))?;
            let certs = reqwest::Certificate::from_pem_bundle(&pem)
                .map_err(|e| Error::tls(format!("CA bundle {}: {}", path.display(), e)))?;
            for cert in certs {
                builder = builder.add_root_certificate(cert);
            }
        }

        if let Some(path) = &$config.client_cert_path {
            let pem = std::fs::read(path)
                .map_err(|e| Error::tls(format!("client certificate {}: {}", path.display(), e)))?;
            let identity = reqwest::Identity::from_pem(&pem)
                .map_err(|e| Error::tls(format!("client certificate {}: {}", path.display(), e)))?;
            builder = builder.identity(identity);
        }

        builder = match &$config.proxies {
            Some(proxies) => builder
                .proxy(mount_proxy(reqwest::Proxy::http(proxies.http.as_str()), proxies)?)
                .proxy(mount_proxy(reqwest::Proxy::https(proxies.https.as_str()), proxies)?),
            // Resolution is the single source of proxy truth; keep reqwest
            // from re-reading the environment on its own.
            None => builder.no_proxy(),
        };

        if $config.force_ipv4 {
            builder = builder.local_address(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        }

        // rustls has no SECLEVEL knob; a relaxed floor maps to allowing
        // older protocol versions.
        if let Some(level) = &$config.security_level {
            if level.allows_legacy() {
                builder = builder.min_tls_version(reqwest::tls::Version::TLS_1_0);
            }
        }

        builder
    }};
}

fn mount_proxy(
    proxy: std::result::Result<reqwest::Proxy, reqwest::Error>,
    config: &ProxyConfig,
) -> Result<reqwest::Proxy> {
    let proxy = proxy.map_err(|e| Error::configuration(format!("invalid proxy: {}", e)))?;
    Ok(match config.no_proxy_csv() {
        Some(csv) => proxy.no_proxy(reqwest::NoProxy::from_string(&csv)),
        None => proxy,
    })
}

fn build_async_client(config: &TransportConfig) -> Result<reqwest::Client> {
    let builder = apply_common_builder_options!(reqwest::Client::builder(), config);
    builder
        .build()
        .map_err(|e| Error::configuration(format!("failed to build client: {}", e)))
}

fn build_blocking_client(config: &TransportConfig) -> Result<reqwest::blocking::Client> {
    let builder = apply_common_builder_options!(reqwest::blocking::Client::builder(), config);
    builder
        .build()
        .map_err(|e| Error::configuration(format!("failed to build client: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{resolve, EnvSnapshot, TransportOverrides};

    #[test]
    fn test_client_build_is_lazy() {
        let config = resolve(&EnvSnapshot::empty(), &TransportOverrides::new()).unwrap();
        let transport = StandardTransport::new(config);
        // No client exists until the first request forces one.
        assert!(format!("{:?}", transport.client).contains("initialized: false"));
    }

    #[test]
    fn test_remaining_budget_saturates() {
        let started = Instant::now() - Duration::from_secs(10);
        let left = remaining(Some(Duration::from_secs(5)), started).unwrap();
        assert_eq!(left, Duration::ZERO);
    }
}
