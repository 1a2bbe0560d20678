//! Pooled-alternative strategy: hyper-util legacy pool over a hand-built
//! TCP + rustls connector.
//!
//! Preferred for asynchronous traffic. Compared to the standard strategy it
//! exposes finer control over TCP keepalive, happy-eyeballs DNS behavior,
//! and idle-connection cleanup. It resolves through the system resolver and
//! cannot pin the address family, so IPv4 forcing falls back to the
//! standard strategy at selection time.

use std::error::Error as _;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::Uri;
use http_body_util::{BodyExt, Full};
use hyper::rt::ReadBufCursor;
use hyper_util::client::legacy::connect::{Connected, Connection, HttpConnector};
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::OwnedSemaphorePermit;
use tokio_rustls::TlsConnector;
use tower_service::Service;

use crate::config::TransportConfig;
use crate::error::{Error, Result};
use crate::response::{Body, Response};
use crate::timeouts::Timeouts;
use crate::transport::{tls, Lazy, RequestSpec};

/// TCP keepalive probe interval for pooled connections.
const TCP_KEEPALIVE: Duration = Duration::from_secs(15);
/// Idle pooled connections are dropped after this long.
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
/// Fallback delay between address-family connection attempts.
const HAPPY_EYEBALLS_TIMEOUT: Duration = Duration::from_millis(300);
const STREAM_CHANNEL_CAPACITY: usize = 16;

type PoolClient = Client<PoolConnector, Full<Bytes>>;
type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Async transport with explicit pool tuning.
#[derive(Debug)]
pub(crate) struct PooledTransport {
    config: TransportConfig,
    client: Lazy<PoolClient>,
}

impl PooledTransport {
    pub(crate) fn new(config: TransportConfig) -> Self {
        Self {
            config,
            client: Lazy::new(),
        }
    }

    fn client(&self) -> Result<PoolClient> {
        self.client
            .get_or_try_init(|| build_client(&self.config))
            .cloned()
    }

    pub(crate) async fn execute(
        &self,
        spec: RequestSpec,
        permit: OwnedSemaphorePermit,
    ) -> Result<Response> {
        let client = self.client()?;
        let started = Instant::now();

        let uri: Uri = spec
            .url
            .as_str()
            .parse()
            .map_err(|e| Error::connection(format!("invalid request URI: {}", e)))?;
        let mut builder = http::Request::builder().method(spec.method.clone()).uri(uri);
        for (name, value) in spec.headers.iter() {
            builder = builder.header(name, value);
        }
        let request = builder
            .body(Full::new(spec.body.clone()))
            .map_err(|e| Error::connection(format!("invalid request: {}", e)))?;

        let send = client.request(request);
        let response = match spec.timeouts.total {
            Some(total) => tokio::time::timeout(total, send)
                .await
                .map_err(|_| Error::TotalTimeout(total))?,
            None => send.await,
        }
        .map_err(|e| map_client_error(e, &spec.timeouts))?;

        let (parts, incoming) = response.into_parts();
        let status = parts.status.as_u16();
        let elapsed = started.elapsed();
        let url = spec.url.to_string();

        let success = (200..300).contains(&status);
        if !spec.stream || !success {
            let collect = incoming.collect();
            let collected = match remaining(spec.timeouts.total, started) {
                Some(budget) => tokio::time::timeout(budget, collect)
                    .await
                    .map_err(|_| Error::TotalTimeout(spec.timeouts.total.unwrap_or(budget)))?,
                None => collect.await,
            }
            .map_err(|e| Error::connection(e.to_string()))?;
            drop(permit);
            return Ok(Response::new(
                status,
                parts.headers,
                Body::Full(collected.to_bytes()),
                elapsed,
                url,
            ));
        }

        let (tx, rx) = mpsc::channel::<Result<Bytes>>(STREAM_CHANNEL_CAPACITY);
        let read_idle = spec.timeouts.read_idle;
        let mut body = incoming;
        tokio::spawn(async move {
            // Slot stays held until the stream completes; a cancelled reader
            // just drops the receiver and the pool discards this stream.
            let _permit = permit;
            loop {
                let frame = match read_idle {
                    Some(idle) => match tokio::time::timeout(idle, body.frame()).await {
                        Ok(frame) => frame,
                        Err(_) => {
                            let _ = tx.send(Err(Error::ReadIdleTimeout(idle))).await;
                            break;
                        }
                    },
                    None => body.frame().await,
                };
                match frame {
                    Some(Ok(frame)) => {
                        if let Ok(chunk) = frame.into_data() {
                            if tx.send(Ok(chunk)).await.is_err() {
                                break;
                            }
                        }
                        // Trailer frames are dropped.
                    }
                    Some(Err(e)) => {
                        let _ = tx.send(Err(Error::connection(e.to_string()))).await;
                        break;
                    }
                    None => break,
                }
            }
        });

        Ok(Response::new(
            status,
            parts.headers,
            Body::Stream(rx),
            elapsed,
            url,
        ))
    }
}

fn remaining(total: Option<Duration>, started: Instant) -> Option<Duration> {
    total.map(|d| d.saturating_sub(started.elapsed()))
}

fn build_client(config: &TransportConfig) -> Result<PoolClient> {
    let mut http = HttpConnector::new();
    http.enforce_http(false);
    http.set_nodelay(true);
    http.set_connect_timeout(config.timeouts.connect);
    http.set_keepalive(Some(TCP_KEEPALIVE));
    http.set_happy_eyeballs_timeout(Some(HAPPY_EYEBALLS_TIMEOUT));

    let tls_config = tls::client_config(config)?;
    let connector = PoolConnector {
        http,
        tls: TlsConnector::from(Arc::new(tls_config)),
    };

    Ok(Client::builder(TokioExecutor::new())
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .pool_max_idle_per_host(config.concurrent_limit)
        .pool_timer(TokioTimer::new())
        .build(connector))
}

fn map_client_error(err: hyper_util::client::legacy::Error, timeouts: &Timeouts) -> Error {
    if err.is_connect() {
        // Connect timeouts surface as a TimedOut io error in the cause chain.
        let mut source: Option<&(dyn std::error::Error + 'static)> = err.source();
        while let Some(cause) = source {
            if let Some(io_err) = cause.downcast_ref::<io::Error>() {
                if io_err.kind() == io::ErrorKind::TimedOut {
                    return Error::ConnectTimeout(timeouts.connect.unwrap_or(Duration::ZERO));
                }
            }
            source = cause.source();
        }
    }
    Error::connection(describe_error(&err))
}

fn describe_error(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// TCP + optional TLS connector for the legacy pool.
///
/// DNS and TCP establishment (including connect timeout, keepalive, and
/// happy-eyeballs pacing) are delegated to the tuned [`HttpConnector`]; the
/// TLS handshake rides on top for https destinations.
#[derive(Clone)]
struct PoolConnector {
    http: HttpConnector,
    tls: TlsConnector,
}

impl std::fmt::Debug for PoolConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolConnector").finish_non_exhaustive()
    }
}

impl Service<Uri> for PoolConnector {
    type Response = MaybeTlsStream;
    type Error = BoxError;
    type Future =
        Pin<Box<dyn std::future::Future<Output = std::result::Result<MaybeTlsStream, BoxError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<std::result::Result<(), BoxError>> {
        self.http.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, dst: Uri) -> Self::Future {
        let mut http = self.http.clone();
        let tls = self.tls.clone();
        Box::pin(async move {
            let is_tls = dst.scheme_str() == Some("https");
            let host = dst
                .host()
                .unwrap_or_default()
                .trim_matches(|c| c == '[' || c == ']')
                .to_string();

            let tcp = http.call(dst).await?.into_inner();
            if !is_tls {
                return Ok(MaybeTlsStream::Plain(TokioIo::new(tcp)));
            }

            let server_name = rustls::pki_types::ServerName::try_from(host)
                .map_err(|e| Box::new(io::Error::new(io::ErrorKind::InvalidInput, e)) as BoxError)?;
            let stream = tls.connect(server_name, tcp).await?;
            Ok(MaybeTlsStream::Tls(TokioIo::new(stream)))
        })
    }
}

/// Plain or TLS-wrapped connection handed to the pool.
enum MaybeTlsStream {
    Plain(TokioIo<TcpStream>),
    Tls(TokioIo<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl hyper::rt::Read for MaybeTlsStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: ReadBufCursor<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Self::Tls(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl hyper::rt::Write for MaybeTlsStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Self::Tls(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_flush(cx),
            Self::Tls(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Self::Tls(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

impl Connection for MaybeTlsStream {
    fn connected(&self) -> Connected {
        Connected::new()
    }
}
