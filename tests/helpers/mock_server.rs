use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

/// Scripted response served for every request.
#[derive(Clone)]
pub struct Script {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
    /// Hold the request this long before responding.
    pub delay: Option<Duration>,
    /// When set, respond with chunked transfer encoding, one chunk at a
    /// time, instead of `body`.
    pub chunks: Option<Vec<Vec<u8>>>,
    pub chunk_delay: Option<Duration>,
}

impl Script {
    pub fn ok(body: &str) -> Self {
        Self::with_status(200, body)
    }

    pub fn with_status(status: u16, body: &str) -> Self {
        Self {
            status,
            content_type: "text/plain",
            body: body.as_bytes().to_vec(),
            delay: None,
            chunks: None,
            chunk_delay: None,
        }
    }

    pub fn json(status: u16, body: &str) -> Self {
        Self {
            content_type: "application/json",
            ..Self::with_status(status, body)
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn chunked(mut self, chunks: Vec<&str>, chunk_delay: Duration) -> Self {
        self.chunks = Some(chunks.into_iter().map(|c| c.as_bytes().to_vec()).collect());
        self.chunk_delay = Some(chunk_delay);
        self
    }
}

struct ServerState {
    script: Script,
    requests: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// HTTP/1.1 mock server on a random port, handling keep-alive connections
/// and tracking request heads plus peak concurrency.
pub struct MockServer {
    port: u16,
    state: Arc<ServerState>,
    handle: tokio::task::JoinHandle<()>,
}

impl MockServer {
    pub async fn start(script: Script) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let state = Arc::new(ServerState {
            script,
            requests: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        });

        let accept_state = Arc::clone(&state);
        let handle = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _)) => {
                        tokio::spawn(handle_connection(stream, Arc::clone(&accept_state)));
                    }
                    Err(e) => {
                        tracing::error!("Accept error: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(Self {
            port,
            state,
            handle,
        })
    }

    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// Raw request heads captured so far, in arrival order.
    pub fn requests(&self) -> Vec<String> {
        self.state
            .requests
            .lock()
            .expect("requests mutex poisoned")
            .clone()
    }

    #[allow(dead_code)]
    pub fn request_count(&self) -> usize {
        self.state
            .requests
            .lock()
            .expect("requests mutex poisoned")
            .len()
    }

    /// Highest number of requests observed in flight at once.
    #[allow(dead_code)]
    pub fn max_in_flight(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn handle_connection(mut stream: TcpStream, state: Arc<ServerState>) {
    loop {
        let head = match read_request(&mut stream).await {
            Some(head) => head,
            None => break,
        };

        state
            .requests
            .lock()
            .expect("requests mutex poisoned")
            .push(head);

        let current = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        state.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if let Some(delay) = state.script.delay {
            tokio::time::sleep(delay).await;
        }

        let ok = write_response(&mut stream, &state.script).await;
        state.in_flight.fetch_sub(1, Ordering::SeqCst);
        if !ok {
            break;
        }
    }
}

/// Read one request: head through the blank line, then a Content-Length
/// body if the head declares one.
async fn read_request(stream: &mut TcpStream) -> Option<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];

    let head_end = loop {
        let n = match timeout(Duration::from_secs(5), stream.read(&mut chunk)).await {
            Ok(Ok(0)) | Err(_) => return None,
            Ok(Ok(n)) => n,
            Ok(Err(_)) => return None,
        };
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find_head_end(&buf) {
            break pos;
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    let content_length = head
        .lines()
        .find(|line| line.to_lowercase().starts_with("content-length:"))
        .and_then(|line| line.split(':').nth(1))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);

    let mut body_read = buf.len() - head_end - 4;
    while body_read < content_length {
        let n = match timeout(Duration::from_secs(5), stream.read(&mut chunk)).await {
            Ok(Ok(0)) | Err(_) => return None,
            Ok(Ok(n)) => n,
            Ok(Err(_)) => return None,
        };
        body_read += n;
    }

    Some(head)
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

async fn write_response(stream: &mut TcpStream, script: &Script) -> bool {
    let reason = match script.status {
        200 => "OK",
        404 => "Not Found",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        529 => "Overloaded",
        _ => "Unknown",
    };

    if let Some(chunks) = &script.chunks {
        let head = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nTransfer-Encoding: chunked\r\nConnection: keep-alive\r\n\r\n",
            script.status, reason, script.content_type
        );
        if stream.write_all(head.as_bytes()).await.is_err() {
            return false;
        }
        for chunk in chunks {
            if let Some(delay) = script.chunk_delay {
                tokio::time::sleep(delay).await;
            }
            let framed = format!("{:x}\r\n", chunk.len());
            if stream.write_all(framed.as_bytes()).await.is_err()
                || stream.write_all(chunk).await.is_err()
                || stream.write_all(b"\r\n").await.is_err()
                || stream.flush().await.is_err()
            {
                return false;
            }
        }
        if stream.write_all(b"0\r\n\r\n").await.is_err() {
            return false;
        }
    } else {
        let head = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: keep-alive\r\n\r\n",
            script.status,
            reason,
            script.content_type,
            script.body.len()
        );
        if stream.write_all(head.as_bytes()).await.is_err()
            || stream.write_all(&script.body).await.is_err()
        {
            return false;
        }
    }

    stream.flush().await.is_ok()
}
