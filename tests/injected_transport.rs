//! Constructor injection of a transport double: requests bypass the factory
//! entirely and land on the injected sender.
//!
//! Run with: cargo test --test injected_transport

mod helpers;

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use egress::transport::{RequestSpec, SendRequest};
use egress::{Body, Response, Result};
use http::HeaderMap;

/// Records every spec it receives and answers with a canned response.
struct StubSender {
    status: u16,
    body: &'static str,
    seen: Mutex<Vec<RequestSpec>>,
}

impl StubSender {
    fn new(status: u16, body: &'static str) -> Arc<Self> {
        Arc::new(Self {
            status,
            body,
            seen: Mutex::new(Vec::new()),
        })
    }

    fn seen(&self) -> Vec<RequestSpec> {
        self.seen.lock().expect("stub mutex poisoned").clone()
    }
}

impl SendRequest for StubSender {
    fn send<'a>(
        &'a self,
        spec: RequestSpec,
    ) -> Pin<Box<dyn Future<Output = Result<Response>> + Send + 'a>> {
        self.seen.lock().expect("stub mutex poisoned").push(spec);
        let response = Response::new(
            self.status,
            HeaderMap::new(),
            Body::Full(Bytes::from_static(self.body.as_bytes())),
            Duration::from_millis(1),
            "stub://recorded",
        );
        Box::pin(async move { Ok(response) })
    }
}

#[tokio::test]
async fn test_injected_sender_receives_requests() {
    let stub = StubSender::new(200, r#"{"ok":true}"#);
    let handler = helpers::isolated_builder()
        .default_header("x-client", "egress-test")
        .transport(stub.clone())
        .build_async()
        .expect("handler should build");

    let response = handler
        .get(
            "https://api.example.com/v1/models",
            &[("limit", "2")],
            &[],
        )
        .await
        .expect("stubbed get should succeed");
    assert_eq!(response.status(), 200);

    let seen = stub.seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].method, http::Method::GET);
    assert_eq!(seen[0].url.query(), Some("limit=2"));
    assert_eq!(seen[0].headers.get("x-client").unwrap(), "egress-test");
}

#[tokio::test]
async fn test_injected_sender_error_status_raises_on_post() {
    let stub = StubSender::new(500, r#"{"error":"x"}"#);
    let handler = helpers::isolated_builder()
        .transport(stub.clone())
        .build_async()
        .expect("handler should build");

    let err = handler
        .post(
            "https://api.example.com/v1/chat",
            serde_json::json!({}),
            &[],
            &[],
            false,
        )
        .await
        .expect_err("500 should raise");
    assert_eq!(err.status(), Some(500));
    let detail: serde_json::Value = err.body_json().expect("body should parse");
    assert_eq!(detail["error"], "x");
}

#[tokio::test]
async fn test_injected_sender_never_touches_the_network() {
    // An unroutable URL is fine: the stub answers before any dial.
    let stub = StubSender::new(200, "ok");
    let handler = helpers::isolated_builder()
        .transport(stub.clone())
        .build_async()
        .expect("handler should build");

    let response = handler
        .get("http://192.0.2.1:9/unreachable", &[], &[])
        .await
        .expect("stub should answer");
    assert_eq!(response.text().unwrap(), "ok");
    assert_eq!(stub.seen().len(), 1);
}
