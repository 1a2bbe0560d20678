//! Transport sharing and cache behavior through the registry.
//!
//! Run with: cargo test --test registry_cache

mod helpers;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use egress::{EnvSnapshot, LeakHook, TransportOverrides, TransportRegistry};
use helpers::mock_server::{MockServer, Script};

#[tokio::test]
async fn test_equivalent_handlers_share_one_transport() {
    let server = MockServer::start(Script::ok("ok"))
        .await
        .expect("mock server should start");

    let registry = helpers::isolated_registry();
    let a = registry
        .async_handler(&TransportOverrides::new())
        .expect("handler should build");
    let b = registry
        .async_handler(&TransportOverrides::new())
        .expect("handler should build");

    assert_eq!(a.fingerprint(), b.fingerprint());
    assert_eq!(registry.len(), 1);

    a.get(&server.url(), &[], &[]).await.expect("get should succeed");
    b.get(&server.url(), &[], &[]).await.expect("get should succeed");
    assert_eq!(server.request_count(), 2);

    a.aclose().await;
    b.aclose().await;
}

#[tokio::test]
async fn test_distinct_settings_get_distinct_transports() {
    let registry = helpers::isolated_registry();
    let a = registry
        .async_handler(&TransportOverrides::new())
        .expect("handler should build");
    let b = registry
        .async_handler(&TransportOverrides::new().concurrent_limit(7))
        .expect("handler should build");
    let c = registry
        .async_handler(&TransportOverrides::new().alias("scraper"))
        .expect("handler should build");

    assert_ne!(a.fingerprint(), b.fingerprint());
    assert_ne!(a.fingerprint(), c.fingerprint());
    assert_eq!(registry.len(), 3);

    a.aclose().await;
    b.aclose().await;
    c.aclose().await;
}

#[tokio::test]
async fn test_concurrent_creation_builds_transport_once() {
    let registry = helpers::isolated_registry();

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let registry = registry.clone();
        tasks.push(tokio::spawn(async move {
            registry.async_handler(&TransportOverrides::new())
        }));
    }
    let mut handlers = Vec::new();
    for task in tasks {
        handlers.push(
            task.await
                .expect("task should join")
                .expect("handler should build"),
        );
    }

    assert_eq!(registry.len(), 1, "concurrent lookups must share one entry");
    for handler in &handlers {
        assert_eq!(handler.fingerprint(), handlers[0].fingerprint());
    }
}

#[tokio::test]
async fn test_reset_restores_pristine_state() {
    let registry = helpers::isolated_registry();
    let _a = registry
        .async_handler(&TransportOverrides::new())
        .expect("handler should build");
    let _b = registry
        .sync_handler(&TransportOverrides::new())
        .expect("handler should build");
    assert_eq!(registry.len(), 2);

    registry.reset();
    assert!(registry.is_empty());

    // A fresh handler after reset still works.
    let server = MockServer::start(Script::ok("ok"))
        .await
        .expect("mock server should start");
    let handler = registry
        .async_handler(&TransportOverrides::new())
        .expect("handler should rebuild");
    handler
        .get(&server.url(), &[], &[])
        .await
        .expect("get should succeed");
    handler.aclose().await;
}

#[tokio::test]
async fn test_ttl_expiry_is_lazy() {
    let registry =
        TransportRegistry::with_ttl(EnvSnapshot::empty(), Duration::from_millis(30));
    let _a = registry
        .async_handler(&TransportOverrides::new())
        .expect("handler should build");
    assert_eq!(registry.len(), 1);

    tokio::time::sleep(Duration::from_millis(60)).await;
    // Nothing touched the entry, so it still counts.
    assert_eq!(registry.len(), 1);

    // The next lookup evicts the expired entry and rebuilds in place.
    let _b = registry
        .async_handler(&TransportOverrides::new())
        .expect("handler should rebuild");
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn test_closed_handler_leaves_siblings_usable() {
    let server = MockServer::start(Script::ok("ok"))
        .await
        .expect("mock server should start");

    let registry = helpers::isolated_registry();
    let a = registry
        .async_handler(&TransportOverrides::new())
        .expect("handler should build");
    let b = registry
        .async_handler(&TransportOverrides::new())
        .expect("handler should build");

    a.aclose().await;
    assert!(registry.is_empty(), "close must evict the shared entry");

    // The sibling holds its own reference to the transport and keeps working.
    b.get(&server.url(), &[], &[])
        .await
        .expect("sibling should still work");
    b.aclose().await;
}

#[tokio::test]
async fn test_registry_handler_accepts_default_headers() {
    let server = MockServer::start(Script::ok("ok"))
        .await
        .expect("mock server should start");

    let registry = helpers::isolated_registry();
    let handler = registry
        .async_handler(&TransportOverrides::new())
        .expect("handler should build")
        .with_default_header("x-api-version", "2024-06-01");

    handler
        .get(&server.url(), &[], &[])
        .await
        .expect("get should succeed");

    let head = server.requests().pop().expect("request should be captured");
    assert!(
        head.to_lowercase().contains("x-api-version: 2024-06-01"),
        "default header missing from request head: {head}"
    );
    handler.aclose().await;
}

#[tokio::test]
async fn test_registry_handler_accepts_leak_hook() {
    let leaked: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let hook: LeakHook = {
        let leaked = Arc::clone(&leaked);
        Arc::new(move |handler_type| {
            leaked.lock().expect("hook mutex poisoned").push(handler_type);
        })
    };

    let registry = helpers::isolated_registry();
    let handler = registry
        .async_handler(&TransportOverrides::new())
        .expect("handler should build")
        .with_leak_hook(hook);

    drop(handler);
    assert_eq!(
        *leaked.lock().expect("hook mutex poisoned"),
        vec!["AsyncHandler"]
    );
}
