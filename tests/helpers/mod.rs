// Not every test binary exercises every helper.
#[allow(dead_code)]
pub mod mock_server;

use egress::{EnvSnapshot, HandlerBuilder, TransportRegistry};

#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("egress=debug")
        .try_init();
}

/// Builder resolving against an empty snapshot, so ambient proxy variables
/// on the host never leak into tests.
#[allow(dead_code)]
pub fn isolated_builder() -> HandlerBuilder {
    HandlerBuilder::new().env(EnvSnapshot::empty())
}

#[allow(dead_code)]
pub fn isolated_registry() -> TransportRegistry {
    TransportRegistry::with_env(EnvSnapshot::empty())
}
