//! Close-state tracking and leak diagnostics for handlers.
//!
//! Dropping a guard that was never closed emits a non-fatal warning naming
//! the handler type. The drop path never attempts async cleanup: there is no
//! guaranteed running event loop at drop time, so deterministic release has
//! to come from an explicit `close()`/`aclose()` call.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Hook invoked when an open guard is dropped. Injected at construction so
/// tests can observe leak diagnostics without capturing log output.
pub type LeakHook = Arc<dyn Fn(&'static str) + Send + Sync>;

/// Tracks whether a handler has been closed.
#[derive(Clone)]
pub struct LifecycleGuard {
    handler_type: &'static str,
    closed: Arc<AtomicBool>,
    leak_hook: Option<LeakHook>,
}

impl LifecycleGuard {
    /// Guard for a handler of the given type name, open until closed.
    pub fn new(handler_type: &'static str) -> Self {
        Self {
            handler_type,
            closed: Arc::new(AtomicBool::new(false)),
            leak_hook: None,
        }
    }

    /// Guard with an injected leak observer.
    pub fn with_leak_hook(handler_type: &'static str, hook: LeakHook) -> Self {
        Self {
            handler_type,
            closed: Arc::new(AtomicBool::new(false)),
            leak_hook: Some(hook),
        }
    }

    /// Replace the leak observer on an existing guard. Mutates in place so
    /// the open/closed state carries over untouched.
    pub fn set_leak_hook(&mut self, hook: LeakHook) {
        self.leak_hook = Some(hook);
    }

    /// Mark closed. Returns `true` on the first call only, making close
    /// idempotent for callers.
    pub fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn handler_type(&self) -> &'static str {
        self.handler_type
    }
}

impl std::fmt::Debug for LifecycleGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleGuard")
            .field("handler_type", &self.handler_type)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Drop for LifecycleGuard {
    fn drop(&mut self) {
        // Clones share the closed flag; only the last owner may diagnose.
        if Arc::strong_count(&self.closed) > 1 {
            return;
        }
        if !self.closed.load(Ordering::SeqCst) {
            tracing::warn!(
                handler = self.handler_type,
                "dropped without close(); pooled connections are released by \
                 the runtime instead of deterministically"
            );
            if let Some(hook) = &self.leak_hook {
                hook(self.handler_type);
            }
        }
    }
}
