//! Async-aware termination guard for the commit critical section (C11, §5).
//!
//! While enabled, an incoming `SIGINT` (all platforms) or `SIGTERM` (Unix)
//! sets a `trapped` flag instead of letting the process die mid-commit. The
//! commit driver (C7) wraps `enable()`/commit/revprop-set/`disable()` around
//! its critical section and checks `trapped` immediately afterward, turning
//! a deferred signal into an ordinary interrupt the orchestrator can react
//! to once it is safe.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;

/// Guards a critical section against being torn down mid-way by a signal.
pub struct BreakHandler {
    trapped: Arc<AtomicBool>,
    listener: Option<JoinHandle<()>>,
}

impl BreakHandler {
    pub fn new() -> Self {
        BreakHandler {
            trapped: Arc::new(AtomicBool::new(false)),
            listener: None,
        }
    }

    /// Start listening for termination signals, clearing any previously
    /// trapped flag. Idempotent: calling `enable()` while already enabled
    /// restarts the listener with a clean flag.
    pub fn enable(&mut self) {
        self.disable();
        self.trapped.store(false, Ordering::SeqCst);
        let trapped = Arc::clone(&self.trapped);
        self.listener = Some(tokio::spawn(async move {
            wait_for_termination().await;
            trapped.store(true, Ordering::SeqCst);
        }));
    }

    /// Stop listening. Does not clear the trapped flag, so callers can
    /// still observe whether a signal arrived during the guarded section.
    pub fn disable(&mut self) {
        if let Some(handle) = self.listener.take() {
            handle.abort();
        }
    }

    /// Whether a guarded signal arrived since the last `enable()`.
    pub fn trapped(&self) -> bool {
        self.trapped.load(Ordering::SeqCst)
    }
}

impl Default for BreakHandler {
    fn default() -> Self {
        BreakHandler::new()
    }
}

impl Drop for BreakHandler {
    fn drop(&mut self) {
        self.disable();
    }
}

#[cfg(unix)]
async fn wait_for_termination() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(sig) => sig,
        Err(_) => {
            // Fall back to ctrl_c-only behavior if SIGTERM can't be trapped.
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn starts_untrapped() {
        let mut handler = BreakHandler::new();
        handler.enable();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(!handler.trapped());
        handler.disable();
    }

    #[tokio::test]
    async fn disable_stops_the_listener_without_panicking() {
        let mut handler = BreakHandler::new();
        handler.enable();
        handler.disable();
        handler.disable();
    }

    #[tokio::test]
    async fn re_enable_clears_a_stale_trapped_flag() {
        let mut handler = BreakHandler::new();
        handler.trapped.store(true, Ordering::SeqCst);
        handler.enable();
        assert!(!handler.trapped());
        handler.disable();
    }
}
