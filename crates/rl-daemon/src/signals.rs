//! Signal handling for graceful daemon shutdown.
//!
//! SIGTERM and SIGINT set an atomic flag; a small poll thread forwards it to
//! the shared [`SignalState`] the main thread watches.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Shared state between the signal poll thread and the main thread.
#[derive(Debug, Default)]
pub struct SignalState {
    /// Set to true when a shutdown signal is received.
    shutdown_requested: AtomicBool,
    /// Count of signals received (for diagnostics).
    signal_count: AtomicU32,
}

impl SignalState {
    /// Check if shutdown has been requested.
    #[inline]
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::Relaxed)
    }

    /// Request shutdown (can be called from any thread).
    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::Relaxed);
    }

    fn record_signal(&self) {
        self.signal_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the total number of signals received.
    pub fn signal_count(&self) -> u32 {
        self.signal_count.load(Ordering::Relaxed)
    }
}

/// Handle for signal management.
#[derive(Debug, Clone)]
pub struct SignalHandler {
    state: Arc<SignalState>,
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalHandler {
    /// Create a handler and, on Unix, install SIGTERM and SIGINT handlers.
    pub fn new() -> Self {
        let handler = Self {
            state: Arc::new(SignalState::default()),
        };

        #[cfg(unix)]
        handler.register_unix_handlers();

        handler
    }

    #[cfg(unix)]
    fn register_unix_handlers(&self) {
        use std::os::raw::c_int;

        // Handlers may only touch atomics; everything else happens on the poll thread.
        static SHUTDOWN_FLAG: AtomicBool = AtomicBool::new(false);

        let state = Arc::clone(&self.state);
        std::thread::spawn(move || loop {
            if SHUTDOWN_FLAG.swap(false, Ordering::Relaxed) {
                info!("Shutdown signal received");
                state.record_signal();
                state.request_shutdown();
            }
            if state.shutdown_requested() {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        });

        extern "C" fn shutdown_handler(_: c_int) {
            SHUTDOWN_FLAG.store(true, Ordering::Relaxed);
        }

        // SAFETY: the handler only stores to an atomic, which is async-signal-safe.
        unsafe {
            libc::signal(libc::SIGTERM, shutdown_handler as libc::sighandler_t);
            libc::signal(libc::SIGINT, shutdown_handler as libc::sighandler_t);
        }

        debug!("Unix signal handlers registered");
    }

    /// Check if shutdown has been requested.
    #[inline]
    pub fn shutdown_requested(&self) -> bool {
        self.state.shutdown_requested()
    }

    /// Manually request shutdown.
    pub fn request_shutdown(&self) {
        info!("Manual shutdown requested");
        self.state.request_shutdown();
    }

    /// Get the signal state for inspection.
    pub fn state(&self) -> &SignalState {
        &self.state
    }
}

/// Block until shutdown is requested or `timeout` expires (`None` waits forever).
///
/// Returns `true` if shutdown was requested.
pub fn wait_for_shutdown(handler: &SignalHandler, timeout: Option<Duration>) -> bool {
    let start = Instant::now();
    let poll_interval = Duration::from_millis(50);

    loop {
        if handler.shutdown_requested() {
            return true;
        }
        let sleep = match timeout {
            Some(limit) => {
                let elapsed = start.elapsed();
                if elapsed >= limit {
                    return false;
                }
                poll_interval.min(limit - elapsed)
            }
            None => poll_interval,
        };
        std::thread::sleep(sleep);
    }
}
