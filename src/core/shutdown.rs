//! Orderly termination.
//!
//! Signals never tear anything down themselves. SIGINT, SIGHUP and SIGTERM set a
//! [`ShutdownFlag`] and wake the event loop through a [`signal_hook_mio`] source; the
//! loop notices, leaves its wait and releases every descriptor on its own thread. The
//! two blocking retry loops (device re-open, outbound connect) poll the same flag
//! between attempts.

use mio::Waker;
use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Signals that request termination.
pub const TERMINATION_SIGNALS: [i32; 3] = [SIGINT, SIGHUP, SIGTERM];

/// Longest uninterrupted sleep inside a retry loop.
pub(crate) const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Cancellation flag shared by the event loop, retry loops and signal handlers.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleeps for `duration` unless shutdown is requested first.
    ///
    /// Returns `false` when the sleep was cut short by a shutdown request.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_requested() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }

    /// Arms the flag for [`TERMINATION_SIGNALS`]. The handler only stores a boolean.
    pub fn register_signals(&self) -> io::Result<()> {
        for signal in TERMINATION_SIGNALS {
            signal_hook::flag::register(signal, Arc::clone(&self.0))?;
        }
        Ok(())
    }
}

/// Handle that requests the same orderly shutdown a termination signal would.
#[derive(Debug, Clone)]
pub struct ShutdownTrigger {
    flag: ShutdownFlag,
    waker: Arc<Waker>,
}

impl ShutdownTrigger {
    pub(crate) fn new(flag: ShutdownFlag, waker: Arc<Waker>) -> Self {
        Self { flag, waker }
    }

    pub fn trigger(&self) {
        self.flag.request();
        // A failed wake only means the loop is already gone.
        let _ = self.waker.wake();
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.is_requested()
    }
}
