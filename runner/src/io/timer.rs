//! Retry waits.
//!
//! The dispatcher never sleeps directly; it asks a [`RetryTimer`] to wait. A
//! cancelled wait lets an operator stop a long back-off without killing the
//! process mid-write.

use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use tracing::debug;

/// How a wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Elapsed,
    Cancelled,
}

pub trait RetryTimer {
    /// Block for `duration` unless cancelled first.
    fn wait(&self, duration: Duration) -> WaitOutcome;
}

/// Plain `thread::sleep`; cannot be cancelled.
#[derive(Debug, Default, Clone, Copy)]
pub struct SleepTimer;

impl RetryTimer for SleepTimer {
    fn wait(&self, duration: Duration) -> WaitOutcome {
        if !duration.is_zero() {
            thread::sleep(duration);
        }
        WaitOutcome::Elapsed
    }
}

#[derive(Debug, Default)]
struct CancelState {
    cancelled: Mutex<bool>,
    signal: Condvar,
}

/// Timer whose waits can be cut short from another thread through a [`CancelHandle`].
///
/// Cancellation is sticky: once cancelled, every wait returns
/// [`WaitOutcome::Cancelled`] until [`CancelHandle::reset`] is called.
#[derive(Debug, Default, Clone)]
pub struct CancellableTimer {
    state: Arc<CancelState>,
}

/// Cross-thread handle that cancels a [`CancellableTimer`].
#[derive(Debug, Clone)]
pub struct CancelHandle {
    state: Arc<CancelState>,
}

impl CancellableTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> CancelHandle {
        CancelHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl CancelHandle {
    pub fn cancel(&self) {
        let mut cancelled = self
            .state
            .cancelled
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *cancelled = true;
        self.state.signal.notify_all();
    }

    pub fn reset(&self) {
        let mut cancelled = self
            .state
            .cancelled
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *cancelled = false;
    }

    pub fn is_cancelled(&self) -> bool {
        *self
            .state
            .cancelled
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl RetryTimer for CancellableTimer {
    fn wait(&self, duration: Duration) -> WaitOutcome {
        let guard = self
            .state
            .cancelled
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let (cancelled, _) = self
            .state
            .signal
            .wait_timeout_while(guard, duration, |cancelled| !*cancelled)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *cancelled {
            debug!(wait_ms = duration.as_millis() as u64, "retry wait cancelled");
            WaitOutcome::Cancelled
        } else {
            WaitOutcome::Elapsed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn uncancelled_wait_elapses() {
        let timer = CancellableTimer::new();
        assert_eq!(timer.wait(Duration::from_millis(5)), WaitOutcome::Elapsed);
    }

    #[test]
    fn cancel_from_another_thread_cuts_wait_short() {
        let timer = CancellableTimer::new();
        let handle = timer.handle();
        let started = Instant::now();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            handle.cancel();
        });

        assert_eq!(timer.wait(Duration::from_secs(30)), WaitOutcome::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(10));
        canceller.join().expect("join canceller");
    }

    #[test]
    fn cancellation_is_sticky_until_reset() {
        let timer = CancellableTimer::new();
        let handle = timer.handle();
        handle.cancel();
        assert!(handle.is_cancelled());
        assert_eq!(timer.wait(Duration::from_secs(30)), WaitOutcome::Cancelled);

        handle.reset();
        assert_eq!(timer.wait(Duration::from_millis(1)), WaitOutcome::Elapsed);
    }
}
