use std::sync::{Condvar, Mutex};
use std::time::Duration;

use memsnap_core::CancelToken;

/// A shutdown signal that supports interruptible waits.
///
/// Triggering it also cancels the snapshot in flight: sessions opened with
/// [`ShutdownSignal::cancel_token`] stop at their next suspension point.
pub struct ShutdownSignal {
    token: CancelToken,
    condvar: Condvar,
    mutex: Mutex<()>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self {
            token: CancelToken::new(),
            condvar: Condvar::new(),
            mutex: Mutex::new(()),
        }
    }

    /// Trigger the signal, waking all waiting threads.
    pub fn trigger(&self) {
        self.token.cancel();
        self.condvar.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Token to hand to a session.
    pub fn cancel_token(&self) -> CancelToken {
        self.token.clone()
    }

    /// Wait for `duration` or until shutdown is triggered.
    ///
    /// Returns `true` if shutdown was triggered.
    pub fn wait(&self, duration: Duration) -> bool {
        if self.is_shutdown() {
            return true;
        }

        let guard = self.mutex.lock().unwrap_or_else(|e| e.into_inner());
        match self
            .condvar
            .wait_timeout_while(guard, duration, |_| !self.is_shutdown())
        {
            Ok((_, timeout)) => !timeout.timed_out(),
            // Poisoned: treat as shutdown
            Err(_) => true,
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
