//! Retry utilities for snapshots of a moving target.

use std::time::Duration;

use anyhow::{Result, bail};
use memsnap_core::{Error, ErrorKind, Process, ReaderFactory};
use tracing::{debug, warn};

use crate::commands::snapshot::{Capture, capture};
use crate::shutdown::ShutdownSignal;

pub const MAX_ATTEMPTS: u32 = 5;
pub const RETRY_DELAY: Duration = Duration::from_millis(500);

/// Failures a target in the middle of an update can cause; a later
/// snapshot may succeed.
pub fn is_transient(error: &Error) -> bool {
    matches!(
        error.kind(),
        ErrorKind::TransportFailure
            | ErrorKind::CycleDetected
            | ErrorKind::PolymorphicUnresolved
            | ErrorKind::Cancelled
    )
}

/// Take a snapshot, retrying transient failures.
///
/// Returns `Ok(None)` if shutdown was signaled.
pub fn capture_with_retry<P: Process + ?Sized>(
    factory: &ReaderFactory,
    process: &P,
    shutdown: &ShutdownSignal,
) -> Result<Option<Capture>> {
    let mut attempts = 0u32;
    let mut last_error: Option<String> = None;
    loop {
        if shutdown.is_shutdown() {
            return Ok(None);
        }

        if attempts >= MAX_ATTEMPTS {
            bail!(
                "Snapshot failed after {} attempts: {}",
                MAX_ATTEMPTS,
                last_error.unwrap_or_else(|| "unknown error".to_string())
            );
        }
        attempts += 1;

        match capture(factory, process, shutdown.cancel_token()) {
            Ok(capture) => return Ok(Some(capture)),
            Err(_) if shutdown.is_shutdown() => return Ok(None),
            Err(e) if is_transient(&e) => {
                warn!(
                    "Snapshot failed ({}), retrying in {}ms (attempt {}/{})",
                    e,
                    RETRY_DELAY.as_millis(),
                    attempts,
                    MAX_ATTEMPTS
                );
                last_error = Some(e.to_string());
            }
            Err(e) => {
                debug!("Snapshot failed permanently: {}", e);
                return Err(e.into());
            }
        }

        if shutdown.wait(RETRY_DELAY) {
            return Ok(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use memsnap_core::{Identity, MemoryImage, Region};

    use super::*;
    use crate::model::tests::{demo_factory, demo_image};

    /// Fails the first `failures` vectorized reads.
    struct Flaky {
        image: MemoryImage,
        failures: usize,
        calls: AtomicUsize,
    }

    impl Process for Flaky {
        fn identity(&self) -> memsnap_core::Result<Identity> {
            self.image.identity()
        }

        fn base_offset(&self) -> memsnap_core::Result<u64> {
            self.image.base_offset()
        }

        fn pause(&self) -> memsnap_core::Result<()> {
            self.image.pause()
        }

        fn resume(&self) -> memsnap_core::Result<()> {
            self.image.resume()
        }

        fn read(&self, address: u64, buf: &mut [u8]) -> memsnap_core::Result<()> {
            self.image.read(address, buf)
        }

        fn read_many(&self, regions: &[Region]) -> memsnap_core::Result<Vec<Vec<u8>>> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(Error::Corrupt {
                    address: regions[0].address,
                    message: "torn read".to_string(),
                });
            }
            self.image.read_many(regions)
        }
    }

    #[test]
    fn test_transient_failures_are_retried() {
        let factory = demo_factory();
        let process = Flaky {
            image: demo_image(),
            failures: 1,
            calls: AtomicUsize::new(0),
        };
        let shutdown = ShutdownSignal::new();
        let capture = capture_with_retry(&factory, &process, &shutdown)
            .unwrap()
            .unwrap();
        assert_eq!(capture.world.tick, 1234);
        assert_eq!(process.image.pause_depth(), 0);
    }

    #[test]
    fn test_gives_up_after_max_attempts() {
        let factory = demo_factory();
        let process = Flaky {
            image: demo_image(),
            failures: usize::MAX,
            calls: AtomicUsize::new(0),
        };
        let shutdown = ShutdownSignal::new();
        let err = capture_with_retry(&factory, &process, &shutdown).unwrap_err();
        assert!(err.to_string().contains("after 5 attempts"));
        assert_eq!(process.calls.load(Ordering::SeqCst), MAX_ATTEMPTS as usize);
    }

    #[test]
    fn test_shutdown_returns_none() {
        let factory = demo_factory();
        let image = demo_image();
        let shutdown = ShutdownSignal::new();
        shutdown.trigger();
        assert!(capture_with_retry(&factory, &image, &shutdown).unwrap().is_none());
        assert_eq!(image.read_calls(), 0);
    }

    #[test]
    fn test_layout_errors_are_permanent() {
        assert!(!is_transient(&Error::LayoutUnavailable {
            identity: "00".into()
        }));
        assert!(is_transient(&Error::DeadlineExceeded { millis: 5 }));
    }
}
