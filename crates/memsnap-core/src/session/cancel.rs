use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// Advisory cancellation flag shared between a session and its caller.
///
/// Sessions observe it at every suspension point: before each batch and
/// between follow-up waves.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Cancellation and deadline state of one snapshot.
#[derive(Debug, Clone)]
pub(crate) struct Checkpoint {
    cancel: CancelToken,
    deadline: Option<(Instant, u64)>,
}

impl Checkpoint {
    pub(crate) fn start(cancel: &CancelToken, deadline_ms: Option<u64>) -> Self {
        Self {
            cancel: cancel.clone(),
            deadline: deadline_ms
                .map(|millis| (Instant::now() + Duration::from_millis(millis), millis)),
        }
    }

    pub(crate) fn check(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if let Some((deadline, millis)) = self.deadline
            && Instant::now() >= deadline
        {
            return Err(Error::DeadlineExceeded { millis });
        }
        Ok(())
    }
}
