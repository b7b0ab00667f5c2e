use std::sync::Mutex;

use tracing::{debug, error};

use super::Process;
use crate::error::{Error, Result};

/// Reference count of nested pauses. Only the transition 0 -> 1 reaches the
/// underlying gate on `enter`, and only 1 -> 0 on `leave`.
#[derive(Debug, Default)]
pub struct PauseCounter {
    depth: Mutex<usize>,
}

impl PauseCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depth(&self) -> usize {
        *self.depth.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn enter<F>(&self, gate: F) -> Result<()>
    where
        F: FnOnce() -> Result<()>,
    {
        let mut depth = self.depth.lock().unwrap_or_else(|e| e.into_inner());
        if *depth == 0 {
            gate()?;
            debug!("Foreign process paused");
        }
        *depth += 1;
        Ok(())
    }

    pub fn leave<F>(&self, gate: F) -> Result<()>
    where
        F: FnOnce() -> Result<()>,
    {
        let mut depth = self.depth.lock().unwrap_or_else(|e| e.into_inner());
        match *depth {
            0 => Err(Error::Unsupported(
                "resume without a matching pause".to_string(),
            )),
            1 => {
                *depth = 0;
                gate()?;
                debug!("Foreign process resumed");
                Ok(())
            }
            _ => {
                *depth -= 1;
                Ok(())
            }
        }
    }
}

/// Holds one pause count on a process; resumes on drop.
pub struct PauseGuard<'a, P: Process + ?Sized> {
    process: &'a P,
    active: bool,
}

impl<'a, P: Process + ?Sized> PauseGuard<'a, P> {
    pub fn new(process: &'a P) -> Result<Self> {
        process.pause()?;
        Ok(Self {
            process,
            active: true,
        })
    }

    /// Resume now, surfacing the resume error instead of logging it.
    pub fn release(mut self) -> Result<()> {
        self.active = false;
        self.process.resume()
    }
}

impl<P: Process + ?Sized> Drop for PauseGuard<'_, P> {
    fn drop(&mut self) {
        if self.active
            && let Err(e) = self.process.resume()
        {
            error!("Failed to resume foreign process: {}", e);
        }
    }
}
