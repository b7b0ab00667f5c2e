//! Contracts consumed from whatever hosts the foreign process: typically a
//! helper plugin reached over RPC, or the operating system directly.

use crate::error::Result;

/// Pause/resume primitive. Callers guarantee strict pairing; nesting is
/// handled above this layer.
pub trait PauseGate: Send + Sync {
    fn pause(&self) -> Result<()>;
    fn resume(&self) -> Result<()>;
}

/// Yields the identity bytes of the running process image.
pub trait FingerprintProvider: Send + Sync {
    fn fingerprint(&self) -> Result<Vec<u8>>;

    /// Load-address adjustment of the process image.
    fn base_offset(&self) -> Result<u64> {
        Ok(0)
    }
}

/// Raw access to the foreign address space.
pub trait MemorySource: Send + Sync {
    /// Fill `buf` from `address`; partial reads are failures.
    fn read_at(&self, address: u64, buf: &mut [u8]) -> Result<()>;
}

/// A gate for processes that need no pausing (e.g. memory images).
#[derive(Debug, Clone, Copy, Default)]
pub struct NoGate;

impl PauseGate for NoGate {
    fn pause(&self) -> Result<()> {
        Ok(())
    }

    fn resume(&self) -> Result<()> {
        Ok(())
    }
}

/// A fixed fingerprint, for transports that learn it out of band.
#[derive(Debug, Clone, Default)]
pub struct StaticFingerprint {
    pub identity: Vec<u8>,
    pub base_offset: u64,
}

impl FingerprintProvider for StaticFingerprint {
    fn fingerprint(&self) -> Result<Vec<u8>> {
        Ok(self.identity.clone())
    }

    fn base_offset(&self) -> Result<u64> {
        Ok(self.base_offset)
    }
}
