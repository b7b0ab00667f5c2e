use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::trace;

use super::{Process, Region};
use crate::error::Result;
use crate::layout::Identity;

/// Transport counters collected by [`Instrumented`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// `read_many` calls.
    pub batches: usize,
    /// Single `read` calls.
    pub single_reads: usize,
    pub regions: usize,
    pub bytes: usize,
    /// Largest aggregate payload of one batch.
    pub largest_batch: usize,
}

/// Counts traffic through the wrapped process.
#[derive(Debug, Default)]
pub struct Instrumented<P> {
    inner: P,
    batches: AtomicUsize,
    single_reads: AtomicUsize,
    regions: AtomicUsize,
    bytes: AtomicUsize,
    largest_batch: AtomicUsize,
}

impl<P: Process> Instrumented<P> {
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            batches: AtomicUsize::new(0),
            single_reads: AtomicUsize::new(0),
            regions: AtomicUsize::new(0),
            bytes: AtomicUsize::new(0),
            largest_batch: AtomicUsize::new(0),
        }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    pub fn stats(&self) -> TransportStats {
        TransportStats {
            batches: self.batches.load(Ordering::Relaxed),
            single_reads: self.single_reads.load(Ordering::Relaxed),
            regions: self.regions.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            largest_batch: self.largest_batch.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.batches,
            &self.single_reads,
            &self.regions,
            &self.bytes,
            &self.largest_batch,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl<P: Process> Process for Instrumented<P> {
    fn identity(&self) -> Result<Identity> {
        self.inner.identity()
    }

    fn base_offset(&self) -> Result<u64> {
        self.inner.base_offset()
    }

    fn pause(&self) -> Result<()> {
        self.inner.pause()
    }

    fn resume(&self) -> Result<()> {
        self.inner.resume()
    }

    fn read(&self, address: u64, buf: &mut [u8]) -> Result<()> {
        self.single_reads.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(buf.len(), Ordering::Relaxed);
        self.inner.read(address, buf)
    }

    fn read_many(&self, regions: &[Region]) -> Result<Vec<Vec<u8>>> {
        let total: usize = regions.iter().map(|r| r.len).sum();
        trace!("read_many: {} regions, {} bytes", regions.len(), total);
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.regions.fetch_add(regions.len(), Ordering::Relaxed);
        self.bytes.fetch_add(total, Ordering::Relaxed);
        self.largest_batch.fetch_max(total, Ordering::Relaxed);
        self.inner.read_many(regions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::MemoryImage;

    #[test]
    fn test_counts_batches_and_bytes() {
        let process = Instrumented::new(MemoryImage::builder().zeroed(0x100, 64).build());
        process
            .read_many(&[Region::new(0x100, 8), Region::new(0x110, 16)])
            .unwrap();
        process.read_u32(0x120).unwrap();

        let stats = process.stats();
        assert_eq!(stats.batches, 1);
        assert_eq!(stats.single_reads, 1);
        assert_eq!(stats.regions, 2);
        assert_eq!(stats.bytes, 28);
        assert_eq!(stats.largest_batch, 24);

        process.reset();
        assert_eq!(process.stats(), TransportStats::default());
    }
}
