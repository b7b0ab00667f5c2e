//! Read request vectorizer.
//!
//! Packs many small reads into batched `read_many` calls whose aggregate
//! payload never exceeds a ceiling. Requests larger than the ceiling are
//! split into chunks and reassembled; sub-batches are dispatched one at a
//! time in submission order.

use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::process::{Process, Region, check_batch};

/// One piece of a submitted request placed into a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Piece {
    /// Index of the request this piece belongs to.
    pub request: usize,
    /// Offset of this piece within the request's buffer.
    pub offset: usize,
    pub region: Region,
}

/// Greedy FIFO packing of `requests` into batches of at most `ceiling` bytes.
///
/// Zero-length requests produce no pieces.
pub fn plan_batches(requests: &[Region], ceiling: usize) -> Vec<Vec<Piece>> {
    let mut batches = Vec::new();
    let mut current: Vec<Piece> = Vec::new();
    let mut current_bytes = 0usize;

    for (index, request) in requests.iter().enumerate() {
        let mut offset = 0;
        while offset < request.len {
            let len = (request.len - offset).min(ceiling);
            if current_bytes + len > ceiling && !current.is_empty() {
                batches.push(std::mem::take(&mut current));
                current_bytes = 0;
            }
            current.push(Piece {
                request: index,
                offset,
                region: Region::new(request.address.wrapping_add(offset as u64), len),
            });
            current_bytes += len;
            offset += len;
        }
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

/// Dispatch `requests` through `process` under `ceiling`, one batch in
/// flight at a time. `checkpoint` runs before every batch and may abort.
pub fn dispatch<P, C>(
    process: &P,
    requests: &[Region],
    ceiling: usize,
    mut checkpoint: C,
) -> Result<Vec<Vec<u8>>>
where
    P: Process + ?Sized,
    C: FnMut(&[Region]) -> Result<()>,
{
    let mut buffers: Vec<Vec<u8>> = requests.iter().map(|r| vec![0u8; r.len]).collect();

    for batch in plan_batches(requests, ceiling) {
        let regions: Vec<Region> = batch.iter().map(|piece| piece.region).collect();
        checkpoint(&regions)?;

        let filled = process.read_many(&regions)?;
        check_batch(&regions, &filled)?;
        for (piece, bytes) in batch.iter().zip(filled) {
            buffers[piece.request][piece.offset..piece.offset + bytes.len()]
                .copy_from_slice(&bytes);
        }
    }
    Ok(buffers)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VectorizerStats {
    pub batches: usize,
    pub requests: usize,
    pub bytes: usize,
    pub largest_batch: usize,
}

/// Queue of pending reads, flushed as bounded batches.
#[derive(Debug)]
pub struct Vectorizer {
    ceiling: usize,
    pending: Vec<Region>,
    stats: VectorizerStats,
}

impl Vectorizer {
    pub fn new(ceiling: usize) -> Result<Self> {
        if ceiling == 0 {
            return Err(Error::InvalidConfig(
                "batch ceiling must be positive".to_string(),
            ));
        }
        Ok(Self {
            ceiling,
            pending: Vec::new(),
            stats: VectorizerStats::default(),
        })
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Queue a read; the returned ticket indexes the next `flush` result.
    pub fn submit(&mut self, region: Region) -> usize {
        self.pending.push(region);
        self.pending.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn pending_bytes(&self) -> usize {
        self.pending.iter().map(|r| r.len).sum()
    }

    /// Drop everything queued.
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn stats(&self) -> VectorizerStats {
        self.stats
    }

    /// Retire every pending request. Buffers are indexed by ticket.
    ///
    /// On error (including an aborting checkpoint) the queue is emptied and
    /// no buffer is returned.
    pub fn flush<P, C>(&mut self, process: &P, mut checkpoint: C) -> Result<Vec<Vec<u8>>>
    where
        P: Process + ?Sized,
        C: FnMut() -> Result<()>,
    {
        let requests = std::mem::take(&mut self.pending);
        if requests.is_empty() {
            return Ok(Vec::new());
        }
        debug!(
            "Flushing {} reads ({} bytes) under ceiling {}",
            requests.len(),
            requests.iter().map(|r| r.len).sum::<usize>(),
            self.ceiling
        );

        let stats = &mut self.stats;
        let buffers = dispatch(process, &requests, self.ceiling, |batch| {
            checkpoint()?;
            let bytes: usize = batch.iter().map(|r| r.len).sum();
            trace!("Dispatching batch of {} regions, {} bytes", batch.len(), bytes);
            stats.batches += 1;
            stats.bytes += bytes;
            stats.largest_batch = stats.largest_batch.max(bytes);
            Ok(())
        })?;
        self.stats.requests += requests.len();
        Ok(buffers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{Instrumented, MemoryImage};

    #[test]
    fn test_plan_batches_respects_ceiling() {
        let requests: Vec<Region> = (0..10).map(|i| Region::new(i * 0x100, 30)).collect();
        let batches = plan_batches(&requests, 100);
        assert_eq!(batches.len(), 4);
        for batch in &batches {
            let total: usize = batch.iter().map(|p| p.region.len).sum();
            assert!(total <= 100);
        }
        // FIFO order preserved across batches
        let order: Vec<usize> = batches.iter().flatten().map(|p| p.request).collect();
        assert_eq!(order, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_plan_batches_splits_oversize_request() {
        let batches = plan_batches(&[Region::new(0x1000, 250)], 100);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0][0].region, Region::new(0x1000, 100));
        assert_eq!(batches[1][0].offset, 100);
        assert_eq!(batches[2][0].region, Region::new(0x10c8, 50));
    }

    #[test]
    fn test_plan_batches_skips_empty() {
        let batches = plan_batches(&[Region::new(0x10, 0), Region::new(0x20, 4)], 8);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
        assert_eq!(batches[0][0].request, 1);
    }

    #[test]
    fn test_flush_reassembles_split_requests() {
        let data: Vec<u8> = (0..=255).collect();
        let image = Instrumented::new(MemoryImage::builder().write(0x4000, &data).build());
        let mut vectorizer = Vectorizer::new(64).unwrap();
        let big = vectorizer.submit(Region::new(0x4000, 256));
        let small = vectorizer.submit(Region::new(0x4010, 4));

        let buffers = vectorizer.flush(&image, || Ok(())).unwrap();
        assert_eq!(buffers[big], data);
        assert_eq!(buffers[small], vec![16, 17, 18, 19]);
        assert!(vectorizer.is_empty());

        let stats = image.stats();
        assert_eq!(stats.batches, 5);
        assert!(stats.largest_batch <= 64);
        assert_eq!(vectorizer.stats().requests, 2);
    }

    #[test]
    fn test_flush_stops_when_checkpoint_fails() {
        let image = Instrumented::new(MemoryImage::builder().zeroed(0, 1024).build());
        let mut vectorizer = Vectorizer::new(16).unwrap();
        for i in 0..8 {
            vectorizer.submit(Region::new(i * 16, 16));
        }
        let mut seen = 0;
        let result = vectorizer.flush(&image, || {
            seen += 1;
            if seen > 2 {
                Err(Error::Cancelled)
            } else {
                Ok(())
            }
        });
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(image.stats().batches, 2);
        assert!(vectorizer.is_empty());
    }

    #[test]
    fn test_zero_ceiling_rejected() {
        assert!(Vectorizer::new(0).is_err());
    }
}
