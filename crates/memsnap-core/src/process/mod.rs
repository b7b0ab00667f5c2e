//! Process abstraction.
//!
//! Uniform access to a foreign address space, whatever hosts it:
//!
//! - **[`MemoryImage`]**: a sparse in-memory address space (fixtures, saved images)
//! - **[`GatedProcess`]**: composes pause gate, fingerprint and memory source collaborators
//! - **Wrappers**: [`Instrumented`] (statistics) and [`Chunked`] (ceiling-bounded batches)
//!
//! Pauses nest; only the outermost `resume` resumes the foreign process.

mod chunked;
mod gated;
mod image;
mod instrument;
#[cfg(all(target_os = "linux", feature = "live"))]
pub mod live;
mod pause;

use std::sync::Arc;

pub use chunked::Chunked;
pub use gated::GatedProcess;
pub use image::{MemoryImage, MemoryImageBuilder};
pub use instrument::{Instrumented, TransportStats};
pub use pause::{PauseCounter, PauseGuard};

use crate::error::{Error, Result};
use crate::layout::Identity;

/// A contiguous region of the foreign address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Region {
    pub address: u64,
    pub len: usize,
}

impl Region {
    pub fn new(address: u64, len: usize) -> Self {
        Self { address, len }
    }
}

pub trait Process: Send + Sync {
    /// Stable fingerprint of the running process image.
    fn identity(&self) -> Result<Identity>;

    /// Load-address adjustment added to every resolved symbol.
    fn base_offset(&self) -> Result<u64>;

    fn pause(&self) -> Result<()>;

    fn resume(&self) -> Result<()>;

    /// Fill `buf` from `address`. Partial reads are failures.
    fn read(&self, address: u64, buf: &mut [u8]) -> Result<()>;

    /// Read every region; buffers come back in request order, each exactly
    /// the requested length.
    fn read_many(&self, regions: &[Region]) -> Result<Vec<Vec<u8>>> {
        regions
            .iter()
            .map(|region| {
                let mut buf = vec![0u8; region.len];
                self.read(region.address, &mut buf)?;
                Ok(buf)
            })
            .collect()
    }

    fn read_bytes(&self, address: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read(address, &mut buf)?;
        Ok(buf)
    }

    fn read_u32(&self, address: u64) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read(address, &mut buf)?;
        Ok(u32::from_ne_bytes(buf))
    }

    fn read_u64(&self, address: u64) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read(address, &mut buf)?;
        Ok(u64::from_ne_bytes(buf))
    }
}

/// Check a `read_many` response against its request.
pub fn check_batch(regions: &[Region], buffers: &[Vec<u8>]) -> Result<()> {
    if regions.len() != buffers.len() {
        let first = regions.first().copied().unwrap_or(Region::new(0, 0));
        return Err(Error::transport(
            first.address,
            first.len,
            format!(
                "batch returned {} buffers for {} regions",
                buffers.len(),
                regions.len()
            ),
        ));
    }
    for (region, buf) in regions.iter().zip(buffers) {
        if buf.len() != region.len {
            return Err(Error::transport(
                region.address,
                region.len,
                format!("partial read of {} bytes", buf.len()),
            ));
        }
    }
    Ok(())
}

macro_rules! forward_process {
    () => {
        fn identity(&self) -> Result<Identity> {
            (**self).identity()
        }

        fn base_offset(&self) -> Result<u64> {
            (**self).base_offset()
        }

        fn pause(&self) -> Result<()> {
            (**self).pause()
        }

        fn resume(&self) -> Result<()> {
            (**self).resume()
        }

        fn read(&self, address: u64, buf: &mut [u8]) -> Result<()> {
            (**self).read(address, buf)
        }

        fn read_many(&self, regions: &[Region]) -> Result<Vec<Vec<u8>>> {
            (**self).read_many(regions)
        }
    };
}

impl<P: Process + ?Sized> Process for &P {
    forward_process!();
}

impl<P: Process + ?Sized> Process for Arc<P> {
    forward_process!();
}

impl<P: Process + ?Sized> Process for Box<P> {
    forward_process!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_batch_detects_partial_read() {
        let regions = [Region::new(0x1000, 4), Region::new(0x2000, 8)];
        assert!(check_batch(&regions, &[vec![0; 4], vec![0; 8]]).is_ok());

        let err = check_batch(&regions, &[vec![0; 4], vec![0; 7]]).unwrap_err();
        assert!(matches!(err, Error::Transport { address: 0x2000, .. }));

        assert!(check_batch(&regions, &[vec![0; 4]]).is_err());
    }

    #[test]
    fn test_default_read_many_fills_in_order() {
        let image = MemoryImage::builder()
            .write(0x1000, &[1, 2, 3, 4])
            .write(0x2000, &[9, 8])
            .build();
        let bufs = image
            .read_many(&[Region::new(0x2000, 2), Region::new(0x1001, 3)])
            .unwrap();
        assert_eq!(bufs, vec![vec![9, 8], vec![2, 3, 4]]);
    }

    #[test]
    fn test_forwarding_through_references() {
        let image = Arc::new(MemoryImage::builder().write_u32(0x10, 7).build());
        let by_ref: &dyn Process = &image;
        assert_eq!(by_ref.read_u32(0x10).unwrap(), 7);
    }
}
