use super::{Process, Region};
use crate::error::{Error, Result};
use crate::layout::Identity;
use crate::vectorize::dispatch;

/// Splits every `read_many` into batches no larger than `ceiling` bytes,
/// for transports with a hard message limit.
#[derive(Debug)]
pub struct Chunked<P> {
    inner: P,
    ceiling: usize,
}

impl<P: Process> Chunked<P> {
    pub fn new(inner: P, ceiling: usize) -> Result<Self> {
        if ceiling == 0 {
            return Err(Error::InvalidConfig(
                "chunk ceiling must be positive".to_string(),
            ));
        }
        Ok(Self { inner, ceiling })
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }
}

impl<P: Process> Process for Chunked<P> {
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
        if buf.len() <= self.ceiling {
            return self.inner.read(address, buf);
        }
        let mut filled = dispatch(
            &self.inner,
            &[Region::new(address, buf.len())],
            self.ceiling,
            |_| Ok(()),
        )?;
        buf.copy_from_slice(&filled.remove(0));
        Ok(())
    }

    fn read_many(&self, regions: &[Region]) -> Result<Vec<Vec<u8>>> {
        dispatch(&self.inner, regions, self.ceiling, |_| Ok(()))
    }
}
