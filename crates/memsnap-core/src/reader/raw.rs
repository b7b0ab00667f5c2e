//! Header and pointer decoding shared by the fetch and assembly phases.

use super::scalar::read_uint;
use crate::error::{Error, Result};
use crate::layout::{BufferHeader, LengthMode, SequenceHeader};

/// Bounds-checked sub-slice of a value's bytes.
pub(crate) fn slice(bytes: &[u8], offset: usize, len: usize, address: u64) -> Result<&[u8]> {
    bytes
        .get(offset..offset.saturating_add(len))
        .ok_or_else(|| Error::Corrupt {
            address,
            message: format!(
                "{} bytes at offset {} exceed the {}-byte value",
                len,
                offset,
                bytes.len()
            ),
        })
}

pub(crate) fn pointer_at(bytes: &[u8], link: usize, pointer_size: usize, address: u64) -> Result<u64> {
    Ok(read_uint(slice(bytes, link, pointer_size, address)?, pointer_size))
}

/// `(data, element count)` of a sequence header.
pub(crate) fn sequence_extent(
    header: &SequenceHeader,
    bytes: &[u8],
    address: u64,
    stride: usize,
    pointer_size: usize,
    max_len: usize,
) -> Result<(u64, usize)> {
    let data = pointer_at(bytes, header.data, pointer_size, address)?;
    let count = match header.mode {
        LengthMode::Count => {
            read_uint(slice(bytes, header.len, header.len_width, address)?, header.len_width)
        }
        LengthMode::End => {
            let end = pointer_at(bytes, header.len, pointer_size, address)?;
            if end < data {
                return Err(Error::Corrupt {
                    address,
                    message: format!("container end {:#x} before data {:#x}", end, data),
                });
            }
            let span = end - data;
            let stride = stride.max(1) as u64;
            if span % stride != 0 {
                return Err(Error::Corrupt {
                    address,
                    message: format!("container span {} is not a multiple of {}", span, stride),
                });
            }
            span / stride
        }
    };
    check_len(count, max_len, address)?;
    if count > 0 && data == 0 {
        return Err(Error::Corrupt {
            address,
            message: format!("{} elements behind a null data pointer", count),
        });
    }
    Ok((data, count as usize))
}

/// `(data, byte or flag count)` of a buffer header.
pub(crate) fn buffer_extent(
    header: &BufferHeader,
    bytes: &[u8],
    address: u64,
    pointer_size: usize,
    max_len: usize,
) -> Result<(u64, usize)> {
    let data = pointer_at(bytes, header.data, pointer_size, address)?;
    let len = read_uint(slice(bytes, header.len, header.len_width, address)?, header.len_width);
    check_len(len, max_len, address)?;
    if len > 0 && data == 0 {
        return Err(Error::Corrupt {
            address,
            message: format!("{} bytes behind a null data pointer", len),
        });
    }
    Ok((data, len as usize))
}

/// Bytes holding `count` packed flags.
pub(crate) fn flag_bytes(count: usize) -> usize {
    count.div_ceil(8)
}

fn check_len(len: u64, max_len: usize, address: u64) -> Result<()> {
    if len > max_len as u64 {
        return Err(Error::Corrupt {
            address,
            message: format!("container length {} exceeds limit {}", len, max_len),
        });
    }
    Ok(())
}
