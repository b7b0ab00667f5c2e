//! Sparse in-memory address space.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use tracing::info;

use super::{PauseCounter, Process, Region};
use crate::error::{Error, Result};
use crate::layout::{Identity, Num};

/// A frozen copy of (parts of) a foreign address space.
///
/// Used as the fixture for session tests and as a transport for saved
/// images. Pausing is counted but otherwise a no-op; reads are always
/// consistent.
#[derive(Debug, Default)]
pub struct MemoryImage {
    identity: Identity,
    base_offset: u64,
    regions: BTreeMap<u64, Vec<u8>>,
    pauses: PauseCounter,
    gate_pauses: AtomicUsize,
    read_calls: AtomicUsize,
}

#[derive(Debug, Serialize, Deserialize)]
struct ImageFile {
    identity: String,
    #[serde(default)]
    base_offset: Num,
    #[serde(default)]
    regions: Vec<RegionEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RegionEntry {
    address: Num,
    bytes: String,
}

impl MemoryImage {
    pub fn builder() -> MemoryImageBuilder {
        MemoryImageBuilder::default()
    }

    /// Load an image file: identity and region bytes as hex strings.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let file: ImageFile = serde_json::from_str(&content)?;

        let identity = Identity::from_hex(&file.identity).map_err(|e| Error::LayoutParse {
            file: path.to_path_buf(),
            message: format!("invalid identity: {}", e),
        })?;
        let mut builder = Self::builder()
            .identity(identity.as_bytes())
            .base_offset(file.base_offset.0);
        for region in &file.regions {
            let bytes = hex::decode(region.bytes.trim()).map_err(|e| Error::LayoutParse {
                file: path.to_path_buf(),
                message: format!("region {:#x}: {}", region.address.0, e),
            })?;
            builder = builder.write(region.address.0, &bytes);
        }
        let image = builder.build();
        info!(
            "Loaded memory image {} ({} regions, {} bytes)",
            path.display(),
            image.regions.len(),
            image.mapped_bytes()
        );
        Ok(image)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = ImageFile {
            identity: self.identity.to_string(),
            base_offset: Num(self.base_offset),
            regions: self
                .regions
                .iter()
                .map(|(address, bytes)| RegionEntry {
                    address: Num(*address),
                    bytes: hex::encode(bytes),
                })
                .collect(),
        };
        fs::write(path, serde_json::to_string_pretty(&file)?)?;
        Ok(())
    }

    /// Current nesting depth of pauses.
    pub fn pause_depth(&self) -> usize {
        self.pauses.depth()
    }

    /// How often the outermost pause actually paused.
    pub fn gate_pauses(&self) -> usize {
        self.gate_pauses.load(Ordering::Relaxed)
    }

    /// Number of `read` and `read_many` calls served.
    pub fn read_calls(&self) -> usize {
        self.read_calls.load(Ordering::Relaxed)
    }

    pub fn mapped_bytes(&self) -> usize {
        self.regions.values().map(Vec::len).sum()
    }

    fn copy_out(&self, address: u64, buf: &mut [u8]) -> Result<()> {
        let mut cursor = address;
        let mut filled = 0;
        while filled < buf.len() {
            let (start, bytes) = self
                .regions
                .range(..=cursor)
                .next_back()
                .filter(|(start, bytes)| cursor - **start < bytes.len() as u64)
                .ok_or_else(|| {
                    Error::transport(address, buf.len(), format!("unmapped at {:#x}", cursor))
                })?;
            let from = (cursor - start) as usize;
            let take = (bytes.len() - from).min(buf.len() - filled);
            buf[filled..filled + take].copy_from_slice(&bytes[from..from + take]);
            filled += take;
            cursor = cursor.wrapping_add(take as u64);
        }
        Ok(())
    }
}

impl Process for MemoryImage {
    fn identity(&self) -> Result<Identity> {
        Ok(self.identity.clone())
    }

    fn base_offset(&self) -> Result<u64> {
        Ok(self.base_offset)
    }

    fn pause(&self) -> Result<()> {
        self.pauses.enter(|| {
            self.gate_pauses.fetch_add(1, Ordering::Relaxed);
            Ok(())
        })
    }

    fn resume(&self) -> Result<()> {
        self.pauses.leave(|| Ok(()))
    }

    fn read(&self, address: u64, buf: &mut [u8]) -> Result<()> {
        self.read_calls.fetch_add(1, Ordering::Relaxed);
        self.copy_out(address, buf)
    }

    fn read_many(&self, regions: &[Region]) -> Result<Vec<Vec<u8>>> {
        self.read_calls.fetch_add(1, Ordering::Relaxed);
        regions
            .iter()
            .map(|region| {
                let mut buf = vec![0u8; region.len];
                self.copy_out(region.address, &mut buf)?;
                Ok(buf)
            })
            .collect()
    }
}

/// Builder for [`MemoryImage`]. Later writes overwrite earlier ones;
/// overlapping and adjacent writes merge into one region.
#[derive(Debug, Default)]
pub struct MemoryImageBuilder {
    identity: Vec<u8>,
    base_offset: u64,
    regions: BTreeMap<u64, Vec<u8>>,
}

impl MemoryImageBuilder {
    pub fn identity(mut self, bytes: &[u8]) -> Self {
        self.identity = bytes.to_vec();
        self
    }

    pub fn base_offset(mut self, offset: u64) -> Self {
        self.base_offset = offset;
        self
    }

    pub fn write(mut self, address: u64, bytes: &[u8]) -> Self {
        self.insert(address, bytes);
        self
    }

    pub fn write_u8(self, address: u64, value: u8) -> Self {
        self.write(address, &[value])
    }

    pub fn write_u16(self, address: u64, value: u16) -> Self {
        self.write(address, &value.to_ne_bytes())
    }

    pub fn write_i32(self, address: u64, value: i32) -> Self {
        self.write(address, &value.to_ne_bytes())
    }

    pub fn write_u32(self, address: u64, value: u32) -> Self {
        self.write(address, &value.to_ne_bytes())
    }

    pub fn write_u64(self, address: u64, value: u64) -> Self {
        self.write(address, &value.to_ne_bytes())
    }

    /// Reserve `len` zero bytes without overwriting anything already written.
    pub fn zeroed(mut self, address: u64, len: usize) -> Self {
        let existing = self.regions.clone();
        self.insert(address, &vec![0u8; len]);
        for (start, bytes) in existing {
            self.insert(start, &bytes);
        }
        self
    }

    pub fn build(self) -> MemoryImage {
        MemoryImage {
            identity: Identity::new(self.identity),
            base_offset: self.base_offset,
            regions: self.regions,
            ..Default::default()
        }
    }

    fn insert(&mut self, address: u64, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let end = address + bytes.len() as u64;

        // Regions that overlap or touch [address, end].
        let touching: Vec<u64> = self
            .regions
            .range(..=end)
            .filter(|(start, data)| **start + data.len() as u64 >= address)
            .map(|(start, _)| *start)
            .collect();

        let mut lo = address;
        let mut hi = end;
        let mut parts = Vec::with_capacity(touching.len());
        for start in touching {
            if let Some(data) = self.regions.remove(&start) {
                lo = lo.min(start);
                hi = hi.max(start + data.len() as u64);
                parts.push((start, data));
            }
        }

        let mut merged = vec![0u8; (hi - lo) as usize];
        for (start, data) in parts {
            let from = (start - lo) as usize;
            merged[from..from + data.len()].copy_from_slice(&data);
        }
        let from = (address - lo) as usize;
        merged[from..from + bytes.len()].copy_from_slice(bytes);
        self.regions.insert(lo, merged);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_reads_across_adjacent_writes() {
        let image = MemoryImage::builder()
            .write(0x1000, &[1, 2])
            .write(0x1002, &[3, 4])
            .build();
        assert_eq!(image.read_bytes(0x1000, 4).unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(image.regions.len(), 1);
    }

    #[test]
    fn test_later_write_overwrites() {
        let image = MemoryImage::builder()
            .write(0x10, &[0xAA; 8])
            .write_u32(0x12, 0)
            .build();
        assert_eq!(
            image.read_bytes(0x10, 8).unwrap(),
            vec![0xAA, 0xAA, 0, 0, 0, 0, 0xAA, 0xAA]
        );
    }

    #[test]
    fn test_zeroed_keeps_existing_bytes() {
        let image = MemoryImage::builder()
            .write_u8(0x21, 5)
            .zeroed(0x20, 4)
            .build();
        assert_eq!(image.read_bytes(0x20, 4).unwrap(), vec![0, 5, 0, 0]);
    }

    #[test]
    fn test_unmapped_read_fails() {
        let image = MemoryImage::builder().write(0x1000, &[1, 2, 3]).build();
        let err = image.read_bytes(0x1001, 4).unwrap_err();
        assert!(matches!(err, Error::Transport { address: 0x1001, len: 4, .. }));
        assert!(image.read_bytes(0x0fff, 1).is_err());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("image.json");

        let image = MemoryImage::builder()
            .identity(&[0xde, 0xad])
            .base_offset(0x4000)
            .write_u64(0x1000, 0x1122_3344)
            .write(0x9000, b"hello")
            .build();
        image.save(&path).unwrap();

        let loaded = MemoryImage::load(&path).unwrap();
        assert_eq!(loaded.identity().unwrap().to_string(), "dead");
        assert_eq!(loaded.base_offset().unwrap(), 0x4000);
        assert_eq!(loaded.read_u64(0x1000).unwrap(), 0x1122_3344);
        assert_eq!(loaded.read_bytes(0x9000, 5).unwrap(), b"hello");
    }

    #[test]
    fn test_load_rejects_bad_hex() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("image.json");
        fs::write(
            &path,
            r#"{"identity": "zz", "regions": []}"#,
        )
        .unwrap();
        assert!(matches!(
            MemoryImage::load(&path),
            Err(Error::LayoutParse { .. })
        ));
    }
}
