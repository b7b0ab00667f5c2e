//! Container ABI of the foreign build.
//!
//! Header shapes for the standard containers the game uses. Defaults are
//! those of a 64-bit libstdc++ build; a version may override any of them.

use serde::{Deserialize, Serialize};

/// Default header constants for a 64-bit libstdc++ build
pub mod defaults {
    /// Pointer width (8 bytes / 64-bit)
    pub const POINTER: usize = 8;

    /// `std::vector`: begin, end, capacity pointers
    pub const VECTOR_DATA: usize = 0;
    pub const VECTOR_END: usize = POINTER;
    pub const VECTOR_SIZE: usize = POINTER * 3;

    /// `std::shared_ptr`: object pointer, control block pointer
    pub const SHARED_OBJECT: usize = 0;
    pub const SHARED_SIZE: usize = POINTER * 2;

    /// `std::string`: data pointer, length, 16-byte local buffer
    pub const STRING_DATA: usize = 0;
    pub const STRING_LEN: usize = POINTER;
    pub const STRING_SIZE: usize = 32;

    /// Flag array: data pointer, byte count
    pub const FLAGS_DATA: usize = 0;
    pub const FLAGS_LEN: usize = POINTER;
    pub const FLAGS_LEN_WIDTH: usize = 4;
    pub const FLAGS_SIZE: usize = POINTER * 2;
}

/// How a container header encodes its length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LengthMode {
    /// An element count stored as an unsigned integer.
    Count,
    /// A one-past-the-end pointer; the count is derived from the stride.
    End,
}

/// Header of a contiguous container (vectors and flat maps).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SequenceHeader {
    pub data: usize,
    pub len: usize,
    pub len_width: usize,
    pub mode: LengthMode,
    pub size: usize,
}

impl Default for SequenceHeader {
    fn default() -> Self {
        Self {
            data: defaults::VECTOR_DATA,
            len: defaults::VECTOR_END,
            len_width: defaults::POINTER,
            mode: LengthMode::End,
            size: defaults::VECTOR_SIZE,
        }
    }
}

/// Header of a `(pointer, byte length)` pair: strings and flag arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BufferHeader {
    pub data: usize,
    pub len: usize,
    pub len_width: usize,
    pub size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SharedHeader {
    pub object: usize,
    pub size: usize,
}

/// Complete container ABI for one version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Abi {
    pub pointer_size: usize,
    pub vector: SequenceHeader,
    pub map: SequenceHeader,
    pub shared: SharedHeader,
    pub string: BufferHeader,
    pub flags: BufferHeader,
}

impl Default for Abi {
    fn default() -> Self {
        Self {
            pointer_size: defaults::POINTER,
            vector: SequenceHeader::default(),
            map: SequenceHeader::default(),
            shared: SharedHeader {
                object: defaults::SHARED_OBJECT,
                size: defaults::SHARED_SIZE,
            },
            string: BufferHeader {
                data: defaults::STRING_DATA,
                len: defaults::STRING_LEN,
                len_width: defaults::POINTER,
                size: defaults::STRING_SIZE,
            },
            flags: BufferHeader {
                data: defaults::FLAGS_DATA,
                len: defaults::FLAGS_LEN,
                len_width: defaults::FLAGS_LEN_WIDTH,
                size: defaults::FLAGS_SIZE,
            },
        }
    }
}

impl Abi {
    /// Check that every header field fits inside its header.
    pub fn validate(&self) -> Result<(), String> {
        if !matches!(self.pointer_size, 4 | 8) {
            return Err(format!("pointer size {} is not 4 or 8", self.pointer_size));
        }
        let ptr = self.pointer_size;
        let checks = [
            ("vector", self.vector.data + ptr, self.vector.size),
            ("vector", self.vector.len + self.vector_len_width(), self.vector.size),
            ("map", self.map.data + ptr, self.map.size),
            ("map", self.map.len + self.map_len_width(), self.map.size),
            ("shared", self.shared.object + ptr, self.shared.size),
            ("string", self.string.data + ptr, self.string.size),
            ("string", self.string.len + self.string.len_width, self.string.size),
            ("flags", self.flags.data + ptr, self.flags.size),
            ("flags", self.flags.len + self.flags.len_width, self.flags.size),
        ];
        for (name, end, size) in checks {
            if end > size {
                return Err(format!(
                    "{} header field ends at {} past header size {}",
                    name, end, size
                ));
            }
        }
        Ok(())
    }

    fn vector_len_width(&self) -> usize {
        match self.vector.mode {
            LengthMode::Count => self.vector.len_width,
            LengthMode::End => self.pointer_size,
        }
    }

    fn map_len_width(&self) -> usize {
        match self.map.mode {
            LengthMode::Count => self.map.len_width,
            LengthMode::End => self.pointer_size,
        }
    }
}
