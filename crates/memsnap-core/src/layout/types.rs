//! Resolved layout descriptors for one version.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use strum::{Display, EnumString, IntoStaticStr};

use super::abi::Abi;

/// Fingerprint of a foreign process image. Ordered lexicographically.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Identity(Vec<u8>);

impl Identity {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Parse a hex string, with or without a `0x` prefix.
    pub fn from_hex(text: &str) -> Result<Self, hex::FromHexError> {
        let text = text.trim();
        let text = text
            .strip_prefix("0x")
            .or_else(|| text.strip_prefix("0X"))
            .unwrap_or(text);
        hex::decode(text).map(Self)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarClass {
    Signed,
    Unsigned,
    Float,
    Bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, IntoStaticStr, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Primitive {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Bool,
    Char,
    Float,
    Double,
    /// Pointer-sized unsigned integer.
    UIntPtr,
    /// `std::string`-style header.
    #[strum(serialize = "string")]
    StdString,
}

impl Primitive {
    pub fn size(self, abi: &Abi) -> usize {
        match self {
            Self::Int8 | Self::UInt8 | Self::Bool | Self::Char => 1,
            Self::Int16 | Self::UInt16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float => 4,
            Self::Int64 | Self::UInt64 | Self::Double => 8,
            Self::UIntPtr => abi.pointer_size,
            Self::StdString => abi.string.size,
        }
    }

    pub fn align(self, abi: &Abi) -> usize {
        match self {
            Self::StdString => abi.pointer_size,
            other => other.size(abi),
        }
    }

    /// Scalar class, or `None` for non-scalar primitives.
    pub fn class(self) -> Option<ScalarClass> {
        match self {
            Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64 | Self::Char => {
                Some(ScalarClass::Signed)
            }
            Self::UInt8 | Self::UInt16 | Self::UInt32 | Self::UInt64 | Self::UIntPtr => {
                Some(ScalarClass::Unsigned)
            }
            Self::Float | Self::Double => Some(ScalarClass::Float),
            Self::Bool => Some(ScalarClass::Bool),
            Self::StdString => None,
        }
    }
}

/// A type reference inside a layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeDesc {
    Primitive(Primitive),
    Enum(String),
    Bitfield(String),
    Record(String),
    Array { elem: Box<TypeDesc>, len: usize },
    Vector(Box<TypeDesc>),
    Map { key: Box<TypeDesc>, value: Box<TypeDesc> },
    Pointer(Box<TypeDesc>),
    Shared(Box<TypeDesc>),
    Weak(Box<TypeDesc>),
    Flags,
}

impl TypeDesc {
    /// Human-readable kind, used in compatibility reports.
    pub fn kind_name(&self) -> &'static str {
        match self {
            TypeDesc::Primitive(Primitive::StdString) => "string",
            TypeDesc::Primitive(_) => "scalar",
            TypeDesc::Enum(_) => "enumeration",
            TypeDesc::Bitfield(_) => "bitfield",
            TypeDesc::Record(_) => "record",
            TypeDesc::Array { .. } => "fixed array",
            TypeDesc::Vector(_) => "dynamic array",
            TypeDesc::Map { .. } => "associative container",
            TypeDesc::Pointer(_) => "owning pointer",
            TypeDesc::Shared(_) => "shared pointer",
            TypeDesc::Weak(_) => "weak pointer",
            TypeDesc::Flags => "flag array",
        }
    }

    /// Record name behind a pointer-like type, if any.
    pub fn pointee_record(&self) -> Option<&str> {
        match self {
            TypeDesc::Pointer(inner) | TypeDesc::Shared(inner) | TypeDesc::Weak(inner) => {
                match inner.as_ref() {
                    TypeDesc::Record(name) => Some(name),
                    _ => None,
                }
            }
            _ => None,
        }
    }
}

impl fmt::Display for TypeDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDesc::Primitive(p) => write!(f, "{}", p),
            TypeDesc::Enum(name) | TypeDesc::Bitfield(name) | TypeDesc::Record(name) => {
                f.write_str(name)
            }
            TypeDesc::Array { elem, len } => write!(f, "array<{}, {}>", elem, len),
            TypeDesc::Vector(elem) => write!(f, "vector<{}>", elem),
            TypeDesc::Map { key, value } => write!(f, "map<{}, {}>", key, value),
            TypeDesc::Pointer(inner) => write!(f, "pointer<{}>", inner),
            TypeDesc::Shared(inner) => write!(f, "shared<{}>", inner),
            TypeDesc::Weak(inner) => write!(f, "weak<{}>", inner),
            TypeDesc::Flags => f.write_str("flags"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDesc {
    pub name: String,
    pub offset: usize,
    pub ty: TypeDesc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscriminatorKind {
    /// An inline integer tag compared against each concrete's discriminant.
    Value,
    /// A vtable pointer compared against the version's relocated vtables.
    Vtable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Discriminator {
    pub offset: usize,
    pub size: usize,
    pub kind: DiscriminatorKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordDesc {
    pub name: String,
    pub base: Option<String>,
    pub size: usize,
    pub align: usize,
    /// Own fields; offsets are absolute within the record.
    pub fields: Vec<FieldDesc>,
    pub discriminator: Option<Discriminator>,
    /// Inline discriminant of a concrete record (value discriminators only).
    pub discriminant: Option<u64>,
}

impl RecordDesc {
    pub fn own_field(&self, name: &str) -> Option<&FieldDesc> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumDesc {
    pub name: String,
    pub size: usize,
    pub values: Vec<(String, i64)>,
}

impl EnumDesc {
    pub fn label_of(&self, value: i64) -> Option<&str> {
        self.values
            .iter()
            .find(|(_, v)| *v == value)
            .map(|(label, _)| label.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitFlag {
    pub label: String,
    pub offset: u32,
    pub width: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitfieldDesc {
    pub name: String,
    pub size: usize,
    pub flags: Vec<BitFlag>,
}

/// A global symbol bound to an address in one version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Global {
    pub path: String,
    pub ty: TypeDesc,
    /// Address before relocation by the version base and process base offset.
    pub address: u64,
}

/// One layout version: identity, ABI and fully resolved tables.
#[derive(Debug, Clone)]
pub struct Version {
    pub identity: Identity,
    pub label: String,
    /// Added to every global and vtable address of this version.
    pub base: u64,
    pub abi: Abi,
    pub source: PathBuf,
    pub(crate) records: HashMap<String, Arc<RecordDesc>>,
    pub(crate) enums: HashMap<String, EnumDesc>,
    pub(crate) bitfields: HashMap<String, BitfieldDesc>,
    pub(crate) globals: BTreeMap<String, Global>,
    pub(crate) vtables: HashMap<String, u64>,
}

impl Version {
    pub fn record(&self, name: &str) -> Option<&Arc<RecordDesc>> {
        self.records.get(name)
    }

    pub fn enumeration(&self, name: &str) -> Option<&EnumDesc> {
        self.enums.get(name)
    }

    pub fn bitfield(&self, name: &str) -> Option<&BitfieldDesc> {
        self.bitfields.get(name)
    }

    pub fn global(&self, path: &str) -> Option<&Global> {
        self.globals.get(path)
    }

    pub fn globals(&self) -> impl Iterator<Item = &Global> {
        self.globals.values()
    }

    pub fn records(&self) -> impl Iterator<Item = &Arc<RecordDesc>> {
        self.records.values()
    }

    /// Unrelocated vtable address declared for a concrete record.
    pub fn vtable(&self, record: &str) -> Option<u64> {
        self.vtables.get(record).copied()
    }

    /// Records from `name` up through its bases, nearest first.
    pub fn base_chain<'a>(&'a self, name: &str) -> Vec<&'a RecordDesc> {
        let mut chain = Vec::new();
        let mut current = self.records.get(name);
        while let Some(record) = current {
            if chain.iter().any(|r: &&RecordDesc| r.name == record.name) {
                break;
            }
            chain.push(record.as_ref());
            current = record.base.as_ref().and_then(|b| self.records.get(b));
        }
        chain
    }

    pub fn is_derived_from(&self, record: &str, ancestor: &str) -> bool {
        self.base_chain(record).iter().any(|r| r.name == ancestor)
    }

    /// Find a field on `record` or any of its bases.
    pub fn find_field(&self, record: &str, field: &str) -> Option<&FieldDesc> {
        self.base_chain(record)
            .into_iter()
            .find_map(|r| r.own_field(field))
    }

    /// Discriminator governing `record`, declared on it or on a base.
    pub fn discriminator_of(&self, record: &str) -> Option<Discriminator> {
        self.base_chain(record)
            .into_iter()
            .find_map(|r| r.discriminator)
    }

    /// Records deriving (directly or indirectly) from `base`, excluding it.
    pub fn concretes_of(&self, base: &str) -> Vec<&RecordDesc> {
        let mut found: Vec<&RecordDesc> = self
            .records
            .values()
            .filter(|r| r.name != base && self.is_derived_from(&r.name, base))
            .map(|r| r.as_ref())
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        found
    }

    /// Byte size of a type in this version.
    pub fn size_of(&self, ty: &TypeDesc) -> Result<usize, String> {
        let abi = &self.abi;
        Ok(match ty {
            TypeDesc::Primitive(p) => p.size(abi),
            TypeDesc::Enum(name) => {
                self.enums
                    .get(name)
                    .ok_or_else(|| format!("unknown enumeration '{}'", name))?
                    .size
            }
            TypeDesc::Bitfield(name) => {
                self.bitfields
                    .get(name)
                    .ok_or_else(|| format!("unknown bitfield '{}'", name))?
                    .size
            }
            TypeDesc::Record(name) => {
                self.records
                    .get(name)
                    .ok_or_else(|| format!("unknown record '{}'", name))?
                    .size
            }
            TypeDesc::Array { elem, len } => self.size_of(elem)? * len,
            TypeDesc::Vector(_) => abi.vector.size,
            TypeDesc::Map { .. } => abi.map.size,
            TypeDesc::Pointer(_) | TypeDesc::Weak(_) => abi.pointer_size,
            TypeDesc::Shared(_) => abi.shared.size,
            TypeDesc::Flags => abi.flags.size,
        })
    }

    pub fn align_of(&self, ty: &TypeDesc) -> Result<usize, String> {
        let abi = &self.abi;
        Ok(match ty {
            TypeDesc::Primitive(p) => p.align(abi),
            TypeDesc::Enum(_) | TypeDesc::Bitfield(_) => self.size_of(ty)?.max(1),
            TypeDesc::Record(name) => {
                self.records
                    .get(name)
                    .ok_or_else(|| format!("unknown record '{}'", name))?
                    .align
            }
            TypeDesc::Array { elem, .. } => self.align_of(elem)?,
            _ => abi.pointer_size,
        })
    }

    /// Entry geometry of a flat map: `(value offset, stride)`.
    pub fn map_entry(&self, key: &TypeDesc, value: &TypeDesc) -> Result<(usize, usize), String> {
        let key_size = self.size_of(key)?;
        let value_align = self.align_of(value)?;
        let value_offset = align_up(key_size, value_align);
        let align = self.align_of(key)?.max(value_align);
        Ok((value_offset, align_up(value_offset + self.size_of(value)?, align)))
    }
}

pub(crate) fn align_up(value: usize, align: usize) -> usize {
    if align <= 1 {
        value
    } else {
        value.div_ceil(align) * align
    }
}
