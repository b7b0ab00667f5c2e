//! Field codecs: how one host value is produced from foreign bytes.
//!
//! Every codec pairs a [`Shape`] (checked against the layout when a plan is
//! bound) with a decoder that runs during assembly, after every byte it
//! needs has been fetched.

use std::collections::BTreeMap;
use std::sync::Arc;

use encoding_rs::Encoding;
use memchr::memchr;

use super::handle::{BackRef, FlagArray, Shared};
use super::mirror::{Mirror, Polymorphic};
use super::raw::{flag_bytes, slice};
use super::scalar::{Bitfield, FlagIndex, ForeignEnum, Scalar, read_int, read_uint};
use super::shape::{HostKey, PolyKey, Shape, Step};
use crate::error::{Error, Result};
use crate::session::{Assembler, At};

pub(crate) type Decode<V> =
    Arc<dyn Fn(&mut Assembler<'_>, &Step, At<'_>) -> Result<V> + Send + Sync>;

/// A host value's shape plus its decoder.
pub struct Codec<V> {
    pub(crate) shape: Shape,
    pub(crate) decode: Decode<V>,
}

impl<V> Clone for Codec<V> {
    fn clone(&self) -> Self {
        Self {
            shape: self.shape.clone(),
            decode: Arc::clone(&self.decode),
        }
    }
}

impl<V> Codec<V> {
    pub fn shape(&self) -> &Shape {
        &self.shape
    }
}

fn codec<V, F>(shape: Shape, decode: F) -> Codec<V>
where
    F: Fn(&mut Assembler<'_>, &Step, At<'_>) -> Result<V> + Send + Sync + 'static,
{
    Codec {
        shape,
        decode: Arc::new(decode),
    }
}

fn unexpected(step: &Step, wanted: &str, address: u64) -> Error {
    Error::Corrupt {
        address,
        message: format!("plan step {:?} where {} was bound", step, wanted),
    }
}

/// Integers, floats and booleans, copied verbatim.
pub fn scalar<V: Scalar>() -> Codec<V> {
    codec(
        Shape::Scalar {
            size: V::SIZE,
            class: V::CLASS,
        },
        |_, step, at| match step {
            Step::Scalar { size } => Ok(V::from_ne_slice(slice(at.bytes, 0, *size, at.address)?)),
            other => Err(unexpected(other, "a scalar", at.address)),
        },
    )
}

/// Foreign enumerations. Values outside the host enumeration are logged
/// and read as the host default.
pub fn enumeration<E: ForeignEnum>() -> Codec<E> {
    codec(
        Shape::Enum {
            name: E::NAME,
            size: E::SIZE,
        },
        |asm, step, at| match step {
            Step::Enum { size } => {
                let raw = read_int(slice(at.bytes, 0, *size, at.address)?, *size);
                Ok(E::from_raw(raw).unwrap_or_else(|| {
                    asm.warn(&format!(
                        "value {} at {:#x} is not a known {}",
                        raw,
                        at.address,
                        E::NAME
                    ));
                    E::default()
                }))
            }
            other => Err(unexpected(other, "an enumeration", at.address)),
        },
    )
}

pub fn bits<B: Bitfield>() -> Codec<B> {
    codec(
        Shape::Bits {
            name: B::NAME,
            width: B::WIDTH,
        },
        |_, step, at| match step {
            Step::Bits { size } => Ok(B::from_bits(read_uint(
                slice(at.bytes, 0, *size, at.address)?,
                *size,
            ))),
            other => Err(unexpected(other, "a bitfield", at.address)),
        },
    )
}

/// Any foreign value of exactly `N` bytes, kept opaque.
pub fn bytes<const N: usize>() -> Codec<[u8; N]> {
    codec(Shape::Bytes { len: N }, |_, step, at| match step {
        Step::Bytes { len } if *len == N => {
            let mut out = [0u8; N];
            out.copy_from_slice(slice(at.bytes, 0, N, at.address)?);
            Ok(out)
        }
        other => Err(unexpected(other, "a byte blob", at.address)),
    })
}

/// Text from a fixed char array (NUL-terminated) or a `std::string`-style
/// header, decoded with `encoding`.
pub fn text(encoding: &'static Encoding) -> Codec<String> {
    codec(Shape::Text, move |asm, step, at| {
        let decode = |raw: &[u8]| {
            let end = memchr(0, raw).unwrap_or(raw.len());
            encoding
                .decode_without_bom_handling(&raw[..end])
                .0
                .into_owned()
        };
        match step {
            Step::Text { len } => Ok(decode(slice(at.bytes, 0, *len, at.address)?)),
            Step::String { header } => {
                let (data, len) = asm.buffer(header, &at)?;
                if len == 0 {
                    return Ok(String::new());
                }
                let block = asm.block(data, len)?;
                Ok(decode(&block))
            }
            other => Err(unexpected(other, "text", at.address)),
        }
    })
}

/// Fixed-extent array of `N` elements.
pub fn array<E: 'static, const N: usize>(elem: Codec<E>) -> Codec<[E; N]> {
    let inner = seq(elem);
    codec(
        Shape::Array {
            elem: Box::new(match &inner.shape {
                Shape::Seq(e) => (**e).clone(),
                other => other.clone(),
            }),
            len: N,
        },
        move |asm, step, at| {
            let address = at.address;
            let items = (inner.decode)(asm, step, at)?;
            let len = items.len();
            items.try_into().map_err(|_| Error::Corrupt {
                address,
                message: format!("expected {} elements, found {}", N, len),
            })
        },
    )
}

/// Nested record by value.
pub fn record<T: Mirror>() -> Codec<T> {
    codec(Shape::Record(HostKey::of::<T>()), |asm, step, at| match step {
        Step::Record { .. } => asm.assemble::<T>(at),
        other => Err(unexpected(other, "a record", at.address)),
    })
}

/// Owning pointer; null reads as `None`.
pub fn owned<T: Mirror>() -> Codec<Option<Box<T>>> {
    codec(Shape::Owned(HostKey::of::<T>()), |asm, step, at| match step {
        Step::Owned { link, .. } => match asm.pointer(&at, *link)? {
            0 => Ok(None),
            target => Ok(Some(Box::new(asm.build::<T>(target, at.depth + 1)?))),
        },
        other => Err(unexpected(other, "an owning pointer", at.address)),
    })
}

/// Shared pointer, deduplicated per `(type, address)`; null reads as `None`.
pub fn shared<T: Mirror>() -> Codec<Option<Shared<T>>> {
    codec(Shape::Shared(HostKey::of::<T>()), |asm, step, at| match step {
        Step::Shared { link, .. } => match asm.pointer(&at, *link)? {
            0 => Ok(None),
            target => Ok(Some(asm.shared::<T>(target)?)),
        },
        other => Err(unexpected(other, "a shared pointer", at.address)),
    })
}

/// The record at this very address, as a shared handle.
pub(crate) fn shared_here<T: Mirror>() -> Codec<Shared<T>> {
    codec(Shape::SharedHere(HostKey::of::<T>()), |asm, step, at| match step {
        Step::SharedHere { .. } => asm.shared::<T>(at.address),
        other => Err(unexpected(other, "a shared record", at.address)),
    })
}

/// Back reference: the pointer value is kept, never followed.
pub fn back<T: Mirror>() -> Codec<BackRef<T>> {
    codec(Shape::Back { record: T::RECORD }, |asm, step, at| match step {
        Step::Back { link } => Ok(BackRef::new(asm.pointer(&at, *link)?)),
        other => Err(unexpected(other, "a back reference", at.address)),
    })
}

/// Dynamic sequence (or a fixed array read into a `Vec`).
pub fn seq<E: 'static>(elem: Codec<E>) -> Codec<Vec<E>> {
    let Codec { shape, decode } = elem;
    codec(Shape::Seq(Box::new(shape)), move |asm, step, at| match step {
        Step::Seq {
            elem,
            header,
            stride,
        } => {
            let (data, count) = asm.sequence(header, &at, *stride)?;
            if count == 0 {
                return Ok(Vec::new());
            }
            let depth = asm.descend(at.depth, "sequence", data)?;
            let block = asm.block(data, count * stride)?;
            let mut items = Vec::with_capacity(count);
            for i in 0..count {
                let item = At {
                    bytes: &block[i * stride..(i + 1) * stride],
                    address: data + (i * stride) as u64,
                    depth,
                };
                items.push(decode(asm, elem, item)?);
            }
            Ok(items)
        }
        Step::Array { elem, len, stride } => {
            let mut items = Vec::with_capacity(*len);
            for i in 0..*len {
                let item = at.sub(i * stride, *stride)?;
                items.push(decode(asm, elem, item)?);
            }
            Ok(items)
        }
        other => Err(unexpected(other, "a sequence", at.address)),
    })
}

/// Associative container of keys to values.
pub fn map<K: Ord + 'static, V: 'static>(key: Codec<K>, value: Codec<V>) -> Codec<BTreeMap<K, V>> {
    let Codec {
        shape: key_shape,
        decode: decode_key,
    } = key;
    let Codec {
        shape: value_shape,
        decode: decode_value,
    } = value;
    codec(
        Shape::Map {
            key: Box::new(key_shape),
            value: Box::new(value_shape),
        },
        move |asm, step, at| match step {
            Step::Map {
                key,
                value,
                header,
                value_offset,
                stride,
            } => {
                let (data, count) = asm.sequence(header, &at, *stride)?;
                let mut entries = BTreeMap::new();
                if count == 0 {
                    return Ok(entries);
                }
                let depth = asm.descend(at.depth, "map", data)?;
                let block = asm.block(data, count * stride)?;
                for i in 0..count {
                    let entry = &block[i * stride..(i + 1) * stride];
                    let address = data + (i * stride) as u64;
                    let k = decode_key(
                        asm,
                        key,
                        At {
                            bytes: &entry[..*value_offset],
                            address,
                            depth,
                        },
                    )?;
                    let v = decode_value(
                        asm,
                        value,
                        At {
                            bytes: &entry[*value_offset..],
                            address: address + *value_offset as u64,
                            depth,
                        },
                    )?;
                    entries.insert(k, v);
                }
                Ok(entries)
            }
            other => Err(unexpected(other, "a map", at.address)),
        },
    )
}

/// Pointer to a polymorphic base, routed through `P`'s registry.
pub fn poly<P: Polymorphic>() -> Codec<Option<P>> {
    codec(Shape::Poly(PolyKey::of::<P>()), |asm, step, at| match step {
        Step::Poly { link, .. } => match asm.pointer(&at, *link)? {
            0 => Ok(None),
            target => Ok(Some(asm.poly::<P>(target, at.depth + 1)?)),
        },
        other => Err(unexpected(other, "a polymorphic pointer", at.address)),
    })
}

/// Shared polymorphic pointer, deduplicated per `(P, address)`; null reads
/// as `None`.
pub fn shared_poly<P: Polymorphic>() -> Codec<Option<Shared<P>>> {
    codec(Shape::SharedPoly(PolyKey::of::<P>()), |asm, step, at| match step {
        Step::SharedPoly { link, .. } => match asm.pointer(&at, *link)? {
            0 => Ok(None),
            target => Ok(Some(asm.shared_poly::<P>(target)?)),
        },
        other => Err(unexpected(other, "a shared polymorphic pointer", at.address)),
    })
}

/// Packed flag array indexed by a host enumeration.
pub fn flags<E: FlagIndex>() -> Codec<FlagArray<E>> {
    codec(Shape::Flags { count: E::COUNT }, |asm, step, at| match step {
        Step::Flags { header, .. } => {
            let (data, len) = asm.buffer(header, &at)?;
            if len == 0 {
                return Ok(FlagArray::new());
            }
            let block = asm.block(data, flag_bytes(len))?;
            Ok(FlagArray::from_packed(&block, len))
        }
        other => Err(unexpected(other, "a flag array", at.address)),
    })
}
