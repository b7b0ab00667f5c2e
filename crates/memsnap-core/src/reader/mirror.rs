//! Host-side binding declarations.
//!
//! A host type opts in by implementing [`Mirror`]: it names its foreign
//! record and lists `(foreign field, codec, host field)` associations. The
//! factory turns that table into a per-version plan exactly once.

use std::sync::Arc;

use super::codec::{Codec, Decode};
use super::shape::{HostKey, Shape, Step};
use crate::error::Result;
use crate::session::{Assembler, At};

/// A host type bound to a foreign record.
pub trait Mirror: Default + Send + Sync + 'static {
    /// Foreign record name.
    const RECORD: &'static str;

    fn bind(fields: &mut FieldMap<Self>);
}

pub(crate) type Apply<T> =
    Arc<dyn Fn(&mut Assembler<'_>, &Step, At<'_>, &mut T) -> Result<()> + Send + Sync>;

pub(crate) struct Entry<T> {
    pub(crate) foreign: &'static str,
    pub(crate) shape: Shape,
    pub(crate) apply: Apply<T>,
}

/// Ordered field associations of one host type.
pub struct FieldMap<T> {
    pub(crate) entries: Vec<Entry<T>>,
    pub(crate) bases: Vec<&'static str>,
}

impl<T: 'static> FieldMap<T> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
            bases: Vec::new(),
        }
    }

    /// Associate foreign field `foreign` with a host field.
    pub fn field<V: 'static>(
        &mut self,
        foreign: &'static str,
        codec: Codec<V>,
        access: fn(&mut T) -> &mut V,
    ) -> &mut Self {
        let Codec { shape, decode } = codec;
        self.entries.push(Entry {
            foreign,
            shape,
            apply: apply_with(decode, access),
        });
        self
    }

    /// Take over every association of a base mirror. Base fields are bound
    /// before the fields declared after this call.
    pub fn inherit<B: Mirror>(&mut self, access: fn(&mut T) -> &mut B) -> &mut Self {
        let mut base = FieldMap::<B>::new();
        B::bind(&mut base);

        self.bases.push(B::RECORD);
        self.bases.extend(base.bases);
        for entry in base.entries {
            let inner = entry.apply;
            self.entries.push(Entry {
                foreign: entry.foreign,
                shape: entry.shape,
                apply: apply_fn(move |asm, step, at, host: &mut T| {
                    inner(asm, step, at, access(host))
                }),
            });
        }
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn apply_fn<T, F>(f: F) -> Apply<T>
where
    F: Fn(&mut Assembler<'_>, &Step, At<'_>, &mut T) -> Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

fn apply_with<T: 'static, V: 'static>(decode: Decode<V>, access: fn(&mut T) -> &mut V) -> Apply<T> {
    apply_fn(move |asm, step, at, host: &mut T| {
        *access(host) = decode(asm, step, at)?;
        Ok(())
    })
}

/// A closed set of concrete host types behind one foreign base record.
pub trait Polymorphic: Send + Sync + Sized + 'static {
    /// Foreign base record carrying the discriminator.
    const BASE: &'static str;

    fn register(registry: &mut Registry<Self>);
}

pub(crate) type Build<P> = Arc<dyn Fn(&mut Assembler<'_>, u64, usize) -> Result<P> + Send + Sync>;

pub(crate) struct Arm<P> {
    pub(crate) host: HostKey,
    pub(crate) build: Build<P>,
}

/// Concrete types of a [`Polymorphic`] host, tried in registration order.
pub struct Registry<P> {
    pub(crate) arms: Vec<Arm<P>>,
    pub(crate) fallback: Option<Arm<P>>,
}

impl<P: Polymorphic> Registry<P> {
    pub(crate) fn new() -> Self {
        Self {
            arms: Vec::new(),
            fallback: None,
        }
    }

    pub fn concrete<C: Mirror>(&mut self, wrap: fn(C) -> P) -> &mut Self {
        self.arms.push(arm::<P, C>(wrap));
        self
    }

    /// Read unmatched targets as `B` (the base itself or an ancestor)
    /// instead of failing.
    pub fn fallback<B: Mirror>(&mut self, wrap: fn(B) -> P) -> &mut Self {
        self.fallback = Some(arm::<P, B>(wrap));
        self
    }
}

fn arm<P: 'static, C: Mirror>(wrap: fn(C) -> P) -> Arm<P> {
    Arm {
        host: HostKey::of::<C>(),
        build: build_fn(move |asm, address, depth| Ok(wrap(asm.build::<C>(address, depth)?))),
    }
}

fn build_fn<P, F>(f: F) -> Build<P>
where
    F: Fn(&mut Assembler<'_>, u64, usize) -> Result<P> + Send + Sync + 'static,
{
    Arc::new(f)
}
