use std::any::type_name;

use super::assemble::{Assembler, At};
use crate::error::Result;
use crate::reader::codec::{self, Codec};
use crate::reader::{Mirror, Shape, Step};

/// A destination of one snapshot root. Values are staged during assembly
/// and written only once the whole snapshot has succeeded.
pub(crate) trait Slot {
    fn path(&self) -> &str;

    fn shape(&self) -> &Shape;

    /// Host type name, for diagnostics.
    fn host(&self) -> &'static str;

    fn decode(&mut self, asm: &mut Assembler<'_>, step: &Step, at: At<'_>) -> Result<()>;

    fn commit(&mut self);
}

struct TypedRoot<'d, V> {
    path: String,
    codec: Codec<V>,
    dest: &'d mut V,
    staged: Option<V>,
}

impl<V: 'static> Slot for TypedRoot<'_, V> {
    fn path(&self) -> &str {
        &self.path
    }

    fn shape(&self) -> &Shape {
        self.codec.shape()
    }

    fn host(&self) -> &'static str {
        type_name::<V>()
    }

    fn decode(&mut self, asm: &mut Assembler<'_>, step: &Step, at: At<'_>) -> Result<()> {
        self.staged = Some((self.codec.decode)(asm, step, at)?);
        Ok(())
    }

    fn commit(&mut self) {
        if let Some(value) = self.staged.take() {
            *self.dest = value;
        }
    }
}

/// One root of a snapshot: a global symbol path and the host value it is
/// read into.
pub struct Root<'d> {
    pub(crate) slot: Box<dyn Slot + 'd>,
}

impl<'d> Root<'d> {
    pub fn new<V: 'static>(path: impl Into<String>, codec: Codec<V>, dest: &'d mut V) -> Self {
        Self {
            slot: Box::new(TypedRoot {
                path: path.into(),
                codec,
                dest,
                staged: None,
            }),
        }
    }

    /// A root whose global is a record mirrored by `T`.
    pub fn record<T: Mirror>(path: impl Into<String>, dest: &'d mut T) -> Self {
        Self::new(path, codec::record::<T>(), dest)
    }

    pub fn path(&self) -> &str {
        self.slot.path()
    }
}
