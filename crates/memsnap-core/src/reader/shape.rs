//! Type-erased host expectations and their resolution against one version.

use std::any::{TypeId, type_name};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use super::factory::{PlanLayout, PolyLayout, Probe, ReaderFactory};
use super::mirror::{Mirror, Polymorphic};
use crate::error::Result;
use crate::layout::{BufferHeader, ScalarClass, SequenceHeader, Version};

pub(crate) type LayoutFn = fn(&ReaderFactory, &Version) -> Result<Arc<PlanLayout>>;
pub(crate) type PolyLayoutFn = fn(&ReaderFactory, &Version) -> Result<Arc<PolyLayout>>;
pub(crate) type ProbeFn = fn(&ReaderFactory, &Version) -> Probe;

/// Identifies a bound host record type without naming it statically.
#[derive(Clone, Copy)]
pub struct HostKey {
    pub(crate) id: TypeId,
    pub(crate) name: &'static str,
    pub(crate) record: &'static str,
    pub(crate) layout: LayoutFn,
    pub(crate) probe: ProbeFn,
}

impl HostKey {
    pub fn of<T: Mirror>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
            record: T::RECORD,
            layout: |factory, version| Ok(Arc::clone(&factory.bind::<T>(version)?.layout)),
            probe: |factory, version| factory.probe::<T>(version),
        }
    }

    /// Host type name, for diagnostics.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Foreign record the host type mirrors.
    pub fn record(&self) -> &'static str {
        self.record
    }
}

impl PartialEq for HostKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for HostKey {}

impl Hash for HostKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for HostKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.record)
    }
}

/// Identifies a polymorphic host type (a closed set of concretes).
#[derive(Clone, Copy)]
pub struct PolyKey {
    pub(crate) id: TypeId,
    pub(crate) name: &'static str,
    pub(crate) base: &'static str,
    pub(crate) layout: PolyLayoutFn,
    pub(crate) probe: ProbeFn,
}

impl PolyKey {
    pub fn of<P: Polymorphic>() -> Self {
        Self {
            id: TypeId::of::<P>(),
            name: type_name::<P>(),
            base: P::BASE,
            layout: |factory, version| Ok(Arc::clone(&factory.bind_poly::<P>(version)?.layout)),
            probe: |factory, version| factory.probe_poly::<P>(version),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn base(&self) -> &'static str {
        self.base
    }
}

impl PartialEq for PolyKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PolyKey {}

impl Hash for PolyKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for PolyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (base {})", self.name, self.base)
    }
}

/// What a host value expects to find in foreign memory.
#[derive(Debug, Clone)]
pub enum Shape {
    Scalar { size: usize, class: ScalarClass },
    Enum { name: &'static str, size: usize },
    Bits { name: &'static str, width: usize },
    /// Any foreign value of exactly this many bytes.
    Bytes { len: usize },
    /// Fixed char array or `std::string`-style header.
    Text,
    Array { elem: Box<Shape>, len: usize },
    Owned(HostKey),
    Shared(HostKey),
    /// A foreign record viewed as shared from its own address (roots).
    SharedHere(HostKey),
    Back { record: &'static str },
    Record(HostKey),
    Seq(Box<Shape>),
    Map { key: Box<Shape>, value: Box<Shape> },
    Poly(PolyKey),
    /// Polymorphic target deduplicated per address like [`Shape::Shared`].
    SharedPoly(PolyKey),
    Flags { count: usize },
}

impl Shape {
    /// Short description used in bind diagnostics.
    pub fn describe(&self) -> String {
        match self {
            Shape::Scalar { size, class } => format!("{:?} scalar of {} bytes", class, size),
            Shape::Enum { name, size } => format!("enumeration {} ({} bytes)", name, size),
            Shape::Bits { name, width } => format!("bitfield {} ({} bytes)", name, width),
            Shape::Bytes { len } => format!("{}-byte blob", len),
            Shape::Text => "text".to_string(),
            Shape::Array { elem, len } => format!("array of {} x {}", len, elem.describe()),
            Shape::Owned(host) => format!("owning pointer to {}", host.record),
            Shape::Shared(host) => format!("shared pointer to {}", host.record),
            Shape::SharedHere(host) => format!("shared {}", host.record),
            Shape::Back { record } => format!("back reference to {}", record),
            Shape::Record(host) => format!("record {}", host.record),
            Shape::Seq(elem) => format!("sequence of {}", elem.describe()),
            Shape::Map { key, value } => {
                format!("map of {} to {}", key.describe(), value.describe())
            }
            Shape::Poly(poly) => format!("polymorphic pointer to {}", poly.base),
            Shape::SharedPoly(poly) => format!("shared polymorphic pointer to {}", poly.base),
            Shape::Flags { count } => format!("flag array of {}", count),
        }
    }

    /// Host and polymorphic types reachable from this shape.
    pub(crate) fn collect_keys(&self, hosts: &mut Vec<HostKey>, polys: &mut Vec<PolyKey>) {
        match self {
            Shape::Owned(host) | Shape::Shared(host) | Shape::SharedHere(host) | Shape::Record(host) => {
                hosts.push(*host)
            }
            Shape::Poly(poly) | Shape::SharedPoly(poly) => polys.push(*poly),
            Shape::Array { elem, .. } | Shape::Seq(elem) => elem.collect_keys(hosts, polys),
            Shape::Map { key, value } => {
                key.collect_keys(hosts, polys);
                value.collect_keys(hosts, polys);
            }
            _ => {}
        }
    }
}

/// A [`Shape`] resolved against one version: everything needed to read the
/// value without consulting the layout again.
#[derive(Debug, Clone)]
pub enum Step {
    Scalar { size: usize },
    Enum { size: usize },
    Bits { size: usize },
    Bytes { len: usize },
    /// Fixed char array of `len` bytes.
    Text { len: usize },
    /// `std::string`-style header; payload is a follow-up read.
    String { header: BufferHeader },
    Array { elem: Arc<Step>, len: usize, stride: usize },
    /// Pointer at `link` within the value.
    Owned { host: HostKey, link: usize },
    Shared { host: HostKey, link: usize },
    SharedHere { host: HostKey },
    Back { link: usize },
    Record { host: HostKey },
    Seq { elem: Arc<Step>, header: SequenceHeader, stride: usize },
    Map {
        key: Arc<Step>,
        value: Arc<Step>,
        header: SequenceHeader,
        value_offset: usize,
        stride: usize,
    },
    Poly { poly: PolyKey, link: usize },
    SharedPoly { poly: PolyKey, link: usize },
    Flags { header: BufferHeader, count: usize },
}
