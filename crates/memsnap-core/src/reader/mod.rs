//! Host-side reader binding.
//!
//! Host types declare which foreign record they mirror and how each of their
//! fields is decoded; the [`ReaderFactory`] checks those declarations
//! against a layout version and caches the resulting plans.
//!
//! - **Declaring**: [`Mirror`], [`Polymorphic`] and the [`codec`] functions
//! - **Binding**: [`ReaderFactory::bind`], strict or lenient per [`BindPolicy`](crate::BindPolicy)
//! - **Dry runs**: [`ReaderFactory::test_all`] and [`Catalog::validate_against`](crate::layout::Catalog::validate_against)

pub mod codec;
mod factory;
mod handle;
mod mirror;
pub(crate) mod raw;
mod report;
mod resolve;
pub(crate) mod scalar;
mod shape;

pub use codec::Codec;
pub use factory::{PlanLayout, PolyLayout, PolyPlan, ReaderFactory, ReaderPlan};
pub use handle::{BackRef, FlagArray, Shared};
pub use mirror::{FieldMap, Mirror, Polymorphic, Registry};
pub use report::{BindFailure, BindReport, CompatReport};
pub use scalar::{Bitfield, FlagIndex, ForeignEnum, Scalar};
pub use shape::{HostKey, PolyKey, Shape, Step};

pub(crate) use factory::Selection;
pub(crate) use resolve::resolve;
